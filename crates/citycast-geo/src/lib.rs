//! City name normalization and region classification for citycast
//!
//! Everything here is a pure lookup over [`MappingTables`], which are loaded
//! once at startup and shared read-only between tasks.

pub mod normalize;
pub mod region;
pub mod tables;

pub use normalize::{title_case, CanonicalCity, Normalizer};
pub use region::{is_safe_region, RegionClassifier, INCORRECT_REGION, UNKNOWN_REGION};
pub use tables::MappingTables;
