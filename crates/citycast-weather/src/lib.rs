//! Weather lookups for citycast
//!
//! One provider request per canonical city, with payload validation and a
//! three-way outcome: a record, a soft "city not found", or a hard error.

pub mod provider;
pub mod retry;
pub mod types;

pub use provider::WeatherProvider;
pub use retry::RetryConfig;
pub use types::*;
