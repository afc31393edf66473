use std::path::{Component, Path};
use std::sync::Arc;

use crate::normalize::{title_case, CanonicalCity};
use crate::tables::MappingTables;

/// Label for cities that belong to no configured region
pub const UNKNOWN_REGION: &str = "Unknown";

/// Bucket for cities the weather provider does not recognize
pub const INCORRECT_REGION: &str = "Incorrect";

/// A region label doubles as a directory name, so it must be exactly one
/// normal path component
pub fn is_safe_region(region: &str) -> bool {
    if region.is_empty() || region.contains(['/', '\\']) {
        return false;
    }
    let mut components = Path::new(region).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

/// Maps canonical city names to region labels
#[derive(Debug, Clone)]
pub struct RegionClassifier {
    tables: Arc<MappingTables>,
}

impl RegionClassifier {
    pub fn new(tables: Arc<MappingTables>) -> Self {
        Self { tables }
    }

    /// Region label for `city`, or [`UNKNOWN_REGION`] when no region lists it.
    pub fn classify_region(&self, city: &CanonicalCity) -> String {
        // Same trim + title-case convention as the normalizer, so a hand-built
        // name still matches the membership table
        let key = title_case(city.as_str().trim());
        self.tables
            .region_of(&key)
            .unwrap_or(UNKNOWN_REGION)
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
    use super::*;
    use crate::normalize::Normalizer;

    fn tables() -> Arc<MappingTables> {
        Arc::new(
            MappingTables::from_json(
                r#"{}"#,
                r#"{"Nyc": "New York"}"#,
                r#"{"Europe": ["Kyiv", "London", "Paris"], "America": ["New York", "Lima"]}"#,
            )
            .unwrap(),
        )
    }

    #[test]
    fn test_classify_known_cities() {
        let tables = tables();
        let normalizer = Normalizer::new(tables.clone());
        let classifier = RegionClassifier::new(tables);

        assert_eq!(classifier.classify_region(&normalizer.canonicalize("kyiv")), "Europe");
        assert_eq!(classifier.classify_region(&normalizer.canonicalize("NYC")), "America");
    }

    #[test]
    fn test_safe_region_labels() {
        assert!(is_safe_region("Europe"));
        assert!(is_safe_region("North America"));
        assert!(is_safe_region(UNKNOWN_REGION));
        assert!(!is_safe_region(""));
        assert!(!is_safe_region("."));
        assert!(!is_safe_region(".."));
        assert!(!is_safe_region("../etc"));
        assert!(!is_safe_region("Europe/East"));
        assert!(!is_safe_region("Europe\\East"));
    }

    #[test]
    fn test_unlisted_city_is_unknown() {
        let tables = tables();
        let normalizer = Normalizer::new(tables.clone());
        let classifier = RegionClassifier::new(tables);

        for raw in ["Atlantis", "El Dorado", "  "] {
            let city = normalizer.canonicalize(raw);
            assert_eq!(classifier.classify_region(&city), UNKNOWN_REGION);
        }
    }

    #[test]
    fn test_empty_tables_classify_everything_unknown() {
        let tables = Arc::new(MappingTables::default());
        let normalizer = Normalizer::new(tables.clone());
        let classifier = RegionClassifier::new(tables);
        assert_eq!(
            classifier.classify_region(&normalizer.canonicalize("London")),
            UNKNOWN_REGION
        );
    }
}
