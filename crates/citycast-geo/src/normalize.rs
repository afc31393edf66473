//! Typo correction and canonicalization of raw city strings.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::tables::MappingTables;

/// Trimmed, title-cased, alias-resolved city name.
///
/// This is the key used for region classification and the name sent to the
/// weather provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CanonicalCity(String);

impl CanonicalCity {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CanonicalCity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Upper-case the first letter of every alphabetic run and lower-case the rest.
///
/// `"new york"` becomes `"New York"`, `"RIO-DE-JANEIRO"` becomes
/// `"Rio-De-Janeiro"`.
pub fn title_case(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut in_word = false;

    for ch in input.chars() {
        if ch.is_alphabetic() {
            if in_word {
                out.extend(ch.to_lowercase());
            } else {
                out.extend(ch.to_uppercase());
            }
            in_word = true;
        } else {
            out.push(ch);
            in_word = false;
        }
    }

    out
}

fn tidy(raw: &str) -> String {
    title_case(raw.trim())
}

/// Applies the typo and alias tables to raw user input.
#[derive(Debug, Clone)]
pub struct Normalizer {
    tables: Arc<MappingTables>,
}

impl Normalizer {
    pub fn new(tables: Arc<MappingTables>) -> Self {
        Self { tables }
    }

    /// Trim, title-case and replace a known misspelling.
    pub fn correct_typos(&self, raw: &str) -> String {
        let city = tidy(raw);
        match self.tables.typo(&city) {
            Some(fixed) => fixed.to_string(),
            None => city,
        }
    }

    /// Trim, title-case and resolve an alias to its canonical name.
    pub fn normalize_city(&self, corrected: &str) -> CanonicalCity {
        let city = tidy(corrected);
        match self.tables.alias(&city) {
            Some(canonical) => CanonicalCity(canonical.to_string()),
            None => CanonicalCity(city),
        }
    }

    /// Full pipeline for one raw input string.
    pub fn canonicalize(&self, raw: &str) -> CanonicalCity {
        let canonical = self.normalize_city(&self.correct_typos(raw));
        tracing::trace!("Canonicalized {:?} -> {}", raw, canonical);
        canonical
    }
}
