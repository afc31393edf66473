//! Static lookup tables: typo corrections, city aliases and region membership.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use citycast_core::{ConfigError, TablesConfig};
use serde_json::{Map, Value};

use crate::region::{is_safe_region, INCORRECT_REGION};

/// Immutable mapping tables, built once and shared by every task.
#[derive(Debug, Clone, Default)]
pub struct MappingTables {
    typos: HashMap<String, String>,
    aliases: HashMap<String, String>,
    /// Region membership in file order; the first matching region wins.
    regions: Vec<(String, HashSet<String>)>,
}

impl MappingTables {
    /// Load all three tables from the configured files.
    ///
    /// # Errors
    /// Returns `ConfigError::NotFound` if a file is missing and
    /// `ConfigError::ParseError` if one is not the expected JSON shape.
    pub fn load(config: &TablesConfig) -> Result<Self, ConfigError> {
        let typos = parse_string_map(&read_table(&config.typos)?, &config.typos)?;
        let aliases = parse_string_map(&read_table(&config.aliases)?, &config.aliases)?;
        let regions = parse_regions(&read_table(&config.regions)?, &config.regions)?;

        tracing::info!(
            "Loaded mapping tables: {} typos, {} aliases, {} regions",
            typos.len(),
            aliases.len(),
            regions.len()
        );

        Ok(Self {
            typos,
            aliases,
            regions,
        })
    }

    /// Build tables from in-memory JSON documents (same shapes as the files).
    ///
    /// # Errors
    /// Returns `ConfigError::ParseError` if any document is malformed.
    pub fn from_json(typos: &str, aliases: &str, regions: &str) -> Result<Self, ConfigError> {
        let source = Path::new("<inline>");
        Ok(Self {
            typos: parse_string_map(typos, source)?,
            aliases: parse_string_map(aliases, source)?,
            regions: parse_regions(regions, source)?,
        })
    }

    pub fn typo(&self, city: &str) -> Option<&str> {
        self.typos.get(city).map(String::as_str)
    }

    pub fn alias(&self, city: &str) -> Option<&str> {
        self.aliases.get(city).map(String::as_str)
    }

    /// First region (in file order) whose member set contains `city`
    pub fn region_of(&self, city: &str) -> Option<&str> {
        self.regions
            .iter()
            .find(|(_, members)| members.contains(city))
            .map(|(region, _)| region.as_str())
    }

    pub fn region_names(&self) -> impl Iterator<Item = &str> {
        self.regions.iter().map(|(region, _)| region.as_str())
    }
}

fn read_table(path: &Path) -> Result<String, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.display().to_string()));
    }
    std::fs::read_to_string(path)
        .map_err(|e| ConfigError::ParseError(format!("{}: {}", path.display(), e)))
}

fn parse_string_map(contents: &str, source: &Path) -> Result<HashMap<String, String>, ConfigError> {
    serde_json::from_str(contents)
        .map_err(|e| ConfigError::ParseError(format!("{}: {}", source.display(), e)))
}

fn parse_regions(
    contents: &str,
    source: &Path,
) -> Result<Vec<(String, HashSet<String>)>, ConfigError> {
    let raw: Map<String, Value> = serde_json::from_str(contents)
        .map_err(|e| ConfigError::ParseError(format!("{}: {}", source.display(), e)))?;

    raw.into_iter()
        .map(|(region, members)| {
            if !is_safe_region(&region) {
                return Err(ConfigError::Invalid(format!(
                    "{}: region label {:?} must be a single path component",
                    source.display(),
                    region
                )));
            }
            if region == INCORRECT_REGION {
                return Err(ConfigError::Invalid(format!(
                    "{}: region label {:?} is reserved for unrecognized cities",
                    source.display(),
                    region
                )));
            }

            let members: Vec<String> = serde_json::from_value(members).map_err(|e| {
                ConfigError::ParseError(format!(
                    "{}: region '{}' must list city names: {}",
                    source.display(),
                    region,
                    e
                ))
            })?;
            Ok((region, members.into_iter().collect()))
        })
        .collect()
}
