//! # Persisted matcher settings
//!
//! Tuned parameter values are stored as a flat TOML table of `name = value` pairs so that a
//! later session, or the one-shot capture, can start from them.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::disparity::DisparityAlgorithm;
use crate::error::*;

// -----------------------------------------------------------------------------------------------
// DATA STRUCTURES
// -----------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MatcherSettings(BTreeMap<String, i32>);

// -----------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// -----------------------------------------------------------------------------------------------

impl MatcherSettings {
    /// Snapshot every tunable parameter of a matcher.
    pub fn from_matcher(matcher: &dyn DisparityAlgorithm) -> Self {
        Self(
            matcher
                .parameters()
                .into_iter()
                .map(|p| (p.name.to_owned(), p.value))
                .collect()
        )
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| Error::settings(path, e))?;
        let settings: Self = toml::from_str(&text).map_err(|e| Error::settings(path, e))?;
        log::info!("Loaded {} matcher settings from {}", settings.0.len(), path.display());
        Ok(settings)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let text = toml::to_string(self).map_err(|e| Error::settings(path, e))?;
        std::fs::write(path, text).map_err(|e| Error::settings(path, e))?;
        log::info!("Saved matcher settings to {}", path.display());
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<i32> {
        self.0.get(name).copied()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: i32) {
        self.0.insert(name.into(), value);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, i32)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Apply the stored values to a matcher.
    ///
    /// Names the matcher does not know are skipped with a warning, since settings from one
    /// engine are commonly reused with another. Values the matcher rejects are an error.
    pub fn apply_to(&self, matcher: &mut dyn DisparityAlgorithm) -> Result<()> {
        let known = matcher.parameter_names();
        let mut pending: Vec<(&str, i32)> = Vec::new();

        for (name, value) in self.iter() {
            if known.iter().any(|k| *k == name) {
                pending.push((name, value));
            } else {
                log::warn!("Ignoring setting `{}`, the matcher has no such parameter", name);
            }
        }

        // Parameters constrained against each other (p1 < p2) may need a second pass
        for pass in 0..2 {
            let mut failed = Vec::new();
            for (name, value) in pending {
                if let Err(e) = matcher.set_parameter(name, value) {
                    if pass == 1 {
                        return Err(e);
                    }
                    failed.push((name, value));
                }
            }
            pending = failed;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::semi_global::{Params, SemiGlobalMatcher};

    #[test]
    fn save_and_load_flat_table() {
        let mut settings = MatcherSettings::default();
        settings.insert("block_size", 7);
        settings.insert("num_disparities", 32);

        let file = tempfile::NamedTempFile::new().unwrap();
        settings.save(file.path()).unwrap();

        let text = std::fs::read_to_string(file.path()).unwrap();
        assert!(text.contains("block_size = 7"));
        assert_eq!(MatcherSettings::load(file.path()).unwrap(), settings);
    }

    #[test]
    fn applies_dependent_values_in_either_order() {
        let mut matcher = SemiGlobalMatcher::new(Params::default());
        let mut settings = MatcherSettings::default();
        // p1 sorts first but is only valid once p2 has been raised
        settings.insert("p1", 1000);
        settings.insert("p2", 4000);
        settings.insert("unknown", 3);

        settings.apply_to(&mut matcher).unwrap();
        assert_eq!(matcher.params().p1, 1000);
        assert_eq!(matcher.params().p2, 4000);
    }

    #[test]
    fn rejected_values_are_errors() {
        let mut matcher = SemiGlobalMatcher::new(Params::default());
        let mut settings = MatcherSettings::default();
        settings.insert("num_disparities", 17);
        assert!(matches!(settings.apply_to(&mut matcher), Err(Error::InvalidParameter { .. })));
    }

    #[test]
    fn missing_file_is_a_settings_error() {
        let err = MatcherSettings::load("/nonexistent/settings.toml").unwrap_err();
        assert!(matches!(err, Error::Settings { .. }));
    }
}
