// ============================================================================
// Module Model
// ============================================================================

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A loaded module: a named configuration namespace whose data node
/// definitions live in the external schema library. The registry holds one
/// of these per loaded module for the process lifetime; only feature state
/// and deviations change after load, and every such change bumps
/// `schema_version`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Module {
    name: String,
    revision: Option<String>,
    features: BTreeMap<String, bool>,
    deviations: Vec<String>,
    schema_version: u64,
}

impl Module {
    pub fn new(name: impl Into<String>, revision: Option<String>) -> Self {
        Self {
            name: name.into(),
            revision,
            features: BTreeMap::new(),
            deviations: Vec::new(),
            schema_version: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn revision(&self) -> Option<&str> {
        self.revision.as_deref()
    }

    /// Declare an optional feature and its initial state. Load-time only,
    /// does not bump the schema version.
    pub fn declare_feature(&mut self, feature: impl Into<String>, enabled: bool) {
        self.features.insert(feature.into(), enabled);
    }

    pub fn feature_enabled(&self, feature: &str) -> bool {
        self.features.get(feature).copied().unwrap_or(false)
    }

    pub fn features(&self) -> &BTreeMap<String, bool> {
        &self.features
    }

    /// Flip a feature. Returns the new schema version, or None when the
    /// feature is already in the requested state (no version bump).
    pub(crate) fn set_feature(&mut self, feature: &str, enabled: bool) -> Option<u64> {
        match self.features.get_mut(feature) {
            Some(state) if *state != enabled => {
                *state = enabled;
                self.schema_version += 1;
                Some(self.schema_version)
            }
            Some(_) => None,
            None => {
                self.features.insert(feature.to_string(), enabled);
                self.schema_version += 1;
                Some(self.schema_version)
            }
        }
    }

    /// Install a run-time deviation. Bumps the schema version.
    pub(crate) fn install_deviation(&mut self, deviation: impl Into<String>) -> u64 {
        self.deviations.push(deviation.into());
        self.schema_version += 1;
        self.schema_version
    }

    pub fn deviations(&self) -> &[String] {
        &self.deviations
    }

    pub fn schema_version(&self) -> u64 {
        self.schema_version
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feature_toggle_bumps_version() {
        let mut m = Module::new("m", None);
        m.declare_feature("vlan", false);
        assert_eq!(m.schema_version(), 0);

        assert_eq!(m.set_feature("vlan", true), Some(1));
        assert!(m.feature_enabled("vlan"));
        // same state again: no bump
        assert_eq!(m.set_feature("vlan", true), None);
        assert_eq!(m.schema_version(), 1);
    }

    #[test]
    fn test_unknown_feature_is_disabled() {
        let m = Module::new("m", Some("2024-01-01".into()));
        assert!(!m.feature_enabled("nope"));
        assert_eq!(m.revision(), Some("2024-01-01"));
    }

    #[test]
    fn test_deviation_bumps_version() {
        let mut m = Module::new("m", None);
        assert_eq!(m.install_deviation("m-deviations"), 1);
        assert_eq!(m.deviations(), &["m-deviations".to_string()]);
    }
}
