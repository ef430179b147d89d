// ============================================================================
// Schema Validation Interface
// ============================================================================
//
// Tree-against-schema validation is the external schema library's job; the
// commit pipeline only needs the capability interface. Two implementations
// ship with the crate: a permissive one for workloads that validate
// elsewhere, and a feature-gated one that rejects data under paths whose
// guarding feature is disabled (enough to model optional-feature semantics
// end to end).
//
// ============================================================================

use async_trait::async_trait;

use crate::core::Path;
use crate::schema::module::Module;
use crate::storage::tree::Tree;

/// A single validation failure: the first offending path plus a reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub path: String,
    pub reason: String,
}

#[async_trait]
pub trait SchemaValidator: Send + Sync {
    /// Validate a candidate post-commit tree against the module's schema
    /// state. Returns the first violation found.
    async fn validate(&self, tree: &Tree, module: &Module) -> Result<(), Violation>;
}

/// Accepts everything.
pub struct PermissiveValidator;

#[async_trait]
impl SchemaValidator for PermissiveValidator {
    async fn validate(&self, _tree: &Tree, _module: &Module) -> Result<(), Violation> {
        Ok(())
    }
}

/// One feature gate: data under `path` in `module` requires `feature`.
#[derive(Debug, Clone)]
pub struct FeatureGate {
    pub module: String,
    pub path: Path,
    pub feature: String,
}

/// Rejects data under feature-gated subtrees while the feature is disabled.
pub struct FeatureGatedValidator {
    gates: Vec<FeatureGate>,
}

impl FeatureGatedValidator {
    pub fn new(gates: Vec<FeatureGate>) -> Self {
        Self { gates }
    }
}

#[async_trait]
impl SchemaValidator for FeatureGatedValidator {
    async fn validate(&self, tree: &Tree, module: &Module) -> Result<(), Violation> {
        for gate in &self.gates {
            if gate.module != module.name() || module.feature_enabled(&gate.feature) {
                continue;
            }
            for (path, _) in tree.visit() {
                if path.starts_with(&gate.path) {
                    return Err(Violation {
                        path: path.to_string(),
                        reason: format!(
                            "data requires disabled feature '{}' of module '{}'",
                            gate.feature, gate.module
                        ),
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Value;

    fn p(s: &str) -> Path {
        Path::parse(s).unwrap()
    }

    #[tokio::test]
    async fn test_permissive_accepts_anything() {
        let mut tree = Tree::new("m");
        tree.set_leaf(&p("/m:x"), Value::Int(1)).unwrap();
        let module = Module::new("m", None);
        assert!(PermissiveValidator.validate(&tree, &module).await.is_ok());
    }

    #[tokio::test]
    async fn test_gate_blocks_until_feature_enabled() {
        let validator = FeatureGatedValidator::new(vec![FeatureGate {
            module: "m".into(),
            path: p("/m:vlans"),
            feature: "vlan".into(),
        }]);

        let mut tree = Tree::new("m");
        tree.set_leaf(&p("/m:vlans/default-id"), Value::Int(1)).unwrap();

        let mut module = Module::new("m", None);
        module.declare_feature("vlan", false);
        let violation = validator.validate(&tree, &module).await.unwrap_err();
        assert!(violation.path.starts_with("/m:vlans"));

        module.set_feature("vlan", true);
        assert!(validator.validate(&tree, &module).await.is_ok());
    }

    #[tokio::test]
    async fn test_gate_ignores_other_modules_and_paths() {
        let validator = FeatureGatedValidator::new(vec![FeatureGate {
            module: "m".into(),
            path: p("/m:vlans"),
            feature: "vlan".into(),
        }]);

        let mut tree = Tree::new("m");
        tree.set_leaf(&p("/m:system/hostname"), "r1".into()).unwrap();
        let mut module = Module::new("m", None);
        module.declare_feature("vlan", false);
        assert!(validator.validate(&tree, &module).await.is_ok());

        let other = Module::new("other", None);
        let tree = Tree::new("other");
        assert!(validator.validate(&tree, &other).await.is_ok());
    }
}
