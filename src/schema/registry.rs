// ============================================================================
// Module Registry
// ============================================================================
//
// Process-scoped set of loaded modules. Constructed once at startup and
// passed explicitly to every component that needs it, so independent engine
// instances can coexist in one process (tests rely on this).
//
// Feature toggles and deviation installs are the only post-load mutations;
// each bumps the module's schema version so sessions started before the
// change can be detected as stale at commit time.
//
// ============================================================================

use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::core::{ConfError, Result};
use crate::schema::module::Module;

pub struct ModuleRegistry {
    modules: RwLock<HashMap<String, Module>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self {
            modules: RwLock::new(HashMap::new()),
        }
    }

    /// Register a module at load time. Replacing an already-loaded module is
    /// rejected; modules are immutable for the process lifetime apart from
    /// feature and deviation state.
    pub async fn load(&self, module: Module) -> Result<()> {
        let mut modules = self.modules.write().await;
        let name = module.name().to_string();
        if modules.contains_key(&name) {
            return Err(ConfError::Execution(format!(
                "module '{}' is already loaded",
                name
            )));
        }
        modules.insert(name, module);
        Ok(())
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.modules.read().await.contains_key(name)
    }

    /// Clone of the module's current state (features, deviations, version).
    pub async fn snapshot(&self, name: &str) -> Result<Module> {
        self.modules
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| ConfError::ModuleNotFound(name.to_string()))
    }

    pub async fn schema_version(&self, name: &str) -> Result<u64> {
        Ok(self.snapshot(name).await?.schema_version())
    }

    pub async fn feature_enabled(&self, name: &str, feature: &str) -> Result<bool> {
        Ok(self.snapshot(name).await?.feature_enabled(feature))
    }

    /// Enable or disable a feature. Returns the module's schema version
    /// after the call. Sessions opened before a bump fail their next commit
    /// against this module with StaleSchema.
    pub async fn set_feature(&self, name: &str, feature: &str, enabled: bool) -> Result<u64> {
        let mut modules = self.modules.write().await;
        let module = modules
            .get_mut(name)
            .ok_or_else(|| ConfError::ModuleNotFound(name.to_string()))?;
        module.set_feature(feature, enabled);
        Ok(module.schema_version())
    }

    /// Install a run-time deviation, bumping the schema version.
    pub async fn install_deviation(&self, name: &str, deviation: &str) -> Result<u64> {
        let mut modules = self.modules.write().await;
        let module = modules
            .get_mut(name)
            .ok_or_else(|| ConfError::ModuleNotFound(name.to_string()))?;
        Ok(module.install_deviation(deviation))
    }

    pub async fn module_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.modules.read().await.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}
