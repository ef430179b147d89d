pub mod graph;
pub mod module;
pub mod registry;
pub mod validator;

pub use graph::{DependencyEdge, DependencyGraph, DependencyKind};
pub use module::Module;
pub use registry::ModuleRegistry;
pub use validator::{FeatureGate, FeatureGatedValidator, PermissiveValidator, SchemaValidator, Violation};
