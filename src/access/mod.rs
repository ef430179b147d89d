// ============================================================================
// Access Control Interface
// ============================================================================
//
// Node-level authorization is an external collaborator; sessions consult it
// before every read or edit is accepted. A denial always surfaces as
// AccessDenied to the caller, never as a silent no-op.
//
// ============================================================================

use async_trait::async_trait;

use crate::core::Path;

/// What a session is trying to do at a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessOp {
    Read,
    /// set / create-list-entry / move
    Write,
    Delete,
}

/// Identity a session is bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    user: String,
}

impl Credential {
    pub fn new(user: impl Into<String>) -> Self {
        Self { user: user.into() }
    }

    pub fn user(&self) -> &str {
        &self.user
    }
}

#[async_trait]
pub trait AccessControl: Send + Sync {
    async fn authorize(
        &self,
        credential: &Credential,
        module: &str,
        path: &Path,
        op: AccessOp,
    ) -> bool;
}

/// Grants everything. The default for engines without an access policy.
pub struct AllowAll;

#[async_trait]
impl AccessControl for AllowAll {
    async fn authorize(&self, _: &Credential, _: &str, _: &Path, _: AccessOp) -> bool {
        true
    }
}

/// Denies writes and deletes under configured subtrees for all but the
/// listed owner. Reference implementation; production policies live behind
/// the same trait.
pub struct SubtreeAcl {
    rules: Vec<AclRule>,
}

#[derive(Debug, Clone)]
pub struct AclRule {
    pub module: String,
    pub subtree: Path,
    /// The only user allowed to modify the subtree. Reads stay open.
    pub owner: String,
}

impl SubtreeAcl {
    pub fn new(rules: Vec<AclRule>) -> Self {
        Self { rules }
    }
}

#[async_trait]
impl AccessControl for SubtreeAcl {
    async fn authorize(
        &self,
        credential: &Credential,
        module: &str,
        path: &Path,
        op: AccessOp,
    ) -> bool {
        if op == AccessOp::Read {
            return true;
        }
        for rule in &self.rules {
            if rule.module == module && path.starts_with(&rule.subtree) && credential.user() != rule.owner
            {
                return false;
            }
        }
        true
    }
}
