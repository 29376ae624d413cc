//! Role → permission lookup.

use std::collections::{HashMap, HashSet};

/// Wildcard permission granting everything.
pub const ALL_PERMISSIONS: &str = "all";

/// Resolves the permissions granted by a role.
pub trait PermissionLookup: Send + Sync {
    /// Permissions of `role`; unknown roles grant nothing.
    fn permissions_for(&self, role: &str) -> Vec<String>;

    /// Union of the permissions of every role.
    fn expand(&self, roles: &[String]) -> HashSet<String> {
        roles
            .iter()
            .flat_map(|role| self.permissions_for(role))
            .collect()
    }
}

/// Fixed role table.
#[derive(Debug, Clone)]
pub struct StaticRolePermissions {
    table: HashMap<String, Vec<String>>,
}

impl StaticRolePermissions {
    /// Empty table.
    pub fn empty() -> Self {
        Self {
            table: HashMap::new(),
        }
    }

    pub fn with_role(mut self, role: &str, permissions: &[&str]) -> Self {
        self.table.insert(
            role.to_ascii_lowercase(),
            permissions.iter().map(|p| p.to_string()).collect(),
        );
        self
    }
}

impl Default for StaticRolePermissions {
    fn default() -> Self {
        Self::empty()
            .with_role("admin", &[ALL_PERMISSIONS])
            .with_role("operator", &["create_event", "create_reward", "read_reward"])
            .with_role("auditor", &["read_reward"])
            .with_role("user", &["request_reward"])
    }
}

impl PermissionLookup for StaticRolePermissions {
    fn permissions_for(&self, role: &str) -> Vec<String> {
        self.table
            .get(&role.to_ascii_lowercase())
            .cloned()
            .unwrap_or_default()
    }
}
