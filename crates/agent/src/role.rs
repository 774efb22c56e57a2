//! Role selection: which persona (system prompt) answers a conversation.
//!
//! A new conversation is matched against each role's keywords in table
//! order; the first hit wins, otherwise the default role is used. Once a
//! conversation has a role it keeps it until the context is cleared.
//! Roles are read from the config store on every call, so a settings
//! reload takes effect on the next new conversation.

use std::sync::Arc;

use tracing::{debug, info, warn};
use traymind_config::{ConfigStore, RoleConfig};

/// The outcome of a selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedRole {
    pub id: String,
    pub system_prompt: String,
}

impl From<&RoleConfig> for SelectedRole {
    fn from(role: &RoleConfig) -> Self {
        Self {
            id: role.id.clone(),
            system_prompt: role.system_prompt.clone(),
        }
    }
}

pub struct RoleSelector {
    config: Arc<ConfigStore>,
}

impl RoleSelector {
    pub fn new(config: Arc<ConfigStore>) -> Self {
        let roles = config.get().roles;
        info!(
            roles = roles.roles.len(),
            default = %roles.default_role_id,
            "Role table loaded"
        );
        Self { config }
    }

    /// Pick the role for `query`.
    ///
    /// `current` is the role already in use for this conversation, if any.
    /// Returns `None` only when the role table is empty.
    pub fn select(&self, query: &str, current: Option<&str>) -> Option<SelectedRole> {
        let table = self.config.get().roles;

        if let Some(current) = current {
            match table.find(current) {
                Some(role) => return Some(role.into()),
                None => warn!(role = %current, "Current role no longer configured, reselecting"),
            }
        }

        let query = query.to_lowercase();
        for role in &table.roles {
            if let Some(keyword) = role
                .keywords
                .iter()
                .find(|k| !k.is_empty() && query.contains(k.to_lowercase().as_str()))
            {
                info!(role = %role.id, keyword = %keyword, "Role selected by keyword");
                return Some(role.into());
            }
        }

        let role = table.default_role()?;
        debug!(role = %role.id, "No keyword matched, using default role");
        Some(role.into())
    }
}
