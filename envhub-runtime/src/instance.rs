use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::definition::EnvironmentDefinition;

/// Lifecycle status mirrored from the platform. Never written by envhub.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InstanceStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    /// Deletion has been requested and is in progress.
    Terminated,
    #[default]
    #[serde(other)]
    Unknown,
}

impl InstanceStatus {
    /// Map a pod phase string, with deletion in progress taking precedence.
    pub fn from_phase(phase: Option<&str>, deleting: bool) -> Self {
        if deleting {
            return InstanceStatus::Terminated;
        }
        match phase {
            Some("Pending") => InstanceStatus::Pending,
            Some("Running") => InstanceStatus::Running,
            Some("Succeeded") => InstanceStatus::Succeeded,
            Some("Failed") => InstanceStatus::Failed,
            _ => InstanceStatus::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceStatus::Pending => "Pending",
            InstanceStatus::Running => "Running",
            InstanceStatus::Succeeded => "Succeeded",
            InstanceStatus::Failed => "Failed",
            InstanceStatus::Terminated => "Terminated",
            InstanceStatus::Unknown => "Unknown",
        }
    }
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A live sandbox as seen through the controller or a REST backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<EnvironmentDefinition>,
    #[serde(default)]
    pub status: InstanceStatus,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ip: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ttl: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Instance {
    pub fn new(id: impl Into<String>, status: InstanceStatus) -> Self {
        Self {
            id: id.into(),
            status,
            ..Default::default()
        }
    }
}

/// Index entry for "list my instances".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceSummary {
    pub id: String,
    #[serde(default)]
    pub env_name: String,
    #[serde(default)]
    pub env_version: String,
    #[serde(default)]
    pub status: InstanceStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl From<&Instance> for InstanceSummary {
    fn from(instance: &Instance) -> Self {
        let (env_name, env_version) = instance
            .env
            .as_ref()
            .map(|env| (env.name.clone(), env.version.clone()))
            .unwrap_or_default();
        Self {
            id: instance.id.clone(),
            env_name,
            env_version,
            status: instance.status,
            created_at: instance.created_at,
        }
    }
}

impl InstanceSummary {
    /// Empty `name`/`version` match anything.
    pub fn matches(&self, name: &str, version: &str) -> bool {
        (name.is_empty() || self.env_name == name)
            && (version.is_empty() || self.env_version == version)
    }
}

/// Criteria for `InstanceBackend::list`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListFilter {
    pub env_name: Option<String>,
    pub env_version: Option<String>,
    pub owner: Option<String>,
    pub expired_only: bool,
}

impl ListFilter {
    pub fn expired() -> Self {
        Self {
            expired_only: true,
            ..Default::default()
        }
    }

    pub fn for_owner(owner: impl Into<String>) -> Self {
        Self {
            owner: Some(owner.into()),
            ..Default::default()
        }
    }

    /// Client-side match for backends that cannot filter remotely. Name and
    /// version only constrain instances that report their definition.
    pub fn matches(&self, instance: &Instance) -> bool {
        if let Some(owner) = &self.owner {
            if instance.owner.as_deref() != Some(owner.as_str()) {
                return false;
            }
        }
        let Some(env) = instance.env.as_ref() else {
            return true;
        };
        if let Some(name) = self.env_name.as_deref().filter(|n| !n.is_empty()) {
            if env.name != name {
                return false;
            }
        }
        if let Some(version) = self.env_version.as_deref().filter(|v| !v.is_empty()) {
            if env.version != version {
                return false;
            }
        }
        true
    }
}

/// Outcome of one reclamation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupReport {
    pub deleted: usize,
    pub failed: usize,
    pub skipped: usize,
}
