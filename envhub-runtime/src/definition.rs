//! Environment definitions as served by the registry.
//!
//! A definition is resolved once per request and passed by value into the
//! controller. Only `deployConfig` is interpreted; `build_config` and
//! `test_config` are carried through untouched.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::{InstanceError, Result};

/// Registry lifecycle status of a definition. Encoded as an integer on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum DefinitionStatus {
    #[default]
    Init,
    Pending,
    Creating,
    Created,
    Testing,
    Verified,
    Ready,
    Released,
    Failed,
}

impl From<u8> for DefinitionStatus {
    fn from(value: u8) -> Self {
        match value {
            1 => DefinitionStatus::Pending,
            2 => DefinitionStatus::Creating,
            3 => DefinitionStatus::Created,
            4 => DefinitionStatus::Testing,
            5 => DefinitionStatus::Verified,
            6 => DefinitionStatus::Ready,
            7 => DefinitionStatus::Released,
            8 => DefinitionStatus::Failed,
            _ => DefinitionStatus::Init,
        }
    }
}

impl From<DefinitionStatus> for u8 {
    fn from(status: DefinitionStatus) -> Self {
        status as u8
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub content: String,
}

/// How the merge treats template resources.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceMode {
    /// Overwrite template requests/limits with `cpu` / `memory`.
    Autoscale,
    /// Keep the template's hand-tuned resources.
    #[default]
    #[serde(other)]
    Template,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployConfig {
    #[serde(default, deserialize_with = "string_or_number", skip_serializing_if = "Option::is_none")]
    pub cpu: Option<String>,
    #[serde(default, deserialize_with = "string_or_number", skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
    #[serde(default, deserialize_with = "string_or_number", skip_serializing_if = "Option::is_none")]
    pub ephemeral_storage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_template: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub second_image_name: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub environment_variables: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub arguments: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<ResourceMode>,
    /// Hashed tenant key, stamped by the gateway on create.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    /// Unvalidated keys kept for forward compatibility.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl DeployConfig {
    pub fn is_autoscale(&self) -> bool {
        self.resource == Some(ResourceMode::Autoscale)
    }

    /// Non-empty TTL, if any.
    pub fn ttl(&self) -> Option<&str> {
        self.ttl.as_deref().map(str::trim).filter(|t| !t.is_empty())
    }

    pub fn template_kind(&self) -> &str {
        self.pod_template
            .as_deref()
            .filter(|k| !k.is_empty())
            .unwrap_or(crate::DEFAULT_TEMPLATE_KIND)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentDefinition {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub code_url: String,
    #[serde(default)]
    pub status: DefinitionStatus,
    #[serde(default)]
    pub artifacts: Vec<Artifact>,
    #[serde(default)]
    pub build_config: Map<String, Value>,
    #[serde(default)]
    pub test_config: Map<String, Value>,
    #[serde(rename = "deployConfig", default)]
    pub deploy_config: DeployConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl EnvironmentDefinition {
    /// First artifact of type `image`.
    pub fn primary_image(&self) -> Option<&str> {
        self.artifacts
            .iter()
            .find(|a| a.kind == "image" && !a.content.is_empty())
            .map(|a| a.content.as_str())
    }

    /// Fail unless the definition can be turned into a pod.
    pub fn validate_for_instantiation(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(InstanceError::InvalidInput("definition name is required".into()));
        }
        if self.primary_image().is_none() {
            return Err(InstanceError::InvalidInput(format!(
                "definition {} has no image artifact",
                self.name
            )));
        }
        Ok(())
    }

    /// Set `secondImageName` from a datasource suffix. An empty datasource leaves it unset.
    pub fn apply_datasource(&mut self, datasource: &str) {
        if let Some(image) =
            compose_second_image(self.deploy_config.image_prefix.as_deref(), datasource)
        {
            self.deploy_config.second_image_name = Some(image);
        }
    }

    /// `name@version`, or just `name` when unversioned.
    pub fn qualified_name(&self) -> String {
        if self.version.is_empty() {
            self.name.clone()
        } else {
            format!("{}@{}", self.name, self.version)
        }
    }
}

/// `prefix:datasource`, with the default prefix when none is configured.
pub fn compose_second_image(prefix: Option<&str>, datasource: &str) -> Option<String> {
    let datasource = datasource.trim();
    if datasource.is_empty() {
        return None;
    }
    let prefix = prefix
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .unwrap_or(crate::DEFAULT_IMAGE_PREFIX);
    Some(format!("{prefix}:{datasource}"))
}

/// Split `name@version`; the version is empty when absent.
pub fn split_name_version(id: &str) -> (String, String) {
    match id.split_once('@') {
        Some((name, version)) => (name.to_string(), version.to_string()),
        None => (id.to_string(), String::new()),
    }
}

/// Split `name@version`, rejecting anything without both parts.
pub fn split_name_version_strict(id: &str) -> Result<(String, String)> {
    match id.split_once('@') {
        Some((name, version)) if !name.is_empty() && !version.is_empty() => {
            Ok((name.to_string(), version.to_string()))
        }
        Some(_) => Err(InstanceError::InvalidInput(format!(
            "'{id}' must have a non-empty name and version"
        ))),
        None => Err(InstanceError::InvalidInput(format!(
            "'{id}' is not in name@version format"
        ))),
    }
}

fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}
