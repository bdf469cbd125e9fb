//! Client for the registry / identity service that sits behind the gateway.
//!
//! | Method | Path | Returns |
//! |---|---|---|
//! | `GET` | `env/{name}/{version}` | definition (404 or `null` data when absent) |
//! | `GET` | `token/validate` | `{subject, tenant?}` for the bearer token |

use std::time::Duration;

use envhub_runtime::error::{InstanceError, Result};
use envhub_runtime::http::{auth_headers, build_url, decode_envelope, json_headers, send_json};
use envhub_runtime::util::{http_client, tenant_key};
use envhub_runtime::EnvironmentDefinition;
use reqwest::{Client, Method};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// A validated caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub subject: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant: Option<String>,
}

impl Principal {
    /// Hashed tenant identity used for labels and index keys.
    pub fn tenant_key(&self) -> String {
        let identity = self
            .tenant
            .as_deref()
            .filter(|t| !t.is_empty())
            .unwrap_or(&self.subject);
        tenant_key(identity)
    }
}

pub struct BackendClient {
    base_url: String,
    client: Client,
}

impl BackendClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            base_url: base_url.into(),
            client: http_client(timeout)?,
        })
    }

    pub async fn validate_token(&self, token: &str) -> Result<Principal> {
        let url = build_url(&self.base_url, "token/validate")?;
        let (status, body) =
            send_json::<()>(&self.client, Method::GET, url, None, auth_headers(token)?).await?;
        let principal: Principal = decode_envelope("validate token", status, &body)?;
        if principal.subject.is_empty() {
            return Err(InstanceError::Unauthorized("token has no subject".into()));
        }
        debug!("validated token for {}", principal.subject);
        Ok(principal)
    }

    pub async fn get_env(&self, name: &str, version: &str) -> Result<EnvironmentDefinition> {
        let url = build_url(&self.base_url, &format!("env/{name}/{version}"))?;
        let (status, body) =
            send_json::<()>(&self.client, Method::GET, url, None, json_headers()).await?;
        let definition: Option<EnvironmentDefinition> =
            decode_envelope("get environment", status, &body)?;
        definition.ok_or_else(|| InstanceError::NotFound(format!("environment {name}@{version}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tenant_key_prefers_tenant() {
        let with_tenant = Principal {
            subject: "alice".into(),
            tenant: Some("team-a".into()),
        };
        let bare = Principal {
            subject: "team-a".into(),
            tenant: None,
        };
        assert_eq!(with_tenant.tenant_key(), bare.tenant_key());
        assert_eq!(bare.tenant_key().len(), 40);
    }
}
