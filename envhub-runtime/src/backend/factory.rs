//! Backend selection from the gateway's `--schedule-type`.
//!
//! | Value      | Backend            | Address used          |
//! |------------|--------------------|-----------------------|
//! | `k8s`      | `ControllerBackend`| `--schedule-addr`     |
//! | `standard` | `RestBackend`      | `--schedule-addr`     |

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use super::{ControllerBackend, InstanceBackend, RestBackend};
use crate::error::{InstanceError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// envhub controller `/pods` API.
    Kubernetes,
    /// Generic `/aenvironment/instance` contract.
    Standard,
}

impl FromStr for BackendKind {
    type Err = InstanceError;

    fn from_str(value: &str) -> Result<Self> {
        match value.to_lowercase().as_str() {
            "k8s" | "kubernetes" => Ok(BackendKind::Kubernetes),
            "standard" | "rest" => Ok(BackendKind::Standard),
            other => Err(InstanceError::InvalidInput(format!(
                "Unknown schedule type '{other}'. Supported values: k8s, standard"
            ))),
        }
    }
}

/// Construct the active backend as a trait object.
pub fn backend_from_kind(
    kind: BackendKind,
    address: &str,
    timeout: Duration,
    warmup_ttl: &str,
) -> Result<Arc<dyn InstanceBackend>> {
    if address.trim().is_empty() {
        return Err(InstanceError::InvalidInput(
            "schedule address is required".to_string(),
        ));
    }
    match kind {
        BackendKind::Kubernetes => Ok(Arc::new(ControllerBackend::new(
            address, timeout, warmup_ttl,
        )?)),
        BackendKind::Standard => Ok(Arc::new(RestBackend::new(address, timeout)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_kinds() {
        assert_eq!("k8s".parse::<BackendKind>().unwrap(), BackendKind::Kubernetes);
        assert_eq!("Standard".parse::<BackendKind>().unwrap(), BackendKind::Standard);
        assert!("nomad".parse::<BackendKind>().is_err());
    }

    #[test]
    fn builds_named_backends() {
        let timeout = Duration::from_secs(5);
        let k8s = backend_from_kind(BackendKind::Kubernetes, "http://ctl:8080", timeout, "30m")
            .unwrap();
        assert_eq!(k8s.name(), "controller");
        let rest =
            backend_from_kind(BackendKind::Standard, "http://svc", timeout, "30m").unwrap();
        assert_eq!(rest.name(), "rest");
        assert!(backend_from_kind(BackendKind::Standard, "", timeout, "30m").is_err());
    }
}
