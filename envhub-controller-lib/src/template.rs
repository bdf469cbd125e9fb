//! Pod blueprints loaded from a mounted template directory.
//!
//! `<dir>/<kind>.yaml` is tried first. A small fixed set of kinds also has a
//! legacy location under `<legacy_root>/pod_template_*/config.yaml`.

use std::path::{Path, PathBuf};

use envhub_runtime::InstanceError;
use k8s_openapi::api::core::v1::Pod;
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("pod template '{kind}' not found")]
    NotFound { kind: String },
    #[error("failed to read pod template {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse pod template {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

impl From<TemplateError> for InstanceError {
    fn from(err: TemplateError) -> Self {
        match err {
            TemplateError::NotFound { .. } => InstanceError::NotFound(err.to_string()),
            other => InstanceError::Upstream(other.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TemplateStore {
    dir: PathBuf,
    legacy_root: Option<PathBuf>,
}

impl TemplateStore {
    pub fn new(dir: impl Into<PathBuf>, legacy_root: Option<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            legacy_root,
        }
    }

    /// Load a blueprint for `kind`, with server-assigned fields cleared.
    pub fn load(&self, kind: &str) -> Result<Pod, TemplateError> {
        if !is_valid_kind(kind) {
            return Err(TemplateError::NotFound {
                kind: kind.to_string(),
            });
        }

        let primary = self.dir.join(format!("{kind}.yaml"));
        let path = if primary.is_file() {
            primary
        } else {
            match self.legacy_path(kind) {
                Some(legacy) if legacy.is_file() => {
                    warn!(
                        "pod template {} missing, using legacy path {}",
                        primary.display(),
                        legacy.display()
                    );
                    legacy
                }
                _ => {
                    return Err(TemplateError::NotFound {
                        kind: kind.to_string(),
                    });
                }
            }
        };

        let mut pod = read_pod(&path)?;
        pod.metadata.resource_version = None;
        pod.metadata.uid = None;
        info!("loaded pod template {} for kind {kind}", path.display());
        Ok(pod)
    }

    fn legacy_path(&self, kind: &str) -> Option<PathBuf> {
        let root = self.legacy_root.as_ref()?;
        let dir = match kind {
            "amd64" | "singleContainer" => "pod_template_linux",
            "win64" => "pod_template_windows",
            "Terminal" => "pod_template_terminal",
            _ => return None,
        };
        Some(root.join(dir).join("config.yaml"))
    }
}

fn read_pod(path: &Path) -> Result<Pod, TemplateError> {
    let raw = std::fs::read_to_string(path).map_err(|source| TemplateError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_yaml::from_str(&raw).map_err(|source| TemplateError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn is_valid_kind(kind: &str) -> bool {
    !kind.is_empty()
        && kind
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

#[cfg(test)]
pub(crate) const SAMPLE_TEMPLATE: &str = r#"
apiVersion: v1
kind: Pod
metadata:
  name: template
  namespace: aenv-sandbox
  resourceVersion: "12345"
  uid: 0b7c1c1e-aaaa-bbbb-cccc-000000000000
  labels:
    app: aenv
spec:
  initContainers:
    - name: init
      image: placeholder
  containers:
    - name: main
      image: placeholder
      args: ["--serve"]
      env:
        - name: MODE
          value: default
        - name: KEEP
          value: "1"
      resources:
        requests:
          cpu: 500m
          memory: 1Gi
        limits:
          cpu: "1"
          memory: 1Gi
    - name: data
      image: placeholder
"#;

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(files: &[(&str, &str)]) -> (tempfile::TempDir, TemplateStore) {
        let dir = tempfile::tempdir().unwrap();
        for (name, body) in files {
            let path = dir.path().join(name);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, body).unwrap();
        }
        let store = TemplateStore::new(
            dir.path().join("templates"),
            Some(dir.path().join("legacy")),
        );
        (dir, store)
    }

    #[test]
    fn loads_and_strips_server_fields() {
        let (_dir, store) = store_with(&[("templates/singleContainer.yaml", SAMPLE_TEMPLATE)]);
        let pod = store.load("singleContainer").unwrap();
        assert_eq!(pod.metadata.namespace.as_deref(), Some("aenv-sandbox"));
        assert!(pod.metadata.resource_version.is_none());
        assert!(pod.metadata.uid.is_none());
        assert_eq!(pod.spec.unwrap().containers.len(), 2);
    }

    #[test]
    fn falls_back_to_legacy_path() {
        let (_dir, store) =
            store_with(&[("legacy/pod_template_windows/config.yaml", SAMPLE_TEMPLATE)]);
        assert!(store.load("win64").is_ok());
    }

    #[test]
    fn unknown_kind_is_not_found() {
        let (_dir, store) = store_with(&[("templates/singleContainer.yaml", SAMPLE_TEMPLATE)]);
        let err = store.load("dualGpu").unwrap_err();
        assert!(matches!(err, TemplateError::NotFound { .. }));
        assert!(InstanceError::from(err).is_not_found());
    }

    #[test]
    fn rejects_path_like_kinds() {
        let (_dir, store) = store_with(&[("templates/singleContainer.yaml", SAMPLE_TEMPLATE)]);
        assert!(matches!(
            store.load("../singleContainer"),
            Err(TemplateError::NotFound { .. })
        ));
    }

    #[test]
    fn malformed_yaml_is_parse_error() {
        let (_dir, store) = store_with(&[("templates/broken.yaml", "spec: [unclosed")]);
        assert!(matches!(store.load("broken"), Err(TemplateError::Parse { .. })));
    }
}
