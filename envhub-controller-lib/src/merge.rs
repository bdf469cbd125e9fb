//! Merge an environment definition into a pod template.
//!
//! The template is taken by value and the merged pod is what gets submitted;
//! nothing mutates it afterwards.

use std::collections::BTreeMap;

use envhub_runtime::definition::{DeployConfig, EnvironmentDefinition};
use envhub_runtime::error::{InstanceError, Result};
use envhub_runtime::util::random_suffix;
use envhub_runtime::{ENV_NAME_LABEL, ENV_VERSION_LABEL, OWNER_LABEL, TTL_LABEL};
use k8s_openapi::api::core::v1::{Container, EnvVar, Pod, ResourceRequirements};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use tracing::{debug, warn};

use crate::quantity::{
    MAX_EPHEMERAL_BYTES, MAX_MEMORY_BYTES, MIN_EPHEMERAL_BYTES, MIN_MEMORY_BYTES, format_binary,
    format_cpu, parse_cpu_millis, parse_size_bytes,
};

const NAME_SUFFIX_LEN: usize = 6;
const MAX_NAME_LEN: usize = 63;

/// Produce the pod to submit for `definition`.
pub fn render_pod(template: Pod, definition: &EnvironmentDefinition, namespace: &str) -> Result<Pod> {
    definition.validate_for_instantiation()?;
    let cfg = &definition.deploy_config;
    if let Some(ttl) = cfg.ttl() {
        humantime::parse_duration(ttl)
            .map_err(|err| InstanceError::InvalidInput(format!("invalid ttl '{ttl}': {err}")))?;
    }

    let mut pod = template;
    pod.metadata.name = Some(instance_name(&definition.name));
    pod.metadata.generate_name = None;
    pod.metadata.namespace = Some(namespace.to_string());
    pod.status = None;
    apply_labels(&mut pod, definition);

    let image = definition.primary_image().unwrap_or_default().to_string();
    let spec = pod
        .spec
        .as_mut()
        .ok_or_else(|| InstanceError::Upstream("pod template has no spec".into()))?;

    for init in spec.init_containers.iter_mut().flatten() {
        init.image = Some(image.clone());
        merge_env(init, &cfg.environment_variables);
    }
    for (index, container) in spec.containers.iter_mut().enumerate() {
        container.image = Some(image.clone());
        if index == 1 {
            if let Some(second) = cfg.second_image_name.as_deref().filter(|s| !s.is_empty()) {
                debug!("second container {} uses image {second}", container.name);
                container.image = Some(second.to_string());
            }
        }
        merge_env(container, &cfg.environment_variables);
        append_args(container, &cfg.arguments);
        if cfg.is_autoscale() {
            apply_autoscale(container, cfg);
        }
    }

    Ok(pod)
}

/// `<definition>-<6 random chars>`, lowercased and clipped to a DNS label.
pub fn instance_name(definition_name: &str) -> String {
    let mut base: String = definition_name
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' })
        .collect();
    base.truncate(MAX_NAME_LEN - NAME_SUFFIX_LEN - 1);
    let base = base.trim_matches('-');
    let base = if base.is_empty() { "env" } else { base };
    format!("{base}-{}", random_suffix(NAME_SUFFIX_LEN))
}

/// Override existing keys in place, append the rest. Never duplicates a name.
pub fn merge_env(container: &mut Container, vars: &BTreeMap<String, String>) {
    if vars.is_empty() {
        return;
    }
    let env = container.env.get_or_insert_with(Vec::new);
    for (name, value) in vars {
        match env.iter_mut().find(|e| &e.name == name) {
            Some(existing) => {
                existing.value = Some(value.clone());
                existing.value_from = None;
            }
            None => env.push(EnvVar {
                name: name.clone(),
                value: Some(value.clone()),
                value_from: None,
            }),
        }
    }
}

pub fn append_args(container: &mut Container, args: &[String]) {
    if args.is_empty() {
        return;
    }
    container
        .args
        .get_or_insert_with(Vec::new)
        .extend(args.iter().cloned());
}

/// Overwrite requests and limits from the deploy config. Values that fail to
/// parse or fall outside the allowed range keep the template's value.
fn apply_autoscale(container: &mut Container, cfg: &DeployConfig) {
    let resources = container
        .resources
        .get_or_insert_with(ResourceRequirements::default);

    if let Some(cpu) = cfg.cpu.as_deref() {
        match parse_cpu_millis(cpu) {
            Ok(millis) => set_both(resources, "cpu", format_cpu(millis)),
            Err(err) => warn!("container {}: {err}, keeping template cpu", container.name),
        }
    }

    if let Some(memory) = cfg.memory.as_deref() {
        match parse_size_bytes(memory) {
            Ok(bytes) if (MIN_MEMORY_BYTES..=MAX_MEMORY_BYTES).contains(&bytes) => {
                set_both(resources, "memory", format_binary(bytes))
            }
            Ok(bytes) => warn!(
                "container {}: memory {bytes}B outside 256Mi-8Gi, keeping template memory",
                container.name
            ),
            Err(err) => warn!("container {}: {err}, keeping template memory", container.name),
        }
    }

    if let Some(storage) = cfg.ephemeral_storage.as_deref() {
        match parse_size_bytes(storage) {
            Ok(bytes) if (MIN_EPHEMERAL_BYTES..=MAX_EPHEMERAL_BYTES).contains(&bytes) => {
                set_both(resources, "ephemeral-storage", format_binary(bytes))
            }
            Ok(bytes) => warn!(
                "container {}: ephemeral storage {bytes}B outside 1Gi-50Gi, keeping template value",
                container.name
            ),
            Err(err) => warn!(
                "container {}: {err}, keeping template ephemeral storage",
                container.name
            ),
        }
    }
}

fn set_both(resources: &mut ResourceRequirements, key: &str, value: String) {
    resources
        .requests
        .get_or_insert_with(BTreeMap::new)
        .insert(key.to_string(), Quantity(value.clone()));
    resources
        .limits
        .get_or_insert_with(BTreeMap::new)
        .insert(key.to_string(), Quantity(value));
}

fn apply_labels(pod: &mut Pod, definition: &EnvironmentDefinition) {
    let cfg = &definition.deploy_config;
    let labels = pod.metadata.labels.get_or_insert_with(BTreeMap::new);
    if let Some(ttl) = cfg.ttl() {
        labels.insert(TTL_LABEL.to_string(), ttl.to_string());
    }
    for (key, value) in [
        (OWNER_LABEL, cfg.owner.as_deref().unwrap_or_default()),
        (ENV_NAME_LABEL, definition.name.as_str()),
        (ENV_VERSION_LABEL, definition.version.as_str()),
    ] {
        if is_label_value(value) {
            labels.insert(key.to_string(), value.to_string());
        } else if !value.is_empty() {
            debug!("skipping label {key}: '{value}' is not a valid label value");
        }
    }
}

fn is_label_value(value: &str) -> bool {
    let bytes = value.as_bytes();
    !value.is_empty()
        && value.len() <= 63
        && bytes[0].is_ascii_alphanumeric()
        && bytes[bytes.len() - 1].is_ascii_alphanumeric()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}
