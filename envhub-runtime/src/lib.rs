//! Shared environment-instance runtime for the envhub controller and gateway.
//!
//! This crate holds the wire model (environment definitions, instances and the
//! response envelope), the error taxonomy, the `InstanceBackend` abstraction
//! with its two adapters, and the reclamation loop that periodically reclaims
//! TTL-expired instances through whichever backend is active.

pub mod backend;
pub mod definition;
pub mod envelope;
pub mod error;
pub mod http;
pub mod instance;
pub mod metrics;
pub mod reaper;
pub mod util;

pub use backend::{InstanceBackend, backend_from_kind};
pub use definition::{DeployConfig, EnvironmentDefinition, ResourceMode};
pub use envelope::ApiResponse;
pub use error::InstanceError;
pub use instance::{CleanupReport, Instance, InstanceStatus, InstanceSummary, ListFilter};

pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_IMAGE_PREFIX: &str = "docker.io/library/aenv";
pub const DEFAULT_TEMPLATE_KIND: &str = "singleContainer";

/// Pod label carrying the instance TTL as a duration string.
pub const TTL_LABEL: &str = "envhub.io/ttl";
/// Pod label carrying the hashed tenant key of the creator.
pub const OWNER_LABEL: &str = "envhub.io/owner";
pub const ENV_NAME_LABEL: &str = "envhub.io/env";
pub const ENV_VERSION_LABEL: &str = "envhub.io/env-version";
