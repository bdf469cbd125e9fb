//! Pluggable instance backends.
//!
//! The gateway and the reclamation loop only ever talk to an
//! `Arc<dyn InstanceBackend>`. Two adapters exist:
//!
//! - [`controller::ControllerBackend`]: translates onto the envhub controller's
//!   `/pods` surface.
//! - [`rest::RestBackend`]: speaks the generic `/aenvironment/instance`
//!   contract of any conforming sandbox service.

pub mod controller;
pub mod factory;
pub mod rest;

use async_trait::async_trait;

use crate::definition::EnvironmentDefinition;
use crate::error::Result;
use crate::instance::{CleanupReport, Instance, ListFilter};

pub use controller::ControllerBackend;
pub use factory::{BackendKind, backend_from_kind};
pub use rest::RestBackend;

#[async_trait]
pub trait InstanceBackend: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Whether listed instances carry `owner`, so `ListFilter::owner` can be
    /// answered. Callers must not ask for owner-scoped lists otherwise.
    fn reports_owner(&self) -> bool {
        true
    }

    /// Submit a new instance for the resolved definition.
    async fn create(&self, definition: &EnvironmentDefinition) -> Result<Instance>;

    async fn get(&self, id: &str) -> Result<Instance>;

    /// Delete an instance. An already-absent instance is success.
    async fn delete(&self, id: &str) -> Result<()>;

    async fn list(&self, filter: &ListFilter) -> Result<Vec<Instance>>;

    /// Pre-provision capacity for a definition.
    async fn warmup(&self, definition: &EnvironmentDefinition) -> Result<()>;

    /// Delete TTL-expired instances, best effort.
    async fn cleanup(&self) -> Result<CleanupReport>;
}
