//! Controller command line. Every flag can also come from the environment.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::leader::ElectionConfig;

#[derive(Debug, Clone, Parser)]
#[command(name = "envhub-controller", about = "Environment instance controller")]
pub struct ControllerConfig {
    /// Fallback namespace when the primary template does not set one.
    #[arg(long, env = "ENVHUB_NAMESPACE", default_value = "aenvsandbox")]
    pub namespace: String,

    #[arg(long, env = "ENVHUB_SERVER_PORT", default_value_t = 8080)]
    pub server_port: u16,

    #[arg(long, env = "ENVHUB_PROBE_PORT", default_value_t = 8081)]
    pub probe_port: u16,

    #[arg(long, env = "ENVHUB_TEMPLATE_DIR", default_value = "/etc/envhub/templates")]
    pub template_dir: PathBuf,

    /// Root of the `pod_template_*/config.yaml` layout.
    #[arg(long, env = "ENVHUB_LEGACY_TEMPLATE_ROOT")]
    pub legacy_template_root: Option<PathBuf>,

    #[arg(long, env = "ENVHUB_PRIMARY_TEMPLATE", default_value = envhub_runtime::DEFAULT_TEMPLATE_KIND)]
    pub primary_template: String,

    #[arg(
        long,
        env = "ENVHUB_LEADER_ELECT",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    pub leader_elect: bool,

    /// Lease name; defaults to `envhub-controller-leader`.
    #[arg(long, env = "ENVHUB_LEASE_NAME", default_value = "envhub-controller-leader")]
    pub lease_name: String,

    /// Holder identity; defaults to `$HOSTNAME`.
    #[arg(long, env = "ENVHUB_IDENTITY")]
    pub identity: Option<String>,

    #[arg(long, env = "ENVHUB_LEASE_DURATION", default_value = "65s", value_parser = humantime::parse_duration)]
    pub lease_duration: Duration,

    #[arg(long, env = "ENVHUB_RENEW_DEADLINE", default_value = "60s", value_parser = humantime::parse_duration)]
    pub renew_deadline: Duration,

    #[arg(long, env = "ENVHUB_RETRY_PERIOD", default_value = "2s", value_parser = humantime::parse_duration)]
    pub retry_period: Duration,

    #[arg(long, env = "ENVHUB_RESYNC_INTERVAL", default_value = "5m", value_parser = humantime::parse_duration)]
    pub resync_interval: Duration,

    #[arg(long, env = "ENVHUB_CACHE_SYNC_TIMEOUT", default_value = "60s", value_parser = humantime::parse_duration)]
    pub cache_sync_timeout: Duration,

    #[arg(long, env = "ENVHUB_REQUEST_TIMEOUT", default_value = "30s", value_parser = humantime::parse_duration)]
    pub request_timeout: Duration,
}

impl ControllerConfig {
    pub fn election(&self) -> ElectionConfig {
        ElectionConfig {
            lease_duration: self.lease_duration,
            renew_deadline: self.renew_deadline,
            retry_period: self.retry_period,
        }
    }

    pub fn resolved_identity(&self) -> String {
        self.identity
            .clone()
            .filter(|id| !id.is_empty())
            .or_else(|| std::env::var("HOSTNAME").ok().filter(|h| !h.is_empty()))
            .unwrap_or_else(|| format!("envhub-controller-{}", envhub_runtime::util::random_suffix(6)))
    }

    /// Reject timings the elector cannot honour.
    pub fn validate(&self) -> Result<(), String> {
        if self.renew_deadline >= self.lease_duration {
            return Err(format!(
                "renew deadline {:?} must be shorter than lease duration {:?}",
                self.renew_deadline, self.lease_duration
            ));
        }
        if self.retry_period >= self.renew_deadline {
            return Err(format!(
                "retry period {:?} must be shorter than renew deadline {:?}",
                self.retry_period, self.renew_deadline
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = ControllerConfig::parse_from(["envhub-controller"]);
        assert_eq!(cfg.namespace, "aenvsandbox");
        assert_eq!(cfg.server_port, 8080);
        assert_eq!(cfg.probe_port, 8081);
        assert!(cfg.leader_elect);
        assert_eq!(cfg.lease_duration, Duration::from_secs(65));
        assert_eq!(cfg.resync_interval, Duration::from_secs(300));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn flags_override() {
        let cfg = ControllerConfig::parse_from([
            "envhub-controller",
            "--leader-elect",
            "false",
            "--lease-duration",
            "10s",
            "--renew-deadline",
            "15s",
        ]);
        assert!(!cfg.leader_elect);
        assert!(cfg.validate().is_err());
    }
}
