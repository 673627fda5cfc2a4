use crate::job_registry::DispatchOrder;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub broker: NetworkConfig,
    pub monitoring: MonitoringConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub host: String,
    pub port: u16,
    /// Name embedded in job handles; the system hostname when unset
    pub hostname: Option<String>,
    pub dispatch_order: DispatchOrder,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    /// Serve `/metrics` on this port when set
    pub prometheus_port: Option<u16>,
    pub log_level: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig {
            host: "0.0.0.0".to_string(),
            port: 4731,
            hostname: None,
            dispatch_order: DispatchOrder::Fifo,
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        MonitoringConfig {
            prometheus_port: None,
            log_level: "info".to_string(),
        }
    }
}

impl BrokerConfig {
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: BrokerConfig = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.broker.host, self.broker.port)
    }

    /// Hostname used to build job handles, resolved once at startup
    pub fn resolve_hostname(&self) -> anyhow::Result<String> {
        if let Some(hostname) = self.broker.hostname.as_ref().filter(|h| !h.is_empty()) {
            return Ok(hostname.clone());
        }

        hostname::get()
            .context("error retrieving hostname")?
            .into_string()
            .map_err(|raw| anyhow::anyhow!("hostname {:?} is not valid UTF-8", raw))
    }
}
