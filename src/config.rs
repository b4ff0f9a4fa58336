use crate::paths;
use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

// ============================================================================
// Config Structures
// ============================================================================

/// Contents of `tessera.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub ssh: SshConfig,
    pub broker: Option<BrokerConfig>,
    pub store: StoreConfig,
    pub defaults: Defaults,
    pub instances: Vec<InstanceConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SshConfig {
    /// Login user for instances that do not name one
    pub user: String,
    /// Private key path, `~` expanded
    pub key: Option<String>,
    /// Port for instances that do not name one
    pub port: Option<u16>,
    pub connect_timeout_secs: u64,
    pub accept_new_host_keys: bool,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            user: "ubuntu".to_string(),
            key: None,
            port: None,
            connect_timeout_secs: 10,
            accept_new_host_keys: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BrokerConfig {
    pub url: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

fn default_poll_interval() -> u64 {
    2
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// SQLite file; defaults to the state directory
    pub path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Defaults {
    /// Deadline for one instance's pipeline
    pub timeout_secs: u64,
    /// Instances applied in parallel
    pub jobs: usize,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            timeout_secs: 900,
            jobs: 4,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    #[default]
    Ssh,
    Broker,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InstanceConfig {
    pub name: String,
    pub host: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    /// Provider id the broker knows the instance by
    #[serde(default)]
    pub instance_id: Option<String>,
    #[serde(default)]
    pub transport: Transport,
}

// ============================================================================
// Loading
// ============================================================================

impl Config {
    /// Load and validate the config.
    ///
    /// A missing file is an empty config unless the path was given
    /// explicitly.
    pub fn load(flag: Option<&Path>) -> Result<Self> {
        let path = paths::config_file(flag)?;
        if !path.exists() {
            if flag.is_some() {
                bail!("Config file not found: {}", path.display());
            }
            log::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Could not read {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid config {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for instance in &self.instances {
            if instance.name.trim().is_empty() {
                bail!("Instance with host '{}' has an empty name", instance.host);
            }
            if !seen.insert(instance.name.as_str()) {
                bail!("Instance '{}' is defined more than once", instance.name);
            }
            if instance.transport == Transport::Broker && self.broker.is_none() {
                bail!(
                    "Instance '{}' uses the broker transport but [broker] is not configured",
                    instance.name
                );
            }
        }
        if self.defaults.jobs == 0 {
            bail!("defaults.jobs must be at least 1");
        }
        Ok(())
    }

    pub fn instance(&self, name: &str) -> Option<&InstanceConfig> {
        self.instances.iter().find(|i| i.name == name)
    }

    /// Checkpoint store path, expanded.
    pub fn store_path(&self) -> Result<PathBuf> {
        match &self.store.path {
            Some(path) => Ok(paths::expand(path)),
            None => paths::default_store_path(),
        }
    }

    pub fn timeout(&self, flag: Option<u64>) -> Duration {
        Duration::from_secs(flag.unwrap_or(self.defaults.timeout_secs))
    }
}

impl SshConfig {
    pub fn options(&self) -> remote::SshOptions {
        remote::SshOptions {
            default_user: self.user.clone(),
            identity_file: self.key.as_deref().map(paths::expand),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            accept_new_host_keys: self.accept_new_host_keys,
            ..remote::SshOptions::default()
        }
    }
}

impl InstanceConfig {
    pub fn endpoint(&self, ssh: &SshConfig) -> remote::Endpoint {
        let mut endpoint = remote::Endpoint::host(&self.host);
        if let Some(user) = &self.user {
            endpoint = endpoint.with_user(user);
        }
        if let Some(port) = self.port.or(ssh.port) {
            endpoint = endpoint.with_port(port);
        }
        if let Some(id) = &self.instance_id {
            endpoint = endpoint.with_instance_id(id);
        }
        endpoint
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SAMPLE: &str = r#"
[ssh]
user = "admin"
key = "~/.ssh/tessera"
connect_timeout_secs = 5

[broker]
url = "https://broker.internal/api/"
token = "s3cret"

[store]
path = "/var/lib/tessera/checkpoints.db"

[defaults]
timeout_secs = 120

[[instances]]
name = "ws1"
host = "10.0.0.7"
port = 2222

[[instances]]
name = "gpu1"
host = "gpu1.internal"
instance_id = "i-0abc"
transport = "broker"
"#;

    #[test]
    fn test_parse_full_config() {
        let config = Config::parse(SAMPLE).unwrap();

        assert_eq!(config.ssh.user, "admin");
        assert_eq!(config.broker.as_ref().unwrap().poll_interval_secs, 2);
        assert_eq!(
            config.store_path().unwrap(),
            PathBuf::from("/var/lib/tessera/checkpoints.db")
        );
        assert_eq!(config.timeout(None), Duration::from_secs(120));
        assert_eq!(config.timeout(Some(5)), Duration::from_secs(5));
        assert_eq!(config.defaults.jobs, 4);

        let ws1 = config.instance("ws1").unwrap();
        assert_eq!(ws1.transport, Transport::Ssh);
        let endpoint = ws1.endpoint(&config.ssh);
        assert_eq!(endpoint.port, Some(2222));
        assert_eq!(endpoint.user, None);

        let gpu = config.instance("gpu1").unwrap();
        assert_eq!(gpu.transport, Transport::Broker);
        assert_eq!(gpu.endpoint(&config.ssh).instance_id.as_deref(), Some("i-0abc"));
    }

    #[test]
    fn test_ssh_options_expand_key() {
        let config = Config::parse(SAMPLE).unwrap();
        let options = config.ssh.options();
        let home = dirs::home_dir().unwrap();
        assert_eq!(options.identity_file, Some(home.join(".ssh").join("tessera")));
        assert_eq!(options.connect_timeout, Duration::from_secs(5));
        assert_eq!(options.ssh_binary, "ssh");
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.ssh.user, "ubuntu");
        assert!(config.instances.is_empty());
        assert_eq!(config.timeout(None), Duration::from_secs(900));
    }

    #[test]
    fn test_duplicate_instance_rejected() {
        let err = Config::parse(
            r#"
[[instances]]
name = "ws1"
host = "a"

[[instances]]
name = "ws1"
host = "b"
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn test_broker_instance_requires_broker_section() {
        let err = Config::parse(
            r#"
[[instances]]
name = "gpu1"
host = "gpu1"
transport = "broker"
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("[broker]"));
    }

    #[test]
    fn test_unknown_field_rejected() {
        assert!(Config::parse("[ssh]\nusr = \"typo\"\n").is_err());
    }

    #[test]
    fn test_load_missing_explicit_file_fails() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(Config::load(Some(&missing)).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tessera.toml");
        fs::write(&path, SAMPLE).unwrap();
        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.instances.len(), 2);
    }
}
