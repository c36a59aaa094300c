//! Layered settings.
//!
//! Sources, later ones override earlier ones:
//! 1. Type defaults
//! 2. TOML file given explicitly or through `CONFIG_PATH`
//! 3. Environment variables with the `CONSUL_ENVOY__` prefix, e.g.
//!    `CONSUL_ENVOY__WATCH__RETIREMENT_IN_SECS=1800`
//! 4. `CONSUL_HTTP_ADDR`, `CONSUL_HTTP_TOKEN` and `PORT`, as read by the Consul
//!    tooling and the proxy deployment

use config::{Config, Environment, File};
use std::env;
use std::time::Duration;

use crate::error::{Error, Result};

/// Longest wait Consul honours for a blocking query.
pub const MAX_WAIT_TIME_IN_SECS: u64 = 600;
const MAX_RETRY_BASE_IN_MS: u64 = 600_000;
const MAX_RETIREMENT_IN_SECS: u64 = 30 * 24 * 3600;

/// Rule adding prefix routes to another service in front of a virtual host's
/// catch-all route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrefixRule {
    /// Service whose virtual host receives the routes.
    pub virtual_host: String,
    /// Service the prefixes are routed to.
    pub cluster: String,
    pub prefixes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsulConfig {
    #[serde(default = "default_consul_address")]
    pub address: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub datacenter: Option<String>,
}

impl Default for ConsulConfig {
    fn default() -> Self {
        Self {
            address: default_consul_address(),
            token: None,
            datacenter: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            port: default_port(),
        }
    }
}

/// Timing of the catalog and service watchers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Blocking query wait, jittered per request
    #[serde(default = "default_wait_time_in_secs")]
    pub wait_time_in_secs: u64,
    /// Sleep after a failed query, jittered
    #[serde(default = "default_retry_base_in_ms")]
    pub retry_base_in_ms: u64,
    /// Buffered service sets between the catalog watcher and the reconciler
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    #[serde(default = "default_sweep_interval_in_secs")]
    pub sweep_interval_in_secs: u64,
    /// A service unseen for longer than this loses its watcher
    #[serde(default = "default_retirement_in_secs")]
    pub retirement_in_secs: u64,
    #[serde(default = "default_true")]
    pub passing_only: bool,
    #[serde(default = "default_true")]
    pub allow_stale: bool,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            wait_time_in_secs: default_wait_time_in_secs(),
            retry_base_in_ms: default_retry_base_in_ms(),
            channel_capacity: default_channel_capacity(),
            sweep_interval_in_secs: default_sweep_interval_in_secs(),
            retirement_in_secs: default_retirement_in_secs(),
            passing_only: true,
            allow_stale: true,
        }
    }
}

impl WatchConfig {
    pub fn wait_time(&self) -> Duration {
        Duration::from_secs(self.wait_time_in_secs)
    }

    pub fn retry_base(&self) -> Duration {
        Duration::from_millis(self.retry_base_in_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_in_secs)
    }

    pub fn retirement(&self) -> Duration {
        Duration::from_secs(self.retirement_in_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheckConfig {
    #[serde(default = "default_health_check_type")]
    pub kind: String,
    #[serde(default = "default_health_check_timeout_in_ms")]
    pub timeout_in_ms: u64,
    #[serde(default = "default_health_check_interval_in_ms")]
    pub interval_in_ms: u64,
    #[serde(default = "default_threshold")]
    pub unhealthy_threshold: u32,
    #[serde(default = "default_threshold")]
    pub healthy_threshold: u32,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            kind: default_health_check_type(),
            timeout_in_ms: default_health_check_timeout_in_ms(),
            interval_in_ms: default_health_check_interval_in_ms(),
            unhealthy_threshold: default_threshold(),
            healthy_threshold: default_threshold(),
        }
    }
}

/// Defaults stamped on every generated cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterConfig {
    #[serde(default = "default_lb_type")]
    pub lb_type: String,
    #[serde(default = "default_connect_timeout_in_ms")]
    pub connect_timeout_in_ms: u64,
    #[serde(default = "default_health_check")]
    pub health_check: Option<HealthCheckConfig>,
    #[serde(default = "default_true")]
    pub outlier_detection: bool,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            lb_type: default_lb_type(),
            connect_timeout_in_ms: default_connect_timeout_in_ms(),
            health_check: default_health_check(),
            outlier_detection: true,
        }
    }
}

/// Defaults stamped on every generated virtual host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteConfig {
    #[serde(default = "default_retry_on")]
    pub retry_on: String,
    #[serde(default = "default_num_retries")]
    pub num_retries: u32,
    #[serde(default)]
    pub timeout_in_ms: Option<u64>,
    /// Also match `*.{service}.service.{domain}`
    #[serde(default)]
    pub wildcard_subdomains: bool,
    #[serde(default)]
    pub prefix_rules: Vec<PrefixRule>,
}

impl Default for RouteConfig {
    fn default() -> Self {
        Self {
            retry_on: default_retry_on(),
            num_retries: default_num_retries(),
            timeout_in_ms: None,
            wildcard_subdomains: false,
            prefix_rules: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub consul: ConsulConfig,
    #[serde(default)]
    pub server: ServerConfig,
    /// Consul DNS domain; asked from the local agent when unset
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub watch: WatchConfig,
    #[serde(default)]
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub route: RouteConfig,
}

impl Settings {
    /// Loads and validates settings. `path` takes precedence over `CONFIG_PATH`.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        if let Some(path) = path.map(str::to_string).or_else(|| env::var("CONFIG_PATH").ok()) {
            builder = builder.add_source(File::with_name(&path).required(true));
        }

        builder = builder
            .add_source(
                Environment::with_prefix("CONSUL_ENVOY")
                    .prefix_separator("__")
                    .separator("__")
                    .ignore_empty(true)
                    .try_parsing(true),
            )
            .set_override_option("consul.address", non_empty_var("CONSUL_HTTP_ADDR"))?
            .set_override_option("consul.token", non_empty_var("CONSUL_HTTP_TOKEN"))?
            .set_override_option("server.port", non_empty_var("PORT"))?;

        let settings: Self = builder.build()?.try_deserialize()?;
        settings.validate()
    }

    pub fn validate(self) -> Result<Self> {
        let watch = &self.watch;
        if watch.wait_time_in_secs == 0 || watch.wait_time_in_secs > MAX_WAIT_TIME_IN_SECS {
            return Err(Error::InvalidConfig(format!(
                "watch.wait_time_in_secs must be within 1..={}",
                MAX_WAIT_TIME_IN_SECS
            )));
        }
        if watch.retry_base_in_ms == 0 || watch.retry_base_in_ms > MAX_RETRY_BASE_IN_MS {
            return Err(Error::InvalidConfig(format!(
                "watch.retry_base_in_ms must be within 1..={}",
                MAX_RETRY_BASE_IN_MS
            )));
        }
        if watch.channel_capacity == 0 {
            return Err(Error::InvalidConfig("watch.channel_capacity must be > 0".into()));
        }
        if watch.sweep_interval_in_secs == 0 {
            return Err(Error::InvalidConfig(
                "watch.sweep_interval_in_secs must be > 0".into(),
            ));
        }
        if watch.retirement_in_secs > MAX_RETIREMENT_IN_SECS {
            return Err(Error::InvalidConfig(format!(
                "watch.retirement_in_secs must not exceed {}",
                MAX_RETIREMENT_IN_SECS
            )));
        }
        if watch.retirement_in_secs < watch.sweep_interval_in_secs {
            return Err(Error::InvalidConfig(format!(
                "watch.retirement_in_secs ({}) is shorter than watch.sweep_interval_in_secs ({})",
                watch.retirement_in_secs, watch.sweep_interval_in_secs
            )));
        }
        if let Some(domain) = &self.domain {
            if domain.trim_matches('.').is_empty() {
                return Err(Error::InvalidConfig("domain must not be empty".into()));
            }
        }
        for rule in &self.route.prefix_rules {
            if rule.prefixes.iter().any(|p| !p.starts_with('/')) {
                return Err(Error::InvalidConfig(format!(
                    "prefix rule {} -> {}: prefixes must start with '/'",
                    rule.virtual_host, rule.cluster
                )));
            }
        }
        Ok(self)
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

fn default_consul_address() -> String {
    "http://127.0.0.1:8500".to_string()
}
fn default_listen_addr() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_wait_time_in_secs() -> u64 {
    300
}
fn default_retry_base_in_ms() -> u64 {
    5000
}
fn default_channel_capacity() -> usize {
    10
}
fn default_sweep_interval_in_secs() -> u64 {
    600
}
fn default_retirement_in_secs() -> u64 {
    3600
}
fn default_true() -> bool {
    true
}
fn default_lb_type() -> String {
    "least_request".to_string()
}
fn default_connect_timeout_in_ms() -> u64 {
    180_000
}
fn default_health_check() -> Option<HealthCheckConfig> {
    Some(HealthCheckConfig::default())
}
fn default_health_check_type() -> String {
    "tcp".to_string()
}
fn default_health_check_timeout_in_ms() -> u64 {
    3000
}
fn default_health_check_interval_in_ms() -> u64 {
    5000
}
fn default_threshold() -> u32 {
    1
}
fn default_retry_on() -> String {
    "5xx,connect-failure".to_string()
}
fn default_num_retries() -> u32 {
    1
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    const ENV_KEYS: [&str; 5] = [
        "CONFIG_PATH",
        "CONSUL_HTTP_ADDR",
        "CONSUL_HTTP_TOKEN",
        "PORT",
        "CONSUL_ENVOY__WATCH__RETIREMENT_IN_SECS",
    ];

    fn without_env<F: FnOnce()>(f: F) {
        let vars: Vec<(&str, Option<&str>)> = ENV_KEYS.iter().map(|k| (*k, None)).collect();
        temp_env::with_vars(vars, f);
    }

    #[test]
    #[serial]
    fn defaults_load() {
        without_env(|| {
            let settings = Settings::load(None).unwrap();
            assert_eq!(settings, Settings::default());
            assert_eq!(settings.watch.wait_time(), Duration::from_secs(300));
            assert_eq!(settings.watch.retry_base(), Duration::from_secs(5));
            assert_eq!(settings.watch.sweep_interval(), Duration::from_secs(600));
            assert_eq!(settings.watch.retirement(), Duration::from_secs(3600));
            assert_eq!(settings.watch.channel_capacity, 10);
            assert!(settings.cluster.health_check.is_some());
        });
    }

    #[test]
    #[serial]
    fn file_then_env_override() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
domain = "example"

[watch]
retirement_in_secs = 7200

[[route.prefix_rules]]
virtual_host = "api"
cluster = "api-users"
prefixes = ["/emails", "/me"]
"#
        )
        .unwrap();
        let path = file.path().to_str().unwrap().to_string();

        without_env(|| {
            temp_env::with_vars(
                [
                    ("CONSUL_ENVOY__WATCH__RETIREMENT_IN_SECS", Some("5400")),
                    ("CONSUL_HTTP_ADDR", Some("10.0.0.2:8500")),
                    ("PORT", Some("9901")),
                ],
                || {
                    let settings = Settings::load(Some(&path)).unwrap();
                    assert_eq!(settings.domain.as_deref(), Some("example"));
                    assert_eq!(settings.watch.retirement_in_secs, 5400);
                    assert_eq!(settings.consul.address, "10.0.0.2:8500");
                    assert_eq!(settings.server.port, 9901);
                    assert_eq!(
                        settings.route.prefix_rules,
                        vec![PrefixRule {
                            virtual_host: "api".into(),
                            cluster: "api-users".into(),
                            prefixes: vec!["/emails".into(), "/me".into()],
                        }]
                    );
                },
            );
        });
    }

    #[test]
    fn rejects_retirement_shorter_than_sweep() {
        let mut settings = Settings::default();
        settings.watch.retirement_in_secs = 60;
        assert!(matches!(settings.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn rejects_unbounded_durations() {
        let mut settings = Settings::default();
        settings.watch.wait_time_in_secs = MAX_WAIT_TIME_IN_SECS;
        assert!(settings.clone().validate().is_ok());

        settings.watch.wait_time_in_secs = MAX_WAIT_TIME_IN_SECS + 1;
        assert!(matches!(settings.validate(), Err(Error::InvalidConfig(_))));

        let mut settings = Settings::default();
        settings.watch.retry_base_in_ms = u64::MAX;
        assert!(matches!(settings.validate(), Err(Error::InvalidConfig(_))));

        let mut settings = Settings::default();
        settings.watch.sweep_interval_in_secs = u64::MAX;
        settings.watch.retirement_in_secs = u64::MAX;
        assert!(matches!(settings.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn rejects_zero_capacity() {
        let mut settings = Settings::default();
        settings.watch.channel_capacity = 0;
        assert!(matches!(settings.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn rejects_relative_prefix() {
        let mut settings = Settings::default();
        settings.route.prefix_rules.push(PrefixRule {
            virtual_host: "api".into(),
            cluster: "api-users".into(),
            prefixes: vec!["users".into()],
        });
        assert!(matches!(settings.validate(), Err(Error::InvalidConfig(_))));
    }
}
