use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct HarnessConfig {
    pub agent: AgentConfig,
    pub catalog: CatalogConfig,
    pub storage: StorageConfig,
    pub control: ControlConfig,
    pub ports: PortConfig,
    pub discovery: DiscoveryConfig,
    pub credentials: CredentialsConfig,
    pub shutdown: ShutdownConfig,
    pub fault_server: FaultServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Path to the agent executable
    pub binary: PathBuf,
    /// Verb passed as the first argument (e.g. `run`)
    pub verb: String,
    /// Value for `--stability.level`
    pub stability_level: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogConfig {
    /// JSON file listing the available benchmarks
    pub path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Run-scoped root; every agent gets `<root>/<name>`
    pub root: PathBuf,
    /// Directory name used by the control agent
    pub control_dir: String,
}

impl StorageConfig {
    pub fn dir_for(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    pub fn control_path(&self) -> PathBuf {
        self.dir_for(&self.control_dir)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ControlConfig {
    /// Config file the control agent runs with
    pub config: PathBuf,
    pub host: String,
    /// Fixed port of the discovery endpoint
    pub port: u16,
}

impl ControlConfig {
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PortConfig {
    /// Subjects listen on `base + 1`, `base + 2`, ...
    pub base: u16,
    /// Host subjects bind to
    pub listen_host: String,
    /// Host advertised to subjects through `HOST`
    pub advertise_host: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiscoveryConfig {
    /// URL template; `{control_port}` and `{source}` are substituted
    pub template: String,
}

impl DiscoveryConfig {
    pub fn url(&self, control_port: u16, source: &str) -> String {
        self.template
            .replace("{control_port}", &control_port.to_string())
            .replace("{source}", source)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CredentialsConfig {
    /// Environment variables that must be non-empty before a run starts
    pub required: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ShutdownConfig {
    /// Wait between SIGTERM and SIGKILL for each process group
    #[serde(with = "humantime_serde")]
    pub grace_period: Duration,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FaultServerConfig {
    pub enabled: bool,
    pub listen_addr: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
    /// Optional directory for a daily rolling log file
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            dir: None,
        }
    }
}

const DEFAULT_DISCOVERY_TEMPLATE: &str =
    "http://127.0.0.1:{control_port}/api/v0/component/prometheus.test.metrics.{source}/discovery";

impl HarnessConfig {
    /// Load configuration from `config/benchctl.toml` and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(Path::new("config").join("benchctl.toml"), false)
    }

    /// Load configuration from a specific file, layered over the defaults
    pub fn load_from<P: AsRef<Path>>(path: P, required: bool) -> Result<Self, ConfigError> {
        Self::builder()?
            .add_source(File::from(path.as_ref()).required(required))
            // Override with environment variables (BENCHCTL__PORTS__BASE, etc.)
            .add_source(
                Environment::with_prefix("BENCHCTL")
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("credentials.required")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    /// Defaults only, no files and no environment
    pub fn defaults() -> Result<Self, ConfigError> {
        Self::builder()?.build()?.try_deserialize()
    }

    fn builder() -> Result<config::builder::ConfigBuilder<config::builder::DefaultState>, ConfigError>
    {
        Config::builder()
            .set_default("agent.binary", "./alloy")?
            .set_default("agent.verb", "run")?
            .set_default("agent.stability_level", "experimental")?
            .set_default("catalog.path", "./benchmarks.json")?
            .set_default("storage.root", "./data")?
            .set_default("storage.control_dir", "test-data")?
            .set_default("control.config", "./configs/test.river")?
            .set_default("control.host", "127.0.0.1")?
            .set_default("control.port", 9001)?
            .set_default("ports.base", 12345)?
            .set_default("ports.listen_host", "127.0.0.1")?
            .set_default("ports.advertise_host", "localhost")?
            .set_default("discovery.template", DEFAULT_DISCOVERY_TEMPLATE)?
            .set_default("credentials.required", vec!["PROM_USERNAME", "PROM_PASSWORD"])?
            .set_default("shutdown.grace_period", "5s")?
            .set_default("fault_server.enabled", true)?
            .set_default("fault_server.listen_addr", "127.0.0.1:8888")?
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.agent.binary.as_os_str().is_empty() {
            errors.push("agent.binary must not be empty".to_string());
        }

        if self.agent.verb.trim().is_empty() {
            errors.push("agent.verb must not be empty".to_string());
        }

        // Subjects occupy base+1 and upward, so the control port must sit at or below base
        if self.control.port > self.ports.base {
            errors.push(format!(
                "control.port ({}) must not fall inside the subject port range (> {})",
                self.control.port, self.ports.base
            ));
        }

        if self.ports.base == u16::MAX {
            errors.push("ports.base leaves no room for subject ports".to_string());
        }

        if self.shutdown.grace_period.is_zero() {
            errors.push("shutdown.grace_period must be positive".to_string());
        }

        if self.storage.control_dir.trim().is_empty() {
            errors.push("storage.control_dir must not be empty".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_match_harness_layout() {
        let config = HarnessConfig::defaults().unwrap();

        assert_eq!(config.agent.binary, PathBuf::from("./alloy"));
        assert_eq!(config.control.port, 9001);
        assert_eq!(config.ports.base, 12345);
        assert_eq!(config.storage.control_path(), PathBuf::from("./data/test-data"));
        assert_eq!(config.shutdown.grace_period, Duration::from_secs(5));
        assert_eq!(config.credentials.required, vec!["PROM_USERNAME", "PROM_PASSWORD"]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_discovery_url_substitution() {
        let config = HarnessConfig::defaults().unwrap();
        assert_eq!(
            config.discovery.url(9001, "churn"),
            "http://127.0.0.1:9001/api/v0/component/prometheus.test.metrics.churn/discovery"
        );
    }

    #[test]
    fn test_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[ports]\nbase = 20000\n\n[shutdown]\ngrace_period = \"250ms\"\n"
        )
        .unwrap();

        let config = HarnessConfig::load_from(file.path(), true).unwrap();
        assert_eq!(config.ports.base, 20000);
        assert_eq!(config.shutdown.grace_period, Duration::from_millis(250));
        // Untouched sections keep their defaults
        assert_eq!(config.control.port, 9001);
    }

    #[test]
    fn test_validate_rejects_control_port_in_subject_range() {
        let mut config = HarnessConfig::defaults().unwrap();
        config.control.port = 12350;
        config.shutdown.grace_period = Duration::ZERO;

        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(errors[0].contains("control.port"));
    }
}
