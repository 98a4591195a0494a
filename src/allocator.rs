//! Port and environment allocation for subject agents

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::catalog::BenchmarkDefinition;
use crate::config::{DiscoveryConfig, HarnessConfig};
use crate::request::RunRequest;

/// Environment variable names injected into every subject
pub mod env {
    pub const NAME: &str = "NAME";
    pub const HOST: &str = "HOST";
    pub const RUNTYPE: &str = "RUNTYPE";
    pub const NETWORK_DOWN: &str = "NETWORK_DOWN";
    pub const DISCOVERY: &str = "DISCOVERY";
}

/// Resolved parameters for one subject launch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub benchmark_name: String,
    pub config_path: PathBuf,
    pub storage_dir: PathBuf,
    pub port: u16,
    pub listen_addr: String,
    pub env_overrides: BTreeMap<String, String>,
}

/// Derives per-subject ports, storage dirs and environment.
///
/// Subject `i` (zero-based, in resolution order) listens on `base + 1 + i`.
#[derive(Debug, Clone)]
pub struct PortAllocator {
    base_port: u16,
    listen_host: String,
    advertise_host: String,
    control_port: u16,
    storage_root: PathBuf,
    discovery: DiscoveryConfig,
}

impl PortAllocator {
    pub fn new(config: &HarnessConfig) -> Self {
        Self {
            base_port: config.ports.base,
            listen_host: config.ports.listen_host.clone(),
            advertise_host: config.ports.advertise_host.clone(),
            control_port: config.control.port,
            storage_root: config.storage.root.clone(),
            discovery: config.discovery.clone(),
        }
    }

    /// Port for the subject at `index`, `None` past the end of the port space
    pub fn port_for(&self, index: usize) -> Option<u16> {
        let offset = u16::try_from(index).ok()?.checked_add(1)?;
        self.base_port.checked_add(offset)
    }

    pub fn storage_dir(&self, name: &str) -> PathBuf {
        self.storage_root.join(name)
    }

    /// Build the launch spec for one subject.
    ///
    /// Returns `None` only when the index runs out of ports.
    pub fn allocate(
        &self,
        request: &RunRequest,
        def: &BenchmarkDefinition,
        index: usize,
    ) -> Option<LaunchSpec> {
        let port = self.port_for(index)?;

        let mut env_overrides = BTreeMap::new();
        env_overrides.insert(env::NAME.to_string(), request.run_name.clone());
        env_overrides.insert(
            env::HOST.to_string(),
            format!("{}:{}", self.advertise_host, port),
        );
        env_overrides.insert(env::RUNTYPE.to_string(), def.name.clone());
        env_overrides.insert(
            env::NETWORK_DOWN.to_string(),
            request.simulate_network_down.to_string(),
        );
        env_overrides.insert(
            env::DISCOVERY.to_string(),
            self.discovery
                .url(self.control_port, &request.fault_injection_source),
        );

        let spec = LaunchSpec {
            benchmark_name: def.name.clone(),
            config_path: def.config_path.clone(),
            storage_dir: self.storage_dir(&def.name),
            port,
            listen_addr: format!("{}:{}", self.listen_host, port),
            env_overrides,
        };
        debug!(
            benchmark = %spec.benchmark_name,
            port = spec.port,
            storage = %spec.storage_dir.display(),
            "Allocated launch spec"
        );
        Some(spec)
    }
}

/// Best-effort removal of a storage directory.
///
/// A missing directory is fine; any other failure is logged and swallowed.
pub fn clear_storage_dir(dir: &Path) {
    match std::fs::remove_dir_all(dir) {
        Ok(()) => debug!(dir = %dir.display(), "Removed storage directory"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(dir = %dir.display(), error = %e, "Failed to remove storage directory"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn allocator() -> PortAllocator {
        PortAllocator::new(&HarnessConfig::defaults().unwrap())
    }

    fn def(name: &str) -> BenchmarkDefinition {
        BenchmarkDefinition {
            name: name.into(),
            config_path: PathBuf::from(format!("./configs/{name}.river")),
            description: String::new(),
        }
    }

    #[test]
    fn test_sequential_ports_start_above_base() {
        let allocator = allocator();
        let request = RunRequest::new("run", Duration::from_secs(5), "single,churn").unwrap();

        let first = allocator.allocate(&request, &def("single"), 0).unwrap();
        let second = allocator.allocate(&request, &def("churn"), 1).unwrap();

        assert_eq!(first.port, 12346);
        assert_eq!(second.port, 12347);
        assert_eq!(first.listen_addr, "127.0.0.1:12346");
        assert_eq!(first.storage_dir, PathBuf::from("./data/single"));
        assert_eq!(second.storage_dir, PathBuf::from("./data/churn"));
    }

    #[test]
    fn test_env_overrides() {
        let allocator = allocator();
        let request = RunRequest::new("nightly", Duration::from_secs(5), "churn")
            .unwrap()
            .with_fault_injection_source("large")
            .with_network_down(true);

        let spec = allocator.allocate(&request, &def("churn"), 0).unwrap();
        let vars = &spec.env_overrides;

        assert_eq!(vars[env::NAME], "nightly");
        assert_eq!(vars[env::HOST], "localhost:12346");
        assert_eq!(vars[env::RUNTYPE], "churn");
        assert_eq!(vars[env::NETWORK_DOWN], "true");
        assert_eq!(
            vars[env::DISCOVERY],
            "http://127.0.0.1:9001/api/v0/component/prometheus.test.metrics.large/discovery"
        );
    }

    #[test]
    fn test_network_flag_comes_from_each_request() {
        let allocator = allocator();
        let up = RunRequest::new("a", Duration::from_secs(1), "single").unwrap();
        let down = up.clone().with_network_down(true);

        let spec_up = allocator.allocate(&up, &def("single"), 0).unwrap();
        let spec_down = allocator.allocate(&down, &def("single"), 0).unwrap();
        assert_eq!(spec_up.env_overrides[env::NETWORK_DOWN], "false");
        assert_eq!(spec_down.env_overrides[env::NETWORK_DOWN], "true");
    }

    #[test]
    fn test_port_space_exhaustion() {
        let mut config = HarnessConfig::defaults().unwrap();
        config.ports.base = u16::MAX - 1;
        let allocator = PortAllocator::new(&config);
        assert_eq!(allocator.port_for(0), Some(u16::MAX));
        assert_eq!(allocator.port_for(1), None);
    }

    #[test]
    fn test_clear_storage_dir_tolerates_missing() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("single");
        std::fs::create_dir_all(dir.join("wal")).unwrap();
        std::fs::write(dir.join("wal").join("0001"), b"x").unwrap();

        clear_storage_dir(&dir);
        assert!(!dir.exists());
        // Second call is a no-op
        clear_storage_dir(&dir);
    }
}
