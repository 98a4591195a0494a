use std::time::Duration;

use crate::error::{BenchError, Result};

/// Everything a single orchestration run needs from its caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    /// Label attached to every subject's exported data
    pub run_name: String,
    pub duration: Duration,
    /// Benchmarks to launch, in start order
    pub benchmark_names: Vec<String>,
    /// Selects the discovery path on the control agent
    pub fault_injection_source: String,
    pub simulate_network_down: bool,
}

impl RunRequest {
    pub fn new(run_name: impl Into<String>, duration: Duration, benchmarks: &str) -> Result<Self> {
        Ok(Self {
            run_name: run_name.into(),
            duration,
            benchmark_names: parse_benchmark_list(benchmarks)?,
            fault_injection_source: String::new(),
            simulate_network_down: false,
        })
    }

    pub fn with_fault_injection_source(mut self, source: impl Into<String>) -> Self {
        self.fault_injection_source = source.into();
        self
    }

    pub fn with_network_down(mut self, down: bool) -> Self {
        self.simulate_network_down = down;
        self
    }
}

/// Split a comma-delimited benchmark list, ignoring blanks
pub fn parse_benchmark_list(raw: &str) -> Result<Vec<String>> {
    let names: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect();

    if names.is_empty() {
        return Err(BenchError::EmptyBenchmarkList);
    }
    Ok(names)
}

/// Parse a human duration such as `5s`, `90s` or `1m 30s`
pub fn parse_duration(raw: &str) -> Result<Duration> {
    humantime::parse_duration(raw.trim())
        .map_err(|e| BenchError::InvalidDuration(format!("{raw:?}: {e}")))
}
