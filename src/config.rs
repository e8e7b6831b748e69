//! Scenario authoring format: a TOML file describing which simulators to
//! connect to, how to wire their attributes, and the run's pacing knobs.
//!
//! Unknown keys are rejected outright (`deny_unknown_fields`) rather than
//! silently ignored, and [`ScenarioFile::validate`] collects every problem
//! it finds instead of stopping at the first, so a scenario author sees
//! the whole list of mistakes in one pass.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;

const fn default_max_loop_iterations() -> u32 {
    100
}

const fn default_stop_timeout_secs() -> f64 {
    10.0
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScenarioFile {
    pub time_resolution: f64,
    #[serde(default)]
    pub until: Option<u64>,
    #[serde(default)]
    pub rt_factor: Option<f64>,
    #[serde(default)]
    pub rt_strict: bool,
    #[serde(default = "default_max_loop_iterations")]
    pub max_loop_iterations: u32,
    #[serde(default)]
    pub lazy_stepping: bool,
    /// Seconds `run()` waits for every simulator's graceful `stop()` after
    /// a fatal error, before aborting the stragglers outright (§4.8).
    #[serde(default = "default_stop_timeout_secs")]
    pub stop_timeout_secs: f64,
    pub simulators: BTreeMap<String, SimulatorSpec>,
    #[serde(default)]
    pub connections: Vec<ConnectionSpec>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SimulatorSpec {
    /// `host:port` to dial for this simulator's process.
    pub connect: String,
    #[serde(default)]
    pub init_kwargs: BTreeMap<String, Value>,
    /// Entities to `create()` on this simulator before sealing. Keyed by a
    /// scenario-local label; the entity ids actually registered are
    /// whatever the simulator's `create()` reply returns.
    #[serde(default)]
    pub entities: BTreeMap<String, EntitySpec>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EntitySpec {
    pub model: String,
    #[serde(default = "default_num")]
    pub num: u32,
    #[serde(default)]
    pub params: BTreeMap<String, Value>,
}

const fn default_num() -> u32 {
    1
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectionSpec {
    /// `"{sid}.{eid}"`.
    pub src: String,
    /// `"{sid}.{eid}"`.
    pub dst: String,
    /// `(src_attr, dst_attr)` pairs.
    pub attrs: Vec<(String, String)>,
    #[serde(default)]
    pub time_shift: bool,
    #[serde(default)]
    pub weak: bool,
    #[serde(default)]
    pub initial_data: BTreeMap<String, Value>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to parse scenario file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("time_resolution must be positive, got {0}")]
    NonPositiveTimeResolution(f64),
    #[error("max_loop_iterations must be at least 1")]
    ZeroMaxLoopIterations,
    #[error("stop_timeout_secs must be positive, got {0}")]
    NonPositiveStopTimeout(f64),
    #[error("connection endpoint `{0}` is not a valid `sid.eid` full id")]
    MalformedEndpoint(String),
    #[error("connection {src} -> {dst} declares no attrs")]
    EmptyAttrs { src: String, dst: String },
    #[error("simulator `{0}` has no `connect` address configured")]
    EmptyConnectAddress(String),
}

impl ScenarioFile {
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Validates the file, returning every problem found rather than just
    /// the first.
    pub fn validate(&self) -> Result<(), Vec<ConfigError>> {
        let mut errors = Vec::new();

        if !(self.time_resolution > 0.0) {
            errors.push(ConfigError::NonPositiveTimeResolution(self.time_resolution));
        }
        if self.max_loop_iterations == 0 {
            errors.push(ConfigError::ZeroMaxLoopIterations);
        }
        if !(self.stop_timeout_secs > 0.0) {
            errors.push(ConfigError::NonPositiveStopTimeout(self.stop_timeout_secs));
        }
        for (sim_id, spec) in &self.simulators {
            if spec.connect.trim().is_empty() {
                errors.push(ConfigError::EmptyConnectAddress(sim_id.clone()));
            }
        }
        for conn in &self.connections {
            if !conn.src.contains('.') {
                errors.push(ConfigError::MalformedEndpoint(conn.src.clone()));
            }
            if !conn.dst.contains('.') {
                errors.push(ConfigError::MalformedEndpoint(conn.dst.clone()));
            }
            if conn.attrs.is_empty() {
                errors.push(ConfigError::EmptyAttrs {
                    src: conn.src.clone(),
                    dst: conn.dst.clone(),
                });
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
