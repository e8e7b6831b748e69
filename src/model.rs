//! Per-simulator metadata: attribute kinds, stepping policy, and the typed
//! model description reported by `init()` (§3 `ModelMeta`, §9 "dynamic meta
//! as tagged variants").

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Whether an attribute is defined for all time ("persistent") or only at
/// discrete instants ("transient").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttrKind {
    /// Defined for all time; cached as a `[t_from, next_t_from)` interval.
    Measurement,
    /// Defined only at discrete instants; delivered at most once per target
    /// step and evicted from the cache once delivered.
    Event,
}

impl AttrKind {
    pub fn is_persistent(self) -> bool {
        matches!(self, AttrKind::Measurement)
    }
}

/// Stepping policy a simulator declares at `init()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SimulatorKind {
    /// Steps at self-chosen times; every attribute is a measurement.
    TimeBased,
    /// Steps only when an event is scheduled for it; attributes are events
    /// by default and a step may omit outputs entirely.
    EventBased,
    /// Both self-schedules and can be externally triggered; attribute kind
    /// is declared per-attribute in `ModelMeta`.
    Hybrid,
}

/// One model a simulator can instantiate entities of.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelDescriptor {
    /// Accepted `create()` parameter names.
    pub params: BTreeSet<String>,
    /// Declared inputs: name and attribute kind.
    pub inputs: BTreeMap<String, AttrKind>,
    /// Declared outputs: name and attribute kind.
    pub outputs: BTreeMap<String, AttrKind>,
    /// If set, any attribute name may be connected to this model (used by
    /// generic sinks/monitors) — `connect()` skips the name-match check.
    pub any_inputs: bool,
}

impl ModelDescriptor {
    pub fn attr_kind(&self, attr: &str) -> Option<AttrKind> {
        self.inputs
            .get(attr)
            .or_else(|| self.outputs.get(attr))
            .copied()
    }
}

/// Full metadata reported by a simulator's `init()` call (§6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelMeta {
    pub api_version: ApiVersion,
    pub kind: SimulatorKind,
    pub models: BTreeMap<String, ModelDescriptor>,
    /// Extra methods the simulator exposes beyond the standard contract;
    /// recorded but not interpreted by the core.
    pub extra_methods: Vec<String>,
}

/// `major.minor` API version, compared per §6: major must match exactly,
/// simulator minor must be `<=` the core's minor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ApiVersion {
    pub major: u32,
    pub minor: u32,
}

impl ApiVersion {
    pub const CORE: ApiVersion = ApiVersion { major: 3, minor: 0 };

    pub fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    /// True iff a simulator declaring `self` is compatible with `core`.
    pub fn compatible_with(self, core: ApiVersion) -> bool {
        self.major == core.major && self.minor <= core.minor
    }
}

impl std::fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}
