//! Error taxonomy (§7). Each kind is its own `thiserror` enum so call sites
//! can match on specifics before they get folded into [`CoSimError`], the
//! crate-wide `Result` alias's error type.

use crate::ids::IdError;
use crate::time::T;

/// Raised at `seal()`; a run never starts if this is returned.
#[derive(Debug, thiserror::Error)]
pub enum ScenarioError {
    #[error("unresolved cycle through simulators {0:?}: every cycle must include a time-shift edge")]
    UnresolvedCycle(Vec<String>),

    #[error("edge {src} -> {dst}: time_shift and weak cannot both be set on the same edge")]
    TimeShiftAndWeak { src: String, dst: String },

    #[error("edge {src} -> {dst}: time_shift requires initial_data for attribute `{attr}`")]
    MissingInitialData {
        src: String,
        dst: String,
        attr: String,
    },

    #[error("simulator `{sim}` has no model `{model}`")]
    UnknownModel { sim: String, model: String },

    #[error("simulator `{sim}` model `{model}` has no attribute `{attr}`")]
    UnknownAttribute {
        sim: String,
        model: String,
        attr: String,
    },

    #[error("simulator `{sim}` model `{model}` has no param `{param}`")]
    UnknownParam {
        sim: String,
        model: String,
        param: String,
    },

    #[error(
        "duplicate edge {src} -> {dst} on attribute `{attr}` with conflicting modifiers"
    )]
    DuplicateEdge {
        src: String,
        dst: String,
        attr: String,
    },

    #[error("cannot connect entities within the same simulator `{0}`")]
    SelfConnection(String),

    #[error("simulator `{sim}` declares api_version {declared}, incompatible with core {core}")]
    IncompatibleVersion {
        sim: String,
        declared: String,
        core: String,
    },

    #[error("unknown simulator id `{0}`")]
    UnknownSimulator(String),

    #[error("unknown entity `{0}`")]
    UnknownEntity(String),

    #[error("scenario already sealed")]
    AlreadySealed,

    #[error(transparent)]
    Id(#[from] IdError),
}

/// Fatal during a run: bounded-iteration violations, real-time deadlines,
/// and simulators that violate the stepping contract.
#[derive(Debug, thiserror::Error)]
pub enum SchedulingError {
    #[error("same-time loop at {t} exceeded max_loop_iterations ({limit})")]
    LoopExceeded { t: T, limit: u32 },

    #[error("real-time deadline missed for simulator `{sim}` at {t} (strict mode)")]
    RealTimeDeadlineMissed { sim: String, t: T },

    #[error("simulator `{sim}` returned t_next={t_next} <= t={t} outside a same-time loop")]
    NonMonotonicStep { sim: String, t: T, t_next: T },

    #[error("simulator `{sim}` produced event at t_event={t_event} < t_step={t_step}")]
    BackdatedEvent {
        sim: String,
        t_event: T,
        t_step: T,
    },

    #[error("negative max_advance requested for simulator `{sim}` at {t}")]
    NegativeMaxAdvance { sim: String, t: T },
}

/// Malformed wire traffic or version mismatches at the protocol layer.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("frame length {0} exceeds maximum allowed size {1}")]
    FrameTooLarge(u32, u32),

    #[error("reply msg_id {got} does not match outstanding request {expected}")]
    MismatchedMsgId { expected: u64, got: u64 },

    #[error("unexpected msg_type {0}")]
    UnexpectedMsgType(u8),

    #[error("simulator `{sim}` returned an error reply to `{method}`: {message}")]
    ErrorReply {
        sim: String,
        method: String,
        message: String,
    },

    #[error("invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),
}

/// Connection, I/O, and timeout failures underneath the protocol.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connection to simulator `{sim}` failed: {source}")]
    Connect {
        sim: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error talking to simulator `{sim}`: {source}")]
    Io {
        sim: String,
        #[source]
        source: std::io::Error,
    },

    #[error("simulator `{sim}` closed the connection (EOF) mid-exchange")]
    Eof { sim: String },

    #[error("timed out waiting for simulator `{sim}` ({operation})")]
    Timeout { sim: String, operation: String },

    #[error("start timeout waiting for simulator `{sim}` to become reachable")]
    StartTimeout { sim: String },
}

/// Top-level error type returned by every fallible public operation.
///
/// All four kinds are fatal to the run once it has started (§7
/// "Propagation: all errors are fatal to the run"); [`ScenarioError`] is the
/// only kind that can occur before a run starts, at `seal()`.
#[derive(Debug, thiserror::Error)]
pub enum CoSimError {
    #[error(transparent)]
    Scenario(#[from] ScenarioError),
    #[error(transparent)]
    Scheduling(#[from] SchedulingError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, CoSimError>;
