//! Stable identifiers: simulators, entities, and their canonical addressing.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque, scenario-unique simulator identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SimulatorId(String);

impl SimulatorId {
    /// Builds a simulator id. `.` is reserved for full-id addressing
    /// (§6 "Entity IDs in addressing") and rejected here rather than later,
    /// at every call site that builds a full id.
    pub fn new(id: impl Into<String>) -> Result<Self, IdError> {
        let id = id.into();
        if id.is_empty() {
            return Err(IdError::Empty);
        }
        if id.contains('.') {
            return Err(IdError::ReservedChar { id, ch: '.' });
        }
        Ok(SimulatorId(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SimulatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An entity instance local to a simulator; unique within that simulator.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityId(String);

impl EntityId {
    pub fn new(id: impl Into<String>) -> Result<Self, IdError> {
        let id = id.into();
        if id.is_empty() {
            return Err(IdError::Empty);
        }
        if id.contains('.') {
            return Err(IdError::ReservedChar { id, ch: '.' });
        }
        Ok(EntityId(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A cross-simulator entity reference `(sid, eid)`, rendered canonically as
/// `"{sid}.{eid}"` wherever a full id crosses the simulator protocol
/// boundary (§6 "Entity IDs in addressing").
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntityRef {
    pub sim: SimulatorId,
    pub entity: EntityId,
}

impl EntityRef {
    pub fn new(sim: SimulatorId, entity: EntityId) -> Self {
        Self { sim, entity }
    }

    /// The canonical `"{sid}.{eid}"` form used in remote-service addressing.
    pub fn full_id(&self) -> String {
        format!("{}.{}", self.sim, self.entity)
    }

    /// Parses a canonical `"{sid}.{eid}"` full id back into its parts.
    /// Splits on the first `.`, since neither part may itself contain one.
    pub fn parse(full_id: &str) -> Result<Self, IdError> {
        let (sid, eid) = full_id
            .split_once('.')
            .ok_or_else(|| IdError::MalformedFullId(full_id.to_string()))?;
        Ok(Self {
            sim: SimulatorId::new(sid)?,
            entity: EntityId::new(eid)?,
        })
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.full_id())
    }
}

/// Errors constructing or parsing identifiers.
#[derive(Debug, Clone, thiserror::Error)]
pub enum IdError {
    #[error("id must not be empty")]
    Empty,
    #[error("id `{id}` must not contain the reserved character `{ch}`")]
    ReservedChar { id: String, ch: char },
    #[error("malformed full id `{0}`: expected `{{sid}}.{{eid}}`")]
    MalformedFullId(String),
}
