//! Wire message shapes (§6): the `[msg_type, msg_id, content]` envelope,
//! and the typed payloads carried inside `content` for each direction of
//! traffic.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsgType {
    Request,
    Success,
    Error,
}

impl MsgType {
    fn as_u8(self) -> u8 {
        match self {
            MsgType::Request => 0,
            MsgType::Success => 1,
            MsgType::Error => 2,
        }
    }

    fn from_u8(v: u8) -> Result<Self, ProtocolError> {
        match v {
            0 => Ok(MsgType::Request),
            1 => Ok(MsgType::Success),
            2 => Ok(MsgType::Error),
            other => Err(ProtocolError::UnexpectedMsgType(other)),
        }
    }
}

/// One `[msg_type, msg_id, content]` frame payload.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub msg_type: MsgType,
    pub msg_id: u64,
    pub content: Value,
}

impl Envelope {
    pub fn request(msg_id: u64, content: impl Serialize) -> Result<Self, ProtocolError> {
        Ok(Self {
            msg_type: MsgType::Request,
            msg_id,
            content: serde_json::to_value(content)?,
        })
    }

    pub fn success(msg_id: u64, content: impl Serialize) -> Result<Self, ProtocolError> {
        Ok(Self {
            msg_type: MsgType::Success,
            msg_id,
            content: serde_json::to_value(content)?,
        })
    }

    pub fn error(msg_id: u64, message: impl Into<String>) -> Self {
        Self {
            msg_type: MsgType::Error,
            msg_id,
            content: Value::String(message.into()),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        let tuple = (self.msg_type.as_u8(), self.msg_id, &self.content);
        Ok(serde_json::to_vec(&tuple)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (msg_type, msg_id, content): (u8, u64, Value) = serde_json::from_slice(bytes)?;
        Ok(Self {
            msg_type: MsgType::from_u8(msg_type)?,
            msg_id,
            content,
        })
    }

    /// Interprets a reply envelope as a `Result`, per §6 ("msg_type 2 is an
    /// error whose content is a human-readable message").
    pub fn into_reply(self, sim: &str, method: &str) -> Result<Value, ProtocolError> {
        match self.msg_type {
            MsgType::Success => Ok(self.content),
            MsgType::Error => {
                let message = self
                    .content
                    .as_str()
                    .map(str::to_string)
                    .unwrap_or_else(|| self.content.to_string());
                Err(ProtocolError::ErrorReply {
                    sim: sim.to_string(),
                    method: method.to_string(),
                    message,
                })
            }
            MsgType::Request => Err(ProtocolError::UnexpectedMsgType(0)),
        }
    }
}

/// Core -> simulator calls (§6 "the standard simulator contract").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum CoreRequest {
    Init {
        sim_id: String,
        time_resolution: f64,
        #[serde(default)]
        init_kwargs: BTreeMap<String, Value>,
    },
    Create {
        model: String,
        num: u32,
        #[serde(default)]
        params: BTreeMap<String, Value>,
    },
    Step {
        t: u64,
        inputs: BTreeMap<String, BTreeMap<String, Value>>,
        max_advance: Option<u64>,
    },
    GetData {
        outputs: BTreeMap<String, Vec<String>>,
    },
    SetupDone,
    Stop,
}

/// Simulator -> core calls, raised mid-step via C7 (§6 "remote services").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum SimRequest {
    GetProgress,
    GetRelatedEntities {
        #[serde(default)]
        entities: Vec<String>,
    },
    GetData {
        requests: BTreeMap<String, Vec<String>>,
    },
    SetData {
        data: BTreeMap<String, BTreeMap<String, Value>>,
    },
    SetEvent {
        time: u64,
        #[serde(default)]
        sid: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_round_trips_through_bytes() {
        let env = Envelope::request(7, CoreRequest::SetupDone).unwrap();
        let bytes = env.to_bytes().unwrap();
        let back = Envelope::from_bytes(&bytes).unwrap();
        assert_eq!(back.msg_id, 7);
        assert_eq!(back.msg_type, MsgType::Request);
    }

    #[test]
    fn error_reply_becomes_protocol_error() {
        let env = Envelope::error(1, "boom");
        let err = env.into_reply("simA", "step").unwrap_err();
        assert!(matches!(err, ProtocolError::ErrorReply { message, .. } if message == "boom"));
    }

    #[test]
    fn step_request_serializes_with_tagged_method() {
        let req = CoreRequest::Step {
            t: 3,
            inputs: BTreeMap::new(),
            max_advance: Some(10),
        };
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(v["method"], "step");
        assert_eq!(v["t"], 3);
    }
}
