//! The simulator wire protocol (§6): length-prefixed JSON framing plus the
//! request/reply shapes exchanged with a simulator process.

mod frame;
mod messages;

pub use frame::{read_frame, write_frame, MAX_FRAME_LEN};
pub use messages::{CoreRequest, Envelope, MsgType, SimRequest};

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::{CoSimError, ProtocolError, TransportError};

/// A framed JSON-RPC-ish duplex connection to one simulator process.
/// Generic over the stream type so production code frames a `TcpStream`
/// and tests frame an in-process `tokio::io::duplex` pair.
pub struct Connection<S> {
    stream: S,
    sim: String,
    next_msg_id: AtomicU64,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, sim: impl Into<String>) -> Self {
        Self {
            stream,
            sim: sim.into(),
            next_msg_id: AtomicU64::new(0),
        }
    }

    fn next_id(&self) -> u64 {
        self.next_msg_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Sends a request and awaits its reply, matching on `msg_id` (§6
    /// "replies are matched to requests by id").
    pub async fn call(&mut self, request: CoreRequest) -> Result<serde_json::Value, CoSimError> {
        let label = request_label(&request);
        let msg_id = self.next_id();
        let env = Envelope::request(msg_id, request)?;
        self.send(env).await?;
        let reply = self.recv().await?.ok_or_else(|| TransportError::Eof {
            sim: self.sim.clone(),
        })?;
        if reply.msg_id != msg_id {
            return Err(ProtocolError::MismatchedMsgId {
                expected: msg_id,
                got: reply.msg_id,
            }
            .into());
        }
        Ok(reply.into_reply(&self.sim, label)?)
    }

    /// Like [`Connection::call`], but services any `SimRequest`s the
    /// simulator raises on this same connection before its final reply
    /// arrives (§6 "a simulator may call back into the core while its own
    /// step is in flight"). `on_remote` answers each one.
    pub async fn call_with_remote<F, Fut>(
        &mut self,
        request: CoreRequest,
        mut on_remote: F,
    ) -> Result<serde_json::Value, CoSimError>
    where
        F: FnMut(SimRequest) -> Fut,
        Fut: std::future::Future<Output = Result<serde_json::Value, CoSimError>>,
    {
        let label = request_label(&request);
        let msg_id = self.next_id();
        let env = Envelope::request(msg_id, request)?;
        self.send(env).await?;

        loop {
            let frame = self.recv().await?.ok_or_else(|| TransportError::Eof {
                sim: self.sim.clone(),
            })?;
            match frame.msg_type {
                MsgType::Request => {
                    let sim_req: SimRequest = serde_json::from_value(frame.content)
                        .map_err(ProtocolError::from)?;
                    let reply_env = match on_remote(sim_req).await {
                        Ok(v) => Envelope::success(frame.msg_id, v)?,
                        Err(e) => Envelope::error(frame.msg_id, e.to_string()),
                    };
                    self.send(reply_env).await?;
                }
                MsgType::Success | MsgType::Error => {
                    if frame.msg_id != msg_id {
                        return Err(ProtocolError::MismatchedMsgId {
                            expected: msg_id,
                            got: frame.msg_id,
                        }
                        .into());
                    }
                    return Ok(frame.into_reply(&self.sim, label)?);
                }
            }
        }
    }

    pub async fn send(&mut self, env: Envelope) -> Result<(), CoSimError> {
        let bytes = env.to_bytes()?;
        write_frame(&mut self.stream, &bytes)
            .await
            .map_err(CoSimError::from)
    }

    /// Reads one frame and decodes it as an envelope; `Ok(None)` on clean
    /// EOF.
    pub async fn recv(&mut self) -> Result<Option<Envelope>, CoSimError> {
        match read_frame(&mut self.stream).await? {
            Some(bytes) => Ok(Some(Envelope::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn sim_id(&self) -> &str {
        &self.sim
    }
}

fn request_label(request: &CoreRequest) -> &'static str {
    match request {
        CoreRequest::Init { .. } => "init",
        CoreRequest::Create { .. } => "create",
        CoreRequest::Step { .. } => "step",
        CoreRequest::GetData { .. } => "get_data",
        CoreRequest::SetupDone => "setup_done",
        CoreRequest::Stop => "stop",
    }
}
