//! The simulator proxy (C2): the core's view of one simulator process, and
//! the handful of async calls the scheduler drives it with.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::{CoSimError, ScenarioError};
use crate::ids::EntityId;
use crate::model::{ApiVersion, AttrKind, ModelDescriptor, ModelMeta, SimulatorKind};
use crate::protocol::{Connection, CoreRequest};
use crate::time::T;

#[derive(Debug, Deserialize)]
struct WireModelDescriptor {
    #[serde(default)]
    params: Vec<String>,
    #[serde(default)]
    inputs: BTreeMap<String, AttrKind>,
    #[serde(default)]
    outputs: BTreeMap<String, AttrKind>,
    #[serde(default)]
    any_inputs: bool,
}

#[derive(Debug, Deserialize)]
struct WireModelMeta {
    api_version: ApiVersion,
    #[serde(rename = "type")]
    kind: SimulatorKind,
    models: BTreeMap<String, WireModelDescriptor>,
    #[serde(default)]
    extra_methods: Vec<String>,
}

fn convert_meta(wire: WireModelMeta) -> ModelMeta {
    ModelMeta {
        api_version: wire.api_version,
        kind: wire.kind,
        models: wire
            .models
            .into_iter()
            .map(|(name, d)| {
                (
                    name,
                    ModelDescriptor {
                        params: d.params.into_iter().collect(),
                        inputs: d.inputs,
                        outputs: d.outputs,
                        any_inputs: d.any_inputs,
                    },
                )
            })
            .collect(),
        extra_methods: wire.extra_methods,
    }
}

/// Per-simulator state the scheduler owns: connection, declared metadata,
/// and the stepping bookkeeping §3's state machine describes.
pub struct SimulatorProxy<S> {
    id: crate::ids::SimulatorId,
    conn: Connection<S>,
    pub meta: ModelMeta,
    /// Progress: the time up to which this simulator's outputs are known
    /// and stable (its last completed step's `t_next`, or 0 before the
    /// first step).
    pub progress: T,
    pub next_step: Option<T>,
    terminated: bool,
}

impl<S> SimulatorProxy<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Performs `init()` and records the declared metadata, checking API
    /// version compatibility before returning (§6).
    pub async fn init(
        stream: S,
        sim_id: crate::ids::SimulatorId,
        time_resolution: f64,
        init_kwargs: BTreeMap<String, Value>,
    ) -> Result<Self, CoSimError> {
        let sim_id_str = sim_id.to_string();
        let mut conn = Connection::new(stream, sim_id_str.clone());
        let reply = conn
            .call(CoreRequest::Init {
                sim_id: sim_id_str.clone(),
                time_resolution,
                init_kwargs,
            })
            .await?;
        let wire: WireModelMeta = serde_json::from_value(reply).map_err(crate::error::ProtocolError::from)?;
        let meta = convert_meta(wire);
        if !meta.api_version.compatible_with(ApiVersion::CORE) {
            return Err(ScenarioError::IncompatibleVersion {
                sim: sim_id_str,
                declared: meta.api_version.to_string(),
                core: ApiVersion::CORE.to_string(),
            }
            .into());
        }
        Ok(Self {
            id: sim_id,
            conn,
            meta,
            progress: T::zero(),
            next_step: Some(T::zero()),
            terminated: false,
        })
    }

    pub fn id(&self) -> &crate::ids::SimulatorId {
        &self.id
    }

    pub async fn create(
        &mut self,
        model: &str,
        num: u32,
        params: BTreeMap<String, Value>,
    ) -> Result<Vec<EntityId>, CoSimError> {
        let reply = self
            .conn
            .call(CoreRequest::Create {
                model: model.to_string(),
                num,
                params,
            })
            .await?;
        let ids: Vec<String> = serde_json::from_value(reply).map_err(crate::error::ProtocolError::from)?;
        ids.into_iter()
            .map(|raw| EntityId::new(raw).map_err(|e| ScenarioError::Id(e).into()))
            .collect()
    }

    /// Steps this simulator to `t`, returning its self-declared `t_next` if
    /// it has one. `None` means the simulator has no further self-scheduled
    /// step and is now waiting on a trigger (an incoming event, or an
    /// injected `set_event`) — only ever legal for event-based and hybrid
    /// simulators. `on_remote` answers any C7 remote-service calls the
    /// simulator raises while the step is in flight.
    pub async fn step<F, Fut>(
        &mut self,
        t: T,
        inputs: BTreeMap<String, BTreeMap<String, Value>>,
        max_advance: Option<T>,
        on_remote: F,
    ) -> Result<Option<T>, CoSimError>
    where
        F: FnMut(crate::protocol::SimRequest) -> Fut,
        Fut: std::future::Future<Output = Result<Value, CoSimError>>,
    {
        let reply = self
            .conn
            .call_with_remote(
                CoreRequest::Step {
                    t: t.ticks(),
                    inputs,
                    max_advance: max_advance.map(T::ticks),
                },
                on_remote,
            )
            .await?;
        let t_next: Option<u64> =
            serde_json::from_value(reply).map_err(crate::error::ProtocolError::from)?;
        let t_next = t_next.map(T::new);
        self.progress = t_next.unwrap_or(t);
        self.next_step = t_next;
        Ok(t_next)
    }

    pub async fn get_data(
        &mut self,
        outputs: BTreeMap<String, Vec<String>>,
    ) -> Result<BTreeMap<String, BTreeMap<String, Value>>, CoSimError> {
        let reply = self.conn.call(CoreRequest::GetData { outputs }).await?;
        Ok(serde_json::from_value(reply).map_err(crate::error::ProtocolError::from)?)
    }

    pub async fn setup_done(&mut self) -> Result<(), CoSimError> {
        self.conn.call(CoreRequest::SetupDone).await?;
        Ok(())
    }

    /// Best-effort `stop()`; the caller decides whether to propagate a
    /// failure (shutdown treats this as advisory, per §8).
    pub async fn stop(&mut self) -> Result<(), CoSimError> {
        if self.terminated {
            return Ok(());
        }
        self.terminated = true;
        self.conn.call(CoreRequest::Stop).await?;
        Ok(())
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    pub fn mark_failed(&mut self) {
        self.terminated = true;
    }
}
