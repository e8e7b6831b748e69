//! A mock simulator process driven over an in-process `tokio::io::duplex`
//! pair, so the integration tests exercise the real wire protocol without
//! touching a socket.

use std::collections::BTreeMap;

use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream};

use cosim::ids::{EntityId, SimulatorId};
use cosim::protocol::{read_frame, write_frame, CoreRequest, Envelope, SimRequest};
use cosim::proxy::SimulatorProxy;

/// Builds the wire reply a simulator's `init()` returns, for a single model
/// `name` with the given declared inputs/outputs.
pub fn meta_reply(
    kind: &str,
    name: &str,
    inputs: &[(&str, &str)],
    outputs: &[(&str, &str)],
) -> Value {
    json!({
        "api_version": { "major": 3, "minor": 0 },
        "type": kind,
        "models": {
            name: {
                "params": [],
                "inputs": inputs.iter().cloned().collect::<BTreeMap<_, _>>(),
                "outputs": outputs.iter().cloned().collect::<BTreeMap<_, _>>(),
                "any_inputs": false,
            }
        },
        "extra_methods": [],
    })
}

/// Drives one end of a duplex pair as a mock simulator, answering the
/// standard contract. `step_fn` computes `t_next` from the step time and
/// delivered inputs. `mid_step_request`, if set, is raised as a single C7
/// remote call the first time `step()` is called, before that step's reply.
pub async fn run_mock_simulator<S>(
    mut stream: S,
    init_reply: Value,
    mut step_fn: impl FnMut(u64, &BTreeMap<String, BTreeMap<String, Value>>) -> u64 + Send,
    mut mid_step_request: Option<SimRequest>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    // The last value this simulator computed, served back for whatever
    // output attributes the core asks `get_data` for. Good enough for tests
    // that only care that a value flows downstream, not its exact shape.
    let mut last_value = Value::Null;

    loop {
        let Some(bytes) = read_frame(&mut stream).await.unwrap() else {
            return;
        };
        let env = Envelope::from_bytes(&bytes).unwrap();
        let req: CoreRequest = serde_json::from_value(env.content.clone()).unwrap();
        match req {
            CoreRequest::Init { .. } => {
                reply(&mut stream, env.msg_id, init_reply.clone()).await;
            }
            CoreRequest::Create { num, .. } => {
                let ids: Vec<String> = (0..num).map(|i| format!("e{i}")).collect();
                reply(&mut stream, env.msg_id, json!(ids)).await;
            }
            CoreRequest::Step { t, inputs, .. } => {
                if let Some(sim_req) = mid_step_request.take() {
                    let call_msg_id = env.msg_id.wrapping_add(1_000_000);
                    let call_env = Envelope::request(call_msg_id, sim_req).unwrap();
                    write_frame(&mut stream, &call_env.to_bytes().unwrap())
                        .await
                        .unwrap();
                    read_frame(&mut stream).await.unwrap().unwrap();
                }
                let t_next = step_fn(t, &inputs);
                last_value = json!(t_next);
                reply(&mut stream, env.msg_id, json!(t_next)).await;
            }
            CoreRequest::GetData { outputs } => {
                let data: BTreeMap<String, BTreeMap<String, Value>> = outputs
                    .into_iter()
                    .map(|(eid, attrs)| {
                        let per_attr = attrs
                            .into_iter()
                            .map(|attr| (attr, last_value.clone()))
                            .collect();
                        (eid, per_attr)
                    })
                    .collect();
                reply(&mut stream, env.msg_id, json!(data)).await;
            }
            CoreRequest::SetupDone => {
                reply(&mut stream, env.msg_id, Value::Null).await;
            }
            CoreRequest::Stop => {
                reply(&mut stream, env.msg_id, Value::Null).await;
                return;
            }
        }
    }
}

async fn reply<S: AsyncWrite + Unpin>(stream: &mut S, msg_id: u64, content: Value) {
    let env = Envelope::success(msg_id, content).unwrap();
    write_frame(stream, &env.to_bytes().unwrap()).await.unwrap();
}

/// Spawns a mock simulator on one end of a duplex pair, `init()`s and
/// `create()`s it through a real [`SimulatorProxy`], and returns the proxy
/// plus the entity ids it provisioned.
#[allow(clippy::too_many_arguments)]
pub async fn spawn_mock(
    id: &str,
    time_resolution: f64,
    kind: &str,
    model: &str,
    inputs: &[(&str, &str)],
    outputs: &[(&str, &str)],
    num_entities: u32,
    step_fn: impl FnMut(u64, &BTreeMap<String, BTreeMap<String, Value>>) -> u64 + Send + 'static,
    mid_step_request: Option<SimRequest>,
) -> (SimulatorProxy<DuplexStream>, Vec<EntityId>) {
    let (client, server) = tokio::io::duplex(1 << 16);
    let reply = meta_reply(kind, model, inputs, outputs);
    tokio::spawn(run_mock_simulator(server, reply, step_fn, mid_step_request));

    let sim_id = SimulatorId::new(id).unwrap();
    let mut proxy = SimulatorProxy::init(client, sim_id, time_resolution, BTreeMap::new())
        .await
        .unwrap();
    let eids = proxy
        .create(model, num_entities, BTreeMap::new())
        .await
        .unwrap();
    (proxy, eids)
}
