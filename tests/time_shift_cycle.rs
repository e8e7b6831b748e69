//! A two-simulator cycle closed by a time-shifted edge is legal and runs to
//! completion, even though the same cycle made of two direct edges would be
//! rejected at `seal()` (see `illegal_cycle_rejected.rs`).

mod common;

use std::collections::BTreeMap;

use serde_json::Value;

use cosim::graph::{EdgeModifiers, ScenarioGraph};
use cosim::ids::EntityRef;
use cosim::run::RunController;
use cosim::scheduler::RunConfig;
use cosim::time::T;

#[tokio::test]
async fn time_shifted_cycle_runs_to_completion() {
    let (proxy_a, eids_a) = common::spawn_mock(
        "A",
        1.0,
        "time-based",
        "M",
        &[("x", "measurement")],
        &[("y", "measurement")],
        1,
        |t, _inputs| t + 1,
        None,
    )
    .await;
    let (proxy_b, eids_b) = common::spawn_mock(
        "B",
        1.0,
        "time-based",
        "M",
        &[("y", "measurement")],
        &[("x", "measurement")],
        1,
        |t, _inputs| t + 1,
        None,
    )
    .await;

    let mut graph = ScenarioGraph::new();
    graph
        .register_simulator(proxy_a.id().clone(), proxy_a.meta.clone())
        .unwrap();
    graph
        .register_simulator(proxy_b.id().clone(), proxy_b.meta.clone())
        .unwrap();
    graph
        .register_entities(proxy_a.id(), "M", eids_a.clone())
        .unwrap();
    graph
        .register_entities(proxy_b.id(), "M", eids_b.clone())
        .unwrap();

    let a = EntityRef::new(proxy_a.id().clone(), eids_a[0].clone());
    let b = EntityRef::new(proxy_b.id().clone(), eids_b[0].clone());

    graph
        .connect(a.clone(), b.clone(), &[("y", "y")], EdgeModifiers::default())
        .unwrap();
    graph
        .connect(
            b,
            a,
            &[("x", "x")],
            EdgeModifiers {
                time_shift: true,
                weak: false,
                initial_data: BTreeMap::from([("x".to_string(), Value::from(0))]),
            },
        )
        .unwrap();

    let sealed = RunController::new(graph, vec![proxy_a, proxy_b])
        .seal()
        .unwrap();

    let config = RunConfig {
        until: T::new(3),
        time_resolution: 1.0,
        rt_factor: None,
        rt_strict: false,
        max_loop_iterations: 10,
        lazy_stepping: false,
        stop_timeout: std::time::Duration::from_secs(1),
    };

    sealed.run(config).await.unwrap();
}
