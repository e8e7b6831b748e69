//! A straight direct-edge chain (A -> B) steps both simulators to `until`
//! in lockstep, each one tick at a time.

mod common;

use cosim::graph::{EdgeModifiers, ScenarioGraph};
use cosim::ids::EntityRef;
use cosim::run::RunController;
use cosim::scheduler::RunConfig;
use cosim::time::T;

#[tokio::test]
async fn straight_chain_steps_both_simulators_to_until() {
    let (proxy_a, eids_a) = common::spawn_mock(
        "A",
        1.0,
        "time-based",
        "M",
        &[],
        &[("x", "measurement")],
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
        &[("x", "measurement")],
        &[],
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

    let src = EntityRef::new(proxy_a.id().clone(), eids_a[0].clone());
    let dst = EntityRef::new(proxy_b.id().clone(), eids_b[0].clone());
    graph
        .connect(src, dst, &[("x", "x")], EdgeModifiers::default())
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
