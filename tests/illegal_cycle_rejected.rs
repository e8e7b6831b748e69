//! A cycle made entirely of direct edges has no time discount anywhere in
//! it and can never be scheduled; `seal()` must reject it before any
//! simulator is stepped.

mod common;

use cosim::error::{CoSimError, ScenarioError};
use cosim::graph::{EdgeModifiers, ScenarioGraph};
use cosim::ids::EntityRef;
use cosim::run::RunController;

#[tokio::test]
async fn pure_direct_cycle_is_rejected_at_seal() {
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
        .connect(b, a, &[("x", "x")], EdgeModifiers::default())
        .unwrap();

    let err = RunController::new(graph, vec![proxy_a, proxy_b])
        .seal()
        .unwrap_err();
    assert!(matches!(
        err,
        CoSimError::Scenario(ScenarioError::UnresolvedCycle(_))
    ));
}
