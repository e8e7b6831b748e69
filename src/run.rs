//! The run controller (C8): seals a scenario, analyzes it, and drives the
//! per-simulator scheduler tasks to completion or first failure.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinSet;

use crate::causality::CausalityAnalyzer;
use crate::error::CoSimError;
use crate::graph::{EdgeKind, ScenarioGraph};
use crate::ids::SimulatorId;
use crate::proxy::SimulatorProxy;
use crate::remote::SharedWorld;
use crate::scheduler::{run_simulator_task, RunConfig, WakerMap};

/// A scenario graph and its simulator connections, not yet sealed.
pub struct RunController<S> {
    graph: ScenarioGraph,
    proxies: Vec<SimulatorProxy<S>>,
}

impl<S> RunController<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(graph: ScenarioGraph, proxies: Vec<SimulatorProxy<S>>) -> Self {
        Self { graph, proxies }
    }

    /// Freezes the graph, runs the causality analyzer, and seeds the
    /// dataflow cache's `initial_data` (§8 "seal"). Fails if the scenario
    /// has an unresolved cycle or any other `ScenarioError`.
    pub fn seal(mut self) -> Result<SealedRun<S>, CoSimError> {
        self.graph.seal();
        let analyzer = CausalityAnalyzer::analyze(&self.graph)?;

        let mut world = SharedWorld::new(self.graph);
        {
            let mut cache = world.cache.lock().unwrap();
            for edge in world.graph.edges() {
                if let EdgeKind::TimeShifted { initial } = &edge.kind {
                    for mapping in &edge.attrs {
                        if let Some(value) = initial.get(&mapping.dst_attr) {
                            cache.seed_initial(edge.src.clone(), mapping.src_attr.clone(), value.clone());
                        }
                    }
                }
            }
        }

        Ok(SealedRun {
            world: Arc::new(world),
            analyzer: Arc::new(analyzer),
            proxies: self.proxies,
        })
    }
}

/// A sealed, ready-to-run scenario.
pub struct SealedRun<S> {
    world: Arc<SharedWorld>,
    analyzer: Arc<CausalityAnalyzer>,
    proxies: Vec<SimulatorProxy<S>>,
}

impl<S> SealedRun<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// The shared world backing this run, for callers that want to serve
    /// read-only introspection (e.g. the `api` feature's HTTP router)
    /// alongside the run itself.
    pub fn world(&self) -> Arc<SharedWorld> {
        self.world.clone()
    }

    /// Runs every simulator to `config.until`, or aborts the whole run on
    /// the first fatal error (§7 "all errors are fatal to the run"), then
    /// shuts down.
    pub async fn run(self, config: RunConfig) -> Result<(), CoSimError> {
        let waker = Arc::new(WakerMap::new(self.world.graph.simulator_ids().cloned()));
        let shutdown = Arc::new(AtomicBool::new(false));
        let stop_timeout = config.stop_timeout;

        let mut set = JoinSet::new();
        for proxy in self.proxies {
            let id: SimulatorId = proxy.id().clone();
            let world = self.world.clone();
            let analyzer = self.analyzer.clone();
            let waker = waker.clone();
            let config = config.clone();
            let shutdown = shutdown.clone();
            set.spawn(async move {
                run_simulator_task(id, proxy, world, analyzer, waker, config, shutdown).await
            });
        }

        let mut first_err: Option<CoSimError> = None;
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::error!(error = %e, "simulator task failed, shutting down run");
                    first_err.get_or_insert(e);
                    // Signal every other task's loop to stop, then wake
                    // anything blocked on a predecessor or lazy-stepping
                    // wait so it actually observes the flag promptly.
                    shutdown.store(true, Ordering::Release);
                    waker.notify_all();
                    break;
                }
                Err(join_err) if join_err.is_cancelled() => {}
                Err(join_err) => {
                    tracing::error!(error = %join_err, "simulator task panicked");
                }
            }
        }

        if first_err.is_some() {
            // Give the surviving tasks `stop_timeout` to notice the shutdown
            // flag, unwind their own loop, and call their proxy's best-effort
            // `stop()` (§4.8, §5, §7) before abandoning the stragglers.
            let deadline = tokio::time::Instant::now() + stop_timeout;
            loop {
                if set.is_empty() {
                    break;
                }
                match tokio::time::timeout_at(deadline, set.join_next()).await {
                    Ok(Some(Ok(Ok(())))) => {}
                    Ok(Some(Ok(Err(e)))) => {
                        tracing::error!(error = %e, "simulator task failed during shutdown drain");
                    }
                    Ok(Some(Err(join_err))) if join_err.is_cancelled() => {}
                    Ok(Some(Err(join_err))) => {
                        tracing::error!(error = %join_err, "simulator task panicked during shutdown drain");
                    }
                    Ok(None) => break,
                    Err(_elapsed) => {
                        tracing::warn!("stop_timeout elapsed, aborting remaining simulator tasks");
                        set.abort_all();
                        while set.join_next().await.is_some() {}
                        break;
                    }
                }
            }
        }

        if let Some(err) = first_err {
            return Err(err);
        }
        Ok(())
    }
}
