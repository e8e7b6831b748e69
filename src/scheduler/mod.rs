//! The scheduler (C6): one cooperative task per simulator, stepping it
//! forward while respecting causal readiness, `max_advance`, same-time
//! loops, lazy stepping, and optional real-time pacing.

mod waker;

pub use waker::WakerMap;

use std::collections::BTreeMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::causality::CausalityAnalyzer;
use crate::error::{CoSimError, ScenarioError, SchedulingError};
use crate::ids::{EntityId, EntityRef, SimulatorId};
use crate::model::{AttrKind, SimulatorKind};
use crate::proxy::SimulatorProxy;
use crate::remote::{self, SharedWorld};
use crate::time::T;

/// Parameters for a single `run()` call (§8).
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub until: T,
    pub time_resolution: f64,
    pub rt_factor: Option<f64>,
    pub rt_strict: bool,
    pub max_loop_iterations: u32,
    /// Skip a step when this simulator has no new input and no
    /// self-scheduled or injected event due — only ever applies to
    /// event-based and hybrid simulators (§3 "lazy stepping").
    pub lazy_stepping: bool,
    /// How long `run()` waits for every simulator's graceful `stop()` after
    /// the first fatal error, before aborting the stragglers outright (§4.8,
    /// §5, §7: "proxies get a best-effort stop() with a configurable
    /// timeout").
    pub stop_timeout: Duration,
}

/// Drives one simulator for the whole run. Spawned as its own task per
/// simulator; returns on reaching `until`, and propagates (and thereby
/// aborts the whole run on) the first error, per §7's fatal-error
/// propagation rule.
pub async fn run_simulator_task<S>(
    id: SimulatorId,
    mut proxy: SimulatorProxy<S>,
    world: Arc<SharedWorld>,
    analyzer: Arc<CausalityAnalyzer>,
    waker: Arc<WakerMap>,
    config: RunConfig,
    shutdown: Arc<AtomicBool>,
) -> Result<(), CoSimError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let wall_clock_start = std::time::Instant::now();
    let predecessors = analyzer.direct_predecessors(&id);
    let time_shifted_predecessors = analyzer.time_shifted_predecessors(&id);

    'steps: loop {
        if shutdown.load(std::sync::atomic::Ordering::Acquire) {
            break;
        }
        let Some(t) = next_step_for(&world, &id, proxy.meta.kind, proxy.next_step) else {
            // Nothing left to trigger this simulator: no self-scheduled
            // step, no pending incoming event, no injected `set_event`.
            break;
        };
        if t > config.until {
            break;
        }

        for pred in &predecessors {
            waker.wait_until_past(&world, pred, t, &shutdown).await;
            if shutdown.load(std::sync::atomic::Ordering::Acquire) {
                break 'steps;
            }
        }
        for pred in &time_shifted_predecessors {
            waker.wait_until_at_least(&world, pred, t, &shutdown).await;
            if shutdown.load(std::sync::atomic::Ordering::Acquire) {
                break 'steps;
            }
        }

        let max_advance = analyzer.max_advance(&id, t, |s| Some(world.progress_of(s)))?;

        if config.lazy_stepping && proxy.meta.kind != SimulatorKind::TimeBased {
            loop {
                let has_inputs = !collect_inputs(&world, &id, t).await.is_empty();
                if has_inputs || world.has_due_injected_event(&id, t) || world.has_pushed_inputs(&id) {
                    break;
                }
                if shutdown.load(std::sync::atomic::Ordering::Acquire) {
                    break 'steps;
                }
                waker.wait_for_signal(&id, &shutdown).await;
            }
        }
        // Consumed here rather than inside the wait loop above: this step is
        // what any due injected event was scheduling.
        world.take_injected_events(&id, t);

        pace_real_time(&config, t, wall_clock_start, &id).await?;

        let mut iters = 0u32;
        let t_next = loop {
            // Re-collected every same-time iteration: a weak predecessor may
            // have produced a new value since the last pass.
            let inputs = collect_inputs(&world, &id, t).await;
            let sim_id = id.clone();
            let world_ref = &world;
            let t_next = proxy
                .step(t, inputs, max_advance, |req| {
                    let sim_id = sim_id.clone();
                    async move { remote::handle(world_ref, &sim_id, t, req).await }
                })
                .await?;
            commit_outputs(&world, &id, &mut proxy, t).await?;
            let progress_t = t_next.unwrap_or(t);
            world.set_progress(&id, progress_t).await;
            waker.notify_all();

            if !has_unconverged_weak_predecessor(&world, &id, t).await {
                break t_next;
            }
            iters += 1;
            if iters > config.max_loop_iterations {
                return Err(SchedulingError::LoopExceeded {
                    t,
                    limit: config.max_loop_iterations,
                }
                .into());
            }
        };

        if let Some(t_next) = t_next {
            if t_next <= t {
                return Err(SchedulingError::NonMonotonicStep {
                    sim: id.to_string(),
                    t,
                    t_next,
                }
                .into());
            }
        }
    }

    proxy.stop().await.ok();
    Ok(())
}

/// The next time `sim` should be stepped, or `None` if nothing is scheduled
/// to trigger it. Time-based simulators always drive off their own
/// self-declared `next_step`; event-based and hybrid simulators are also
/// triggered early by a due incoming event or an injected `set_event`.
fn next_step_for(
    world: &SharedWorld,
    sim: &SimulatorId,
    kind: SimulatorKind,
    current_next: Option<T>,
) -> Option<T> {
    if kind == SimulatorKind::TimeBased {
        return current_next;
    }
    let mut candidates: Vec<T> = current_next.into_iter().collect();
    {
        let cache = world.cache.lock().unwrap();
        for edge in world.graph.edges() {
            if edge.dst.sim != *sim {
                continue;
            }
            for mapping in &edge.attrs {
                if mapping.trigger {
                    if let Some(t_event) = cache.next_event_time(&edge.src, &mapping.src_attr) {
                        candidates.push(t_event);
                    }
                }
            }
        }
    }
    candidates.extend(world.next_injected_event(sim));
    candidates.into_iter().min()
}

/// Pulls `sim`'s declared outputs after a successful step and commits them
/// into the shared cache: measurements land at `t`, events at their
/// declared (or default) `t_event`, for every consumer to pick up.
async fn commit_outputs<S>(
    world: &SharedWorld,
    sim: &SimulatorId,
    proxy: &mut SimulatorProxy<S>,
    t: T,
) -> Result<(), CoSimError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let mut outputs: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for edge in world.graph.edges() {
        if edge.src.sim != *sim {
            continue;
        }
        for mapping in &edge.attrs {
            let attrs = outputs.entry(edge.src.entity.to_string()).or_default();
            if !attrs.contains(&mapping.src_attr) {
                attrs.push(mapping.src_attr.clone());
            }
        }
    }
    if outputs.is_empty() {
        return Ok(());
    }

    let data = proxy.get_data(outputs).await?;
    let mut cache = world.cache.lock().unwrap();
    for (eid, attrs) in data {
        let entity_id = EntityId::new(eid).map_err(ScenarioError::from)?;
        let entity = EntityRef::new(sim.clone(), entity_id);
        for (attr, value) in attrs {
            let kind = world
                .graph
                .attr_kind(&entity, &attr)
                .unwrap_or(AttrKind::Measurement);
            match kind {
                AttrKind::Measurement => cache.put_measurement(entity.clone(), attr, t, value),
                AttrKind::Event => {
                    let (t_event, value) = split_event_value(value, t);
                    if t_event < t {
                        return Err(SchedulingError::BackdatedEvent {
                            sim: sim.to_string(),
                            t_event,
                            t_step: t,
                        }
                        .into());
                    }
                    cache.push_event(entity.clone(), attr, t_event, value);
                }
            }
        }
    }
    Ok(())
}

/// Events may be delivered either as a bare value (default `t_event = t`) or
/// as a `[t_event, value]` pair carrying an explicit time.
fn split_event_value(value: Value, t: T) -> (T, Value) {
    if let Value::Array(pair) = &value {
        if let [t_event, inner] = pair.as_slice() {
            if let Some(t_event) = t_event.as_u64() {
                return (T::new(t_event), inner.clone());
            }
        }
    }
    (t, value)
}

async fn collect_inputs(
    world: &SharedWorld,
    sim: &SimulatorId,
    t: T,
) -> BTreeMap<String, BTreeMap<String, Value>> {
    let mut inputs: BTreeMap<String, BTreeMap<String, Value>> = BTreeMap::new();
    {
        let mut cache = world.cache.lock().unwrap();
        for edge in world.graph.edges() {
            if edge.dst.sim != *sim {
                continue;
            }
            for mapping in &edge.attrs {
                if mapping.persistent {
                    if let Some(v) = cache.measurement_at(&edge.src, &mapping.src_attr, t) {
                        inputs
                            .entry(mapping.dst_attr.clone())
                            .or_default()
                            .insert(edge.src.full_id(), v.clone());
                    }
                } else {
                    for (_, v) in cache.take_events_up_to(&edge.src, &mapping.src_attr, t) {
                        inputs
                            .entry(mapping.dst_attr.clone())
                            .or_default()
                            .insert(edge.src.full_id(), v);
                    }
                }
            }
        }
    }
    // Merge in any `set_data` pushes queued outside a declared edge (§4.7).
    for (attr, by_src) in world.take_pushed_inputs(sim) {
        inputs.entry(attr).or_default().extend(by_src);
    }
    inputs
}

async fn has_unconverged_weak_predecessor(world: &SharedWorld, sim: &SimulatorId, t: T) -> bool {
    for edge in world.graph.edges() {
        if edge.dst.sim == *sim && edge.is_weak() && world.progress_of(&edge.src.sim) <= t {
            return true;
        }
    }
    false
}

async fn pace_real_time(
    config: &RunConfig,
    t: T,
    wall_clock_start: std::time::Instant,
    sim: &SimulatorId,
) -> Result<(), CoSimError> {
    let Some(rt_factor) = config.rt_factor else {
        return Ok(());
    };
    let target_secs = t.to_seconds(config.time_resolution) * rt_factor;
    let elapsed = wall_clock_start.elapsed().as_secs_f64();
    if target_secs > elapsed {
        let remaining = Duration::from_secs_f64(target_secs - elapsed);
        tokio::time::sleep(remaining).await;
    } else if config.rt_strict && elapsed - target_secs > 0.0 {
        return Err(SchedulingError::RealTimeDeadlineMissed {
            sim: sim.to_string(),
            t,
        }
        .into());
    }
    Ok(())
}
