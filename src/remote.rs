//! Remote services (C7): the handful of calls a simulator may make back
//! into the core while its own `step()` is in flight — progress queries,
//! same-time data pulls, async pushes, and future-event injection.
//!
//! State that must be visible across every simulator's scheduler task lives
//! in [`SharedWorld`], guarded by a plain `std::sync::Mutex` — every
//! critical section here is a short, synchronous map lookup with no
//! `.await` inside it, so there is nothing for an async-aware mutex to buy.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use serde_json::{json, Value};
use tokio::sync::Notify;

use crate::cache::DataCache;
use crate::error::{CoSimError, SchedulingError};
use crate::graph::ScenarioGraph;
use crate::ids::{EntityRef, SimulatorId};
use crate::protocol::SimRequest;
use crate::time::T;

/// State shared by every simulator's scheduler task: the sealed graph, the
/// dataflow cache, and each simulator's current progress.
pub struct SharedWorld {
    pub graph: ScenarioGraph,
    pub cache: Mutex<DataCache>,
    progress: Mutex<BTreeMap<SimulatorId, T>>,
    /// Notified whenever any simulator's progress advances, so a
    /// same-time `get_data` pull can wake and re-check its condition.
    progress_notify: Notify,
    /// Events injected via `set_event`, queued per target simulator until
    /// the scheduler picks them up for its next step.
    injected_events: Mutex<BTreeMap<SimulatorId, BTreeSet<T>>>,
    /// Values pushed via `set_data`, queued per target simulator until its
    /// next step merges them into its normal (edge-derived) inputs. Keyed
    /// the same way `collect_inputs` keys edge-derived inputs — attribute
    /// name, then the provenance id that supplied the value.
    pushed_inputs: Mutex<BTreeMap<SimulatorId, BTreeMap<String, BTreeMap<String, Value>>>>,
}

impl SharedWorld {
    pub fn new(graph: ScenarioGraph) -> Self {
        let progress = graph
            .simulator_ids()
            .map(|id| (id.clone(), T::zero()))
            .collect();
        Self {
            graph,
            cache: Mutex::new(DataCache::new()),
            progress: Mutex::new(progress),
            progress_notify: Notify::new(),
            injected_events: Mutex::new(BTreeMap::new()),
            pushed_inputs: Mutex::new(BTreeMap::new()),
        }
    }

    pub async fn set_progress(&self, sim: &SimulatorId, t: T) {
        self.progress.lock().unwrap().insert(sim.clone(), t);
        self.progress_notify.notify_waiters();
    }

    pub fn progress_of(&self, sim: &SimulatorId) -> T {
        self.progress
            .lock()
            .unwrap()
            .get(sim)
            .copied()
            .unwrap_or(T::zero())
    }

    pub fn min_progress(&self) -> T {
        self.progress
            .lock()
            .unwrap()
            .values()
            .copied()
            .min()
            .unwrap_or(T::zero())
    }

    /// Waits until `sim`'s progress exceeds `t`, per §3's same-time pull
    /// semantics ("a caller pulling data from a not-yet-stepped simulator
    /// at the caller's current time suspends until that simulator's
    /// progress passes it").
    pub async fn wait_for_progress_past(&self, sim: &SimulatorId, t: T) {
        loop {
            if self.progress_of(sim) > t {
                return;
            }
            self.progress_notify.notified().await;
        }
    }

    pub fn take_injected_events(&self, sim: &SimulatorId, up_to: T) -> Vec<T> {
        let mut guard = self.injected_events.lock().unwrap();
        let Some(set) = guard.get_mut(sim) else {
            return Vec::new();
        };
        let remaining = set.split_off(&(up_to + 1));
        let due = std::mem::replace(set, remaining);
        due.into_iter().collect()
    }

    /// The earliest time an event has been injected for `sim`, without
    /// consuming it. Used to decide *when* to next step a simulator before
    /// committing to draining the events that step will consume.
    pub fn next_injected_event(&self, sim: &SimulatorId) -> Option<T> {
        self.injected_events
            .lock()
            .unwrap()
            .get(sim)
            .and_then(|set| set.iter().next().copied())
    }

    pub fn has_due_injected_event(&self, sim: &SimulatorId, up_to: T) -> bool {
        self.next_injected_event(sim).is_some_and(|t| t <= up_to)
    }

    fn inject_event(&self, sim: &SimulatorId, t: T) {
        self.injected_events
            .lock()
            .unwrap()
            .entry(sim.clone())
            .or_default()
            .insert(t);
    }

    fn push_data(&self, target: &SimulatorId, attr: String, from: &SimulatorId, value: Value) {
        self.pushed_inputs
            .lock()
            .unwrap()
            .entry(target.clone())
            .or_default()
            .entry(attr)
            .or_default()
            .insert(from.to_string(), value);
    }

    /// True iff `sim` has any `set_data` values waiting, without consuming
    /// them — used by the lazy-stepping readiness check.
    pub fn has_pushed_inputs(&self, sim: &SimulatorId) -> bool {
        self.pushed_inputs
            .lock()
            .unwrap()
            .get(sim)
            .is_some_and(|by_attr| !by_attr.is_empty())
    }

    /// Drains every `set_data` value queued for `sim`, merging it into its
    /// edge-derived inputs for the step about to run.
    pub fn take_pushed_inputs(&self, sim: &SimulatorId) -> BTreeMap<String, BTreeMap<String, Value>> {
        self.pushed_inputs.lock().unwrap().remove(sim).unwrap_or_default()
    }
}

/// Dispatches one mid-step `SimRequest` raised by `caller` at its current
/// step time `t_caller`.
pub async fn handle(
    world: &SharedWorld,
    caller: &SimulatorId,
    t_caller: T,
    req: SimRequest,
) -> Result<Value, CoSimError> {
    match req {
        SimRequest::GetProgress => Ok(json!(world.min_progress().ticks())),

        SimRequest::GetRelatedEntities { entities } => {
            let refs: Vec<EntityRef> = entities
                .iter()
                .map(|s| EntityRef::parse(s))
                .collect::<Result<_, _>>()
                .map_err(crate::error::ScenarioError::from)?;
            let related = world.graph.related_entities(&refs);
            Ok(json!(related.into_iter().map(|e| e.full_id()).collect::<Vec<_>>()))
        }

        SimRequest::GetData { requests } => {
            let mut out: BTreeMap<String, BTreeMap<String, Value>> = BTreeMap::new();
            for (full_id, attrs) in requests {
                let src = EntityRef::parse(&full_id).map_err(crate::error::ScenarioError::from)?;
                world.wait_for_progress_past(&src.sim, t_caller).await;
                let cache = world.cache.lock().unwrap();
                let mut per_attr = BTreeMap::new();
                for attr in attrs {
                    if let Some(v) = cache.measurement_at(&src, &attr, t_caller) {
                        per_attr.insert(attr, v.clone());
                    }
                }
                out.insert(full_id, per_attr);
            }
            Ok(json!(out))
        }

        SimRequest::SetData { data } => {
            for (full_id, attrs) in data {
                let dst = EntityRef::parse(&full_id).map_err(crate::error::ScenarioError::from)?;
                for (attr, value) in attrs {
                    world.push_data(&dst.sim, attr, caller, value);
                }
                // §4.7: schedules a step for the caller's current time. Only
                // meaningful for event-based/hybrid targets; `next_step_for`
                // ignores injected events for time-based ones, which already
                // drive off their own self-declared next step.
                world.inject_event(&dst.sim, t_caller);
            }
            Ok(Value::Null)
        }

        SimRequest::SetEvent { time, sid } => {
            let target = match sid {
                Some(s) => crate::ids::SimulatorId::new(s).map_err(crate::error::ScenarioError::from)?,
                None => caller.clone(),
            };
            let t = T::new(time);
            if t < t_caller {
                return Err(SchedulingError::BackdatedEvent {
                    sim: target.to_string(),
                    t_event: t,
                    t_step: t_caller,
                }
                .into());
            }
            world.inject_event(&target, t);
            Ok(Value::Null)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::EntityId;
    use crate::model::{ApiVersion, AttrKind, ModelDescriptor, ModelMeta, SimulatorKind};
    use std::collections::BTreeSet as Set;

    fn world_with_one_sim() -> (SharedWorld, SimulatorId) {
        let mut g = ScenarioGraph::new();
        let sid = SimulatorId::new("A").unwrap();
        g.register_simulator(
            sid.clone(),
            ModelMeta {
                api_version: ApiVersion::CORE,
                kind: SimulatorKind::TimeBased,
                models: BTreeMap::from([(
                    "M".to_string(),
                    ModelDescriptor {
                        params: Set::new(),
                        inputs: BTreeMap::new(),
                        outputs: BTreeMap::from([("x".to_string(), AttrKind::Measurement)]),
                        any_inputs: false,
                    },
                )]),
                extra_methods: Vec::new(),
            },
        )
        .unwrap();
        g.register_entities(&sid, "M", [EntityId::new("e0").unwrap()])
            .unwrap();
        (SharedWorld::new(g), sid)
    }

    #[tokio::test]
    async fn set_event_in_the_past_is_rejected() {
        let (world, sid) = world_with_one_sim();
        let err = handle(
            &world,
            &sid,
            T::new(5),
            SimRequest::SetEvent { time: 1, sid: None },
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            CoSimError::Scheduling(SchedulingError::BackdatedEvent { .. })
        ));
    }

    #[tokio::test]
    async fn set_event_is_queued_and_taken_once() {
        let (world, sid) = world_with_one_sim();
        handle(&world, &sid, T::zero(), SimRequest::SetEvent { time: 3, sid: None })
            .await
            .unwrap();
        let due = world.take_injected_events(&sid, T::new(3));
        assert_eq!(due, vec![T::new(3)]);
        let due_again = world.take_injected_events(&sid, T::new(3));
        assert!(due_again.is_empty());
    }

    #[tokio::test]
    async fn set_data_lands_in_the_target_sim_input_buffer_and_schedules_it() {
        let (world, sid) = world_with_one_sim();
        let caller = SimulatorId::new("B").unwrap();
        handle(
            &world,
            &caller,
            T::new(2),
            SimRequest::SetData {
                data: BTreeMap::from([(
                    "A.e0".to_string(),
                    BTreeMap::from([("x".to_string(), json!(42))]),
                )]),
            },
        )
        .await
        .unwrap();

        assert!(world.has_pushed_inputs(&sid));
        assert_eq!(world.next_injected_event(&sid), Some(T::new(2)));

        let taken = world.take_pushed_inputs(&sid);
        assert_eq!(taken["x"]["B"], json!(42));
        assert!(!world.has_pushed_inputs(&sid));
    }

    #[tokio::test]
    async fn get_progress_reports_minimum_across_simulators() {
        let (world, sid) = world_with_one_sim();
        world.set_progress(&sid, T::new(7)).await;
        let reply = handle(&world, &sid, T::new(7), SimRequest::GetProgress)
            .await
            .unwrap();
        assert_eq!(reply, json!(7));
    }
}
