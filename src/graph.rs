//! The scenario graph (C3): simulators, entities, and the typed edges
//! between their attributes. Mutable only before [`ScenarioGraph::seal`];
//! immutable after (§3 "Lifecycles").

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;

use crate::error::ScenarioError;
use crate::ids::{EntityId, EntityRef, SimulatorId};
use crate::model::{AttrKind, ModelMeta};

/// One `(src_attr -> dst_attr)` mapping carried by an [`Edge`], with the
/// derived properties §3 defines per mapped attribute.
#[derive(Debug, Clone)]
pub struct AttrMapping {
    pub src_attr: String,
    pub dst_attr: String,
    /// True iff `src_attr` is measurement-typed (allows caching across time).
    pub persistent: bool,
    /// True iff `dst_attr` is event-typed (a delivered value triggers a step).
    pub trigger: bool,
}

/// The sum-type edge kind §9 asks for, so the scheduler's readiness
/// predicate is a total function over edge kind rather than two booleans
/// with an invalid combination to guard against at every call site.
#[derive(Debug, Clone)]
pub enum EdgeKind {
    /// Produced at `t`, consumed at `t` — normal causal edge.
    Direct,
    /// Produced at `t`, consumed at `t + 1`; carries the initial value
    /// served to the consumer at `t = 0`, keyed by `dst_attr`.
    TimeShifted {
        initial: BTreeMap<String, Value>,
    },
    /// Excluded from ranking; may carry same-time data within a same-time
    /// iteration.
    Weak,
}

/// A dataflow edge from attributes on `src` entities to attributes on `dst`
/// entities.
#[derive(Debug, Clone)]
pub struct Edge {
    pub src: EntityRef,
    pub dst: EntityRef,
    pub attrs: Vec<AttrMapping>,
    pub kind: EdgeKind,
}

impl Edge {
    pub fn is_weak(&self) -> bool {
        matches!(self.kind, EdgeKind::Weak)
    }

    pub fn is_time_shifted(&self) -> bool {
        matches!(self.kind, EdgeKind::TimeShifted { .. })
    }
}

/// Requested modifiers for [`ScenarioGraph::connect`].
#[derive(Debug, Clone, Default)]
pub struct EdgeModifiers {
    pub time_shift: bool,
    pub weak: bool,
    /// Initial value per `dst_attr`; mandatory when `time_shift` is set.
    pub initial_data: BTreeMap<String, Value>,
}

struct SimulatorEntry {
    meta: ModelMeta,
    entities: BTreeMap<EntityId, String>, // entity id -> model name
}

/// The scenario graph: simulator/entity registry plus the typed edge set.
pub struct ScenarioGraph {
    simulators: BTreeMap<SimulatorId, SimulatorEntry>,
    /// Registration order, kept separately from `simulators` (a `BTreeMap`,
    /// sorted by id) since the causality analyzer's topological tie-break
    /// is "first registered, first run" rather than lexicographic.
    registration_order: Vec<SimulatorId>,
    edges: Vec<Edge>,
    /// Undirected entity adjacency, for `get_related_entities` introspection
    /// only — never consulted by the scheduler.
    entity_graph: BTreeMap<EntityRef, BTreeSet<EntityRef>>,
    sealed: bool,
}

impl Default for ScenarioGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl ScenarioGraph {
    pub fn new() -> Self {
        Self {
            simulators: BTreeMap::new(),
            registration_order: Vec::new(),
            edges: Vec::new(),
            entity_graph: BTreeMap::new(),
            sealed: false,
        }
    }

    /// Simulator ids in registration order, the tie-break the causality
    /// analyzer uses when two simulators would otherwise rank equally.
    pub fn registration_order(&self) -> &[SimulatorId] {
        &self.registration_order
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Registers a simulator's metadata (obtained from its `init()` reply)
    /// so subsequent `connect()` calls can validate against it.
    pub fn register_simulator(
        &mut self,
        id: SimulatorId,
        meta: ModelMeta,
    ) -> Result<(), ScenarioError> {
        self.require_unsealed()?;
        if !self.simulators.contains_key(&id) {
            self.registration_order.push(id.clone());
        }
        self.simulators.insert(
            id,
            SimulatorEntry {
                meta,
                entities: BTreeMap::new(),
            },
        );
        Ok(())
    }

    /// Registers entities created by `create()` under a given model.
    pub fn register_entities(
        &mut self,
        sim: &SimulatorId,
        model: &str,
        entities: impl IntoIterator<Item = EntityId>,
    ) -> Result<(), ScenarioError> {
        self.require_unsealed()?;
        let entry = self
            .simulators
            .get_mut(sim)
            .ok_or_else(|| ScenarioError::UnknownSimulator(sim.to_string()))?;
        if !entry.meta.models.contains_key(model) {
            return Err(ScenarioError::UnknownModel {
                sim: sim.to_string(),
                model: model.to_string(),
            });
        }
        for eid in entities {
            entry.entities.insert(eid, model.to_string());
        }
        Ok(())
    }

    pub fn meta(&self, sim: &SimulatorId) -> Option<&ModelMeta> {
        self.simulators.get(sim).map(|e| &e.meta)
    }

    pub fn simulator_ids(&self) -> impl Iterator<Item = &SimulatorId> {
        self.simulators.keys()
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    fn require_unsealed(&self) -> Result<(), ScenarioError> {
        if self.sealed {
            Err(ScenarioError::AlreadySealed)
        } else {
            Ok(())
        }
    }

    /// The declared kind of `attr` on `entity`'s model. Public so the
    /// scheduler can classify a simulator's `get_data` reply the same way
    /// `connect()` classified it when the edge was wired.
    pub fn attr_kind(&self, entity: &EntityRef, attr: &str) -> Result<AttrKind, ScenarioError> {
        let entry = self
            .simulators
            .get(&entity.sim)
            .ok_or_else(|| ScenarioError::UnknownSimulator(entity.sim.to_string()))?;
        let model = entry.entities.get(&entity.entity).ok_or_else(|| {
            ScenarioError::UnknownEntity(entity.to_string())
        })?;
        let descriptor = entry.meta.models.get(model).ok_or_else(|| {
            ScenarioError::UnknownModel {
                sim: entity.sim.to_string(),
                model: model.clone(),
            }
        })?;
        if descriptor.any_inputs {
            // Sinks accept anything; treat unmatched attrs as measurements,
            // the least assumption-laden default.
            return Ok(descriptor
                .attr_kind(attr)
                .unwrap_or(AttrKind::Measurement));
        }
        descriptor
            .attr_kind(attr)
            .ok_or_else(|| ScenarioError::UnknownAttribute {
                sim: entity.sim.to_string(),
                model: model.clone(),
                attr: attr.to_string(),
            })
    }

    /// Connects `src`'s attributes to `dst`'s attributes through `attrs`
    /// (`(src_attr, dst_attr)` pairs), applying `modifiers`. Mirrors §4.3's
    /// five validation steps in order.
    pub fn connect(
        &mut self,
        src: EntityRef,
        dst: EntityRef,
        attrs: &[(&str, &str)],
        modifiers: EdgeModifiers,
    ) -> Result<(), ScenarioError> {
        self.require_unsealed()?;

        if src.sim == dst.sim {
            return Err(ScenarioError::SelfConnection(src.sim.to_string()));
        }

        // 2. time_shift and weak are mutually exclusive.
        if modifiers.time_shift && modifiers.weak {
            return Err(ScenarioError::TimeShiftAndWeak {
                src: src.to_string(),
                dst: dst.to_string(),
            });
        }

        // 1. Endpoints exist and attribute names match meta.
        let mut mappings = Vec::with_capacity(attrs.len());
        for &(src_attr, dst_attr) in attrs {
            let src_kind = self.attr_kind(&src, src_attr)?;
            let dst_kind = self.attr_kind(&dst, dst_attr)?;

            // 3. time_shift requires initial_data for every mapped attribute.
            if modifiers.time_shift && !modifiers.initial_data.contains_key(dst_attr) {
                return Err(ScenarioError::MissingInitialData {
                    src: src.to_string(),
                    dst: dst.to_string(),
                    attr: dst_attr.to_string(),
                });
            }

            let persistent = src_kind.is_persistent();
            let trigger = matches!(dst_kind, AttrKind::Event);

            // 4. Warn (do not reject) on non-persistent source -> non-trigger target.
            if !persistent && !trigger {
                tracing::warn!(
                    src = %src,
                    dst = %dst,
                    src_attr,
                    dst_attr,
                    "connecting an event-typed source to a measurement-typed target: \
                     the target will never be triggered by this edge"
                );
            }

            mappings.push(AttrMapping {
                src_attr: src_attr.to_string(),
                dst_attr: dst_attr.to_string(),
                persistent,
                trigger,
            });
        }

        // 5. Reject duplicate edges with conflicting modifiers.
        for existing in &self.edges {
            if existing.src == src && existing.dst == dst {
                let same_attrs = existing
                    .attrs
                    .iter()
                    .map(|m| (&m.src_attr, &m.dst_attr))
                    .collect::<BTreeSet<_>>()
                    == mappings
                        .iter()
                        .map(|m| (&m.src_attr, &m.dst_attr))
                        .collect::<BTreeSet<_>>();
                let same_kind = matches!(
                    (&existing.kind, modifiers.time_shift, modifiers.weak),
                    (EdgeKind::Direct, false, false)
                        | (EdgeKind::Weak, false, true)
                        | (EdgeKind::TimeShifted { .. }, true, false)
                );
                if same_attrs && !same_kind {
                    return Err(ScenarioError::DuplicateEdge {
                        src: src.to_string(),
                        dst: dst.to_string(),
                        attr: mappings
                            .first()
                            .map(|m| m.dst_attr.clone())
                            .unwrap_or_default(),
                    });
                }
            }
        }

        let kind = if modifiers.time_shift {
            EdgeKind::TimeShifted {
                initial: modifiers.initial_data,
            }
        } else if modifiers.weak {
            EdgeKind::Weak
        } else {
            EdgeKind::Direct
        };

        self.entity_graph
            .entry(src.clone())
            .or_default()
            .insert(dst.clone());
        self.entity_graph
            .entry(dst.clone())
            .or_default()
            .insert(src.clone());

        self.edges.push(Edge {
            src,
            dst,
            attrs: mappings,
            kind,
        });
        Ok(())
    }

    /// Marks the graph immutable. Further calls to `connect`,
    /// `register_simulator`, or `register_entities` fail.
    pub fn seal(&mut self) {
        self.sealed = true;
    }

    /// Related entities for a given set of ids, per C7's
    /// `get_related_entities` (introspection only, never consulted by the
    /// scheduler's readiness predicate).
    pub fn related_entities(&self, ids: &[EntityRef]) -> BTreeSet<EntityRef> {
        let mut out = BTreeSet::new();
        for id in ids {
            if let Some(neighbors) = self.entity_graph.get(id) {
                out.extend(neighbors.iter().cloned());
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ApiVersion, ModelDescriptor, SimulatorKind};
    use std::collections::BTreeSet as Set;

    fn meta(kind: SimulatorKind, attrs: &[(&str, AttrKind)]) -> ModelMeta {
        let mut inputs = BTreeMap::new();
        let mut outputs = BTreeMap::new();
        for &(name, k) in attrs {
            inputs.insert(name.to_string(), k);
            outputs.insert(name.to_string(), k);
        }
        ModelMeta {
            api_version: ApiVersion::CORE,
            kind,
            models: BTreeMap::from([(
                "M".to_string(),
                ModelDescriptor {
                    params: Set::new(),
                    inputs,
                    outputs,
                    any_inputs: false,
                },
            )]),
            extra_methods: Vec::new(),
        }
    }

    fn setup() -> (ScenarioGraph, EntityRef, EntityRef) {
        let mut g = ScenarioGraph::new();
        let a = SimulatorId::new("A").unwrap();
        let b = SimulatorId::new("B").unwrap();
        g.register_simulator(
            a.clone(),
            meta(SimulatorKind::TimeBased, &[("x", AttrKind::Measurement)]),
        )
        .unwrap();
        g.register_simulator(
            b.clone(),
            meta(SimulatorKind::TimeBased, &[("x", AttrKind::Measurement)]),
        )
        .unwrap();
        let ea = EntityId::new("e0").unwrap();
        let eb = EntityId::new("e0").unwrap();
        g.register_entities(&a, "M", [ea.clone()]).unwrap();
        g.register_entities(&b, "M", [eb.clone()]).unwrap();
        (g, EntityRef::new(a, ea), EntityRef::new(b, eb))
    }

    #[test]
    fn connect_direct_edge_succeeds() {
        let (mut g, a, b) = setup();
        g.connect(a, b, &[("x", "x")], EdgeModifiers::default())
            .unwrap();
        assert_eq!(g.edges().len(), 1);
    }

    #[test]
    fn time_shift_requires_initial_data() {
        let (mut g, a, b) = setup();
        let err = g
            .connect(
                a,
                b,
                &[("x", "x")],
                EdgeModifiers {
                    time_shift: true,
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, ScenarioError::MissingInitialData { .. }));
    }

    #[test]
    fn time_shift_and_weak_conflict() {
        let (mut g, a, b) = setup();
        let err = g
            .connect(
                a,
                b,
                &[("x", "x")],
                EdgeModifiers {
                    time_shift: true,
                    weak: true,
                    initial_data: BTreeMap::from([("x".to_string(), Value::from(0))]),
                },
            )
            .unwrap_err();
        assert!(matches!(err, ScenarioError::TimeShiftAndWeak { .. }));
    }

    #[test]
    fn self_connection_is_rejected() {
        let (mut g, a, _b) = setup();
        let a2 = a.clone();
        let err = g
            .connect(a, a2, &[("x", "x")], EdgeModifiers::default())
            .unwrap_err();
        assert!(matches!(err, ScenarioError::SelfConnection(_)));
    }

    #[test]
    fn unknown_attribute_is_rejected() {
        let (mut g, a, b) = setup();
        let err = g
            .connect(a, b, &[("nope", "x")], EdgeModifiers::default())
            .unwrap_err();
        assert!(matches!(err, ScenarioError::UnknownAttribute { .. }));
    }

    #[test]
    fn duplicate_edge_with_conflicting_modifiers_is_rejected() {
        let (mut g, a, b) = setup();
        g.connect(a.clone(), b.clone(), &[("x", "x")], EdgeModifiers::default())
            .unwrap();
        let err = g
            .connect(
                a,
                b,
                &[("x", "x")],
                EdgeModifiers {
                    weak: true,
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, ScenarioError::DuplicateEdge { .. }));
    }

    #[test]
    fn seal_rejects_further_connects() {
        let (mut g, a, b) = setup();
        g.seal();
        let err = g
            .connect(a, b, &[("x", "x")], EdgeModifiers::default())
            .unwrap_err();
        assert!(matches!(err, ScenarioError::AlreadySealed));
    }

    #[test]
    fn related_entities_is_symmetric() {
        let (mut g, a, b) = setup();
        g.connect(a.clone(), b.clone(), &[("x", "x")], EdgeModifiers::default())
            .unwrap();
        assert!(g.related_entities(&[a.clone()]).contains(&b));
        assert!(g.related_entities(&[b]).contains(&a));
    }
}
