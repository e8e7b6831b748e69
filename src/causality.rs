//! The causality analyzer (C5): turns a sealed [`ScenarioGraph`] into a
//! rank order, the triggering-predecessor relation, and the `max_advance`
//! bound the scheduler consults before every step.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{ScenarioError, SchedulingError};
use crate::graph::{EdgeKind, ScenarioGraph};
use crate::ids::SimulatorId;
use crate::time::T;

/// Derived, immutable causality facts computed once at `seal()`.
#[derive(Debug)]
pub struct CausalityAnalyzer {
    rank: BTreeMap<SimulatorId, u32>,
    /// Direct (same-tick) predecessors: simulators that must have stepped
    /// past `t` before `S` may step at `t`.
    direct_predecessors: BTreeMap<SimulatorId, BTreeSet<SimulatorId>>,
    /// Time-shifted predecessors: simulators that must have reached at
    /// least `t` (i.e. `next_time(P) > t - 1`, Invariant 2) before `S` may
    /// step at `t` — one tick looser than a direct predecessor's bound.
    time_shifted_predecessors: BTreeMap<SimulatorId, BTreeSet<SimulatorId>>,
    /// Predecessors whose delivered attribute is event-typed at the
    /// consumer, i.e. can cause an otherwise-idle simulator to step.
    triggering_predecessors: BTreeMap<SimulatorId, BTreeSet<SimulatorId>>,
    /// Simulators that close a time-shifted loop back to `S`; `S` cannot
    /// advance past the next step time of any of these (§9 "max_advance").
    loop_closers: BTreeMap<SimulatorId, BTreeSet<SimulatorId>>,
}

impl CausalityAnalyzer {
    /// Builds the analyzer from a sealed graph, rejecting scenarios with an
    /// illegal cycle (a cycle with no time-shift edge to break it).
    pub fn analyze(graph: &ScenarioGraph) -> Result<Self, ScenarioError> {
        let sims: Vec<SimulatorId> = graph.registration_order().to_vec();

        let mut direct_succ: BTreeMap<SimulatorId, BTreeSet<SimulatorId>> = sims
            .iter()
            .cloned()
            .map(|s| (s, BTreeSet::new()))
            .collect();
        let mut direct_pred = direct_succ.clone();
        let mut time_shifted_pred = direct_succ.clone();
        let mut triggering_predecessors = direct_succ.clone();
        let mut timeshift_back_edges: Vec<(SimulatorId, SimulatorId)> = Vec::new();

        for edge in graph.edges() {
            match &edge.kind {
                EdgeKind::Direct => {
                    direct_succ
                        .entry(edge.src.sim.clone())
                        .or_default()
                        .insert(edge.dst.sim.clone());
                    direct_pred
                        .entry(edge.dst.sim.clone())
                        .or_default()
                        .insert(edge.src.sim.clone());
                    if edge.attrs.iter().any(|m| m.trigger) {
                        triggering_predecessors
                            .entry(edge.dst.sim.clone())
                            .or_default()
                            .insert(edge.src.sim.clone());
                    }
                }
                EdgeKind::TimeShifted { .. } => {
                    timeshift_back_edges.push((edge.src.sim.clone(), edge.dst.sim.clone()));
                    time_shifted_pred
                        .entry(edge.dst.sim.clone())
                        .or_default()
                        .insert(edge.src.sim.clone());
                    if edge.attrs.iter().any(|m| m.trigger) {
                        triggering_predecessors
                            .entry(edge.dst.sim.clone())
                            .or_default()
                            .insert(edge.src.sim.clone());
                    }
                }
                EdgeKind::Weak => {
                    // Excluded from rank and cycle legality; resolved by the
                    // scheduler's same-time iterative loop instead.
                }
            }
        }

        // A cycle made entirely of direct (same-tick) edges has no time
        // discount anywhere in it and can never be scheduled: reject it.
        if let Some(cycle) = find_cycle(&sims, &direct_succ) {
            return Err(ScenarioError::UnresolvedCycle(
                cycle.iter().map(|s| s.to_string()).collect(),
            ));
        }

        let rank = topological_rank(&sims, &direct_succ, &direct_pred);

        // loop_closers(S): simulators reachable from S via direct edges that
        // also close back to S via a time-shift edge. These are exactly the
        // cycles the check above allowed through (each contains at least one
        // time-shift edge).
        let mut loop_closers: BTreeMap<SimulatorId, BTreeSet<SimulatorId>> =
            sims.iter().cloned().map(|s| (s, BTreeSet::new())).collect();
        for (from, to) in &timeshift_back_edges {
            // `to` is the consumer of the time-shifted edge; if `to` can
            // reach `from` via direct edges, that time-shift edge closes a
            // loop back onto `from`, bounding `from`'s max_advance.
            if reaches(to, from, &direct_succ) {
                loop_closers.entry(from.clone()).or_default().insert(to.clone());
            }
        }

        Ok(Self {
            rank,
            direct_predecessors: direct_pred,
            time_shifted_predecessors: time_shifted_pred,
            triggering_predecessors,
            loop_closers,
        })
    }

    pub fn rank(&self, sim: &SimulatorId) -> u32 {
        self.rank.get(sim).copied().unwrap_or(u32::MAX)
    }

    pub fn direct_predecessors(&self, sim: &SimulatorId) -> BTreeSet<SimulatorId> {
        self.direct_predecessors.get(sim).cloned().unwrap_or_default()
    }

    pub fn time_shifted_predecessors(&self, sim: &SimulatorId) -> BTreeSet<SimulatorId> {
        self.time_shifted_predecessors
            .get(sim)
            .cloned()
            .unwrap_or_default()
    }

    pub fn triggering_predecessors(&self, sim: &SimulatorId) -> BTreeSet<SimulatorId> {
        self.triggering_predecessors
            .get(sim)
            .cloned()
            .unwrap_or_default()
    }

    /// The furthest `sim` may advance past `t_step` without risking a
    /// causality violation from a time-shifted loop back onto it.
    ///
    /// `next_step_of` reports each simulator's currently scheduled next step
    /// time, as tracked live by the scheduler. Returns `None` when `sim`
    /// closes no loop and may run unbounded (up to the run's `until`).
    pub fn max_advance(
        &self,
        sim: &SimulatorId,
        t_step: T,
        next_step_of: impl Fn(&SimulatorId) -> Option<T>,
    ) -> Result<Option<T>, SchedulingError> {
        let closers = match self.loop_closers.get(sim) {
            Some(c) if !c.is_empty() => c,
            _ => return Ok(None),
        };

        let mut bound: Option<T> = None;
        for closer in closers {
            if let Some(t_next) = next_step_of(closer) {
                bound = Some(match bound {
                    Some(b) if b <= t_next => b,
                    _ => t_next,
                });
            }
        }

        match bound {
            Some(t) if t < t_step => Err(SchedulingError::NegativeMaxAdvance { sim: sim.to_string(), t: t_step }),
            other => Ok(other),
        }
    }
}

/// Kahn's algorithm over the direct-edge subgraph, tie-broken by
/// registration order (the decision recorded for the rank tie-break open
/// question).
fn topological_rank(
    sims: &[SimulatorId],
    succ: &BTreeMap<SimulatorId, BTreeSet<SimulatorId>>,
    pred: &BTreeMap<SimulatorId, BTreeSet<SimulatorId>>,
) -> BTreeMap<SimulatorId, u32> {
    let mut in_degree: BTreeMap<SimulatorId, usize> = sims
        .iter()
        .map(|s| (s.clone(), pred.get(s).map(|p| p.len()).unwrap_or(0)))
        .collect();
    let mut rank = BTreeMap::new();
    let mut ready: Vec<SimulatorId> = sims
        .iter()
        .filter(|s| in_degree[*s] == 0)
        .cloned()
        .collect();
    let mut next_rank = 0u32;

    while !ready.is_empty() {
        // Registration order is already the iteration order of `sims`, so a
        // stable filter preserves it as the tie-break within this wave.
        let wave = std::mem::take(&mut ready);
        for s in &wave {
            rank.insert(s.clone(), next_rank);
        }
        next_rank += 1;

        for s in &wave {
            if let Some(successors) = succ.get(s) {
                for t in successors {
                    let deg = in_degree.get_mut(t).expect("successor tracked in in_degree");
                    *deg -= 1;
                    if *deg == 0 {
                        ready.push(t.clone());
                    }
                }
            }
        }
        // Preserve registration order among newly-ready nodes.
        ready.sort_by_key(|s| sims.iter().position(|x| x == s).unwrap_or(usize::MAX));
    }

    rank
}

/// DFS cycle detection returning the participating simulator ids, in cycle
/// order, if any cycle exists.
fn find_cycle(
    sims: &[SimulatorId],
    succ: &BTreeMap<SimulatorId, BTreeSet<SimulatorId>>,
) -> Option<Vec<SimulatorId>> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Unvisited,
        InStack,
        Done,
    }

    let mut marks: BTreeMap<SimulatorId, Mark> =
        sims.iter().cloned().map(|s| (s, Mark::Unvisited)).collect();
    let mut stack: Vec<SimulatorId> = Vec::new();

    fn visit(
        node: &SimulatorId,
        succ: &BTreeMap<SimulatorId, BTreeSet<SimulatorId>>,
        marks: &mut BTreeMap<SimulatorId, Mark>,
        stack: &mut Vec<SimulatorId>,
    ) -> Option<Vec<SimulatorId>> {
        marks.insert(node.clone(), Mark::InStack);
        stack.push(node.clone());
        if let Some(successors) = succ.get(node) {
            for next in successors {
                match marks.get(next).copied().unwrap_or(Mark::Unvisited) {
                    Mark::Unvisited => {
                        if let Some(cycle) = visit(next, succ, marks, stack) {
                            return Some(cycle);
                        }
                    }
                    Mark::InStack => {
                        let start = stack.iter().position(|s| s == next).unwrap();
                        return Some(stack[start..].to_vec());
                    }
                    Mark::Done => {}
                }
            }
        }
        stack.pop();
        marks.insert(node.clone(), Mark::Done);
        None
    }

    for s in sims {
        if marks[s] == Mark::Unvisited {
            if let Some(cycle) = visit(s, succ, &mut marks, &mut stack) {
                return Some(cycle);
            }
        }
    }
    None
}

fn reaches(
    from: &SimulatorId,
    to: &SimulatorId,
    succ: &BTreeMap<SimulatorId, BTreeSet<SimulatorId>>,
) -> bool {
    if from == to {
        return true;
    }
    let mut seen = BTreeSet::new();
    let mut stack = vec![from.clone()];
    while let Some(node) = stack.pop() {
        if !seen.insert(node.clone()) {
            continue;
        }
        if let Some(successors) = succ.get(&node) {
            for next in successors {
                if next == to {
                    return true;
                }
                stack.push(next.clone());
            }
        }
    }
    false
}
