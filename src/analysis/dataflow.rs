//! Stage-level dataflow.
//!
//! Each stage reads and writes a set of tensors. A stage that reads a derived
//! tensor depends on the stage producing it; a relocated stage additionally
//! depends on its host. Schedules must keep this graph acyclic.

use crate::ir::{Block, TensorId, TensorKind};
use crate::schedule::{Schedule, StageId};
use crate::utils::errors::{ScheduleError, ScheduleErrorKind, StageResult};
use serde::{Serialize, Deserialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Tensors touched by one stage body, not counting nested stages.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageAccess {
    pub reads: BTreeSet<TensorId>,
    pub writes: BTreeSet<TensorId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EdgeKind {
    /// Producer of a derived tensor to a stage reading it
    Data,
    /// Relocated stage to its host
    Relocation,
}

/// The producer/consumer graph of a schedule.
#[derive(Debug, Clone, Default)]
pub struct Dataflow {
    access: BTreeMap<StageId, StageAccess>,
    edges: BTreeMap<StageId, BTreeSet<(StageId, EdgeKind)>>,
}

#[derive(Clone, Copy, PartialEq)]
enum Mark {
    Active,
    Done,
}

impl Dataflow {
    pub fn analyze(schedule: &Schedule) -> Self {
        let mut df = Dataflow::default();
        for stage in schedule.stages() {
            let mut access = StageAccess::default();
            stage.body().reads(&mut access.reads);
            stage.body().writes(&mut access.writes);
            df.access.insert(stage.id(), access);
        }

        let mut edges = Vec::new();
        for (&reader, access) in &df.access {
            for &tensor in &access.reads {
                if let Some(TensorKind::Derived { stage }) = schedule.tensor(tensor).map(|t| t.kind) {
                    if stage != reader {
                        edges.push((stage, reader, EdgeKind::Data));
                    }
                }
            }
        }
        for (&guest, reloc) in schedule.relocations() {
            edges.push((guest, reloc.consumer, EdgeKind::Relocation));
        }
        for (from, to, kind) in edges {
            df.add_edge(from, to, kind);
        }
        df
    }

    pub fn add_edge(&mut self, from: StageId, to: StageId, kind: EdgeKind) {
        self.edges.entry(from).or_default().insert((to, kind));
    }

    pub fn access(&self, stage: StageId) -> Option<&StageAccess> {
        self.access.get(&stage)
    }

    pub fn successors(&self, stage: StageId) -> impl Iterator<Item = StageId> + '_ {
        self.edges.get(&stage).into_iter().flat_map(|s| s.iter().map(|&(to, _)| to))
    }

    /// Stages reading a tensor produced by `stage`.
    pub fn consumers(&self, stage: StageId) -> BTreeSet<StageId> {
        self.edges
            .get(&stage)
            .map(|s| s.iter().filter(|(_, k)| *k == EdgeKind::Data).map(|&(to, _)| to).collect())
            .unwrap_or_default()
    }

    /// Some cycle of the graph, as the stages along it.
    pub fn find_cycle(&self) -> Option<Vec<StageId>> {
        let nodes: BTreeSet<StageId> = self.access.keys().chain(self.edges.keys()).copied().collect();
        let mut marks = HashMap::new();
        let mut path = Vec::new();
        for node in nodes {
            if !marks.contains_key(&node) {
                if let Some(cycle) = self.visit(node, &mut marks, &mut path) {
                    return Some(cycle);
                }
            }
        }
        None
    }

    fn visit(
        &self,
        node: StageId,
        marks: &mut HashMap<StageId, Mark>,
        path: &mut Vec<StageId>,
    ) -> Option<Vec<StageId>> {
        marks.insert(node, Mark::Active);
        path.push(node);
        for next in self.successors(node) {
            match marks.get(&next) {
                Some(Mark::Active) => {
                    let start = path.iter().position(|&s| s == next).unwrap_or(0);
                    return Some(path[start..].to_vec());
                }
                Some(Mark::Done) => {}
                None => {
                    if let Some(cycle) = self.visit(next, marks, path) {
                        return Some(cycle);
                    }
                }
            }
        }
        path.pop();
        marks.insert(node, Mark::Done);
        None
    }
}

/// `A -> B -> A`
pub fn describe_cycle(schedule: &Schedule, cycle: &[StageId]) -> String {
    let mut names: Vec<&str> = cycle
        .iter()
        .map(|&id| schedule.stage_by_id(id).map(|s| s.name()).unwrap_or("?"))
        .collect();
    if let Some(&first) = names.first() {
        names.push(first);
    }
    names.join(" -> ")
}

/// Reject a schedule whose producer/consumer relation has a cycle.
pub fn check_acyclic(schedule: &Schedule, df: &Dataflow, transform: &str) -> StageResult<()> {
    match df.find_cycle() {
        Some(cycle) => Err(ScheduleError::new(
            ScheduleErrorKind::CyclicRelation,
            transform,
            format!("cyclic producer/consumer relation: {}", describe_cycle(schedule, &cycle)),
        )
        .into()),
        None => Ok(()),
    }
}

/// Whether a statement outside the stages accepted by `inside` reads one of
/// `tensors`. Stages nested in control flow or in other stage bodies are
/// searched too.
pub fn read_outside(schedule: &Schedule, tensors: &BTreeSet<TensorId>, inside: &dyn Fn(StageId) -> bool) -> bool {
    block_reads(schedule, schedule.body(), tensors, inside)
}

fn block_reads(
    schedule: &Schedule,
    block: &Block,
    tensors: &BTreeSet<TensorId>,
    inside: &dyn Fn(StageId) -> bool,
) -> bool {
    block.stmts.iter().any(|stmt| {
        let mut reads = BTreeSet::new();
        stmt.reads(&mut reads);
        if !reads.is_disjoint(tensors) {
            return true;
        }
        let mut nested = Vec::new();
        stmt.stages(&mut nested);
        nested.into_iter().filter(|&id| !inside(id)).any(|id| match schedule.stage_by_id(id) {
            Ok(stage) => block_reads(schedule, stage.body(), tensors, inside),
            Err(_) => false,
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BuildConfig;
    use crate::frontend::{create_schedule, placeholder};

    fn chain() -> Schedule {
        create_schedule(&BuildConfig::default(), "k", &[placeholder("A", &[8])], |kb, ts| {
            let a = ts[0].clone();
            let b = kb.compute(&[8], Some("B"), None, |_, i| Ok(a.at(i)? * 2))?;
            let c = kb.compute(&[8], Some("C"), None, |_, i| Ok(b.at(i)? + 1))?;
            Ok(vec![c])
        })
        .unwrap()
    }

    #[test]
    fn test_data_edges() {
        let s = chain();
        let df = Dataflow::analyze(&s);
        let b = s.stage_id("B").unwrap();
        let c = s.stage_id("C").unwrap();
        assert_eq!(df.consumers(b).into_iter().collect::<Vec<_>>(), vec![c]);
        assert!(df.consumers(c).is_empty());
        assert!(df.find_cycle().is_none());
    }

    #[test]
    fn test_cycle_detection() {
        let s = chain();
        let mut df = Dataflow::analyze(&s);
        let b = s.stage_id("B").unwrap();
        let c = s.stage_id("C").unwrap();
        df.add_edge(c, b, EdgeKind::Relocation);
        let cycle = df.find_cycle().unwrap();
        assert_eq!(cycle.len(), 2);
        let err = check_acyclic(&s, &df, "compute_at").unwrap_err();
        assert_eq!(err.schedule_kind(), Some(ScheduleErrorKind::CyclicRelation));
    }

    #[test]
    fn test_read_outside() {
        let s = chain();
        let b = s.stage_id("B").unwrap();
        let c = s.stage_id("C").unwrap();
        let out = s.stage_outputs(b);
        assert!(!read_outside(&s, &out, &|id| id == b || id == c));
        assert!(read_outside(&s, &out, &|id| id == b));
    }

    #[test]
    fn test_outputs_include_nested_stages() {
        let s = create_schedule(&BuildConfig::default(), "k", &[placeholder("A", &[4]), placeholder("B", &[4])], |kb, ts| {
            let (a, b) = (ts[0].clone(), ts[1].clone());
            kb.mutate(&[1], Some("M"), |kb, _| {
                kb.for_each(0, 4, 1, Some("S"), |kb, x| kb.store(&b, &[x.clone()], a.at(&[x])?))
            })?;
            Ok(vec![])
        })
        .unwrap();
        let m = s.stage_id("M").unwrap();
        let (a, b) = (s.tensor_by_name("A").unwrap().id, s.tensor_by_name("B").unwrap().id);
        assert!(s.stage_outputs(m).contains(&b));
        assert!(s.stage_reads(m).contains(&a));
        assert!(s.stage_tree(m).contains(&s.stage_id("S").unwrap()));
    }
}
