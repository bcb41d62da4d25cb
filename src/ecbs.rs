use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};
use std::rc::Rc;

use tracing::debug;

use crate::constraint::{
    conflict_is_vacuous_for, constraint_for, count_all_conflicts, detect_first_conflict, Conflict,
    Constraint, Path,
};
use crate::error::{MapfError, Result};
use crate::lowlevel::LowPlanner;
use crate::stats::Stats;
use crate::world::{Cell, World};

/// A constraint-tree node carrying the extra bookkeeping ECBS's dual
/// open/focal search needs: each agent's low-level `f_min` (the true,
/// possibly-unattained lower bound on its cost) alongside the suboptimal
/// path the focal search actually returned. Grounded on
/// `solver/comm/highlevel.rs::HighLevelFocalNode`, dropped the MDD/cardinal
/// fields that back the teacher's conflict-prioritization optimizations.
#[derive(Clone)]
struct EcbsNode {
    constraints: Vec<Rc<Vec<Constraint>>>,
    solution: Vec<Path>,
    f_mins: Vec<i64>,
    cost: i64,
}

impl EcbsNode {
    /// Sum of per-agent `f_min`s: a valid lower bound on the optimal joint
    /// cost, used to admit nodes into the high-level focal list.
    fn lower_bound(&self) -> i64 {
        self.f_mins.iter().sum()
    }
}

/// Entry in the high-level focal list: ordered by total conflict count
/// ascending (ties by cost, then insertion order), per
/// `solver/comm/highlevel.rs::HighLevelFocalNode`'s `Ord` impl.
struct FocalEntry {
    conflicts: i64,
    cost: i64,
    seq: u64,
    idx: usize,
}

impl PartialEq for FocalEntry {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}
impl Eq for FocalEntry {}

impl PartialOrd for FocalEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FocalEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.conflicts
            .cmp(&other.conflicts)
            .then_with(|| self.cost.cmp(&other.cost))
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

/// Bounded-suboptimal CBS: the low-level search is ε-focal (spec.md §4.5)
/// and so is the high-level search over constraint-tree nodes, both bounded
/// by the same suboptimality factor `w`. Grounded on `solver/ecbs.rs::ECBS`.
pub struct EcbsSolver<'a> {
    starts: Vec<Cell>,
    goals: Vec<Cell>,
    world: &'a World,
    w: f64,
}

impl<'a> EcbsSolver<'a> {
    /// `w >= 1.0` bounds both the low-level focal list (`f <= w * f_min`)
    /// and the high-level focal list (`cost <= w * lower_bound`). `w == 1.0`
    /// degenerates to an (inefficient) optimal search.
    pub fn new(starts: Vec<Cell>, goals: Vec<Cell>, world: &'a World, w: f64) -> Result<Self> {
        if starts.len() != goals.len() {
            return Err(MapfError::LengthMismatch {
                starts: starts.len(),
                goals: goals.len(),
            });
        }
        for cell in starts.iter().chain(goals.iter()) {
            world.validate_point(cell)?;
        }
        Ok(EcbsSolver {
            starts,
            goals,
            world,
            w,
        })
    }

    pub fn plan(&self) -> Option<Vec<Path>> {
        self.plan_with_stats(&mut Stats::default())
    }

    pub fn plan_with_stats(&self, stats: &mut Stats) -> Option<Vec<Path>> {
        let root = self.root_node(stats)?;
        let mut lb_min = root.lower_bound();

        let mut open = vec![CtEntry { node: root, seq: 0 }];
        let mut seq = 1u64;
        let mut expanded: HashSet<u64> = HashSet::new();
        let mut focal = BinaryHeap::new();

        focal.push(Reverse(FocalEntry {
            conflicts: count_all_conflicts(&open[0].node.solution),
            cost: open[0].node.cost,
            seq: 0,
            idx: 0,
        }));

        while let Some(Reverse(entry)) = focal.pop() {
            if expanded.contains(&entry.seq) {
                continue;
            }
            expanded.insert(entry.seq);
            stats.high_level_expanded += 1;

            let node = open[entry.idx].node.clone();
            let conflict = match detect_first_conflict(&node.solution) {
                Some(conflict) => conflict,
                None => {
                    debug!(cost = node.cost, "conflict-free solution found");
                    return Some(node.solution);
                }
            };
            debug!(?conflict, cost = node.cost, "splitting on conflict");

            let (a1, a2) = conflict.agents();
            for agent in [a1, a2] {
                if conflict_is_vacuous_for(&conflict, node.solution[agent].len()) {
                    continue;
                }
                if let Some(child) = self.spawn_child(&node, &conflict, agent, stats) {
                    let child_idx = open.len();
                    let child_seq = seq;
                    seq += 1;
                    if (child.cost as f64) <= self.w * lb_min as f64 {
                        focal.push(Reverse(FocalEntry {
                            conflicts: count_all_conflicts(&child.solution),
                            cost: child.cost,
                            seq: child_seq,
                            idx: child_idx,
                        }));
                    }
                    open.push(CtEntry {
                        node: child,
                        seq: child_seq,
                    });
                }
            }

            let new_lb_min = open
                .iter()
                .filter(|e| !expanded.contains(&e.seq))
                .map(|e| e.node.lower_bound())
                .min()
                .unwrap_or(lb_min);
            if new_lb_min > lb_min {
                for (idx, candidate) in open.iter().enumerate() {
                    if expanded.contains(&candidate.seq) {
                        continue;
                    }
                    let cost = candidate.node.cost as f64;
                    if cost > self.w * lb_min as f64 && cost <= self.w * new_lb_min as f64 {
                        focal.push(Reverse(FocalEntry {
                            conflicts: count_all_conflicts(&candidate.node.solution),
                            cost: candidate.node.cost,
                            seq: candidate.seq,
                            idx,
                        }));
                    }
                }
                lb_min = new_lb_min;
            }
        }

        None
    }

    fn planner_for(&self, agent: usize) -> LowPlanner<'a> {
        LowPlanner::new(self.starts[agent].clone(), self.goals[agent].clone(), self.world, Some(self.w))
            .expect("start/goal already validated in EcbsSolver::new")
    }

    fn root_node(&self, stats: &mut Stats) -> Option<EcbsNode> {
        let n = self.starts.len();
        let constraints = vec![Rc::new(Vec::new()); n];
        // Agents not yet planned are approximated as dwelling at their own
        // start forever, so the low-level focal heuristic has something to
        // compare against without assuming an ordering among agents.
        let mut solution: Vec<Path> = self.starts.iter().map(|s| vec![s.clone()]).collect();
        let mut f_mins = vec![0i64; n];
        let mut cost = 0i64;

        for i in 0..n {
            let (path, f_min) =
                self.planner_for(i)
                    .plan_focal(&[], self.w, &solution, i, stats)?;
            cost += path.len() as i64 - 1;
            f_mins[i] = f_min;
            solution[i] = path;
        }

        Some(EcbsNode {
            constraints,
            solution,
            f_mins,
            cost,
        })
    }

    fn spawn_child(
        &self,
        parent: &EcbsNode,
        conflict: &Conflict,
        agent: usize,
        stats: &mut Stats,
    ) -> Option<EcbsNode> {
        let mut agent_constraints = (*parent.constraints[agent]).clone();
        agent_constraints.push(constraint_for(conflict, agent));
        let agent_constraints = Rc::new(agent_constraints);

        let (path, f_min) = self.planner_for(agent).plan_focal(
            agent_constraints.as_slice(),
            self.w,
            &parent.solution,
            agent,
            stats,
        )?;

        let mut constraints = parent.constraints.clone();
        constraints[agent] = agent_constraints;

        let mut solution = parent.solution.clone();
        let old_cost = solution[agent].len() as i64 - 1;
        let new_cost = path.len() as i64 - 1;
        solution[agent] = path;

        let mut f_mins = parent.f_mins.clone();
        f_mins[agent] = f_min;

        Some(EcbsNode {
            constraints,
            solution,
            f_mins,
            cost: parent.cost - old_cost + new_cost,
        })
    }
}

/// `open` entries need a stable sequence number independent of position —
/// pushing always appends, but a node's index may be referenced by more
/// than one stale focal entry before it is expanded.
struct CtEntry {
    node: EcbsNode,
    seq: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cell(coords: &[i64]) -> Cell {
        Cell::new(coords.to_vec())
    }

    #[test]
    fn single_agent_suboptimal_search_still_reaches_goal() {
        let world = World::new(2, vec![5, 5], vec![], vec![]).unwrap();
        let solver = EcbsSolver::new(vec![cell(&[0, 0])], vec![cell(&[4, 4])], &world, 1.5).unwrap();
        let solution = solver.plan().unwrap();
        assert_eq!(solution[0][0], cell(&[0, 0]));
        assert_eq!(solution[0].last().unwrap(), &cell(&[4, 4]));
        // Bounded suboptimal: never worse than w times the optimal cost.
        assert!(solution[0].len() as f64 - 1.0 <= 1.5 * 8.0);
    }

    #[test]
    fn head_on_agents_resolve_without_collision() {
        let world = World::new(2, vec![4, 4], vec![], vec![]).unwrap();
        let solver = EcbsSolver::new(
            vec![cell(&[0, 0]), cell(&[3, 0])],
            vec![cell(&[3, 0]), cell(&[0, 0])],
            &world,
            1.2,
        )
        .unwrap();
        let solution = solver.plan().unwrap();
        assert!(detect_first_conflict(&solution).is_none());
    }

    #[test]
    fn unreachable_agent_makes_whole_problem_infeasible() {
        let obstacles = vec![cell(&[1, 0]), cell(&[1, 1]), cell(&[1, 2])];
        let world = World::new(2, vec![3, 3], obstacles, vec![]).unwrap();
        let solver = EcbsSolver::new(vec![cell(&[0, 0])], vec![cell(&[2, 0])], &world, 1.5).unwrap();
        assert!(solver.plan().is_none());
    }

    #[test]
    fn length_mismatch_is_rejected() {
        let world = World::new(2, vec![4, 4], vec![], vec![]).unwrap();
        let err = EcbsSolver::new(vec![cell(&[0, 0])], vec![], &world, 1.5).unwrap_err();
        assert_eq!(err, MapfError::LengthMismatch { starts: 1, goals: 0 });
    }
}
