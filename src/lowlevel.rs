use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

use tracing::{debug, instrument, trace};

use crate::constraint::{edge_blocked, vertex_blocked, Constraint, Path};
use crate::error::Result;
use crate::stats::Stats;
use crate::world::{Cell, World};

/// Default cap on low-level expansions before giving up on an agent.
/// Grounded on spec.md §4.2's "search budget" caveat — without a bound, an
/// agent enclosed by obstacles with no reachable goal would expand
/// `(cell, time)` states forever, since time never repeats. Once the search
/// has run longer than the map volume plus the latest constrained time step,
/// the reachable region's connectivity can no longer change, so any
/// further expansion is redundant.
const DEFAULT_MAX_EXPANSIONS: usize = 200_000;

#[derive(Debug, Clone)]
struct SearchNode {
    cell: Cell,
    time: i64,
    g: i64,
    parent: Option<usize>,
}

/// Arena index wrapped with the ordering key used by the open list: primary
/// key `f` ascending, ties broken by `h` ascending (prefer closer-to-goal),
/// further ties by insertion sequence (FIFO) — spec.md §4.2's open-list
/// ordering, grounded on `common/lowlevel.rs::OpenOrderWrapper`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct OpenKey {
    f: i64,
    h: i64,
    seq: u64,
    idx: usize,
}

impl Ord for OpenKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.f
            .cmp(&other.f)
            .then_with(|| self.h.cmp(&other.h))
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

impl PartialOrd for OpenKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Arena index wrapped with the focal-list ordering key: primary key
/// `focal` (conflict count) ascending, then `f` ascending, then insertion
/// sequence. Grounded on `common/lowlevel.rs::FocalOrderWrapper`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FocalKey {
    focal: i64,
    f: i64,
    seq: u64,
    idx: usize,
}

impl Ord for FocalKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.focal
            .cmp(&other.focal)
            .then_with(|| self.f.cmp(&other.f))
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

impl PartialOrd for FocalKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

fn reconstruct(arena: &[SearchNode], mut idx: usize) -> Path {
    let mut path = Vec::new();
    loop {
        path.push(arena[idx].cell.clone());
        match arena[idx].parent {
            Some(parent) => idx = parent,
            None => break,
        }
    }
    path.reverse();
    path
}

/// Number of pairwise conflicts a node at `(cell, time)`, arrived at from
/// `prev_cell`, has against the other agents' current paths. The secondary
/// ECBS heuristic, grounded on `algorithm.rs::heuristic_focal`.
fn conflict_count(
    agent: usize,
    cell: &Cell,
    prev_cell: &Cell,
    time: i64,
    other_paths: &[Path],
) -> i64 {
    debug_assert!(time > 0);
    let mut count = 0;
    for (other_agent, path) in other_paths.iter().enumerate() {
        if other_agent == agent {
            continue;
        }
        let t = time as usize;
        let other_cell = path.get(t).unwrap_or_else(|| path.last().unwrap());
        if other_cell == cell {
            count += 1;
        }
        if t == 0 || t > path.len() {
            continue;
        }
        let other_prev_cell = &path[t - 1];
        if other_cell == prev_cell && other_prev_cell == cell {
            count += 1;
        }
    }
    count
}

/// Space-Time A*: a single-agent time-expanded shortest-path search honouring
/// per-agent constraints in the presence of static and dynamic obstacles.
/// Grounded on `algorithm/astar.rs::standard_a_star_search_open_cost` /
/// `solver/algorithm/astar.rs::a_star_search`.
pub struct LowPlanner<'a> {
    start: Cell,
    goal: Cell,
    world: &'a World,
    max_expansions: usize,
}

impl<'a> LowPlanner<'a> {
    /// `w` is accepted for parity with spec.md §6's constructor signature but
    /// only matters to the focal-search methods (§4.5); the standard `plan`
    /// is always optimal regardless of `w`.
    pub fn new(start: Cell, goal: Cell, world: &'a World, _w: Option<f64>) -> Result<Self> {
        world.validate_point(&start)?;
        world.validate_point(&goal)?;
        Ok(LowPlanner {
            start,
            goal,
            world,
            max_expansions: DEFAULT_MAX_EXPANSIONS,
        })
    }

    pub fn with_max_expansions(mut self, max_expansions: usize) -> Self {
        self.max_expansions = max_expansions;
        self
    }

    /// "Occupied at time t" (spec.md §3) applies uniformly to every instant,
    /// including t=0: a start cell that is itself a static obstacle or is
    /// dynamically blocked at time 0 has no valid initial state.
    fn start_is_occupiable(&self) -> bool {
        !self.world.static_obstacles.contains(&self.start)
            && !self.world.is_dynamically_blocked(&self.start, 0)
    }

    /// Time-minimal path honouring `extra_constraints`, or `None` if the
    /// state space (bounded by `max_expansions`) is exhausted first.
    pub fn plan(&self, extra_constraints: &[Constraint]) -> Option<Path> {
        let mut stats = Stats::default();
        self.plan_with_stats(extra_constraints, &mut stats)
            .map(|(path, _)| path)
    }

    pub(crate) fn plan_with_stats(
        &self,
        extra_constraints: &[Constraint],
        stats: &mut Stats,
    ) -> Option<(Path, i64)> {
        self.search(extra_constraints, stats)
    }

    #[instrument(skip_all, name = "space_time_astar", fields(start = ?self.start, goal = ?self.goal), level = "debug")]
    fn search(&self, constraints: &[Constraint], stats: &mut Stats) -> Option<(Path, i64)> {
        // spec.md §4.2: the agent must be able to dwell at the goal forever
        // after, which requires the goal test to wait for the last time any
        // constraint on this agent could still apply.
        let t_max_constraint = constraints.iter().map(Constraint::max_time).max().unwrap_or(0);
        debug!(?constraints, t_max_constraint, "starting search");

        if !self.start_is_occupiable() {
            debug!("start cell is occupied at time 0, no valid initial state");
            return None;
        }

        let mut arena = Vec::new();
        let mut open: BinaryHeap<Reverse<OpenKey>> = BinaryHeap::new();
        let mut closed: HashSet<(Cell, i64)> = HashSet::new();
        let mut best_g: HashMap<(Cell, i64), i64> = HashMap::new();
        let mut seq = 0u64;

        let start_h = self.start.manhattan(&self.goal);
        arena.push(SearchNode {
            cell: self.start.clone(),
            time: 0,
            g: 0,
            parent: None,
        });
        best_g.insert((self.start.clone(), 0), 0);
        open.push(Reverse(OpenKey {
            f: start_h,
            h: start_h,
            seq,
            idx: 0,
        }));

        let mut expansions = 0usize;
        while let Some(Reverse(key)) = open.pop() {
            let node = &arena[key.idx];
            let state = (node.cell.clone(), node.time);
            if closed.contains(&state) {
                continue;
            }
            closed.insert(state.clone());
            expansions += 1;
            stats.low_level_expanded += 1;
            trace!(?node, "expand");

            if expansions > self.max_expansions {
                debug!("exhausted search budget");
                return None;
            }

            if node.cell == self.goal && node.time >= t_max_constraint {
                let g = node.g;
                return Some((reconstruct(&arena, key.idx), g));
            }

            let (cell, time, g) = (node.cell.clone(), node.time, node.g);
            let next_time = time + 1;
            for neighbour in self.world.neighbours(&cell) {
                if self.world.is_dynamically_blocked(&neighbour, next_time) {
                    continue;
                }
                if vertex_blocked(constraints, &neighbour, next_time) {
                    continue;
                }
                if neighbour != cell && edge_blocked(constraints, &cell, &neighbour, time) {
                    continue;
                }
                let next_state = (neighbour.clone(), next_time);
                if closed.contains(&next_state) {
                    continue;
                }
                let tentative_g = g + 1;
                let better = best_g
                    .get(&next_state)
                    .map(|&existing| tentative_g < existing)
                    .unwrap_or(true);
                if better {
                    best_g.insert(next_state, tentative_g);
                    let h = neighbour.manhattan(&self.goal);
                    arena.push(SearchNode {
                        cell: neighbour,
                        time: next_time,
                        g: tentative_g,
                        parent: Some(key.idx),
                    });
                    seq += 1;
                    open.push(Reverse(OpenKey {
                        f: tentative_g + h,
                        h,
                        seq,
                        idx: arena.len() - 1,
                    }));
                }
            }
        }

        debug!("open list exhausted, no path");
        None
    }

    /// ε-focal Space-Time A* (spec.md §4.5): the focal list holds every open
    /// node with `f <= w * f_min` and is ordered by conflict count against
    /// `other_paths` rather than by `f`. Returns the path taken off the focal
    /// list together with `f_min`, the true lower bound on this agent's cost
    /// (used by ECBS's high-level `lower_bound`).
    #[instrument(skip_all, name = "space_time_astar_focal", fields(start = ?self.start, goal = ?self.goal), level = "debug")]
    pub(crate) fn plan_focal(
        &self,
        extra_constraints: &[Constraint],
        w: f64,
        other_paths: &[Path],
        agent: usize,
        stats: &mut Stats,
    ) -> Option<(Path, i64)> {
        let t_max_constraint = extra_constraints
            .iter()
            .map(Constraint::max_time)
            .max()
            .unwrap_or(0);

        if !self.start_is_occupiable() {
            return None;
        }

        let mut arena = Vec::new();
        let mut open: BinaryHeap<Reverse<OpenKey>> = BinaryHeap::new();
        let mut focal: BinaryHeap<Reverse<FocalKey>> = BinaryHeap::new();
        let mut closed: HashSet<(Cell, i64)> = HashSet::new();
        let mut best_g: HashMap<(Cell, i64), i64> = HashMap::new();
        let mut seq = 0u64;

        let start_h = self.start.manhattan(&self.goal);
        arena.push(SearchNode {
            cell: self.start.clone(),
            time: 0,
            g: 0,
            parent: None,
        });
        best_g.insert((self.start.clone(), 0), 0);
        open.push(Reverse(OpenKey {
            f: start_h,
            h: start_h,
            seq,
            idx: 0,
        }));
        focal.push(Reverse(FocalKey {
            focal: 0,
            f: start_h,
            seq,
            idx: 0,
        }));

        let mut expansions = 0usize;
        let mut f_min = start_h;

        while let Some(Reverse(key)) = focal.pop() {
            let node = &arena[key.idx];
            let state = (node.cell.clone(), node.time);
            if closed.contains(&state) {
                continue;
            }
            closed.insert(state.clone());
            expansions += 1;
            stats.low_level_expanded += 1;

            if expansions > self.max_expansions {
                return None;
            }

            // Drop the node just closed, and any other now-stale entries,
            // off the top of `open` before reading the frontier minimum:
            // otherwise `open`'s top never advances and `f_min` can never
            // rise past `start_h`.
            while let Some(Reverse(top)) = open.peek() {
                let n = &arena[top.idx];
                if closed.contains(&(n.cell.clone(), n.time)) {
                    open.pop();
                } else {
                    break;
                }
            }
            if let Some(Reverse(top)) = open.peek() {
                if top.f > f_min {
                    let new_f_min = top.f;
                    for Reverse(open_key) in open.iter() {
                        let n = &arena[open_key.idx];
                        if closed.contains(&(n.cell.clone(), n.time)) {
                            continue;
                        }
                        if n.time == 0 {
                            continue;
                        }
                        if (open_key.f as f64) > w * f_min as f64
                            && (open_key.f as f64) <= w * new_f_min as f64
                        {
                            let prev_cell = &arena[n.parent.expect("non-root has a parent")].cell;
                            let focal_cost =
                                conflict_count(agent, &n.cell, prev_cell, n.time, other_paths);
                            focal.push(Reverse(FocalKey {
                                focal: focal_cost,
                                f: open_key.f,
                                seq: open_key.seq,
                                idx: open_key.idx,
                            }));
                        }
                    }
                    f_min = new_f_min;
                }
            }

            if node.cell == self.goal && node.time >= t_max_constraint {
                return Some((reconstruct(&arena, key.idx), f_min));
            }

            let (cell, time, g) = (node.cell.clone(), node.time, node.g);
            let next_time = time + 1;
            for neighbour in self.world.neighbours(&cell) {
                if self.world.is_dynamically_blocked(&neighbour, next_time) {
                    continue;
                }
                if vertex_blocked(extra_constraints, &neighbour, next_time) {
                    continue;
                }
                if neighbour != cell && edge_blocked(extra_constraints, &cell, &neighbour, time) {
                    continue;
                }
                let next_state = (neighbour.clone(), next_time);
                if closed.contains(&next_state) {
                    continue;
                }
                let tentative_g = g + 1;
                let better = best_g
                    .get(&next_state)
                    .map(|&existing| tentative_g < existing)
                    .unwrap_or(true);
                if better {
                    best_g.insert(next_state.clone(), tentative_g);
                    let h = neighbour.manhattan(&self.goal);
                    let f = tentative_g + h;
                    arena.push(SearchNode {
                        cell: neighbour.clone(),
                        time: next_time,
                        g: tentative_g,
                        parent: Some(key.idx),
                    });
                    let idx = arena.len() - 1;
                    seq += 1;
                    open.push(Reverse(OpenKey { f, h, seq, idx }));
                    if (f as f64) <= w * f_min as f64 {
                        let focal_cost = conflict_count(agent, &neighbour, &cell, next_time, other_paths);
                        focal.push(Reverse(FocalKey {
                            focal: focal_cost,
                            f,
                            seq,
                            idx,
                        }));
                    }
                }
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::World;
    use rand::Rng;

    fn init_tracing() {
        let _ = tracing_subscriber::fmt().with_env_filter("trace").try_init();
    }

    #[test]
    fn optimal_path_length_matches_manhattan_distance() {
        init_tracing();
        let world = World::new(2, vec![5, 5], vec![], vec![]).unwrap();
        let planner = LowPlanner::new(Cell::new(vec![0, 0]), Cell::new(vec![4, 4]), &world, None).unwrap();
        let path = planner.plan(&[]).unwrap();
        assert_eq!(path.len(), 9);
        assert_eq!(path[0], Cell::new(vec![0, 0]));
        assert_eq!(path.last().unwrap(), &Cell::new(vec![4, 4]));
    }

    #[test]
    fn wall_partition_is_unreachable() {
        let obstacles = vec![
            Cell::new(vec![1, 0]),
            Cell::new(vec![1, 1]),
            Cell::new(vec![1, 2]),
        ];
        let world = World::new(2, vec![3, 3], obstacles, vec![]).unwrap();
        let planner = LowPlanner::new(Cell::new(vec![0, 0]), Cell::new(vec![2, 0]), &world, None).unwrap();
        assert!(planner.plan(&[]).is_none());
    }

    #[test]
    fn three_dimensional_path_length() {
        let world = World::new(3, vec![3, 3, 3], vec![], vec![]).unwrap();
        let planner =
            LowPlanner::new(Cell::new(vec![0, 0, 0]), Cell::new(vec![2, 2, 2]), &world, None).unwrap();
        let path = planner.plan(&[]).unwrap();
        assert_eq!(path.len(), 7);
    }

    #[test]
    fn enclosed_and_dynamically_blocked_start_is_unreachable() {
        // (2,2) is walled in on all four sides, and a dynamic obstacle
        // blocks (2,2) itself from time 0 onward: there is no valid initial
        // state at all, let alone a path to a goal outside the enclosure.
        let walls = vec![
            Cell::new(vec![1, 2]),
            Cell::new(vec![3, 2]),
            Cell::new(vec![2, 1]),
            Cell::new(vec![2, 3]),
        ];
        let world = World::new(
            2,
            vec![5, 5],
            walls,
            vec![(Cell::new(vec![2, 2]), (0, i64::MAX / 2))],
        )
        .unwrap();
        let planner = LowPlanner::new(Cell::new(vec![2, 2]), Cell::new(vec![0, 0]), &world, None)
            .unwrap()
            .with_max_expansions(1_000);
        assert!(planner.plan(&[]).is_none());
    }

    #[test]
    fn vertex_constraint_forces_a_wait_in_a_single_lane_corridor() {
        // A 1-wide corridor removes all route choice: the only optimal path
        // visits (2,0) at t=2, so forbidding it costs exactly one extra step.
        let world = World::new(2, vec![5, 1], vec![], vec![]).unwrap();
        let planner =
            LowPlanner::new(Cell::new(vec![0, 0]), Cell::new(vec![4, 0]), &world, None).unwrap();
        let optimal = planner.plan(&[]).unwrap();
        assert_eq!(optimal.len(), 5);

        let constraints = vec![Constraint::Vertex {
            cell: Cell::new(vec![2, 0]),
            time: 2,
        }];
        let detoured = planner.plan(&constraints).unwrap();
        assert_eq!(detoured.len(), 6);
    }

    #[test]
    fn random_dimension_open_plan_matches_manhattan() {
        let mut rng = rand::thread_rng();
        for dimension in [2, 3] {
            let space_limit: Vec<i64> = (0..dimension).map(|_| rng.gen_range(2..15)).collect();
            let start: Cell = Cell::new(
                space_limit.iter().map(|&l| rng.gen_range(0..l)).collect::<Vec<_>>(),
            );
            let goal: Cell = Cell::new(
                space_limit.iter().map(|&l| rng.gen_range(0..l)).collect::<Vec<_>>(),
            );
            let world = World::new(dimension, space_limit, vec![], vec![]).unwrap();
            let planner = LowPlanner::new(start.clone(), goal.clone(), &world, None).unwrap();
            let path = planner.plan(&[]).unwrap();
            assert_eq!(path[0], start);
            assert_eq!(path.last().unwrap(), &goal);
            assert_eq!(path.len() as i64 - 1, start.manhattan(&goal));
        }
    }
}
