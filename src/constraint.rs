use crate::world::Cell;

/// A time-indexed path: `path[t]` is the agent's cell at time `t`, starting
/// at `path[0] == start` and ending at `path[path.len() - 1] == goal`.
pub type Path = Vec<Cell>;

/// A prohibition on a single agent, stored per-agent (spec.md §3: "Mapping
/// agent → ordered sequence of Constraint"). Grounded on
/// `common/highlevel.rs::Constraint`, dropped `is_permanent` — that field
/// backs the teacher's Target-conflict reasoning, which has no counterpart
/// in spec.md's two-variant (Vertex/Edge) conflict model.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Constraint {
    /// Forbids occupying `cell` at `time`.
    Vertex { cell: Cell, time: i64 },
    /// Forbids traversing `from -> to` between `time` and `time + 1`.
    Edge { from: Cell, to: Cell, time: i64 },
}

impl Constraint {
    pub fn max_time(&self) -> i64 {
        match self {
            Constraint::Vertex { time, .. } => *time,
            Constraint::Edge { time, .. } => time + 1,
        }
    }

    fn blocks_vertex(&self, cell: &Cell, time: i64) -> bool {
        matches!(self, Constraint::Vertex { cell: c, time: t } if c == cell && *t == time)
    }

    fn blocks_edge(&self, from: &Cell, to: &Cell, time: i64) -> bool {
        matches!(
            self,
            Constraint::Edge { from: f, to: t, time: ct }
                if f == from && t == to && *ct == time
        )
    }
}

/// Is `(cell, time)` forbidden by any constraint in the set?
pub fn vertex_blocked<'a>(
    constraints: impl IntoIterator<Item = &'a Constraint>,
    cell: &Cell,
    time: i64,
) -> bool {
    constraints.into_iter().any(|c| c.blocks_vertex(cell, time))
}

/// Is traversing `from -> to` during `[time, time + 1]` forbidden?
pub fn edge_blocked<'a>(
    constraints: impl IntoIterator<Item = &'a Constraint>,
    from: &Cell,
    to: &Cell,
    time: i64,
) -> bool {
    constraints
        .into_iter()
        .any(|c| c.blocks_edge(from, to, time))
}

/// A detected inter-agent conflict; feeds CBS's constraint-tree split.
/// Grounded on `common/highlevel.rs::{Conflict, ConflictType}`, restricted to
/// the Vertex/Edge pair spec.md §2 defines (the teacher's Target variant is a
/// conflict-reasoning optimization with no spec.md counterpart).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Conflict {
    Vertex {
        agents: (usize, usize),
        cell: Cell,
        time: i64,
    },
    Edge {
        agents: (usize, usize),
        /// `agents.0`'s traversal, `cell_a -> cell_b`.
        edge_a: (Cell, Cell),
        /// `agents.1`'s traversal, which must be the reverse swap `cell_b -> cell_a`.
        edge_b: (Cell, Cell),
        time: i64,
    },
}

impl Conflict {
    pub(crate) fn agents(&self) -> (usize, usize) {
        match self {
            Conflict::Vertex { agents, .. } => *agents,
            Conflict::Edge { agents, .. } => *agents,
        }
    }
}

/// Has `agent` already finished (and is merely dwelling) by the time the
/// conflict occurs? Splitting on it would be vacuous (spec.md §4.4).
pub(crate) fn conflict_is_vacuous_for(conflict: &Conflict, agent_path_len: usize) -> bool {
    match conflict {
        Conflict::Vertex { time, .. } => agent_path_len as i64 <= *time,
        Conflict::Edge { time, .. } => agent_path_len as i64 <= *time + 1,
    }
}

/// The constraint a constraint-tree split adds to `agent`'s list to forbid
/// its participation in `conflict`.
pub(crate) fn constraint_for(conflict: &Conflict, agent: usize) -> Constraint {
    match conflict {
        Conflict::Vertex { cell, time, .. } => Constraint::Vertex {
            cell: cell.clone(),
            time: *time,
        },
        Conflict::Edge {
            agents,
            edge_a,
            edge_b,
            time,
        } => {
            let (from, to) = if agent == agents.0 {
                edge_a.clone()
            } else {
                edge_b.clone()
            };
            Constraint::Edge {
                from,
                to,
                time: *time,
            }
        }
    }
}

fn effective_cell(path: &Path, t: usize) -> &Cell {
    if t < path.len() {
        &path[t]
    } else {
        path.last().expect("paths are never empty")
    }
}

/// Scans a joint solution for the earliest conflict: a full vertex sweep
/// over all agent pairs (ascending index order, ascending time) completes
/// before any edge conflict is considered. Grounded on
/// `common/highlevel.rs::detect_conflicts` and, for the two-pass ordering,
/// `original_source/multi_agent_path_finding/cbs/cbs.py::find_first_conflict`
/// — both scan every pair's vertex conflicts before any pair's edge
/// conflicts, which is the ordering spec.md §4.3 requires test scenarios to
/// depend on.
pub fn detect_first_conflict(paths: &[Path]) -> Option<Conflict> {
    let n = paths.len();

    for i in 0..n {
        for j in (i + 1)..n {
            let max_len = paths[i].len().max(paths[j].len());
            for t in 0..max_len {
                let cell_i = effective_cell(&paths[i], t);
                let cell_j = effective_cell(&paths[j], t);
                if cell_i == cell_j {
                    return Some(Conflict::Vertex {
                        agents: (i, j),
                        cell: cell_i.clone(),
                        time: t as i64,
                    });
                }
            }
        }
    }

    for i in 0..n {
        for j in (i + 1)..n {
            let max_len = paths[i].len().max(paths[j].len());
            if max_len < 2 {
                continue;
            }
            for t in 0..(max_len - 1) {
                let a = effective_cell(&paths[i], t);
                let b = effective_cell(&paths[i], t + 1);
                let c = effective_cell(&paths[j], t);
                let d = effective_cell(&paths[j], t + 1);
                if a == d && c == b {
                    return Some(Conflict::Edge {
                        agents: (i, j),
                        edge_a: (a.clone(), b.clone()),
                        edge_b: (c.clone(), d.clone()),
                        time: t as i64,
                    });
                }
            }
        }
    }

    None
}

/// Total count of pairwise vertex+edge conflicts across a joint solution,
/// the secondary focal-list heuristic ECBS's high-level search orders by.
/// Grounded on `common/highlevel.rs::detect_conflicts`, which (unlike
/// `find_first_conflict`) walks every step rather than stopping at the
/// first hit so the whole node can be scored.
pub fn count_all_conflicts(paths: &[Path]) -> i64 {
    let n = paths.len();
    let mut total = 0i64;
    for i in 0..n {
        for j in (i + 1)..n {
            let max_len = paths[i].len().max(paths[j].len());
            for t in 0..max_len {
                if effective_cell(&paths[i], t) == effective_cell(&paths[j], t) {
                    total += 1;
                }
            }
            if max_len < 2 {
                continue;
            }
            for t in 0..(max_len - 1) {
                let a = effective_cell(&paths[i], t);
                let b = effective_cell(&paths[i], t + 1);
                let c = effective_cell(&paths[j], t);
                let d = effective_cell(&paths[j], t + 1);
                if a == d && c == b {
                    total += 1;
                }
            }
        }
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(cells: &[[i64; 2]]) -> Path {
        cells.iter().map(|c| Cell::new(c.to_vec())).collect()
    }

    #[test]
    fn no_conflict_on_disjoint_paths() {
        let paths = vec![
            path(&[[0, 0], [0, 1], [0, 2]]),
            path(&[[2, 0], [2, 1], [2, 2]]),
        ];
        assert_eq!(detect_first_conflict(&paths), None);
    }

    #[test]
    fn vertex_conflict_detected() {
        let paths = vec![path(&[[0, 0], [0, 1]]), path(&[[0, 2], [0, 1]])];
        let conflict = detect_first_conflict(&paths).unwrap();
        assert_eq!(
            conflict,
            Conflict::Vertex {
                agents: (0, 1),
                cell: Cell::new(vec![0, 1]),
                time: 1,
            }
        );
    }

    #[test]
    fn edge_swap_conflict_detected_when_no_vertex_conflict() {
        let paths = vec![path(&[[0, 0], [0, 1]]), path(&[[0, 1], [0, 0]])];
        let conflict = detect_first_conflict(&paths).unwrap();
        assert_eq!(
            conflict,
            Conflict::Edge {
                agents: (0, 1),
                edge_a: (Cell::new(vec![0, 0]), Cell::new(vec![0, 1])),
                edge_b: (Cell::new(vec![0, 1]), Cell::new(vec![0, 0])),
                time: 0,
            }
        );
    }

    #[test]
    fn vertex_conflict_preferred_over_coexisting_edge_conflict() {
        // agents 0,1 swap at t=0 (edge conflict); agents 0,2 collide at t=1 (vertex).
        // The vertex sweep must win because it completes before any edge scan.
        let paths = vec![
            path(&[[0, 0], [0, 1]]),
            path(&[[0, 1], [0, 0]]),
            path(&[[0, 2], [0, 1]]),
        ];
        let conflict = detect_first_conflict(&paths).unwrap();
        assert!(matches!(conflict, Conflict::Vertex { .. }));
    }

    #[test]
    fn count_all_conflicts_counts_every_pairwise_hit() {
        let paths = vec![
            path(&[[0, 0], [0, 1]]),
            path(&[[0, 1], [0, 0]]),
            path(&[[0, 2], [0, 1]]),
        ];
        // agents (0,1) swap at t=0 (edge) and agents (0,2) collide at t=1 (vertex).
        assert_eq!(count_all_conflicts(&paths), 2);
    }

    #[test]
    fn dwelling_agent_still_conflicts_at_goal() {
        let paths = vec![path(&[[0, 0]]), path(&[[1, 0], [0, 0]])];
        let conflict = detect_first_conflict(&paths).unwrap();
        assert_eq!(
            conflict,
            Conflict::Vertex {
                agents: (0, 1),
                cell: Cell::new(vec![0, 0]),
                time: 1,
            }
        );
    }
}
