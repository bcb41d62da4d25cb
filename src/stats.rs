/// Search-effort counters, returned alongside a solution so a caller can
/// inspect how much work the planner did without parsing log output.
///
/// Grounded on `stat.rs::Stats`, stripped of the CSV-file `print` method —
/// that method serializes a `Config` (CLI flags) this crate has no
/// counterpart for; tests and callers read the counters directly instead.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    pub low_level_expanded: usize,
    pub high_level_expanded: usize,
}
