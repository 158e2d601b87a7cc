//! Startup validation of the roster's dependency graph.
//!
//! Collects every problem into an aggregate report instead of failing on
//! the first one: missing references (one error each) and cycles, found by
//! a three-color depth-first search that reconstructs the offending path.
//! The supervisor refuses to start while `errors` is non-empty.

use std::collections::{BTreeMap, HashSet};

use crate::roster::Roster;

/// Aggregate outcome of roster validation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    /// Not yet visited.
    White,
    /// On the current recursion stack.
    Gray,
    /// Fully explored.
    Black,
}

/// Validate the roster: every dependency reference resolves, and the graph
/// is acyclic.
///
/// Deterministic: roles are visited in sorted order, so the same roster
/// always yields the same report.
pub fn validate(roster: &Roster) -> ValidationReport {
    let mut report = ValidationReport::default();

    // Normalized adjacency: role -> its dependencies. BTreeMap keeps the
    // iteration order stable.
    let mut graph: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for agent in &roster.agents {
        let role = agent.role.to_lowercase();
        let deps: Vec<String> = agent.depends_on.iter().map(|d| d.to_lowercase()).collect();
        graph.insert(role, deps);
    }

    // Missing references and duplicate edges.
    for (role, deps) in &graph {
        let mut seen_deps = HashSet::new();
        for dep in deps {
            if !graph.contains_key(dep) {
                report.errors.push(format!(
                    "agent {role:?} depends on undefined role {dep:?}"
                ));
            }
            if !seen_deps.insert(dep.clone()) {
                report
                    .warnings
                    .push(format!("agent {role:?} lists dependency {dep:?} more than once"));
            }
        }
    }

    // Cycle detection: three-color DFS with path reconstruction.
    let mut colors: BTreeMap<&str, Color> =
        graph.keys().map(|r| (r.as_str(), Color::White)).collect();
    let mut path: Vec<String> = Vec::new();

    for role in graph.keys() {
        if colors[role.as_str()] == Color::White {
            dfs(role, &graph, &mut colors, &mut path, &mut report.errors);
        }
    }

    report
}

fn dfs<'a>(
    role: &'a str,
    graph: &'a BTreeMap<String, Vec<String>>,
    colors: &mut BTreeMap<&'a str, Color>,
    path: &mut Vec<String>,
    errors: &mut Vec<String>,
) {
    colors.insert(role, Color::Gray);
    path.push(role.to_string());

    if let Some(deps) = graph.get(role) {
        for dep in deps {
            match colors.get(dep.as_str()).copied() {
                // Missing reference, already reported above.
                None => continue,
                Some(Color::White) => {
                    dfs(dep, graph, colors, path, errors);
                }
                Some(Color::Gray) => {
                    // Back-edge: reconstruct the cycle from where the target
                    // first appears on the recursion stack.
                    let start = path.iter().position(|r| r == dep).unwrap_or(0);
                    let mut cycle: Vec<&str> =
                        path[start..].iter().map(String::as_str).collect();
                    cycle.push(dep.as_str());
                    errors.push(format!(
                        "Circular dependency detected: {}",
                        cycle.join(" -> ")
                    ));
                }
                Some(Color::Black) => {}
            }
        }
    }

    path.pop();
    if let Some(slot) = colors.get_mut(role) {
        *slot = Color::Black;
    }
}
