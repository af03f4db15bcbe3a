//! Complexity analysis for atoms.
//!
//! Pure scoring functions with fixed weights. The analyzer decides whether
//! an atom is too large for one generation pass and, if so, how many
//! sub-tasks to recommend.

use serde::{Deserialize, Serialize};

use crate::atom::Atom;

/// Fixed sub-score weights: type, dependency, method, description.
const WEIGHT_TYPE: f64 = 0.25;
const WEIGHT_DEP: f64 = 0.20;
const WEIGHT_METHOD: f64 = 0.25;
const WEIGHT_DESCRIPTION: f64 = 0.30;

/// Verbs that suggest one generated method each.
const ACTION_KEYWORDS: &[&str] = &[
    "create", "read", "update", "delete", "list", "validate", "process", "handle", "send",
    "receive", "parse", "compute", "export", "import", "query", "save", "load",
];

/// Phrases that push the description score up.
const COMPLEXITY_KEYWORDS: &[&str] = &[
    "multiple", "complex", "integrate", "concurrent", "async", "database", "transaction",
    "cache", "retry", "stream",
];

/// Complexity metrics for one atom. All sub-scores are in `[0, 25]`;
/// `overall` is in `[0, 100]`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ComplexityMetrics {
    pub type_count: u32,
    pub dep_count: u32,
    pub method_count_estimate: u32,
    pub description_score: f64,
    pub overall: u32,
    pub estimated_lines: u32,
    pub requires_decomposition: bool,
    pub recommended_subtask_count: u32,
}

/// Score an atom against the decomposition threshold.
pub fn analyze(atom: &Atom, max_line_threshold: u32) -> ComplexityMetrics {
    let type_count = atom.expected_types.len() as u32;
    let dep_count = atom.dependencies.len() as u32;
    let method_count_estimate = estimate_methods(atom);

    let type_score = (f64::from(type_count) * 5.0).min(25.0);
    let dep_score = (f64::from(dep_count) * 25.0 / 8.0).min(25.0);
    let method_score = (f64::from(method_count_estimate) * 1.25).min(25.0);
    let description_score = score_description(&atom.description);

    let weighted = type_score * WEIGHT_TYPE
        + dep_score * WEIGHT_DEP
        + method_score * WEIGHT_METHOD
        + description_score * WEIGHT_DESCRIPTION;
    let overall = (weighted * 4.0).round() as u32;

    let base_lines = f64::from(25 * type_count + 12 * method_count_estimate + 10);
    let scaled = if overall > 70 {
        base_lines * 1.5
    } else if overall > 40 {
        base_lines * 1.25
    } else {
        base_lines
    };
    let estimated_lines = (scaled.round() as u32).max(20);

    let requires_decomposition =
        estimated_lines > max_line_threshold || overall >= 80 || type_count > 3;

    let recommended_subtask_count = if requires_decomposition {
        // Each sub-atom reserves 10 lines for imports and namespace preamble.
        let budget = f64::from(max_line_threshold.saturating_sub(10).max(1));
        ((f64::from(estimated_lines) / budget).ceil() as u32).clamp(2, 5)
    } else {
        1
    };

    ComplexityMetrics {
        type_count,
        dep_count,
        method_count_estimate,
        description_score,
        overall,
        estimated_lines,
        requires_decomposition,
        recommended_subtask_count,
    }
}

/// Two methods per expected type, plus one per action verb in the
/// description; never zero.
fn estimate_methods(atom: &Atom) -> u32 {
    let description = atom.description.to_lowercase();
    let verbs = ACTION_KEYWORDS
        .iter()
        .filter(|k| description.contains(*k))
        .count() as u32;
    let from_types = atom.expected_types.len() as u32 * 2;
    (verbs + from_types).max(1)
}

/// Length ramp (a quarter point per word, capped at 15) plus two points per
/// complexity keyword (capped at 10).
fn score_description(description: &str) -> f64 {
    let words = description.split_whitespace().count() as f64;
    let length_score = (words / 4.0).min(15.0);
    let lowered = description.to_lowercase();
    let bonus = (COMPLEXITY_KEYWORDS
        .iter()
        .filter(|k| lowered.contains(*k))
        .count() as f64
        * 2.0)
        .min(10.0);
    (length_score + bonus).min(25.0)
}
