//! Dependency ordering of formulas.
//!
//! Each formula is a node; an edge runs from the producer of a derived
//! field to every formula that references it. Kahn's algorithm with a
//! deterministic tie-break (original position) yields the execution order.

use std::collections::{BTreeSet, HashMap, HashSet};

use log::{info, warn};
use regex::Regex;

use recon_model::Formula;

/// True when `text` mentions `key` as a standalone word (any casing).
/// Occurrences glued to a dot are halves of a qualified reference, not
/// derived references, and do not count.
fn references_key(text: &str, key: &str) -> bool {
    let escaped = regex::escape(key);
    let Ok(word) = Regex::new(&format!(r"(?i)\b{escaped}\b")) else {
        return false;
    };
    let found = word.find_iter(text).any(|m| {
        let before = text[..m.start()].chars().next_back();
        let after = text[m.end()..].chars().next();
        before != Some('.') && after != Some('.')
    });
    found
}

/// Topologically order `formulas` so every derived reference is computed
/// before its consumers.
///
/// Dependencies are detected by scanning each formula's text for the
/// `logicNameKey`s the other formulas produce, so even short names
/// schedule correctly. Ties break by original position. When no formula
/// has zero in-degree (a cycle), the original order is returned with a
/// warning. Formulas the sort never reached — and formulas lacking a
/// `logicNameKey`, which cannot participate — are appended at the end in
/// original order.
pub fn sort_by_dependencies(formulas: &[Formula]) -> Vec<Formula> {
    let mut index: HashMap<String, &Formula> = HashMap::new();
    let mut positions: HashMap<String, usize> = HashMap::new();

    for (idx, formula) in formulas.iter().enumerate() {
        if formula.logic_name_key.is_empty() {
            continue;
        }
        let key = formula.logic_name_key.to_uppercase();
        index.insert(key.clone(), formula);
        positions.insert(key, idx);
    }

    let produced: Vec<String> = index.keys().cloned().collect();
    let mut dependencies: HashMap<String, BTreeSet<String>> = HashMap::new();
    for (key, formula) in &index {
        let deps: BTreeSet<String> = produced
            .iter()
            .filter(|candidate| {
                *candidate != key && references_key(&formula.formula_text, candidate)
            })
            .cloned()
            .collect();
        dependencies.insert(key.clone(), deps);
    }

    let mut indegree: HashMap<String, usize> = dependencies
        .iter()
        .map(|(key, deps)| (key.clone(), deps.len()))
        .collect();

    let mut queue: Vec<String> = indegree
        .iter()
        .filter(|(_, count)| **count == 0)
        .map(|(key, _)| key.clone())
        .collect();

    if queue.is_empty() && !index.is_empty() {
        warn!("circular formula dependency detected, keeping original order");
        return formulas.to_vec();
    }

    let mut processed: HashSet<String> = HashSet::new();
    let mut sorted: Vec<Formula> = Vec::with_capacity(formulas.len());

    while !queue.is_empty() {
        queue.sort_by_key(|key| positions.get(key).copied().unwrap_or(usize::MAX));
        let current = queue.remove(0);
        if !processed.insert(current.clone()) {
            continue;
        }
        sorted.push((*index[&current]).clone());

        for (key, deps) in &dependencies {
            if deps.contains(&current) {
                let count = indegree.entry(key.clone()).or_insert(1);
                *count = count.saturating_sub(1);
                if *count == 0 && !processed.contains(key) {
                    queue.push(key.clone());
                }
            }
        }
    }

    // Anything the sort could not reach still has to run.
    for formula in formulas {
        if formula.logic_name_key.is_empty() {
            sorted.push(formula.clone());
        } else if !processed.contains(&formula.logic_name_key.to_uppercase()) {
            warn!(
                "formula `{}` was not reached by the dependency sort, appending at end",
                formula.logic_name_key
            );
            sorted.push(formula.clone());
        }
    }

    info!(
        "formulas ordered by dependencies: {}",
        sorted
            .iter()
            .map(|f| f.logic_name_key.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );

    sorted
}
