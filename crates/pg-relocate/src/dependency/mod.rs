//! Foreign-key ordering of tables.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::warn;

/// Result of [`resolve_order`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableOrder {
    /// Every input table exactly once. Referenced tables come first except
    /// inside a cycle.
    pub order: Vec<String>,

    /// Tables that could not be ordered because they sit on, or depend on,
    /// a foreign-key cycle. Appended to `order` in input order.
    pub cyclic: Vec<String>,
}

impl TableOrder {
    pub fn has_cycle(&self) -> bool {
        !self.cyclic.is_empty()
    }
}

/// Order `tables` so each one follows every table it references.
///
/// `deps` maps a table to the tables it references. References to tables
/// outside `tables` and self references are ignored. Among tables that are
/// ready at the same time the lexicographically smallest goes first, so
/// repeated runs produce the same order.
pub fn resolve_order(tables: &[String], deps: &BTreeMap<String, BTreeSet<String>>) -> TableOrder {
    let mut in_degree: HashMap<&str, usize> = HashMap::with_capacity(tables.len());
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();

    for table in tables {
        in_degree.entry(table.as_str()).or_insert(0);
    }

    for table in tables {
        let Some(refs) = deps.get(table) else {
            continue;
        };
        for referenced in refs {
            if referenced == table || !in_degree.contains_key(referenced.as_str()) {
                continue;
            }
            if let Some(degree) = in_degree.get_mut(table.as_str()) {
                *degree += 1;
            }
            dependents
                .entry(referenced.as_str())
                .or_default()
                .push(table.as_str());
        }
    }

    let mut ready: BTreeSet<&str> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(name, _)| *name)
        .collect();

    let mut order = Vec::with_capacity(tables.len());
    while let Some(next) = ready.pop_first() {
        order.push(next.to_string());
        for dependent in dependents.get(next).into_iter().flatten() {
            if let Some(degree) = in_degree.get_mut(dependent) {
                *degree -= 1;
                if *degree == 0 {
                    ready.insert(*dependent);
                }
            }
        }
    }

    let mut emitted: BTreeSet<String> = order.iter().cloned().collect();
    let mut cyclic = Vec::new();
    for table in tables {
        if emitted.insert(table.clone()) {
            cyclic.push(table.clone());
        }
    }

    if !cyclic.is_empty() {
        warn!(
            "Circular foreign key dependencies among {} tables, appending in input order: {}",
            cyclic.len(),
            cyclic.join(", ")
        );
        order.extend(cyclic.iter().cloned());
    }

    TableOrder { order, cyclic }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn graph(edges: &[(&str, &str)]) -> BTreeMap<String, BTreeSet<String>> {
        let mut deps: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for (from, to) in edges {
            deps.entry(from.to_string()).or_default().insert(to.to_string());
        }
        deps
    }

    fn position(order: &[String], name: &str) -> usize {
        order.iter().position(|t| t == name).unwrap()
    }

    #[test]
    fn test_chain_orders_parents_first() {
        let tables = names(&["C", "A", "B"]);
        let deps = graph(&[("B", "A"), ("C", "B")]);
        let result = resolve_order(&tables, &deps);
        assert_eq!(result.order, names(&["A", "B", "C"]));
        assert!(!result.has_cycle());
    }

    #[test]
    fn test_ties_broken_lexicographically() {
        let tables = names(&["zeta", "alpha", "mid", "beta"]);
        let deps = graph(&[("alpha", "zeta")]);
        let result = resolve_order(&tables, &deps);
        assert_eq!(result.order, names(&["beta", "mid", "zeta", "alpha"]));
    }

    #[test]
    fn test_acyclic_graph_respects_every_edge() {
        let tables = names(&["orders", "users", "items", "order_items", "reviews"]);
        let edges = [
            ("orders", "users"),
            ("order_items", "orders"),
            ("order_items", "items"),
            ("reviews", "users"),
            ("reviews", "items"),
        ];
        let result = resolve_order(&tables, &graph(&edges));
        assert_eq!(result.order.len(), tables.len());
        for (from, to) in edges {
            assert!(position(&result.order, to) < position(&result.order, from));
        }
    }

    #[test]
    fn test_cycle_keeps_every_table_once() {
        let tables = names(&["profiles", "teams", "users", "audit"]);
        let deps = graph(&[
            ("users", "teams"),
            ("teams", "users"),
            ("profiles", "users"),
        ]);
        let result = resolve_order(&tables, &deps);

        assert_eq!(result.order.len(), 4);
        let unique: BTreeSet<_> = result.order.iter().collect();
        assert_eq!(unique.len(), 4);
        assert_eq!(result.order[0], "audit");
        assert_eq!(result.cyclic, names(&["profiles", "teams", "users"]));
    }

    #[test]
    fn test_external_and_self_references_ignored() {
        let tables = names(&["categories", "posts"]);
        let deps = graph(&[
            ("categories", "categories"),
            ("posts", "categories"),
            ("posts", "users"),
        ]);
        let result = resolve_order(&tables, &deps);
        assert_eq!(result.order, names(&["categories", "posts"]));
        assert!(result.cyclic.is_empty());
    }

    #[test]
    fn test_order_is_deterministic() {
        let tables = names(&["d", "b", "c", "a"]);
        let deps = graph(&[("d", "a"), ("c", "a")]);
        let first = resolve_order(&tables, &deps);
        for _ in 0..10 {
            assert_eq!(resolve_order(&tables, &deps), first);
        }
        assert_eq!(first.order, names(&["a", "b", "c", "d"]));
    }
}
