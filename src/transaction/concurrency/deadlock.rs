use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::common::types::TxnId;

/// Waits-for graph rebuilt from scratch on every detection tick. Edges and
/// start nodes iterate in ascending txn-id order so detection is
/// deterministic.
#[derive(Default)]
pub struct WaitsForGraph {
    edges: BTreeMap<TxnId, BTreeSet<TxnId>>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

impl WaitsForGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// `waiter` waits for a lock held by `holder`.
    pub fn add_edge(&mut self, waiter: TxnId, holder: TxnId) {
        self.edges.entry(waiter).or_default().insert(holder);
    }

    pub fn remove_edge(&mut self, waiter: TxnId, holder: TxnId) {
        if let Some(targets) = self.edges.get_mut(&waiter) {
            targets.remove(&holder);
        }
    }

    /// Drop every outgoing edge of `txn_id`.
    pub fn remove_transaction(&mut self, txn_id: TxnId) {
        self.edges.remove(&txn_id);
    }

    pub fn clear(&mut self) {
        self.edges.clear();
    }

    pub fn edge_list(&self) -> Vec<(TxnId, TxnId)> {
        self.edges
            .iter()
            .flat_map(|(&from, targets)| targets.iter().map(move |&to| (from, to)))
            .collect()
    }

    /// Find a cycle and return the youngest (largest-id) transaction on it.
    /// DFS starts from the smallest txn id and explores neighbors in
    /// ascending order.
    pub fn find_cycle_victim(&self) -> Option<TxnId> {
        let nodes: BTreeSet<TxnId> = self
            .edges
            .iter()
            .flat_map(|(&from, targets)| targets.iter().copied().chain(std::iter::once(from)))
            .collect();

        for &start in &nodes {
            let mut colors: HashMap<TxnId, Color> =
                nodes.iter().map(|&n| (n, Color::White)).collect();
            let mut parents: HashMap<TxnId, TxnId> = HashMap::new();
            if let Some(victim) = self.dfs(start, &mut colors, &mut parents) {
                return Some(victim);
            }
        }
        None
    }

    fn dfs(
        &self,
        node: TxnId,
        colors: &mut HashMap<TxnId, Color>,
        parents: &mut HashMap<TxnId, TxnId>,
    ) -> Option<TxnId> {
        colors.insert(node, Color::Gray);
        if let Some(targets) = self.edges.get(&node) {
            for &next in targets {
                match colors.get(&next).copied().unwrap_or(Color::White) {
                    Color::Black => continue,
                    Color::Gray => {
                        // Cycle: walk back from `node` to `next` along the
                        // parent chain and pick the largest id on it.
                        let mut youngest = node;
                        let mut current = node;
                        while current != next {
                            current = parents[&current];
                            youngest = youngest.max(current);
                        }
                        return Some(youngest);
                    }
                    Color::White => {
                        parents.insert(next, node);
                        if let Some(victim) = self.dfs(next, colors, parents) {
                            return Some(victim);
                        }
                    }
                }
            }
        }
        colors.insert(node, Color::Black);
        None
    }
}
