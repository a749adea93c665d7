//! Point-in-time view of an affiliate tree.

use crate::domain::{AffiliateNode, NodeId};
use std::collections::{HashMap, HashSet};

/// Read access to the referral graph.
///
/// Traversals only need node lookups and the ordered referral list of a
/// node, so tests can supply hand-built graphs.
pub trait GraphView {
    fn node(&self, id: &NodeId) -> Option<&AffiliateNode>;

    /// Direct referrals of `id`, in enrollment order.
    fn referrals(&self, id: &NodeId) -> Vec<NodeId>;

    /// Sponsors of `id` from nearest to the root. Stops on a repeated id.
    fn sponsor_chain(&self, id: &NodeId) -> Vec<NodeId> {
        let mut chain = Vec::new();
        let mut seen: HashSet<NodeId> = HashSet::from([id.clone()]);
        let mut current = self.node(id).and_then(|n| n.sponsor_id.clone());
        while let Some(sponsor) = current {
            if !seen.insert(sponsor.clone()) {
                break;
            }
            current = self.node(&sponsor).and_then(|n| n.sponsor_id.clone());
            chain.push(sponsor);
        }
        chain
    }

    /// Whether the view was cut off when loaded, so traversals over it may
    /// be missing nodes.
    fn is_truncated(&self) -> bool {
        false
    }
}

/// Rank lookup used by the stair-step and leadership plans.
pub trait RankEngine {
    /// Current plan step; nodes without rank data sit on step 0.
    fn current_step(&self, id: &NodeId) -> u32;
}

impl<G: GraphView + ?Sized> RankEngine for G {
    fn current_step(&self, id: &NodeId) -> u32 {
        self.node(id).map(|n| n.current_step).unwrap_or(0)
    }
}

/// In-memory copy of the part of one tree an operation needs, loaded inside
/// a storage transaction.
///
/// Referral lists only hold loaded nodes.
#[derive(Debug, Clone, Default)]
pub struct GraphSnapshot {
    nodes: HashMap<NodeId, AffiliateNode>,
    referrals: HashMap<NodeId, Vec<NodeId>>,
    truncated: bool,
}

impl GraphSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_nodes(nodes: impl IntoIterator<Item = AffiliateNode>) -> Self {
        let mut snapshot = Self::new();
        snapshot.extend(nodes);
        snapshot
    }

    /// Insert or replace a batch of nodes, sorting referral lists once.
    pub fn extend(&mut self, nodes: impl IntoIterator<Item = AffiliateNode>) {
        let mut touched = HashSet::new();
        for node in nodes {
            self.link(&node);
            if let Some(sponsor) = &node.sponsor_id {
                touched.insert(sponsor.clone());
            }
            self.nodes.insert(node.id.clone(), node);
        }
        for sponsor in touched {
            self.sort_referrals_of(&sponsor);
        }
    }

    pub fn mark_truncated(&mut self) {
        self.truncated = true;
    }

    /// Insert or replace a node, keeping its sponsor's referrals in
    /// enrollment order.
    pub fn insert(&mut self, node: AffiliateNode) {
        self.link(&node);
        let sponsor = node.sponsor_id.clone();
        self.nodes.insert(node.id.clone(), node);
        if let Some(sponsor) = sponsor {
            self.sort_referrals_of(&sponsor);
        }
    }

    fn link(&mut self, node: &AffiliateNode) {
        if let Some(sponsor) = &node.sponsor_id {
            let list = self.referrals.entry(sponsor.clone()).or_default();
            if !list.contains(&node.id) {
                list.push(node.id.clone());
            }
        }
    }

    fn sort_referrals_of(&mut self, sponsor: &NodeId) {
        let nodes = &self.nodes;
        if let Some(list) = self.referrals.get_mut(sponsor) {
            list.sort_by(|a, b| {
                let ka = nodes.get(a).map(|n| n.enrolled_at);
                let kb = nodes.get(b).map(|n| n.enrolled_at);
                ka.cmp(&kb).then_with(|| a.cmp(b))
            });
        }
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub(crate) fn node_mut(&mut self, id: &NodeId) -> Option<&mut AffiliateNode> {
        self.nodes.get_mut(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &AffiliateNode> {
        self.nodes.values()
    }
}

impl GraphView for GraphSnapshot {
    fn node(&self, id: &NodeId) -> Option<&AffiliateNode> {
        self.nodes.get(id)
    }

    fn referrals(&self, id: &NodeId) -> Vec<NodeId> {
        self.referrals.get(id).cloned().unwrap_or_default()
    }

    fn is_truncated(&self) -> bool {
        self.truncated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TimeMs;

    fn n(id: &str, sponsor: Option<&str>, enrolled: i64) -> AffiliateNode {
        AffiliateNode::new(NodeId::new(id), sponsor.map(NodeId::new), TimeMs::new(enrolled))
    }

    #[test]
    fn test_referrals_follow_enrollment_order() {
        let g = GraphSnapshot::from_nodes(vec![
            n("root", None, 0),
            n("late", Some("root"), 30),
            n("early", Some("root"), 10),
            n("mid", Some("root"), 20),
        ]);
        assert_eq!(
            g.referrals(&NodeId::new("root")),
            vec![NodeId::new("early"), NodeId::new("mid"), NodeId::new("late")]
        );
    }

    #[test]
    fn test_sponsor_chain_walks_to_root() {
        let g = GraphSnapshot::from_nodes(vec![
            n("a", None, 0),
            n("b", Some("a"), 1),
            n("c", Some("b"), 2),
        ]);
        assert_eq!(
            g.sponsor_chain(&NodeId::new("c")),
            vec![NodeId::new("b"), NodeId::new("a")]
        );
        assert!(g.sponsor_chain(&NodeId::new("a")).is_empty());
    }

    #[test]
    fn test_sponsor_chain_stops_on_cycle() {
        let g = GraphSnapshot::from_nodes(vec![n("a", Some("b"), 0), n("b", Some("a"), 1)]);
        assert_eq!(g.sponsor_chain(&NodeId::new("a")), vec![NodeId::new("b")]);
    }

    #[test]
    fn test_missing_rank_reads_as_step_zero() {
        let mut node = n("a", None, 0);
        node.current_step = 3;
        let g = GraphSnapshot::from_nodes(vec![node]);
        assert_eq!(g.current_step(&NodeId::new("a")), 3);
        assert_eq!(g.current_step(&NodeId::new("ghost")), 0);
    }

    #[test]
    fn test_extend_merges_overlapping_loads() {
        let mut g = GraphSnapshot::from_nodes(vec![n("root", None, 0), n("b", Some("root"), 20)]);
        g.extend(vec![
            n("root", None, 0),
            n("a", Some("root"), 10),
            n("b", Some("root"), 20),
        ]);
        assert_eq!(g.len(), 3);
        assert_eq!(
            g.referrals(&NodeId::new("root")),
            vec![NodeId::new("a"), NodeId::new("b")]
        );
        assert!(!g.is_truncated());
        g.mark_truncated();
        assert!(g.is_truncated());
    }
}
