//! Depth-compressed traversal of referral lines.
//!
//! Levels advance only on manager-ranked nodes, so a manager buried under any
//! number of lower-ranked referrals still counts as the next level down.

use crate::domain::NodeId;
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use tracing::warn;

use super::graph::{GraphView, RankEngine};

/// How nodes reachable from more than one line are attributed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineDedup {
    /// One visited set for the whole call: the first line to reach a node
    /// owns it.
    #[default]
    Shared,
    /// Each line keeps its own visited set.
    PerLine,
}

/// Parameters of a single traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressionParams {
    pub manager_step: u32,
    pub max_depth: u32,
    pub max_visited: usize,
    pub dedup: LineDedup,
}

/// Manager-ranked members of one referral line with their compressed levels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompressedLine {
    pub line_root: NodeId,
    pub members: Vec<CompressedMember>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompressedMember {
    pub node_id: NodeId,
    pub level: u32,
}

impl CompressedLine {
    pub fn is_qualifying(&self) -> bool {
        !self.members.is_empty()
    }

    pub fn max_level(&self) -> u32 {
        self.members.last().map(|m| m.level).unwrap_or(0)
    }

    pub fn level_of(&self, id: &NodeId) -> Option<u32> {
        self.members.iter().find(|m| &m.node_id == id).map(|m| m.level)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompressionResult {
    pub root: NodeId,
    /// One entry per direct referral, in enrollment order.
    pub lines: Vec<CompressedLine>,
    /// Set when the visit ceiling stopped the traversal early, or the graph
    /// itself was cut off when loaded.
    pub truncated: bool,
    pub visited: usize,
}

impl CompressionResult {
    pub fn lines_with_managers(&self) -> usize {
        self.lines.iter().filter(|l| l.is_qualifying()).count()
    }

    pub fn line(&self, line_root: &NodeId) -> Option<&CompressedLine> {
        self.lines.iter().find(|l| &l.line_root == line_root)
    }

    /// Compressed level of `id` in whichever line holds it.
    pub fn level_of(&self, id: &NodeId) -> Option<u32> {
        self.lines.iter().find_map(|l| l.level_of(id))
    }
}

pub struct CompressionTraversal;

impl CompressionTraversal {
    pub fn compress<G: GraphView + ?Sized>(
        graph: &G,
        root: &NodeId,
        params: &CompressionParams,
    ) -> CompressionResult {
        let mut budget = params.max_visited;
        Self::compress_within(graph, root, params, &mut budget)
    }

    /// Like [`compress`](Self::compress), but draws visits from a budget
    /// shared with other traversals instead of `params.max_visited`.
    pub fn compress_within<G: GraphView + ?Sized>(
        graph: &G,
        root: &NodeId,
        params: &CompressionParams,
        budget: &mut usize,
    ) -> CompressionResult {
        let mut shared: HashSet<NodeId> = HashSet::from([root.clone()]);
        let mut lines = Vec::new();
        let mut visited = 0usize;
        let mut truncated = false;

        for line_root in graph.referrals(root) {
            let mut own;
            let seen: &mut HashSet<NodeId> = match params.dedup {
                LineDedup::Shared => &mut shared,
                LineDedup::PerLine => {
                    own = HashSet::from([root.clone()]);
                    &mut own
                }
            };

            let mut line = CompressedLine {
                line_root: line_root.clone(),
                members: Vec::new(),
            };
            if !seen.insert(line_root.clone()) {
                lines.push(line);
                continue;
            }

            let mut level = 0u32;
            let mut queue = VecDeque::from([line_root]);
            while let Some(current) = queue.pop_front() {
                if *budget == 0 {
                    truncated = true;
                    break;
                }
                *budget -= 1;
                visited += 1;

                if graph.current_step(&current) == params.manager_step {
                    level += 1;
                    line.members.push(CompressedMember {
                        node_id: current.clone(),
                        level,
                    });
                    if level >= params.max_depth {
                        break;
                    }
                }

                for child in graph.referrals(&current) {
                    if seen.insert(child.clone()) {
                        queue.push_back(child);
                    }
                }
            }

            lines.push(line);
            if truncated {
                warn!(
                    root = %root,
                    visited,
                    "Compression traversal hit the visit ceiling"
                );
                break;
            }
        }

        CompressionResult {
            root: root.clone(),
            lines,
            truncated: truncated || graph.is_truncated(),
            visited,
        }
    }
}
