//! Per-entry callchain trees
//!
//! Each entry can own a tree of call-stack frames. Appending a sample's
//! resolved stack merges common prefixes and credits the sample's period
//! to the leaf; collapsing two entries merges their trees node by node.
//! The output resort prunes a display copy down to paths whose
//! cumulative hits clear the configured minimum percentage, either of
//! the table-wide total or of the parent's children (graph-relative).

use crate::config::GraphMode;
use crate::sample::ResolvedFrame;
use fnv::FnvHashMap;

/// One node in an entry's call tree.
///
/// `hits` counts samples whose stack ended at this frame; `children_hits`
/// counts everything deeper. The root node carries no frame.
#[derive(Debug, Clone, Default)]
pub struct CallchainNode {
    pub frame: Option<ResolvedFrame>,
    pub hits: u64,
    pub children_hits: u64,
    children: FnvHashMap<u64, CallchainNode>,
}

impl CallchainNode {
    /// Empty tree root for a freshly created entry
    pub fn root() -> Self {
        Self::default()
    }

    fn child_for(frame: &ResolvedFrame) -> Self {
        Self {
            frame: Some(frame.clone()),
            ..Self::default()
        }
    }

    /// Cumulative hits of this subtree
    pub fn cumul_hits(&self) -> u64 {
        self.hits + self.children_hits
    }

    pub fn nr_children(&self) -> usize {
        self.children.len()
    }

    /// Fold one resolved stack (root frame first) into the tree,
    /// crediting `period` to the leaf and to every ancestor's
    /// `children_hits` on the way down
    pub fn append(&mut self, frames: &[ResolvedFrame], period: u64) {
        let mut node = self;
        for frame in frames {
            node.children_hits += period;
            node = node
                .children
                .entry(frame.merge_key())
                .or_insert_with(|| Self::child_for(frame));
        }
        node.hits += period;
    }

    /// Merge another tree into this one (collapse-stage collision)
    pub fn merge(&mut self, other: CallchainNode) {
        self.hits += other.hits;
        self.children_hits += other.children_hits;
        for (key, child) in other.children {
            match self.children.get_mut(&key) {
                Some(mine) => mine.merge(child),
                None => {
                    self.children.insert(key, child);
                }
            }
        }
    }

    /// Children ordered hottest-first, for presentation walks
    pub fn children_sorted(&self) -> Vec<&CallchainNode> {
        let mut kids: Vec<&CallchainNode> = self.children.values().collect();
        kids.sort_by(|a, b| b.cumul_hits().cmp(&a.cumul_hits()));
        kids
    }

    /// Build a pruned copy keeping only subtrees whose cumulative hits
    /// reach `min_percent` of the base. `total` is the table-wide total
    /// used in absolute mode; relative mode measures each child against
    /// its parent's `children_hits`.
    pub fn pruned(&self, total: u64, min_percent: f64, mode: GraphMode) -> CallchainNode {
        let mut out = CallchainNode {
            frame: self.frame.clone(),
            hits: self.hits,
            children_hits: self.children_hits,
            children: FnvHashMap::default(),
        };
        let base = match mode {
            GraphMode::Absolute => total,
            GraphMode::Relative => self.children_hits,
        };
        let min_hits = base as f64 * min_percent / 100.0;
        for (key, child) in &self.children {
            if child.cumul_hits() as f64 >= min_hits {
                out.children
                    .insert(*key, child.pruned(total, min_percent, mode));
            }
        }
        out
    }
}
