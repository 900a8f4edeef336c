// This module computes the dominator tree of a function with the iterative algorithm of
// Cooper, Harvey and Kennedy: immediate dominators are refined over the reverse
// post-order until a fixed point, intersecting predecessor dominators by walking up the
// tree with RPO indices as finger positions. Only reachable blocks get an immediate
// dominator; queries about unreachable blocks answer "dominated", matching the
// convention that code which never runs imposes no ordering constraint.

//! Dominator tree.

use crate::core::analyzer::Analyzer;
use crate::ir::BlockId;

pub struct DominatorTree {
    /// Immediate dominator per block; the entry maps to itself.
    idom: Vec<Option<BlockId>>,
    rpo: Vec<Option<usize>>,
}

impl DominatorTree {
    pub fn compute(analyzer: &Analyzer, num_blocks: usize) -> Self {
        let order = analyzer.order();
        let rpo: Vec<Option<usize>> = (0..num_blocks)
            .map(|b| analyzer.rpo_index(BlockId(b as u32)))
            .collect();
        let mut idom: Vec<Option<BlockId>> = vec![None; num_blocks];
        let Some(&entry) = order.first() else {
            return Self { idom, rpo };
        };
        idom[entry.index()] = Some(entry);

        let intersect = |idom: &[Option<BlockId>], mut a: BlockId, mut b: BlockId| -> BlockId {
            while a != b {
                while rpo[a.index()] > rpo[b.index()] {
                    match idom[a.index()] {
                        Some(next) => a = next,
                        None => return b,
                    }
                }
                while rpo[b.index()] > rpo[a.index()] {
                    match idom[b.index()] {
                        Some(next) => b = next,
                        None => return a,
                    }
                }
            }
            a
        };

        let mut changed = true;
        while changed {
            changed = false;
            for &block in order.iter().skip(1) {
                let mut new_idom: Option<BlockId> = None;
                for &pred in analyzer.preds(block) {
                    if idom[pred.index()].is_none() {
                        continue;
                    }
                    new_idom = Some(match new_idom {
                        None => pred,
                        Some(current) => intersect(&idom, pred, current),
                    });
                }
                if new_idom.is_some() && idom[block.index()] != new_idom {
                    idom[block.index()] = new_idom;
                    changed = true;
                }
            }
        }
        Self { idom, rpo }
    }

    pub fn idom(&self, block: BlockId) -> Option<BlockId> {
        self.idom.get(block.index()).copied().flatten()
    }

    /// Whether `a` dominates `b`. Every block dominates unreachable blocks.
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        if self.rpo.get(b.index()).copied().flatten().is_none() {
            return true;
        }
        let mut cur = b;
        loop {
            if cur == a {
                return true;
            }
            match self.idom(cur) {
                Some(next) if next != cur => cur = next,
                _ => return false,
            }
        }
    }
}
