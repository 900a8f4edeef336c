// This module implements the Analyzer component that computes control-flow and liveness
// information for IR functions. It performs three analyses: 1) CFG construction, giving
// the successor list and the distinct predecessor list of every block; 2) a Reverse
// Post-Order (RPO) traversal from the entry block, which also tells which blocks are
// reachable; and 3) block-level liveness (live-in / live-out value sets) by backward
// dataflow, where phi operands are live out of the incoming block rather than live into
// the phi's block. From the block sets it derives linear live intervals over the
// function-defined block order, which is the order the code generator emits blocks in;
// a phi result counts as written at the end of every incoming block. The verifier, the
// CFG simplification pass and local slot assignment all share this analysis.

//! Control-flow and liveness analysis.

use crate::ir::{BlockId, Function, Opcode, Operand};
use log::trace;

/// Dense bit set over value numbers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValueSet {
    words: Vec<u64>,
}

impl ValueSet {
    pub fn with_capacity(values: usize) -> Self {
        Self {
            words: vec![0; values.div_ceil(64)],
        }
    }

    pub fn insert(&mut self, v: usize) -> bool {
        let (w, b) = (v / 64, v % 64);
        if w >= self.words.len() {
            self.words.resize(w + 1, 0);
        }
        let was = self.words[w] & (1 << b) != 0;
        self.words[w] |= 1 << b;
        !was
    }

    pub fn remove(&mut self, v: usize) {
        if let Some(word) = self.words.get_mut(v / 64) {
            *word &= !(1u64 << (v % 64));
        }
    }

    pub fn contains(&self, v: usize) -> bool {
        self.words
            .get(v / 64)
            .is_some_and(|w| w & (1 << (v % 64)) != 0)
    }

    /// `self |= other`, returning whether anything changed.
    pub fn union_with(&mut self, other: &ValueSet) -> bool {
        if other.words.len() > self.words.len() {
            self.words.resize(other.words.len(), 0);
        }
        let mut changed = false;
        for (a, b) in self.words.iter_mut().zip(&other.words) {
            let next = *a | *b;
            changed |= next != *a;
            *a = next;
        }
        changed
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.words.iter().enumerate().flat_map(|(i, &w)| {
            (0..64).filter(move |b| w & (1 << b) != 0).map(move |b| i * 64 + b)
        })
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|w| *w == 0)
    }
}

/// Linear live range of a value, in instruction positions.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LiveInterval {
    pub start: usize,
    pub end: usize,
    /// Number of uses (operand occurrences).
    pub ref_count: u32,
    /// False for values that are never defined or used.
    pub live: bool,
}

impl LiveInterval {
    fn extend(&mut self, pos: usize) {
        if !self.live {
            self.start = pos;
            self.end = pos;
            self.live = true;
        } else {
            self.start = self.start.min(pos);
            self.end = self.end.max(pos);
        }
    }

    pub fn overlaps(&self, other: &LiveInterval) -> bool {
        self.live && other.live && self.start <= other.end && other.start <= self.end
    }
}

/// Computes block layout and liveness information for a function.
pub struct Analyzer {
    order: Vec<BlockId>,
    rpo_index: Vec<Option<usize>>,
    succs: Vec<Vec<BlockId>>,
    preds: Vec<Vec<BlockId>>,
    live_in: Vec<ValueSet>,
    live_out: Vec<ValueSet>,
}

impl Analyzer {
    /// Build the CFG and the reverse post-order of `func`.
    pub fn new(func: &Function) -> Self {
        let n = func.blocks.len();
        let succs: Vec<Vec<BlockId>> = func
            .blocks
            .iter()
            .map(|b| {
                let mut s: Vec<BlockId> = Vec::new();
                for succ in b.successors() {
                    if succ.index() < n && !s.contains(&succ) {
                        s.push(succ);
                    }
                }
                s
            })
            .collect();
        let mut preds = vec![Vec::new(); n];
        for (i, s) in succs.iter().enumerate() {
            for succ in s {
                preds[succ.index()].push(BlockId(i as u32));
            }
        }

        // -------- build RPO order ---------
        let mut post = Vec::with_capacity(n);
        let mut visited = vec![false; n];
        if n > 0 {
            let mut stack = vec![(BlockId(0), false)];
            while let Some((block, processed)) = stack.pop() {
                if processed {
                    post.push(block);
                    continue;
                }
                if visited[block.index()] {
                    continue;
                }
                visited[block.index()] = true;
                stack.push((block, true));
                // Reverse so that the first successor is visited first.
                for succ in succs[block.index()].iter().rev() {
                    if !visited[succ.index()] {
                        stack.push((*succ, false));
                    }
                }
            }
        }
        post.reverse();
        let mut rpo_index = vec![None; n];
        for (idx, b) in post.iter().enumerate() {
            rpo_index[b.index()] = Some(idx);
        }

        Self {
            order: post,
            rpo_index,
            succs,
            preds,
            live_in: Vec::new(),
            live_out: Vec::new(),
        }
    }

    /// Reachable blocks in reverse post-order.
    pub fn order(&self) -> &[BlockId] {
        &self.order
    }

    pub fn rpo_index(&self, block: BlockId) -> Option<usize> {
        self.rpo_index.get(block.index()).copied().flatten()
    }

    pub fn is_reachable(&self, block: BlockId) -> bool {
        self.rpo_index(block).is_some()
    }

    /// Distinct successors in terminator operand order.
    pub fn succs(&self, block: BlockId) -> &[BlockId] {
        &self.succs[block.index()]
    }

    /// Distinct predecessors, including unreachable ones.
    pub fn preds(&self, block: BlockId) -> &[BlockId] {
        &self.preds[block.index()]
    }

    pub fn live_in(&self, block: BlockId) -> &ValueSet {
        &self.live_in[block.index()]
    }

    pub fn live_out(&self, block: BlockId) -> &ValueSet {
        &self.live_out[block.index()]
    }

    /// Compute block-level live-in/live-out sets by backward dataflow.
    pub fn compute_liveness(&mut self, func: &Function) {
        let n = func.blocks.len();
        let values = func.values.len();
        let mut gens = vec![ValueSet::with_capacity(values); n];
        let mut kill = vec![ValueSet::with_capacity(values); n];
        // Values flowing along the edge pred -> block through phis, per pred.
        let mut phi_uses: Vec<Vec<(BlockId, ValueSet)>> = vec![Vec::new(); n];

        for (bi, block) in func.blocks.iter().enumerate() {
            for inst in &block.insts {
                if inst.opcode == Opcode::Phi {
                    for (op, pred) in inst.phi_incoming() {
                        if let Operand::Value(v) = op {
                            let idx = match phi_uses[bi].iter().position(|(p, _)| *p == pred) {
                                Some(i) => i,
                                None => {
                                    phi_uses[bi].push((pred, ValueSet::with_capacity(values)));
                                    phi_uses[bi].len() - 1
                                }
                            };
                            phi_uses[bi][idx].1.insert(v.index());
                        }
                    }
                } else {
                    for v in inst.value_operands() {
                        if !kill[bi].contains(v.index()) {
                            gens[bi].insert(v.index());
                        }
                    }
                }
                if let Some(r) = inst.result {
                    kill[bi].insert(r.index());
                }
            }
        }

        let mut live_in = vec![ValueSet::with_capacity(values); n];
        let mut live_out = vec![ValueSet::with_capacity(values); n];
        let mut changed = true;
        let mut rounds = 0;
        while changed {
            changed = false;
            rounds += 1;
            for bi in (0..n).rev() {
                let mut out = ValueSet::with_capacity(values);
                for succ in &self.succs[bi] {
                    out.union_with(&live_in[succ.index()]);
                    for (pred, set) in &phi_uses[succ.index()] {
                        if pred.index() == bi {
                            out.union_with(set);
                        }
                    }
                }
                let mut inn = gens[bi].clone();
                for v in out.iter() {
                    if !kill[bi].contains(v) {
                        inn.insert(v);
                    }
                }
                changed |= live_out[bi].union_with(&out);
                changed |= live_in[bi].union_with(&inn);
            }
        }
        trace!("📊 Liveness for @{} converged after {} rounds", func.name, rounds);
        self.live_in = live_in;
        self.live_out = live_out;
    }

    /// Live intervals over the function-defined block order.
    ///
    /// Positions number every instruction in block order; a block spans from
    /// its first to its last instruction. Requires [`compute_liveness`].
    ///
    /// [`compute_liveness`]: Analyzer::compute_liveness
    pub fn live_intervals(&self, func: &Function) -> Vec<LiveInterval> {
        let mut intervals = vec![LiveInterval::default(); func.values.len()];
        let mut starts = Vec::with_capacity(func.blocks.len());
        let mut pos = 0usize;
        for block in &func.blocks {
            starts.push(pos);
            pos += block.insts.len().max(1);
        }
        let block_end = |b: usize| starts[b] + func.blocks[b].insts.len().max(1) - 1;

        // Parameters are defined on entry.
        for p in 0..func.params.len() {
            if let Some(iv) = intervals.get_mut(p) {
                iv.extend(0);
            }
        }

        for (bi, block) in func.blocks.iter().enumerate() {
            for v in self.live_in[bi].iter() {
                if let Some(iv) = intervals.get_mut(v) {
                    iv.extend(starts[bi]);
                }
            }
            for v in self.live_out[bi].iter() {
                if let Some(iv) = intervals.get_mut(v) {
                    iv.extend(block_end(bi));
                }
            }
            for (ii, inst) in block.insts.iter().enumerate() {
                let at = starts[bi] + ii;
                if let Some(r) = inst.result {
                    if let Some(iv) = intervals.get_mut(r.index()) {
                        iv.extend(at);
                    }
                    if inst.opcode == Opcode::Phi {
                        for (_, pred) in inst.phi_incoming() {
                            if pred.index() < func.blocks.len() {
                                if let Some(iv) = intervals.get_mut(r.index()) {
                                    iv.extend(block_end(pred.index()));
                                }
                            }
                        }
                    }
                }
                if inst.opcode == Opcode::Phi {
                    for (op, pred) in inst.phi_incoming() {
                        if let (Operand::Value(v), true) = (op, pred.index() < func.blocks.len()) {
                            if let Some(iv) = intervals.get_mut(v.index()) {
                                iv.extend(block_end(pred.index()));
                                iv.ref_count += 1;
                            }
                        }
                    }
                } else {
                    for v in inst.value_operands() {
                        if let Some(iv) = intervals.get_mut(v.index()) {
                            iv.extend(at);
                            iv.ref_count += 1;
                        }
                    }
                }
            }
        }
        intervals
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::parser::parse_module;

    fn loop_fn() -> Function {
        let m = parse_module(
            "define i32 @f(i32 %n) {\n\
             entry:\n  br label %head\n\
             head:\n  %i = phi i32 [ 0, %entry ], [ %j, %body ]\n  %c = icmp slt i32 %i, %n\n  br i1 %c, label %body, label %exit\n\
             body:\n  %j = add i32 %i, 1\n  br label %head\n\
             exit:\n  ret i32 %i\n\
             dead:\n  br label %exit\n}\n",
        )
        .unwrap();
        m.functions[0].clone()
    }

    #[test]
    fn rpo_and_reachability() {
        let f = loop_fn();
        let a = Analyzer::new(&f);
        assert_eq!(a.order()[0], BlockId(0));
        assert_eq!(a.order().len(), 4);
        assert!(!a.is_reachable(BlockId(4)));
        assert_eq!(a.preds(BlockId(1)), &[BlockId(0), BlockId(2)]);
        assert_eq!(a.preds(BlockId(3)), &[BlockId(1), BlockId(4)]);
    }

    #[test]
    fn phi_operands_are_live_out_of_the_incoming_block() {
        let f = loop_fn();
        let mut a = Analyzer::new(&f);
        a.compute_liveness(&f);
        // %n (0) is live around the loop, %j (3) only flows into the phi.
        assert!(a.live_in(BlockId(1)).contains(0));
        assert!(a.live_out(BlockId(2)).contains(3));
        assert!(!a.live_in(BlockId(1)).contains(3));
        // %i (1) is live into exit.
        assert!(a.live_in(BlockId(3)).contains(1));
    }

    #[test]
    fn intervals_cover_loops() {
        let f = loop_fn();
        let mut a = Analyzer::new(&f);
        a.compute_liveness(&f);
        let iv = a.live_intervals(&f);
        // %n is used in head but must survive the back edge from body.
        assert_eq!(iv[0].start, 0);
        assert!(iv[0].end >= 5);
        // The phi result is written at the end of entry and body.
        assert_eq!(iv[1].start, 0);
        assert_eq!(iv[1].ref_count, 3);
    }
}
