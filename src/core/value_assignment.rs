// This module implements local slot assignment: the mapping from SSA values to JVM local
// variable indices. Parameters occupy the first slots in declaration order, as the JVM
// calling convention requires. Every other value that needs storage gets a slot from a
// linear scan over the live intervals computed by the Analyzer: intervals are visited by
// start position, slots whose interval has ended go back to a free list for their kind
// (int, long, float, double) and are handed out again before the frame grows. Wide
// kinds (long, double) take two consecutive indices. A slot is never shared by two
// simultaneously live values and never reused across kinds, which keeps the bytecode
// verifier's view of each local consistent.

//! Local slot assignment for SSA values.

use crate::core::analyzer::LiveInterval;
use crate::core::error::{CodegenError, CodegenResult};
use crate::ir::{Function, TypeClass, TypeTable, ValueId};
use log::trace;

/// Maximum number of local variable slots of one method.
pub const MAX_LOCALS: usize = 65535;

/// Verification type of a local variable slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotKind {
    Int,
    Long,
    Float,
    Double,
}

impl SlotKind {
    /// Slot kind holding values of `class`; pointers are `int` offsets.
    pub fn of(class: TypeClass) -> Option<Self> {
        match class {
            TypeClass::I1 | TypeClass::I8 | TypeClass::I16 | TypeClass::I32 | TypeClass::Ptr => {
                Some(SlotKind::Int)
            }
            TypeClass::I64 => Some(SlotKind::Long),
            TypeClass::F32 => Some(SlotKind::Float),
            TypeClass::F64 => Some(SlotKind::Double),
            _ => None,
        }
    }

    /// Number of local indices the kind occupies.
    pub fn width(self) -> usize {
        match self {
            SlotKind::Long | SlotKind::Double => 2,
            SlotKind::Int | SlotKind::Float => 1,
        }
    }

    fn index(self) -> usize {
        match self {
            SlotKind::Int => 0,
            SlotKind::Long => 1,
            SlotKind::Float => 2,
            SlotKind::Double => 3,
        }
    }
}

/// A value's home in the local variable array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalSlot {
    pub index: u16,
    pub kind: SlotKind,
}

/// Slot of every value of one function.
#[derive(Debug, Clone, Default)]
pub struct SlotAssignment {
    slots: Vec<Option<LocalSlot>>,
    max_locals: usize,
    allocated: usize,
}

impl SlotAssignment {
    pub fn slot(&self, value: ValueId) -> Option<LocalSlot> {
        self.slots.get(value.index()).copied().flatten()
    }

    /// Size of the local variable array.
    pub fn max_locals(&self) -> usize {
        self.max_locals
    }

    /// Number of distinct slots handed out (excluding parameters).
    pub fn allocated(&self) -> usize {
        self.allocated
    }
}

/// Linear-scan slot allocator with per-kind free lists.
pub struct SlotAllocator<'a> {
    func: &'a Function,
    types: &'a TypeTable,
    free: [Vec<u16>; 4],
    next: usize,
}

impl<'a> SlotAllocator<'a> {
    pub fn new(func: &'a Function, types: &'a TypeTable) -> Self {
        Self {
            func,
            types,
            free: Default::default(),
            next: 0,
        }
    }

    fn kind_of(&self, value: ValueId) -> CodegenResult<SlotKind> {
        let ty = self.func.value_type(value).ok_or_else(|| CodegenError::Emission {
            method: self.func.name.clone(),
            reason: format!("value {value} has no type"),
        })?;
        SlotKind::of(self.types.class(ty)).ok_or_else(|| CodegenError::Unsupported {
            function: self.func.name.clone(),
            detail: format!(
                "value {value} of type {} has no local variable mapping",
                self.types.display(ty)
            ),
        })
    }

    fn fresh(&mut self, kind: SlotKind) -> CodegenResult<u16> {
        let index = self.next;
        self.next += kind.width();
        if self.next > MAX_LOCALS {
            return Err(CodegenError::Limit {
                what: "local variable",
                count: self.next,
                max: MAX_LOCALS,
            });
        }
        Ok(index as u16)
    }

    /// Assign slots to the parameters and to every value accepted by `needs_slot`.
    pub fn assign(
        mut self,
        intervals: &[LiveInterval],
        needs_slot: impl Fn(ValueId) -> bool,
    ) -> CodegenResult<SlotAssignment> {
        let func = self.func;
        let mut slots: Vec<Option<LocalSlot>> = vec![None; func.values.len()];
        // (interval end, slot) of values currently holding a slot.
        let mut active: Vec<(usize, LocalSlot)> = Vec::new();

        for p in 0..func.params.len() {
            let value = ValueId(p as u32);
            let kind = self.kind_of(value)?;
            let slot = LocalSlot {
                index: self.fresh(kind)?,
                kind,
            };
            slots[p] = Some(slot);
            let end = intervals.get(p).filter(|iv| iv.live).map_or(0, |iv| iv.end);
            active.push((end, slot));
        }

        let mut candidates: Vec<(usize, ValueId)> = (func.params.len()..func.values.len())
            .map(|v| ValueId(v as u32))
            .filter(|v| intervals.get(v.index()).is_some_and(|iv| iv.live) && needs_slot(*v))
            .map(|v| (intervals[v.index()].start, v))
            .collect();
        candidates.sort_unstable();

        let mut allocated = 0;
        for (start, value) in candidates {
            active.retain(|(end, slot)| {
                if *end < start {
                    self.free[slot.kind.index()].push(slot.index);
                    false
                } else {
                    true
                }
            });
            let kind = self.kind_of(value)?;
            let index = match self.free[kind.index()].pop() {
                Some(index) => index,
                None => {
                    allocated += 1;
                    self.fresh(kind)?
                }
            };
            let slot = LocalSlot { index, kind };
            slots[value.index()] = Some(slot);
            active.push((intervals[value.index()].end, slot));
        }

        trace!(
            "📊 @{}: {} local slot(s), {} allocated",
            func.name,
            self.next,
            allocated
        );
        Ok(SlotAssignment {
            slots,
            max_locals: self.next,
            allocated,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::analyzer::Analyzer;
    use crate::ir::parser::parse_module;

    fn assign(text: &str) -> (Function, SlotAssignment) {
        let m = parse_module(text).unwrap();
        let f = m.functions[0].clone();
        let mut analyzer = Analyzer::new(&f);
        analyzer.compute_liveness(&f);
        let intervals = analyzer.live_intervals(&f);
        let slots = SlotAllocator::new(&f, &m.types)
            .assign(&intervals, |_| true)
            .unwrap();
        (f, slots)
    }

    #[test]
    fn parameters_take_the_first_slots() {
        let (_, slots) = assign(
            "define i64 @f(i32 %a, i64 %b, f64 %c) {\nentry:\n  ret i64 %b\n}\n",
        );
        assert_eq!(slots.slot(ValueId(0)).unwrap().index, 0);
        assert_eq!(
            slots.slot(ValueId(1)),
            Some(LocalSlot {
                index: 1,
                kind: SlotKind::Long
            })
        );
        assert_eq!(slots.slot(ValueId(2)).unwrap().index, 3);
        assert_eq!(slots.max_locals(), 5);
    }

    #[test]
    fn dead_slots_are_reused_within_a_kind() {
        let (_, slots) = assign(
            "define i32 @f(i32 %a) {\n\
             entry:\n  %x = add i32 %a, 1\n  %y = mul i32 %x, 2\n  %z = sub i32 %y, 3\n  ret i32 %z\n}\n",
        );
        // %a dies at %x, %x at %y, ...: two int slots suffice.
        assert_eq!(slots.max_locals(), 2);
        assert_ne!(slots.slot(ValueId(1)), slots.slot(ValueId(2)));
    }

    #[test]
    fn kinds_never_share_slots() {
        let (_, slots) = assign(
            "define f64 @f(i32 %a) {\n\
             entry:\n  %x = add i32 %a, 1\n  %d = sitofp i32 %x to f64\n  ret f64 %d\n}\n",
        );
        let d = slots.slot(ValueId(2)).unwrap();
        assert_eq!(d.kind, SlotKind::Double);
        assert!(d.index >= 1);
    }

    #[test]
    fn loop_carried_values_stay_apart() {
        let (_, slots) = assign(
            "define i32 @f(i32 %n) {\n\
             entry:\n  br label %head\n\
             head:\n  %i = phi i32 [ 0, %entry ], [ %j, %head ]\n  %j = add i32 %i, 1\n  %c = icmp slt i32 %j, %n\n  br i1 %c, label %head, label %exit\n\
             exit:\n  ret i32 %j\n}\n",
        );
        let n = slots.slot(ValueId(0)).unwrap();
        let i = slots.slot(ValueId(1)).unwrap();
        let j = slots.slot(ValueId(2)).unwrap();
        assert_ne!(n.index, i.index);
        assert_ne!(n.index, j.index);
        assert_ne!(i.index, j.index);
    }
}
