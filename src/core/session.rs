// This module provides arena-based translation session management using the bumpalo
// crate. CompilationSession is the per-request context: it borrows the caller's arena,
// interns strings (class, method and descriptor names shared between the code generator
// and the constant pool) into it and gathers translation statistics. Mutation goes through RefCell so the
// session can be shared by reference across the pipeline stages of one request; it is
// deliberately !Sync, so concurrent requests each create their own session.
// SessionStats counts translated functions, emitted bytecode size, instruction
// selections, phi copies, slot allocations and operand-stack folds.

//! Arena-based translation session.

use bumpalo::Bump;
use hashbrown::HashMap;
use std::cell::RefCell;
use std::fmt;

/// Per-request translation context.
pub struct CompilationSession<'arena> {
    arena: &'arena Bump,
    stats: RefCell<SessionStats>,
    interned_strings: RefCell<HashMap<String, &'arena str>>,
}

impl<'arena> CompilationSession<'arena> {
    pub fn new(arena: &'arena Bump) -> Self {
        Self {
            arena,
            stats: RefCell::new(SessionStats::default()),
            interned_strings: RefCell::new(HashMap::new()),
        }
    }

    /// Intern a string in the arena.
    pub fn intern_str(&self, s: &str) -> &'arena str {
        let mut strings = self.interned_strings.borrow_mut();
        if let Some(&interned) = strings.get(s) {
            return interned;
        }
        let interned = self.arena.alloc_str(s);
        strings.insert(s.to_string(), interned);
        interned
    }

    /// Record that a method was emitted for `name`.
    pub fn record_function_compiled(&self, name: &str, code_size: usize) {
        let mut stats = self.stats.borrow_mut();
        stats.functions_compiled += 1;
        stats.total_code_size += code_size;
        if stats.largest_function_size < code_size {
            stats.largest_function_size = code_size;
            stats.largest_function_name = name.to_string();
        }
    }

    pub fn record_instruction_compiled(&self, opcode: &str) {
        let mut stats = self.stats.borrow_mut();
        stats.instructions_compiled += 1;
        *stats
            .instruction_counts
            .entry(opcode.to_string())
            .or_insert(0) += 1;
    }

    pub fn record_phi_resolved(&self) {
        self.stats.borrow_mut().phi_copies += 1;
    }

    pub fn record_slot_allocated(&self) {
        self.stats.borrow_mut().slots_allocated += 1;
    }

    pub fn record_stack_fold(&self) {
        self.stats.borrow_mut().stack_folds += 1;
    }

    pub fn record_call_site(&self, target: &str) {
        self.stats.borrow_mut().total_calls += 1;
        log::trace!("📊 Call site recorded: {}", target);
    }

    pub fn record_pass_run(&self, changed: bool) {
        let mut stats = self.stats.borrow_mut();
        stats.passes_run += 1;
        if changed {
            stats.passes_changed += 1;
        }
    }

    pub fn stats(&self) -> SessionStats {
        self.stats.borrow().clone()
    }
}

/// Translation statistics.
#[derive(Debug, Default, Clone)]
pub struct SessionStats {
    pub functions_compiled: usize,
    /// Total bytecode size (bytes).
    pub total_code_size: usize,
    pub instructions_compiled: usize,
    pub instruction_counts: HashMap<String, usize>,
    pub largest_function_size: usize,
    pub largest_function_name: String,
    pub phi_copies: usize,
    pub slots_allocated: usize,
    /// Values kept on the operand stack instead of a local slot.
    pub stack_folds: usize,
    pub total_calls: usize,
    pub passes_run: usize,
    pub passes_changed: usize,
}

impl fmt::Display for SessionStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Translation Session Statistics:")?;
        writeln!(f, "  Functions compiled: {}", self.functions_compiled)?;
        writeln!(f, "  Instructions compiled: {}", self.instructions_compiled)?;
        writeln!(f, "  Total code size: {} bytes", self.total_code_size)?;
        writeln!(f, "  Phi copies: {}", self.phi_copies)?;
        writeln!(f, "  Local slots allocated: {}", self.slots_allocated)?;
        writeln!(f, "  Stack folds: {}", self.stack_folds)?;
        writeln!(f, "  Function calls compiled: {}", self.total_calls)?;
        writeln!(
            f,
            "  Passes run: {} ({} changed the module)",
            self.passes_run, self.passes_changed
        )?;

        if !self.largest_function_name.is_empty() {
            writeln!(
                f,
                "  Largest function: {} ({} bytes)",
                self.largest_function_name, self.largest_function_size
            )?;
        }

        if !self.instruction_counts.is_empty() {
            writeln!(f, "  Instruction breakdown:")?;
            let mut sorted: Vec<_> = self.instruction_counts.iter().collect();
            sorted.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
            for (opcode, count) in sorted.into_iter().take(10) {
                writeln!(f, "    {}: {}", opcode, count)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_interning() {
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);

        let s1 = session.intern_str("java/lang/Object");
        let s2 = session.intern_str("java/lang/Object");
        let s3 = session.intern_str("GeneratedClass");

        assert_eq!(s1.as_ptr(), s2.as_ptr());
        assert_ne!(s1.as_ptr(), s3.as_ptr());
    }

    #[test]
    fn test_session_statistics() {
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);

        session.record_function_compiled("add", 4);
        session.record_function_compiled("loop", 40);
        session.record_instruction_compiled("add");
        session.record_instruction_compiled("icmp");
        session.record_instruction_compiled("add");
        session.record_phi_resolved();
        session.record_slot_allocated();
        session.record_pass_run(true);
        session.record_pass_run(false);

        let stats = session.stats();
        assert_eq!(stats.functions_compiled, 2);
        assert_eq!(stats.total_code_size, 44);
        assert_eq!(stats.largest_function_name, "loop");
        assert_eq!(stats.instruction_counts["add"], 2);
        assert_eq!(stats.phi_copies, 1);
        assert_eq!(stats.passes_run, 2);
        assert_eq!(stats.passes_changed, 1);

        let output = format!("{}", stats);
        assert!(output.contains("Functions compiled: 2"));
        assert!(output.contains("loop (40 bytes)"));
    }
}
