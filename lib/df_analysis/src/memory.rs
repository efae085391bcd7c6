//! Live memory references.

use df_disasm::operands::Operand;
use std::fmt;

/// Memory operands whose producing writes are still being looked for.
///
/// Entries are compared with the operands overlap predicate rather than
/// by equality: two different encodings of the same bytes are a single
/// live reference.
#[derive(Debug, Clone, Default)]
pub struct MemoryReferenceSet {
    refs: Vec<Operand>,
}

impl fmt::Display for MemoryReferenceSet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[")?;
        for (i, mem) in self.refs.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{mem}")?;
        }
        write!(f, "]")
    }
}

impl MemoryReferenceSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a reference without checking for overlaps.
    pub fn push(&mut self, mem: Operand) {
        self.refs.push(mem);
    }

    /// Appends a reference unless an overlapping one is already live.
    pub fn add_if_absent(&mut self, mem: &Operand) {
        if !self.overlaps(mem) {
            self.refs.push(mem.clone());
        }
    }

    /// Removes the first live reference overlapping `mem`.
    pub fn remove_overlapping(&mut self, mem: &Operand) {
        if let Some(pos) = self.refs.iter().position(|r| mem.references_same_memory(r)) {
            self.refs.remove(pos);
        }
    }

    #[must_use]
    pub fn overlaps(&self, mem: &Operand) -> bool {
        self.refs.iter().any(|r| mem.references_same_memory(r))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Operand> {
        self.refs.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.refs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }
}
