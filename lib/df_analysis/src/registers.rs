//! Set of live registers, tracked at sub-register granularity.

use df_disasm::registers::{RegId, Register};
use std::collections::BTreeSet;
use std::fmt;

/// Registers whose producing writes are still being looked for.
///
/// A register is always inserted and removed together with its direct
/// sub-registers, so that partial writes and partial reads match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegisterReferenceSet {
    ids: BTreeSet<RegId>,
}

impl fmt::Display for RegisterReferenceSet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{{")?;
        for (i, id) in self.ids.iter().enumerate() {
            if i == 0 {
                write!(f, "{id}")?;
            } else {
                write!(f, ", {id}")?;
            }
        }
        write!(f, "}}")
    }
}

impl RegisterReferenceSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_references(&mut self, reg: &Register) {
        self.ids.insert(reg.id());
        self.ids.extend(reg.sub_registers());
    }

    pub fn remove_references(&mut self, reg: &Register) {
        self.ids.remove(&reg.id());
        for sub in reg.sub_registers() {
            self.ids.remove(&sub);
        }
    }

    /// Removes a single identifier, for registers without descriptor.
    pub fn remove_id(&mut self, id: RegId) {
        self.ids.remove(&id);
    }

    /// Checks if the register, or any of its sub-registers, is live.
    #[must_use]
    pub fn has_reference(&self, reg: &Register) -> bool {
        self.ids.contains(&reg.id()) || reg.sub_registers().any(|sub| self.ids.contains(&sub))
    }

    #[inline]
    #[must_use]
    pub fn contains(&self, id: RegId) -> bool {
        self.ids.contains(&id)
    }

    pub fn ids(&self) -> impl Iterator<Item = RegId> + '_ {
        self.ids.iter().copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}
