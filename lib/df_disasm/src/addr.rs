//! Code and data address representation.

use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct Addr(pub u64);

impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.pad(&format!("{:#x}", self.0))
    }
}

impl From<u64> for Addr {
    fn from(a: u64) -> Self {
        Self(a)
    }
}

impl Addr {
    #[inline]
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    pub const fn from_offset(base_addr: Self, offset: i64) -> Self {
        Self(base_addr.0.wrapping_add_signed(offset))
    }

    pub const fn offset(self, offset: i64) -> Self {
        Self::from_offset(self, offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display() {
        assert_eq!(Addr(0x1f).to_string(), "0x1f");
        assert_eq!(format!("{:>6}", Addr(0x10)), "  0x10");
        assert_eq!(Addr(0x10).offset(-0x8), Addr(0x8));
    }
}
