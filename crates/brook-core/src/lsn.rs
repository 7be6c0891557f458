use serde::{Deserialize, Serialize};
use std::fmt;

/// Log Sequence Number - strictly increasing per stream, never reused.
///
/// LSNs start at 1; [`Lsn::ZERO`] means "nothing written yet".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Lsn(u64);

impl Lsn {
    /// Zero LSN (start of log)
    pub const ZERO: Self = Self(0);

    /// Create a new LSN
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// The LSN following this one, or `None` on overflow.
    pub fn checked_next(&self) -> Option<Self> {
        self.0.checked_add(1).map(Self)
    }

    /// Get the raw value
    pub const fn value(&self) -> u64 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LSN({})", self.0)
    }
}

impl From<u64> for Lsn {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<Lsn> for u64 {
    fn from(lsn: Lsn) -> Self {
        lsn.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lsn_ordering() {
        let a = Lsn::new(1);
        let b = a.checked_next().unwrap();
        assert!(a < b);
        assert_eq!(b.value(), 2);
        assert!(Lsn::ZERO.is_zero());
    }

    #[test]
    fn test_lsn_overflow() {
        assert_eq!(Lsn::new(u64::MAX).checked_next(), None);
    }

    #[test]
    fn test_lsn_serializes_as_integer() {
        assert_eq!(serde_json::to_string(&Lsn::new(7)).unwrap(), "7");
    }
}
