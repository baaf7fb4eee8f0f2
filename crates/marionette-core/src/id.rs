//! Bone identifier shared between hosts and the solver

use serde::{Deserialize, Serialize};

/// Identifier of a bone inside a host skeleton.
///
/// Hosts that index bones with signed integers map their "absent" sentinel
/// to `Option<BoneId>` at the trait boundary; the sentinel value itself
/// never enters the solver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BoneId(u32);

impl BoneId {
    /// Create an ID from a raw host index
    #[must_use]
    pub const fn from_raw(value: u32) -> Self {
        Self(value)
    }

    /// Get the raw host index
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Convert to a `usize` suitable for indexing host-side arrays
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl From<u32> for BoneId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for BoneId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Bone({})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_round_trip() {
        let id = BoneId::from_raw(42);
        assert_eq!(id.raw(), 42);
        assert_eq!(id.index(), 42);
    }

    #[test]
    fn serde_round_trip() {
        let id = BoneId::from_raw(7);
        let json = serde_json::to_string(&id).unwrap();
        let back: BoneId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }
}
