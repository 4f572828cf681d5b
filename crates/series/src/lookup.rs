//! Directional key lookup.

/// Direction of a key lookup relative to the searched key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lookup {
    /// Exact match.
    EQ,
    /// Greatest key strictly less than the searched key.
    LT,
    /// Greatest key less than or equal to the searched key.
    LE,
    /// Smallest key greater than or equal to the searched key.
    GE,
    /// Smallest key strictly greater than the searched key.
    GT,
}

impl Lookup {
    /// Returns true if an exact match satisfies the lookup.
    pub fn accepts_equal(self) -> bool {
        matches!(self, Lookup::EQ | Lookup::LE | Lookup::GE)
    }

    /// Returns true if the lookup resolves towards larger keys.
    pub fn is_forward(self) -> bool {
        matches!(self, Lookup::GE | Lookup::GT)
    }

    /// Returns true if the lookup resolves towards smaller keys.
    pub fn is_backward(self) -> bool {
        matches!(self, Lookup::LE | Lookup::LT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_predicates() {
        assert!(Lookup::EQ.accepts_equal());
        assert!(Lookup::GE.accepts_equal());
        assert!(!Lookup::GT.accepts_equal());
        assert!(Lookup::GT.is_forward());
        assert!(Lookup::LT.is_backward());
        assert!(!Lookup::EQ.is_forward() && !Lookup::EQ.is_backward());
    }
}
