//! Value types for the expression language.
//!
//! Every expression and variable has one of these types. The numeric types
//! are a scalar (`Fp(1)`) and a fixed-width vector (`Fp(3)` in practice);
//! `Any` and `Numeric` only ever appear as *requested* types during the
//! prep pass, never as the computed type of a node.

use std::fmt;

/// A 3-wide evaluation result.
///
/// Scalar producers fill only lane 0; the other lanes are unspecified until
/// a consumer broadcasts them.
pub type Vec3 = [f64; 3];

/// Zero vector, the result of statement nodes and poisoned reads.
pub const ZERO: Vec3 = [0.0; 3];

/// Type of an expression, variable, or function result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExprType {
    /// Poisoned type; propagates through every enclosing node.
    Error,
    /// Statement-like nodes that produce no value.
    None,
    /// Caller has no preference (prep requests only).
    Any,
    /// Either scalar or vector (prep requests only).
    Numeric,
    /// Fixed-width numeric value; `Fp(1)` is the scalar type.
    Fp(u8),
    /// String literal, usable only as a function argument.
    Str,
}

impl ExprType {
    /// The scalar numeric type.
    pub const FP1: ExprType = ExprType::Fp(1);
    /// The 3-wide vector type.
    pub const FP3: ExprType = ExprType::Fp(3);

    /// True unless the type is poisoned.
    pub fn is_valid(self) -> bool {
        self != ExprType::Error
    }

    /// Subtype check against a requested type.
    ///
    /// `Error` is a subtype of nothing; everything valid is a subtype of
    /// `Any`; the numeric types are subtypes of `Numeric`. A scalar lifts
    /// to any vector width (broadcasting makes the widening lossless), but
    /// a vector never narrows to `FP1`.
    pub fn isa(self, wanted: ExprType) -> bool {
        if self == ExprType::Error {
            return false;
        }
        match wanted {
            ExprType::Any => true,
            ExprType::Numeric => matches!(self, ExprType::Fp(_)),
            ExprType::Fp(w) => matches!(self, ExprType::Fp(n) if n == w || n == 1),
            _ => self == wanted,
        }
    }

    /// True iff both types are numeric and combinable under broadcasting:
    /// equal widths, or one of the two is scalar.
    pub fn compatible_num(self, other: ExprType) -> bool {
        match (self, other) {
            (ExprType::Fp(a), ExprType::Fp(b)) => a == b || a == 1 || b == 1,
            _ => false,
        }
    }

    /// True only for the scalar numeric type.
    pub fn is_fp1(self) -> bool {
        self == ExprType::FP1
    }

    /// True for `Fp(n)` with more than one lane.
    pub fn is_vec(self) -> bool {
        matches!(self, ExprType::Fp(n) if n > 1)
    }
}

impl fmt::Display for ExprType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExprType::Error => write!(f, "Error"),
            ExprType::None => write!(f, "None"),
            ExprType::Any => write!(f, "Any"),
            ExprType::Numeric => write!(f, "Numeric"),
            ExprType::Fp(1) => write!(f, "FP1"),
            ExprType::Fp(n) => write!(f, "FPN({n})"),
            ExprType::Str => write!(f, "String"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_is_never_a_subtype() {
        for wanted in [
            ExprType::Error,
            ExprType::None,
            ExprType::Any,
            ExprType::Numeric,
            ExprType::FP1,
            ExprType::FP3,
            ExprType::Str,
        ] {
            assert!(!ExprType::Error.isa(wanted));
        }
    }

    #[test]
    fn numeric_subtyping() {
        assert!(ExprType::FP1.isa(ExprType::Numeric));
        assert!(ExprType::FP3.isa(ExprType::Numeric));
        assert!(ExprType::FP1.isa(ExprType::Any));
        assert!(!ExprType::Str.isa(ExprType::Numeric));
        assert!(!ExprType::None.isa(ExprType::Numeric));
        assert!(ExprType::None.isa(ExprType::Any));
    }

    #[test]
    fn scalars_lift_but_vectors_never_narrow() {
        assert!(ExprType::FP1.isa(ExprType::FP3));
        assert!(ExprType::FP3.isa(ExprType::FP3));
        assert!(!ExprType::FP3.isa(ExprType::FP1));
        assert!(ExprType::FP1.isa(ExprType::FP1));
    }

    #[test]
    fn broadcast_compatibility() {
        assert!(ExprType::FP1.compatible_num(ExprType::FP1));
        assert!(ExprType::FP3.compatible_num(ExprType::FP3));
        assert!(ExprType::FP1.compatible_num(ExprType::FP3));
        assert!(ExprType::FP3.compatible_num(ExprType::FP1));
        assert!(!ExprType::Str.compatible_num(ExprType::FP1));
        assert!(!ExprType::None.compatible_num(ExprType::None));
    }

    #[test]
    fn display_names_match_diagnostics() {
        assert_eq!(ExprType::FP1.to_string(), "FP1");
        assert_eq!(ExprType::FP3.to_string(), "FPN(3)");
        assert_eq!(ExprType::Str.to_string(), "String");
        assert_eq!(ExprType::Error.to_string(), "Error");
    }
}
