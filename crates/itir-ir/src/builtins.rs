//! The fixed set of builtin functions every program implicitly declares.
//!
//! The enum is the single registry: names round-trip through `strum`, and
//! the category predicates below replace ad-hoc name sets. Type rules and
//! constant folding dispatch on these variants.

use strum::{EnumIter, EnumString, IntoEnumIterator, IntoStaticStr};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, IntoStaticStr, EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum Builtin {
    // ── Structural ─────────────────────────────────────────────────────
    TupleGet,
    #[strum(serialize = "cast_")]
    Cast,
    CartesianDomain,
    UnstructuredDomain,
    MakeTuple,
    Shift,
    Neighbors,
    NamedRange,
    ListGet,
    #[strum(serialize = "map_")]
    Map,
    MakeConstList,
    Lift,
    Reduce,
    Deref,
    CanDeref,
    Scan,
    #[strum(serialize = "if_")]
    If,
    AsFieldop,

    // ── Unary math ─────────────────────────────────────────────────────
    Abs,
    #[strum(serialize = "not_")]
    Not,
    Sin,
    Cos,
    Tan,
    Arcsin,
    Arccos,
    Arctan,
    Sinh,
    Cosh,
    Tanh,
    Arcsinh,
    Arccosh,
    Arctanh,
    Sqrt,
    Exp,
    Log,
    Gamma,
    Cbrt,
    Floor,
    Ceil,
    Trunc,
    Isfinite,
    Isinf,
    Isnan,

    // ── Binary math ────────────────────────────────────────────────────
    Minimum,
    Maximum,
    Fmod,
    Plus,
    Minus,
    Multiplies,
    Divides,
    Mod,
    Floordiv,
    Power,

    // ── Comparison ─────────────────────────────────────────────────────
    Eq,
    Less,
    Greater,
    GreaterEqual,
    LessEqual,
    NotEq,

    // ── Binary logical ─────────────────────────────────────────────────
    #[strum(serialize = "and_")]
    And,
    #[strum(serialize = "or_")]
    Or,
    #[strum(serialize = "xor_")]
    Xor,

    // ── Type constructors ──────────────────────────────────────────────
    #[strum(serialize = "int32")]
    Int32,
    #[strum(serialize = "int64")]
    Int64,
    #[strum(serialize = "float32")]
    Float32,
    #[strum(serialize = "float64")]
    Float64,
    #[strum(serialize = "bool")]
    Bool,
}

impl Builtin {
    pub fn from_name(name: &str) -> Option<Builtin> {
        name.parse().ok()
    }

    pub fn name(self) -> &'static str {
        self.into()
    }

    pub fn all() -> impl Iterator<Item = Builtin> {
        Builtin::iter()
    }

    pub fn is_unary_math_number(self) -> bool {
        matches!(self, Builtin::Abs)
    }

    pub fn is_unary_logical(self) -> bool {
        matches!(self, Builtin::Not)
    }

    pub fn is_unary_math_fp(self) -> bool {
        use Builtin::*;
        matches!(
            self,
            Sin | Cos
                | Tan
                | Arcsin
                | Arccos
                | Arctan
                | Sinh
                | Cosh
                | Tanh
                | Arcsinh
                | Arccosh
                | Arctanh
                | Sqrt
                | Exp
                | Log
                | Gamma
                | Cbrt
                | Floor
                | Ceil
                | Trunc
        )
    }

    pub fn is_unary_math_fp_predicate(self) -> bool {
        matches!(self, Builtin::Isfinite | Builtin::Isinf | Builtin::Isnan)
    }

    pub fn is_binary_math_number(self) -> bool {
        use Builtin::*;
        matches!(
            self,
            Minimum | Maximum | Fmod | Plus | Minus | Multiplies | Divides | Mod | Floordiv
        )
    }

    pub fn is_comparison(self) -> bool {
        use Builtin::*;
        matches!(self, Eq | Less | Greater | GreaterEqual | LessEqual | NotEq)
    }

    pub fn is_binary_logical(self) -> bool {
        matches!(self, Builtin::And | Builtin::Or | Builtin::Xor)
    }

    /// Pointwise arithmetic and logic: everything constant folding may evaluate.
    pub fn is_arithmetic(self) -> bool {
        self.is_unary_math_number()
            || self.is_unary_logical()
            || self.is_unary_math_fp()
            || self.is_unary_math_fp_predicate()
            || self.is_binary_math_number()
            || self == Builtin::Power
            || self.is_comparison()
            || self.is_binary_logical()
    }

    /// The scalar type a type-constructor builtin names.
    pub fn as_scalar_kind(self) -> Option<itir_common::ty::ScalarKind> {
        itir_common::ty::ScalarKind::from_name(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip() {
        for builtin in Builtin::all() {
            assert_eq!(Builtin::from_name(builtin.name()), Some(builtin));
        }
    }

    #[test]
    fn underscore_suffixed_names() {
        assert_eq!(Builtin::from_name("if_"), Some(Builtin::If));
        assert_eq!(Builtin::from_name("map_"), Some(Builtin::Map));
        assert_eq!(Builtin::from_name("cast_"), Some(Builtin::Cast));
        assert_eq!(Builtin::from_name("and_"), Some(Builtin::And));
        assert_eq!(Builtin::from_name("if"), None);
        assert_eq!(Builtin::GreaterEqual.name(), "greater_equal");
        assert_eq!(Builtin::AsFieldop.name(), "as_fieldop");
        assert_eq!(Builtin::MakeConstList.name(), "make_const_list");
    }

    #[test]
    fn categories() {
        assert!(Builtin::Plus.is_arithmetic());
        assert!(Builtin::Isnan.is_arithmetic());
        assert!(!Builtin::Deref.is_arithmetic());
        assert!(!Builtin::Int32.is_arithmetic());
        assert_eq!(
            Builtin::Float64.as_scalar_kind(),
            Some(itir_common::ty::ScalarKind::Float64)
        );
        assert_eq!(Builtin::Plus.as_scalar_kind(), None);
    }
}
