//! Language-agnostic expression IR for filter predicates and queries.

mod dynamic;
mod eval;

pub use dynamic::expr_from_json;
pub use eval::{compile, compile_namespaced, Compiled, NamespacedCompiled};

use crate::error::CollectionError;
use crate::Value;

///
/// Expr
///
/// Immutable tagged tree. `PropRef` holds a dotted path (`["address",
/// "city"]`); an empty path is rejected at compile time, not at
/// construction, so `Expr` itself stays a plain data type with no
/// fallible constructors — an empty ref path is a compilation error,
/// not a construction-time one.
///
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Value(Value),
    PropRef(Vec<String>),
    Func(FuncName, Vec<Expr>),
    Aggregate(AggName, Vec<Expr>),
    CollectionRef,
    QueryRef,
}

impl Expr {
    #[must_use]
    pub fn prop(path: &[&str]) -> Self {
        Self::PropRef(path.iter().map(|s| (*s).to_string()).collect())
    }

    #[must_use]
    pub fn val(value: impl Into<Value>) -> Self {
        Self::Value(value.into())
    }

    #[must_use]
    pub fn call(name: FuncName, args: Vec<Expr>) -> Self {
        Self::Func(name, args)
    }
}

///
/// FuncName
///
/// Closed set of function names the evaluator supports: comparison,
/// boolean, array, string, math, and null-check families.
///
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum FuncName {
    Eq,
    Gt,
    Gte,
    Lt,
    Lte,
    And,
    Or,
    Not,
    In,
    Like,
    ILike,
    Upper,
    Lower,
    Length,
    Concat,
    Coalesce,
    Add,
    Subtract,
    Multiply,
    Divide,
    IsNull,
    IsUndefined,
}

impl FuncName {
    /// Parse a function name received over a dynamic (JSON) wire
    /// format. Unknown names are a compile-time error, not a panic —
    /// the IR is meant to be produced by untrusted client code.
    pub fn parse(name: &str) -> Result<Self, CollectionError> {
        Ok(match name {
            "eq" => Self::Eq,
            "gt" => Self::Gt,
            "gte" => Self::Gte,
            "lt" => Self::Lt,
            "lte" => Self::Lte,
            "and" => Self::And,
            "or" => Self::Or,
            "not" => Self::Not,
            "in" => Self::In,
            "like" => Self::Like,
            "ilike" => Self::ILike,
            "upper" => Self::Upper,
            "lower" => Self::Lower,
            "length" => Self::Length,
            "concat" => Self::Concat,
            "coalesce" => Self::Coalesce,
            "add" => Self::Add,
            "subtract" => Self::Subtract,
            "multiply" => Self::Multiply,
            "divide" => Self::Divide,
            "isNull" => Self::IsNull,
            "isUndefined" => Self::IsUndefined,
            other => return Err(CollectionError::UnknownFunction(other.to_string())),
        })
    }

    /// True for the comparison and `in` ops the index planner knows
    /// how to satisfy from a B-tree index.
    #[must_use]
    pub const fn is_index_comparable(self) -> bool {
        matches!(
            self,
            Self::Eq | Self::Gt | Self::Gte | Self::Lt | Self::Lte | Self::In
        )
    }

    /// Flip a comparison operator, used when the planner sees
    /// `(value, ref)` instead of `(ref, value)`.
    #[must_use]
    pub const fn flipped(self) -> Self {
        match self {
            Self::Gt => Self::Lt,
            Self::Gte => Self::Lte,
            Self::Lt => Self::Gt,
            Self::Lte => Self::Gte,
            other => other,
        }
    }
}

///
/// AggName
///
/// Aggregates exist at the IR level; the evaluator only supports
/// per-row use. Group-by evaluation is delegated to a query
/// execution layer outside this crate's scope, so this is kept as an
/// open name rather than a closed enum like `FuncName`.
///
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum AggName {
    Count,
    Sum,
    Avg,
    Min,
    Max,
    Custom(String),
}
