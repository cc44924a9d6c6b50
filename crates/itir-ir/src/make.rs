//! Terse constructors for building IR in passes and tests.
//!
//! Anything that converts into an [`Expr`] is accepted where an expression
//! is expected, so a plain `&str` is a symbol reference:
//! `call("plus", ["a", "b"])` builds `plus(a, b)`.

use itir_common::ty::ScalarKind;

use crate::builtins::Builtin;
use crate::ir::{Expr, ExprKind, OffsetValue, Sym};

pub fn sym(id: impl Into<String>) -> Sym {
    Sym::new(id)
}

pub fn sym_ref(id: impl Into<String>) -> Expr {
    Expr::new(ExprKind::SymRef { id: id.into() })
}

pub fn builtin(b: Builtin) -> Expr {
    sym_ref(b.name())
}

pub fn literal(value: impl Into<String>, kind: ScalarKind) -> Expr {
    Expr::new(ExprKind::Literal {
        value: value.into(),
        kind,
    })
}

pub fn int32(value: i64) -> Expr {
    literal(value.to_string(), ScalarKind::Int32)
}

pub fn int64(value: i64) -> Expr {
    literal(value.to_string(), ScalarKind::Int64)
}

pub fn float64(value: f64) -> Expr {
    literal(format!("{:?}", value), ScalarKind::Float64)
}

pub fn bool_(value: bool) -> Expr {
    literal(value.to_string(), ScalarKind::Bool)
}

pub fn offset(name: impl Into<String>) -> Expr {
    Expr::new(ExprKind::OffsetLiteral {
        value: OffsetValue::Name(name.into()),
    })
}

pub fn offset_int(value: i64) -> Expr {
    Expr::new(ExprKind::OffsetLiteral {
        value: OffsetValue::Int(value),
    })
}

pub fn axis(name: impl Into<String>) -> Expr {
    Expr::new(ExprKind::AxisLiteral { value: name.into() })
}

pub fn call<A: Into<Expr>>(fun: impl Into<Expr>, args: impl IntoIterator<Item = A>) -> Expr {
    Expr::new(ExprKind::FunCall {
        fun: Box::new(fun.into()),
        args: args.into_iter().map(Into::into).collect(),
    })
}

pub fn lambda<P: Into<String>>(params: impl IntoIterator<Item = P>, body: impl Into<Expr>) -> Expr {
    Expr::new(ExprKind::Lambda {
        params: params.into_iter().map(Sym::new).collect(),
        body: Box::new(body.into()),
    })
}

/// `(λ(name) → body)(value)`
pub fn let_(name: impl Into<String>, value: impl Into<Expr>, body: impl Into<Expr>) -> Expr {
    let name: String = name.into();
    call(lambda([name], body), [value.into()])
}

/// A single let binding several names at once.
pub fn lets(bindings: Vec<(String, Expr)>, body: impl Into<Expr>) -> Expr {
    let (names, values): (Vec<_>, Vec<_>) = bindings.into_iter().unzip();
    call(lambda(names, body), values)
}

pub fn deref(it: impl Into<Expr>) -> Expr {
    call(builtin(Builtin::Deref), [it.into()])
}

pub fn can_deref(it: impl Into<Expr>) -> Expr {
    call(builtin(Builtin::CanDeref), [it.into()])
}

/// `shift(offsets...)` without an iterator.
pub fn shift_partial(offsets: impl IntoIterator<Item = Expr>) -> Expr {
    call(builtin(Builtin::Shift), offsets)
}

/// `shift(offsets...)(it)`
pub fn shift(offsets: impl IntoIterator<Item = Expr>, it: impl Into<Expr>) -> Expr {
    call(shift_partial(offsets), [it.into()])
}

pub fn lift(stencil: impl Into<Expr>) -> Expr {
    call(builtin(Builtin::Lift), [stencil.into()])
}

/// `lift(stencil)(args...)`
pub fn applied_lift<A: Into<Expr>>(stencil: impl Into<Expr>, args: impl IntoIterator<Item = A>) -> Expr {
    call(lift(stencil), args)
}

pub fn tuple_get(index: usize, tuple: impl Into<Expr>) -> Expr {
    call(builtin(Builtin::TupleGet), [int32(index as i64), tuple.into()])
}

pub fn make_tuple<A: Into<Expr>>(elems: impl IntoIterator<Item = A>) -> Expr {
    call(builtin(Builtin::MakeTuple), elems)
}

pub fn if_(cond: impl Into<Expr>, then: impl Into<Expr>, otherwise: impl Into<Expr>) -> Expr {
    call(builtin(Builtin::If), [cond.into(), then.into(), otherwise.into()])
}

pub fn plus(a: impl Into<Expr>, b: impl Into<Expr>) -> Expr {
    call(builtin(Builtin::Plus), [a.into(), b.into()])
}

pub fn minus(a: impl Into<Expr>, b: impl Into<Expr>) -> Expr {
    call(builtin(Builtin::Minus), [a.into(), b.into()])
}

pub fn multiplies(a: impl Into<Expr>, b: impl Into<Expr>) -> Expr {
    call(builtin(Builtin::Multiplies), [a.into(), b.into()])
}

pub fn reduce(fun: impl Into<Expr>, init: impl Into<Expr>) -> Expr {
    call(builtin(Builtin::Reduce), [fun.into(), init.into()])
}

pub fn neighbors(offset_name: impl Into<String>, it: impl Into<Expr>) -> Expr {
    call(builtin(Builtin::Neighbors), [offset(offset_name), it.into()])
}

pub fn map_(fun: impl Into<Expr>) -> Expr {
    call(builtin(Builtin::Map), [fun.into()])
}

pub fn list_get(index: impl Into<Expr>, list: impl Into<Expr>) -> Expr {
    call(builtin(Builtin::ListGet), [index.into(), list.into()])
}

pub fn make_const_list(value: impl Into<Expr>) -> Expr {
    call(builtin(Builtin::MakeConstList), [value.into()])
}

pub fn cast_(value: impl Into<Expr>, kind: ScalarKind) -> Expr {
    call(builtin(Builtin::Cast), [value.into(), sym_ref(kind.name())])
}

/// `as_fieldop(stencil[, domain])`
pub fn as_fieldop(stencil: impl Into<Expr>, domain: Option<Expr>) -> Expr {
    let mut args = vec![stencil.into()];
    args.extend(domain);
    call(builtin(Builtin::AsFieldop), args)
}

pub fn named_range(dim: impl Into<String>, start: impl Into<Expr>, stop: impl Into<Expr>) -> Expr {
    call(builtin(Builtin::NamedRange), [axis(dim), start.into(), stop.into()])
}

pub fn cartesian_domain(ranges: impl IntoIterator<Item = Expr>) -> Expr {
    call(builtin(Builtin::CartesianDomain), ranges)
}

pub fn unstructured_domain(ranges: impl IntoIterator<Item = Expr>) -> Expr {
    call(builtin(Builtin::UnstructuredDomain), ranges)
}
