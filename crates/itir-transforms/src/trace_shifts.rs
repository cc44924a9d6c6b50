//! Abstract interpretation of stencils that records, per input, every
//! sequence of shift offsets the input is dereferenced at.
//!
//! Iterators are replaced by tracers that remember the offsets applied to
//! them; dereferencing a tracer registers its offsets. Values are opaque.
//! Reductions and `neighbors` access every neighbor at once, which is
//! recorded as [`TracedOffset::AllNeighbors`].

use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use rustc_hash::FxHashMap;

use itir_ir::builtins::Builtin;
use itir_ir::ir::{Expr, ExprKind, OffsetValue, StencilClosure};

use crate::error::PipelineError;

/// One element of a traced shift sequence.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TracedOffset {
    Offset(OffsetValue),
    AllNeighbors,
}

impl fmt::Display for TracedOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TracedOffset::Offset(value) => write!(f, "{}ₒ", value),
            TracedOffset::AllNeighbors => f.write_str("*"),
        }
    }
}

/// Input name → every offset sequence it is dereferenced at, in
/// evaluation order.
pub type ShiftTrace = BTreeMap<String, Vec<Vec<TracedOffset>>>;

/// Trace the shifts applied to each input of `closure`.
pub fn trace_shifts(closure: &StencilClosure) -> Result<ShiftTrace, PipelineError> {
    let names: Vec<String> = closure.inputs.iter().map(ToString::to_string).collect();
    trace(&closure.stencil, names)
}

/// Trace a stencil applied to `arity` iterator arguments; the result is
/// indexed by argument position.
pub fn trace_stencil(stencil: &Expr, arity: usize) -> Result<Vec<Vec<Vec<TracedOffset>>>, PipelineError> {
    let names: Vec<String> = (0..arity).map(|i| i.to_string()).collect();
    let mut trace = trace(stencil, names.clone())?;
    Ok(names
        .iter()
        .map(|name| trace.remove(name).unwrap_or_default())
        .collect())
}

fn trace(stencil: &Expr, inputs: Vec<String>) -> Result<ShiftTrace, PipelineError> {
    let mut tracer = Tracer::default();
    let mut args = Vec::with_capacity(inputs.len());
    for input in inputs {
        tracer.shifts.entry(input.clone()).or_default();
        args.push(Traced::Iter(It::Input {
            input,
            offsets: Vec::new(),
        }));
    }
    let fun = tracer.visit(stencil, &Ctx::default())?;
    let result = tracer.apply(fun, args)?;
    if !result.is_value() {
        return Err(PipelineError::Invariant(format!(
            "stencil `{}` does not return values",
            stencil
        )));
    }
    Ok(tracer.shifts)
}

// ── Abstract values ────────────────────────────────────────────────────

type Ctx<'a> = Rc<FxHashMap<String, Traced<'a>>>;

#[derive(Clone, Debug)]
enum Traced<'a> {
    /// Any value, including the result of an unknown function.
    Value,
    /// A type-constructor builtin passed as an argument (as in `cast_`).
    Type,
    Offset(TracedOffset),
    Iter(It<'a>),
    Tuple(Vec<Traced<'a>>),
    Fn(Callable<'a>),
}

impl Traced<'_> {
    fn is_value(&self) -> bool {
        match self {
            Traced::Value => true,
            Traced::Tuple(elems) => elems.iter().all(Traced::is_value),
            _ => false,
        }
    }
}

#[derive(Clone, Debug)]
enum It<'a> {
    Input {
        input: String,
        offsets: Vec<TracedOffset>,
    },
    /// Either of several iterators, as produced by `if_`.
    Combined(Vec<It<'a>>),
    AppliedLift {
        stencil: Box<Callable<'a>>,
        its: Vec<It<'a>>,
    },
}

impl<'a> It<'a> {
    fn shifted(self, by: &[TracedOffset]) -> It<'a> {
        match self {
            It::Input { input, mut offsets } => {
                offsets.extend_from_slice(by);
                It::Input { input, offsets }
            }
            It::Combined(its) => It::Combined(its.into_iter().map(|it| it.shifted(by)).collect()),
            It::AppliedLift { stencil, its } => It::AppliedLift {
                stencil,
                its: its.into_iter().map(|it| it.shifted(by)).collect(),
            },
        }
    }
}

#[derive(Clone, Debug)]
enum Callable<'a> {
    Lambda {
        params: Vec<String>,
        body: &'a Expr,
        ctx: Ctx<'a>,
    },
    Builtin(Builtin),
    Shift(Vec<TracedOffset>),
    Lift(Box<Callable<'a>>),
    Scan {
        fun: Box<Callable<'a>>,
        init: Box<Traced<'a>>,
    },
    /// Combines values into a value. With `over_lists`, iterator arguments
    /// are read at all neighbors.
    Combine { over_lists: bool },
}

fn invariant(message: impl Into<String>) -> PipelineError {
    PipelineError::Invariant(message.into())
}

// ── Interpreter ────────────────────────────────────────────────────────

#[derive(Default)]
struct Tracer {
    shifts: ShiftTrace,
}

impl Tracer {
    fn visit<'a>(&mut self, expr: &'a Expr, ctx: &Ctx<'a>) -> Result<Traced<'a>, PipelineError> {
        match &expr.kind {
            ExprKind::Literal { .. } | ExprKind::AxisLiteral { .. } => Ok(Traced::Value),
            ExprKind::OffsetLiteral { value } => Ok(Traced::Offset(TracedOffset::Offset(value.clone()))),
            ExprKind::SymRef { id } => Ok(match ctx.get(id) {
                Some(value) => value.clone(),
                None => Self::builtin_value(id),
            }),
            ExprKind::Lambda { params, body } => Ok(Traced::Fn(Callable::Lambda {
                params: params.iter().map(|p| p.id.clone()).collect(),
                body,
                ctx: ctx.clone(),
            })),
            ExprKind::FunCall { fun, args } => {
                let is_tuple_get = fun
                    .as_sym_ref()
                    .is_some_and(|id| !ctx.contains_key(id) && id == Builtin::TupleGet.name());
                if is_tuple_get {
                    return self.tuple_get(expr, args, ctx);
                }
                let fun = self.visit(fun, ctx)?;
                let args = args
                    .iter()
                    .map(|arg| self.visit(arg, ctx))
                    .collect::<Result<Vec<_>, _>>()?;
                self.apply(fun, args)
            }
        }
    }

    fn builtin_value<'a>(id: &str) -> Traced<'a> {
        match Builtin::from_name(id) {
            Some(b) if b.as_scalar_kind().is_some() => Traced::Type,
            Some(
                b @ (Builtin::Deref
                | Builtin::CanDeref
                | Builtin::Shift
                | Builtin::Lift
                | Builtin::Scan
                | Builtin::Reduce
                | Builtin::Neighbors
                | Builtin::Map
                | Builtin::If
                | Builtin::MakeTuple),
            ) => Traced::Fn(Callable::Builtin(b)),
            _ => Traced::Value,
        }
    }

    fn tuple_get<'a>(
        &mut self,
        site: &'a Expr,
        args: &'a [Expr],
        ctx: &Ctx<'a>,
    ) -> Result<Traced<'a>, PipelineError> {
        let [index, tuple] = args else {
            return Err(invariant(format!("malformed `{}`", site)));
        };
        let index: usize = index
            .as_literal()
            .and_then(|(value, _)| value.parse().ok())
            .ok_or_else(|| invariant(format!("non-literal tuple index in `{}`", site)))?;
        match self.visit(tuple, ctx)? {
            Traced::Tuple(mut elems) if index < elems.len() => Ok(elems.swap_remove(index)),
            Traced::Value => Ok(Traced::Value),
            _ => Err(invariant(format!("`{}` does not index a tuple value", site))),
        }
    }

    fn apply<'a>(&mut self, fun: Traced<'a>, args: Vec<Traced<'a>>) -> Result<Traced<'a>, PipelineError> {
        match fun {
            Traced::Fn(callable) => self.call(callable, args),
            Traced::Value => self.combine(false, args),
            other => Err(invariant(format!("cannot call {:?}", other))),
        }
    }

    fn call<'a>(&mut self, callable: Callable<'a>, args: Vec<Traced<'a>>) -> Result<Traced<'a>, PipelineError> {
        match callable {
            Callable::Lambda { params, body, ctx } => {
                if params.len() != args.len() {
                    return Err(invariant(format!(
                        "lambda with {} parameters applied to {} arguments",
                        params.len(),
                        args.len()
                    )));
                }
                let mut inner = (*ctx).clone();
                inner.extend(params.into_iter().zip(args));
                self.visit(body, &Rc::new(inner))
            }
            Callable::Builtin(b) => self.call_builtin(b, args),
            Callable::Shift(offsets) => match <[Traced; 1]>::try_from(args) {
                Ok([Traced::Iter(it)]) => Ok(Traced::Iter(it.shifted(&offsets))),
                _ => Err(invariant("`shift` expects a single iterator")),
            },
            Callable::Lift(stencil) => {
                let its = args
                    .into_iter()
                    .map(|arg| match arg {
                        Traced::Iter(it) => Ok(it),
                        _ => Err(invariant("`lift` arguments must be iterators")),
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Traced::Iter(It::AppliedLift { stencil, its }))
            }
            Callable::Scan { fun, init } => {
                let mut full = vec![*init];
                full.extend(args);
                self.call(*fun, full)
            }
            Callable::Combine { over_lists } => self.combine(over_lists, args),
        }
    }

    fn call_builtin<'a>(&mut self, builtin: Builtin, args: Vec<Traced<'a>>) -> Result<Traced<'a>, PipelineError> {
        match builtin {
            Builtin::Deref => match <[Traced; 1]>::try_from(args) {
                Ok([Traced::Iter(it)]) => self.deref(it),
                _ => Err(invariant("`deref` expects a single iterator")),
            },
            Builtin::CanDeref => Ok(Traced::Value),
            Builtin::Shift => {
                let offsets = args
                    .into_iter()
                    .map(|arg| match arg {
                        Traced::Offset(offset) => Ok(offset),
                        other => Err(invariant(format!("`shift` expects offsets, found {:?}", other))),
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Traced::Fn(Callable::Shift(offsets)))
            }
            Builtin::Lift => match <[Traced; 1]>::try_from(args) {
                Ok([Traced::Fn(stencil)]) => Ok(Traced::Fn(Callable::Lift(Box::new(stencil)))),
                _ => Err(invariant("`lift` expects a single stencil")),
            },
            Builtin::Reduce | Builtin::Map => Ok(Traced::Fn(Callable::Combine { over_lists: true })),
            Builtin::Scan => match <[Traced; 3]>::try_from(args) {
                Ok([Traced::Fn(fun), _, init]) => Ok(Traced::Fn(Callable::Scan {
                    fun: Box::new(fun),
                    init: Box::new(init),
                })),
                _ => Err(invariant("`scan` expects a function, a direction and an initial value")),
            },
            Builtin::Neighbors => match <[Traced; 2]>::try_from(args) {
                Ok([Traced::Offset(offset), Traced::Iter(it)]) => {
                    self.deref(it.shifted(&[offset, TracedOffset::AllNeighbors]))
                }
                _ => Err(invariant("`neighbors` expects an offset and an iterator")),
            },
            Builtin::If => match <[Traced; 3]>::try_from(args) {
                Ok([_, then, otherwise]) => traced_if(then, otherwise),
                _ => Err(invariant("`if_` expects three arguments")),
            },
            Builtin::MakeTuple => Ok(Traced::Tuple(args)),
            _ => self.combine(false, args),
        }
    }

    fn deref<'a>(&mut self, it: It<'a>) -> Result<Traced<'a>, PipelineError> {
        match it {
            It::Input { input, offsets } => {
                self.shifts.entry(input).or_default().push(offsets);
                Ok(Traced::Value)
            }
            It::Combined(its) => {
                for it in its {
                    let value = self.deref(it)?;
                    if !value.is_value() {
                        return Err(invariant("dereferencing a combined iterator must give a value"));
                    }
                }
                Ok(Traced::Value)
            }
            It::AppliedLift { stencil, its } => {
                self.call(*stencil, its.into_iter().map(Traced::Iter).collect())
            }
        }
    }

    fn combine<'a>(&mut self, over_lists: bool, args: Vec<Traced<'a>>) -> Result<Traced<'a>, PipelineError> {
        for arg in args {
            match arg {
                Traced::Value | Traced::Type | Traced::Offset(_) => {}
                Traced::Iter(it) if over_lists => {
                    self.deref(it.shifted(&[TracedOffset::AllNeighbors]))?;
                }
                // functions passed to reduce or map_ are opaque
                Traced::Fn(_) if over_lists => {}
                other => return Err(invariant(format!("expected a value, found {:?}", other))),
            }
        }
        Ok(Traced::Value)
    }
}

/// `if_` on traced values: iterators in both branches combine, tuples are
/// handled component-wise.
fn traced_if<'a>(then: Traced<'a>, otherwise: Traced<'a>) -> Result<Traced<'a>, PipelineError> {
    match (then, otherwise) {
        (Traced::Tuple(a), Traced::Tuple(b)) if a.len() == b.len() => Ok(Traced::Tuple(
            a.into_iter()
                .zip(b)
                .map(|(x, y)| traced_if(x, y))
                .collect::<Result<_, _>>()?,
        )),
        (Traced::Tuple(elems), Traced::Value) => {
            let n = elems.len();
            traced_if(Traced::Tuple(elems), Traced::Tuple(vec![Traced::Value; n]))
        }
        (Traced::Value, Traced::Tuple(elems)) => {
            let n = elems.len();
            traced_if(Traced::Tuple(vec![Traced::Value; n]), Traced::Tuple(elems))
        }
        (Traced::Iter(a), Traced::Iter(b)) => Ok(Traced::Iter(It::Combined(vec![a, b]))),
        (Traced::Value, Traced::Value) => Ok(Traced::Value),
        (a, b) => Err(invariant(format!("incompatible `if_` branches {:?} and {:?}", a, b))),
    }
}
