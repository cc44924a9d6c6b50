//! Type rules for the builtin functions.
//!
//! A rule receives the values of the call's arguments and returns the
//! result: a data type, or a new function value for curried builtins
//! (`shift(offsets...)`, `lift(f)`, `reduce(f, init)`, `map_(f)`,
//! `scan(f, forward, init)`, `as_fieldop(stencil[, domain])`).
//!
//! Any `Deferred` operand makes the result `Deferred`: nothing is known
//! yet, so nothing can be checked.

use itir_common::dimension::{Dimension, OffsetProviderEntry};
use itir_common::ty::{DomainType, OffsetLiteralType, PositionDims, ScalarKind, TypeSpec};
use itir_ir::builtins::Builtin;
use itir_ir::ir::Expr;

use crate::error::{InferError, TypeErrorKind};
use crate::infer::{Engine, Partial, Rule, Value};

const DEFERRED: Value = Value::Type(TypeSpec::Deferred);

fn any_deferred(types: &[TypeSpec]) -> bool {
    types.iter().any(TypeSpec::is_deferred)
}

fn dims_to_string(dims: &[Dimension]) -> String {
    dims.iter()
        .map(|d| d.value.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

impl<'a> Engine<'a> {
    fn expect_arity(&self, site: &Expr, args: &[Value], expected: usize) -> Result<(), InferError> {
        if args.len() == expected {
            Ok(())
        } else {
            Err(self.arity_error(site, expected, args.len()))
        }
    }

    fn data_types(&self, site: &Expr, args: &[Value]) -> Result<Vec<TypeSpec>, InferError> {
        args.iter().map(|a| self.expect_type(site, a)).collect()
    }

    fn expected(&self, site: &Expr, expected: &'static str, found: TypeSpec) -> InferError {
        self.type_error(site, TypeErrorKind::Expected { expected, found })
    }

    fn partial(&mut self, partial: Partial) -> Value {
        Value::Fn(self.new_fn(Rule::Partial(partial)))
    }

    // ── Builtins ───────────────────────────────────────────────────────

    pub(crate) fn apply_builtin(
        &mut self,
        site: &'a Expr,
        builtin: Builtin,
        args: &[Value],
    ) -> Result<Value, InferError> {
        if builtin.is_arithmetic() {
            let types = self.data_types(site, args)?;
            return self.arithmetic(site, builtin, &types).map(Value::Type);
        }
        if let Some(kind) = builtin.as_scalar_kind() {
            self.expect_arity(site, args, 1)?;
            self.data_types(site, args)?;
            return Ok(Value::Type(TypeSpec::Scalar(kind)));
        }

        match builtin {
            Builtin::Deref => {
                self.expect_arity(site, args, 1)?;
                match self.expect_type(site, &args[0])? {
                    TypeSpec::Iterator(it) => Ok(Value::Type(*it.element_type)),
                    TypeSpec::Deferred => Ok(DEFERRED),
                    other => Err(self.expected(site, "an iterator", other)),
                }
            }
            Builtin::CanDeref => {
                self.expect_arity(site, args, 1)?;
                match self.expect_type(site, &args[0])? {
                    TypeSpec::Iterator(_) | TypeSpec::Deferred => Ok(Value::Type(TypeSpec::bool())),
                    other => Err(self.expected(site, "an iterator", other)),
                }
            }
            Builtin::Shift => {
                let mut offsets = Vec::with_capacity(args.len());
                for arg in args {
                    match self.expect_type(site, arg)? {
                        TypeSpec::OffsetLiteral(offset) => offsets.push(offset),
                        other => return Err(self.expected(site, "an offset literal", other)),
                    }
                }
                Ok(self.partial(Partial::Shift(offsets)))
            }
            Builtin::Lift => {
                self.expect_arity(site, args, 1)?;
                Ok(self.partial(Partial::Lift(args[0].clone())))
            }
            Builtin::Reduce => {
                self.expect_arity(site, args, 2)?;
                let init = self.expect_type(site, &args[1])?;
                Ok(self.partial(Partial::Reduce {
                    fun: args[0].clone(),
                    init,
                }))
            }
            Builtin::Map => {
                self.expect_arity(site, args, 1)?;
                Ok(self.partial(Partial::Map(args[0].clone())))
            }
            Builtin::Scan => {
                self.expect_arity(site, args, 3)?;
                match self.expect_type(site, &args[1])? {
                    TypeSpec::Scalar(ScalarKind::Bool) | TypeSpec::Deferred => {}
                    other => return Err(self.expected(site, "a boolean scan direction", other)),
                }
                let init = self.expect_type(site, &args[2])?;
                Ok(self.partial(Partial::Scan {
                    fun: args[0].clone(),
                    init,
                }))
            }
            Builtin::AsFieldop => {
                let domain = match args {
                    [_] => None,
                    [_, domain] => match self.expect_type(site, domain)? {
                        TypeSpec::Domain(domain) => Some(domain),
                        TypeSpec::Deferred => None,
                        other => return Err(self.expected(site, "a domain", other)),
                    },
                    _ => return Err(self.arity_error(site, 2, args.len())),
                };
                Ok(self.partial(Partial::AsFieldop {
                    stencil: args[0].clone(),
                    domain,
                }))
            }
            Builtin::Neighbors => {
                self.expect_arity(site, args, 2)?;
                let offset = self.expect_type(site, &args[0])?;
                let it = self.expect_type(site, &args[1])?;
                self.neighbors(site, offset, it).map(Value::Type)
            }
            Builtin::MakeConstList => {
                self.expect_arity(site, args, 1)?;
                let elem = self.expect_type(site, &args[0])?;
                Ok(Value::Type(TypeSpec::list(elem)))
            }
            Builtin::ListGet => {
                self.expect_arity(site, args, 2)?;
                match self.expect_type(site, &args[0])? {
                    TypeSpec::Scalar(kind) if kind.is_integral() => {}
                    TypeSpec::OffsetLiteral(OffsetLiteralType::Int(_)) | TypeSpec::Deferred => {}
                    other => return Err(self.expected(site, "an integer index", other)),
                }
                match self.expect_type(site, &args[1])? {
                    TypeSpec::List(elem) => Ok(Value::Type(*elem)),
                    TypeSpec::Deferred => Ok(DEFERRED),
                    other => Err(self.expected(site, "a list", other)),
                }
            }
            Builtin::MakeTuple => {
                let elems = self.data_types(site, args)?;
                Ok(Value::Type(TypeSpec::Tuple(elems)))
            }
            Builtin::If => {
                self.expect_arity(site, args, 3)?;
                let types = self.data_types(site, args)?;
                self.if_(site, &types).map(Value::Type)
            }
            Builtin::NamedRange => {
                self.expect_arity(site, args, 3)?;
                let types = self.data_types(site, args)?;
                for bound in &types[1..] {
                    match bound {
                        TypeSpec::Scalar(kind) if kind.is_integral() => {}
                        TypeSpec::Deferred => {}
                        other => return Err(self.expected(site, "an integer bound", other.clone())),
                    }
                }
                match &types[0] {
                    TypeSpec::Dimension(dim) => Ok(Value::Type(TypeSpec::NamedRange(dim.clone()))),
                    other => Err(self.expected(site, "a dimension", other.clone())),
                }
            }
            Builtin::CartesianDomain | Builtin::UnstructuredDomain => {
                let mut dims = Vec::with_capacity(args.len());
                for ty in self.data_types(site, args)? {
                    match ty {
                        TypeSpec::NamedRange(dim) => dims.push(dim),
                        other => return Err(self.expected(site, "a named range", other)),
                    }
                }
                Ok(Value::Type(TypeSpec::Domain(DomainType { dims })))
            }
            // `tuple_get` and `cast_` only get here when passed around as
            // values; their direct call forms are typed by the visitor.
            _ => Ok(DEFERRED),
        }
    }

    fn arithmetic(
        &self,
        site: &Expr,
        builtin: Builtin,
        types: &[TypeSpec],
    ) -> Result<TypeSpec, InferError> {
        let unary = builtin.is_unary_math_number()
            || builtin.is_unary_logical()
            || builtin.is_unary_math_fp()
            || builtin.is_unary_math_fp_predicate();
        let arity = if unary { 1 } else { 2 };
        if types.len() != arity {
            return Err(self.arity_error(site, arity, types.len()));
        }
        if any_deferred(types) {
            return Ok(TypeSpec::Deferred);
        }

        let scalar = |ty: &TypeSpec| match ty {
            TypeSpec::Scalar(kind) => Ok(*kind),
            other => Err(self.expected(site, "a scalar", other.clone())),
        };
        let first = scalar(&types[0])?;

        if unary {
            if builtin.is_unary_logical() {
                return match first {
                    ScalarKind::Bool => Ok(TypeSpec::bool()),
                    _ => Err(self.expected(site, "a boolean", types[0].clone())),
                };
            }
            if !first.is_numeric() {
                return Err(self.expected(site, "a number", types[0].clone()));
            }
            if builtin.is_unary_math_fp_predicate() {
                return Ok(TypeSpec::bool());
            }
            return Ok(TypeSpec::Scalar(first));
        }

        let second = scalar(&types[1])?;
        if builtin == Builtin::Power {
            if !first.is_numeric() || !second.is_numeric() {
                return Err(self.type_error(
                    site,
                    TypeErrorKind::OperandMismatch {
                        op: builtin.name(),
                        left: types[0].clone(),
                        right: types[1].clone(),
                    },
                ));
            }
            return Ok(TypeSpec::Scalar(first));
        }
        if first != second {
            return Err(self.type_error(
                site,
                TypeErrorKind::OperandMismatch {
                    op: builtin.name(),
                    left: types[0].clone(),
                    right: types[1].clone(),
                },
            ));
        }
        if builtin.is_binary_logical() {
            return match first {
                ScalarKind::Bool => Ok(TypeSpec::bool()),
                _ => Err(self.expected(site, "a boolean", types[0].clone())),
            };
        }
        if builtin.is_comparison() {
            return Ok(TypeSpec::bool());
        }
        if !first.is_numeric() {
            return Err(self.expected(site, "a number", types[0].clone()));
        }
        Ok(TypeSpec::Scalar(first))
    }

    fn if_(&self, site: &Expr, types: &[TypeSpec]) -> Result<TypeSpec, InferError> {
        match &types[0] {
            TypeSpec::Scalar(ScalarKind::Bool) | TypeSpec::Deferred => {}
            other => return Err(self.type_error(site, TypeErrorKind::NonBooleanCondition(other.clone()))),
        }
        let (then, otherwise) = (&types[1], &types[2]);
        if then.is_deferred() {
            return Ok(otherwise.clone());
        }
        if !then.is_compatible_with(otherwise) {
            return Err(self.type_error(
                site,
                TypeErrorKind::BranchMismatch {
                    then: then.clone(),
                    otherwise: otherwise.clone(),
                },
            ));
        }
        Ok(then.clone())
    }

    fn neighbors(&self, site: &Expr, offset: TypeSpec, it: TypeSpec) -> Result<TypeSpec, InferError> {
        let tag = match offset {
            TypeSpec::OffsetLiteral(OffsetLiteralType::Dim(dim)) => dim,
            other => return Err(self.expected(site, "an offset tag", other)),
        };
        let Some(conn) = self.provider.connectivity(&tag.value) else {
            return Err(self.type_error(site, TypeErrorKind::OffsetNotFound(tag.value.clone())));
        };
        match it {
            TypeSpec::Iterator(it) => {
                if let PositionDims::Known(position) = &it.position_dims {
                    if !position.contains(&conn.origin_axis) {
                        return Err(self.type_error(
                            site,
                            TypeErrorKind::InvalidShift {
                                offset: tag.value.clone(),
                                position: dims_to_string(position),
                            },
                        ));
                    }
                }
                Ok(TypeSpec::list(*it.element_type))
            }
            TypeSpec::Deferred => Ok(TypeSpec::Deferred),
            other => Err(self.expected(site, "an iterator", other)),
        }
    }

    // ── Partially applied builtins ─────────────────────────────────────

    pub(crate) fn apply_partial(
        &mut self,
        site: &'a Expr,
        partial: Partial,
        args: &[Value],
    ) -> Result<Value, InferError> {
        match partial {
            Partial::Shift(offsets) => {
                self.expect_arity(site, args, 1)?;
                let it = self.expect_type(site, &args[0])?;
                self.shift(site, &offsets, it).map(Value::Type)
            }
            Partial::Lift(stencil) => {
                let its = self.data_types(site, args)?;
                let returns = self.call(site, stencil, args.to_vec())?;
                let element = self.expect_type(site, &returns)?;
                let mut position = PositionDims::Unknown;
                let mut defined = Vec::new();
                for it in &its {
                    match it {
                        TypeSpec::Iterator(it) => {
                            if matches!(position, PositionDims::Unknown) {
                                position = it.position_dims.clone();
                            }
                            if defined.is_empty() {
                                defined = it.defined_dims.clone();
                            }
                        }
                        TypeSpec::Deferred => {}
                        other => return Err(self.expected(site, "an iterator", other.clone())),
                    }
                }
                Ok(Value::Type(TypeSpec::iterator(position, defined, element)))
            }
            Partial::Reduce { fun, init } => {
                let elems = self.list_elements(site, args)?;
                let mut call_args = vec![Value::Type(init.clone())];
                call_args.extend(elems.into_iter().map(Value::Type));
                let result = self.call(site, fun, call_args)?;
                let result = self.expect_type(site, &result)?;
                self.accumulated(site, init, result).map(Value::Type)
            }
            Partial::Map(fun) => {
                let elems = self.list_elements(site, args)?;
                let result = self.call(site, fun, elems.into_iter().map(Value::Type).collect())?;
                let result = self.expect_type(site, &result)?;
                Ok(Value::Type(TypeSpec::list(result)))
            }
            Partial::Scan { fun, init } => {
                let its = self.data_types(site, args)?;
                for it in &its {
                    if !matches!(it, TypeSpec::Iterator(_) | TypeSpec::Deferred) {
                        return Err(self.expected(site, "an iterator", it.clone()));
                    }
                }
                let mut call_args = vec![Value::Type(init.clone())];
                call_args.extend(args.iter().cloned());
                let result = self.call(site, fun, call_args)?;
                let result = self.expect_type(site, &result)?;
                self.accumulated(site, init, result).map(Value::Type)
            }
            Partial::AsFieldop { stencil, domain } => {
                let fields = self.data_types(site, args)?;
                let position = match &domain {
                    Some(domain) => PositionDims::Known(domain.dims.clone()),
                    None => PositionDims::Unknown,
                };
                let mut its = Vec::with_capacity(fields.len());
                let mut result_dims = domain.as_ref().map(|d| d.dims.clone());
                for field in &fields {
                    if result_dims.is_none() && !field.is_deferred() {
                        let shape = self.field_shape(site, field)?;
                        result_dims = Some(shape.dims.into_iter().filter(|d| !d.is_local()).collect());
                    }
                    its.push(Value::Type(self.field_to_iterator(site, position.clone(), field)?));
                }
                let returns = self.call(site, stencil, its)?;
                let returns = self.expect_type(site, &returns)?;
                let dims = result_dims.unwrap_or_default();
                returns
                    .map_primitive_constituents(&mut |leaf| match leaf {
                        TypeSpec::Scalar(kind) => Ok(TypeSpec::field(dims.clone(), *kind)),
                        TypeSpec::Deferred => Ok(TypeSpec::Deferred),
                        other => Err(TypeErrorKind::Expected {
                            expected: "a scalar stencil result",
                            found: other.clone(),
                        }),
                    })
                    .map(Value::Type)
                    .map_err(|kind| self.type_error(site, kind))
            }
        }
    }

    fn list_elements(&self, site: &Expr, args: &[Value]) -> Result<Vec<TypeSpec>, InferError> {
        self.data_types(site, args)?
            .into_iter()
            .map(|ty| match ty {
                TypeSpec::List(elem) => Ok(*elem),
                TypeSpec::Deferred => Ok(TypeSpec::Deferred),
                other => Err(self.expected(site, "a list", other)),
            })
            .collect()
    }

    /// The carried type of a reduction or scan: the step result must agree
    /// with the initial value.
    fn accumulated(&self, site: &Expr, init: TypeSpec, result: TypeSpec) -> Result<TypeSpec, InferError> {
        if init.is_deferred() {
            return Ok(result);
        }
        if !init.is_compatible_with(&result) {
            return Err(self.type_error(site, TypeErrorKind::ReduceMismatch { init, result }));
        }
        Ok(init)
    }

    /// Shift an iterator by tag/index pairs. Cartesian offsets keep the
    /// position; a connectivity moves it from its origin to its neighbor axis.
    fn shift(
        &self,
        site: &Expr,
        offsets: &[OffsetLiteralType],
        it: TypeSpec,
    ) -> Result<TypeSpec, InferError> {
        if offsets.len() % 2 != 0 {
            return Err(self.type_error(site, TypeErrorKind::UnpairedShift(offsets.len())));
        }
        let mut it = match it {
            TypeSpec::Iterator(it) => it,
            TypeSpec::Deferred => return Ok(TypeSpec::Deferred),
            other => return Err(self.expected(site, "an iterator", other)),
        };
        let mut position = match &it.position_dims {
            PositionDims::Known(position) => position.clone(),
            PositionDims::Unknown => return Ok(TypeSpec::Iterator(it)),
        };
        for pair in offsets.chunks(2) {
            let tag = match &pair[0] {
                OffsetLiteralType::Dim(tag) => tag,
                OffsetLiteralType::Int(value) => {
                    return Err(self.type_error(
                        site,
                        TypeErrorKind::InvalidShift {
                            offset: value.to_string(),
                            position: dims_to_string(&position),
                        },
                    ))
                }
            };
            match self.provider.get(&tag.value) {
                Some(OffsetProviderEntry::Dimension(_)) => {}
                Some(OffsetProviderEntry::Connectivity(conn)) => {
                    let Some(slot) = position.iter().position(|d| *d == conn.origin_axis) else {
                        return Err(self.type_error(
                            site,
                            TypeErrorKind::InvalidShift {
                                offset: tag.value.clone(),
                                position: dims_to_string(&position),
                            },
                        ));
                    };
                    position[slot] = conn.neighbor_axis.clone();
                }
                None => {
                    return Err(self.type_error(site, TypeErrorKind::OffsetNotFound(tag.value.clone())))
                }
            }
        }
        it.position_dims = PositionDims::Known(position);
        Ok(TypeSpec::Iterator(it))
    }
}
