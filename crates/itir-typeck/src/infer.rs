//! The type inference engine.
//!
//! Function values (lambdas, function definitions, builtins and partially
//! applied builtins) are not given a type when they are visited. They are
//! represented as *rules*: given the types of their arguments a rule
//! produces the result type, or another rule for curried builtins such as
//! `shift(I, 1)(it)`. Every call site evaluates the rule afresh, so the same
//! lambda can be applied to arguments of different types.
//!
//! Each function value owns an observable [`CellId`]. The first time it is
//! called and its argument and result types are all known, the cell
//! resolves to the corresponding `FunctionType`, and that type is written
//! to every node denoting the function: the defining lambda, every
//! reference to it, and the parameters it was bound to.
//!
//! Types are collected in a side table keyed by node identity and the
//! typed tree is rebuilt at the end; the input tree is never mutated.

use std::collections::VecDeque;
use std::rc::Rc;

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, instrument, trace};

use itir_common::dimension::{Dimension, OffsetProvider};
use itir_common::ty::{
    DomainType, FunctionType, OffsetLiteralType, PositionDims, ProgramType, StencilClosureType,
    TypeSpec,
};
use itir_ir::builtins::Builtin;
use itir_ir::ir::{Expr, ExprKind, FunctionDefinition, OffsetValue, Program, StencilClosure, Sym};

use crate::cell::{CellId, CellStore, Fired, Target};
use crate::error::{InferError, InvariantViolation, TypeError, TypeErrorKind};

// ── Values and rules ───────────────────────────────────────────────────

pub(crate) type FnId = usize;

/// What visiting an expression produces.
#[derive(Clone, Debug)]
pub(crate) enum Value {
    Type(TypeSpec),
    Fn(FnId),
}

/// Lexical scope: symbol name to value.
pub(crate) type Scope = Rc<FxHashMap<String, Value>>;

/// A builtin partially applied to its first argument list.
#[derive(Clone, Debug)]
pub(crate) enum Partial {
    Shift(Vec<OffsetLiteralType>),
    Lift(Value),
    Reduce { fun: Value, init: TypeSpec },
    Map(Value),
    Scan { fun: Value, init: TypeSpec },
    AsFieldop { stencil: Value, domain: Option<DomainType> },
}

#[derive(Clone)]
pub(crate) enum Rule<'a> {
    Builtin(Builtin),
    Lambda {
        params: &'a [Sym],
        body: &'a Expr,
        scope: Scope,
    },
    /// A reference whose declared type is already a function type.
    FromFunctionType(FunctionType),
    Partial(Partial),
}

struct FnSlot<'a> {
    rule: Rule<'a>,
    cell: CellId,
    /// Nodes that receive the function type once the cell resolves.
    nodes: Vec<NodeRef<'a>>,
    /// The lambda expression this function was created from.
    origin: Option<NodeRef<'a>>,
}

enum Action {
    /// A call of the function finished; record its signature.
    RecordCall { fun: FnId },
}

// ── Node identity ──────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum NodeKind {
    Expr,
    Sym,
    FunctionDefinition,
    StencilClosure,
}

/// Identity of a node in the borrowed input tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct NodeKey {
    addr: usize,
    kind: NodeKind,
}

#[derive(Clone, Copy)]
pub(crate) enum NodeRef<'a> {
    Expr(&'a Expr),
    Sym(&'a Sym),
    FunctionDefinition(&'a FunctionDefinition),
    StencilClosure(&'a StencilClosure),
}

impl<'a> NodeRef<'a> {
    fn key(self) -> NodeKey {
        match self {
            NodeRef::Expr(e) => NodeKey {
                addr: e as *const Expr as usize,
                kind: NodeKind::Expr,
            },
            NodeRef::Sym(s) => NodeKey {
                addr: s as *const Sym as usize,
                kind: NodeKind::Sym,
            },
            NodeRef::FunctionDefinition(d) => NodeKey {
                addr: d as *const FunctionDefinition as usize,
                kind: NodeKind::FunctionDefinition,
            },
            NodeRef::StencilClosure(c) => NodeKey {
                addr: c as *const StencilClosure as usize,
                kind: NodeKind::StencilClosure,
            },
        }
    }

    fn existing(self) -> Option<&'a TypeSpec> {
        match self {
            NodeRef::Expr(e) => e.ty.as_ref(),
            NodeRef::Sym(s) => s.ty.as_ref(),
            NodeRef::FunctionDefinition(d) => d.ty.as_ref(),
            NodeRef::StencilClosure(c) => c.ty.as_ref(),
        }
    }

    fn describe(self) -> String {
        match self {
            NodeRef::Expr(e) => e.to_string(),
            NodeRef::Sym(s) => s.to_string(),
            NodeRef::FunctionDefinition(d) => d.to_string(),
            NodeRef::StencilClosure(c) => c.to_string(),
        }
    }
}

// ── Engine ─────────────────────────────────────────────────────────────

pub(crate) struct Engine<'a> {
    pub(crate) provider: &'a OffsetProvider,
    dimensions: FxHashMap<String, Dimension>,
    allow_undeclared: bool,
    cells: CellStore<Action>,
    fns: Vec<FnSlot<'a>>,
    types: FxHashMap<NodeKey, TypeSpec>,
    /// Whether node types are being recorded. Off while re-instantiating a
    /// lambda body that was already typed at an earlier call site.
    recording: bool,
    /// Lambda bodies whose nodes were recorded by some instantiation.
    typed_bodies: FxHashSet<NodeKey>,
}

impl<'a> Engine<'a> {
    fn new(
        provider: &'a OffsetProvider,
        dimensions: FxHashMap<String, Dimension>,
        allow_undeclared: bool,
    ) -> Self {
        Engine {
            provider,
            dimensions,
            allow_undeclared,
            cells: CellStore::new(),
            fns: Vec::new(),
            types: FxHashMap::default(),
            recording: true,
            typed_bodies: FxHashSet::default(),
        }
    }

    pub(crate) fn type_error(&self, site: &Expr, kind: TypeErrorKind) -> InferError {
        InferError::Type(TypeError {
            kind,
            node: site.to_string(),
            location: site.location.clone(),
        })
    }

    pub(crate) fn new_fn(&mut self, rule: Rule<'a>) -> FnId {
        let cell = self.cells.new_cell();
        self.fns.push(FnSlot {
            rule,
            cell,
            nodes: Vec::new(),
            origin: None,
        });
        self.fns.len() - 1
    }

    /// Make `node` receive the type of function `id` once it is known.
    fn attach_node(&mut self, id: FnId, node: NodeRef<'a>) -> Result<(), InferError> {
        if !self.recording {
            return Ok(());
        }
        match self.cells.probe(self.fns[id].cell) {
            Some(ty) => self.write_type(node, ty),
            None => {
                self.fns[id].nodes.push(node);
                Ok(())
            }
        }
    }

    fn record(&mut self, node: NodeRef<'a>, ty: &TypeSpec) -> Result<(), InferError> {
        if self.recording {
            self.write_type(node, ty.clone())
        } else {
            Ok(())
        }
    }

    fn record_value(&mut self, node: NodeRef<'a>, value: &Value) -> Result<(), InferError> {
        match value {
            Value::Type(ty) => self.record(node, ty),
            Value::Fn(id) => self.attach_node(*id, node),
        }
    }

    fn write_type(&mut self, node: NodeRef<'a>, ty: TypeSpec) -> Result<(), InferError> {
        if ty.is_deferred() {
            return Ok(());
        }
        let key = node.key();
        let previous = self.types.get(&key).or(node.existing());
        if let Some(previous) = previous {
            if !previous.is_compatible_with(&ty) {
                return Err(InvariantViolation::IncompatibleRetype {
                    node: node.describe(),
                    existing: previous.clone(),
                    proposed: ty,
                }
                .into());
            }
        }
        self.types.insert(key, ty);
        Ok(())
    }

    /// The data type of `value`, rejecting function values.
    pub(crate) fn expect_type(&self, site: &Expr, value: &Value) -> Result<TypeSpec, InferError> {
        match value {
            Value::Type(ty) => Ok(ty.clone()),
            Value::Fn(_) => Err(self.type_error(site, TypeErrorKind::FunctionAsValue)),
        }
    }

    fn target(&self, value: &Value) -> Target {
        match value {
            Value::Type(ty) => Target::Ready(ty.clone()),
            Value::Fn(id) => Target::Cell(self.fns[*id].cell),
        }
    }

    // ── Resolution ─────────────────────────────────────────────────────

    fn drain(&mut self, fired: Vec<Fired<Action>>) -> Result<(), InferError> {
        let mut queue: VecDeque<Fired<Action>> = fired.into();
        while let Some(Fired { action, types }) = queue.pop_front() {
            match action {
                Action::RecordCall { fun } => {
                    let Some((returns, args)) = types.split_first() else {
                        continue;
                    };
                    let ty = TypeSpec::Function(FunctionType::new(args.to_vec(), returns.clone()));
                    let cell = self.fns[fun].cell;
                    if self.cells.is_resolved(cell) {
                        continue;
                    }
                    trace!(function = fun, ty = %ty, "function type resolved");
                    queue.extend(self.cells.resolve(cell, ty.clone()));
                    for node in std::mem::take(&mut self.fns[fun].nodes) {
                        self.write_type(node, ty.clone())?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Record the signature of function `id` once this call's result and
    /// arguments are all known.
    fn subscribe_call(
        &mut self,
        site: &Expr,
        id: FnId,
        result: &Value,
        args: &[Value],
    ) -> Result<(), InferError> {
        let mut targets = Vec::with_capacity(args.len() + 1);
        targets.push(self.target(result));
        targets.extend(args.iter().map(|a| self.target(a)));
        let own = self.fns[id].cell;
        match self
            .cells
            .on_ready(targets, Some(own), Action::RecordCall { fun: id })
        {
            Ok(Some(fired)) => self.drain(vec![fired]),
            Ok(None) => Ok(()),
            Err(_) => Err(InvariantViolation::CyclicDependency {
                node: site.to_string(),
            }
            .into()),
        }
    }

    // ── Calls ──────────────────────────────────────────────────────────

    /// Apply `callee` to `args` at call site `site`.
    pub(crate) fn call(
        &mut self,
        site: &'a Expr,
        callee: Value,
        args: Vec<Value>,
    ) -> Result<Value, InferError> {
        match callee {
            Value::Fn(id) => self.call_fn(site, id, args),
            Value::Type(TypeSpec::Function(fun_type)) => {
                self.apply_function_type(site, &fun_type, &args)
            }
            Value::Type(TypeSpec::Deferred) => Ok(Value::Type(TypeSpec::Deferred)),
            Value::Type(other) => Err(self.type_error(site, TypeErrorKind::NotCallable(other))),
        }
    }

    fn call_fn(&mut self, site: &'a Expr, id: FnId, args: Vec<Value>) -> Result<Value, InferError> {
        let rule = self.fns[id].rule.clone();
        let result = match rule {
            Rule::Builtin(builtin) => self.apply_builtin(site, builtin, &args)?,
            Rule::Partial(partial) => self.apply_partial(site, partial, &args)?,
            Rule::FromFunctionType(fun_type) => self.apply_function_type(site, &fun_type, &args)?,
            Rule::Lambda {
                params,
                body,
                scope,
            } => self.apply_lambda(site, id, params, body, &scope, &args)?,
        };
        self.subscribe_call(site, id, &result, &args)?;
        Ok(result)
    }

    fn apply_lambda(
        &mut self,
        site: &Expr,
        id: FnId,
        params: &'a [Sym],
        body: &'a Expr,
        scope: &Scope,
        args: &[Value],
    ) -> Result<Value, InferError> {
        if params.len() != args.len() {
            return Err(self.type_error(
                site,
                TypeErrorKind::ArityMismatch {
                    expected: params.len(),
                    found: args.len(),
                },
            ));
        }
        // The first instantiation of a body types its nodes, even when the
        // call sits inside a body that is itself being re-instantiated.
        let first = self.typed_bodies.insert(NodeRef::Expr(body).key());
        let saved = self.recording;
        self.recording = first;
        let origin = self.fns[id].origin;
        let attached = match origin {
            Some(origin) if first && !saved => self.attach_node(id, origin),
            _ => Ok(()),
        };
        let result = attached.and_then(|()| self.bind_and_visit(params, body, scope, args));
        self.recording = saved;
        result
    }

    fn bind_and_visit(
        &mut self,
        params: &'a [Sym],
        body: &'a Expr,
        scope: &Scope,
        args: &[Value],
    ) -> Result<Value, InferError> {
        let mut inner = (**scope).clone();
        for (param, arg) in params.iter().zip(args) {
            self.record_value(NodeRef::Sym(param), arg)?;
            inner.insert(param.id.clone(), arg.clone());
        }
        self.visit(body, &Rc::new(inner))
    }

    pub(crate) fn apply_function_type(
        &mut self,
        site: &Expr,
        fun_type: &FunctionType,
        args: &[Value],
    ) -> Result<Value, InferError> {
        if fun_type.pos_args.len() != args.len() {
            return Err(self.type_error(
                site,
                TypeErrorKind::ArityMismatch {
                    expected: fun_type.pos_args.len(),
                    found: args.len(),
                },
            ));
        }
        for (param, arg) in fun_type.pos_args.iter().zip(args) {
            let arg = self.expect_type(site, arg)?;
            if !param.is_compatible_with(&arg) {
                return Err(self.type_error(
                    site,
                    TypeErrorKind::Expected {
                        expected: "an argument matching the declared parameter",
                        found: arg,
                    },
                ));
            }
        }
        Ok(Value::Type((*fun_type.returns).clone()))
    }

    // ── Visiting ───────────────────────────────────────────────────────

    pub(crate) fn visit(&mut self, expr: &'a Expr, scope: &Scope) -> Result<Value, InferError> {
        let value = match &expr.kind {
            ExprKind::Literal { kind, .. } => Value::Type(TypeSpec::Scalar(*kind)),
            ExprKind::AxisLiteral { value } => match self.dimensions.get(value) {
                Some(dim) => Value::Type(TypeSpec::Dimension(dim.clone())),
                None => {
                    return Err(
                        self.type_error(expr, TypeErrorKind::DimensionNotFound(value.clone()))
                    )
                }
            },
            ExprKind::OffsetLiteral { value } => {
                Value::Type(TypeSpec::OffsetLiteral(self.offset_literal(expr, value)?))
            }
            ExprKind::SymRef { id } => self.visit_sym_ref(expr, id, scope)?,
            ExprKind::Lambda { params, body } => {
                let id = self.new_fn(Rule::Lambda {
                    params,
                    body,
                    scope: scope.clone(),
                });
                self.fns[id].origin = Some(NodeRef::Expr(expr));
                Value::Fn(id)
            }
            ExprKind::FunCall { fun, args } => self.visit_fun_call(expr, fun, args, scope)?,
        };
        self.record_value(NodeRef::Expr(expr), &value)?;
        Ok(value)
    }

    fn offset_literal(&self, site: &Expr, value: &OffsetValue) -> Result<OffsetLiteralType, InferError> {
        match value {
            OffsetValue::Int(i) => Ok(OffsetLiteralType::Int(*i)),
            OffsetValue::Name(name) => {
                if let Ok(i) = name.parse::<i64>() {
                    return Ok(OffsetLiteralType::Int(i));
                }
                match self.dimensions.get(name) {
                    Some(dim) => Ok(OffsetLiteralType::Dim(dim.clone())),
                    None => Err(self.type_error(site, TypeErrorKind::DimensionNotFound(name.clone()))),
                }
            }
        }
    }

    fn visit_sym_ref(&mut self, expr: &'a Expr, id: &str, scope: &Scope) -> Result<Value, InferError> {
        if let Some(value) = scope.get(id) {
            return Ok(value.clone());
        }
        if let Some(builtin) = Builtin::from_name(id) {
            return Ok(Value::Fn(self.new_fn(Rule::Builtin(builtin))));
        }
        if self.allow_undeclared {
            return Ok(match &expr.ty {
                Some(TypeSpec::Function(fun_type)) => {
                    Value::Fn(self.new_fn(Rule::FromFunctionType(fun_type.clone())))
                }
                Some(ty) => Value::Type(ty.clone()),
                None => Value::Type(TypeSpec::Deferred),
            });
        }
        Err(self.type_error(expr, TypeErrorKind::UndeclaredSymbol(id.to_string())))
    }

    fn visit_fun_call(
        &mut self,
        expr: &'a Expr,
        fun: &'a Expr,
        args: &'a [Expr],
        scope: &Scope,
    ) -> Result<Value, InferError> {
        let builtin = fun
            .as_sym_ref()
            .filter(|name| !scope.contains_key(*name))
            .and_then(Builtin::from_name);

        match builtin {
            Some(Builtin::Cast) => {
                let [value, type_constructor] = args else {
                    return Err(self.arity_error(expr, 2, args.len()));
                };
                self.visit(value, scope)?;
                let kind = type_constructor
                    .as_builtin()
                    .and_then(Builtin::as_scalar_kind)
                    .ok_or_else(|| {
                        self.type_error(
                            expr,
                            TypeErrorKind::UnknownTypeBuiltin(type_constructor.to_string()),
                        )
                    })?;
                Ok(Value::Type(TypeSpec::Scalar(kind)))
            }
            Some(Builtin::TupleGet) => {
                let [index, tuple] = args else {
                    return Err(self.arity_error(expr, 2, args.len()));
                };
                self.visit(index, scope)?;
                let index: usize = index
                    .as_literal()
                    .and_then(|(value, _)| value.parse().ok())
                    .ok_or_else(|| self.type_error(expr, TypeErrorKind::TupleIndexNotLiteral))?;
                let tuple_value = self.visit(tuple, scope)?;
                match self.expect_type(expr, &tuple_value)? {
                    TypeSpec::Tuple(elems) => match elems.get(index) {
                        Some(elem) => Ok(Value::Type(elem.clone())),
                        None => Err(self.type_error(
                            expr,
                            TypeErrorKind::TupleIndexOutOfRange {
                                index,
                                len: elems.len(),
                            },
                        )),
                    },
                    TypeSpec::Deferred => Ok(Value::Type(TypeSpec::Deferred)),
                    other => Err(self.type_error(
                        expr,
                        TypeErrorKind::Expected {
                            expected: "a tuple",
                            found: other,
                        },
                    )),
                }
            }
            _ => {
                let callee = self.visit(fun, scope)?;
                let args = args
                    .iter()
                    .map(|arg| self.visit(arg, scope))
                    .collect::<Result<Vec<_>, _>>()?;
                self.call(expr, callee, args)
            }
        }
    }

    pub(crate) fn arity_error(&self, site: &Expr, expected: usize, found: usize) -> InferError {
        self.type_error(site, TypeErrorKind::ArityMismatch { expected, found })
    }

    // ── Closures and programs ──────────────────────────────────────────

    fn visit_closure(
        &mut self,
        closure: &'a StencilClosure,
        scope: &Scope,
    ) -> Result<StencilClosureType, InferError> {
        closure
            .validate_output()
            .map_err(InvariantViolation::from)?;

        let domain_value = self.visit(&closure.domain, scope)?;
        let domain = match self.expect_type(&closure.domain, &domain_value)? {
            TypeSpec::Domain(domain) => domain,
            other => {
                return Err(self.type_error(
                    &closure.domain,
                    TypeErrorKind::Expected {
                        expected: "a domain",
                        found: other,
                    },
                ))
            }
        };

        let mut inputs = Vec::with_capacity(closure.inputs.len());
        for input in &closure.inputs {
            let value = self.visit(input, scope)?;
            inputs.push(self.expect_type(input, &value)?);
        }

        let output_value = self.visit(&closure.output, scope)?;
        let output = self.expect_type(&closure.output, &output_value)?;
        for leaf in output.primitive_constituents() {
            if !matches!(leaf, TypeSpec::Field(_) | TypeSpec::Deferred) {
                return Err(self.type_error(
                    &closure.output,
                    TypeErrorKind::ExpectedField(leaf.clone()),
                ));
            }
        }

        let stencil = self.visit(&closure.stencil, scope)?;
        let position = PositionDims::Known(domain.dims.clone());
        let mut stencil_args = Vec::with_capacity(inputs.len());
        for (input, ty) in closure.inputs.iter().zip(&inputs) {
            stencil_args.push(self.field_to_iterator(input, position.clone(), ty)?);
        }
        let returns = self.call(
            &closure.stencil,
            stencil,
            stencil_args.iter().cloned().map(Value::Type).collect(),
        )?;
        let returns = self.expect_type(&closure.stencil, &returns)?;

        Ok(StencilClosureType {
            domain,
            stencil: FunctionType::new(stencil_args, returns),
            output,
            inputs,
        })
    }

    fn visit_program(&mut self, program: &'a Program) -> Result<ProgramType, InferError> {
        let mut closure_scope: FxHashMap<String, Value> = FxHashMap::default();
        let mut param_types = Vec::with_capacity(program.params.len());
        for param in &program.params {
            let ty = match &param.ty {
                Some(ty) if ty.is_data_type() => ty.clone(),
                _ => {
                    return Err(InferError::Type(TypeError {
                        kind: TypeErrorKind::UntypedParameter(param.id.clone()),
                        node: param.id.clone(),
                        location: param.location.clone(),
                    }))
                }
            };
            closure_scope.insert(param.id.clone(), Value::Type(ty.clone()));
            param_types.push(ty);
        }

        let param_scope: Scope = Rc::new(closure_scope.clone());
        for tmp in &program.temporaries {
            let domain_value = self.visit(&tmp.domain, &param_scope)?;
            let dims = match self.expect_type(&tmp.domain, &domain_value)? {
                TypeSpec::Domain(domain) => domain.dims,
                other => {
                    return Err(self.type_error(
                        &tmp.domain,
                        TypeErrorKind::Expected {
                            expected: "a domain",
                            found: other,
                        },
                    ))
                }
            };
            let field = tmp
                .dtype
                .map_primitive_constituents(&mut |leaf| match leaf {
                    TypeSpec::Scalar(kind) => Ok(TypeSpec::field(dims.clone(), *kind)),
                    other => Err(TypeErrorKind::Expected {
                        expected: "a scalar temporary dtype",
                        found: other.clone(),
                    }),
                })
                .map_err(|kind| self.type_error(&tmp.domain, kind))?;
            closure_scope.insert(tmp.id.clone(), Value::Type(field));
        }

        let mut definitions: FxHashMap<String, Value> = FxHashMap::default();
        for def in &program.function_definitions {
            let id = self.new_fn(Rule::Lambda {
                params: &def.params,
                body: &def.body,
                scope: Rc::new(definitions.clone()),
            });
            self.attach_node(id, NodeRef::FunctionDefinition(def))?;
            definitions.insert(def.id.clone(), Value::Fn(id));
        }
        closure_scope.extend(definitions);

        let scope: Scope = Rc::new(closure_scope);
        let mut closures = Vec::with_capacity(program.closures.len());
        for closure in &program.closures {
            let ty = self.visit_closure(closure, &scope)?;
            self.record(
                NodeRef::StencilClosure(closure),
                &TypeSpec::StencilClosure(Box::new(ty.clone())),
            )?;
            closures.push(ty);
        }

        Ok(ProgramType {
            params: param_types,
            closures,
        })
    }

    // ── Typed tree ─────────────────────────────────────────────────────

    fn resolved(&self, node: NodeRef<'_>) -> Option<TypeSpec> {
        self.types
            .get(&node.key())
            .cloned()
            .or_else(|| node.existing().cloned())
    }

    fn annotate_sym(&self, sym: &Sym) -> Sym {
        Sym {
            id: sym.id.clone(),
            ty: self.resolved(NodeRef::Sym(sym)),
            location: sym.location.clone(),
        }
    }

    fn annotate_expr(&self, expr: &Expr) -> Expr {
        let kind = match &expr.kind {
            ExprKind::Lambda { params, body } => ExprKind::Lambda {
                params: params.iter().map(|p| self.annotate_sym(p)).collect(),
                body: Box::new(self.annotate_expr(body)),
            },
            ExprKind::FunCall { fun, args } => ExprKind::FunCall {
                fun: Box::new(self.annotate_expr(fun)),
                args: args.iter().map(|a| self.annotate_expr(a)).collect(),
            },
            leaf => leaf.clone(),
        };
        Expr {
            kind,
            ty: self.resolved(NodeRef::Expr(expr)),
            location: expr.location.clone(),
        }
    }

    fn annotate_program(&self, program: &Program, ty: ProgramType) -> Program {
        Program {
            id: program.id.clone(),
            function_definitions: program
                .function_definitions
                .iter()
                .map(|def| FunctionDefinition {
                    id: def.id.clone(),
                    params: def.params.iter().map(|p| self.annotate_sym(p)).collect(),
                    body: self.annotate_expr(&def.body),
                    ty: self.resolved(NodeRef::FunctionDefinition(def)),
                    location: def.location.clone(),
                })
                .collect(),
            params: program.params.iter().map(|p| self.annotate_sym(p)).collect(),
            closures: program
                .closures
                .iter()
                .map(|c| StencilClosure {
                    domain: self.annotate_expr(&c.domain),
                    stencil: self.annotate_expr(&c.stencil),
                    output: self.annotate_expr(&c.output),
                    inputs: c.inputs.iter().map(|i| self.annotate_expr(i)).collect(),
                    ty: self.resolved(NodeRef::StencilClosure(c)),
                    location: c.location.clone(),
                })
                .collect(),
            temporaries: program
                .temporaries
                .iter()
                .map(|tmp| itir_ir::ir::Temporary {
                    id: tmp.id.clone(),
                    domain: self.annotate_expr(&tmp.domain),
                    dtype: tmp.dtype.clone(),
                })
                .collect(),
            ty: Some(TypeSpec::Program(ty)),
            location: program.location.clone(),
        }
    }
}

// ── Dimension universe ─────────────────────────────────────────────────

fn collect_type_dimensions(ty: Option<&TypeSpec>, out: &mut FxHashMap<String, Dimension>) {
    if let Some(ty) = ty {
        for dim in ty.dimensions() {
            out.insert(dim.value.clone(), dim.clone());
        }
    }
}

/// Dimensions named by the offset provider, merged with every dimension
/// already mentioned by a node type in `program`.
fn program_dimensions(program: &Program, provider: &OffsetProvider) -> FxHashMap<String, Dimension> {
    let mut dims = provider.dimensions();
    collect_type_dimensions(program.ty.as_ref(), &mut dims);
    for param in &program.params {
        collect_type_dimensions(param.ty.as_ref(), &mut dims);
    }
    for def in &program.function_definitions {
        collect_type_dimensions(def.ty.as_ref(), &mut dims);
        for param in &def.params {
            collect_type_dimensions(param.ty.as_ref(), &mut dims);
        }
    }
    for tmp in &program.temporaries {
        collect_type_dimensions(Some(&tmp.dtype), &mut dims);
    }
    for closure in &program.closures {
        collect_type_dimensions(closure.ty.as_ref(), &mut dims);
    }
    program.walk_exprs(&mut |e| expr_dimensions(e, &mut dims));
    dims
}

fn expr_dimensions(expr: &Expr, dims: &mut FxHashMap<String, Dimension>) {
    collect_type_dimensions(expr.ty.as_ref(), dims);
    if let ExprKind::Lambda { params, .. } = &expr.kind {
        for param in params {
            collect_type_dimensions(param.ty.as_ref(), dims);
        }
    }
}

// ── Entry points ───────────────────────────────────────────────────────

/// Infer the type of every node of `program`.
///
/// Program parameters must carry their types. With `allow_undeclared`,
/// references to undeclared symbols take the type already stored on the
/// reference (or stay deferred) instead of failing.
#[instrument(skip_all, fields(program = %program.id))]
pub fn infer(
    program: &Program,
    offset_provider: &OffsetProvider,
    allow_undeclared: bool,
) -> Result<Program, InferError> {
    let dims = program_dimensions(program, offset_provider);
    let mut engine = Engine::new(offset_provider, dims, allow_undeclared);
    let ty = engine.visit_program(program)?;
    debug!(
        closures = ty.closures.len(),
        functions = engine.fns.len(),
        unresolved = engine.cells.pending_subscriptions(),
        "type inference finished"
    );
    Ok(engine.annotate_program(program, ty))
}

/// Infer the types inside a single expression, with `bindings` giving the
/// types of symbols declared around it.
pub fn infer_expr(
    expr: &Expr,
    offset_provider: &OffsetProvider,
    bindings: &FxHashMap<String, TypeSpec>,
    allow_undeclared: bool,
) -> Result<Expr, InferError> {
    let mut dims = offset_provider.dimensions();
    expr.walk(&mut |e| expr_dimensions(e, &mut dims));
    for ty in bindings.values() {
        collect_type_dimensions(Some(ty), &mut dims);
    }
    let mut engine = Engine::new(offset_provider, dims, allow_undeclared);
    let scope: Scope = Rc::new(
        bindings
            .iter()
            .map(|(name, ty)| (name.clone(), Value::Type(ty.clone())))
            .collect(),
    );
    engine.visit(expr, &scope)?;
    Ok(engine.annotate_expr(expr))
}

/// The dimensions of a field argument, as seen through an iterator.
pub(crate) struct IteratorShape {
    pub(crate) dims: Vec<Dimension>,
    pub(crate) element: TypeSpec,
}

impl<'a> Engine<'a> {
    /// Split a field (or tuple of fields) into its shared dimensions and
    /// element type. Scalars count as zero-dimensional fields.
    pub(crate) fn field_shape(&self, site: &Expr, ty: &TypeSpec) -> Result<IteratorShape, InferError> {
        let mut dims: Option<Vec<Dimension>> = None;
        let element = ty
            .map_primitive_constituents(&mut |leaf| {
                let (leaf_dims, dtype) = match leaf {
                    TypeSpec::Field(field) => (field.dims.clone(), TypeSpec::Scalar(field.dtype)),
                    TypeSpec::Scalar(kind) => (Vec::new(), TypeSpec::Scalar(*kind)),
                    TypeSpec::Deferred => return Ok(TypeSpec::Deferred),
                    other => return Err(TypeErrorKind::ExpectedField(other.clone())),
                };
                if dims.is_none() {
                    dims = Some(leaf_dims);
                } else if dims.as_ref() != Some(&leaf_dims) {
                    return Err(TypeErrorKind::MismatchedTupleDimensions(ty.clone()));
                }
                Ok(dtype)
            })
            .map_err(|kind| self.type_error(site, kind))?;
        Ok(IteratorShape {
            dims: dims.unwrap_or_default(),
            element,
        })
    }

    /// Convert a field argument into the iterator a stencil receives.
    ///
    /// A local (neighbor) dimension is not a defined dimension of the
    /// iterator; it turns the element type into a list instead.
    pub(crate) fn field_to_iterator(
        &self,
        site: &Expr,
        position: PositionDims,
        ty: &TypeSpec,
    ) -> Result<TypeSpec, InferError> {
        if ty.is_deferred() {
            return Ok(TypeSpec::iterator(position, Vec::new(), TypeSpec::Deferred));
        }
        let shape = self.field_shape(site, ty)?;
        let locals = shape.dims.iter().filter(|d| d.is_local()).count();
        if locals > 1 {
            return Err(self.type_error(site, TypeErrorKind::MultipleLocalDimensions(ty.clone())));
        }
        let defined = shape.dims.into_iter().filter(|d| !d.is_local()).collect();
        let element = if locals == 1 {
            TypeSpec::list(shape.element)
        } else {
            shape.element
        };
        Ok(TypeSpec::iterator(position, defined, element))
    }
}
