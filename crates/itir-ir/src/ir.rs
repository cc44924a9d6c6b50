//! The iterator IR node model.
//!
//! Expressions form a closed sum type ([`ExprKind`]). Every node carries an
//! optional resolved type and an optional source location; neither takes
//! part in equality or hashing, so two trees that differ only in their
//! annotations compare equal. This is what lets the pipeline detect a
//! fixpoint by comparing successive programs.

use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use itir_common::span::SourceLocation;
use itir_common::ty::{ScalarKind, TypeSpec};

use crate::builtins::Builtin;

/// The value of an offset literal: a constant displacement or an offset tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OffsetValue {
    Int(i64),
    Name(String),
}

/// A declared name: a lambda or function parameter, or a program parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sym {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ty: Option<TypeSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<SourceLocation>,
}

impl Sym {
    pub fn new(id: impl Into<String>) -> Self {
        Sym {
            id: id.into(),
            ty: None,
            location: None,
        }
    }

    pub fn typed(id: impl Into<String>, ty: TypeSpec) -> Self {
        Sym {
            id: id.into(),
            ty: Some(ty),
            location: None,
        }
    }
}

impl PartialEq for Sym {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Sym {}

impl Hash for Sym {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// The variants of an expression.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum ExprKind {
    /// A typed constant. `value` is the textual form (`"1"`, `"2.5"`, `"True"`).
    Literal { value: String, kind: ScalarKind },
    OffsetLiteral { value: OffsetValue },
    AxisLiteral { value: String },
    SymRef { id: String },
    Lambda { params: Vec<Sym>, body: Box<Expr> },
    FunCall { fun: Box<Expr>, args: Vec<Expr> },
}

/// An expression node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Expr {
    #[serde(flatten)]
    pub kind: ExprKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ty: Option<TypeSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<SourceLocation>,
}

impl PartialEq for Expr {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
    }
}

impl Eq for Expr {}

impl Hash for Expr {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.kind.hash(state);
    }
}

impl Expr {
    pub fn new(kind: ExprKind) -> Self {
        Expr {
            kind,
            ty: None,
            location: None,
        }
    }

    pub fn with_type(mut self, ty: TypeSpec) -> Self {
        self.ty = Some(ty);
        self
    }

    pub fn as_sym_ref(&self) -> Option<&str> {
        match &self.kind {
            ExprKind::SymRef { id } => Some(id),
            _ => None,
        }
    }

    pub fn as_fun_call(&self) -> Option<(&Expr, &[Expr])> {
        match &self.kind {
            ExprKind::FunCall { fun, args } => Some((fun, args)),
            _ => None,
        }
    }

    pub fn as_lambda(&self) -> Option<(&[Sym], &Expr)> {
        match &self.kind {
            ExprKind::Lambda { params, body } => Some((params, body)),
            _ => None,
        }
    }

    pub fn as_literal(&self) -> Option<(&str, ScalarKind)> {
        match &self.kind {
            ExprKind::Literal { value, kind } => Some((value, *kind)),
            _ => None,
        }
    }

    /// The builtin this expression names, unless a binding shadows it.
    pub fn as_builtin(&self) -> Option<Builtin> {
        self.as_sym_ref().and_then(Builtin::from_name)
    }

    pub fn is_sym_ref(&self) -> bool {
        matches!(self.kind, ExprKind::SymRef { .. })
    }

    pub fn is_literal(&self) -> bool {
        matches!(self.kind, ExprKind::Literal { .. })
    }

    /// Number of nodes in the tree rooted here.
    pub fn node_count(&self) -> usize {
        let mut count = 0;
        self.walk(&mut |_| count += 1);
        count
    }
}

impl From<&str> for Expr {
    fn from(id: &str) -> Self {
        Expr::new(ExprKind::SymRef { id: id.to_string() })
    }
}

impl From<String> for Expr {
    fn from(id: String) -> Self {
        Expr::new(ExprKind::SymRef { id })
    }
}

impl From<&Sym> for Expr {
    fn from(sym: &Sym) -> Self {
        Expr::new(ExprKind::SymRef { id: sym.id.clone() })
    }
}

/// A named, program-level function.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDefinition {
    pub id: String,
    pub params: Vec<Sym>,
    pub body: Expr,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ty: Option<TypeSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<SourceLocation>,
}

impl FunctionDefinition {
    pub fn new(id: impl Into<String>, params: Vec<Sym>, body: Expr) -> Self {
        FunctionDefinition {
            id: id.into(),
            params,
            body,
            ty: None,
            location: None,
        }
    }

    /// The equivalent anonymous lambda.
    pub fn to_lambda(&self) -> Expr {
        Expr {
            kind: ExprKind::Lambda {
                params: self.params.clone(),
                body: Box::new(self.body.clone()),
            },
            ty: self.ty.clone(),
            location: self.location.clone(),
        }
    }
}

impl PartialEq for FunctionDefinition {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.params == other.params && self.body == other.body
    }
}

impl Eq for FunctionDefinition {}

/// One domain-bounded, per-point computation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StencilClosure {
    pub domain: Expr,
    pub stencil: Expr,
    /// A field reference, or a `make_tuple` of field references.
    pub output: Expr,
    pub inputs: Vec<Expr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ty: Option<TypeSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<SourceLocation>,
}

/// A closure whose output is neither a reference nor a `make_tuple` call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("closure output must be a symbol reference or a `make_tuple` call, found `{0}`")]
pub struct MalformedClosure(pub String);

impl StencilClosure {
    /// Build a closure, rejecting outputs that are calls to anything but
    /// `make_tuple`.
    pub fn new(
        domain: Expr,
        stencil: Expr,
        output: Expr,
        inputs: Vec<Expr>,
    ) -> Result<Self, MalformedClosure> {
        let closure = StencilClosure {
            domain,
            stencil,
            output,
            inputs,
            ty: None,
            location: None,
        };
        closure.validate_output()?;
        Ok(closure)
    }

    pub fn validate_output(&self) -> Result<(), MalformedClosure> {
        fn valid(expr: &Expr) -> bool {
            match &expr.kind {
                ExprKind::SymRef { .. } => true,
                ExprKind::FunCall { fun, args } => {
                    fun.as_builtin() == Some(Builtin::MakeTuple) && args.iter().all(valid)
                }
                _ => false,
            }
        }
        if valid(&self.output) {
            Ok(())
        } else {
            Err(MalformedClosure(self.output.to_string()))
        }
    }
}

impl PartialEq for StencilClosure {
    fn eq(&self, other: &Self) -> bool {
        self.domain == other.domain
            && self.stencil == other.stencil
            && self.output == other.output
            && self.inputs == other.inputs
    }
}

impl Eq for StencilClosure {}

/// A compiler-introduced intermediate field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Temporary {
    pub id: String,
    pub domain: Expr,
    pub dtype: TypeSpec,
}

/// The top-level compilation unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Program {
    pub id: String,
    #[serde(default)]
    pub function_definitions: Vec<FunctionDefinition>,
    pub params: Vec<Sym>,
    pub closures: Vec<StencilClosure>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub temporaries: Vec<Temporary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ty: Option<TypeSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<SourceLocation>,
}

impl Program {
    pub fn new(id: impl Into<String>, params: Vec<Sym>, closures: Vec<StencilClosure>) -> Self {
        Program {
            id: id.into(),
            function_definitions: Vec::new(),
            params,
            closures,
            temporaries: Vec::new(),
            ty: None,
            location: None,
        }
    }

    pub fn with_function_definitions(mut self, defs: Vec<FunctionDefinition>) -> Self {
        self.function_definitions = defs;
        self
    }

    pub fn function_definition(&self, id: &str) -> Option<&FunctionDefinition> {
        self.function_definitions.iter().find(|def| def.id == id)
    }
}

impl PartialEq for Program {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.function_definitions == other.function_definitions
            && self.params == other.params
            && self.closures == other.closures
            && self.temporaries == other.temporaries
    }
}

impl Eq for Program {}
