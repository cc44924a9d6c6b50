//! Type specifications produced by type inference.
//!
//! These are the *results* of inference, never parsed from source. Every
//! IR node carries an optional `TypeSpec`; the inference engine fills it in
//! and later passes (temporary extraction, tuple collapsing) read it back.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::dimension::Dimension;

/// Primitive scalar data types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalarKind {
    Bool,
    Int32,
    Int64,
    Float32,
    Float64,
}

impl ScalarKind {
    pub const ALL: [ScalarKind; 5] = [
        ScalarKind::Bool,
        ScalarKind::Int32,
        ScalarKind::Int64,
        ScalarKind::Float32,
        ScalarKind::Float64,
    ];

    /// The builtin name of this scalar type (`int32`, `float64`, ...).
    pub fn name(self) -> &'static str {
        match self {
            ScalarKind::Bool => "bool",
            ScalarKind::Int32 => "int32",
            ScalarKind::Int64 => "int64",
            ScalarKind::Float32 => "float32",
            ScalarKind::Float64 => "float64",
        }
    }

    /// Resolve a type-constructor builtin name.
    pub fn from_name(name: &str) -> Option<ScalarKind> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }

    pub fn is_integral(self) -> bool {
        matches!(self, ScalarKind::Int32 | ScalarKind::Int64)
    }

    pub fn is_floating_point(self) -> bool {
        matches!(self, ScalarKind::Float32 | ScalarKind::Float64)
    }

    pub fn is_numeric(self) -> bool {
        self.is_integral() || self.is_floating_point()
    }
}

impl fmt::Display for ScalarKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Where an iterator is positioned.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionDims {
    /// Not yet determined; compatible with any concrete position.
    Unknown,
    Known(Vec<Dimension>),
}

impl PositionDims {
    pub fn known(&self) -> Option<&[Dimension]> {
        match self {
            PositionDims::Unknown => None,
            PositionDims::Known(dims) => Some(dims),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldType {
    pub dims: Vec<Dimension>,
    pub dtype: ScalarKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IteratorType {
    pub position_dims: PositionDims,
    /// Dimensions the iterator can be dereferenced on. Empty means
    /// "defined everywhere".
    pub defined_dims: Vec<Dimension>,
    pub element_type: Box<TypeSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FunctionType {
    pub pos_args: Vec<TypeSpec>,
    #[serde(default)]
    pub kw_args: BTreeMap<String, TypeSpec>,
    pub returns: Box<TypeSpec>,
}

impl FunctionType {
    pub fn new(pos_args: Vec<TypeSpec>, returns: TypeSpec) -> Self {
        FunctionType {
            pos_args,
            kw_args: BTreeMap::new(),
            returns: Box::new(returns),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DomainType {
    pub dims: Vec<Dimension>,
}

/// The resolved value of an offset literal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OffsetLiteralType {
    /// A constant displacement.
    Int(i64),
    /// An offset tag naming a dimension or connectivity.
    Dim(Dimension),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StencilClosureType {
    pub domain: DomainType,
    pub stencil: FunctionType,
    pub output: TypeSpec,
    pub inputs: Vec<TypeSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProgramType {
    pub params: Vec<TypeSpec>,
    pub closures: Vec<StencilClosureType>,
}

/// A resolved (or deferred) type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeSpec {
    /// Placeholder meaning "not yet known".
    Deferred,
    Scalar(ScalarKind),
    Field(FieldType),
    Tuple(Vec<TypeSpec>),
    List(Box<TypeSpec>),
    Function(FunctionType),
    Iterator(IteratorType),
    Domain(DomainType),
    NamedRange(Dimension),
    OffsetLiteral(OffsetLiteralType),
    Dimension(Dimension),
    StencilClosure(Box<StencilClosureType>),
    Program(ProgramType),
}

impl TypeSpec {
    pub fn bool() -> TypeSpec {
        TypeSpec::Scalar(ScalarKind::Bool)
    }

    pub fn int32() -> TypeSpec {
        TypeSpec::Scalar(ScalarKind::Int32)
    }

    pub fn float64() -> TypeSpec {
        TypeSpec::Scalar(ScalarKind::Float64)
    }

    pub fn field(dims: Vec<Dimension>, dtype: ScalarKind) -> TypeSpec {
        TypeSpec::Field(FieldType { dims, dtype })
    }

    pub fn list(element: TypeSpec) -> TypeSpec {
        TypeSpec::List(Box::new(element))
    }

    pub fn iterator(
        position_dims: PositionDims,
        defined_dims: Vec<Dimension>,
        element_type: TypeSpec,
    ) -> TypeSpec {
        TypeSpec::Iterator(IteratorType {
            position_dims,
            defined_dims,
            element_type: Box::new(element_type),
        })
    }

    pub fn function(pos_args: Vec<TypeSpec>, returns: TypeSpec) -> TypeSpec {
        TypeSpec::Function(FunctionType::new(pos_args, returns))
    }

    pub fn is_deferred(&self) -> bool {
        matches!(self, TypeSpec::Deferred)
    }

    /// Whether this is a value type (scalar, field, list, or tuple of those).
    pub fn is_data_type(&self) -> bool {
        match self {
            TypeSpec::Scalar(_) | TypeSpec::Field(_) | TypeSpec::List(_) => true,
            TypeSpec::Tuple(elems) => elems.iter().all(TypeSpec::is_data_type),
            _ => false,
        }
    }

    /// Flatten nested tuples into their non-tuple leaves, in order.
    pub fn primitive_constituents(&self) -> Vec<&TypeSpec> {
        let mut out = Vec::new();
        fn walk<'t>(ty: &'t TypeSpec, out: &mut Vec<&'t TypeSpec>) {
            match ty {
                TypeSpec::Tuple(elems) => elems.iter().for_each(|e| walk(e, out)),
                other => out.push(other),
            }
        }
        walk(self, &mut out);
        out
    }

    /// Rebuild this type with `f` applied to every non-tuple leaf.
    pub fn map_primitive_constituents<E>(
        &self,
        f: &mut impl FnMut(&TypeSpec) -> Result<TypeSpec, E>,
    ) -> Result<TypeSpec, E> {
        match self {
            TypeSpec::Tuple(elems) => Ok(TypeSpec::Tuple(
                elems
                    .iter()
                    .map(|e| e.map_primitive_constituents(f))
                    .collect::<Result<_, _>>()?,
            )),
            other => f(other),
        }
    }

    /// Every dimension mentioned anywhere inside this type.
    pub fn dimensions(&self) -> Vec<&Dimension> {
        let mut out = Vec::new();
        self.collect_dimensions(&mut out);
        out
    }

    fn collect_dimensions<'t>(&'t self, out: &mut Vec<&'t Dimension>) {
        match self {
            TypeSpec::Deferred | TypeSpec::Scalar(_) => {}
            TypeSpec::Field(field) => out.extend(field.dims.iter()),
            TypeSpec::Tuple(elems) => elems.iter().for_each(|e| e.collect_dimensions(out)),
            TypeSpec::List(elem) => elem.collect_dimensions(out),
            TypeSpec::Function(fun) => fun.collect_dimensions(out),
            TypeSpec::Iterator(it) => {
                if let PositionDims::Known(dims) = &it.position_dims {
                    out.extend(dims.iter());
                }
                out.extend(it.defined_dims.iter());
                it.element_type.collect_dimensions(out);
            }
            TypeSpec::Domain(domain) => out.extend(domain.dims.iter()),
            TypeSpec::NamedRange(dim) | TypeSpec::Dimension(dim) => out.push(dim),
            TypeSpec::OffsetLiteral(OffsetLiteralType::Dim(dim)) => out.push(dim),
            TypeSpec::OffsetLiteral(OffsetLiteralType::Int(_)) => {}
            TypeSpec::StencilClosure(closure) => closure.collect_dimensions(out),
            TypeSpec::Program(program) => {
                program.params.iter().for_each(|p| p.collect_dimensions(out));
                program
                    .closures
                    .iter()
                    .for_each(|c| c.collect_dimensions(out));
            }
        }
    }

    /// Whether `other` may replace `self` on an already-typed node.
    ///
    /// Iterators with unknown position match any position, and an empty
    /// `defined_dims` matches any defined dimensions. `Deferred` is
    /// compatible with everything since it only marks a missing type.
    /// Everything else requires structural equality.
    pub fn is_compatible_with(&self, other: &TypeSpec) -> bool {
        match (self, other) {
            (TypeSpec::Deferred, _) | (_, TypeSpec::Deferred) => true,
            (TypeSpec::Iterator(a), TypeSpec::Iterator(b)) => {
                let positions_match = match (&a.position_dims, &b.position_dims) {
                    (PositionDims::Known(pa), PositionDims::Known(pb)) => pa == pb,
                    _ => true,
                };
                let defined_match = a.defined_dims.is_empty()
                    || b.defined_dims.is_empty()
                    || a.defined_dims == b.defined_dims;
                positions_match
                    && defined_match
                    && a.element_type.is_compatible_with(&b.element_type)
            }
            (TypeSpec::Tuple(a), TypeSpec::Tuple(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.is_compatible_with(y))
            }
            (TypeSpec::List(a), TypeSpec::List(b)) => a.is_compatible_with(b),
            (TypeSpec::Function(a), TypeSpec::Function(b)) => a.is_compatible_with(b),
            (a, b) => a == b,
        }
    }
}

impl FunctionType {
    fn collect_dimensions<'t>(&'t self, out: &mut Vec<&'t Dimension>) {
        self.pos_args.iter().for_each(|a| a.collect_dimensions(out));
        self.kw_args.values().for_each(|a| a.collect_dimensions(out));
        self.returns.collect_dimensions(out);
    }

    pub fn is_compatible_with(&self, other: &FunctionType) -> bool {
        self.pos_args.len() == other.pos_args.len()
            && self
                .pos_args
                .iter()
                .zip(&other.pos_args)
                .all(|(a, b)| a.is_compatible_with(b))
            && self.kw_args.len() == other.kw_args.len()
            && self
                .kw_args
                .iter()
                .zip(&other.kw_args)
                .all(|((ka, a), (kb, b))| ka == kb && a.is_compatible_with(b))
            && self.returns.is_compatible_with(&other.returns)
    }
}

impl StencilClosureType {
    fn collect_dimensions<'t>(&'t self, out: &mut Vec<&'t Dimension>) {
        out.extend(self.domain.dims.iter());
        self.stencil.collect_dimensions(out);
        self.output.collect_dimensions(out);
        self.inputs.iter().for_each(|i| i.collect_dimensions(out));
    }
}

// ── Display ────────────────────────────────────────────────────────────

fn write_list<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: &[T]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", item)?;
    }
    Ok(())
}

fn dim_names(dims: &[Dimension]) -> Vec<&str> {
    dims.iter().map(|d| d.value.as_str()).collect()
}

impl fmt::Display for FunctionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        write_list(f, &self.pos_args)?;
        for (i, (name, ty)) in self.kw_args.iter().enumerate() {
            if i > 0 || !self.pos_args.is_empty() {
                write!(f, ", ")?;
            }
            write!(f, "{}: {}", name, ty)?;
        }
        write!(f, ") -> {}", self.returns)
    }
}

impl fmt::Display for TypeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeSpec::Deferred => write!(f, "deferred"),
            TypeSpec::Scalar(kind) => write!(f, "{}", kind),
            TypeSpec::Field(field) => {
                write!(f, "Field[[{}], {}]", dim_names(&field.dims).join(", "), field.dtype)
            }
            TypeSpec::Tuple(elems) => {
                write!(f, "tuple[")?;
                write_list(f, elems)?;
                write!(f, "]")
            }
            TypeSpec::List(elem) => write!(f, "list[{}]", elem),
            TypeSpec::Function(fun) => write!(f, "{}", fun),
            TypeSpec::Iterator(it) => {
                let position = match &it.position_dims {
                    PositionDims::Unknown => "?".to_string(),
                    PositionDims::Known(dims) => format!("[{}]", dim_names(dims).join(", ")),
                };
                write!(
                    f,
                    "It[{}, [{}], {}]",
                    position,
                    dim_names(&it.defined_dims).join(", "),
                    it.element_type
                )
            }
            TypeSpec::Domain(domain) => {
                write!(f, "Domain[{}]", dim_names(&domain.dims).join(", "))
            }
            TypeSpec::NamedRange(dim) => write!(f, "NamedRange[{}]", dim.value),
            TypeSpec::OffsetLiteral(OffsetLiteralType::Int(value)) => write!(f, "Offset[{}]", value),
            TypeSpec::OffsetLiteral(OffsetLiteralType::Dim(dim)) => write!(f, "Offset[{}]", dim.value),
            TypeSpec::Dimension(dim) => write!(f, "Dimension[{}]", dim.value),
            TypeSpec::StencilClosure(closure) => {
                write!(f, "closure[{} @ Domain[{}]]", closure.stencil, dim_names(&closure.domain.dims).join(", "))
            }
            TypeSpec::Program(program) => {
                write!(f, "program[")?;
                write_list(f, &program.params)?;
                write!(f, "; {} closures]", program.closures.len())
            }
        }
    }
}
