//! Human-readable rendering of IR nodes.
//!
//! The format is compact and unambiguous so it doubles as the snapshot
//! format in tests:
//!
//! ```text
//! lap(inp, out) {
//!   f = λ(x) → deref(x);
//!   out ← (λ(it) → f(shift(Iₒ, 1ₒ)(it)))(inp) @ cartesian_domain(named_range(IDimₐ, 0, n));
//! }
//! ```

use std::fmt;

use crate::ir::{
    Expr, ExprKind, FunctionDefinition, OffsetValue, Program, StencilClosure, Sym, Temporary,
};

fn write_comma_separated<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: &[T]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", item)?;
    }
    Ok(())
}

impl fmt::Display for Sym {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

impl fmt::Display for OffsetValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OffsetValue::Int(value) => write!(f, "{}", value),
            OffsetValue::Name(name) => f.write_str(name),
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ExprKind::Literal { value, .. } => f.write_str(value),
            ExprKind::OffsetLiteral { value } => write!(f, "{}ₒ", value),
            ExprKind::AxisLiteral { value } => write!(f, "{}ₐ", value),
            ExprKind::SymRef { id } => f.write_str(id),
            ExprKind::Lambda { params, body } => {
                write!(f, "λ(")?;
                write_comma_separated(f, params)?;
                write!(f, ") → {}", body)
            }
            ExprKind::FunCall { fun, args } => {
                if matches!(fun.kind, ExprKind::Lambda { .. }) {
                    write!(f, "({})", fun)?;
                } else {
                    write!(f, "{}", fun)?;
                }
                write!(f, "(")?;
                write_comma_separated(f, args)?;
                write!(f, ")")
            }
        }
    }
}

impl fmt::Display for FunctionDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = λ(", self.id)?;
        write_comma_separated(f, &self.params)?;
        write!(f, ") → {};", self.body)
    }
}

impl fmt::Display for StencilClosure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ← ({})(", self.output, self.stencil)?;
        write_comma_separated(f, &self.inputs)?;
        write!(f, ") @ {};", self.domain)
    }
}

impl fmt::Display for Temporary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} = temporary(domain={}, dtype={});",
            self.id, self.domain, self.dtype
        )
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.id)?;
        write_comma_separated(f, &self.params)?;
        writeln!(f, ") {{")?;
        for def in &self.function_definitions {
            writeln!(f, "  {}", def)?;
        }
        for tmp in &self.temporaries {
            writeln!(f, "  {}", tmp)?;
        }
        for closure in &self.closures {
            writeln!(f, "  {}", closure)?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use crate::ir::{FunctionDefinition, Program, StencilClosure, Sym};
    use crate::make::*;
    use insta::assert_snapshot;

    #[test]
    fn prints_expressions() {
        assert_snapshot!(
            let_("x", shift([offset("I"), offset_int(1)], "it"), deref("x")),
            @"(λ(x) → deref(x))(shift(Iₒ, 1ₒ)(it))"
        );
        assert_snapshot!(named_range("IDim", int32(0), "n"), @"named_range(IDimₐ, 0, n)");
        assert_snapshot!(float64(1.0), @"1.0");
    }

    #[test]
    fn prints_program() {
        let closure = StencilClosure::new(
            cartesian_domain([named_range("IDim", int32(0), "n")]),
            lambda(["it"], call("f", [shift([offset("I"), offset_int(1)], "it")])),
            sym_ref("out"),
            vec![sym_ref("inp")],
        )
        .unwrap();
        let program = Program::new(
            "lap",
            vec![Sym::new("inp"), Sym::new("out"), Sym::new("n")],
            vec![closure],
        )
        .with_function_definitions(vec![FunctionDefinition::new(
            "f",
            vec![Sym::new("x")],
            deref("x"),
        )]);
        assert_snapshot!(program, @r"
        lap(inp, out, n) {
          f = λ(x) → deref(x);
          out ← (λ(it) → f(shift(Iₒ, 1ₒ)(it)))(inp) @ cartesian_domain(named_range(IDimₐ, 0, n));
        }
        ");
    }
}
