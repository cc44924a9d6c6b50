//! Collapse chained shifts: `shift(b...)(shift(a...)(it))` becomes
//! `shift(a..., b...)(it)`.

use itir_ir::ir::{Expr, Program};
use itir_ir::make::shift;
use itir_ir::pattern::{applied_parts, is_applied_shift};

/// Normalize shifts in every expression of `program`.
pub fn normalize_shifts(program: Program) -> Program {
    program.map_exprs(normalize_shifts_expr)
}

/// Merge chained shifts in `expr` into a single `shift` call.
pub fn normalize_shifts_expr(expr: Expr) -> Expr {
    expr.transform_up(&mut |e| {
        if !is_applied_shift(&e) {
            return e;
        }
        let Some((outer_offsets, [it])) = applied_parts(&e) else {
            return e;
        };
        if !is_applied_shift(it) {
            return e;
        }
        let Some((inner_offsets, [base])) = applied_parts(it) else {
            return e;
        };
        let offsets: Vec<Expr> = inner_offsets.iter().chain(outer_offsets).cloned().collect();
        shift(offsets, base.clone())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use insta::assert_snapshot;
    use itir_ir::make::*;

    #[test]
    fn inner_offsets_come_first() {
        let e = shift(
            [offset("J"), offset_int(2)],
            shift([offset("I"), offset_int(1)], "it"),
        );
        assert_snapshot!(normalize_shifts_expr(e), @"shift(Iₒ, 1ₒ, Jₒ, 2ₒ)(it)");
    }

    #[test]
    fn collapses_deep_chains() {
        let e = deref(shift(
            [offset("K"), offset_int(-1)],
            shift([offset("J"), offset_int(0)], shift([offset("I"), offset_int(1)], "x")),
        ));
        assert_snapshot!(normalize_shifts_expr(e), @"deref(shift(Iₒ, 1ₒ, Jₒ, 0ₒ, Kₒ, -1ₒ)(x))");
    }

    #[test]
    fn leaves_single_shift_alone() {
        let e = shift([offset("I"), offset_int(1)], "it");
        assert_eq!(normalize_shifts_expr(e.clone()), e);
    }
}
