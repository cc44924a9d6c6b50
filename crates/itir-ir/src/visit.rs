//! Generic traversal: pre-order walks and owned, child-wise rebuilding.
//!
//! Passes are written as plain recursive functions over [`ExprKind`]; these
//! helpers cover the "recurse into everything else" arm.

use crate::ir::{Expr, ExprKind, Program};

impl Expr {
    /// Visit every node of the tree in pre-order.
    pub fn walk<F: FnMut(&Expr)>(&self, f: &mut F) {
        f(self);
        match &self.kind {
            ExprKind::Lambda { body, .. } => body.walk(f),
            ExprKind::FunCall { fun, args } => {
                fun.walk(f);
                for arg in args {
                    arg.walk(f);
                }
            }
            ExprKind::Literal { .. }
            | ExprKind::OffsetLiteral { .. }
            | ExprKind::AxisLiteral { .. }
            | ExprKind::SymRef { .. } => {}
        }
    }

    /// Whether any node of the tree satisfies `pred`.
    pub fn any<F: FnMut(&Expr) -> bool>(&self, mut pred: F) -> bool {
        let mut found = false;
        self.walk(&mut |e| found = found || pred(e));
        found
    }

    /// Rebuild this node with `f` applied to each direct child.
    ///
    /// Type and location annotations of this node are kept.
    pub fn map_children<F: FnMut(Expr) -> Expr>(self, mut f: F) -> Expr {
        let result: Result<Expr, std::convert::Infallible> = self.try_map_children(|e| Ok(f(e)));
        match result {
            Ok(expr) => expr,
            Err(never) => match never {},
        }
    }

    pub fn try_map_children<E, F>(self, mut f: F) -> Result<Expr, E>
    where
        F: FnMut(Expr) -> Result<Expr, E>,
    {
        let Expr { kind, ty, location } = self;
        let kind = match kind {
            ExprKind::Lambda { params, body } => ExprKind::Lambda {
                params,
                body: Box::new(f(*body)?),
            },
            ExprKind::FunCall { fun, args } => ExprKind::FunCall {
                fun: Box::new(f(*fun)?),
                args: args.into_iter().map(&mut f).collect::<Result<_, _>>()?,
            },
            leaf => leaf,
        };
        Ok(Expr { kind, ty, location })
    }

    /// Rewrite the tree bottom-up: children first, then `f` on the rebuilt node.
    pub fn transform_up<F: FnMut(Expr) -> Expr>(self, f: &mut F) -> Expr {
        let rebuilt = self.map_children(|child| child.transform_up(f));
        f(rebuilt)
    }

    pub fn try_transform_up<E, F>(self, f: &mut F) -> Result<Expr, E>
    where
        F: FnMut(Expr) -> Result<Expr, E>,
    {
        let rebuilt = self.try_map_children(|child| child.try_transform_up(f))?;
        f(rebuilt)
    }
}

impl Program {
    /// Apply `f` to every computation root: function bodies, temporary
    /// domains, and closure domains, stencils and inputs. Closure outputs
    /// are left alone.
    pub fn map_exprs<F: FnMut(Expr) -> Expr>(self, mut f: F) -> Program {
        let result: Result<Program, std::convert::Infallible> = self.try_map_exprs(|e| Ok(f(e)));
        match result {
            Ok(program) => program,
            Err(never) => match never {},
        }
    }

    pub fn try_map_exprs<E, F>(mut self, mut f: F) -> Result<Program, E>
    where
        F: FnMut(Expr) -> Result<Expr, E>,
    {
        for def in &mut self.function_definitions {
            let body = std::mem::replace(&mut def.body, Expr::from(""));
            def.body = f(body)?;
        }
        for tmp in &mut self.temporaries {
            let domain = std::mem::replace(&mut tmp.domain, Expr::from(""));
            tmp.domain = f(domain)?;
        }
        for closure in &mut self.closures {
            let domain = std::mem::replace(&mut closure.domain, Expr::from(""));
            closure.domain = f(domain)?;
            let stencil = std::mem::replace(&mut closure.stencil, Expr::from(""));
            closure.stencil = f(stencil)?;
            for input in &mut closure.inputs {
                let expr = std::mem::replace(input, Expr::from(""));
                *input = f(expr)?;
            }
        }
        Ok(self)
    }

    /// Visit every expression of the program, including closure inputs
    /// and outputs, in pre-order.
    pub fn walk_exprs<F: FnMut(&Expr)>(&self, f: &mut F) {
        for def in &self.function_definitions {
            def.body.walk(f);
        }
        for tmp in &self.temporaries {
            tmp.domain.walk(f);
        }
        for closure in &self.closures {
            closure.domain.walk(f);
            closure.stencil.walk(f);
            closure.output.walk(f);
            for input in &closure.inputs {
                input.walk(f);
            }
        }
    }
}
