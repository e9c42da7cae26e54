//! Binding compilation
//!
//! Turns a desugared core expression into a `CompiledBinding`: conversions
//! between statically-known operand types are baked in as `Convert` nodes so
//! the evaluator skips promotion on the hot path, observable source paths are
//! discovered for change subscription, and one memoization cell is allocated
//! per `OneTime` slot.
//!
//! Source discovery collects maximal context-rooted member paths in
//! evaluation order, deduplicated on first occurrence. A null-conditional
//! access extends the path it guards, so `a?.b` observes `a.b`, not `a`.

use std::sync::{Arc, OnceLock};

use indexmap::IndexSet;

use crate::ast::core::{Expr, FormatPart};
use crate::ast::{BinaryOp, Literal, UnaryOp};
use crate::coerce::{self, Ty, TypeCode};
use crate::eval::{self, EvalContext, EvalError};
use crate::parse::ParseError;
use crate::value::Value;

/// One observable dependency of a compiled binding: a dotted member path
/// rooted at the data context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDescriptor {
    pub path: String,
}

/// An expression ready for repeated evaluation. Owns the memoization cells,
/// so `$OneTime` subtrees are computed once per compiled instance.
#[derive(Debug)]
pub struct CompiledBinding {
    expr: Expr,
    sources: Vec<SourceDescriptor>,
    cells: Arc<[OnceLock<Value>]>,
}

impl CompiledBinding {
    pub fn new(expr: Expr) -> Self {
        let expr = bake(expr);
        let mut walker = SourceWalker::default();
        walker.discover(&expr);
        let sources = walker
            .found
            .into_iter()
            .map(|path| SourceDescriptor { path })
            .collect();
        let cells = (0..slot_count(&expr))
            .map(|_| OnceLock::new())
            .collect::<Vec<_>>()
            .into();
        CompiledBinding {
            expr,
            sources,
            cells,
        }
    }

    /// Parse, desugar and compile a single source expression.
    pub fn from_source(input: &str) -> Result<Self, ParseError> {
        let surface = crate::parse::parse(input)?;
        Ok(Self::new(crate::transform::transform(surface)))
    }

    pub fn invoke(&self, ctx: &EvalContext, args: &[Value]) -> Result<Value, EvalError> {
        eval::eval(&self.expr, ctx, args, &self.cells)
    }

    pub fn sources(&self) -> &[SourceDescriptor] {
        &self.sources
    }

    pub fn expr(&self) -> &Expr {
        &self.expr
    }
}

// ============ Static conversion baking ============

/// Type of an expression when it is knowable without evaluation.
fn static_ty(expr: &Expr) -> Option<Ty> {
    match expr {
        Expr::Constant(lit) => match lit {
            Literal::Null => None,
            Literal::Bool(_) => Some(Ty::new(TypeCode::Boolean)),
            Literal::Int(n) => Some(if i32::try_from(*n).is_ok() {
                Ty::new(TypeCode::Int32)
            } else {
                Ty::new(TypeCode::Int64)
            }),
            Literal::Float(_) => Some(Ty::new(TypeCode::Double)),
            Literal::String(_) => Some(Ty::new(TypeCode::String)),
        },
        Expr::Format(_) => Some(Ty::new(TypeCode::String)),
        Expr::Convert { to, .. } => Some(*to),
        Expr::Unary(UnaryOp::Not, _) => Some(Ty::new(TypeCode::Boolean)),
        Expr::Binary(l, op, r) => match op {
            BinaryOp::Add
            | BinaryOp::Sub
            | BinaryOp::Mul
            | BinaryOp::Div
            | BinaryOp::Rem => {
                let (lt, rt) = (static_ty(l)?, static_ty(r)?);
                if *op == BinaryOp::Add
                    && (lt.code == TypeCode::String || rt.code == TypeCode::String)
                {
                    return Some(Ty::new(TypeCode::String));
                }
                coerce::unify(lt, rt)
            }
            BinaryOp::Eq
            | BinaryOp::Ne
            | BinaryOp::Lt
            | BinaryOp::Le
            | BinaryOp::Gt
            | BinaryOp::Ge
            | BinaryOp::And
            | BinaryOp::Or => Some(Ty::new(TypeCode::Boolean)),
            BinaryOp::Coalesce => None,
        },
        _ => None,
    }
}

fn promotes(op: BinaryOp) -> bool {
    // Short-circuit operators never see both operands at once.
    !op.is_short_circuit()
}

fn coerced(expr: Expr, from: Ty, to: Ty) -> Expr {
    if from == to {
        expr
    } else {
        Expr::Convert {
            to,
            expr: Box::new(expr),
        }
    }
}

/// Insert `Convert` nodes where both operand types are statically known and
/// promotion would otherwise happen on every evaluation.
fn bake(expr: Expr) -> Expr {
    match expr {
        Expr::Binary(l, op, r) => {
            let l = bake(*l);
            let r = bake(*r);
            if promotes(op) {
                if let (Some(lt), Some(rt)) = (static_ty(&l), static_ty(&r)) {
                    let concat = op == BinaryOp::Add
                        && (lt.code == TypeCode::String || rt.code == TypeCode::String);
                    if lt != rt && !concat {
                        if let Some(unified) = coerce::unify(lt, rt) {
                            return Expr::Binary(
                                Box::new(coerced(l, lt, unified)),
                                op,
                                Box::new(coerced(r, rt, unified)),
                            );
                        }
                    }
                }
            }
            Expr::Binary(Box::new(l), op, Box::new(r))
        }
        Expr::Member { target, name } => Expr::Member {
            target: target.map(|t| Box::new(bake(*t))),
            name,
        },
        Expr::MethodCall { target, name, args } => Expr::MethodCall {
            target: target.map(|t| Box::new(bake(*t))),
            name,
            args: args.into_iter().map(bake).collect(),
        },
        Expr::Index { target, args } => Expr::Index {
            target: Box::new(bake(*target)),
            args: args.into_iter().map(bake).collect(),
        },
        Expr::Unary(op, inner) => Expr::Unary(op, Box::new(bake(*inner))),
        Expr::Conditional {
            test,
            if_true,
            if_false,
        } => Expr::Conditional {
            test: Box::new(bake(*test)),
            if_true: Box::new(bake(*if_true)),
            if_false: Box::new(bake(*if_false)),
        },
        Expr::NullConditional { target, chain } => Expr::NullConditional {
            target: Box::new(bake(*target)),
            chain: Box::new(bake(*chain)),
        },
        Expr::Lambda { params, body } => Expr::Lambda {
            params,
            body: Box::new(bake(*body)),
        },
        Expr::ResourceCall(name, args) => {
            Expr::ResourceCall(name, args.into_iter().map(bake).collect())
        }
        Expr::OneTime { slot, body } => Expr::OneTime {
            slot,
            body: Box::new(bake(*body)),
        },
        Expr::Format(parts) => Expr::Format(
            parts
                .into_iter()
                .map(|part| match part {
                    FormatPart::Text(t) => FormatPart::Text(t),
                    FormatPart::Arg {
                        expr,
                        alignment,
                        format,
                    } => FormatPart::Arg {
                        expr: Box::new(bake(*expr)),
                        alignment,
                        format,
                    },
                })
                .collect(),
        ),
        Expr::Convert { to, expr } => Expr::Convert {
            to,
            expr: Box::new(bake(*expr)),
        },
        leaf => leaf,
    }
}

// ============ Source discovery ============

#[derive(Default)]
struct SourceWalker {
    /// Guard paths of enclosing null-conditional chains, innermost last.
    /// None for guards that are not context-rooted member paths.
    guards: Vec<Option<String>>,
    /// Names shadowed by enclosing lambda parameters.
    shadowed: Vec<String>,
    found: IndexSet<String>,
}

impl SourceWalker {
    /// Dotted context-rooted path of a pure member chain, or None when the
    /// chain passes through anything else.
    fn chain_path(&self, expr: &Expr) -> Option<String> {
        match expr {
            Expr::Member { target: None, name } => {
                (!self.shadowed.contains(name)).then(|| name.clone())
            }
            Expr::Member {
                target: Some(target),
                name,
            } => self
                .chain_path(target)
                .map(|path| format!("{path}.{name}")),
            Expr::ChainRef => self.guards.last().cloned().flatten(),
            _ => None,
        }
    }

    /// Path a null-conditional guard pins. Nested guards chain through, so
    /// `a?.b?.c` ends up observing `a.b.c`.
    fn guard_path(&self, expr: &Expr) -> Option<String> {
        match expr {
            Expr::NullConditional { target, chain } => {
                let root = self.guard_path(target)?;
                rooted_path(chain, &root)
            }
            other => self.chain_path(other),
        }
    }

    fn discover(&mut self, expr: &Expr) {
        match expr {
            Expr::Member { target, .. } => {
                if let Some(path) = self.chain_path(expr) {
                    self.found.insert(path);
                } else if let Some(target) = target {
                    self.discover(target);
                }
            }
            Expr::ChainRef => {
                // A guard consumed by something other than a member access
                // (call receiver, index receiver) is itself the dependency.
                if let Some(path) = self.guards.last().cloned().flatten() {
                    self.found.insert(path);
                }
            }
            Expr::NullConditional { target, chain } => {
                let guard = self.guard_path(target);
                if guard.is_none() {
                    self.discover(target);
                }
                self.guards.push(guard);
                self.discover(chain);
                self.guards.pop();
            }
            Expr::MethodCall { target, args, .. } => {
                if let Some(target) = target {
                    self.discover(target);
                }
                for arg in args {
                    self.discover(arg);
                }
            }
            Expr::Index { target, args } => {
                self.discover(target);
                for arg in args {
                    self.discover(arg);
                }
            }
            Expr::Unary(_, inner) => self.discover(inner),
            Expr::Binary(l, _, r) => {
                self.discover(l);
                self.discover(r);
            }
            Expr::Conditional {
                test,
                if_true,
                if_false,
            } => {
                self.discover(test);
                self.discover(if_true);
                self.discover(if_false);
            }
            Expr::Lambda { params, body } => {
                let depth = self.shadowed.len();
                self.shadowed.extend(params.iter().cloned());
                self.discover(body);
                self.shadowed.truncate(depth);
            }
            Expr::ResourceCall(_, args) => {
                for arg in args {
                    self.discover(arg);
                }
            }
            Expr::OneTime { body, .. } => self.discover(body),
            Expr::Format(parts) => {
                for part in parts {
                    if let FormatPart::Arg { expr, .. } = part {
                        self.discover(expr);
                    }
                }
            }
            Expr::Convert { expr, .. } => self.discover(expr),
            Expr::Constant(_)
            | Expr::Param(_)
            | Expr::ContextRef(_)
            | Expr::Resource(_)
            | Expr::RelativeSource { .. }
            | Expr::ElementSource(_)
            | Expr::Invalid(_) => {}
        }
    }
}

/// Dotted path of a member chain rooted at `ChainRef`, with `root` standing
/// in for the guard value.
fn rooted_path(chain: &Expr, root: &str) -> Option<String> {
    match chain {
        Expr::ChainRef => Some(root.to_string()),
        Expr::Member {
            target: Some(target),
            name,
        } => rooted_path(target, root).map(|path| format!("{path}.{name}")),
        _ => None,
    }
}

// ============ Memoization slots ============

fn slot_count(expr: &Expr) -> usize {
    match expr {
        Expr::OneTime { slot, body } => (slot + 1).max(slot_count(body)),
        Expr::Member { target, .. } => target.as_deref().map(slot_count).unwrap_or(0),
        Expr::MethodCall { target, args, .. } => args
            .iter()
            .map(slot_count)
            .chain(target.as_deref().map(slot_count))
            .max()
            .unwrap_or(0),
        Expr::Index { target, args } => args
            .iter()
            .map(slot_count)
            .chain([slot_count(target)])
            .max()
            .unwrap_or(0),
        Expr::Unary(_, inner) => slot_count(inner),
        Expr::Binary(l, _, r) => slot_count(l).max(slot_count(r)),
        Expr::Conditional {
            test,
            if_true,
            if_false,
        } => slot_count(test).max(slot_count(if_true)).max(slot_count(if_false)),
        Expr::NullConditional { target, chain } => slot_count(target).max(slot_count(chain)),
        Expr::Lambda { body, .. } => slot_count(body),
        Expr::ResourceCall(_, args) => args.iter().map(slot_count).max().unwrap_or(0),
        Expr::Format(parts) => parts
            .iter()
            .filter_map(|p| match p {
                FormatPart::Arg { expr, .. } => Some(slot_count(expr)),
                FormatPart::Text(_) => None,
            })
            .max()
            .unwrap_or(0),
        Expr::Convert { expr, .. } => slot_count(expr),
        _ => 0,
    }
}

// ============ Sanity Tests ============

#[cfg(test)]
mod tests {
    use super::*;
    use crate::member::{NoMemberResolver, NoTreeNavigator};

    fn compiled(src: &str) -> CompiledBinding {
        CompiledBinding::from_source(src).unwrap()
    }

    fn paths(binding: &CompiledBinding) -> Vec<&str> {
        binding.sources().iter().map(|s| s.path.as_str()).collect()
    }

    #[test]
    fn sources_in_evaluation_order_deduplicated() {
        let binding = compiled("a + b + c == d");
        assert_eq!(paths(&binding), ["a", "b", "c", "d"]);
        let binding = compiled("a + b + a");
        assert_eq!(paths(&binding), ["a", "b"]);
    }

    #[test]
    fn nested_paths_are_maximal() {
        let binding = compiled("A.B.C + A.B");
        assert_eq!(paths(&binding), ["A.B.C", "A.B"]);
    }

    #[test]
    fn null_guard_extends_the_discovered_path() {
        let binding = compiled("a?.b + x");
        assert_eq!(paths(&binding), ["a.b", "x"]);
        // a guarded call receiver pins the guard path itself
        let binding = compiled("a?.ToString()");
        assert_eq!(paths(&binding), ["a"]);
        // nested guards chain into one maximal path
        let binding = compiled("a?.b?.c");
        assert_eq!(paths(&binding), ["a.b.c"]);
    }

    #[test]
    fn index_access_observes_the_receiver_path() {
        let binding = compiled("Items[0].Name");
        assert_eq!(paths(&binding), ["Items"]);
    }

    #[test]
    fn lambda_parameters_are_not_sources() {
        let binding = compiled("x => x + y");
        assert_eq!(paths(&binding), ["y"]);
    }

    #[test]
    fn macros_and_params_are_not_sources() {
        let binding = compiled("$context == $self && $param1 == null");
        assert!(paths(&binding).is_empty());
    }

    #[test]
    fn one_cell_per_memoization_slot() {
        let binding = compiled("$OneTime(1) + $OneTime(2)");
        assert_eq!(binding.cells.len(), 2);
        assert!(compiled("1 + 2").cells.is_empty());
    }

    #[test]
    fn mixed_constant_operands_get_baked_conversions() {
        let binding = compiled("1 + 2.5");
        let Expr::Binary(l, BinaryOp::Add, _) = binding.expr() else {
            panic!("expected binary");
        };
        assert!(matches!(
            l.as_ref(),
            Expr::Convert { to, .. } if to.code == TypeCode::Double
        ));
    }

    #[test]
    fn invoke_evaluates_the_expression() {
        let ctx = EvalContext::new(Arc::new(NoMemberResolver), Arc::new(NoTreeNavigator));
        let value = compiled("2 * 3 + 4").invoke(&ctx, &[]).unwrap();
        assert_eq!(value, Value::Int32(6 + 4));
    }
}
