//! Pretty-printer for surface expressions
//!
//! Renders a surface tree back to parseable source, inserting parentheses
//! only where precedence demands them. `parse(pretty(e)) == e` holds for any
//! tree the parser can produce (brace-macro forms re-print as their
//! normalized `$Relative`/`$Element` macro spelling).

use std::fmt;

use crate::ast::surface::{Expr, Segment};
use crate::ast::{BinaryOp, Literal, UnaryOp};

pub fn pretty(expr: &Expr) -> String {
    expr.to_string()
}

// Binding strength, loosest to tightest. Mirrors the parser's chain.
const LAMBDA: u8 = 1;
const CONDITIONAL: u8 = 2;
const COALESCE: u8 = 3;
const UNARY: u8 = 12;
const POSTFIX: u8 = 13;
const PRIMARY: u8 = 14;

fn prec(expr: &Expr) -> u8 {
    match expr {
        Expr::Lambda(..) => LAMBDA,
        Expr::Conditional(..) => CONDITIONAL,
        Expr::Binary(_, op, _) => bin_prec(*op),
        Expr::Unary(..) => UNARY,
        Expr::Member(..)
        | Expr::NullMember(..)
        | Expr::Index(..)
        | Expr::NullIndex(..)
        | Expr::Call(..) => POSTFIX,
        _ => PRIMARY,
    }
}

fn bin_prec(op: BinaryOp) -> u8 {
    match op {
        BinaryOp::Coalesce => COALESCE,
        BinaryOp::Or => 4,
        BinaryOp::And => 5,
        BinaryOp::Eq | BinaryOp::Ne => 6,
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => 7,
        BinaryOp::Add | BinaryOp::Sub => 8,
        BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => 9,
    }
}

fn op_symbol(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Add => "+",
        BinaryOp::Sub => "-",
        BinaryOp::Mul => "*",
        BinaryOp::Div => "/",
        BinaryOp::Rem => "%",
        BinaryOp::Eq => "==",
        BinaryOp::Ne => "!=",
        BinaryOp::Lt => "<",
        BinaryOp::Le => "<=",
        BinaryOp::Gt => ">",
        BinaryOp::Ge => ">=",
        BinaryOp::And => "&&",
        BinaryOp::Or => "||",
        BinaryOp::Coalesce => "??",
    }
}

/// Print `expr`, parenthesizing when it binds looser than `min`.
fn fmt_prec(expr: &Expr, min: u8, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if prec(expr) < min {
        write!(f, "(")?;
        fmt_expr(expr, f)?;
        write!(f, ")")
    } else {
        fmt_expr(expr, f)
    }
}

fn fmt_args(args: &[Expr], f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        fmt_prec(arg, 0, f)?;
    }
    Ok(())
}

fn fmt_expr(expr: &Expr, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match expr {
        Expr::Ident(name) => write!(f, "{name}"),
        Expr::Literal(lit) => write!(f, "{lit}"),

        Expr::Member(base, name) => {
            fmt_prec(base, POSTFIX, f)?;
            write!(f, ".{name}")
        }
        Expr::NullMember(base, name) => {
            fmt_prec(base, POSTFIX, f)?;
            write!(f, "?.{name}")
        }
        Expr::Index(base, args) => {
            fmt_prec(base, POSTFIX, f)?;
            write!(f, "[")?;
            fmt_args(args, f)?;
            write!(f, "]")
        }
        Expr::NullIndex(base, args) => {
            fmt_prec(base, POSTFIX, f)?;
            write!(f, "?[")?;
            fmt_args(args, f)?;
            write!(f, "]")
        }
        Expr::Call(callee, args) => {
            fmt_prec(callee, POSTFIX, f)?;
            write!(f, "(")?;
            fmt_args(args, f)?;
            write!(f, ")")
        }

        Expr::Unary(op, inner) => {
            let symbol = match op {
                UnaryOp::Not => "!",
                UnaryOp::Neg => "-",
            };
            write!(f, "{symbol}")?;
            fmt_prec(inner, UNARY, f)
        }

        Expr::Binary(left, op, right) => {
            let p = bin_prec(*op);
            // `??` is right-associative; everything else associates left.
            let (lmin, rmin) = if *op == BinaryOp::Coalesce {
                (p + 1, p)
            } else {
                (p, p + 1)
            };
            fmt_prec(left, lmin, f)?;
            write!(f, " {} ", op_symbol(*op))?;
            fmt_prec(right, rmin, f)
        }

        Expr::Conditional(test, if_true, if_false) => {
            fmt_prec(test, COALESCE, f)?;
            write!(f, " ? ")?;
            fmt_prec(if_true, CONDITIONAL, f)?;
            write!(f, " : ")?;
            fmt_prec(if_false, CONDITIONAL, f)
        }

        Expr::Lambda(params, body) => {
            match params.as_slice() {
                [single] => write!(f, "{single}")?,
                many => {
                    write!(f, "(")?;
                    for (i, p) in many.iter().enumerate() {
                        if i > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{p}")?;
                    }
                    write!(f, ")")?;
                }
            }
            write!(f, " => ")?;
            fmt_prec(body, 0, f)
        }

        Expr::Interpolated(segments) => {
            write!(f, "'")?;
            for segment in segments {
                match segment {
                    Segment::Text(text) => {
                        for c in text.chars() {
                            match c {
                                '{' => write!(f, "{{{{")?,
                                '}' => write!(f, "}}}}")?,
                                '\'' => write!(f, "\\'")?,
                                '\\' => write!(f, "\\\\")?,
                                '\n' => write!(f, "\\n")?,
                                '\t' => write!(f, "\\t")?,
                                '\r' => write!(f, "\\r")?,
                                other => write!(f, "{other}")?,
                            }
                        }
                    }
                    Segment::Hole {
                        expr,
                        alignment,
                        format,
                    } => {
                        write!(f, "{{")?;
                        fmt_prec(expr, 0, f)?;
                        if let Some(alignment) = alignment {
                            write!(f, ",{alignment}")?;
                        }
                        if let Some(format) = format {
                            write!(f, ":{format}")?;
                        }
                        write!(f, "}}")?;
                    }
                }
            }
            write!(f, "'")
        }

        Expr::Macro(name, args) => {
            write!(f, "${name}")?;
            if let Some(args) = args {
                write!(f, "(")?;
                fmt_args(args, f)?;
                write!(f, ")")?;
            }
            Ok(())
        }
        Expr::StaticMacro(name) => write!(f, "$${name}"),
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_prec(self, 0, f)
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Null => write!(f, "null"),
            Literal::Bool(b) => write!(f, "{b}"),
            Literal::Int(n) => write!(f, "{n}"),
            // Debug keeps the decimal point, so the reparse stays a float.
            Literal::Float(v) => write!(f, "{v:?}"),
            Literal::String(s) => {
                write!(f, "\"")?;
                for c in s.chars() {
                    match c {
                        '"' => write!(f, "\\\"")?,
                        '\\' => write!(f, "\\\\")?,
                        '\n' => write!(f, "\\n")?,
                        '\t' => write!(f, "\\t")?,
                        '\r' => write!(f, "\\r")?,
                        '\0' => write!(f, "\\0")?,
                        other => write!(f, "{other}")?,
                    }
                }
                write!(f, "\"")
            }
        }
    }
}

// ============ Sanity Tests ============
