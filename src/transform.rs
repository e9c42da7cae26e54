//! Transform surface AST to core AST
//!
//! This pass:
//! - Resolves macros to dedicated core variants (`$self`, `$paramN`,
//!   `$OneTime`, `$Relative`, `$Element`, `$Format`, resources)
//! - Desugars interpolated strings and `$Format` into `Format` nodes
//! - Rewrites `?.`/`?[` chains into `NullConditional` guards wrapping the
//!   remainder of the chain (re-entered through `ChainRef`)
//! - Assigns one-time memoization slots

use crate::ast::core::{ContextItem, Expr as CoreExpr, FormatPart};
use crate::ast::surface::{Expr as SurfaceExpr, Segment};
use crate::ast::Literal;

/// Transform a surface expression with a fresh slot allocator.
pub fn transform(expr: SurfaceExpr) -> CoreExpr {
    Transformer::new().transform(expr)
}

/// Desugaring context. One instance per compiled expression; one-time slots
/// index into the memoization cells of the owning compiled binding.
#[derive(Debug, Default)]
pub struct Transformer {
    next_slot: usize,
}

impl Transformer {
    pub fn new() -> Self {
        Transformer::default()
    }

    /// Number of one-time slots allocated so far.
    pub fn slots(&self) -> usize {
        self.next_slot
    }

    fn alloc_slot(&mut self) -> usize {
        let slot = self.next_slot;
        self.next_slot += 1;
        slot
    }

    pub fn transform(&mut self, expr: SurfaceExpr) -> CoreExpr {
        match expr {
            SurfaceExpr::Ident(name) => match param_index(&name, "arg") {
                Some(idx) => CoreExpr::Param(idx),
                None => CoreExpr::root(name),
            },
            SurfaceExpr::Literal(lit) => CoreExpr::Constant(lit),
            SurfaceExpr::Member(base, name) => {
                attach_to_chain(self.transform(*base), |target| CoreExpr::Member {
                    target: Some(Box::new(target)),
                    name,
                })
            }
            SurfaceExpr::NullMember(base, name) => CoreExpr::NullConditional {
                target: Box::new(self.transform(*base)),
                chain: Box::new(CoreExpr::Member {
                    target: Some(Box::new(CoreExpr::ChainRef)),
                    name,
                }),
            },
            SurfaceExpr::Index(base, args) => {
                let args = self.transform_all(args);
                attach_to_chain(self.transform(*base), |target| CoreExpr::Index {
                    target: Box::new(target),
                    args,
                })
            }
            SurfaceExpr::NullIndex(base, args) => CoreExpr::NullConditional {
                target: Box::new(self.transform(*base)),
                chain: Box::new(CoreExpr::Index {
                    target: Box::new(CoreExpr::ChainRef),
                    args: self.transform_all(args),
                }),
            },
            SurfaceExpr::Call(callee, args) => self.transform_call(*callee, args),
            SurfaceExpr::Binary(lhs, op, rhs) => CoreExpr::Binary(
                Box::new(self.transform(*lhs)),
                op,
                Box::new(self.transform(*rhs)),
            ),
            SurfaceExpr::Unary(op, operand) => {
                CoreExpr::Unary(op, Box::new(self.transform(*operand)))
            }
            SurfaceExpr::Conditional(test, if_true, if_false) => CoreExpr::Conditional {
                test: Box::new(self.transform(*test)),
                if_true: Box::new(self.transform(*if_true)),
                if_false: Box::new(self.transform(*if_false)),
            },
            SurfaceExpr::Lambda(params, body) => CoreExpr::Lambda {
                params,
                body: Box::new(self.transform(*body)),
            },
            SurfaceExpr::Interpolated(segments) => {
                let parts = segments
                    .into_iter()
                    .map(|segment| match segment {
                        Segment::Text(text) => FormatPart::Text(text),
                        Segment::Hole {
                            expr,
                            alignment,
                            format,
                        } => FormatPart::Arg {
                            expr: Box::new(self.transform(expr)),
                            alignment,
                            format,
                        },
                    })
                    .collect();
                CoreExpr::Format(parts)
            }
            SurfaceExpr::Macro(name, args) => self.transform_macro(name, args),
            SurfaceExpr::StaticMacro(name) => CoreExpr::OneTime {
                slot: self.alloc_slot(),
                body: Box::new(CoreExpr::Resource(name)),
            },
        }
    }

    fn transform_all(&mut self, exprs: Vec<SurfaceExpr>) -> Vec<CoreExpr> {
        exprs.into_iter().map(|e| self.transform(e)).collect()
    }

    fn transform_call(&mut self, callee: SurfaceExpr, args: Vec<SurfaceExpr>) -> CoreExpr {
        let args = self.transform_all(args);
        match callee {
            SurfaceExpr::Member(base, name) => {
                attach_to_chain(self.transform(*base), |target| CoreExpr::MethodCall {
                    target: Some(Box::new(target)),
                    name,
                    args,
                })
            }
            SurfaceExpr::NullMember(base, name) => CoreExpr::NullConditional {
                target: Box::new(self.transform(*base)),
                chain: Box::new(CoreExpr::MethodCall {
                    target: Some(Box::new(CoreExpr::ChainRef)),
                    name,
                    args,
                }),
            },
            SurfaceExpr::Ident(name) => CoreExpr::MethodCall {
                target: None,
                name,
                args,
            },
            other => CoreExpr::Invalid(format!(
                "expression {other:?} cannot be invoked; only methods and macros are callable"
            )),
        }
    }

    fn transform_macro(&mut self, name: String, args: Option<Vec<SurfaceExpr>>) -> CoreExpr {
        // Bare `$name`: context items, positional params, resource lookups.
        let Some(args) = args else {
            return match name.as_str() {
                "self" | "this" => CoreExpr::ContextRef(ContextItem::Target),
                "context" => CoreExpr::ContextRef(ContextItem::Context),
                "args" => CoreExpr::ContextRef(ContextItem::Args),
                "binding" => CoreExpr::ContextRef(ContextItem::Binding),
                _ => match param_index(&name, "param") {
                    Some(idx) => CoreExpr::Param(idx),
                    None => CoreExpr::Resource(name),
                },
            };
        };
        match name.as_str() {
            "OneTime" => {
                if args.len() != 1 {
                    return CoreExpr::Invalid(format!(
                        "$OneTime takes exactly one argument, got {}",
                        args.len()
                    ));
                }
                let slot = self.alloc_slot();
                let body = self.transform(args.into_iter().next().unwrap_or(SurfaceExpr::Literal(
                    Literal::Null,
                )));
                CoreExpr::OneTime {
                    slot,
                    body: Box::new(body),
                }
            }
            "Format" => self.transform_format(args),
            "Relative" | "RelativeSource" => {
                let mut iter = args.into_iter();
                let type_name = iter.next().and_then(|e| path_string(&e));
                let level = match iter.next() {
                    None => Some(1),
                    Some(SurfaceExpr::Literal(Literal::Int(n))) if n >= 1 => Some(n as u32),
                    Some(_) => None,
                };
                match (type_name, level) {
                    (Some(type_name), Some(level)) => {
                        CoreExpr::RelativeSource { type_name, level }
                    }
                    _ => CoreExpr::Invalid(
                        "$Relative expects a type name and an optional level >= 1".to_string(),
                    ),
                }
            }
            "Element" | "ElementSource" => match args.as_slice() {
                [SurfaceExpr::Ident(name)] => CoreExpr::ElementSource(name.clone()),
                [SurfaceExpr::Literal(Literal::String(name))] => {
                    CoreExpr::ElementSource(name.clone())
                }
                _ => CoreExpr::Invalid("$Element expects an element name".to_string()),
            },
            // Any other call form, zero-argument included, invokes a
            // registered resource method.
            _ => CoreExpr::ResourceCall(name, self.transform_all(args)),
        }
    }

    /// `$Format('{0} - {1:d}', a, b)`: the pattern must be a constant string;
    /// placeholders index into the remaining arguments.
    fn transform_format(&mut self, args: Vec<SurfaceExpr>) -> CoreExpr {
        let mut iter = args.into_iter();
        let Some(pattern) = iter.next() else {
            return CoreExpr::Invalid(
                "$Format expects a constant format string as its first argument".to_string(),
            );
        };
        let format_args: Vec<CoreExpr> = iter.map(|e| self.transform(e)).collect();
        match pattern {
            SurfaceExpr::Literal(Literal::String(s)) => {
                match parse_format_parts(&s, &format_args) {
                    Ok(parts) => CoreExpr::Format(parts),
                    Err(message) => CoreExpr::Invalid(message),
                }
            }
            // A single-quoted pattern arrives pre-parsed as an interpolation
            // whose holes are the argument indexes.
            SurfaceExpr::Interpolated(segments) => {
                let mut parts = Vec::new();
                for segment in segments {
                    match segment {
                        Segment::Text(text) => parts.push(FormatPart::Text(text)),
                        Segment::Hole {
                            expr: SurfaceExpr::Literal(Literal::Int(index)),
                            alignment,
                            format,
                        } => {
                            let arg = usize::try_from(index)
                                .ok()
                                .and_then(|i| format_args.get(i));
                            let Some(arg) = arg else {
                                return CoreExpr::Invalid(format!(
                                    "format placeholder {{{index}}} has no argument"
                                ));
                            };
                            parts.push(FormatPart::Arg {
                                expr: Box::new(arg.clone()),
                                alignment,
                                format,
                            });
                        }
                        Segment::Hole { .. } => {
                            return CoreExpr::Invalid(
                                "$Format placeholders must be argument indexes".to_string(),
                            );
                        }
                    }
                }
                CoreExpr::Format(parts)
            }
            _ => CoreExpr::Invalid(
                "$Format expects a constant format string as its first argument".to_string(),
            ),
        }
    }
}

/// Extend a null-conditional guard instead of wrapping it: `a?.B.C` skips
/// `.C` as well when `a` is Null, so later postfix steps must land inside
/// the guard's chain, not around the guard.
fn attach_to_chain(target: CoreExpr, build: impl FnOnce(CoreExpr) -> CoreExpr) -> CoreExpr {
    match target {
        CoreExpr::NullConditional { target, chain } => CoreExpr::NullConditional {
            target,
            chain: Box::new(build(*chain)),
        },
        other => build(other),
    }
}

/// `arg1`/`param3` style names: the 1-based trailing index, if well-formed.
fn param_index(name: &str, prefix: &str) -> Option<usize> {
    let digits = name.strip_prefix(prefix)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let n: usize = digits.parse().ok()?;
    (n >= 1).then(|| n - 1)
}

/// Dotted path of a surface member chain (`Demo.Window` parses as a member
/// access but names a type in `$Relative(...)`).
fn path_string(expr: &SurfaceExpr) -> Option<String> {
    match expr {
        SurfaceExpr::Ident(name) => Some(name.clone()),
        SurfaceExpr::Member(base, name) => Some(format!("{}.{}", path_string(base)?, name)),
        SurfaceExpr::Literal(Literal::String(s)) => Some(s.clone()),
        _ => None,
    }
}

/// Parse a `$Format` pattern (`{N[,align][:format]}`, `{{`/`}}` escapes)
/// against its argument list.
fn parse_format_parts(format: &str, args: &[CoreExpr]) -> Result<Vec<FormatPart>, String> {
    let mut parts = Vec::new();
    let mut text = String::new();
    let mut chars = format.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                text.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                text.push('}');
            }
            '}' => return Err("unmatched '}' in format string".to_string()),
            '{' => {
                if !text.is_empty() {
                    parts.push(FormatPart::Text(std::mem::take(&mut text)));
                }
                let mut index = String::new();
                while let Some(d) = chars.peek().filter(|d| d.is_ascii_digit()) {
                    index.push(*d);
                    chars.next();
                }
                let index: usize = index
                    .parse()
                    .map_err(|_| "format placeholder must start with an index".to_string())?;
                let expr = args
                    .get(index)
                    .cloned()
                    .ok_or_else(|| format!("format placeholder {{{index}}} has no argument"))?;

                let mut alignment = None;
                if chars.peek() == Some(&',') {
                    chars.next();
                    let mut digits = String::new();
                    if chars.peek() == Some(&'-') {
                        digits.push('-');
                        chars.next();
                    }
                    while let Some(d) = chars.peek().filter(|d| d.is_ascii_digit()) {
                        digits.push(*d);
                        chars.next();
                    }
                    alignment = Some(
                        digits
                            .parse::<i32>()
                            .map_err(|_| "malformed alignment in format string".to_string())?,
                    );
                }

                let mut fmt = None;
                if chars.peek() == Some(&':') {
                    chars.next();
                    let mut raw = String::new();
                    while let Some(&d) = chars.peek() {
                        if d == '}' {
                            break;
                        }
                        raw.push(d);
                        chars.next();
                    }
                    fmt = Some(raw);
                }

                if chars.next() != Some('}') {
                    return Err("unterminated format placeholder".to_string());
                }
                parts.push(FormatPart::Arg {
                    expr: Box::new(expr),
                    alignment,
                    format: fmt,
                });
            }
            _ => text.push(c),
        }
    }
    if !text.is_empty() {
        parts.push(FormatPart::Text(text));
    }
    Ok(parts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse;

    fn desugar(input: &str) -> CoreExpr {
        transform(parse(input).unwrap())
    }

    #[test]
    fn transform_simple_expr() {
        let core = desugar("x + y");
        assert!(matches!(core, CoreExpr::Binary(_, _, _)));
    }

    #[test]
    fn transform_root_member() {
        let core = desugar("SourceText");
        assert_eq!(core, CoreExpr::root("SourceText"));
    }

    #[test]
    fn transform_arg_ident_to_param() {
        assert_eq!(desugar("arg1"), CoreExpr::Param(0));
        assert_eq!(desugar("$param3"), CoreExpr::Param(2));
        // arg0 is not a positional argument name
        assert_eq!(desugar("arg0"), CoreExpr::root("arg0"));
    }

    #[test]
    fn transform_null_conditional_wraps_remainder() {
        // The guard wraps the *rest of the chain*: `.C` lands inside the
        // guard so it is skipped when `a` is Null.
        let core = desugar("a?.B.C");
        if let CoreExpr::NullConditional { chain, .. } = core {
            assert!(matches!(
                *chain,
                CoreExpr::Member { ref name, ref target } if name == "C"
                    && matches!(target.as_deref(), Some(CoreExpr::Member { .. }))
            ));
        } else {
            panic!("expected null-conditional at the top");
        }
    }

    #[test]
    fn transform_nested_null_conditional() {
        let core = desugar("a?.B?.C");
        assert!(matches!(core, CoreExpr::NullConditional { .. }));
    }

    #[test]
    fn transform_context_macros() {
        assert_eq!(desugar("$self"), CoreExpr::ContextRef(ContextItem::Target));
        assert_eq!(desugar("$this"), CoreExpr::ContextRef(ContextItem::Target));
        assert_eq!(
            desugar("$context"),
            CoreExpr::ContextRef(ContextItem::Context)
        );
        assert_eq!(desugar("$args"), CoreExpr::ContextRef(ContextItem::Args));
    }

    #[test]
    fn transform_one_time_and_static_macro() {
        let core = desugar("$OneTime(a) + $$Resource");
        if let CoreExpr::Binary(lhs, _, rhs) = core {
            assert!(matches!(*lhs, CoreExpr::OneTime { slot: 0, .. }));
            assert!(matches!(
                *rhs,
                CoreExpr::OneTime { slot: 1, ref body } if matches!(**body, CoreExpr::Resource(_))
            ));
        } else {
            panic!("expected binary");
        }
    }

    #[test]
    fn transform_relative_and_element() {
        assert_eq!(
            desugar("{RelativeSource Demo.Window, Level=2}"),
            CoreExpr::RelativeSource {
                type_name: "Demo.Window".to_string(),
                level: 2
            }
        );
        assert_eq!(
            desugar("$Relative(Window)"),
            CoreExpr::RelativeSource {
                type_name: "Window".to_string(),
                level: 1
            }
        );
        assert_eq!(
            desugar("{ElementSource Root}"),
            CoreExpr::ElementSource("Root".to_string())
        );
    }

    #[test]
    fn transform_format_macro() {
        let core = desugar("$Format('{0} and {1,3:d}', a, b)");
        if let CoreExpr::Format(parts) = core {
            assert_eq!(parts.len(), 3);
            assert!(matches!(
                &parts[2],
                FormatPart::Arg {
                    alignment: Some(3),
                    format: Some(f),
                    ..
                } if f == "d"
            ));
        } else {
            panic!("expected format node, got {core:?}");
        }
    }

    #[test]
    fn transform_format_double_quoted_pattern() {
        let core = desugar("$Format(\"{0}:{1}\", a, b)");
        if let CoreExpr::Format(parts) = core {
            assert_eq!(parts.len(), 3);
            assert!(matches!(&parts[1], FormatPart::Text(t) if t == ":"));
        } else {
            panic!("expected format node, got {core:?}");
        }
    }

    #[test]
    fn transform_format_rejects_bad_placeholder() {
        // index out of range, in both pattern spellings
        assert!(matches!(
            desugar("$Format('{9}', a)"),
            CoreExpr::Invalid(message) if message.contains("{9}")
        ));
        assert!(matches!(
            desugar("$Format(\"{9}\", a)"),
            CoreExpr::Invalid(message) if message.contains("{9}")
        ));
        // holes must be argument indexes, not expressions
        assert!(matches!(
            desugar("$Format('{a}', a)"),
            CoreExpr::Invalid(_)
        ));
    }

    #[test]
    fn transform_resource_lookup_and_call() {
        assert_eq!(
            desugar("$TestObject"),
            CoreExpr::Resource("TestObject".to_string())
        );
        assert!(matches!(
            desugar("$TestMethod(a, b)"),
            CoreExpr::ResourceCall(name, args) if name == "TestMethod" && args.len() == 2
        ));
        // a zero-argument call still invokes, it is not a value lookup
        assert!(matches!(
            desugar("$TestMethod()"),
            CoreExpr::ResourceCall(name, args) if name == "TestMethod" && args.is_empty()
        ));
    }

    #[test]
    fn transform_method_call_shapes() {
        assert!(matches!(
            desugar("model.Filter(x)"),
            CoreExpr::MethodCall {
                target: Some(_),
                ..
            }
        ));
        assert!(matches!(
            desugar("Filter(x)"),
            CoreExpr::MethodCall { target: None, .. }
        ));
    }
}
