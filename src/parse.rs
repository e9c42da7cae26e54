//! Recursive-descent parser for binding expressions
//!
//! Produces `surface::Expr` which is then desugared to `core::Expr` before
//! compilation. Precedence, loosest to tightest: conditional `?:` -> `??` ->
//! `||` -> `&&` -> equality -> relational -> additive -> multiplicative ->
//! unary -> postfix (`.m`, `?.m`, `[i]`, `?[i]`, calls) -> primary.
//!
//! Backtracking runs on winnow checkpoints: every alternative is total and
//! rewinds on failure; only the committed path surfaces a `ParseError`.

use winnow::ascii::{digit1, multispace0};
use winnow::combinator::{alt, delimited, not, opt, preceded, repeat, separated, terminated};
use winnow::error::{ContextError, ErrMode};
use winnow::prelude::*;
use winnow::token::{one_of, take_while};

use crate::ast::surface::{Expr, Segment};
use crate::ast::{BinaryOp, Literal, UnaryOp};

type PResult<T> = winnow::ModalResult<T>;

#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub message: String,
    pub offset: usize,
    pub line: usize,
    pub column: usize,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} (line {}, column {}, offset {})",
            self.message, self.line, self.column, self.offset
        )
    }
}

impl std::error::Error for ParseError {}

/// Parse a complete binding expression from a string.
pub fn parse(input: &str) -> Result<Expr, ParseError> {
    let input = input.trim();
    let mut stream = input;
    match expr.parse_next(&mut stream) {
        Ok(parsed) => {
            if stream.trim().is_empty() {
                Ok(parsed)
            } else {
                let offset = trailing_offset(input, stream);
                Err(error_at(
                    "unexpected trailing input".to_string(),
                    input,
                    offset,
                ))
            }
        }
        Err(e) => {
            let offset = input.len().saturating_sub(stream.len());
            Err(error_at(format!("{e:?}"), input, offset))
        }
    }
}

pub(crate) fn error_at(message: String, input: &str, offset: usize) -> ParseError {
    let bounded = offset.min(input.len());
    let mut line = 1usize;
    let mut column = 1usize;
    for ch in input[..bounded].chars() {
        if ch == '\n' {
            line += 1;
            column = 1;
        } else {
            column += 1;
        }
    }
    ParseError {
        message,
        offset,
        line,
        column,
    }
}

fn trailing_offset(input: &str, trailing: &str) -> usize {
    let base = input.len().saturating_sub(trailing.len());
    let non_ws = trailing
        .char_indices()
        .find(|(_, ch)| !ch.is_whitespace())
        .map(|(idx, _)| idx)
        .unwrap_or(0);
    base + non_ws
}

fn backtrack<T>() -> PResult<T> {
    Err(ErrMode::Backtrack(ContextError::new()))
}

// ============ Precedence chain ============

pub(crate) fn expr(input: &mut &str) -> PResult<Expr> {
    conditional_expr.parse_next(input)
}

fn conditional_expr(input: &mut &str) -> PResult<Expr> {
    let test = coalesce_expr.parse_next(input)?;
    // `?` must not be the start of `??`, `?.` or `?[` (those belong to
    // tighter levels and have already had their chance).
    let tail = opt((
        (ws, '?', not(one_of(['?', '.', '['])), ws),
        conditional_expr,
        (ws, ':', ws),
        conditional_expr,
    ))
    .parse_next(input)?;
    Ok(match tail {
        Some((_, if_true, _, if_false)) => {
            Expr::Conditional(Box::new(test), Box::new(if_true), Box::new(if_false))
        }
        None => test,
    })
}

fn coalesce_expr(input: &mut &str) -> PResult<Expr> {
    let left = or_expr.parse_next(input)?;
    // Right-associative: `a ?? b ?? c` is `a ?? (b ?? c)`.
    let rest = opt(preceded((ws, "??", ws), coalesce_expr)).parse_next(input)?;
    Ok(match rest {
        Some(right) => left.binop(BinaryOp::Coalesce, right),
        None => left,
    })
}

fn or_expr(input: &mut &str) -> PResult<Expr> {
    let first = and_expr.parse_next(input)?;
    let rest: Vec<Expr> = repeat(0.., preceded((ws, "||", ws), and_expr)).parse_next(input)?;
    Ok(rest
        .into_iter()
        .fold(first, |l, r| l.binop(BinaryOp::Or, r)))
}

fn and_expr(input: &mut &str) -> PResult<Expr> {
    let first = equality_expr.parse_next(input)?;
    let rest: Vec<Expr> = repeat(0.., preceded((ws, "&&", ws), equality_expr)).parse_next(input)?;
    Ok(rest
        .into_iter()
        .fold(first, |l, r| l.binop(BinaryOp::And, r)))
}

fn equality_expr(input: &mut &str) -> PResult<Expr> {
    let first = relational_expr.parse_next(input)?;
    let rest: Vec<(BinaryOp, Expr)> = repeat(
        0..,
        (ws, equality_op, ws, relational_expr).map(|(_, op, _, e)| (op, e)),
    )
    .parse_next(input)?;
    Ok(rest.into_iter().fold(first, |l, (op, r)| l.binop(op, r)))
}

fn equality_op(input: &mut &str) -> PResult<BinaryOp> {
    alt(("==".value(BinaryOp::Eq), "!=".value(BinaryOp::Ne))).parse_next(input)
}

fn relational_expr(input: &mut &str) -> PResult<Expr> {
    let first = additive_expr.parse_next(input)?;
    let rest: Vec<(BinaryOp, Expr)> = repeat(
        0..,
        (ws, relational_op, ws, additive_expr).map(|(_, op, _, e)| (op, e)),
    )
    .parse_next(input)?;
    Ok(rest.into_iter().fold(first, |l, (op, r)| l.binop(op, r)))
}

fn relational_op(input: &mut &str) -> PResult<BinaryOp> {
    alt((
        "<=".value(BinaryOp::Le),
        ">=".value(BinaryOp::Ge),
        "<".value(BinaryOp::Lt),
        ">".value(BinaryOp::Gt),
    ))
    .parse_next(input)
}

fn additive_expr(input: &mut &str) -> PResult<Expr> {
    let first = multiplicative_expr.parse_next(input)?;
    let rest: Vec<(BinaryOp, Expr)> = repeat(
        0..,
        (ws, additive_op, ws, multiplicative_expr).map(|(_, op, _, e)| (op, e)),
    )
    .parse_next(input)?;
    Ok(rest.into_iter().fold(first, |l, (op, r)| l.binop(op, r)))
}

fn additive_op(input: &mut &str) -> PResult<BinaryOp> {
    alt(('+'.value(BinaryOp::Add), '-'.value(BinaryOp::Sub))).parse_next(input)
}

fn multiplicative_expr(input: &mut &str) -> PResult<Expr> {
    let first = unary_expr.parse_next(input)?;
    let rest: Vec<(BinaryOp, Expr)> = repeat(
        0..,
        (ws, multiplicative_op, ws, unary_expr).map(|(_, op, _, e)| (op, e)),
    )
    .parse_next(input)?;
    Ok(rest.into_iter().fold(first, |l, (op, r)| l.binop(op, r)))
}

fn multiplicative_op(input: &mut &str) -> PResult<BinaryOp> {
    alt((
        '*'.value(BinaryOp::Mul),
        '/'.value(BinaryOp::Div),
        '%'.value(BinaryOp::Rem),
    ))
    .parse_next(input)
}

fn unary_expr(input: &mut &str) -> PResult<Expr> {
    alt((
        preceded(('!', ws), unary_expr).map(|e| Expr::Unary(UnaryOp::Not, Box::new(e))),
        preceded(('-', ws), unary_expr).map(|e| Expr::Unary(UnaryOp::Neg, Box::new(e))),
        postfix_expr,
    ))
    .parse_next(input)
}

// ============ Postfix chains ============

enum Postfix {
    Member(String),
    NullMember(String),
    Index(Vec<Expr>),
    NullIndex(Vec<Expr>),
    Call(Vec<Expr>),
}

fn postfix_expr(input: &mut &str) -> PResult<Expr> {
    let base = primary.parse_next(input)?;
    let ops: Vec<Postfix> = repeat(0.., postfix_op).parse_next(input)?;

    Ok(ops.into_iter().fold(base, |acc, op| match op {
        Postfix::Member(name) => Expr::Member(Box::new(acc), name),
        Postfix::NullMember(name) => Expr::NullMember(Box::new(acc), name),
        Postfix::Index(args) => Expr::Index(Box::new(acc), args),
        Postfix::NullIndex(args) => Expr::NullIndex(Box::new(acc), args),
        Postfix::Call(args) => Expr::Call(Box::new(acc), args),
    }))
}

fn postfix_op(input: &mut &str) -> PResult<Postfix> {
    preceded(
        ws,
        alt((
            preceded("?.", ident_str).map(Postfix::NullMember),
            preceded('.', ident_str).map(Postfix::Member),
            preceded('?', index_brackets).map(Postfix::NullIndex),
            index_brackets.map(Postfix::Index),
            call_parens.map(Postfix::Call),
        )),
    )
    .parse_next(input)
}

pub(crate) fn index_brackets(input: &mut &str) -> PResult<Vec<Expr>> {
    delimited(
        ('[', ws),
        separated(1.., expr, (ws, ',', ws)),
        (ws, ']'),
    )
    .parse_next(input)
}

fn call_parens(input: &mut &str) -> PResult<Vec<Expr>> {
    delimited(
        ('(', ws),
        opt(terminated(
            separated(1.., expr, (ws, ',', ws)),
            opt((ws, ',')), // trailing comma
        ))
        .map(Option::unwrap_or_default),
        (ws, ')'),
    )
    .parse_next(input)
}

// ============ Primary expressions ============

fn primary(input: &mut &str) -> PResult<Expr> {
    preceded(
        ws,
        alt((
            lambda_expr,
            paren_expr,
            interpolated_string,
            plain_string.map(Expr::Literal),
            static_macro,
            macro_expr,
            brace_macro,
            literal.map(Expr::Literal),
            ident_str.map(Expr::Ident),
        )),
    )
    .parse_next(input)
}

fn paren_expr(input: &mut &str) -> PResult<Expr> {
    delimited(('(', ws), expr, (ws, ')')).parse_next(input)
}

fn lambda_expr(input: &mut &str) -> PResult<Expr> {
    let params = alt((
        ident_str.map(|p| vec![p]),
        delimited(
            ('(', ws),
            separated(0.., ident_str, (ws, ',', ws)),
            (ws, ')'),
        ),
    ))
    .parse_next(input)?;
    let _ = (ws, "=>", ws).parse_next(input)?;
    let body = expr.parse_next(input)?;
    Ok(Expr::Lambda(params, Box::new(body)))
}

/// `$self`, `$Format(args...)`, `$param2`, ... A parenthesized form is kept
/// distinct from a bare reference: `$Next()` invokes, `$Next` looks up.
fn macro_expr(input: &mut &str) -> PResult<Expr> {
    (preceded('$', ident_str), opt(preceded(ws, call_parens)))
        .map(|(name, args)| Expr::Macro(name, args))
        .parse_next(input)
}

/// `$$name`: resolved once and memoized.
fn static_macro(input: &mut &str) -> PResult<Expr> {
    preceded("$$", ident_str)
        .map(Expr::StaticMacro)
        .parse_next(input)
}

/// `{RelativeSource T, Level=n}` and `{ElementSource name}` brace forms,
/// normalized to the equivalent `$Relative`/`$Element` macros.
fn brace_macro(input: &mut &str) -> PResult<Expr> {
    let _ = ('{', ws).parse_next(input)?;
    let kind = ident_str.parse_next(input)?;
    let result = match kind.as_str() {
        "RelativeSource" | "Relative" => {
            let type_name = preceded(ws, dotted_ident).parse_next(input)?;
            let level = opt(preceded(
                (ws, ',', ws, "Level", ws, '=', ws),
                digit1.try_map(|s: &str| s.parse::<i64>()),
            ))
            .parse_next(input)?;
            let mut args = vec![Expr::Ident(type_name)];
            if let Some(level) = level {
                args.push(Expr::Literal(Literal::Int(level)));
            }
            Expr::Macro("Relative".to_string(), Some(args))
        }
        "ElementSource" | "Element" => {
            let name = preceded(ws, ident_str).parse_next(input)?;
            Expr::Macro("Element".to_string(), Some(vec![Expr::Ident(name)]))
        }
        _ => return backtrack(),
    };
    let _ = (ws, '}').parse_next(input)?;
    Ok(result)
}

// ============ Identifiers ============

fn ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

pub(crate) fn ident_str(input: &mut &str) -> PResult<String> {
    (
        one_of(|c: char| c.is_ascii_alphabetic() || c == '_'),
        take_while(0.., ident_char),
    )
        .take()
        .map(str::to_string)
        .parse_next(input)
}

/// Identifier possibly containing `.` (type names in `{RelativeSource ...}`).
fn dotted_ident(input: &mut &str) -> PResult<String> {
    separated(1.., ident_str, '.')
        .map(|parts: Vec<String>| parts.join("."))
        .parse_next(input)
}

// ============ Literals ============

fn literal(input: &mut &str) -> PResult<Literal> {
    alt((
        terminated("true", not(one_of(ident_char))).value(Literal::Bool(true)),
        terminated("false", not(one_of(ident_char))).value(Literal::Bool(false)),
        terminated("null", not(one_of(ident_char))).value(Literal::Null),
        float_lit,
        int_lit,
    ))
    .parse_next(input)
}

fn int_lit(input: &mut &str) -> PResult<Literal> {
    digit1
        .try_map(|s: &str| s.parse::<i64>())
        .map(Literal::Int)
        .parse_next(input)
}

fn float_lit(input: &mut &str) -> PResult<Literal> {
    (digit1, '.', digit1)
        .take()
        .try_map(|s: &str| s.parse::<f64>())
        .map(Literal::Float)
        .parse_next(input)
}

fn plain_string(input: &mut &str) -> PResult<Literal> {
    delimited('"', string_body('"'), '"')
        .map(Literal::String)
        .parse_next(input)
}

fn string_body<'a>(quote: char) -> impl FnMut(&mut &'a str) -> PResult<String> {
    move |input: &mut &'a str| {
        let mut result = String::new();
        loop {
            let Some(c) = input.chars().next() else {
                return backtrack();
            };
            if c == quote {
                break;
            } else if c == '\\' {
                *input = &input[1..];
                let Some(escaped) = input.chars().next() else {
                    return backtrack();
                };
                result.push(unescape(escaped));
                *input = &input[escaped.len_utf8()..];
            } else {
                result.push(c);
                *input = &input[c.len_utf8()..];
            }
        }
        Ok(result)
    }
}

fn unescape(c: char) -> char {
    match c {
        'n' => '\n',
        't' => '\t',
        'r' => '\r',
        '0' => '\0',
        // Unknown escapes pass through (includes \\, \', \", \{)
        other => other,
    }
}

// ============ Interpolated strings ============

/// `'text {expr[,align][:format]} more'` with `{{`/`}}` escapes; the inner
/// expression is fully parsed, so interpolations nest arbitrarily deep. A
/// leading `$` is accepted and ignored (`$'...'`).
fn interpolated_string(input: &mut &str) -> PResult<Expr> {
    let _ = (opt('$'), '\'').parse_next(input)?;
    let mut segments: Vec<Segment> = Vec::new();
    let mut text = String::new();
    loop {
        let Some(c) = input.chars().next() else {
            // Unterminated string
            return backtrack();
        };
        match c {
            '\'' => {
                *input = &input[1..];
                break;
            }
            '{' if input.starts_with("{{") => {
                text.push('{');
                *input = &input[2..];
            }
            '}' if input.starts_with("}}") => {
                text.push('}');
                *input = &input[2..];
            }
            '}' => return backtrack(),
            '{' => {
                *input = &input[1..];
                if !text.is_empty() {
                    segments.push(Segment::Text(std::mem::take(&mut text)));
                }
                segments.push(hole.parse_next(input)?);
            }
            '\\' => {
                *input = &input[1..];
                let Some(escaped) = input.chars().next() else {
                    return backtrack();
                };
                text.push(unescape(escaped));
                *input = &input[escaped.len_utf8()..];
            }
            _ => {
                text.push(c);
                *input = &input[c.len_utf8()..];
            }
        }
    }
    if !text.is_empty() {
        segments.push(Segment::Text(text));
    }

    let has_holes = segments
        .iter()
        .any(|s| matches!(s, Segment::Hole { .. }));
    if has_holes {
        Ok(Expr::Interpolated(segments))
    } else {
        let joined = segments
            .into_iter()
            .map(|s| match s {
                Segment::Text(t) => t,
                Segment::Hole { .. } => unreachable!(),
            })
            .collect();
        Ok(Expr::Literal(Literal::String(joined)))
    }
}

/// The inside of one `{...}` placeholder, after the opening brace.
fn hole(input: &mut &str) -> PResult<Segment> {
    let inner = expr.parse_next(input)?;
    let _ = ws.parse_next(input)?;
    // Alignment comes before `:` only; everything after `:` is raw format
    // text up to the closing brace.
    let alignment = opt(preceded(
        (',', ws),
        (opt('-'), digit1).take().try_map(|s: &str| s.parse::<i32>()),
    ))
    .parse_next(input)?;
    let format: Option<&str> =
        opt(preceded(':', take_while(0.., |c: char| c != '}' && c != '\''))).parse_next(input)?;
    let _ = (ws, '}').parse_next(input)?;
    Ok(Segment::Hole {
        expr: inner,
        alignment,
        format: format.map(str::to_string),
    })
}

// ============ Whitespace ============

pub(crate) fn ws(input: &mut &str) -> PResult<()> {
    multispace0.void().parse_next(input)
}

// ============ Sanity Tests ============
// Most testing is done via integration tests in tests/integration.rs
