//! Binding-expression splitter
//!
//! Splits a top-level binding string into clauses:
//!
//! ```text
//! clause  := ['@'] target-path [ source-expr ] { ',' item }
//! string  := clause { ';' clause } [';']
//! ```
//!
//! where an item of the form `name=expr` is a named parameter and any other
//! item is an additional source expression. An `@` prefix marks an
//! action/command binding: the remainder of the clause is parsed greedily as
//! one expression, with no parameter splitting.

use winnow::combinator::{alt, not, opt, preceded, repeat, separated, terminated};
use winnow::prelude::*;

use crate::ast::surface::Expr;
use crate::parse::{self, ParseError};

type PResult<T> = winnow::ModalResult<T>;

/// One parsed `target [source] [,param]*` unit from a binding string.
/// Created per parse call and consumed immediately by compilation.
#[derive(Debug, Clone, PartialEq)]
pub struct BindingClause {
    /// `@`-prefixed action/command binding.
    pub is_action: bool,
    /// Target path on the binding target object (member/index chain).
    pub target: Expr,
    /// Source expressions, at least one. A clause without an explicit source
    /// binds to the data context itself.
    pub sources: Vec<Expr>,
    /// Named parameters (`Mode=TwoWay`, `Fallback=0`, ...).
    pub params: Vec<(String, Expr)>,
}

impl BindingClause {
    /// Dotted rendering of the target path, for member resolution against
    /// the binding target.
    pub fn target_path(&self) -> String {
        fn walk(expr: &Expr, out: &mut String) {
            match expr {
                Expr::Ident(name) => out.push_str(name),
                Expr::Member(base, name) => {
                    walk(base, out);
                    out.push('.');
                    out.push_str(name);
                }
                Expr::Index(base, _) => walk(base, out),
                _ => {}
            }
        }
        let mut out = String::new();
        walk(&self.target, &mut out);
        out
    }
}

/// Split a binding string into its clauses.
pub fn split(input: &str) -> Result<Vec<BindingClause>, ParseError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(parse::error_at(
            "empty binding string".to_string(),
            input,
            0,
        ));
    }
    let mut stream = trimmed;
    match clauses.parse_next(&mut stream) {
        Ok(parsed) if stream.trim().is_empty() => Ok(parsed),
        Ok(_) => {
            let offset = trimmed.len().saturating_sub(stream.len());
            Err(parse::error_at(
                "unexpected trailing input after binding clause".to_string(),
                trimmed,
                offset,
            ))
        }
        Err(e) => {
            let offset = trimmed.len().saturating_sub(stream.len());
            Err(parse::error_at(format!("{e:?}"), trimmed, offset))
        }
    }
}

fn clauses(input: &mut &str) -> PResult<Vec<BindingClause>> {
    terminated(
        separated(1.., clause, (parse::ws, ';', parse::ws)),
        (parse::ws, opt(';'), parse::ws),
    )
    .parse_next(input)
}

fn clause(input: &mut &str) -> PResult<BindingClause> {
    let _ = parse::ws.parse_next(input)?;
    let is_action = opt('@').parse_next(input)?.is_some();
    let target = target_path.parse_next(input)?;

    let mut sources = Vec::new();
    let mut params = Vec::new();

    if is_action {
        // No delimiter pre-scanning: everything up to `;`/EOF is the source.
        if let Some(source) = opt(preceded(parse::ws, parse::expr)).parse_next(input)? {
            sources.push(source);
        }
    } else {
        if let Some(source) = opt(preceded(parse::ws, parse::expr)).parse_next(input)? {
            sources.push(source);
        }
        let items: Vec<Item> =
            repeat(0.., preceded((parse::ws, ',', parse::ws), item)).parse_next(input)?;
        for it in items {
            match it {
                Item::Param(name, value) => params.push((name, value)),
                Item::Source(expr) => sources.push(expr),
            }
        }
    }

    if sources.is_empty() {
        // Default source: the data context itself.
        sources.push(Expr::Macro("context".to_string(), None));
    }

    Ok(BindingClause {
        is_action,
        target,
        sources,
        params,
    })
}

enum Item {
    Param(String, Expr),
    Source(Expr),
}

fn item(input: &mut &str) -> PResult<Item> {
    alt((
        // `name=value` (but not `name==...`, which is a source expression)
        (
            parse::ident_str,
            (parse::ws, '=', not('='), parse::ws),
            parse::expr,
        )
            .map(|(name, _, value)| Item::Param(name, value)),
        parse::expr.map(Item::Source),
    ))
    .parse_next(input)
}

/// Target path: `ident { '.' ident | '[' args ']' }`. Kept deliberately
/// narrower than a full expression; the target of a binding is always a
/// member path on the target object.
fn target_path(input: &mut &str) -> PResult<Expr> {
    let first = parse::ident_str.map(Expr::Ident).parse_next(input)?;
    let rest: Vec<PathStep> = repeat(
        0..,
        alt((
            preceded('.', parse::ident_str).map(PathStep::Member),
            parse::index_brackets.map(PathStep::Index),
        )),
    )
    .parse_next(input)?;
    Ok(rest.into_iter().fold(first, |acc, step| match step {
        PathStep::Member(name) => Expr::Member(Box::new(acc), name),
        PathStep::Index(args) => Expr::Index(Box::new(acc), args),
    }))
}

enum PathStep {
    Member(String),
    Index(Vec<Expr>),
}

// ============ Sanity Tests ============
