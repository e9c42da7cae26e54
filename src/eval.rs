//! Expression evaluator
//!
//! Walks a desugared core expression against an `EvalContext`. Operator
//! semantics follow the coercion engine: operands of mixed numeric types are
//! promoted to their unified type before the operation, string concatenation
//! short-circuits promotion, and `&&`/`||`/`??`/`?:` evaluate only the taken
//! operand. Member, method and indexer resolution is delegated entirely to
//! the context's `MemberResolver`; overloads are ranked by per-argument
//! conversion cost (exact 0, widening 1, boxing 2) with variadic expansion as
//! a heavily-penalized fallback.

use std::cmp::Ordering;
use std::sync::{Arc, OnceLock};

use thiserror::Error;

use crate::ast::core::{ContextItem, Expr, FormatPart};
use crate::ast::{BinaryOp, Literal, UnaryOp};
use crate::coerce::{self, Ty};
use crate::member::{MemberResolver, Method, MethodSignature, TreeNavigator};
use crate::resource::ResourceRegistry;
use crate::value::{convert_value, format_value, runtime_ty, Value};

type Result<T> = std::result::Result<T, EvalError>;

#[derive(Error, Debug)]
pub enum EvalError {
    #[error("member '{name}' not found on {target}")]
    UnresolvedMember { target: String, name: String },

    #[error("method '{name}' not resolvable on {target}: {reason}")]
    UnresolvedMethod {
        target: String,
        name: String,
        reason: String,
    },

    #[error("{target} has no indexer")]
    UnresolvedIndexer { target: String },

    #[error("unknown resource '${0}'")]
    UnknownResource(String),

    #[error("element '{0}' not found in the tree")]
    ElementNotFound(String),

    #[error("no ancestor of type '{type_name}' at level {level}")]
    RelativeNotFound { type_name: String, level: u32 },

    #[error("operator '{op}' cannot be applied to {left} and {right}")]
    Coercion {
        op: &'static str,
        left: String,
        right: String,
    },

    #[error("expected {expected}, got {got}")]
    Type { expected: String, got: String },

    #[error("null value in member path at '{0}'")]
    NullReference(String),

    #[error("{0}")]
    Arithmetic(String),

    #[error("{0}")]
    Invalid(String),
}

/// Resolution failures inside a `?.`/`?[` guard degrade to Null instead of
/// failing the binding.
fn degrades_to_null(e: &EvalError) -> bool {
    matches!(
        e,
        EvalError::UnresolvedMember { .. }
            | EvalError::UnresolvedMethod { .. }
            | EvalError::UnresolvedIndexer { .. }
            | EvalError::NullReference(_)
    )
}

// ============ Evaluation context ============

/// Everything an expression can reach at runtime besides its own arguments:
/// the binding target, the data context, and the resolution collaborators.
#[derive(Clone)]
pub struct EvalContext {
    pub target: Value,
    pub context: Value,
    pub binding: Value,
    pub resolver: Arc<dyn MemberResolver>,
    pub navigator: Arc<dyn TreeNavigator>,
    pub resources: Arc<ResourceRegistry>,
}

impl EvalContext {
    pub fn new(resolver: Arc<dyn MemberResolver>, navigator: Arc<dyn TreeNavigator>) -> Self {
        EvalContext {
            target: Value::Null,
            context: Value::Null,
            binding: Value::Null,
            resolver,
            navigator,
            resources: Arc::new(ResourceRegistry::new()),
        }
    }

    pub fn with_target(mut self, target: Value) -> Self {
        self.target = target;
        self
    }

    pub fn with_context(mut self, context: Value) -> Self {
        self.context = context;
        self
    }

    pub fn with_binding(mut self, binding: Value) -> Self {
        self.binding = binding;
        self
    }

    pub fn with_resources(mut self, resources: Arc<ResourceRegistry>) -> Self {
        self.resources = resources;
        self
    }
}

/// Evaluate `expr` with positional arguments and the memoization cells of the
/// owning compiled binding.
pub fn eval(
    expr: &Expr,
    ctx: &EvalContext,
    args: &[Value],
    cells: &Arc<[OnceLock<Value>]>,
) -> Result<Value> {
    Evaluator {
        ctx,
        args,
        cells,
        chain: Vec::new(),
        locals: Vec::new(),
    }
    .eval(expr)
}

struct Evaluator<'a> {
    ctx: &'a EvalContext,
    args: &'a [Value],
    cells: &'a Arc<[OnceLock<Value>]>,
    /// Guard values of enclosing null-conditional chains, innermost last.
    chain: Vec<Value>,
    /// Lambda parameter bindings, innermost last.
    locals: Vec<(String, Value)>,
}

impl Evaluator<'_> {
    fn eval(&mut self, expr: &Expr) -> Result<Value> {
        match expr {
            Expr::Constant(lit) => Ok(literal_value(lit)),

            Expr::Member { target: None, name } => {
                if let Some(local) = self.local(name) {
                    return Ok(local);
                }
                self.get_member(&self.ctx.context.clone(), name)
            }
            Expr::Member {
                target: Some(target),
                name,
            } => {
                let owner = self.eval(target)?;
                if owner.is_null() {
                    return Err(EvalError::NullReference(name.clone()));
                }
                self.get_member(&owner, name)
            }

            Expr::MethodCall { target, name, args } => {
                let owner = match target {
                    Some(target) => {
                        let owner = self.eval(target)?;
                        if owner.is_null() {
                            return Err(EvalError::NullReference(name.clone()));
                        }
                        owner
                    }
                    None => {
                        // A lambda bound to a parameter is callable by name.
                        if let Some(Value::Lambda(lambda)) = self.local(name) {
                            let values = self.eval_args(args)?;
                            return lambda.call(&values);
                        }
                        self.ctx.context.clone()
                    }
                };
                let values = self.eval_args(args)?;
                let candidates = self.ctx.resolver.methods(&owner, name);
                invoke_best(&candidates, &owner, &values, describe(&owner), name)
            }

            Expr::Index { target, args } => {
                let owner = self.eval(target)?;
                if owner.is_null() {
                    return Err(EvalError::NullReference("[index]".to_string()));
                }
                let values = self.eval_args(args)?;
                let indexer = self
                    .ctx
                    .resolver
                    .indexer(&owner)
                    .ok_or_else(|| EvalError::UnresolvedIndexer {
                        target: describe(&owner),
                    })?;
                invoke_best(
                    std::slice::from_ref(&indexer),
                    &owner,
                    &values,
                    describe(&owner),
                    "[index]",
                )
            }

            Expr::Unary(op, inner) => {
                let value = self.eval(inner)?;
                apply_unary(*op, &value)
            }

            Expr::Binary(left, op, right) => match op {
                BinaryOp::And | BinaryOp::Or => {
                    let l = self.eval(left)?;
                    let Value::Bool(l) = l else {
                        return Err(EvalError::Type {
                            expected: "Boolean".to_string(),
                            got: describe(&l),
                        });
                    };
                    if (*op == BinaryOp::And && !l) || (*op == BinaryOp::Or && l) {
                        return Ok(Value::Bool(l));
                    }
                    let r = self.eval(right)?;
                    match r {
                        Value::Bool(_) => Ok(r),
                        other => Err(EvalError::Type {
                            expected: "Boolean".to_string(),
                            got: describe(&other),
                        }),
                    }
                }
                BinaryOp::Coalesce => {
                    let l = self.eval(left)?;
                    if l.is_null() {
                        self.eval(right)
                    } else {
                        Ok(l)
                    }
                }
                _ => {
                    let l = self.eval(left)?;
                    let r = self.eval(right)?;
                    apply_binary(*op, &l, &r)
                }
            },

            Expr::Conditional {
                test,
                if_true,
                if_false,
            } => match self.eval(test)? {
                Value::Bool(true) => self.eval(if_true),
                Value::Bool(false) => self.eval(if_false),
                other => Err(EvalError::Type {
                    expected: "Boolean".to_string(),
                    got: describe(&other),
                }),
            },

            Expr::NullConditional { target, chain } => {
                let guard = self.eval(target)?;
                if guard.is_null() {
                    return Ok(Value::Null);
                }
                self.chain.push(guard);
                let result = self.eval(chain);
                self.chain.pop();
                match result {
                    Err(e) if degrades_to_null(&e) => Ok(Value::Null),
                    other => other,
                }
            }
            Expr::ChainRef => self
                .chain
                .last()
                .cloned()
                .ok_or_else(|| EvalError::Invalid("chain reference outside a guard".to_string())),

            Expr::Lambda { params, body } => Ok(Value::Lambda(Arc::new(LambdaValue {
                params: params.clone(),
                body: (**body).clone(),
                ctx: self.ctx.clone(),
                args: self.args.to_vec(),
                cells: Arc::clone(self.cells),
                captured: self.locals.clone(),
            }))),

            Expr::Param(n) => Ok(self.args.get(*n).cloned().unwrap_or(Value::Null)),

            Expr::ContextRef(item) => Ok(match item {
                ContextItem::Target => self.ctx.target.clone(),
                ContextItem::Context => self.ctx.context.clone(),
                ContextItem::Args => self.args.first().cloned().unwrap_or(Value::Null),
                ContextItem::Binding => self.ctx.binding.clone(),
            }),

            Expr::Resource(name) => self
                .ctx
                .resources
                .value(name)
                .ok_or_else(|| EvalError::UnknownResource(name.clone())),

            Expr::ResourceCall(name, args) => {
                let values = self.eval_args(args)?;
                let candidates = self.ctx.resources.methods(name);
                if candidates.is_empty() {
                    // A lambda-valued resource is callable directly.
                    if let Some(Value::Lambda(lambda)) = self.ctx.resources.value(name) {
                        return lambda.call(&values);
                    }
                    return Err(EvalError::UnknownResource(name.clone()));
                }
                invoke_best(
                    &candidates,
                    &Value::Null,
                    &values,
                    "resources".to_string(),
                    name,
                )
            }

            Expr::OneTime { slot, body } => {
                let cell = self
                    .cells
                    .get(*slot)
                    .ok_or_else(|| EvalError::Invalid("memoization slot out of range".to_string()))?;
                if let Some(v) = cell.get() {
                    return Ok(v.clone());
                }
                let v = self.eval(body)?;
                // A concurrent evaluation may have won the race; the cell's
                // value is authoritative either way.
                let _ = cell.set(v.clone());
                Ok(cell.get().cloned().unwrap_or(v))
            }

            Expr::RelativeSource { type_name, level } => self
                .ctx
                .navigator
                .find_relative(&self.ctx.target, type_name, *level)
                .ok_or_else(|| EvalError::RelativeNotFound {
                    type_name: type_name.clone(),
                    level: *level,
                }),

            Expr::ElementSource(name) => {
                let mut root = self.ctx.target.clone();
                while let Some(parent) = self.ctx.navigator.parent(&root) {
                    root = parent;
                }
                self.ctx
                    .navigator
                    .find_by_name(&root, name)
                    .ok_or_else(|| EvalError::ElementNotFound(name.clone()))
            }

            Expr::Format(parts) => {
                let mut out = String::new();
                for part in parts {
                    match part {
                        FormatPart::Text(text) => out.push_str(text),
                        FormatPart::Arg {
                            expr,
                            alignment,
                            format,
                        } => {
                            let value = self.eval(expr)?;
                            out.push_str(&format_value(&value, format.as_deref(), *alignment));
                        }
                    }
                }
                Ok(Value::String(out))
            }

            Expr::Convert { to, expr } => {
                let value = self.eval(expr)?;
                convert_value(&value, *to).ok_or_else(|| EvalError::Type {
                    expected: format!("{:?}", to.code),
                    got: describe(&value),
                })
            }

            Expr::Invalid(message) => Err(EvalError::Invalid(message.clone())),
        }
    }

    fn local(&self, name: &str) -> Option<Value> {
        self.locals
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.clone())
    }

    fn get_member(&mut self, owner: &Value, name: &str) -> Result<Value> {
        let member =
            self.ctx
                .resolver
                .member(owner, name)
                .ok_or_else(|| EvalError::UnresolvedMember {
                    target: describe(owner),
                    name: name.to_string(),
                })?;
        member.get(owner)
    }

    fn eval_args(&mut self, args: &[Expr]) -> Result<Vec<Value>> {
        args.iter().map(|a| self.eval(a)).collect()
    }
}

fn literal_value(lit: &Literal) -> Value {
    match lit {
        Literal::Null => Value::Null,
        Literal::Bool(b) => Value::Bool(*b),
        Literal::Int(n) => match i32::try_from(*n) {
            Ok(n) => Value::Int32(n),
            Err(_) => Value::Int64(*n),
        },
        Literal::Float(f) => Value::Double(*f),
        Literal::String(s) => Value::String(s.clone()),
    }
}

fn describe(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Object(o) => o.type_name().to_string(),
        other => format!("{:?}", runtime_ty(other).code),
    }
}

// ============ Lambda values ============

/// A lambda closed over its creation environment: the evaluation context, the
/// binding arguments, enclosing lambda parameters, and the memoization cells.
pub struct LambdaValue {
    params: Vec<String>,
    body: Expr,
    ctx: EvalContext,
    args: Vec<Value>,
    cells: Arc<[OnceLock<Value>]>,
    captured: Vec<(String, Value)>,
}

impl LambdaValue {
    pub fn params(&self) -> &[String] {
        &self.params
    }

    pub fn call(&self, args: &[Value]) -> Result<Value> {
        if args.len() != self.params.len() {
            return Err(EvalError::Invalid(format!(
                "lambda takes {} argument(s), got {}",
                self.params.len(),
                args.len()
            )));
        }
        let mut locals = self.captured.clone();
        locals.extend(
            self.params
                .iter()
                .cloned()
                .zip(args.iter().cloned()),
        );
        Evaluator {
            ctx: &self.ctx,
            args: &self.args,
            cells: &self.cells,
            chain: Vec::new(),
            locals,
        }
        .eval(&self.body)
    }
}

// ============ Operators ============

fn apply_unary(op: UnaryOp, value: &Value) -> Result<Value> {
    match op {
        UnaryOp::Not => match value {
            Value::Bool(b) => Ok(Value::Bool(!b)),
            other => Err(EvalError::Type {
                expected: "Boolean".to_string(),
                got: describe(other),
            }),
        },
        UnaryOp::Neg => match value {
            // Sub-int operands promote to Int32 under negation.
            Value::SByte(n) => Ok(Value::Int32(-(*n as i32))),
            Value::Byte(n) => Ok(Value::Int32(-(*n as i32))),
            Value::Int16(n) => Ok(Value::Int32(-(*n as i32))),
            Value::UInt16(n) => Ok(Value::Int32(-(*n as i32))),
            Value::Int32(n) => n
                .checked_neg()
                .map(Value::Int32)
                .ok_or_else(|| EvalError::Arithmetic("arithmetic overflow".to_string())),
            Value::UInt32(n) => Ok(Value::Int64(-(*n as i64))),
            Value::Int64(n) => n
                .checked_neg()
                .map(Value::Int64)
                .ok_or_else(|| EvalError::Arithmetic("arithmetic overflow".to_string())),
            Value::Single(n) => Ok(Value::Single(-n)),
            Value::Double(n) => Ok(Value::Double(-n)),
            other => Err(EvalError::Coercion {
                op: "-",
                left: describe(other),
                right: String::new(),
            }),
        },
    }
}

fn op_str(op: BinaryOp) -> &'static str {
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

fn coercion_error(op: BinaryOp, l: &Value, r: &Value) -> EvalError {
    EvalError::Coercion {
        op: op_str(op),
        left: describe(l),
        right: describe(r),
    }
}

/// Promote both operands to their unified type.
fn promote_pair(l: &Value, r: &Value) -> Option<(Value, Value)> {
    let ty = coerce::unify(runtime_ty(l), runtime_ty(r))?;
    Some((convert_value(l, ty)?, convert_value(r, ty)?))
}

fn values_equal(l: &Value, r: &Value) -> bool {
    if l.is_null() || r.is_null() {
        return l.is_null() && r.is_null();
    }
    match promote_pair(l, r) {
        Some((a, b)) => a == b,
        None => l == r,
    }
}

macro_rules! int_arith {
    ($op:expr, $x:expr, $y:expr, $wrap:expr) => {{
        if matches!($op, BinaryOp::Div | BinaryOp::Rem) && $y == 0 {
            return Err(EvalError::Arithmetic("division by zero".to_string()));
        }
        let out = match $op {
            BinaryOp::Add => $x.checked_add($y),
            BinaryOp::Sub => $x.checked_sub($y),
            BinaryOp::Mul => $x.checked_mul($y),
            BinaryOp::Div => $x.checked_div($y),
            BinaryOp::Rem => $x.checked_rem($y),
            _ => unreachable!(),
        };
        out.map($wrap)
            .ok_or_else(|| EvalError::Arithmetic("arithmetic overflow".to_string()))
    }};
}

macro_rules! float_arith {
    ($op:expr, $x:expr, $y:expr, $wrap:expr) => {
        Ok($wrap(match $op {
            BinaryOp::Add => $x + $y,
            BinaryOp::Sub => $x - $y,
            BinaryOp::Mul => $x * $y,
            BinaryOp::Div => $x / $y,
            BinaryOp::Rem => $x % $y,
            _ => unreachable!(),
        }))
    };
}

fn apply_binary(op: BinaryOp, l: &Value, r: &Value) -> Result<Value> {
    match op {
        BinaryOp::Eq => Ok(Value::Bool(values_equal(l, r))),
        BinaryOp::Ne => Ok(Value::Bool(!values_equal(l, r))),
        // Either operand being a string turns `+` into concatenation;
        // Null renders as the empty string.
        BinaryOp::Add if matches!(l, Value::String(_)) || matches!(r, Value::String(_)) => {
            Ok(Value::String(format!("{l}{r}")))
        }
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => {
            numeric_arith(op, l, r)
        }
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => compare(op, l, r),
        // Short-circuit forms are handled before operand evaluation.
        BinaryOp::And | BinaryOp::Or | BinaryOp::Coalesce => unreachable!(),
    }
}

fn numeric_arith(op: BinaryOp, l: &Value, r: &Value) -> Result<Value> {
    let (a, b) = promote_pair(l, r).ok_or_else(|| coercion_error(op, l, r))?;
    match (a, b) {
        (Value::SByte(x), Value::SByte(y)) => int_arith!(op, x, y, Value::SByte),
        (Value::Byte(x), Value::Byte(y)) => int_arith!(op, x, y, Value::Byte),
        (Value::Int16(x), Value::Int16(y)) => int_arith!(op, x, y, Value::Int16),
        (Value::UInt16(x), Value::UInt16(y)) => int_arith!(op, x, y, Value::UInt16),
        (Value::Int32(x), Value::Int32(y)) => int_arith!(op, x, y, Value::Int32),
        (Value::UInt32(x), Value::UInt32(y)) => int_arith!(op, x, y, Value::UInt32),
        (Value::Int64(x), Value::Int64(y)) => int_arith!(op, x, y, Value::Int64),
        (Value::UInt64(x), Value::UInt64(y)) => int_arith!(op, x, y, Value::UInt64),
        (Value::Single(x), Value::Single(y)) => float_arith!(op, x, y, Value::Single),
        (Value::Double(x), Value::Double(y)) => float_arith!(op, x, y, Value::Double),
        _ => Err(coercion_error(op, l, r)),
    }
}

fn compare(op: BinaryOp, l: &Value, r: &Value) -> Result<Value> {
    if let (Value::DateTime(a), Value::DateTime(b)) = (l, r) {
        return Ok(Value::Bool(apply_ord(op, a.cmp(b))));
    }
    let (a, b) = promote_pair(l, r).ok_or_else(|| coercion_error(op, l, r))?;
    let ord: Option<Ordering> = match (&a, &b) {
        (Value::SByte(x), Value::SByte(y)) => Some(x.cmp(y)),
        (Value::Byte(x), Value::Byte(y)) => Some(x.cmp(y)),
        (Value::Int16(x), Value::Int16(y)) => Some(x.cmp(y)),
        (Value::UInt16(x), Value::UInt16(y)) => Some(x.cmp(y)),
        (Value::Int32(x), Value::Int32(y)) => Some(x.cmp(y)),
        (Value::UInt32(x), Value::UInt32(y)) => Some(x.cmp(y)),
        (Value::Int64(x), Value::Int64(y)) => Some(x.cmp(y)),
        (Value::UInt64(x), Value::UInt64(y)) => Some(x.cmp(y)),
        (Value::Single(x), Value::Single(y)) => x.partial_cmp(y),
        (Value::Double(x), Value::Double(y)) => x.partial_cmp(y),
        _ => return Err(coercion_error(op, l, r)),
    };
    // NaN compares false against everything.
    Ok(Value::Bool(ord.map(|o| apply_ord(op, o)).unwrap_or(false)))
}

fn apply_ord(op: BinaryOp, ord: Ordering) -> bool {
    match op {
        BinaryOp::Lt => ord.is_lt(),
        BinaryOp::Le => ord.is_le(),
        BinaryOp::Gt => ord.is_gt(),
        BinaryOp::Ge => ord.is_ge(),
        _ => unreachable!(),
    }
}

// ============ Overload resolution ============

/// Conversion cost of binding `arg` to a parameter of type `param`, or None
/// when the argument cannot bind at all.
fn arg_cost(arg: &Value, param: Ty) -> Option<u32> {
    if arg.is_null() {
        // Null binds to reference and nullable parameters only.
        return (!param.is_value_type() || param.nullable).then_some(0);
    }
    let at = runtime_ty(arg);
    if at == param {
        return Some(0);
    }
    let compat = coerce::is_compatible_with(at, param)?;
    Some(if compat.box_required { 2 } else { 1 })
}

/// Total cost of a call against one signature. Variadic signatures carry a
/// flat penalty so any applicable fixed-arity overload wins first.
fn score_call(sig: &MethodSignature, args: &[Value]) -> Option<u32> {
    if sig.variadic {
        let Some((elem, fixed)) = sig.params.split_last() else {
            return None;
        };
        if args.len() < fixed.len() {
            return None;
        }
        let mut total = 1000u32;
        for (arg, param) in args.iter().zip(fixed) {
            total += arg_cost(arg, *param)?;
        }
        for arg in &args[fixed.len()..] {
            total += arg_cost(arg, *elem)?;
        }
        Some(total)
    } else {
        if sig.params.len() != args.len() {
            return None;
        }
        let mut total = 0u32;
        for (arg, param) in args.iter().zip(&sig.params) {
            total += arg_cost(arg, *param)?;
        }
        Some(total)
    }
}

fn convert_args(sig: &MethodSignature, args: &[Value]) -> Vec<Value> {
    let mut out = Vec::with_capacity(args.len());
    for (i, arg) in args.iter().enumerate() {
        let param = if sig.variadic && i + 1 >= sig.params.len() {
            *sig.params.last().unwrap()
        } else {
            sig.params[i]
        };
        out.push(convert_value(arg, param).unwrap_or_else(|| arg.clone()));
    }
    out
}

fn invoke_best(
    candidates: &[Arc<dyn Method>],
    owner: &Value,
    args: &[Value],
    target: String,
    name: &str,
) -> Result<Value> {
    let mut best: Option<(u32, u32, usize)> = None;
    for (i, method) in candidates.iter().enumerate() {
        let Some(score) = score_call(method.signature(), args) else {
            continue;
        };
        let specificity = method.signature().specificity;
        let better = match best {
            None => true,
            Some((s, spec, _)) => score < s || (score == s && specificity > spec),
        };
        if better {
            best = Some((score, specificity, i));
        }
    }
    let Some((_, _, index)) = best else {
        let arg_types: Vec<String> = args.iter().map(describe).collect();
        return Err(EvalError::UnresolvedMethod {
            target,
            name: name.to_string(),
            reason: format!("no overload takes ({})", arg_types.join(", ")),
        });
    };
    let method = &candidates[index];
    let converted = convert_args(method.signature(), args);
    method.invoke(owner, &converted)
}

// ============ Sanity Tests ============
