//! Collaborator contracts consumed by the binding core
//!
//! The engine never touches concrete reflection: member, method and indexer
//! resolution go through `MemberResolver`, and `$Relative`/`$Element`
//! traversal goes through `TreeNavigator`. `object.rs` provides the in-memory
//! reference implementations used by tests and demos.

use std::sync::Arc;

use crate::coerce::Ty;
use crate::eval::EvalError;
use crate::value::Value;

type Result<T> = std::result::Result<T, EvalError>;

/// Change-notification callback for an observed member.
pub type Listener = Arc<dyn Fn() + Send + Sync>;

/// Handle to one resolved property-like member.
pub trait Member: Send + Sync {
    fn name(&self) -> &str;

    /// Static type of the member value when known, `Object` otherwise.
    fn value_type(&self) -> Ty;

    fn get(&self, instance: &Value) -> Result<Value>;

    fn set(&self, instance: &Value, value: Value) -> Result<()>;

    /// Subscribe to change notifications for this member on `instance`.
    /// Returns None when the member is not observable.
    fn observe(&self, instance: &Value, listener: Listener) -> Option<Subscription>;
}

/// Parameter signature of a resolved method, used by overload scoring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodSignature {
    pub params: Vec<Ty>,
    /// Trailing `params`-array style parameter: the last entry of `params`
    /// is the element type and may bind zero or more arguments.
    pub variadic: bool,
    /// Declaring-type specificity; larger wins overload ties.
    pub specificity: u32,
}

impl MethodSignature {
    pub fn exact(params: Vec<Ty>) -> Self {
        MethodSignature {
            params,
            variadic: false,
            specificity: 0,
        }
    }

    pub fn variadic(params: Vec<Ty>) -> Self {
        MethodSignature {
            params,
            variadic: true,
            specificity: 0,
        }
    }

    pub fn with_specificity(mut self, specificity: u32) -> Self {
        self.specificity = specificity;
        self
    }
}

/// Handle to one resolved method overload.
pub trait Method: Send + Sync {
    fn name(&self) -> &str;

    fn signature(&self) -> &MethodSignature;

    fn invoke(&self, instance: &Value, args: &[Value]) -> Result<Value>;
}

/// The capability interface the expression engine is generic over.
pub trait MemberResolver: Send + Sync {
    /// Resolve a property-like member by name on a live value.
    fn member(&self, owner: &Value, name: &str) -> Option<Arc<dyn Member>>;

    /// All visible overloads of a named method on a live value.
    fn methods(&self, owner: &Value, name: &str) -> Vec<Arc<dyn Method>>;

    /// The indexer of a live value, if any.
    fn indexer(&self, owner: &Value) -> Option<Arc<dyn Method>>;
}

/// Tree navigation for `$Relative(...)` and `$Element(...)` resolution.
pub trait TreeNavigator: Send + Sync {
    fn parent(&self, node: &Value) -> Option<Value>;

    fn find_by_name(&self, root: &Value, name: &str) -> Option<Value>;

    /// Walk ancestors of `node` counting type-name matches. Short-name and
    /// full-name matches are counted independently; the first counter to
    /// reach `level` wins.
    fn find_relative(&self, node: &Value, type_name: &str, level: u32) -> Option<Value> {
        if level == 0 {
            return None;
        }
        let mut full_matches = 0u32;
        let mut short_matches = 0u32;
        let mut current = self.parent(node);
        while let Some(value) = current {
            if let Value::Object(obj) = &value {
                let full = obj.type_name();
                let short = full.rsplit('.').next().unwrap_or(full);
                if full == type_name {
                    full_matches += 1;
                    if full_matches == level {
                        return Some(value);
                    }
                }
                if short == type_name {
                    short_matches += 1;
                    if short_matches == level {
                        return Some(value);
                    }
                }
            }
            current = self.parent(&value);
        }
        None
    }
}

/// Resolver for contexts without any member surface: every lookup misses.
/// Pure expressions (arithmetic, resources, formatting) still evaluate.
pub struct NoMemberResolver;

impl MemberResolver for NoMemberResolver {
    fn member(&self, _owner: &Value, _name: &str) -> Option<Arc<dyn Member>> {
        None
    }

    fn methods(&self, _owner: &Value, _name: &str) -> Vec<Arc<dyn Method>> {
        Vec::new()
    }

    fn indexer(&self, _owner: &Value) -> Option<Arc<dyn Method>> {
        None
    }
}

/// Navigator for contexts without a visual/logical tree: every lookup
/// misses. `$Relative`/`$Element` macros then fail to resolve.
pub struct NoTreeNavigator;

impl TreeNavigator for NoTreeNavigator {
    fn parent(&self, _node: &Value) -> Option<Value> {
        None
    }

    fn find_by_name(&self, _root: &Value, _name: &str) -> Option<Value> {
        None
    }
}

/// Active observation; unsubscribes on drop or explicit `cancel()`.
pub struct Subscription {
    unsubscribe: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(unsubscribe: impl FnOnce() + Send + 'static) -> Self {
        Subscription {
            unsubscribe: Some(Box::new(unsubscribe)),
        }
    }

    pub fn cancel(mut self) {
        if let Some(f) = self.unsubscribe.take() {
            f();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(f) = self.unsubscribe.take() {
            f();
        }
    }
}

// ============ Closure-backed method ============

/// `Method` built from a closure, for resource registrations and tests.
pub struct FnMethod {
    name: String,
    signature: MethodSignature,
    #[allow(clippy::type_complexity)]
    body: Box<dyn Fn(&Value, &[Value]) -> Result<Value> + Send + Sync>,
}

impl FnMethod {
    pub fn new(
        name: impl Into<String>,
        signature: MethodSignature,
        body: impl Fn(&Value, &[Value]) -> Result<Value> + Send + Sync + 'static,
    ) -> Arc<dyn Method> {
        Arc::new(FnMethod {
            name: name.into(),
            signature,
            body: Box::new(body),
        })
    }
}

impl Method for FnMethod {
    fn name(&self) -> &str {
        &self.name
    }

    fn signature(&self) -> &MethodSignature {
        &self.signature
    }

    fn invoke(&self, instance: &Value, args: &[Value]) -> Result<Value> {
        (self.body)(instance, args)
    }
}
