//! Dynamic resource registry
//!
//! Backs `$name` lookups and `$Name(args...)` invocations that do not resolve
//! to a built-in macro. Hosts register values (converters, localized strings,
//! constants) and method groups by name; the registry is shared across every
//! binding compiled by an engine.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::member::Method;
use crate::value::Value;

#[derive(Default)]
pub struct ResourceRegistry {
    values: RwLock<HashMap<String, Value>>,
    methods: RwLock<HashMap<String, Vec<Arc<dyn Method>>>>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_value(&self, name: impl Into<String>, value: Value) {
        self.values
            .write()
            .expect("resource registry lock poisoned")
            .insert(name.into(), value);
    }

    /// Register one overload under `name`. Multiple registrations with the
    /// same name form an overload group resolved at call time.
    pub fn add_method(&self, name: impl Into<String>, method: Arc<dyn Method>) {
        self.methods
            .write()
            .expect("resource registry lock poisoned")
            .entry(name.into())
            .or_default()
            .push(method);
    }

    pub fn value(&self, name: &str) -> Option<Value> {
        self.values
            .read()
            .expect("resource registry lock poisoned")
            .get(name)
            .cloned()
    }

    pub fn methods(&self, name: &str) -> Vec<Arc<dyn Method>> {
        self.methods
            .read()
            .expect("resource registry lock poisoned")
            .get(name)
            .cloned()
            .unwrap_or_default()
    }
}

// ============ Sanity Tests ============

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coerce::{Ty, TypeCode};
    use crate::member::{FnMethod, MethodSignature};

    #[test]
    fn values_round_trip() {
        let registry = ResourceRegistry::new();
        registry.add_value("Greeting", Value::String("hi".into()));
        assert_eq!(registry.value("Greeting"), Some(Value::String("hi".into())));
        assert_eq!(registry.value("Missing"), None);
    }

    #[test]
    fn methods_group_by_name() {
        let registry = ResourceRegistry::new();
        let sig = MethodSignature::exact(vec![Ty::new(TypeCode::Int32)]);
        registry.add_method(
            "Inc",
            FnMethod::new("Inc", sig.clone(), |_, args| match args {
                [Value::Int32(n)] => Ok(Value::Int32(n + 1)),
                _ => unreachable!(),
            }),
        );
        registry.add_method(
            "Inc",
            FnMethod::new("Inc", sig, |_, args| match args {
                [Value::Int32(n)] => Ok(Value::Int32(n + 2)),
                _ => unreachable!(),
            }),
        );
        assert_eq!(registry.methods("Inc").len(), 2);
        assert!(registry.methods("Dec").is_empty());
    }
}
