//! In-memory object model
//!
//! Reference implementations of the collaborator contracts: `DynamicObject`
//! is an observable property bag with a type name and optional tree position,
//! `ObjectModel` resolves its fields/methods/indexers, and `ObjectTree`
//! navigates parent/child links for `$Relative` and `$Element`. Hosts with
//! real object graphs supply their own resolver and navigator instead.

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, Weak};

use crate::coerce::{Ty, TypeCode};
use crate::eval::EvalError;
use crate::member::{Listener, Member, MemberResolver, Method, Subscription, TreeNavigator};
use crate::value::{ObjectInstance, ObjectRef, Value};

type Result<T> = std::result::Result<T, EvalError>;

// ============ DynamicObject ============

/// Observable property bag. Fields spring into existence on first set;
/// listeners are keyed by field name, so observing a field that does not
/// exist yet still fires when it is first written.
pub struct DynamicObject {
    type_name: String,
    me: Weak<DynamicObject>,
    name: RwLock<Option<String>>,
    fields: RwLock<HashMap<String, Value>>,
    listeners: RwLock<Vec<ListenerEntry>>,
    next_listener: AtomicUsize,
    parent: RwLock<Option<Weak<DynamicObject>>>,
    children: RwLock<Vec<Arc<DynamicObject>>>,
}

struct ListenerEntry {
    id: usize,
    field: String,
    listener: Listener,
}

impl DynamicObject {
    pub fn new(type_name: impl Into<String>) -> Arc<Self> {
        let type_name = type_name.into();
        Arc::new_cyclic(|me| DynamicObject {
            type_name,
            me: me.clone(),
            name: RwLock::new(None),
            fields: RwLock::new(HashMap::new()),
            listeners: RwLock::new(Vec::new()),
            next_listener: AtomicUsize::new(0),
            parent: RwLock::new(None),
            children: RwLock::new(Vec::new()),
        })
    }

    pub fn named(type_name: impl Into<String>, name: impl Into<String>) -> Arc<Self> {
        let obj = Self::new(type_name);
        *obj.name.write().expect("object lock poisoned") = Some(name.into());
        obj
    }

    /// This object as a `Value`.
    pub fn value(self: &Arc<Self>) -> Value {
        Value::Object(Arc::clone(self) as ObjectRef)
    }

    pub fn name(&self) -> Option<String> {
        self.name.read().expect("object lock poisoned").clone()
    }

    pub fn get(&self, field: &str) -> Option<Value> {
        self.fields
            .read()
            .expect("object lock poisoned")
            .get(field)
            .cloned()
    }

    /// Write a field and notify its listeners. Writing an equal value is a
    /// no-op, which is what breaks two-way update cycles.
    pub fn set(&self, field: impl Into<String>, value: Value) {
        let field = field.into();
        {
            let mut fields = self.fields.write().expect("object lock poisoned");
            if fields.get(&field) == Some(&value) {
                return;
            }
            fields.insert(field.clone(), value);
        }
        // Listeners run outside the locks; they commonly read back.
        let to_notify: Vec<Listener> = self
            .listeners
            .read()
            .expect("object lock poisoned")
            .iter()
            .filter(|e| e.field == field)
            .map(|e| Arc::clone(&e.listener))
            .collect();
        for listener in to_notify {
            listener();
        }
    }

    pub fn observe(self: &Arc<Self>, field: impl Into<String>, listener: Listener) -> Subscription {
        let id = self.next_listener.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .write()
            .expect("object lock poisoned")
            .push(ListenerEntry {
                id,
                field: field.into(),
                listener,
            });
        let weak = Arc::downgrade(self);
        Subscription::new(move || {
            if let Some(obj) = weak.upgrade() {
                obj.listeners
                    .write()
                    .expect("object lock poisoned")
                    .retain(|e| e.id != id);
            }
        })
    }

    pub fn add_child(self: &Arc<Self>, child: &Arc<DynamicObject>) {
        *child.parent.write().expect("object lock poisoned") = Some(Arc::downgrade(self));
        self.children
            .write()
            .expect("object lock poisoned")
            .push(Arc::clone(child));
    }

    fn parent(&self) -> Option<Arc<DynamicObject>> {
        self.parent
            .read()
            .expect("object lock poisoned")
            .as_ref()
            .and_then(Weak::upgrade)
    }

    fn children(&self) -> Vec<Arc<DynamicObject>> {
        self.children.read().expect("object lock poisoned").clone()
    }
}

impl ObjectInstance for DynamicObject {
    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn as_dynamic(value: &Value) -> Option<&DynamicObject> {
    value
        .as_object()
        .and_then(|o| o.as_any().downcast_ref::<DynamicObject>())
}

fn dynamic_arc(value: &Value) -> Option<Arc<DynamicObject>> {
    as_dynamic(value)?.me.upgrade()
}

// ============ Members ============

struct FieldMember {
    name: String,
}

impl Member for FieldMember {
    fn name(&self) -> &str {
        &self.name
    }

    fn value_type(&self) -> Ty {
        Ty::new(TypeCode::Object)
    }

    fn get(&self, instance: &Value) -> Result<Value> {
        let obj = as_dynamic(instance).ok_or_else(|| EvalError::UnresolvedMember {
            target: "non-object".to_string(),
            name: self.name.clone(),
        })?;
        obj.get(&self.name).ok_or_else(|| EvalError::UnresolvedMember {
            target: obj.type_name().to_string(),
            name: self.name.clone(),
        })
    }

    fn set(&self, instance: &Value, value: Value) -> Result<()> {
        let obj = as_dynamic(instance).ok_or_else(|| EvalError::UnresolvedMember {
            target: "non-object".to_string(),
            name: self.name.clone(),
        })?;
        obj.set(self.name.clone(), value);
        Ok(())
    }

    fn observe(&self, instance: &Value, listener: Listener) -> Option<Subscription> {
        Some(dynamic_arc(instance)?.observe(self.name.clone(), listener))
    }
}

struct StringLengthMember;

impl Member for StringLengthMember {
    fn name(&self) -> &str {
        "Length"
    }

    fn value_type(&self) -> Ty {
        Ty::new(TypeCode::Int32)
    }

    fn get(&self, instance: &Value) -> Result<Value> {
        match instance {
            Value::String(s) => Ok(Value::Int32(s.chars().count() as i32)),
            other => Err(EvalError::UnresolvedMember {
                target: format!("{other:?}"),
                name: "Length".to_string(),
            }),
        }
    }

    fn set(&self, _instance: &Value, _value: Value) -> Result<()> {
        Err(EvalError::Invalid("String.Length is read-only".to_string()))
    }

    fn observe(&self, _instance: &Value, _listener: Listener) -> Option<Subscription> {
        None
    }
}

// ============ ObjectModel ============

/// `MemberResolver` over `DynamicObject` graphs. Every field name resolves on
/// a dynamic object (reads of absent fields fail at `get`); methods and
/// indexers are registered per type name.
#[derive(Default)]
pub struct ObjectModel {
    methods: RwLock<HashMap<(String, String), Vec<Arc<dyn Method>>>>,
    indexers: RwLock<HashMap<String, Arc<dyn Method>>>,
}

impl ObjectModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_method(
        &self,
        type_name: impl Into<String>,
        method_name: impl Into<String>,
        method: Arc<dyn Method>,
    ) {
        self.methods
            .write()
            .expect("object model lock poisoned")
            .entry((type_name.into(), method_name.into()))
            .or_default()
            .push(method);
    }

    pub fn register_indexer(&self, type_name: impl Into<String>, method: Arc<dyn Method>) {
        self.indexers
            .write()
            .expect("object model lock poisoned")
            .insert(type_name.into(), method);
    }
}

impl MemberResolver for ObjectModel {
    fn member(&self, owner: &Value, name: &str) -> Option<Arc<dyn Member>> {
        match owner {
            Value::Object(o) if o.as_any().is::<DynamicObject>() => Some(Arc::new(FieldMember {
                name: name.to_string(),
            })),
            Value::String(_) if name == "Length" => Some(Arc::new(StringLengthMember)),
            _ => None,
        }
    }

    fn methods(&self, owner: &Value, name: &str) -> Vec<Arc<dyn Method>> {
        let Some(obj) = owner.as_object() else {
            return Vec::new();
        };
        self.methods
            .read()
            .expect("object model lock poisoned")
            .get(&(obj.type_name().to_string(), name.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    fn indexer(&self, owner: &Value) -> Option<Arc<dyn Method>> {
        let obj = owner.as_object()?;
        self.indexers
            .read()
            .expect("object model lock poisoned")
            .get(obj.type_name())
            .cloned()
    }
}

// ============ ObjectTree ============

/// `TreeNavigator` over `DynamicObject` parent/child links.
pub struct ObjectTree;

impl TreeNavigator for ObjectTree {
    fn parent(&self, node: &Value) -> Option<Value> {
        as_dynamic(node)?.parent().map(|p| p.value())
    }

    fn find_by_name(&self, root: &Value, name: &str) -> Option<Value> {
        let obj = dynamic_arc(root)?;
        if obj.name().as_deref() == Some(name) {
            return Some(obj.value());
        }
        for child in obj.children() {
            if let Some(found) = self.find_by_name(&child.value(), name) {
                return Some(found);
            }
        }
        None
    }
}

// ============ Sanity Tests ============

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicI32;

    #[test]
    fn fields_notify_on_change_only() {
        let obj = DynamicObject::new("Demo.Model");
        let hits = Arc::new(AtomicI32::new(0));
        let h = Arc::clone(&hits);
        let sub = obj.observe("Text", Arc::new(move || {
            h.fetch_add(1, Ordering::SeqCst);
        }));
        obj.set("Text", Value::String("a".into()));
        obj.set("Text", Value::String("a".into())); // unchanged, no notify
        obj.set("Text", Value::String("b".into()));
        obj.set("Other", Value::Int32(1)); // different field
        assert_eq!(hits.load(Ordering::SeqCst), 2);

        sub.cancel();
        obj.set("Text", Value::String("c".into()));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn resolver_reads_and_writes_fields() {
        let model = ObjectModel::new();
        let obj = DynamicObject::new("Demo.Model");
        obj.set("Count", Value::Int32(3));

        let value = obj.value();
        let member = model.member(&value, "Count").unwrap();
        assert_eq!(member.get(&value).unwrap(), Value::Int32(3));
        member.set(&value, Value::Int32(4)).unwrap();
        assert_eq!(obj.get("Count"), Some(Value::Int32(4)));

        // absent fields resolve but fail on read
        let missing = model.member(&value, "Nope").unwrap();
        assert!(matches!(
            missing.get(&value),
            Err(EvalError::UnresolvedMember { .. })
        ));
    }

    #[test]
    fn string_length_is_built_in() {
        let model = ObjectModel::new();
        let s = Value::String("hello".into());
        let member = model.member(&s, "Length").unwrap();
        assert_eq!(member.get(&s).unwrap(), Value::Int32(5));
        assert!(model.member(&s, "Chars").is_none());
    }

    #[test]
    fn tree_walks_parents_and_names() {
        let root = DynamicObject::named("Demo.Window", "main");
        let panel = DynamicObject::new("Demo.Panel");
        let inner = DynamicObject::new("Demo.Panel");
        let leaf = DynamicObject::named("Demo.Label", "title");
        root.add_child(&panel);
        panel.add_child(&inner);
        inner.add_child(&leaf);

        let tree = ObjectTree;
        assert_eq!(
            tree.parent(&leaf.value()).and_then(|v| v.as_object().map(|o| o.type_name().to_string())),
            Some("Demo.Panel".to_string())
        );
        let found = tree.find_by_name(&root.value(), "title").unwrap();
        assert_eq!(found, leaf.value());

        // level counts matches from the inside out, short names match too
        let first = tree.find_relative(&leaf.value(), "Panel", 1).unwrap();
        assert_eq!(first, inner.value());
        let second = tree.find_relative(&leaf.value(), "Demo.Panel", 2).unwrap();
        assert_eq!(second, panel.value());
        assert!(tree.find_relative(&leaf.value(), "Demo.Panel", 3).is_none());
        assert!(tree.find_relative(&leaf.value(), "Panel", 0).is_none());
    }
}
