//! Binding engine
//!
//! Front door of the crate: owns the resolver/navigator/resource trio,
//! compiles binding strings into `Binding`s and attaches them to live object
//! pairs as `LiveBinding`s. A live binding pushes the first source expression
//! into the target member, re-evaluating when any discovered source path
//! changes (OneWay/TwoWay) and writing target edits back to the first source
//! path (TwoWay). Action bindings are not evaluated at attach; they are fired
//! explicitly with event arguments.

use std::fmt;
use std::sync::{Arc, Weak};

use log::{debug, warn};

use crate::clause;
use crate::compile::CompiledBinding;
use crate::eval::{EvalContext, EvalError};
use crate::member::{Listener, Member, MemberResolver, Subscription, TreeNavigator};
use crate::object::DynamicObject;
use crate::resource::ResourceRegistry;
use crate::transform;
use crate::value::Value;
use crate::TetherError;

type Result<T> = std::result::Result<T, TetherError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BindingMode {
    #[default]
    OneWay,
    TwoWay,
    OneTime,
}

/// One compiled clause of a binding string, not yet attached to objects.
#[derive(Debug)]
pub struct Binding {
    pub is_action: bool,
    pub target_path: String,
    pub mode: BindingMode,
    /// Compiled source expressions; the first drives the value, the rest
    /// only contribute observation dependencies.
    pub sources: Vec<CompiledBinding>,
    /// Named parameters other than `Mode`.
    pub params: Vec<(String, CompiledBinding)>,
}

pub struct BindingEngine {
    resolver: Arc<dyn MemberResolver>,
    navigator: Arc<dyn TreeNavigator>,
    resources: Arc<ResourceRegistry>,
}

impl BindingEngine {
    pub fn new(resolver: Arc<dyn MemberResolver>, navigator: Arc<dyn TreeNavigator>) -> Self {
        BindingEngine {
            resolver,
            navigator,
            resources: Arc::new(ResourceRegistry::new()),
        }
    }

    pub fn resources(&self) -> &ResourceRegistry {
        &self.resources
    }

    /// Evaluation context for ad-hoc expression evaluation against this
    /// engine's collaborators.
    pub fn context(&self, target: Value, context: Value) -> EvalContext {
        EvalContext::new(Arc::clone(&self.resolver), Arc::clone(&self.navigator))
            .with_resources(Arc::clone(&self.resources))
            .with_target(target)
            .with_context(context)
    }

    /// Compile every clause of a binding string.
    pub fn compile(&self, input: &str) -> Result<Vec<Binding>> {
        let clauses = clause::split(input)?;
        let mut bindings = Vec::with_capacity(clauses.len());
        for clause in clauses {
            let target_path = clause.target_path();
            let mut mode = BindingMode::default();
            let mut params = Vec::new();
            for (name, value) in clause.params {
                if name == "Mode" {
                    mode = parse_mode(&value)?;
                } else {
                    params.push((name, CompiledBinding::new(transform::transform(value))));
                }
            }
            let sources = clause
                .sources
                .into_iter()
                .map(|source| CompiledBinding::new(transform::transform(source)))
                .collect();
            debug!("compiled binding clause for target '{target_path}'");
            bindings.push(Binding {
                is_action: clause.is_action,
                target_path,
                mode,
                sources,
                params,
            });
        }
        Ok(bindings)
    }

    /// Compile a binding string and attach every clause to a target/context
    /// pair. The returned live bindings keep their subscriptions alive;
    /// dropping one detaches it.
    pub fn bind(&self, input: &str, target: &Value, context: &Value) -> Result<Vec<LiveBinding>> {
        self.compile(input)?
            .into_iter()
            .map(|binding| self.attach(binding, target, context))
            .collect()
    }

    pub fn attach(&self, binding: Binding, target: &Value, context: &Value) -> Result<LiveBinding> {
        let Binding {
            is_action,
            target_path,
            mode,
            sources,
            mut params,
        } = binding;
        if sources.is_empty() {
            return Err(TetherError::Binding(format!(
                "binding to '{target_path}' has no source expression"
            )));
        }
        // `$binding` resolves to a descriptor of the attached binding.
        let descriptor = DynamicObject::new("Tether.Binding");
        descriptor.set("TargetPath", Value::String(target_path.clone()));
        descriptor.set("Mode", Value::String(format!("{mode:?}")));
        descriptor.set("IsAction", Value::Bool(is_action));
        let ctx = self
            .context(target.clone(), context.clone())
            .with_binding(descriptor.value());
        let fallback = params
            .iter()
            .position(|(name, _)| name == "Fallback")
            .map(|i| params.remove(i).1);

        let inner = Arc::new(LiveInner {
            ctx,
            mode,
            is_action,
            target_path,
            sources,
            fallback,
        });
        let mut subs = Vec::new();

        if !is_action {
            // The initial push is strict; later updates only warn.
            let value = inner.compute()?;
            inner.push(value)?;

            if mode != BindingMode::OneTime {
                let listener = refresh_listener(&inner);
                for source in &inner.sources {
                    for descriptor in source.sources() {
                        subs.extend(observe_path(&inner.ctx, &descriptor.path, &listener));
                    }
                }
            }
            if mode == BindingMode::TwoWay {
                let weak = Arc::downgrade(&inner);
                let listener: Listener = Arc::new(move || {
                    if let Some(inner) = weak.upgrade() {
                        inner.write_back();
                    }
                });
                if let Ok((owner, member)) = inner.resolve_target() {
                    subs.extend(member.observe(&owner, listener));
                }
            }
        }

        Ok(LiveBinding { inner, subs })
    }
}

fn parse_mode(value: &crate::ast::surface::Expr) -> Result<BindingMode> {
    use crate::ast::surface::Expr;
    match value {
        Expr::Ident(name) => match name.as_str() {
            "OneWay" => Ok(BindingMode::OneWay),
            "TwoWay" => Ok(BindingMode::TwoWay),
            "OneTime" => Ok(BindingMode::OneTime),
            other => Err(TetherError::Binding(format!("unknown binding mode '{other}'"))),
        },
        other => Err(TetherError::Binding(format!(
            "binding mode must be an identifier, got '{other}'"
        ))),
    }
}

fn refresh_listener(inner: &Arc<LiveInner>) -> Listener {
    let weak: Weak<LiveInner> = Arc::downgrade(inner);
    Arc::new(move || {
        if let Some(inner) = weak.upgrade() {
            inner.refresh();
        }
    })
}

/// Subscribe a listener at every hop of a dotted source path, walking member
/// values from the data context. Stops at the first unresolvable or null hop;
/// the subscriptions taken so far still fire when the path is re-extended.
fn observe_path(ctx: &EvalContext, path: &str, listener: &Listener) -> Vec<Subscription> {
    let mut subs = Vec::new();
    let mut owner = ctx.context.clone();
    for segment in path.split('.') {
        let Some(member) = ctx.resolver.member(&owner, segment) else {
            break;
        };
        if let Some(sub) = member.observe(&owner, Arc::clone(listener)) {
            subs.push(sub);
        }
        match member.get(&owner) {
            Ok(value) if !value.is_null() => owner = value,
            _ => break,
        }
    }
    subs
}

// ============ Live bindings ============

/// An attached binding. Dropping it cancels every subscription.
pub struct LiveBinding {
    inner: Arc<LiveInner>,
    #[allow(dead_code)]
    subs: Vec<Subscription>,
}

impl fmt::Debug for LiveBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveBinding")
            .field("target_path", &self.inner.target_path)
            .field("mode", &self.inner.mode)
            .field("is_action", &self.inner.is_action)
            .finish()
    }
}

impl LiveBinding {
    pub fn target_path(&self) -> &str {
        &self.inner.target_path
    }

    pub fn mode(&self) -> BindingMode {
        self.inner.mode
    }

    pub fn is_action(&self) -> bool {
        self.inner.is_action
    }

    /// Re-evaluate the source and push the result into the target member.
    pub fn refresh(&self) {
        self.inner.refresh();
    }

    /// Evaluate the driving source expression without touching the target.
    pub fn evaluate(&self) -> std::result::Result<Value, EvalError> {
        self.inner.compute()
    }

    /// Fire an action binding with event arguments.
    pub fn fire(&self, args: &[Value]) -> std::result::Result<Value, EvalError> {
        self.inner.sources[0].invoke(&self.inner.ctx, args)
    }
}

struct LiveInner {
    ctx: EvalContext,
    mode: BindingMode,
    is_action: bool,
    target_path: String,
    sources: Vec<CompiledBinding>,
    fallback: Option<CompiledBinding>,
}

impl LiveInner {
    fn compute(&self) -> std::result::Result<Value, EvalError> {
        match self.sources[0].invoke(&self.ctx, &[]) {
            Ok(value) => Ok(value),
            Err(e) => match &self.fallback {
                Some(fallback) => {
                    debug!("binding to '{}' fell back: {e}", self.target_path);
                    fallback.invoke(&self.ctx, &[])
                }
                None => Err(e),
            },
        }
    }

    /// Resolve the target member, walking intermediate segments as values.
    fn resolve_target(&self) -> std::result::Result<(Value, Arc<dyn Member>), EvalError> {
        let mut owner = self.ctx.target.clone();
        let mut segments = self.target_path.split('.').peekable();
        while let Some(segment) = segments.next() {
            let member = self.ctx.resolver.member(&owner, segment).ok_or_else(|| {
                EvalError::UnresolvedMember {
                    target: "binding target".to_string(),
                    name: segment.to_string(),
                }
            })?;
            if segments.peek().is_none() {
                return Ok((owner, member));
            }
            owner = member.get(&owner)?;
        }
        Err(EvalError::Invalid("empty binding target path".to_string()))
    }

    fn push(&self, value: Value) -> std::result::Result<(), EvalError> {
        let (owner, member) = self.resolve_target()?;
        member.set(&owner, value)
    }

    fn refresh(&self) {
        match self.compute().and_then(|value| self.push(value)) {
            Ok(()) => {}
            Err(e) => warn!("binding to '{}' failed to refresh: {e}", self.target_path),
        }
    }

    /// TwoWay: copy the current target value into the first source path.
    fn write_back(&self) {
        let value = match self.resolve_target().and_then(|(owner, m)| m.get(&owner)) {
            Ok(value) => value,
            Err(e) => {
                warn!("binding to '{}' failed to read target: {e}", self.target_path);
                return;
            }
        };
        let Some(path) = self
            .sources
            .first()
            .and_then(|s| s.sources().first())
            .map(|d| d.path.clone())
        else {
            warn!(
                "binding to '{}' is TwoWay but has no writable source path",
                self.target_path
            );
            return;
        };
        if let Err(e) = self.set_source(&path, value) {
            warn!("binding to '{}' failed to write back: {e}", self.target_path);
        }
    }

    fn set_source(&self, path: &str, value: Value) -> std::result::Result<(), EvalError> {
        let mut owner = self.ctx.context.clone();
        let mut segments = path.split('.').peekable();
        while let Some(segment) = segments.next() {
            let member = self.ctx.resolver.member(&owner, segment).ok_or_else(|| {
                EvalError::UnresolvedMember {
                    target: "binding source".to_string(),
                    name: segment.to_string(),
                }
            })?;
            if segments.peek().is_none() {
                return member.set(&owner, value);
            }
            owner = member.get(&owner)?;
        }
        Err(EvalError::Invalid("empty binding source path".to_string()))
    }
}

// ============ Sanity Tests ============

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{DynamicObject, ObjectModel, ObjectTree};

    fn engine() -> BindingEngine {
        BindingEngine::new(Arc::new(ObjectModel::new()), Arc::new(ObjectTree))
    }

    #[test]
    fn one_way_tracks_source_changes() {
        let engine = engine();
        let view = DynamicObject::new("Demo.View");
        let model = DynamicObject::new("Demo.Model");
        model.set("SourceText", Value::String("first".into()));

        let live = engine
            .bind("Text SourceText", &view.value(), &model.value())
            .unwrap();
        assert_eq!(view.get("Text"), Some(Value::String("first".into())));

        model.set("SourceText", Value::String("second".into()));
        assert_eq!(view.get("Text"), Some(Value::String("second".into())));

        drop(live);
        model.set("SourceText", Value::String("third".into()));
        assert_eq!(view.get("Text"), Some(Value::String("second".into())));
    }

    #[test]
    fn one_time_evaluates_once() {
        let engine = engine();
        let view = DynamicObject::new("Demo.View");
        let model = DynamicObject::new("Demo.Model");
        model.set("Count", Value::Int32(1));

        let _live = engine
            .bind("Total Count + 1, Mode=OneTime", &view.value(), &model.value())
            .unwrap();
        assert_eq!(view.get("Total"), Some(Value::Int32(2)));

        model.set("Count", Value::Int32(10));
        assert_eq!(view.get("Total"), Some(Value::Int32(2)));
    }

    #[test]
    fn two_way_writes_target_edits_back() {
        let engine = engine();
        let view = DynamicObject::new("Demo.View");
        let model = DynamicObject::new("Demo.Model");
        model.set("Name", Value::String("a".into()));

        let _live = engine
            .bind("Text Name, Mode=TwoWay", &view.value(), &model.value())
            .unwrap();
        assert_eq!(view.get("Text"), Some(Value::String("a".into())));

        view.set("Text", Value::String("edited".into()));
        assert_eq!(model.get("Name"), Some(Value::String("edited".into())));

        // and the source direction still works
        model.set("Name", Value::String("back".into()));
        assert_eq!(view.get("Text"), Some(Value::String("back".into())));
    }

    #[test]
    fn extra_sources_only_add_dependencies() {
        let engine = engine();
        let view = DynamicObject::new("Demo.View");
        let model = DynamicObject::new("Demo.Model");
        model.set("A", Value::Int32(1));
        model.set("B", Value::Int32(100));

        let _live = engine
            .bind("Total A, B", &view.value(), &model.value())
            .unwrap();
        assert_eq!(view.get("Total"), Some(Value::Int32(1)));

        // B is not part of the value, but changing it re-evaluates
        model.set("A", Value::Int32(2));
        model.set("B", Value::Int32(200));
        assert_eq!(view.get("Total"), Some(Value::Int32(2)));
    }

    #[test]
    fn action_bindings_fire_with_arguments() {
        let engine = engine();
        let view = DynamicObject::new("Demo.View");
        let model = DynamicObject::new("Demo.Model");

        let live = engine
            .bind("@Click $param1 + 1", &view.value(), &model.value())
            .unwrap();
        let live = &live[0];
        assert!(live.is_action());
        // not evaluated at attach
        assert_eq!(view.get("Click"), None);
        assert_eq!(live.fire(&[Value::Int32(41)]).unwrap(), Value::Int32(42));
    }

    #[test]
    fn fallback_parameter_recovers_from_errors() {
        let engine = engine();
        let view = DynamicObject::new("Demo.View");
        let model = DynamicObject::new("Demo.Model");

        let _live = engine
            .bind("Text Missing.Path, Fallback=\"n/a\"", &view.value(), &model.value())
            .unwrap();
        assert_eq!(view.get("Text"), Some(Value::String("n/a".into())));
    }

    #[test]
    fn unknown_mode_is_rejected() {
        let err = engine().compile("Text a, Mode=Sideways").unwrap_err();
        assert!(matches!(err, TetherError::Binding(_)));
    }

    #[test]
    fn attach_rejects_a_binding_without_sources() {
        let engine = engine();
        let view = DynamicObject::new("Demo.View");
        let model = DynamicObject::new("Demo.Model");
        let binding = Binding {
            is_action: false,
            target_path: "Text".to_string(),
            mode: BindingMode::OneWay,
            sources: Vec::new(),
            params: Vec::new(),
        };
        assert!(matches!(
            engine.attach(binding, &view.value(), &model.value()),
            Err(TetherError::Binding(_))
        ));
    }

    #[test]
    fn binding_macro_reads_the_descriptor() {
        let engine = engine();
        let view = DynamicObject::new("Demo.View");
        let model = DynamicObject::new("Demo.Model");

        let _live = engine
            .bind(
                "Text $binding.TargetPath + ':' + $binding.Mode",
                &view.value(),
                &model.value(),
            )
            .unwrap();
        assert_eq!(view.get("Text"), Some(Value::String("Text:OneWay".into())));
    }

    #[test]
    fn bindings_support_debug_formatting() {
        let engine = engine();
        let view = DynamicObject::new("Demo.View");
        let model = DynamicObject::new("Demo.Model");
        model.set("A", Value::Int32(1));

        let compiled = engine.compile("Text A, Mode=TwoWay").unwrap();
        assert!(format!("{:?}", compiled[0]).contains("TwoWay"));

        let live = engine
            .bind("Text A", &view.value(), &model.value())
            .unwrap();
        assert!(format!("{:?}", live[0]).contains("Text"));
    }

    #[test]
    fn multiple_clauses_attach_independently() {
        let engine = engine();
        let view = DynamicObject::new("Demo.View");
        let model = DynamicObject::new("Demo.Model");
        model.set("First", Value::String("x".into()));
        model.set("Second", Value::Int32(7));

        let live = engine
            .bind("Text First; Count Second;", &view.value(), &model.value())
            .unwrap();
        assert_eq!(live.len(), 2);
        assert_eq!(view.get("Text"), Some(Value::String("x".into())));
        assert_eq!(view.get("Count"), Some(Value::Int32(7)));
    }
}
