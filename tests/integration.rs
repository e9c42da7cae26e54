//! Black-box integration tests for Tether
//!
//! These tests exercise the full split → parse → transform → compile → eval
//! pipeline through the public engine API.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use tether::coerce::{Ty, TypeCode};
use tether::{
    run, BindingEngine, CompiledBinding, DateTime, DynamicObject, FnMethod, MethodSignature,
    ObjectModel, ObjectTree, Value,
};

fn setup() -> (BindingEngine, Arc<ObjectModel>, Arc<DynamicObject>, Arc<DynamicObject>) {
    let model = Arc::new(ObjectModel::new());
    let engine = BindingEngine::new(Arc::clone(&model) as _, Arc::new(ObjectTree));
    let view = DynamicObject::new("Demo.View");
    let vm = DynamicObject::new("Demo.ViewModel");
    (engine, model, view, vm)
}

// ============ Arithmetic bindings ============

#[test]
fn arithmetic_binding_tracks_its_source() {
    let (engine, _, view, vm) = setup();
    vm.set("x", Value::Int32(20));

    let _live = engine
        .bind("Text x/2-10", &view.value(), &vm.value())
        .unwrap();
    assert_eq!(view.get("Text"), Some(Value::Int32(0)));

    vm.set("x", Value::Int32(40));
    assert_eq!(view.get("Text"), Some(Value::Int32(10)));
}

#[test]
fn source_paths_discovered_in_order() {
    let (engine, _, _, _) = setup();
    let bindings = engine.compile("Text a + b + c == d").unwrap();
    let paths: Vec<&str> = bindings[0].sources[0]
        .sources()
        .iter()
        .map(|s| s.path.as_str())
        .collect();
    assert_eq!(paths, ["a", "b", "c", "d"]);
}

// ============ Null-conditional chains ============

#[test]
fn null_conditional_chain_short_circuits() {
    let (engine, _, _, _) = setup();
    let ctx = engine.context(Value::Null, Value::Null);
    let compiled = CompiledBinding::from_source("arg1?.NestedModel?.StringProperty").unwrap();

    // no argument at all
    assert_eq!(compiled.invoke(&ctx, &[]).unwrap(), Value::Null);

    // argument present, nested model missing
    let outer = DynamicObject::new("Demo.Outer");
    assert_eq!(
        compiled.invoke(&ctx, &[outer.value()]).unwrap(),
        Value::Null
    );

    // full chain populated
    let nested = DynamicObject::new("Demo.Nested");
    nested.set("StringProperty", Value::String("deep".into()));
    outer.set("NestedModel", nested.value());
    assert_eq!(
        compiled.invoke(&ctx, &[outer.value()]).unwrap(),
        Value::String("deep".into())
    );
}

#[test]
fn guarded_member_path_is_observed_whole() {
    let (engine, _, _, _) = setup();
    let bindings = engine.compile("Text a?.b?.c").unwrap();
    let paths: Vec<&str> = bindings[0].sources[0]
        .sources()
        .iter()
        .map(|s| s.path.as_str())
        .collect();
    assert_eq!(paths, ["a.b.c"]);
}

// ============ Interpolated strings ============

#[test]
fn interpolation_applies_format_and_alignment() {
    let (engine, _, view, vm) = setup();
    vm.set("SourceText1", Value::DateTime(DateTime::date(2024, 5, 17)));
    vm.set("SourceText2", Value::Int32(5));

    let _live = engine
        .bind(
            "Text '{SourceText1:d} - {SourceText2,4}'",
            &view.value(),
            &vm.value(),
        )
        .unwrap();
    assert_eq!(
        view.get("Text"),
        Some(Value::String("5/17/2024 -    5".into()))
    );
}

#[test]
fn interpolation_tracks_every_hole() {
    let (engine, _, view, vm) = setup();
    vm.set("First", Value::String("a".into()));
    vm.set("Second", Value::String("b".into()));

    let _live = engine
        .bind("Text '{First}+{Second}'", &view.value(), &vm.value())
        .unwrap();
    assert_eq!(view.get("Text"), Some(Value::String("a+b".into())));

    vm.set("Second", Value::String("c".into()));
    assert_eq!(view.get("Text"), Some(Value::String("a+c".into())));
}

// ============ Memoization ============

#[test]
fn one_time_macro_memoizes_per_binding() {
    let (engine, _, view, vm) = setup();
    let counter = Arc::new(AtomicI32::new(0));
    let c = Arc::clone(&counter);
    engine.resources().add_method(
        "Next",
        FnMethod::new("Next", MethodSignature::exact(Vec::new()), move |_, _| {
            Ok(Value::Int32(c.fetch_add(1, Ordering::SeqCst) + 1))
        }),
    );
    vm.set("n", Value::Int32(0));

    let _live = engine
        .bind("Text $OneTime($Next()) + n", &view.value(), &vm.value())
        .unwrap();
    vm.set("n", Value::Int32(10));
    vm.set("n", Value::Int32(20));
    assert_eq!(view.get("Text"), Some(Value::Int32(21)));
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[test]
fn static_macro_resolves_once() {
    let (engine, _, view, vm) = setup();
    engine
        .resources()
        .add_value("Caption", Value::String("before".into()));
    vm.set("n", Value::Int32(1));

    let _live = engine
        .bind("Text '{$$Caption} {n}'", &view.value(), &vm.value())
        .unwrap();
    assert_eq!(view.get("Text"), Some(Value::String("before 1".into())));

    // later registry edits don't reach an already-attached binding
    engine
        .resources()
        .add_value("Caption", Value::String("after".into()));
    vm.set("n", Value::Int32(2));
    assert_eq!(view.get("Text"), Some(Value::String("before 2".into())));
}

// ============ Tree sources ============

#[test]
fn relative_source_walks_ancestors_by_level() {
    let (engine, _, _, vm) = setup();
    let window = DynamicObject::new("Demo.Window");
    let outer = DynamicObject::new("Demo.Panel");
    let inner = DynamicObject::new("Demo.Panel");
    let label = DynamicObject::new("Demo.Label");
    window.add_child(&outer);
    outer.add_child(&inner);
    inner.add_child(&label);
    inner.set("Title", Value::String("inner".into()));
    outer.set("Title", Value::String("outer".into()));

    let _live = engine
        .bind(
            "Text {RelativeSource Demo.Panel}.Title; Alt {RelativeSource Panel, Level=2}.Title",
            &label.value(),
            &vm.value(),
        )
        .unwrap();
    assert_eq!(label.get("Text"), Some(Value::String("inner".into())));
    assert_eq!(label.get("Alt"), Some(Value::String("outer".into())));
}

#[test]
fn element_source_finds_named_nodes_from_the_root() {
    let (engine, _, _, vm) = setup();
    let window = DynamicObject::new("Demo.Window");
    let header = DynamicObject::named("Demo.Label", "Header");
    let footer = DynamicObject::new("Demo.Label");
    window.add_child(&header);
    window.add_child(&footer);
    header.set("Caption", Value::String("top".into()));

    let _live = engine
        .bind(
            "Text {ElementSource Header}.Caption",
            &footer.value(),
            &vm.value(),
        )
        .unwrap();
    assert_eq!(footer.get("Text"), Some(Value::String("top".into())));
}

// ============ Methods and overloads ============

#[test]
fn overloads_rank_exact_over_widening_over_variadic() {
    let (engine, model, _, vm) = setup();
    for (params, variadic, tag) in [
        (vec![Ty::new(TypeCode::Int32)], false, "int"),
        (vec![Ty::new(TypeCode::Double)], false, "double"),
        (vec![Ty::new(TypeCode::Object)], true, "params"),
    ] {
        let sig = if variadic {
            MethodSignature::variadic(params)
        } else {
            MethodSignature::exact(params)
        };
        model.register_method(
            "Demo.ViewModel",
            "F",
            FnMethod::new("F", sig, move |_, _| Ok(Value::String(tag.into()))),
        );
    }

    let ctx = engine.context(Value::Null, vm.value());
    assert_eq!(run("F(1)", &ctx).unwrap(), Value::String("int".into()));
    assert_eq!(run("F(1.5)", &ctx).unwrap(), Value::String("double".into()));
    assert_eq!(run("F(1, 2)", &ctx).unwrap(), Value::String("params".into()));
    assert_eq!(
        run("F(\"s\")", &ctx).unwrap(),
        Value::String("params".into())
    );
}

#[test]
fn lambdas_flow_into_method_arguments() {
    let (engine, model, _, vm) = setup();
    model.register_method(
        "Demo.ViewModel",
        "Apply",
        FnMethod::new(
            "Apply",
            MethodSignature::exact(vec![Ty::new(TypeCode::Object), Ty::new(TypeCode::Int32)]),
            |_, args| match args {
                [Value::Lambda(f), seed] => f.call(std::slice::from_ref(seed)),
                _ => panic!("expected lambda argument"),
            },
        ),
    );

    let ctx = engine.context(Value::Null, vm.value());
    assert_eq!(
        run("Apply(v => v * 2, 21)", &ctx).unwrap(),
        Value::Int32(42)
    );
}

#[test]
fn indexers_resolve_through_the_object_model() {
    let (engine, model, view, vm) = setup();
    model.register_indexer(
        "Demo.List",
        FnMethod::new(
            "Item",
            MethodSignature::exact(vec![Ty::new(TypeCode::Int32)]),
            |instance, args| {
                let [Value::Int32(i)] = args else {
                    panic!("expected int index");
                };
                let obj = instance.as_object().expect("object receiver");
                let obj = obj
                    .as_any()
                    .downcast_ref::<DynamicObject>()
                    .expect("dynamic receiver");
                Ok(obj.get(&i.to_string()).unwrap_or(Value::Null))
            },
        ),
    );
    let list = DynamicObject::new("Demo.List");
    list.set("0", Value::String("zero".into()));
    list.set("1", Value::String("one".into()));
    vm.set("Items", list.value());

    let _live = engine
        .bind("Text Items[1]", &view.value(), &vm.value())
        .unwrap();
    assert_eq!(view.get("Text"), Some(Value::String("one".into())));
}

// ============ Coalesce and context macros ============

#[test]
fn coalesce_falls_back_per_evaluation() {
    let (engine, _, view, vm) = setup();
    vm.set("Name", Value::Null);

    let _live = engine
        .bind("Text Name ?? 'anonymous'", &view.value(), &vm.value())
        .unwrap();
    assert_eq!(view.get("Text"), Some(Value::String("anonymous".into())));

    vm.set("Name", Value::String("ada".into()));
    assert_eq!(view.get("Text"), Some(Value::String("ada".into())));
}

#[test]
fn context_macros_reach_target_and_context() {
    let (engine, _, view, vm) = setup();
    vm.set("Tag", Value::Int32(7));
    view.set("Tag", Value::Int32(9));

    let _live = engine
        .bind("Sum $self.Tag + $context.Tag", &view.value(), &vm.value())
        .unwrap();
    assert_eq!(view.get("Sum"), Some(Value::Int32(16)));
}

#[test]
fn clause_without_source_binds_the_context() {
    let (engine, _, view, vm) = setup();
    let _live = engine.bind("Model", &view.value(), &vm.value()).unwrap();
    assert_eq!(view.get("Model"), Some(vm.value()));
}

// ============ Errors ============

#[test]
fn parse_errors_carry_positions() {
    let err = tether::parse("a +\n ").unwrap_err();
    assert!(err.offset > 0);
    assert_eq!(err.line, 1);

    assert!(tether::split("Text ???").is_err());
    assert!(tether::split("").is_err());
}

#[test]
fn unresolved_members_fail_the_bind() {
    let (engine, _, view, vm) = setup();
    let err = engine
        .bind("Text 1 + \"x\" * 2", &view.value(), &vm.value())
        .unwrap_err();
    let rendered = err.to_string();
    assert!(rendered.contains("*"), "unexpected error: {rendered}");
}
