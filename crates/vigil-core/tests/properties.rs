//! End-to-end behaviour of stores and observers through the public API.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use serde_json::json;
use vigil_core::*;

fn setup() -> ManualClock {
    let _ = env_logger::builder().is_test(true).try_init();
    reset();
    let clock = ManualClock::new();
    set_clock(clock.clone());
    clock
}

fn num(v: Value) -> f64 {
    v.as_f64().unwrap_or(f64::NAN)
}

fn child(store: &Reactive, key: &str) -> Reactive {
    store.get(key).as_reactive().cloned().expect("nested container")
}

/// Observer that counts its runs and records what `read` returned.
fn watch<T: Clone + 'static>(
    read: impl Fn() -> T + 'static,
) -> (Observer<T>, Rc<Cell<u32>>, Rc<RefCell<Vec<T>>>) {
    let runs = Rc::new(Cell::new(0));
    let seen = Rc::new(RefCell::new(Vec::new()));
    let obs = observe({
        let runs = runs.clone();
        let seen = seen.clone();
        move || {
            runs.set(runs.get() + 1);
            let v = read();
            seen.borrow_mut().push(v.clone());
            v
        }
    });
    (obs, runs, seen)
}

#[test]
fn test_writes_are_batched_until_flush() {
    setup();
    let store = create_store(json!({ "count": 0 })).unwrap();
    let (_obs, runs, seen) = watch({
        let store = store.clone();
        move || num(store.get("count"))
    });

    for i in 1..=3 {
        store.set("count", i).unwrap();
    }
    assert_eq!(runs.get(), 1);
    assert_eq!(flush(), 1);
    assert_eq!(*seen.borrow(), vec![0.0, 3.0]);
    assert_eq!(flush(), 0);
}

#[test]
fn test_loosely_equal_writes_do_not_invalidate() {
    setup();
    let store = create_store(json!({ "a": 1, "flag": true, "none": null })).unwrap();
    let (_obs, runs, _) = watch({
        let store = store.clone();
        move || {
            (
                store.get("a").as_f64(),
                store.get("flag").truthy(),
                store.get("none").is_undefined(),
            )
        }
    });

    store.set("a", "1").unwrap();
    store.set("a", 1.0).unwrap();
    store.set("flag", 1).unwrap();
    store.set("none", Value::Undefined).unwrap();
    assert_eq!(flush(), 0);
    assert_eq!(runs.get(), 1);

    store.set("a", 2).unwrap();
    assert_eq!(flush(), 1);
}

#[test]
fn test_sequence_length_always_invalidates() {
    setup();
    let store = create_store(json!({ "items": [1, 2] })).unwrap();
    let items = child(&store, "items");
    let (_obs, runs, _) = watch({
        let items = items.clone();
        move || items.len()
    });

    items.set("length", 2).unwrap();
    assert_eq!(flush(), 1);
    assert_eq!(runs.get(), 2);

    items.push(3).unwrap();
    assert_eq!(flush(), 1);
    assert_eq!(items.len(), 3);
}

#[test]
fn test_conditional_dependencies_are_retracked() {
    setup();
    let store = create_store(json!({ "a": 0, "b": 0, "c": 0 })).unwrap();
    let (_obs, runs, _) = watch({
        let store = store.clone();
        move || {
            if num(store.get("a")) > 0.0 {
                num(store.get("b"))
            } else {
                num(store.get("c"))
            }
        }
    });
    let bump = |key: &str| {
        let next = num(store.get(key)) + 1.0;
        store.set(key, next).unwrap();
        let before = runs.get();
        flush();
        runs.get() - before
    };

    assert_eq!(bump("c"), 1);
    assert_eq!(bump("b"), 0);
    assert_eq!(bump("a"), 1);
    assert_eq!(bump("b"), 1);
    assert_eq!(bump("c"), 0);
}

#[test]
fn test_parent_subsumes_pending_child() {
    setup();
    let store = create_store(json!({ "x": 0, "y": 0 })).unwrap();
    let child_runs = Rc::new(Cell::new(0));

    let _parent = observe({
        let store = store.clone();
        let child_runs = child_runs.clone();
        move || {
            store.get("x");
            let store = store.clone();
            let child_runs = child_runs.clone();
            observe(move || {
                child_runs.set(child_runs.get() + 1);
                store.get("y")
            });
        }
    });
    assert_eq!(child_runs.get(), 1);

    store.set("y", 1).unwrap();
    flush();
    assert_eq!(child_runs.get(), 2);

    store.set("y", 2).unwrap();
    store.set("x", 1).unwrap();
    // The stale child is skipped; its replacement runs inside the parent.
    assert_eq!(flush(), 1);
    assert_eq!(child_runs.get(), 3);
}

#[test]
fn test_computed_value_is_cached_and_notifies_on_change_only() {
    setup();
    let derivations = Rc::new(Cell::new(0));
    let person = create_store(
        Record::new()
            .with("age", 20)
            .with_computed("adult", {
                let derivations = derivations.clone();
                move |p: &Reactive| {
                    derivations.set(derivations.get() + 1);
                    Value::from(num(p.get("age")) >= 18.0)
                }
            }),
    )
    .unwrap();

    let (_a, a_runs, _) = watch({
        let person = person.clone();
        move || person.get("adult").truthy()
    });
    let (_b, b_runs, seen) = watch({
        let person = person.clone();
        move || person.get("adult").truthy()
    });
    assert_eq!(derivations.get(), 1);

    person.set("age", 21).unwrap();
    flush();
    assert_eq!(derivations.get(), 2);
    assert_eq!((a_runs.get(), b_runs.get()), (1, 1));

    person.set("age", 12).unwrap();
    flush();
    assert_eq!(derivations.get(), 3);
    assert_eq!((a_runs.get(), b_runs.get()), (2, 2));
    assert_eq!(*seen.borrow(), vec![true, false]);

    let internal = observers()
        .into_iter()
        .filter(|o| o.flags.contains(ObserverFlags::INTERNAL))
        .count();
    assert_eq!(internal, 1);
}

#[test]
fn test_computed_on_nested_record_follows_its_inputs() {
    setup();
    let store = create_store(
        Record::new().with(
            "cart",
            Record::new()
                .with("items", vec![Value::from(2), Value::from(3)])
                .with_computed("total", |cart| {
                    let items = cart.get("items");
                    let total: f64 = items
                        .as_reactive()
                        .map(|items| items.values().into_iter().map(num).sum())
                        .unwrap_or(0.0);
                    Value::from(total)
                }),
        ),
    )
    .unwrap();
    let cart = child(&store, "cart");
    let (_obs, _, seen) = watch({
        let cart = cart.clone();
        move || num(cart.get("total"))
    });

    child(&cart, "items").push(5).unwrap();
    flush();
    child(&cart, "items").set_at(0, 10).unwrap();
    flush();
    assert_eq!(*seen.borrow(), vec![5.0, 10.0, 18.0]);
}

#[test]
fn test_released_observer_never_runs_again() {
    let clock = setup();
    let store = create_store(json!({ "a": 0 })).unwrap();
    let (obs, runs, _) = watch({
        let store = store.clone();
        move || num(store.get("a"))
    });

    store.set("a", 1).unwrap();
    obs.release();
    assert_eq!(flush(), 0);

    obs.run();
    store.set("a", 2).unwrap();
    flush();
    clock.advance(config().release_debounce);
    assert_eq!(run_timers(), 1);
    store.set("a", 3).unwrap();
    flush();
    assert_eq!(runs.get(), 1);
    assert!(obs.is_released());
}

#[test]
fn test_container_replacement_invalidates_subtree_only() {
    setup();
    let store = create_store(json!({
        "user": { "name": "ada", "age": 36 },
        "other": 1
    }))
    .unwrap();
    let (_name, name_runs, names) = watch({
        let store = store.clone();
        move || child(&store, "user").get("name").as_str().map(str::to_owned)
    });
    let (_other, other_runs, _) = watch({
        let store = store.clone();
        move || num(store.get("other"))
    });

    child(&store, "user").set("age", 37).unwrap();
    assert_eq!(flush(), 0);

    store
        .set("user", json!({ "name": "ada", "age": 40 }))
        .unwrap();
    assert_eq!(flush(), 1);
    assert_eq!(name_runs.get(), 2);
    assert_eq!(other_runs.get(), 1);
    assert_eq!(names.borrow().last().cloned().flatten().as_deref(), Some("ada"));
}

#[test]
fn test_wrapping_is_memoized() {
    setup();
    let store = create_store(json!({ "user": { "name": "ada" } })).unwrap();
    let a = child(&store, "user");
    let b = child(&store, "user");
    assert!(a.ptr_eq(&b));
    assert_eq!(a.path(), "user");
    let raw = store.raw();
    assert!(raw.as_reactive().is_none());
    assert!(matches!(
        raw,
        Value::Record(ref r) if matches!(r.get("user"), Some(Value::Record(_)))
    ));
}

#[test]
fn test_detached_reference_resolves_to_live_container() {
    setup();
    let store = create_store(json!({ "user": { "name": "ada" } })).unwrap();
    let user = child(&store, "user");
    let (_obs, runs, names) = watch({
        let user = user.clone();
        move || user.get("name").as_str().map(str::to_owned)
    });

    store.set("user", json!({ "name": "grace" })).unwrap();
    assert!(user.is_detached());
    assert_eq!(user.get("name").as_str(), Some("grace"));
    flush();
    assert_eq!(runs.get(), 2);

    user.set("name", "hopper").unwrap();
    assert_eq!(child(&store, "user").get("name").as_str(), Some("hopper"));
    flush();
    assert_eq!(
        *names.borrow(),
        vec![
            Some("ada".to_string()),
            Some("grace".to_string()),
            Some("hopper".to_string())
        ]
    );
}

#[test]
fn test_deleted_path_reads_undefined() {
    setup();
    let store = create_store(json!({ "user": { "name": "ada" }, "keep": 1 })).unwrap();
    let user = child(&store, "user");
    let (_obs, runs, names) = watch({
        let user = user.clone();
        move || user.get("name").as_str().map(str::to_owned)
    });

    store.delete("user").unwrap();
    assert!(store.get("user").is_undefined());
    assert!(user.get("name").is_undefined());
    assert!(matches!(
        user.set("name", "x"),
        Err(Error::Detached { .. })
    ));
    flush();
    assert_eq!(runs.get(), 2);
    assert_eq!(names.borrow().last().cloned().flatten(), None);
    assert!(store.subscriptions().is_empty());
    assert_eq!(store.keys(), vec!["keep".to_string()]);
}

#[test]
fn test_grandchild_of_replaced_subtree_reads_as_gone() {
    setup();
    let store = create_store(json!({ "user": { "address": { "city": "london" } } })).unwrap();
    let address = child(&child(&store, "user"), "address");
    let (_obs, runs, cities) = watch({
        let address = address.clone();
        move || address.get("city").as_str().map(str::to_owned)
    });

    store
        .set("user", json!({ "address": { "city": "paris" } }))
        .unwrap();
    assert!(!address.is_detached());
    assert!(address.get("city").is_undefined());
    assert!(matches!(
        address.set("city", "rome"),
        Err(Error::Detached { .. })
    ));
    flush();
    assert_eq!(runs.get(), 2);
    assert_eq!(*cities.borrow(), vec![Some("london".to_string()), None]);

    let live = child(&child(&store, "user"), "address");
    assert_eq!(live.get("city").as_str(), Some("paris"));
}

#[test]
fn test_grandchild_of_deleted_parent_reads_undefined() {
    setup();
    let store = create_store(json!({ "user": { "address": { "city": "london" } } })).unwrap();
    let address = child(&child(&store, "user"), "address");

    store.delete("user").unwrap();
    assert!(address.get("city").is_undefined());
    assert!(address.keys().is_empty());
    assert_eq!(address.to_json(), serde_json::Value::Null);
}

#[test]
fn test_sequence_bounds_are_rejected() {
    setup();
    let store = create_store(json!({ "items": [1] })).unwrap();
    let items = child(&store, "items");

    assert!(matches!(
        items.set("18446744073709551615", 1),
        Err(Error::InvalidKey { .. })
    ));
    assert!(matches!(
        items.set_at(1 << 40, 1),
        Err(Error::InvalidKey { .. })
    ));
    assert!(matches!(
        items.set("length", 1e18),
        Err(Error::InvalidKey { .. })
    ));
    assert!(items.get("4294967295").is_undefined());
    assert_eq!(items.len(), 1);
}

#[test]
fn test_runaway_observer_is_cut_off() {
    setup();
    configure(Config::default().max_reruns_per_flush(5));
    let store = create_store(json!({ "n": 0 })).unwrap();
    let _obs = observe({
        let store = store.clone();
        move || {
            let n = num(store.get("n"));
            store.set("n", n + 1.0).unwrap();
        }
    });

    assert_eq!(flush(), 5);
    assert_eq!(num(store.get("n")), 6.0);
    assert_eq!(stats().runaway_skips, 1);

    // A fresh flush starts a fresh count.
    store.set("n", 0).unwrap();
    assert_eq!(flush(), 5);
}

#[test]
fn test_sequence_operations_keep_handles_in_place() {
    setup();
    let store = create_store(json!({ "todos": [{ "t": "a" }, { "t": "b" }, { "t": "c" }] }))
        .unwrap();
    let todos = child(&store, "todos");
    let first = todos.at(0).as_reactive().cloned().unwrap();
    let (_obs, runs, titles) = watch({
        let todos = todos.clone();
        move || {
            todos
                .values()
                .iter()
                .map(|v| {
                    v.as_reactive()
                        .and_then(|r| r.get("t").as_str().map(str::to_owned))
                        .unwrap_or_default()
                })
                .collect::<Vec<_>>()
                .join("")
        }
    });

    todos.swap(0, 2).unwrap();
    flush();
    assert_eq!(first.path(), "todos.2");
    assert!(!first.is_detached());
    assert_eq!(first.get("t").as_str(), Some("a"));

    let removed = todos.remove(1).unwrap();
    let removed = removed.as_reactive().unwrap();
    assert_eq!(removed.path(), "");
    assert_eq!(removed.get("t").as_str(), Some("b"));
    assert_eq!(first.path(), "todos.1");
    flush();

    todos.insert(0, json!({ "t": "z" })).unwrap();
    flush();
    assert_eq!(first.path(), "todos.2");

    let popped = todos.pop().unwrap();
    assert!(popped.as_reactive().unwrap().ptr_eq(&first));
    flush();

    assert_eq!(*titles.borrow(), vec!["abc", "cba", "ca", "zca", "zc"]);
    assert_eq!(runs.get(), 5);
}

#[test]
fn test_sequence_keys_and_holes() {
    setup();
    let items = create_store(json!([1, 2, 3])).unwrap();
    assert!(matches!(
        items.set("name", 1),
        Err(Error::InvalidKey { .. })
    ));
    assert!(items.set("01", 1).is_err());

    items.set_at(5, 6).unwrap();
    assert_eq!(items.len(), 6);
    assert!(items.at(4).is_undefined());

    items.delete("1").unwrap();
    assert!(items.at(1).is_undefined());
    assert_eq!(items.len(), 6);

    items.set("length", 2).unwrap();
    assert_eq!(items.to_json(), json!([1, null]));
}

#[test]
fn test_callables_and_opaque_values_pass_through() {
    setup();
    #[derive(Debug, PartialEq)]
    struct Timestamp(u64);

    let store = create_store(
        Record::new()
            .with("greet", Callable::new(|args| {
                Value::from(format!("hi {}", args.first().and_then(Value::as_str).unwrap_or("")))
            }))
            .with("at", Opaque::new(Timestamp(7))),
    )
    .unwrap();

    let _obs = observe({
        let store = store.clone();
        move || {
            store.get("greet");
            store.get("at")
        }
    });
    assert_eq!(
        store.subscriptions(),
        vec![("at".to_string(), 1)]
    );

    let greet = store.get("greet");
    let out = greet.as_callable().unwrap().call(&[Value::from("ada")]);
    assert_eq!(out.as_str(), Some("hi ada"));
    let at = store.get("at");
    assert_eq!(at.as_opaque().unwrap().downcast_ref::<Timestamp>(), Some(&Timestamp(7)));
}

#[test]
fn test_create_store_rejects_primitives() {
    setup();
    assert_eq!(
        create_store(3).unwrap_err(),
        Error::NotAContainer { found: "number" }
    );
    let store = create_store(json!({ "a": 1 })).unwrap();
    let again = create_store(store.clone()).unwrap();
    assert!(again.ptr_eq(&store));
}
