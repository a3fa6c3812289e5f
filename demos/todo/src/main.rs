use std::cell::{Cell, RefCell};
use std::rc::Rc;

use anyhow::{Context, Result};
use vigil_core::*;
use vigil_devtools::Inspector;

type Step = Box<dyn Fn() -> Result<()>>;

fn step(f: impl Fn() -> Result<()> + 'static) -> Step {
    Box::new(f)
}

struct Row {
    key: String,
    scope: Scope,
}

fn todo(id: u32, title: &str) -> Value {
    Record::new()
        .with("id", id)
        .with("title", title)
        .with("done", false)
        .into()
}

fn key_of(item: &Value) -> String {
    item.as_reactive()
        .map(|r| r.get("id"))
        .and_then(|id| id.as_f64())
        .map(|id| id.to_string())
        .unwrap_or_default()
}

fn mount_row(todos: &Reactive, index: usize, key: &str) -> Row {
    let scope = Scope::new();
    let item = todos.at(index);
    scope.run(|| {
        observe(move || {
            let Some(item) = item.as_reactive() else {
                return;
            };
            let mark = if item.get("done").truthy() { "x" } else { " " };
            println!("  [{mark}] {}", item.get("title").as_str().unwrap_or(""));
        });
    });
    log::debug!("mounted row {key}");
    Row {
        key: key.to_string(),
        scope,
    }
}

/// Bring the mounted rows in line with `keys`, reusing rows by key.
fn sync_rows(rows: &RefCell<Vec<Row>>, keys: &[String], todos: &Reactive) {
    let old_keys: Vec<String> = rows.borrow().iter().map(|r| r.key.clone()).collect();
    let patch = reconcile(&old_keys, keys);
    if patch.is_noop() {
        return;
    }

    let mut old: Vec<Option<Row>> = rows.take().into_iter().map(Some).collect();
    for &i in &patch.removed {
        if let Some(row) = old[i].take() {
            println!("- row {}", row.key);
            row.scope.dispose();
        }
    }
    for m in &patch.moved {
        println!("~ row {} moved {} -> {}", keys[m.to], m.from, m.to);
    }

    let next: Vec<Row> = patch
        .sources
        .iter()
        .enumerate()
        .map(|(j, src)| match src.and_then(|i| old[i].take()) {
            Some(row) => row,
            None => {
                println!("+ row {}", keys[j]);
                mount_row(todos, j, &keys[j])
            }
        })
        .collect();
    *rows.borrow_mut() = next;
}

fn main() -> Result<()> {
    env_logger::init();

    let wake = Rc::new(Cell::new(false));
    set_microtask_hook({
        let wake = wake.clone();
        move || wake.set(true)
    });

    let app = create_store(
        Record::new()
            .with(
                "todos",
                vec![
                    todo(1, "write docs"),
                    todo(2, "review patch"),
                    todo(3, "cut release"),
                ],
            )
            .with_computed("remaining", |app| {
                let todos = app.get("todos");
                let open = todos
                    .as_reactive()
                    .map(|t| {
                        t.values()
                            .iter()
                            .filter(|item| {
                                item.as_reactive()
                                    .is_some_and(|r| !r.get("done").truthy())
                            })
                            .count()
                    })
                    .unwrap_or(0);
                Value::from(open)
            }),
    )?;
    let todos = app
        .get("todos")
        .as_reactive()
        .cloned()
        .context("`todos` should be a sequence")?;

    let mut inspector = Inspector::new();
    inspector.watch_store("app", &app);
    inspector.hud.toggle();

    let _header = observe({
        let app = app.clone();
        move || {
            let left = app.get("remaining").as_f64().unwrap_or(0.0);
            println!("== {left} item(s) left ==");
        }
    });

    let rows: Rc<RefCell<Vec<Row>>> = Rc::new(RefCell::new(Vec::new()));
    let list = observe({
        let todos = todos.clone();
        let rows = rows.clone();
        move || {
            let keys: Vec<String> = todos.values().iter().map(key_of).collect();
            untracked(|| sync_rows(&rows, &keys, &todos));
        }
    });

    let first = todos.at(0).as_reactive().cloned().context("first todo")?;
    let steps: Vec<(&str, Step)> = vec![
        ("complete the first todo", {
            let first = first.clone();
            step(move || Ok(first.set("done", true)?))
        }),
        ("add a todo", {
            let todos = todos.clone();
            step(move || Ok(todos.push(todo(4, "write changelog"))?))
        }),
        ("swap first and last", {
            let todos = todos.clone();
            step(move || Ok(todos.swap(0, 3)?))
        }),
        ("rename through a held handle", {
            let first = first.clone();
            step(move || Ok(first.set("title", "write better docs")?))
        }),
        ("drop the second todo", {
            let todos = todos.clone();
            step(move || {
                todos.remove(1)?;
                Ok(())
            })
        }),
    ];

    for (name, run) in &steps {
        println!("\n> {name}");
        run()?;
        if wake.replace(false) {
            let ran = tick();
            log::debug!("flush ran {ran} observer(s)");
        }
        if let Some(hud) = inspector.frame() {
            log::info!("{hud}");
        }
    }

    list.release();
    for row in rows.take() {
        row.scope.dispose();
    }
    std::thread::sleep(config().release_debounce);
    let removed = run_timers();
    log::info!("released {removed} observer(s)");

    inspector.log_report();
    println!("\n{}", inspector.report());
    Ok(())
}
