use web_time::Instant;

use vigil_core::{ObserverFlags, ObserverId, ObserverInfo, Reactive, Stats};

/// One-line scheduler overlay, refreshed once per event-loop tick.
pub struct Hud {
    pub enabled: bool,
    tick_count: u64,
    last_tick: Option<Instant>,
    tps_smooth: f32,
}

impl Default for Hud {
    fn default() -> Self {
        Self::new()
    }
}

impl Hud {
    pub fn new() -> Self {
        Self {
            enabled: false,
            tick_count: 0,
            last_tick: None,
            tps_smooth: 0.0,
        }
    }
    pub fn toggle(&mut self) {
        self.enabled = !self.enabled;
    }

    pub fn overlay(&mut self, metrics: &Metrics) -> String {
        self.tick_count += 1;
        // ticks per second
        let now = Instant::now();
        if let Some(prev) = self.last_tick.replace(now) {
            let dt = (now - prev).as_secs_f32();
            if dt > 0.0 {
                let tps = 1.0 / dt;
                // simple EMA
                let a = 0.2;
                self.tps_smooth = if self.tps_smooth == 0.0 {
                    tps
                } else {
                    (1.0 - a) * self.tps_smooth + a * tps
                };
            }
        }
        let lines = [
            format!("tick: {}", self.tick_count),
            format!("tps: {:.1}", self.tps_smooth),
            metrics.summary(),
        ];
        lines.join("  |  ")
    }
}

/// Scheduler counters plus a breakdown of the live observers.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Metrics {
    pub flushes: u64,
    pub observer_runs: u64,
    pub removals: u64,
    pub runaway_skips: u64,
    pub live_observers: usize,
    pub computed: usize,
    pub released: usize,
    pub pending: usize,
}

impl Metrics {
    pub fn capture() -> Self {
        Self::from_parts(vigil_core::stats(), &vigil_core::observers())
    }

    fn from_parts(stats: Stats, observers: &[ObserverInfo]) -> Self {
        let count = |flag: ObserverFlags| observers.iter().filter(|o| o.flags.contains(flag)).count();
        Self {
            flushes: stats.flushes,
            observer_runs: stats.observer_runs,
            removals: stats.removals,
            runaway_skips: stats.runaway_skips,
            live_observers: stats.live_observers,
            computed: count(ObserverFlags::INTERNAL),
            released: count(ObserverFlags::UNWATCHED),
            pending: stats.pending,
        }
    }

    pub fn summary(&self) -> String {
        format!(
            "observers: {} live ({} computed, {} released), {} pending",
            self.live_observers, self.computed, self.released, self.pending
        )
    }

    pub fn counters(&self) -> String {
        format!(
            "flushes: {}  |  runs: {}  |  removals: {}  |  runaway skips: {}",
            self.flushes, self.observer_runs, self.removals, self.runaway_skips
        )
    }
}

/// Subscribed paths of one watched store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoreSnapshot {
    pub name: String,
    pub subscriptions: Vec<(String, usize)>,
}

/// Point-in-time view of the observer graph.
#[derive(Clone, Debug, Default)]
pub struct GraphSnapshot {
    pub observers: Vec<ObserverInfo>,
    pub stores: Vec<StoreSnapshot>,
    pub metrics: Metrics,
}

impl GraphSnapshot {
    pub fn observer(&self, id: ObserverId) -> Option<&ObserverInfo> {
        self.observers.iter().find(|o| o.id == id)
    }

    /// Observers without a parent, in registry order.
    pub fn roots(&self) -> impl Iterator<Item = &ObserverInfo> {
        self.observers.iter().filter(|o| o.parent.is_none())
    }

    pub fn children_of(&self, id: ObserverId) -> impl Iterator<Item = &ObserverInfo> {
        self.observers.iter().filter(move |o| o.parent == Some(id))
    }

    /// Multi-line, deterministic rendering: stores with their subscribed
    /// paths, then the observer tree.
    pub fn report(&self) -> String {
        let mut out = Vec::new();
        for store in &self.stores {
            out.push(format!("store `{}`", store.name));
            if store.subscriptions.is_empty() {
                out.push("  (no subscriptions)".to_string());
            }
            for (path, n) in &store.subscriptions {
                out.push(format!("  {path} ({n})"));
            }
        }
        out.push(self.metrics.summary());
        for root in self.roots() {
            self.push_tree(root, 1, &mut out);
        }
        out.push(self.metrics.counters());
        out.join("\n")
    }

    fn push_tree(&self, info: &ObserverInfo, depth: usize, out: &mut Vec<String>) {
        let mut line = format!(
            "{}{} runs={} deps={}",
            "  ".repeat(depth),
            short_label(&info.label),
            info.runs,
            info.dependencies
        );
        for (flag, tag) in [
            (ObserverFlags::INTERNAL, "internal"),
            (ObserverFlags::UNWATCHED, "released"),
            (ObserverFlags::RUNNING, "running"),
        ] {
            if info.flags.contains(flag) {
                line.push_str(&format!(" [{tag}]"));
            }
        }
        out.push(line);
        for child in self.children_of(info.id) {
            self.push_tree(child, depth + 1, out);
        }
    }
}

/// Trim a callback type name to its innermost named item:
/// `app::view::render::{{closure}}` becomes `render::{{closure}}`.
pub fn short_label(label: &str) -> String {
    let mut segments: Vec<&str> = label.split("::").collect();
    let mut closures = 0;
    while segments.last().is_some_and(|s| *s == "{{closure}}") {
        segments.pop();
        closures += 1;
    }
    let name = segments.last().copied().unwrap_or(label);
    let mut out = name.to_string();
    for _ in 0..closures {
        out.push_str("::{{closure}}");
    }
    out
}

pub struct Inspector {
    pub hud: Hud,
    stores: Vec<(String, Reactive)>,
}

impl Default for Inspector {
    fn default() -> Self {
        Self::new()
    }
}

impl Inspector {
    pub fn new() -> Self {
        Self {
            hud: Hud::new(),
            stores: Vec::new(),
        }
    }

    /// Include `store`'s subscriptions in snapshots under `name`.
    pub fn watch_store(&mut self, name: impl Into<String>, store: &Reactive) {
        let name = name.into();
        self.stores.retain(|(n, _)| *n != name);
        self.stores.push((name, store.clone()));
    }

    pub fn unwatch_store(&mut self, name: &str) {
        self.stores.retain(|(n, _)| n != name);
    }

    pub fn snapshot(&self) -> GraphSnapshot {
        let observers = vigil_core::observers();
        let metrics = Metrics::from_parts(vigil_core::stats(), &observers);
        GraphSnapshot {
            stores: self
                .stores
                .iter()
                .map(|(name, store)| StoreSnapshot {
                    name: name.clone(),
                    subscriptions: store.subscriptions(),
                })
                .collect(),
            observers,
            metrics,
        }
    }

    pub fn report(&self) -> String {
        self.snapshot().report()
    }

    pub fn log_report(&self) {
        for line in self.report().lines() {
            log::info!("{line}");
        }
    }

    /// HUD line for this tick, if the HUD is enabled.
    pub fn frame(&mut self) -> Option<String> {
        if !self.hud.enabled {
            return None;
        }
        let metrics = Metrics::capture();
        Some(self.hud.overlay(&metrics))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use vigil_core::*;

    fn setup() -> ManualClock {
        let _ = env_logger::builder().is_test(true).try_init();
        reset();
        let clock = ManualClock::new();
        set_clock(clock.clone());
        clock
    }

    #[test]
    fn test_short_label() {
        assert_eq!(short_label("app::view::render::{{closure}}"), "render::{{closure}}");
        assert_eq!(short_label("computed `full`"), "computed `full`");
        assert_eq!(short_label("a::b::{{closure}}::{{closure}}"), "b::{{closure}}::{{closure}}");
    }

    #[test]
    fn test_report_lists_stores_and_observers() {
        setup();
        let person = create_store(
            Record::new()
                .with("first", "Ada")
                .with("last", "Lovelace")
                .with_computed("full", |p| {
                    let first = p.get("first");
                    let last = p.get("last");
                    Value::from(format!(
                        "{} {}",
                        first.as_str().unwrap_or(""),
                        last.as_str().unwrap_or("")
                    ))
                }),
        )
        .unwrap();
        let _obs = observe({
            let person = person.clone();
            move || person.get("full")
        });

        let mut inspector = Inspector::new();
        inspector.watch_store("person", &person);
        insta::assert_snapshot!(inspector.report(), @r###"
        store `person`
          #full (1)
          first (1)
          last (1)
        observers: 2 live (1 computed, 0 released), 0 pending
          test_report_lists_stores_and_observers::{{closure}} runs=1 deps=1
          computed `full` runs=1 deps=2 [internal]
        flushes: 0  |  runs: 2  |  removals: 0  |  runaway skips: 0
        "###);
    }

    #[test]
    fn test_report_nests_children_and_marks_released() {
        let clock = setup();
        let store = create_store(json!({ "items": [{ "title": "a" }] })).unwrap();
        let list = observe({
            let store = store.clone();
            move || {
                let items = store.get("items");
                let items = items.as_reactive().cloned();
                for item in items.map(|i| i.values()).unwrap_or_default() {
                    observe(move || item.as_reactive().map(|r| r.get("title")));
                }
            }
        });

        let mut inspector = Inspector::new();
        inspector.watch_store("todo", &store);
        let snap = inspector.snapshot();
        assert_eq!(snap.roots().count(), 1);
        assert_eq!(snap.children_of(list.id()).count(), 1);
        assert_eq!(
            snap.stores[0].subscriptions,
            vec![
                ("items".to_string(), 1),
                ("items.0".to_string(), 1),
                ("items.0.title".to_string(), 1),
                ("items.length".to_string(), 1),
            ]
        );

        list.release();
        let report = inspector.report();
        assert!(report.contains("observers: 2 live (0 computed, 2 released), 0 pending"));
        assert!(report.contains("    test_report_nests_children_and_marks_released::{{closure}}::{{closure}} runs=1 deps=1 [released]"));

        clock.advance(config().release_debounce);
        run_timers();
        let snap = inspector.snapshot();
        assert!(snap.observers.is_empty());
        assert_eq!(snap.metrics.removals, 2);
        assert!(snap.stores[0].subscriptions.is_empty());
    }

    #[test]
    fn test_hud_only_renders_when_enabled() {
        setup();
        let mut inspector = Inspector::new();
        assert_eq!(inspector.frame(), None);
        inspector.hud.toggle();
        let line = inspector.frame().unwrap();
        assert!(line.starts_with("tick: 1  |  tps: "));
        assert!(line.ends_with("observers: 0 live (0 computed, 0 released), 0 pending"));
        let line = inspector.frame().unwrap();
        assert!(line.starts_with("tick: 2"));
    }

    #[test]
    fn test_metrics_capture_counts_flushes() {
        setup();
        let store = create_store(json!({ "n": 0 })).unwrap();
        let _obs = observe({
            let store = store.clone();
            move || store.get("n")
        });
        store.set("n", 1).unwrap();
        assert_eq!(Metrics::capture().pending, 1);
        flush();
        let m = Metrics::capture();
        assert_eq!(m.flushes, 1);
        assert_eq!(m.observer_runs, 2);
        assert_eq!(m.pending, 0);
        assert_eq!(m.live_observers, 1);
    }
}
