//! 通过 AnimationEngine 驱动的完整渲染周期

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use anim_runtime::dsl::{
    AnimationOptions, TriggerMetadata, animate, query, style, transition, trigger,
};
use anim_runtime::engine::DISABLE_ANIMATIONS_PROPERTY;
use anim_runtime::style::NoopStyleNormalizer;
use anim_runtime::testing::{AnimationLog, MockAnimationDriver, MockDom};
use anim_runtime::{
    AnimationEngine, AnimationEvent, AnimationPlayer, ElementId, EngineConfig, EngineError, EventCallback,
    MicrotaskQueue, RenderSurface, StateValue, StyleMap, StyleValue, TimelineCommand, TriggerValue,
};

struct Harness {
    dom: Rc<MockDom>,
    log: AnimationLog,
    queue: MicrotaskQueue,
    engine: AnimationEngine,
    host: ElementId,
}

impl Harness {
    fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    fn with_config(config: EngineConfig) -> Self {
        let dom = Rc::new(MockDom::new());
        let log = AnimationLog::new();
        let driver = Rc::new(MockAnimationDriver::with_log(dom.clone(), log.clone()));
        let queue = MicrotaskQueue::new();
        let engine = AnimationEngine::new(driver, Rc::new(NoopStyleNormalizer), &queue, config);
        let host = dom.create_element("div", dom.body());
        Self {
            dom,
            log,
            queue,
            engine,
            host,
        }
    }

    fn load(&self, file: &str) {
        let metadata: TriggerMetadata = serde_json::from_str(file).expect("trigger json");
        self.engine
            .register_trigger("cmp", "ns", self.host, &metadata.name, &metadata)
            .expect("register trigger");
    }

    /// 一个完整的 begin/end 周期
    fn cycle(&self, f: impl FnOnce(&AnimationEngine)) -> Result<(), EngineError> {
        self.engine.begin();
        f(&self.engine);
        self.engine.end()
    }
}

fn fade() -> &'static str {
    include_str!("../../triggers/fade.json")
}

fn recorder() -> (Rc<RefCell<Vec<AnimationEvent>>>, EventCallback) {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let s = seen.clone();
    (seen, Rc::new(move |e: AnimationEvent| s.borrow_mut().push(e)))
}

fn phases(events: &[AnimationEvent]) -> Vec<String> {
    events.iter().map(|e| e.phase_name.clone()).collect()
}

#[test]
fn test_enter_then_leave_with_deferred_removal() {
    let h = Harness::new();
    h.load(fade());
    let el = h.dom.create_element("div", h.host);

    h.cycle(|engine| {
        engine.on_insert(Some("ns"), el, true);
        engine.process("ns", el, "fade", "visible").expect("process");
    })
    .expect("enter flush");

    let enter = h.log.last().expect("enter player");
    assert_eq!(enter.duration, 300.0);
    assert_eq!(enter.easing.as_deref(), Some("ease-out"));
    assert!(enter.has_started());
    enter.finish();
    h.queue.run_until_idle();
    assert!(h.engine.players().is_empty());

    let removed = Rc::new(RefCell::new(Vec::new()));
    let (r, dom) = (removed.clone(), h.dom.clone());
    h.engine.set_removal_handler(Rc::new(move |el| {
        r.borrow_mut().push(el);
        dom.detach(el);
    }));

    h.cycle(|engine| engine.on_remove(Some("ns"), el)).expect("leave flush");
    assert!(removed.borrow().is_empty());
    assert!(h.dom.is_connected(el));

    let leave = h.log.last().expect("leave player");
    assert_eq!(leave.duration, 200.0);
    assert_eq!(leave.easing.as_deref(), Some("ease-in"));

    leave.finish();
    assert_eq!(*removed.borrow(), vec![el]);
    assert!(!h.dom.is_connected(el));
}

#[test]
fn test_listener_events_follow_render_cycles() {
    let h = Harness::new();
    h.load(fade());
    let el = h.dom.create_element("div", h.host);
    let (seen, callback) = recorder();
    let _start = h
        .engine
        .listen("ns", el, "fade", Some("start"), callback.clone())
        .expect("listen start");
    let _done = h
        .engine
        .listen("ns", el, "fade", Some("done"), callback)
        .expect("listen done");

    h.cycle(|engine| {
        engine.process("ns", el, "fade", "visible").expect("process");
    })
    .expect("flush");

    // 本周期的事件在下一个微任务中派发
    assert!(seen.borrow().is_empty());
    h.queue.run_until_idle();
    assert_eq!(phases(&seen.borrow()), ["start"]);

    // 周期已结束，之后的事件立即派发
    h.log.last().expect("player").finish();
    let seen = seen.borrow();
    assert_eq!(phases(&seen), ["start", "done"]);
    assert!(seen[1].from_state.is_void());
    assert_eq!(seen[1].to_state, StateValue::from("visible"));
    assert_eq!(seen[1].total_time, 300.0);
    assert!(!seen[1].disabled);
}

#[test]
fn test_unlisten_stops_events() {
    let h = Harness::new();
    h.load(fade());
    let el = h.dom.create_element("div", h.host);
    let (seen, callback) = recorder();
    let unlisten = h
        .engine
        .listen("ns", el, "fade", Some("start"), callback)
        .expect("listen");
    unlisten();

    h.cycle(|engine| {
        engine.process("ns", el, "fade", "visible").expect("process");
    })
    .expect("flush");
    h.queue.run_until_idle();
    assert!(seen.borrow().is_empty());
}

#[test]
fn test_disabled_subtree_skips_animation_but_reports_events() {
    let h = Harness::new();
    h.load(fade());
    let el = h.dom.create_element("div", h.host);
    let (seen, callback) = recorder();
    let _done = h
        .engine
        .listen("ns", el, "fade", Some("done"), callback)
        .expect("listen");

    h.cycle(|engine| {
        engine
            .process("ns", h.host, DISABLE_ANIMATIONS_PROPERTY, true)
            .expect("disable");
        engine.process("ns", el, "fade", "visible").expect("process");
    })
    .expect("flush");
    h.queue.run_until_idle();

    assert!(h.log.is_empty());
    assert_eq!(h.dom.get_style(el, "opacity"), Some(StyleValue::from("1")));
    let seen = seen.borrow();
    assert!(seen.iter().any(|e| e.phase_name == "done" && e.disabled));
}

#[test]
fn test_param_change_without_value_change_restyles() {
    let h = Harness::new();
    let triggers: Vec<TriggerMetadata> =
        serde_json::from_str(include_str!("../../triggers/open-close.json")).expect("open-close.json");
    h.engine
        .register_trigger("cmp", "ns", h.host, "openClose", &triggers[0])
        .expect("register");
    let el = h.dom.create_element("div", h.host);

    h.cycle(|engine| {
        engine.process("ns", el, "openClose", "open").expect("process");
    })
    .expect("flush");
    assert!(h.log.is_empty());
    assert_eq!(h.dom.get_style(el, "height"), Some(StyleValue::from("200px")));

    let params = BTreeMap::from([("openHeight".to_string(), StyleValue::from(320))]);
    h.cycle(|engine| {
        engine
            .process("ns", el, "openClose", TriggerValue::with_params("open", params))
            .expect("process");
    })
    .expect("flush");
    assert!(h.log.is_empty());
    assert_eq!(h.dom.get_style(el, "height"), Some(StyleValue::from("320px")));
}

#[test]
fn test_failed_flush_leaves_engine_usable() {
    let h = Harness::new();
    let broken = trigger(
        "broken",
        vec![transition(
            "* => on",
            query(".missing", animate(100, style(StyleMap::new().with("opacity", "0")))),
        )],
    );
    h.engine
        .register_trigger("cmp", "ns", h.host, "broken", &broken)
        .expect("register");
    h.load(fade());
    let el = h.dom.create_element("div", h.host);

    let err = h
        .cycle(|engine| {
            engine.process("ns", el, "broken", "on").expect("process");
        })
        .expect_err("query should fail");
    assert!(matches!(err, EngineError::TransitionsFailed(_)));
    assert!(h.engine.when_rendering_done().is_done());

    h.cycle(|engine| {
        engine.process("ns", el, "fade", "visible").expect("process");
    })
    .expect("flush");
    assert_eq!(h.log.len(), 1);
}

#[test]
fn test_noop_config_uses_zero_time_players() {
    let h = Harness::with_config(EngineConfig {
        noop: true,
        ..EngineConfig::default()
    });
    h.load(fade());
    let el = h.dom.create_element("div", h.host);

    h.cycle(|engine| {
        engine.process("ns", el, "fade", "visible").expect("process");
    })
    .expect("flush");
    assert!(h.log.is_empty());
    let rendering = h.engine.when_rendering_done();

    h.queue.run_until_idle();
    assert!(rendering.is_done());
    assert_eq!(h.dom.get_style(el, "opacity"), Some(StyleValue::from("1")));
}

#[test]
fn test_unknown_trigger_is_an_error() {
    let h = Harness::new();
    h.load(fade());
    let el = h.dom.create_element("div", h.host);
    h.engine.begin();
    assert!(matches!(
        h.engine.process("ns", el, "slide", "in"),
        Err(EngineError::MissingTrigger { .. })
    ));
    h.engine.end().expect("flush");
}

#[test]
fn test_timeline_players_are_driven_by_commands() {
    let h = Harness::new();
    let el = h.dom.create_element("div", h.host);
    h.engine
        .register_timeline("pulse", &animate("400ms 100ms", style(StyleMap::new().with("opacity", "0.5"))))
        .expect("register");
    let player = h
        .engine
        .create_timeline("pulse", el, &AnimationOptions::default())
        .expect("create");
    assert_eq!(player.total_time(), 500.0);
    assert_eq!(h.engine.players().len(), 1);

    let (seen, callback) = recorder();
    h.engine
        .listen_timeline("pulse", el, "done", callback)
        .expect("listen");
    h.engine.timeline_command("pulse", TimelineCommand::Play).expect("play");
    h.engine.timeline_command("pulse", TimelineCommand::Finish).expect("finish");
    assert_eq!(phases(&seen.borrow()), ["done"]);

    h.engine.timeline_command("pulse", TimelineCommand::Destroy).expect("destroy");
    assert!(h.engine.players().is_empty());
}
