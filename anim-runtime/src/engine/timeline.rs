//! 时间轴动画引擎
//!
//! 不经过触发器、由宿主按 id 直接驱动的动画：先 `register` 元数据，
//! 再 `create` 出播放器，之后用 [`TimelineCommand`] 控制。

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use tracing::{debug, warn};

use crate::driver::{AnimationDriver, ElementId};
use crate::dsl::{AnimationMetadata, AnimationOptions, Ast, StateValue, build_animation_ast};
use crate::error::{AnimationError, AnimationErrors, EngineError, EngineResult};
use crate::player::{AnimationPlayer, PlayerCallback, PlayerPhase, optimize_group_player};
use crate::scheduler::MicrotaskQueue;
use crate::style::{StyleMap, StyleNormalizer, StyleValue, normalize_keyframes};
use crate::timeline::{TimelineBuildOptions, TimelineInstruction, build_animation_timelines};

use super::event::{AnimationEvent, EventCallback};

/// 播放器控制命令
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TimelineCommand {
    Init,
    Play,
    Pause,
    Restart,
    Finish,
    Reset,
    SetPosition(f64),
    Destroy,
}

#[derive(Default)]
struct TimelineState {
    animations: HashMap<String, Rc<Ast>>,
    players_by_id: HashMap<String, Rc<dyn AnimationPlayer>>,
    players: Vec<Rc<dyn AnimationPlayer>>,
}

pub struct TimelineAnimationEngine {
    driver: Rc<dyn AnimationDriver>,
    normalizer: Rc<dyn StyleNormalizer>,
    microtasks: MicrotaskQueue,
    enter_class_name: String,
    leave_class_name: String,
    state: RefCell<TimelineState>,
    this: Weak<TimelineAnimationEngine>,
}

impl TimelineAnimationEngine {
    pub fn new(
        driver: Rc<dyn AnimationDriver>,
        normalizer: Rc<dyn StyleNormalizer>,
        microtasks: &MicrotaskQueue,
        enter_class_name: &str,
        leave_class_name: &str,
    ) -> Rc<Self> {
        Rc::new_cyclic(|this| Self {
            driver,
            normalizer,
            microtasks: microtasks.clone(),
            enter_class_name: enter_class_name.to_string(),
            leave_class_name: leave_class_name.to_string(),
            state: RefCell::new(TimelineState::default()),
            this: this.clone(),
        })
    }

    /// 校验并登记动画；不支持的样式属性只记录警告
    pub fn register(&self, id: &str, metadata: &AnimationMetadata) -> EngineResult<()> {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        let ast = build_animation_ast(Some(self.driver.as_ref()), metadata, &mut errors, &mut warnings);
        if !errors.is_empty() {
            return Err(EngineError::TimelineRegisterFailed {
                id: id.to_string(),
                errors: errors.into(),
            });
        }
        if !warnings.is_empty() {
            warn!(id, warnings = %AnimationErrors::from(warnings), "时间轴动画构建产生警告");
        }
        self.state.borrow_mut().animations.insert(id.to_string(), Rc::new(ast));
        debug!(id, "注册时间轴动画");
        Ok(())
    }

    /// 以 `element` 为根编译并创建播放器
    pub fn create(
        &self,
        id: &str,
        element: ElementId,
        options: &AnimationOptions,
    ) -> EngineResult<Rc<dyn AnimationPlayer>> {
        let ast = self.state.borrow().animations.get(id).cloned();
        let Some(ast) = ast else {
            return Err(EngineError::MissingTimelinePlayer { id: id.to_string() });
        };

        let mut errors = Vec::new();
        let empty = StyleMap::new();
        let build_options = TimelineBuildOptions {
            enter_class_name: &self.enter_class_name,
            leave_class_name: &self.leave_class_name,
            starting_styles: &empty,
            final_styles: &empty,
            params: options.params.as_ref(),
            delay: options.delay.as_ref(),
        };
        let instructions =
            build_animation_timelines(self.driver.as_ref(), element, &ast, build_options, None, &mut errors);
        if !errors.is_empty() {
            return Err(EngineError::TimelineCreateFailed {
                id: id.to_string(),
                errors: errors.into(),
            });
        }

        // `*` 在创建时一次性计算
        let mut auto_styles: HashMap<ElementId, StyleMap> = HashMap::new();
        for instruction in &instructions {
            let styles = auto_styles.entry(instruction.element).or_default();
            for prop in &instruction.post_style_props {
                let value = self
                    .driver
                    .compute_style(instruction.element, prop, Some(&StyleValue::auto()));
                styles.insert(prop, value);
            }
        }

        let players: Vec<_> = instructions
            .iter()
            .map(|instruction| self.build_player(instruction, auto_styles.get(&instruction.element)))
            .collect();
        let player = optimize_group_player(players, &self.microtasks);

        {
            let mut st = self.state.borrow_mut();
            st.players_by_id.insert(id.to_string(), player.clone());
            st.players.push(player.clone());
        }
        let engine = self.this.clone();
        let owned_id = id.to_string();
        let weak_player = Rc::downgrade(&player);
        player.on_destroy(Rc::new(move || {
            if let Some(engine) = engine.upgrade() {
                engine.forget(&owned_id, &weak_player);
            }
        }));
        Ok(player)
    }

    fn build_player(&self, instruction: &TimelineInstruction, post_styles: Option<&StyleMap>) -> Rc<dyn AnimationPlayer> {
        let mut errors: Vec<AnimationError> = Vec::new();
        let keyframes = normalize_keyframes(
            self.normalizer.as_ref(),
            &instruction.keyframes,
            None,
            post_styles,
            &mut errors,
        );
        if !errors.is_empty() {
            warn!(element = %instruction.element, errors = %AnimationErrors::from(errors), "关键帧归一化产生错误");
        }
        self.driver.animate(
            instruction.element,
            keyframes,
            instruction.duration,
            instruction.delay,
            instruction.easing.as_deref(),
            &[],
        )
    }

    fn player(&self, id: &str) -> EngineResult<Rc<dyn AnimationPlayer>> {
        self.state
            .borrow()
            .players_by_id
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::MissingTimelinePlayer { id: id.to_string() })
    }

    fn forget(&self, id: &str, player: &Weak<dyn AnimationPlayer>) {
        let mut st = self.state.borrow_mut();
        if st
            .players_by_id
            .get(id)
            .is_some_and(|p| std::ptr::addr_eq(Rc::as_ptr(p), player.as_ptr()))
        {
            st.players_by_id.remove(id);
        }
        st.players
            .retain(|p| !std::ptr::addr_eq(Rc::as_ptr(p), player.as_ptr()));
    }

    /// 当前存活的播放器
    pub fn players(&self) -> Vec<Rc<dyn AnimationPlayer>> {
        self.state.borrow().players.clone()
    }

    /// 监听播放器的某个阶段（`start` / `done` / `destroy`）
    pub fn listen(&self, id: &str, element: ElementId, phase: &str, callback: EventCallback) -> EngineResult<()> {
        let player = self.player(id)?;
        let phase: PlayerPhase = phase.parse().map_err(|phase| EngineError::UnsupportedEventPhase {
            name: id.to_string(),
            phase,
        })?;
        let event = AnimationEvent::new(element, "", StateValue::from(""), StateValue::from(""));
        let weak = Rc::downgrade(&player);
        let handler: PlayerCallback = Rc::new(move || {
            let total_time = weak.upgrade().map(|p| p.total_time()).unwrap_or_default();
            callback(event.for_phase(phase, total_time, false));
        });
        match phase {
            PlayerPhase::Start => player.on_start(handler),
            PlayerPhase::Done => player.on_done(handler),
            PlayerPhase::Destroy => player.on_destroy(handler),
        }
        Ok(())
    }

    pub fn command(&self, id: &str, command: TimelineCommand) -> EngineResult<()> {
        let player = self.player(id)?;
        match command {
            TimelineCommand::Init => player.init(),
            TimelineCommand::Play => player.play(),
            TimelineCommand::Pause => player.pause(),
            TimelineCommand::Restart => player.restart(),
            TimelineCommand::Finish => player.finish(),
            TimelineCommand::Reset => player.reset(),
            TimelineCommand::SetPosition(position) => player.set_position(position),
            TimelineCommand::Destroy => return self.destroy(id),
        }
        Ok(())
    }

    /// 销毁播放器；重复销毁返回错误
    pub fn destroy(&self, id: &str) -> EngineResult<()> {
        let player = self.player(id)?;
        player.destroy();
        let mut st = self.state.borrow_mut();
        st.players_by_id.remove(id);
        st.players.retain(|p| !Rc::ptr_eq(p, &player));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::RenderSurface;
    use crate::dsl::{animate, sequence, style, style_auto};
    use crate::style::NoopStyleNormalizer;
    use crate::testing::{AnimationLog, MockAnimationDriver, MockDom};
    use std::cell::Cell;

    fn engine() -> (Rc<MockDom>, AnimationLog, Rc<TimelineAnimationEngine>) {
        let dom = Rc::new(MockDom::new());
        let log = AnimationLog::new();
        let driver = Rc::new(MockAnimationDriver::with_log(dom.clone(), log.clone()));
        let queue = MicrotaskQueue::new();
        let engine = TimelineAnimationEngine::new(driver, Rc::new(NoopStyleNormalizer), &queue, "ng-enter", "ng-leave");
        (dom, log, engine)
    }

    #[test]
    fn test_create_resolves_auto_styles() {
        let (dom, log, engine) = engine();
        let el = dom.create_element("div", dom.body());
        dom.set_style(el, "width", &StyleValue::from("40px"));

        let metadata = sequence(vec![
            style(StyleMap::new().with("width", "0px")).into(),
            animate(500, style_auto()),
        ]);
        engine.register("grow", &metadata).expect("register");
        engine.create("grow", el, &AnimationOptions::default()).expect("create");

        let player = log.last().expect("player");
        assert_eq!(player.duration, 500.0);
        let last = player.keyframes.last().expect("keyframe");
        assert_eq!(last.get("width"), Some(&StyleValue::from("40px")));
    }

    #[test]
    fn test_commands_and_destroy() {
        let (dom, log, engine) = engine();
        let el = dom.create_element("div", dom.body());
        engine
            .register("fade", &animate(300, style(StyleMap::new().with("opacity", "0"))))
            .expect("register");
        engine.create("fade", el, &AnimationOptions::default()).expect("create");

        let started = Rc::new(Cell::new(0));
        let s = started.clone();
        engine
            .listen("fade", el, "start", Rc::new(move |_| s.set(s.get() + 1)))
            .expect("listen");
        assert!(matches!(
            engine.listen("fade", el, "jump", Rc::new(|_| {})),
            Err(EngineError::UnsupportedEventPhase { .. })
        ));

        engine.command("fade", TimelineCommand::Play).expect("play");
        assert_eq!(started.get(), 1);
        assert!(log.last().expect("player").has_started());

        engine.command("fade", TimelineCommand::Destroy).expect("destroy");
        assert!(engine.players().is_empty());
        assert!(matches!(
            engine.command("fade", TimelineCommand::Play),
            Err(EngineError::MissingTimelinePlayer { .. })
        ));
    }

    #[test]
    fn test_unregistered_animation() {
        let (dom, _, engine) = engine();
        let el = dom.create_element("div", dom.body());
        assert!(matches!(
            engine.create("ghost", el, &AnimationOptions::default()),
            Err(EngineError::MissingTimelinePlayer { .. })
        ));
    }
}
