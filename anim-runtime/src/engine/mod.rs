//! # Engine 模块
//!
//! 宿主集成层调用的唯一入口。
//!
//! ```text
//! 宿主 ── begin() / process() / on_insert() / on_remove() / end() ──▶ AnimationEngine
//!                                                                       │
//!                               ┌───────────────────────────────────────┤
//!                               ▼                                       ▼
//!                   TransitionAnimationEngine              TimelineAnimationEngine
//!                   （触发器 / 进出场 / flush）            （按 id 直接驱动的动画）
//! ```
//!
//! 监听回调经由 [`ListenerScheduler`] 批量派发：同一个渲染周期内产生的事件
//! 会合并到下一个微任务中执行。

mod callbacks;
mod event;
mod rendering_done;
mod timeline;
mod transition;
mod transition_player;

pub use callbacks::ListenerScheduler;
pub use event::{AnimationEvent, EventCallback};
pub use rendering_done::RenderingDone;
pub use timeline::{TimelineAnimationEngine, TimelineCommand};
pub use transition::{RemovalHandler, TransitionAnimationEngine, Unlisten};
pub use transition_player::TransitionAnimationPlayer;

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::driver::{AnimationDriver, ElementId};
use crate::dsl::{AnimationMetadata, AnimationOptions, StateValue, TriggerMetadata, TriggerValue, build_trigger_ast};
use crate::error::{AnimationErrors, EngineError, EngineResult};
use crate::player::AnimationPlayer;
use crate::scheduler::MicrotaskQueue;
use crate::style::StyleNormalizer;
use crate::trigger::{AnimationTrigger, build_trigger};

/// 禁用动画的伪属性
pub const DISABLE_ANIMATIONS_PROPERTY: &str = ".disabled";

/// 动画引擎
pub struct AnimationEngine {
    driver: Rc<dyn AnimationDriver>,
    normalizer: Rc<dyn StyleNormalizer>,
    config: EngineConfig,
    transitions: Rc<TransitionAnimationEngine>,
    timelines: Rc<TimelineAnimationEngine>,
    scheduler: Rc<ListenerScheduler>,
    /// 同一组件的同名触发器只编译一次
    trigger_cache: RefCell<HashMap<(String, String), Rc<AnimationTrigger>>>,
}

impl AnimationEngine {
    pub fn new(
        driver: Rc<dyn AnimationDriver>,
        normalizer: Rc<dyn StyleNormalizer>,
        microtasks: &MicrotaskQueue,
        config: EngineConfig,
    ) -> Self {
        let config = match config.validate() {
            Ok(()) => config,
            Err(e) => {
                warn!(error = %e, "引擎配置无效，使用默认配置");
                EngineConfig::default()
            }
        };

        let transitions =
            TransitionAnimationEngine::new(driver.clone(), normalizer.clone(), microtasks, config.clone());
        let timelines = TimelineAnimationEngine::new(
            driver.clone(),
            normalizer.clone(),
            microtasks,
            &config.enter_class_name,
            &config.leave_class_name,
        );
        Self {
            driver,
            normalizer,
            config,
            transitions,
            timelines,
            scheduler: Rc::new(ListenerScheduler::new(microtasks)),
            trigger_cache: RefCell::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn transitions(&self) -> &Rc<TransitionAnimationEngine> {
        &self.transitions
    }

    pub fn timelines(&self) -> &Rc<TimelineAnimationEngine> {
        &self.timelines
    }

    /// 编译（或取缓存）触发器并注册到命名空间
    pub fn register_trigger(
        &self,
        component_id: &str,
        namespace_id: &str,
        host: ElementId,
        name: &str,
        metadata: &TriggerMetadata,
    ) -> EngineResult<()> {
        let key = (component_id.to_string(), name.to_string());
        let cached = self.trigger_cache.borrow().get(&key).cloned();
        let trigger = match cached {
            Some(trigger) => trigger,
            None => {
                let mut errors = Vec::new();
                let mut warnings = Vec::new();
                let driver = self.config.validate_styles.then_some(self.driver.as_ref());
                let ast = build_trigger_ast(driver, metadata, &mut errors, &mut warnings);
                if !errors.is_empty() {
                    return Err(EngineError::TriggerBuildFailed {
                        name: name.to_string(),
                        errors: errors.into(),
                    });
                }
                if !warnings.is_empty() {
                    warn!(trigger = name, warnings = %AnimationErrors::from(warnings), "触发器构建产生警告");
                }
                let trigger = Rc::new(build_trigger(name, ast, self.normalizer.clone()));
                self.trigger_cache.borrow_mut().insert(key, trigger.clone());
                debug!(component = component_id, trigger = name, "编译触发器");
                trigger
            }
        };
        self.transitions.register(namespace_id, host);
        self.transitions.register_trigger(namespace_id, name, trigger)
    }

    pub fn register(&self, namespace_id: &str, host: ElementId) {
        self.transitions.register(namespace_id, host);
    }

    pub fn destroy(&self, namespace_id: &str) {
        self.transitions.destroy(namespace_id);
    }

    pub fn on_insert(&self, namespace_id: Option<&str>, element: ElementId, insert_before: bool) {
        self.transitions.insert_node(namespace_id, element, insert_before);
    }

    pub fn on_remove(&self, namespace_id: Option<&str>, element: ElementId) {
        self.transitions.remove_node(namespace_id, element);
    }

    pub fn disable_animations(&self, element: ElementId, disabled: bool) {
        self.transitions.mark_element_as_disabled(element, disabled);
    }

    /// 写入触发器属性
    ///
    /// [`DISABLE_ANIMATIONS_PROPERTY`] 按真值开关元素及其后代的动画。
    pub fn process(
        &self,
        namespace_id: &str,
        element: ElementId,
        property: &str,
        value: impl Into<TriggerValue>,
    ) -> EngineResult<bool> {
        let value = value.into();
        if property == DISABLE_ANIMATIONS_PROPERTY {
            self.disable_animations(element, is_truthy(&value.value));
            return Ok(true);
        }
        self.transitions.trigger(namespace_id, element, property, value)
    }

    /// 监听触发器的 `start` / `done`，回调按渲染周期批量派发
    pub fn listen(
        &self,
        namespace_id: &str,
        element: ElementId,
        trigger_name: &str,
        phase: Option<&str>,
        callback: EventCallback,
    ) -> EngineResult<Unlisten> {
        let scheduler = self.scheduler.clone();
        let batched: EventCallback = Rc::new(move |event| scheduler.schedule(callback.clone(), event));
        self.transitions
            .listen(namespace_id, element, trigger_name, phase, batched)
    }

    pub fn register_timeline(&self, id: &str, metadata: &AnimationMetadata) -> EngineResult<()> {
        self.timelines.register(id, metadata)
    }

    pub fn create_timeline(
        &self,
        id: &str,
        element: ElementId,
        options: &AnimationOptions,
    ) -> EngineResult<Rc<dyn AnimationPlayer>> {
        self.timelines.create(id, element, options)
    }

    pub fn timeline_command(&self, id: &str, command: TimelineCommand) -> EngineResult<()> {
        self.timelines.command(id, command)
    }

    pub fn listen_timeline(&self, id: &str, element: ElementId, phase: &str, callback: EventCallback) -> EngineResult<()> {
        self.timelines.listen(id, element, phase, callback)
    }

    /// 开始一个渲染周期（可嵌套）
    pub fn begin(&self) {
        self.scheduler.begin();
    }

    /// 结束渲染周期；最外层结束时 flush
    pub fn end(&self) -> EngineResult<()> {
        match self.scheduler.end() {
            Some(microtask_id) => self.flush(microtask_id),
            None => Ok(()),
        }
    }

    pub fn flush(&self, microtask_id: i64) -> EngineResult<()> {
        self.transitions.flush(microtask_id)
    }

    /// 过渡与时间轴的全部活动播放器
    pub fn players(&self) -> Vec<Rc<dyn AnimationPlayer>> {
        self.transitions
            .players()
            .into_iter()
            .map(|p| p as Rc<dyn AnimationPlayer>)
            .chain(self.timelines.players())
            .collect()
    }

    pub fn when_rendering_done(&self) -> RenderingDone {
        self.transitions.when_rendering_done()
    }

    pub fn after_flush_animations_done(&self, f: impl FnOnce() + 'static) {
        self.transitions.after_flush_animations_done(f);
    }

    pub fn set_removal_handler(&self, handler: RemovalHandler) {
        self.transitions.set_removal_handler(handler);
    }
}

/// 绑定值的真值：空串、`0`、`false` 为假
fn is_truthy(value: &StateValue) -> bool {
    match value {
        StateValue::Bool(b) => *b,
        StateValue::Text(s) => !(s.is_empty() || s == "0" || s == "false"),
    }
}
