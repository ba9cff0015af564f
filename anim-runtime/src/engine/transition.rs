//! 过渡动画引擎
//!
//! 负责触发器值变化、元素插入/移除到真实播放器的全过程：
//!
//! ```text
//! trigger() ──▶ 命名空间队列 ──flush()──▶ 编译时间轴 ──▶ 计算 ! / * 样式
//!                                              │
//!                                              ▼
//!                              driver.animate() ──▶ 绑定到过渡代理播放器
//! ```
//!
//! 所有状态集中在一个 `RefCell` 中。播放器回调可能重新进入引擎，
//! 因此调用任何播放器方法之前都要先释放借用。

use std::cell::RefCell;
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::rc::{Rc, Weak};

use tracing::{debug, trace, warn};

use crate::config::EngineConfig;
use crate::driver::{
    AnimationDriver, DISABLED_CLASSNAME, DISABLED_SELECTOR, ElementId, NG_ANIMATING_CLASSNAME,
    NG_ANIMATING_SELECTOR, NG_TRIGGER_CLASSNAME, NG_TRIGGER_SELECTOR, QUEUED_CLASSNAME,
    QUEUED_SELECTOR, STAR_CLASSNAME, STAR_SELECTOR,
};
use crate::dsl::{StateValue, TriggerValue};
use crate::error::{AnimationError, AnimationErrors, EngineError, EngineResult};
use crate::params::AnimationParams;
use crate::player::{
    AnimationPlayer, NoopAnimationPlayer, PlayerPhase, flatten_group_players, optimize_group_player,
};
use crate::scheduler::MicrotaskQueue;
use crate::style::{StyleMap, StyleNormalizer, StyleValue, erase_styles, normalize_keyframes, set_styles};
use crate::timeline::{ElementInstructionMap, TimelineInstruction};
use crate::trigger::{AnimationTransitionFactory, AnimationTrigger, ElementStyleProps, TransitionInstruction};

use super::event::{AnimationEvent, EventCallback};
use super::rendering_done::RenderingDone;
use super::transition_player::{TransitionAnimationPlayer, listen_on_player};

type FlushFn = Box<dyn FnOnce()>;

/// 元素真正可以从宿主中移除时调用
pub type RemovalHandler = Rc<dyn Fn(ElementId)>;

/// 取消监听；实际移除发生在下一次 flush 之后
pub type Unlisten = Box<dyn FnOnce()>;

/// 某个元素上某个触发器的当前值
#[derive(Debug, Clone, PartialEq)]
struct TriggerState {
    value: StateValue,
    params: AnimationParams,
    namespace_id: String,
}

impl TriggerState {
    fn new(value: TriggerValue, namespace_id: &str) -> Self {
        Self {
            value: value.value,
            params: value.params.unwrap_or_default(),
            namespace_id: namespace_id.to_string(),
        }
    }

    fn void() -> Self {
        Self {
            value: StateValue::void(),
            params: AnimationParams::new(),
            namespace_id: String::new(),
        }
    }

    /// 沿用旧值中本值未给出的参数
    fn absorb_params(&mut self, params: &AnimationParams) {
        for (key, value) in params {
            self.params.entry(key.clone()).or_insert_with(|| value.clone());
        }
    }
}

/// 待移除元素的状态；全部为默认值表示“已处理”
#[derive(Debug, Clone, Default)]
struct RemovalState {
    namespace_id: String,
    set_for_removal: bool,
    set_for_move: bool,
    has_animation: bool,
    previous_trigger_values: Option<BTreeMap<String, StateValue>>,
}

impl RemovalState {
    fn is_settled(&self) -> bool {
        self.namespace_id.is_empty() && !self.set_for_removal && !self.set_for_move && !self.has_animation
    }
}

struct QueuedTransition {
    element: ElementId,
    trigger_name: String,
    transition: Rc<AnimationTransitionFactory>,
    from_state: TriggerState,
    to_state: TriggerState,
    player: Rc<TransitionAnimationPlayer>,
    is_fallback: bool,
}

#[derive(Clone)]
struct TriggerListener {
    id: u64,
    name: String,
    phase: PlayerPhase,
    callback: EventCallback,
}

/// 每个宿主组件实例一个命名空间
struct Namespace {
    host: ElementId,
    triggers: HashMap<String, Rc<AnimationTrigger>>,
    queue: Vec<QueuedTransition>,
    listeners: HashMap<ElementId, Vec<TriggerListener>>,
    players: Vec<Rc<TransitionAnimationPlayer>>,
}

#[derive(Default)]
struct EngineState {
    namespaces: HashMap<String, Namespace>,
    /// 按宿主元素自上而下排序
    namespace_list: Vec<String>,
    namespaces_by_host: HashMap<ElementId, String>,
    /// 注册时尚未挂到文档上的宿主，flush 时再排序
    new_host_elements: Vec<(ElementId, String)>,
    states_by_element: BTreeMap<ElementId, BTreeMap<String, TriggerState>>,
    players_by_element: HashMap<ElementId, Vec<Rc<TransitionAnimationPlayer>>>,
    players_by_queried_element: HashMap<ElementId, Vec<Rc<TransitionAnimationPlayer>>>,
    disabled_nodes: BTreeSet<ElementId>,
    removals: HashMap<ElementId, RemovalState>,
    players: Vec<Rc<TransitionAnimationPlayer>>,
    total_animations: usize,
    total_queued_players: usize,
    flush_fns: Vec<FlushFn>,
    when_quiet_fns: Vec<FlushFn>,
    collected_enter_elements: Vec<ElementId>,
    collected_leave_elements: Vec<ElementId>,
    next_listener_id: u64,
}

/// flush 结束（无论成功与否）时需要撤销的临时类名
#[derive(Default)]
struct FlushCleanup {
    classes: Vec<(ElementId, String)>,
    leave_nodes: Vec<ElementId>,
}

/// 根元素 → 它下面（不跨越其他根）的节点
type RootMap = Vec<(ElementId, Vec<ElementId>)>;

fn same_player(a: &Rc<TransitionAnimationPlayer>, b: &Weak<TransitionAnimationPlayer>) -> bool {
    std::ptr::eq(Rc::as_ptr(a), b.as_ptr())
}

fn as_dyn(players: &[Rc<TransitionAnimationPlayer>]) -> Vec<Rc<dyn AnimationPlayer>> {
    players.iter().map(|p| p.clone() as Rc<dyn AnimationPlayer>).collect()
}

fn push_unique(list: &mut Vec<ElementId>, element: ElementId) {
    if !list.contains(&element) {
        list.push(element);
    }
}

pub struct TransitionAnimationEngine {
    driver: Rc<dyn AnimationDriver>,
    normalizer: Rc<dyn StyleNormalizer>,
    microtasks: MicrotaskQueue,
    config: EngineConfig,
    state: RefCell<EngineState>,
    on_removal_complete: RefCell<Option<RemovalHandler>>,
    this: Weak<TransitionAnimationEngine>,
}

impl TransitionAnimationEngine {
    pub fn new(
        driver: Rc<dyn AnimationDriver>,
        normalizer: Rc<dyn StyleNormalizer>,
        microtasks: &MicrotaskQueue,
        config: EngineConfig,
    ) -> Rc<Self> {
        Rc::new_cyclic(|this| Self {
            driver,
            normalizer,
            microtasks: microtasks.clone(),
            config,
            state: RefCell::new(EngineState::default()),
            on_removal_complete: RefCell::new(None),
            this: this.clone(),
        })
    }

    pub fn set_removal_handler(&self, handler: RemovalHandler) {
        *self.on_removal_complete.borrow_mut() = Some(handler);
    }

    fn report_removal(&self, element: ElementId) {
        trace!(element = %element, "元素移除完成");
        let handler = self.on_removal_complete.borrow().clone();
        if let Some(handler) = handler {
            handler(element);
        }
    }

    // ========== 查询 ==========

    /// 已开始播放、尚未完成的根播放器
    pub fn players(&self) -> Vec<Rc<TransitionAnimationPlayer>> {
        self.state.borrow().players.clone()
    }

    /// 等待 flush 的过渡播放器
    pub fn queued_players(&self) -> Vec<Rc<TransitionAnimationPlayer>> {
        let st = self.state.borrow();
        st.namespace_list
            .iter()
            .filter_map(|id| st.namespaces.get(id))
            .flat_map(|ns| ns.players.iter().filter(|p| p.is_queued()).cloned())
            .collect()
    }

    /// 元素上各触发器的当前值
    pub fn trigger_values(&self, element: ElementId) -> BTreeMap<String, StateValue> {
        self.state
            .borrow()
            .states_by_element
            .get(&element)
            .map(|states| {
                states
                    .iter()
                    .map(|(name, state)| (name.clone(), state.value.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn total_animations(&self) -> usize {
        self.state.borrow().total_animations
    }

    pub fn has_namespace(&self, namespace_id: &str) -> bool {
        self.state.borrow().namespaces.contains_key(namespace_id)
    }

    /// 自上而下排序后的命名空间
    pub fn namespace_ids(&self) -> Vec<String> {
        self.state.borrow().namespace_list.clone()
    }

    pub fn is_disabled(&self, element: ElementId) -> bool {
        self.state.borrow().disabled_nodes.contains(&element)
    }

    /// 下一次 flush 结束时执行
    pub fn after_flush(&self, f: impl FnOnce() + 'static) {
        self.state.borrow_mut().flush_fns.push(Box::new(f));
    }

    /// 下一次 flush 启动的动画全部完成后执行
    pub fn after_flush_animations_done(&self, f: impl FnOnce() + 'static) {
        self.state.borrow_mut().when_quiet_fns.push(Box::new(f));
    }

    // ========== 命名空间 ==========

    fn create_namespace(&self, namespace_id: &str, host: ElementId) {
        self.state.borrow_mut().namespaces.insert(
            namespace_id.to_string(),
            Namespace {
                host,
                triggers: HashMap::new(),
                queue: Vec::new(),
                listeners: HashMap::new(),
                players: Vec::new(),
            },
        );
        self.driver.add_class(host, &format!("ng-tns-{}", namespace_id));

        if self.driver.is_connected(host) {
            self.balance_namespace_list(namespace_id, host);
        } else {
            // 插入文档后才知道它在列表中的位置
            let mut st = self.state.borrow_mut();
            st.new_host_elements.push((host, namespace_id.to_string()));
            st.collected_enter_elements.push(host);
        }
        debug!(namespace = namespace_id, host = %host, "创建命名空间");
    }

    fn balance_namespace_list(&self, namespace_id: &str, host: ElementId) {
        let mut ancestors = Vec::new();
        let mut cursor = self.driver.get_parent_element(host);
        while let Some(ancestor) = cursor {
            ancestors.push(ancestor);
            cursor = self.driver.get_parent_element(ancestor);
        }

        let mut st = self.state.borrow_mut();
        if st.namespace_list.is_empty() {
            st.namespace_list.push(namespace_id.to_string());
        } else {
            // 插在最近的祖先命名空间之后；没有祖先则放在最前
            let index = ancestors
                .iter()
                .find_map(|a| st.namespaces_by_host.get(a))
                .and_then(|ancestor_ns| st.namespace_list.iter().position(|id| id == ancestor_ns))
                .map(|i| i + 1)
                .unwrap_or(0);
            st.namespace_list.insert(index, namespace_id.to_string());
        }
        st.namespaces_by_host.insert(host, namespace_id.to_string());
    }

    pub fn register(&self, namespace_id: &str, host: ElementId) {
        if !self.has_namespace(namespace_id) {
            self.create_namespace(namespace_id, host);
        }
    }

    pub fn register_trigger(&self, namespace_id: &str, name: &str, trigger: Rc<AnimationTrigger>) -> EngineResult<()> {
        let mut st = self.state.borrow_mut();
        let ns = st
            .namespaces
            .get_mut(namespace_id)
            .ok_or_else(|| EngineError::MissingNamespace {
                id: namespace_id.to_string(),
            })?;
        if ns.triggers.contains_key(name) {
            return Ok(());
        }
        ns.triggers.insert(name.to_string(), trigger);
        st.total_animations += 1;
        Ok(())
    }

    /// 销毁命名空间
    ///
    /// 等到下一次 flush 的动画全部结束后才真正释放，期间的移除动画照常播放。
    pub fn destroy(&self, namespace_id: &str) {
        if namespace_id.is_empty() {
            return;
        }
        let engine = self.this.clone();
        let namespace_id = namespace_id.to_string();
        self.after_flush_animations_done(move || {
            if let Some(engine) = engine.upgrade() {
                engine.release_namespace(&namespace_id);
            }
        });
    }

    fn release_namespace(&self, namespace_id: &str) {
        let (host, players) = {
            let mut st = self.state.borrow_mut();
            let Some(ns) = st.namespaces.get(namespace_id) else {
                return;
            };
            let (host, players, trigger_count) = (ns.host, ns.players.clone(), ns.triggers.len());
            st.namespaces_by_host.remove(&host);
            st.namespace_list.retain(|id| id != namespace_id);
            st.total_animations = st.total_animations.saturating_sub(trigger_count);
            (host, players)
        };
        for player in players {
            player.destroy();
        }
        self.signal_removal_for_inner_triggers(namespace_id, host);
        self.state.borrow_mut().namespaces.remove(namespace_id);
        debug!(namespace = namespace_id, "销毁命名空间");
    }

    /// 元素上存在状态的命名空间（去重）
    fn namespaces_by_element(&self, element: ElementId) -> Vec<String> {
        let st = self.state.borrow();
        let mut namespaces = Vec::new();
        if let Some(states) = st.states_by_element.get(&element) {
            for state in states.values() {
                if !state.namespace_id.is_empty()
                    && st.namespaces.contains_key(&state.namespace_id)
                    && !namespaces.contains(&state.namespace_id)
                {
                    namespaces.push(state.namespace_id.clone());
                }
            }
        }
        namespaces
    }

    fn namespace_trigger_def(&self, namespace_id: &str, name: &str) -> EngineResult<Rc<AnimationTrigger>> {
        let st = self.state.borrow();
        let ns = st
            .namespaces
            .get(namespace_id)
            .ok_or_else(|| EngineError::MissingNamespace {
                id: namespace_id.to_string(),
            })?;
        ns.triggers
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::MissingTrigger { name: name.to_string() })
    }

    fn namespace_has_trigger(&self, namespace_id: &str, name: &str) -> bool {
        self.state
            .borrow()
            .namespaces
            .get(namespace_id)
            .is_some_and(|ns| ns.triggers.contains_key(name))
    }

    // ========== 触发 ==========

    /// 写入触发器的新值；命名空间不存在时返回 `false`
    pub fn trigger(&self, namespace_id: &str, element: ElementId, name: &str, value: TriggerValue) -> EngineResult<bool> {
        if !self.has_namespace(namespace_id) {
            return Ok(false);
        }
        self.namespace_trigger(namespace_id, element, name, value, true)?;
        Ok(true)
    }

    fn namespace_trigger(
        &self,
        namespace_id: &str,
        element: ElementId,
        trigger_name: &str,
        value: TriggerValue,
        default_to_fallback: bool,
    ) -> EngineResult<Option<Rc<TransitionAnimationPlayer>>> {
        let trigger = self.namespace_trigger_def(namespace_id, trigger_name)?;
        let player = TransitionAnimationPlayer::new(namespace_id, trigger_name, element, &self.microtasks);

        let explicit_params = value.params.is_some();
        let mut to_state = TriggerState::new(value, namespace_id);
        let (is_new_element, from_state) = {
            let mut st = self.state.borrow_mut();
            let is_new = !st.states_by_element.contains_key(&element);
            let states = st.states_by_element.entry(element).or_default();
            let from_state = states.get(trigger_name).cloned();
            if !explicit_params && let Some(from) = &from_state {
                to_state.absorb_params(&from.params);
            }
            states.insert(trigger_name.to_string(), to_state.clone());
            (is_new, from_state.unwrap_or_else(TriggerState::void))
        };
        if is_new_element {
            self.driver.add_class(element, NG_TRIGGER_CLASSNAME);
            self.driver
                .add_class(element, &format!("{}-{}", NG_TRIGGER_CLASSNAME, trigger_name));
        }

        let is_removal = to_state.value.is_void();
        if !is_removal && from_state.value == to_state.value {
            // 值没变但参数变了：不播放动画，flush 后直接换上新样式
            if from_state.params != to_state.params {
                let mut errors = Vec::new();
                let from_styles = trigger.match_styles(&from_state.value, &from_state.params, &mut errors);
                let to_styles = trigger.match_styles(&to_state.value, &to_state.params, &mut errors);
                if !errors.is_empty() {
                    return Err(EngineError::TransitionsFailed(errors.into()));
                }
                let driver = self.driver.clone();
                self.after_flush(move || {
                    erase_styles(driver.as_ref(), element, &from_styles);
                    set_styles(driver.as_ref(), element, &to_styles);
                });
            }
            return Ok(None);
        }

        // 同一触发器上尚未开始的过渡直接作废；已开始的留到 flush 时作为前序播放器
        let stale: Vec<_> = self
            .state
            .borrow()
            .players_by_element
            .get(&element)
            .map(|players| {
                players
                    .iter()
                    .filter(|p| p.namespace_id == namespace_id && p.trigger_name == trigger_name && p.is_queued())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        for old in stale {
            old.destroy();
        }

        let transition = trigger
            .match_transition(&from_state.value, &to_state.value, element, &to_state.params)
            .clone();
        let is_fallback = transition.is_fallback();
        if is_fallback && !default_to_fallback {
            return Ok(None);
        }

        trace!(
            namespace = namespace_id,
            trigger = trigger_name,
            element = %element,
            from = %from_state.value,
            to = %to_state.value,
            fallback = is_fallback,
            "过渡入队"
        );

        if !is_fallback {
            self.driver.add_class(element, QUEUED_CLASSNAME);
            let driver = self.driver.clone();
            player.on_start(Rc::new(move || driver.remove_class(element, QUEUED_CLASSNAME)));
        }

        let engine = self.this.clone();
        let weak_player = Rc::downgrade(&player);
        let ns_id = namespace_id.to_string();
        player.on_done(Rc::new(move || {
            let Some(engine) = engine.upgrade() else {
                return;
            };
            let mut st = engine.state.borrow_mut();
            if let Some(ns) = st.namespaces.get_mut(&ns_id) {
                ns.players.retain(|p| !same_player(p, &weak_player));
            }
            if let Some(players) = st.players_by_element.get_mut(&element) {
                players.retain(|p| !same_player(p, &weak_player));
            }
        }));

        let mut st = self.state.borrow_mut();
        st.total_queued_players += 1;
        st.players_by_element.entry(element).or_default().push(player.clone());
        if let Some(ns) = st.namespaces.get_mut(namespace_id) {
            ns.players.push(player.clone());
            ns.queue.push(QueuedTransition {
                element,
                trigger_name: trigger_name.to_string(),
                transition,
                from_state,
                to_state,
                player: player.clone(),
                is_fallback,
            });
        }
        Ok(Some(player))
    }

    // ========== 监听 ==========

    pub fn listen(
        &self,
        namespace_id: &str,
        element: ElementId,
        name: &str,
        phase: Option<&str>,
        callback: EventCallback,
    ) -> EngineResult<Unlisten> {
        if !self.namespace_has_trigger(namespace_id, name) {
            if !self.has_namespace(namespace_id) {
                return Err(EngineError::MissingNamespace {
                    id: namespace_id.to_string(),
                });
            }
            return Err(EngineError::MissingTrigger { name: name.to_string() });
        }
        let phase = match phase {
            None | Some("") => return Err(EngineError::MissingEventPhase { name: name.to_string() }),
            Some("start") => PlayerPhase::Start,
            Some("done") => PlayerPhase::Done,
            Some(other) => {
                return Err(EngineError::UnsupportedEventPhase {
                    name: name.to_string(),
                    phase: other.to_string(),
                });
            }
        };

        let (id, is_new_state) = {
            let mut st = self.state.borrow_mut();
            st.next_listener_id += 1;
            let id = st.next_listener_id;
            if let Some(ns) = st.namespaces.get_mut(namespace_id) {
                ns.listeners.entry(element).or_default().push(TriggerListener {
                    id,
                    name: name.to_string(),
                    phase,
                    callback,
                });
            }
            let states = st.states_by_element.entry(element).or_default();
            let is_new_state = !states.contains_key(name);
            if is_new_state {
                states.insert(name.to_string(), TriggerState::void());
            }
            (id, is_new_state)
        };
        if is_new_state {
            self.driver.add_class(element, NG_TRIGGER_CLASSNAME);
            self.driver.add_class(element, &format!("{}-{}", NG_TRIGGER_CLASSNAME, name));
        }

        let engine = self.this.clone();
        let namespace_id = namespace_id.to_string();
        let name = name.to_string();
        Ok(Box::new(move || {
            let Some(this) = engine.upgrade() else {
                return;
            };
            // 等 flush 之后再移除，让离场动画的回调仍能送达
            let engine = engine.clone();
            this.after_flush(move || {
                let Some(engine) = engine.upgrade() else {
                    return;
                };
                let mut st = engine.state.borrow_mut();
                let namespace_alive = match st.namespaces.get_mut(&namespace_id) {
                    Some(ns) => {
                        if let Some(listeners) = ns.listeners.get_mut(&element) {
                            listeners.retain(|l| l.id != id);
                        }
                        ns.triggers.contains_key(&name)
                    }
                    None => false,
                };
                if !namespace_alive && let Some(states) = st.states_by_element.get_mut(&element) {
                    states.remove(&name);
                }
            });
        }))
    }

    // ========== 插入 / 移除 ==========

    pub fn insert_node(&self, namespace_id: Option<&str>, element: ElementId, insert_before: bool) {
        {
            let mut st = self.state.borrow_mut();
            // 先移除又插回：这是一次移动，不再作为离场元素处理
            if let Some(details) = st.removals.get_mut(&element)
                && details.set_for_removal
            {
                details.set_for_removal = false;
                details.set_for_move = true;
                st.collected_leave_elements.retain(|e| *e != element);
            }
        }
        if let Some(id) = namespace_id
            && self.has_namespace(id)
        {
            self.driver.add_class(element, &format!("ng-tns-{}", id));
        }
        if insert_before {
            self.state.borrow_mut().collected_enter_elements.push(element);
        }
    }

    pub fn remove_node(&self, namespace_id: Option<&str>, element: ElementId) {
        match namespace_id.filter(|id| self.has_namespace(id)) {
            Some(id) => self.namespace_remove_node(id, element),
            None => self.mark_element_as_removed(namespace_id.unwrap_or_default(), element, false, None),
        }
        let host_ns = self.state.borrow().namespaces_by_host.get(&element).cloned();
        if let Some(host_ns) = host_ns
            && Some(host_ns.as_str()) != namespace_id
        {
            self.namespace_remove_node(&host_ns, element);
        }
    }

    fn namespace_remove_node(&self, namespace_id: &str, element: ElementId) {
        self.signal_removal_for_inner_triggers(namespace_id, element);

        // 已经启动了 * => void 动画
        if self.trigger_leave_animation(namespace_id, element, true, false) {
            return;
        }

        // 父元素上的 query 动画可能正在播放它，需要推迟移除
        let mut contains_potential_parent_transition = false;
        let (total_animations, has_players, queried) = {
            let st = self.state.borrow();
            (
                st.total_animations,
                !st.players.is_empty(),
                st.players_by_queried_element
                    .get(&element)
                    .is_some_and(|players| !players.is_empty()),
            )
        };
        if total_animations > 0 {
            if has_players && queried {
                contains_potential_parent_transition = true;
            } else {
                let mut cursor = self.driver.get_parent_element(element);
                while let Some(parent) = cursor {
                    if self.state.borrow().states_by_element.contains_key(&parent) {
                        contains_potential_parent_transition = true;
                        break;
                    }
                    cursor = self.driver.get_parent_element(parent);
                }
            }
        }

        self.prepare_leave_animation_listeners(namespace_id, element);

        if contains_potential_parent_transition {
            self.mark_element_as_removed(namespace_id, element, false, None);
            return;
        }
        let settled = self
            .state
            .borrow()
            .removals
            .get(&element)
            .is_none_or(RemovalState::is_settled);
        if settled {
            let engine = self.this.clone();
            let ns_id = namespace_id.to_string();
            self.after_flush(move || {
                if let Some(engine) = engine.upgrade() {
                    engine.clear_element_cache(&ns_id, element);
                }
            });
            self.destroy_inner_animations(element);
            self.report_removal(element);
        }
    }

    /// 为子树中带触发器的元素模拟离场
    fn signal_removal_for_inner_triggers(&self, namespace_id: &str, root: ElementId) {
        let elements = self.driver.query(root, NG_TRIGGER_SELECTOR, true);
        for &element in &elements {
            // 内层的 remove() 已经处理过
            if self.state.borrow().removals.contains_key(&element) {
                continue;
            }
            let namespaces = self.namespaces_by_element(element);
            if namespaces.is_empty() {
                self.clear_element_cache(namespace_id, element);
            } else {
                for ns in namespaces {
                    self.trigger_leave_animation(&ns, element, false, true);
                }
            }
        }

        // 子元素随父元素一起移除时，它们的动画可能还没结束
        let engine = self.this.clone();
        let ns_id = namespace_id.to_string();
        self.after_flush_animations_done(move || {
            if let Some(engine) = engine.upgrade() {
                for element in elements {
                    engine.clear_element_cache(&ns_id, element);
                }
            }
        });
    }

    fn trigger_leave_animation(
        &self,
        namespace_id: &str,
        element: ElementId,
        destroy_after_complete: bool,
        default_to_fallback: bool,
    ) -> bool {
        let states: Vec<(String, StateValue)> = match self.state.borrow().states_by_element.get(&element) {
            Some(states) => states
                .iter()
                .map(|(name, state)| (name.clone(), state.value.clone()))
                .collect(),
            None => return false,
        };

        let mut previous_values = BTreeMap::new();
        let mut players = Vec::new();
        for (name, value) in states {
            previous_values.insert(name.clone(), value);
            // 宿主层与组件层可能各移除一次
            if !self.namespace_has_trigger(namespace_id, &name) {
                continue;
            }
            match self.namespace_trigger(namespace_id, element, &name, TriggerValue::void(), default_to_fallback) {
                Ok(Some(player)) => players.push(player),
                Ok(None) => {}
                Err(e) => warn!(error = %e, element = %element, "离场过渡失败"),
            }
        }

        if players.is_empty() {
            return false;
        }
        self.mark_element_as_removed(namespace_id, element, true, Some(previous_values));
        if destroy_after_complete {
            let engine = self.this.clone();
            optimize_group_player(as_dyn(&players), &self.microtasks).on_done(Rc::new(move || {
                if let Some(engine) = engine.upgrade() {
                    engine.process_leave_node(element);
                }
            }));
        }
        true
    }

    /// 元素即将离开：为每个被监听的触发器排一个兜底过渡，保证回调能收到 `void`
    fn prepare_leave_animation_listeners(&self, namespace_id: &str, element: ElementId) {
        let mut st = self.state.borrow_mut();
        let Some(states) = st.states_by_element.get(&element).cloned() else {
            return;
        };
        let Some(ns) = st.namespaces.get_mut(namespace_id) else {
            return;
        };
        let Some(listeners) = ns.listeners.get(&element) else {
            return;
        };

        let mut visited = BTreeSet::new();
        let mut entries = Vec::new();
        for listener in listeners {
            if !visited.insert(listener.name.clone()) {
                continue;
            }
            let Some(trigger) = ns.triggers.get(&listener.name) else {
                continue;
            };
            entries.push(QueuedTransition {
                element,
                trigger_name: listener.name.clone(),
                transition: trigger.fallback().clone(),
                from_state: states.get(&listener.name).cloned().unwrap_or_else(TriggerState::void),
                to_state: TriggerState::void(),
                player: TransitionAnimationPlayer::new(namespace_id, &listener.name, element, &self.microtasks),
                is_fallback: true,
            });
        }
        let count = entries.len();
        ns.queue.extend(entries);
        st.total_queued_players += count;
    }

    fn mark_element_as_removed(
        &self,
        namespace_id: &str,
        element: ElementId,
        has_animation: bool,
        previous_trigger_values: Option<BTreeMap<String, StateValue>>,
    ) {
        let mut st = self.state.borrow_mut();
        st.collected_leave_elements.push(element);
        st.removals.insert(
            element,
            RemovalState {
                namespace_id: namespace_id.to_string(),
                set_for_removal: true,
                set_for_move: false,
                has_animation,
                previous_trigger_values,
            },
        );
    }

    pub fn mark_element_as_disabled(&self, element: ElementId, disabled: bool) {
        let changed = {
            let mut st = self.state.borrow_mut();
            if disabled {
                st.disabled_nodes.insert(element)
            } else {
                st.disabled_nodes.remove(&element)
            }
        };
        if changed {
            if disabled {
                self.driver.add_class(element, DISABLED_CLASSNAME);
            } else {
                self.driver.remove_class(element, DISABLED_CLASSNAME);
            }
        }
    }

    fn clear_element_cache(&self, namespace_id: &str, element: ElementId) {
        let players = {
            let mut st = self.state.borrow_mut();
            st.states_by_element.remove(&element);
            if let Some(ns) = st.namespaces.get_mut(namespace_id) {
                ns.listeners.remove(&element);
            }
            st.players_by_element.remove(&element).unwrap_or_default()
        };
        for player in players {
            player.destroy();
        }
    }

    fn process_leave_node(&self, element: ElementId) {
        let details = self.state.borrow().removals.get(&element).cloned();
        if let Some(details) = details
            && details.set_for_removal
        {
            // 防止重复移除
            self.state
                .borrow_mut()
                .removals
                .insert(element, RemovalState::default());
            if !details.namespace_id.is_empty() {
                self.destroy_inner_animations(element);
                self.clear_element_cache(&details.namespace_id, element);
            }
            self.report_removal(element);
        }

        if self.driver.has_class(element, DISABLED_CLASSNAME) {
            self.mark_element_as_disabled(element, false);
        }
        for node in self.driver.query(element, DISABLED_SELECTOR, true) {
            self.mark_element_as_disabled(node, false);
        }
    }

    fn destroy_inner_animations(&self, container: ElementId) {
        for element in self.driver.query(container, NG_TRIGGER_SELECTOR, true) {
            self.destroy_active_animations_for_element(element);
        }
        if self.state.borrow().players_by_queried_element.is_empty() {
            return;
        }
        for element in self.driver.query(container, NG_ANIMATING_SELECTOR, true) {
            self.finish_active_queried_animation_on_element(element);
        }
    }

    fn destroy_active_animations_for_element(&self, element: ElementId) {
        let players = self
            .state
            .borrow()
            .players_by_element
            .get(&element)
            .cloned()
            .unwrap_or_default();
        for player in players {
            // 还在排队的推迟到 flush 再销毁，让监听者能收到事件
            if player.is_queued() {
                player.mark_for_destroy();
            } else {
                player.destroy();
            }
        }
    }

    fn finish_active_queried_animation_on_element(&self, element: ElementId) {
        let players = self
            .state
            .borrow()
            .players_by_queried_element
            .get(&element)
            .cloned()
            .unwrap_or_default();
        for player in players {
            player.finish();
        }
    }

    /// 所有当前播放器完成后就绪
    pub fn when_rendering_done(&self) -> RenderingDone {
        let players = self.players();
        if players.is_empty() {
            return RenderingDone::ready();
        }
        let done = RenderingDone::pending();
        let signal = done.clone();
        optimize_group_player(as_dyn(&players), &self.microtasks).on_done(Rc::new(move || signal.resolve()));
        done
    }

    // ========== flush ==========

    pub fn flush(&self, microtask_id: i64) -> EngineResult<()> {
        self.prune_settled_removals();

        let new_hosts = std::mem::take(&mut self.state.borrow_mut().new_host_elements);
        for (host, namespace_id) in new_hosts {
            self.balance_namespace_list(&namespace_id, host);
        }

        let (total_animations, enter_elements) = {
            let st = self.state.borrow();
            (st.total_animations, st.collected_enter_elements.clone())
        };
        if total_animations > 0 {
            for element in &enter_elements {
                self.driver.add_class(*element, STAR_CLASSNAME);
            }
        }

        let (has_namespaces, has_work, leave_elements) = {
            let st = self.state.borrow();
            (
                !st.namespace_list.is_empty(),
                st.total_queued_players > 0 || !st.collected_leave_elements.is_empty(),
                st.collected_leave_elements.clone(),
            )
        };

        let mut players = Vec::new();
        let mut outcome = Ok(());
        if has_namespaces && has_work {
            let mut cleanup = FlushCleanup::default();
            let result = self.flush_animations(&mut cleanup, microtask_id);
            self.run_cleanup(cleanup);
            match result {
                Ok(root_players) => players = root_players,
                Err(e) => {
                    warn!(error = %e, "flush 失败");
                    outcome = Err(e);
                }
            }
        } else {
            for element in leave_elements {
                self.process_leave_node(element);
            }
        }

        let (flush_fns, quiet_fns) = {
            let mut st = self.state.borrow_mut();
            st.total_queued_players = 0;
            st.collected_enter_elements.clear();
            st.collected_leave_elements.clear();
            (
                std::mem::take(&mut st.flush_fns),
                std::mem::take(&mut st.when_quiet_fns),
            )
        };
        for f in flush_fns {
            f();
        }

        if !quiet_fns.is_empty() {
            if players.is_empty() {
                for f in quiet_fns {
                    f();
                }
            } else {
                let quiet_fns = RefCell::new(Some(quiet_fns));
                optimize_group_player(as_dyn(&players), &self.microtasks).on_done(Rc::new(move || {
                    for f in quiet_fns.borrow_mut().take().unwrap_or_default() {
                        f();
                    }
                }));
            }
        }

        debug!(microtask_id, players = players.len(), "flush 完成");
        outcome
    }

    /// 已处理完且不在文档中的元素不再需要移除标记
    fn prune_settled_removals(&self) {
        let settled: Vec<ElementId> = self
            .state
            .borrow()
            .removals
            .iter()
            .filter(|(_, r)| r.is_settled())
            .map(|(el, _)| *el)
            .collect();
        let detached: Vec<ElementId> = settled
            .into_iter()
            .filter(|el| !self.driver.is_connected(*el))
            .collect();
        let mut st = self.state.borrow_mut();
        for element in detached {
            st.removals.remove(&element);
        }
    }

    fn run_cleanup(&self, cleanup: FlushCleanup) {
        for (element, class_name) in &cleanup.classes {
            self.driver.remove_class(*element, class_name);
        }
        for element in cleanup.leave_nodes {
            self.process_leave_node(element);
        }
    }

    /// 取出命名空间队列，挂上监听器并排序：无依赖的在前，子元素先于父元素
    fn drain_queued_transitions(&self, namespace_id: &str, microtask_id: i64) -> Vec<QueuedTransition> {
        let (queue, listeners) = {
            let mut st = self.state.borrow_mut();
            let Some(ns) = st.namespaces.get_mut(namespace_id) else {
                return Vec::new();
            };
            (std::mem::take(&mut ns.queue), ns.listeners.clone())
        };

        let mut instructions = Vec::new();
        for entry in queue {
            let player = entry.player.clone();
            if player.is_destroyed() {
                continue;
            }
            for listener in listeners.get(&entry.element).into_iter().flatten() {
                if listener.name != entry.trigger_name {
                    continue;
                }
                let mut event = AnimationEvent::new(
                    entry.element,
                    &entry.trigger_name,
                    entry.from_state.value.clone(),
                    entry.to_state.value.clone(),
                );
                event.microtask_id = Some(microtask_id);
                listen_on_player(&player, listener.phase, event, listener.callback.clone());
            }
            if player.is_marked_for_destroy() {
                self.after_flush(move || player.destroy());
            } else {
                instructions.push(entry);
            }
        }

        instructions.sort_by_cached_key(|entry| {
            (
                entry.transition.ast().dep_count > 0,
                Reverse(self.element_depth(entry.element)),
            )
        });
        instructions
    }

    fn element_depth(&self, element: ElementId) -> usize {
        let mut depth = 0;
        let mut cursor = self.driver.get_parent_element(element);
        while let Some(parent) = cursor {
            depth += 1;
            cursor = self.driver.get_parent_element(parent);
        }
        depth
    }

    /// 把每个节点归到最近的根（带触发器的元素）之下；嵌套在同组节点中的不计入
    fn build_root_map(&self, roots: &[ElementId], nodes: &[ElementId]) -> RootMap {
        let mut root_map: RootMap = roots.iter().map(|r| (*r, Vec::new())).collect();
        if nodes.is_empty() {
            return root_map;
        }
        let root_set: HashSet<ElementId> = roots.iter().copied().collect();
        let node_set: HashSet<ElementId> = nodes.iter().copied().collect();
        let mut local: HashMap<ElementId, Option<ElementId>> = HashMap::new();

        for &node in nodes {
            let mut path = Vec::new();
            let mut cursor = Some(node);
            let root = loop {
                let Some(current) = cursor else {
                    break None;
                };
                if let Some(known) = local.get(&current) {
                    break *known;
                }
                path.push(current);
                match self.driver.get_parent_element(current) {
                    Some(parent) if root_set.contains(&parent) => break Some(parent),
                    Some(parent) if node_set.contains(&parent) => break None,
                    parent => cursor = parent,
                }
            };
            for visited in path {
                local.insert(visited, root);
            }
            if let Some(root) = root
                && let Some((_, list)) = root_map.iter_mut().find(|(r, _)| *r == root)
            {
                list.push(node);
            }
        }
        root_map
    }

    /// 计算 `!` / `*` 的实际值；计算期间先隐藏 `elements`
    fn cloak_and_compute_styles(
        &self,
        values: &mut HashMap<ElementId, StyleMap>,
        elements: &[ElementId],
        props: &ElementStyleProps,
        default_style: StyleValue,
    ) -> Vec<ElementId> {
        let cloaked: Vec<(ElementId, Option<StyleValue>)> = elements
            .iter()
            .map(|el| {
                let old = self.driver.get_style(*el, "display");
                self.driver.set_style(*el, "display", &StyleValue::from("none"));
                (*el, old)
            })
            .collect();

        let mut failed = Vec::new();
        for (element, element_props) in props {
            let mut styles = StyleMap::new();
            for prop in element_props {
                let value = self.driver.compute_style(*element, prop, Some(&default_style));
                // 元素可能随父动画一起被摘下，已经无法计算
                if value.as_str() == Some("") {
                    self.state
                        .borrow_mut()
                        .removals
                        .insert(*element, RemovalState::default());
                    failed.push(*element);
                }
                styles.insert(prop, value);
            }
            values.insert(*element, styles);
        }

        for (element, old) in cloaked {
            match old {
                Some(value) => self.driver.set_style(element, "display", &value),
                None => self.driver.remove_style(element, "display"),
            }
        }
        failed
    }

    fn flush_animations(
        &self,
        cleanup: &mut FlushCleanup,
        microtask_id: i64,
    ) -> EngineResult<Vec<Rc<TransitionAnimationPlayer>>> {
        let sub_timelines = ElementInstructionMap::new();
        let mut skipped_players: Vec<Rc<TransitionAnimationPlayer>> = Vec::new();
        let mut skipped_players_map: HashMap<ElementId, Vec<Rc<dyn AnimationPlayer>>> = HashMap::new();
        let mut queued_instructions: Vec<(TransitionInstruction, Rc<TransitionAnimationPlayer>)> = Vec::new();
        let mut queried_elements: HashMap<ElementId, Vec<Rc<TransitionAnimationPlayer>>> = HashMap::new();
        let mut all_pre_style_elements = ElementStyleProps::new();
        let mut all_post_style_elements = ElementStyleProps::new();

        let (disabled_nodes, trigger_elements, enter_elements, leave_elements, namespace_list) = {
            let st = self.state.borrow();
            (
                st.disabled_nodes.clone(),
                st.states_by_element.keys().copied().collect::<Vec<_>>(),
                st.collected_enter_elements.clone(),
                st.collected_leave_elements.clone(),
                st.namespace_list.clone(),
            )
        };

        let mut disabled_elements: HashSet<ElementId> = HashSet::new();
        for &node in &disabled_nodes {
            disabled_elements.insert(node);
            disabled_elements.extend(self.driver.query(node, QUEUED_SELECTOR, true));
        }

        // 必须在编译时间轴之前挂上，:enter 查询才能命中
        let mut class_index = 0;
        let enter_node_map = self.build_root_map(&trigger_elements, &enter_elements);
        let mut enter_class_names: HashMap<ElementId, String> = HashMap::new();
        for (root, nodes) in &enter_node_map {
            let class_name = format!("{}{}", self.config.enter_class_name, class_index);
            class_index += 1;
            for node in nodes {
                self.driver.add_class(*node, &class_name);
                cleanup.classes.push((*node, class_name.clone()));
            }
            enter_class_names.insert(*root, class_name);
        }

        let mut all_leave_nodes = Vec::new();
        let mut merged_leave_nodes = Vec::new();
        let mut leave_nodes_without_animations = Vec::new();
        for &element in &leave_elements {
            let details = self.state.borrow().removals.get(&element).cloned();
            let Some(details) = details.filter(|d| d.set_for_removal) else {
                continue;
            };
            all_leave_nodes.push(element);
            push_unique(&mut merged_leave_nodes, element);
            if details.has_animation {
                for inner in self.driver.query(element, STAR_SELECTOR, true) {
                    push_unique(&mut merged_leave_nodes, inner);
                }
            } else {
                push_unique(&mut leave_nodes_without_animations, element);
            }
        }

        let leave_node_map = self.build_root_map(&trigger_elements, &merged_leave_nodes);
        let mut leave_class_names: HashMap<ElementId, String> = HashMap::new();
        for (root, nodes) in &leave_node_map {
            let class_name = format!("{}{}", self.config.leave_class_name, class_index);
            class_index += 1;
            for node in nodes {
                self.driver.add_class(*node, &class_name);
                cleanup.classes.push((*node, class_name.clone()));
            }
            leave_class_names.insert(*root, class_name);
        }
        cleanup.leave_nodes = all_leave_nodes.clone();

        let mut all_players = Vec::new();
        let mut erroneous: Vec<TransitionInstruction> = Vec::new();
        // 逆序：子命名空间先编译，父动画的 animateChild() 才能取到它们
        for namespace_id in namespace_list.iter().rev() {
            for entry in self.drain_queued_transitions(namespace_id, microtask_id) {
                let player = entry.player.clone();
                let element = entry.element;
                all_players.push(player.clone());

                if !enter_elements.is_empty() {
                    let details = self.state.borrow().removals.get(&element).cloned();
                    if let Some(details) = details
                        && details.set_for_move
                    {
                        // 移动而非离场：恢复移除前的值，不播放动画
                        if let Some(previous) = details
                            .previous_trigger_values
                            .as_ref()
                            .and_then(|values| values.get(&entry.trigger_name))
                        {
                            let mut st = self.state.borrow_mut();
                            if let Some(state) = st
                                .states_by_element
                                .get_mut(&element)
                                .and_then(|states| states.get_mut(&entry.trigger_name))
                            {
                                state.value = previous.clone();
                            }
                        }
                        player.destroy();
                        continue;
                    }
                }

                let node_is_orphaned = !self.driver.is_connected(element);
                let enter_class_name = enter_class_names
                    .get(&element)
                    .map(String::as_str)
                    .unwrap_or(self.config.enter_class_name.as_str());
                let leave_class_name = leave_class_names
                    .get(&element)
                    .map(String::as_str)
                    .unwrap_or(self.config.leave_class_name.as_str());
                let mut instruction = entry.transition.build(
                    self.driver.as_ref(),
                    element,
                    &entry.from_state.value,
                    &entry.to_state.value,
                    enter_class_name,
                    leave_class_name,
                    Some(&entry.from_state.params),
                    Some(&entry.to_state.params),
                    Some(&sub_timelines),
                    node_is_orphaned,
                );
                if !instruction.errors.is_empty() {
                    erroneous.push(instruction);
                    continue;
                }

                // 不在文档中的元素以后仍可能被插入，样式照常切换。
                // 兜底过渡不渲染动画，也不打断正在播放的动画
                if node_is_orphaned || entry.is_fallback {
                    self.skip_with_styles(&player, element, &instruction);
                    skipped_players.push(player);
                    continue;
                }

                // 作为子动画时用拉伸首帧代替延迟
                for timeline in &mut instruction.timelines {
                    timeline.stretch_starting_keyframe = true;
                }
                instruction
                    .timelines
                    .retain(|tl| !disabled_nodes.contains(&tl.element));
                sub_timelines.append(element, &instruction.timelines);

                for queried in &instruction.queried_elements {
                    queried_elements.entry(*queried).or_default().push(player.clone());
                }
                for (el, props) in &instruction.pre_style_props {
                    if !props.is_empty() {
                        all_pre_style_elements
                            .entry(*el)
                            .or_default()
                            .extend(props.iter().cloned());
                    }
                }
                for (el, props) in &instruction.post_style_props {
                    all_post_style_elements
                        .entry(*el)
                        .or_default()
                        .extend(props.iter().cloned());
                }
                queued_instructions.push((instruction, player));
            }
        }

        if !erroneous.is_empty() {
            let mut errors: Vec<AnimationError> = Vec::new();
            for instruction in erroneous {
                warn!(
                    trigger = %instruction.trigger_name,
                    errors = %AnimationErrors::from(instruction.errors.clone()),
                    "过渡编译失败"
                );
                errors.extend(instruction.errors);
            }
            for player in all_players {
                player.destroy();
            }
            return Err(EngineError::TransitionsFailed(errors.into()));
        }

        let mut all_previous_players: HashMap<ElementId, Vec<Rc<TransitionAnimationPlayer>>> = HashMap::new();
        // 元素 → 覆盖它的动画根元素；`None` 表示向上没有动画
        let mut animation_element_map: HashMap<ElementId, Option<ElementId>> = HashMap::new();
        for (instruction, player) in &queued_instructions {
            if sub_timelines.has(instruction.element) {
                animation_element_map.insert(instruction.element, Some(instruction.element));
                self.before_animation_build(&player.namespace_id, instruction, &mut all_previous_players);
            }
        }

        for player in &skipped_players {
            let element = player.element;
            let previous = self.get_previous_players(
                element,
                false,
                Some(&player.namespace_id),
                Some(&player.trigger_name),
                None,
            );
            for prev in previous {
                all_previous_players.entry(element).or_default().push(prev.clone());
                prev.destroy();
            }
        }

        // 即将移除的元素已不可见，`*` 只能按 `!` 的方式计算
        let mut replace_nodes: Vec<ElementId> = all_leave_nodes
            .iter()
            .copied()
            .filter(|node| replace_post_styles_as_pre(*node, &mut all_pre_style_elements, &mut all_post_style_elements))
            .collect();

        let mut post_styles_map: HashMap<ElementId, StyleMap> = HashMap::new();
        let failed = self.cloak_and_compute_styles(
            &mut post_styles_map,
            &leave_nodes_without_animations,
            &all_post_style_elements,
            StyleValue::auto(),
        );
        for node in failed {
            if replace_post_styles_as_pre(node, &mut all_pre_style_elements, &mut all_post_style_elements) {
                replace_nodes.push(node);
            }
        }

        let mut pre_styles_map: HashMap<ElementId, StyleMap> = HashMap::new();
        for (_, nodes) in &enter_node_map {
            self.cloak_and_compute_styles(&mut pre_styles_map, nodes, &all_pre_style_elements, StyleValue::pre());
        }

        for node in replace_nodes {
            let mut merged = post_styles_map.get(&node).cloned().unwrap_or_default();
            if let Some(pre) = pre_styles_map.get(&node) {
                merged.merge(pre);
            }
            post_styles_map.insert(node, merged);
        }

        let mut root_players = Vec::new();
        let mut sub_players = Vec::new();
        for (instruction, player) in &queued_instructions {
            let element = instruction.element;
            if !sub_timelines.has(element) {
                // 时间轴被父动画的 animateChild() 取走
                erase_styles(self.driver.as_ref(), element, &instruction.from_styles);
                let (driver, to_styles) = (self.driver.clone(), instruction.to_styles.clone());
                player.on_destroy(Rc::new(move || set_styles(driver.as_ref(), element, &to_styles)));
                sub_players.push(player.clone());
                if disabled_elements.contains(&element) {
                    skipped_players.push(player.clone());
                }
                continue;
            }

            if disabled_elements.contains(&element) {
                let (driver, to_styles) = (self.driver.clone(), instruction.to_styles.clone());
                player.on_destroy(Rc::new(move || set_styles(driver.as_ref(), element, &to_styles)));
                player.set_disabled(true);
                player.override_total_time(instruction.total_time);
                skipped_players.push(player.clone());
                continue;
            }

            // 沿祖先向上找正在动画的父元素，途经的元素记录结果以便复用
            let mut parent_with_animation: Option<ElementId> = None;
            if animation_element_map.len() > 1 {
                let mut parents_to_add = Vec::new();
                let mut cursor = self.driver.get_parent_element(element);
                while let Some(parent) = cursor {
                    if let Some(detected) = animation_element_map.get(&parent) {
                        parent_with_animation = *detected;
                        break;
                    }
                    parents_to_add.push(parent);
                    cursor = self.driver.get_parent_element(parent);
                }
                for parent in parents_to_add {
                    animation_element_map.insert(parent, parent_with_animation);
                }
            }

            let inner = self.build_animation(
                &player.namespace_id,
                instruction,
                &all_previous_players,
                &mut skipped_players_map,
                &pre_styles_map,
                &post_styles_map,
            );
            player.set_real_player(inner);

            match parent_with_animation {
                None => root_players.push(player.clone()),
                Some(parent) => {
                    let parent_players = self
                        .state
                        .borrow()
                        .players_by_element
                        .get(&parent)
                        .cloned()
                        .unwrap_or_default();
                    if !parent_players.is_empty() {
                        let group = optimize_group_player(as_dyn(&parent_players), &self.microtasks);
                        player.set_parent_player(Some(&group));
                    }
                    skipped_players.push(player.clone());
                }
            }
        }

        // 没有找到子播放器的也会在下一个 tick 自行完成（noop）
        for player in &sub_players {
            if let Some(players) = skipped_players_map.get(&player.element)
                && !players.is_empty()
            {
                player.set_real_player(optimize_group_player(players.clone(), &self.microtasks));
            }
        }

        // 跳过的播放器只负责派发开始/完成事件
        for player in &skipped_players {
            match player.parent_player() {
                Some(parent) => player.sync_player_events(&parent),
                None => player.destroy(),
            }
        }

        // 没有离场动画的元素：若被 query 动画选中则等待动画结束，否则立即移除
        for &element in &all_leave_nodes {
            self.driver.remove_class(element, &self.config.leave_class_name);
            let has_animation = self
                .state
                .borrow()
                .removals
                .get(&element)
                .is_some_and(|d| d.has_animation);
            if has_animation {
                continue;
            }

            let mut players: Vec<Rc<TransitionAnimationPlayer>> = Vec::new();
            if !queried_elements.is_empty() {
                if let Some(found) = queried_elements.get(&element) {
                    players.extend(found.iter().cloned());
                }
                for inner in self.driver.query(element, NG_ANIMATING_SELECTOR, true) {
                    if let Some(found) = queried_elements.get(&inner) {
                        players.extend(found.iter().cloned());
                    }
                }
            }

            let active: Vec<_> = players.into_iter().filter(|p| !p.is_destroyed()).collect();
            if active.is_empty() {
                self.process_leave_node(element);
            } else {
                let engine = self.this.clone();
                optimize_group_player(as_dyn(&active), &self.microtasks).on_done(Rc::new(move || {
                    if let Some(engine) = engine.upgrade() {
                        engine.process_leave_node(element);
                    }
                }));
            }
        }
        cleanup.leave_nodes.clear();

        for player in &root_players {
            self.state.borrow_mut().players.push(player.clone());
            let engine = self.this.clone();
            let weak_player = Rc::downgrade(player);
            player.on_done(Rc::new(move || {
                let Some(player) = weak_player.upgrade() else {
                    return;
                };
                player.destroy();
                if let Some(engine) = engine.upgrade() {
                    engine
                        .state
                        .borrow_mut()
                        .players
                        .retain(|p| !Rc::ptr_eq(p, &player));
                }
            }));
            player.play();
        }

        Ok(root_players)
    }

    fn skip_with_styles(
        &self,
        player: &Rc<TransitionAnimationPlayer>,
        element: ElementId,
        instruction: &TransitionInstruction,
    ) {
        let (driver, from_styles) = (self.driver.clone(), instruction.from_styles.clone());
        player.on_start(Rc::new(move || erase_styles(driver.as_ref(), element, &from_styles)));
        let (driver, to_styles) = (self.driver.clone(), instruction.to_styles.clone());
        player.on_destroy(Rc::new(move || set_styles(driver.as_ref(), element, &to_styles)));
    }

    fn get_previous_players(
        &self,
        element: ElementId,
        is_queried_element: bool,
        namespace_id: Option<&str>,
        trigger_name: Option<&str>,
        to_state: Option<&StateValue>,
    ) -> Vec<Rc<TransitionAnimationPlayer>> {
        let st = self.state.borrow();
        let mut players: Vec<_> = if is_queried_element {
            st.players_by_queried_element
                .get(&element)
                .cloned()
                .unwrap_or_default()
        } else {
            let is_removal = to_state.is_none_or(StateValue::is_void);
            st.players_by_element
                .get(&element)
                .map(|players| {
                    players
                        .iter()
                        .filter(|p| !p.is_queued())
                        .filter(|p| is_removal || Some(p.trigger_name.as_str()) == trigger_name)
                        .cloned()
                        .collect()
                })
                .unwrap_or_default()
        };
        if namespace_id.is_some() || trigger_name.is_some() {
            players.retain(|p| {
                namespace_id.is_none_or(|id| id == p.namespace_id)
                    && trigger_name.is_none_or(|name| name == p.trigger_name)
            });
        }
        players
    }

    /// 销毁将被取代的播放器，并记下它们以便新播放器接手样式快照
    fn before_animation_build(
        &self,
        namespace_id: &str,
        instruction: &TransitionInstruction,
        all_previous_players: &mut HashMap<ElementId, Vec<Rc<TransitionAnimationPlayer>>>,
    ) {
        let root = instruction.element;
        // 离场动画会收集并销毁元素上的全部播放器（不限命名空间）
        let (target_namespace, target_trigger) = if instruction.is_removal_transition {
            (None, None)
        } else {
            (Some(namespace_id), Some(instruction.trigger_name.as_str()))
        };

        for timeline in &instruction.timelines {
            let element = timeline.element;
            let previous = self.get_previous_players(
                element,
                element != root,
                target_namespace,
                target_trigger,
                Some(&instruction.to_state),
            );
            let collected = all_previous_players.entry(element).or_default();
            for player in previous {
                player.real_player().before_destroy();
                player.destroy();
                collected.push(player);
            }
        }

        // 清掉起始样式，之后才能正确计算 ! / * 的值
        erase_styles(self.driver.as_ref(), root, &instruction.from_styles);
    }

    fn build_animation(
        &self,
        namespace_id: &str,
        instruction: &TransitionInstruction,
        all_previous_players: &HashMap<ElementId, Vec<Rc<TransitionAnimationPlayer>>>,
        skipped_players_map: &mut HashMap<ElementId, Vec<Rc<dyn AnimationPlayer>>>,
        pre_styles_map: &HashMap<ElementId, StyleMap>,
        post_styles_map: &HashMap<ElementId, StyleMap>,
    ) -> Rc<dyn AnimationPlayer> {
        let root = instruction.element;
        let mut queried_players = Vec::new();
        let mut consumed_elements = Vec::new();
        let mut sub_elements = Vec::new();
        let mut new_players = Vec::new();

        for timeline in &instruction.timelines {
            let element = timeline.element;
            push_unique(&mut consumed_elements, element);

            let previous_real: Vec<Rc<dyn AnimationPlayer>> = all_previous_players
                .get(&element)
                .map(|players| players.iter().map(|p| p.real_player()).collect())
                .unwrap_or_default();
            let previous_players: Vec<_> = flatten_group_players(&previous_real)
                .into_iter()
                .filter(|p| p.element() == Some(element))
                .collect();

            let mut errors = Vec::new();
            let keyframes = normalize_keyframes(
                self.normalizer.as_ref(),
                &timeline.keyframes,
                pre_styles_map.get(&element),
                post_styles_map.get(&element),
                &mut errors,
            );
            if !errors.is_empty() {
                warn!(
                    trigger = %instruction.trigger_name,
                    element = %element,
                    errors = %AnimationErrors::from(errors),
                    "关键帧归一化产生错误"
                );
            }
            let player = self.build_player(timeline, keyframes, &previous_players);

            // 属于子触发器的播放器：子触发器的事件要跟随它
            if timeline.sub_timeline {
                push_unique(&mut sub_elements, element);
            }
            if element != root {
                let wrapped =
                    TransitionAnimationPlayer::new(namespace_id, &instruction.trigger_name, element, &self.microtasks);
                wrapped.set_real_player(player.clone());
                queried_players.push(wrapped);
            }
            new_players.push(player);
        }

        for queried in queried_players {
            let element = queried.element;
            self.state
                .borrow_mut()
                .players_by_queried_element
                .entry(element)
                .or_default()
                .push(queried.clone());
            let engine = self.this.clone();
            let weak_player = Rc::downgrade(&queried);
            queried.on_done(Rc::new(move || {
                let Some(engine) = engine.upgrade() else {
                    return;
                };
                let mut st = engine.state.borrow_mut();
                if let Some(players) = st.players_by_queried_element.get_mut(&element) {
                    players.retain(|p| !same_player(p, &weak_player));
                    if players.is_empty() {
                        st.players_by_queried_element.remove(&element);
                    }
                }
            }));
        }

        for element in &consumed_elements {
            self.driver.add_class(*element, NG_ANIMATING_CLASSNAME);
        }
        let player = optimize_group_player(new_players, &self.microtasks);
        let driver = self.driver.clone();
        let to_styles = instruction.to_styles.clone();
        player.on_destroy(Rc::new(move || {
            for element in &consumed_elements {
                driver.remove_class(*element, NG_ANIMATING_CLASSNAME);
            }
            set_styles(driver.as_ref(), root, &to_styles);
        }));

        for element in sub_elements {
            skipped_players_map.entry(element).or_default().push(player.clone());
        }
        player
    }

    fn build_player(
        &self,
        timeline: &TimelineInstruction,
        keyframes: Vec<StyleMap>,
        previous_players: &[Rc<dyn AnimationPlayer>],
    ) -> Rc<dyn AnimationPlayer> {
        if self.config.noop {
            return NoopAnimationPlayer::new(0.0, 0.0, &self.microtasks);
        }
        if keyframes.is_empty() {
            // 空动画没有渲染的必要
            return NoopAnimationPlayer::new(timeline.duration, timeline.delay, &self.microtasks);
        }
        self.driver.animate(
            timeline.element,
            keyframes,
            timeline.duration,
            timeline.delay,
            timeline.easing.as_deref(),
            previous_players,
        )
    }
}

/// 把元素的 `*` 属性并入 `!` 属性
fn replace_post_styles_as_pre(
    element: ElementId,
    all_pre: &mut ElementStyleProps,
    all_post: &mut ElementStyleProps,
) -> bool {
    let Some(post) = all_post.remove(&element) else {
        return false;
    };
    all_pre.entry(element).or_default().extend(post);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    use crate::driver::RenderSurface;
    use crate::dsl::{animate, build_trigger_ast, query, state, style, transition, trigger, TriggerMetadata};
    use crate::style::NoopStyleNormalizer;
    use crate::testing::{AnimationLog, MockAnimationDriver, MockDom};
    use crate::trigger::build_trigger;

    struct Fixture {
        dom: Rc<MockDom>,
        log: AnimationLog,
        queue: MicrotaskQueue,
        engine: Rc<TransitionAnimationEngine>,
        host: ElementId,
    }

    impl Fixture {
        fn new() -> Self {
            let dom = Rc::new(MockDom::new());
            let log = AnimationLog::new();
            let driver = Rc::new(MockAnimationDriver::with_log(dom.clone(), log.clone()));
            let queue = MicrotaskQueue::new();
            let engine = TransitionAnimationEngine::new(
                driver,
                Rc::new(NoopStyleNormalizer),
                &queue,
                EngineConfig::default(),
            );
            let host = dom.create_element("div", dom.body());
            engine.register("ns", host);
            Self {
                dom,
                log,
                queue,
                engine,
                host,
            }
        }

        fn register(&self, metadata: TriggerMetadata) {
            let mut errors = Vec::new();
            let mut warnings = Vec::new();
            let ast = build_trigger_ast(None, &metadata, &mut errors, &mut warnings);
            assert!(errors.is_empty(), "{:?}", errors);
            let compiled = build_trigger(&metadata.name, ast, Rc::new(NoopStyleNormalizer));
            self.engine
                .register_trigger("ns", &metadata.name, Rc::new(compiled))
                .expect("register trigger");
        }

        fn child(&self) -> ElementId {
            self.dom.create_element("div", self.host)
        }
    }

    fn fade_in() -> TriggerMetadata {
        trigger(
            "fade",
            vec![
                state("on", style(StyleMap::new().with("opacity", "1"))),
                transition("* => on", animate(1000, style(StyleMap::new().with("opacity", "1")))),
                transition("* => void", animate(500, style(StyleMap::new().with("opacity", "0")))),
            ],
        )
    }

    fn recorder() -> (Rc<RefCell<Vec<AnimationEvent>>>, EventCallback) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = seen.clone();
        (seen, Rc::new(move |e: AnimationEvent| s.borrow_mut().push(e)))
    }

    #[test]
    fn test_trigger_builds_and_plays_on_flush() {
        let f = Fixture::new();
        f.register(fade_in());
        let el = f.child();

        assert!(f.engine.trigger("ns", el, "fade", "on".into()).expect("trigger"));
        assert_eq!(f.engine.queued_players().len(), 1);
        assert!(f.dom.has_class_name(el, QUEUED_CLASSNAME));
        assert!(f.dom.has_class_name(el, NG_TRIGGER_CLASSNAME));

        f.engine.flush(1).expect("flush");
        assert_eq!(f.log.len(), 1);
        let player = f.log.last().expect("player");
        assert_eq!(player.duration, 1000.0);
        assert!(player.has_started());
        assert!(!f.dom.has_class_name(el, QUEUED_CLASSNAME));
        assert!(f.dom.has_class_name(el, NG_ANIMATING_CLASSNAME));
        assert_eq!(f.engine.players().len(), 1);

        player.finish();
        assert!(f.engine.players().is_empty());
        assert!(!f.dom.has_class_name(el, NG_ANIMATING_CLASSNAME));
        assert_eq!(f.dom.get_style(el, "opacity"), Some(StyleValue::from("1")));
    }

    #[test]
    fn test_unknown_namespace_is_not_an_error() {
        let f = Fixture::new();
        let el = f.child();
        assert!(!f.engine.trigger("other", el, "fade", "on".into()).expect("trigger"));
    }

    #[test]
    fn test_fallback_applies_state_styles_without_animating() {
        let f = Fixture::new();
        f.register(trigger(
            "size",
            vec![state("big", style(StyleMap::new().with("height", "100px")))],
        ));
        let el = f.child();

        f.engine.trigger("ns", el, "size", "big".into()).expect("trigger");
        assert!(!f.dom.has_class_name(el, QUEUED_CLASSNAME));
        f.engine.flush(1).expect("flush");

        assert!(f.log.is_empty());
        assert_eq!(f.dom.get_style(el, "height"), Some(StyleValue::from("100px")));
    }

    #[test]
    fn test_same_value_does_not_queue() {
        let f = Fixture::new();
        f.register(fade_in());
        let el = f.child();
        f.engine.trigger("ns", el, "fade", "on".into()).expect("trigger");
        f.engine.trigger("ns", el, "fade", "on".into()).expect("trigger");
        assert_eq!(f.engine.queued_players().len(), 1);
    }

    #[test]
    fn test_listeners_receive_start_and_done() {
        let f = Fixture::new();
        f.register(fade_in());
        let el = f.child();
        let (seen, callback) = recorder();
        let _start = f
            .engine
            .listen("ns", el, "fade", Some("start"), callback.clone())
            .expect("listen");
        let _done = f.engine.listen("ns", el, "fade", Some("done"), callback).expect("listen");

        f.engine.trigger("ns", el, "fade", "on".into()).expect("trigger");
        f.engine.flush(7).expect("flush");
        f.log.last().expect("player").finish();

        let seen = seen.borrow();
        let phases: Vec<_> = seen.iter().map(|e| e.phase_name.as_str()).collect();
        assert_eq!(phases, ["start", "done"]);
        assert!(seen[0].from_state.is_void());
        assert_eq!(seen[1].to_state, StateValue::from("on"));
        assert_eq!(seen[1].total_time, 1000.0);
        assert_eq!(seen[1].microtask_id, Some(7));
    }

    #[test]
    fn test_listen_validates_phase_and_trigger() {
        let f = Fixture::new();
        f.register(fade_in());
        let el = f.child();
        let (_, callback) = recorder();

        assert!(matches!(
            f.engine.listen("ns", el, "fade", None, callback.clone()),
            Err(EngineError::MissingEventPhase { .. })
        ));
        assert!(matches!(
            f.engine.listen("ns", el, "fade", Some("jump"), callback.clone()),
            Err(EngineError::UnsupportedEventPhase { .. })
        ));
        assert!(matches!(
            f.engine.listen("ns", el, "nope", Some("done"), callback.clone()),
            Err(EngineError::MissingTrigger { .. })
        ));
        assert!(matches!(
            f.engine.listen("missing", el, "fade", Some("done"), callback),
            Err(EngineError::MissingNamespace { .. })
        ));
    }

    #[test]
    fn test_leave_animation_defers_removal() {
        let f = Fixture::new();
        f.register(fade_in());
        let el = f.child();
        let removed = Rc::new(RefCell::new(Vec::new()));
        let r = removed.clone();
        f.engine.set_removal_handler(Rc::new(move |el| r.borrow_mut().push(el)));

        f.engine.trigger("ns", el, "fade", "on".into()).expect("trigger");
        f.engine.flush(1).expect("flush");
        f.log.drain().into_iter().for_each(|p| p.finish());

        f.engine.remove_node(Some("ns"), el);
        f.engine.flush(2).expect("flush");
        assert!(removed.borrow().is_empty());
        let leave = f.log.last().expect("leave player");
        assert_eq!(leave.duration, 500.0);

        leave.finish();
        assert_eq!(*removed.borrow(), vec![el]);
    }

    #[test]
    fn test_removal_without_animation_is_immediate() {
        let f = Fixture::new();
        f.register(fade_in());
        let el = f.child();
        let removed = Rc::new(RefCell::new(Vec::new()));
        let r = removed.clone();
        f.engine.set_removal_handler(Rc::new(move |el| r.borrow_mut().push(el)));

        f.engine.remove_node(Some("ns"), el);
        assert_eq!(*removed.borrow(), vec![el]);
    }

    #[test]
    fn test_disabled_element_reports_disabled_events() {
        let f = Fixture::new();
        f.register(fade_in());
        let el = f.child();
        let (seen, callback) = recorder();
        let _done = f.engine.listen("ns", el, "fade", Some("done"), callback).expect("listen");

        f.engine.mark_element_as_disabled(el, true);
        assert!(f.dom.has_class_name(el, DISABLED_CLASSNAME));
        f.engine.trigger("ns", el, "fade", "on".into()).expect("trigger");
        f.engine.flush(1).expect("flush");

        assert!(f.log.is_empty());
        let seen = seen.borrow();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].disabled);
        assert_eq!(seen[0].total_time, 1000.0);
        assert_eq!(f.dom.get_style(el, "opacity"), Some(StyleValue::from("1")));
    }

    #[test]
    fn test_build_errors_fail_the_flush_but_finish_it() {
        let f = Fixture::new();
        f.register(trigger(
            "broken",
            vec![transition(
                "* => on",
                query(".missing", animate(100, style(StyleMap::new().with("opacity", "0")))),
            )],
        ));
        let el = f.child();
        let flushed = Rc::new(Cell::new(false));
        let flag = flushed.clone();
        f.engine.after_flush(move || flag.set(true));

        f.engine.trigger("ns", el, "broken", "on".into()).expect("trigger");
        let err = f.engine.flush(1).expect_err("query error");
        assert!(matches!(err, EngineError::TransitionsFailed(ref errors) if !errors.is_empty()));
        assert!(flushed.get());
        assert!(f.log.is_empty());
        assert!(f.engine.queued_players().is_empty());
    }

    #[test]
    fn test_destroy_namespace_after_flush() {
        let f = Fixture::new();
        f.register(fade_in());
        assert_eq!(f.engine.total_animations(), 1);

        f.engine.destroy("ns");
        assert!(f.engine.has_namespace("ns"));
        f.engine.flush(1).expect("flush");
        assert!(!f.engine.has_namespace("ns"));
        assert_eq!(f.engine.total_animations(), 0);
    }

    #[test]
    fn test_nested_hosts_are_ordered_parent_first() {
        let f = Fixture::new();
        let inner_host = f.child();
        f.engine.register("inner", inner_host);
        let outer = f.dom.create_element("section", f.dom.body());
        f.engine.register("outer", outer);
        assert_eq!(f.engine.namespace_ids(), vec!["outer", "ns", "inner"]);
    }

    #[test]
    fn test_when_rendering_done_waits_for_players() {
        let f = Fixture::new();
        f.register(fade_in());
        let el = f.child();
        assert!(f.engine.when_rendering_done().is_done());

        f.engine.trigger("ns", el, "fade", "on".into()).expect("trigger");
        f.engine.flush(1).expect("flush");
        let done = f.engine.when_rendering_done();
        assert!(!done.is_done());

        f.log.last().expect("player").finish();
        f.queue.run_until_idle();
        assert!(done.is_done());
    }
}
