//! 过渡代理播放器
//!
//! 过渡在 `trigger()` 时就需要一个可以注册回调的播放器，但真实播放器要到
//! flush 编译完时间轴后才存在。代理先包一个 noop 播放器并记下所有回调，
//! 绑定真实播放器时再把回调转挂过去。

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use crate::driver::ElementId;
use crate::player::{AnimationPlayer, NoopAnimationPlayer, PlayerCallback, PlayerPhase, PlayerState};
use crate::scheduler::MicrotaskQueue;

use super::event::{AnimationEvent, EventCallback};

pub struct TransitionAnimationPlayer {
    pub namespace_id: String,
    pub trigger_name: String,
    pub element: ElementId,
    player: RefCell<Rc<dyn AnimationPlayer>>,
    contains_real_player: Cell<bool>,
    queued_callbacks: RefCell<Vec<(PlayerPhase, PlayerCallback)>>,
    parent: RefCell<Option<Rc<dyn AnimationPlayer>>>,
    destroyed: Cell<bool>,
    marked_for_destroy: Cell<bool>,
    disabled: Cell<bool>,
    queued: Cell<bool>,
    total_time: Cell<f64>,
    this: Weak<TransitionAnimationPlayer>,
}

impl TransitionAnimationPlayer {
    pub fn new(namespace_id: &str, trigger_name: &str, element: ElementId, microtasks: &MicrotaskQueue) -> Rc<Self> {
        let placeholder: Rc<dyn AnimationPlayer> = NoopAnimationPlayer::new(0.0, 0.0, microtasks);
        Rc::new_cyclic(|this| Self {
            namespace_id: namespace_id.to_string(),
            trigger_name: trigger_name.to_string(),
            element,
            player: RefCell::new(placeholder),
            contains_real_player: Cell::new(false),
            queued_callbacks: RefCell::new(Vec::new()),
            parent: RefCell::new(None),
            destroyed: Cell::new(false),
            marked_for_destroy: Cell::new(false),
            disabled: Cell::new(false),
            queued: Cell::new(true),
            total_time: Cell::new(0.0),
            this: this.clone(),
        })
    }

    /// 绑定真实播放器（只生效一次）
    pub fn set_real_player(&self, player: Rc<dyn AnimationPlayer>) {
        if self.contains_real_player.get() {
            return;
        }
        *self.player.borrow_mut() = player.clone();
        let queued = std::mem::take(&mut *self.queued_callbacks.borrow_mut());
        for (phase, callback) in queued {
            match phase {
                PlayerPhase::Start => player.on_start(callback),
                PlayerPhase::Done => player.on_done(callback),
                PlayerPhase::Destroy => player.on_destroy(callback),
            }
        }
        self.contains_real_player.set(true);
        self.total_time.set(player.total_time());
        self.queued.set(false);
    }

    pub fn real_player(&self) -> Rc<dyn AnimationPlayer> {
        self.player.borrow().clone()
    }

    pub fn override_total_time(&self, total_time: f64) {
        self.total_time.set(total_time);
    }

    /// 跟随另一个播放器：它开始时转发开始回调，完成/销毁时同步完成/销毁
    pub fn sync_player_events(self: &Rc<Self>, player: &Rc<dyn AnimationPlayer>) {
        let inner = self.real_player();
        player.on_start(Rc::new(move || inner.trigger_callback(PlayerPhase::Start)));
        let this = self.clone();
        player.on_done(Rc::new(move || this.finish()));
        let this = self.clone();
        player.on_destroy(Rc::new(move || this.destroy()));
    }

    pub fn is_queued(&self) -> bool {
        self.queued.get()
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.get()
    }

    pub fn is_marked_for_destroy(&self) -> bool {
        self.marked_for_destroy.get()
    }

    pub fn mark_for_destroy(&self) {
        self.marked_for_destroy.set(true);
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled.get()
    }

    pub fn set_disabled(&self, disabled: bool) {
        self.disabled.set(disabled);
    }

    fn queue_event(&self, phase: PlayerPhase, callback: &PlayerCallback) {
        if self.queued.get() {
            self.queued_callbacks.borrow_mut().push((phase, callback.clone()));
        }
    }
}

impl AnimationPlayer for TransitionAnimationPlayer {
    fn on_start(&self, callback: PlayerCallback) {
        self.queue_event(PlayerPhase::Start, &callback);
        self.real_player().on_start(callback);
    }

    fn on_done(&self, callback: PlayerCallback) {
        self.queue_event(PlayerPhase::Done, &callback);
        self.real_player().on_done(callback);
    }

    fn on_destroy(&self, callback: PlayerCallback) {
        self.queue_event(PlayerPhase::Destroy, &callback);
        self.real_player().on_destroy(callback);
    }

    fn init(&self) {
        self.real_player().init();
    }

    fn has_started(&self) -> bool {
        !self.queued.get() && self.real_player().has_started()
    }

    fn play(&self) {
        if !self.queued.get() {
            self.real_player().play();
        }
    }

    fn pause(&self) {
        if !self.queued.get() {
            self.real_player().pause();
        }
    }

    fn restart(&self) {
        if !self.queued.get() {
            self.real_player().restart();
        }
    }

    fn finish(&self) {
        self.real_player().finish();
    }

    fn destroy(&self) {
        self.destroyed.set(true);
        // 占位播放器已经触发过这些回调，不再转挂
        self.queued_callbacks.borrow_mut().clear();
        self.real_player().destroy();
        // 跟随关系到此为止
        self.parent.borrow_mut().take();
    }

    fn reset(&self) {
        if !self.queued.get() {
            self.real_player().reset();
        }
    }

    fn set_position(&self, position: f64) {
        if !self.queued.get() {
            self.real_player().set_position(position);
        }
    }

    fn get_position(&self) -> f64 {
        if self.queued.get() {
            0.0
        } else {
            self.real_player().get_position()
        }
    }

    fn total_time(&self) -> f64 {
        self.total_time.get()
    }

    fn state(&self) -> PlayerState {
        if self.destroyed.get() {
            PlayerState::Destroyed
        } else if self.queued.get() {
            PlayerState::Pending
        } else {
            self.real_player().state()
        }
    }

    fn parent_player(&self) -> Option<Rc<dyn AnimationPlayer>> {
        self.parent.borrow().clone()
    }

    fn set_parent_player(&self, parent: Option<&Rc<dyn AnimationPlayer>>) {
        *self.parent.borrow_mut() = parent.cloned();
    }

    fn trigger_callback(&self, phase: PlayerPhase) {
        self.real_player().trigger_callback(phase);
    }

    fn before_destroy(&self) {
        self.real_player().before_destroy();
    }

    fn element(&self) -> Option<ElementId> {
        Some(self.element)
    }

    fn captured_styles(&self) -> crate::style::StyleMap {
        self.real_player().captured_styles()
    }
}

/// 在过渡播放器的某一阶段派发事件
///
/// 时长与禁用标记在触发时读取，因此绑定真实播放器后的值也能反映到事件上。
pub(crate) fn listen_on_player(
    player: &Rc<TransitionAnimationPlayer>,
    phase: PlayerPhase,
    event: AnimationEvent,
    callback: EventCallback,
) {
    let weak = player.this.clone();
    let handler: PlayerCallback = Rc::new(move || {
        let (total_time, disabled) = match weak.upgrade() {
            Some(player) => (player.total_time(), player.is_disabled()),
            None => (event.total_time, event.disabled),
        };
        callback(event.for_phase(phase, total_time, disabled));
    });
    match phase {
        PlayerPhase::Start => player.on_start(handler),
        PlayerPhase::Done => player.on_done(handler),
        PlayerPhase::Destroy => player.on_destroy(handler),
    }
}
