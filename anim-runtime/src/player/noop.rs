use std::rc::{Rc, Weak};

use crate::scheduler::MicrotaskQueue;

use super::{AnimationPlayer, PlayerCallback, PlayerCore, PlayerPhase, PlayerState};

/// 不做任何渲染的播放器
///
/// `play()` 之后在下一个微任务中自动完成。用作禁用动画、空组合、
/// 以及排队中的过渡播放器的占位实现。
pub struct NoopAnimationPlayer {
    core: PlayerCore,
    microtasks: MicrotaskQueue,
    this: Weak<NoopAnimationPlayer>,
}

impl NoopAnimationPlayer {
    pub fn new(duration: f64, delay: f64, microtasks: &MicrotaskQueue) -> Rc<Self> {
        Rc::new_cyclic(|this| Self {
            core: PlayerCore::new(duration + delay),
            microtasks: microtasks.clone(),
            this: this.clone(),
        })
    }
}

impl AnimationPlayer for NoopAnimationPlayer {
    fn on_start(&self, callback: PlayerCallback) {
        self.core.register(PlayerPhase::Start, callback);
    }

    fn on_done(&self, callback: PlayerCallback) {
        self.core.register(PlayerPhase::Done, callback);
    }

    fn on_destroy(&self, callback: PlayerCallback) {
        self.core.register(PlayerPhase::Destroy, callback);
    }

    fn init(&self) {
        self.core.init();
    }

    fn has_started(&self) -> bool {
        self.core.has_started()
    }

    fn play(&self) {
        if self.core.play() {
            let this = self.this.clone();
            self.microtasks.schedule(move || {
                if let Some(player) = this.upgrade() {
                    player.finish();
                }
            });
        }
    }

    fn pause(&self) {}

    fn restart(&self) {}

    fn finish(&self) {
        self.core.finish();
    }

    fn destroy(&self) {
        self.core.destroy();
    }

    fn reset(&self) {
        self.core.reset();
    }

    fn set_position(&self, position: f64) {
        self.core.set_position(position);
    }

    fn get_position(&self) -> f64 {
        self.core.get_position()
    }

    fn total_time(&self) -> f64 {
        self.core.total_time()
    }

    fn state(&self) -> PlayerState {
        self.core.state()
    }

    fn parent_player(&self) -> Option<Rc<dyn AnimationPlayer>> {
        self.core.parent_player()
    }

    fn set_parent_player(&self, parent: Option<&Rc<dyn AnimationPlayer>>) {
        self.core.set_parent_player(parent);
    }

    fn trigger_callback(&self, phase: PlayerPhase) {
        self.core.trigger(phase);
    }
}
