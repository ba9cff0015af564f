use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::driver::ElementId;
use crate::player::{AnimationPlayer, PlayerCallback, PlayerCore, PlayerPhase, PlayerState, run_callbacks};
use crate::style::{OFFSET_PROP, SpecialCasedStyles, StyleMap, StyleValue, allow_previous_player_styles_merge};

/// 记录驱动调用参数的播放器
///
/// 与 noop 播放器不同，`play()` 不会自动完成，测试需要显式调用 `finish()`。
pub struct MockAnimationPlayer {
    core: PlayerCore,
    pub element: ElementId,
    pub keyframes: Vec<StyleMap>,
    pub duration: f64,
    pub delay: f64,
    pub easing: Option<String>,
    /// 合并自前一个播放器快照的起始样式
    pub previous_styles: StyleMap,
    current_snapshot: RefCell<StyleMap>,
    on_init: RefCell<Vec<PlayerCallback>>,
    special_styles: Option<SpecialCasedStyles>,
    finished: Cell<bool>,
}

impl MockAnimationPlayer {
    pub fn new(
        element: ElementId,
        keyframes: Vec<StyleMap>,
        duration: f64,
        delay: f64,
        easing: Option<&str>,
        previous_players: &[Rc<dyn AnimationPlayer>],
        special_styles: Option<SpecialCasedStyles>,
    ) -> Self {
        let mut previous_styles = StyleMap::new();
        if allow_previous_player_styles_merge(duration, delay) {
            for player in previous_players {
                previous_styles.merge(&player.captured_styles());
            }
        }
        Self {
            core: PlayerCore::new(duration + delay),
            element,
            keyframes,
            duration,
            delay,
            easing: easing.map(str::to_string),
            previous_styles,
            current_snapshot: RefCell::new(StyleMap::new()),
            on_init: RefCell::new(Vec::new()),
            special_styles,
            finished: Cell::new(false),
        }
    }

    /// `init()` 时执行的钩子
    pub fn on_init(&self, callback: PlayerCallback) {
        self.on_init.borrow_mut().push(callback);
    }

    /// 最近一次 `before_destroy` 捕获的快照
    pub fn current_snapshot(&self) -> StyleMap {
        self.current_snapshot.borrow().clone()
    }

    pub fn is_finished(&self) -> bool {
        self.finished.get()
    }
}

impl AnimationPlayer for MockAnimationPlayer {
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
        let callbacks = std::mem::take(&mut *self.on_init.borrow_mut());
        run_callbacks(callbacks);
    }

    fn has_started(&self) -> bool {
        self.core.has_started()
    }

    fn play(&self) {
        self.core.play();
        if let Some(special) = &self.special_styles {
            special.start();
        }
    }

    fn pause(&self) {}

    fn restart(&self) {}

    fn finish(&self) {
        self.core.finish();
        if let Some(special) = &self.special_styles {
            special.finish();
        }
        self.finished.set(true);
    }

    fn destroy(&self) {
        self.core.destroy();
        if let Some(special) = &self.special_styles {
            special.destroy();
        }
        self.finished.set(true);
    }

    fn reset(&self) {
        self.core.reset();
        self.finished.set(false);
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

    /// 捕获当前样式：已完成取最终值，播放中取 `*`
    fn before_destroy(&self) {
        let mut captures = self.previous_styles.clone();
        if self.has_started() {
            let finished = self.finished.get();
            for keyframe in &self.keyframes {
                for (prop, value) in keyframe.iter() {
                    if prop == OFFSET_PROP {
                        continue;
                    }
                    captures.insert(prop, if finished { value.clone() } else { StyleValue::auto() });
                }
            }
        }
        *self.current_snapshot.borrow_mut() = captures;
    }

    fn element(&self) -> Option<ElementId> {
        Some(self.element)
    }

    fn captured_styles(&self) -> StyleMap {
        self.current_snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frames() -> Vec<StyleMap> {
        vec![
            StyleMap::new().with("opacity", 0).with(OFFSET_PROP, 0),
            StyleMap::new().with("opacity", 1).with(OFFSET_PROP, 1),
        ]
    }

    #[test]
    fn test_snapshot_depends_on_progress() {
        let el = ElementId(1);
        let player = MockAnimationPlayer::new(el, frames(), 1000.0, 0.0, None, &[], None);
        player.before_destroy();
        assert!(player.current_snapshot().is_empty());

        player.play();
        player.before_destroy();
        assert_eq!(player.current_snapshot().get("opacity"), Some(&StyleValue::auto()));
        assert!(!player.current_snapshot().contains(OFFSET_PROP));

        player.finish();
        player.before_destroy();
        assert_eq!(player.current_snapshot().get("opacity"), Some(&StyleValue::from(1)));
    }

    #[test]
    fn test_previous_styles_merge_only_without_delay_conflict() {
        let el = ElementId(1);
        let first: Rc<dyn AnimationPlayer> =
            Rc::new(MockAnimationPlayer::new(el, frames(), 1000.0, 0.0, None, &[], None));
        first.play();
        first.before_destroy();

        let merged = MockAnimationPlayer::new(el, frames(), 500.0, 0.0, None, std::slice::from_ref(&first), None);
        assert_eq!(merged.previous_styles.get("opacity"), Some(&StyleValue::auto()));

        let delayed = MockAnimationPlayer::new(el, frames(), 500.0, 100.0, None, &[first], None);
        assert!(delayed.previous_styles.is_empty());
    }

    #[test]
    fn test_init_hook_and_no_auto_finish() {
        let player = MockAnimationPlayer::new(ElementId(2), vec![], 0.0, 0.0, None, &[], None);
        let hits = Rc::new(Cell::new(0));
        let h = hits.clone();
        player.on_init(Rc::new(move || h.set(h.get() + 1)));
        player.init();
        player.init();
        assert_eq!(hits.get(), 1);

        player.play();
        assert_eq!(player.state(), PlayerState::Started);
        assert!(!player.is_finished());
    }
}
