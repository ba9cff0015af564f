//! # Player 模块
//!
//! 播放器生命周期契约与通用状态机。
//!
//! ## 生命周期
//!
//! ```text
//! Pending ──init()──▶ Initialized ──play()──▶ Started ──finish()──▶ Finished
//!    ▲                                          │                      │
//!    └────────────────── reset() ───────────────┘               destroy()
//!                                                                      ▼
//!                                                                  Destroyed
//! ```
//!
//! 每个阶段的回调列表在触发时先取出再执行（drain），重复调用 `finish()`
//! / `destroy()` 是无操作，因此每个回调在每个阶段至多触发一次。

mod group;
mod noop;

pub use group::AnimationGroupPlayer;
pub use noop::NoopAnimationPlayer;

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use std::str::FromStr;

use crate::driver::ElementId;
use crate::scheduler::MicrotaskQueue;
use crate::style::StyleMap;

/// 播放器回调
pub type PlayerCallback = Rc<dyn Fn()>;

/// 回调阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlayerPhase {
    Start,
    Done,
    Destroy,
}

impl PlayerPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Done => "done",
            Self::Destroy => "destroy",
        }
    }
}

impl fmt::Display for PlayerPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlayerPhase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start" => Ok(Self::Start),
            "done" => Ok(Self::Done),
            "destroy" => Ok(Self::Destroy),
            other => Err(other.to_string()),
        }
    }
}

/// 播放器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlayerState {
    #[default]
    Pending,
    Initialized,
    Started,
    Finished,
    Destroyed,
}

/// 播放器能力接口
///
/// 所有方法都以 `&self` 调用，状态保存在内部可变单元中，
/// 因此播放器可以被 `Rc` 共享并在回调中再次访问。
pub trait AnimationPlayer {
    fn on_start(&self, callback: PlayerCallback);
    fn on_done(&self, callback: PlayerCallback);
    fn on_destroy(&self, callback: PlayerCallback);

    fn init(&self);
    fn has_started(&self) -> bool;
    fn play(&self);
    fn pause(&self);
    fn restart(&self);
    fn finish(&self);
    fn destroy(&self);
    fn reset(&self);

    /// 设置归一化进度 `[0, 1]`
    fn set_position(&self, position: f64);
    fn get_position(&self) -> f64;

    /// 时长 + 延迟
    fn total_time(&self) -> f64;

    fn state(&self) -> PlayerState;

    /// 父播放器（弱引用，仅用于导航）
    fn parent_player(&self) -> Option<Rc<dyn AnimationPlayer>>;
    fn set_parent_player(&self, parent: Option<&Rc<dyn AnimationPlayer>>);

    /// 手动触发某一阶段的回调
    fn trigger_callback(&self, phase: PlayerPhase);

    /// 被新动画取代前调用，用于捕获当前样式快照
    fn before_destroy(&self) {}

    /// 播放器作用的元素（若有）
    fn element(&self) -> Option<ElementId> {
        None
    }

    /// `before_destroy` 捕获的样式快照
    fn captured_styles(&self) -> StyleMap {
        StyleMap::new()
    }

    /// 组合播放器的子播放器
    fn child_players(&self) -> Vec<Rc<dyn AnimationPlayer>> {
        Vec::new()
    }
}

/// 执行一批回调
pub(crate) fn run_callbacks(callbacks: Vec<PlayerCallback>) {
    for callback in callbacks {
        callback();
    }
}

#[derive(Default)]
struct Lifecycle {
    initialized: bool,
    started: bool,
    finished: bool,
    destroyed: bool,
    on_start: Vec<PlayerCallback>,
    on_done: Vec<PlayerCallback>,
    on_destroy: Vec<PlayerCallback>,
    original_on_start: Vec<PlayerCallback>,
    original_on_done: Vec<PlayerCallback>,
}

/// 播放器公共状态机
///
/// 具体播放器组合此结构并在其上扩展自己的行为。
/// 所有回调都在释放内部借用之后执行，回调里可以安全地再次调用播放器。
#[derive(Default)]
pub struct PlayerCore {
    lifecycle: RefCell<Lifecycle>,
    position: Cell<f64>,
    total_time: f64,
    parent: RefCell<Option<Weak<dyn AnimationPlayer>>>,
}

impl PlayerCore {
    pub fn new(total_time: f64) -> Self {
        Self {
            total_time,
            ..Default::default()
        }
    }

    pub fn total_time(&self) -> f64 {
        self.total_time
    }

    pub fn register(&self, phase: PlayerPhase, callback: PlayerCallback) {
        let mut lc = self.lifecycle.borrow_mut();
        match phase {
            PlayerPhase::Start => {
                lc.original_on_start.push(callback.clone());
                lc.on_start.push(callback);
            }
            PlayerPhase::Done => {
                lc.original_on_done.push(callback.clone());
                lc.on_done.push(callback);
            }
            PlayerPhase::Destroy => lc.on_destroy.push(callback),
        }
    }

    pub fn init(&self) {
        self.lifecycle.borrow_mut().initialized = true;
    }

    pub fn has_started(&self) -> bool {
        self.lifecycle.borrow().started
    }

    pub fn is_finished(&self) -> bool {
        self.lifecycle.borrow().finished
    }

    pub fn is_destroyed(&self) -> bool {
        self.lifecycle.borrow().destroyed
    }

    pub fn state(&self) -> PlayerState {
        let lc = self.lifecycle.borrow();
        if lc.destroyed {
            PlayerState::Destroyed
        } else if lc.finished {
            PlayerState::Finished
        } else if lc.started {
            PlayerState::Started
        } else if lc.initialized {
            PlayerState::Initialized
        } else {
            PlayerState::Pending
        }
    }

    /// 开始播放；首次开始时返回 `true`
    pub fn play(&self) -> bool {
        if self.has_started() {
            return false;
        }
        let callbacks = std::mem::take(&mut self.lifecycle.borrow_mut().on_start);
        run_callbacks(callbacks);
        self.lifecycle.borrow_mut().started = true;
        true
    }

    pub fn finish(&self) {
        let callbacks = {
            let mut lc = self.lifecycle.borrow_mut();
            if lc.finished {
                return;
            }
            lc.finished = true;
            std::mem::take(&mut lc.on_done)
        };
        run_callbacks(callbacks);
    }

    /// 销毁：未开始则先触发开始回调，随后完成，最后触发销毁回调
    pub fn destroy(&self) {
        let not_started = {
            let mut lc = self.lifecycle.borrow_mut();
            if lc.destroyed {
                return;
            }
            lc.destroyed = true;
            !lc.started
        };
        if not_started {
            let callbacks = std::mem::take(&mut self.lifecycle.borrow_mut().on_start);
            run_callbacks(callbacks);
        }
        self.finish();
        let callbacks = {
            let mut lc = self.lifecycle.borrow_mut();
            // 销毁后不再可能 reset 重放，释放保留的回调以断开引用环
            lc.original_on_start.clear();
            lc.original_on_done.clear();
            std::mem::take(&mut lc.on_destroy)
        };
        run_callbacks(callbacks);
    }

    /// 回到 Pending，恢复最初注册的开始/完成回调
    pub fn reset(&self) {
        let mut lc = self.lifecycle.borrow_mut();
        lc.initialized = false;
        lc.started = false;
        lc.finished = false;
        lc.on_start = lc.original_on_start.clone();
        lc.on_done = lc.original_on_done.clone();
    }

    pub fn set_position(&self, position: f64) {
        self.position.set(if self.total_time > 0.0 {
            position * self.total_time
        } else {
            1.0
        });
    }

    pub fn get_position(&self) -> f64 {
        if self.total_time > 0.0 {
            self.position.get() / self.total_time
        } else {
            1.0
        }
    }

    pub fn trigger(&self, phase: PlayerPhase) {
        let callbacks = {
            let mut lc = self.lifecycle.borrow_mut();
            match phase {
                PlayerPhase::Start => std::mem::take(&mut lc.on_start),
                _ => std::mem::take(&mut lc.on_done),
            }
        };
        run_callbacks(callbacks);
    }

    pub fn parent_player(&self) -> Option<Rc<dyn AnimationPlayer>> {
        self.parent.borrow().as_ref().and_then(Weak::upgrade)
    }

    pub fn set_parent_player(&self, parent: Option<&Rc<dyn AnimationPlayer>>) {
        *self.parent.borrow_mut() = parent.map(Rc::downgrade);
    }
}

/// 把多个播放器合并为一个：0 个返回 noop，1 个原样返回，否则组合
pub fn optimize_group_player(
    players: Vec<Rc<dyn AnimationPlayer>>,
    microtasks: &MicrotaskQueue,
) -> Rc<dyn AnimationPlayer> {
    match players.len() {
        0 => NoopAnimationPlayer::new(0.0, 0.0, microtasks),
        1 => players.into_iter().next().unwrap_or_else(|| NoopAnimationPlayer::new(0.0, 0.0, microtasks)),
        _ => AnimationGroupPlayer::new(players, microtasks),
    }
}

/// 递归展开组合播放器
pub fn flatten_group_players(players: &[Rc<dyn AnimationPlayer>]) -> Vec<Rc<dyn AnimationPlayer>> {
    let mut out = Vec::new();
    flatten_into(players, &mut out);
    out
}

fn flatten_into(players: &[Rc<dyn AnimationPlayer>], out: &mut Vec<Rc<dyn AnimationPlayer>>) {
    for player in players {
        let children = player.child_players();
        if children.is_empty() {
            out.push(player.clone());
        } else {
            flatten_into(&children, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counter() -> (Rc<Cell<u32>>, PlayerCallback) {
        let count = Rc::new(Cell::new(0));
        let c = count.clone();
        (count, Rc::new(move || c.set(c.get() + 1)))
    }

    #[test]
    fn test_core_state_transitions() {
        let core = PlayerCore::new(100.0);
        assert_eq!(core.state(), PlayerState::Pending);
        core.init();
        assert_eq!(core.state(), PlayerState::Initialized);
        assert!(core.play());
        assert!(!core.play());
        assert_eq!(core.state(), PlayerState::Started);
        core.finish();
        assert_eq!(core.state(), PlayerState::Finished);
        core.destroy();
        assert_eq!(core.state(), PlayerState::Destroyed);
    }

    #[test]
    fn test_core_reset_restores_callbacks() {
        let core = PlayerCore::new(0.0);
        let (done, cb) = counter();
        core.register(PlayerPhase::Done, cb);
        core.finish();
        core.finish();
        assert_eq!(done.get(), 1);

        core.reset();
        assert_eq!(core.state(), PlayerState::Pending);
        core.finish();
        assert_eq!(done.get(), 2);
    }

    #[test]
    fn test_destroy_fires_start_when_not_started() {
        let core = PlayerCore::new(0.0);
        let (start, cb) = counter();
        core.register(PlayerPhase::Start, cb);
        core.destroy();
        assert_eq!(start.get(), 1);
    }

    #[test]
    fn test_phase_parse() {
        assert_eq!("done".parse::<PlayerPhase>(), Ok(PlayerPhase::Done));
        assert!("later".parse::<PlayerPhase>().is_err());
    }

    #[test]
    fn test_optimize_group_player() {
        let queue = MicrotaskQueue::new();
        let single: Rc<dyn AnimationPlayer> = NoopAnimationPlayer::new(10.0, 0.0, &queue);
        let optimized = optimize_group_player(vec![single.clone()], &queue);
        assert!(Rc::ptr_eq(&single, &optimized));

        let a: Rc<dyn AnimationPlayer> = NoopAnimationPlayer::new(10.0, 0.0, &queue);
        let b: Rc<dyn AnimationPlayer> = NoopAnimationPlayer::new(20.0, 0.0, &queue);
        let group = optimize_group_player(vec![a, b], &queue);
        assert_eq!(group.child_players().len(), 2);
        assert_eq!(flatten_group_players(&[group]).len(), 2);
    }
}
