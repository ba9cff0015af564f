use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use crate::scheduler::MicrotaskQueue;

use super::{AnimationPlayer, PlayerCallback, PlayerPhase, PlayerState, run_callbacks};

#[derive(Default)]
struct GroupState {
    started: bool,
    finished: bool,
    destroyed: bool,
    on_start: Vec<PlayerCallback>,
    on_done: Vec<PlayerCallback>,
    on_destroy: Vec<PlayerCallback>,
}

/// 组合播放器
///
/// 把生命周期操作分发给所有子播放器；子播放器全部报告某一阶段后，
/// 组合播放器的该阶段才会触发（计数比较，不重新扫描）。
///
/// 子播放器的回调只持有组合播放器的弱引用。完成之前组合播放器自持一份强引用，
/// 所以只注册 `on_done` 就丢弃的临时组合仍会完成；完成后这份引用释放，
/// 生命周期只由外部持有者决定。
pub struct AnimationGroupPlayer {
    players: Vec<Rc<dyn AnimationPlayer>>,
    state: RefCell<GroupState>,
    total_time: f64,
    parent: RefCell<Option<Weak<dyn AnimationPlayer>>>,
    this: Weak<AnimationGroupPlayer>,
    keep_alive: RefCell<Option<Rc<AnimationGroupPlayer>>>,
}

impl AnimationGroupPlayer {
    pub fn new(players: Vec<Rc<dyn AnimationPlayer>>, microtasks: &MicrotaskQueue) -> Rc<Self> {
        let total_time = players
            .iter()
            .map(|p| p.total_time())
            .fold(0.0, f64::max);
        let group = Rc::new_cyclic(|this| Self {
            players,
            state: RefCell::new(GroupState::default()),
            total_time,
            parent: RefCell::new(None),
            this: this.clone(),
            keep_alive: RefCell::new(None),
        });

        let total = group.players.len();
        if total == 0 {
            // 空组合也要异步完成，保证构造后注册的回调能收到
            let g = group.clone();
            microtasks.schedule(move || g.on_finish());
            return group;
        }
        *group.keep_alive.borrow_mut() = Some(group.clone());

        let done_count = Rc::new(Cell::new(0usize));
        let destroy_count = Rc::new(Cell::new(0usize));
        let start_count = Rc::new(Cell::new(0usize));
        for player in &group.players {
            let (g, count) = (group.this.clone(), done_count.clone());
            player.on_done(Rc::new(move || {
                count.set(count.get() + 1);
                if count.get() == total
                    && let Some(g) = g.upgrade()
                {
                    g.on_finish();
                }
            }));

            let (g, count) = (group.this.clone(), destroy_count.clone());
            player.on_destroy(Rc::new(move || {
                count.set(count.get() + 1);
                if count.get() == total
                    && let Some(g) = g.upgrade()
                {
                    g.on_destroy_all();
                }
            }));

            let (g, count) = (group.this.clone(), start_count.clone());
            player.on_start(Rc::new(move || {
                count.set(count.get() + 1);
                if count.get() == total
                    && let Some(g) = g.upgrade()
                {
                    g.on_start_all();
                }
            }));
        }
        group
    }

    /// 子播放器
    pub fn players(&self) -> &[Rc<dyn AnimationPlayer>] {
        &self.players
    }

    fn on_finish(&self) {
        let callbacks = {
            let mut state = self.state.borrow_mut();
            if state.finished {
                return;
            }
            state.finished = true;
            std::mem::take(&mut state.on_done)
        };
        run_callbacks(callbacks);
        // 调用方总持有另一份强引用，这里释放不会析构自身
        let _released = self.keep_alive.borrow_mut().take();
    }

    fn on_start_all(&self) {
        let callbacks = {
            let mut state = self.state.borrow_mut();
            if state.started {
                return;
            }
            state.started = true;
            std::mem::take(&mut state.on_start)
        };
        run_callbacks(callbacks);
    }

    fn on_destroy_all(&self) {
        {
            let mut state = self.state.borrow_mut();
            if state.destroyed {
                return;
            }
            state.destroyed = true;
        }
        self.on_finish();
        for player in &self.players {
            player.destroy();
        }
        let callbacks = std::mem::take(&mut self.state.borrow_mut().on_destroy);
        run_callbacks(callbacks);
    }
}

impl AnimationPlayer for AnimationGroupPlayer {
    fn on_start(&self, callback: PlayerCallback) {
        self.state.borrow_mut().on_start.push(callback);
    }

    fn on_done(&self, callback: PlayerCallback) {
        self.state.borrow_mut().on_done.push(callback);
    }

    fn on_destroy(&self, callback: PlayerCallback) {
        self.state.borrow_mut().on_destroy.push(callback);
    }

    fn init(&self) {
        for player in &self.players {
            player.init();
        }
    }

    fn has_started(&self) -> bool {
        self.state.borrow().started
    }

    fn play(&self) {
        if self.parent_player().is_none() {
            self.init();
        }
        self.on_start_all();
        for player in &self.players {
            player.play();
        }
    }

    fn pause(&self) {
        for player in &self.players {
            player.pause();
        }
    }

    fn restart(&self) {
        for player in &self.players {
            player.restart();
        }
    }

    fn finish(&self) {
        self.on_finish();
        for player in &self.players {
            player.finish();
        }
    }

    fn destroy(&self) {
        self.on_destroy_all();
    }

    fn reset(&self) {
        for player in &self.players {
            player.reset();
        }
        {
            let mut state = self.state.borrow_mut();
            state.started = false;
            state.finished = false;
            state.destroyed = false;
        }
        if !self.players.is_empty() {
            *self.keep_alive.borrow_mut() = self.this.upgrade();
        }
    }

    fn set_position(&self, position: f64) {
        let time_at_position = position * self.total_time;
        for player in &self.players {
            let child_total = player.total_time();
            let child_position = if child_total > 0.0 {
                (time_at_position / child_total).min(1.0)
            } else {
                1.0
            };
            player.set_position(child_position);
        }
    }

    /// 最长子播放器的进度（时长相同取第一个）；空组合为 0
    fn get_position(&self) -> f64 {
        let mut longest: Option<&Rc<dyn AnimationPlayer>> = None;
        for player in &self.players {
            if longest.is_none_or(|l| player.total_time() > l.total_time()) {
                longest = Some(player);
            }
        }
        longest.map(|p| p.get_position()).unwrap_or(0.0)
    }

    fn total_time(&self) -> f64 {
        self.total_time
    }

    fn state(&self) -> PlayerState {
        let state = self.state.borrow();
        if state.destroyed {
            PlayerState::Destroyed
        } else if state.finished {
            PlayerState::Finished
        } else if state.started {
            PlayerState::Started
        } else {
            PlayerState::Pending
        }
    }

    fn parent_player(&self) -> Option<Rc<dyn AnimationPlayer>> {
        self.parent.borrow().as_ref().and_then(Weak::upgrade)
    }

    fn set_parent_player(&self, parent: Option<&Rc<dyn AnimationPlayer>>) {
        *self.parent.borrow_mut() = parent.map(Rc::downgrade);
    }

    fn trigger_callback(&self, phase: PlayerPhase) {
        let callbacks = {
            let mut state = self.state.borrow_mut();
            match phase {
                PlayerPhase::Start => std::mem::take(&mut state.on_start),
                _ => std::mem::take(&mut state.on_done),
            }
        };
        run_callbacks(callbacks);
    }

    fn before_destroy(&self) {
        for player in &self.players {
            player.before_destroy();
        }
    }

    fn child_players(&self) -> Vec<Rc<dyn AnimationPlayer>> {
        self.players.clone()
    }
}
