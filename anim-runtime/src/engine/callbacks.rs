//! 监听回调的批量派发
//!
//! 每个渲染周期（`begin()`/`end()`）对应一个递增的微任务编号。
//! 事件带着产生它的 flush 编号：编号早于当前周期的立即派发，
//! 否则缓冲到下一个微任务中按入队顺序一起派发。

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::scheduler::MicrotaskQueue;

use super::event::{AnimationEvent, EventCallback};

type Buffered = (EventCallback, AnimationEvent);

pub struct ListenerScheduler {
    microtasks: MicrotaskQueue,
    microtask_id: Rc<Cell<i64>>,
    buffer: Rc<RefCell<Vec<Buffered>>>,
    depth: Cell<u32>,
}

impl ListenerScheduler {
    pub fn new(microtasks: &MicrotaskQueue) -> Self {
        Self {
            microtasks: microtasks.clone(),
            microtask_id: Rc::new(Cell::new(1)),
            buffer: Rc::new(RefCell::new(Vec::new())),
            depth: Cell::new(0),
        }
    }

    /// 当前微任务编号
    pub fn microtask_id(&self) -> i64 {
        self.microtask_id.get()
    }

    /// 派发一条事件
    pub fn schedule(&self, callback: EventCallback, event: AnimationEvent) {
        let count = match event.microtask_id {
            Some(id) if id != 0 => id,
            _ => -1,
        };
        if count >= 0 && count < self.microtask_id.get() {
            callback(event);
            return;
        }

        let first = self.buffer.borrow().is_empty();
        self.buffer.borrow_mut().push((callback, event));
        if first {
            let buffer = self.buffer.clone();
            self.microtasks.schedule(move || {
                let pending = std::mem::take(&mut *buffer.borrow_mut());
                for (callback, event) in pending {
                    callback(event);
                }
            });
        }
    }

    pub fn begin(&self) {
        self.depth.set(self.depth.get() + 1);
    }

    /// 结束一个周期；最外层返回需要 flush 的编号
    pub fn end(&self) -> Option<i64> {
        let depth = self.depth.get().saturating_sub(1);
        self.depth.set(depth);
        if depth > 0 {
            return None;
        }
        let id = self.microtask_id.clone();
        self.microtasks.schedule(move || id.set(id.get() + 1));
        Some(self.microtask_id.get())
    }
}
