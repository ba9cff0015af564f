//! 单线程微任务队列
//!
//! 播放器的异步完成、监听回调的批量派发都通过它延后到“下一个 tick”。
//! 宿主（或测试）负责在合适的时机调用 [`MicrotaskQueue::run_until_idle`]。

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

type Microtask = Box<dyn FnOnce()>;

/// 微任务队列（克隆共享同一队列）
#[derive(Clone, Default)]
pub struct MicrotaskQueue {
    tasks: Rc<RefCell<VecDeque<Microtask>>>,
}

impl MicrotaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一个微任务
    pub fn schedule(&self, task: impl FnOnce() + 'static) {
        self.tasks.borrow_mut().push_back(Box::new(task));
    }

    /// 待执行的微任务数量
    pub fn pending(&self) -> usize {
        self.tasks.borrow().len()
    }

    /// 执行微任务直到队列为空（包括执行过程中新加入的），返回执行数量
    pub fn run_until_idle(&self) -> usize {
        let mut count = 0;
        loop {
            // 先弹出再执行，任务内部可以继续 schedule
            let task = self.tasks.borrow_mut().pop_front();
            match task {
                Some(task) => {
                    task();
                    count += 1;
                }
                None => break,
            }
        }
        count
    }
}

impl fmt::Debug for MicrotaskQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MicrotaskQueue")
            .field("pending", &self.pending())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_runs_nested_tasks_in_order() {
        let queue = MicrotaskQueue::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        let (q, l) = (queue.clone(), log.clone());
        queue.schedule(move || {
            l.borrow_mut().push(1);
            let l2 = l.clone();
            q.schedule(move || l2.borrow_mut().push(3));
        });
        let l = log.clone();
        queue.schedule(move || l.borrow_mut().push(2));

        assert_eq!(queue.run_until_idle(), 3);
        assert_eq!(*log.borrow(), vec![1, 2, 3]);
        assert_eq!(queue.pending(), 0);
    }

    #[test]
    fn test_idle_queue() {
        let queue = MicrotaskQueue::new();
        let hit = Rc::new(Cell::new(false));
        assert_eq!(queue.run_until_idle(), 0);
        let h = hit.clone();
        queue.schedule(move || h.set(true));
        assert!(!hit.get());
        queue.run_until_idle();
        assert!(hit.get());
    }
}
