//! `when_rendering_done()` 返回的 future

use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

#[derive(Default)]
struct Shared {
    done: bool,
    waker: Option<Waker>,
}

/// 所有当前播放器完成后就绪
///
/// 不依赖任何异步运行时：完成信号来自播放器回调，
/// 宿主既可以 `.await`，也可以轮询 [`RenderingDone::is_done`]。
#[derive(Clone, Default)]
pub struct RenderingDone {
    shared: Rc<RefCell<Shared>>,
}

impl RenderingDone {
    pub(crate) fn pending() -> Self {
        Self::default()
    }

    pub(crate) fn ready() -> Self {
        let done = Self::default();
        done.resolve();
        done
    }

    pub(crate) fn resolve(&self) {
        let waker = {
            let mut shared = self.shared.borrow_mut();
            shared.done = true;
            shared.waker.take()
        };
        if let Some(waker) = waker {
            waker.wake();
        }
    }

    pub fn is_done(&self) -> bool {
        self.shared.borrow().done
    }
}

impl Future for RenderingDone {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let mut shared = self.shared.borrow_mut();
        if shared.done {
            Poll::Ready(())
        } else {
            shared.waker = Some(cx.waker().clone());
            Poll::Pending
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::task::Waker;

    #[test]
    fn test_poll_before_and_after_resolve() {
        let mut done = RenderingDone::pending();
        let waker = Waker::noop();
        let mut cx = Context::from_waker(waker);
        assert_eq!(Pin::new(&mut done).poll(&mut cx), Poll::Pending);

        done.clone().resolve();
        assert!(done.is_done());
        assert_eq!(Pin::new(&mut done).poll(&mut cx), Poll::Ready(()));
        assert!(RenderingDone::ready().is_done());
    }
}
