//! Single-threaded event loop for engine callbacks.
//!
//! The memory engine never answers a request from inside the call that
//! issued it. Instead it queues a task here, and whoever plays the host
//! drains the queue: tests through [`EventLoop::block_on`], applications by
//! calling [`EventLoop::run_until_idle`] from their own loop.

use futures::task::{waker, ArcWake};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::future::{Future, IntoFuture};
use std::pin::pin;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

type Task = Box<dyn FnOnce()>;

/// A FIFO queue of engine tasks.
///
/// Cloning yields another handle to the same queue.
#[derive(Clone, Default)]
pub struct EventLoop {
    queue: Rc<RefCell<VecDeque<Task>>>,
}

impl EventLoop {
    /// Creates an empty event loop.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a task to run after every task already queued.
    pub fn schedule(&self, task: impl FnOnce() + 'static) {
        self.queue.borrow_mut().push_back(Box::new(task));
    }

    /// Runs the oldest queued task. Returns false if the queue was empty.
    pub fn run_next(&self) -> bool {
        // The borrow must end before the task runs: tasks schedule more tasks.
        let task = self.queue.borrow_mut().pop_front();
        match task {
            Some(task) => {
                task();
                true
            }
            None => false,
        }
    }

    /// Runs tasks until the queue is empty. Returns how many ran.
    pub fn run_until_idle(&self) -> usize {
        let mut ran = 0;
        while self.run_next() {
            ran += 1;
        }
        ran
    }

    /// Number of queued tasks.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue.borrow().len()
    }

    /// Returns true if no task is queued.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.queue.borrow().is_empty()
    }

    /// Drives `future` to completion, running queued tasks whenever it is
    /// waiting. Builders such as an open request are accepted directly.
    ///
    /// The future is only polled again after it has been woken, so a
    /// future that forgets to register its waker stalls instead of
    /// spinning.
    ///
    /// # Panics
    ///
    /// Panics if the future is pending, has not been woken, and no task is
    /// left to wake it.
    pub fn block_on<F: IntoFuture>(&self, future: F) -> F::Output {
        let flag = Arc::new(WakeFlag::default());
        let waker = waker(Arc::clone(&flag));
        let mut cx = Context::from_waker(&waker);
        let mut future = pin!(future.into_future());

        loop {
            if let Poll::Ready(output) = future.as_mut().poll(&mut cx) {
                return output;
            }
            while !flag.take() {
                assert!(
                    self.run_next(),
                    "future stalled: no queued engine task can wake it"
                );
            }
        }
    }
}

impl fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLoop")
            .field("pending", &self.pending())
            .finish()
    }
}

#[derive(Default)]
struct WakeFlag(AtomicBool);

impl WakeFlag {
    fn take(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }
}

impl ArcWake for WakeFlag {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        arc_self.0.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::channel::oneshot;
    use std::cell::Cell;

    #[test]
    fn tasks_run_in_fifo_order() {
        let events = EventLoop::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        for i in 0..3 {
            let log = Rc::clone(&log);
            events.schedule(move || log.borrow_mut().push(i));
        }
        assert_eq!(events.pending(), 3);
        assert_eq!(events.run_until_idle(), 3);
        assert_eq!(*log.borrow(), vec![0, 1, 2]);
        assert!(events.is_idle());
    }

    #[test]
    fn tasks_may_schedule_tasks() {
        let events = EventLoop::new();
        let hits = Rc::new(Cell::new(0));
        let inner = events.clone();
        let counter = Rc::clone(&hits);
        events.schedule(move || {
            counter.set(counter.get() + 1);
            let counter = Rc::clone(&counter);
            inner.schedule(move || counter.set(counter.get() + 1));
        });
        assert_eq!(events.run_until_idle(), 2);
        assert_eq!(hits.get(), 2);
    }

    #[test]
    fn block_on_runs_tasks_until_ready() {
        let events = EventLoop::new();
        let (tx, rx) = oneshot::channel();
        events.schedule(move || {
            let _ = tx.send(42);
        });
        assert_eq!(events.block_on(rx), Ok(42));
    }

    #[test]
    fn block_on_accepts_into_future_builders() {
        struct Deferred(u32);

        impl IntoFuture for Deferred {
            type Output = u32;
            type IntoFuture = std::future::Ready<u32>;

            fn into_future(self) -> Self::IntoFuture {
                std::future::ready(self.0)
            }
        }

        let events = EventLoop::new();
        assert_eq!(events.block_on(Deferred(7)), 7);
    }

    #[test]
    #[should_panic(expected = "future stalled")]
    fn block_on_detects_stalls() {
        let events = EventLoop::new();
        let (_tx, rx) = oneshot::channel::<()>();
        let _ = events.block_on(rx);
    }
}
