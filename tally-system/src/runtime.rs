use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::task::JoinHandle;

use crate::Service;
use crate::statsd::SystemCounters;

/// Spawns an instrumented task with an automatically generated [`TaskId`].
///
/// Returns a [`JoinHandle`].
#[macro_export]
macro_rules! spawn {
    ($future:expr) => {{
        static _ID: ::std::sync::OnceLock<String> = ::std::sync::OnceLock::new();
        let id = _ID.get_or_init(|| {
            let caller = *::std::panic::Location::caller();
            format!("{}:{}", caller.file(), caller.line())
        });
        $crate::spawn($crate::TaskId::_from_location(id.as_str()), $future)
    }};
}

/// Spawns a new asynchronous task, returning a [`JoinHandle`] for it.
///
/// This is an instrumented variant of Tokio's [`tokio::spawn`] which counts created and
/// terminated tasks per [`TaskId`].
pub fn spawn<F>(task_id: TaskId, future: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    tokio::spawn(Task::new(task_id, future))
}

/// An identifier for tasks spawned by [`spawn()`], used to log metrics.
#[derive(Clone, Copy, Debug)]
pub struct TaskId {
    id: &'static str,
}

impl TaskId {
    /// Create a task ID based on the service's name.
    pub fn for_service<S: Service>() -> Self {
        Self { id: S::name() }
    }

    #[doc(hidden)]
    pub fn _from_location(id: &'static str) -> Self {
        Self { id }
    }

    /// Returns the string representation of this id.
    pub fn as_str(&self) -> &'static str {
        self.id
    }

    fn emit_metric(&self, metric: SystemCounters) {
        tally_statsd::metric!(counter(metric) += 1, id = self.id);
    }
}

pin_project_lite::pin_project! {
    /// Wraps a future and emits related task metrics.
    struct Task<T> {
        id: TaskId,
        #[pin]
        inner: T,
    }

    impl<T> PinnedDrop for Task<T> {
        fn drop(this: Pin<&mut Self>) {
            this.id.emit_metric(SystemCounters::RuntimeTaskTerminated);
        }
    }
}

impl<T> Task<T> {
    fn new(id: TaskId, inner: T) -> Self {
        id.emit_metric(SystemCounters::RuntimeTaskCreated);
        Self { id, inner }
    }
}

impl<T: Future> Future for Task<T> {
    type Output = T::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.project().inner.poll(cx)
    }
}
