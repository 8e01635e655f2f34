use std::future::Future;

use tokio::task::JoinHandle;

use crate::{Shutdown, TaskId};

/// A long-running unit of work.
///
/// Services own their state and run until they observe a shutdown through the
/// [`ShutdownHandle`](crate::ShutdownHandle) they were constructed with. Consumers, periodic
/// background loops and the HTTP server are all services.
///
/// ```
/// use tally_system::{Service, ShutdownHandle};
///
/// struct Idle {
///     shutdown: ShutdownHandle,
/// }
///
/// impl Service for Idle {
///     async fn run(mut self) {
///         self.shutdown.notified().await;
///     }
/// }
/// ```
pub trait Service: Sized + Send + 'static {
    /// Returns a unique name for this service implementation.
    ///
    /// This is used for logging and metrics and defaults to the type name.
    fn name() -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Runs the service to completion.
    fn run(self) -> impl Future<Output = ()> + Send + 'static;

    /// Spawns the service on the current runtime.
    fn start(self) -> JoinHandle<()> {
        crate::spawn(TaskId::for_service::<Self>(), self.run())
    }
}

/// A collection of running services that can be awaited together.
#[derive(Debug, Default)]
pub struct ServiceSet {
    handles: Vec<(&'static str, JoinHandle<()>)>,
}

impl ServiceSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a service and adds it to the set.
    pub fn start<S: Service>(&mut self, service: S) {
        tally_log::debug!(service = S::name(), "starting service");
        self.handles.push((S::name(), service.start()));
    }

    /// Returns the number of services in this set.
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Returns `true` if no services have been started.
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Waits for all services to finish, bounded by the shutdown's timeout.
    ///
    /// An immediate shutdown aborts all services. Services that panicked are logged. Returns
    /// `false` if the timeout elapsed before all services finished.
    pub async fn join(self, shutdown: Shutdown) -> bool {
        let Some(timeout) = shutdown.timeout else {
            for (_, handle) in &self.handles {
                handle.abort();
            }
            return true;
        };

        let joined = tokio::time::timeout(timeout, Self::join_all(self.handles)).await;
        if joined.is_err() {
            tally_log::warn!("services did not stop within {}s", timeout.as_secs());
        }
        joined.is_ok()
    }

    async fn join_all(handles: Vec<(&'static str, JoinHandle<()>)>) {
        for (name, handle) in handles {
            if let Err(error) = handle.await {
                tally_log::error!(
                    error = &error as &dyn std::error::Error,
                    service = name,
                    "service terminated abnormally"
                );
            }
        }
    }
}
