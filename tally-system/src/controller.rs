use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

/// Determines how to shut down the process.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ShutdownMode {
    /// Shut down gracefully within the configured timeout.
    ///
    /// Services stop accepting new work and finish what is in flight.
    Graceful,
    /// Shut down immediately without finishing pending work.
    Immediate,
}

/// Shutdown request broadcast by the [`Controller`] to all [`ShutdownHandle`]s.
///
/// A service has to ensure that it doesn't take longer than `timeout` to stop. Ideally, work in
/// flight is finished in an orderly manner but no new work is started anymore. After the timeout
/// the process exits regardless of what the services do.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Shutdown {
    /// The timeout for this shutdown. `None` indicates an immediate forced shutdown.
    pub timeout: Option<Duration>,
}

/// Notifies a service about an upcoming shutdown.
///
/// Obtained from [`Controller::shutdown_handle`]. The handle can be cloned freely and moved into
/// spawned services.
#[derive(Clone, Debug)]
pub struct ShutdownHandle(watch::Receiver<Option<Shutdown>>);

impl ShutdownHandle {
    /// Returns the current shutdown state.
    pub fn get(&self) -> Option<Shutdown> {
        *self.0.borrow()
    }

    /// Returns `true` once a shutdown has been requested.
    pub fn is_shutting_down(&self) -> bool {
        self.get().is_some()
    }

    /// Wait for a shutdown.
    ///
    /// This receives all shutdown signals since the [`Controller`] has been created. If a
    /// shutdown has already been requested, this resolves immediately. If the controller is gone
    /// without ever requesting a shutdown, this never resolves.
    pub async fn notified(&mut self) -> Shutdown {
        let state = match self.0.wait_for(Option::is_some).await {
            Ok(state) => *state,
            Err(_) => None,
        };

        match state {
            Some(shutdown) => shutdown,
            None => std::future::pending().await,
        }
    }
}

/// Service to start and gracefully stop the system.
///
/// The controller hands out [`ShutdownHandle`]s to services and broadcasts a [`Shutdown`] once
/// [`shutdown`](Self::shutdown) is called or a termination signal reaches the process.
///
/// ### Example
///
/// ```
/// use std::time::Duration;
/// use tally_system::{Controller, ShutdownMode};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let controller = Controller::new(Duration::from_secs(10));
/// let mut handle = controller.shutdown_handle();
///
/// controller.shutdown(ShutdownMode::Graceful);
/// let shutdown = handle.notified().await;
/// assert_eq!(shutdown.timeout, Some(Duration::from_secs(10)));
/// # }
/// ```
#[derive(Clone)]
pub struct Controller {
    /// Configured timeout for graceful shutdowns.
    timeout: Duration,
    sender: Arc<watch::Sender<Option<Shutdown>>>,
}

impl Controller {
    /// Creates a new controller with the given graceful shutdown timeout.
    pub fn new(shutdown_timeout: Duration) -> Self {
        let (sender, _) = watch::channel(None);

        Self {
            timeout: shutdown_timeout,
            sender: Arc::new(sender),
        }
    }

    /// Returns the configured timeout for graceful shutdowns.
    pub fn shutdown_timeout(&self) -> Duration {
        self.timeout
    }

    /// Returns a handle to receive the shutdown signal.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle(self.sender.subscribe())
    }

    /// Manually initiates the shutdown process of the system.
    ///
    /// Subsequent calls after the first shutdown have no effect.
    pub fn shutdown(&self, mode: ShutdownMode) {
        let timeout = match mode {
            ShutdownMode::Graceful => Some(self.timeout),
            ShutdownMode::Immediate => None,
        };

        self.sender.send_if_modified(|state| {
            if state.is_some() {
                return false;
            }
            *state = Some(Shutdown { timeout });
            true
        });
    }

    /// Waits for a termination signal and initiates the shutdown.
    ///
    /// `SIGINT` and `SIGTERM` shut down gracefully, `SIGQUIT` immediately. Resolves once a
    /// shutdown has been requested, also if it was requested through [`shutdown`](Self::shutdown).
    pub async fn run_until_signal(&self) {
        let mut handle = self.shutdown_handle();

        tokio::select! {
            mode = wait_for_signal() => {
                self.shutdown(mode);
            }
            _ = handle.notified() => {}
        }
    }
}

impl fmt::Debug for Controller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Controller")
            .field("timeout", &self.timeout)
            .field("shutdown", &*self.sender.borrow())
            .finish()
    }
}

#[cfg(unix)]
async fn wait_for_signal() -> ShutdownMode {
    use tokio::signal::unix::{SignalKind, signal};

    let (Ok(mut sig_int), Ok(mut sig_quit), Ok(mut sig_term)) = (
        signal(SignalKind::interrupt()),
        signal(SignalKind::quit()),
        signal(SignalKind::terminate()),
    ) else {
        tally_log::error!("failed to register signal handlers");
        return std::future::pending().await;
    };

    tokio::select! {
        biased;

        Some(()) = sig_int.recv() => {
            tally_log::info!("SIGINT received, stopping gracefully");
            ShutdownMode::Graceful
        }
        Some(()) = sig_quit.recv() => {
            tally_log::info!("SIGQUIT received, exiting");
            ShutdownMode::Immediate
        }
        Some(()) = sig_term.recv() => {
            tally_log::info!("SIGTERM received, stopping gracefully");
            ShutdownMode::Graceful
        }
        else => std::future::pending().await,
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> ShutdownMode {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tally_log::info!("ctrl-c received, stopping gracefully");
            ShutdownMode::Graceful
        }
        Err(error) => {
            tally_log::error!(
                error = &error as &dyn std::error::Error,
                "failed to listen for ctrl-c"
            );
            std::future::pending().await
        }
    }
}
