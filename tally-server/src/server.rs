use std::net::{SocketAddr, TcpListener};

use axum::Router;
use tally_log::LogError;
use tally_system::{Service, ShutdownHandle};

/// Indicates the type of failure of the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Binding failed.
    #[error("bind to interface failed")]
    BindFailed(#[from] std::io::Error),
}

/// HTTP server service.
///
/// Serves the [routes](crate::routes) until a shutdown is requested. On a graceful shutdown the
/// server stops accepting connections and finishes requests in flight.
pub struct HttpServer {
    listener: TcpListener,
    app: Router,
    shutdown: ShutdownHandle,
}

impl HttpServer {
    /// Binds the listening socket. Fails if the address is in use.
    pub fn bind(
        addr: SocketAddr,
        app: Router,
        shutdown: ShutdownHandle,
    ) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;

        Ok(Self {
            listener,
            app,
            shutdown,
        })
    }

    /// Returns the address the server is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }
}

impl Service for HttpServer {
    async fn run(self) {
        let Self {
            listener,
            app,
            mut shutdown,
        } = self;

        let listener = match tokio::net::TcpListener::from_std(listener) {
            Ok(listener) => listener,
            Err(error) => {
                tally_log::error!("failed to register listener: {}", LogError(&error));
                return;
            }
        };

        if let Ok(addr) = listener.local_addr() {
            tally_log::info!("spawning http server");
            tally_log::info!("  listening on http://{addr}/");
        }

        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown.notified().await;
                tally_log::info!("shutting down HTTP server");
            })
            .await;

        if let Err(error) = result {
            tally_log::error!("http server failed: {}", LogError(&error));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tally_system::{Controller, ShutdownMode, SystemClock};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;
    use crate::{MemorySink, ServiceState, routes};

    #[tokio::test]
    async fn test_serves_until_shutdown() {
        let controller = Controller::new(Duration::from_secs(1));
        let app = routes(ServiceState::new(MemorySink::new(), SystemClock, 8));

        let server = HttpServer::bind(
            "127.0.0.1:0".parse().unwrap(),
            app,
            controller.shutdown_handle(),
        )
        .unwrap();
        let addr = server.local_addr().unwrap();
        let handle = server.start();

        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /healthz HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        assert!(response.starts_with("HTTP/1.1 200 OK"), "{response}");
        assert!(response.ends_with(r#"{"is_healthy":true}"#), "{response}");

        controller.shutdown(ShutdownMode::Graceful);
        handle.await.unwrap();
    }
}
