//! HTTP server implementation.

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use hyper::body::Incoming;
use hyper::Request;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::net::TcpListener;
use tracing::{info, warn};

use super::service::RateLimitService;
use crate::error::Result;

/// Pause after a failed accept, e.g. when the process is out of descriptors.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// HTTP server fronted by the rate limiter.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    /// Request handler
    service: Arc<RateLimitService>,
}

impl HttpServer {
    /// Create a new HTTP server.
    pub fn new(addr: SocketAddr, service: Arc<RateLimitService>) -> Self {
        Self { addr, service }
    }

    /// Bind the configured address and serve until `signal` resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let listener = TcpListener::bind(self.addr).await?;
        self.serve_listener(listener, signal).await
    }

    /// Serve connections from an already bound listener until `signal` resolves.
    ///
    /// Connections accepted before the signal are left to finish on their own.
    pub async fn serve_listener<F>(self, listener: TcpListener, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let builder = ConnBuilder::new(TokioExecutor::new());
        tokio::pin!(signal);

        info!(addr = %listener.local_addr()?, "Starting HTTP server (h1/h2)");

        loop {
            tokio::select! {
                _ = &mut signal => {
                    info!("Shutdown signal received, no longer accepting connections");
                    break;
                }
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(conn) => conn,
                        Err(e) => {
                            warn!(error = %e, "accept error");
                            tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                            continue;
                        }
                    };

                    let service = Arc::clone(&self.service);
                    let builder = builder.clone();

                    tokio::spawn(async move {
                        let svc = hyper::service::service_fn(move |req: Request<Incoming>| {
                            let service = Arc::clone(&service);
                            async move { Ok::<_, Infallible>(service.handle(req, peer).await) }
                        });

                        if let Err(e) = builder.serve_connection(TokioIo::new(stream), svc).await {
                            warn!(?peer, error = %e, "serve_connection error");
                        }
                    });
                }
            }
        }

        Ok(())
    }
}
