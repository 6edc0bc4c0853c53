//! HTTP transport
//!
//! - [`HttpPool`]: picks the owning peer for a key and serves this node's
//!   share of the key space to other peers.
//! - [`HttpGetter`]: fetches a value from one remote peer.
//! - [`api`]: the front-end endpoints clients talk to.
//!
//! All servers share one hyper `http1` accept loop.

pub mod api;
mod client;
mod pool;

pub use client::HttpGetter;
pub use pool::HttpPool;

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;

use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tracing::{debug, info};

use crate::error::{Error, Result};

pub(crate) type HttpResponse = Response<Full<Bytes>>;

/// Bind a listener on `addr` (`host:port`)
pub async fn bind(addr: &str) -> Result<TcpListener> {
    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| Error::Internal(format!("Invalid server address {}: {}", addr, e)))?;

    TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Internal(format!("Failed to bind {}: {}", addr, e)))
}

/// Accept connections forever, answering every request with `handler`
pub(crate) async fn serve<F, Fut>(listener: TcpListener, name: &'static str, handler: F) -> Result<()>
where
    F: Fn(Request<Incoming>) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = HttpResponse> + Send + 'static,
{
    if let Ok(local) = listener.local_addr() {
        info!("{} listening on {}", name, local);
    }

    loop {
        let (stream, remote) = listener
            .accept()
            .await
            .map_err(|e| Error::Internal(format!("{} accept error: {}", name, e)))?;

        let io = TokioIo::new(stream);
        let handler = handler.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req| {
                let fut = handler(req);
                async move { Ok::<_, Infallible>(fut.await) }
            });
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                debug!(%remote, "{} connection error: {}", name, e);
            }
        });
    }
}

pub(crate) fn reply(status: StatusCode, body: impl Into<Bytes>) -> HttpResponse {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
}

pub(crate) fn reply_with_type(
    status: StatusCode,
    content_type: &'static str,
    body: impl Into<Bytes>,
) -> HttpResponse {
    let mut response = reply(status, body);
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}
