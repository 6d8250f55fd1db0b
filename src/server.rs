//! Request/response server over reliable connections.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::connection::Connection;
use crate::endpoint::Endpoint;
use crate::error::Result;
use crate::http::{ConnectionPreference, Method, Request, Response};
use crate::transport::Transport;

/// Turns a decoded request into a response.
pub trait Handler: Send + Sync + 'static {
    fn handle(&self, request: &Request) -> Response;
}

impl<F> Handler for F
where
    F: Fn(&Request) -> Response + Send + Sync + 'static,
{
    fn handle(&self, request: &Request) -> Response {
        self(request)
    }
}

/// GET echoes the path, POST echoes the body, everything else is refused.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultHandler;

impl Handler for DefaultHandler {
    fn handle(&self, request: &Request) -> Response {
        match request.method {
            Method::Get => Response::ok(format!("You requested {}", request.path)),
            Method::Post => {
                let body = String::from_utf8_lossy(&request.body);
                info!(path = %request.path, body = %body, "POST received");
                Response::ok(format!("Received POST data: {body}"))
            }
            _ => Response::method_not_allowed(),
        }
    }
}

/// Accepts connections on an [`Endpoint`] and serves each on its own task.
pub struct Server<T: Transport, H: Handler = DefaultHandler> {
    endpoint: Arc<Endpoint<T>>,
    handler: Arc<H>,
}

impl<T: Transport> Server<T, DefaultHandler> {
    pub fn new(endpoint: Endpoint<T>) -> Self {
        Self::with_handler(endpoint, DefaultHandler)
    }
}

impl<T: Transport, H: Handler> Server<T, H> {
    pub fn with_handler(endpoint: Endpoint<T>, handler: H) -> Self {
        Self {
            endpoint: Arc::new(endpoint),
            handler: Arc::new(handler),
        }
    }

    pub fn endpoint(&self) -> &Arc<Endpoint<T>> {
        &self.endpoint
    }

    /// Accept forever. Each handshake runs on its own task, so a peer that
    /// goes silent after its SYN never delays other peers. Failed handshakes
    /// are logged and skipped; returns only if the endpoint stops.
    pub async fn run(&self) -> Result<()> {
        info!(addr = %self.endpoint.local_addr(), "server listening");
        loop {
            let incoming = self.endpoint.next_syn().await?;
            let shared = self.endpoint.shared().clone();
            let handler = self.handler.clone();
            tokio::spawn(async move {
                let peer = incoming.peer.clone();
                match shared.accept_syn(incoming).await {
                    Ok(connection) => serve_connection(connection, handler).await,
                    Err(e) => debug!(peer = %peer, error = %e, "handshake failed"),
                }
            });
        }
    }

    /// Run the accept loop on a background task.
    pub fn spawn(self) -> (Arc<Endpoint<T>>, JoinHandle<Result<()>>) {
        let endpoint = self.endpoint.clone();
        let task = tokio::spawn(async move { self.run().await });
        (endpoint, task)
    }
}

async fn serve_connection<T: Transport, H: Handler>(
    connection: Connection<T>,
    handler: Arc<H>,
) {
    let peer = connection.peer().clone();
    loop {
        let payload = match connection.receive_and_ack().await {
            Ok(payload) => payload,
            Err(e) if e.is_closed() => {
                debug!(peer = %peer, "connection gone, stopping");
                return;
            }
            Err(e) => {
                warn!(peer = %peer, error = %e, "receive failed");
                break;
            }
        };

        let (response, preference) = match Request::decode(payload) {
            Ok(request) => {
                info!(
                    peer = %peer,
                    method = %request.method,
                    path = %request.path,
                    "request"
                );
                let requested = request.connection();
                if requested == ConnectionPreference::KeepAlive {
                    connection.keep_alive().await;
                }
                let response = handler.handle(&request);
                finish_headers(response, requested)
            }
            Err(e) => {
                warn!(peer = %peer, error = %e, "unparsable request");
                (Response::bad_request(e.to_string()), ConnectionPreference::Close)
            }
        };

        if preference == ConnectionPreference::Close {
            connection.mark_closing().await;
        }
        if let Err(e) = connection.send_reliable(response.encode()).await {
            warn!(peer = %peer, error = %e, "response not delivered");
            break;
        }
        if preference == ConnectionPreference::Close {
            break;
        }
    }
    connection.close().await;
}

/// Mirror the request's connection preference unless the handler already
/// chose one; returns the preference in effect.
fn finish_headers(
    response: Response,
    requested: ConnectionPreference,
) -> (Response, ConnectionPreference) {
    if response.headers.contains("Connection") {
        let preference = response.connection();
        return (response, preference);
    }
    (response.header("Connection", requested.as_str()), requested)
}
