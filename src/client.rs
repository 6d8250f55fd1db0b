//! Request/response client.

use std::net::SocketAddr;

use bytes::Bytes;
use tokio::sync::Mutex;
use tracing::{debug, info};

use rudp_core::Session;

use crate::config::RudpConfig;
use crate::connection::Connection;
use crate::endpoint::Endpoint;
use crate::error::{ConnectionError, Result, RudpError};
use crate::http::{ConnectionPreference, Method, Request, Response};
use crate::transport::{Transport, UdpTransport};

/// Sends requests to one server, reconnecting after a closed exchange.
pub struct Client<T: Transport = UdpTransport> {
    endpoint: Endpoint<T>,
    server: T::Addr,
    host: String,
    connection: Mutex<Option<Connection<T>>>,
}

impl Client<UdpTransport> {
    /// Bind an ephemeral local port in the server's address family.
    pub async fn bind(server: SocketAddr, config: RudpConfig) -> Result<Self> {
        let local: SocketAddr = if server.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };
        let endpoint = Endpoint::bind(local, config).await?;
        Ok(Self::new(endpoint, server))
    }
}

impl<T: Transport> Client<T> {
    pub fn new(endpoint: Endpoint<T>, server: T::Addr) -> Self {
        Self {
            endpoint,
            server,
            host: "localhost".to_string(),
            connection: Mutex::new(None),
        }
    }

    /// Value of the `Host` header on built requests
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn endpoint(&self) -> &Endpoint<T> {
        &self.endpoint
    }

    /// Handshake with the server unless already connected.
    pub async fn connect(&self) -> Result<()> {
        let mut slot = self.connection.lock().await;
        if slot.is_none() {
            *slot = Some(self.endpoint.connect(&self.server).await?);
        }
        Ok(())
    }

    /// Session of the current connection, if any
    pub async fn session(&self) -> Option<Session> {
        match self.connection.lock().await.as_ref() {
            Some(connection) => Some(connection.session().await),
            None => None,
        }
    }

    pub async fn is_connected(&self) -> bool {
        self.connection.lock().await.is_some()
    }

    pub async fn get(&self, path: &str, keep_alive: bool) -> Result<Response> {
        self.send_request(Method::Get, path, Bytes::new(), keep_alive)
            .await
    }

    pub async fn post(
        &self,
        path: &str,
        body: impl Into<Bytes>,
        keep_alive: bool,
    ) -> Result<Response> {
        self.send_request(Method::Post, path, body.into(), keep_alive)
            .await
    }

    /// Build a request with `Host`, `Connection`, and `Content-Length`
    /// headers and send it.
    pub async fn send_request(
        &self,
        method: Method,
        path: &str,
        body: Bytes,
        keep_alive: bool,
    ) -> Result<Response> {
        let preference = if keep_alive {
            ConnectionPreference::KeepAlive
        } else {
            ConnectionPreference::Close
        };
        let request = Request::new(method, path)
            .header("Host", self.host.clone())
            .header("Connection", preference.as_str())
            .header("Content-Length", body.len().to_string())
            .body(body);
        self.request(&request).await
    }

    /// Send `request` reliably and wait for the reliably delivered response.
    ///
    /// Connects first if needed. The connection is dropped after the
    /// exchange when either side asked to close, or on any failure.
    pub async fn request(&self, request: &Request) -> Result<Response> {
        let mut slot = self.connection.lock().await;
        if slot.is_none() {
            *slot = Some(self.endpoint.connect(&self.server).await?);
        }
        let Some(connection) = slot.as_ref() else {
            return Err(RudpError::connection(ConnectionError::NotEstablished));
        };

        debug!(
            server = %self.server,
            method = %request.method,
            path = %request.path,
            "sending request"
        );
        match self.exchange(connection, request).await {
            Ok(response) => {
                info!(server = %self.server, status = response.status, "response received");
                let closing = request.connection() == ConnectionPreference::Close
                    || response.connection() == ConnectionPreference::Close;
                if closing {
                    connection.close().await;
                    *slot = None;
                }
                Ok(response)
            }
            Err(e) => {
                connection.close().await;
                *slot = None;
                Err(e)
            }
        }
    }

    async fn exchange(&self, connection: &Connection<T>, request: &Request) -> Result<Response> {
        connection.send_reliable(request.encode()).await?;
        let payload = connection
            .receive_timeout(self.endpoint.config().response_timeout)
            .await?;
        Ok(Response::decode(payload)?)
    }

    /// Drop the current connection, if any.
    pub async fn close(&self) {
        if let Some(connection) = self.connection.lock().await.take() {
            connection.close().await;
        }
    }
}
