//! Request dispatch for the magnet protocol.
//!
//! [`ProtocolEngine::send_request`] is the single entry point. It never
//! returns an error: refused connections, dead streams, timeouts and
//! malformed replies all come back as a [`Status`].

use crate::session::{HostEntry, HostRegistry, Upsert};
use crate::transport::stream::is_refusal;
use crate::transport::{
    content, Connection, Content, GetResponse, HeadResponse, Header, HeaderFields, Method, Status,
    StatusResponse, TransportHandle,
};
use crate::utils::{MagnetConfig, MagnetError, NetworkError, ProtocolError, Result};
use std::sync::Arc;
use std::time::Duration;

/// Sends requests to peers and records successful handshakes
pub struct ProtocolEngine {
    registry: Arc<HostRegistry>,
    user_agent: String,
    request_timeout: Duration,
}

impl ProtocolEngine {
    /// Create an engine configured from `config`
    pub fn new(registry: Arc<HostRegistry>, config: &MagnetConfig) -> Self {
        Self::with_settings(
            registry,
            config.protocol.user_agent.clone(),
            config.discovery.probe_timeout(),
        )
    }

    /// Create an engine with explicit settings
    pub fn with_settings(
        registry: Arc<HostRegistry>,
        user_agent: impl Into<String>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            user_agent: user_agent.into(),
            request_timeout,
        }
    }

    /// Registry that successful handshakes are written to
    pub fn registry(&self) -> &Arc<HostRegistry> {
        &self.registry
    }

    /// Send one request to `host:port`.
    ///
    /// * `HEAD` handshakes over `transport`, or dials first when there is none.
    /// * `GET` fetches `route` over `transport`.
    /// * `CONNECT` always dials, then handshakes over the new stream.
    ///
    /// Any other method yields `(503, "Bad Gateway")` without touching the
    /// stream.
    pub async fn send_request(
        &self,
        transport: Option<TransportHandle>,
        host: &str,
        port: u16,
        method: &str,
        route: &str,
        hostname: Option<&str>,
    ) -> Status {
        let fields = HeaderFields {
            route: Some(route.to_string()),
            hostname: hostname.map(str::to_string),
            ..HeaderFields::default()
        };
        self.dispatch(transport, host, port, method, fields).await.0
    }

    /// Like [`send_request`](Self::send_request), with full header control,
    /// also returning the content of a successful GET
    pub async fn dispatch(
        &self,
        transport: Option<TransportHandle>,
        host: &str,
        port: u16,
        method: &str,
        fields: HeaderFields,
    ) -> (Status, Option<Content>) {
        let method = match method.parse::<Method>() {
            Ok(method @ (Method::Head | Method::Get | Method::Connect)) => method,
            Ok(other) => {
                log::debug!("{} is not dispatched", other);
                return (Status::BAD_GATEWAY, None);
            }
            Err(e) => {
                log::debug!("{}", e);
                return (Status::BAD_GATEWAY, None);
            }
        };

        let header = Header::new(method, host, port, &self.user_agent, fields);
        let request = self.route(transport, header);

        match tokio::time::timeout(self.request_timeout, request).await {
            Ok(outcome) => outcome,
            Err(_) => (self.timed_out(method, host, port), None),
        }
    }

    /// Dial `host:port` and handshake, returning the new stream on success.
    ///
    /// The stream is returned even when the peer reports an address other
    /// than `host`.
    pub async fn open(&self, host: &str, port: u16) -> (Status, Option<TransportHandle>) {
        let header = Header::new(
            Method::Connect,
            host,
            port,
            &self.user_agent,
            HeaderFields::default(),
        );

        match tokio::time::timeout(self.request_timeout, self.connect(header)).await {
            Ok(outcome) => outcome,
            Err(_) => (self.timed_out(Method::Connect, host, port), None),
        }
    }

    fn timed_out(&self, method: Method, host: &str, port: u16) -> Status {
        let error = NetworkError::Timeout {
            operation: format!("{method} {host}:{port} after {:?}", self.request_timeout),
        };
        log::debug!("{}", error);
        Status::BAD_GATEWAY
    }

    /// GET `route` from the peer registered as `hostname`
    pub async fn fetch(&self, hostname: &str, route: &str) -> (Status, Option<Content>) {
        let Some(entry) = self.registry.get(hostname).await else {
            log::debug!("{}", NetworkError::PeerNotFound {
                hostname: hostname.to_string()
            });
            return (Status::NOT_FOUND, None);
        };

        let fields = HeaderFields {
            route: Some(route.to_string()),
            ..HeaderFields::default()
        };
        self.dispatch(Some(entry.transport), &entry.address, entry.port, "GET", fields)
            .await
    }

    async fn route(
        &self,
        transport: Option<TransportHandle>,
        header: Header,
    ) -> (Status, Option<Content>) {
        match (header.method, transport) {
            (Method::Head, Some(transport)) => (self.head(transport, &header).await, None),
            (Method::Head | Method::Connect, _) => (self.connect(header).await.0, None),
            (Method::Get, Some(transport)) => self.get(&transport, &header).await,
            (Method::Get, None) => (Status::BAD_GATEWAY, None),
            (Method::Put | Method::Post, _) => (Status::BAD_GATEWAY, None),
        }
    }

    /// Dial the header's host, then handshake over the new stream
    async fn connect(&self, header: Header) -> (Status, Option<TransportHandle>) {
        let (address, port) = match header.target() {
            Ok(target) => target,
            Err(e) => {
                log::debug!("{}", e);
                return (Status::NOT_FOUND, None);
            }
        };

        let connection = match Connection::connect(&address, port).await {
            Ok(connection) => connection,
            Err(e) if is_refusal(&e) => {
                log::trace!("{}", e);
                return (Status::NOT_FOUND, None);
            }
            Err(e) => {
                log::debug!("{}", e);
                return (Status::BAD_GATEWAY, None);
            }
        };

        let handshake = Header {
            method: Method::Head,
            route: "/".to_string(),
            ..header
        };
        let transport = TransportHandle::new(connection);
        let status = self.head(transport.clone(), &handshake).await;
        let opened = status.is_ok().then_some(transport);
        (status, opened)
    }

    async fn head(&self, transport: TransportHandle, header: &Header) -> Status {
        let reply = match exchange(&transport, header).await {
            Ok(reply) => reply,
            Err(e) if is_write_failure(&e) => {
                log::debug!("HEAD {}: {}", header.host, e);
                return Status::BAD_GATEWAY;
            }
            Err(e) => return unanswered(header, &e),
        };

        // Failure replies may carry nothing but the status.
        let status = match serde_json::from_str::<StatusResponse>(&reply) {
            Ok(StatusResponse { status }) => status,
            Err(e) => return unanswered(header, &e.into()),
        };
        if !status.is_ok() {
            return status;
        }

        let response = match serde_json::from_str::<HeadResponse>(&reply) {
            Ok(response) => response,
            Err(e) => return unanswered(header, &e.into()),
        };

        let entry = HostEntry::new(response.hostname, response.host, response.port, transport);
        let name = entry.hostname.clone();
        let address = entry.socket_address();
        if self.registry.upsert(entry).await == Upsert::Inserted {
            log::info!(
                "Registered peer {} at {}",
                name.as_deref().unwrap_or("<unnamed>"),
                address
            );
        }

        Status::OK
    }

    async fn get(&self, transport: &TransportHandle, header: &Header) -> (Status, Option<Content>) {
        let response = match exchange(transport, header).await {
            Ok(reply) => serde_json::from_str::<GetResponse>(&reply).map_err(MagnetError::from),
            Err(e) => Err(e),
        };

        match response {
            Ok(response) => {
                if let Some(content_type) = &response.content_type {
                    if !content::is_known(content_type) {
                        log::warn!("{} sent unrecognised content-type {}", header.host, content_type);
                    }
                }
                let status = response.status.clone();
                let content = status.is_ok().then(|| Content::from(response));
                (status, content)
            }
            Err(e) => {
                log::debug!("GET {}{}: {}", header.host, header.route, e);
                (Status::BAD_GATEWAY, None)
            }
        }
    }
}

/// Write `header` and read a non-empty reply
async fn exchange(transport: &TransportHandle, header: &Header) -> Result<String> {
    let request = header.to_wire()?;
    let reply = transport.lock().await.exchange(&request).await?;
    if reply.trim().is_empty() {
        return Err(ProtocolError::EmptyResponse.into());
    }
    Ok(reply)
}

/// Log a handshake that produced no usable reply
fn unanswered(header: &Header, error: &MagnetError) -> Status {
    if error.is_recoverable() {
        log::trace!("HEAD {}: {}", header.host, error);
    } else {
        log::debug!("HEAD {}: {}", header.host, error);
    }
    Status::NOT_FOUND
}

fn is_write_failure(error: &MagnetError) -> bool {
    matches!(error, MagnetError::Network(NetworkError::Transport { .. }))
}
