//! Peer side of the protocol: answers handshakes and content requests.
//!
//! Each accepted stream stays open and is served until the remote side
//! closes it, since the requesting node keeps the stream in its registry.

use crate::transport::{
    Connection, GetResponse, HeadResponse, Header, Method, Status, StatusResponse,
};
use crate::utils::{MagnetConfig, Result};
use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// A body served at one route
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredContent {
    /// Media type
    pub content_type: String,
    /// Body
    pub body: String,
}

/// Routes served in reply to GET.
///
/// Replies travel as one message, so bodies should stay well below the
/// client's read chunk size.
#[derive(Debug, Clone, Default)]
pub struct ContentStore {
    routes: HashMap<String, StoredContent>,
}

impl ContentStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `body` at `route`
    pub fn insert(&mut self, route: impl Into<String>, content_type: impl Into<String>, body: impl Into<String>) {
        self.routes.insert(
            route.into(),
            StoredContent {
                content_type: content_type.into(),
                body: body.into(),
            },
        );
    }

    /// Content at `route`
    pub fn get(&self, route: &str) -> Option<&StoredContent> {
        self.routes.get(route)
    }
}

/// Pause after a failed accept
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

struct Identity {
    hostname: Option<String>,
    port: u16,
    store: ContentStore,
}

/// TCP listener answering magnet requests
pub struct Responder {
    listener: TcpListener,
    identity: Identity,
}

impl Responder {
    /// Bind `addr`, advertising `hostname` in handshake replies
    pub async fn bind(addr: SocketAddr, hostname: Option<String>) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let port = listener.local_addr()?.port();
        Ok(Self {
            listener,
            identity: Identity {
                hostname,
                port,
                store: ContentStore::new(),
            },
        })
    }

    /// Bind the address and port from `config`, advertising the configured
    /// hostname or else the machine's
    pub async fn from_config(config: &MagnetConfig) -> Result<Self> {
        let addr = SocketAddr::new(config.network.bind_address, config.network.port);
        Self::bind(addr, config.network.advertised_hostname()).await
    }

    /// Serve `store` in reply to GET
    pub fn with_content(mut self, store: ContentStore) -> Self {
        self.identity.store = store;
        self
    }

    /// Bound address
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept and serve connections forever.
    ///
    /// Failed accepts are logged and skipped.
    pub async fn run(self) -> Result<()> {
        let identity = Arc::new(self.identity);
        log::info!(
            "Answering as {} on {}",
            identity.hostname.as_deref().unwrap_or("<unnamed>"),
            self.listener.local_addr()?
        );

        loop {
            let Some((stream, remote, local_ip)) = admit(self.listener.accept().await) else {
                // Back off so descriptor exhaustion does not spin.
                tokio::time::sleep(ACCEPT_BACKOFF).await;
                continue;
            };
            let identity = Arc::clone(&identity);

            tokio::spawn(async move {
                serve(Connection::from_tcp(stream), local_ip, &identity).await;
                log::debug!("Closed {}", remote);
            });
        }
    }

    /// Run on a background task
    pub fn spawn(self) -> JoinHandle<Result<()>> {
        tokio::spawn(self.run())
    }
}

/// Unpack an accepted stream, logging and dropping failed accepts
fn admit(accepted: io::Result<(TcpStream, SocketAddr)>) -> Option<(TcpStream, SocketAddr, IpAddr)> {
    let (stream, remote) = match accepted {
        Ok(accepted) => accepted,
        Err(e) => {
            log::warn!("Accept error: {}", e);
            return None;
        }
    };

    match stream.local_addr() {
        Ok(local) => {
            log::debug!("Accepted {}", remote);
            Some((stream, remote, local.ip()))
        }
        Err(e) => {
            log::warn!("Dropping {}: {}", remote, e);
            None
        }
    }
}

async fn serve(mut connection: Connection, local_ip: IpAddr, identity: &Identity) {
    loop {
        let message = match connection.receive().await {
            Ok(message) if !message.is_empty() => message,
            Ok(_) => return,
            Err(e) => {
                log::debug!("Read from {} failed: {}", connection.peer(), e);
                return;
            }
        };

        let reply = match respond(&message, local_ip, identity) {
            Ok(reply) => reply,
            Err(e) => {
                log::warn!("Cannot encode reply for {}: {}", connection.peer(), e);
                return;
            }
        };

        if !connection.send(&reply).await.is_ok() {
            return;
        }
    }
}

fn respond(message: &str, local_ip: IpAddr, identity: &Identity) -> Result<String> {
    if let Ok(header) = serde_json::from_str::<Header>(message) {
        return match header.method {
            Method::Head => Ok(serde_json::to_string(&HeadResponse {
                status: Status::OK,
                hostname: identity.hostname.clone(),
                host: local_ip.to_string(),
                port: identity.port,
            })?),
            Method::Get => content_reply(&header.route, identity),
            other => {
                log::debug!("Refusing {} request", other);
                status_reply(Status::BAD_GATEWAY)
            }
        };
    }

    // Bare JSON string: a route to GET.
    if let Ok(route) = serde_json::from_str::<String>(message) {
        return content_reply(&route, identity);
    }

    status_reply(Status::BAD_GATEWAY)
}

fn content_reply(route: &str, identity: &Identity) -> Result<String> {
    match identity.store.get(route) {
        Some(stored) => Ok(serde_json::to_string(&GetResponse {
            status: Status::OK,
            content: Some(stored.body.clone()),
            content_type: Some(stored.content_type.clone()),
            content_length: Some(stored.body.len() as u64),
        })?),
        None => status_reply(Status::NOT_FOUND),
    }
}

fn status_reply(status: Status) -> Result<String> {
    Ok(serde_json::to_string(&StatusResponse { status })?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{HostRegistry, ProtocolEngine};
    use crate::transport::{HeaderFields, TransportHandle};

    fn identity() -> Identity {
        let mut store = ContentStore::new();
        store.insert("/motd", "text/plain", "hello");
        Identity {
            hostname: Some("alpha".to_string()),
            port: 2024,
            store,
        }
    }

    fn request(method: Method, route: &str) -> String {
        let fields = HeaderFields {
            route: Some(route.to_string()),
            ..HeaderFields::default()
        };
        Header::new(method, "10.0.0.7", 2024, "magnet/0.0", fields)
            .to_wire()
            .unwrap()
    }

    #[test]
    fn test_head_reply() {
        let reply = respond(&request(Method::Head, "/"), IpAddr::from([10, 0, 0, 7]), &identity()).unwrap();
        let response: HeadResponse = serde_json::from_str(&reply).unwrap();

        assert_eq!(response.status, Status::OK);
        assert_eq!(response.hostname.as_deref(), Some("alpha"));
        assert_eq!(response.host, "10.0.0.7");
        assert_eq!(response.port, 2024);
    }

    #[test]
    fn test_get_reply() {
        let ip = IpAddr::from([10, 0, 0, 7]);
        let found: GetResponse =
            serde_json::from_str(&respond(&request(Method::Get, "/motd"), ip, &identity()).unwrap()).unwrap();
        assert_eq!(found.status, Status::OK);
        assert_eq!(found.content.as_deref(), Some("hello"));
        assert_eq!(found.content_length, Some(5));

        let missing: StatusResponse =
            serde_json::from_str(&respond(&request(Method::Get, "/nope"), ip, &identity()).unwrap()).unwrap();
        assert_eq!(missing.status, Status::NOT_FOUND);
    }

    #[test]
    fn test_bare_route_is_a_get() {
        let reply = respond(r#""/motd""#, IpAddr::from([10, 0, 0, 7]), &identity()).unwrap();
        let response: GetResponse = serde_json::from_str(&reply).unwrap();
        assert_eq!(response.content.as_deref(), Some("hello"));
    }

    #[test]
    fn test_other_requests_refused() {
        let ip = IpAddr::from([10, 0, 0, 7]);
        for message in [request(Method::Put, "/motd"), "garbage".to_string(), r#"{"method":"HEAD"}"#.to_string()] {
            let response: StatusResponse = serde_json::from_str(&respond(&message, ip, &identity()).unwrap()).unwrap();
            assert_eq!(response.status, Status::BAD_GATEWAY);
        }
    }

    #[test]
    fn test_failed_accept_is_skipped() {
        let accepted = Err(io::Error::from_raw_os_error(24));
        assert!(admit(accepted).is_none());

        let aborted = Err(io::Error::new(io::ErrorKind::ConnectionAborted, "aborted"));
        assert!(admit(aborted).is_none());
    }

    #[tokio::test]
    async fn test_responder_survives_dropped_clients() {
        let responder = Responder::bind(SocketAddr::from(([127, 0, 0, 1], 0)), Some("alpha".into()))
            .await
            .unwrap();
        let addr = responder.local_addr().unwrap();
        let task = responder.spawn();

        for _ in 0..3 {
            drop(tokio::net::TcpStream::connect(addr).await.unwrap());
        }

        let engine = ProtocolEngine::with_settings(
            Arc::new(HostRegistry::new()),
            "magnet/0.0",
            Duration::from_secs(2),
        );
        let (status, transport) = engine.open("127.0.0.1", addr.port()).await;
        assert_eq!(status, Status::OK);
        assert!(transport.is_some());
        assert!(!task.is_finished());
    }

    #[tokio::test]
    async fn test_stream_serves_several_requests() {
        let mut store = ContentStore::new();
        store.insert("/motd", "text/plain", "hello");
        let responder = Responder::bind(SocketAddr::from(([127, 0, 0, 1], 0)), Some("alpha".into()))
            .await
            .unwrap()
            .with_content(store);
        let addr = responder.local_addr().unwrap();
        responder.spawn();

        let engine = ProtocolEngine::with_settings(
            Arc::new(HostRegistry::new()),
            "magnet/0.0",
            Duration::from_secs(2),
        );
        let transport = TransportHandle::new(Connection::connect("127.0.0.1", addr.port()).await.unwrap());

        let status = engine
            .send_request(Some(transport), "127.0.0.1", addr.port(), "HEAD", "/", None)
            .await;
        assert_eq!(status, Status::OK);

        let (status, content) = engine.fetch("alpha", "/motd").await;
        assert_eq!(status, Status::OK);
        assert_eq!(content.unwrap().body.as_deref(), Some("hello"));

        let (status, content) = engine.fetch("alpha", "/missing").await;
        assert_eq!(status, Status::NOT_FOUND);
        assert!(content.is_none());

        let fields = HeaderFields::from_pairs([("route", "/motd")]).unwrap();
        let entry = engine.registry().get("alpha").await.unwrap();
        let (status, _) = engine
            .dispatch(Some(entry.transport), "127.0.0.1", addr.port(), "GET", fields)
            .await;
        assert_eq!(status, Status::OK);
    }
}
