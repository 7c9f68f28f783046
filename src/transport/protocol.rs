//! Message protocol definitions and serialization.
//!
//! Every request and every response is a single flat JSON object written in
//! one piece. Requests carry a [`Header`]; responses carry a two-element
//! `status` array plus method-specific fields.

use crate::utils::{ProtocolError, Result};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

/// Timestamp layout used for the `date` header field
pub const DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S %z";

/// Default `accept-ranges` value
pub const ACCEPT_ANY: &str = "*/*";

/// Request methods understood on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    /// Handshake and registration
    Head,
    /// Fetch content at a route
    Get,
    /// Upload content (header only, not dispatched by the engine)
    Put,
    /// Submit content (header only, not dispatched by the engine)
    Post,
    /// Open a connection, then handshake over it
    Connect,
}

impl Method {
    /// Wire name of the method
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Head => "HEAD",
            Self::Get => "GET",
            Self::Put => "PUT",
            Self::Post => "POST",
            Self::Connect => "CONNECT",
        }
    }

    /// Whether the request carries `content*` fields
    pub fn carries_content(&self) -> bool {
        matches!(self, Self::Put | Self::Post)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = ProtocolError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "HEAD" => Ok(Self::Head),
            "GET" => Ok(Self::Get),
            "PUT" => Ok(Self::Put),
            "POST" => Ok(Self::Post),
            "CONNECT" => Ok(Self::Connect),
            other => Err(ProtocolError::UnsupportedMethod {
                method: other.to_string(),
            }),
        }
    }
}

/// A `(code, reason)` pair, serialized as a two-element array.
///
/// Both failure codes carry the reason phrase `"Bad Gateway"` on the wire.
/// Use [`Status::is_unknown_peer`] and [`Status::is_unreachable`] to tell
/// them apart in code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "(u16, String)", into = "(u16, String)")]
pub struct Status {
    /// Numeric status code
    pub code: u16,
    /// Reason phrase
    pub reason: Cow<'static, str>,
}

impl Status {
    /// Request succeeded
    pub const OK: Status = Status {
        code: 200,
        reason: Cow::Borrowed("OK"),
    };

    /// Peer refused, answered garbage, or is not registered
    pub const NOT_FOUND: Status = Status {
        code: 404,
        reason: Cow::Borrowed("Bad Gateway"),
    };

    /// Peer could not be reached, timed out, or the method is unsupported
    pub const BAD_GATEWAY: Status = Status {
        code: 503,
        reason: Cow::Borrowed("Bad Gateway"),
    };

    /// `200`
    pub fn is_ok(&self) -> bool {
        self.code == 200
    }

    /// `404`: the peer did not answer as a recognised magnet peer
    pub fn is_unknown_peer(&self) -> bool {
        self.code == 404
    }

    /// `503`: the peer could not be reached at all
    pub fn is_unreachable(&self) -> bool {
        self.code == 503
    }
}

impl From<(u16, String)> for Status {
    fn from((code, reason): (u16, String)) -> Self {
        Self {
            code,
            reason: Cow::Owned(reason),
        }
    }
}

impl From<Status> for (u16, String) {
    fn from(status: Status) -> Self {
        (status.code, status.reason.into_owned())
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.reason)
    }
}

/// Request header as written on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Header {
    /// Request method
    pub method: Method,
    /// Location of the data on the peer
    pub route: String,
    /// Target as `address:port`
    pub host: String,
    /// Optional display name of the requesting side
    pub hostname: Option<String>,
    /// Client identification
    #[serde(rename = "user-agent")]
    pub user_agent: String,
    /// Accepted media ranges
    #[serde(rename = "accept-ranges")]
    pub accept_ranges: String,
    /// Body, PUT and POST only
    pub content: Option<String>,
    /// Body length, PUT and POST only
    #[serde(rename = "content-length")]
    pub content_length: Option<u64>,
    /// Body media type, PUT and POST only
    #[serde(rename = "content-type")]
    pub content_type: Option<String>,
    /// Request timestamp
    pub date: String,
}

/// Optional header fields supplied by the caller.
///
/// Built either field by field or from `(key, value)` pairs using the wire
/// key names, in which case any key outside the header is rejected.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HeaderFields {
    /// Route, defaults to `/`
    pub route: Option<String>,
    /// Display name of the requesting side
    pub hostname: Option<String>,
    /// User agent override
    pub user_agent: Option<String>,
    /// `accept-ranges` override
    pub accept_ranges: Option<String>,
    /// Body for PUT/POST
    pub content: Option<String>,
    /// Body media type for PUT/POST
    pub content_type: Option<String>,
}

impl HeaderFields {
    /// Build from wire-named pairs, failing on the first unknown key
    pub fn from_pairs<'a, I>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut fields = Self::default();
        for (key, value) in pairs {
            let slot = match key {
                "route" => &mut fields.route,
                "hostname" => &mut fields.hostname,
                "user-agent" => &mut fields.user_agent,
                "accept-ranges" => &mut fields.accept_ranges,
                "content" => &mut fields.content,
                "content-type" => &mut fields.content_type,
                other => {
                    return Err(ProtocolError::UnknownField {
                        field: other.to_string(),
                    }
                    .into())
                }
            };
            *slot = Some(value.to_string());
        }
        Ok(fields)
    }
}

impl Header {
    /// Assemble a request header addressed to `host:port`
    pub fn new(method: Method, host: &str, port: u16, default_agent: &str, fields: HeaderFields) -> Self {
        let (content, content_length, content_type) = if method.carries_content() {
            let length = fields.content.as_ref().map(|c| c.len() as u64);
            (fields.content, length, fields.content_type)
        } else {
            (None, None, None)
        };

        Self {
            method,
            route: fields.route.unwrap_or_else(|| "/".to_string()),
            host: format!("{host}:{port}"),
            hostname: fields.hostname,
            user_agent: fields
                .user_agent
                .unwrap_or_else(|| default_agent.to_string()),
            accept_ranges: fields
                .accept_ranges
                .unwrap_or_else(|| ACCEPT_ANY.to_string()),
            content,
            content_length,
            content_type,
            date: chrono::Local::now().format(DATE_FORMAT).to_string(),
        }
    }

    /// Serialize to the wire text
    pub fn to_wire(&self) -> Result<String> {
        serde_json::to_string(self).map_err(Into::into)
    }

    /// Split the `host` field back into address and port
    pub fn target(&self) -> Result<(String, u16)> {
        parse_host_header(&self.host)
    }
}

/// Parse an `address:port` host field
pub fn parse_host_header(host: &str) -> Result<(String, u16)> {
    let invalid = || ProtocolError::InvalidMessage {
        reason: format!("malformed host field: {host:?}"),
    };

    let (address, port) = host.rsplit_once(':').ok_or_else(invalid)?;
    if address.is_empty() {
        return Err(invalid().into());
    }
    let port = port.parse::<u16>().map_err(|_| invalid())?;
    Ok((address.to_string(), port))
}

/// Response to a HEAD handshake
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeadResponse {
    /// Outcome reported by the peer
    pub status: Status,
    /// Peer's display name
    #[serde(default)]
    pub hostname: Option<String>,
    /// Peer's address
    pub host: String,
    /// Peer's listening port
    pub port: u16,
}

/// Response to a GET
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetResponse {
    /// Outcome reported by the peer
    pub status: Status,
    /// Body
    #[serde(default)]
    pub content: Option<String>,
    /// Body media type
    #[serde(rename = "content-type", default)]
    pub content_type: Option<String>,
    /// Body length
    #[serde(rename = "content-length", default)]
    pub content_length: Option<u64>,
}

/// Response carrying only a status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusResponse {
    /// Outcome reported by the peer
    pub status: Status,
}

/// Content extracted from a successful GET
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Content {
    /// Body
    pub body: Option<String>,
    /// Body media type
    pub content_type: Option<String>,
    /// Body length as announced by the peer
    pub content_length: Option<u64>,
}

impl From<GetResponse> for Content {
    fn from(response: GetResponse) -> Self {
        Self {
            body: response.content,
            content_type: response.content_type,
            content_length: response.content_length,
        }
    }
}
