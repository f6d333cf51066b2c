//! What the session manager needs to know about an incoming request.

use std::net::SocketAddr;

use http::{Extensions, HeaderMap, Uri, header};

/// Peer address of the client, inserted into request extensions by the host.
///
/// It may hold a forwarded list such as `"203.0.113.7, 10.0.0.1"`; only the first entry is used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientAddr(pub String);

impl From<SocketAddr> for ClientAddr {
    fn from(addr: SocketAddr) -> Self {
        Self(addr.to_string())
    }
}

pub trait ClientRequest {
    fn header(&self, name: &str) -> Option<&str>;

    /// The raw remote-peer string, if the host made one available.
    fn remote_addr(&self) -> Option<String>;

    fn host(&self) -> Option<String> {
        self.header(header::HOST.as_str()).map(str::to_owned)
    }

    /// Client identity used as the session id prefix.
    fn client_identity(&self) -> String {
        self.remote_addr()
            .as_deref()
            .map(normalize_identity)
            .unwrap_or_default()
    }
}

/// Keep the first entry of a forwarded list and drop the port of a socket address.
pub fn normalize_identity(raw: &str) -> String {
    let first = raw.split(',').next().unwrap_or_default().trim();

    match first.parse::<SocketAddr>() {
        Ok(addr) => addr.ip().to_string(),
        Err(_) => first.to_owned(),
    }
}

fn remote_addr(headers: &HeaderMap, extensions: &Extensions) -> Option<String> {
    if let Some(ClientAddr(addr)) = extensions.get::<ClientAddr>() {
        return Some(addr.clone());
    }
    if let Some(addr) = extensions.get::<SocketAddr>() {
        return Some(addr.to_string());
    }
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
}

fn host(headers: &HeaderMap, uri: &Uri) -> Option<String> {
    headers
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
        .or_else(|| uri.authority().map(|authority| authority.as_str().to_owned()))
}

impl<B> ClientRequest for http::Request<B> {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers().get(name).and_then(|value| value.to_str().ok())
    }

    fn remote_addr(&self) -> Option<String> {
        remote_addr(self.headers(), self.extensions())
    }

    fn host(&self) -> Option<String> {
        host(self.headers(), self.uri())
    }
}

impl ClientRequest for http::request::Parts {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    fn remote_addr(&self) -> Option<String> {
        remote_addr(&self.headers, &self.extensions)
    }

    fn host(&self) -> Option<String> {
        host(&self.headers, &self.uri)
    }
}
