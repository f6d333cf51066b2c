//! Cookie-bound server-side sessions for `tower`.
//!
//! A [`SessionManager`] hands every client an opaque token in a cookie and keeps the matching
//! [`Session`] in memory. Sessions carry arbitrary serializable values plus one-shot flash
//! messages, decay after a configurable period of inactivity, and can be written through to a
//! durable [`SessionBackend`]:
//!
//! - [`FileStore`]: one file per session (`file-store` feature).
//! - [`SledStore`]: an embedded log with a background cleaner (`sled-store` feature).
//! - [`RedisStore`]: a remote key-value server, connected lazily (`redis-store` feature).
//!
//! Backends give best-effort durability and sharing only. When a backend is unreachable the
//! sessions keep working in memory.
//!
//! # Example
//! ```no_run
//! use cookie_sessions::{Expiry, SessionConfig, SessionManager, SessionManagerLayer};
//!
//! let config = SessionConfig::default()
//!     .with_expiry(Expiry::from_ttl_seconds(2 * 60 * 60))
//!     .with_http_only(true);
//! let layer = SessionManagerLayer::new(SessionManager::new(config));
//! ```

mod config;
mod controller;
mod error;
pub mod backend;
pub mod format;
pub mod layer;
mod manager;
mod request;
mod session;
mod store;
mod value;

pub use tower_cookies::cookie::SameSite;

#[cfg(any(feature = "signed", feature = "private"))]
pub use tower_cookies::Key;

pub use crate::backend::SessionBackend;
pub use crate::config::{
    DEFAULT_COOKIE_NAME, DEFAULT_TOKEN_LENGTH, Expiry, SessionConfig, UNLIMITED_LIFETIME,
    subdomain_cookie_domain,
};
pub use crate::controller::{CookieController, PlaintextCookie};
pub use crate::error::{Error, Result};
pub use crate::layer::SessionManagerLayer;
pub use crate::manager::SessionManager;
pub use crate::request::{ClientAddr, ClientRequest, normalize_identity};
pub use crate::session::Session;
pub use crate::store::SessionStore;
pub use crate::value::{Value, Values};

#[cfg(feature = "signed")]
pub use crate::controller::SignedCookie;

#[cfg(feature = "private")]
pub use crate::controller::PrivateCookie;

#[cfg(feature = "file-store")]
pub use crate::backend::file::FileStore;

#[cfg(feature = "sled-store")]
pub use crate::backend::sled_store::{SledConfig, SledStore};

#[cfg(feature = "redis-store")]
pub use crate::backend::redis_store::{RedisConfig, RedisStore};

#[cfg(test)]
mod tests {
    use std::convert::Infallible;

    use axum::body::Body;
    use http::{Request, Response, header};
    use time::{Duration, OffsetDateTime};
    use tower::{ServiceBuilder, ServiceExt as _};
    use tower_cookies::Cookie;

    use crate::{ClientAddr, Expiry, SessionConfig, SessionManager, SessionManagerLayer, Session};

    async fn handler(req: Request<Body>) -> Result<Response<Body>, Infallible> {
        let session = req
            .extensions()
            .get::<Session>()
            .cloned()
            .expect("request includes Session extension");

        session
            .set("foo", 42)
            .await
            .expect("session insert succeeds");

        Ok(Response::new(Body::from(session.id().to_owned())))
    }

    fn make_layer(config: SessionConfig) -> SessionManagerLayer {
        SessionManagerLayer::new(SessionManager::new(config))
    }

    fn get_session_cookie(res: &Response<Body>) -> Cookie<'static> {
        let set_cookie = res
            .headers()
            .get(header::SET_COOKIE)
            .expect("response includes set-cookie header")
            .to_str()
            .expect("set-cookie header is valid utf-8");
        Cookie::parse_encoded(set_cookie)
            .expect("set-cookie parses successfully")
            .into_owned()
    }

    fn request() -> http::request::Builder {
        Request::builder().extension(ClientAddr("198.51.100.4:40000".into()))
    }

    #[tokio::test]
    async fn cookie_is_renewed_on_every_request() {
        let svc = ServiceBuilder::new()
            .layer(make_layer(SessionConfig::default()))
            .service_fn(handler);

        let req = request()
            .body(Body::empty())
            .expect("request builds successfully");
        let res = svc.clone().oneshot(req).await.expect("service call succeeds");
        let session_cookie = get_session_cookie(&res);

        let req = request()
            .header(header::COOKIE, session_cookie.encoded().to_string())
            .body(Body::empty())
            .expect("request builds successfully");
        let res = svc.oneshot(req).await.expect("service call succeeds");

        assert_eq!(get_session_cookie(&res).value(), session_cookie.value());
    }

    #[tokio::test]
    async fn name_and_http_only() {
        let config = SessionConfig::default()
            .with_name("my.sid")
            .with_http_only(true);
        let svc = ServiceBuilder::new()
            .layer(make_layer(config))
            .service_fn(handler);

        let req = request()
            .body(Body::empty())
            .expect("request builds successfully");
        let res = svc.oneshot(req).await.expect("service call succeeds");
        let session_cookie = get_session_cookie(&res);

        assert_eq!(session_cookie.name(), "my.sid");
        assert_eq!(session_cookie.http_only(), Some(true));
        assert_eq!(session_cookie.path(), Some("/"));
    }

    #[tokio::test]
    async fn expiry_on_session_end() {
        let config = SessionConfig::default().with_expiry(Expiry::OnSessionEnd);
        let svc = ServiceBuilder::new()
            .layer(make_layer(config))
            .service_fn(handler);

        let req = request()
            .body(Body::empty())
            .expect("request builds successfully");
        let res = svc.oneshot(req).await.expect("service call succeeds");
        let session_cookie = get_session_cookie(&res);

        assert!(session_cookie.max_age().is_none());
        assert!(session_cookie.expires().is_none());
    }

    #[tokio::test]
    async fn expiry_on_inactivity() {
        let inactivity = Duration::hours(2);
        let config = SessionConfig::default().with_expiry(Expiry::OnInactivity(inactivity));
        let svc = ServiceBuilder::new()
            .layer(make_layer(config))
            .service_fn(handler);

        let req = request()
            .body(Body::empty())
            .expect("request builds successfully");
        let res = svc.oneshot(req).await.expect("service call succeeds");
        let session_cookie = get_session_cookie(&res);

        let max_age = session_cookie
            .max_age()
            .expect("session cookie has max-age");
        assert!((max_age - inactivity).abs() <= Duration::seconds(1));
        let expires = session_cookie
            .expires_datetime()
            .expect("session cookie has expires");
        assert!((expires - (OffsetDateTime::now_utc() + inactivity)).abs() <= Duration::seconds(1));
    }

    #[tokio::test]
    async fn domain_follows_request_host() {
        let svc = ServiceBuilder::new()
            .layer(make_layer(SessionConfig::default()))
            .service_fn(handler);

        let req = request()
            .header(header::HOST, "sub.a.example.com:3000")
            .body(Body::empty())
            .expect("request builds successfully");
        let res = svc.oneshot(req).await.expect("service call succeeds");

        assert_eq!(get_session_cookie(&res).domain(), Some("a.example.com"));
    }

    #[tokio::test]
    async fn domain_omitted_without_subdomain_persistence() {
        let config = SessionConfig::default().with_subdomain_persistence(false);
        let svc = ServiceBuilder::new()
            .layer(make_layer(config))
            .service_fn(handler);

        let req = request()
            .header(header::HOST, "a.example.com")
            .body(Body::empty())
            .expect("request builds successfully");
        let res = svc.oneshot(req).await.expect("service call succeeds");

        assert!(get_session_cookie(&res).domain().is_none());
    }
}
