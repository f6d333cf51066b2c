#![allow(dead_code)]

// Shared helpers for integration tests.
//
// Cookies are parsed and encoded with `tower_cookies::Cookie` so the tests see exactly what the
// middleware emits in `Set-Cookie` and what browsers send back in `Cookie`.
use axum::body::Body;
use http::{HeaderMap, Request, Response, header};
use http_body_util::BodyExt as _;
use tower_cookies::Cookie;

use cookie_sessions::ClientAddr;

pub const CLIENT_ADDR: &str = "203.0.113.9:52114";
pub const CLIENT_IP: &str = "203.0.113.9";

pub async fn body_string(body: Body) -> String {
    let bytes = body
        .collect()
        .await
        .expect("body collects successfully")
        .to_bytes();
    String::from_utf8_lossy(&bytes).into_owned()
}

/// A request from [`CLIENT_ADDR`], optionally carrying a session cookie.
pub fn request(uri: &str, cookie: Option<&Cookie<'_>>) -> Request<Body> {
    let mut builder = Request::builder()
        .uri(uri)
        .header(header::HOST, "www.example.com")
        .extension(ClientAddr(CLIENT_ADDR.into()));
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie_header_value(cookie));
    }
    builder.body(Body::empty()).expect("request builds successfully")
}

pub fn get_session_cookie(res: &Response<Body>) -> Cookie<'static> {
    get_session_cookie_from_headers(res.headers())
}

pub fn get_session_cookie_from_headers(headers: &HeaderMap) -> Cookie<'static> {
    let set_cookie = headers
        .get(header::SET_COOKIE)
        .expect("response includes set-cookie header");
    let set_cookie = set_cookie
        .to_str()
        .expect("set-cookie header is valid utf-8");
    Cookie::parse_encoded(set_cookie)
        .expect("set-cookie parses successfully")
        .into_owned()
}

pub fn cookie_header_value(cookie: &Cookie<'_>) -> String {
    // Only name=value goes back to the server.
    Cookie::new(cookie.name().to_owned(), cookie.value().to_owned())
        .encoded()
        .to_string()
}

/// The token inside a signed `Set-Cookie` cookie.
#[cfg(feature = "signed")]
pub fn unsigned_token(cookie: Cookie<'static>, key: &tower_cookies::Key) -> String {
    use tower_cookies::cookie::CookieJar;

    let name = cookie.name().to_owned();
    let mut jar = CookieJar::new();
    jar.add_original(cookie);
    jar.signed(key)
        .get(&name)
        .expect("signed jar returns session cookie")
        .value()
        .to_owned()
}
