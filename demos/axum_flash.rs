use std::net::SocketAddr;

use axum::{
    Router,
    extract::{ConnectInfo, Request},
    middleware::{self, Next},
    response::{Redirect, Response},
    routing::{get, post},
};
use cookie_sessions::{
    ClientAddr, Expiry, FileStore, Key, SameSite, Session, SessionConfig, SessionManager,
    SessionManagerLayer,
};

async fn index(session: Session) -> String {
    let visits = session.get_int("visits").unwrap_or(0);
    session
        .set("visits", visits + 1)
        .await
        .expect("session set succeeds");

    match session.get_flash_string("notice") {
        Some(notice) => format!("visits={visits} notice={notice}"),
        None => format!("visits={visits}"),
    }
}

async fn save(session: Session) -> Redirect {
    session
        .set_flash("notice", "saved")
        .expect("flash set succeeds");
    Redirect::to("/")
}

// Session ids are keyed on the peer address.
async fn client_addr(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    mut req: Request,
    next: Next,
) -> Response {
    req.extensions_mut().insert(ClientAddr::from(addr));
    next.run(req).await
}

#[tokio::main]
async fn main() {
    let config = SessionConfig::default()
        // Default: "sessionid"
        .with_name("sessionid")
        // Default: false
        .with_http_only(true)
        // Default: None
        .with_same_site(SameSite::Lax)
        // Default: Expiry::Unlimited
        .with_expiry(Expiry::from_ttl_seconds(60 * 60))
        // Default: true (no Domain is set for localhost either way)
        .with_subdomain_persistence(true);
    let manager = SessionManager::signed(config, Key::generate())
        .with_backend(FileStore::new(std::env::temp_dir().join("cookie-sessions-demo")));

    let app = Router::new()
        .route("/", get(index))
        .route("/save", post(save))
        .layer(SessionManagerLayer::new(manager))
        .layer(middleware::from_fn(client_addr));

    let addr = SocketAddr::from(([127, 0, 0, 1], 3000));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("tcp listener binds successfully");
    let local_addr = listener.local_addr().expect("local address is available");
    println!("listening at http://{local_addr}");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .expect("server runs successfully");
}
