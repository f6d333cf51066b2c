use std::future::Future;

use rand::Rng as _;
use tower_cookies::Cookies;

use crate::{
    backend::SessionBackend,
    config::SessionConfig,
    controller::{CookieController, PlaintextCookie},
    request::ClientRequest,
    session::Session,
    store::SessionStore,
};

const TOKEN_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Binds sessions to clients through a cookie.
#[derive(Debug, Clone)]
pub struct SessionManager<C: CookieController = PlaintextCookie> {
    config: SessionConfig,
    store: SessionStore,
    controller: C,
}

impl SessionManager<PlaintextCookie> {
    #[must_use]
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            store: SessionStore::new(),
            controller: PlaintextCookie,
        }
    }
}

#[cfg(feature = "signed")]
impl SessionManager<crate::SignedCookie> {
    #[must_use]
    pub fn signed(config: SessionConfig, key: crate::Key) -> Self {
        SessionManager::new(config).with_controller(crate::SignedCookie::new(key))
    }
}

#[cfg(feature = "private")]
impl SessionManager<crate::PrivateCookie> {
    #[must_use]
    pub fn private(config: SessionConfig, key: crate::Key) -> Self {
        SessionManager::new(config).with_controller(crate::PrivateCookie::new(key))
    }
}

impl<C: CookieController> SessionManager<C> {
    /// Persist sessions through `backend`. Replaces the store, so call this before use.
    #[must_use]
    pub fn with_backend<B: SessionBackend>(self, backend: B) -> Self {
        self.with_store(SessionStore::with_backend(backend))
    }

    #[must_use]
    pub fn with_store(mut self, store: SessionStore) -> Self {
        self.store = store;
        self
    }

    #[must_use]
    pub fn with_controller<C2: CookieController>(self, controller: C2) -> SessionManager<C2> {
        SessionManager {
            config: self.config,
            store: self.store,
            controller,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Resume the client's session or start a new one, and (re)issue the session cookie.
    pub fn start<'a, R: ClientRequest + ?Sized>(
        &'a self,
        req: &R,
        cookies: &Cookies,
    ) -> impl Future<Output = Session> + Send + use<'a, C, R> {
        let identity = req.client_identity();
        let host = req.host();
        let presented = self.controller.token(cookies, &self.config.name);
        let cookies = cookies.clone();

        async move {
            let ttl = self.config.expiry.decay();

            let resumed = match presented {
                Some(token) => {
                    let id = session_id(&identity, &token);
                    if self.store.exist(&id).await {
                        Some((token, self.store.read(&id, ttl).await))
                    } else {
                        None
                    }
                }
                None => None,
            };

            let (token, session) = match resumed {
                Some(resumed) => {
                    tracing::debug!(session_id = %resumed.1.id(), "session resumed");
                    resumed
                }
                None => {
                    let (token, id) = loop {
                        let token = generate_token(self.config.token_length);
                        let id = session_id(&identity, &token);
                        if !self.store.exist(&id).await {
                            break (token, id);
                        }
                    };
                    (token, self.store.init(&id, ttl).await)
                }
            };

            self.controller
                .write(&cookies, self.config.build_cookie(token, host.as_deref()));

            session
        }
    }

    /// Remove the client's session cookie and destroy its session. No-op without a cookie.
    pub fn destroy<'a, R: ClientRequest + ?Sized>(
        &'a self,
        req: &R,
        cookies: &Cookies,
    ) -> impl Future<Output = ()> + Send + use<'a, C, R> {
        let target = self
            .controller
            .token(cookies, &self.config.name)
            .map(|token| {
                self.controller
                    .expire(cookies, self.config.removal_cookie(req.host().as_deref()));
                session_id(&req.client_identity(), &token)
            });

        async move {
            if let Some(id) = target {
                self.store.destroy(&id).await;
            }
        }
    }

    /// Destroy a session by its full id. The client's cookie stays and is replaced on its next
    /// request.
    pub async fn destroy_by_id(&self, id: &str) {
        self.store.destroy(id).await;
    }

    pub async fn destroy_all(&self) {
        self.store.destroy_all().await;
    }
}

fn session_id(identity: &str, token: &str) -> String {
    format!("{identity}_{token}")
}

fn generate_token(length: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| char::from(TOKEN_ALPHABET[rng.gen_range(0..TOKEN_ALPHABET.len())]))
        .collect()
}
