use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

use http::{Request, Response};
use tower_cookies::{CookieManager, Cookies};
use tower_layer::Layer;
use tower_service::Service;

use crate::{
    controller::{CookieController, PlaintextCookie},
    manager::SessionManager,
};

/// Starts a session for every request.
///
/// The inner service finds the [`Session`](crate::Session) and a clone of the
/// [`SessionManager`] in the request extensions, next to the [`Cookies`] jar. The session cookie
/// is renewed on every response.
#[derive(Debug, Clone)]
pub struct SessionManagerLayer<C: CookieController = PlaintextCookie> {
    manager: SessionManager<C>,
}

impl<C: CookieController> SessionManagerLayer<C> {
    #[must_use]
    pub fn new(manager: SessionManager<C>) -> Self {
        Self { manager }
    }

    pub fn manager(&self) -> &SessionManager<C> {
        &self.manager
    }
}

impl<C: CookieController> From<SessionManager<C>> for SessionManagerLayer<C> {
    fn from(manager: SessionManager<C>) -> Self {
        Self::new(manager)
    }
}

#[derive(Debug, Clone)]
pub struct SessionService<S, C: CookieController> {
    inner: S,
    manager: SessionManager<C>,
}

impl<S, C: CookieController> Layer<S> for SessionManagerLayer<C> {
    type Service = CookieManager<SessionService<S, C>>;

    fn layer(&self, inner: S) -> Self::Service {
        CookieManager::new(SessionService {
            inner,
            manager: self.manager.clone(),
        })
    }
}

impl<ReqBody, ResBody, S, C> Service<Request<ReqBody>> for SessionService<S, C>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send,
    ReqBody: Send + 'static,
    ResBody: Default + Send,
    C: CookieController,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let manager = self.manager.clone();

        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let (mut parts, body) = req.into_parts();

            let Some(cookies) = parts.extensions.get::<Cookies>().cloned() else {
                tracing::error!("cookie jar missing from request extensions");
                let mut res = Response::default();
                *res.status_mut() = http::StatusCode::INTERNAL_SERVER_ERROR;
                return Ok(res);
            };

            let session = manager.start(&parts, &cookies).await;
            parts.extensions.insert(session);
            parts.extensions.insert(manager);

            inner.call(Request::from_parts(parts, body)).await
        })
    }
}

#[cfg(feature = "axum")]
mod extract {
    use axum_core::extract::FromRequestParts;
    use http::{StatusCode, request::Parts};

    use crate::Session;

    impl<S: Send + Sync> FromRequestParts<S> for Session {
        type Rejection = (StatusCode, &'static str);

        async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
            parts.extensions.get::<Session>().cloned().ok_or((
                StatusCode::INTERNAL_SERVER_ERROR,
                "Can't extract session. Is `SessionManagerLayer` enabled?",
            ))
        }
    }
}
