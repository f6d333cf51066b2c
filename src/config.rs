use std::{borrow::Cow, net::IpAddr};

use serde::Deserialize;
use time::{Duration, OffsetDateTime};
use tower_cookies::Cookie;

use crate::SameSite;

pub const DEFAULT_COOKIE_NAME: &str = "sessionid";
pub const DEFAULT_TOKEN_LENGTH: usize = 32;

pub const UNLIMITED_LIFETIME: Duration = Duration::days(24 * 365);

/// How long a session lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Expiry {
    #[default]
    Unlimited,
    OnSessionEnd,
    OnInactivity(Duration),
}

impl Expiry {
    /// `0` is unlimited, negative ends with the browser session, positive is a duration in
    /// seconds.
    pub fn from_ttl_seconds(ttl: i64) -> Self {
        match ttl {
            0 => Expiry::Unlimited,
            ttl if ttl < 0 => Expiry::OnSessionEnd,
            ttl => Expiry::OnInactivity(Duration::seconds(ttl)),
        }
    }

    pub(crate) fn decay(&self) -> Option<std::time::Duration> {
        match self {
            Expiry::OnInactivity(ttl) if ttl.is_positive() => std::time::Duration::try_from(*ttl).ok(),
            _ => None,
        }
    }

    fn cookie_lifetime(&self) -> Option<Duration> {
        match self {
            Expiry::Unlimited => Some(UNLIMITED_LIFETIME),
            Expiry::OnInactivity(ttl) if ttl.is_positive() => Some(*ttl),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub(crate) name: Cow<'static, str>,
    pub(crate) expiry: Expiry,
    pub(crate) token_length: usize,
    pub(crate) http_only: bool,
    pub(crate) subdomain_persistence: bool,
    pub(crate) secure: bool,
    pub(crate) same_site: Option<SameSite>,
    pub(crate) path: Cow<'static, str>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_COOKIE_NAME.into(),
            expiry: Expiry::Unlimited,
            token_length: DEFAULT_TOKEN_LENGTH,
            http_only: false,
            subdomain_persistence: true,
            secure: false,
            same_site: None,
            path: "/".into(),
        }
    }
}

impl SessionConfig {
    #[must_use]
    pub fn with_name<N: Into<Cow<'static, str>>>(mut self, name: N) -> Self {
        let name = name.into();
        if !name.is_empty() {
            self.name = name;
        }
        self
    }

    #[must_use]
    pub fn with_expiry(mut self, expiry: Expiry) -> Self {
        self.expiry = expiry;
        self
    }

    #[must_use]
    pub fn with_token_length(mut self, token_length: usize) -> Self {
        self.token_length = if token_length == 0 {
            DEFAULT_TOKEN_LENGTH
        } else {
            token_length
        };
        self
    }

    #[must_use]
    pub fn with_http_only(mut self, http_only: bool) -> Self {
        self.http_only = http_only;
        self
    }

    #[must_use]
    pub fn with_subdomain_persistence(mut self, enabled: bool) -> Self {
        self.subdomain_persistence = enabled;
        self
    }

    #[must_use]
    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    #[must_use]
    pub fn with_same_site(mut self, same_site: SameSite) -> Self {
        self.same_site = Some(same_site);
        self
    }

    #[must_use]
    pub fn with_path<P: Into<Cow<'static, str>>>(mut self, path: P) -> Self {
        self.path = path.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn expiry(&self) -> Expiry {
        self.expiry
    }

    pub fn token_length(&self) -> usize {
        self.token_length
    }

    pub(crate) fn build_cookie(&self, token: String, host: Option<&str>) -> Cookie<'static> {
        let mut cookie_builder = Cookie::build((self.name.clone(), token))
            .http_only(self.http_only)
            .secure(self.secure)
            .path(self.path.clone());

        if let Some(same_site) = self.same_site {
            cookie_builder = cookie_builder.same_site(same_site);
        }

        // Expires and Max-Age are derived from the same instant so they always agree.
        if let Some(lifetime) = self.expiry.cookie_lifetime() {
            let now = OffsetDateTime::now_utc();
            let (expires, lifetime) = match now.checked_add(lifetime) {
                Some(expires) => (expires, lifetime),
                None => (now + UNLIMITED_LIFETIME, UNLIMITED_LIFETIME),
            };
            cookie_builder = cookie_builder.expires(expires).max_age(lifetime);
        }

        if let Some(domain) = self.cookie_domain(host) {
            cookie_builder = cookie_builder.domain(domain);
        }

        cookie_builder.build()
    }

    pub(crate) fn removal_cookie(&self, host: Option<&str>) -> Cookie<'static> {
        let mut cookie = Cookie::new(self.name.clone(), "");
        cookie.set_path(self.path.clone());
        if let Some(domain) = self.cookie_domain(host) {
            cookie.set_domain(domain);
        }
        cookie
    }

    fn cookie_domain(&self, host: Option<&str>) -> Option<String> {
        if !self.subdomain_persistence {
            return None;
        }
        subdomain_cookie_domain(host?)
    }
}

/// The `Domain` attribute that shares a cookie with at most one level of subdomains.
pub fn subdomain_cookie_domain(host: &str) -> Option<String> {
    if host.starts_with('[') {
        return None;
    }
    let host = host.split_once(':').map_or(host, |(name, _port)| name);
    let host = host.trim_end_matches('.').to_ascii_lowercase();

    if host.parse::<IpAddr>().is_ok() {
        return None;
    }

    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() < 2 || labels.iter().any(|label| label.is_empty()) {
        return None;
    }

    let domain = if labels.len() > 3 {
        labels[labels.len() - 3..].join(".")
    } else {
        host.clone()
    };

    Some(format!(".{domain}"))
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct RawSessionConfig {
    cookie_name: String,
    ttl: i64,
    token_length: usize,
    http_only: bool,
    disable_subdomain_persistence: bool,
    secure: bool,
    path: String,
}

impl Default for RawSessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: DEFAULT_COOKIE_NAME.to_owned(),
            ttl: 0,
            token_length: DEFAULT_TOKEN_LENGTH,
            http_only: false,
            disable_subdomain_persistence: false,
            secure: false,
            path: "/".to_owned(),
        }
    }
}

/// Reads the host-facing option names; `ttl` is in seconds.
impl<'de> Deserialize<'de> for SessionConfig {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = RawSessionConfig::deserialize(deserializer)?;
        Ok(SessionConfig::default()
            .with_name(raw.cookie_name)
            .with_expiry(Expiry::from_ttl_seconds(raw.ttl))
            .with_token_length(raw.token_length)
            .with_http_only(raw.http_only)
            .with_subdomain_persistence(!raw.disable_subdomain_persistence)
            .with_secure(raw.secure)
            .with_path(raw.path))
    }
}
