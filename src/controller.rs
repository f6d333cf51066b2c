use std::fmt::Debug;

use tower_cookies::{Cookie, Cookies};

/// How the session token travels through the cookie jar.
///
/// The token alone is meaningless without the client identity, so plaintext is the default.
/// Signing adds tamper evidence and encryption hides the token from the client.
pub trait CookieController: Debug + Clone + Send + Sync + 'static {
    /// Value of the cookie named `name`, once verified or decrypted.
    fn read(&self, cookies: &Cookies, name: &str) -> Option<String>;
    fn write(&self, cookies: &Cookies, cookie: Cookie<'static>);
    fn expire(&self, cookies: &Cookies, cookie: Cookie<'static>);

    fn token(&self, cookies: &Cookies, name: &str) -> Option<String> {
        self.read(cookies, name).filter(|token| !token.is_empty())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PlaintextCookie;

impl CookieController for PlaintextCookie {
    fn read(&self, cookies: &Cookies, name: &str) -> Option<String> {
        cookies.get(name).map(|cookie| cookie.value().to_owned())
    }

    fn write(&self, cookies: &Cookies, cookie: Cookie<'static>) {
        cookies.add(cookie);
    }

    fn expire(&self, cookies: &Cookies, cookie: Cookie<'static>) {
        cookies.remove(cookie);
    }
}

// A controller over one of the keyed child jars of `Cookies`.
macro_rules! keyed_controller {
    ($(#[$doc:meta])* $controller:ident, $feature:literal, $jar:ident) => {
        $(#[$doc])*
        #[cfg(feature = $feature)]
        #[derive(Debug, Clone)]
        pub struct $controller {
            key: crate::Key,
        }

        #[cfg(feature = $feature)]
        impl $controller {
            pub fn new(key: crate::Key) -> Self {
                Self { key }
            }
        }

        #[cfg(feature = $feature)]
        impl CookieController for $controller {
            fn read(&self, cookies: &Cookies, name: &str) -> Option<String> {
                cookies
                    .$jar(&self.key)
                    .get(name)
                    .map(|cookie| cookie.value().to_owned())
            }

            fn write(&self, cookies: &Cookies, cookie: Cookie<'static>) {
                cookies.$jar(&self.key).add(cookie);
            }

            fn expire(&self, cookies: &Cookies, cookie: Cookie<'static>) {
                cookies.$jar(&self.key).remove(cookie);
            }
        }
    };
}

keyed_controller!(
    /// Signed tokens; a tampered cookie reads as absent.
    SignedCookie,
    "signed",
    signed
);

keyed_controller!(
    /// Encrypted tokens.
    PrivateCookie,
    "private",
    private
);
