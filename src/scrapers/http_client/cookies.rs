//! Cookie jar with a hard expiration ceiling.
//!
//! The bulletin site issues session cookies advertising multi-hour
//! lifetimes that the server actually invalidates after roughly thirty
//! minutes. The jar therefore ignores `Max-Age`/`Expires` entirely and
//! expires every cookie ten minutes after receipt, forcing a fresh sign-in
//! well before the server-side cutoff.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use reqwest::cookie::CookieStore;
use reqwest::header::HeaderValue;
use url::Url;

/// Forced lifetime for every cookie, server attributes notwithstanding.
pub const COOKIE_TTL: Duration = Duration::from_secs(10 * 60);

#[derive(Debug, Clone)]
struct StoredCookie {
    value: String,
    stored_at: Instant,
}

/// Host-scoped cookie store. Path and domain attributes are ignored; every
/// source lives under a single origin.
#[derive(Debug, Default)]
pub struct ExpiringJar {
    store: Mutex<HashMap<String, HashMap<String, StoredCookie>>>,
}

impl ExpiringJar {
    pub fn new() -> Self {
        Self::default()
    }

    fn host_key(url: &Url) -> Option<String> {
        url.host_str().map(|h| h.to_lowercase())
    }

    /// True when a live (non-expired) cookie with `name` exists for the
    /// origin of `url`.
    pub fn has_cookie(&self, url: &Url, name: &str) -> bool {
        let Some(host) = Self::host_key(url) else {
            return false;
        };
        let store = self.store.lock().expect("cookie jar poisoned");
        store
            .get(&host)
            .and_then(|cookies| cookies.get(name))
            .is_some_and(|c| c.stored_at.elapsed() < COOKIE_TTL)
    }
}

/// `Set-Cookie` parsing keeps only the name/value pair; expiration
/// attributes are deliberately dropped.
fn parse_set_cookie(header: &str) -> Option<(String, String)> {
    let pair = header.split(';').next()?;
    let (name, value) = pair.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    Some((name.to_string(), value.trim().to_string()))
}

impl CookieStore for ExpiringJar {
    fn set_cookies(&self, cookie_headers: &mut dyn Iterator<Item = &HeaderValue>, url: &Url) {
        let Some(host) = Self::host_key(url) else {
            return;
        };
        let mut store = self.store.lock().expect("cookie jar poisoned");
        let cookies = store.entry(host).or_default();
        for header in cookie_headers {
            let Ok(raw) = header.to_str() else { continue };
            if let Some((name, value)) = parse_set_cookie(raw) {
                cookies.insert(
                    name,
                    StoredCookie {
                        value,
                        stored_at: Instant::now(),
                    },
                );
            }
        }
    }

    fn cookies(&self, url: &Url) -> Option<HeaderValue> {
        let host = Self::host_key(url)?;
        let mut store = self.store.lock().expect("cookie jar poisoned");
        let cookies = store.get_mut(&host)?;
        cookies.retain(|_, c| c.stored_at.elapsed() < COOKIE_TTL);

        let mut pairs: Vec<String> = cookies
            .iter()
            .map(|(name, c)| format!("{}={}", name, c.value))
            .collect();
        if pairs.is_empty() {
            return None;
        }
        pairs.sort();
        HeaderValue::from_str(&pairs.join("; ")).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(jar: &ExpiringJar, url: &Url, header: &str) {
        let value = HeaderValue::from_str(header).unwrap();
        let headers = [value];
        jar.set_cookies(&mut headers.iter(), url);
    }

    #[test]
    fn test_round_trip() {
        let jar = ExpiringJar::new();
        let url = Url::parse("https://www.impo.com.uy/cgi-bin/bases").unwrap();
        set(&jar, &url, "usrts_2=abc123; Max-Age=86400; Path=/");

        assert!(jar.has_cookie(&url, "usrts_2"));
        assert_eq!(
            jar.cookies(&url).unwrap().to_str().unwrap(),
            "usrts_2=abc123"
        );
    }

    #[test]
    fn test_host_isolation() {
        let jar = ExpiringJar::new();
        let a = Url::parse("https://a.example/").unwrap();
        let b = Url::parse("https://b.example/").unwrap();
        set(&jar, &a, "session=1");

        assert!(jar.has_cookie(&a, "session"));
        assert!(!jar.has_cookie(&b, "session"));
        assert!(jar.cookies(&b).is_none());
    }

    #[test]
    fn test_multiple_cookies_joined() {
        let jar = ExpiringJar::new();
        let url = Url::parse("https://www.impo.com.uy/").unwrap();
        set(&jar, &url, "a=1");
        set(&jar, &url, "b=2");

        assert_eq!(jar.cookies(&url).unwrap().to_str().unwrap(), "a=1; b=2");
    }

    #[test]
    fn test_malformed_header_ignored() {
        let jar = ExpiringJar::new();
        let url = Url::parse("https://www.impo.com.uy/").unwrap();
        set(&jar, &url, "novalue");
        set(&jar, &url, "=orphan");

        assert!(jar.cookies(&url).is_none());
    }

    #[test]
    fn test_overwrite_keeps_latest_value() {
        let jar = ExpiringJar::new();
        let url = Url::parse("https://www.impo.com.uy/").unwrap();
        set(&jar, &url, "usrts_2=old");
        set(&jar, &url, "usrts_2=new");

        assert_eq!(
            jar.cookies(&url).unwrap().to_str().unwrap(),
            "usrts_2=new"
        );
    }
}
