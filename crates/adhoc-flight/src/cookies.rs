//! Client-side cookie handling
//!
//! Some Flight servers pin a session to a cookie. The jar remembers every
//! `set-cookie` response header and replays the cookies as one `cookie`
//! request header. Expiry attributes are not tracked.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tonic::metadata::MetadataMap;
use tracing::debug;

pub const SET_COOKIE: &str = "set-cookie";
pub const COOKIE: &str = "cookie";

/// Shared cookie store
#[derive(Debug, Clone, Default)]
pub struct CookieJar {
    cookies: Arc<RwLock<BTreeMap<String, String>>>,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember the cookies set by a response
    pub fn ingest(&self, metadata: &MetadataMap) {
        for value in metadata.get_all(SET_COOKIE).iter() {
            if let Some((name, value)) = value.to_str().ok().and_then(parse_set_cookie) {
                debug!(cookie = %name, "Storing cookie");
                self.cookies.write().insert(name, value);
            }
        }
    }

    /// Value for the `cookie` request header, or `None` when the jar is empty
    pub fn header_value(&self) -> Option<String> {
        let cookies = self.cookies.read();
        if cookies.is_empty() {
            return None;
        }
        Some(
            cookies
                .iter()
                .map(|(name, value)| format!("{}={}", name, value))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }

    pub fn get(&self, name: &str) -> Option<String> {
        self.cookies.read().get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.cookies.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.read().is_empty()
    }

    pub fn clear(&self) {
        self.cookies.write().clear();
    }
}

/// Parse the leading `name=value` pair of a `set-cookie` header
fn parse_set_cookie(header: &str) -> Option<(String, String)> {
    let pair = header.split(';').next()?;
    let (name, value) = pair.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    Some((name.to_string(), value.trim().trim_matches('"').to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_set_cookie() {
        assert_eq!(
            parse_set_cookie("session=abc123; Path=/; HttpOnly"),
            Some(("session".to_string(), "abc123".to_string()))
        );
        assert_eq!(
            parse_set_cookie("quoted=\"v\""),
            Some(("quoted".to_string(), "v".to_string()))
        );
        assert_eq!(parse_set_cookie("=novalue"), None);
        assert_eq!(parse_set_cookie("garbage"), None);
    }

    #[test]
    fn test_ingest_and_replay() {
        let jar = CookieJar::new();
        assert!(jar.header_value().is_none());

        let mut metadata = MetadataMap::new();
        metadata.append(SET_COOKIE, "b=2; Path=/".parse().unwrap());
        metadata.append(SET_COOKIE, "a=1".parse().unwrap());
        jar.ingest(&metadata);

        assert_eq!(jar.len(), 2);
        assert_eq!(jar.header_value().as_deref(), Some("a=1; b=2"));
    }

    #[test]
    fn test_later_cookie_replaces_earlier() {
        let jar = CookieJar::new();
        let mut first = MetadataMap::new();
        first.insert(SET_COOKIE, "session=old".parse().unwrap());
        jar.ingest(&first);

        let mut second = MetadataMap::new();
        second.insert(SET_COOKIE, "session=new".parse().unwrap());
        jar.ingest(&second);

        assert_eq!(jar.get("session").as_deref(), Some("new"));
        assert_eq!(jar.len(), 1);
    }

    #[test]
    fn test_clones_share_cookies() {
        let jar = CookieJar::new();
        let clone = jar.clone();
        let mut metadata = MetadataMap::new();
        metadata.insert(SET_COOKIE, "k=v".parse().unwrap());
        clone.ingest(&metadata);
        assert_eq!(jar.get("k").as_deref(), Some("v"));
        jar.clear();
        assert!(clone.is_empty());
    }
}
