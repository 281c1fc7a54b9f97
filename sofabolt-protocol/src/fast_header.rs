//! Header map with dedicated slots for the well-known keys.

use std::fmt;

use crate::header::{dump, HeaderMap, SimpleMap};

pub const KEY_SERVICE: &str = "service";
pub const KEY_HOST: &str = "host";
pub const KEY_CONTENT_TYPE: &str = "content-type";
pub const KEY_AUTHORIZATION: &str = "authorization";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WellKnown {
    Service,
    Host,
    ContentType,
    Authorization,
}

impl WellKnown {
    fn lookup(key: &str) -> Option<Self> {
        match key.as_bytes() {
            b"service" => Some(WellKnown::Service),
            b"host" => Some(WellKnown::Host),
            b"content-type" => Some(WellKnown::ContentType),
            b"authorization" => Some(WellKnown::Authorization),
            _ => None,
        }
    }
}

/// Header map that keeps `service`, `host`, `content-type` and
/// `authorization` out of the general list.
///
/// Iteration order is service, host, content-type, authorization, then the
/// remaining keys in insertion order.
#[derive(Debug, Clone, Default)]
pub struct FastSimpleMap {
    service: Option<String>,
    host: Option<String>,
    content_type: Option<String>,
    authorization: Option<String>,
    kvs: SimpleMap,
}

impl FastSimpleMap {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, k: WellKnown) -> &Option<String> {
        match k {
            WellKnown::Service => &self.service,
            WellKnown::Host => &self.host,
            WellKnown::ContentType => &self.content_type,
            WellKnown::Authorization => &self.authorization,
        }
    }

    fn slot_mut(&mut self, k: WellKnown) -> &mut Option<String> {
        match k {
            WellKnown::Service => &mut self.service,
            WellKnown::Host => &mut self.host,
            WellKnown::ContentType => &mut self.content_type,
            WellKnown::Authorization => &mut self.authorization,
        }
    }

    pub fn service(&self) -> Option<&str> {
        self.service.as_deref()
    }

    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn authorization(&self) -> Option<&str> {
        self.authorization.as_deref()
    }

    /// Copies every pair into `dst`, reusing its storage.
    pub fn copy_to(&self, dst: &mut FastSimpleMap) {
        dst.service.clone_from(&self.service);
        dst.host.clone_from(&self.host);
        dst.content_type.clone_from(&self.content_type);
        dst.authorization.clone_from(&self.authorization);
        self.kvs.copy_to(&mut dst.kvs);
    }
}

fn assign(slot: &mut Option<String>, value: &str) {
    match slot {
        Some(s) => {
            s.clear();
            s.push_str(value);
        }
        None => *slot = Some(value.to_owned()),
    }
}

impl HeaderMap for FastSimpleMap {
    fn set(&mut self, key: &str, value: &str) {
        match WellKnown::lookup(key) {
            Some(k) => assign(self.slot_mut(k), value),
            None => self.kvs.set(key, value),
        }
    }

    fn get(&self, key: &str) -> Option<&str> {
        match WellKnown::lookup(key) {
            Some(k) => self.slot(k).as_deref(),
            None => self.kvs.get(key),
        }
    }

    fn del(&mut self, key: &str) -> bool {
        match WellKnown::lookup(key) {
            Some(k) => self.slot_mut(k).take().is_some(),
            None => self.kvs.del(key),
        }
    }

    fn for_each<F: FnMut(&str, &str) -> bool>(&self, mut f: F) {
        let fixed = [
            (KEY_SERVICE, &self.service),
            (KEY_HOST, &self.host),
            (KEY_CONTENT_TYPE, &self.content_type),
            (KEY_AUTHORIZATION, &self.authorization),
        ];
        for (k, v) in fixed {
            if let Some(v) = v {
                if !f(k, v.as_str()) {
                    return;
                }
            }
        }
        self.kvs.for_each(f);
    }

    fn clear(&mut self) {
        self.service = None;
        self.host = None;
        self.content_type = None;
        self.authorization = None;
        self.kvs.clear();
    }
}

impl PartialEq for FastSimpleMap {
    fn eq(&self, other: &Self) -> bool {
        self.service == other.service
            && self.host == other.host
            && self.content_type == other.content_type
            && self.authorization == other.authorization
            && self.kvs == other.kvs
    }
}

impl Eq for FastSimpleMap {}

impl<'a> FromIterator<(&'a str, &'a str)> for FastSimpleMap {
    fn from_iter<I: IntoIterator<Item = (&'a str, &'a str)>>(iter: I) -> Self {
        let mut m = FastSimpleMap::new();
        for (k, v) in iter {
            m.set(k, v);
        }
        m
    }
}

impl fmt::Display for FastSimpleMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        dump(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;
    use proptest::prelude::*;

    fn encode<M: HeaderMap>(m: &M) -> BytesMut {
        let mut buf = BytesMut::new();
        m.encode_into(&mut buf);
        buf
    }

    #[test]
    fn test_well_known_slots() {
        let mut m = FastSimpleMap::new();
        m.set("x-trace", "abc");
        m.set("host", "127.0.0.1");
        m.set("service", "com.example.Echo");
        m.set("content-type", "application/json");
        m.set("authorization", "token");

        assert_eq!(m.host(), Some("127.0.0.1"));
        assert_eq!(m.service(), Some("com.example.Echo"));
        assert_eq!(m.get("content-type"), Some("application/json"));
        assert_eq!(m.authorization(), Some("token"));
        assert_eq!(m.get("x-trace"), Some("abc"));
        assert_eq!(m.len(), 5);
    }

    #[test]
    fn test_iteration_order() {
        let m: FastSimpleMap = [
            ("b", "2"),
            ("authorization", "auth"),
            ("a", "1"),
            ("host", "h"),
            ("service", "s"),
        ]
        .into_iter()
        .collect();

        let mut keys = Vec::new();
        m.for_each(|k, _| {
            keys.push(k.to_string());
            true
        });
        assert_eq!(keys, vec!["service", "host", "authorization", "b", "a"]);
        assert_eq!(m.to_string(), "service=s&host=h&authorization=auth&b=2&a=1");
    }

    #[test]
    fn test_for_each_stops_early() {
        let m: FastSimpleMap = [("service", "s"), ("a", "1"), ("b", "2")]
            .into_iter()
            .collect();
        let mut seen = 0;
        m.for_each(|_, _| {
            seen += 1;
            seen < 2
        });
        assert_eq!(seen, 2);
    }

    #[test]
    fn test_del_and_overwrite() {
        let mut m = FastSimpleMap::new();
        m.set("host", "a");
        m.set("host", "b");
        assert_eq!(m.host(), Some("b"));
        assert!(m.del("host"));
        assert!(!m.del("host"));
        assert_eq!(m.get("host"), None);
        assert!(m.is_empty());
    }

    #[test]
    fn test_empty_well_known_value_is_kept() {
        let mut m = FastSimpleMap::new();
        m.set("service", "");
        assert_eq!(m.get("service"), Some(""));

        let buf = encode(&m);
        assert_eq!(buf.len(), 8 + "service".len());
        let mut decoded = FastSimpleMap::new();
        decoded.decode(&buf).unwrap();
        assert_eq!(decoded.service(), Some(""));
    }

    #[test]
    fn test_matches_simple_map_encoding() {
        let pairs = [
            ("service", "svc"),
            ("host", "h"),
            ("content-type", "ct"),
            ("authorization", "a"),
            ("k1", "v1"),
            ("k2", ""),
        ];
        let fast: FastSimpleMap = pairs.into_iter().collect();
        let simple: SimpleMap = pairs.into_iter().collect();

        assert_eq!(encode(&fast), encode(&simple));
        assert_eq!(fast.encoded_len(), simple.encoded_len());

        let mut back = SimpleMap::new();
        back.decode(&encode(&fast)).unwrap();
        assert_eq!(back, simple);
    }

    #[test]
    fn test_clear_and_copy_to() {
        let src: FastSimpleMap = [("host", "h"), ("z", "1")].into_iter().collect();
        let mut dst: FastSimpleMap = [("service", "old")].into_iter().collect();
        src.copy_to(&mut dst);
        assert_eq!(dst, src);

        dst.clear();
        assert!(dst.is_empty());
        assert_eq!(dst.encoded_len(), 0);
    }

    fn key_strategy() -> impl Strategy<Value = String> {
        prop_oneof![
            Just("service".to_string()),
            Just("host".to_string()),
            Just("content-type".to_string()),
            Just("authorization".to_string()),
            "[a-z]{1,10}",
        ]
    }

    proptest! {
        #[test]
        fn prop_decode_reproduces_map(pairs in proptest::collection::vec((key_strategy(), "[ -~]{0,12}"), 0..40)) {
            let mut m = FastSimpleMap::new();
            for (k, v) in &pairs {
                m.set(k, v);
            }
            let buf = encode(&m);
            prop_assert_eq!(m.encoded_len(), buf.len());

            let mut decoded = FastSimpleMap::new();
            decoded.decode(&buf).unwrap();
            prop_assert_eq!(&decoded, &m);
            for (k, _) in &pairs {
                prop_assert_eq!(decoded.get(k), m.get(k));
            }
        }
    }
}
