//! Ordered string header maps.
//!
//! Wire format, repeated for every pair in iteration order:
//!
//! ```text
//! +----------------+-----+------------------+-------+
//! | key len (u32)  | key | value len (u32)  | value |
//! +----------------+-----+------------------+-------+
//! ```
//!
//! A value length of `0xFFFFFFFF` is accepted as the empty string.

use std::fmt;

use bytes::{BufMut, BytesMut};

use crate::buffer::Buffer;
use crate::error::ProtocolError;

/// Length sentinel some peers write for an empty (null) value.
pub const NULL_LENGTH: u32 = u32::MAX;

/// Behaviour shared by [`SimpleMap`] and
/// [`FastSimpleMap`](crate::fast_header::FastSimpleMap).
pub trait HeaderMap {
    /// Sets `key`, overwriting an existing value in place.
    fn set(&mut self, key: &str, value: &str);

    fn get(&self, key: &str) -> Option<&str>;

    /// Removes `key`, returning whether it was present.
    fn del(&mut self, key: &str) -> bool;

    /// Visits every pair in iteration order; stops when `f` returns false.
    fn for_each<F: FnMut(&str, &str) -> bool>(&self, f: F);

    fn clear(&mut self);

    fn len(&self) -> usize {
        let mut n = 0;
        self.for_each(|_, _| {
            n += 1;
            true
        });
        n
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Exact number of bytes [`HeaderMap::encode_into`] appends.
    fn encoded_len(&self) -> usize {
        let mut n = 0;
        self.for_each(|k, v| {
            n += 8 + k.len() + v.len();
            true
        });
        n
    }

    fn encode_into(&self, dst: &mut BytesMut) {
        dst.reserve(self.encoded_len());
        self.for_each(|k, v| {
            dst.put_u32(k.len() as u32);
            dst.put_slice(k.as_bytes());
            dst.put_u32(v.len() as u32);
            dst.put_slice(v.as_bytes());
            true
        });
    }

    /// Decodes pairs from `src`, appending them to the map.
    fn decode(&mut self, src: &[u8]) -> Result<(), ProtocolError> {
        let mut buf = Buffer::new(src);
        while buf.remaining() > 0 {
            let key = read_string(&mut buf).map_err(|_| ProtocolError::ParseKey)?;
            let value = read_string(&mut buf).map_err(|_| ProtocolError::ParseValue)?;
            self.set(key, value);
        }
        Ok(())
    }
}

fn read_string<'a>(buf: &mut Buffer<&'a [u8]>) -> Result<&'a str, ProtocolError> {
    let len = buf.get_u32()?;
    if len == NULL_LENGTH || len == 0 {
        return Ok("");
    }
    let raw = buf.get_slice(len as usize)?;
    std::str::from_utf8(raw).map_err(|_| ProtocolError::NotEnough)
}

/// General ordered header map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimpleMap {
    kv: Vec<(String, String)>,
}

impl SimpleMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(n: usize) -> Self {
        Self {
            kv: Vec::with_capacity(n),
        }
    }

    /// Copies every pair into `dst`, reusing its storage.
    pub fn copy_to(&self, dst: &mut SimpleMap) {
        dst.kv.clone_from(&self.kv);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.kv.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl HeaderMap for SimpleMap {
    fn set(&mut self, key: &str, value: &str) {
        match self.kv.iter_mut().find(|(k, _)| k == key) {
            Some((_, v)) => {
                v.clear();
                v.push_str(value);
            }
            None => self.kv.push((key.to_owned(), value.to_owned())),
        }
    }

    fn get(&self, key: &str) -> Option<&str> {
        self.kv
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn del(&mut self, key: &str) -> bool {
        match self.kv.iter().position(|(k, _)| k == key) {
            Some(i) => {
                self.kv.remove(i);
                true
            }
            None => false,
        }
    }

    fn for_each<F: FnMut(&str, &str) -> bool>(&self, mut f: F) {
        for (k, v) in &self.kv {
            if !f(k, v) {
                return;
            }
        }
    }

    fn clear(&mut self) {
        self.kv.clear();
    }

    fn len(&self) -> usize {
        self.kv.len()
    }
}

impl<'a> FromIterator<(&'a str, &'a str)> for SimpleMap {
    fn from_iter<I: IntoIterator<Item = (&'a str, &'a str)>>(iter: I) -> Self {
        let mut m = SimpleMap::new();
        for (k, v) in iter {
            m.set(k, v);
        }
        m
    }
}

impl fmt::Display for SimpleMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        dump(self, f)
    }
}

/// Writes `k1=v1&k2=v2` in iteration order.
pub(crate) fn dump<M: HeaderMap>(m: &M, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let mut first = true;
    let mut res = Ok(());
    m.for_each(|k, v| {
        let sep = if first { "" } else { "&" };
        first = false;
        res = write!(f, "{}{}={}", sep, k, v);
        res.is_ok()
    });
    res
}
