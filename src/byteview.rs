//! Immutable cached value.
//!
//! Every value that enters or leaves a cache tier is wrapped in a
//! [`ByteView`]. The underlying buffer is a reference-counted
//! [`bytes::Bytes`], so clones are cheap and nobody can mutate the cached
//! bytes in place. Callers that need owned bytes go through
//! [`ByteView::byte_slice`], which always copies.

use std::fmt;

use bytes::Bytes;

use crate::cache::Value;

/// Read-only view over cached bytes
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct ByteView {
    b: Bytes,
}

impl ByteView {
    /// Build a view that owns a private copy of `data`
    pub fn copy_from_slice(data: &[u8]) -> Self {
        Self {
            b: Bytes::copy_from_slice(data),
        }
    }

    /// Length of the value in bytes
    #[inline]
    pub fn len(&self) -> usize {
        self.b.len()
    }

    /// True when the value holds no bytes
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.b.is_empty()
    }

    /// Defensive copy of the value
    pub fn byte_slice(&self) -> Vec<u8> {
        self.b.to_vec()
    }

    /// Byte at index `i`, if any
    pub fn at(&self, i: usize) -> Option<u8> {
        self.b.get(i).copied()
    }

    /// Lossy UTF-8 rendering of the value
    pub fn as_str_lossy(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.b)
    }
}

impl Value for ByteView {
    fn len(&self) -> usize {
        self.b.len()
    }
}

impl From<Vec<u8>> for ByteView {
    fn from(v: Vec<u8>) -> Self {
        Self { b: Bytes::from(v) }
    }
}

impl From<Bytes> for ByteView {
    fn from(b: Bytes) -> Self {
        Self { b }
    }
}

impl From<&'static str> for ByteView {
    fn from(s: &'static str) -> Self {
        Self {
            b: Bytes::from_static(s.as_bytes()),
        }
    }
}

impl From<String> for ByteView {
    fn from(s: String) -> Self {
        Self {
            b: Bytes::from(s.into_bytes()),
        }
    }
}

impl fmt::Display for ByteView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_str_lossy())
    }
}

impl fmt::Debug for ByteView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteView").field("len", &self.len()).finish()
    }
}
