//! Bounded fixed-capacity strings
//!
//! File names and paths held by playback slots live in fixed-size inline
//! buffers. Copying a longer value truncates it at the last UTF-8 character
//! boundary that fits; nothing is ever allocated.

use serde::{Serialize, Serializer};
use std::fmt;
use std::ops::Deref;

/// Inline string with a capacity of `N` bytes
#[derive(Clone, Copy)]
pub struct BoundedStr<const N: usize> {
    buf: [u8; N],
    len: usize,
    truncated: bool,
}

impl<const N: usize> BoundedStr<N> {
    /// Empty string
    pub const fn new() -> Self {
        Self {
            buf: [0; N],
            len: 0,
            truncated: false,
        }
    }

    /// Copy `value`, truncating at a character boundary when it exceeds `N` bytes
    pub fn from_str_truncated(value: &str) -> Self {
        let mut s = Self::new();
        s.set(value);
        s
    }

    /// Replace the contents with `value` (truncating)
    pub fn set(&mut self, value: &str) {
        let mut end = value.len().min(N);
        while !value.is_char_boundary(end) {
            end -= 1;
        }
        self.buf[..end].copy_from_slice(&value.as_bytes()[..end]);
        self.len = end;
        self.truncated = end < value.len();
    }

    pub fn clear(&mut self) {
        self.len = 0;
        self.truncated = false;
    }

    pub fn as_str(&self) -> &str {
        // Contents are always copied from a &str and cut on a char boundary
        std::str::from_utf8(&self.buf[..self.len]).unwrap_or_default()
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    /// True if the last `set` had to drop bytes
    pub fn was_truncated(&self) -> bool {
        self.truncated
    }
}

impl<const N: usize> Default for BoundedStr<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> Deref for BoundedStr<N> {
    type Target = str;

    fn deref(&self) -> &str {
        self.as_str()
    }
}

impl<const N: usize> PartialEq for BoundedStr<N> {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl<const N: usize> Eq for BoundedStr<N> {}

impl<const N: usize> PartialEq<str> for BoundedStr<N> {
    fn eq(&self, other: &str) -> bool {
        self.as_str() == other
    }
}

impl<const N: usize> PartialEq<&str> for BoundedStr<N> {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == *other
    }
}

impl<const N: usize> fmt::Display for BoundedStr<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<const N: usize> fmt::Debug for BoundedStr<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.as_str(), f)
    }
}

impl<const N: usize> From<&str> for BoundedStr<N> {
    fn from(value: &str) -> Self {
        Self::from_str_truncated(value)
    }
}

impl<const N: usize> Serialize for BoundedStr<N> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}
