//! Dynamically typed content nodes.
//!
//! The ledger's `resolve` hands back untyped data: a scalar, or a map of
//! further nodes. [`Value`] models that as a tagged variant with explicit
//! `expect_*` accessors returning [`Error`] on mismatch, so callers never
//! get silent type coercion.

use std::collections::BTreeMap;

use thiserror::Error;

/// A single node in a tree's content.
///
/// Maps use [`BTreeMap`] so that every traversal of the content tree is in
/// sorted key order, which the ref and object stores rely on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// The absent value. Writing `Null` at a path deletes the leaf.
    Null,
    /// A signed integer.
    Int(i64),
    /// A UTF-8 string.
    Str(String),
    /// An opaque byte string.
    Bytes(Vec<u8>),
    /// A nested map of child nodes.
    Map(BTreeMap<String, Value>),
    /// An ordered sequence of nodes.
    Seq(Vec<Value>),
}

/// An error raised when a node does not have the shape a caller demanded.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum Error {
    /// The node at `path` is not the expected variant.
    #[error("malformed value at `{path}`: expected {expected}, found {found}")]
    Malformed {
        /// The content path that was being read.
        path: String,
        /// The variant the caller demanded.
        expected: &'static str,
        /// The variant actually found.
        found: &'static str,
    },
}

impl Value {
    /// A short name for the variant, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Int(_) => "int",
            Value::Str(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::Map(_) => "map",
            Value::Seq(_) => "seq",
        }
    }

    fn mismatch(&self, path: &str, expected: &'static str) -> Error {
        Error::Malformed {
            path: path.to_owned(),
            expected,
            found: self.kind(),
        }
    }

    /// Demand a string, or fail with [`Error::Malformed`] naming `path`.
    pub fn expect_str(&self, path: &str) -> Result<&str, Error> {
        match self {
            Value::Str(s) => Ok(s),
            other => Err(other.mismatch(path, "string")),
        }
    }

    /// Demand a byte string, or fail with [`Error::Malformed`] naming `path`.
    pub fn expect_bytes(&self, path: &str) -> Result<&[u8], Error> {
        match self {
            Value::Bytes(b) => Ok(b),
            other => Err(other.mismatch(path, "bytes")),
        }
    }

    /// Demand an integer, or fail with [`Error::Malformed`] naming `path`.
    pub fn expect_int(&self, path: &str) -> Result<i64, Error> {
        match self {
            Value::Int(i) => Ok(*i),
            other => Err(other.mismatch(path, "int")),
        }
    }

    /// Demand a map, or fail with [`Error::Malformed`] naming `path`.
    pub fn expect_map(&self, path: &str) -> Result<&BTreeMap<String, Value>, Error> {
        match self {
            Value::Map(m) => Ok(m),
            other => Err(other.mismatch(path, "map")),
        }
    }

    /// Walk `path` (slash-separated) down through nested maps.
    ///
    /// Returns the node the path lands on together with any unconsumed path
    /// segments. A missing key yields `(None, remaining)` starting at the
    /// missing segment; a non-empty remainder alongside `Some` means the path
    /// overshot a leaf.
    pub fn resolve<'v>(&'v self, path: &str) -> (Option<&'v Value>, Vec<String>) {
        let mut node = self;
        let mut segments = split_path(path);
        while !segments.is_empty() {
            match node {
                Value::Map(m) => match m.get(&segments[0]) {
                    Some(child) => {
                        segments.remove(0);
                        node = child;
                    }
                    None => return (None, segments),
                },
                _ => return (Some(node), segments),
            }
        }
        (Some(node), segments)
    }

    /// Set `value` at `path`, creating intermediate maps as needed.
    ///
    /// Writing [`Value::Null`] deletes the leaf and prunes any maps the
    /// deletion left empty. Fails if a non-map node sits on the path.
    pub fn set_path(&mut self, path: &str, value: Value) -> Result<(), Error> {
        let segments = split_path(path);
        if segments.is_empty() {
            *self = value;
            return Ok(());
        }
        if matches!(self, Value::Null) {
            *self = Value::Map(BTreeMap::new());
        }
        set_in(self, &segments, value, path)?;
        Ok(())
    }
}

fn set_in(node: &mut Value, segments: &[String], value: Value, full: &str) -> Result<bool, Error> {
    let map = match node {
        Value::Map(m) => m,
        other => return Err(other.mismatch(full, "map")),
    };
    let key = &segments[0];
    if segments.len() == 1 {
        if matches!(value, Value::Null) {
            map.remove(key);
        } else {
            map.insert(key.clone(), value);
        }
    } else {
        let child = map
            .entry(key.clone())
            .or_insert_with(|| Value::Map(BTreeMap::new()));
        let now_empty = set_in(child, &segments[1..], value, full)?;
        if now_empty {
            map.remove(key);
        }
    }
    Ok(map.is_empty())
}

fn split_path(path: &str) -> Vec<String> {
    path.split('/')
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}
