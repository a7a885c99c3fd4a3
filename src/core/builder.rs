// src/core/builder.rs

//! Converts decoded bulk collections into caller-facing text.

use bytes::Bytes;

/// Decodes a sequence of bulk strings into UTF-8 text.
///
/// Null elements stay `None`; invalid UTF-8 is replaced rather than rejected,
/// matching how single bulk replies are rendered.
pub fn string_list(items: Vec<Option<Bytes>>) -> Vec<Option<String>> {
    items
        .into_iter()
        .map(|item| item.map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
        .collect()
}
