//! Wire parameter encoding.
//!
//! [`ParamValues`] is the handoff shape between host values and the client
//! library's parameterized-send primitives: parallel per-parameter arrays of
//! encoded byte buffers, lengths, and format tags, indexed identically.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::value::Value;

/// Wire format of a parameter or result column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Format {
    /// Text representation (format code 0)
    #[default]
    Text,
    /// Raw binary representation (format code 1)
    Binary,
}

impl Format {
    /// The wire-level format code.
    pub const fn code(self) -> i32 {
        match self {
            Format::Text => 0,
            Format::Binary => 1,
        }
    }
}

/// Encoded parameters for one parameterized command.
///
/// Invariants: `buffers`, `lengths`, and `formats` always have equal length;
/// a buffer is `None` exactly when the source value was [`Value::Null`]
/// (length and format are ignored by the wire layer for null parameters).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamValues {
    buffers: Vec<Option<Vec<u8>>>,
    lengths: Vec<i32>,
    formats: Vec<Format>,
}

impl ParamValues {
    /// Encode a slice of host values into wire parameters.
    ///
    /// `Bool`, `Int`, `Float`, `Text`, and `Json` encode as text format;
    /// `Bytes` encodes as binary. Values the wire cannot represent are a
    /// setup error surfaced to the caller before anything is sent.
    pub fn from_values(values: &[Value]) -> Result<Self> {
        let mut params = ParamValues::with_capacity(values.len());
        for value in values {
            match value {
                Value::Null => params.push_null(),
                Value::Bool(v) => params.push_text(if *v { "true" } else { "false" }),
                Value::Int(v) => params.push_text(&v.to_string()),
                Value::Float(v) => params.push_text(&v.to_string()),
                Value::Text(s) => params.push_text(s),
                Value::Bytes(b) => params.push_binary(b),
                Value::Json(v) => {
                    let rendered = serde_json::to_string(v).map_err(|e| {
                        Error::setup(format!("cannot encode JSON parameter: {}", e))
                    })?;
                    params.push_text(&rendered);
                }
            }
        }
        Ok(params)
    }

    fn with_capacity(n: usize) -> Self {
        Self {
            buffers: Vec::with_capacity(n),
            lengths: Vec::with_capacity(n),
            formats: Vec::with_capacity(n),
        }
    }

    /// Append a text-format parameter.
    pub fn push_text(&mut self, text: &str) {
        self.lengths.push(text.len() as i32);
        self.formats.push(Format::Text);
        self.buffers.push(Some(text.as_bytes().to_vec()));
    }

    /// Append a binary-format parameter.
    pub fn push_binary(&mut self, bytes: &[u8]) {
        self.lengths.push(bytes.len() as i32);
        self.formats.push(Format::Binary);
        self.buffers.push(Some(bytes.to_vec()));
    }

    /// Append a NULL parameter.
    pub fn push_null(&mut self) {
        self.lengths.push(0);
        self.formats.push(Format::Text);
        self.buffers.push(None);
    }

    /// Number of parameters.
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    /// Check whether there are no parameters.
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// The encoded buffer at `index`; `None` means SQL NULL.
    pub fn buffer(&self, index: usize) -> Option<&[u8]> {
        self.buffers.get(index).and_then(|b| b.as_deref())
    }

    /// Check whether the parameter at `index` is NULL.
    pub fn is_null(&self, index: usize) -> bool {
        matches!(self.buffers.get(index), Some(None))
    }

    /// Per-parameter encoded byte lengths.
    pub fn lengths(&self) -> &[i32] {
        &self.lengths
    }

    /// Per-parameter format tags.
    pub fn formats(&self) -> &[Format] {
        &self.formats
    }

    /// Iterate over `(buffer, length, format)` triples.
    pub fn iter(&self) -> impl Iterator<Item = (Option<&[u8]>, i32, Format)> {
        self.buffers
            .iter()
            .zip(&self.lengths)
            .zip(&self.formats)
            .map(|((buf, len), fmt)| (buf.as_deref(), *len, *fmt))
    }
}
