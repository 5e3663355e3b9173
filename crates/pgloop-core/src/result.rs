//! Marshalled command results.
//!
//! One [`ResultTable`] is the unit a completion callback receives per
//! server result. A single command may produce several (for example a
//! multi-statement batch); the driver delivers each as it is drained.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result, TypeError};
use crate::params::Format;
use crate::value::{FromValue, Value};

/// Execution status the client library attaches to one result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResultStatus {
    /// The query string was empty
    EmptyQuery,
    /// A command that returns no rows completed
    CommandOk,
    /// A command that returns rows completed
    TuplesOk,
    /// Copy-out transfer started
    CopyOut,
    /// Copy-in transfer started
    CopyIn,
    /// Copy-both transfer started
    CopyBoth,
    /// A single row in row-by-row mode
    SingleTuple,
    /// The server's response was not understood
    BadResponse,
    /// A notice or warning occupied the result slot
    NonfatalError,
    /// The command failed
    FatalError,
}

impl ResultStatus {
    /// Does this status represent an application-level failure?
    ///
    /// Failed results are still *delivered* (with message and structured
    /// diagnostics); they do not abort the drain of later results.
    pub const fn is_error(self) -> bool {
        matches!(
            self,
            ResultStatus::BadResponse | ResultStatus::NonfatalError | ResultStatus::FatalError
        )
    }
}

/// Metadata for one result column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldInfo {
    /// Column name
    pub name: String,
    /// Server type OID
    pub type_oid: u32,
    /// Wire format the cells of this column arrived in
    pub format: Format,
}

/// Column metadata shared by every row of one result.
#[derive(Debug, Default)]
pub struct Fields {
    infos: Vec<FieldInfo>,
    by_name: HashMap<String, usize>,
}

impl Fields {
    pub fn new(infos: Vec<FieldInfo>) -> Self {
        let by_name = infos
            .iter()
            .enumerate()
            .map(|(i, f)| (f.name.clone(), i))
            .collect();
        Self { infos, by_name }
    }

    pub fn len(&self) -> usize {
        self.infos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&FieldInfo> {
        self.infos.get(index)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldInfo> {
        self.infos.iter()
    }
}

/// A single result row.
///
/// Field metadata is shared across all rows of a result, so cloning rows out
/// of a [`ResultTable`] stays cheap.
#[derive(Debug, Clone)]
pub struct Row {
    fields: Arc<Fields>,
    values: Vec<Value>,
}

impl Row {
    pub fn new(fields: Arc<Fields>, values: Vec<Value>) -> Self {
        Self { fields, values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Get a cell by column index.
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Get a cell by column name.
    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        self.fields.index_of(name).and_then(|i| self.values.get(i))
    }

    /// Get a typed cell by column name.
    pub fn get_named<T: FromValue>(&self, name: &str) -> Result<T> {
        let value = self.get_by_name(name).ok_or_else(|| {
            Error::Type(TypeError {
                expected: std::any::type_name::<T>(),
                actual: format!("column '{}' not found", name),
                column: Some(name.to_string()),
            })
        })?;
        T::from_value(value).map_err(|e| match e {
            Error::Type(mut te) => {
                te.column = Some(name.to_string());
                Error::Type(te)
            }
            other => other,
        })
    }

    /// Iterate over `(column_name, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields
            .iter()
            .map(|f| f.name.as_str())
            .zip(self.values.iter())
    }
}

/// One marshalled server result.
#[derive(Debug, Clone, Default)]
pub struct ResultTable {
    /// Command tag, e.g. `SELECT 3` or `INSERT 0 1`
    pub command_tag: String,
    /// Rows affected, when the command tag carries a count
    pub rows_affected: Option<u64>,
    /// OID of an inserted row, when the server reports one
    pub oid: Option<u32>,
    /// Shared column metadata
    pub fields: Arc<Fields>,
    /// Result rows
    pub rows: Vec<Row>,
}

impl ResultTable {
    /// Build a table from column metadata and per-row cell vectors.
    pub fn new(command_tag: impl Into<String>, infos: Vec<FieldInfo>, rows: Vec<Vec<Value>>) -> Self {
        let fields = Arc::new(Fields::new(infos));
        let rows = rows
            .into_iter()
            .map(|values| Row::new(Arc::clone(&fields), values))
            .collect();
        Self {
            command_tag: command_tag.into(),
            rows_affected: None,
            oid: None,
            fields,
            rows,
        }
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Check whether the result has no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
