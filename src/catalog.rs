//! Table metadata resolution.
//!
//! The planner only needs name-to-definition lookups. [`InMemoryCatalog`]
//! serves tests and embedders that register tables up front; a
//! [`MemTable`] gives a table rows of its own so the pull-iterator
//! convention can scan and modify it without an external store.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{Error, Result};
use crate::plan::traits::Convention;
use crate::types::RowType;
use crate::value::Row;

/// Resolves table names for the planner and the execution compiler.
pub trait Catalog: Send + Sync {
    /// Looks up a table by name.
    fn table(&self, name: &str) -> Result<Arc<TableDef>>;
}

/// Definition of one table as seen by the compiler.
#[derive(Clone, Debug)]
pub struct TableDef {
    /// Logical name.
    pub name: String,
    /// Qualified physical path (schema, table), rendered dotted.
    pub path: Vec<String>,
    /// Logical row type.
    pub row_type: RowType,
    /// Convention of the store holding the table.
    pub convention: Convention,
    /// Primary key field positions; empty when unknown.
    pub primary_key: Vec<usize>,
    /// Physical column names when they differ from the logical ones.
    pub physical_names: Option<Vec<String>>,
    /// Rows held in process, for the pull-iterator convention.
    pub storage: Option<Arc<MemTable>>,
}

impl TableDef {
    /// Table named `name` living in the pull-iterator convention.
    pub fn new(name: impl Into<String>, row_type: RowType) -> Self {
        let name = name.into();
        Self {
            path: vec![name.clone()],
            name,
            row_type,
            convention: Convention::PullIterator,
            primary_key: Vec::new(),
            physical_names: None,
            storage: None,
        }
    }

    /// Sets the physical path.
    pub fn with_path<I, S>(mut self, path: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.path = path.into_iter().map(Into::into).collect();
        self
    }

    /// Places the table in another convention.
    pub fn in_convention(mut self, convention: Convention) -> Self {
        self.convention = convention;
        self
    }

    /// Declares the primary key.
    pub fn with_primary_key(mut self, fields: impl Into<Vec<usize>>) -> Self {
        self.primary_key = fields.into();
        self
    }

    /// Declares physical column names, one per logical field.
    pub fn with_physical_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.physical_names = Some(names.into_iter().map(Into::into).collect());
        self
    }

    /// Attaches in-process rows.
    pub fn with_rows(mut self, rows: Vec<Row>) -> Self {
        self.storage = Some(Arc::new(MemTable::new(rows)));
        self
    }

    /// Last path component, the name used in generated queries.
    pub fn physical_table(&self) -> &str {
        self.path.last().map(String::as_str).unwrap_or(&self.name)
    }

    /// Physical name of field `index`.
    pub fn physical_name(&self, index: usize) -> Option<&str> {
        match &self.physical_names {
            Some(names) => names.get(index).map(String::as_str),
            None => self.row_type.field(index).map(|field| field.name.as_str()),
        }
    }

    /// Whether any physical name differs from its logical name.
    pub fn has_physical_mapping(&self) -> bool {
        match &self.physical_names {
            Some(names) => names
                .iter()
                .zip(self.row_type.names())
                .any(|(physical, logical)| physical != logical),
            None => false,
        }
    }

    /// In-process rows, failing when the table has none.
    pub fn mem_table(&self) -> Result<&Arc<MemTable>> {
        self.storage.as_ref().ok_or_else(|| {
            Error::unsupported(
                self.convention.to_string(),
                format!("table {}", self.name),
                format!("table '{}' has no in-process storage", self.name),
            )
        })
    }
}

/// In-process row storage guarded for concurrent readers.
#[derive(Debug, Default)]
pub struct MemTable {
    rows: RwLock<Vec<Row>>,
}

impl MemTable {
    /// Table holding `rows`.
    pub fn new(rows: Vec<Row>) -> Self {
        Self {
            rows: RwLock::new(rows),
        }
    }

    /// Snapshot of the current rows.
    pub fn rows(&self) -> Vec<Row> {
        self.rows.read().clone()
    }

    /// Number of stored rows.
    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }

    /// Appends rows, returning how many were added.
    pub fn insert(&self, rows: Vec<Row>) -> usize {
        let count = rows.len();
        self.rows.write().extend(rows);
        count
    }

    /// Rewrites every row for which `update` returns `Some`, returning the
    /// number of changed rows. Nothing changes when `update` fails.
    pub fn update_where(
        &self,
        mut update: impl FnMut(&Row) -> Result<Option<Row>>,
    ) -> Result<usize> {
        let mut rows = self.rows.write();
        let replacements = rows
            .iter()
            .map(|row| update(row))
            .collect::<Result<Vec<_>>>()?;
        let mut changed = 0;
        for (row, replacement) in rows.iter_mut().zip(replacements) {
            if let Some(next) = replacement {
                *row = next;
                changed += 1;
            }
        }
        Ok(changed)
    }

    /// Removes every row matching `predicate`, returning how many went.
    /// Nothing is removed when `predicate` fails.
    pub fn delete_where(&self, mut predicate: impl FnMut(&Row) -> Result<bool>) -> Result<usize> {
        let mut rows = self.rows.write();
        let doomed = rows
            .iter()
            .map(|row| predicate(row))
            .collect::<Result<Vec<bool>>>()?;
        let removed = doomed.iter().filter(|doomed| **doomed).count();
        let mut doomed = doomed.into_iter();
        rows.retain(|_| !doomed.next().unwrap_or(false));
        Ok(removed)
    }
}

/// Catalog populated up front.
#[derive(Default)]
pub struct InMemoryCatalog {
    tables: HashMap<String, Arc<TableDef>>,
}

impl InMemoryCatalog {
    /// Empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a table under its name.
    pub fn with_table(mut self, table: TableDef) -> Self {
        self.tables.insert(table.name.clone(), Arc::new(table));
        self
    }
}

impl Catalog for InMemoryCatalog {
    fn table(&self, name: &str) -> Result<Arc<TableDef>> {
        self.tables
            .get(name)
            .cloned()
            .ok_or_else(|| Error::TableNotFound(name.to_owned()))
    }
}
