//! Catalog data model.

use std::sync::Arc;

use tds_types::ColumnType;

/// A table or view name within a schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableEntry {
    /// Object name.
    pub name: String,
    /// True for views, false for user tables.
    pub is_view: bool,
}

/// One column of a table.
#[derive(Debug, Clone)]
pub struct TableColumn {
    /// Column name.
    pub name: String,
    /// 1-based ordinal position.
    pub ordinal: usize,
    /// Wire type descriptor.
    pub ty: ColumnType,
    /// Whether NULLs are allowed.
    pub nullable: bool,
    /// Whether the column is an identity column.
    pub identity: bool,
    /// SQL type name as declared (for DDL generation and diagnostics).
    pub sql_type: String,
}

/// Primary key columns in key-ordinal order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrimaryKey {
    /// Key column names, ordered by key ordinal.
    pub columns: Vec<String>,
}

/// The synthetic rowid shape derived from the primary key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowIdKind {
    /// Single-column key: rowid is the key column itself.
    Scalar(String),
    /// Composite key: rowid is a struct of the named key columns.
    Composite(Vec<String>),
}

impl PrimaryKey {
    /// The rowid shape for this key.
    #[must_use]
    pub fn rowid_kind(&self) -> Option<RowIdKind> {
        match self.columns.as_slice() {
            [] => None,
            [single] => Some(RowIdKind::Scalar(single.clone())),
            many => Some(RowIdKind::Composite(many.to_vec())),
        }
    }
}

/// Fully loaded table metadata: columns plus primary key.
#[derive(Debug, Clone)]
pub struct TableDetail {
    /// Schema name.
    pub schema: String,
    /// Table name.
    pub name: String,
    /// True for views.
    pub is_view: bool,
    /// Columns in ordinal order.
    pub columns: Arc<[TableColumn]>,
    /// Primary key, if the table has one.
    pub primary_key: Option<PrimaryKey>,
}

impl TableDetail {
    /// Find a column by name, case-insensitively (SQL Server's default
    /// catalog collation is case-insensitive).
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&TableColumn> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// The rowid shape for this table.
    #[must_use]
    pub fn rowid_kind(&self) -> Option<RowIdKind> {
        self.primary_key.as_ref().and_then(PrimaryKey::rowid_kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rowid_shapes() {
        let scalar = PrimaryKey {
            columns: vec!["id".into()],
        };
        assert_eq!(scalar.rowid_kind(), Some(RowIdKind::Scalar("id".into())));

        let composite = PrimaryKey {
            columns: vec!["tenant".into(), "id".into()],
        };
        assert_eq!(
            composite.rowid_kind(),
            Some(RowIdKind::Composite(vec!["tenant".into(), "id".into()]))
        );

        let empty = PrimaryKey { columns: vec![] };
        assert_eq!(empty.rowid_kind(), None);
    }
}
