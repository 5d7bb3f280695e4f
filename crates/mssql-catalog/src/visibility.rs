//! Schema/table visibility filters.

use regex::{Regex, RegexBuilder};

use crate::error::CatalogError;

/// Optional case-insensitive regex filters over schema and table names.
///
/// A filtered-out name behaves as nonexistent for every lookup. Patterns
/// are validated when set; an invalid pattern fails fast.
#[derive(Debug, Clone, Default)]
pub struct VisibilityFilters {
    schema: Option<Regex>,
    table: Option<Regex>,
}

fn compile(pattern: &str) -> Result<Regex, CatalogError> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|e| CatalogError::InvalidPattern {
            pattern: pattern.to_string(),
            detail: e.to_string(),
        })
}

impl VisibilityFilters {
    /// Filters from optional pattern strings.
    pub fn new(
        schema_pattern: Option<&str>,
        table_pattern: Option<&str>,
    ) -> Result<Self, CatalogError> {
        Ok(Self {
            schema: schema_pattern.map(compile).transpose()?,
            table: table_pattern.map(compile).transpose()?,
        })
    }

    /// Whether a schema is visible.
    #[must_use]
    pub fn schema_visible(&self, name: &str) -> bool {
        self.schema.as_ref().is_none_or(|re| re.is_match(name))
    }

    /// Whether a table in a visible schema is visible.
    #[must_use]
    pub fn table_visible(&self, name: &str) -> bool {
        self.table.as_ref().is_none_or(|re| re.is_match(name))
    }
}
