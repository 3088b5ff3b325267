//! Named-parameter statements.
//!
//! SQL is written with `:fieldName` placeholders and compiled once into the
//! positional form the database driver understands, together with the ordered
//! list of names. Values are then looked up by name on each bound row, so the
//! column order in the statement can never drift from the order of the values.

use super::traits::StorageError;

/// A single value bound into a statement.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    /// Microseconds since the Unix epoch
    TimestampMicros(i64),
}

/// Rows that expose their fields by name for parameter binding.
pub trait NamedFields {
    fn field(&self, name: &str) -> Option<FieldValue>;
}

#[derive(Debug, Clone)]
pub struct NamedStatement {
    sql: String,
    names: Vec<String>,
}

impl NamedStatement {
    /// Compile a statement with `:name` placeholders.
    ///
    /// Placeholders inside single-quoted literals and `::` casts are left
    /// untouched. A statement without placeholders is rejected.
    pub fn parse(named_sql: &str) -> Result<Self, StorageError> {
        let chars: Vec<char> = named_sql.chars().collect();
        let mut sql = String::with_capacity(named_sql.len());
        let mut names = Vec::new();
        let mut in_literal = false;
        let mut i = 0;

        while i < chars.len() {
            let c = chars[i];

            if c == '\'' {
                in_literal = !in_literal;
                sql.push(c);
                i += 1;
                continue;
            }

            if in_literal || c != ':' {
                sql.push(c);
                i += 1;
                continue;
            }

            // `::` is a cast
            if chars.get(i + 1) == Some(&':') {
                sql.push_str("::");
                i += 2;
                continue;
            }

            let start = i + 1;
            let mut end = start;
            while end < chars.len()
                && (chars[end].is_ascii_alphanumeric() || chars[end] == '_')
            {
                end += 1;
            }

            if end == start || chars[start].is_ascii_digit() {
                return Err(StorageError::Statement(format!(
                    "dangling ':' at position {} in '{}'",
                    i, named_sql
                )));
            }

            names.push(chars[start..end].iter().collect());
            sql.push('?');
            i = end;
        }

        if in_literal {
            return Err(StorageError::Statement(format!(
                "unterminated string literal in '{}'",
                named_sql
            )));
        }

        if names.is_empty() {
            return Err(StorageError::Statement(format!(
                "no named parameters in '{}'",
                named_sql
            )));
        }

        Ok(Self { sql, names })
    }

    /// Positional SQL to hand to the driver
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Placeholder names in positional order
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Resolve every placeholder against `row`, in positional order.
    pub fn bind<R: NamedFields + ?Sized>(&self, row: &R) -> Result<Vec<FieldValue>, StorageError> {
        self.names
            .iter()
            .map(|name| {
                row.field(name)
                    .ok_or_else(|| StorageError::UnboundParameter(name.clone()))
            })
            .collect()
    }
}
