use serde::{Deserialize, Serialize};

/// SQL dialect of the backing database. Supplies the pieces of the
/// canonical statements that differ between backends: placeholder style,
/// the current-timestamp-in-millis expression, column types and whether a
/// per-row `FOR UPDATE` lock is available. SQLite has no row locks; its
/// writers serialize on the database write lock instead, which preserves
/// the same per-name mutual-exclusion contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dialect {
    Postgres,
    Sqlite,
}

impl Dialect {
    fn placeholder(&self, i: usize) -> String {
        match self {
            Dialect::Postgres => format!("${}", i),
            Dialect::Sqlite => "?".to_string(),
        }
    }

    pub fn now_millis_expr(&self) -> &'static str {
        match self {
            Dialect::Postgres => "(extract(epoch from now()) * 1000)::bigint",
            Dialect::Sqlite => "CAST((julianday('now') - 2440587.5) * 86400000.0 AS INTEGER)",
        }
    }

    fn for_update(&self) -> &'static str {
        match self {
            Dialect::Postgres => " FOR UPDATE",
            Dialect::Sqlite => "",
        }
    }

    fn blob_type(&self) -> &'static str {
        match self {
            Dialect::Postgres => "BYTEA",
            Dialect::Sqlite => "BLOB",
        }
    }
}

/// Escapes LIKE metacharacters so a name prefix matches literally.
/// Directory names routinely contain `_`, which LIKE treats as a
/// single-character wildcard.
pub fn escape_like(prefix: &str) -> String {
    prefix
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

/// Qualified table and column names of the blob table. Configuration, not
/// hard-coded; defaults match the conventional layout.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TableSchema {
    #[serde(default = "default_table")]
    pub table: String,
    #[serde(default = "default_name_col")]
    pub name_col: String,
    #[serde(default = "default_value_col")]
    pub value_col: String,
    #[serde(default = "default_size_col")]
    pub size_col: String,
    #[serde(default = "default_modified_col")]
    pub modified_col: String,
    #[serde(default = "default_deleted_col")]
    pub deleted_col: String,
}

fn default_table() -> String {
    "index_blobs".to_string()
}

fn default_name_col() -> String {
    "name".to_string()
}

fn default_value_col() -> String {
    "value".to_string()
}

fn default_size_col() -> String {
    "size".to_string()
}

fn default_modified_col() -> String {
    "last_modified".to_string()
}

fn default_deleted_col() -> String {
    "deleted".to_string()
}

impl Default for TableSchema {
    fn default() -> Self {
        Self {
            table: default_table(),
            name_col: default_name_col(),
            value_col: default_value_col(),
            size_col: default_size_col(),
            modified_col: default_modified_col(),
            deleted_col: default_deleted_col(),
        }
    }
}

impl TableSchema {
    pub fn create_table_sql(&self, d: Dialect) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {} ({} VARCHAR(500) PRIMARY KEY, {} {}, {} BIGINT, {} BIGINT, {} BOOLEAN)",
            self.table,
            self.name_col,
            self.value_col,
            d.blob_type(),
            self.size_col,
            self.modified_col,
            self.deleted_col,
        )
    }

    /// Phase one of the write protocol: a placeholder row with an empty
    /// blob, claimed under the unique name key.
    pub fn insert_placeholder_sql(&self, d: Dialect) -> String {
        format!(
            "INSERT INTO {} ({}, {}, {}, {}, {}) VALUES ({}, {}, 0, {}, FALSE)",
            self.table,
            self.name_col,
            self.value_col,
            self.size_col,
            self.modified_col,
            self.deleted_col,
            d.placeholder(1),
            d.placeholder(2),
            d.now_millis_expr(),
        )
    }

    /// Phase two: locate and row-lock the placeholder just inserted.
    pub fn select_for_update_sql(&self, d: Dialect) -> String {
        format!(
            "SELECT {} FROM {} WHERE {} = {}{}",
            self.name_col,
            self.table,
            self.name_col,
            d.placeholder(1),
            d.for_update(),
        )
    }

    pub fn update_content_sql(&self, d: Dialect) -> String {
        format!(
            "UPDATE {} SET {} = {}, {} = {}, {} = {} WHERE {} = {}",
            self.table,
            self.value_col,
            d.placeholder(1),
            self.size_col,
            d.placeholder(2),
            self.modified_col,
            d.now_millis_expr(),
            self.name_col,
            d.placeholder(3),
        )
    }

    pub fn select_value_sql(&self, d: Dialect) -> String {
        format!(
            "SELECT {} FROM {} WHERE {} = {} AND {} = FALSE",
            self.value_col,
            self.table,
            self.name_col,
            d.placeholder(1),
            self.deleted_col,
        )
    }

    pub fn select_content_for_update_sql(&self, d: Dialect) -> String {
        format!(
            "SELECT {}, {} FROM {} WHERE {} = {} AND {} = FALSE{}",
            self.value_col,
            self.size_col,
            self.table,
            self.name_col,
            d.placeholder(1),
            self.deleted_col,
            d.for_update(),
        )
    }

    pub fn insert_content_sql(&self, d: Dialect) -> String {
        format!(
            "INSERT INTO {} ({}, {}, {}, {}, {}) VALUES ({}, {}, {}, {}, FALSE)",
            self.table,
            self.name_col,
            self.value_col,
            self.size_col,
            self.modified_col,
            self.deleted_col,
            d.placeholder(1),
            d.placeholder(2),
            d.placeholder(3),
            d.now_millis_expr(),
        )
    }

    pub fn list_names_sql(&self, d: Dialect) -> String {
        format!(
            "SELECT {} FROM {} WHERE {} LIKE {} ESCAPE '\\' AND {} = FALSE",
            self.name_col,
            self.table,
            self.name_col,
            d.placeholder(1),
            self.deleted_col,
        )
    }

    pub fn exists_sql(&self, d: Dialect) -> String {
        format!(
            "SELECT 1 FROM {} WHERE {} = {} AND {} = FALSE",
            self.table,
            self.name_col,
            d.placeholder(1),
            self.deleted_col,
        )
    }

    pub fn select_size_sql(&self, d: Dialect) -> String {
        format!(
            "SELECT {} FROM {} WHERE {} = {} AND {} = FALSE",
            self.size_col,
            self.table,
            self.name_col,
            d.placeholder(1),
            self.deleted_col,
        )
    }

    pub fn select_modified_sql(&self, d: Dialect) -> String {
        format!(
            "SELECT {} FROM {} WHERE {} = {} AND {} = FALSE",
            self.modified_col,
            self.table,
            self.name_col,
            d.placeholder(1),
            self.deleted_col,
        )
    }

    pub fn delete_row_sql(&self, d: Dialect) -> String {
        format!(
            "DELETE FROM {} WHERE {} = {}",
            self.table,
            self.name_col,
            d.placeholder(1),
        )
    }

    pub fn mark_deleted_sql(&self, d: Dialect) -> String {
        format!(
            "UPDATE {} SET {} = TRUE, {} = {} WHERE {} = {} AND {} = FALSE",
            self.table,
            self.deleted_col,
            self.modified_col,
            d.now_millis_expr(),
            self.name_col,
            d.placeholder(1),
            self.deleted_col,
        )
    }

    pub fn touch_sql(&self, d: Dialect) -> String {
        format!(
            "UPDATE {} SET {} = {} WHERE {} = {} AND {} = FALSE",
            self.table,
            self.modified_col,
            d.now_millis_expr(),
            self.name_col,
            d.placeholder(1),
            self.deleted_col,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_postgres_statement_shapes() {
        let schema = TableSchema::default();
        assert_eq!(
            schema.select_for_update_sql(Dialect::Postgres),
            "SELECT name FROM index_blobs WHERE name = $1 FOR UPDATE"
        );
        assert!(schema
            .insert_placeholder_sql(Dialect::Postgres)
            .starts_with("INSERT INTO index_blobs (name, value, size, last_modified, deleted)"));
    }

    #[test]
    fn test_sqlite_has_no_row_locks() {
        let schema = TableSchema::default();
        assert_eq!(
            schema.select_for_update_sql(Dialect::Sqlite),
            "SELECT name FROM index_blobs WHERE name = ?"
        );
    }

    #[test]
    fn test_list_pattern_is_escaped() {
        let schema = TableSchema::default();
        assert_eq!(
            schema.list_names_sql(Dialect::Sqlite),
            "SELECT name FROM index_blobs WHERE name LIKE ? ESCAPE '\\' AND deleted = FALSE"
        );
        assert_eq!(escape_like("index_0/"), "index\\_0/");
        assert_eq!(escape_like("100%_\\a"), "100\\%\\_\\\\a");
    }

    #[test]
    fn test_custom_names_are_honored() {
        let schema = TableSchema {
            table: "segments".to_string(),
            name_col: "file_name".to_string(),
            ..Default::default()
        };
        let sql = schema.select_value_sql(Dialect::Postgres);
        assert_eq!(
            sql,
            "SELECT value FROM segments WHERE file_name = $1 AND deleted = FALSE"
        );
    }
}
