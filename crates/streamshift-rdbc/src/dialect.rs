//! SQL dialect abstraction for streamshift-rdbc
//!
//! - SqlDialect: trait for database-specific SQL generation
//! - Identifier quoting
//! - Source type to target DDL type mapping
//! - Catalog queries (existence, columns, primary key)
//! - Mutation statements (INSERT, UPDATE, DELETE, ON CONFLICT upsert)
//!
//! Generated statements use positional `?` markers. Backends rewrite them to
//! their native placeholder syntax at execution time.

use crate::types::ColumnMetadata;

/// A column in a `CREATE TABLE` statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDefinition {
    /// Column name (unquoted)
    pub name: String,
    /// Target DDL type, e.g. `VARCHAR(255)`
    pub data_type: String,
    /// Emit `NOT NULL`
    pub not_null: bool,
}

impl ColumnDefinition {
    /// Create a nullable column definition
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            not_null: false,
        }
    }

    /// Mark the column NOT NULL
    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }
}

/// SQL dialect for vendor-specific SQL generation
pub trait SqlDialect: Send + Sync {
    /// Get the dialect name
    fn name(&self) -> &'static str;

    /// Quote an identifier (table, column name)
    fn quote_identifier(&self, name: &str) -> String;

    /// Quote a table name, qualified by `schema` when given
    fn quote_table(&self, schema: Option<&str>, table: &str) -> String {
        match schema {
            Some(schema) => format!(
                "{}.{}",
                self.quote_identifier(schema),
                self.quote_identifier(table)
            ),
            None => self.quote_identifier(table),
        }
    }

    /// Get the native placeholder for the 1-based parameter `index`
    fn placeholder(&self, index: usize) -> String;

    /// SQL returning one boolean row: does `(schema, table)` exist
    fn table_exists_sql(&self) -> String;

    /// SQL listing columns of `(schema, table, schema, table)` in ordinal order
    fn list_columns_sql(&self) -> String;

    /// SQL listing primary key column names of `(schema, table)` in key order
    fn primary_key_sql(&self) -> String;

    /// Map a declared source column type to the target DDL type.
    ///
    /// Returns `None` for types the dialect does not recognise.
    fn native_type(&self, column: &ColumnMetadata) -> Option<String>;

    /// Generate `CREATE TABLE IF NOT EXISTS`
    fn create_table_sql(
        &self,
        schema: Option<&str>,
        table: &str,
        columns: &[ColumnDefinition],
        primary_key: &[String],
    ) -> String;

    /// Generate an insert statement
    fn insert_sql(&self, schema: Option<&str>, table: &str, columns: &[&str]) -> String;

    /// Generate an update statement; parameters are SET values then WHERE values
    fn update_sql(
        &self,
        schema: Option<&str>,
        table: &str,
        set_columns: &[&str],
        where_columns: &[&str],
    ) -> String;

    /// Generate a delete statement with equality conditions
    fn delete_sql(&self, schema: Option<&str>, table: &str, where_columns: &[&str]) -> String;

    /// Generate an upsert statement
    fn upsert_sql(
        &self,
        schema: Option<&str>,
        table: &str,
        columns: &[&str],
        conflict_columns: &[&str],
    ) -> String;
}

/// PostgreSQL dialect
#[derive(Debug, Clone, Default)]
pub struct PostgresDialect;

impl PostgresDialect {
    fn column_list(&self, columns: &[&str]) -> String {
        columns
            .iter()
            .map(|c| self.quote_identifier(c))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn assignments(&self, columns: &[&str], separator: &str) -> String {
        columns
            .iter()
            .map(|c| format!("{} = ?", self.quote_identifier(c)))
            .collect::<Vec<_>>()
            .join(separator)
    }

    fn markers(count: usize) -> String {
        vec!["?"; count].join(", ")
    }
}

impl SqlDialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "PostgreSQL"
    }

    fn quote_identifier(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    fn placeholder(&self, index: usize) -> String {
        format!("${}", index)
    }

    fn table_exists_sql(&self) -> String {
        "SELECT EXISTS(SELECT 1 FROM information_schema.tables \
         WHERE table_schema = ? AND table_name = ?) AS present"
            .to_string()
    }

    fn list_columns_sql(&self) -> String {
        r#"SELECT
                c.column_name::text AS column_name,
                c.data_type::text AS data_type,
                (c.is_nullable = 'YES') AS nullable,
                c.ordinal_position::int4 AS ordinal_position,
                c.character_maximum_length::int4 AS character_maximum_length,
                c.numeric_precision::int4 AS numeric_precision,
                c.numeric_scale::int4 AS numeric_scale,
                pk.ordinal_position::int4 AS pk_ordinal
            FROM information_schema.columns c
            LEFT JOIN (
                SELECT ku.column_name, ku.ordinal_position
                FROM information_schema.table_constraints tc
                JOIN information_schema.key_column_usage ku
                    ON tc.constraint_name = ku.constraint_name
                    AND tc.table_schema = ku.table_schema
                    AND tc.table_name = ku.table_name
                WHERE tc.constraint_type = 'PRIMARY KEY'
                    AND tc.table_schema = ?
                    AND tc.table_name = ?
            ) pk ON c.column_name = pk.column_name
            WHERE c.table_schema = ? AND c.table_name = ?
            ORDER BY c.ordinal_position"#
            .to_string()
    }

    fn primary_key_sql(&self) -> String {
        r#"SELECT kcu.column_name::text AS column_name
            FROM information_schema.key_column_usage kcu
            JOIN information_schema.table_constraints tc
                ON kcu.constraint_name = tc.constraint_name
                AND kcu.table_schema = tc.table_schema
                AND kcu.table_name = tc.table_name
            WHERE tc.constraint_type = 'PRIMARY KEY'
                AND tc.table_schema = ?
                AND tc.table_name = ?
            ORDER BY kcu.ordinal_position"#
            .to_string()
    }

    fn native_type(&self, column: &ColumnMetadata) -> Option<String> {
        let mapped = match column.type_name.trim().to_lowercase().as_str() {
            "varchar" | "character varying" => match column.max_length {
                Some(len) => format!("VARCHAR({})", len),
                None => "TEXT".to_string(),
            },
            "char" | "character" => match column.max_length {
                Some(len) => format!("CHAR({})", len),
                None => "CHAR(1)".to_string(),
            },
            "text" => "TEXT".to_string(),
            "integer" | "int" | "int4" => "INTEGER".to_string(),
            "bigint" | "int8" => "BIGINT".to_string(),
            "smallint" | "int2" => "SMALLINT".to_string(),
            "decimal" | "numeric" => match (column.precision, column.scale) {
                (Some(p), Some(s)) => format!("NUMERIC({},{})", p, s),
                (Some(p), None) => format!("NUMERIC({})", p),
                _ => "NUMERIC".to_string(),
            },
            "real" | "float4" => "REAL".to_string(),
            "double precision" | "float8" => "DOUBLE PRECISION".to_string(),
            "boolean" | "bool" => "BOOLEAN".to_string(),
            "date" => "DATE".to_string(),
            "time" | "time without time zone" => "TIME".to_string(),
            "timestamp" | "timestamp without time zone" => "TIMESTAMP".to_string(),
            "timestamp with time zone" => "TIMESTAMPTZ".to_string(),
            "json" => "JSON".to_string(),
            "jsonb" => "JSONB".to_string(),
            "uuid" => "UUID".to_string(),
            _ => return None,
        };
        Some(mapped)
    }

    fn create_table_sql(
        &self,
        schema: Option<&str>,
        table: &str,
        columns: &[ColumnDefinition],
        primary_key: &[String],
    ) -> String {
        let mut definitions: Vec<String> = columns
            .iter()
            .map(|c| {
                let mut def = format!("{} {}", self.quote_identifier(&c.name), c.data_type);
                if c.not_null {
                    def.push_str(" NOT NULL");
                }
                def
            })
            .collect();

        if !primary_key.is_empty() {
            let keys: Vec<&str> = primary_key.iter().map(String::as_str).collect();
            definitions.push(format!("PRIMARY KEY ({})", self.column_list(&keys)));
        }

        format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            self.quote_table(schema, table),
            definitions.join(", ")
        )
    }

    fn insert_sql(&self, schema: Option<&str>, table: &str, columns: &[&str]) -> String {
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.quote_table(schema, table),
            self.column_list(columns),
            Self::markers(columns.len())
        )
    }

    fn update_sql(
        &self,
        schema: Option<&str>,
        table: &str,
        set_columns: &[&str],
        where_columns: &[&str],
    ) -> String {
        format!(
            "UPDATE {} SET {} WHERE {}",
            self.quote_table(schema, table),
            self.assignments(set_columns, ", "),
            self.assignments(where_columns, " AND ")
        )
    }

    fn delete_sql(&self, schema: Option<&str>, table: &str, where_columns: &[&str]) -> String {
        format!(
            "DELETE FROM {} WHERE {}",
            self.quote_table(schema, table),
            self.assignments(where_columns, " AND ")
        )
    }

    fn upsert_sql(
        &self,
        schema: Option<&str>,
        table: &str,
        columns: &[&str],
        conflict_columns: &[&str],
    ) -> String {
        let updates: Vec<String> = columns
            .iter()
            .filter(|c| !conflict_columns.contains(c))
            .map(|c| {
                let quoted = self.quote_identifier(c);
                format!("{} = EXCLUDED.{}", quoted, quoted)
            })
            .collect();

        let action = if updates.is_empty() {
            "DO NOTHING".to_string()
        } else {
            format!("DO UPDATE SET {}", updates.join(", "))
        };

        format!(
            "{} ON CONFLICT ({}) {}",
            self.insert_sql(schema, table, columns),
            self.column_list(conflict_columns),
            action
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_postgres_dialect() {
        let dialect = PostgresDialect;
        assert_eq!(dialect.name(), "PostgreSQL");
        assert_eq!(dialect.quote_identifier("users"), "\"users\"");
        assert_eq!(dialect.placeholder(1), "$1");
    }

    #[test]
    fn test_quote_table() {
        let dialect = PostgresDialect;
        assert_eq!(dialect.quote_table(None, "users"), "\"users\"");
        assert_eq!(
            dialect.quote_table(Some("replica"), "users"),
            "\"replica\".\"users\""
        );
        assert_eq!(
            dialect.quote_table(Some("my\"schema"), "users"),
            "\"my\"\"schema\".\"users\""
        );
    }

    #[test]
    fn test_insert_sql() {
        let sql = PostgresDialect.insert_sql(None, "users", &["id", "username"]);
        assert_eq!(
            sql,
            "INSERT INTO \"users\" (\"id\", \"username\") VALUES (?, ?)"
        );
    }

    #[test]
    fn test_update_sql_orders_set_before_where() {
        let sql = PostgresDialect.update_sql(None, "users", &["id", "name"], &["id"]);
        assert_eq!(
            sql,
            "UPDATE \"users\" SET \"id\" = ?, \"name\" = ? WHERE \"id\" = ?"
        );
    }

    #[test]
    fn test_upsert_all_key_columns_does_nothing() {
        let sql = PostgresDialect.upsert_sql(None, "tags", &["tag"], &["tag"]);
        assert_eq!(
            sql,
            "INSERT INTO \"tags\" (\"tag\") VALUES (?) ON CONFLICT (\"tag\") DO NOTHING"
        );
    }

    #[test]
    fn test_unrecognised_type() {
        let col = ColumnMetadata::new("shape", "geometry");
        assert_eq!(PostgresDialect.native_type(&col), None);
    }
}
