//! Explicit table descriptions for the store's two tables.
//!
//! Each [`TableDef`] lists its columns with type and constraints. The
//! definitions drive DDL generation during
//! [`crate::persistence::StoreClient::auto_migrate`] and are checked against
//! `information_schema.columns` afterwards, so a live table whose shape
//! drifted from the code is reported instead of silently used.

/// Table holding one row per status page.
pub const STATUS_PAGE_TABLE: TableDef = TableDef {
    name: "status_page",
    key: "url",
    columns: &[
        ColumnDef::new("name", ColumnType::Text),
        ColumnDef::new("url", ColumnType::Text),
        ColumnDef::new("is_indexed", ColumnType::Boolean),
        ColumnDef::new("last_historically_scraped", ColumnType::TimestampTz),
        ColumnDef::new("last_currently_scraped", ColumnType::TimestampTz),
    ],
    indexes: &[],
};

/// Table holding one row per incident.
pub const INCIDENTS_TABLE: TableDef = TableDef {
    name: "incidents",
    key: "deep_link",
    columns: &[
        ColumnDef::new("title", ColumnType::Text),
        ColumnDef::new("components", ColumnType::Jsonb),
        ColumnDef::new("events", ColumnType::Jsonb),
        ColumnDef::new("start_time", ColumnType::TimestampTz),
        ColumnDef::new("end_time", ColumnType::TimestampTz).nullable(),
        ColumnDef::new("description", ColumnType::Text).nullable(),
        ColumnDef::new("deep_link", ColumnType::Text),
        ColumnDef::new("impact", ColumnType::Text),
        ColumnDef::new("status_page_url", ColumnType::Text),
    ],
    indexes: &["status_page_url"],
};

/// Columns refreshed when an incident upsert hits an existing `deep_link`.
///
/// A column missing here can never change once the incident exists.
pub const INCIDENT_UPSERT_COLUMNS: [&str; 8] = [
    "title",
    "components",
    "events",
    "start_time",
    "end_time",
    "description",
    "impact",
    "status_page_url",
];

/// PostgreSQL column types used by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    /// `TEXT`
    Text,
    /// `BOOLEAN`
    Boolean,
    /// `TIMESTAMPTZ`
    TimestampTz,
    /// `JSONB`
    Jsonb,
}

impl ColumnType {
    /// Type name used in DDL.
    #[must_use]
    pub const fn ddl(self) -> &'static str {
        match self {
            Self::Text => "TEXT",
            Self::Boolean => "BOOLEAN",
            Self::TimestampTz => "TIMESTAMPTZ",
            Self::Jsonb => "JSONB",
        }
    }

    /// Type name reported by `information_schema.columns.data_type`.
    #[must_use]
    pub const fn catalog_name(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Boolean => "boolean",
            Self::TimestampTz => "timestamp with time zone",
            Self::Jsonb => "jsonb",
        }
    }

    /// Zero value used to backfill existing rows when a `NOT NULL` column
    /// is added to a populated table. JSONB columns hold arrays.
    #[must_use]
    pub const fn zero_literal(self) -> &'static str {
        match self {
            Self::Text => "''",
            Self::Boolean => "FALSE",
            Self::TimestampTz => "'epoch'",
            Self::Jsonb => "'[]'::jsonb",
        }
    }
}

/// A column as reported by `information_schema.columns`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveColumn {
    /// Column name.
    pub name: String,
    /// `data_type` as reported by the catalog.
    pub data_type: String,
    /// Whether the live column accepts `NULL`.
    pub nullable: bool,
}

/// One column: name, type, nullability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnDef {
    /// Column name.
    pub name: &'static str,
    /// Column type.
    pub column_type: ColumnType,
    /// Whether `NULL` is allowed.
    pub nullable: bool,
}

impl ColumnDef {
    /// A `NOT NULL` column.
    #[must_use]
    pub const fn new(name: &'static str, column_type: ColumnType) -> Self {
        Self {
            name,
            column_type,
            nullable: false,
        }
    }

    /// Marks the column as nullable.
    #[must_use]
    pub const fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }
}

/// A table: its columns, unique key, and secondary indexes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableDef {
    /// Unqualified table name.
    pub name: &'static str,
    /// Primary key column; upserts resolve conflicts on it.
    pub key: &'static str,
    /// Columns in declaration order.
    pub columns: &'static [ColumnDef],
    /// Columns carrying a non-unique lookup index.
    pub indexes: &'static [&'static str],
}

impl TableDef {
    /// `"namespace"."table"`.
    #[must_use]
    pub fn qualified(&self, namespace: &str) -> String {
        format!("{}.{}", quote_ident(namespace), quote_ident(self.name))
    }

    /// `namespace.table` for log and error messages.
    #[must_use]
    pub fn display_name(&self, namespace: &str) -> String {
        format!("{namespace}.{}", self.name)
    }

    /// Column names in declaration order.
    pub fn column_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.columns.iter().map(|c| c.name)
    }

    /// `CREATE TABLE IF NOT EXISTS` with every declared column.
    #[must_use]
    pub fn create_table_sql(&self, namespace: &str) -> String {
        let columns = self
            .columns
            .iter()
            .map(|c| {
                let mut def = format!("{} {}", quote_ident(c.name), c.column_type.ddl());
                if c.name == self.key {
                    def.push_str(" PRIMARY KEY");
                } else if !c.nullable {
                    def.push_str(" NOT NULL");
                }
                def
            })
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "CREATE TABLE IF NOT EXISTS {} ({columns})",
            self.qualified(namespace)
        )
    }

    /// `ADD COLUMN IF NOT EXISTS` for each declared column.
    ///
    /// A `NOT NULL` column is added with its type's zero value as default,
    /// so rows already in the table are backfilled, and the default is
    /// dropped again right after.
    #[must_use]
    pub fn add_missing_columns_sql(&self, namespace: &str) -> Vec<String> {
        let table = self.qualified(namespace);
        let mut statements = Vec::with_capacity(self.columns.len() * 2);
        for c in self.columns {
            let column = quote_ident(c.name);
            let ddl = c.column_type.ddl();
            if c.nullable {
                statements.push(format!(
                    "ALTER TABLE {table} ADD COLUMN IF NOT EXISTS {column} {ddl}"
                ));
            } else {
                statements.push(format!(
                    "ALTER TABLE {table} ADD COLUMN IF NOT EXISTS {column} {ddl} NOT NULL DEFAULT {}",
                    c.column_type.zero_literal()
                ));
                statements.push(format!(
                    "ALTER TABLE {table} ALTER COLUMN {column} DROP DEFAULT"
                ));
            }
        }
        statements
    }

    /// `CREATE INDEX IF NOT EXISTS` for each lookup index.
    #[must_use]
    pub fn create_indexes_sql(&self, namespace: &str) -> Vec<String> {
        self.indexes
            .iter()
            .map(|column| {
                format!(
                    "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
                    quote_ident(&format!("idx_{}_{column}", self.name)),
                    self.qualified(namespace),
                    quote_ident(column)
                )
            })
            .collect()
    }

    /// Compares the declared columns with the live catalog listing.
    /// Extra live columns are ignored.
    ///
    /// # Errors
    ///
    /// Returns a description of every missing or mistyped column, and of
    /// every declared `NOT NULL` column that accepts `NULL` in the live
    /// table.
    pub fn verify_shape(&self, live: &[LiveColumn]) -> Result<(), String> {
        let mut problems = Vec::new();
        for column in self.columns {
            let Some(found) = live.iter().find(|l| l.name == column.name) else {
                problems.push(format!("column {} is missing", column.name));
                continue;
            };
            let expected = column.column_type.catalog_name();
            if found.data_type != expected {
                problems.push(format!(
                    "column {} has type {}, expected {expected}",
                    column.name, found.data_type
                ));
            }
            if found.nullable && !column.nullable {
                problems.push(format!(
                    "column {} is nullable, expected NOT NULL",
                    column.name
                ));
            }
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems.join("; "))
        }
    }

    /// `SELECT "a", "b", ... FROM "ns"."table"`.
    #[must_use]
    pub fn select_sql(&self, namespace: &str) -> String {
        let columns = self
            .column_names()
            .map(quote_ident)
            .collect::<Vec<_>>()
            .join(", ");
        format!("SELECT {columns} FROM {}", self.qualified(namespace))
    }

    /// `INSERT INTO "ns"."table" ("a", "b", ...) ` prefix for a
    /// multi-row `VALUES` list.
    #[must_use]
    pub fn insert_prefix(&self, namespace: &str) -> String {
        let columns = self
            .column_names()
            .map(quote_ident)
            .collect::<Vec<_>>()
            .join(", ");
        format!("INSERT INTO {} ({columns}) ", self.qualified(namespace))
    }

    /// ` ON CONFLICT ("key") DO UPDATE SET "c" = EXCLUDED."c", ...`
    #[must_use]
    pub fn on_conflict_update_sql(&self, update_columns: &[&str]) -> String {
        let assignments = update_columns
            .iter()
            .map(|column| {
                let quoted = quote_ident(column);
                format!("{quoted} = EXCLUDED.{quoted}")
            })
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            " ON CONFLICT ({}) DO UPDATE SET {assignments}",
            quote_ident(self.key)
        )
    }
}

/// Double-quotes an identifier, doubling embedded quotes.
#[must_use]
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn live(columns: &[(&str, &str, bool)]) -> Vec<LiveColumn> {
        columns
            .iter()
            .map(|(name, data_type, nullable)| LiveColumn {
                name: (*name).to_string(),
                data_type: (*data_type).to_string(),
                nullable: *nullable,
            })
            .collect()
    }

    #[test]
    fn create_status_page_table() {
        assert_eq!(
            STATUS_PAGE_TABLE.create_table_sql("mrs_hudson"),
            "CREATE TABLE IF NOT EXISTS \"mrs_hudson\".\"status_page\" (\
             \"name\" TEXT NOT NULL, \"url\" TEXT PRIMARY KEY, \"is_indexed\" BOOLEAN NOT NULL, \
             \"last_historically_scraped\" TIMESTAMPTZ NOT NULL, \
             \"last_currently_scraped\" TIMESTAMPTZ NOT NULL)"
        );
    }

    #[test]
    fn incidents_optional_columns_are_nullable() {
        let sql = INCIDENTS_TABLE.create_table_sql("ns");
        assert!(sql.contains("\"deep_link\" TEXT PRIMARY KEY"));
        assert!(sql.contains("\"end_time\" TIMESTAMPTZ,"));
        assert!(sql.contains("\"description\" TEXT,"));
        assert!(sql.contains("\"impact\" TEXT NOT NULL"));
    }

    #[test]
    fn upsert_columns_exclude_key_and_exist() {
        assert!(!INCIDENT_UPSERT_COLUMNS.contains(&INCIDENTS_TABLE.key));
        for column in INCIDENT_UPSERT_COLUMNS {
            assert!(INCIDENTS_TABLE.column_names().any(|c| c == column));
        }
        // every non-key column is refreshed
        assert_eq!(
            INCIDENT_UPSERT_COLUMNS.len(),
            INCIDENTS_TABLE.columns.len() - 1
        );
    }

    #[test]
    fn conflict_clause_updates_from_excluded() {
        let sql = INCIDENTS_TABLE.on_conflict_update_sql(&["title", "impact"]);
        assert_eq!(
            sql,
            " ON CONFLICT (\"deep_link\") DO UPDATE SET \
             \"title\" = EXCLUDED.\"title\", \"impact\" = EXCLUDED.\"impact\""
        );
    }

    #[test]
    fn insert_prefix_lists_columns_in_order() {
        assert_eq!(
            STATUS_PAGE_TABLE.insert_prefix("ns"),
            "INSERT INTO \"ns\".\"status_page\" (\"name\", \"url\", \"is_indexed\", \
             \"last_historically_scraped\", \"last_currently_scraped\") "
        );
    }

    #[test]
    fn select_lists_columns() {
        assert_eq!(
            INCIDENTS_TABLE.select_sql("ns"),
            "SELECT \"title\", \"components\", \"events\", \"start_time\", \"end_time\", \
             \"description\", \"deep_link\", \"impact\", \"status_page_url\" \
             FROM \"ns\".\"incidents\""
        );
    }

    #[test]
    fn index_sql_is_idempotent_form() {
        let sql = INCIDENTS_TABLE.create_indexes_sql("ns");
        assert_eq!(
            sql,
            vec![
                "CREATE INDEX IF NOT EXISTS \"idx_incidents_status_page_url\" \
                 ON \"ns\".\"incidents\" (\"status_page_url\")"
                    .to_string()
            ]
        );
        assert!(STATUS_PAGE_TABLE.create_indexes_sql("ns").is_empty());
    }

    #[test]
    fn add_columns_covers_every_column() {
        let stmts = INCIDENTS_TABLE.add_missing_columns_sql("ns");
        for column in INCIDENTS_TABLE.column_names() {
            let add = format!(
                "ALTER TABLE \"ns\".\"incidents\" ADD COLUMN IF NOT EXISTS \"{column}\""
            );
            assert_eq!(stmts.iter().filter(|s| s.starts_with(&add)).count(), 1);
        }
    }

    #[test]
    fn required_columns_are_backfilled_then_default_dropped() {
        let stmts = STATUS_PAGE_TABLE.add_missing_columns_sql("ns");
        assert!(stmts.contains(
            &"ALTER TABLE \"ns\".\"status_page\" ADD COLUMN IF NOT EXISTS \"name\" TEXT \
              NOT NULL DEFAULT ''"
                .to_string()
        ));
        assert!(stmts.contains(
            &"ALTER TABLE \"ns\".\"status_page\" ADD COLUMN IF NOT EXISTS \"is_indexed\" \
              BOOLEAN NOT NULL DEFAULT FALSE"
                .to_string()
        ));
        assert!(stmts.contains(
            &"ALTER TABLE \"ns\".\"status_page\" ALTER COLUMN \"last_currently_scraped\" \
              DROP DEFAULT"
                .to_string()
        ));
    }

    #[test]
    fn optional_columns_are_added_without_default() {
        let stmts = INCIDENTS_TABLE.add_missing_columns_sql("ns");
        assert!(stmts.contains(
            &"ALTER TABLE \"ns\".\"incidents\" ADD COLUMN IF NOT EXISTS \"end_time\" TIMESTAMPTZ"
                .to_string()
        ));
        assert!(!stmts.iter().any(|s| s.contains("\"end_time\" DROP DEFAULT")));
    }

    #[test]
    fn matching_shape_verifies() {
        let columns = live(&[
            ("name", "text", false),
            ("url", "text", false),
            ("is_indexed", "boolean", false),
            ("last_historically_scraped", "timestamp with time zone", false),
            ("last_currently_scraped", "timestamp with time zone", false),
            ("legacy_notes", "text", true),
        ]);
        assert_eq!(STATUS_PAGE_TABLE.verify_shape(&columns), Ok(()));
    }

    #[test]
    fn drifted_shape_is_reported() {
        let columns = live(&[
            ("name", "text", false),
            ("url", "text", false),
            ("is_indexed", "integer", false),
            ("last_historically_scraped", "timestamp with time zone", false),
        ]);
        assert_eq!(
            STATUS_PAGE_TABLE.verify_shape(&columns),
            Err("column is_indexed has type integer, expected boolean; \
                 column last_currently_scraped is missing"
                .to_string())
        );
    }

    #[test]
    fn nullable_required_column_is_reported() {
        let columns = live(&[
            ("name", "text", true),
            ("url", "text", false),
            ("is_indexed", "boolean", true),
            ("last_historically_scraped", "timestamp with time zone", false),
            ("last_currently_scraped", "timestamp with time zone", false),
        ]);
        assert_eq!(
            STATUS_PAGE_TABLE.verify_shape(&columns),
            Err("column name is nullable, expected NOT NULL; \
                 column is_indexed is nullable, expected NOT NULL"
                .to_string())
        );
    }

    #[test]
    fn nullable_optional_column_verifies() {
        let columns: Vec<LiveColumn> = INCIDENTS_TABLE
            .columns
            .iter()
            .map(|c| LiveColumn {
                name: c.name.to_string(),
                data_type: c.column_type.catalog_name().to_string(),
                nullable: c.nullable,
            })
            .collect();
        assert_eq!(INCIDENTS_TABLE.verify_shape(&columns), Ok(()));
    }

    #[test]
    fn quote_ident_escapes_quotes() {
        assert_eq!(quote_ident("plain"), "\"plain\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }
}
