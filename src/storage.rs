//! SQLite-backed relational store holding the raw, staging and warehouse
//! namespaces. Each namespace is an attached database, so tables are
//! addressed as `"namespace"."table"` exactly as schema-qualified names.

use crate::constants::{COLUMNS_SUFFIX, COLUMN_NAME, LOAD_ID, LOAD_TS, ORDINAL, SHADOW_SUFFIX};
use crate::error::{PipelineError, Result};
use crate::table::{cell_from_sql, Table, Value};
use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;

/// A schema-qualified table name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableRef {
    pub schema: String,
    pub name: String,
}

impl TableRef {
    pub fn new(schema: &str, name: &str) -> Self {
        Self {
            schema: schema.to_string(),
            name: name.to_string(),
        }
    }

    /// Quoted `"schema"."name"` for use in SQL text.
    pub fn qualified(&self) -> String {
        format!("{}.{}", quote_ident(&self.schema), quote_ident(&self.name))
    }

    fn shadow(&self) -> TableRef {
        TableRef::new(&self.schema, &format!("{}{}", self.name, SHADOW_SUFFIX))
    }

    /// Table recording which columns each load generation carried.
    pub fn manifest(&self) -> TableRef {
        TableRef::new(&self.schema, &format!("{}{}", self.name, COLUMNS_SUFFIX))
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

// Two or more characters so a Windows drive letter is not taken for a scheme.
static URL_SCHEME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Za-z][A-Za-z0-9+.\-]+):").unwrap());

/// Path (or `:memory:`) named by a connection string. Only the `sqlite`
/// scheme is accepted; a bare path has no scheme.
fn sqlite_target(db_url: &str) -> Result<&str> {
    let db_url = db_url.trim();
    if let Some(caps) = URL_SCHEME.captures(db_url) {
        let scheme = &caps[1];
        if !scheme.eq_ignore_ascii_case("sqlite") {
            return Err(PipelineError::Configuration(format!(
                "unsupported DB_URL scheme '{}': only sqlite is supported",
                scheme
            )));
        }
        let rest = &db_url[scheme.len() + 1..];
        return Ok(rest.strip_prefix("//").unwrap_or(rest).trim());
    }
    Ok(db_url)
}

pub struct Store {
    conn: Connection,
    /// `None` for in-memory databases; namespaces then attach in memory too.
    main_path: Option<PathBuf>,
}

impl Store {
    /// Open the store named by a connection string: `sqlite://path`,
    /// `sqlite:path`, `sqlite::memory:` or a bare path. Any other scheme is
    /// a configuration error.
    pub fn open(db_url: &str) -> Result<Self> {
        let target = sqlite_target(db_url)?;

        if target.is_empty() || target == ":memory:" {
            return Self::open_in_memory();
        }

        let path = PathBuf::from(target);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(&path)?;
        debug!("Opened store at {}", path.display());
        Ok(Self {
            conn,
            main_path: Some(path),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            conn: Connection::open_in_memory()?,
            main_path: None,
        })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Attach the namespace if it is not attached yet. Equivalent of
    /// `CREATE SCHEMA IF NOT EXISTS`.
    pub fn ensure_namespace(&self, schema: &str) -> Result<()> {
        let attached: Vec<String> = {
            let mut stmt = self.conn.prepare("SELECT name FROM pragma_database_list")?;
            let names = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            names
        };
        if attached.iter().any(|n| n.eq_ignore_ascii_case(schema)) {
            return Ok(());
        }

        let location = namespace_location(self.main_path.as_deref(), schema);
        self.conn.execute(
            &format!("ATTACH DATABASE ?1 AS {}", quote_ident(schema)),
            params![location],
        )?;
        debug!("Attached namespace {} at {}", schema, location);
        Ok(())
    }

    /// Run schema/table creation inside one transaction that commits before
    /// any data is moved.
    pub fn ddl<F>(&mut self, f: F) -> Result<()>
    where
        F: FnOnce(&Connection) -> Result<()>,
    {
        self.with_transaction(f)
    }

    /// Run `f` in a transaction; an error rolls everything back.
    pub fn with_transaction<T, F>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let tx = self.conn.transaction()?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    pub fn table_exists(&self, table: &TableRef) -> Result<bool> {
        let sql = format!(
            "SELECT COUNT(*) FROM {}.sqlite_master WHERE type = 'table' AND name = ?1",
            quote_ident(&table.schema)
        );
        let count: i64 = self.conn.query_row(&sql, params![table.name], |r| r.get(0))?;
        Ok(count > 0)
    }

    /// Column names in declaration order. Empty when the table is absent.
    pub fn table_columns(&self, table: &TableRef) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT name FROM pragma_table_info(?1, ?2) ORDER BY cid")?;
        let columns = stmt
            .query_map(params![table.name, table.schema], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(columns)
    }

    pub fn read_table(&self, table: &TableRef) -> Result<Table> {
        self.query_table(&format!("SELECT * FROM {}", table.qualified()), &[])
    }

    /// Rows of `table` whose `column` equals `value`.
    pub fn read_where_eq(&self, table: &TableRef, column: &str, value: &Value) -> Result<Table> {
        let sql = format!(
            "SELECT * FROM {} WHERE {} = ?1",
            table.qualified(),
            quote_ident(column)
        );
        self.query_table(&sql, &[value])
    }

    fn query_table(&self, sql: &str, args: &[&Value]) -> Result<Table> {
        let mut stmt = self.conn.prepare(sql)?;
        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
        let width = columns.len();
        let mut out = Table::new(columns);
        let mut rows = stmt.query(params_from_iter(args.iter()))?;
        while let Some(row) = rows.next()? {
            let mut cells = Vec::with_capacity(width);
            for i in 0..width {
                cells.push(cell_from_sql(row.get_ref(i)?));
            }
            out.push_row(cells);
        }
        Ok(out)
    }

    /// The generation whose latest `load_ts` is greatest. A generation is a
    /// session, so insertion order is not consulted.
    pub fn latest_load_id(&self, table: &TableRef) -> Result<Option<String>> {
        if !self.table_exists(table)? {
            return Ok(None);
        }
        let sql = format!(
            "SELECT {id} FROM {t} WHERE {id} IS NOT NULL GROUP BY {id} ORDER BY MAX({ts}) DESC LIMIT 1",
            id = quote_ident(LOAD_ID),
            ts = quote_ident(LOAD_TS),
            t = table.qualified()
        );
        let id: Option<String> = self
            .conn
            .query_row(&sql, [], |r| r.get::<_, String>(0))
            .optional()?;
        Ok(id)
    }

    /// Append rows, creating the table on first use and adding any columns
    /// it does not have yet. Existing rows are never touched.
    pub fn append(&mut self, table: &TableRef, rows: &Table) -> Result<usize> {
        self.prepare_append(table, rows)?;
        let tx = self.conn.transaction()?;
        let written = insert_rows(&tx, table, rows)?;
        tx.commit()?;
        Ok(written)
    }

    /// Append one load generation and record the columns it carried in the
    /// table's manifest, in the same transaction. The raw table holds the
    /// union of every generation's columns, so the manifest is what tells a
    /// column sent blank apart from one the extract never had.
    pub fn append_generation(
        &mut self,
        table: &TableRef,
        rows: &Table,
        load_id: &str,
    ) -> Result<usize> {
        self.prepare_append(table, rows)?;
        let manifest = table.manifest();
        self.ddl(|conn| {
            conn.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {} ({id} TEXT NOT NULL, {col} TEXT NOT NULL, \
                 {ord} INTEGER NOT NULL, PRIMARY KEY ({id}, {col}))",
                manifest.qualified(),
                id = quote_ident(LOAD_ID),
                col = quote_ident(COLUMN_NAME),
                ord = quote_ident(ORDINAL)
            ))?;
            Ok(())
        })?;

        let tx = self.conn.transaction()?;
        let written = insert_rows(&tx, table, rows)?;
        {
            let mut stmt = tx.prepare(&format!(
                "INSERT INTO {} ({}, {}, {}) VALUES (?1, ?2, ?3)",
                manifest.qualified(),
                quote_ident(LOAD_ID),
                quote_ident(COLUMN_NAME),
                quote_ident(ORDINAL)
            ))?;
            for (i, column) in rows.columns().iter().enumerate() {
                stmt.execute(params![load_id, column, i as i64])?;
            }
        }
        tx.commit()?;
        Ok(written)
    }

    /// Columns recorded for `load_id`, in source order. `None` when the
    /// table has no manifest or the generation is not in it.
    pub fn generation_columns(
        &self,
        table: &TableRef,
        load_id: &str,
    ) -> Result<Option<Vec<String>>> {
        let manifest = table.manifest();
        if !self.table_exists(&manifest)? {
            return Ok(None);
        }
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM {} WHERE {} = ?1 ORDER BY {}",
            quote_ident(COLUMN_NAME),
            manifest.qualified(),
            quote_ident(LOAD_ID),
            quote_ident(ORDINAL)
        ))?;
        let columns = stmt
            .query_map(params![load_id], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok((!columns.is_empty()).then_some(columns))
    }

    /// Create the table or widen it with the columns `rows` brings.
    fn prepare_append(&mut self, table: &TableRef, rows: &Table) -> Result<()> {
        if rows.columns().is_empty() {
            return Err(PipelineError::NotFound(format!(
                "no columns to append into {}",
                table
            )));
        }
        let types = rows.inferred_types();
        let existing = self.table_columns(table)?;

        self.ddl(|conn| {
            if existing.is_empty() {
                conn.execute_batch(&create_table_sql(table, rows.columns(), &types))?;
            } else {
                for (col, ty) in rows.columns().iter().zip(&types) {
                    if !existing.iter().any(|e| e.eq_ignore_ascii_case(col)) {
                        debug!("Adding column {} to {}", col, table);
                        conn.execute_batch(&format!(
                            "ALTER TABLE {} ADD COLUMN {} {}",
                            table.qualified(),
                            quote_ident(col),
                            ty
                        ))?;
                    }
                }
            }
            Ok(())
        })
    }

    /// Replace the table wholesale. The rows go into a shadow table that is
    /// swapped in within a single transaction, so readers never observe an
    /// empty or half-written table.
    pub fn replace(&mut self, table: &TableRef, rows: &Table) -> Result<usize> {
        if rows.columns().is_empty() {
            return Err(PipelineError::NotFound(format!(
                "no columns to write into {}",
                table
            )));
        }
        let shadow = table.shadow();
        let types = rows.inferred_types();

        let tx = self.conn.transaction()?;
        tx.execute_batch(&format!("DROP TABLE IF EXISTS {}", shadow.qualified()))?;
        tx.execute_batch(&create_table_sql(&shadow, rows.columns(), &types))?;
        let written = insert_rows(&tx, &shadow, rows)?;
        tx.execute_batch(&format!(
            "DROP TABLE IF EXISTS {}; ALTER TABLE {} RENAME TO {};",
            table.qualified(),
            shadow.qualified(),
            quote_ident(&table.name)
        ))?;
        tx.commit()?;
        debug!("Swapped {} rows into {}", written, table);
        Ok(written)
    }
}

fn namespace_location(main_path: Option<&Path>, schema: &str) -> String {
    match main_path {
        None => ":memory:".to_string(),
        Some(path) => {
            let stem = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "warehouse".to_string());
            path.with_file_name(format!("{}_{}.db", stem, schema))
                .to_string_lossy()
                .into_owned()
        }
    }
}

fn create_table_sql(table: &TableRef, columns: &[String], types: &[&str]) -> String {
    let defs: Vec<String> = columns
        .iter()
        .zip(types)
        .map(|(c, t)| format!("{} {}", quote_ident(c), t))
        .collect();
    format!("CREATE TABLE {} ({})", table.qualified(), defs.join(", "))
}

fn insert_rows(conn: &Connection, table: &TableRef, rows: &Table) -> Result<usize> {
    let cols: Vec<String> = rows.columns().iter().map(|c| quote_ident(c)).collect();
    let placeholders: Vec<String> = (1..=cols.len()).map(|i| format!("?{}", i)).collect();
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        table.qualified(),
        cols.join(", "),
        placeholders.join(", ")
    );
    let mut stmt = conn.prepare(&sql)?;
    for row in rows.rows() {
        stmt.execute(params_from_iter(row.iter()))?;
    }
    Ok(rows.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(schema: &str) -> Store {
        let store = Store::open("sqlite::memory:").unwrap();
        store.ensure_namespace(schema).unwrap();
        store
    }

    fn table(columns: &[&str], rows: &[&[Option<&str>]]) -> Table {
        let mut t = Table::new(columns.iter().map(|c| c.to_string()).collect());
        for r in rows {
            t.push_row(r.iter().map(|c| c.map(Value::from)).collect());
        }
        t
    }

    #[test]
    fn test_ensure_namespace_is_idempotent() {
        let store = store_with("raw");
        store.ensure_namespace("raw").unwrap();
        assert!(!store.table_exists(&TableRef::new("raw", "t")).unwrap());
    }

    #[test]
    fn test_append_adds_new_columns_and_keeps_old_rows() {
        let mut store = store_with("raw");
        let t = TableRef::new("raw", "listings");
        store
            .append(&t, &table(&["sku"], &[&[Some("A")]]))
            .unwrap();
        store
            .append(&t, &table(&["sku", "title"], &[&[Some("B"), Some("Widget")]]))
            .unwrap();

        let all = store.read_table(&t).unwrap();
        assert_eq!(all.columns(), ["sku", "title"]);
        assert_eq!(all.len(), 2);
        assert_eq!(all.get(0, "title"), None);
        assert_eq!(all.get(1, "title"), Some(&Value::text("Widget")));
    }

    #[test]
    fn test_replace_swaps_whole_table() {
        let mut store = store_with("staging");
        let t = TableRef::new("staging", "stg");
        store
            .replace(&t, &table(&["a", "b"], &[&[Some("1"), Some("2")], &[Some("3"), None]]))
            .unwrap();
        store.replace(&t, &table(&["a"], &[&[Some("9")]])).unwrap();

        let after = store.read_table(&t).unwrap();
        assert_eq!(after.columns(), ["a"]);
        assert_eq!(after.len(), 1);
        assert!(!store.table_exists(&t.shadow()).unwrap());
    }

    #[test]
    fn test_latest_load_id_uses_max_load_ts() {
        let mut store = store_with("raw");
        let t = TableRef::new("raw", "r");
        assert_eq!(store.latest_load_id(&t).unwrap(), None);
        store
            .append(
                &t,
                &table(
                    &["load_id", "load_ts"],
                    &[
                        &[Some("late"), Some("2024-02-01T00:00:00.000000Z")],
                        &[Some("early"), Some("2024-01-01T00:00:00.000000Z")],
                    ],
                ),
            )
            .unwrap();
        assert_eq!(store.latest_load_id(&t).unwrap().as_deref(), Some("late"));
    }

    #[test]
    fn test_generation_columns_record_each_load_header() {
        let mut store = store_with("raw");
        let t = TableRef::new("raw", "listings");
        assert_eq!(store.generation_columns(&t, "L1").unwrap(), None);

        store
            .append_generation(&t, &table(&["sku", "title"], &[&[Some("A"), None]]), "L1")
            .unwrap();
        store
            .append_generation(&t, &table(&["sku"], &[&[Some("B")]]), "L2")
            .unwrap();

        assert_eq!(store.table_columns(&t).unwrap(), ["sku", "title"]);
        assert_eq!(
            store.generation_columns(&t, "L1").unwrap().unwrap(),
            ["sku", "title"]
        );
        assert_eq!(store.generation_columns(&t, "L2").unwrap().unwrap(), ["sku"]);
        assert_eq!(store.generation_columns(&t, "L3").unwrap(), None);
    }

    #[test]
    fn test_open_rejects_non_sqlite_schemes() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("postgresql://user:pw@{}/db", dir.path().display());
        let err = Store::open(&url).err().unwrap();
        assert!(matches!(err, PipelineError::Configuration(_)));
        assert!(err.to_string().contains("postgresql"));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);

        assert!(matches!(
            Store::open("mysql:warehouse").err().unwrap(),
            PipelineError::Configuration(_)
        ));
    }

    #[test]
    fn test_sqlite_targets() {
        assert_eq!(sqlite_target("sqlite:///data/wh.db").unwrap(), "/data/wh.db");
        assert_eq!(sqlite_target("sqlite://data/wh.db").unwrap(), "data/wh.db");
        assert_eq!(sqlite_target("SQLite:wh.db").unwrap(), "wh.db");
        assert_eq!(sqlite_target("sqlite::memory:").unwrap(), ":memory:");
        assert_eq!(sqlite_target(":memory:").unwrap(), ":memory:");
        assert_eq!(sqlite_target("data/wh.db").unwrap(), "data/wh.db");
        assert_eq!(sqlite_target(r"C:\data\wh.db").unwrap(), r"C:\data\wh.db");
    }

    #[test]
    fn test_namespace_files_sit_beside_main_database() {
        let loc = namespace_location(Some(Path::new("/data/wh.db")), "raw");
        assert_eq!(loc, "/data/wh_raw.db");
        assert_eq!(namespace_location(None, "raw"), ":memory:");
    }
}
