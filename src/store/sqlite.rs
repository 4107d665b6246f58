//! Embedded-SQLite `BucketStore` backend (feature `sqlite`, on by default).
//!
//! Each bucket collection is its own table: one `TEXT` id column, one `BLOB`
//! vector column, and one indexed `INTEGER` column per hash field. The helper
//! record lives in a dedicated single-row table. Table/column names are
//! interpolated into SQL text (`rusqlite` has no bind-parameter support for
//! identifiers), so every name is validated before use.
use crate::error::{Error, Result};
use crate::store::{BucketRecord, BucketStore, Filter, HelperRecord};
use fnv::FnvHashMap as HashMap;
use parking_lot::Mutex;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use std::time::{Duration, Instant};

const HELPER_TABLE: &str = "lsh_ann_helper";

/// A `BucketStore` backed by an embedded SQLite database (on disk or `:memory:`).
pub struct SqliteBucketStore {
    conn: Mutex<Connection>,
    /// Upper bound on how long `create_indexes` keeps altering a table before
    /// giving up (`ServiceConfig::create_index_max_time`).
    create_index_max_time: Duration,
}

impl SqliteBucketStore {
    /// `db_client_timeout` becomes SQLite's `busy_timeout`: how long a call
    /// waits on the write lock before failing, rather than failing instantly.
    pub fn open_in_memory(
        db_client_timeout: Duration,
        create_index_max_time: Duration,
    ) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        init_db_settings(&conn, db_client_timeout)?;
        init_helper_table(&conn)?;
        Ok(SqliteBucketStore {
            conn: Mutex::new(conn),
            create_index_max_time,
        })
    }

    pub fn open(
        path: &std::path::Path,
        db_client_timeout: Duration,
        create_index_max_time: Duration,
    ) -> Result<Self> {
        let conn = Connection::open(path)?;
        init_db_settings(&conn, db_client_timeout)?;
        init_helper_table(&conn)?;
        Ok(SqliteBucketStore {
            conn: Mutex::new(conn),
            create_index_max_time,
        })
    }
}

fn init_db_settings(conn: &Connection, db_client_timeout: Duration) -> Result<()> {
    conn.busy_timeout(db_client_timeout)?;
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA foreign_keys = ON;",
    )?;
    Ok(())
}

fn init_helper_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {} (
             id INTEGER PRIMARY KEY CHECK (id = 0),
             hasher BLOB NOT NULL,
             hash_coll_name TEXT NOT NULL,
             is_build_done INTEGER NOT NULL,
             build_error TEXT NOT NULL,
             last_build_time INTEGER NOT NULL,
             build_elapsed_time INTEGER NOT NULL
         );",
        HELPER_TABLE
    ))?;
    Ok(())
}

/// A bare identifier used directly in SQL text must look like one: this is the
/// crate's only defense against injection through collection/field names.
fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty()
        || !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(Error::StoreUnavailable(format!(
            "invalid identifier for sqlite backend: {:?}",
            name
        )));
    }
    Ok(())
}

fn table_name(collection: &str) -> Result<String> {
    validate_identifier(collection)?;
    Ok(format!("bucket_{}", collection.replace('-', "_")))
}

fn column_name(field: &str) -> Result<String> {
    validate_identifier(field)?;
    Ok(format!("hash_{}", field.replace('-', "_")))
}

/// Columns named `hash_*` on `table`, returned as `(column_name, field_name)`.
fn hash_columns(conn: &Connection, table: &str) -> Result<Vec<(String, String)>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let names: Vec<String> = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<std::result::Result<_, _>>()?;
    Ok(names
        .into_iter()
        .filter(|n| n.starts_with("hash_"))
        .map(|n| {
            let field = n.trim_start_matches("hash_").to_string();
            (n, field)
        })
        .collect())
}

fn vec_to_blob(v: &[f64]) -> Result<Vec<u8>> {
    Ok(bincode::serialize(v)?)
}

fn blob_to_vec(blob: &[u8]) -> Result<Vec<f64>> {
    Ok(bincode::deserialize(blob)?)
}

impl BucketStore for SqliteBucketStore {
    fn create_collection(&self, name: &str) -> Result<()> {
        let table = table_name(name)?;
        let conn = self.conn.lock();
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
                 id TEXT PRIMARY KEY,
                 vector BLOB NOT NULL
             );",
            table
        ))?;
        Ok(())
    }

    fn drop_collection(&self, name: &str) -> Result<()> {
        let table = table_name(name)?;
        let conn = self.conn.lock();
        conn.execute_batch(&format!("DROP TABLE IF EXISTS {};", table))?;
        Ok(())
    }

    fn has_collection(&self, name: &str) -> Result<bool> {
        let table = table_name(name)?;
        let conn = self.conn.lock();
        let exists: Option<String> = conn
            .query_row(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
                [&table],
                |row| row.get(0),
            )
            .optional()?;
        Ok(exists.is_some())
    }

    fn create_indexes(&self, collection: &str, fields: &[String]) -> Result<()> {
        let table = table_name(collection)?;
        let conn = self.conn.lock();
        let existing = hash_columns(&conn, &table)?;
        let deadline = Instant::now();
        for field in fields {
            if deadline.elapsed() > self.create_index_max_time {
                return Err(Error::StoreUnavailable(format!(
                    "create_indexes exceeded create_index_max_time ({:?}) on {}",
                    self.create_index_max_time, table
                )));
            }
            let column = column_name(field)?;
            if !existing.iter().any(|(c, _)| c == &column) {
                conn.execute_batch(&format!(
                    "ALTER TABLE {} ADD COLUMN {} INTEGER;",
                    table, column
                ))?;
            }
            conn.execute_batch(&format!(
                "CREATE INDEX IF NOT EXISTS {}_{}_idx ON {} ({});",
                table, column, table, column
            ))?;
        }
        Ok(())
    }

    fn insert_many(&self, collection: &str, records: &[BucketRecord]) -> Result<()> {
        let table = table_name(collection)?;
        let mut conn = self.conn.lock();
        let columns = hash_columns(&conn, &table)?;
        let tx = conn.transaction()?;
        for record in records {
            let mut names = vec!["id".to_string(), "vector".to_string()];
            let mut placeholders = vec!["?1".to_string(), "?2".to_string()];
            let mut values: Vec<rusqlite::types::Value> = vec![
                record.id.clone().into(),
                vec_to_blob(record.vector.as_slice())?.into(),
            ];
            for (column, field) in &columns {
                names.push(column.clone());
                placeholders.push(format!("?{}", values.len() + 1));
                let v = record.hashes.get(field).copied().unwrap_or(0);
                values.push((v as i64).into());
            }
            let sql = format!(
                "INSERT OR REPLACE INTO {} ({}) VALUES ({});",
                table,
                names.join(", "),
                placeholders.join(", ")
            );
            tx.execute(&sql, params_from_iter(values.iter()))?;
        }
        tx.commit()?;
        Ok(())
    }

    fn delete(&self, collection: &str, id: &str) -> Result<()> {
        let table = table_name(collection)?;
        let conn = self.conn.lock();
        conn.execute(&format!("DELETE FROM {} WHERE id = ?1;", table), [id])?;
        Ok(())
    }

    fn find(&self, collection: &str, filter: &Filter, limit: usize) -> Result<Vec<BucketRecord>> {
        let table = table_name(collection)?;
        let conn = self.conn.lock();
        let columns = hash_columns(&conn, &table)?;

        let mut where_clauses = Vec::with_capacity(filter.equals.len());
        let mut params: Vec<rusqlite::types::Value> = Vec::with_capacity(filter.equals.len());
        for (field, value) in &filter.equals {
            let column = column_name(field)?;
            where_clauses.push(format!("{} = ?{}", column, params.len() + 1));
            params.push((*value as i64).into());
        }
        let where_sql = if where_clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", where_clauses.join(" AND "))
        };
        let select_cols: Vec<String> = std::iter::once("id".to_string())
            .chain(std::iter::once("vector".to_string()))
            .chain(columns.iter().map(|(c, _)| c.clone()))
            .collect();
        let sql = format!(
            "SELECT {} FROM {} {} LIMIT {};",
            select_cols.join(", "),
            table,
            where_sql,
            limit
        );

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(params.iter()), |row| {
            let id: String = row.get(0)?;
            let vector_blob: Vec<u8> = row.get(1)?;
            let mut hashes = HashMap::default();
            for (i, (_, field)) in columns.iter().enumerate() {
                let value: i64 = row.get(2 + i)?;
                hashes.insert(field.clone(), value as u64);
            }
            Ok((id, vector_blob, hashes))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (id, vector_blob, hashes) = row?;
            let vector = blob_to_vec(&vector_blob)?;
            out.push(BucketRecord {
                id,
                vector: vector.into(),
                hashes,
            });
        }
        Ok(out)
    }

    fn get_by_id(&self, collection: &str, id: &str) -> Result<Option<BucketRecord>> {
        let table = table_name(collection)?;
        let conn = self.conn.lock();
        let columns = hash_columns(&conn, &table)?;
        let select_cols: Vec<String> = std::iter::once("id".to_string())
            .chain(std::iter::once("vector".to_string()))
            .chain(columns.iter().map(|(c, _)| c.clone()))
            .collect();
        let sql = format!(
            "SELECT {} FROM {} WHERE id = ?1;",
            select_cols.join(", "),
            table
        );
        let row = conn
            .query_row(&sql, [id], |row| {
                let id: String = row.get(0)?;
                let vector_blob: Vec<u8> = row.get(1)?;
                let mut hashes = HashMap::default();
                for (i, (_, field)) in columns.iter().enumerate() {
                    let value: i64 = row.get(2 + i)?;
                    hashes.insert(field.clone(), value as u64);
                }
                Ok((id, vector_blob, hashes))
            })
            .optional()?;
        match row {
            Some((id, vector_blob, hashes)) => Ok(Some(BucketRecord {
                id,
                vector: blob_to_vec(&vector_blob)?.into(),
                hashes,
            })),
            None => Ok(None),
        }
    }

    fn estimated_count(&self, collection: &str) -> Result<i64> {
        let table = table_name(collection)?;
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {};", table), [], |row| {
            row.get(0)
        })?;
        Ok(count)
    }

    fn upsert_helper(&self, record: &HelperRecord) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            &format!(
                "INSERT OR REPLACE INTO {}
                 (id, hasher, hash_coll_name, is_build_done, build_error, last_build_time, build_elapsed_time)
                 VALUES (0, ?1, ?2, ?3, ?4, ?5, ?6);",
                HELPER_TABLE
            ),
            rusqlite::params![
                record.hasher,
                record.hash_coll_name,
                record.is_build_done as i64,
                record.build_error,
                record.last_build_time,
                record.build_elapsed_time,
            ],
        )?;
        Ok(())
    }

    fn get_helper(&self) -> Result<Option<HelperRecord>> {
        let conn = self.conn.lock();
        let record = conn
            .query_row(
                &format!(
                    "SELECT hasher, hash_coll_name, is_build_done, build_error, last_build_time, build_elapsed_time
                     FROM {} WHERE id = 0;",
                    HELPER_TABLE
                ),
                [],
                |row| {
                    Ok(HelperRecord {
                        hasher: row.get(0)?,
                        hash_coll_name: row.get(1)?,
                        is_build_done: row.get::<_, i64>(2)? != 0,
                        build_error: row.get(3)?,
                        last_build_time: row.get(4)?,
                        build_elapsed_time: row.get(5)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }
}
