// RadioSweep: Parameter Sweeps and Result Consolidation for Emulated Radio Networks
// Copyright (C) 2024-2025 Roland Schmid <roschmi@ethz.ch> and Tibor Schneider <sctibor@ethz.ch>
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//! Merges the result databases of all nodes of a trial into one consolidated database.
//!
//! Different nodes may run different versions of the application, and therefore use slightly
//! different schemas for the same table. Every distinct variant is created (guarded by
//! `IF NOT EXISTS`), and columns that only some variants have are added to the consolidated
//! table, such that it accepts the rows of every node. Columns that were renamed between versions
//! are not reconciled and end up as separate columns.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use itertools::Itertools;
use rusqlite::{types::Value, Connection, OpenFlags};

use radiosweep_utils::other::trailing_number;

use crate::util::files_matching;

pub mod delays;
pub mod emane;
pub mod packets;
pub mod schema;

pub use schema::{SchemaError, TableSchema, NODE_COLUMN};

use schema::quote;

/// Glob pattern of the per-node result databases in a trial directory.
pub const NODE_DB_PATTERN: &str = "eventsql*.db";

#[derive(Debug, thiserror::Error)]
pub enum ConsolidationError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("SQLite error in {1:?}: {0}")]
    Sqlite(rusqlite::Error, PathBuf),
    #[error("Schema error in {1:?}: {0}")]
    Schema(SchemaError, PathBuf),
    #[error("Invalid glob pattern: {0}")]
    Pattern(#[from] glob::PatternError),
    #[error("No node databases found in {0:?}")]
    NoInputs(PathBuf),
}

/// A per-node result database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeDatabase {
    pub node: u32,
    pub path: PathBuf,
}

/// All node databases in `dir`, in natural order. The node number is the trailing number of the
/// file name, or the position in that order if there is none.
pub fn node_databases(dir: impl AsRef<Path>) -> Result<Vec<NodeDatabase>, ConsolidationError> {
    Ok(files_matching(dir, NODE_DB_PATTERN)?
        .into_iter()
        .zip(1..)
        .map(|(path, idx)| NodeDatabase {
            node: path
                .file_name()
                .and_then(|n| trailing_number(n.to_string_lossy()))
                .unwrap_or(idx),
            path,
        })
        .collect())
}

/// Counters of a merge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub output: PathBuf,
    pub tables: usize,
    pub inserted: usize,
    /// Rows that were already present.
    pub skipped: usize,
}

/// Consolidated database name for the current UTC time.
pub fn consolidated_db_name() -> String {
    format!("{}.db", chrono::Utc::now().format("%Y-%m-%d_%H:%M:%S"))
}

/// Merge all node databases of `input_dir` into a new database in `output_dir`, named by the
/// current UTC time. If `remove_inputs` is set, the node databases are deleted after the merge
/// succeeded.
pub fn consolidate(
    input_dir: impl AsRef<Path>,
    output_dir: impl AsRef<Path>,
    remove_inputs: bool,
) -> Result<MergeReport, ConsolidationError> {
    let inputs = node_databases(input_dir.as_ref())?;
    if inputs.is_empty() {
        return Err(ConsolidationError::NoInputs(input_dir.as_ref().to_path_buf()));
    }
    std::fs::create_dir_all(output_dir.as_ref())?;
    let output = output_dir.as_ref().join(consolidated_db_name());
    let report = SchemaUnifier::new(inputs.clone()).merge_into(&output)?;
    log::info!(
        "Consolidated {} node databases into {output:?} ({} rows, {} duplicates skipped)",
        inputs.len(),
        report.inserted,
        report.skipped
    );

    if remove_inputs {
        for input in inputs {
            if let Err(e) = std::fs::remove_file(&input.path) {
                log::warn!("Cannot remove {:?}: {e}", input.path);
            }
        }
    }
    Ok(report)
}

pub struct SchemaUnifier {
    inputs: Vec<NodeDatabase>,
}

impl SchemaUnifier {
    pub fn new(mut inputs: Vec<NodeDatabase>) -> Self {
        inputs.sort_by(|a, b| {
            a.node
                .cmp(&b.node)
                .then_with(|| crate::util::natural_cmp(&a.path, &b.path))
        });
        Self { inputs }
    }

    /// Merge all inputs into `output`, creating it if necessary. Rows already present are skipped,
    /// so merging the same inputs again does not change the output.
    pub fn merge_into(&self, output: &Path) -> Result<MergeReport, ConsolidationError> {
        let sqlite = |e| ConsolidationError::Sqlite(e, output.to_path_buf());
        let mut target = Connection::open(output).map_err(sqlite)?;

        let variants = self.schema_variants()?;
        let mut report = MergeReport {
            output: output.to_path_buf(),
            tables: variants.len(),
            ..Default::default()
        };

        for schemas in variants.values() {
            create_table(&target, schemas).map_err(sqlite)?;
        }

        for input in &self.inputs {
            let source = open_read_only(&input.path)?;
            let tx = target.transaction().map_err(sqlite)?;
            for (sql, schema) in read_schemas(&source, &input.path)? {
                log::trace!("[node{}] copying {} ({sql})", input.node, schema.table);
                let (inserted, skipped) = copy_rows(&source, &tx, &schema, input.node)
                    .map_err(|e| ConsolidationError::Sqlite(e, input.path.clone()))?;
                report.inserted += inserted;
                report.skipped += skipped;
            }
            tx.commit().map_err(sqlite)?;
        }

        Ok(report)
    }

    /// All distinct schema variants of every table, in node order.
    fn schema_variants(&self) -> Result<BTreeMap<String, Vec<TableSchema>>, ConsolidationError> {
        let mut variants: BTreeMap<String, Vec<TableSchema>> = BTreeMap::new();
        for input in &self.inputs {
            let source = open_read_only(&input.path)?;
            for (_, schema) in read_schemas(&source, &input.path)? {
                let known = variants.entry(schema.table.clone()).or_default();
                if !known.iter().any(|s| same_text(&s.source_sql, &schema.source_sql)) {
                    if !known.is_empty() {
                        log::debug!(
                            "[node{}] table {} has a new schema variant",
                            input.node,
                            schema.table
                        );
                    }
                    known.push(schema);
                }
            }
        }
        Ok(variants)
    }
}

fn same_text(a: &str, b: &str) -> bool {
    a.split_whitespace().eq(b.split_whitespace())
}

fn open_read_only(path: &Path) -> Result<Connection, ConsolidationError> {
    Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
        .map_err(|e| ConsolidationError::Sqlite(e, path.to_path_buf()))
}

/// All user tables of a database with their parsed schema.
fn read_schemas(
    conn: &Connection,
    path: &Path,
) -> Result<Vec<(String, TableSchema)>, ConsolidationError> {
    let sqlite = |e| ConsolidationError::Sqlite(e, path.to_path_buf());
    let mut stmt = conn
        .prepare(
            "SELECT sql FROM sqlite_master \
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%' AND sql IS NOT NULL \
             ORDER BY name",
        )
        .map_err(sqlite)?;
    let sqls = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .map_err(sqlite)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(sqlite)?;
    sqls.into_iter()
        .map(|sql| {
            let schema = TableSchema::parse(&sql)
                .map_err(|e| ConsolidationError::Schema(e, path.to_path_buf()))?;
            Ok((sql, schema))
        })
        .collect()
}

/// Create the consolidated table from every variant, and add the columns missing from the first
/// one.
fn create_table(conn: &Connection, variants: &[TableSchema]) -> Result<(), rusqlite::Error> {
    let Some(first) = variants.first() else {
        return Ok(());
    };
    for schema in variants {
        conn.execute(&schema.unified_sql(), [])?;
    }

    let mut existing = table_columns(conn, &first.table)?;
    for schema in variants {
        let key = format!("{} {}", quote(&schema.key), schema.key_type);
        let missing = std::iter::once((schema.key.clone(), key))
            .chain(schema.columns.iter().map(|c| (c.name.clone(), c.plain_definition())))
            .filter(|(name, _)| !existing.iter().any(|e| e.eq_ignore_ascii_case(name)))
            .collect_vec();
        for (name, definition) in missing {
            log::debug!("adding column {name} to {}", first.table);
            conn.execute(
                &format!("ALTER TABLE {} ADD COLUMN {}", quote(&first.table), definition.trim_end()),
                [],
            )?;
            existing.push(name);
        }
    }

    // rows of a variant with another key leave the first key NULL, which never conflicts
    for key in variants
        .iter()
        .map(|s| &s.key)
        .filter(|k| !k.eq_ignore_ascii_case(&first.key))
        .unique_by(|k| k.to_lowercase())
    {
        log::debug!("adding unique key ({NODE_COLUMN}, {key}) to {}", first.table);
        conn.execute(
            &format!(
                "CREATE UNIQUE INDEX IF NOT EXISTS {} ON {} ({NODE_COLUMN}, {})",
                quote(&format!("{}_{key}_unique", first.table)),
                quote(&first.table),
                quote(key)
            ),
            [],
        )?;
    }
    Ok(())
}

fn table_columns(conn: &Connection, table: &str) -> Result<Vec<String>, rusqlite::Error> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote(table)))?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(names)
}

fn is_duplicate(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                || err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
    )
}

/// Copy all rows of one table, tagged with `node`. Returns the number of inserted and skipped
/// rows.
fn copy_rows(
    source: &Connection,
    target: &Connection,
    schema: &TableSchema,
    node: u32,
) -> Result<(usize, usize), rusqlite::Error> {
    let source_columns = schema.source_columns();
    let target_columns = schema.target_columns();
    let mut select = source.prepare(&format!(
        "SELECT {} FROM {}",
        source_columns.join(", "),
        quote(&schema.table)
    ))?;
    let mut insert = target.prepare(&format!(
        "INSERT INTO {} ({NODE_COLUMN}, {}) VALUES ({})",
        quote(&schema.table),
        target_columns.join(", "),
        (1..=target_columns.len() + 1).map(|i| format!("?{i}")).join(", ")
    ))?;

    let n = source_columns.len();
    let mut rows = select.query([])?;
    let (mut inserted, mut skipped) = (0, 0);
    while let Some(row) = rows.next()? {
        let values = std::iter::once(Ok(Value::Integer(node as i64)))
            .chain((0..n).map(|i| row.get::<_, Value>(i)))
            .collect::<Result<Vec<_>, _>>()?;
        match insert.execute(rusqlite::params_from_iter(values)) {
            Ok(_) => inserted += 1,
            Err(e) if is_duplicate(&e) => skipped += 1,
            Err(e) => return Err(e),
        }
    }
    Ok((inserted, skipped))
}
