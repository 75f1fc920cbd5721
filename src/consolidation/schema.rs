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
//! Rewriting of per-node table schemas into the consolidated form.
//!
//! A per-node key is only unique within one node. The consolidated table therefore keys every
//! row by `(nodeNumber, <key>)`:
//!
//! ```sql
//! CREATE TABLE events (eventId INTEGER PRIMARY KEY UNIQUE, ts INTEGER, name TEXT)
//! -- becomes
//! CREATE TABLE IF NOT EXISTS "events" (nodeNumber INTEGER NOT NULL, "eventId" INTEGER,
//!     "ts" INTEGER, "name" TEXT, UNIQUE(nodeNumber, "eventId"))
//! ```

use itertools::Itertools;
use lazy_static::lazy_static;
use regex::Regex;

/// Column holding the node a row was collected from.
pub const NODE_COLUMN: &str = "nodeNumber";
/// Key column used if a table declares no single-column primary key.
pub const DEFAULT_KEY_COLUMN: &str = "eventId";

lazy_static! {
    static ref CREATE_TABLE: Regex = Regex::new(
        r#"(?is)^\s*CREATE\s+TABLE\s+(?:IF\s+NOT\s+EXISTS\s+)?("[^"]+"|`[^`]+`|\[[^\]]+\]|[\w$]+)\s*\((.*)\)[^)]*$"#
    )
    .unwrap();
    static ref PRIMARY_KEY: Regex =
        Regex::new(r"(?i)\bPRIMARY\s+KEY(\s+(ASC|DESC))?(\s+ON\s+CONFLICT\s+\w+)?(\s+AUTOINCREMENT)?")
            .unwrap();
    static ref UNIQUE: Regex = Regex::new(r"(?i)\bUNIQUE(\s+ON\s+CONFLICT\s+\w+)?").unwrap();
    static ref NOT_NULL: Regex = Regex::new(r"(?i)\bNOT\s+NULL(\s+ON\s+CONFLICT\s+\w+)?").unwrap();
    static ref TABLE_PRIMARY_KEY: Regex =
        Regex::new(r"(?is)^(CONSTRAINT\s+\S+\s+)?PRIMARY\s+KEY\s*\((.*)\)").unwrap();
    static ref TABLE_CONSTRAINT: Regex =
        Regex::new(r"(?i)^(CONSTRAINT|PRIMARY|UNIQUE|CHECK|FOREIGN)\b").unwrap();
    static ref CONSTRAINT_KEYWORD: Regex = Regex::new(
        r"(?i)^(CONSTRAINT|PRIMARY|NOT|NULL|UNIQUE|CHECK|DEFAULT|COLLATE|REFERENCES|GENERATED|AS)$"
    )
    .unwrap();
}

#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("Not a CREATE TABLE statement: {0}")]
    NotCreateTable(String),
    #[error("Table {0} has no columns")]
    NoColumns(String),
}

/// One column definition of a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    /// Unquoted column name.
    pub name: String,
    /// Declared type, e.g. `INTEGER` or `VARCHAR(20)`. May be empty.
    pub decl_type: String,
    /// The full definition without primary key, unique and not-null constraints, such that rows
    /// of other schema variants are accepted as well.
    pub definition: String,
}

impl Column {
    /// Definition usable in `ALTER TABLE ... ADD COLUMN`.
    pub fn plain_definition(&self) -> String {
        format!("{} {}", quote(&self.name), self.decl_type)
            .trim_end()
            .to_string()
    }
}

/// A parsed per-node table schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    pub table: String,
    /// Column whose values identify a row within one node.
    pub key: String,
    pub key_type: String,
    /// The key does not exist in the source table and is filled with the source rowid.
    pub synthetic_key: bool,
    /// All columns of the source table, except the key.
    pub columns: Vec<Column>,
    /// Table constraints that are kept (`CHECK`, `FOREIGN KEY`).
    pub constraints: Vec<String>,
    /// The original statement.
    pub source_sql: String,
}

impl TableSchema {
    /// Parse a `CREATE TABLE` statement as stored in `sqlite_master`.
    pub fn parse(sql: &str) -> Result<Self, SchemaError> {
        let caps = CREATE_TABLE
            .captures(sql)
            .ok_or_else(|| SchemaError::NotCreateTable(sql.to_string()))?;
        let table = unquote(&caps[1]);

        let mut columns = Vec::new();
        let mut constraints = Vec::new();
        let mut primary_keys = Vec::new();

        for part in split_top_level(&caps[2]) {
            if TABLE_CONSTRAINT.is_match(&part) {
                if let Some(pk) = TABLE_PRIMARY_KEY.captures(&part) {
                    primary_keys.extend(split_top_level(&pk[2]).iter().map(|c| {
                        // strip ordering and collation from indexed columns
                        unquote(c.split_whitespace().next().unwrap_or_default())
                    }));
                } else if !part.to_uppercase().contains("UNIQUE") {
                    constraints.push(part);
                }
                continue;
            }
            let column = parse_column(&part);
            if PRIMARY_KEY.is_match(&part) {
                primary_keys.push(column.name.clone());
            }
            columns.push(column);
        }
        if columns.is_empty() {
            return Err(SchemaError::NoColumns(table));
        }

        let key = match primary_keys.as_slice() {
            [single] => Some(single.clone()),
            _ => None,
        }
        .or_else(|| {
            columns
                .iter()
                .find(|c| c.name.eq_ignore_ascii_case(DEFAULT_KEY_COLUMN))
                .map(|c| c.name.clone())
        });

        let (key, key_type, synthetic_key) = match key {
            Some(key) => {
                let idx = columns.iter().position(|c| c.name == key);
                let key_type = idx
                    .map(|i| columns.remove(i).decl_type)
                    .unwrap_or_default();
                (key, key_type, idx.is_none())
            }
            None => (DEFAULT_KEY_COLUMN.to_string(), "INTEGER".to_string(), true),
        };

        Ok(Self {
            table,
            key,
            key_type,
            synthetic_key,
            columns,
            constraints,
            source_sql: sql.to_string(),
        })
    }

    /// `CREATE TABLE IF NOT EXISTS` statement of the consolidated table.
    pub fn unified_sql(&self) -> String {
        let key_type = if self.key_type.is_empty() {
            "INTEGER"
        } else {
            &self.key_type
        };
        let parts = [
            format!("{NODE_COLUMN} INTEGER NOT NULL"),
            format!("{} {key_type}", quote(&self.key)),
        ]
        .into_iter()
        .chain(self.columns.iter().map(|c| c.definition.clone()))
        .chain(self.constraints.iter().cloned())
        .chain(std::iter::once(format!(
            "UNIQUE({NODE_COLUMN}, {})",
            quote(&self.key)
        )))
        .join(", ");
        format!("CREATE TABLE IF NOT EXISTS {} ({parts})", quote(&self.table))
    }

    /// Columns to select from the source table, in insertion order, excluding the node column.
    pub fn source_columns(&self) -> Vec<String> {
        std::iter::once(if self.synthetic_key {
            "rowid".to_string()
        } else {
            quote(&self.key)
        })
        .chain(self.columns.iter().map(|c| quote(&c.name)))
        .collect()
    }

    /// Columns to insert into the consolidated table, excluding the node column.
    pub fn target_columns(&self) -> Vec<String> {
        std::iter::once(quote(&self.key))
            .chain(self.columns.iter().map(|c| quote(&c.name)))
            .collect()
    }
}

fn parse_column(part: &str) -> Column {
    let (name, rest) = split_name(part);
    let decl_type = rest
        .split_whitespace()
        .take_while(|token| !CONSTRAINT_KEYWORD.is_match(token))
        .join(" ");
    let stripped = [&*PRIMARY_KEY, &*UNIQUE, &*NOT_NULL]
        .into_iter()
        .fold(rest.to_string(), |acc, re| re.replace_all(&acc, "").to_string());
    let definition = format!("{} {}", quote(&name), stripped.split_whitespace().join(" "))
        .trim_end()
        .to_string();
    Column {
        name,
        decl_type,
        definition,
    }
}

/// Split a column definition into its (unquoted) name and the remainder.
fn split_name(part: &str) -> (String, &str) {
    let part = part.trim();
    let closing = match part.chars().next() {
        Some('"') => Some('"'),
        Some('`') => Some('`'),
        Some('[') => Some(']'),
        _ => None,
    };
    let end = match closing {
        Some(c) => part[1..].find(c).map(|i| i + 2).unwrap_or(part.len()),
        None => part.find(char::is_whitespace).unwrap_or(part.len()),
    };
    (unquote(&part[..end]), &part[end..])
}

/// Split at commas that are neither nested in parentheses nor quoted.
fn split_top_level(body: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    for c in body.chars() {
        match (quote, c) {
            (Some(q), c) if c == q || (q == '[' && c == ']') => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'' | '`' | '[') => quote = Some(c),
            (None, '(') => depth += 1,
            (None, ')') => depth = depth.saturating_sub(1),
            (None, ',') if depth == 0 => {
                parts.push(std::mem::take(&mut current).trim().to_string());
                continue;
            }
            _ => {}
        }
        current.push(c);
    }
    if !current.trim().is_empty() {
        parts.push(current.trim().to_string());
    }
    parts.into_iter().filter(|p| !p.is_empty()).collect()
}

fn unquote(name: &str) -> String {
    let name = name.trim();
    let inner = match (name.chars().next(), name.chars().last()) {
        (Some('"'), Some('"')) | (Some('`'), Some('`')) | (Some('['), Some(']'))
            if name.len() >= 2 =>
        {
            &name[1..name.len() - 1]
        }
        _ => name,
    };
    inner.replace("\"\"", "\"")
}

/// Quote an identifier for SQLite.
pub fn quote(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
