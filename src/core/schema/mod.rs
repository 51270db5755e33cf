//! Read-only description of the queryable tables, loaded once at startup.

mod glue;

use std::fmt;

use anyhow::{Result, bail};
use serde::Serialize;
use tracing::info;

use crate::core::aws::AwsClient;
use crate::core::config::AppConfig;

pub use glue::fetch_glue_table;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    String,
    Double,
    Timestamp,
}

impl ColumnType {
    /// Maps Glue/Hive and Athena (Trino) type names. Parameterized types such as
    /// `varchar(32)` or `decimal(10,2)` are matched on their base name.
    pub fn from_type_name(raw: &str) -> Option<Self> {
        let lower = raw.trim().to_ascii_lowercase();
        let base = lower.split('(').next().unwrap_or("").trim();
        match base {
            "string" | "varchar" | "char" | "boolean" => Some(ColumnType::String),
            "double" | "float" | "real" | "decimal" | "int" | "integer" | "bigint"
            | "smallint" | "tinyint" => Some(ColumnType::Double),
            "timestamp" | "date" => Some(ColumnType::Timestamp),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ColumnType::String => "string",
            ColumnType::Double => "double",
            ColumnType::Timestamp => "timestamp",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Column {
    pub name: String,
    /// Type name as declared in the catalog, e.g. `double`.
    pub declared_type: String,
    pub column_type: ColumnType,
}

impl Column {
    pub fn new(name: &str, declared_type: &str) -> Result<Self> {
        let Some(column_type) = ColumnType::from_type_name(declared_type) else {
            bail!(
                "column '{}' has unsupported type '{}'",
                name,
                declared_type
            );
        };
        Ok(Self {
            name: name.to_string(),
            declared_type: declared_type.to_string(),
            column_type,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaMetadata {
    pub table: String,
    pub columns: Vec<Column>,
}

impl SchemaMetadata {
    pub fn new(table: &str, columns: &[(&str, &str)]) -> Result<Self> {
        let columns = columns
            .iter()
            .map(|(name, ty)| Column::new(name, ty))
            .collect::<Result<Vec<_>>>()?;
        if columns.is_empty() {
            bail!("table '{}' has no columns", table);
        }
        Ok(Self {
            table: table.to_string(),
            columns,
        })
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }
}

/// Shared read-only catalog. Cheap to clone behind an `Arc`; there is no mutation API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaCatalog {
    pub database: String,
    pub catalog: Option<String>,
    tables: Vec<SchemaMetadata>,
}

impl SchemaCatalog {
    pub fn from_tables(
        database: &str,
        catalog: Option<&str>,
        tables: Vec<SchemaMetadata>,
    ) -> Result<Self> {
        if tables.is_empty() {
            bail!("schema catalog needs at least one table");
        }
        Ok(Self {
            database: database.to_string(),
            catalog: catalog.map(str::to_string),
            tables,
        })
    }

    /// Inline `[schema]` from the config when present, Glue `GetTable` otherwise.
    pub async fn load(config: &AppConfig, glue: Option<&AwsClient>) -> Result<Self> {
        let table = if let Some(inline) = &config.schema {
            let pairs: Vec<(&str, &str)> = inline
                .columns
                .iter()
                .map(|c| (c.name.as_str(), c.column_type.as_str()))
                .collect();
            SchemaMetadata::new(&inline.table, &pairs)?
        } else {
            let Some(glue) = glue else {
                bail!("no [schema] section configured and no Glue client available");
            };
            fetch_glue_table(glue, &config.athena.database, &config.glue.table).await?
        };
        info!(
            "Schema catalog loaded: {}.{} ({} columns)",
            config.athena.database,
            table.table,
            table.columns.len()
        );
        Self::from_tables(
            &config.athena.database,
            config.athena.catalog.as_deref(),
            vec![table],
        )
    }

    pub fn tables(&self) -> &[SchemaMetadata] {
        &self.tables
    }

    pub fn table(&self, name: &str) -> Option<&SchemaMetadata> {
        self.tables
            .iter()
            .find(|t| t.table.eq_ignore_ascii_case(name))
    }

    /// The first table; single-table deployments only ever have this one.
    pub fn primary(&self) -> &SchemaMetadata {
        &self.tables[0]
    }

    /// Declared type of a column in any table.
    pub fn column_type(&self, name: &str) -> Option<ColumnType> {
        self.tables
            .iter()
            .find_map(|t| t.column(name))
            .map(|c| c.column_type)
    }

    /// Prompt-ready listing: one `table(col type, ...)` line per table.
    pub fn describe(&self) -> String {
        self.tables
            .iter()
            .map(|t| {
                let cols = t
                    .columns
                    .iter()
                    .map(|c| format!("{} {}", c.name, c.declared_type))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("{}.{}({})", self.database, t.table, cols)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
pub(crate) fn devices_catalog() -> SchemaCatalog {
    let devices = SchemaMetadata::new(
        "devices",
        &[
            ("device_name", "string"),
            ("temperature", "double"),
            ("humidity", "double"),
            ("accel_x", "double"),
            ("accel_y", "double"),
            ("accel_z", "double"),
            ("timestamp", "timestamp"),
        ],
    )
    .unwrap();
    SchemaCatalog::from_tables("iot_database", None, vec![devices]).unwrap()
}
