use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::SchemaMetadata;
use crate::core::aws::AwsClient;

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct GetTableRequest<'a> {
    database_name: &'a str,
    name: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GetTableResponse {
    table: GlueTable,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GlueTable {
    name: String,
    storage_descriptor: Option<StorageDescriptor>,
    #[serde(default)]
    partition_keys: Vec<GlueColumn>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StorageDescriptor {
    #[serde(default)]
    columns: Vec<GlueColumn>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GlueColumn {
    name: String,
    #[serde(rename = "Type")]
    column_type: String,
}

/// Reads one table definition through `AWSGlue.GetTable`. Partition keys follow the
/// regular columns, matching how Athena exposes them.
pub async fn fetch_glue_table(glue: &AwsClient, database: &str, table: &str) -> Result<SchemaMetadata> {
    let res: GetTableResponse = glue
        .call_json(
            "AWSGlue.GetTable",
            &GetTableRequest {
                database_name: database,
                name: table,
            },
        )
        .await
        .with_context(|| format!("Glue GetTable {}.{} failed", database, table))?;
    schema_from_glue(res.table)
}

fn schema_from_glue(table: GlueTable) -> Result<SchemaMetadata> {
    let columns = table
        .storage_descriptor
        .map(|sd| sd.columns)
        .unwrap_or_default()
        .into_iter()
        .chain(table.partition_keys)
        .collect::<Vec<_>>();
    let pairs: Vec<(&str, &str)> = columns
        .iter()
        .map(|c| (c.name.as_str(), c.column_type.as_str()))
        .collect();
    SchemaMetadata::new(&table.name, &pairs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_keys_follow_columns() {
        let body = r#"{
            "Table": {
                "Name": "devices",
                "StorageDescriptor": {
                    "Columns": [
                        {"Name": "device_name", "Type": "string"},
                        {"Name": "temperature", "Type": "double"}
                    ]
                },
                "PartitionKeys": [{"Name": "dt", "Type": "date"}]
            }
        }"#;
        let res: GetTableResponse = serde_json::from_str(body).unwrap();
        let schema = schema_from_glue(res.table).unwrap();
        let names: Vec<_> = schema.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["device_name", "temperature", "dt"]);
    }
}
