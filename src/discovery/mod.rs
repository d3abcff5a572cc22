//! Schema discovery across agent database families
//!
//! Every backend reduces to the same capability set: list tables, list
//! columns with types and nullability. Relational backends read their
//! information schema; document stores sample one document per collection
//! and infer fields from it.

pub mod relationships;
pub mod sampler;

pub use relationships::{discover_relationships, Relationship, RelationshipKind};
pub use sampler::{sample_database, TableSample};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sqlx::mysql::MySqlConnection;
use sqlx::postgres::PgConnection;
use sqlx::sqlite::SqliteConnection;
use sqlx::{Connection, Row};
use tracing::info;

use crate::agentdb::{sqlite_path, AgentDbKind};

/// One discovered column
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub schema_name: String,
    pub table_name: String,
    pub column_name: String,
    pub data_type: String,
    pub is_nullable: bool,
}

impl ColumnInfo {
    /// The identity tuple used for set-difference during schema scans.
    pub fn identity(&self) -> (String, String, String) {
        (
            self.schema_name.clone(),
            self.table_name.clone(),
            self.column_name.clone(),
        )
    }
}

/// Database-agnostic schema discovery
pub struct SchemaDiscovery;

impl SchemaDiscovery {
    /// Discover the flat column list for an agent database.
    pub async fn discover(db_url: &str) -> Result<Vec<ColumnInfo>> {
        let kind = AgentDbKind::from_url(db_url)?;
        info!("Discovering schemas for database type {kind:?}");

        let columns = match kind {
            AgentDbKind::Postgres => Self::discover_postgres(db_url).await?,
            AgentDbKind::MySql => Self::discover_mysql(db_url).await?,
            AgentDbKind::Sqlite => Self::discover_sqlite(db_url).await?,
            AgentDbKind::MongoDb => Self::discover_mongodb(db_url).await?,
        };

        info!("Discovered {} columns", columns.len());
        Ok(columns)
    }

    async fn discover_postgres(db_url: &str) -> Result<Vec<ColumnInfo>> {
        let mut conn = PgConnection::connect(db_url)
            .await
            .context("failed to connect to agent PostgreSQL")?;

        let rows: Vec<(String, String, String, String, String)> = sqlx::query_as(
            r#"
            SELECT table_schema, table_name, column_name, data_type, is_nullable
            FROM information_schema.columns
            WHERE table_schema NOT IN ('pg_catalog', 'information_schema', 'pg_toast')
            ORDER BY table_schema, table_name, ordinal_position
            "#,
        )
        .fetch_all(&mut conn)
        .await
        .context("PostgreSQL schema discovery failed")?;

        Ok(rows
            .into_iter()
            .map(
                |(schema_name, table_name, column_name, data_type, nullable)| ColumnInfo {
                    schema_name,
                    table_name,
                    column_name,
                    data_type,
                    is_nullable: nullable == "YES",
                },
            )
            .collect())
    }

    async fn discover_mysql(db_url: &str) -> Result<Vec<ColumnInfo>> {
        let mut conn = MySqlConnection::connect(db_url)
            .await
            .context("failed to connect to agent MySQL")?;

        let rows: Vec<(String, String, String, String, String)> = sqlx::query_as(
            r#"
            SELECT TABLE_SCHEMA, TABLE_NAME, COLUMN_NAME, DATA_TYPE, IS_NULLABLE
            FROM information_schema.COLUMNS
            WHERE TABLE_SCHEMA NOT IN ('information_schema', 'mysql', 'performance_schema', 'sys')
            ORDER BY TABLE_SCHEMA, TABLE_NAME, ORDINAL_POSITION
            "#,
        )
        .fetch_all(&mut conn)
        .await
        .context("MySQL schema discovery failed")?;

        Ok(rows
            .into_iter()
            .map(
                |(schema_name, table_name, column_name, data_type, nullable)| ColumnInfo {
                    schema_name,
                    table_name,
                    column_name,
                    data_type,
                    is_nullable: nullable == "YES",
                },
            )
            .collect())
    }

    async fn discover_sqlite(db_url: &str) -> Result<Vec<ColumnInfo>> {
        let path = sqlite_path(db_url);
        let mut conn = SqliteConnection::connect(&format!("sqlite://{path}?mode=ro"))
            .await
            .context("failed to open agent SQLite database")?;

        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'",
        )
        .fetch_all(&mut conn)
        .await
        .context("SQLite schema discovery failed")?;

        let mut columns = Vec::new();
        for (table_name,) in tables {
            let rows = sqlx::query(&format!("PRAGMA table_info({table_name})"))
                .fetch_all(&mut conn)
                .await
                .with_context(|| format!("PRAGMA table_info failed for {table_name}"))?;

            for row in rows {
                let column_name: String = row.try_get("name")?;
                let data_type: String = row.try_get("type")?;
                let notnull: i64 = row.try_get("notnull")?;
                columns.push(ColumnInfo {
                    schema_name: "main".to_string(),
                    table_name: table_name.clone(),
                    column_name,
                    data_type,
                    is_nullable: notnull == 0,
                });
            }
        }

        Ok(columns)
    }

    async fn discover_mongodb(db_url: &str) -> Result<Vec<ColumnInfo>> {
        use mongodb::bson::Bson;

        let client = mongodb::Client::with_uri_str(db_url)
            .await
            .context("failed to connect to agent MongoDB")?;

        let mut columns = Vec::new();
        for db_name in client.list_database_names().await? {
            if matches!(db_name.as_str(), "admin" | "config" | "local") {
                continue;
            }
            let db = client.database(&db_name);
            for coll_name in db.list_collection_names().await? {
                let coll = db.collection::<mongodb::bson::Document>(&coll_name);
                // One sampled document defines the inferred field set; an
                // empty collection contributes zero columns.
                let Some(sample) = coll.find_one(mongodb::bson::doc! {}).await? else {
                    continue;
                };
                for (field_name, value) in sample.iter() {
                    let data_type = match value {
                        Bson::Double(_) => "double",
                        Bson::String(_) => "string",
                        Bson::Boolean(_) => "bool",
                        Bson::Int32(_) => "int",
                        Bson::Int64(_) => "long",
                        Bson::DateTime(_) => "date",
                        Bson::ObjectId(_) => "objectId",
                        Bson::Array(_) => "array",
                        Bson::Document(_) => "object",
                        Bson::Null => "null",
                        Bson::Decimal128(_) => "decimal",
                        _ => "mixed",
                    };
                    columns.push(ColumnInfo {
                        schema_name: db_name.clone(),
                        table_name: coll_name.clone(),
                        column_name: field_name.to_string(),
                        data_type: data_type.to_string(),
                        is_nullable: true,
                    });
                }
            }
        }

        Ok(columns)
    }
}

/// Group a flat column list into `{schema -> {table -> [columns]}}` nesting,
/// the shape the ground-truth prompt serializes.
pub fn nest_columns(
    columns: &[ColumnInfo],
) -> Vec<(String, Vec<(String, Vec<(String, String)>)>)> {
    use std::collections::BTreeMap;

    let mut nested: BTreeMap<String, BTreeMap<String, Vec<(String, String)>>> = BTreeMap::new();
    for col in columns {
        nested
            .entry(col.schema_name.clone())
            .or_default()
            .entry(col.table_name.clone())
            .or_default()
            .push((col.column_name.clone(), col.data_type.clone()));
    }

    nested
        .into_iter()
        .map(|(schema, tables)| (schema, tables.into_iter().collect()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn col(schema: &str, table: &str, name: &str, ty: &str) -> ColumnInfo {
        ColumnInfo {
            schema_name: schema.into(),
            table_name: table.into(),
            column_name: name.into(),
            data_type: ty.into(),
            is_nullable: true,
        }
    }

    #[test]
    fn test_nest_columns_groups_by_schema_and_table() {
        let flat = vec![
            col("sales", "orders", "id", "integer"),
            col("sales", "orders", "total", "numeric"),
            col("sales", "customers", "id", "integer"),
            col("ops", "jobs", "name", "text"),
        ];
        let nested = nest_columns(&flat);
        assert_eq!(nested.len(), 2);

        let (schema, tables) = &nested[1];
        assert_eq!(schema, "sales");
        assert_eq!(tables.len(), 2);
        let orders = tables.iter().find(|(t, _)| t == "orders").unwrap();
        assert_eq!(orders.1.len(), 2);
    }

    #[test]
    fn test_identity_tuple() {
        let c = col("public", "products", "sku", "text");
        assert_eq!(
            c.identity(),
            ("public".into(), "products".into(), "sku".into())
        );
    }
}
