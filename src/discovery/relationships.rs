//! Table relationship discovery
//!
//! True foreign keys for relational backends; naming-convention inference
//! (`<x>_id` referencing collection `<x>s`) for document stores. The output
//! is a flat listing - relationship cycles are allowed and never traversed.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sqlx::mysql::MySqlConnection;
use sqlx::postgres::PgConnection;
use sqlx::sqlite::SqliteConnection;
use sqlx::{Connection, Row};
use tracing::{debug, info};

use crate::agentdb::{sqlite_path, AgentDbKind};

/// How a relationship was established
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipKind {
    ForeignKey,
    Inferred,
}

/// One table-to-table relationship
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
    pub source_schema: String,
    pub source_table: String,
    pub source_column: String,
    pub target_schema: String,
    pub target_table: String,
    pub target_column: String,
    pub kind: RelationshipKind,
    pub constraint_name: Option<String>,
}

/// Discover relationships for any supported backend. Failures degrade to an
/// empty list - generation works without relationships, just with fewer
/// JOIN examples.
pub async fn discover_relationships(db_url: &str) -> Vec<Relationship> {
    let result = match AgentDbKind::from_url(db_url) {
        Ok(AgentDbKind::Postgres) => discover_postgres(db_url).await,
        Ok(AgentDbKind::MySql) => discover_mysql(db_url).await,
        Ok(AgentDbKind::Sqlite) => discover_sqlite(db_url).await,
        Ok(AgentDbKind::MongoDb) => discover_mongodb(db_url).await,
        Err(e) => {
            debug!("Relationship discovery skipped: {e}");
            return Vec::new();
        }
    };

    match result {
        Ok(rels) => {
            info!("Discovered {} relationships", rels.len());
            rels
        }
        Err(e) => {
            debug!("Relationship discovery failed: {e}");
            Vec::new()
        }
    }
}

async fn discover_postgres(db_url: &str) -> Result<Vec<Relationship>> {
    let mut conn = PgConnection::connect(db_url).await?;

    let rows: Vec<(String, String, String, String, String, String, String)> = sqlx::query_as(
        r#"
        SELECT
            tc.table_schema,
            tc.table_name,
            kcu.column_name,
            ccu.table_schema,
            ccu.table_name,
            ccu.column_name,
            tc.constraint_name
        FROM information_schema.table_constraints AS tc
        JOIN information_schema.key_column_usage AS kcu
            ON tc.constraint_name = kcu.constraint_name
            AND tc.table_schema = kcu.table_schema
        JOIN information_schema.constraint_column_usage AS ccu
            ON ccu.constraint_name = tc.constraint_name
            AND ccu.table_schema = tc.table_schema
        WHERE tc.constraint_type = 'FOREIGN KEY'
            AND tc.table_schema NOT IN ('pg_catalog', 'information_schema')
        ORDER BY tc.table_schema, tc.table_name
        "#,
    )
    .fetch_all(&mut conn)
    .await
    .context("PostgreSQL relationship discovery failed")?;

    Ok(rows
        .into_iter()
        .map(|(ss, st, sc, ts, tt, tc, name)| Relationship {
            source_schema: ss,
            source_table: st,
            source_column: sc,
            target_schema: ts,
            target_table: tt,
            target_column: tc,
            kind: RelationshipKind::ForeignKey,
            constraint_name: Some(name),
        })
        .collect())
}

async fn discover_mysql(db_url: &str) -> Result<Vec<Relationship>> {
    let mut conn = MySqlConnection::connect(db_url).await?;

    let rows: Vec<(String, String, String, String, String, String, String)> = sqlx::query_as(
        r#"
        SELECT
            TABLE_SCHEMA, TABLE_NAME, COLUMN_NAME,
            REFERENCED_TABLE_SCHEMA, REFERENCED_TABLE_NAME, REFERENCED_COLUMN_NAME,
            CONSTRAINT_NAME
        FROM INFORMATION_SCHEMA.KEY_COLUMN_USAGE
        WHERE REFERENCED_TABLE_NAME IS NOT NULL
            AND TABLE_SCHEMA = DATABASE()
        ORDER BY TABLE_NAME
        "#,
    )
    .fetch_all(&mut conn)
    .await
    .context("MySQL relationship discovery failed")?;

    Ok(rows
        .into_iter()
        .map(|(ss, st, sc, ts, tt, tc, name)| Relationship {
            source_schema: ss,
            source_table: st,
            source_column: sc,
            target_schema: ts,
            target_table: tt,
            target_column: tc,
            kind: RelationshipKind::ForeignKey,
            constraint_name: Some(name),
        })
        .collect())
}

async fn discover_sqlite(db_url: &str) -> Result<Vec<Relationship>> {
    let path = sqlite_path(db_url);
    let mut conn = SqliteConnection::connect(&format!("sqlite://{path}?mode=ro")).await?;

    let tables: Vec<(String,)> =
        sqlx::query_as("SELECT name FROM sqlite_master WHERE type = 'table'")
            .fetch_all(&mut conn)
            .await?;

    let mut relationships = Vec::new();
    for (table,) in tables {
        let rows = sqlx::query(&format!("PRAGMA foreign_key_list({table})"))
            .fetch_all(&mut conn)
            .await
            .with_context(|| format!("PRAGMA foreign_key_list failed for {table}"))?;

        for row in rows {
            let target_table: String = row.try_get("table")?;
            let from_column: String = row.try_get("from")?;
            let to_column: String = row.try_get("to")?;
            relationships.push(Relationship {
                source_schema: "main".to_string(),
                source_table: table.clone(),
                source_column: from_column,
                target_schema: "main".to_string(),
                target_table,
                target_column: to_column,
                kind: RelationshipKind::ForeignKey,
                constraint_name: None,
            });
        }
    }

    Ok(relationships)
}

async fn discover_mongodb(db_url: &str) -> Result<Vec<Relationship>> {
    use futures::TryStreamExt;
    use mongodb::bson::{doc, Bson, Document};
    use std::collections::HashSet;

    let client = mongodb::Client::with_uri_str(db_url).await?;
    let db = client.default_database().context("mongodb url lacks a database")?;

    let mut seen: HashSet<(String, String, String)> = HashSet::new();
    let mut relationships = Vec::new();

    for coll_name in db.list_collection_names().await? {
        let coll = db.collection::<Document>(&coll_name);
        let mut cursor = coll.find(doc! {}).limit(10).await?;

        while let Some(document) = cursor.try_next().await? {
            for (field, value) in document.iter() {
                // `customer_id` holding an ObjectId implies `customers`
                if field.ends_with("_id") && field != "_id" && matches!(value, Bson::ObjectId(_)) {
                    let target = format!("{}s", &field[..field.len() - 3]);
                    let key = (coll_name.clone(), field.to_string(), target.clone());
                    if seen.insert(key) {
                        relationships.push(Relationship {
                            source_schema: db.name().to_string(),
                            source_table: coll_name.clone(),
                            source_column: field.to_string(),
                            target_schema: db.name().to_string(),
                            target_table: target,
                            target_column: "_id".to_string(),
                            kind: RelationshipKind::Inferred,
                            constraint_name: None,
                        });
                    }
                }
            }
        }
    }

    Ok(relationships)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_serialization() {
        assert_eq!(
            serde_json::to_string(&RelationshipKind::ForeignKey).unwrap(),
            "\"foreign_key\""
        );
        assert_eq!(
            serde_json::to_string(&RelationshipKind::Inferred).unwrap(),
            "\"inferred\""
        );
    }
}
