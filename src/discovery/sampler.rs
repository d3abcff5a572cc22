//! Row sampling for ground-truth prompts
//!
//! A handful of real rows per table gives the generator value diversity to
//! write realistic WHERE clauses. Tables that fail to sample are skipped.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::agentdb::{AgentDbKind, QueryExecutor, SqlValue};
use crate::discovery::ColumnInfo;

/// Sampled rows for one table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSample {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<SqlValue>>,
}

/// Sample up to `limit` rows per discovered table.
///
/// Keys are `schema.table` for relational backends and the bare collection
/// name for document stores.
pub async fn sample_database(
    db_url: &str,
    columns: &[ColumnInfo],
    limit: usize,
) -> BTreeMap<String, TableSample> {
    let kind = match AgentDbKind::from_url(db_url) {
        Ok(kind) => kind,
        Err(e) => {
            debug!("Sampling skipped: {e}");
            return BTreeMap::new();
        }
    };

    let tables: Vec<(String, String)> = {
        let mut seen = std::collections::BTreeSet::new();
        columns
            .iter()
            .filter(|c| seen.insert((c.schema_name.clone(), c.table_name.clone())))
            .map(|c| (c.schema_name.clone(), c.table_name.clone()))
            .collect()
    };

    let samples = match kind {
        AgentDbKind::MongoDb => sample_mongodb(db_url, &tables, limit).await,
        _ => sample_relational(db_url, kind, &tables, limit).await,
    };

    info!("Sampled {} tables", samples.len());
    samples
}

async fn sample_relational(
    db_url: &str,
    kind: AgentDbKind,
    tables: &[(String, String)],
    limit: usize,
) -> BTreeMap<String, TableSample> {
    let executor = QueryExecutor::new(Duration::from_secs(5), limit);
    let mut samples = BTreeMap::new();

    for (schema, table) in tables {
        let qualified = match kind {
            AgentDbKind::Sqlite => table.clone(),
            _ => format!("{schema}.{table}"),
        };
        let sql = format!("SELECT * FROM {qualified} LIMIT {limit}");
        let result = executor.execute(&sql, db_url).await;
        if result.success {
            samples.insert(
                format!("{schema}.{table}"),
                TableSample {
                    columns: result.columns,
                    rows: result.rows,
                },
            );
        } else {
            debug!(
                "Could not sample {qualified}: {}",
                result.error.unwrap_or_default()
            );
        }
    }

    samples
}

async fn sample_mongodb(
    db_url: &str,
    tables: &[(String, String)],
    limit: usize,
) -> BTreeMap<String, TableSample> {
    use futures::TryStreamExt;
    use mongodb::bson::{doc, Bson, Document};

    let mut samples = BTreeMap::new();
    let client = match mongodb::Client::with_uri_str(db_url).await {
        Ok(client) => client,
        Err(e) => {
            debug!("MongoDB sampling failed: {e}");
            return samples;
        }
    };

    for (db_name, coll_name) in tables {
        let coll = client
            .database(db_name)
            .collection::<Document>(coll_name);
        let cursor = match coll.find(doc! {}).limit(limit as i64).await {
            Ok(cursor) => cursor,
            Err(e) => {
                debug!("Could not sample {coll_name}: {e}");
                continue;
            }
        };
        let docs: Vec<Document> = match cursor.try_collect().await {
            Ok(docs) => docs,
            Err(e) => {
                debug!("Could not read sample cursor for {coll_name}: {e}");
                continue;
            }
        };
        if docs.is_empty() {
            continue;
        }

        // Field order follows the first document
        let columns: Vec<String> = docs[0].keys().map(|k| k.to_string()).collect();
        let rows = docs
            .iter()
            .map(|d| {
                columns
                    .iter()
                    .map(|c| bson_to_value(d.get(c)))
                    .collect::<Vec<SqlValue>>()
            })
            .collect();

        samples.insert(
            coll_name.clone(),
            TableSample { columns, rows },
        );
    }

    fn bson_to_value(value: Option<&Bson>) -> SqlValue {
        match value {
            None | Some(Bson::Null) => SqlValue::Null,
            Some(Bson::Boolean(b)) => SqlValue::Bool(*b),
            Some(Bson::Int32(i)) => SqlValue::Int(*i as i64),
            Some(Bson::Int64(i)) => SqlValue::Int(*i),
            Some(Bson::Double(f)) => SqlValue::Float(*f),
            Some(Bson::String(s)) => SqlValue::Text(s.clone()),
            Some(Bson::ObjectId(oid)) => SqlValue::Text(oid.to_hex()),
            Some(Bson::DateTime(dt)) => SqlValue::Text(dt.try_to_rfc3339_string().unwrap_or_default()),
            Some(other) => SqlValue::Text(other.to_string()),
        }
    }

    samples
}
