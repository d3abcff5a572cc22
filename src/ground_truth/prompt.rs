//! Prompt assembly for ground-truth generation

use std::collections::BTreeMap;

use crate::discovery::{ColumnInfo, Relationship, TableSample};

/// Build the generation prompt for one batch of queries.
pub fn build_generation_prompt(
    agent_name: &str,
    db_type: &str,
    columns: &[ColumnInfo],
    relationships: &[Relationship],
    samples: &BTreeMap<String, TableSample>,
    num_queries: usize,
) -> String {
    format!(
        r#"You are an expert SQL query generator for a {db_upper} database.

# SYSTEM CONTEXT
- Agent Name: {agent_name}
- Database Type: {db_type}
- Task: Generate {num_queries} realistic, executable SQL test queries

{syntax_hints}

# DATABASE SCHEMA
{schema}

# TABLE RELATIONSHIPS (Foreign Keys for JOINs)
{relationships}

# SAMPLE DATA (Actual values from the database)
{samples}

# GENERATION REQUIREMENTS

## 1. Query Distribution (Exactly {num_queries} queries):
- {simple} Simple SELECT queries (single table, basic WHERE filters, various conditions)
- {agg} Aggregation queries (COUNT, SUM, AVG, MAX, MIN with GROUP BY)
- {join} JOIN queries (use the relationships above if available, multi-table queries)
- {complex} Date/Time or Complex queries (subqueries, window functions, complex filters)

## 2. Quality Rules (CRITICAL):
- Use ONLY table names and column names from the schema above
- Use ONLY values that exist in the sample data
- All JOINs must use the relationships listed above
- Queries must be executable without errors
- Natural language should be clear and business-oriented

## 3. Avoid These Mistakes:
- Don't reference tables/columns that don't exist
- Don't use values that aren't in the sample data
- Don't create invalid JOINs between unrelated tables

# OUTPUT FORMAT (STRICT JSON):
Return ONLY a valid JSON array. No extra text, no markdown, no explanations.

[
  {{
    "natural_language": "natural language question here",
    "sql": "SQL query here"
  }}
]

Generate {num_queries} high-quality queries now.
"#,
        db_upper = db_type.to_uppercase(),
        syntax_hints = syntax_hints(db_type),
        schema = format_schema(columns),
        relationships = format_relationships(relationships),
        samples = format_samples(samples),
        simple = (num_queries as f64 * 0.4) as usize,
        agg = (num_queries as f64 * 0.3) as usize,
        join = (num_queries as f64 * 0.2) as usize,
        complex = (num_queries as f64 * 0.1) as usize,
    )
}

/// Prompt for incremental generation: only the newly added tables/columns.
pub fn build_incremental_prompt(
    agent_name: &str,
    db_type: &str,
    new_columns: &[ColumnInfo],
    samples: &BTreeMap<String, TableSample>,
    num_queries: usize,
) -> String {
    format!(
        r#"You are a database expert. Generate {num_queries} SQL queries for the NEW tables/columns below.

Database Type: {db_type}
Agent: {agent_name}

NEW Schemas (just added):
{schema}

Sample Data:
{samples}

Generate {num_queries} diverse queries focusing on these NEW schemas:
- Simple SELECT queries (40%)
- Aggregations with COUNT, SUM, AVG, GROUP BY (30%)
- WHERE clauses with various conditions (20%)
- JOINs if relationships exist (10%)

IMPORTANT: Return ONLY a valid JSON array with this exact format:
[
  {{"natural_language": "Get all records from new table", "sql": "SELECT * FROM schema.table;"}}
]

Do not include any markdown, explanations, or text outside the JSON array.
"#,
        schema = format_schema(new_columns),
        samples = format_samples(samples),
    )
}

fn format_schema(columns: &[ColumnInfo]) -> String {
    if columns.is_empty() {
        return "No schema information available".to_string();
    }

    let nested = crate::discovery::nest_columns(columns);
    let mut out = Vec::new();
    for (schema, tables) in nested {
        out.push(format!("\n## Schema: {schema}"));
        for (table, cols) in tables {
            out.push(format!("\n### Table: {table}"));
            out.push("Columns:".to_string());
            for (name, ty) in cols {
                out.push(format!("  - {name}: {ty}"));
            }
        }
    }
    out.join("\n")
}

fn format_relationships(relationships: &[Relationship]) -> String {
    if relationships.is_empty() {
        return "No foreign key relationships discovered.".to_string();
    }

    let mut out = vec!["Available JOINs:".to_string()];
    for rel in relationships {
        out.push(format!(
            "  - {}.{}.{} -> {}.{}.{}",
            rel.source_schema,
            rel.source_table,
            rel.source_column,
            rel.target_schema,
            rel.target_table,
            rel.target_column,
        ));
    }
    out.join("\n")
}

fn format_samples(samples: &BTreeMap<String, TableSample>) -> String {
    if samples.is_empty() {
        return "No sample data available".to_string();
    }

    let mut out = Vec::new();
    // Cap at 10 tables so the prompt stays inside token budgets
    for (table, sample) in samples.iter().take(10) {
        out.push(format!("\n## Table: {table}"));
        if sample.rows.is_empty() {
            out.push("  (No data)".to_string());
            continue;
        }

        out.push(format!(
            "Sample rows (showing {} of {}):",
            sample.rows.len().min(3),
            sample.rows.len()
        ));
        for (i, row) in sample.rows.iter().take(3).enumerate() {
            let mut row_str = serde_json::to_string(row).unwrap_or_default();
            if row_str.len() > 200 {
                row_str.truncate(200);
                row_str.push_str("...");
            }
            out.push(format!("  Row {}: {}", i + 1, row_str));
        }

        // Columns with a small set of distinct values become filter hints
        let mut hints = Vec::new();
        for (idx, column) in sample.columns.iter().enumerate() {
            let mut distinct: Vec<String> = Vec::new();
            for row in &sample.rows {
                if let Some(value) = row.get(idx) {
                    if value.is_null() {
                        continue;
                    }
                    let rendered = serde_json::to_string(value).unwrap_or_default();
                    if !distinct.contains(&rendered) {
                        distinct.push(rendered);
                    }
                }
            }
            if distinct.len() > 1 && distinct.len() <= 10 {
                hints.push(format!(
                    "  - {column}: {}",
                    distinct.iter().take(5).cloned().collect::<Vec<_>>().join(", ")
                ));
            }
        }
        if !hints.is_empty() {
            out.push("\nValid values for filtering:".to_string());
            out.extend(hints);
        }
    }
    out.join("\n")
}

fn syntax_hints(db_type: &str) -> &'static str {
    match db_type {
        "postgres" | "postgresql" => {
            r#"# PostgreSQL-Specific Syntax:
- Schema qualification: schema_name.table_name
- Date intervals: INTERVAL '30 days', DATE_TRUNC('month', date_column)
- String comparison: use single quotes 'value'
- Casting: column_name::integer or CAST(column_name AS integer)"#
        }
        "mysql" => {
            r#"# MySQL-Specific Syntax:
- Table names with backticks: `table_name`
- Date intervals: DATE_SUB(NOW(), INTERVAL 30 DAY)
- String comparison: use single quotes 'value'
- Limit: use LIMIT N"#
        }
        "sqlite" => {
            r#"# SQLite Syntax:
- Simple SQL syntax
- Date functions: date('now'), datetime('now', '-30 days')
- String comparison: use single quotes 'value'
- Limit: use LIMIT N"#
        }
        "mongodb" | "mongodb+srv" => {
            r#"# MongoDB Query Language:
- Use aggregation pipeline syntax
- Match stage: {"$match": {"field": "value"}}
- Group stage: {"$group": {"_id": "$field", "count": {"$sum": 1}}}"#
        }
        _ => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn col(table: &str, name: &str, ty: &str) -> ColumnInfo {
        ColumnInfo {
            schema_name: "public".into(),
            table_name: table.into(),
            column_name: name.into(),
            data_type: ty.into(),
            is_nullable: true,
        }
    }

    #[test]
    fn test_prompt_contains_schema_and_counts() {
        let cols = vec![col("products", "sku", "text"), col("products", "stock", "integer")];
        let prompt = build_generation_prompt(
            "demand",
            "postgresql",
            &cols,
            &[],
            &BTreeMap::new(),
            25,
        );
        assert!(prompt.contains("### Table: products"));
        assert!(prompt.contains("Generate 25 high-quality queries now."));
        assert!(prompt.contains("- 10 Simple SELECT queries"));
        assert!(prompt.contains("PostgreSQL-Specific Syntax"));
        assert!(prompt.contains("No foreign key relationships discovered."));
    }

    #[test]
    fn test_incremental_prompt_mentions_new_schemas() {
        let cols = vec![col("returns", "reason", "text")];
        let prompt =
            build_incremental_prompt("demand", "postgres", &cols, &BTreeMap::new(), 10);
        assert!(prompt.contains("NEW Schemas (just added):"));
        assert!(prompt.contains("### Table: returns"));
        assert!(prompt.contains("Generate 10 diverse queries"));
    }
}
