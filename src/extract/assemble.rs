//! Record assembly — extraction over node collections with stable ordering.
//!
//! The assembler maps the extractor over every node, isolates per-record
//! failures (structure drift on one item must not abort the batch), attaches
//! nested collections, and sorts by the normalized date field. Sorting is a
//! stable lexicographic compare — valid because the canonical date formats
//! are fixed-width and zero-padded — so ties preserve original document
//! order and re-running assembly over unchanged nodes is bit-identical.

use crate::error::{GleanerError, GleanerResult};
use crate::extract::{extract, FieldMap};
use crate::view::NodeHandle;
use serde_json::Value;
use tracing::debug;

/// A nested collection attached to each record (a question's answers).
pub struct NestedSpec {
    /// Output field the nested list is attached under.
    pub name: String,
    /// Selector for nested item nodes within the record node.
    pub selector: String,
    /// Field map for nested records.
    pub map: FieldMap,
    /// Date field the nested list is sorted by.
    pub sort_field: String,
}

/// The outcome of one assembly pass.
pub struct Assembly {
    /// Validated, ordered records.
    pub records: Vec<Value>,
    /// Per-record extraction failures that were isolated.
    pub skipped: Vec<GleanerError>,
}

/// Assemble ordered records from `nodes`.
///
/// An empty nested collection is attached as `null`, never as an empty list
/// standing in for "no data". Extraction failures skip the affected record
/// (or nested record) only; backend failures propagate.
pub async fn assemble(
    nodes: &[NodeHandle],
    map: &FieldMap,
    nested: Option<&NestedSpec>,
    sort_field: &str,
) -> GleanerResult<Assembly> {
    let mut records = Vec::with_capacity(nodes.len());
    let mut skipped = Vec::new();

    for node in nodes {
        let mut record = match extract(node, map).await {
            Ok(record) => record,
            Err(err @ GleanerError::Extraction { .. }) => {
                debug!(error = %err, "skipping record");
                skipped.push(err);
                continue;
            }
            Err(err) => return Err(err),
        };

        if let Some(nested) = nested {
            let children = node.query_all(&nested.selector).await?;
            let value = if children.is_empty() {
                Value::Null
            } else {
                let sub = assemble_flat(&children, &nested.map, &nested.sort_field).await?;
                skipped.extend(sub.skipped);
                Value::Array(sub.records)
            };
            record
                .as_object_mut()
                .expect("extract always yields an object")
                .insert(nested.name.clone(), value);
        }

        records.push(record);
    }

    sort_by_field(&mut records, sort_field);
    Ok(Assembly { records, skipped })
}

async fn assemble_flat(
    nodes: &[NodeHandle],
    map: &FieldMap,
    sort_field: &str,
) -> GleanerResult<Assembly> {
    let mut records = Vec::with_capacity(nodes.len());
    let mut skipped = Vec::new();

    for node in nodes {
        match extract(node, map).await {
            Ok(record) => records.push(record),
            Err(err @ GleanerError::Extraction { .. }) => skipped.push(err),
            Err(err) => return Err(err),
        }
    }

    sort_by_field(&mut records, sort_field);
    Ok(Assembly { records, skipped })
}

/// Stable ascending sort on a string field. Records missing the field sort
/// first, keeping their relative order.
fn sort_by_field(records: &mut [Value], field: &str) {
    records.sort_by(|a, b| {
        let a = a.get(field).and_then(Value::as_str).unwrap_or("");
        let b = b.get(field).and_then(Value::as_str).unwrap_or("");
        a.cmp(b)
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::{FieldSpec, Normalize, Pull};
    use crate::view::fixture::{Elem, FixtureTree};
    use serde_json::json;

    fn item(id: &str, date: &str, author: &str) -> Elem {
        Elem::new("div")
            .attr("data-question-id", id)
            .child(Elem::new("span").attr("data-hook", "date").text(date))
            .child(Elem::new("span").attr("data-hook", "author").text(author))
    }

    fn map() -> FieldMap {
        FieldMap::new()
            .field(FieldSpec::own_attr("id", "data-question-id"))
            .field(FieldSpec::required(
                "date",
                r#"[data-hook="date"]"#,
                Pull::Text,
                Normalize::DottedDate,
            ))
            .field(FieldSpec::required(
                "author",
                r#"[data-hook="author"]"#,
                Pull::Text,
                Normalize::Trimmed,
            ))
    }

    async fn nodes_of(tree: &FixtureTree) -> Vec<NodeHandle> {
        tree.root().query_all("[data-question-id]").await.unwrap()
    }

    #[tokio::test]
    async fn test_sorted_ascending_with_stable_ties() {
        // Dates 2022.11.14 / 2022.10.18 / 2022.10.18 — the tied pair must
        // keep its input order.
        let tree = FixtureTree::new(
            Elem::new("div")
                .child(item("q-1", "14 ноября 2022", "A"))
                .child(item("q-2", "18 октября 2022", "B"))
                .child(item("q-3", "18 октября 2022", "C")),
        );

        let assembly = assemble(&nodes_of(&tree).await, &map(), None, "date")
            .await
            .unwrap();
        let ids: Vec<&str> = assembly
            .records
            .iter()
            .map(|r| r["id"].as_str().unwrap())
            .collect();
        assert_eq!(ids, vec!["q-2", "q-3", "q-1"]);
        assert!(assembly.skipped.is_empty());
    }

    #[tokio::test]
    async fn test_idempotent_over_unchanged_nodes() {
        let tree = FixtureTree::new(
            Elem::new("div")
                .child(item("q-1", "2 мая 2023", "A"))
                .child(item("q-2", "1 мая 2023", "B")),
        );
        let nodes = nodes_of(&tree).await;

        let first = assemble(&nodes, &map(), None, "date").await.unwrap();
        let second = assemble(&nodes, &map(), None, "date").await.unwrap();
        assert_eq!(first.records, second.records);
    }

    #[tokio::test]
    async fn test_failed_record_is_isolated() {
        let tree = FixtureTree::new(
            Elem::new("div")
                .child(item("q-1", "2 мая 2023", "A"))
                // Malformed month name: this record is dropped, not the batch.
                .child(item("q-2", "2 floréal 2023", "B"))
                .child(item("q-3", "1 мая 2023", "C")),
        );

        let assembly = assemble(&nodes_of(&tree).await, &map(), None, "date")
            .await
            .unwrap();
        assert_eq!(assembly.records.len(), 2);
        assert_eq!(assembly.skipped.len(), 1);
    }

    #[tokio::test]
    async fn test_nested_empty_collection_is_null() {
        let answers = NestedSpec {
            name: "answers".to_string(),
            selector: "[data-answer-id]".to_string(),
            map: FieldMap::new()
                .field(FieldSpec::own_attr("id", "data-answer-id"))
                .field(FieldSpec::required(
                    "date",
                    r#"[data-hook="date"]"#,
                    Pull::Text,
                    Normalize::DottedDate,
                )),
            sort_field: "date".to_string(),
        };

        let with_answers = item("q-1", "2 мая 2023", "A").child(
            Elem::new("div")
                .attr("data-answer-id", "a-2")
                .child(Elem::new("span").attr("data-hook", "date").text("4 мая 2023")),
        ).child(
            Elem::new("div")
                .attr("data-answer-id", "a-1")
                .child(Elem::new("span").attr("data-hook", "date").text("3 мая 2023")),
        );
        let tree = FixtureTree::new(
            Elem::new("div")
                .child(with_answers)
                .child(item("q-2", "1 мая 2023", "B")),
        );

        let assembly = assemble(&nodes_of(&tree).await, &map(), Some(&answers), "date")
            .await
            .unwrap();

        let q2 = &assembly.records[0]; // earlier date sorts first
        let q1 = &assembly.records[1];
        assert_eq!(q2["answers"], Value::Null);
        assert_eq!(
            q1["answers"],
            json!([
                {"id": "a-1", "date": "2023.05.03"},
                {"id": "a-2", "date": "2023.05.04"},
            ])
        );
    }
}
