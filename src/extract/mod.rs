//! Declarative field extraction from view-tree nodes.
//!
//! A [`FieldMap`] names every output field once: where it lives (selector),
//! how to pull it (text or attribute), how to type it (normalizer), and what
//! absence means (required or nullable). Extraction reads only from the node
//! it is given — no engine state, no tree mutation.
//!
//! Positional selectors are a structural-drift risk; keeping them inside the
//! field map means drift fails extraction loudly (`Extraction { field,
//! selector }`) instead of silently mis-binding fields.

pub mod assemble;
pub mod normalize;

use crate::error::{GleanerError, GleanerResult};
use crate::view::NodeHandle;
use normalize::NormalizeError;
use serde_json::Value;
use std::sync::Arc;
use tracing::warn;

/// How a raw value is pulled from the resolved node.
#[derive(Debug, Clone)]
pub enum Pull {
    /// Concatenated subtree text.
    Text,
    /// A named attribute.
    Attr(String),
}

/// What absence of the field's node (or attribute) means.
#[derive(Debug, Clone, PartialEq)]
pub enum Presence {
    /// Missing node is a per-record extraction failure.
    Required,
    /// Missing node yields JSON `null`.
    Nullable,
    /// Missing node yields a fixed value (count chrome that some surfaces
    /// simply omit when zero).
    DefaultTo(Value),
}

/// How raw text becomes a typed value.
#[derive(Debug, Clone)]
pub enum Normalize {
    /// Keep the raw string as-is.
    Verbatim,
    /// Trimmed string.
    Trimmed,
    /// Localized "D month-name YYYY" → `YYYY.MM.DD`.
    DottedDate,
    /// Platform-native English date prose → ISO-8601 instant.
    IsoDateTime,
    /// Digit-stripping integer parse with a policy default for no-digit text.
    Count { empty_default: i64 },
    /// Leading float of a rating line.
    Rating,
    /// "Key: Value" lines → flat lowercased-key object.
    KeyValueLines,
}

impl Normalize {
    fn apply(&self, raw: &str) -> Result<Value, NormalizeError> {
        Ok(match self {
            Normalize::Verbatim => Value::String(raw.to_string()),
            Normalize::Trimmed => Value::String(raw.trim().to_string()),
            Normalize::DottedDate => Value::String(normalize::dotted_date(raw)?),
            Normalize::IsoDateTime => Value::String(normalize::iso_datetime(raw)?),
            Normalize::Count { empty_default } => {
                Value::from(normalize::count(raw, *empty_default))
            }
            Normalize::Rating => {
                let parsed = normalize::rating(raw)?;
                serde_json::Number::from_f64(parsed)
                    .map(Value::Number)
                    .ok_or_else(|| NormalizeError(format!("non-finite rating: {parsed}")))?
            }
            Normalize::KeyValueLines => normalize::key_value_lines(raw),
        })
    }
}

/// One output field of a record.
#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub name: String,
    /// Selector resolving to zero-or-one descendant; `None` reads from the
    /// record node itself (attribute pulls on the item element).
    pub selector: Option<String>,
    pub pull: Pull,
    pub normalize: Normalize,
    pub presence: Presence,
}

impl FieldSpec {
    pub fn required(name: &str, selector: &str, pull: Pull, normalize: Normalize) -> Self {
        Self {
            name: name.to_string(),
            selector: Some(selector.to_string()),
            pull,
            normalize,
            presence: Presence::Required,
        }
    }

    pub fn nullable(name: &str, selector: &str, pull: Pull, normalize: Normalize) -> Self {
        Self {
            name: name.to_string(),
            selector: Some(selector.to_string()),
            pull,
            normalize,
            presence: Presence::Nullable,
        }
    }

    /// A required attribute read off the record node itself.
    pub fn own_attr(name: &str, attr: &str) -> Self {
        Self {
            name: name.to_string(),
            selector: None,
            pull: Pull::Attr(attr.to_string()),
            normalize: Normalize::Verbatim,
            presence: Presence::Required,
        }
    }

    fn selector_label(&self) -> &str {
        self.selector.as_deref().unwrap_or(":scope")
    }
}

/// A declarative, stateless, reusable mapping from node to record.
#[derive(Debug, Clone, Default)]
pub struct FieldMap {
    pub fields: Vec<FieldSpec>,
}

impl FieldMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, spec: FieldSpec) -> Self {
        self.fields.push(spec);
        self
    }

    /// Shared maps are cloned per pipeline; wrap once.
    pub fn shared(self) -> Arc<FieldMap> {
        Arc::new(self)
    }
}

/// Extract one record from `node` according to `map`.
///
/// Pure with respect to engine state: reads only from the node. A required
/// field whose selector resolves to nothing — or whose raw text the
/// normalizer rejects — fails this record only.
pub async fn extract(node: &NodeHandle, map: &FieldMap) -> GleanerResult<Value> {
    let mut record = serde_json::Map::new();

    for spec in &map.fields {
        let target = match &spec.selector {
            None => Some(Arc::clone(node)),
            Some(selector) => node.query(selector).await?,
        };

        let raw = match &target {
            Some(t) => match &spec.pull {
                Pull::Text => Some(t.text().await?),
                Pull::Attr(attr) => t.attr(attr).await?,
            },
            None => None,
        };

        let value = match raw {
            Some(raw) => spec.normalize.apply(&raw).map_err(|e| {
                warn!(field = %spec.name, error = %e, "normalization rejected raw value");
                GleanerError::extraction(&spec.name, spec.selector_label())
            })?,
            None => match &spec.presence {
                Presence::Required => {
                    return Err(GleanerError::extraction(&spec.name, spec.selector_label()));
                }
                Presence::Nullable => Value::Null,
                Presence::DefaultTo(default) => default.clone(),
            },
        };

        record.insert(spec.name.clone(), value);
    }

    Ok(Value::Object(record))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::view::fixture::{Elem, FixtureTree};
    use serde_json::json;

    fn review_elem() -> Elem {
        Elem::new("div")
            .attr("id", "R1A2B3")
            .attr("data-hook", "review")
            .child(
                Elem::new("span")
                    .attr("data-hook", "review-author")
                    .text("Pat"),
            )
            .child(
                Elem::new("span")
                    .attr("data-hook", "review-date")
                    .text("Reviewed in the United States on March 5, 2023"),
            )
            .child(
                Elem::new("span")
                    .attr("data-hook", "helpful-vote-statement")
                    .text("1,234 people found this helpful"),
            )
    }

    fn review_map() -> FieldMap {
        FieldMap::new()
            .field(FieldSpec::own_attr("id", "id"))
            .field(FieldSpec::required(
                "author",
                r#"[data-hook="review-author"]"#,
                Pull::Text,
                Normalize::Trimmed,
            ))
            .field(FieldSpec::required(
                "date",
                r#"[data-hook="review-date"]"#,
                Pull::Text,
                Normalize::IsoDateTime,
            ))
            .field(FieldSpec::nullable(
                "helpful",
                r#"[data-hook="helpful-vote-statement"]"#,
                Pull::Text,
                Normalize::Count { empty_default: 1 },
            ))
    }

    #[tokio::test]
    async fn test_extract_record() {
        let tree = FixtureTree::new(Elem::new("body").child(review_elem()));
        let root = tree.root();
        let node = root.query(r#"[data-hook="review"]"#).await.unwrap().unwrap();

        let record = extract(&node, &review_map()).await.unwrap();
        assert_eq!(
            record,
            json!({
                "id": "R1A2B3",
                "author": "Pat",
                "date": "2023-03-05T00:00:00.000Z",
                "helpful": 1234,
            })
        );
    }

    #[tokio::test]
    async fn test_missing_required_field_is_extraction_error() {
        let tree = FixtureTree::new(
            // No author node.
            Elem::new("body").child(Elem::new("div").attr("id", "R9").attr("data-hook", "review")),
        );
        let root = tree.root();
        let node = root.query(r#"[data-hook="review"]"#).await.unwrap().unwrap();

        let err = extract(&node, &review_map()).await.unwrap_err();
        match err {
            GleanerError::Extraction { field, selector } => {
                assert_eq!(field, "author");
                assert!(selector.contains("review-author"));
            }
            other => panic!("expected extraction error, got {other}"),
        }
    }

    #[tokio::test]
    async fn test_missing_nullable_field_yields_null() {
        let tree = FixtureTree::new(
            Elem::new("body").child(
                Elem::new("div")
                    .attr("id", "R2")
                    .attr("data-hook", "review")
                    .child(
                        Elem::new("span")
                            .attr("data-hook", "review-author")
                            .text("Sam"),
                    )
                    .child(
                        Elem::new("span")
                            .attr("data-hook", "review-date")
                            .text("on June 1, 2023"),
                    ),
            ),
        );
        let root = tree.root();
        let node = root.query(r#"[data-hook="review"]"#).await.unwrap().unwrap();

        let record = extract(&node, &review_map()).await.unwrap();
        assert_eq!(record["helpful"], Value::Null);
    }

    #[tokio::test]
    async fn test_malformed_date_fails_the_record() {
        let tree = FixtureTree::new(
            Elem::new("body").child(
                Elem::new("div")
                    .attr("id", "R3")
                    .attr("data-hook", "review")
                    .child(
                        Elem::new("span")
                            .attr("data-hook", "review-author")
                            .text("Kim"),
                    )
                    .child(
                        Elem::new("span")
                            .attr("data-hook", "review-date")
                            .text("yesterday"),
                    ),
            ),
        );
        let root = tree.root();
        let node = root.query(r#"[data-hook="review"]"#).await.unwrap().unwrap();

        assert!(matches!(
            extract(&node, &review_map()).await,
            Err(GleanerError::Extraction { .. })
        ));
    }
}
