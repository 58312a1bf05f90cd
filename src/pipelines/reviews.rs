//! Review extraction with pagination and boundary-date continuation.
//!
//! The review surface renders a full page per request, so there is no
//! materialization wait here — the work is chrome parsing (stats, not-found,
//! captcha), field-map assembly, and continuation planning over the page
//! total the chrome reports.

use crate::error::{GleanerError, GleanerResult};
use crate::events::{EngineEvent, EventBus};
use crate::extract::assemble::assemble;
use crate::extract::{FieldMap, FieldSpec, Normalize, Presence, Pull};
use crate::plan::{self, page_count, Stats, UnitOfWorkContext};
use crate::pipelines::{report_output, REVIEWS_HANDLER};
use crate::scheduler::Scheduler;
use crate::schema;
use crate::view::NodeHandle;
use regex::Regex;
use serde_json::{json, Value};
use std::sync::Arc;

const CAPTCHA_SELECTOR: &str = r#"form[action="/errors/validateCaptcha"]"#;
const NOT_FOUND_SELECTOR: &str = "#g div img";
const NOT_FOUND_ALT: &str =
    "Sorry! We couldn't find that page. Try searching or go to the home page.";
const STATS_SELECTOR: &str = r#"[data-hook="cr-filter-info-section"]"#;
const REVIEW_SELECTOR: &str = r#"[data-hook="review"]"#;

/// Input schema for `foo_reviews` units.
///
/// `date` is the optional boundary anchor; units created by the planner's
/// date-extension mode never carry it, so they cannot cascade.
pub fn input_schema() -> Value {
    json!({
        "type": "object",
        "additionalProperties": false,
        "properties": {
            "only": {"default": true, "type": "boolean"},
            "page": {"default": 1, "type": "integer"},
            "sortBy": {"default": "recent", "enum": ["recent", "helpful"]},
            "sku": {"type": "string"},
            "date": {"type": "string", "format": "date-time"},
        },
        "required": ["sku"],
    })
}

/// Outbound schema for the assembled result object.
pub fn result_schema() -> Value {
    json!({
        "type": "object",
        "additionalProperties": false,
        "properties": {
            "reviews": {
                "type": "array",
                "items": {
                    "type": "object",
                    "additionalProperties": false,
                    "properties": {
                        "id": {"type": "string"},
                        "author": {"type": "string"},
                        "rating": {"type": "number", "minimum": 0, "maximum": 5},
                        "title": {"type": "string"},
                        "date": {"type": "string", "format": "date-time"},
                        "product": {"anyOf": [{"type": "object"}, {"type": "null"}]},
                        "content": {"anyOf": [{"type": "string"}, {"type": "null"}]},
                        "helpful": {"type": "integer"},
                    },
                    "required": [
                        "id", "author", "rating", "title",
                        "date", "product", "content", "helpful",
                    ],
                },
            },
            "stats": {
                "type": "object",
                "additionalProperties": false,
                "properties": {
                    "ratings": {"type": "integer"},
                    "reviews": {"type": "integer"},
                    "pages": {"type": "integer"},
                },
                "required": ["ratings", "reviews", "pages"],
            },
            "found": {"type": "boolean"},
        },
        "required": ["reviews", "stats", "found"],
    })
}

/// Page URL for a validated unit value.
pub fn review_url(value: &Value) -> String {
    let sku = value.get("sku").and_then(Value::as_str).unwrap_or_default();
    let page = value.get("page").and_then(Value::as_u64).unwrap_or(1);
    let sort_by = value
        .get("sortBy")
        .and_then(Value::as_str)
        .unwrap_or("recent");
    format!("https://foo.com/reviews/{sku}/?pageNumber={page}&sortBy={sort_by}")
}

fn review_field_map() -> FieldMap {
    FieldMap::new()
        .field(FieldSpec::own_attr("id", "id"))
        .field(FieldSpec::required(
            "author",
            ".a-profile-name",
            Pull::Text,
            Normalize::Trimmed,
        ))
        .field(FieldSpec::required(
            "rating",
            ".review-rating",
            Pull::Text,
            Normalize::Rating,
        ))
        .field(FieldSpec::required(
            "title",
            ".review-title",
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
            "product",
            r#"[data-hook^="format-strip"]"#,
            Pull::Text,
            Normalize::KeyValueLines,
        ))
        .field(FieldSpec::nullable(
            "content",
            r#"[data-hook="review-body"] span"#,
            Pull::Text,
            Normalize::Trimmed,
        ))
        .field(FieldSpec {
            name: "helpful".to_string(),
            selector: Some(r#"[data-hook="helpful-vote-statement"]"#.to_string()),
            pull: Pull::Text,
            normalize: Normalize::Count { empty_default: 1 },
            presence: Presence::DefaultTo(json!(0)),
        })
}

/// The `foo_reviews` pipeline.
pub struct ReviewsPipeline {
    pub scheduler: Arc<dyn Scheduler>,
    pub events: EventBus,
}

impl ReviewsPipeline {
    /// Run one unit of work against an already-rendered page.
    pub async fn run(&self, page: &NodeHandle, value: Value) -> GleanerResult<Value> {
        let value = schema::validate_config(value, &input_schema())?;
        let ctx = UnitOfWorkContext::new(REVIEWS_HANDLER, value);

        if page.query(CAPTCHA_SELECTOR).await?.is_some() {
            self.events.emit(EngineEvent::Blocked {
                handler: REVIEWS_HANDLER.to_string(),
                reason: "Captcha".to_string(),
            });
            return Err(GleanerError::Blocked {
                reason: "Captcha".to_string(),
            });
        }

        let not_found = detect_not_found(page).await?;
        let stats = parse_stats(page).await?;

        let review_nodes = page.query_all(REVIEW_SELECTOR).await?;
        let assembly = assemble(&review_nodes, &review_field_map(), None, "date").await?;
        for skip in &assembly.skipped {
            if let GleanerError::Extraction { field, selector } = skip {
                self.events.emit(EngineEvent::RecordSkipped {
                    handler: REVIEWS_HANDLER.to_string(),
                    field: field.clone(),
                    selector: selector.clone(),
                });
            }
        }
        self.events.emit(EngineEvent::RecordsAssembled {
            handler: REVIEWS_HANDLER.to_string(),
            records: assembly.records.len(),
            failed: assembly.skipped.len(),
        });

        if !not_found {
            let plan = plan::plan(&ctx, &assembly.records, &stats, &input_schema())?;
            let units = plan.units.len();
            for unit in plan.units {
                self.scheduler.schedule(unit).await?;
            }
            self.events.emit(EngineEvent::ContinuationPlanned {
                handler: REVIEWS_HANDLER.to_string(),
                units,
                mode: plan.mode.as_str().to_string(),
            });
        }

        let result = json!({
            "reviews": assembly.records,
            "stats": {
                "ratings": stats.ratings,
                "reviews": stats.reviews,
                "pages": stats.pages,
            },
            "found": !not_found,
        });
        report_output(&self.events, REVIEWS_HANDLER, &result, &result_schema());
        Ok(result)
    }
}

/// Detect the not-found page by its apology image.
async fn detect_not_found(page: &NodeHandle) -> GleanerResult<bool> {
    let Some(img) = page.query(NOT_FOUND_SELECTOR).await? else {
        return Ok(false);
    };
    Ok(img.attr("alt").await?.as_deref() == Some(NOT_FOUND_ALT))
}

/// Parse aggregate counters from the filter-info chrome line
/// ("1,234 total ratings, 567 with reviews"). Absent chrome means an empty
/// result surface: all counters zero.
async fn parse_stats(page: &NodeHandle) -> GleanerResult<Stats> {
    let Some(info) = page.query(STATS_SELECTOR).await? else {
        return Ok(Stats::default());
    };
    let text = info.text().await?;

    let ratings = capture_count(&text, r"([\d,]+)\s+total");
    let reviews = capture_count(&text, r"ratings?,\s+([\d,]+)\s+with");

    Ok(Stats {
        ratings,
        reviews,
        pages: page_count(reviews),
    })
}

fn capture_count(text: &str, pattern: &str) -> u64 {
    Regex::new(pattern)
        .expect("static pattern compiles")
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().replace(',', ""))
        .and_then(|digits| digits.parse().ok())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::RecordingScheduler;
    use crate::view::fixture::{Elem, FixtureTree};
    use crate::view::ViewTree;

    fn review_elem(id: &str, date: &str, helpful: Option<&str>) -> Elem {
        let mut elem = Elem::new("div")
            .attr("id", id)
            .attr("data-hook", "review")
            .child(Elem::new("span").attr("class", "a-profile-name").text("Pat"))
            .child(
                Elem::new("i")
                    .attr("class", "review-rating")
                    .text("4.0 out of 5 stars"),
            )
            .child(Elem::new("a").attr("class", "review-title").text(" Great "))
            .child(Elem::new("span").attr("data-hook", "review-date").text(date))
            .child(
                Elem::new("div")
                    .attr("data-hook", "review-body")
                    .child(Elem::new("span").text("Works well.")),
            );
        if let Some(helpful) = helpful {
            elem = elem.child(
                Elem::new("span")
                    .attr("data-hook", "helpful-vote-statement")
                    .text(helpful),
            );
        }
        elem
    }

    fn stats_chrome(text: &str) -> Elem {
        Elem::new("div")
            .attr("data-hook", "cr-filter-info-section")
            .text(text)
    }

    fn pipeline() -> (ReviewsPipeline, Arc<RecordingScheduler>) {
        let scheduler = Arc::new(RecordingScheduler::new());
        (
            ReviewsPipeline {
                scheduler: Arc::clone(&scheduler) as Arc<dyn Scheduler>,
                events: EventBus::new(16),
            },
            scheduler,
        )
    }

    #[tokio::test]
    async fn test_captcha_is_blocking() {
        let tree = FixtureTree::new(
            Elem::new("body")
                .child(Elem::new("form").attr("action", "/errors/validateCaptcha")),
        );
        let (pipeline, scheduler) = pipeline();
        let page = tree.document().await.unwrap();

        let err = pipeline
            .run(&page, json!({"sku": "X1"}))
            .await
            .unwrap_err();
        assert!(matches!(err, GleanerError::Blocked { .. }));
        assert!(scheduler.scheduled().is_empty());
    }

    #[tokio::test]
    async fn test_not_found_skips_planning() {
        let tree = FixtureTree::new(
            Elem::new("body").child(
                Elem::new("div").attr("id", "g").child(
                    Elem::new("div").child(Elem::new("img").attr("alt", NOT_FOUND_ALT)),
                ),
            ),
        );
        let (pipeline, scheduler) = pipeline();
        let page = tree.document().await.unwrap();

        let result = pipeline.run(&page, json!({"sku": "X1"})).await.unwrap();
        assert_eq!(result["found"], false);
        assert_eq!(result["stats"]["pages"], 0);
        assert!(scheduler.scheduled().is_empty());
    }

    #[tokio::test]
    async fn test_full_page_extracts_and_plans() {
        let tree = FixtureTree::new(
            Elem::new("body")
                .child(stats_chrome("25 total ratings, 25 with reviews"))
                .child(review_elem(
                    "R2",
                    "Reviewed in the United States on March 7, 2023",
                    None,
                ))
                .child(review_elem(
                    "R1",
                    "Reviewed in the United States on March 5, 2023",
                    Some("1,234 people found this helpful"),
                )),
        );
        let (pipeline, scheduler) = pipeline();
        let page = tree.document().await.unwrap();

        let result = pipeline
            .run(&page, json!({"sku": "X1", "page": 1}))
            .await
            .unwrap();

        assert_eq!(result["found"], true);
        assert_eq!(result["stats"]["pages"], 3);
        // Sorted ascending by date: R1 before R2.
        assert_eq!(result["reviews"][0]["id"], "R1");
        assert_eq!(result["reviews"][0]["helpful"], 1234);
        assert_eq!(result["reviews"][1]["id"], "R2");
        // Missing helpful chrome defaults to 0.
        assert_eq!(result["reviews"][1]["helpful"], 0);
        assert_eq!(result["reviews"][0]["rating"], 4.0);
        assert_eq!(result["reviews"][0]["title"], "Great");

        let units = scheduler.scheduled();
        assert_eq!(units.len(), 2);
        assert_eq!(units[0].value["page"], 2);
        assert_eq!(units[1].value["page"], 3);
        assert!(units.iter().all(|u| u.handler == REVIEWS_HANDLER));
    }

    #[tokio::test]
    async fn test_config_missing_sku_aborts_before_extraction() {
        let tree = FixtureTree::new(Elem::new("body"));
        let (pipeline, scheduler) = pipeline();
        let page = tree.document().await.unwrap();

        let err = pipeline.run(&page, json!({"page": 1})).await.unwrap_err();
        match err {
            GleanerError::ConfigValidation { errors } => {
                assert!(errors.iter().any(|e| e.path == "sku"));
            }
            other => panic!("expected config error, got {other}"),
        }
        assert!(scheduler.scheduled().is_empty());
    }

    #[tokio::test]
    async fn test_parse_stats_absent_chrome_is_zero() {
        let tree = FixtureTree::new(Elem::new("body"));
        let page = tree.document().await.unwrap();
        assert_eq!(parse_stats(&page).await.unwrap(), Stats::default());
    }

    #[tokio::test]
    async fn test_parse_stats_reads_chrome_counts() {
        let tree = FixtureTree::new(
            Elem::new("body").child(stats_chrome("5,100 total ratings, 5,001 with reviews")),
        );
        let page = tree.document().await.unwrap();
        let stats = parse_stats(&page).await.unwrap();
        assert_eq!(stats.ratings, 5100);
        assert_eq!(stats.reviews, 5001);
        assert_eq!(stats.pages, 500); // capped
    }

    #[test]
    fn test_review_url_carries_query_parameters() {
        let value = json!({"sku": "X1", "page": 3, "sortBy": "helpful"});
        assert_eq!(
            review_url(&value),
            "https://foo.com/reviews/X1/?pageNumber=3&sortBy=helpful"
        );
    }
}
