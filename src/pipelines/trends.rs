//! Analytics trend series with category-iteration continuation.
//!
//! The trends surface re-renders its diagram when the selected category or
//! date range changes. For every leaf category the pipeline selects it,
//! dispatches the date-range action, waits for the re-render through the
//! watcher (old `svg` torn down), and emits one continuation unit so the
//! host can fan the per-category fetch out to independent workers. The
//! categories are iterated strictly one at a time.

use crate::error::{GleanerError, GleanerResult, PathedError};
use crate::events::{EngineEvent, EventBus};
use crate::materialize::{materialize, NodeRemoved, WatchSpec};
use crate::plan::{category_unit, UnitOfWorkContext};
use crate::pipelines::{report_output, TRENDS_HANDLER};
use crate::scheduler::Scheduler;
use crate::schema;
use crate::session::{jar_from_json, CookieJar};
use crate::view::{leaf_categories, NodeHandle, ViewState};
use chrono::NaiveDate;
use regex::Regex;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

/// The host action that re-scopes the diagram to a date range.
const DATE_RANGE_ACTION: &str = "analytics/whatToSell/trends/handleTrendsChangeDateRange";
/// State slice holding the rendered metric series.
const TRENDS_SLICE: &str = "trends";
/// Longest allowed date range, in days.
const MAX_RANGE_DAYS: i64 = 28;

/// Input schema for `foo_trends` units.
pub fn input_schema() -> Value {
    json!({
        "type": "object",
        "additionalProperties": false,
        "properties": {
            "category": {"type": "string"},
            "cookies": {"type": "object"},
            "dateFrom": {"type": "string", "format": "date"},
            "dateTo": {"type": "string", "format": "date"},
        },
        "required": ["dateFrom", "dateTo"],
    })
}

/// Outbound schema for the assembled result object.
pub fn result_schema() -> Value {
    let metric = json!({
        "type": "object",
        "additionalProperties": false,
        "properties": {
            "dynamics": {"type": "number"},
            "value": {"type": "number"},
        },
        "required": ["dynamics", "value"],
    });
    json!({
        "type": "object",
        "additionalProperties": false,
        "properties": {
            "id": {"type": "integer"},
            "level": {"const": 2},
            "name": {"type": "string"},
            "trends": {
                "type": "array",
                "items": {
                    "type": "object",
                    "additionalProperties": false,
                    "properties": {
                        "startDate": {"type": "string", "format": "date"},
                        "endDate": {"type": "string", "format": "date"},
                        "platformMetric": metric.clone(),
                        "sellerMetric": metric,
                    },
                    "required": ["startDate", "endDate", "platformMetric", "sellerMetric"],
                },
            },
        },
        "required": ["id", "level", "name", "trends"],
    })
}

/// The `foo_trends` pipeline.
pub struct TrendsPipeline {
    pub view: Arc<dyn ViewState>,
    /// Root of the diagram subtree the re-render wait watches.
    pub diagram: NodeHandle,
    pub scheduler: Arc<dyn Scheduler>,
    pub events: EventBus,
    /// Bound on each re-render wait.
    pub timeout: Option<Duration>,
}

impl TrendsPipeline {
    /// Run one unit of work. Session bootstrap (cookies, sign-in navigation)
    /// has already happened; the trends view is rendered.
    pub async fn run(&self, value: Value) -> GleanerResult<Value> {
        let value = schema::validate_config(value, &input_schema())?;
        check_range(&value)?;

        let cookies: CookieJar = value
            .get("cookies")
            .cloned()
            .and_then(jar_from_json)
            .unwrap_or_default();
        let ctx = UnitOfWorkContext::new(TRENDS_HANDLER, value).with_cookies(cookies);

        let date_range = json!({
            "dateFrom": ctx.date_from(),
            "dateTo": ctx.date_to(),
        });

        let categories = leaf_categories(&self.view.category_tree().await?);
        let mut units = 0usize;

        for category in &categories {
            self.view.select_category(category).await?;
            self.view
                .dispatch_action(DATE_RANGE_ACTION, date_range.clone())
                .await?;

            // The re-render tears the old diagram down first; wait for it so
            // the next iteration never reads a stale series.
            materialize(WatchSpec {
                root: Arc::clone(&self.diagram),
                check: Arc::new(NodeRemoved {
                    tag: "svg".to_string(),
                }),
                trigger: None,
                timeout: self.timeout,
            })
            .await?;

            let unit = category_unit(&ctx, category, &input_schema())?;
            self.scheduler.schedule(unit).await?;
            units += 1;
        }

        self.events.emit(EngineEvent::ContinuationPlanned {
            handler: TRENDS_HANDLER.to_string(),
            units,
            mode: "category-iteration".to_string(),
        });

        let selection = self.view.selection().await?;
        let trends = self.view.state_slice(TRENDS_SLICE).await?;
        let result = json!({
            "id": selection.id,
            "level": selection.level,
            "name": strip_category_label(&selection.name),
            "trends": trends,
        });
        report_output(&self.events, TRENDS_HANDLER, &result, &result_schema());
        Ok(result)
    }
}

/// The selection name arrives prefixed with its chrome label; strip it.
fn strip_category_label(name: &str) -> String {
    Regex::new(r"^Категория:\s*")
        .expect("static pattern compiles")
        .replace(name, "")
        .into_owned()
}

/// The date range must be well-ordered and span at most 28 days — a
/// cross-field constraint the schema vocabulary cannot express.
fn check_range(value: &Value) -> GleanerResult<()> {
    let parse = |key: &str| {
        value
            .get(key)
            .and_then(Value::as_str)
            .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
    };
    let (Some(from), Some(to)) = (parse("dateFrom"), parse("dateTo")) else {
        // Structural format errors were already reported by the schema pass.
        return Ok(());
    };

    let days = (to - from).num_days();
    let message = if days < 0 {
        Some("before dateFrom".to_string())
    } else if days > MAX_RANGE_DAYS {
        Some(format!("range exceeds {MAX_RANGE_DAYS} days"))
    } else {
        None
    };

    match message {
        Some(message) => Err(GleanerError::ConfigValidation {
            errors: vec![PathedError {
                path: "dateTo".to_string(),
                message,
            }],
        }),
        None => Ok(()),
    }
}
