//! Continuation planning — deciding what fetch work comes next.
//!
//! The shared shape across modes: estimate the total extent, compare against
//! the extent already covered, emit the uncovered remainder as new work
//! units, each scoped so it cannot re-cover already-seen data. Units are
//! write-only — handed to the host scheduler, never read back — and every
//! unit is checked against the target handler's input schema before it
//! leaves the planner.

use crate::error::{GleanerError, GleanerResult, PathedError};
use crate::schema;
use crate::session::CookieJar;
use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

/// Items per result page on the review surface.
pub const PAGE_SIZE: u64 = 10;
/// Hard cap on pagination depth.
pub const MAX_PAGES: u32 = 500;
/// Review total beyond which the surface stops paginating linearly.
const DEEP_CATALOG_THRESHOLD: u64 = 5000;

/// Aggregate counters derived from page chrome. Planner input only; never
/// persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    pub ratings: u64,
    pub reviews: u64,
    pub pages: u32,
}

/// Total page count for a review total, capped at [`MAX_PAGES`].
pub fn page_count(reviews: u64) -> u32 {
    if reviews > DEEP_CATALOG_THRESHOLD {
        MAX_PAGES
    } else {
        reviews.div_ceil(PAGE_SIZE) as u32
    }
}

/// One schedulable continuation descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkUnit {
    /// Target extraction pipeline.
    pub handler: String,
    /// Pipeline input; satisfies that handler's input schema.
    pub value: Value,
}

/// Parameters of the current unit of work. Read-only; built once from the
/// validated, default-filled configuration.
#[derive(Debug, Clone)]
pub struct UnitOfWorkContext {
    pub handler: String,
    /// Validated configuration with defaults applied.
    pub value: Value,
    /// Session cookies forwarded into continuation units that need them.
    pub cookies: CookieJar,
}

impl UnitOfWorkContext {
    pub fn new(handler: &str, value: Value) -> Self {
        Self {
            handler: handler.to_string(),
            value,
            cookies: CookieJar::new(),
        }
    }

    pub fn with_cookies(mut self, cookies: CookieJar) -> Self {
        self.cookies = cookies;
        self
    }

    /// Current page number (defaulted to 1 by the input schema).
    pub fn page(&self) -> u32 {
        self.value.get("page").and_then(Value::as_u64).unwrap_or(1) as u32
    }

    /// Whether this unit may expand into further continuation work.
    pub fn only(&self) -> bool {
        self.value.get("only").and_then(Value::as_bool).unwrap_or(true)
    }

    pub fn sku(&self) -> Option<&str> {
        self.value.get("sku").and_then(Value::as_str)
    }

    /// The boundary date: records at or before it are already covered.
    pub fn anchor_date(&self) -> Option<&str> {
        self.value.get("date").and_then(Value::as_str)
    }

    pub fn date_from(&self) -> Option<&str> {
        self.value.get("dateFrom").and_then(Value::as_str)
    }

    pub fn date_to(&self) -> Option<&str> {
        self.value.get("dateTo").and_then(Value::as_str)
    }
}

/// Which decision branch produced a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanMode {
    /// Full-extent sweep: one unit per uncovered page.
    Pagination,
    /// One cautious page past a known boundary.
    DateExtension,
    /// Nothing left to cover.
    Halt,
}

impl PlanMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanMode::Pagination => "pagination",
            PlanMode::DateExtension => "date-extension",
            PlanMode::Halt => "halt",
        }
    }
}

/// The planner's decision for one unit of work.
#[derive(Debug)]
pub struct Plan {
    pub units: Vec<WorkUnit>,
    pub mode: PlanMode,
}

/// Decide continuation work from the extracted records and page stats.
///
/// Pagination mode is reachable only while no boundary date is pinned,
/// preventing duplicate full-range sweeps once one is established. With a
/// boundary, exactly one further page is fetched — expansion disabled — and
/// only while the current page is still entirely new data. Emitted units are
/// validated against `input_schema` before hand-off.
pub fn plan(
    ctx: &UnitOfWorkContext,
    records: &[Value],
    stats: &Stats,
    input_schema: &Value,
) -> GleanerResult<Plan> {
    if !ctx.only() {
        // This unit was itself a bounded extension; it never cascades.
        return Ok(Plan {
            units: Vec::new(),
            mode: PlanMode::Halt,
        });
    }

    let plan = match ctx.anchor_date() {
        None => {
            // Zero total items ⇒ pages = 0 ⇒ the range below is empty and
            // the series terminates here.
            let units: Vec<WorkUnit> = (ctx.page() + 1..=stats.pages)
                .map(|page| WorkUnit {
                    handler: ctx.handler.clone(),
                    value: json!({
                        "only": true,
                        "page": page,
                        "sku": ctx.sku(),
                    }),
                })
                .collect();
            let mode = if units.is_empty() {
                PlanMode::Halt
            } else {
                PlanMode::Pagination
            };
            Plan { units, mode }
        }
        Some(anchor) => {
            let boundary = boundary_plus_day(anchor)?;
            let all_new = records.iter().all(|record| {
                record
                    .get("date")
                    .and_then(Value::as_str)
                    .map(|date| date > boundary.as_str())
                    .unwrap_or(false)
            });
            if all_new {
                // One more page, expansion disabled: reach past the boundary
                // without cascading.
                Plan {
                    units: vec![WorkUnit {
                        handler: ctx.handler.clone(),
                        value: json!({
                            "only": false,
                            "page": ctx.page() + 1,
                            "sku": ctx.sku(),
                        }),
                    }],
                    mode: PlanMode::DateExtension,
                }
            } else {
                // The boundary has been reached; pagination stops.
                Plan {
                    units: Vec::new(),
                    mode: PlanMode::Halt,
                }
            }
        }
    };

    for unit in &plan.units {
        check_unit(unit, input_schema)?;
    }

    debug!(
        mode = plan.mode.as_str(),
        units = plan.units.len(),
        page = ctx.page(),
        pages = stats.pages,
        "continuation planned"
    );
    Ok(plan)
}

/// Build one category-iteration unit carrying the category identifier, the
/// shared date range, and the session cookies.
pub fn category_unit(
    ctx: &UnitOfWorkContext,
    category: &str,
    input_schema: &Value,
) -> GleanerResult<WorkUnit> {
    let unit = WorkUnit {
        handler: ctx.handler.clone(),
        value: json!({
            "category": category,
            "cookies": serde_json::to_value(&ctx.cookies).expect("cookie jar serializes"),
            "dateFrom": ctx.date_from(),
            "dateTo": ctx.date_to(),
        }),
    };
    check_unit(&unit, input_schema)?;
    Ok(unit)
}

fn check_unit(unit: &WorkUnit, input_schema: &Value) -> GleanerResult<()> {
    let result = schema::validate(&unit.value, input_schema);
    if result.ok {
        Ok(())
    } else {
        Err(GleanerError::Schedule(format!(
            "continuation unit for '{}' fails its input schema: {}",
            unit.handler,
            result
                .errors
                .iter()
                .map(PathedError::to_string)
                .collect::<Vec<_>>()
                .join("; ")
        )))
    }
}

/// The first instant strictly past the covered range: boundary + 1 day, as a
/// full ISO-8601 instant so it compares lexicographically with record dates.
fn boundary_plus_day(anchor: &str) -> GleanerResult<String> {
    let parsed = DateTime::parse_from_rfc3339(anchor)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            NaiveDate::parse_from_str(anchor, "%Y-%m-%d")
                .map(|d| d.and_hms_opt(0, 0, 0).expect("midnight exists").and_utc())
        })
        .map_err(|_| GleanerError::ConfigValidation {
            errors: vec![PathedError {
                path: "date".to_string(),
                message: format!("not a date or date-time: '{anchor}'"),
            }],
        })?;
    let bumped = parsed + ChronoDuration::days(1);
    Ok(bumped.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string())
}
