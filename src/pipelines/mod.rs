//! Handler pipelines — per-surface selector wiring over the engine core.
//!
//! Each pipeline owns its input/result schemas (data, not code), its field
//! maps, and the glue between materialization, assembly, validation, and
//! continuation planning. Handler names are the identifiers the host
//! scheduler routes on.

pub mod qa;
pub mod reviews;
pub mod trends;

use crate::error::PathedError;
use crate::events::{EngineEvent, EventBus};
use crate::schema;
use serde_json::Value;
use tracing::warn;

/// Question/answer extraction from a lazily-loaded list widget.
pub const QA_HANDLER: &str = "bar_qa";
/// Review extraction with pagination/boundary continuation.
pub const REVIEWS_HANDLER: &str = "foo_reviews";
/// Analytics trend series with category-iteration continuation.
pub const TRENDS_HANDLER: &str = "foo_trends";

/// Check an assembled result against its outbound schema.
///
/// A mismatch is reported — event plus log — but never blocks delivery:
/// partial or garbled data is more useful to the caller than nothing,
/// provided the drift is surfaced for monitoring.
pub(crate) fn report_output(events: &EventBus, handler: &str, result: &Value, schema: &Value) {
    let check = schema::validate(result, schema);
    if !check.ok {
        let errors: Vec<String> = check.errors.iter().map(PathedError::to_string).collect();
        warn!(handler, ?errors, "assembled result fails outbound schema");
        events.emit(EngineEvent::OutputMismatch {
            handler: handler.to_string(),
            errors,
        });
    }
}
