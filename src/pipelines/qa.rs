//! Question/answer extraction from a lazily-loaded list widget.
//!
//! The question list materializes incrementally behind a load-more control,
//! and each question's answers expand behind their own control. Both waits go
//! through the watcher; answers are expanded strictly one question at a time.

use crate::error::GleanerResult;
use crate::events::{EngineEvent, EventBus};
use crate::extract::assemble::{assemble, NestedSpec};
use crate::extract::{FieldMap, FieldSpec, Normalize, Pull};
use crate::materialize::{materialize, HasDescendant, LastChildHasAttr, WatchSpec};
use crate::pipelines::{report_output, QA_HANDLER};
use crate::schema;
use crate::view::NodeHandle;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};

const WIDGET_SELECTOR: &str = r#"[data-widget="webListQuestions"]"#;
const QUESTION_SELECTOR: &str = "[data-question-id]";
const ANSWER_SELECTOR: &str = "[data-answer-id]";
const LOAD_MORE_SELECTOR: &str = ":scope > :last-child button";

/// Input schema for `bar_qa` units. The unit operates on the page the
/// session bootstrap already navigated to; the only knob is the
/// materialization bound.
pub fn input_schema() -> Value {
    json!({
        "type": "object",
        "additionalProperties": false,
        "properties": {
            "timeoutMs": {"default": 30_000, "type": "integer", "minimum": 0},
        },
    })
}

/// Outbound schema for the assembled result object. `questions` is `null`
/// when the widget never materialized anything — never an empty list
/// standing in for "no data".
pub fn result_schema() -> Value {
    let answer = json!({
        "type": "object",
        "additionalProperties": false,
        "properties": {
            "id": {"type": "string"},
            "author": {"type": "string"},
            "date": {"type": "string"},
            "likes": {"type": "integer"},
            "dislikes": {"type": "integer"},
            "content": {"type": "string"},
        },
        "required": ["id", "author", "date", "likes", "dislikes", "content"],
    });
    json!({
        "type": "object",
        "additionalProperties": false,
        "properties": {
            "questions": {
                "anyOf": [
                    {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "additionalProperties": false,
                            "properties": {
                                "id": {"type": "string"},
                                "content": {"type": "string"},
                                "date": {"type": "string"},
                                "author": {"type": "string"},
                                "likes": {"type": "integer"},
                                "answers": {
                                    "anyOf": [
                                        {"type": "array", "items": answer},
                                        {"type": "null"},
                                    ],
                                },
                            },
                            "required": ["id", "content", "date", "author", "likes", "answers"],
                        },
                    },
                    {"type": "null"},
                ],
            },
            "found": {"type": "boolean"},
        },
        "required": ["questions", "found"],
    })
}

fn question_map() -> FieldMap {
    FieldMap::new()
        .field(FieldSpec::own_attr("id", "data-question-id"))
        .field(FieldSpec::required(
            "content",
            r#"[data-hook="question-content"]"#,
            Pull::Text,
            Normalize::Verbatim,
        ))
        .field(FieldSpec::required(
            "date",
            r#"[data-hook="question-date"]"#,
            Pull::Text,
            Normalize::DottedDate,
        ))
        .field(FieldSpec::required(
            "author",
            r#"[data-hook="question-author"]"#,
            Pull::Text,
            Normalize::Trimmed,
        ))
        .field(FieldSpec::required(
            "likes",
            r#"[data-hook="question-likes"]"#,
            Pull::Text,
            Normalize::Count { empty_default: 0 },
        ))
}

fn answers_nested() -> NestedSpec {
    NestedSpec {
        name: "answers".to_string(),
        selector: ANSWER_SELECTOR.to_string(),
        map: FieldMap::new()
            .field(FieldSpec::own_attr("id", "data-answer-id"))
            .field(FieldSpec::required(
                "author",
                r#"[data-hook="answer-author"]"#,
                Pull::Text,
                Normalize::Trimmed,
            ))
            .field(FieldSpec::required(
                "date",
                r#"[data-hook="answer-date"]"#,
                Pull::Text,
                Normalize::DottedDate,
            ))
            .field(FieldSpec::required(
                "likes",
                r#"[data-hook="answer-likes"]"#,
                Pull::Text,
                Normalize::Count { empty_default: 0 },
            ))
            .field(FieldSpec::required(
                "dislikes",
                r#"[data-hook="answer-dislikes"]"#,
                Pull::Text,
                Normalize::Count { empty_default: 0 },
            ))
            .field(FieldSpec::required(
                "content",
                r#"[data-hook="answer-content"]"#,
                Pull::Text,
                Normalize::Verbatim,
            )),
        sort_field: "date".to_string(),
    }
}

/// The `bar_qa` pipeline.
pub struct QaPipeline {
    pub events: EventBus,
}

impl QaPipeline {
    /// Run one unit of work against an already-rendered page.
    pub async fn run(&self, document: &NodeHandle, value: Value) -> GleanerResult<Value> {
        let value = schema::validate_config(value, &input_schema())?;
        let timeout = value
            .get("timeoutMs")
            .and_then(Value::as_u64)
            .map(Duration::from_millis);

        let Some(widget) = document.query(WIDGET_SELECTOR).await? else {
            return Ok(self.finish(json!({"questions": null, "found": false})));
        };

        self.events.emit(EngineEvent::MaterializeStarted {
            handler: QA_HANDLER.to_string(),
        });
        let started = Instant::now();

        let settled = materialize(WatchSpec {
            root: Arc::clone(&widget),
            check: Arc::new(LastChildHasAttr {
                attr: "data-question-id".to_string(),
            }),
            trigger: Some(LOAD_MORE_SELECTOR.to_string()),
            timeout,
        })
        .await?;

        if settled.is_none() {
            self.events.emit(EngineEvent::MaterializeEmpty {
                handler: QA_HANDLER.to_string(),
            });
            return Ok(self.finish(json!({"questions": null, "found": false})));
        }
        self.events.emit(EngineEvent::ContentSettled {
            handler: QA_HANDLER.to_string(),
            elapsed_ms: started.elapsed().as_millis() as u64,
        });

        let questions = widget.query_all(QUESTION_SELECTOR).await?;

        // One question at a time; no overlapping expansion.
        for question in &questions {
            self.expand_answers(question, timeout).await?;
        }

        let assembly = assemble(&questions, &question_map(), Some(&answers_nested()), "date").await?;
        for skip in &assembly.skipped {
            if let crate::error::GleanerError::Extraction { field, selector } = skip {
                self.events.emit(EngineEvent::RecordSkipped {
                    handler: QA_HANDLER.to_string(),
                    field: field.clone(),
                    selector: selector.clone(),
                });
            }
        }
        self.events.emit(EngineEvent::RecordsAssembled {
            handler: QA_HANDLER.to_string(),
            records: assembly.records.len(),
            failed: assembly.skipped.len(),
        });

        Ok(self.finish(json!({"questions": assembly.records, "found": true})))
    }

    /// Expand one question's collapsed answers, if it has any to load.
    async fn expand_answers(
        &self,
        question: &NodeHandle,
        timeout: Option<Duration>,
    ) -> GleanerResult<()> {
        let Some(container) = question.query(":scope > :last-child").await? else {
            return Ok(());
        };
        // A lone child is the collapsed placeholder: nothing to load.
        if container.child_count().await? <= 1 {
            return Ok(());
        }

        materialize(WatchSpec {
            root: Arc::clone(question),
            check: Arc::new(HasDescendant {
                selector: ANSWER_SELECTOR.to_string(),
            }),
            trigger: Some(LOAD_MORE_SELECTOR.to_string()),
            timeout,
        })
        .await?;
        Ok(())
    }

    fn finish(&self, result: Value) -> Value {
        report_output(&self.events, QA_HANDLER, &result, &result_schema());
        result
    }
}
