//! Execution feedback - the input reported after a task runs.
//!
//! Feedback arrives from an external runner as loosely typed JSON, so parsing
//! goes through [`serde_json::Value`] to produce field-level errors before any
//! record reaches the learning engines.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::Time;

/// Errors raised while validating feedback.
#[derive(Debug, thiserror::Error)]
pub enum FeedbackError {
    /// Input is not valid JSON
    #[error("invalid feedback JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Input is JSON but not an object
    #[error("feedback must be a JSON object")]
    NotAnObject,

    /// A required field is absent
    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    /// Neither predicted nor actual value was supplied
    #[error("feedback carries neither `predicted_value` nor `actual_value`")]
    MissingValues,

    /// A field has the wrong type or an unusable value
    #[error("invalid field `{field}`: {reason}")]
    InvalidField {
        /// Field name
        field: &'static str,
        /// What is wrong with it
        reason: String,
    },

    /// A record in a batch failed validation
    #[error("record {index}: {source}")]
    InBatch {
        /// Zero-based position in the batch
        index: usize,
        /// Underlying error
        #[source]
        source: Box<FeedbackError>,
    },
}

/// Result alias for feedback validation.
pub type Result<T> = std::result::Result<T, FeedbackError>;

/// One observed outcome of a task execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionFeedback {
    /// Task that ran
    pub task_name: String,

    /// Strategy whose prediction was used
    pub strategy_name: String,

    /// Predicted value (e.g. duration in seconds)
    pub predicted_value: f64,

    /// Observed value
    pub actual_value: f64,

    /// Whether the execution succeeded
    pub success: bool,

    /// When the execution was reported
    pub timestamp: Time,

    /// Restrict the update to this parameter
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameter: Option<String>,
}

impl ExecutionFeedback {
    /// Create feedback stamped with the current time.
    pub fn new(
        task_name: impl Into<String>,
        strategy_name: impl Into<String>,
        predicted_value: f64,
        actual_value: f64,
        success: bool,
    ) -> Self {
        Self {
            task_name: task_name.into(),
            strategy_name: strategy_name.into(),
            predicted_value,
            actual_value,
            success,
            timestamp: chrono::Utc::now(),
            parameter: None,
        }
    }

    /// Restrict the update to one parameter.
    pub fn for_parameter(mut self, parameter: impl Into<String>) -> Self {
        self.parameter = Some(parameter.into());
        self
    }

    /// Set the timestamp.
    pub fn at(mut self, timestamp: Time) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Check invariants of an already-typed record.
    pub fn validate(&self) -> Result<()> {
        non_empty("task_name", &self.task_name)?;
        non_empty("strategy_name", &self.strategy_name)?;
        finite("predicted_value", self.predicted_value)?;
        finite("actual_value", self.actual_value)?;
        if let Some(parameter) = &self.parameter {
            non_empty("parameter", parameter)?;
        }
        Ok(())
    }

    /// Parse and validate a single JSON object.
    pub fn from_json(input: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(input)?;
        Self::from_value(&value)
    }

    /// Validate a JSON value field by field.
    ///
    /// `timestamp` is optional and defaults to the current time.
    pub fn from_value(value: &Value) -> Result<Self> {
        let obj = value.as_object().ok_or(FeedbackError::NotAnObject)?;

        let predicted = obj.get("predicted_value").filter(|v| !v.is_null());
        let actual = obj.get("actual_value").filter(|v| !v.is_null());
        let (predicted, actual) = match (predicted, actual) {
            (None, None) => return Err(FeedbackError::MissingValues),
            (None, Some(_)) => return Err(FeedbackError::MissingField("predicted_value")),
            (Some(_), None) => return Err(FeedbackError::MissingField("actual_value")),
            (Some(p), Some(a)) => (number("predicted_value", p)?, number("actual_value", a)?),
        };

        let success = match obj.get("success") {
            None | Some(Value::Null) => return Err(FeedbackError::MissingField("success")),
            Some(Value::Bool(b)) => *b,
            Some(other) => {
                return Err(FeedbackError::InvalidField {
                    field: "success",
                    reason: format!("expected a boolean, got {other}"),
                })
            }
        };

        let timestamp = match obj.get("timestamp") {
            None | Some(Value::Null) => chrono::Utc::now(),
            Some(Value::String(s)) => chrono::DateTime::parse_from_rfc3339(s)
                .map(|t| t.with_timezone(&chrono::Utc))
                .map_err(|e| FeedbackError::InvalidField {
                    field: "timestamp",
                    reason: e.to_string(),
                })?,
            Some(other) => {
                return Err(FeedbackError::InvalidField {
                    field: "timestamp",
                    reason: format!("expected an ISO-8601 string, got {other}"),
                })
            }
        };

        let feedback = Self {
            task_name: string(obj, "task_name")?,
            strategy_name: string(obj, "strategy_name")?,
            predicted_value: predicted,
            actual_value: actual,
            success,
            timestamp,
            parameter: optional_string(obj, "parameter")?,
        };
        feedback.validate()?;
        Ok(feedback)
    }

    /// Parse a batch given either as a JSON array or as JSON lines.
    ///
    /// The whole batch is rejected if any record is invalid.
    pub fn parse_batch(input: &str) -> Result<Vec<Self>> {
        let trimmed = input.trim_start();
        let values: Vec<Value> = if trimmed.starts_with('[') {
            serde_json::from_str(trimmed)?
        } else {
            trimmed
                .lines()
                .filter(|line| !line.trim().is_empty())
                .map(|line| serde_json::from_str::<Value>(line))
                .collect::<std::result::Result<_, _>>()?
        };

        values
            .iter()
            .enumerate()
            .map(|(index, value)| {
                Self::from_value(value).map_err(|e| FeedbackError::InBatch {
                    index,
                    source: Box::new(e),
                })
            })
            .collect()
    }
}

fn non_empty(field: &'static str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(FeedbackError::InvalidField {
            field,
            reason: "must not be empty".to_string(),
        });
    }
    Ok(())
}

fn finite(field: &'static str, value: f64) -> Result<()> {
    if !value.is_finite() {
        return Err(FeedbackError::InvalidField {
            field,
            reason: format!("must be finite, got {value}"),
        });
    }
    Ok(())
}

fn number(field: &'static str, value: &Value) -> Result<f64> {
    value.as_f64().ok_or_else(|| FeedbackError::InvalidField {
        field,
        reason: format!("expected a number, got {value}"),
    })
}

fn string(obj: &Map<String, Value>, field: &'static str) -> Result<String> {
    match obj.get(field) {
        None | Some(Value::Null) => Err(FeedbackError::MissingField(field)),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) => Err(FeedbackError::InvalidField {
            field,
            reason: format!("expected a string, got {other}"),
        }),
    }
}

fn optional_string(obj: &Map<String, Value>, field: &'static str) -> Result<Option<String>> {
    match obj.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(_) => string(obj, field).map(Some),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"{
        "task_name": "build-job",
        "strategy_name": "default",
        "predicted_value": 120,
        "actual_value": 115.5,
        "success": true,
        "timestamp": "2024-05-01T12:00:00Z"
    }"#;

    #[test]
    fn test_parse_valid_feedback() {
        let feedback = ExecutionFeedback::from_json(VALID).unwrap();
        assert_eq!(feedback.task_name, "build-job");
        assert_eq!(feedback.predicted_value, 120.0);
        assert_eq!(feedback.actual_value, 115.5);
        assert!(feedback.success);
        assert_eq!(feedback.timestamp.to_rfc3339(), "2024-05-01T12:00:00+00:00");
        assert!(feedback.parameter.is_none());
    }

    #[test]
    fn test_missing_both_values() {
        let err = ExecutionFeedback::from_json(
            r#"{"task_name":"t","strategy_name":"s","success":true}"#,
        )
        .unwrap_err();
        assert!(matches!(err, FeedbackError::MissingValues));
    }

    #[test]
    fn test_missing_required_field() {
        let err = ExecutionFeedback::from_json(
            r#"{"strategy_name":"s","predicted_value":1,"actual_value":2,"success":false}"#,
        )
        .unwrap_err();
        assert!(matches!(err, FeedbackError::MissingField("task_name")));
    }

    #[test]
    fn test_non_numeric_value() {
        let err = ExecutionFeedback::from_json(
            r#"{"task_name":"t","strategy_name":"s","predicted_value":"fast","actual_value":2,"success":true}"#,
        )
        .unwrap_err();
        assert!(matches!(err, FeedbackError::InvalidField { field: "predicted_value", .. }));
    }

    #[test]
    fn test_bad_timestamp_and_empty_name() {
        let err = ExecutionFeedback::from_json(
            r#"{"task_name":"t","strategy_name":"s","predicted_value":1,"actual_value":2,"success":true,"timestamp":"yesterday"}"#,
        )
        .unwrap_err();
        assert!(matches!(err, FeedbackError::InvalidField { field: "timestamp", .. }));

        let err = ExecutionFeedback::from_json(
            r#"{"task_name":"t","strategy_name":"  ","predicted_value":1,"actual_value":2,"success":true}"#,
        )
        .unwrap_err();
        assert!(matches!(err, FeedbackError::InvalidField { field: "strategy_name", .. }));
    }

    #[test]
    fn test_batch_rejects_whole_input_on_one_bad_record() {
        let good = r#"{"task_name":"t","strategy_name":"s","predicted_value":1,"actual_value":2,"success":true}"#;
        let bad = r#"{"task_name":"t","strategy_name":"s","predicted_value":1,"success":true}"#;

        let batch = ExecutionFeedback::parse_batch(&format!("{good}\n\n{good}\n")).unwrap();
        assert_eq!(batch.len(), 2);

        let err = ExecutionFeedback::parse_batch(&format!("[{good}, {bad}]")).unwrap_err();
        match err {
            FeedbackError::InBatch { index, source } => {
                assert_eq!(index, 1);
                assert!(matches!(*source, FeedbackError::MissingField("actual_value")));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
