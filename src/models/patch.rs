//! Typed, validated field changes for a time-log row.
//!
//! A [`LogPatch`] only ever names columns from the [`LogColumn`] allow-list,
//! and each value is checked against the column's type and range when the
//! patch is built. Whatever reaches the applier is safe to write verbatim.

use std::collections::BTreeMap;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A single field of a proposed change failed validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct InvalidField(pub String);

fn invalid(msg: impl Into<String>) -> InvalidField {
    InvalidField(msg.into())
}

/// Task types a time log may carry.
pub const TASK_TYPES: [&str; 5] = [
    "page_testing",
    "project_phase",
    "generic_task",
    "regression",
    "other",
];

/// Maximum hours a single log entry may claim.
pub fn max_hours() -> Decimal {
    Decimal::from(24)
}

/// Normalize a task type, mapping legacy aliases onto their canonical name.
pub fn normalize_task_type(raw: &str) -> Result<String, InvalidField> {
    let trimmed = raw.trim();
    let canonical = match trimmed {
        "regression_testing" => "regression",
        "page_qa" => "page_testing",
        other => other,
    };
    if TASK_TYPES.contains(&canonical) {
        Ok(canonical.to_string())
    } else {
        Err(invalid(format!("unknown task_type '{}'", trimmed)))
    }
}

/// Parse a JSON number or numeric string into hours, enforcing 0 < h <= 24.
pub fn parse_hours(value: &Value) -> Result<Decimal, InvalidField> {
    let hours = match value {
        Value::Number(n) => Decimal::from_str(&n.to_string())
            .map_err(|_| invalid(format!("hours '{}' is not a decimal", n)))?,
        Value::String(s) => Decimal::from_str(s.trim())
            .map_err(|_| invalid(format!("hours '{}' is not a decimal", s)))?,
        _ => return Err(invalid("hours must be a number")),
    };
    check_hours(hours)
}

/// Hours are stored as `NUMERIC(5,2)`, so anything finer than a hundredth
/// is refused rather than rounded on write.
pub fn check_hours(hours: Decimal) -> Result<Decimal, InvalidField> {
    if hours <= Decimal::ZERO || hours > max_hours() {
        return Err(invalid(format!(
            "hours must be greater than 0 and at most 24 (got {})",
            hours
        )));
    }
    let hours = hours.normalize();
    if hours.scale() > 2 {
        return Err(invalid(format!(
            "hours allow at most 2 decimal places (got {})",
            hours
        )));
    }
    Ok(hours)
}

/// Columns of `time_logs` a user may ask to change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogColumn {
    ProjectId,
    PageId,
    EnvironmentId,
    IssueId,
    PhaseId,
    GenericCategoryId,
    TaskType,
    TestingType,
    HoursSpent,
    Description,
    IsUtilized,
}

impl LogColumn {
    pub const ALL: [LogColumn; 11] = [
        LogColumn::ProjectId,
        LogColumn::PageId,
        LogColumn::EnvironmentId,
        LogColumn::IssueId,
        LogColumn::PhaseId,
        LogColumn::GenericCategoryId,
        LogColumn::TaskType,
        LogColumn::TestingType,
        LogColumn::HoursSpent,
        LogColumn::Description,
        LogColumn::IsUtilized,
    ];

    /// Column name in the live table (and key in the JSON form of a patch).
    pub fn name(&self) -> &'static str {
        match self {
            LogColumn::ProjectId => "project_id",
            LogColumn::PageId => "page_id",
            LogColumn::EnvironmentId => "environment_id",
            LogColumn::IssueId => "issue_id",
            LogColumn::PhaseId => "phase_id",
            LogColumn::GenericCategoryId => "generic_category_id",
            LogColumn::TaskType => "task_type",
            LogColumn::TestingType => "testing_type",
            LogColumn::HoursSpent => "hours_spent",
            LogColumn::Description => "description",
            LogColumn::IsUtilized => "is_utilized",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|c| c.name() == name)
    }

    /// Validate a raw JSON value for this column.
    fn parse(&self, value: &Value) -> Result<FieldValue, InvalidField> {
        match self {
            LogColumn::ProjectId => match positive_id(value, self)? {
                Some(id) => Ok(FieldValue::Id(Some(id))),
                None => Err(invalid("project_id cannot be null")),
            },
            LogColumn::PageId
            | LogColumn::EnvironmentId
            | LogColumn::IssueId
            | LogColumn::PhaseId
            | LogColumn::GenericCategoryId => Ok(FieldValue::Id(positive_id(value, self)?)),
            LogColumn::TaskType => match value {
                Value::String(s) => Ok(FieldValue::Text(Some(normalize_task_type(s)?))),
                _ => Err(invalid("task_type must be a string")),
            },
            LogColumn::TestingType => match value {
                Value::Null => Ok(FieldValue::Text(None)),
                Value::String(s) if s.trim().is_empty() => Ok(FieldValue::Text(None)),
                Value::String(s) if s.trim().len() <= 50 => {
                    Ok(FieldValue::Text(Some(s.trim().to_string())))
                }
                Value::String(_) => Err(invalid("testing_type is longer than 50 characters")),
                _ => Err(invalid("testing_type must be a string")),
            },
            LogColumn::HoursSpent => Ok(FieldValue::Hours(parse_hours(value)?)),
            LogColumn::Description => match value {
                Value::String(s) if !s.trim().is_empty() => {
                    Ok(FieldValue::Text(Some(s.trim().to_string())))
                }
                Value::String(_) => Err(invalid("description cannot be empty")),
                _ => Err(invalid("description must be a string")),
            },
            LogColumn::IsUtilized => match value {
                Value::Bool(b) => Ok(FieldValue::Flag(*b)),
                Value::Number(n) if n.as_i64() == Some(0) => Ok(FieldValue::Flag(false)),
                Value::Number(n) if n.as_i64() == Some(1) => Ok(FieldValue::Flag(true)),
                _ => Err(invalid("is_utilized must be a boolean or 0/1")),
            },
        }
    }
}

fn positive_id(value: &Value, column: &LogColumn) -> Result<Option<i64>, InvalidField> {
    match value {
        Value::Null => Ok(None),
        Value::Number(n) => match n.as_i64() {
            Some(id) if id > 0 => Ok(Some(id)),
            _ => Err(invalid(format!("{} must be a positive integer", column.name()))),
        },
        _ => Err(invalid(format!("{} must be an integer or null", column.name()))),
    }
}

/// A validated value for one [`LogColumn`].
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Id(Option<i64>),
    Hours(Decimal),
    Text(Option<String>),
    Flag(bool),
}

impl FieldValue {
    fn to_json(&self) -> Value {
        match self {
            FieldValue::Id(Some(id)) => Value::from(*id),
            FieldValue::Id(None) | FieldValue::Text(None) => Value::Null,
            FieldValue::Hours(h) => Value::String(h.to_string()),
            FieldValue::Text(Some(s)) => Value::String(s.clone()),
            FieldValue::Flag(b) => Value::Bool(*b),
        }
    }
}

/// Proposed column changes for one time-log row.
///
/// Serialized as a flat JSON object (`{"hours_spent": "6.5", ...}`); parsing
/// goes through the same validation as user input, so a patch read back from
/// storage is re-checked against the allow-list.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(try_from = "Map<String, Value>", into = "Map<String, Value>")]
pub struct LogPatch(BTreeMap<LogColumn, FieldValue>);

impl LogPatch {
    pub fn from_json(value: Value) -> Result<Self, InvalidField> {
        match value {
            Value::Object(map) => Self::try_from(map),
            _ => Err(invalid("patch must be a JSON object")),
        }
    }

    pub fn get(&self, column: LogColumn) -> Option<&FieldValue> {
        self.0.get(&column)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&LogColumn, &FieldValue)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn columns(&self) -> Vec<&'static str> {
        self.0.keys().map(|c| c.name()).collect()
    }
}

impl TryFrom<Map<String, Value>> for LogPatch {
    type Error = InvalidField;

    fn try_from(map: Map<String, Value>) -> Result<Self, Self::Error> {
        if map.is_empty() {
            return Err(invalid("patch must change at least one field"));
        }
        let mut fields = BTreeMap::new();
        for (key, value) in &map {
            let column = LogColumn::from_name(key)
                .ok_or_else(|| invalid(format!("field '{}' cannot be changed", key)))?;
            fields.insert(column, column.parse(value)?);
        }
        Ok(LogPatch(fields))
    }
}

impl From<LogPatch> for Map<String, Value> {
    fn from(patch: LogPatch) -> Self {
        patch
            .0
            .iter()
            .map(|(c, v)| (c.name().to_string(), v.to_json()))
            .collect()
    }
}
