use std::collections::HashSet;
use std::fmt;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::utils;

/// Owner of a collection, i.e. the signed-in user's id.
pub type OwnerId = i64;

/// The three history views the application shows.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntityKind {
    HealthData,
    Assessment,
    Medication,
}

impl EntityKind {
    pub const ALL: [EntityKind; 3] = [
        EntityKind::HealthData,
        EntityKind::Assessment,
        EntityKind::Medication,
    ];

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "health-data" | "health_data" | "data" => Some(Self::HealthData),
            "assessment" | "assessments" => Some(Self::Assessment),
            "medication" | "medications" | "medication-guidance" => Some(Self::Medication),
            _ => None,
        }
    }

    pub fn key(self) -> &'static str {
        match self {
            Self::HealthData => "health-data",
            Self::Assessment => "assessments",
            Self::Medication => "medications",
        }
    }

    /// Entity prefix used for export file names.
    pub fn export_slug(self) -> &'static str {
        match self {
            Self::HealthData => "health_data",
            Self::Assessment => "assessment_history",
            Self::Medication => "medication",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            Self::HealthData => "Health Data History",
            Self::Assessment => "Report History",
            Self::Medication => "Medication Guidance History",
        }
    }

    pub fn print_title(self) -> &'static str {
        match self {
            Self::HealthData => "Health Data Report",
            Self::Assessment => "Health Assessment Report",
            Self::Medication => "Medication Guidance Report",
        }
    }

    pub fn default_list_path(self) -> &'static str {
        match self {
            Self::HealthData => "/api/health-data/user/{owner}",
            Self::Assessment => "/api/health-assessments/user/{owner}",
            Self::Medication => "/api/medication-guidance/user/{owner}",
        }
    }

    pub fn default_delete_path(self) -> &'static str {
        match self {
            Self::HealthData => "/api/health-data/{id}",
            Self::Assessment => "/api/health-assessments/{id}",
            Self::Medication => "/api/medication-guidance/{id}",
        }
    }

    fn id_aliases(self) -> &'static [&'static str] {
        match self {
            Self::HealthData => &["id", "healthDataId", "dataId"],
            Self::Assessment => &["id", "assessmentId"],
            Self::Medication => &["medGuidanceId", "id", "guidanceId"],
        }
    }

    fn timestamp_aliases(self) -> &'static [&'static str] {
        match self {
            Self::HealthData => &["recordedAt", "createdAt", "timestamp"],
            Self::Assessment | Self::Medication => &["createdAt", "recordedAt", "timestamp"],
        }
    }

    /// `(alias, canonical)` pairs for display fields.
    fn field_aliases(self) -> &'static [(&'static str, &'static str)] {
        match self {
            Self::HealthData => &[
                ("heightCm", "height"),
                ("systolicPressure", "systolicBp"),
                ("diastolicPressure", "diastolicBp"),
            ],
            Self::Assessment => &[("score", "overallScore"), ("assessmentType", "type")],
            Self::Medication => &[],
        }
    }

    /// Numeric field used for the two-row comparison, if the view has one.
    pub fn comparison_field(self) -> Option<&'static str> {
        match self {
            Self::HealthData => Some("weight"),
            Self::Assessment => Some("overallScore"),
            Self::Medication => None,
        }
    }

    pub fn comparison_label(self) -> &'static str {
        match self {
            Self::HealthData => "Weight change",
            Self::Assessment => "Score change",
            Self::Medication => "Change",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Record {
    pub id: i64,
    pub timestamp: Option<NaiveDateTime>,
    pub fields: Map<String, Value>,
}

impl Record {
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name).filter(|v| !v.is_null())
    }

    pub fn number(&self, name: &str) -> Option<f64> {
        match self.field(name)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Display text for a field; `None` when missing or null.
    pub fn text(&self, name: &str) -> Option<String> {
        self.field(name).map(value_text)
    }

    pub fn formatted_timestamp(&self) -> String {
        utils::fmt_date_time(self.timestamp.as_ref())
    }
}

pub fn value_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Array(items) => items
            .iter()
            .map(value_text)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("; "),
        Value::Object(_) => value.to_string(),
    }
}

fn value_id(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Unwraps list payloads that arrive inside an envelope object.
pub fn unwrap_rows(payload: Value) -> Option<Vec<Value>> {
    match payload {
        Value::Array(rows) => Some(rows),
        Value::Object(mut map) => {
            for key in ["data", "content", "items", "records", "users"] {
                if let Some(Value::Array(rows)) = map.remove(key) {
                    return Some(rows);
                }
            }
            None
        }
        _ => None,
    }
}

/// Maps one raw backend row onto a canonical `Record`.
pub fn normalize_row(kind: EntityKind, row: Value) -> Option<Record> {
    let mut fields = match row {
        Value::Object(map) => map,
        _ => return None,
    };

    let id = kind
        .id_aliases()
        .iter()
        .find_map(|alias| fields.get(*alias).and_then(value_id))?;
    for alias in kind.id_aliases() {
        fields.remove(*alias);
    }

    let timestamp = kind.timestamp_aliases().iter().find_map(|alias| {
        fields
            .get(*alias)
            .and_then(Value::as_str)
            .and_then(utils::parse_timestamp)
    });
    for alias in kind.timestamp_aliases() {
        fields.remove(*alias);
    }

    for (alias, canonical) in kind.field_aliases() {
        if let Some(value) = fields.remove(*alias) {
            let present = fields.get(*canonical).map(|v| !v.is_null()).unwrap_or(false);
            if !present {
                fields.insert((*canonical).to_string(), value);
            }
        }
    }

    Some(Record {
        id,
        timestamp,
        fields,
    })
}

/// Builds a collection from raw rows: normalizes, drops rows without an id,
/// keeps the first occurrence of each id, then sorts newest first. The sort is
/// stable and rows without a timestamp go last.
pub fn build_collection(kind: EntityKind, rows: Vec<Value>) -> Vec<Record> {
    let mut out = Vec::with_capacity(rows.len());
    let mut seen: HashSet<i64> = HashSet::new();
    let mut missing_id = 0usize;
    let mut duplicates = 0usize;

    for row in rows {
        match normalize_row(kind, row) {
            Some(record) => {
                if seen.insert(record.id) {
                    out.push(record);
                } else {
                    duplicates += 1;
                }
            }
            None => missing_id += 1,
        }
    }

    if missing_id > 0 {
        warn!(%kind, count = missing_id, "dropped rows without an identifier");
    }
    if duplicates > 0 {
        warn!(%kind, count = duplicates, "dropped rows with a duplicate identifier");
    }

    out.sort_by(|a, b| match (a.timestamp, b.timestamp) {
        (Some(x), Some(y)) => y.cmp(&x),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    });
    out
}
