//! Learner activity per course.
//!
//! Activity payloads and course structures are free-form documents written by
//! the learning platform. Older rows hold Python literal dumps instead of JSON
//! (single quotes, `True`/`None`), so both are accepted.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{lenient_id, normalize_timestamp};

/// Lesson title and position inside a course structure.
#[derive(Debug, Clone, Serialize, Default, PartialEq)]
pub struct LessonInfo {
    pub title: String,
    pub section_title: String,
    pub order: Option<Value>,
    pub section_order: Option<Value>,
}

/// Parse an activity payload into an object; anything else becomes empty.
pub fn parse_payload(raw: Option<&str>) -> Map<String, Value> {
    match raw.and_then(parse_document) {
        Some(Value::Object(map)) => map,
        _ => Map::new(),
    }
}

/// JSON first, then the Python literal form.
pub fn parse_document(raw: &str) -> Option<Value> {
    serde_json::from_str(raw)
        .ok()
        .or_else(|| serde_json::from_str(&python_literal_to_json(raw)).ok())
}

/// Rewrite a Python literal (dict/list/str/bool/None) as JSON text.
fn python_literal_to_json(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\'' | '"' => {
                let quote = c;
                out.push('"');
                while let Some(inner) = chars.next() {
                    match inner {
                        '\\' => {
                            if let Some(escaped) = chars.next() {
                                if escaped == '\'' {
                                    out.push('\'');
                                } else {
                                    out.push('\\');
                                    out.push(escaped);
                                }
                            }
                        }
                        '"' if quote == '\'' => out.push_str("\\\""),
                        q if q == quote => break,
                        other => out.push(other),
                    }
                }
                out.push('"');
            }
            c if c.is_ascii_alphabetic() => {
                let mut word = String::from(c);
                while let Some(&next) = chars.peek() {
                    if next.is_ascii_alphanumeric() || next == '_' {
                        word.push(next);
                        chars.next();
                    } else {
                        break;
                    }
                }
                out.push_str(match word.as_str() {
                    "True" => "true",
                    "False" => "false",
                    "None" => "null",
                    other => other,
                });
            }
            other => out.push(other),
        }
    }
    out
}

/// `{lesson_uid: LessonInfo}` from a course `structure` document.
pub fn lesson_map(structure: Option<&str>) -> HashMap<String, LessonInfo> {
    let mut out = HashMap::new();
    let Some(Value::Object(doc)) = structure.and_then(parse_document) else {
        return out;
    };
    let Some(Value::Array(sections)) = doc.get("sections") else {
        return out;
    };

    for section in sections {
        let section_title = string_field(section, "title").unwrap_or_default();
        let section_order = section.get("order").cloned();
        let Some(Value::Array(lessons)) = section.get("lessons") else {
            continue;
        };
        for lesson in lessons {
            let Some(uid) = lesson.get("lesson_uid").and_then(value_text) else {
                continue;
            };
            if uid.is_empty() {
                continue;
            }
            let title = string_field(lesson, "title").unwrap_or_else(|| uid.clone());
            out.insert(
                uid,
                LessonInfo {
                    title,
                    section_title: section_title.clone(),
                    order: lesson.get("order").cloned(),
                    section_order: section_order.clone(),
                },
            );
        }
    }
    out
}

fn string_field(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Display form of a scalar JSON value.
fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn percent_text(value: Option<&Value>) -> Option<String> {
    let number = match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    Some(format!("{:.0}%", number))
}

/// What kind of activity a row is: payload kind, then row type, then `view`.
pub fn activity_kind(payload: &Map<String, Value>, a_type: Option<&str>) -> String {
    payload
        .get("kind")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .or(a_type.filter(|s| !s.is_empty()))
        .unwrap_or("view")
        .to_string()
}

fn unlock_text(payload: &Map<String, Value>) -> String {
    let from = payload.get("from").and_then(value_text);
    let to = payload.get("to").and_then(value_text);
    if from.is_none() && to.is_none() {
        return "unlock".to_string();
    }
    format!(
        "unlock {}→{}",
        from.unwrap_or_else(|| "?".to_string()),
        to.unwrap_or_else(|| "?".to_string())
    )
}

/// Short line for the learners table, e.g. `exam:submitted • 80%`.
pub fn activity_detail(payload: &Map<String, Value>) -> String {
    match payload.get("kind").and_then(Value::as_str) {
        Some("exam") => {
            let event = payload.get("event").and_then(value_text).unwrap_or_default();
            let mut detail = format!("exam:{}", event);
            if let Some(pct) = percent_text(payload.get("progress_percent")) {
                detail.push_str(" • ");
                detail.push_str(&pct);
            }
            detail
        }
        Some("unlock") => unlock_text(payload),
        _ => String::new(),
    }
}

/// Timeline summary, e.g. `exam • submitted • 80%`.
pub fn timeline_summary(kind: &str, payload: &Map<String, Value>) -> String {
    match kind {
        "exam" => {
            let mut parts = vec!["exam".to_string()];
            if let Some(event) = payload.get("event").and_then(value_text).filter(|e| !e.is_empty())
            {
                parts.push(event);
            }
            if let Some(pct) = percent_text(payload.get("progress_percent")) {
                parts.push(pct);
            }
            parts.join(" • ")
        }
        "unlock" => unlock_text(payload),
        _ => String::new(),
    }
}

/// Learner display name: full name, invoice name, email, then `User #id`.
pub fn learner_name(
    first: Option<&str>,
    middle: Option<&str>,
    last: Option<&str>,
    invoice_name: Option<&str>,
    email: Option<&str>,
    user_id: i64,
) -> String {
    let full: Vec<&str> = [first, middle, last]
        .into_iter()
        .flatten()
        .filter(|p| !p.is_empty())
        .collect();
    if !full.is_empty() {
        return full.join(" ");
    }
    invoice_name
        .filter(|s| !s.is_empty())
        .or(email.filter(|s| !s.is_empty()))
        .map(str::to_string)
        .unwrap_or_else(|| format!("User #{}", user_id))
}

/// A course on the students overview.
#[derive(Debug, Clone, Serialize)]
pub struct CourseSummary {
    pub id: i64,
    pub title: String,
    pub is_published: bool,
    pub published_at: Option<String>,
    pub learners: i64,
    pub last_activity: Option<String>,
}

/// Latest activity row of one learner, joined with the registration.
#[derive(Debug, Clone, Default)]
pub struct LatestActivityRow {
    pub user_id: i64,
    pub lesson_uid: Option<String>,
    pub a_type: Option<String>,
    pub last_seen: Option<String>,
    pub payload: Option<String>,
    pub user_email: Option<String>,
    pub first_name: Option<String>,
    pub middle_name: Option<String>,
    pub last_name: Option<String>,
    pub invoice_name: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ActivityEventRow {
    pub id: i64,
    pub lesson_uid: Option<String>,
    pub a_type: Option<String>,
    pub created_at: Option<String>,
    pub payload: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LearnerActivity {
    pub user_id: i64,
    pub name: String,
    pub email: Option<String>,
    pub course_id: i64,
    pub course_title: String,
    pub lesson_uid: Option<String>,
    pub lesson_title: String,
    pub last_seen: Option<String>,
    pub kind: String,
    pub detail: String,
    pub payload: Map<String, Value>,
}

impl LearnerActivity {
    pub fn from_row(
        row: LatestActivityRow,
        course_id: i64,
        course_title: &str,
        lessons: &HashMap<String, LessonInfo>,
    ) -> Self {
        let payload = parse_payload(row.payload.as_deref());
        let lesson_title = lesson_title(lessons, row.lesson_uid.as_deref());
        Self {
            name: learner_name(
                row.first_name.as_deref(),
                row.middle_name.as_deref(),
                row.last_name.as_deref(),
                row.invoice_name.as_deref(),
                row.user_email.as_deref(),
                row.user_id,
            ),
            user_id: row.user_id,
            email: row.user_email,
            course_id,
            course_title: course_title.to_string(),
            lesson_title,
            lesson_uid: row.lesson_uid,
            last_seen: row.last_seen.as_deref().and_then(normalize_timestamp),
            kind: activity_kind(&payload, row.a_type.as_deref()),
            detail: activity_detail(&payload),
            payload,
        }
    }
}

fn lesson_title(lessons: &HashMap<String, LessonInfo>, uid: Option<&str>) -> String {
    let uid = uid.unwrap_or("");
    lessons
        .get(uid)
        .map(|info| info.title.clone())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| uid.to_string())
}

#[derive(Debug, Clone, Serialize)]
pub struct CourseLearners {
    pub course_id: i64,
    pub course_title: String,
    pub items: Vec<LearnerActivity>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TimelineEvent {
    pub id: i64,
    pub created_at: Option<String>,
    pub lesson_uid: Option<String>,
    pub lesson_title: String,
    pub section_title: String,
    pub a_type: Option<String>,
    pub kind: String,
    pub event: Option<Value>,
    pub progress_percent: Option<Value>,
    pub summary: String,
    pub raw_payload: Map<String, Value>,
}

impl TimelineEvent {
    pub fn from_row(row: ActivityEventRow, lessons: &HashMap<String, LessonInfo>) -> Self {
        let payload = parse_payload(row.payload.as_deref());
        let kind = activity_kind(&payload, row.a_type.as_deref());
        let section_title = lessons
            .get(row.lesson_uid.as_deref().unwrap_or(""))
            .map(|info| info.section_title.clone())
            .unwrap_or_default();
        Self {
            id: row.id,
            created_at: row.created_at.as_deref().and_then(normalize_timestamp),
            lesson_title: lesson_title(lessons, row.lesson_uid.as_deref()),
            section_title,
            lesson_uid: row.lesson_uid,
            a_type: row.a_type,
            summary: timeline_summary(&kind, &payload),
            kind,
            event: payload.get("event").cloned(),
            progress_percent: payload.get("progress_percent").cloned(),
            raw_payload: payload,
        }
    }
}

/// Registration fields shown on a learner page.
#[derive(Debug, Clone, Default)]
pub struct LearnerRow {
    pub user_email: Option<String>,
    pub first_name: Option<String>,
    pub middle_name: Option<String>,
    pub last_name: Option<String>,
    pub invoice_name: Option<String>,
    pub enrollment_status: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StudentDetail {
    pub user_id: i64,
    pub course_id: i64,
    pub course_title: String,
    pub name: String,
    pub email: Option<String>,
    pub enrollment_status: Option<String>,
    pub timeline: Vec<TimelineEvent>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct StudentsQuery {
    #[serde(deserialize_with = "lenient_id")]
    pub course_id: Option<i64>,
}

/// The students page: a course picker, or the learners of one course.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum StudentsView {
    Courses { courses: Vec<CourseSummary> },
    Learners(CourseLearners),
}
