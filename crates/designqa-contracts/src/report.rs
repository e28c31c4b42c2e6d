use std::fmt;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::errors::{AnchorError, MalformedResponse};

pub const SCORE_MIN: f64 = 0.0;
pub const SCORE_MAX: f64 = 100.0;
pub const MANUAL_REPORT_SCORE: f64 = 100.0;

/// Overall visual fidelity, always within `SCORE_MIN..=SCORE_MAX`.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct Score(f64);

impl Score {
    pub fn new(value: f64) -> Option<Self> {
        (value.is_finite() && (SCORE_MIN..=SCORE_MAX).contains(&value)).then_some(Self(value))
    }

    /// Pins any finite value into range. Non-finite input has no sensible
    /// position and yields `None`.
    pub fn clamped(value: f64) -> Option<Self> {
        value
            .is_finite()
            .then(|| Self(value.clamp(SCORE_MIN, SCORE_MAX)))
    }

    pub fn value(self) -> f64 {
        self.0
    }
}

impl Default for Score {
    fn default() -> Self {
        Self(MANUAL_REPORT_SCORE)
    }
}

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.fract() == 0.0 {
            write!(f, "{}", self.0 as i64)
        } else {
            write!(f, "{:.1}", self.0)
        }
    }
}

/// Normalized rectangle on the live screenshot. Each component is a fraction
/// of the live image's width or height, so the region survives any rendered
/// size.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Anchor {
    x: f64,
    y: f64,
    width: f64,
    height: f64,
}

impl Anchor {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Result<Self, AnchorError> {
        for (field, value) in [("x", x), ("y", y), ("width", width), ("height", height)] {
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                return Err(AnchorError::OutOfRange { field, value });
            }
        }
        Ok(Self {
            x,
            y,
            width,
            height,
        })
    }

    pub fn x(&self) -> f64 {
        self.x
    }

    pub fn y(&self) -> f64 {
        self.y
    }

    pub fn width(&self) -> f64 {
        self.width
    }

    pub fn height(&self) -> f64 {
        self.height
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnchoredIssue {
    pub description: String,
    pub anchor: Anchor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IssueKind {
    General,
    Specific,
}

impl IssueKind {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "general" | "g" => Some(Self::General),
            "specific" | "s" | "anchored" => Some(Self::Specific),
            _ => None,
        }
    }
}

impl fmt::Display for IssueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::General => "general",
            Self::Specific => "specific",
        })
    }
}

/// Output of one analysis session. Serializes to the same camelCase shape
/// the analysis service is asked to return.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub score: Score,
    pub general_issues: Vec<String>,
    pub specific_issues: Vec<AnchoredIssue>,
}

impl Report {
    /// Starting point for a hand-written report.
    pub fn manual() -> Self {
        Self {
            score: Score::default(),
            general_issues: Vec::new(),
            specific_issues: Vec::new(),
        }
    }

    pub fn issue_count(&self) -> usize {
        self.general_issues.len() + self.specific_issues.len()
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Strict parse of an untrusted service reply. Leading/trailing markdown
/// code fences are tolerated; everything else must match the schema.
/// Issue strings are kept exactly as sent.
pub fn parse_report_text(raw: &str) -> Result<Report, MalformedResponse> {
    let body = strip_code_fence(raw);
    let value: Value = serde_json::from_str(body)
        .map_err(|err| MalformedResponse::InvalidJson(err.to_string()))?;
    parse_report_value(&value)
}

pub fn parse_report_value(value: &Value) -> Result<Report, MalformedResponse> {
    let root = value.as_object().ok_or_else(|| MalformedResponse::WrongType {
        field: "$".to_string(),
        expected: "an object",
    })?;

    let raw_score = require_number(root, "score", "score")?;
    let score = Score::new(raw_score).ok_or(MalformedResponse::ScoreOutOfRange(raw_score))?;

    let general_issues = require_array(root, "generalIssues", "generalIssues")?
        .iter()
        .enumerate()
        .map(|(idx, item)| {
            let field = format!("generalIssues[{idx}]");
            require_text(item, &field)
        })
        .collect::<Result<Vec<String>, MalformedResponse>>()?;

    let specific_issues = require_array(root, "specificIssues", "specificIssues")?
        .iter()
        .enumerate()
        .map(|(idx, item)| parse_anchored_issue(idx, item))
        .collect::<Result<Vec<AnchoredIssue>, MalformedResponse>>()?;

    Ok(Report {
        score,
        general_issues,
        specific_issues,
    })
}

fn parse_anchored_issue(index: usize, item: &Value) -> Result<AnchoredIssue, MalformedResponse> {
    let prefix = format!("specificIssues[{index}]");
    let entry = item.as_object().ok_or_else(|| MalformedResponse::WrongType {
        field: prefix.clone(),
        expected: "an object",
    })?;
    let description_value = entry
        .get("description")
        .ok_or_else(|| MalformedResponse::MissingField(format!("{prefix}.description")))?;
    let description = require_text(description_value, &format!("{prefix}.description"))?;

    let anchor_field = format!("{prefix}.anchor");
    let anchor_value = entry
        .get("anchor")
        .ok_or_else(|| MalformedResponse::MissingField(anchor_field.clone()))?;
    let anchor_obj = anchor_value
        .as_object()
        .ok_or_else(|| MalformedResponse::WrongType {
            field: anchor_field.clone(),
            expected: "an object",
        })?;
    let coord = |key: &str| require_number(anchor_obj, key, &format!("{anchor_field}.{key}"));
    let anchor = Anchor::new(coord("x")?, coord("y")?, coord("width")?, coord("height")?)
        .map_err(|source| MalformedResponse::InvalidAnchor { index, source })?;

    Ok(AnchoredIssue {
        description,
        anchor,
    })
}

fn require_number(
    obj: &Map<String, Value>,
    key: &str,
    field: &str,
) -> Result<f64, MalformedResponse> {
    let value = obj
        .get(key)
        .ok_or_else(|| MalformedResponse::MissingField(field.to_string()))?;
    value.as_f64().ok_or_else(|| MalformedResponse::WrongType {
        field: field.to_string(),
        expected: "a number",
    })
}

fn require_array<'a>(
    obj: &'a Map<String, Value>,
    key: &str,
    field: &str,
) -> Result<&'a Vec<Value>, MalformedResponse> {
    let value = obj
        .get(key)
        .ok_or_else(|| MalformedResponse::MissingField(field.to_string()))?;
    value.as_array().ok_or_else(|| MalformedResponse::WrongType {
        field: field.to_string(),
        expected: "an array",
    })
}

fn require_text(value: &Value, field: &str) -> Result<String, MalformedResponse> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| MalformedResponse::WrongType {
            field: field.to_string(),
            expected: "a string",
        })
}

fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}
