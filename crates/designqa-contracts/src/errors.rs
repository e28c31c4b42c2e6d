use thiserror::Error;

use crate::media::ImageSlot;
use crate::report::IssueKind;

/// Why an anchor region was refused.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AnchorError {
    #[error("anchor `{field}` = {value} is outside [0, 1]")]
    OutOfRange { field: &'static str, value: f64 },
    #[error("region is empty")]
    EmptyRegion,
    #[error("rendered image has no area ({width}x{height})")]
    EmptyCanvas { width: u32, height: u32 },
}

/// A service reply that does not match the report schema. Parsing is
/// all-or-nothing, so any one of these rejects the whole reply.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MalformedResponse {
    #[error("response is not valid JSON: {0}")]
    InvalidJson(String),
    #[error("response is missing required field `{0}`")]
    MissingField(String),
    #[error("field `{field}` must be {expected}")]
    WrongType {
        field: String,
        expected: &'static str,
    },
    #[error("score {0} is outside 0-100")]
    ScoreOutOfRange(f64),
    #[error("specificIssues[{index}]: {source}")]
    InvalidAnchor { index: usize, source: AnchorError },
}

/// Every way an analysis call can fail, normalized for the session.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AnalysisFailure {
    #[error("analysis request could not be prepared: {0}")]
    Request(String),
    #[error("analysis service unreachable: {0}")]
    Transport(String),
    #[error("analysis service error: {0}")]
    Service(String),
    #[error("analysis response rejected: {0}")]
    Malformed(#[from] MalformedResponse),
}

impl AnalysisFailure {
    pub fn is_malformed(&self) -> bool {
        matches!(self, Self::Malformed(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Request(_) => "request",
            Self::Transport(_) => "transport",
            Self::Service(_) => "service",
            Self::Malformed(_) => "malformed_response",
        }
    }

    /// Message shown to the user. Raw transport and service detail is not
    /// stable enough to display, so it only goes to the logs.
    pub fn user_message(&self) -> String {
        let tail = match self {
            Self::Request(_) => "the analysis request could not be prepared",
            Self::Transport(_) => "the analysis service could not be reached",
            Self::Service(_) => "the analysis service returned an error",
            Self::Malformed(_) => "the analysis service returned an unusable report",
        };
        format!("Analysis failed: {tail}. Please try again.")
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EditError {
    #[error("there is no {kind} issue #{} (report has {len})", .index + 1)]
    IndexOutOfRange {
        kind: IssueKind,
        index: usize,
        len: usize,
    },
    #[error("issue text must not be empty")]
    EmptyText,
    #[error("score must be a finite number")]
    InvalidScore,
    #[error(transparent)]
    InvalidAnchor(#[from] AnchorError),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SessionError {
    #[error("Please upload both a Design and a Live image (missing: {}).", slot_list(.missing))]
    MissingInput { missing: Vec<ImageSlot> },
    #[error("unsupported media type `{declared}`; expected PNG, JPEG, GIF, or WebP")]
    UnsupportedMediaType { declared: String },
    #[error("image could not be decoded: {reason}")]
    UndecodableImage { reason: String },
    #[error("an analysis is already in progress")]
    AnalysisInFlight,
    #[error("`{action}` is not available while the session is {phase}")]
    InvalidPhase { action: &'static str, phase: String },
    #[error("{}", .0.user_message())]
    AnalysisFailed(AnalysisFailure),
    #[error(transparent)]
    Edit(#[from] EditError),
}

fn slot_list(slots: &[ImageSlot]) -> String {
    slots
        .iter()
        .map(|slot| slot.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}
