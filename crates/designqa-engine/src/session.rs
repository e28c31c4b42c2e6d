use std::fmt;
use std::mem;

use designqa_contracts::errors::{AnalysisFailure, SessionError};
use designqa_contracts::events::{EventWriter, SessionEvent};
use designqa_contracts::media::ImageSlot;
use designqa_contracts::report::Report;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::editor::{ReportEdit, ReportEditor};
use crate::gateway::AnalysisGateway;
use crate::intake::{ImageAsset, ImageUpload};

pub const CANCELLED_MESSAGE: &str = "Analysis cancelled.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completeness {
    Partial,
    Full,
}

/// Externally visible phase. Always derived from the internal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    ImagesReady(Completeness),
    Analyzing,
    Reviewing,
}

impl SessionPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::ImagesReady(Completeness::Partial) => "images_ready_partial",
            Self::ImagesReady(Completeness::Full) => "images_ready_full",
            Self::Analyzing => "analyzing",
            Self::Reviewing => "reviewing",
        }
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::ImagesReady(Completeness::Partial) => "waiting for the second image",
            Self::ImagesReady(Completeness::Full) => "ready to analyze",
            Self::Analyzing => "analyzing",
            Self::Reviewing => "reviewing a report",
        })
    }
}

/// Handles for one analysis episode. The id ties a later outcome back to the
/// episode that started it.
#[derive(Debug, Clone)]
pub struct AnalysisTicket {
    id: u64,
    design: ImageAsset,
    live: ImageAsset,
}

impl AnalysisTicket {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn design(&self) -> &ImageAsset {
        &self.design
    }

    pub fn live(&self) -> &ImageAsset {
        &self.live
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Applied(SessionPhase),
    /// The issuing episode is over; nothing changed.
    Stale,
}

#[derive(Debug, Clone, Default)]
struct Slots {
    design: Option<ImageAsset>,
    live: Option<ImageAsset>,
}

impl Slots {
    fn get(&self, slot: ImageSlot) -> Option<&ImageAsset> {
        match slot {
            ImageSlot::Design => self.design.as_ref(),
            ImageSlot::Live => self.live.as_ref(),
        }
    }

    fn slot_mut(&mut self, slot: ImageSlot) -> &mut Option<ImageAsset> {
        match slot {
            ImageSlot::Design => &mut self.design,
            ImageSlot::Live => &mut self.live,
        }
    }

    fn missing(&self) -> Vec<ImageSlot> {
        ImageSlot::ALL
            .into_iter()
            .filter(|slot| self.get(*slot).is_none())
            .collect()
    }

    fn phase(&self) -> SessionPhase {
        match (&self.design, &self.live) {
            (None, None) => SessionPhase::Idle,
            (Some(_), Some(_)) => SessionPhase::ImagesReady(Completeness::Full),
            _ => SessionPhase::ImagesReady(Completeness::Partial),
        }
    }

    fn into_full(self) -> Result<FullSlots, Slots> {
        match self {
            Slots {
                design: Some(design),
                live: Some(live),
            } => Ok(FullSlots { design, live }),
            partial => Err(partial),
        }
    }
}

#[derive(Debug, Clone)]
struct FullSlots {
    design: ImageAsset,
    live: ImageAsset,
}

impl FullSlots {
    fn get(&self, slot: ImageSlot) -> &ImageAsset {
        match slot {
            ImageSlot::Design => &self.design,
            ImageSlot::Live => &self.live,
        }
    }

    fn into_slots(self) -> Slots {
        Slots {
            design: Some(self.design),
            live: Some(self.live),
        }
    }
}

#[derive(Debug)]
enum State {
    Collecting(Slots),
    Analyzing { slots: FullSlots, ticket: u64 },
    Reviewing { slots: FullSlots, editor: ReportEditor },
}

/// One design QA session: two image slots, at most one analysis in flight,
/// and at most one report under review. Every transition goes through the
/// methods below; rejected events leave the state exactly as it was.
#[derive(Debug)]
pub struct Session {
    state: State,
    next_ticket: u64,
    /// Cancelled episode whose gateway call has not reported back yet.
    abandoned: Option<u64>,
    last_error: Option<String>,
    events: EventWriter,
}

impl Session {
    pub fn new(events: EventWriter) -> Self {
        let session = Self {
            state: State::Collecting(Slots::default()),
            next_ticket: 1,
            abandoned: None,
            last_error: None,
            events,
        };
        session.record(SessionEvent::SessionStarted, json!({}));
        session
    }

    pub fn session_id(&self) -> &str {
        self.events.session_id()
    }

    pub fn phase(&self) -> SessionPhase {
        match &self.state {
            State::Collecting(slots) => slots.phase(),
            State::Analyzing { .. } => SessionPhase::Analyzing,
            State::Reviewing { .. } => SessionPhase::Reviewing,
        }
    }

    pub fn asset(&self, slot: ImageSlot) -> Option<&ImageAsset> {
        match &self.state {
            State::Collecting(slots) => slots.get(slot),
            State::Analyzing { slots, .. } | State::Reviewing { slots, .. } => Some(slots.get(slot)),
        }
    }

    pub fn report(&self) -> Option<&Report> {
        self.editor().map(ReportEditor::report)
    }

    pub fn editor(&self) -> Option<&ReportEditor> {
        match &self.state {
            State::Reviewing { editor, .. } => Some(editor),
            _ => None,
        }
    }

    /// User-facing message left by the last failed or cancelled analysis.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Ticket of a cancelled analysis that is still outstanding. No new
    /// analysis starts until its outcome has been delivered.
    pub fn abandoned_ticket(&self) -> Option<u64> {
        self.abandoned
    }

    pub fn dismiss_error(&mut self) {
        self.last_error = None;
    }

    pub fn upload(&mut self, slot: ImageSlot, upload: ImageUpload) -> Result<SessionPhase, SessionError> {
        if !matches!(self.state, State::Collecting(_)) {
            return Err(self.rejected("upload"));
        }

        let name = upload.name.clone();
        let declared_type = upload.declared_type.clone();
        let asset = match ImageAsset::from_upload(upload) {
            Ok(asset) => asset,
            Err(err) => {
                self.record(
                    SessionEvent::ImageRejected,
                    json!({
                        "slot": slot.as_str(),
                        "name": name,
                        "declared_type": declared_type,
                        "error": err.to_string(),
                    }),
                );
                return Err(err);
            }
        };

        let mut payload = json!({
            "slot": slot.as_str(),
            "name": asset.name(),
            "media_type": asset.media_type().mime(),
            "width": asset.width(),
            "height": asset.height(),
            "bytes": asset.byte_len(),
            "digest": asset.digest(),
        });
        if let State::Collecting(slots) = &mut self.state {
            let replaced = slots.slot_mut(slot).replace(asset).is_some();
            payload["replaced"] = Value::Bool(replaced);
        }
        self.last_error = None;
        self.record(SessionEvent::ImageUploaded, payload);
        Ok(self.phase())
    }

    pub fn clear(&mut self, slot: ImageSlot) -> Result<SessionPhase, SessionError> {
        if !matches!(self.state, State::Collecting(_)) {
            return Err(self.rejected("clear"));
        }
        let removed = match &mut self.state {
            State::Collecting(slots) => slots.slot_mut(slot).take().is_some(),
            _ => false,
        };
        if removed {
            self.last_error = None;
            self.record(SessionEvent::ImageCleared, json!({ "slot": slot.as_str() }));
        }
        Ok(self.phase())
    }

    /// Moves to `Analyzing` and hands out the ticket for this episode. Valid
    /// with both images present, or from `Reviewing`, whose report is dropped.
    pub fn begin_analysis(&mut self) -> Result<AnalysisTicket, SessionError> {
        self.ensure_startable()?;
        if let Some(abandoned) = self.abandoned {
            debug!(ticket = abandoned, "cancelled analysis still outstanding");
            return Err(SessionError::AnalysisInFlight);
        }
        let Some(slots) = self.take_full_slots() else {
            return Err(self.rejected("analyze"));
        };

        let id = self.next_ticket;
        self.next_ticket += 1;
        let ticket = AnalysisTicket {
            id,
            design: slots.design.clone(),
            live: slots.live.clone(),
        };
        self.state = State::Analyzing { slots, ticket: id };
        self.last_error = None;
        self.record(
            SessionEvent::AnalysisStarted,
            json!({
                "ticket": id,
                "design_digest": ticket.design.digest(),
                "live_digest": ticket.live.digest(),
            }),
        );
        Ok(ticket)
    }

    /// Applies an analysis outcome if `ticket_id` still names the running
    /// episode. Anything else is stale and ignored.
    pub fn complete_analysis(
        &mut self,
        ticket_id: u64,
        outcome: Result<Report, AnalysisFailure>,
    ) -> Completion {
        let current = match &self.state {
            State::Analyzing { ticket, .. } => Some(*ticket),
            _ => None,
        };
        if current != Some(ticket_id) {
            if self.abandoned == Some(ticket_id) {
                self.abandoned = None;
            }
            debug!(ticket = ticket_id, current = ?current, "dropping stale analysis outcome");
            self.record(
                SessionEvent::AnalysisStale,
                json!({
                    "ticket": ticket_id,
                    "phase": self.phase().as_str(),
                }),
            );
            return Completion::Stale;
        }
        let Some(slots) = self.take_full_slots() else {
            return Completion::Stale;
        };

        match outcome {
            Ok(report) => {
                let payload = json!({
                    "ticket": ticket_id,
                    "score": report.score.value(),
                    "general_issues": report.general_issues.len(),
                    "specific_issues": report.specific_issues.len(),
                });
                self.state = State::Reviewing {
                    slots,
                    editor: ReportEditor::new(report),
                };
                self.record(SessionEvent::AnalysisCompleted, payload);
            }
            Err(failure) => {
                warn!(ticket = ticket_id, kind = failure.kind(), error = %failure, "analysis failed");
                self.state = State::Collecting(slots.into_slots());
                self.last_error = Some(failure.user_message());
                self.record(
                    SessionEvent::AnalysisFailed,
                    json!({
                        "ticket": ticket_id,
                        "kind": failure.kind(),
                        "error": failure.to_string(),
                    }),
                );
            }
        }
        Completion::Applied(self.phase())
    }

    /// Abandons the running analysis. Its outcome is stale when it arrives,
    /// and must arrive before the next analysis can begin.
    pub fn cancel_analysis(&mut self) -> Result<SessionPhase, SessionError> {
        let ticket = match &self.state {
            State::Analyzing { ticket, .. } => *ticket,
            _ => return Err(self.rejected("cancel")),
        };
        if let Some(slots) = self.take_full_slots() {
            self.state = State::Collecting(slots.into_slots());
        }
        self.abandoned = Some(ticket);
        self.last_error = Some(CANCELLED_MESSAGE.to_string());
        self.record(SessionEvent::AnalysisCancelled, json!({ "ticket": ticket }));
        Ok(self.phase())
    }

    /// Runs one analysis to completion on the calling thread.
    pub fn run_analysis(&mut self, gateway: &AnalysisGateway) -> Result<SessionPhase, SessionError> {
        let ticket = self.begin_analysis()?;
        let outcome = gateway.analyze(ticket.design(), ticket.live());
        let failure = outcome.as_ref().err().cloned();
        match self.complete_analysis(ticket.id(), outcome) {
            Completion::Applied(phase) => match failure {
                Some(failure) => Err(SessionError::AnalysisFailed(failure)),
                None => Ok(phase),
            },
            Completion::Stale => Ok(self.phase()),
        }
    }

    /// Starts review with a blank report. Never touches the gateway.
    pub fn create_manually(&mut self) -> Result<SessionPhase, SessionError> {
        if matches!(self.state, State::Reviewing { .. }) {
            return Err(self.rejected("manual"));
        }
        self.ensure_startable()?;
        let Some(slots) = self.take_full_slots() else {
            return Err(self.rejected("manual"));
        };
        let report = Report::manual();
        let payload = json!({ "source": "manual", "score": report.score.value() });
        self.state = State::Reviewing {
            slots,
            editor: ReportEditor::new(report),
        };
        self.last_error = None;
        self.record(SessionEvent::ReportCreated, payload);
        Ok(self.phase())
    }

    /// Drops the report and goes back to the loaded images.
    pub fn discard_report(&mut self) -> Result<SessionPhase, SessionError> {
        if !matches!(self.state, State::Reviewing { .. }) {
            return Err(self.rejected("discard"));
        }
        let edits = self.editor().map(ReportEditor::edit_count).unwrap_or(0);
        if let Some(slots) = self.take_full_slots() {
            self.state = State::Collecting(slots.into_slots());
        }
        self.last_error = None;
        self.record(SessionEvent::ReportDiscarded, json!({ "edits": edits }));
        Ok(self.phase())
    }

    pub fn reset(&mut self) -> Result<SessionPhase, SessionError> {
        if matches!(self.state, State::Analyzing { .. }) {
            return Err(SessionError::AnalysisInFlight);
        }
        let previous = self.phase();
        self.state = State::Collecting(Slots::default());
        self.last_error = None;
        self.record(
            SessionEvent::SessionReset,
            json!({ "from": previous.as_str() }),
        );
        Ok(self.phase())
    }

    pub fn edit(&mut self, edit: ReportEdit) -> Result<&Report, SessionError> {
        if !matches!(self.state, State::Reviewing { .. }) {
            return Err(self.rejected("edit"));
        }
        let label = edit.label();
        if let State::Reviewing { editor, .. } = &mut self.state {
            editor.apply(edit)?;
        }

        let payload = match self.report() {
            Some(report) => json!({
                "edit": label,
                "score": report.score.value(),
                "general_issues": report.general_issues.len(),
                "specific_issues": report.specific_issues.len(),
            }),
            None => json!({ "edit": label }),
        };
        self.record(SessionEvent::ReportEdited, payload);
        self.report().ok_or_else(|| self.rejected("edit"))
    }

    fn ensure_startable(&self) -> Result<(), SessionError> {
        match &self.state {
            State::Analyzing { .. } => Err(SessionError::AnalysisInFlight),
            State::Collecting(slots) => {
                let missing = slots.missing();
                if missing.is_empty() {
                    Ok(())
                } else {
                    Err(SessionError::MissingInput { missing })
                }
            }
            State::Reviewing { .. } => Ok(()),
        }
    }

    /// Takes the images out of a full state, leaving an empty placeholder.
    /// Callers must install the next state.
    fn take_full_slots(&mut self) -> Option<FullSlots> {
        match mem::replace(&mut self.state, State::Collecting(Slots::default())) {
            State::Collecting(slots) => match slots.into_full() {
                Ok(full) => Some(full),
                Err(partial) => {
                    self.state = State::Collecting(partial);
                    None
                }
            },
            State::Analyzing { slots, .. } | State::Reviewing { slots, .. } => Some(slots),
        }
    }

    fn rejected(&self, action: &'static str) -> SessionError {
        match self.state {
            State::Analyzing { .. } => SessionError::AnalysisInFlight,
            _ => SessionError::InvalidPhase {
                action,
                phase: self.phase().to_string(),
            },
        }
    }

    fn record(&self, event: SessionEvent, payload: Value) {
        let payload = match payload {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        if let Err(err) = self.events.emit(event, payload) {
            warn!(event = event.as_str(), error = %err, "failed to write session event");
        }
    }
}
