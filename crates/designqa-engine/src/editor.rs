use designqa_contracts::errors::EditError;
use designqa_contracts::geometry::{PixelRect, RenderedSize};
use designqa_contracts::report::{Anchor, AnchoredIssue, IssueKind, Report, Score};
use similar::TextDiff;

/// One reviewer change to a report. Indices are zero-based.
#[derive(Debug, Clone, PartialEq)]
pub enum ReportEdit {
    SetScore(f64),
    AdjustScore(f64),
    AddGeneral(String),
    AddSpecific {
        description: String,
        anchor: Anchor,
    },
    /// A region drawn on the rendered live preview.
    AddSpecificAt {
        description: String,
        rect: PixelRect,
        rendered: RenderedSize,
    },
    EditGeneral {
        index: usize,
        text: String,
    },
    EditSpecific {
        index: usize,
        text: String,
    },
    MoveSpecific {
        index: usize,
        anchor: Anchor,
    },
    RemoveGeneral(usize),
    RemoveSpecific(usize),
}

impl ReportEdit {
    pub fn label(&self) -> &'static str {
        match self {
            Self::SetScore(_) => "set_score",
            Self::AdjustScore(_) => "adjust_score",
            Self::AddGeneral(_) => "add_general",
            Self::AddSpecific { .. } | Self::AddSpecificAt { .. } => "add_specific",
            Self::EditGeneral { .. } => "edit_general",
            Self::EditSpecific { .. } => "edit_specific",
            Self::MoveSpecific { .. } => "move_specific",
            Self::RemoveGeneral(_) => "remove_general",
            Self::RemoveSpecific(_) => "remove_specific",
        }
    }
}

/// Owns the report under review and remembers how it looked when review
/// began. An edit either applies completely or leaves the report untouched.
#[derive(Debug, Clone)]
pub struct ReportEditor {
    report: Report,
    baseline: Report,
    edits: usize,
}

impl ReportEditor {
    pub fn new(report: Report) -> Self {
        Self {
            baseline: report.clone(),
            report,
            edits: 0,
        }
    }

    pub fn report(&self) -> &Report {
        &self.report
    }

    pub fn baseline(&self) -> &Report {
        &self.baseline
    }

    pub fn edit_count(&self) -> usize {
        self.edits
    }

    pub fn is_modified(&self) -> bool {
        self.report != self.baseline
    }

    pub fn into_report(self) -> Report {
        self.report
    }

    pub fn apply(&mut self, edit: ReportEdit) -> Result<(), EditError> {
        let report = &mut self.report;
        match edit {
            ReportEdit::SetScore(value) => {
                report.score = Score::clamped(value).ok_or(EditError::InvalidScore)?;
            }
            ReportEdit::AdjustScore(delta) => {
                report.score =
                    Score::clamped(report.score.value() + delta).ok_or(EditError::InvalidScore)?;
            }
            ReportEdit::AddGeneral(text) => {
                report.general_issues.push(issue_text(&text)?);
            }
            ReportEdit::AddSpecific {
                description,
                anchor,
            } => {
                report.specific_issues.push(AnchoredIssue {
                    description: issue_text(&description)?,
                    anchor,
                });
            }
            ReportEdit::AddSpecificAt {
                description,
                rect,
                rendered,
            } => {
                let description = issue_text(&description)?;
                let anchor = Anchor::from_pixels(rect, rendered)?;
                report.specific_issues.push(AnchoredIssue {
                    description,
                    anchor,
                });
            }
            ReportEdit::EditGeneral { index, text } => {
                let text = issue_text(&text)?;
                let len = report.general_issues.len();
                let slot = report
                    .general_issues
                    .get_mut(index)
                    .ok_or(out_of_range(IssueKind::General, index, len))?;
                *slot = text;
            }
            ReportEdit::EditSpecific { index, text } => {
                let text = issue_text(&text)?;
                let len = report.specific_issues.len();
                let issue = report
                    .specific_issues
                    .get_mut(index)
                    .ok_or(out_of_range(IssueKind::Specific, index, len))?;
                issue.description = text;
            }
            ReportEdit::MoveSpecific { index, anchor } => {
                let len = report.specific_issues.len();
                let issue = report
                    .specific_issues
                    .get_mut(index)
                    .ok_or(out_of_range(IssueKind::Specific, index, len))?;
                issue.anchor = anchor;
            }
            ReportEdit::RemoveGeneral(index) => {
                let len = report.general_issues.len();
                if index >= len {
                    return Err(out_of_range(IssueKind::General, index, len));
                }
                report.general_issues.remove(index);
            }
            ReportEdit::RemoveSpecific(index) => {
                let len = report.specific_issues.len();
                if index >= len {
                    return Err(out_of_range(IssueKind::Specific, index, len));
                }
                report.specific_issues.remove(index);
            }
        }
        self.edits += 1;
        Ok(())
    }

    /// Unified diff of the report JSON from review start to now. Empty when
    /// nothing changed.
    pub fn diff(&self) -> serde_json::Result<String> {
        if !self.is_modified() {
            return Ok(String::new());
        }
        let before = self.baseline.to_json_pretty()? + "\n";
        let after = self.report.to_json_pretty()? + "\n";
        Ok(TextDiff::from_lines(&before, &after)
            .unified_diff()
            .context_radius(2)
            .header("created", "edited")
            .to_string())
    }
}

fn issue_text(raw: &str) -> Result<String, EditError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(EditError::EmptyText);
    }
    Ok(trimmed.to_string())
}

fn out_of_range(kind: IssueKind, index: usize, len: usize) -> EditError {
    EditError::IndexOutOfRange { kind, index, len }
}

#[cfg(test)]
mod tests {
    use designqa_contracts::errors::{AnchorError, EditError};
    use designqa_contracts::geometry::{PixelRect, RenderedSize};
    use designqa_contracts::report::{Anchor, IssueKind, Report};

    use super::{ReportEdit, ReportEditor};

    fn reviewed() -> anyhow::Result<ReportEditor> {
        let mut editor = ReportEditor::new(Report::manual());
        editor.apply(ReportEdit::AddGeneral("Header spacing differs".to_string()))?;
        editor.apply(ReportEdit::AddSpecific {
            description: "Button color mismatch".to_string(),
            anchor: Anchor::new(0.1, 0.2, 0.15, 0.05)?,
        })?;
        Ok(editor)
    }

    #[test]
    fn score_edits_are_clamped_into_range() -> anyhow::Result<()> {
        let mut editor = ReportEditor::new(Report::manual());
        editor.apply(ReportEdit::AdjustScore(5.0))?;
        assert_eq!(editor.report().score.value(), 100.0);
        editor.apply(ReportEdit::SetScore(-20.0))?;
        assert_eq!(editor.report().score.value(), 0.0);
        editor.apply(ReportEdit::SetScore(72.5))?;
        assert_eq!(editor.report().score.value(), 72.5);
        assert_eq!(
            editor.apply(ReportEdit::SetScore(f64::NAN)),
            Err(EditError::InvalidScore)
        );
        assert_eq!(editor.report().score.value(), 72.5);
        Ok(())
    }

    #[test]
    fn edits_and_removals_target_the_right_list() -> anyhow::Result<()> {
        let mut editor = reviewed()?;
        editor.apply(ReportEdit::EditGeneral {
            index: 0,
            text: "  Header padding is 8px too small ".to_string(),
        })?;
        editor.apply(ReportEdit::MoveSpecific {
            index: 0,
            anchor: Anchor::new(0.5, 0.5, 0.1, 0.1)?,
        })?;
        assert_eq!(
            editor.report().general_issues,
            vec!["Header padding is 8px too small".to_string()]
        );
        assert_eq!(editor.report().specific_issues[0].anchor.x(), 0.5);

        editor.apply(ReportEdit::RemoveSpecific(0))?;
        assert!(editor.report().specific_issues.is_empty());
        assert_eq!(editor.report().general_issues.len(), 1);
        Ok(())
    }

    #[test]
    fn invalid_edits_leave_report_untouched() -> anyhow::Result<()> {
        let mut editor = reviewed()?;
        let before = editor.report().clone();
        let count = editor.edit_count();

        assert_eq!(
            editor.apply(ReportEdit::RemoveGeneral(3)),
            Err(EditError::IndexOutOfRange {
                kind: IssueKind::General,
                index: 3,
                len: 1
            })
        );
        assert_eq!(
            editor.apply(ReportEdit::EditSpecific {
                index: 0,
                text: "   ".to_string()
            }),
            Err(EditError::EmptyText)
        );
        assert_eq!(
            editor.apply(ReportEdit::AddSpecificAt {
                description: "Nothing here".to_string(),
                rect: PixelRect::new(900, 900, 50, 50),
                rendered: RenderedSize::new(800, 600),
            }),
            Err(EditError::InvalidAnchor(AnchorError::EmptyRegion))
        );

        assert_eq!(editor.report(), &before);
        assert_eq!(editor.edit_count(), count);
        Ok(())
    }

    #[test]
    fn region_drawn_on_preview_becomes_normalized_anchor() -> anyhow::Result<()> {
        let mut editor = ReportEditor::new(Report::manual());
        editor.apply(ReportEdit::AddSpecificAt {
            description: "Logo is misaligned".to_string(),
            rect: PixelRect::new(80, 60, 160, 30),
            rendered: RenderedSize::new(800, 600),
        })?;
        let anchor = editor.report().specific_issues[0].anchor;
        let close = |actual: f64, expected: f64| (actual - expected).abs() < 1e-9;
        assert!(close(anchor.x(), 0.1));
        assert!(close(anchor.y(), 0.1));
        assert!(close(anchor.width(), 0.2));
        assert!(close(anchor.height(), 0.05));
        assert_eq!(
            anchor.to_pixels(RenderedSize::new(800, 600)),
            PixelRect::new(80, 60, 160, 30)
        );
        Ok(())
    }

    #[test]
    fn diff_shows_changed_lines_only_after_edits() -> anyhow::Result<()> {
        let mut editor = ReportEditor::new(Report::manual());
        assert!(editor.diff()?.is_empty());

        editor.apply(ReportEdit::SetScore(80.0))?;
        let diff = editor.diff()?;
        assert!(diff.contains("--- created"));
        assert!(diff.contains("+++ edited"));
        assert!(diff.contains("-  \"score\": 100.0"));
        assert!(diff.contains("+  \"score\": 80.0"));
        assert!(editor.is_modified());

        editor.apply(ReportEdit::SetScore(100.0))?;
        assert!(!editor.is_modified());
        assert!(editor.diff()?.is_empty());
        Ok(())
    }
}
