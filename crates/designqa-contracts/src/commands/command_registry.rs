use super::parser::SessionCommand;

pub(crate) const NO_ARG_COMMANDS: &[(&str, SessionCommand)] = &[
    ("analyze", SessionCommand::Analyze),
    ("cancel", SessionCommand::Cancel),
    ("manual", SessionCommand::Manual),
    ("discard", SessionCommand::Discard),
    ("reset", SessionCommand::Reset),
    ("dismiss", SessionCommand::Dismiss),
    ("show", SessionCommand::Show),
    ("diff", SessionCommand::Diff),
    ("status", SessionCommand::Status),
    ("help", SessionCommand::Help),
    ("quit", SessionCommand::Quit),
    ("exit", SessionCommand::Quit),
];

pub(crate) const UPLOAD_COMMANDS: &[&str] = &["design", "live"];

pub(crate) const OPTIONAL_PATH_COMMANDS: &[&str] = &["render", "export"];

/// Usage line and summary for every command, in display order.
pub const SESSION_HELP: &[(&str, &str)] = &[
    ("/design <path>", "upload the design mockup"),
    ("/live <path>", "upload the live screenshot"),
    ("/clear design|live", "remove an uploaded image"),
    ("/analyze", "run the AI analysis on both images"),
    ("/cancel", "abandon the analysis in flight"),
    ("/manual", "start an empty report (score 100)"),
    ("/score <n>", "set the score (clamped to 0-100)"),
    ("/bump <delta>", "raise or lower the score"),
    ("/general <text>", "add a general issue (bare text does the same)"),
    ("/specific <x> <y> <w> <h> <text>", "add an issue anchored to a normalized region"),
    ("/specific_px <left> <top> <w> <h> <text>", "add an issue anchored to a pixel region"),
    ("/edit general|specific <n> <text>", "replace the text of issue n"),
    ("/move <n> <x> <y> <w> <h>", "re-anchor specific issue n"),
    ("/remove general|specific <n>", "delete issue n"),
    ("/show", "print the report"),
    ("/diff", "show edits made since the report was created"),
    ("/render [path]", "write the live screenshot with issue overlays"),
    ("/export [path]", "write the report as JSON"),
    ("/discard", "drop the report and keep the images"),
    ("/reset", "drop the report and both images"),
    ("/status", "show phase, images and any pending error"),
    ("/dismiss", "clear the pending error message"),
    ("/model <name>", "switch the analysis model"),
    ("/help", "list commands"),
    ("/quit", "leave the session"),
];
