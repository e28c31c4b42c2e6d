use crate::geometry::PixelRect;
use crate::media::ImageSlot;
use crate::report::{Anchor, IssueKind};

use super::command_registry::{NO_ARG_COMMANDS, OPTIONAL_PATH_COMMANDS, UPLOAD_COMMANDS};

/// One line of session input, parsed. Indices are zero-based; the user
/// types them one-based.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionCommand {
    Noop,
    Upload {
        slot: ImageSlot,
        path: String,
    },
    Clear {
        slot: ImageSlot,
    },
    Analyze,
    Cancel,
    Manual,
    Discard,
    Reset,
    Dismiss,
    SetScore(f64),
    BumpScore(f64),
    AddGeneral(String),
    AddSpecific {
        anchor: Anchor,
        text: String,
    },
    AddSpecificPixels {
        rect: PixelRect,
        text: String,
    },
    Edit {
        kind: IssueKind,
        index: usize,
        text: String,
    },
    Move {
        index: usize,
        anchor: Anchor,
    },
    Remove {
        kind: IssueKind,
        index: usize,
    },
    Show,
    Diff,
    Status,
    Help,
    Quit,
    Render {
        path: Option<String>,
    },
    Export {
        path: Option<String>,
    },
    SetModel(String),
    Invalid {
        command: String,
        reason: String,
    },
    Unknown {
        command: String,
    },
}

fn split_args(arg: &str) -> Vec<String> {
    if arg.trim().is_empty() {
        return Vec::new();
    }
    match shell_words::split(arg) {
        Ok(parts) => parts
            .into_iter()
            .filter(|value| !value.is_empty())
            .collect(),
        Err(_) => arg.split_whitespace().map(str::to_string).collect(),
    }
}

fn single_path(arg: &str) -> Option<String> {
    let parts = split_args(arg);
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(" "))
    }
}

fn parse_number(raw: &str, what: &str) -> Result<f64, String> {
    raw.parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
        .ok_or_else(|| format!("{what} must be a number, got `{raw}`"))
}

fn parse_pixel(raw: &str, what: &str) -> Result<u32, String> {
    raw.parse::<u32>()
        .map_err(|_| format!("{what} must be a whole pixel count, got `{raw}`"))
}

fn parse_index(raw: &str) -> Result<usize, String> {
    match raw.trim_start_matches('#').parse::<usize>() {
        Ok(0) | Err(_) => Err(format!("issue number must be 1 or more, got `{raw}`")),
        Ok(value) => Ok(value - 1),
    }
}

fn parse_anchor(parts: &[String]) -> Result<Anchor, String> {
    let [x, y, w, h] = parts else {
        return Err("expected four region values: x y width height".to_string());
    };
    Anchor::new(
        parse_number(x, "x")?,
        parse_number(y, "y")?,
        parse_number(w, "width")?,
        parse_number(h, "height")?,
    )
    .map_err(|err| err.to_string())
}

fn parse_kind(raw: Option<&String>) -> Result<IssueKind, String> {
    raw.and_then(|value| IssueKind::parse(value))
        .ok_or_else(|| "expected `general` or `specific`".to_string())
}

fn require_text(parts: &[String]) -> Result<String, String> {
    let text = parts.join(" ").trim().to_string();
    if text.is_empty() {
        return Err("issue text is required".to_string());
    }
    Ok(text)
}

fn parse_with_args(command: &str, arg: &str) -> Result<SessionCommand, String> {
    let parts = split_args(arg);
    match command {
        "clear" => {
            let slot = parts
                .first()
                .and_then(|value| ImageSlot::parse(value))
                .ok_or_else(|| "expected `design` or `live`".to_string())?;
            Ok(SessionCommand::Clear { slot })
        }
        "score" | "bump" => {
            let [raw] = parts.as_slice() else {
                return Err("expected one number".to_string());
            };
            let value = parse_number(raw, "score")?;
            Ok(if command == "score" {
                SessionCommand::SetScore(value)
            } else {
                SessionCommand::BumpScore(value)
            })
        }
        "general" => {
            let text = arg.trim();
            if text.is_empty() {
                return Err("issue text is required".to_string());
            }
            Ok(SessionCommand::AddGeneral(text.to_string()))
        }
        "specific" => {
            if parts.len() < 5 {
                return Err("usage: /specific <x> <y> <w> <h> <text>".to_string());
            }
            let anchor = parse_anchor(&parts[..4])?;
            Ok(SessionCommand::AddSpecific {
                anchor,
                text: require_text(&parts[4..])?,
            })
        }
        "specific_px" => {
            if parts.len() < 5 {
                return Err("usage: /specific_px <left> <top> <w> <h> <text>".to_string());
            }
            let rect = PixelRect::new(
                parse_pixel(&parts[0], "left")?,
                parse_pixel(&parts[1], "top")?,
                parse_pixel(&parts[2], "width")?,
                parse_pixel(&parts[3], "height")?,
            );
            Ok(SessionCommand::AddSpecificPixels {
                rect,
                text: require_text(&parts[4..])?,
            })
        }
        "edit" => {
            let kind = parse_kind(parts.first())?;
            let index = parse_index(parts.get(1).map(String::as_str).unwrap_or(""))?;
            Ok(SessionCommand::Edit {
                kind,
                index,
                text: require_text(parts.get(2..).unwrap_or(&[]))?,
            })
        }
        "move" => {
            let index = parse_index(parts.first().map(String::as_str).unwrap_or(""))?;
            let anchor = parse_anchor(parts.get(1..).unwrap_or(&[]))?;
            Ok(SessionCommand::Move { index, anchor })
        }
        "remove" => {
            let kind = parse_kind(parts.first())?;
            let index = parse_index(parts.get(1).map(String::as_str).unwrap_or(""))?;
            Ok(SessionCommand::Remove { kind, index })
        }
        "model" => {
            let name = arg.trim();
            if name.is_empty() {
                return Err("expected a model name".to_string());
            }
            Ok(SessionCommand::SetModel(name.to_string()))
        }
        _ => Ok(SessionCommand::Unknown {
            command: command.to_string(),
        }),
    }
}

pub fn parse_command(text: &str) -> SessionCommand {
    let raw_trimmed = text.trim();
    if raw_trimmed.is_empty() {
        return SessionCommand::Noop;
    }

    let Some(slash_tail) = raw_trimmed.strip_prefix('/') else {
        return SessionCommand::AddGeneral(raw_trimmed.to_string());
    };
    let command_len = slash_tail
        .chars()
        .take_while(|ch| ch.is_ascii_alphanumeric() || *ch == '_')
        .count();
    if command_len == 0 {
        return SessionCommand::Unknown {
            command: String::new(),
        };
    }
    let command = slash_tail[..command_len].to_ascii_lowercase();
    let arg = slash_tail[command_len..].trim();

    if let Some((_, action)) = NO_ARG_COMMANDS.iter().find(|(name, _)| *name == command) {
        return action.clone();
    }

    if UPLOAD_COMMANDS.contains(&command.as_str()) {
        let slot = ImageSlot::parse(&command).unwrap_or(ImageSlot::Design);
        return match single_path(arg) {
            Some(path) => SessionCommand::Upload { slot, path },
            None => SessionCommand::Invalid {
                command,
                reason: "expected an image path".to_string(),
            },
        };
    }

    if OPTIONAL_PATH_COMMANDS.contains(&command.as_str()) {
        let path = single_path(arg);
        return if command == "render" {
            SessionCommand::Render { path }
        } else {
            SessionCommand::Export { path }
        };
    }

    parse_with_args(&command, arg).unwrap_or_else(|reason| SessionCommand::Invalid {
        command: command.clone(),
        reason,
    })
}
