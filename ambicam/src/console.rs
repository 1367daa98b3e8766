//! Line-oriented control console: one command per line, replies on the output.

use std::io::{BufRead, Write};

use ambicam_pipeline_lib::config::{Rect, Side};
use ambicam_pipeline_lib::{ConfigPatch, Controller, Variant};
use log::{debug, warn};

const USAGE: &str = "commands: start [camera|rainbow] | stop | status | set <json> | \
                     nudge <left|right|top|bottom> <delta> | config | quit";

#[derive(Debug)]
pub enum Command {
    Start(Variant),
    Stop,
    Status,
    Set(Box<ConfigPatch>),
    Nudge { side: Side, delta: i64 },
    Config,
    Quit,
}

impl Command {
    /// Parse one console line. Blank lines yield `Ok(None)`.
    pub fn parse(line: &str) -> Result<Option<Self>, String> {
        let line = line.trim();
        let (word, rest) = line
            .split_once(char::is_whitespace)
            .map_or((line, ""), |(w, r)| (w, r.trim()));
        let command = match word.to_ascii_lowercase().as_str() {
            "" => return Ok(None),
            "start" if rest.is_empty() => Self::Start(Variant::Camera),
            "start" => Self::Start(rest.parse()?),
            "stop" => Self::Stop,
            "status" => Self::Status,
            "set" => {
                let patch = serde_json::from_str(rest).map_err(|e| format!("bad patch: {e}"))?;
                Self::Set(Box::new(patch))
            }
            "nudge" => {
                let mut args = rest.split_whitespace();
                let (Some(side), Some(delta), None) = (args.next(), args.next(), args.next())
                else {
                    return Err("nudge takes a side and a delta".to_string());
                };
                Self::Nudge {
                    side: parse_side(side)?,
                    delta: delta
                        .parse()
                        .map_err(|e| format!("bad delta '{delta}': {e}"))?,
                }
            }
            "config" => Self::Config,
            "quit" | "exit" => Self::Quit,
            other => return Err(format!("unknown command '{other}'")),
        };
        Ok(Some(command))
    }
}

fn parse_side(s: &str) -> Result<Side, String> {
    match s.to_ascii_lowercase().as_str() {
        "left" => Ok(Side::Left),
        "right" => Ok(Side::Right),
        "top" => Ok(Side::Top),
        "bottom" => Ok(Side::Bottom),
        other => Err(format!("unknown side '{other}'")),
    }
}

/// Move one edge of `window` by `delta` pixels, stopping at 0.
#[must_use]
pub fn nudged(mut window: Rect, side: Side, delta: i64) -> Rect {
    let edge = match side {
        Side::Left => &mut window.left,
        Side::Right => &mut window.right,
        Side::Top => &mut window.top,
        Side::Bottom => &mut window.bottom,
    };
    *edge = u32::try_from((i64::from(*edge) + delta).max(0)).unwrap_or(u32::MAX);
    window
}

/// Execute one command. Returns `false` when the console should exit.
pub fn execute(controller: &Controller, command: Command, out: &mut impl Write) -> std::io::Result<bool> {
    debug!("Console command: {command:?}");
    match command {
        Command::Start(variant) => match controller.start(variant) {
            Ok(status) => writeln!(out, "{}", to_json(&status))?,
            Err(e) => {
                warn!("Start of {variant} failed: {e}");
                writeln!(out, "error: {e}")?;
            }
        },
        Command::Stop => writeln!(out, "{}", to_json(&controller.stop()))?,
        Command::Status => writeln!(out, "{}", to_json(&controller.status()))?,
        Command::Set(patch) => apply(controller, *patch, out)?,
        Command::Nudge { side, delta } => {
            let window = nudged(controller.config().window, side, delta);
            let patch = ConfigPatch {
                window: Some(window),
                ..ConfigPatch::default()
            };
            apply(controller, patch, out)?;
        }
        Command::Config => {
            let config = serde_json::to_string_pretty(&controller.config())
                .unwrap_or_else(|e| format!("error: {e}"));
            writeln!(out, "{config}")?;
        }
        Command::Quit => return Ok(false),
    }
    Ok(true)
}

fn apply(controller: &Controller, patch: ConfigPatch, out: &mut impl Write) -> std::io::Result<()> {
    match controller.mutate_config(patch) {
        Ok(()) => writeln!(out, "ok"),
        Err(e) => writeln!(out, "error: {e}"),
    }
}

fn to_json(value: &impl serde::Serialize) -> String {
    serde_json::to_string(value).unwrap_or_else(|e| format!("error: {e}"))
}

/// Read commands until `quit` or end of input.
pub fn run(controller: &Controller, input: impl BufRead, mut out: impl Write) -> std::io::Result<()> {
    writeln!(out, "{USAGE}")?;
    for line in input.lines() {
        let line = line?;
        match Command::parse(&line) {
            Ok(None) => {}
            Ok(Some(command)) => {
                if !execute(controller, command, &mut out)? {
                    break;
                }
            }
            Err(e) => {
                writeln!(out, "{e}")?;
                writeln!(out, "{USAGE}")?;
            }
        }
        out.flush()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ambicam_pipeline_lib::{Config, ConfigStore};
    use std::sync::Arc;

    fn controller() -> Controller {
        Controller::new(Arc::new(ConfigStore::new(Config::default(), None)))
    }

    fn session(controller: &Controller, script: &str) -> String {
        let mut out = Vec::new();
        run(controller, script.as_bytes(), &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_parse() {
        assert!(matches!(Command::parse("start"), Ok(Some(Command::Start(Variant::Camera)))));
        assert!(matches!(
            Command::parse("  START rainbow "),
            Ok(Some(Command::Start(Variant::Rainbow)))
        ));
        assert!(matches!(Command::parse("exit"), Ok(Some(Command::Quit))));
        assert!(matches!(Command::parse("   "), Ok(None)));
        assert!(matches!(
            Command::parse("nudge top -5"),
            Ok(Some(Command::Nudge {
                side: Side::Top,
                delta: -5
            }))
        ));
        match Command::parse(r#"set {"smoothing": 0.5}"#) {
            Ok(Some(Command::Set(patch))) => assert_eq!(patch.smoothing, Some(0.5)),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_parse_errors() {
        assert!(Command::parse("dance").is_err());
        assert!(Command::parse("start disco").is_err());
        assert!(Command::parse("nudge left").is_err());
        assert!(Command::parse("nudge middle 3").is_err());
        assert!(Command::parse("nudge left 1 2").is_err());
        assert!(Command::parse("nudge left far").is_err());
        assert!(Command::parse("set {").is_err());
    }

    #[test]
    fn test_nudged_saturates() {
        let window = Rect::new(40, 600, 40, 440);
        assert_eq!(nudged(window, Side::Left, 10).left, 50);
        assert_eq!(nudged(window, Side::Bottom, -40).bottom, 400);
        assert_eq!(nudged(window, Side::Top, -100).top, 0);
        assert_eq!(nudged(window, Side::Right, 0), window);
    }

    #[test]
    fn test_session() {
        let controller = controller();
        let out = session(
            &controller,
            "status\nstart rainbow\nstatus\nbogus\nstop\nquit\nstatus\n",
        );
        let lines: Vec<&str> = out.lines().collect();
        assert!(lines.contains(&r#"{"running":false,"variant":null}"#));
        assert_eq!(
            lines
                .iter()
                .filter(|l| **l == r#"{"running":true,"variant":"rainbow"}"#)
                .count(),
            2
        );
        assert!(lines.contains(&"unknown command 'bogus'"));
        // Nothing after quit is executed
        assert_eq!(
            lines.last(),
            Some(&r#"{"running":false,"variant":null}"#)
        );
        assert!(!controller.status().running);
    }

    #[test]
    fn test_nudge_and_set_persist_in_config() {
        let controller = controller();
        let out = session(
            &controller,
            "nudge left 10\nnudge bottom -20\nset {\"auto_wb\": true}\n",
        );
        assert_eq!(out.lines().filter(|l| *l == "ok").count(), 3);
        let config = controller.config();
        assert_eq!(config.window, Rect::new(50, 600, 40, 420));
        assert!(config.auto_wb);
    }
}
