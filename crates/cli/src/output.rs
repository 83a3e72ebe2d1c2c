// Output format auto-detection for the CLI.
//
// TTY → human-readable text. Piped/redirected → one JSON object per line.
// `--json` forces JSON regardless of terminal.

use std::io::{self, IsTerminal, Write};

use pear_bootstrap::{BootstrapError, ConfigError};
use serde::Serialize;
use serde_json::Value;

const ANSI_RED: &str = "\x1b[31m";
const ANSI_RESET: &str = "\x1b[0m";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Human,
    Json,
}

impl OutputFormat {
    /// JSON if `--json` was passed or stdout is not a TTY.
    pub fn detect(json_flag: bool) -> Self {
        if json_flag {
            return Self::Json;
        }
        Self::detect_from_terminal(io::stdout().is_terminal())
    }

    pub fn detect_from_terminal(is_tty: bool) -> Self {
        if is_tty {
            Self::Human
        } else {
            Self::Json
        }
    }
}

/// One progress line: an updater event, a runtime status event, or the
/// final hand-off notice.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressLine<'a> {
    #[serde(rename = "type")]
    pub kind: &'a str,
    pub data: &'a Value,
}

pub fn print_progress(format: OutputFormat, kind: &str, data: &Value) {
    let mut out = io::stdout().lock();
    let _ = write_output(&mut out, format, &ProgressLine { kind, data }, render_progress);
}

/// Write a value to a provided writer.
pub fn write_output<W, T, F>(
    writer: &mut W,
    format: OutputFormat,
    value: &T,
    human_fn: F,
) -> io::Result<()>
where
    W: Write,
    T: Serialize,
    F: FnOnce(&T) -> String,
{
    match format {
        OutputFormat::Human => {
            writeln!(writer, "{}", human_fn(value))
        }
        OutputFormat::Json => {
            serde_json::to_writer(&mut *writer, value).map_err(io::Error::other)?;
            writeln!(writer)
        }
    }
}

fn render_progress(line: &ProgressLine<'_>) -> String {
    let text = match line.data {
        Value::String(text) => text.clone(),
        Value::Object(map) => match map.get("message").and_then(Value::as_str) {
            Some(message) => message.to_string(),
            None => line.data.to_string(),
        },
        other => other.to_string(),
    };
    format!("{}: {text}", line.kind)
}

/// Write an error to stderr in the selected format.
pub fn print_error(format: OutputFormat, code: &str, message: &str) {
    let mut err = io::stderr().lock();
    match format {
        OutputFormat::Human => {
            let line = render_human_stderr_line("error", message, io::stderr().is_terminal());
            let _ = writeln!(err, "{line}");
        }
        OutputFormat::Json => {
            let obj = serde_json::json!({
                "error": {
                    "code": code,
                    "message": message,
                }
            });
            let _ = serde_json::to_writer(&mut err, &obj);
            let _ = writeln!(err);
        }
    }
}

pub fn print_anyhow_error(format: OutputFormat, error: &anyhow::Error) {
    print_error(format, error_code(error), &format!("{error:#}"));
}

/// Stable code for the first recognized error in the chain.
fn error_code(error: &anyhow::Error) -> &'static str {
    for cause in error.chain() {
        if let Some(bootstrap) = cause.downcast_ref::<BootstrapError>() {
            return bootstrap.code();
        }
        if cause.downcast_ref::<ConfigError>().is_some() {
            return "ERR_CONFIG";
        }
        if cause.downcast_ref::<tokio::time::error::Elapsed>().is_some() {
            return "ERR_TIMEOUT";
        }
    }
    "ERR_INTERNAL_ERROR"
}

fn render_human_stderr_line(label: &str, message: &str, is_tty: bool) -> String {
    if is_tty {
        format!("{ANSI_RED}{label}:{ANSI_RESET} {message}")
    } else {
        format!("{label}: {message}")
    }
}
