//! Agent-facing command protocols over an interactive session.
//!
//! There is no exit-code channel on a PTY, so completion is discovered with a
//! sentinel: the command is suffixed with `; echo __CHORALEIA_DONE__$?` and
//! the scrollback window after the write is polled for the echoed marker.

use std::borrow::Cow;
use std::time::Duration;

use choraleia_core::config::READ_FILE_MAX_BYTES;
use regex::Regex;
use std::sync::OnceLock;
use tracing::debug;
use uuid::Uuid;

use crate::error::Result;
use crate::session::TermSession;

const SENTINEL: &str = "__CHORALEIA_DONE__";
/// Poll cadence while waiting for the sentinel.
const POLL_INTERVAL: Duration = Duration::from_millis(200);
/// Grace period after Ctrl-C before capturing the final window.
const INTERRUPT_GRACE: Duration = Duration::from_millis(300);
/// Base heredoc delimiter for `write_file`.
const HEREDOC_DELIMITER: &str = "OMNI_EOF";

fn sentinel_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"__CHORALEIA_DONE__([0-9]+)").expect("static regex"))
}

/// Strip ANSI escapes and carriage returns from a raw scrollback window.
fn clean(window: &[u8]) -> String {
    let stripped = strip_ansi_escapes::strip(window);
    String::from_utf8_lossy(&stripped).replace('\r', "")
}

/// Drop the PTY echo of the command we just wrote, when present at the start
/// of the window. Best-effort: shells with echo disabled produce no copy.
fn strip_echoed_command(window: &str, written: &str) -> String {
    let written = written.trim_end_matches('\n');
    if let Some(rest) = window.strip_prefix(written) {
        return rest.trim_start_matches('\n').to_string();
    }
    // The echo may be hard-wrapped; fall back to dropping the first line if it
    // contains the sentinel suffix we appended.
    if let Some((first, rest)) = window.split_once('\n') {
        if first.contains(SENTINEL) {
            return rest.to_string();
        }
    }
    window.to_string()
}

/// Remove every sentinel occurrence (the echoed `$?` form and the expanded
/// digit form) from a window.
fn redact_sentinel(text: &str) -> String {
    let no_suffix = text.replace(&format!("; echo {SENTINEL}$?"), "");
    sentinel_re().replace_all(&no_suffix, "").into_owned()
}

// Single-quote wrapping with the standard '\'' escape, the same convention
// the docker exec channel uses.
fn quote(path: &str) -> String {
    shell_escape::unix::escape(Cow::Borrowed(path)).into_owned()
}

// ---------------------------------------------------------------------------
// exec_command
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ExecCommandResult {
    pub command: String,
    /// `None` when the sentinel never appeared (timeout / suppressed echo).
    pub exit_code: Option<i32>,
    pub output: String,
    pub timed_out: bool,
}

impl ExecCommandResult {
    /// The text block handed to the model.
    pub fn render(&self) -> String {
        if self.timed_out {
            format!(
                "Command timed out, attempted interrupt (Ctrl+C).\nCommand: {}\nOutput: {}",
                self.command, self.output
            )
        } else {
            format!(
                "Command completed\nCommand: {}\nExit Code: {}\nOutput: {}",
                self.command,
                self.exit_code.unwrap_or(-1),
                self.output
            )
        }
    }
}

/// Run `command` on the session and wait for the sentinel, polling the
/// scrollback window that starts at the pre-write offset. On timeout a
/// Ctrl-C is sent and whatever output exists is returned with no exit code.
pub async fn exec_command(
    session: &TermSession,
    command: &str,
    timeout_secs: u64,
) -> Result<ExecCommandResult> {
    let mark = session.scrollback_end();
    let written = format!("{command}; echo {SENTINEL}$?\n");
    session.write(&written).await?;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(timeout_secs);
    loop {
        tokio::time::sleep(POLL_INTERVAL).await;

        let text = clean(&session.scrollback_window(mark));
        if let Some(caps) = sentinel_re().captures_iter(&text).last() {
            let exit_code = caps
                .get(1)
                .and_then(|m| m.as_str().parse::<i32>().ok())
                .unwrap_or(-1);
            let body = strip_echoed_command(&text, &written);
            let output = redact_sentinel(&body).trim().to_string();
            debug!(command, exit_code, "sentinel matched");
            return Ok(ExecCommandResult {
                command: command.to_string(),
                exit_code: Some(exit_code),
                output,
                timed_out: false,
            });
        }

        if tokio::time::Instant::now() >= deadline {
            break;
        }
    }

    // Interrupt and capture what there is.
    session.write("\x03").await?;
    tokio::time::sleep(INTERRUPT_GRACE).await;
    let text = clean(&session.scrollback_window(mark));
    let body = strip_echoed_command(&text, &written);
    let output = redact_sentinel(&body).trim().to_string();
    debug!(command, "exec timed out, interrupt sent");
    Ok(ExecCommandResult {
        command: command.to_string(),
        exit_code: None,
        output,
        timed_out: true,
    })
}

// ---------------------------------------------------------------------------
// read_file
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ReadFileResult {
    pub path: String,
    pub content: String,
    pub truncated: bool,
    pub exit_code: i32,
}

impl ReadFileResult {
    pub fn render(&self) -> String {
        if self.exit_code != 0 {
            return format!("Failed to read {} (exit code {})", self.path, self.exit_code);
        }
        if self.truncated {
            format!("{}\n...[truncated]", self.content)
        } else {
            self.content.clone()
        }
    }
}

/// Read a file through the session with `cat --`, capped at `max_bytes`.
/// Content is everything between the echoed command and the sentinel line,
/// preserved byte-for-byte (modulo the PTY's CRLF translation, undone here).
pub async fn read_file(
    session: &TermSession,
    path: &str,
    max_bytes: usize,
    timeout_secs: u64,
) -> Result<ReadFileResult> {
    let max_bytes = max_bytes.min(READ_FILE_MAX_BYTES);
    let mark = session.scrollback_end();
    let written = format!("cat -- {}; echo {SENTINEL}$?\n", quote(path));
    session.write(&written).await?;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(timeout_secs);
    loop {
        tokio::time::sleep(POLL_INTERVAL).await;

        let text = clean(&session.scrollback_window(mark));
        if let Some(m) = sentinel_re().find_iter(&text).last() {
            let exit_code = sentinel_re()
                .captures(&text[m.start()..])
                .and_then(|c| c.get(1))
                .and_then(|d| d.as_str().parse::<i32>().ok())
                .unwrap_or(-1);

            let before = &text[..m.start()];
            let body = strip_echoed_command(before, &written);
            let mut content = body;
            let mut truncated = false;
            if content.len() > max_bytes {
                content = truncate_on_char_boundary(&content, max_bytes);
                truncated = true;
            }
            return Ok(ReadFileResult {
                path: path.to_string(),
                content,
                truncated,
                exit_code,
            });
        }

        if tokio::time::Instant::now() >= deadline {
            return Ok(ReadFileResult {
                path: path.to_string(),
                content: String::new(),
                truncated: false,
                exit_code: -1,
            });
        }
    }
}

fn truncate_on_char_boundary(s: &str, max: usize) -> String {
    let mut end = max.min(s.len());
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

// ---------------------------------------------------------------------------
// write_file
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct WriteFileResult {
    pub path: String,
    pub bytes_written: usize,
    pub success: bool,
}

impl WriteFileResult {
    pub fn render(&self) -> String {
        if self.success {
            format!(
                "Successfully wrote {} bytes to {}",
                self.bytes_written, self.path
            )
        } else {
            format!("Failed to write {}", self.path)
        }
    }
}

/// Pick a heredoc delimiter that cannot appear in `content`.
fn choose_delimiter(content: &str) -> Cow<'static, str> {
    if content.contains(HEREDOC_DELIMITER) {
        Cow::Owned(format!("{HEREDOC_DELIMITER}_{}", Uuid::new_v4().simple()))
    } else {
        Cow::Borrowed(HEREDOC_DELIMITER)
    }
}

/// Write `content` to `path` through the session using a quoted heredoc, then
/// confirm with the sentinel. `overwrite=false` appends instead.
pub async fn write_file(
    session: &TermSession,
    path: &str,
    content: &str,
    overwrite: bool,
    timeout_secs: u64,
) -> Result<WriteFileResult> {
    let delimiter = choose_delimiter(content);
    let redirect = if overwrite { ">" } else { ">>" };
    // The heredoc body must end with a newline so the delimiter sits on its
    // own line; cat strips nothing, so a content without trailing newline
    // gains exactly one.
    let body = if content.ends_with('\n') || content.is_empty() {
        Cow::Borrowed(content)
    } else {
        Cow::Owned(format!("{content}\n"))
    };
    let written = format!(
        "cat {redirect} {} <<'{delimiter}'\n{body}{delimiter}\necho {SENTINEL}$?\n",
        quote(path),
    );

    let mark = session.scrollback_end();
    session.write(&written).await?;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(timeout_secs);
    loop {
        tokio::time::sleep(POLL_INTERVAL).await;

        let text = clean(&session.scrollback_window(mark));
        if let Some(caps) = sentinel_re().captures_iter(&text).last() {
            let exit_code = caps
                .get(1)
                .and_then(|d| d.as_str().parse::<i32>().ok())
                .unwrap_or(-1);
            return Ok(WriteFileResult {
                path: path.to_string(),
                bytes_written: content.len(),
                success: exit_code == 0,
            });
        }

        if tokio::time::Instant::now() >= deadline {
            return Ok(WriteFileResult {
                path: path.to_string(),
                bytes_written: 0,
                success: false,
            });
        }
    }
}

// ---------------------------------------------------------------------------
// get_output
// ---------------------------------------------------------------------------

/// The last `lines` lines of server-side scrollback, ANSI-stripped. Empty
/// string means no output.
pub fn get_output(session: &TermSession, lines: usize) -> String {
    let text = clean(&session.scrollback_tail(choraleia_core::config::SCROLLBACK_MAX_BYTES));
    let all: Vec<&str> = text.lines().collect();
    let start = all.len().saturating_sub(lines);
    all[start..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_regex_extracts_exit_code() {
        let caps = sentinel_re()
            .captures("some output\n__CHORALEIA_DONE__42\n")
            .unwrap();
        assert_eq!(&caps[1], "42");
    }

    #[test]
    fn redaction_removes_both_sentinel_forms() {
        let raw = "echo hi; echo __CHORALEIA_DONE__$?\nhi\n__CHORALEIA_DONE__0\n";
        let redacted = redact_sentinel(raw);
        assert!(!redacted.contains(SENTINEL));
        assert!(redacted.contains("hi"));
    }

    #[test]
    fn echoed_command_is_stripped() {
        let written = "echo hi; echo __CHORALEIA_DONE__$?\n";
        let window = "echo hi; echo __CHORALEIA_DONE__$?\nhi\n__CHORALEIA_DONE__0\n";
        let stripped = strip_echoed_command(window, written);
        assert!(stripped.starts_with("hi"));
    }

    #[test]
    fn delimiter_avoids_collision_with_payload() {
        assert_eq!(choose_delimiter("plain text"), HEREDOC_DELIMITER);
        let chosen = choose_delimiter("line1\nOMNI_EOF\n");
        assert!(chosen.starts_with("OMNI_EOF_"));
        assert_ne!(chosen, HEREDOC_DELIMITER);
    }

    #[test]
    fn render_shapes_match_the_tool_contract() {
        let ok = ExecCommandResult {
            command: "echo hi".into(),
            exit_code: Some(0),
            output: "hi".into(),
            timed_out: false,
        };
        assert_eq!(
            ok.render(),
            "Command completed\nCommand: echo hi\nExit Code: 0\nOutput: hi"
        );

        let timed = ExecCommandResult {
            command: "sleep 10".into(),
            exit_code: None,
            output: String::new(),
            timed_out: true,
        };
        assert!(timed
            .render()
            .starts_with("Command timed out, attempted interrupt (Ctrl+C)."));
        assert!(!timed.render().contains("Exit Code"));
    }

    #[test]
    fn quoting_protects_awkward_paths() {
        assert_eq!(quote("/tmp/plain.txt"), "/tmp/plain.txt");
        assert_eq!(quote("/tmp/has space"), "'/tmp/has space'");
        assert_eq!(quote("/tmp/it's"), r#"'/tmp/it'\''s'"#);
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let s = "€€€€"; // 3 bytes each
        let t = truncate_on_char_boundary(s, 7);
        assert_eq!(t, "€€");
    }
}
