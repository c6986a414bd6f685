// Sentinel protocol against a real local PTY running /bin/sh.
//
// The session is prepared the same way an agent attach is: echo and prompt
// suppressed so the scrollback carries command output only.

use std::time::Duration;

use choraleia_terminal::exec;
use choraleia_terminal::TermSession;

async fn shell_session() -> TermSession {
    let session = TermSession::new_local_pty("sh", false, &[], Some("/tmp"))
        .expect("PTY spawn");
    // Let the shell draw its first prompt, then silence it.
    tokio::time::sleep(Duration::from_millis(300)).await;
    session
        .write("stty -echo; PS1=''; PS2=''\n")
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    session
}

#[tokio::test]
async fn exec_happy_path_reports_exit_code_and_output() {
    let session = shell_session().await;

    let result = exec::exec_command(&session, "echo hi", 30).await.unwrap();
    assert_eq!(result.exit_code, Some(0));
    assert!(!result.timed_out);

    let rendered = result.render();
    assert!(rendered.contains("Exit Code: 0"), "got: {rendered}");
    assert!(rendered.contains("Output: hi"), "got: {rendered}");
}

#[tokio::test]
async fn exec_reports_nonzero_exit_codes() {
    let session = shell_session().await;
    let result = exec::exec_command(&session, "false", 30).await.unwrap();
    assert_eq!(result.exit_code, Some(1));
}

#[tokio::test]
async fn exec_timeout_interrupts_and_reports() {
    let session = shell_session().await;

    let result = exec::exec_command(&session, "sleep 10", 1).await.unwrap();
    assert!(result.timed_out);
    assert_eq!(result.exit_code, None);
    assert!(result
        .render()
        .starts_with("Command timed out, attempted interrupt (Ctrl+C)."));

    // The interrupt must leave the shell usable.
    let after = exec::exec_command(&session, "echo back", 30).await.unwrap();
    assert_eq!(after.exit_code, Some(0));
}

#[tokio::test]
async fn write_then_read_round_trips_with_delimiter_collision() {
    let session = shell_session().await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("x");
    let path = path.to_str().unwrap();

    // The payload contains the default heredoc delimiter; the UUID-suffixed
    // delimiter must keep the write intact.
    let content = "line1\nOMNI_EOF\n";
    let write = exec::write_file(&session, path, content, true, 30)
        .await
        .unwrap();
    assert!(write.success);
    assert_eq!(write.bytes_written, 15);

    let read = exec::read_file(&session, path, 1024, 30).await.unwrap();
    assert_eq!(read.exit_code, 0);
    assert_eq!(read.content, content);
    assert!(!read.truncated);
}

#[tokio::test]
async fn append_mode_appends() {
    let session = shell_session().await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("log");
    let path = path.to_str().unwrap();

    exec::write_file(&session, path, "one\n", true, 30).await.unwrap();
    exec::write_file(&session, path, "two\n", false, 30).await.unwrap();

    let read = exec::read_file(&session, path, 1024, 30).await.unwrap();
    assert_eq!(read.content, "one\ntwo\n");
}

#[tokio::test]
async fn scrollback_stays_bounded_under_load() {
    let session = shell_session().await;
    // ~1.6 MB of output, well past the 1 MB cap.
    let result = exec::exec_command(
        &session,
        "i=0; while [ $i -lt 100 ]; do head -c 16384 /dev/zero | tr '\\0' 'x'; echo; i=$((i+1)); done",
        60,
    )
    .await
    .unwrap();
    assert_eq!(result.exit_code, Some(0));
    assert!(session.scrollback_len() <= 1_000_000);
}
