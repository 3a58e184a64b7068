//! Tests for external programs: exit handling, stream wiring and early exit
//! of consumers.

use shpipe::{
    combined_output, disjoint_output, exec, output, pipeline, run, run_in, script, system,
    CommandFailure, OutputBuffer, PipeError, State,
};

const OUT_ERR: &str = "echo out1; echo err1 1>&2; echo out2; echo err2 1>&2";

// ============================================================================
// Running Programs
// ============================================================================

#[tokio::test]
async fn exec_runs_in_scope_directory() {
    let tmp = tempfile::tempdir().unwrap();
    let stage = script![
        shpipe::chdir(tmp.path()),
        exec("/bin/sh", ["-c", "echo hello > file"]),
    ];
    run(&stage).await.unwrap();

    let written = std::fs::read_to_string(tmp.path().join("file")).unwrap();
    assert_eq!(written, "hello\n");
}

#[tokio::test]
async fn exec_output_is_stdout_only() {
    let out = output(&system(OUT_ERR)).await.unwrap();
    assert_eq!(String::from_utf8(out).unwrap(), "out1\nout2\n");
}

#[tokio::test]
async fn exec_combined_output_keeps_order() {
    let out = combined_output(&system(OUT_ERR)).await.unwrap();
    assert_eq!(String::from_utf8(out).unwrap(), "out1\nerr1\nout2\nerr2\n");
}

#[tokio::test]
async fn exec_disjoint_output() {
    let (out, err) = disjoint_output(&system(OUT_ERR)).await.unwrap();
    assert_eq!(String::from_utf8(out).unwrap(), "out1\nout2\n");
    assert_eq!(String::from_utf8(err).unwrap(), "err1\nerr2\n");
}

#[tokio::test]
async fn exec_line_rewrites_stdout_only() {
    let stage = pipeline![system(OUT_ERR), exec("sed", ["s/out/out-/"])];
    let out = combined_output(&stage).await.unwrap();
    assert_eq!(String::from_utf8(out).unwrap(), "err1\nerr2\nout-1\nout-2\n");
}

// ============================================================================
// Failures
// ============================================================================

#[tokio::test]
async fn exec_nonzero_exit_names_program() {
    let err = run(&exec("false", Vec::<String>::new())).await.unwrap_err();
    assert!(
        matches!(err, PipeError::Command { cause: CommandFailure::Exit(_), .. }),
        "unexpected error: {err:?}"
    );
    assert_eq!(err.to_string(), r#"command "false": exit status: 1"#);
}

#[tokio::test]
async fn exec_missing_program_fails_to_start() {
    let err = run(&exec("definitely_not_a_real_command_12345", Vec::<String>::new()))
        .await
        .unwrap_err();
    assert!(matches!(err, PipeError::Spawn { .. }), "unexpected error: {err:?}");
    assert_eq!(err.io_kind(), Some(std::io::ErrorKind::NotFound));
}

#[tokio::test]
async fn exec_large_write_into_non_reader_breaks_pipe() {
    let out = OutputBuffer::new();
    let mut state = State::new(out.clone().into(), out.clone().into());
    let payload = "x".repeat(256 * 1024);
    let stage = pipeline![shpipe::echo(payload), exec("true", Vec::<String>::new())];

    let err = run_in(&stage, &mut state).await.unwrap_err();
    assert!(err.is_broken_pipe(), "unexpected error: {err}");
    assert!(out.is_empty());
}

#[tokio::test]
async fn exec_consumer_exit_stops_producer() {
    let out = OutputBuffer::new();
    let mut state = State::new(out.clone().into(), shpipe::OutputStream::Discard);
    let stage = pipeline![exec("yes", Vec::<String>::new()), exec("head", ["-n", "2"])];

    let err = run_in(&stage, &mut state).await.unwrap_err();
    assert!(err.is_broken_pipe(), "unexpected error: {err}");
    assert_eq!(out.to_string_lossy(), "y\ny\n");
}

#[tokio::test]
async fn exec_failure_kills_long_running_sibling() {
    let started = std::time::Instant::now();
    let stage = pipeline![exec("sleep", ["30"]), system("exit 7")];
    let err = run(&stage).await.unwrap_err();
    assert!(err.to_string().contains("exit status: 7"), "unexpected error: {err}");
    assert!(started.elapsed() < std::time::Duration::from_secs(20));
}
