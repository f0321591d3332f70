//! End-to-end runs through a real Python worker process
//!
//! Each test returns early when no interpreter is on PATH.

use crate::common::*;
use assert_matches::assert_matches;
use pyrunner_sandbox::{
    Interpreter, OutputSink, PythonProcessRuntime, RunOutcome, RunResult, Runtime, SandboxConfig,
    SessionController, SessionState, Timeouts,
};
use std::time::Duration;

const STARTUP: Duration = Duration::from_secs(30);

fn python_config() -> SandboxConfig {
    SandboxConfig {
        timeouts: Timeouts::new(Duration::from_secs(30), Duration::from_secs(2)),
        ..SandboxConfig::default()
    }
}

async fn python_session() -> Option<SessionController> {
    if !python_available() {
        eprintln!("skipping: no Python interpreter on PATH");
        return None;
    }
    setup_test_logging();
    let session = SessionController::with_python(python_config()).expect("valid configuration");
    session.request_init().expect("controller alive");
    session
        .wait_for(SessionState::Ready, STARTUP)
        .await
        .expect("python worker starts");
    Some(session)
}

#[tokio::test]
async fn test_hello_through_python() {
    let Some(session) = python_session().await else {
        return;
    };

    let trace = run_to_end(&session, "print('Hello, Python!')", STARTUP).await;
    assert_eq!(trace.stdout(), vec!["Hello, Python!\n"]);
    assert_matches!(trace.result(), Some(RunResult::Value { text }) if text.is_empty());
    assert_eq!(session.state(), SessionState::Ready);
    session.dispose().await;
}

#[tokio::test]
async fn test_tail_expression_value_and_globals() {
    let Some(session) = python_session().await else {
        return;
    };

    run_to_end(&session, "numbers = [1, 2, 3]", STARTUP).await;
    let trace = run_to_end(&session, "for n in numbers:\n    print(n)\nsum(numbers)", STARTUP).await;
    assert_eq!(trace.stdout(), vec!["1\n", "2\n", "3\n"]);
    assert_matches!(trace.result(), Some(RunResult::Value { text }) if text == "6");
    session.dispose().await;
}

#[tokio::test]
async fn test_python_syntax_error_gets_hint() {
    let Some(session) = python_session().await else {
        return;
    };

    let trace = run_to_end(&session, "x = 3\nif x = 3\nprint('equal')", STARTUP).await;
    assert_matches!(
        trace.result(),
        Some(RunResult::Error { message, hint: Some(_) }) if message.contains("SyntaxError")
    );
    assert_eq!(session.state(), SessionState::Ready);
    session.dispose().await;
}

#[tokio::test]
async fn test_python_runaway_loop_is_killed() {
    let Some(session) = python_session().await else {
        return;
    };

    let trace = run_to_end(&session, "while True:\n    pass", Duration::from_secs(10)).await;
    assert!(trace.timed_out());
    session.wait_for(SessionState::Idle, STARTUP).await.unwrap();
    assert!(session.rendered_output().await.contains("[timeout]"));
    session.dispose().await;
}

#[tokio::test]
async fn test_stray_fd_writes_do_not_break_the_protocol() {
    if !python_available() {
        return;
    }
    let (sink, mut events) = OutputSink::channel();
    let mut interpreter = PythonProcessRuntime::new()
        .load(sink)
        .await
        .expect("python worker starts");

    let outcome = interpreter
        .run("import os\nos.write(1, b'raw bytes\\n')\nprint('after')\n40 + 2")
        .await
        .expect("worker survives");
    assert_eq!(outcome, RunOutcome::Value("42".into()));

    let mut stdout = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let pyrunner_sandbox::HostEvent::Output(RunResult::Stdout { text }) = event {
            stdout.push(text);
        }
    }
    assert_eq!(stdout, vec!["after\n"]);
}

/// Run `source` on a bare worker and return its stream events in arrival order
async fn worker_streams(source: &str) -> Option<(RunOutcome, Vec<RunResult>)> {
    if !python_available() {
        return None;
    }
    let (sink, mut events) = OutputSink::channel();
    let mut interpreter = PythonProcessRuntime::new()
        .load(sink)
        .await
        .expect("python worker starts");
    let outcome = interpreter.run(source).await.expect("worker survives");

    let mut streams = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let pyrunner_sandbox::HostEvent::Output(result) = event {
            streams.push(result);
        }
    }
    Some((outcome, streams))
}

#[tokio::test]
async fn test_base_exception_is_a_script_fault() {
    let Some(session) = python_session().await else {
        return;
    };

    for source in [
        "raise KeyboardInterrupt",
        "class Stop(BaseException):\n    pass\nraise Stop('halt')",
    ] {
        let trace = run_to_end(&session, source, STARTUP).await;
        assert_matches!(trace.result(), Some(RunResult::Error { .. }));
        assert_eq!(session.state(), SessionState::Ready);
    }

    let trace = run_to_end(&session, "print('still here')", STARTUP).await;
    assert_eq!(trace.stdout(), vec!["still here\n"]);
    session.dispose().await;
}

#[tokio::test]
async fn test_partial_line_keeps_order_with_other_stream() {
    let Some((_, streams)) =
        worker_streams("import sys\nprint('a', end='')\nsys.stderr.write('b\\n')\nprint('c')").await
    else {
        return;
    };
    assert_eq!(
        streams,
        vec![
            RunResult::stdout("a"),
            RunResult::stderr("b\n"),
            RunResult::stdout("c\n"),
        ]
    );
}

#[tokio::test]
async fn test_unencodable_text_still_arrives() {
    let Some((outcome, streams)) = worker_streams("print('x\\udcff')\nprint('after')").await else {
        return;
    };
    assert_eq!(outcome, RunOutcome::Value(String::new()));
    assert_eq!(
        streams,
        vec![RunResult::stdout("x\\udcff\n"), RunResult::stdout("after\n")]
    );
}

