//! Session controller lifecycle against the scripted runtime

use crate::common::*;
use assert_matches::assert_matches;
use pyrunner_sandbox::{
    ConsoleStream, RunResult, SandboxConfig, SandboxError, SessionController, SessionEvent,
    SessionState,
};
use std::time::Duration;

#[tokio::test]
async fn test_hello_prints_once_and_returns_to_ready() {
    setup_test_logging();
    let runtime = ScriptedRuntime::new();
    let session = ready_session(&runtime, test_config()).await;

    let trace = run_to_end(&session, "print('Hello, Python!')", PROMPT).await;

    assert_eq!(trace.stdout(), vec!["Hello, Python!\n"]);
    assert_matches!(trace.result(), Some(RunResult::Value { text }) if text.is_empty());
    assert_eq!(session.state(), SessionState::Ready);
    assert_eq!(session.rendered_output().await, "Hello, Python!\n");
}

#[tokio::test]
async fn test_output_arrives_in_order_before_value() {
    let runtime = ScriptedRuntime::new();
    let session = ready_session(&runtime, test_config()).await;

    let trace = run_to_end(&session, "print('a')\nprint('b')\nprint('c')\n'done'", PROMPT).await;

    let observed: Vec<String> = trace
        .events
        .iter()
        .filter_map(|event| match event {
            SessionEvent::Output(chunk) => Some(chunk.text.clone()),
            SessionEvent::RunFinished {
                result: RunResult::Value { text },
                ..
            } => Some(format!("value:{}", text)),
            _ => None,
        })
        .collect();
    // The value chunk is echoed to the console before the terminal event
    assert_eq!(observed, vec!["a\n", "b\n", "c\n", "done", "value:done"]);
    assert_eq!(session.rendered_output().await, "a\nb\nc\ndone\n");
}

#[tokio::test]
async fn test_package_load_is_reported_once() {
    let runtime = ScriptedRuntime::new();
    let stats = runtime.stats();
    let session = ready_session(&runtime, test_config()).await;

    let source = "import pandas as pd\nprint('loaded')";
    let first = run_to_end(&session, source, PROMPT).await;
    assert_eq!(first.statuses(), vec!["loading pandas…", "pandas ready"]);
    assert_eq!(first.stdout(), vec!["loaded\n"]);

    let second = run_to_end(&session, source, PROMPT).await;
    assert!(second.statuses().is_empty());
    assert_eq!(second.stdout(), vec!["loaded\n"]);
    assert_eq!(stats.package_loads(), 1);
}

#[tokio::test]
async fn test_syntax_error_keeps_session_ready() {
    let runtime = ScriptedRuntime::new();
    let session = ready_session(&runtime, test_config()).await;

    let trace = run_to_end(&session, "x = 3\nif x = 3\nprint('equal')", PROMPT).await;

    assert_matches!(
        trace.result(),
        Some(RunResult::Error { message, hint: Some(hint) })
            if message.contains("SyntaxError") && hint.contains("==")
    );
    assert!(trace.stdout().is_empty());
    assert_eq!(session.state(), SessionState::Ready);

    let console = session.rendered_output().await;
    assert!(console.contains("[error]"));
    assert!(console.contains("[hint] Use '==' to compare values"));
}

#[tokio::test]
async fn test_repeated_init_produces_one_ready() {
    let runtime = ScriptedRuntime::new().with_load_delay(Duration::from_millis(50));
    let stats = runtime.stats();
    let session = SessionController::new(runtime.into_runtime(), test_config()).unwrap();
    let mut events = session.subscribe();

    session.request_init().unwrap();
    session.request_init().unwrap();
    session
        .wait_for(SessionState::Ready, PROMPT)
        .await
        .unwrap();
    session.request_init().unwrap();
    session.request_reset().unwrap();
    session.dispose().await;

    let mut ready = 0;
    while let Ok(event) = events.try_recv() {
        if event == SessionEvent::StateChanged(SessionState::Ready) {
            ready += 1;
        }
    }
    assert_eq!(ready, 1);
    assert_eq!(stats.loads(), 1);
}

#[tokio::test]
async fn test_run_is_ignored_unless_ready() {
    let runtime = ScriptedRuntime::new();
    let stats = runtime.stats();
    let session = SessionController::new(runtime.into_runtime(), test_config()).unwrap();

    session.request_run("print('too early')").unwrap();
    session.request_init().unwrap();
    session
        .wait_for(SessionState::Ready, PROMPT)
        .await
        .unwrap();

    assert_eq!(stats.runs(), 0);
    assert!(!session.rendered_output().await.contains("too early"));
}

#[tokio::test]
async fn test_second_run_while_running_is_ignored() {
    let runtime = ScriptedRuntime::new();
    let stats = runtime.stats();
    let session = ready_session(&runtime, test_config()).await;

    let mut events = session.subscribe();
    session.request_run("time.sleep(0.1)\nprint('first')").unwrap();
    session.request_run("print('second')").unwrap();
    let trace = collect_run(&mut events, PROMPT).await;

    assert_eq!(trace.stdout(), vec!["first\n"]);
    assert_eq!(stats.runs(), 1);
}

#[tokio::test]
async fn test_reset_clears_console_only() {
    let runtime = ScriptedRuntime::new();
    let session = ready_session(&runtime, test_config()).await;
    run_to_end(&session, "print('a')", PROMPT).await;

    let mut events = session.subscribe();
    session.request_reset().unwrap();
    assert_eq!(events.recv().await.unwrap(), SessionEvent::Cleared);

    assert!(session.output().await.is_empty());
    assert_eq!(session.state(), SessionState::Ready);
}

#[tokio::test]
async fn test_globals_persist_between_runs() {
    let runtime = ScriptedRuntime::new();
    let session = ready_session(&runtime, test_config()).await;

    run_to_end(&session, "total = 42", PROMPT).await;
    let trace = run_to_end(&session, "total", PROMPT).await;
    assert_matches!(trace.result(), Some(RunResult::Value { text }) if text == "42");
}

#[tokio::test]
async fn test_name_error_gets_a_hint() {
    let runtime = ScriptedRuntime::new();
    let session = ready_session(&runtime, test_config()).await;

    let trace = run_to_end(&session, "undefined_name", PROMPT).await;
    assert_matches!(
        trace.result(),
        Some(RunResult::Error { message, hint: Some(_) }) if message.ends_with("NameError: name 'undefined_name' is not defined")
    );
}

#[tokio::test]
async fn test_stderr_is_streamed() {
    let runtime = ScriptedRuntime::new();
    let session = ready_session(&runtime, test_config()).await;

    let trace = run_to_end(&session, "sys.stderr.write('warn')", PROMPT).await;
    let stderr: Vec<_> = trace
        .events
        .iter()
        .filter_map(|event| match event {
            SessionEvent::Output(chunk) if chunk.stream == ConsoleStream::Stderr => {
                Some(chunk.text.as_str())
            }
            _ => None,
        })
        .collect();
    assert_eq!(stderr, vec!["warn"]);
}

#[tokio::test]
async fn test_source_slot_replaces_pending_source() {
    let runtime = ScriptedRuntime::new();
    let config = SandboxConfig {
        default_source: "print('default')".into(),
        ..test_config()
    };
    let session = ready_session(&runtime, config.clone()).await;
    assert_eq!(session.source(), "print('default')");

    // A quick-load control only holds the slot
    let slot = session.source_slot();
    let example = config.example("hello").unwrap().to_string();
    slot.set(example.clone());
    assert_eq!(session.source(), example);

    let mut events = session.subscribe();
    session.run_pending().unwrap();
    let trace = collect_run(&mut events, PROMPT).await;
    assert_eq!(trace.stdout(), vec!["Hello, Python!\n"]);
}

#[tokio::test]
async fn test_restart_returns_to_idle_and_reinitializes() {
    let runtime = ScriptedRuntime::new();
    let stats = runtime.stats();
    let session = ready_session(&runtime, test_config()).await;

    session.restart().unwrap();
    session.wait_for(SessionState::Idle, PROMPT).await.unwrap();
    assert!(session.rendered_output().await.contains("[sandbox] sandbox restarted"));

    session.request_init().unwrap();
    session.wait_for(SessionState::Ready, PROMPT).await.unwrap();
    assert_eq!(stats.loads(), 2);
    // The first host's interpreter is gone
    eventually(|| stats.live() == 1, PROMPT).await;
}

#[tokio::test]
async fn test_invalid_budgets_are_rejected() {
    let mut config = test_config();
    config.timeouts.run = Duration::ZERO;
    let result = SessionController::new(ScriptedRuntime::new().into_runtime(), config);
    assert!(result.is_err());

    let mut config = test_config();
    config.timeouts.init = Duration::MAX;
    let result = SessionController::new(ScriptedRuntime::new().into_runtime(), config);
    assert_matches!(result.err(), Some(SandboxError::Config(_)));
}
