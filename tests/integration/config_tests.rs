//! Configuration files feeding a live session

use crate::common::*;
use pyrunner_sandbox::{SandboxConfig, SessionState};
use std::time::Duration;

#[tokio::test]
async fn test_lesson_config_drives_preload_and_budgets() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("lesson.toml");
    std::fs::write(
        &path,
        r#"
preload = ["np_alias"]
default_source = "print('lesson')"

[timeouts]
init = "5s"
run = "300ms"

[packages]
np_alias = "numpy"
"#,
    )
    .unwrap();

    let config = SandboxConfig::load_from(&path).unwrap();
    assert_eq!(config.timeouts.run, Duration::from_millis(300));

    let runtime = ScriptedRuntime::new();
    let stats = runtime.stats();
    let session = ready_session(&runtime, config).await;
    assert_eq!(stats.package_loads(), 1);
    assert_eq!(session.source(), "print('lesson')");

    // The extra catalog entry is honored by the scanner, and already loaded
    let trace = run_to_end(&session, "import np_alias\nprint('ok')", PROMPT).await;
    assert!(trace.statuses().is_empty());
    assert_eq!(stats.package_loads(), 1);

    let trace = run_to_end(&session, "while True:\n    pass", PROMPT).await;
    assert!(trace.timed_out());
    session.wait_for(SessionState::Idle, PROMPT).await.unwrap();
}

#[tokio::test]
async fn test_run_results_serialize_for_the_ui() {
    let runtime = ScriptedRuntime::new();
    let session = ready_session(&runtime, test_config()).await;

    let trace = run_to_end(&session, "raise ZeroDivisionError('division by zero')", PROMPT).await;
    let result = trace.result().expect("run finished");
    let json = serde_json::to_value(result).unwrap();

    assert_eq!(json["kind"], "error");
    assert!(json["message"]
        .as_str()
        .unwrap()
        .ends_with("ZeroDivisionError: division by zero"));
    assert_eq!(json["hint"], "Division by zero; check the divisor before dividing.");

    let chunks = serde_json::to_value(session.output().await).unwrap();
    assert_eq!(chunks[0]["stream"], "error");
    assert_eq!(chunks[1]["stream"], "hint");
}
