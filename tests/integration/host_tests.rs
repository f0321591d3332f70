//! Execution host and runtime loader driven directly, without a session

use crate::common::*;
use assert_matches::assert_matches;
use futures::future::join_all;
use pyrunner_sandbox::{
    ExecutionHost, FaultKind, HostEvent, HostHandle, OutputSink, Package, PackageCatalog,
    PackageLoad, RunRequest, RunResult, RuntimeLoader, SandboxConfig,
};
use std::sync::Arc;

async fn next(host: &mut HostHandle) -> HostEvent {
    tokio::time::timeout(PROMPT, host.next_event())
        .await
        .expect("host event in time")
        .expect("host alive")
}

#[tokio::test]
async fn test_preload_happens_during_initialize() {
    let runtime = ScriptedRuntime::new();
    let stats = runtime.stats();
    let config = SandboxConfig {
        preload: vec!["numpy".into(), "sklearn".into()],
        ..test_config()
    };
    let mut host = ExecutionHost::spawn(shared(&runtime), &config);
    host.initialize();

    assert_eq!(
        next(&mut host).await,
        HostEvent::Status {
            message: "loading numpy…".into()
        }
    );
    assert_eq!(
        next(&mut host).await,
        HostEvent::Status {
            message: "numpy ready".into()
        }
    );
    assert_eq!(
        next(&mut host).await,
        HostEvent::Status {
            message: "loading scikit-learn…".into()
        }
    );
    assert_eq!(
        next(&mut host).await,
        HostEvent::Status {
            message: "scikit-learn ready".into()
        }
    );
    assert_eq!(next(&mut host).await, HostEvent::Ready);

    // Preloaded packages are not loaded again by a run
    host.run(RunRequest::new(
        "import numpy as np\n'ok'",
        &config.catalog(),
    ));
    assert_matches!(
        next(&mut host).await,
        HostEvent::Finished { result: RunResult::Value { text }, .. } if text == "ok"
    );
    assert_eq!(stats.package_loads(), 2);
}

#[tokio::test]
async fn test_events_keep_emission_order() {
    let runtime = ScriptedRuntime::new();
    let mut host = ExecutionHost::spawn(shared(&runtime), &test_config());
    host.initialize();
    assert_eq!(next(&mut host).await, HostEvent::Ready);

    let request = RunRequest::new(
        "print('a')\nsys.stderr.write('b')\nprint('c')\n'done'",
        &PackageCatalog::default(),
    );
    let run_id = request.id;
    host.run(request);

    assert_eq!(next(&mut host).await, HostEvent::Output(RunResult::stdout("a\n")));
    assert_eq!(next(&mut host).await, HostEvent::Output(RunResult::stderr("b")));
    assert_eq!(next(&mut host).await, HostEvent::Output(RunResult::stdout("c\n")));
    assert_matches!(
        next(&mut host).await,
        HostEvent::Finished { run_id: id, result: RunResult::Value { text }, .. }
            if id == run_id && text == "done"
    );
}

#[tokio::test]
async fn test_unavailable_package_reports_fault_and_run_continues() {
    let runtime = ScriptedRuntime::new().with_unavailable("matplotlib");
    let mut host = ExecutionHost::spawn(shared(&runtime), &test_config());
    host.initialize();
    assert_eq!(next(&mut host).await, HostEvent::Ready);

    host.run(RunRequest::new(
        "import matplotlib.pyplot as plt\nprint('still running')",
        &PackageCatalog::default(),
    ));

    assert_eq!(
        next(&mut host).await,
        HostEvent::Status {
            message: "loading matplotlib…".into()
        }
    );
    assert_eq!(
        next(&mut host).await,
        HostEvent::Status {
            message: "matplotlib failed to load".into()
        }
    );
    assert_matches!(
        next(&mut host).await,
        HostEvent::Fault { kind: FaultKind::Package, message } if message.contains("matplotlib")
    );
    assert_eq!(
        next(&mut host).await,
        HostEvent::Output(RunResult::stdout("still running\n"))
    );
    assert_matches!(next(&mut host).await, HostEvent::Finished { .. });
}

#[tokio::test]
async fn test_terminated_host_drops_its_interpreter() {
    let runtime = ScriptedRuntime::new();
    let stats = runtime.stats();
    let mut host = ExecutionHost::spawn(shared(&runtime), &test_config());
    host.initialize();
    assert_eq!(next(&mut host).await, HostEvent::Ready);
    assert_eq!(stats.live(), 1);

    host.run(RunRequest::new("while True:\n    pass", &PackageCatalog::empty()));
    host.terminate();

    eventually(|| stats.live() == 0, PROMPT).await;
    assert!(host.is_terminated());
}

#[tokio::test]
async fn test_concurrent_loader_callers_share_one_interpreter() {
    let runtime = ScriptedRuntime::new().with_load_delay(std::time::Duration::from_millis(50));
    let stats = runtime.stats();
    let (sink, _events) = OutputSink::channel();
    let loader = Arc::new(RuntimeLoader::new(shared(&runtime), sink));

    let results = join_all((0..8).map(|_| {
        let loader = loader.clone();
        async move { loader.load_core().await.is_ok() }
    }))
    .await;

    assert!(results.into_iter().all(|ok| ok));
    assert_eq!(stats.loads(), 1);

    let pandas = Package::new("pandas", "pandas");
    let loads = join_all((0..4).map(|_| loader.load_package(&pandas))).await;
    let fresh = loads
        .into_iter()
        .filter(|load| matches!(load, Ok(PackageLoad::Loaded)))
        .count();
    assert_eq!(fresh, 1);
    assert_eq!(stats.package_loads(), 1);
}
