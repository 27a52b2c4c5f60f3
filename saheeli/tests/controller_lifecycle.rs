//! Host lifecycle tests: the controller drives scripted units end to end.
//!
//! Each test submits prompts, runs them through a [`ScriptedRuntime`], and
//! checks the terminal statuses together with the recorded runtime calls.

use std::fs;
use std::sync::Arc;
use std::thread;

use saheeli::controller::{OrchestrationController, TIMEOUT_EXIT_CODE};
use saheeli::core::types::TaskStatus;
use saheeli::test_support::{RuntimeCall, ScriptedRuntime, TestHost, UnitScript};

fn controller(
    host: &TestHost,
    scripts: Vec<UnitScript>,
) -> OrchestrationController<ScriptedRuntime> {
    OrchestrationController::new(ScriptedRuntime::new(scripts), host.config())
}

/// Classification table, end to end:
///
/// | exit | marker | status     |
/// |------|--------|------------|
/// | 0    | yes    | Complete   |
/// | 1    | yes    | Incomplete |
/// | 0    | no     | Incomplete |
/// | 1    | no     | Incomplete |
#[test]
fn classification_requires_clean_exit_and_marker() {
    let host = TestHost::new().expect("host");
    let controller = controller(
        &host,
        vec![
            UnitScript::marked(0),
            UnitScript::marked(1),
            UnitScript::exit(0),
            UnitScript::exit(1),
        ],
    );
    let ids: Vec<String> = ["a", "b", "c", "d"]
        .iter()
        .map(|name| {
            let prompt = host
                .prompt(&format!("{name}.md"), "work")
                .expect("prompt");
            controller.submit(prompt)
        })
        .collect();

    let outcomes = controller.drain();
    let statuses: Vec<TaskStatus> = outcomes.iter().map(|o| o.status).collect();
    assert_eq!(
        statuses,
        vec![
            TaskStatus::Complete,
            TaskStatus::Incomplete,
            TaskStatus::Incomplete,
            TaskStatus::Incomplete,
        ]
    );
    let launched: Vec<&str> = outcomes.iter().map(|o| o.task_id.as_str()).collect();
    assert_eq!(launched, ids.iter().map(String::as_str).collect::<Vec<_>>());
    assert!(outcomes[1].marker_present);
    assert_eq!(outcomes[1].exit_code, Some(1));

    let snapshot = controller.status();
    assert!(snapshot.iter().all(|task| task.status.is_terminal()));
}

#[test]
fn unit_calls_run_in_lifecycle_order() {
    let host = TestHost::new().expect("host");
    let controller = controller(&host, vec![UnitScript::marked(0)]);
    let prompt = host.prompt("a.md", "work").expect("prompt");
    let id = controller.submit(&prompt);

    controller.launch_next().expect("outcome");

    let runtime = controller.orchestrator().runtime();
    assert_eq!(runtime.call_kinds(), vec!["run", "wait", "export", "remove"]);
    match &runtime.calls()[0] {
        RuntimeCall::Run(spec) => {
            assert!(spec.env.iter().any(|(name, value)| name == "TASK_ID" && value == &id));
        }
        other => panic!("expected run, got {other:?}"),
    }
    assert!(
        host.results_dir()
            .join(&id)
            .join("workspace.tar")
            .exists()
    );
}

#[test]
fn marker_is_read_before_workspace_copy() {
    let host = TestHost::new().expect("host");
    let late_marker = UnitScript {
        marker_on_export: true,
        ..UnitScript::exit(0)
    };
    let controller = controller(&host, vec![late_marker]);
    let prompt = host.prompt("a.md", "work").expect("prompt");
    let id = controller.submit(&prompt);

    let outcome = controller.launch_next().expect("outcome");

    // The marker only appeared during the copy, so it must not count.
    assert!(!outcome.marker_present);
    assert_eq!(outcome.status, TaskStatus::Incomplete);
    assert!(host.results_dir().join(&id).join("complete.json").exists());
}

#[test]
fn timeout_is_incomplete_and_controller_keeps_serving() {
    let host = TestHost::new().expect("host");
    let controller = controller(&host, vec![UnitScript::timeout(), UnitScript::marked(0)]);
    let first = controller.submit(host.prompt("slow.md", "work").expect("prompt"));
    let second = controller.submit(host.prompt("fast.md", "work").expect("prompt"));

    let timed_out = controller.launch_next().expect("first outcome");
    assert_eq!(timed_out.task_id, first);
    assert_eq!(timed_out.exit_code, Some(TIMEOUT_EXIT_CODE));
    assert_eq!(timed_out.status, TaskStatus::Incomplete);

    let finished = controller.launch_next().expect("second outcome");
    assert_eq!(finished.task_id, second);
    assert_eq!(finished.status, TaskStatus::Complete);

    // Cleanup still ran for the timed-out unit.
    assert_eq!(
        controller.orchestrator().runtime().call_kinds(),
        vec![
            "run", "wait", "export", "remove", "run", "wait", "export", "remove"
        ]
    );
    assert!(controller.launch_next().is_none());
}

#[test]
fn removal_failure_does_not_change_classification() {
    let host = TestHost::new().expect("host");
    let runtime = ScriptedRuntime::new(vec![UnitScript::marked(0)]);
    runtime.fail_removals("daemon unavailable");
    let controller = OrchestrationController::new(runtime, host.config());
    controller.submit(host.prompt("a.md", "work").expect("prompt"));

    let outcome = controller.launch_next().expect("outcome");
    assert_eq!(outcome.status, TaskStatus::Complete);
}

#[test]
fn workspace_directory_is_reused_when_present() {
    let host = TestHost::new().expect("host");
    let controller = controller(&host, vec![UnitScript::marked(0)]);
    let id = controller.submit(host.prompt("a.md", "work").expect("prompt"));

    let workspace = controller.workspace_dir(&id);
    fs::create_dir_all(&workspace).expect("mkdir");
    fs::write(workspace.join("notes.txt"), "keep").expect("write");

    let outcome = controller.launch_next().expect("outcome");
    assert_eq!(outcome.status, TaskStatus::Complete);
    assert_eq!(
        fs::read_to_string(workspace.join("notes.txt")).expect("read"),
        "keep"
    );
}

#[test]
fn concurrent_launches_run_each_task_once() {
    let host = TestHost::new().expect("host");
    let controller = Arc::new(controller(&host, Vec::new()));
    for i in 0..6 {
        controller.submit(host.prompt(&format!("{i}.md"), "work").expect("prompt"));
    }

    let workers: Vec<_> = (0..3)
        .map(|_| {
            let controller = Arc::clone(&controller);
            thread::spawn(move || controller.drain())
        })
        .collect();
    let mut launched: Vec<String> = workers
        .into_iter()
        .flat_map(|worker| worker.join().expect("join"))
        .map(|outcome| outcome.task_id)
        .collect();
    assert_eq!(launched.len(), 6);
    let runs = controller
        .orchestrator()
        .runtime()
        .call_kinds()
        .into_iter()
        .filter(|kind| *kind == "run")
        .count();
    assert_eq!(runs, 6);

    launched.sort();
    launched.dedup();
    assert_eq!(launched.len(), 6);
    assert!(
        controller
            .status()
            .iter()
            .all(|task| task.status == TaskStatus::Incomplete)
    );
}

#[test]
fn build_uses_configured_context_and_tag() {
    let host = TestHost::new().expect("host");
    let controller = controller(&host, Vec::new());
    controller.build_servo_image().expect("build");

    assert_eq!(
        controller.orchestrator().runtime().calls(),
        vec![RuntimeCall::Build {
            context: ".".into(),
            tag: "saheeli-servo:latest".to_string(),
        }]
    );
}
