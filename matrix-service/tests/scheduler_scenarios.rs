// Scheduler Scenarios
// End-to-end runs through the public scheduler API

use async_trait::async_trait;
use matrix_service::context::CloseError;
use matrix_service::{
    Action, ActionContext, ActionError, ActionOutcome, ActionRegistry, ActionResult, ActionSpec, ActionStatus,
    Closeable, Connection, ConnectionRunningRule, ConnectionValidationRule, InMemoryConnectionRegistry, Matrix,
    MemorySink, ReadinessGate, RunVerdict, Scheduler, SchedulerConfig, SchedulerState, SimulatedConnection, Step,
    StepPolicy, StepStatus, Verdict, YamlMatrixSource,
};

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct Session {
    closes: Arc<AtomicUsize>,
}

impl Closeable for Session {
    fn close(&self) -> Result<(), CloseError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Opens the shared "session" resource, then holds the step for `hold`
struct OpenSession {
    created: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
    hold: Duration,
}

#[async_trait]
impl Action for OpenSession {
    async fn execute(&self, ctx: &mut ActionContext<'_>) -> Result<ActionOutcome, ActionError> {
        let created = self.created.clone();
        let closes = self.closes.clone();
        ctx.global
            .get_or_create_closeable("session", move || async move {
                created.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(Session { closes })
            })
            .await?;
        tokio::time::sleep(self.hold).await;
        Ok(ActionOutcome::Completed(ActionResult::passed("Session open")))
    }
}

struct Counters {
    created: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
}

fn registry_with_session(hold: Duration) -> (ActionRegistry, Counters) {
    let created = Arc::new(AtomicUsize::new(0));
    let closes = Arc::new(AtomicUsize::new(0));
    let mut registry = ActionRegistry::with_builtins();
    registry.register_shared(
        "OpenSession",
        Arc::new(OpenSession {
            created: created.clone(),
            closes: closes.clone(),
            hold,
        }),
    );
    (registry, Counters { created, closes })
}

fn fast_config() -> SchedulerConfig {
    SchedulerConfig::from_yaml(
        "recheck:\n  kind: fixed\n  interval_ms: 10\nrecheck_max_wait_ms: 2000\n",
        std::path::Path::new("inline"),
    )
    .unwrap()
}

async fn until<F: Fn() -> bool>(condition: F) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

const MANDATORY_FAILURE: &str = r#"
name: orders
steps:
  - name: Setup
    actions:
      - id: id1
        type: SetStatic
        params:
          Price: 10
  - name: Check
    actions:
      - id: id2
        type: CompareValues
        mandatory: true
        params:
          Expected.Price: 11
          Actual.Price: "@{id1.Price}"
  - name: Cleanup
    actions:
      - id: id3
        type: SetStatic
      - id: id4
        type: SetStatic
"#;

#[tokio::test]
async fn test_failed_mandatory_step_skips_later_steps() {
    let sink = Arc::new(MemorySink::new());
    let scheduler = Scheduler::new(ActionRegistry::with_builtins(), Arc::new(InMemoryConnectionRegistry::new()))
        .with_sink(sink.clone());
    scheduler
        .add_matrix(&YamlMatrixSource::from_str(MANDATORY_FAILURE))
        .unwrap();

    scheduler.start("tester").unwrap();
    let report = scheduler.wait().await.unwrap();

    assert_eq!(report.verdict, RunVerdict::Failed);
    let orders = report.matrix("orders").unwrap();
    assert_eq!(orders.verdict, Verdict::Failed);
    let statuses: Vec<StepStatus> = orders.steps.iter().map(|s| s.status).collect();
    assert_eq!(statuses, vec![StepStatus::Passed, StepStatus::Failed, StepStatus::Skipped]);
    assert_eq!(
        orders.steps[2].comment.as_deref(),
        Some("Skipped after failure of step 'Check'")
    );

    // Every declared action has exactly one result, skipped ones included
    let results = scheduler.get_results("orders").unwrap();
    assert_eq!(results.len(), 4);
    assert_eq!(orders.count(ActionStatus::Skipped), 2);

    assert_eq!(sink.reports().len(), 1);
}

#[tokio::test]
async fn test_matrix_continue_on_failure_runs_later_steps() {
    let matrix = Matrix::new("lenient")
        .with_continue_on_failure(true)
        .with_step(
            Step::new("Check").with_action(
                ActionSpec::new("cmp", "CompareValues")
                    .with_param("Expected.Qty", "1")
                    .with_param("Actual.Qty", "2")
                    .mandatory(),
            ),
        )
        .with_step(Step::new("After").with_action(ActionSpec::new("after", "SetStatic")));

    let scheduler = Scheduler::new(ActionRegistry::with_builtins(), Arc::new(InMemoryConnectionRegistry::new()));
    scheduler.add_matrix(&matrix).unwrap();
    scheduler.start("tester").unwrap();
    let report = scheduler.wait().await.unwrap();

    let lenient = report.matrix("lenient").unwrap();
    assert_eq!(lenient.verdict, Verdict::Failed);
    assert_eq!(lenient.steps[1].status, StepStatus::Passed);
}

#[tokio::test]
async fn test_second_start_is_rejected_while_running() {
    let (registry, _) = registry_with_session(Duration::from_millis(100));
    let scheduler = Arc::new(Scheduler::new(registry, Arc::new(InMemoryConnectionRegistry::new())));
    scheduler
        .add_matrix(&Matrix::new("slow").with_step(Step::new("S").with_action(ActionSpec::new("open", "OpenSession"))))
        .unwrap();

    let first = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.start("alice") })
    };
    let second = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.start("bob") })
    };
    let outcomes = [first.await.unwrap(), second.await.unwrap()];

    let rejected: Vec<_> = outcomes.iter().filter_map(|r| r.as_ref().err()).collect();
    assert_eq!(rejected.len(), 1);
    assert!(rejected[0].is_configuration());
    assert!(rejected[0].to_string().contains("already running"));

    let report = scheduler.wait().await.unwrap();
    assert_eq!(report.verdict, RunVerdict::Successful);
    assert_eq!(scheduler.state(), SchedulerState::Finished);
}

struct NoRouteRule;

impl ConnectionValidationRule for NoRouteRule {
    fn name(&self) -> &str {
        "route-configured"
    }

    fn is_applicable(&self, _connection: &dyn Connection) -> bool {
        true
    }

    fn check(&self, connection: &dyn Connection) -> Option<String> {
        match connection.setting("route") {
            Some(_) => None,
            None => Some(format!("Connection '{}' has no route", connection.name())),
        }
    }
}

#[tokio::test]
async fn test_gate_reports_only_violated_rules() {
    let rules: Vec<Arc<dyn ConnectionValidationRule>> =
        vec![Arc::new(ConnectionRunningRule::new()), Arc::new(NoRouteRule)];

    let running = SimulatedConnection::new("fix1", "FIX");
    let violations = ReadinessGate::violations(&running, &rules);
    assert_eq!(violations, vec!["Connection 'fix1' has no route".to_string()]);

    let connections = InMemoryConnectionRegistry::new().with(Arc::new(SimulatedConnection::new("fix1", "FIX").stopped()));
    let scheduler = Scheduler::new(ActionRegistry::with_builtins(), Arc::new(connections)).with_rules(rules);
    scheduler
        .add_matrix(&Matrix::new("m").with_step(
            Step::new("S").with_action(ActionSpec::new("send", "SendMessage").with_connection("fix1")),
        ))
        .unwrap();

    let err = scheduler.start("tester").unwrap_err();
    assert_eq!(
        err.problems(),
        &[
            "Connection 'fix1' is not running".to_string(),
            "Connection 'fix1' has no route".to_string(),
        ]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_shared_resource_is_created_once_across_matrices() {
    let (registry, counters) = registry_with_session(Duration::from_millis(5));
    let scheduler = Scheduler::new(registry, Arc::new(InMemoryConnectionRegistry::new()));
    for i in 0..6 {
        let matrix = Matrix::new(format!("m{}", i))
            .with_step(Step::new("S").with_action(ActionSpec::new("open", "OpenSession")));
        scheduler.add_matrix(&matrix).unwrap();
    }

    scheduler.start("tester").unwrap();
    let report = scheduler.wait().await.unwrap();

    assert_eq!(report.verdict, RunVerdict::Successful);
    assert_eq!(counters.created.load(Ordering::SeqCst), 1);
    assert_eq!(counters.closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_stop_twice_releases_once() {
    let (registry, counters) = registry_with_session(Duration::from_millis(150));
    let scheduler = Scheduler::new(registry, Arc::new(InMemoryConnectionRegistry::new()));
    scheduler
        .add_matrix(
            &Matrix::new("m")
                .with_step(Step::new("Open").with_action(ActionSpec::new("open", "OpenSession")))
                .with_step(Step::new("Later").with_action(ActionSpec::new("later", "SetStatic"))),
        )
        .unwrap();

    scheduler.start("tester").unwrap();
    until(|| counters.created.load(Ordering::SeqCst) == 1).await;

    scheduler.stop().unwrap();
    scheduler.stop().unwrap();
    assert_eq!(counters.closes.load(Ordering::SeqCst), 1);

    let report = scheduler.wait().await.unwrap();
    assert_eq!(report.verdict, RunVerdict::Interrupted);
    assert_eq!(scheduler.state(), SchedulerState::Interrupted);
    assert_eq!(counters.closes.load(Ordering::SeqCst), 1);

    let m = report.matrix("m").unwrap();
    assert_eq!(m.steps[1].status, StepStatus::Skipped);
}

#[tokio::test]
async fn test_stop_during_last_step_skips_actions_not_yet_started() {
    let sleep = |id: &str| ActionSpec::new(id, "Sleep").with_param("Duration", "100");
    let scheduler = Scheduler::new(ActionRegistry::with_builtins(), Arc::new(InMemoryConnectionRegistry::new()));
    scheduler
        .add_matrix(
            &Matrix::new("m").with_step(
                Step::new("Only")
                    .with_action(sleep("a1"))
                    .with_action(sleep("a2"))
                    .with_action(ActionSpec::new("a3", "SetStatic")),
            ),
        )
        .unwrap();

    scheduler.start("tester").unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    scheduler.stop().unwrap();

    let report = scheduler.wait().await.unwrap();
    let results = scheduler.get_results("m").unwrap();
    let statuses: Vec<ActionStatus> = results.iter().map(|r| r.status).collect();
    assert_eq!(
        statuses,
        vec![ActionStatus::Passed, ActionStatus::Skipped, ActionStatus::Skipped]
    );
    assert_eq!(report.verdict, RunVerdict::Interrupted);
    assert_eq!(report.matrix("m").unwrap().verdict, Verdict::Interrupted);
}

#[tokio::test]
async fn test_recheck_replaces_result_in_place() {
    let fix = Arc::new(SimulatedConnection::new("fix1", "FIX"));
    let connections = InMemoryConnectionRegistry::new().with(fix.clone());
    let scheduler = Scheduler::new(ActionRegistry::with_builtins(), Arc::new(connections)).with_config(fast_config());

    let wait_step = StepPolicy {
        wait_async: true,
        ..StepPolicy::default()
    };
    scheduler
        .add_matrix(
            &Matrix::new("fills").with_step(
                Step::new("Receive").with_policy(wait_step).with_action(
                    ActionSpec::new("recv", "ReceiveMessage")
                        .with_connection("fix1")
                        .with_param("Key.ClOrdID", "A1")
                        .with_param("Expected.Status", "Filled"),
                ),
            ),
        )
        .unwrap();

    scheduler.start("tester").unwrap();
    until(|| {
        scheduler
            .get_results("fills")
            .map(|r| r.iter().any(|a| a.status == ActionStatus::Pending))
            .unwrap_or(false)
    })
    .await;

    let message: BTreeMap<String, String> = [("ClOrdID", "A1"), ("Status", "Filled")]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    fix.deliver(message);

    let report = scheduler.wait().await.unwrap();
    assert_eq!(report.verdict, RunVerdict::Successful);

    let results = scheduler.get_results("fills").unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].status, ActionStatus::Passed);
    assert!(results[0].attempts > 1);
    assert_eq!(results[0].outputs.get("Status").map(String::as_str), Some("Filled"));
}

#[tokio::test]
async fn test_ask_for_continue_pauses_until_resumed() {
    let scheduler = Scheduler::new(ActionRegistry::with_builtins(), Arc::new(InMemoryConnectionRegistry::new()));
    let confirm = StepPolicy {
        ask_for_continue: true,
        ..StepPolicy::default()
    };
    scheduler
        .add_matrix(
            &Matrix::new("m")
                .with_step(Step::new("First").with_action(ActionSpec::new("a", "SetStatic")))
                .with_step(
                    Step::new("Second")
                        .with_policy(confirm)
                        .with_action(ActionSpec::new("b", "SetStatic")),
                ),
        )
        .unwrap();

    scheduler.start("tester").unwrap();
    until(|| scheduler.is_paused()).await;

    let results = scheduler.get_results("m").unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].action_id, "a");
    assert!(scheduler.is_running());

    assert!(scheduler.resume());
    let report = scheduler.wait().await.unwrap();
    assert_eq!(report.verdict, RunVerdict::Successful);
    assert_eq!(scheduler.get_results("m").unwrap().len(), 2);
}
