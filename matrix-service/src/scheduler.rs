// Scheduler
// Loads matrices, runs pre-flight checks and drives every matrix of a run to completion

use crate::action::{params, ActionRegistry, ActionRunner, RecheckPolicy};
use crate::compare::{ComparisonService, FieldComparator};
use crate::config::SchedulerConfig;
use crate::connectivity::{ConnectionRegistry, ConnectionRunningRule, ConnectionValidationRule, ReadinessGate};
use crate::context::GlobalContext;
use crate::error::{ServiceError, ServiceResult};
use crate::execution::{EventSender, ExecutionEvent, MatrixExecutor, MatrixResultLog, ProgressSender, RunControl};
use crate::model::{ActionResult, Matrix, MatrixReport, MatrixState, RunReport, RunVerdict, StepOutcome, TeardownFailure};
use crate::parser::MatrixSource;
use crate::report::{JsonFileSink, ReportSink};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::{watch, Semaphore};

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Lifecycle of a scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SchedulerState {
    Idle,
    /// Pre-flight checks are running
    Starting,
    Running,
    Finished,
    Interrupted,
    /// Pre-flight checks failed; see `last_error`
    Failed,
}

/// A matrix registered with the scheduler
#[derive(Clone)]
struct Loaded {
    matrix: Arc<Matrix>,
    log: Arc<MatrixResultLog>,
    state: Arc<RwLock<MatrixState>>,
}

type ReportWatch = watch::Receiver<Option<Arc<RunReport>>>;

/// Mutable scheduler state, guarded by one lock and never held across an await
struct RunSlot {
    state: SchedulerState,
    matrices: Vec<Loaded>,
    control: Option<RunControl>,
    global: Option<Arc<GlobalContext>>,
    done: Option<ReportWatch>,
    report: Option<Arc<RunReport>>,
    teardown: Vec<TeardownFailure>,
    last_error: Option<String>,
}

impl Default for RunSlot {
    fn default() -> Self {
        Self {
            state: SchedulerState::Idle,
            matrices: Vec::new(),
            control: None,
            global: None,
            done: None,
            report: None,
            teardown: Vec::new(),
            last_error: None,
        }
    }
}

/// Top-level controller for loading and running matrices
pub struct Scheduler {
    config: SchedulerConfig,
    registry: Arc<ActionRegistry>,
    connections: Arc<dyn ConnectionRegistry>,
    rules: Vec<Arc<dyn ConnectionValidationRule>>,
    comparison: Arc<dyn ComparisonService>,
    sinks: Vec<Arc<dyn ReportSink>>,
    event_tx: Option<ProgressSender>,
    shared: Arc<Mutex<RunSlot>>,
}

impl Scheduler {
    pub fn new(registry: ActionRegistry, connections: Arc<dyn ConnectionRegistry>) -> Self {
        Self {
            config: SchedulerConfig::default(),
            registry: Arc::new(registry),
            connections,
            rules: vec![Arc::new(ConnectionRunningRule::new())],
            comparison: Arc::new(FieldComparator::new()),
            sinks: Vec::new(),
            event_tx: None,
            shared: Arc::new(Mutex::new(RunSlot::default())),
        }
    }

    /// Apply settings; a configured report directory adds a JSON file sink
    pub fn with_config(mut self, config: SchedulerConfig) -> Self {
        if let Some(dir) = &config.report_dir {
            self.sinks.push(Arc::new(JsonFileSink::new(dir.clone())));
        }
        self.config = config;
        self
    }

    pub fn with_rule(mut self, rule: Arc<dyn ConnectionValidationRule>) -> Self {
        self.rules.push(rule);
        self
    }

    /// Replace the readiness rules, including the default running check
    pub fn with_rules(mut self, rules: Vec<Arc<dyn ConnectionValidationRule>>) -> Self {
        self.rules = rules;
        self
    }

    pub fn with_comparison(mut self, comparison: Arc<dyn ComparisonService>) -> Self {
        self.comparison = comparison;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn ReportSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn with_progress(mut self, tx: ProgressSender) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Load, validate and register a matrix. Returns its name.
    pub fn add_matrix(&self, source: &dyn MatrixSource) -> ServiceResult<String> {
        let matrix = source.load().map_err(|e| {
            tracing::warn!(origin = %source.origin(), error = %e.summary(), "Matrix failed to load");
            ServiceError::from(e)
        })?;

        let unknown: BTreeSet<&str> = matrix
            .actions()
            .map(|(_, action)| action.action_type.as_str())
            .filter(|action_type| !self.registry.contains(action_type))
            .collect();
        if !unknown.is_empty() {
            return Err(ServiceError::Load(
                unknown
                    .into_iter()
                    .map(|t| format!("matrix '{}': unknown action type '{}'", matrix.name, t))
                    .collect(),
            ));
        }

        let mut slot = self.shared.lock();
        if matches!(slot.state, SchedulerState::Starting | SchedulerState::Running) {
            return Err(ServiceError::configuration(format!(
                "Cannot add matrix '{}' while the scheduler is running",
                matrix.name
            )));
        }
        if slot.matrices.iter().any(|l| l.matrix.name == matrix.name) {
            return Err(ServiceError::load(format!("matrix '{}' is already loaded", matrix.name)));
        }

        let name = matrix.name.clone();
        tracing::info!(matrix = %name, actions = matrix.action_count(), "Matrix loaded");
        slot.matrices.push(Loaded {
            matrix: Arc::new(matrix),
            log: Arc::new(MatrixResultLog::new()),
            state: Arc::new(RwLock::new(MatrixState::NotStarted)),
        });
        Ok(name)
    }

    pub fn matrix_names(&self) -> Vec<String> {
        self.shared
            .lock()
            .matrices
            .iter()
            .map(|l| l.matrix.name.clone())
            .collect()
    }

    /// Check every loaded matrix and connection, then spawn one task per matrix.
    ///
    /// Fails with a configuration error listing every problem when parameters
    /// are missing or a referenced connection is not ready.
    pub fn start(&self, user: &str) -> ServiceResult<()> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| ServiceError::configuration("Scheduler must be started inside a tokio runtime"))?;

        let loaded: Vec<Loaded> = {
            let mut slot = self.shared.lock();
            match slot.state {
                SchedulerState::Idle => {}
                SchedulerState::Starting | SchedulerState::Running => {
                    return Err(ServiceError::configuration("Scheduler is already running"));
                }
                other => {
                    return Err(ServiceError::configuration(format!(
                        "Scheduler is {:?}; reset it before starting again",
                        other
                    )));
                }
            }
            slot.state = SchedulerState::Starting;
            slot.last_error = None;
            slot.matrices.clone()
        };

        let problems = self.preflight(&loaded);
        if !problems.is_empty() {
            let err = ServiceError::Configuration(problems);
            tracing::warn!(user, error = %err, "Scheduler pre-flight failed");
            let mut slot = self.shared.lock();
            slot.state = SchedulerState::Failed;
            slot.last_error = Some(err.to_string());
            return Err(err);
        }

        let global = Arc::new(GlobalContext::new(user));
        let control = RunControl::new();
        for l in &loaded {
            l.log.clear();
            *l.state.write() = MatrixState::NotStarted;
        }

        let mut runner = ActionRunner::new(
            self.registry.clone(),
            self.connections.clone(),
            global.clone(),
            self.comparison.clone(),
        )
        .with_default_timeout(self.config.default_action_timeout());
        if let Some(tx) = &self.event_tx {
            runner = runner.with_progress(tx.clone());
        }

        let (done_tx, done_rx) = watch::channel(None);
        {
            let mut slot = self.shared.lock();
            slot.state = SchedulerState::Running;
            slot.control = Some(control.clone());
            slot.global = Some(global.clone());
            slot.done = Some(done_rx);
            slot.report = None;
            slot.teardown.clear();
        }

        self.event_tx.send_event(ExecutionEvent::SchedulerStarted {
            user: user.to_string(),
            matrices: loaded.iter().map(|l| l.matrix.name.clone()).collect(),
        });
        tracing::info!(user, matrices = loaded.len(), "Scheduler started");

        let run = Run {
            user: user.to_string(),
            started_at: Utc::now(),
            loaded,
            runner: Arc::new(runner),
            control,
            global,
            max_parallel: self.config.max_parallel_matrices,
            recheck: self.config.recheck.clone(),
            max_wait: self.config.recheck_max_wait(),
            sinks: self.sinks.clone(),
            event_tx: self.event_tx.clone(),
            shared: self.shared.clone(),
            done: done_tx,
        };
        runtime.spawn(run.supervise());
        Ok(())
    }

    /// Missing required parameters and readiness violations across all matrices
    fn preflight(&self, loaded: &[Loaded]) -> Vec<String> {
        let mut problems = Vec::new();
        if loaded.is_empty() {
            problems.push("No matrices loaded".to_string());
        }

        let mut connection_names = BTreeSet::new();
        for l in loaded {
            let matrix = &l.matrix;
            connection_names.extend(matrix.connection_names());
            for (step, action) in matrix.actions() {
                if !step.policy.execute || !action.executable {
                    continue;
                }
                let Some(instance) = self.registry.create(action) else {
                    continue;
                };
                for name in params::missing_required(action, &instance.parameters()) {
                    problems.push(format!(
                        "matrix '{}', action '{}' ({}): required parameter '{}' is missing",
                        matrix.name, action.id, action.action_type, name
                    ));
                }
            }
        }

        for name in &connection_names {
            match self.connections.get(name) {
                None => problems.push(format!("Connection '{}' is not defined", name)),
                Some(connection) => problems.extend(ReadinessGate::violations(connection.as_ref(), &self.rules)),
            }
        }
        problems
    }

    /// Signal every matrix to stop before its next action, then release global resources.
    ///
    /// Actions already running finish first; everything not yet started is Skipped.
    pub fn stop(&self) -> ServiceResult<()> {
        self.halt("Stopping scheduler")
    }

    /// Same signal as [`Scheduler::stop`], raised on behalf of the user (Ctrl-C, UI)
    pub fn interrupt(&self) -> ServiceResult<()> {
        self.halt("Interrupting scheduler")
    }

    fn halt(&self, message: &str) -> ServiceResult<()> {
        let (control, global) = {
            let slot = self.shared.lock();
            (slot.control.clone(), slot.global.clone())
        };
        let Some(control) = control else {
            return Ok(());
        };

        tracing::info!("{}", message);
        control.stop();

        let failures = global.map(|g| g.release_all()).unwrap_or_default();
        if failures.is_empty() {
            return Ok(());
        }
        self.shared.lock().teardown.extend(failures.iter().cloned());
        Err(ServiceError::Teardown(failures))
    }

    /// Wait for the current run and return its report
    pub async fn wait(&self) -> ServiceResult<RunReport> {
        let mut rx = {
            let slot = self.shared.lock();
            if let Some(report) = &slot.report {
                return Ok(report.as_ref().clone());
            }
            match (&slot.done, &slot.last_error) {
                (Some(rx), _) => rx.clone(),
                (None, Some(error)) => return Err(ServiceError::configuration(error.clone())),
                (None, None) => return Err(ServiceError::configuration("Scheduler has not been started")),
            }
        };

        loop {
            let current = rx.borrow_and_update().clone();
            if let Some(report) = current {
                return Ok(report.as_ref().clone());
            }
            if rx.changed().await.is_err() {
                let last = rx.borrow().clone();
                return last
                    .map(|report| report.as_ref().clone())
                    .ok_or_else(|| ServiceError::configuration("Scheduler run ended without a report"));
            }
        }
    }

    /// Whether any matrix of the current run may still be executing
    pub fn is_running(&self) -> bool {
        matches!(
            self.shared.lock().state,
            SchedulerState::Starting | SchedulerState::Running
        )
    }

    pub fn state(&self) -> SchedulerState {
        self.shared.lock().state
    }

    pub fn last_error(&self) -> Option<String> {
        self.shared.lock().last_error.clone()
    }

    /// Results recorded so far for one matrix, in execution order
    pub fn get_results(&self, matrix: &str) -> Option<Vec<ActionResult>> {
        self.shared
            .lock()
            .matrices
            .iter()
            .find(|l| l.matrix.name == matrix)
            .map(|l| l.log.snapshot())
    }

    pub fn matrix_state(&self, matrix: &str) -> Option<MatrixState> {
        self.shared
            .lock()
            .matrices
            .iter()
            .find(|l| l.matrix.name == matrix)
            .map(|l| *l.state.read())
    }

    /// Report of the last completed run
    pub fn report(&self) -> Option<RunReport> {
        self.shared.lock().report.as_ref().map(|r| r.as_ref().clone())
    }

    /// Run-scoped context of the current run
    pub fn global_context(&self) -> Option<Arc<GlobalContext>> {
        self.shared.lock().global.clone()
    }

    /// Pause every matrix at its next action boundary
    pub fn pause(&self) -> bool {
        match self.shared.lock().control.clone() {
            Some(control) => {
                control.pause("Paused by user");
                true
            }
            None => false,
        }
    }

    pub fn resume(&self) -> bool {
        match self.shared.lock().control.clone() {
            Some(control) => {
                control.resume();
                true
            }
            None => false,
        }
    }

    pub fn is_paused(&self) -> bool {
        self.shared
            .lock()
            .control
            .as_ref()
            .map(RunControl::is_paused)
            .unwrap_or(false)
    }

    /// Return a finished or failed scheduler to Idle; loaded matrices are kept
    pub fn reset(&self) -> ServiceResult<()> {
        let mut slot = self.shared.lock();
        if matches!(slot.state, SchedulerState::Starting | SchedulerState::Running) {
            return Err(ServiceError::configuration("Cannot reset a running scheduler"));
        }
        slot.state = SchedulerState::Idle;
        slot.last_error = None;
        slot.report = None;
        slot.done = None;
        slot.control = None;
        slot.global = None;
        slot.teardown.clear();
        Ok(())
    }
}

/// Everything the background supervisor of one run owns
struct Run {
    user: String,
    started_at: DateTime<Utc>,
    loaded: Vec<Loaded>,
    runner: Arc<ActionRunner>,
    control: RunControl,
    global: Arc<GlobalContext>,
    max_parallel: usize,
    recheck: RecheckPolicy,
    max_wait: Duration,
    sinks: Vec<Arc<dyn ReportSink>>,
    event_tx: Option<ProgressSender>,
    shared: Arc<Mutex<RunSlot>>,
    done: watch::Sender<Option<Arc<RunReport>>>,
}

impl Run {
    async fn supervise(self) {
        let started = Instant::now();
        let permits = (self.max_parallel > 0).then(|| Arc::new(Semaphore::new(self.max_parallel)));

        let handles: Vec<_> = self
            .loaded
            .iter()
            .map(|l| {
                let mut executor = MatrixExecutor::new(
                    l.matrix.clone(),
                    self.runner.clone(),
                    self.control.clone(),
                    l.log.clone(),
                )
                .with_recheck(self.recheck.clone(), self.max_wait)
                .with_state(l.state.clone());
                if let Some(tx) = &self.event_tx {
                    executor = executor.with_progress(tx.clone());
                }
                let permits = permits.clone();
                let sinks = self.sinks.clone();

                tokio::spawn(async move {
                    let _permit = match permits {
                        Some(semaphore) => semaphore.acquire_owned().await.ok(),
                        None => None,
                    };
                    let report = executor.execute().await;
                    for sink in &sinks {
                        if let Err(e) = sink.publish(&report) {
                            tracing::warn!(matrix = %report.name, error = %e, "Report sink failed");
                        }
                    }
                    report
                })
            })
            .collect();

        let mut reports = Vec::with_capacity(handles.len());
        for (handle, l) in handles.into_iter().zip(&self.loaded) {
            match handle.await {
                Ok(report) => reports.push(report),
                Err(e) => {
                    tracing::error!(matrix = %l.matrix.name, error = %e, "Matrix task failed");
                    *l.state.write() = MatrixState::Interrupted;
                    let steps = l
                        .matrix
                        .steps
                        .iter()
                        .map(|s| StepOutcome::from_results(&s.name, l.log.for_step(&s.name), Duration::ZERO))
                        .collect();
                    reports.push(MatrixReport::new(
                        &l.matrix.name,
                        MatrixState::Interrupted,
                        steps,
                        started.elapsed(),
                    ));
                }
            }
        }

        // No-op when stop or interrupt already released everything
        let released = self.global.release_all();

        let mut report = RunReport::new(&self.user, reports, self.started_at, false);
        let report = {
            let mut slot = self.shared.lock();
            let mut failures = std::mem::take(&mut slot.teardown);
            failures.extend(released);
            report.teardown_failures = failures;

            slot.state = match report.verdict {
                RunVerdict::Interrupted => SchedulerState::Interrupted,
                _ => SchedulerState::Finished,
            };
            slot.control = None;
            slot.global = None;
            let report = Arc::new(report);
            slot.report = Some(report.clone());
            report
        };

        self.event_tx.send_event(ExecutionEvent::SchedulerCompleted {
            verdict: report.verdict,
            duration: started.elapsed(),
        });
        tracing::info!(verdict = %report.verdict, "Scheduler finished");
        self.done.send_replace(Some(report));
    }
}
