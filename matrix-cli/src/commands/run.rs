use crate::commands::connections::ConnectionsFile;
use crate::output;

use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use color_eyre::eyre::eyre;
use color_eyre::Result;

use matrix_service::execution::LogLevel;
use matrix_service::{
    progress_channel, ActionRegistry, ActionStatus, ConnectionRegistry, ConnectionRunningRule,
    ConnectionValidationRule, ExecutionEvent, InMemoryConnectionRegistry, ReportFormat, RunReporter, RunVerdict,
    Scheduler, SchedulerConfig, StepStatus, YamlMatrixSource,
};

/// Run one or more matrices
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Matrix YAML files
    #[arg(required = true)]
    pub matrices: Vec<PathBuf>,

    /// Connections file declaring simulated connections
    #[arg(long, value_name = "FILE")]
    pub connections: Option<PathBuf>,

    /// User recorded in the run report
    #[arg(long, short = 'u', default_value = "local")]
    pub user: String,

    /// Report format: terminal, junit, tap, json
    #[arg(long, short = 'o', default_value = "terminal")]
    pub output: String,

    /// Directory for per-matrix JSON reports
    #[arg(long, value_name = "DIR")]
    pub report_dir: Option<PathBuf>,

    /// Matrices running at the same time (0 = all)
    #[arg(long, value_name = "N")]
    pub max_parallel: Option<usize>,

    /// Continue past ask-for-continue steps without prompting
    #[arg(long, short = 'y')]
    pub yes: bool,
}

pub async fn execute(args: RunArgs, mut config: SchedulerConfig) -> Result<()> {
    let format: ReportFormat = args.output.parse().map_err(|e: String| eyre!("{}", e))?;

    if let Some(dir) = &args.report_dir {
        config.report_dir = Some(dir.clone());
    }
    if let Some(n) = args.max_parallel {
        config.max_parallel_matrices = n;
    }

    let (registry, rules) = match &args.connections {
        Some(path) => {
            let file = ConnectionsFile::load(path)?;
            let registry = file.registry();
            let mut rules: Vec<Arc<dyn ConnectionValidationRule>> = vec![Arc::new(ConnectionRunningRule::new())];
            for rule in file.exclusive_rules(&registry) {
                rules.push(Arc::new(rule));
            }
            output::info(&format!("{} connection(s) declared", registry.len()));
            (registry, rules)
        }
        None => (
            Arc::new(InMemoryConnectionRegistry::new()),
            vec![Arc::new(ConnectionRunningRule::new()) as Arc<dyn ConnectionValidationRule>],
        ),
    };
    let connections: Arc<dyn ConnectionRegistry> = registry;

    let (tx, mut rx) = progress_channel();
    let scheduler = Arc::new(
        Scheduler::new(ActionRegistry::with_builtins(), connections)
            .with_config(config)
            .with_rules(rules)
            .with_progress(tx),
    );

    let mut load_failed = false;
    for path in &args.matrices {
        output::status("Loading", &format!("{}", path.display()));
        match scheduler.add_matrix(&YamlMatrixSource::from_file(path)) {
            Ok(name) => output::check(&format!("Matrix '{}'", name)),
            Err(e) => {
                load_failed = true;
                output::error(&format!("{}", path.display()));
                for problem in e.problems() {
                    output::error(&format!("  - {}", problem));
                }
            }
        }
    }
    if load_failed {
        std::process::exit(1);
    }

    if let Err(e) = scheduler.start(&args.user) {
        output::error("Scheduler could not start:");
        for problem in e.problems() {
            output::error(&format!("  - {}", problem));
        }
        std::process::exit(1);
    }

    {
        let scheduler = scheduler.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                output::warning("Interrupt requested, finishing current actions");
                if let Err(e) = scheduler.interrupt() {
                    output::error(&format!("{}", e));
                }
            }
        });
    }

    // The scheduler keeps its sender, so stop reading once the run has completed
    while let Some(event) = rx.recv().await {
        let done = matches!(event, ExecutionEvent::SchedulerCompleted { .. });
        print_event(&event, &scheduler, args.yes);
        if done {
            break;
        }
    }

    let report = scheduler.wait().await?;
    let rendered = RunReporter::report(&report, format)?;
    print!("{}", rendered);

    for failure in &report.teardown_failures {
        output::warning(&format!("Failed to release {}", failure));
    }

    if report.verdict != RunVerdict::Successful {
        std::process::exit(1);
    }
    Ok(())
}

fn print_event(event: &ExecutionEvent, scheduler: &Arc<Scheduler>, auto_continue: bool) {
    match event {
        ExecutionEvent::SchedulerStarted { user, matrices } => {
            println!();
            output::header(&format!("Running {} matrix(es) as '{}'", matrices.len(), user));
        }

        ExecutionEvent::SchedulerCompleted { verdict, duration } => {
            println!();
            let message = format!("Run {} in {:.2}s", verdict, duration.as_secs_f64());
            if *verdict == RunVerdict::Successful {
                output::success(&message);
            } else {
                output::failure(&message);
            }
        }

        ExecutionEvent::MatrixStarted {
            matrix,
            total_steps,
            total_actions,
        } => {
            output::matrix_header(matrix, *total_steps, *total_actions);
        }

        ExecutionEvent::MatrixCompleted {
            matrix,
            verdict,
            duration,
        } => {
            output::dim(&format!(
                "  Matrix '{}' {:?} ({:.2}s)",
                matrix,
                verdict,
                duration.as_secs_f64()
            ));
        }

        ExecutionEvent::StepStarted {
            matrix,
            step,
            step_index,
            ..
        } => {
            println!("    [{}] Step {} '{}'", matrix, step_index + 1, step);
        }

        ExecutionEvent::StepCompleted {
            step,
            status,
            duration,
            ..
        } => {
            let line = format!("    Step '{}' {:?} ({:.2}s)", step, status, duration.as_secs_f64());
            match status {
                StepStatus::Passed => output::dim_success(&line),
                StepStatus::Failed => output::dim_failure(&line),
                StepStatus::Skipped => output::dim(&line),
            }
        }

        ExecutionEvent::StepSkipped { step, reason, .. } => {
            output::warning(&format!("    Step '{}' skipped: {}", step, reason));
        }

        ExecutionEvent::ActionStarted {
            action_id,
            action_type,
            ..
        } => {
            output::dim(&format!("      {} ({})", action_id, action_type));
        }

        ExecutionEvent::ActionCompleted {
            action_id,
            status,
            comment,
            duration,
            ..
        } => {
            let line = format!(
                "      {} {} ({}ms) {}",
                action_id,
                status,
                duration.as_millis(),
                comment
            );
            if *status == ActionStatus::Failed {
                output::action_failure(&line);
            } else {
                output::action_line(&line);
            }
        }

        ExecutionEvent::ActionPending { action_id, .. } => {
            output::dim(&format!("      {} waiting for update", action_id));
        }

        ExecutionEvent::ActionSkipped { action_id, reason, .. } => {
            output::dim(&format!("      {} skipped: {}", action_id, reason));
        }

        ExecutionEvent::Paused { matrix, reason } => {
            output::warning(&format!("[{}] {}", matrix, reason));
            let scheduler = scheduler.clone();
            if auto_continue {
                scheduler.resume();
            } else {
                tokio::task::spawn_blocking(move || {
                    eprintln!("        Press Enter to continue");
                    let mut line = String::new();
                    let _ = std::io::stdin().lock().read_line(&mut line);
                    scheduler.resume();
                });
            }
        }

        ExecutionEvent::Resumed { matrix } => {
            output::dim(&format!("  [{}] resumed", matrix));
        }

        ExecutionEvent::Log { level, message, .. } => match level {
            LogLevel::Error => output::error(message),
            LogLevel::Warning => output::warning(message),
            _ => output::dim(message),
        },
    }
}
