use crate::commands::connections::ConnectionsFile;
use crate::output;

use std::path::PathBuf;

use clap::Args;
use color_eyre::Result;

use matrix_service::action::params;
use matrix_service::{ActionRegistry, ConnectionRegistry, YamlMatrixSource};

/// Check matrix files without running them
#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Matrix YAML files
    #[arg(required = true)]
    pub matrices: Vec<PathBuf>,

    /// Also check that every referenced connection is declared in this file
    #[arg(long, value_name = "FILE")]
    pub connections: Option<PathBuf>,
}

pub fn execute(args: ValidateArgs) -> Result<()> {
    let registry = ActionRegistry::with_builtins();
    let connections = match &args.connections {
        Some(path) => Some(ConnectionsFile::load(path)?.registry()),
        None => None,
    };

    let mut invalid = 0usize;
    for path in &args.matrices {
        if !path.exists() {
            color_eyre::eyre::bail!("Matrix file not found: {}", path.display());
        }
        output::status("Validating", &format!("{}", path.display()));

        let matrix = match YamlMatrixSource::parse_file(path) {
            Ok(matrix) => matrix,
            Err(e) => {
                invalid += 1;
                output::error(&e.message);
                for problem in &e.problems {
                    output::error(&format!("  - {}", problem));
                }
                if let Some(suggestion) = &e.suggestion {
                    output::info(&format!("  Suggestion: {}", suggestion));
                }
                continue;
            }
        };

        output::check(&format!(
            "Structure: {} steps, {} actions",
            matrix.steps.len(),
            matrix.action_count()
        ));

        let mut problems = Vec::new();
        for (_, action) in matrix.actions() {
            match registry.create(action) {
                None => problems.push(format!("action '{}': unknown type '{}'", action.id, action.action_type)),
                Some(instance) => {
                    for name in params::missing_required(action, &instance.parameters()) {
                        problems.push(format!("action '{}': required parameter '{}' is missing", action.id, name));
                    }
                }
            }
        }
        if let Some(connections) = &connections {
            for name in matrix.connection_names() {
                if connections.get(&name).is_none() {
                    problems.push(format!("connection '{}' is not declared", name));
                }
            }
        }

        if problems.is_empty() {
            output::check("Actions and parameters valid");
        } else {
            invalid += 1;
            output::error(&format!("{} problem(s):", problems.len()));
            for problem in &problems {
                output::error(&format!("  - {}", problem));
            }
        }
    }

    println!();
    if invalid > 0 {
        output::failure(&format!("{} of {} matrix file(s) invalid", invalid, args.matrices.len()));
        std::process::exit(1);
    }
    output::success(&format!("{} matrix file(s) valid", args.matrices.len()));
    Ok(())
}
