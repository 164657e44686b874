// YAML Matrix Source
// Loads matrix definitions from YAML documents and validates them

use crate::action::params::references;
use crate::model::{ActionSpec, Matrix, Step, StepPolicy};
use crate::parser::error::{ParseError, ParseResult};

use serde::Deserialize;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Anything that can produce a matrix definition
pub trait MatrixSource {
    /// Human-readable origin used in error messages
    fn origin(&self) -> String;

    fn load(&self) -> ParseResult<Matrix>;
}

impl MatrixSource for Matrix {
    fn origin(&self) -> String {
        format!("matrix '{}'", self.name)
    }

    fn load(&self) -> ParseResult<Matrix> {
        MatrixValidator::validate(self)?;
        Ok(self.clone())
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct MatrixDoc {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    continue_on_failure: bool,
    steps: Vec<StepDoc>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct StepDoc {
    name: String,
    #[serde(default)]
    continue_on_failure: bool,
    #[serde(default)]
    ask_for_continue: bool,
    #[serde(default = "default_true")]
    execute: bool,
    #[serde(default)]
    wait_async: bool,
    #[serde(default)]
    timeout_ms: Option<u64>,
    actions: Vec<ActionDoc>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ActionDoc {
    id: String,
    #[serde(rename = "type")]
    action_type: String,
    #[serde(default)]
    params: BTreeMap<String, serde_yaml::Value>,
    #[serde(default)]
    connection: Option<String>,
    #[serde(default)]
    connections: Vec<String>,
    #[serde(default)]
    mandatory: bool,
    #[serde(default = "default_true")]
    executable: bool,
    #[serde(default)]
    inverted: bool,
    #[serde(default)]
    timeout_ms: Option<u64>,
    #[serde(default)]
    comment: Option<String>,
}

fn default_true() -> bool {
    true
}

/// Render a scalar parameter value as text
fn scalar_to_string(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        serde_yaml::Value::Null => Some(String::new()),
        _ => None,
    }
}

impl MatrixDoc {
    fn into_matrix(self) -> ParseResult<Matrix> {
        let mut problems = Vec::new();
        let mut steps = Vec::with_capacity(self.steps.len());

        for step in self.steps {
            let mut actions = Vec::with_capacity(step.actions.len());
            for action in step.actions {
                let mut params = BTreeMap::new();
                for (name, value) in action.params {
                    match scalar_to_string(&value) {
                        Some(text) => {
                            params.insert(name, text);
                        }
                        None => problems.push(format!(
                            "action '{}': parameter '{}' must be a scalar value",
                            action.id, name
                        )),
                    }
                }

                let mut connections = action.connections;
                if let Some(single) = action.connection {
                    if !connections.contains(&single) {
                        connections.insert(0, single);
                    }
                }

                actions.push(ActionSpec {
                    id: action.id,
                    action_type: action.action_type,
                    params,
                    connections,
                    mandatory: action.mandatory,
                    executable: action.executable,
                    inverted: action.inverted,
                    timeout: action.timeout_ms.map(Duration::from_millis),
                    comment: action.comment,
                });
            }

            steps.push(Step {
                name: step.name,
                policy: StepPolicy {
                    continue_on_failure: step.continue_on_failure,
                    ask_for_continue: step.ask_for_continue,
                    execute: step.execute,
                    wait_async: step.wait_async,
                    timeout: step.timeout_ms.map(Duration::from_millis),
                },
                actions,
            });
        }

        if !problems.is_empty() {
            return Err(ParseError::validation(&self.name, problems));
        }

        Ok(Matrix {
            name: self.name,
            description: self.description,
            continue_on_failure: self.continue_on_failure,
            steps,
        })
    }
}

/// Matrix definition held as YAML text or a file path
#[derive(Debug, Clone)]
pub enum YamlMatrixSource {
    Text(String),
    File(PathBuf),
}

impl YamlMatrixSource {
    pub fn from_str(content: impl Into<String>) -> Self {
        YamlMatrixSource::Text(content.into())
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Self {
        YamlMatrixSource::File(path.as_ref().to_path_buf())
    }

    /// Parse and validate a matrix from YAML text
    pub fn parse(content: &str) -> ParseResult<Matrix> {
        let doc: MatrixDoc =
            serde_yaml::from_str(content).map_err(|e| ParseError::from_yaml_error(&e, content))?;
        let matrix = doc.into_matrix()?;
        MatrixValidator::validate(&matrix)?;
        Ok(matrix)
    }

    pub fn parse_file<P: AsRef<Path>>(path: P) -> ParseResult<Matrix> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| ParseError::io_error(path, &e))?;
        Self::parse(&content).map_err(|e| e.with_file(path))
    }
}

impl MatrixSource for YamlMatrixSource {
    fn origin(&self) -> String {
        match self {
            YamlMatrixSource::Text(_) => "inline YAML".to_string(),
            YamlMatrixSource::File(path) => path.display().to_string(),
        }
    }

    fn load(&self) -> ParseResult<Matrix> {
        match self {
            YamlMatrixSource::Text(content) => Self::parse(content),
            YamlMatrixSource::File(path) => Self::parse_file(path),
        }
    }
}

/// Semantic checks on a loaded matrix
pub struct MatrixValidator;

impl MatrixValidator {
    /// Validate the matrix, reporting every problem at once
    pub fn validate(matrix: &Matrix) -> ParseResult<()> {
        let problems = Self::problems(matrix);
        if problems.is_empty() {
            Ok(())
        } else {
            Err(ParseError::validation(&matrix.name, problems))
        }
    }

    pub fn problems(matrix: &Matrix) -> Vec<String> {
        let mut problems = Vec::new();

        if matrix.name.trim().is_empty() {
            problems.push("matrix name must not be empty".to_string());
        }

        let mut step_names = HashSet::new();
        for step in &matrix.steps {
            if step.name.trim().is_empty() {
                problems.push("step name must not be empty".to_string());
            } else if !step_names.insert(step.name.as_str()) {
                problems.push(format!("duplicate step name '{}'", step.name));
            }
        }

        // Position of each action, used to reject forward references
        let mut positions: HashMap<&str, usize> = HashMap::new();
        for (index, (step, action)) in matrix.actions().enumerate() {
            if action.id.trim().is_empty() {
                problems.push(format!("step '{}': action id must not be empty", step.name));
                continue;
            }
            if action.action_type.trim().is_empty() {
                problems.push(format!("action '{}': action type must not be empty", action.id));
            }
            if positions.insert(action.id.as_str(), index).is_some() {
                problems.push(format!("duplicate action id '{}'", action.id));
            }
        }

        for (index, (_, action)) in matrix.actions().enumerate() {
            for (name, raw) in &action.params {
                let refs = match references(raw) {
                    Ok(refs) => refs,
                    Err(e) => {
                        problems.push(format!("action '{}', parameter '{}': {}", action.id, name, e));
                        continue;
                    }
                };
                for reference in refs {
                    match positions.get(reference.action_id.as_str()) {
                        None => problems.push(format!(
                            "action '{}', parameter '{}': {} refers to unknown action '{}'",
                            action.id, name, reference, reference.action_id
                        )),
                        Some(&target) if target >= index => problems.push(format!(
                            "action '{}', parameter '{}': {} refers to an action that does not run before it",
                            action.id, name, reference
                        )),
                        Some(_) => {}
                    }
                }
            }
        }

        problems
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::error::ParseErrorKind;
    use std::io::Write;

    const ORDERS: &str = r#"
name: orders
description: Place and verify an order
steps:
  - name: Setup
    actions:
      - id: id1
        type: SetStatic
        params:
          Price: 10
          Side: Buy
  - name: Send
    wait_async: true
    timeout_ms: 2000
    actions:
      - id: id2
        type: SendMessage
        connection: gw
        mandatory: true
        params:
          Price: "@{id1.Price}"
      - id: id3
        type: ReceiveMessage
        connections: [gw]
        timeout_ms: 500
        params:
          Key.Price: "@{id1.Price}"
"#;

    #[test]
    fn test_parse_matrix() {
        let matrix = YamlMatrixSource::parse(ORDERS).unwrap();
        assert_eq!(matrix.name, "orders");
        assert_eq!(matrix.steps.len(), 2);
        assert!(matrix.steps[1].policy.wait_async);
        assert_eq!(matrix.steps[1].policy.timeout, Some(Duration::from_millis(2000)));
        assert!(matrix.steps[0].policy.execute);

        let id1 = matrix.find_action("id1").unwrap();
        assert_eq!(id1.params.get("Price").map(String::as_str), Some("10"));
        assert!(id1.executable);

        let id2 = matrix.find_action("id2").unwrap();
        assert!(id2.mandatory);
        assert_eq!(id2.connections, vec!["gw".to_string()]);

        let id3 = matrix.find_action("id3").unwrap();
        assert_eq!(id3.timeout, Some(Duration::from_millis(500)));
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        let yaml = "name: m\nsteps:\n  - name: s\n    wait: true\n    actions: []\n";
        let err = YamlMatrixSource::parse(yaml).unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::UnknownField);
        assert!(err.message.contains("wait"));
    }

    #[test]
    fn test_validation_collects_every_problem() {
        let yaml = r#"
name: broken
steps:
  - name: S1
    actions:
      - id: a1
        type: SetStatic
        params:
          X: "@{a2.Y}"
      - id: a1
        type: ""
  - name: S1
    actions:
      - id: a2
        type: SetStatic
        params:
          Z: "@{ghost.Q}"
"#;
        let err = YamlMatrixSource::parse(yaml).unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::ValidationError);
        let all = err.problems.join("\n");
        assert!(all.contains("duplicate step name 'S1'"));
        assert!(all.contains("duplicate action id 'a1'"));
        assert!(all.contains("action type must not be empty"));
        assert!(all.contains("does not run before it"));
        assert!(all.contains("unknown action 'ghost'"));
        assert_eq!(err.problems.len(), 5);
    }

    #[test]
    fn test_nested_param_is_rejected() {
        let yaml = "name: m\nsteps:\n  - name: s\n    actions:\n      - id: a\n        type: SetStatic\n        params:\n          X: [1, 2]\n";
        let err = YamlMatrixSource::parse(yaml).unwrap_err();
        assert!(err.problems[0].contains("must be a scalar"));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(ORDERS.as_bytes()).unwrap();
        let source = YamlMatrixSource::from_file(file.path());
        let matrix = source.load().unwrap();
        assert_eq!(matrix.action_count(), 3);

        let missing = YamlMatrixSource::from_file("/nonexistent/matrix.yaml");
        assert_eq!(missing.load().unwrap_err().kind, ParseErrorKind::IoError);
    }

    #[test]
    fn test_matrix_is_its_own_source() {
        let matrix = Matrix::new("inline").with_step(
            Step::new("s").with_action(ActionSpec::new("a", "SetStatic")),
        );
        assert_eq!(matrix.load().unwrap(), matrix);
    }
}
