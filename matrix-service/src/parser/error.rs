// Parse Errors
// Located, human-readable errors for matrix files with fix suggestions

use std::fmt;

/// Detailed parse error with location and context
#[derive(Debug, Clone)]
pub struct ParseError {
    /// Error message
    pub message: String,
    /// Line number (1-indexed, 0 when not tied to a location)
    pub line: usize,
    /// Column number (1-indexed)
    pub column: usize,
    /// Surrounding context (a few lines around the error)
    pub context: String,
    /// Optional suggestion for fixing the error
    pub suggestion: Option<String>,
    /// Every semantic problem found, for validation errors
    pub problems: Vec<String>,
    /// The kind of error
    pub kind: ParseErrorKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// YAML syntax error
    YamlSyntax,
    /// Invalid schema (wrong types, missing fields)
    InvalidSchema,
    /// Unknown field
    UnknownField,
    /// IO error (file not found, etc.)
    IoError,
    /// Validation error (semantic)
    ValidationError,
}

impl ParseError {
    pub fn new(message: impl Into<String>, line: usize, column: usize) -> Self {
        Self {
            message: message.into(),
            line,
            column,
            context: String::new(),
            suggestion: None,
            problems: Vec::new(),
            kind: ParseErrorKind::InvalidSchema,
        }
    }

    pub fn io_error(path: &std::path::Path, err: &std::io::Error) -> Self {
        Self::new(format!("cannot read '{}': {}", path.display(), err), 0, 0)
            .with_kind(ParseErrorKind::IoError)
    }

    /// Aggregate semantic problems into a single error
    pub fn validation(matrix: &str, problems: Vec<String>) -> Self {
        let mut err = Self::new(
            format!(
                "matrix '{}' has {} problem(s): {}",
                matrix,
                problems.len(),
                problems.join("; ")
            ),
            0,
            0,
        )
        .with_kind(ParseErrorKind::ValidationError);
        err.problems = problems;
        err
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn with_kind(mut self, kind: ParseErrorKind) -> Self {
        self.kind = kind;
        self
    }

    /// Prefix the message with the file it came from
    pub fn with_file(mut self, path: &std::path::Path) -> Self {
        self.message = format!("{}: {}", path.display(), self.message);
        self
    }

    /// Render the lines around `line`, marking the failing line and column
    pub fn with_source_context(mut self, source: &str, radius: usize) -> Self {
        let first = self.line.saturating_sub(radius).max(1);
        let last = self.line + radius;

        let mut rendered = String::new();
        for (number, text) in source.lines().enumerate().map(|(i, l)| (i + 1, l)) {
            if number < first || number > last {
                continue;
            }
            let marker = if number == self.line { '>' } else { ' ' };
            rendered.push_str(&format!("{} {:4} | {}\n", marker, number, text));
            if number == self.line && self.column > 0 {
                rendered.push_str(&format!("       | {:>width$}\n", "^", width = self.column));
            }
        }

        self.context = rendered;
        self
    }

    /// Create from serde_yaml error
    pub fn from_yaml_error(err: &serde_yaml::Error, source: &str) -> Self {
        let location = err.location();
        let (line, column) = location
            .map(|loc| (loc.line(), loc.column()))
            .unwrap_or((1, 1));

        let message = format_yaml_error_message(err);
        let kind = if message.starts_with("unknown field") {
            ParseErrorKind::UnknownField
        } else if message.starts_with("missing required field") {
            ParseErrorKind::InvalidSchema
        } else {
            ParseErrorKind::YamlSyntax
        };
        let suggestion = suggest_yaml_fix(err, source, line);

        let mut parsed = ParseError::new(message, line, column)
            .with_kind(kind)
            .with_source_context(source, 2);
        parsed.suggestion = suggestion;
        parsed
    }

    /// Single-line rendering used when the error is wrapped by the scheduler
    pub fn summary(&self) -> String {
        if self.line > 0 {
            format!("{} (line {}:{})", self.message, self.line, self.column)
        } else {
            self.message.clone()
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "error: {}", self.message)?;
        if self.line > 0 {
            writeln!(f, "  --> line {}:{}", self.line, self.column)?;
        }

        if !self.context.is_empty() {
            writeln!(f)?;
            write!(f, "{}", self.context)?;
        }

        if let Some(suggestion) = &self.suggestion {
            writeln!(f)?;
            writeln!(f, "help: {}", suggestion)?;
        }

        Ok(())
    }
}

impl std::error::Error for ParseError {}

/// Text between the first `open` and the next `close`
fn between<'a>(text: &'a str, open: &str, close: &str) -> Option<&'a str> {
    let rest = &text[text.find(open)? + open.len()..];
    Some(&rest[..rest.find(close)?])
}

/// Rewrite serde_yaml's messages in matrix terms
fn format_yaml_error_message(err: &serde_yaml::Error) -> String {
    let raw = err.to_string();

    if let Some(field) = between(&raw, "missing field `", "`") {
        return format!("missing required field '{}'", field);
    }

    if let Some(field) = between(&raw, "unknown field `", "`") {
        let known = raw
            .split_once("expected one of ")
            .map(|(_, tail)| tail.split(" at ").next().unwrap_or(tail).replace('`', ""));
        return match known {
            Some(known) => format!("unknown field '{}', expected one of: {}", field, known),
            None => format!("unknown field '{}'", field),
        };
    }

    if raw.contains("invalid type") {
        if let (Some(expected), Some(found)) = (between(&raw, "expected ", ","), between(&raw, "found ", " at")) {
            return format!("expected {}, but found {}", expected, found);
        }
    }

    raw
}

/// Suggest fixes for common matrix mistakes
fn suggest_yaml_fix(err: &serde_yaml::Error, source: &str, line: usize) -> Option<String> {
    let msg = err.to_string();
    let lines: Vec<&str> = source.lines().collect();
    let error_line = lines.get(line.saturating_sub(1)).unwrap_or(&"");

    if msg.contains("missing field `steps`") {
        return Some("a matrix needs a 'steps' list; each step groups actions".to_string());
    }

    if msg.contains("missing field `actions`") {
        return Some("each step needs an 'actions' list, even if it is empty".to_string());
    }

    if msg.contains("missing field `type`") {
        return Some("each action needs 'type:' naming a registered action".to_string());
    }

    if msg.contains("expected") && msg.contains("found") && error_line.starts_with('\t') {
        return Some(
            "YAML prefers spaces over tabs for indentation. Replace tabs with spaces.".to_string(),
        );
    }

    let typo_suggestions = [
        ("continueonfailure", "continue_on_failure"),
        ("askforcontinue", "ask_for_continue"),
        ("waitasync", "wait_async"),
        ("timeout:", "timeout_ms"),
        ("parameters", "params"),
        ("action:", "type"),
    ];

    let lower_line = error_line.to_lowercase();
    for (typo, correct) in typo_suggestions {
        if lower_line.contains(typo) {
            return Some(format!("did you mean '{}'?", correct));
        }
    }

    None
}

/// Result type for parser operations
pub type ParseResult<T> = Result<T, ParseError>;
