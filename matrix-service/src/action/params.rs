// Action Parameters
// Declared parameter specs, @{id.param} references and resolution against the matrix context

use crate::context::MatrixContext;
use crate::model::ActionSpec;

use thiserror::Error;

use std::collections::BTreeMap;
use std::ops::Range;
use std::time::Duration;

/// Value type a declared parameter must parse as
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Text,
    Integer,
    Boolean,
    /// Whole milliseconds
    DurationMillis,
}

/// Parameter declared by an action type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamSpec {
    pub name: String,
    pub required: bool,
    pub kind: ParamKind,
}

impl ParamSpec {
    pub fn required(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: true,
            kind: ParamKind::Text,
        }
    }

    pub fn optional(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: false,
            kind: ParamKind::Text,
        }
    }

    pub fn of_kind(mut self, kind: ParamKind) -> Self {
        self.kind = kind;
        self
    }
}

/// A `@{action_id.param}` reference inside a raw parameter value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub action_id: String,
    pub param: String,
    /// Byte range of the whole `@{...}` in the raw value, padding included
    pub span: Range<usize>,
}

impl std::fmt::Display for Reference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "@{{{}.{}}}", self.action_id, self.param)
    }
}

/// Every parameter problem found for one action
#[derive(Debug, Clone, PartialEq, Error)]
#[error("Could not calculate the following parameters: {}", .0.join("; "))]
pub struct ParamErrors(pub Vec<String>);

/// Parse every reference in `text`; malformed references are reported as errors
pub fn references(text: &str) -> Result<Vec<Reference>, String> {
    let mut found = Vec::new();
    let mut offset = 0;

    while let Some(start) = text[offset..].find("@{").map(|i| offset + i) {
        let body_start = start + 2;
        let end = text[body_start..]
            .find('}')
            .map(|i| body_start + i)
            .ok_or_else(|| format!("unterminated reference in '{}'", text))?;
        let body = &text[body_start..end];
        let (action_id, param) = body
            .split_once('.')
            .filter(|(id, param)| !id.trim().is_empty() && !param.trim().is_empty())
            .ok_or_else(|| format!("malformed reference '@{{{}}}', expected '@{{id.param}}'", body))?;
        found.push(Reference {
            action_id: action_id.trim().to_string(),
            param: param.trim().to_string(),
            span: start..end + 1,
        });
        offset = end + 1;
    }

    Ok(found)
}

/// Substitute every reference using the outputs already published in `context`
fn interpolate(name: &str, raw: &str, context: &MatrixContext) -> Result<String, Vec<String>> {
    if !raw.contains("@{") {
        return Ok(raw.to_string());
    }

    let refs = references(raw).map_err(|e| vec![format!("parameter '{}': {}", name, e)])?;
    let mut value = String::with_capacity(raw.len());
    let mut copied = 0;
    let mut errors = Vec::new();

    for reference in refs {
        match context.output(&reference.action_id, &reference.param) {
            Some(resolved) => {
                value.push_str(&raw[copied..reference.span.start]);
                value.push_str(resolved);
                copied = reference.span.end;
            }
            None if context.outputs(&reference.action_id).is_none() => errors.push(format!(
                "parameter '{}': {} refers to action '{}' which has produced no outputs",
                name, reference, reference.action_id
            )),
            None => errors.push(format!(
                "parameter '{}': action '{}' has no output '{}'",
                name, reference.action_id, reference.param
            )),
        }
    }

    if errors.is_empty() {
        value.push_str(&raw[copied..]);
        Ok(value)
    } else {
        Err(errors)
    }
}

fn check_kind(spec: &ParamSpec, value: &str) -> Option<String> {
    let valid = match spec.kind {
        ParamKind::Text => true,
        ParamKind::Integer | ParamKind::DurationMillis => value.trim().parse::<i64>().is_ok(),
        ParamKind::Boolean => parse_bool(value).is_some(),
    };
    if valid {
        return None;
    }
    let expected = match spec.kind {
        ParamKind::Text => "text",
        ParamKind::Integer => "an integer",
        ParamKind::Boolean => "true or false",
        ParamKind::DurationMillis => "a duration in milliseconds",
    };
    Some(format!(
        "parameter '{}' must be {}, got '{}'",
        spec.name, expected, value
    ))
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "y" | "1" => Some(true),
        "false" | "no" | "n" | "0" => Some(false),
        _ => None,
    }
}

/// Required parameters the action declaration does not provide
pub fn missing_required(spec: &ActionSpec, declared: &[ParamSpec]) -> Vec<String> {
    declared
        .iter()
        .filter(|p| p.required && !spec.params.contains_key(&p.name))
        .map(|p| p.name.clone())
        .collect()
}

/// Resolve every raw parameter of `spec`, collecting all problems
pub fn resolve(
    spec: &ActionSpec,
    declared: &[ParamSpec],
    context: &MatrixContext,
) -> Result<InputParams, ParamErrors> {
    let mut errors: Vec<String> = missing_required(spec, declared)
        .into_iter()
        .map(|name| format!("required parameter '{}' is missing", name))
        .collect();
    let mut values = BTreeMap::new();

    for (name, raw) in &spec.params {
        match interpolate(name, raw, context) {
            Ok(value) => {
                if let Some(declared) = declared.iter().find(|d| &d.name == name) {
                    if let Some(problem) = check_kind(declared, &value) {
                        errors.push(problem);
                    }
                }
                values.insert(name.clone(), value);
            }
            Err(problems) => errors.extend(problems),
        }
    }

    if errors.is_empty() {
        Ok(InputParams { values })
    } else {
        Err(ParamErrors(errors))
    }
}

/// Resolved parameter values handed to an action
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InputParams {
    values: BTreeMap<String, String>,
}

impl InputParams {
    pub fn new(values: BTreeMap<String, String>) -> Self {
        Self { values }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn require(&self, name: &str) -> Result<&str, ParamErrors> {
        self.get(name)
            .ok_or_else(|| ParamErrors(vec![format!("required parameter '{}' is missing", name)]))
    }

    pub fn get_i64(&self, name: &str) -> Result<Option<i64>, ParamErrors> {
        self.get(name)
            .map(|v| {
                v.trim().parse::<i64>().map_err(|_| {
                    ParamErrors(vec![format!("parameter '{}' must be an integer, got '{}'", name, v)])
                })
            })
            .transpose()
    }

    pub fn get_bool(&self, name: &str) -> Result<Option<bool>, ParamErrors> {
        self.get(name)
            .map(|v| {
                parse_bool(v).ok_or_else(|| {
                    ParamErrors(vec![format!("parameter '{}' must be true or false, got '{}'", name, v)])
                })
            })
            .transpose()
    }

    pub fn get_duration(&self, name: &str) -> Result<Option<Duration>, ParamErrors> {
        match self.get_i64(name)? {
            Some(ms) if ms < 0 => Err(ParamErrors(vec![format!(
                "parameter '{}' must not be negative",
                name
            )])),
            Some(ms) => Ok(Some(Duration::from_millis(ms as u64))),
            None => Ok(None),
        }
    }

    /// Parameters starting with `prefix`, keyed by the remainder of the name
    pub fn with_prefix(&self, prefix: &str) -> BTreeMap<String, String> {
        self.values
            .iter()
            .filter_map(|(k, v)| k.strip_prefix(prefix).map(|rest| (rest.to_string(), v.clone())))
            .filter(|(k, _)| !k.is_empty())
            .collect()
    }

    pub fn all(&self) -> &BTreeMap<String, String> {
        &self.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_references_parsing() {
        let refs = references("Price=@{id1.Price}, Qty=@{ id2.Qty }").unwrap();
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].action_id, "id1");
        assert_eq!(refs[1].param, "Qty");
        assert_eq!(refs[0].span, 6..18);
        assert_eq!(refs[1].span, 24..36);
        assert!(references("plain").unwrap().is_empty());
        assert!(references("@{broken").is_err());
        assert!(references("@{nodot}").is_err());
    }

    #[test]
    fn test_resolve_substitutes_outputs() {
        let mut ctx = MatrixContext::new("m");
        let mut outputs = BTreeMap::new();
        outputs.insert("Price".to_string(), "10".to_string());
        ctx.publish_outputs("id1", &outputs);

        let spec = ActionSpec::new("id2", "CompareValues")
            .with_param("Expected.Price", "@{id1.Price}")
            .with_param("Note", "price is @{id1.Price} EUR");
        let params = resolve(&spec, &[], &ctx).unwrap();
        assert_eq!(params.get("Expected.Price"), Some("10"));
        assert_eq!(params.get("Note"), Some("price is 10 EUR"));
    }

    #[test]
    fn test_padded_and_repeated_references_are_substituted() {
        let mut ctx = MatrixContext::new("m");
        let mut outputs = BTreeMap::new();
        outputs.insert("Price".to_string(), "10".to_string());
        ctx.publish_outputs("a1", &outputs);

        let spec = ActionSpec::new("a2", "SetStatic")
            .with_param("P", "@{ a1.Price }")
            .with_param("Range", "@{a1.Price}..@{ a1.Price}");
        let params = resolve(&spec, &[], &ctx).unwrap();
        assert_eq!(params.get("P"), Some("10"));
        assert_eq!(params.get("Range"), Some("10..10"));
    }

    #[test]
    fn test_resolve_aggregates_every_error() {
        let ctx = MatrixContext::new("m");
        let spec = ActionSpec::new("id2", "Sleep")
            .with_param("Duration", "soon")
            .with_param("A", "@{id0.X}")
            .with_param("B", "@{id9.Y}");
        let declared = vec![
            ParamSpec::required("Duration").of_kind(ParamKind::DurationMillis),
            ParamSpec::required("Connection"),
        ];

        let errors = resolve(&spec, &declared, &ctx).unwrap_err();
        assert_eq!(errors.0.len(), 4);
        let message = errors.to_string();
        assert!(message.contains("'Connection' is missing"));
        assert!(message.contains("'Duration' must be a duration"));
        assert!(message.contains("id0"));
        assert!(message.contains("id9"));
    }

    #[test]
    fn test_missing_output_is_named() {
        let mut ctx = MatrixContext::new("m");
        ctx.publish_outputs("id1", &BTreeMap::new());
        let spec = ActionSpec::new("id2", "SetStatic").with_param("A", "@{id1.Missing}");
        let errors = resolve(&spec, &[], &ctx).unwrap_err();
        assert!(errors.0[0].contains("has no output 'Missing'"));
    }

    #[test]
    fn test_typed_accessors_and_prefix() {
        let mut values = BTreeMap::new();
        values.insert("Duration".to_string(), "250".to_string());
        values.insert("Flag".to_string(), "yes".to_string());
        values.insert("Expected.Price".to_string(), "10".to_string());
        values.insert("Actual.Price".to_string(), "11".to_string());
        let params = InputParams::new(values);

        assert_eq!(
            params.get_duration("Duration").unwrap(),
            Some(Duration::from_millis(250))
        );
        assert_eq!(params.get_bool("Flag").unwrap(), Some(true));
        assert_eq!(params.get_i64("Missing").unwrap(), None);
        assert!(params.get_i64("Flag").is_err());
        assert_eq!(params.with_prefix("Expected.").get("Price").map(String::as_str), Some("10"));
        assert!(params.require("Nope").is_err());
    }
}
