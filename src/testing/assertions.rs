//! Assertion engine
//!
//! Evaluates one operator against a value saved by an earlier tool call.
//! A failing check is an outcome, never an error: a path that matches
//! nothing, a type that cannot be compared and a plain value mismatch are
//! all reported as failures with distinct reasons.

use serde::Serialize;
use serde_json::Value;

use crate::mcp::types::ToolResult;

/// Supported assertion operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AssertOp {
    JsonpathExists,
    JsonpathEq,
    JsonpathContains,
    JsonpathLenEq,
    JsonpathLenGte,
    JsonpathLenLte,
    IsError,
    NoError,
}

impl AssertOp {
    pub const ALL: [AssertOp; 8] = [
        AssertOp::JsonpathExists,
        AssertOp::JsonpathEq,
        AssertOp::JsonpathContains,
        AssertOp::JsonpathLenEq,
        AssertOp::JsonpathLenGte,
        AssertOp::JsonpathLenLte,
        AssertOp::IsError,
        AssertOp::NoError,
    ];

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.as_str() == name)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AssertOp::JsonpathExists => "jsonpath_exists",
            AssertOp::JsonpathEq => "jsonpath_eq",
            AssertOp::JsonpathContains => "jsonpath_contains",
            AssertOp::JsonpathLenEq => "jsonpath_len_eq",
            AssertOp::JsonpathLenGte => "jsonpath_len_gte",
            AssertOp::JsonpathLenLte => "jsonpath_len_lte",
            AssertOp::IsError => "is_error",
            AssertOp::NoError => "no_error",
        }
    }

    pub fn needs_path(&self) -> bool {
        !matches!(self, AssertOp::IsError | AssertOp::NoError)
    }

    pub fn needs_value(&self) -> bool {
        self.needs_path() && *self != AssertOp::JsonpathExists
    }

    pub fn is_length(&self) -> bool {
        matches!(
            self,
            AssertOp::JsonpathLenEq | AssertOp::JsonpathLenGte | AssertOp::JsonpathLenLte
        )
    }
}

impl std::fmt::Display for AssertOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a check failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    PathNotFound,
    ValueMismatch,
    TypeMismatch,
    InvalidPath,
    MissingArgument,
}

/// Result of evaluating one check
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssertionOutcome {
    pub passed: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<FailureReason>,
    /// The value the check looked at, when there was one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual: Option<Value>,
}

impl AssertionOutcome {
    fn pass(message: String, actual: Option<Value>) -> Self {
        Self {
            passed: true,
            message,
            reason: None,
            actual,
        }
    }

    fn fail(reason: FailureReason, message: String, actual: Option<Value>) -> Self {
        Self {
            passed: false,
            message,
            reason: Some(reason),
            actual,
        }
    }
}

/// Evaluate a check against a saved value
pub fn evaluate(op: AssertOp, path: Option<&str>, expected: Option<&Value>, saved: &Value) -> AssertionOutcome {
    match op {
        AssertOp::IsError | AssertOp::NoError => return check_error_flag(op, saved),
        _ => {}
    }

    let Some(path) = path else {
        return AssertionOutcome::fail(
            FailureReason::MissingArgument,
            format!("{} requires a path", op),
            None,
        );
    };

    let matches = match jsonpath_lib::select(saved, path) {
        Ok(matches) => matches,
        Err(e) => {
            return AssertionOutcome::fail(
                FailureReason::InvalidPath,
                format!("Invalid JSONPath '{}': {:?}", path, e),
                None,
            )
        }
    };

    // A filter that selects nothing still has a count
    let counted = op.is_length() && is_indefinite(path);
    if matches.is_empty() && !counted {
        return AssertionOutcome::fail(
            FailureReason::PathNotFound,
            format!("Path '{}' not found", path),
            None,
        );
    }

    if op == AssertOp::JsonpathExists {
        return AssertionOutcome::pass(
            format!("Path '{}' exists ({} match(es))", path, matches.len()),
            Some(matches[0].clone()),
        );
    }

    let Some(expected) = expected else {
        return AssertionOutcome::fail(
            FailureReason::MissingArgument,
            format!("{} requires a value", op),
            None,
        );
    };

    match op {
        AssertOp::JsonpathEq => check_equal(path, matches[0], expected),
        AssertOp::JsonpathContains => check_contains(path, matches[0], expected),
        _ => check_length(op, path, &matches, counted, expected),
    }
}

fn check_error_flag(op: AssertOp, saved: &Value) -> AssertionOutcome {
    let flagged = saved.get("isError").and_then(Value::as_bool).unwrap_or(false);
    let actual = Some(Value::Bool(flagged));

    match (op, flagged) {
        (AssertOp::IsError, true) => {
            AssertionOutcome::pass("Tool returned isError=true as expected".to_string(), actual)
        }
        (AssertOp::IsError, false) => AssertionOutcome::fail(
            FailureReason::ValueMismatch,
            "Expected isError=true but the tool call succeeded".to_string(),
            actual,
        ),
        (_, false) => AssertionOutcome::pass("Tool returned no error".to_string(), actual),
        (_, true) => {
            let result = ToolResult::from_value(saved);
            let detail = result.first_text().unwrap_or("no error text");
            AssertionOutcome::fail(
                FailureReason::ValueMismatch,
                format!("Expected no error but tool returned isError=true: {}", detail),
                actual,
            )
        }
    }
}

fn check_equal(path: &str, actual: &Value, expected: &Value) -> AssertionOutcome {
    if json_eq(actual, expected) {
        AssertionOutcome::pass(
            format!("'{}' equals {}", path, expected),
            Some(actual.clone()),
        )
    } else {
        AssertionOutcome::fail(
            FailureReason::ValueMismatch,
            format!("Expected '{}' to equal {}, got {}", path, expected, actual),
            Some(actual.clone()),
        )
    }
}

fn check_contains(path: &str, actual: &Value, expected: &Value) -> AssertionOutcome {
    let found = match actual {
        Value::String(text) => {
            let needle = match expected {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            text.contains(&needle)
        }
        Value::Array(items) => items.iter().any(|item| json_eq(item, expected)),
        Value::Object(map) => match expected.as_str() {
            Some(key) => map.contains_key(key),
            None => {
                return AssertionOutcome::fail(
                    FailureReason::TypeMismatch,
                    format!("'{}' is an object; expected value must be a key name", path),
                    Some(actual.clone()),
                )
            }
        },
        other => {
            return AssertionOutcome::fail(
                FailureReason::TypeMismatch,
                format!("'{}' is {}; cannot check containment", path, type_name(other)),
                Some(other.clone()),
            )
        }
    };

    if found {
        AssertionOutcome::pass(
            format!("'{}' contains {}", path, expected),
            Some(actual.clone()),
        )
    } else {
        AssertionOutcome::fail(
            FailureReason::ValueMismatch,
            format!("Expected '{}' to contain {}, got {}", path, expected, actual),
            Some(actual.clone()),
        )
    }
}

fn check_length(
    op: AssertOp,
    path: &str,
    matches: &[&Value],
    counted: bool,
    expected: &Value,
) -> AssertionOutcome {
    let Some(expected_len) = expected.as_u64() else {
        return AssertionOutcome::fail(
            FailureReason::MissingArgument,
            format!("{} requires a non-negative integer value, got {}", op, expected),
            None,
        );
    };

    // A definite path names one value to measure; anything else is counted
    let length = if counted {
        matches.len()
    } else if let [single] = matches {
        match single {
            Value::Array(items) => items.len(),
            Value::String(text) => text.chars().count(),
            Value::Object(map) => map.len(),
            other => {
                return AssertionOutcome::fail(
                    FailureReason::TypeMismatch,
                    format!("'{}' is {}; it has no length", path, type_name(other)),
                    Some((*other).clone()),
                )
            }
        }
    } else {
        matches.len()
    };
    let length_u64 = length as u64;

    let (passed, relation) = match op {
        AssertOp::JsonpathLenEq => (length_u64 == expected_len, "=="),
        AssertOp::JsonpathLenGte => (length_u64 >= expected_len, ">="),
        _ => (length_u64 <= expected_len, "<="),
    };

    let actual = Some(Value::from(length));
    if passed {
        AssertionOutcome::pass(
            format!("len('{}') = {} {} {}", path, length, relation, expected_len),
            actual,
        )
    } else {
        AssertionOutcome::fail(
            FailureReason::ValueMismatch,
            format!(
                "Expected len('{}') {} {}, got {}",
                path, relation, expected_len, length
            ),
            actual,
        )
    }
}

/// Whether a JSONPath can select more than one node
///
/// Wildcards, recursive descent, filters, unions and slices make a path
/// indefinite; bracketed names are read with their quotes so a key such as
/// `['a,b']` stays definite.
fn is_indefinite(path: &str) -> bool {
    let mut in_bracket = false;
    let mut quote: Option<char> = None;
    let mut previous = '\0';

    for c in path.chars() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None => match c {
                '\'' | '"' if in_bracket => quote = Some(c),
                '[' => in_bracket = true,
                ']' => in_bracket = false,
                '*' => return true,
                '.' if previous == '.' => return true,
                '?' | ',' | ':' if in_bracket => return true,
                _ => {}
            },
        }
        previous = c;
    }
    false
}

/// Deep equality where numbers compare by value (`1 == 1.0`)
pub fn json_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            x == y || matches!((x.as_f64(), y.as_f64()), (Some(x), Some(y)) if x == y)
        }
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(a, b)| json_eq(a, b))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x.iter()
                    .all(|(k, v)| y.get(k).is_some_and(|other| json_eq(v, other)))
        }
        _ => a == b,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
