//! Collection cross-reference validation
//!
//! Runs before any transport connects and reports every problem it finds,
//! not just the first.

use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;

use super::assertions::AssertOp;
use super::config::{AuthConfig, Collection, ServerConfig, Step};
use super::interpolate::EnvSnapshot;

/// One validation problem
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationIssue {
    /// Location, e.g. `steps[2].check.path`
    pub path: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

/// Every problem found in a collection
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationErrors(pub Vec<ValidationIssue>);

impl ValidationErrors {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn issues(&self) -> &[ValidationIssue] {
        &self.0
    }

    fn push(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.0.push(ValidationIssue {
            path: path.into(),
            message: message.into(),
            suggestion: None,
        });
    }

    fn push_with(&mut self, path: impl Into<String>, message: impl Into<String>, suggestion: Option<String>) {
        self.0.push(ValidationIssue {
            path: path.into(),
            message: message.into(),
            suggestion,
        });
    }
}

impl std::fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, issue) in self.0.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "  - {}: {}", issue.path, issue.message)?;
            if let Some(suggestion) = &issue.suggestion {
                write!(f, " ({})", suggestion)?;
            }
        }
        Ok(())
    }
}

/// What the collection is about to be used for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Purpose {
    /// Execute the steps
    Run,
    /// Only connect and list tools; steps may be absent
    Discovery,
}

/// Validate a collection against the environment it will run with
pub fn validate(collection: &Collection, env: &EnvSnapshot, purpose: Purpose) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::default();

    if collection.name.trim().is_empty() {
        errors.push("name", "collection name must not be empty");
    }

    validate_server(&collection.server, env, &mut errors);

    match purpose {
        Purpose::Run if collection.steps.is_empty() => {
            errors.push("steps", "collection has no steps to run");
        }
        Purpose::Run => validate_steps(collection, env, &mut errors),
        Purpose::Discovery => {}
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_server(server: &ServerConfig, env: &EnvSnapshot, errors: &mut ValidationErrors) {
    if let Err(unresolved) = env.resolve_server(server) {
        errors.push("server", unresolved.to_string());
    }

    match server {
        ServerConfig::Stdio { command, .. } => {
            if command.trim().is_empty() {
                errors.push("server.command", "stdio transport requires a command");
            }
        }
        ServerConfig::Http { url, auth } | ServerConfig::Sse { url, auth } => {
            // Validate the interpolated URL when possible
            let url = env.interpolate_str(url).unwrap_or_else(|_| url.clone());
            match url::Url::parse(&url) {
                Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {}
                Ok(parsed) => errors.push(
                    "server.url",
                    format!("URL scheme must be http or https, got '{}'", parsed.scheme()),
                ),
                Err(_) if url.contains("{{") => {}
                Err(e) => errors.push("server.url", format!("invalid URL '{}': {}", url, e)),
            }
            if let Some(auth) = auth {
                validate_auth(auth, errors);
            }
        }
    }
}

fn validate_auth(auth: &AuthConfig, errors: &mut ValidationErrors) {
    let required: Vec<(&str, &str)> = match auth {
        AuthConfig::Bearer { token } => vec![("token", token)],
        AuthConfig::ApiKey { header, key } => vec![("header", header), ("key", key)],
        AuthConfig::Basic { username, password } => vec![("username", username), ("password", password)],
    };
    for (field, value) in required {
        if value.trim().is_empty() {
            errors.push(format!("server.auth.{}", field), "must not be empty");
        }
    }
}

fn validate_steps(collection: &Collection, env: &EnvSnapshot, errors: &mut ValidationErrors) {
    // id -> (index, is tool call)
    let mut seen: HashMap<&str, (usize, bool)> = HashMap::new();

    for (i, step) in collection.steps.iter().enumerate() {
        let at = format!("steps[{}]", i);
        let id = step.id();

        if id.trim().is_empty() {
            errors.push(format!("{}.id", at), "step id must not be empty");
        } else if let Some((first, _)) = seen.get(id) {
            errors.push(
                format!("{}.id", at),
                format!("duplicate step id '{}' (first used by steps[{}])", id, first),
            );
        }

        match step {
            Step::ToolCall(call) => {
                if call.tool.trim().is_empty() {
                    errors.push(format!("{}.tool", at), "tool name must not be empty");
                }
                if let Err(unresolved) = env.interpolate_value(&call.input) {
                    errors.push(format!("{}.input", at), unresolved.to_string());
                }
                if let Some(save) = &call.save {
                    check_path(save, &format!("{}.save", at), errors);
                }
            }
            Step::Assert(assert) => {
                validate_from(&assert.from, id, &seen, collection, &at, errors);
                validate_check(assert, env, &at, errors);
            }
        }

        seen.entry(id).or_insert((i, matches!(step, Step::ToolCall(_))));
    }
}

fn validate_from(
    from: &str,
    own_id: &str,
    seen: &HashMap<&str, (usize, bool)>,
    collection: &Collection,
    at: &str,
    errors: &mut ValidationErrors,
) {
    let path = format!("{}.from", at);

    if from == own_id {
        errors.push(path, format!("step '{}' cannot reference itself", from));
        return;
    }

    match seen.get(from) {
        Some((_, true)) => {}
        Some((index, false)) => errors.push(
            path,
            format!(
                "'{}' (steps[{}]) is an assert step; 'from' must reference a tool_call step",
                from, index
            ),
        ),
        None if collection.step(from).is_some() => errors.push(
            path,
            format!("'{}' is defined later; 'from' must reference an earlier step", from),
        ),
        None => {
            let candidates = seen
                .iter()
                .filter(|(_, (_, is_call))| *is_call)
                .map(|(id, _)| *id);
            errors.push_with(
                path,
                format!("unknown step '{}'", from),
                closest(from, candidates).map(|c| format!("did you mean '{}'?", c)),
            );
        }
    }
}

fn validate_check(assert: &super::config::AssertStep, env: &EnvSnapshot, at: &str, errors: &mut ValidationErrors) {
    let check = &assert.check;
    let Some(op) = AssertOp::parse(&check.op) else {
        let names = AssertOp::ALL.iter().map(|op| op.as_str());
        errors.push_with(
            format!("{}.check.op", at),
            format!("unknown operator '{}'", check.op),
            closest(&check.op, names).map(|c| format!("did you mean '{}'?", c)),
        );
        return;
    };

    match (&check.path, op.needs_path()) {
        (None, true) => errors.push(
            format!("{}.check.path", at),
            format!("operator '{}' requires a path", op),
        ),
        (Some(path), true) => check_path(path, &format!("{}.check.path", at), errors),
        (Some(_), false) => {
            tracing::warn!(step = %at, op = %op, "Ignoring path on an operator that does not use one")
        }
        (None, false) => {}
    }

    match (&check.value, op.needs_value()) {
        (None, true) => errors.push(
            format!("{}.check.value", at),
            format!("operator '{}' requires a value", op),
        ),
        (Some(value), true) => {
            if op.is_length() && value.as_u64().is_none() {
                errors.push(
                    format!("{}.check.value", at),
                    format!("operator '{}' requires a non-negative integer value", op),
                );
            }
            if let Err(unresolved) = env.interpolate_value(value) {
                errors.push(format!("{}.check.value", at), unresolved.to_string());
            }
        }
        (Some(_), false) => {
            tracing::warn!(step = %at, op = %op, "Ignoring value on an operator that does not use one")
        }
        (None, false) => {}
    }
}

fn check_path(path: &str, at: &str, errors: &mut ValidationErrors) {
    if !path.trim_start().starts_with('$') {
        errors.push(at, format!("JSONPath '{}' must start with '$'", path));
        return;
    }
    if let Err(e) = jsonpath_lib::select(&Value::Null, path) {
        errors.push(at, format!("invalid JSONPath '{}': {:?}", path, e));
    }
}

/// Closest candidate within a small edit distance
fn closest<'a>(target: &str, candidates: impl Iterator<Item = &'a str>) -> Option<&'a str> {
    candidates
        .map(|c| (edit_distance(target, c), c))
        .filter(|(d, c)| *d <= 2.max(c.len() / 3))
        .min_by_key(|(d, _)| *d)
        .map(|(_, c)| c)
}

fn edit_distance(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    for (i, ca) in a.chars().enumerate() {
        let mut row = vec![i + 1; b.len() + 1];
        for (j, cb) in b.iter().enumerate() {
            let cost = if ca == *cb { 0 } else { 1 };
            row[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(row[j] + 1);
        }
        prev = row;
    }
    prev[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env() -> EnvSnapshot {
        EnvSnapshot::new(
            [("TOKEN".to_string(), "t".to_string())].into(),
            Default::default(),
        )
    }

    fn collection(steps: &str) -> Collection {
        Collection::parse(&format!(
            "name: test\nserver:\n  transport: stdio\n  command: server\nsteps:\n{}",
            steps
        ))
        .unwrap()
    }

    fn issues(c: &Collection) -> Vec<ValidationIssue> {
        validate(c, &env(), Purpose::Run).unwrap_err().0
    }

    const CALL_A: &str = "  - {id: a, type: tool_call, tool: echo}\n";

    #[test]
    fn test_valid_collection_passes() {
        let c = collection(&format!(
            "{}  - {{id: b, type: assert, from: a, check: {{op: jsonpath_eq, path: $.x, value: 1}}}}\n",
            CALL_A
        ));
        assert!(validate(&c, &env(), Purpose::Run).is_ok());
    }

    #[test]
    fn test_duplicate_step_id() {
        let c = collection(&format!("{}{}", CALL_A, CALL_A));
        let issues = issues(&c);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].path, "steps[1].id");
        assert!(issues[0].message.contains("duplicate step id 'a'"));
    }

    #[test]
    fn test_ids_are_case_sensitive() {
        let c = collection(&format!(
            "{}  - {{id: A, type: tool_call, tool: echo}}\n",
            CALL_A
        ));
        assert!(validate(&c, &env(), Purpose::Run).is_ok());
    }

    #[test]
    fn test_from_unknown_step_suggests() {
        let c = collection(&format!(
            "  - {{id: call_echo, type: tool_call, tool: echo}}\n  - {{id: b, type: assert, from: call_ecko, check: {{op: no_error}}}}\n"
        ));
        let issues = issues(&c);
        assert!(issues[0].message.contains("unknown step 'call_ecko'"));
        assert_eq!(issues[0].suggestion.as_deref(), Some("did you mean 'call_echo'?"));
    }

    #[test]
    fn test_from_forward_reference() {
        let c = collection(&format!(
            "  - {{id: b, type: assert, from: a, check: {{op: no_error}}}}\n{}",
            CALL_A
        ));
        let issues = issues(&c);
        assert_eq!(issues.len(), 1);
        assert!(issues[0].message.contains("defined later"));
    }

    #[test]
    fn test_from_assert_step_and_self() {
        let c = collection(&format!(
            "{}  - {{id: b, type: assert, from: a, check: {{op: no_error}}}}\n  - {{id: c, type: assert, from: b, check: {{op: no_error}}}}\n  - {{id: d, type: assert, from: d, check: {{op: no_error}}}}\n",
            CALL_A
        ));
        let issues = issues(&c);
        assert_eq!(issues.len(), 2);
        assert!(issues[0].message.contains("is an assert step"));
        assert!(issues[1].message.contains("cannot reference itself"));
    }

    #[test]
    fn test_operator_argument_table() {
        let c = collection(&format!(
            "{a}  - {{id: b, type: assert, from: a, check: {{op: jsonpath_exists}}}}\n  - {{id: c, type: assert, from: a, check: {{op: jsonpath_eq, path: $.x}}}}\n  - {{id: d, type: assert, from: a, check: {{op: is_error}}}}\n  - {{id: e, type: assert, from: a, check: {{op: jsonpath_len_gte, path: $.x, value: -1}}}}\n  - {{id: f, type: assert, from: a, check: {{op: jsonpath_exsts, path: $.x}}}}\n",
            a = CALL_A
        ));
        let issues = issues(&c);
        let paths: Vec<&str> = issues.iter().map(|i| i.path.as_str()).collect();
        assert_eq!(
            paths,
            vec![
                "steps[1].check.path",
                "steps[2].check.value",
                "steps[4].check.value",
                "steps[5].check.op",
            ]
        );
        assert_eq!(
            issues[3].suggestion.as_deref(),
            Some("did you mean 'jsonpath_exists'?")
        );
    }

    #[test]
    fn test_unused_check_arguments_are_ignored() {
        let c = collection(&format!(
            "{}  - {{id: b, type: assert, from: a, check: {{op: is_error, path: $.x, value: true}}}}\n  - {{id: c, type: assert, from: a, check: {{op: jsonpath_exists, path: $.x, value: 1}}}}\n",
            CALL_A
        ));
        assert!(validate(&c, &env(), Purpose::Run).is_ok());
    }

    #[test]
    fn test_invalid_jsonpath() {
        let c = collection(&format!(
            "{}  - {{id: b, type: assert, from: a, check: {{op: jsonpath_exists, path: 'x.y'}}}}\n",
            CALL_A
        ));
        assert!(issues(&c)[0].message.contains("must start with '$'"));
    }

    #[test]
    fn test_unresolved_placeholder_in_input() {
        let c = collection("  - {id: a, type: tool_call, tool: echo, input: {t: '{{env.TOKEN}}', u: '{{env.UNSET_FOR_TEST}}'}}\n");
        let issues = issues(&c);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].path, "steps[0].input");
        assert!(issues[0].message.contains("UNSET_FOR_TEST"));
    }

    #[test]
    fn test_server_checks() {
        let c = Collection::parse(
            "name: ''\nserver:\n  transport: http\n  url: ftp://host\n  auth: {type: bearer, token: ''}\n",
        )
        .unwrap();
        let errors = validate(&c, &env(), Purpose::Discovery).unwrap_err();
        let paths: Vec<&str> = errors.issues().iter().map(|i| i.path.as_str()).collect();
        assert_eq!(paths, vec!["name", "server.url", "server.auth.token"]);
    }

    #[test]
    fn test_run_requires_steps_but_discovery_does_not() {
        let c = Collection::parse("name: x\nserver: {transport: sse, url: 'http://localhost:1'}").unwrap();
        assert!(validate(&c, &env(), Purpose::Discovery).is_ok());
        let errors = validate(&c, &env(), Purpose::Run).unwrap_err();
        assert_eq!(errors.issues()[0].path, "steps");
    }

    #[test]
    fn test_display_lists_every_issue() {
        let c = collection(&format!("{}{}", CALL_A, CALL_A));
        let text = validate(&c, &env(), Purpose::Run).unwrap_err().to_string();
        assert!(text.starts_with("  - steps[1].id: duplicate"));
    }

    #[test]
    fn test_edit_distance() {
        assert_eq!(edit_distance("kitten", "sitting"), 3);
        assert_eq!(edit_distance("", "abc"), 3);
        assert_eq!(closest("no_eror", ["no_error", "is_error"].into_iter()), Some("no_error"));
        assert_eq!(closest("zzz", ["no_error"].into_iter()), None);
    }
}
