//! `{{env.NAME}}` placeholder substitution
//!
//! Values come from an immutable snapshot taken when a run starts: the
//! collection's own `env` block first, then the process environment.

use regex::{Captures, Regex};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::OnceLock;

use super::config::{AuthConfig, ServerConfig};

fn placeholder() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| {
        Regex::new(r"\{\{\s*env\.([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").expect("placeholder pattern is valid")
    })
}

/// Names of placeholders that had no value
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Unresolved(pub Vec<String>);

impl std::fmt::Display for Unresolved {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unresolved environment variable(s): {}", self.0.join(", "))
    }
}

/// Environment values visible to placeholders
#[derive(Debug, Clone, Default)]
pub struct EnvSnapshot {
    collection: BTreeMap<String, String>,
    ambient: HashMap<String, String>,
}

impl EnvSnapshot {
    /// Snapshot the process environment alongside the collection's `env`
    pub fn capture(collection_env: &BTreeMap<String, String>) -> Self {
        Self::new(collection_env.clone(), std::env::vars().collect())
    }

    pub fn new(collection: BTreeMap<String, String>, ambient: HashMap<String, String>) -> Self {
        Self {
            collection,
            ambient,
        }
    }

    /// Resolve one name, collection first
    pub fn lookup(&self, name: &str) -> Option<&str> {
        self.collection
            .get(name)
            .or_else(|| self.ambient.get(name))
            .map(String::as_str)
    }

    fn substitute(&self, text: &str, missing: &mut Vec<String>) -> String {
        placeholder()
            .replace_all(text, |caps: &Captures| {
                let name = &caps[1];
                match self.lookup(name) {
                    Some(value) => value.to_string(),
                    None => {
                        if !missing.iter().any(|m| m == name) {
                            missing.push(name.to_string());
                        }
                        caps[0].to_string()
                    }
                }
            })
            .into_owned()
    }

    fn substitute_value(&self, value: &Value, missing: &mut Vec<String>) -> Value {
        match value {
            Value::String(s) => Value::String(self.substitute(s, missing)),
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| self.substitute_value(item, missing))
                    .collect(),
            ),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.substitute_value(v, missing)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    /// Substitute placeholders in a string
    pub fn interpolate_str(&self, text: &str) -> Result<String, Unresolved> {
        let mut missing = Vec::new();
        let result = self.substitute(text, &mut missing);
        finish(result, missing)
    }

    /// Substitute placeholders in every string inside a JSON value
    pub fn interpolate_value(&self, value: &Value) -> Result<Value, Unresolved> {
        let mut missing = Vec::new();
        let result = self.substitute_value(value, &mut missing);
        finish(result, missing)
    }

    /// Substitute placeholders in the connection settings and credentials
    pub fn resolve_server(&self, server: &ServerConfig) -> Result<ServerConfig, Unresolved> {
        let mut missing = Vec::new();
        let mut s = |text: &str| self.substitute(text, &mut missing);

        let resolved = match server {
            ServerConfig::Stdio { command, args, env } => ServerConfig::Stdio {
                command: s(command),
                args: args.iter().map(|a| s(a)).collect(),
                env: env.iter().map(|(k, v)| (k.clone(), s(v))).collect(),
            },
            ServerConfig::Http { url, auth } => ServerConfig::Http {
                url: s(url),
                auth: auth.as_ref().map(|a| resolve_auth(a, &mut s)),
            },
            ServerConfig::Sse { url, auth } => ServerConfig::Sse {
                url: s(url),
                auth: auth.as_ref().map(|a| resolve_auth(a, &mut s)),
            },
        };
        finish(resolved, missing)
    }
}

fn resolve_auth(auth: &AuthConfig, s: &mut impl FnMut(&str) -> String) -> AuthConfig {
    match auth {
        AuthConfig::Bearer { token } => AuthConfig::Bearer { token: s(token) },
        AuthConfig::ApiKey { header, key } => AuthConfig::ApiKey {
            header: header.clone(),
            key: s(key),
        },
        AuthConfig::Basic { username, password } => AuthConfig::Basic {
            username: s(username),
            password: s(password),
        },
    }
}

fn finish<T>(value: T, missing: Vec<String>) -> Result<T, Unresolved> {
    if missing.is_empty() {
        Ok(value)
    } else {
        Err(Unresolved(missing))
    }
}
