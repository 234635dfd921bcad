//! Named query helpers over the `call` primitive.
//!
//! Sugar only: every method here boils down to one remote call. The `*`
//! wildcard in a pattern is rewritten to a freshly generated anonymous
//! variable before the pattern is sent.

use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::{json, Value};

use crate::error::{KbError, Result};
use crate::session::Kb;
use crate::subscribe::{split_pattern, VARIABLE_SIGIL};

impl Kb {
    /// Look up concepts matching a token (id or label).
    ///
    /// Returns the matching concept ids; the server's `[id, type]` pairs
    /// are reduced to their ids.
    pub async fn lookup(&self, token: &str) -> Result<Vec<String>> {
        let reply = self.call("lookup", &[json!(token)]).await?;
        match reply {
            Value::Array(concepts) => Ok(concepts
                .iter()
                .filter_map(|c| match c {
                    Value::Array(pair) => pair.first().and_then(Value::as_str),
                    Value::String(id) => Some(id.as_str()),
                    _ => None,
                })
                .map(str::to_string)
                .collect()),
            Value::Null => Ok(Vec::new()),
            other => Err(KbError::Protocol(format!(
                "unexpected reply to lookup: {}",
                other
            ))),
        }
    }

    /// Check whether a statement pattern holds (or can be inferred).
    pub async fn exist(&self, patterns: &[&str]) -> Result<bool> {
        let reply = self.call("exist", &[json!(patterns)]).await?;
        reply.as_bool().ok_or_else(|| {
            KbError::Protocol(format!("unexpected reply to exist: {}", reply))
        })
    }

    /// Check whether a concept or a statement is present in the ontology.
    ///
    /// A pattern that splits into an `s p o` triple is tested with
    /// `exist` (wildcards rewritten to anonymous variables); anything
    /// else is treated as a concept id or label and looked up.
    pub async fn contains(&self, pattern: &str) -> Result<bool> {
        let tokens = split_pattern(pattern);
        if tokens.len() == 3 {
            let rewritten = replace_wildcards(&tokens).join(" ");
            self.exist(&[&rewritten]).await
        } else {
            Ok(!self.lookup(pattern).await?.is_empty())
        }
    }

    /// Add statements to the ontology.
    pub async fn add(&self, statements: &[&str]) -> Result<()> {
        self.call("add", &[json!(statements)]).await?;
        Ok(())
    }

    /// Retract statements from the ontology.
    ///
    /// Statements that do not exist are silently skipped by the server.
    pub async fn retract(&self, statements: &[&str]) -> Result<()> {
        self.call("retract", &[json!(statements)]).await?;
        Ok(())
    }

    /// Find bindings of `vars` satisfying all `patterns`.
    pub async fn find(&self, vars: &[&str], patterns: &[&str]) -> Result<Value> {
        self.call(
            "find",
            &[json!(vars), json!(patterns), Value::Null, Value::Null],
        )
        .await
    }

    /// One-shot query: pattern triple or concept token.
    ///
    /// An `s p o` pattern (wildcards rewritten to anonymous variables)
    /// finds the matching bindings; any other string is a lookup.
    pub async fn query(&self, pattern: &str) -> Result<Value> {
        let tokens = split_pattern(pattern);
        if tokens.len() == 3 {
            let rewritten = replace_wildcards(&tokens);
            let vars: Vec<&str> = rewritten
                .iter()
                .filter(|t| t.starts_with(VARIABLE_SIGIL))
                .map(String::as_str)
                .collect();
            let patterns = [rewritten.join(" ")];
            let patterns: Vec<&str> = patterns.iter().map(String::as_str).collect();
            self.find(&vars, &patterns).await
        } else {
            Ok(Value::Array(
                self.lookup(pattern)
                    .await?
                    .into_iter()
                    .map(Value::String)
                    .collect(),
            ))
        }
    }
}

/// Rewrite `*` tokens to fresh anonymous variables.
pub(crate) fn replace_wildcards(tokens: &[String]) -> Vec<String> {
    tokens
        .iter()
        .map(|t| if t == "*" { fresh_variable() } else { t.clone() })
        .collect()
}

/// Generate an anonymous variable name (`?` + 5 letters).
fn fresh_variable() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    let mut state = nanos
        .wrapping_mul(0x517cc1b727220a95)
        .wrapping_add(COUNTER.fetch_add(1, Ordering::Relaxed));

    let mut name = String::with_capacity(6);
    name.push(VARIABLE_SIGIL);
    for _ in 0..5 {
        // xorshift step, then map to a lowercase letter
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        name.push((b'a' + (state % 26) as u8) as char);
    }
    name
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replace_wildcards() {
        let tokens = vec!["*".to_string(), "isIn".to_string(), "room".to_string()];
        let rewritten = replace_wildcards(&tokens);

        assert_eq!(rewritten.len(), 3);
        assert!(rewritten[0].starts_with('?'));
        assert_eq!(rewritten[0].len(), 6);
        assert_eq!(rewritten[1], "isIn");
        assert_eq!(rewritten[2], "room");
    }

    #[test]
    fn test_replace_wildcards_keeps_variables() {
        let tokens = vec!["?a".to_string(), "isIn".to_string(), "*".to_string()];
        let rewritten = replace_wildcards(&tokens);

        assert_eq!(rewritten[0], "?a");
        assert_ne!(rewritten[2], "*");
    }

    #[test]
    fn test_fresh_variables_are_distinct() {
        let a = fresh_variable();
        let b = fresh_variable();
        assert_ne!(a, b);
        assert!(a.chars().skip(1).all(|c| c.is_ascii_lowercase()));
    }
}
