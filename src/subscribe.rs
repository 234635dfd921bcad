//! Subscription request plumbing: server token enums, pattern
//! tokenization and event-variable inference.
//!
//! The server's `subscribe` method takes a normalized
//! `(type, trigger, variable, patterns, models)` tuple and answers with
//! the id under which matching events will be notified. Everything here
//! runs before any network interaction; invalid requests fail fast with
//! [`KbError::InvalidSubscription`].

use std::collections::BTreeSet;

use crate::error::{KbError, Result};

/// Sigil that marks a token as an unbound variable.
pub const VARIABLE_SIGIL: char = '?';

/// Kind of change a subscription watches for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EventType {
    /// A new binding for the watched variable satisfies the pattern.
    #[default]
    NewInstance,
    /// A new instance of a watched class appears.
    NewClassInstance,
    /// New knowledge matching the pattern is added.
    NewKnowledge,
}

impl EventType {
    /// Server wire token.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::NewInstance => "NEW_INSTANCE",
            EventType::NewClassInstance => "NEW_CLASS_INSTANCE",
            EventType::NewKnowledge => "NEW_KNOWLEDGE",
        }
    }
}

/// When the subscription fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Trigger {
    /// Every time the pattern becomes true.
    #[default]
    OnTrue,
    /// The first time the pattern becomes true, then never again.
    OnTrueOneShot,
    /// Every time the pattern becomes false.
    OnFalse,
    /// Every time the pattern's truth value flips.
    OnToggle,
}

impl Trigger {
    /// Server wire token.
    pub fn as_str(&self) -> &'static str {
        match self {
            Trigger::OnTrue => "ON_TRUE",
            Trigger::OnTrueOneShot => "ON_TRUE_ONE_SHOT",
            Trigger::OnFalse => "ON_FALSE",
            Trigger::OnToggle => "ON_TOGGLE",
        }
    }
}

/// Options for a subscription request.
#[derive(Debug, Clone, Default)]
pub struct SubscribeOptions {
    /// Kind of change to watch for.
    pub event_type: EventType,
    /// When to fire.
    pub trigger: Trigger,
    /// Variable whose bindings are delivered with each notification.
    ///
    /// For [`EventType::NewInstance`] this may be left unset when the
    /// patterns mention exactly one variable; it is then inferred.
    pub variable: Option<String>,
    /// Models to monitor. `None` monitors every model.
    pub models: Option<Vec<String>>,
}

/// Normalize a variable name: the `?` sigil is prepended when missing.
pub(crate) fn normalize_variable(var: &str) -> String {
    if var.starts_with(VARIABLE_SIGIL) {
        var.to_string()
    } else {
        format!("{}{}", VARIABLE_SIGIL, var)
    }
}

/// Infer the delivered variable by scanning every pattern token.
///
/// Exactly one distinct variable across all patterns is auto-selected;
/// zero leaves the variable unset.
///
/// # Errors
///
/// More than one distinct variable is a caller error - it is ambiguous
/// which variable's binding should be delivered.
pub(crate) fn infer_variable(patterns: &[String]) -> Result<Option<String>> {
    let mut vars = BTreeSet::new();
    for pattern in patterns {
        for token in split_pattern(pattern) {
            if token.starts_with(VARIABLE_SIGIL) {
                vars.insert(token);
            }
        }
    }

    match vars.len() {
        0 => Ok(None),
        1 => Ok(vars.into_iter().next()),
        _ => Err(KbError::InvalidSubscription(
            "patterns mention more than one variable; specify which one \
             must be returned when the event is triggered"
                .to_string(),
        )),
    }
}

/// Split a pattern into tokens, honoring double-quoted literals.
///
/// `alfred rdfs:label "A que Johnny"` yields three tokens, with the
/// quotes stripped from the last one.
pub(crate) fn split_pattern(pattern: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    for c in pattern.chars() {
        match c {
            '"' => in_quotes = !in_quotes,
            c if c.is_whitespace() && !in_quotes => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }

    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_tokens() {
        assert_eq!(EventType::NewInstance.as_str(), "NEW_INSTANCE");
        assert_eq!(EventType::NewClassInstance.as_str(), "NEW_CLASS_INSTANCE");
        assert_eq!(EventType::NewKnowledge.as_str(), "NEW_KNOWLEDGE");
    }

    #[test]
    fn test_trigger_tokens() {
        assert_eq!(Trigger::OnTrue.as_str(), "ON_TRUE");
        assert_eq!(Trigger::OnTrueOneShot.as_str(), "ON_TRUE_ONE_SHOT");
        assert_eq!(Trigger::OnFalse.as_str(), "ON_FALSE");
        assert_eq!(Trigger::OnToggle.as_str(), "ON_TOGGLE");
    }

    #[test]
    fn test_defaults() {
        let options = SubscribeOptions::default();
        assert_eq!(options.event_type, EventType::NewInstance);
        assert_eq!(options.trigger, Trigger::OnTrue);
        assert!(options.variable.is_none());
        assert!(options.models.is_none());
    }

    #[test]
    fn test_normalize_variable() {
        assert_eq!(normalize_variable("o"), "?o");
        assert_eq!(normalize_variable("?o"), "?o");
    }

    #[test]
    fn test_infer_single_variable() {
        let patterns = vec!["?o isIn room".to_string()];
        assert_eq!(infer_variable(&patterns).unwrap(), Some("?o".to_string()));
    }

    #[test]
    fn test_infer_single_variable_across_patterns() {
        let patterns = vec![
            "?agent isIn room".to_string(),
            "?agent rdf:type Human".to_string(),
        ];
        assert_eq!(
            infer_variable(&patterns).unwrap(),
            Some("?agent".to_string())
        );
    }

    #[test]
    fn test_infer_no_variable() {
        let patterns = vec!["alfred isIn room".to_string()];
        assert_eq!(infer_variable(&patterns).unwrap(), None);
    }

    #[test]
    fn test_infer_ambiguous_is_an_error() {
        let patterns = vec!["?a isIn ?b".to_string()];
        let err = infer_variable(&patterns).unwrap_err();
        assert!(matches!(err, KbError::InvalidSubscription(_)));
    }

    #[test]
    fn test_split_pattern_plain() {
        assert_eq!(split_pattern("?o isIn room"), vec!["?o", "isIn", "room"]);
    }

    #[test]
    fn test_split_pattern_quoted_literal() {
        assert_eq!(
            split_pattern("alfred rdfs:label \"A que Johnny\""),
            vec!["alfred", "rdfs:label", "A que Johnny"]
        );
    }

    #[test]
    fn test_infer_ignores_quoted_whitespace() {
        // The literal stays one token; only ?label is a variable.
        let patterns = vec!["?label rdfs:label \"ville rose\"".to_string()];
        assert_eq!(
            infer_variable(&patterns).unwrap(),
            Some("?label".to_string())
        );
    }

    #[test]
    fn test_split_pattern_collapses_whitespace() {
        assert_eq!(split_pattern("  a   b  c "), vec!["a", "b", "c"]);
    }
}
