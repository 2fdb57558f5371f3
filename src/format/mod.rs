//! Public identifier strings such as `EMP-0007`.
//!
//! A rule per namespace gives the prefix, the zero-padded width and what to do
//! when a value needs more digits than the width. Wrapping around is not an
//! option: it would hand out an identifier that already exists.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::contracts::FormatError;

/// Widest field that can be needed for a u64.
pub const MAX_WIDTH: usize = 20;

/// What happens when a value has more digits than the configured width.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverflowPolicy {
    /// Emit all digits, making the identifier longer than usual.
    #[default]
    Grow,
    /// Refuse to format the value.
    Fail,
}

/// Formatting rule for one namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FormatRule {
    pub prefix: String,
    pub width: usize,
    #[serde(default)]
    pub on_overflow: OverflowPolicy,
}

impl FormatRule {
    pub fn new(prefix: impl Into<String>, width: usize) -> Self {
        Self {
            prefix: prefix.into(),
            width,
            on_overflow: OverflowPolicy::Grow,
        }
    }

    pub fn with_overflow(mut self, policy: OverflowPolicy) -> Self {
        self.on_overflow = policy;
        self
    }

    fn validate(&self, namespace: &str) -> Result<(), FormatError> {
        if namespace.is_empty() {
            return Err(FormatError::InvalidRule {
                namespace: namespace.to_string(),
                reason: "namespace must not be empty".into(),
            });
        }
        if self.width == 0 || self.width > MAX_WIDTH {
            return Err(FormatError::InvalidRule {
                namespace: namespace.to_string(),
                reason: format!("width {} outside 1..={}", self.width, MAX_WIDTH),
            });
        }
        Ok(())
    }
}

/// Two namespaces must never be able to print the same identifier. That
/// happens when one prefix is the other followed only by digits, e.g. `S-`
/// and `S-`, or `E` and `E1` (`E10001` vs `E1` + `0001`).
fn check_distinct_prefixes(rules: &HashMap<String, FormatRule>) -> Result<(), FormatError> {
    let mut sorted: Vec<(&String, &FormatRule)> = rules.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(b.0));

    for (i, (namespace, rule)) in sorted.iter().enumerate() {
        for (other, other_rule) in &sorted[i + 1..] {
            let (short, long) = if rule.prefix.len() <= other_rule.prefix.len() {
                (&rule.prefix, &other_rule.prefix)
            } else {
                (&other_rule.prefix, &rule.prefix)
            };
            let clashes = long
                .strip_prefix(short.as_str())
                .is_some_and(|rest| rest.bytes().all(|b| b.is_ascii_digit()));
            if clashes {
                return Err(FormatError::InvalidRule {
                    namespace: other.to_string(),
                    reason: format!(
                        "prefix {:?} can produce the same identifiers as {:?} of namespace {}",
                        other_rule.prefix, rule.prefix, namespace
                    ),
                });
            }
        }
    }
    Ok(())
}

/// Turns allocated numbers into identifiers and back.
#[derive(Debug, Clone, Default)]
pub struct IdentifierFormatter {
    rules: HashMap<String, FormatRule>,
}

impl IdentifierFormatter {
    /// Validates every rule up front so that bad configuration fails at startup.
    pub fn new(
        rules: impl IntoIterator<Item = (String, FormatRule)>,
    ) -> Result<Self, FormatError> {
        let rules: HashMap<String, FormatRule> = rules.into_iter().collect();
        for (namespace, rule) in &rules {
            rule.validate(namespace)?;
        }
        check_distinct_prefixes(&rules)?;
        Ok(Self { rules })
    }

    /// Rules for the application's entity types: four digits, growing on overflow.
    pub fn with_defaults() -> Self {
        let rules = [
            ("employee", "EMP-"),
            ("product", "PRD-"),
            ("shipment", "SHP-"),
            ("sale", "SAL-"),
            ("delivery", "DLV-"),
        ]
        .into_iter()
        .map(|(namespace, prefix)| (namespace.to_string(), FormatRule::new(prefix, 4)))
        .collect();
        Self { rules }
    }

    /// Parses a JSON object mapping namespace to rule, e.g.
    /// `{"employee": {"prefix": "EMP-", "width": 4, "on_overflow": "fail"}}`.
    pub fn from_json(json: &str) -> Result<Self, FormatError> {
        let rules: HashMap<String, FormatRule> =
            serde_json::from_str(json).map_err(|e| FormatError::Config(e.to_string()))?;
        Self::new(rules)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, FormatError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| FormatError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&json)
    }

    /// Loads rules from the file named by `SEQALLOC_FORMAT_RULES`, or the
    /// defaults when it is unset.
    pub fn from_env() -> Result<Self, FormatError> {
        match std::env::var("SEQALLOC_FORMAT_RULES") {
            Ok(path) if !path.trim().is_empty() => {
                tracing::info!(path = %path, "Loading identifier format rules");
                Self::from_json_file(path.trim())
            }
            _ => Ok(Self::with_defaults()),
        }
    }

    pub fn rule(&self, namespace: &str) -> Option<&FormatRule> {
        self.rules.get(namespace)
    }

    fn require_rule(&self, namespace: &str) -> Result<&FormatRule, FormatError> {
        self.rule(namespace)
            .ok_or_else(|| FormatError::UnknownNamespace(namespace.to_string()))
    }

    pub fn format(&self, namespace: &str, value: u64) -> Result<String, FormatError> {
        let rule = self.require_rule(namespace)?;
        let digits = value.to_string();
        if digits.len() > rule.width && rule.on_overflow == OverflowPolicy::Fail {
            return Err(FormatError::Overflow {
                namespace: namespace.to_string(),
                value,
                width: rule.width,
            });
        }
        Ok(format!("{}{:0>width$}", rule.prefix, digits, width = rule.width))
    }

    /// Inverse of [`format`](Self::format). Only the exact string `format` would
    /// produce is accepted.
    pub fn parse(&self, namespace: &str, identifier: &str) -> Result<u64, FormatError> {
        let rule = self.require_rule(namespace)?;
        let malformed = || FormatError::Malformed {
            namespace: namespace.to_string(),
            identifier: identifier.to_string(),
        };

        let digits = identifier.strip_prefix(&rule.prefix).ok_or_else(malformed)?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(malformed());
        }
        let value: u64 = digits.parse().map_err(|_| malformed())?;

        // Rejects "EMP-07", "EMP-000007" and over-wide values under Fail
        if self.format(namespace, value).ok().as_deref() != Some(identifier) {
            return Err(malformed());
        }
        Ok(value)
    }
}
