//! Input matchers: commands, ambient messages, replies, and job triggers.

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::CoreError;

/// A configured regular expression and what it maps to.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InputMatcher {
    /// The regular expression, before massaging.
    pub regex: String,
    /// Command passed to the task when this matcher fires.
    #[serde(default)]
    pub command: String,
    /// Label for reply matchers (the regex ID used by `wait_for_reply`).
    #[serde(default)]
    pub label: String,
    /// Contexts for captured arguments.
    #[serde(default)]
    pub contexts: Vec<String>,
    /// For job triggers: the user who must send the message.
    #[serde(default)]
    pub user: String,
    /// For job triggers: the channel the message must arrive in.
    #[serde(default)]
    pub channel: String,
    #[serde(skip)]
    re: Option<Regex>,
}

impl InputMatcher {
    /// Create a matcher for a command.
    pub fn command(command: impl Into<String>, regex: impl Into<String>) -> Self {
        Self {
            regex: regex.into(),
            command: command.into(),
            ..Default::default()
        }
    }

    /// Compile the regular expression. Anchored matchers must match the
    /// whole input, ignoring surrounding whitespace.
    pub fn compile(&mut self, anchored: bool) -> Result<(), CoreError> {
        let massaged = massage_regexp(&self.regex);
        let pattern = if anchored {
            format!(r"^\s*{}\s*$", massaged)
        } else {
            massaged.clone()
        };
        let re = Regex::new(&pattern).map_err(|source| CoreError::InvalidRegex {
            regex: massaged,
            source,
        })?;
        self.re = Some(re);
        Ok(())
    }

    /// The compiled expression, if `compile` succeeded.
    pub fn compiled(&self) -> Option<&Regex> {
        self.re.as_ref()
    }

    /// Match the input, returning captured groups (not the whole match).
    /// Unmatched optional groups are returned as empty strings.
    pub fn captures(&self, text: &str) -> Option<Vec<String>> {
        let caps = self.re.as_ref()?.captures(text)?;
        Some(
            caps.iter()
                .skip(1)
                .map(|m| m.map(|m| m.as_str().to_string()).unwrap_or_default())
                .collect(),
        )
    }

    /// Returns true if the input matches.
    pub fn is_match(&self, text: &str) -> bool {
        self.re.as_ref().is_some_and(|re| re.is_match(text))
    }
}

/// Rewrite a configured regex so literal spaces match runs of whitespace.
///
/// A space inside a character class stays a single literal space, ` ?`
/// becomes `\s*`, and any other space becomes `\s+`.
pub fn massage_regexp(r: &str) -> String {
    let mut out = String::with_capacity(r.len() + 8);
    let mut chars = r.chars().peekable();
    let mut in_class = false;
    let mut escaped = false;
    while let Some(c) = chars.next() {
        if escaped {
            out.push(c);
            escaped = false;
            continue;
        }
        match c {
            '\\' => {
                out.push(c);
                escaped = true;
            }
            '[' if !in_class => {
                in_class = true;
                out.push(c);
            }
            ']' if in_class => {
                in_class = false;
                out.push(c);
            }
            ' ' if in_class => out.push_str(r"\x20"),
            ' ' => {
                if chars.peek() == Some(&'?') {
                    chars.next();
                    out.push_str(r"\s*");
                } else {
                    out.push_str(r"\s+");
                }
            }
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_massage_regexp() {
        assert_eq!(massage_regexp("deploy (.*)"), r"deploy\s+(.*)");
        assert_eq!(massage_regexp("hello ?world"), r"hello\s*world");
        assert_eq!(massage_regexp("[a b]"), r"[a\x20b]");
        assert_eq!(massage_regexp(r"a\ b"), r"a\ b");
    }

    #[test]
    fn test_anchored_command_matcher() {
        let mut m = InputMatcher::command("deploy", "deploy (\\w+)");
        m.compile(true).unwrap();
        assert_eq!(m.captures("  deploy   prod "), Some(vec!["prod".to_string()]));
        assert!(m.captures("please deploy prod").is_none());
    }

    #[test]
    fn test_unanchored_message_matcher() {
        let mut m = InputMatcher::command("beer", "beer");
        m.compile(false).unwrap();
        assert!(m.is_match("who wants a beer today"));
    }

    #[test]
    fn test_compile_failure() {
        let mut m = InputMatcher::command("bad", "deploy (");
        assert!(matches!(m.compile(true), Err(CoreError::InvalidRegex { .. })));
        assert!(m.compiled().is_none());
    }
}
