// SPDX-FileCopyrightText: 2026 Unibox Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Turns figment errors into miette diagnostics.
//!
//! Unknown keys get a "did you mean" hint (Jaro-Winkler) and, when the key
//! came from a TOML file we read, a labelled span pointing at it.

#![allow(unused_assignments)] // miette's Diagnostic derive generates code triggering this lint

use figment::error::Kind;
use miette::{Diagnostic, NamedSource, SourceSpan};
use thiserror::Error;

/// Minimum Jaro-Winkler similarity for a suggestion.
const SUGGESTION_THRESHOLD: f64 = 0.75;

/// A configuration problem, ready for rendering.
#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("unknown configuration key `{key}`")]
    #[diagnostic(
        code(unibox::config::unknown_key),
        help("{}", unknown_key_help(suggestion.as_deref(), valid_keys))
    )]
    UnknownKey {
        key: String,
        /// Closest valid key, if any is close enough.
        suggestion: Option<String>,
        /// Comma-separated keys accepted in the same section.
        valid_keys: String,
        #[label("not a recognized key")]
        span: Option<SourceSpan>,
        #[source_code]
        src: Option<NamedSource<String>>,
    },

    #[error("invalid type for key `{key}`: {detail}")]
    #[diagnostic(code(unibox::config::invalid_type), help("expected {expected}"))]
    InvalidType {
        /// Dotted path, e.g. `delivery.max_message_length`.
        key: String,
        detail: String,
        expected: String,
        #[label("wrong type")]
        span: Option<SourceSpan>,
        #[source_code]
        src: Option<NamedSource<String>>,
    },

    #[error("missing required key `{key}`")]
    #[diagnostic(
        code(unibox::config::missing_key),
        help("set `{key}` in unibox.toml or through a UNIBOX_ environment variable")
    )]
    MissingKey { key: String },

    /// A value that parsed but is out of range or inconsistent.
    #[error("validation error: {message}")]
    #[diagnostic(code(unibox::config::validation))]
    Validation { message: String },

    #[error("configuration error: {0}")]
    #[diagnostic(code(unibox::config::other))]
    Other(String),
}

fn unknown_key_help(suggestion: Option<&str>, valid_keys: &str) -> String {
    match suggestion {
        Some(s) => format!("did you mean `{s}`? Valid keys: {valid_keys}"),
        None => format!("valid keys: {valid_keys}"),
    }
}

/// TOML files that fed the figment, as `(path, content)` pairs.
struct Sources<'a>(&'a [(String, String)]);

impl Sources<'_> {
    /// Points at `field` inside the file the error came from.
    fn locate(
        &self,
        error: &figment::Error,
        field: &str,
    ) -> (Option<SourceSpan>, Option<NamedSource<String>>) {
        let Some(path) = error
            .metadata
            .as_ref()
            .and_then(|m| m.source.as_ref())
            .and_then(|source| match source {
                figment::Source::File(path) => Some(path.display().to_string()),
                _ => None,
            })
        else {
            return (None, None);
        };
        let Some((name, content)) = self.0.iter().find(|(p, _)| *p == path) else {
            return (None, None);
        };

        let section: Vec<String> = error.path.iter().map(ToString::to_string).collect();
        match find_key_offset(content, &section, field) {
            Some(offset) => (
                Some(SourceSpan::new(offset.into(), field.len())),
                Some(NamedSource::new(name, content.clone())),
            ),
            None => (None, None),
        }
    }
}

/// Converts every error carried by a `figment::Error`.
pub fn figment_to_config_errors(
    err: figment::Error,
    toml_sources: &[(String, String)],
) -> Vec<ConfigError> {
    let sources = Sources(toml_sources);
    err.into_iter()
        .map(|error| match &error.kind {
            Kind::UnknownField(field, expected) => {
                let (span, src) = sources.locate(&error, field);
                ConfigError::UnknownKey {
                    key: field.clone(),
                    suggestion: suggest_key(field, expected),
                    valid_keys: expected.join(", "),
                    span,
                    src,
                }
            }
            Kind::MissingField(field) => ConfigError::MissingKey {
                key: dotted(&error, field),
            },
            Kind::InvalidType(actual, expected) => {
                // The path ends with the offending key itself.
                let (span, src) = match error.path.split_last() {
                    Some((field, section)) => {
                        let mut parent = error.clone();
                        parent.path = section.to_vec();
                        sources.locate(&parent, field)
                    }
                    None => (None, None),
                };
                ConfigError::InvalidType {
                    key: error.path.join("."),
                    detail: format!("found {actual}, expected {expected}"),
                    expected: expected.to_string(),
                    span,
                    src,
                }
            }
            _ => ConfigError::Other(error.to_string()),
        })
        .collect()
}

fn dotted(error: &figment::Error, field: &str) -> String {
    if error.path.is_empty() {
        field.to_string()
    } else {
        format!("{}.{field}", error.path.join("."))
    }
}

/// Byte offset of `field` inside the `[section]` table named by `path[0]`,
/// or among the top-level keys when `path` is empty.
///
/// Only the lines belonging to that table are searched.
pub fn find_key_offset(content: &str, path: &[String], field: &str) -> Option<usize> {
    let wanted = path.first().map(String::as_str);
    let mut current: Option<&str> = None;
    let mut offset = 0;

    for line in content.split_inclusive('\n') {
        let trimmed = line.trim_start();
        if let Some(header) = trimmed
            .strip_prefix('[')
            .and_then(|rest| rest.split(']').next())
        {
            current = Some(header.trim());
        } else if current == wanted
            && trimmed
                .strip_prefix(field)
                .is_some_and(|after| after.starts_with([' ', '\t', '=']))
        {
            return Some(offset + line.len() - trimmed.len());
        }
        offset += line.len();
    }
    None
}

/// The valid key most similar to `unknown`, if it clears the threshold.
pub fn suggest_key(unknown: &str, valid_keys: &[&str]) -> Option<String> {
    valid_keys
        .iter()
        .map(|key| (strsim::jaro_winkler(unknown, key), *key))
        .filter(|(score, _)| *score > SUGGESTION_THRESHOLD)
        .max_by(|a, b| a.0.total_cmp(&b.0))
        .map(|(_, key)| key.to_string())
}

/// Renders each error to stderr with miette's graphical handler.
pub fn render_errors(errors: &[ConfigError]) {
    use miette::GraphicalReportHandler;

    let handler = GraphicalReportHandler::new();
    eprintln!("unibox: {} configuration error(s)", errors.len());
    for error in errors {
        let mut buf = String::new();
        match handler.render_report(&mut buf, error as &dyn Diagnostic) {
            Ok(()) => eprint!("{buf}"),
            Err(_) => eprintln!("Error: {error}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suggests_closest_key() {
        let valid = &["host", "port", "log_level", "webhook_token"];
        assert_eq!(suggest_key("prot", valid), Some("port".to_string()));

        let broker = &["base_url", "workspace_key", "workspace_secret"];
        assert_eq!(
            suggest_key("workspace_secrt", broker),
            Some("workspace_secret".to_string())
        );
    }

    #[test]
    fn no_suggestion_for_distant_typo() {
        assert_eq!(suggest_key("zzzzzz", &["host", "port", "log_level"]), None);
    }

    #[test]
    fn key_offset_is_scoped_to_its_table() {
        let content = "max_pages = 1\n[server]\nport = 1\n\n[sync]\nmax_pagse = 3\n";
        let sync = vec!["sync".to_string()];
        let o = find_key_offset(content, &sync, "max_pagse").unwrap();
        assert_eq!(&content[o..o + 9], "max_pagse");

        let server = vec!["server".to_string()];
        assert_eq!(find_key_offset(content, &server, "max_pagse"), None);
        assert_eq!(find_key_offset(content, &[], "max_pages"), Some(0));
    }

    #[test]
    fn key_prefix_does_not_match_longer_key() {
        let content = "[sync]\nmax_pages_total = 2\nmax_pages = 3\n";
        let sync = vec!["sync".to_string()];
        let o = find_key_offset(content, &sync, "max_pages").unwrap();
        assert!(content[o..].starts_with("max_pages = 3"));
    }
}
