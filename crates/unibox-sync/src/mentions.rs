// SPDX-FileCopyrightText: 2026 Unibox Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Inline mention rendering.
//!
//! Platform mention tokens such as `<@U123>` are rewritten to `@name` using a
//! user id to name mapping fetched once per connection. Resolution never
//! fails a message: unknown ids and lookup errors leave the token as is.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use regex::{Captures, Regex};
use tracing::{debug, warn};
use unibox_core::{ConnectorAdapter, Customer, UniboxError};

/// How one platform writes mentions.
#[derive(Debug, Clone)]
pub struct MentionPattern {
    pub regex: Regex,
    /// Pulls the platform user id out of a match.
    pub extract_user_id: fn(&Captures<'_>) -> Option<String>,
    pub format_replacement: fn(&str) -> String,
}

fn first_group(caps: &Captures<'_>) -> Option<String> {
    caps.get(1).map(|m| m.as_str().to_string())
}

fn at_name(name: &str) -> String {
    format!("@{name}")
}

impl MentionPattern {
    /// A pattern whose first capture group is the user id, rendered as `@name`.
    pub fn new(pattern: &str) -> Result<Self, UniboxError> {
        let regex = Regex::new(pattern)
            .map_err(|e| UniboxError::Config(format!("invalid mention pattern: {e}")))?;
        Ok(Self {
            regex,
            extract_user_id: first_group,
            format_replacement: at_name,
        })
    }

    /// Rewrites every mention whose user id is in `names`.
    pub fn replace(&self, content: &str, names: &HashMap<String, String>) -> String {
        self.regex
            .replace_all(content, |caps: &Captures<'_>| {
                (self.extract_user_id)(caps)
                    .and_then(|id| names.get(&id))
                    .map(|name| (self.format_replacement)(name))
                    .unwrap_or_else(|| caps[0].to_string())
            })
            .into_owned()
    }
}

/// Platform key to mention pattern table.
#[derive(Debug, Clone, Default)]
pub struct MentionRegistry {
    patterns: HashMap<String, MentionPattern>,
}

impl MentionRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry with the built-in Slack, Teams, WhatsApp, and Discord patterns.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        for (platform, pattern) in [
            ("slack", r"<@([A-Z0-9]+)>"),
            ("microsoft-teams", r#"<at id="([^"]+)">([^<]+)</at>"#),
            ("whatsapp", r"@(\d+)"),
            ("discord", r"<@!?(\d+)>"),
        ] {
            if let Ok(pattern) = MentionPattern::new(pattern) {
                registry.register(platform, pattern);
            }
        }
        registry
    }

    /// Adds or replaces the pattern for a platform. Keys are case-insensitive.
    pub fn register(&mut self, platform: &str, pattern: MentionPattern) {
        self.patterns.insert(platform.to_lowercase(), pattern);
    }

    pub fn get(&self, platform: &str) -> Option<&MentionPattern> {
        self.patterns.get(&platform.to_lowercase())
    }
}

/// Rewrites mentions, caching user mappings per connection for the process lifetime.
pub struct MentionResolver {
    registry: MentionRegistry,
    cache: DashMap<String, Arc<HashMap<String, String>>>,
}

impl MentionResolver {
    pub fn new(registry: MentionRegistry) -> Self {
        Self {
            registry,
            cache: DashMap::new(),
        }
    }

    /// Replaces mentions in `content`. Returns the input unchanged when the
    /// platform has no pattern, no mention matches, or no mapping is available.
    pub async fn resolve(
        &self,
        connector: &dyn ConnectorAdapter,
        customer: &Customer,
        connection_id: &str,
        platform: &str,
        content: &str,
    ) -> String {
        let Some(pattern) = self.registry.get(platform) else {
            return content.to_string();
        };
        if !pattern.regex.is_match(content) {
            return content.to_string();
        }

        let Some(names) = self.mappings(connector, customer, connection_id, platform).await else {
            return content.to_string();
        };
        pattern.replace(content, &names)
    }

    async fn mappings(
        &self,
        connector: &dyn ConnectorAdapter,
        customer: &Customer,
        connection_id: &str,
        platform: &str,
    ) -> Option<Arc<HashMap<String, String>>> {
        let key = format!("{connection_id}-{}", platform.to_lowercase());
        if let Some(cached) = self.cache.get(&key) {
            return Some(Arc::clone(cached.value()));
        }

        match connector.fetch_user_mappings(customer, connection_id).await {
            Ok(names) if names.is_empty() => {
                debug!(connection_id, "no user mappings available");
                None
            }
            Ok(names) => {
                let names = Arc::new(names);
                self.cache.insert(key, Arc::clone(&names));
                debug!(connection_id, count = names.len(), "cached user mappings");
                Some(names)
            }
            Err(e) => {
                warn!(connection_id, error = %e, "failed to fetch user mappings");
                None
            }
        }
    }

    /// Drops every cached mapping.
    pub fn clear(&self) {
        self.cache.clear();
    }

    pub fn cached_connections(&self) -> usize {
        self.cache.len()
    }
}

impl Default for MentionResolver {
    fn default() -> Self {
        Self::new(MentionRegistry::with_defaults())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use unibox_test_utils::{MockCall, MockConnector, MockFailure};

    fn names() -> HashMap<String, String> {
        HashMap::from([
            ("U1".to_string(), "alice".to_string()),
            ("123".to_string(), "bob".to_string()),
        ])
    }

    #[test]
    fn default_patterns() {
        let registry = MentionRegistry::with_defaults();
        let slack = registry.get("Slack").unwrap();
        assert_eq!(slack.replace("hi <@U1> and <@U9>", &names()), "hi @alice and <@U9>");

        let discord = registry.get("discord").unwrap();
        assert_eq!(discord.replace("<@!123> <@123>", &names()), "@bob @bob");

        let teams = registry.get("microsoft-teams").unwrap();
        assert_eq!(
            teams.replace(r#"ping <at id="U1">Alice S</at>"#, &names()),
            "ping @alice"
        );

        let whatsapp = registry.get("whatsapp").unwrap();
        assert_eq!(whatsapp.replace("call @123", &names()), "call @bob");

        assert!(registry.get("email").is_none());
    }

    #[test]
    fn custom_pattern_registration() {
        let mut registry = MentionRegistry::empty();
        registry.register("Matrix", MentionPattern::new(r"@(\w+):server").unwrap());
        let pattern = registry.get("matrix").unwrap();
        assert_eq!(pattern.replace("yo @U1:server", &names()), "yo @alice");
    }

    #[tokio::test]
    async fn resolver_caches_per_connection() {
        let connector = MockConnector::new().with_user_mappings("conn-1", names());
        let resolver = MentionResolver::default();
        let customer = Customer::new("cust-1");

        let first = resolver
            .resolve(&connector, &customer, "conn-1", "slack", "hey <@U1>")
            .await;
        let second = resolver
            .resolve(&connector, &customer, "conn-1", "slack", "bye <@U1>")
            .await;
        assert_eq!(first, "hey @alice");
        assert_eq!(second, "bye @alice");
        assert_eq!(connector.calls(MockCall::UserMappings).await, 1);
        assert_eq!(resolver.cached_connections(), 1);

        resolver.clear();
        assert_eq!(resolver.cached_connections(), 0);
    }

    #[tokio::test]
    async fn resolver_skips_lookup_without_mentions() {
        let connector = MockConnector::new().with_user_mappings("conn-1", names());
        let resolver = MentionResolver::default();
        let out = resolver
            .resolve(&connector, &Customer::new("c"), "conn-1", "slack", "plain text")
            .await;
        assert_eq!(out, "plain text");
        assert_eq!(connector.calls(MockCall::UserMappings).await, 0);
    }

    #[tokio::test]
    async fn lookup_failure_keeps_original_content() {
        let connector = MockConnector::new();
        connector
            .fail_next(MockCall::UserMappings, MockFailure::Upstream("down".into()))
            .await;
        let resolver = MentionResolver::default();
        let out = resolver
            .resolve(&connector, &Customer::new("c"), "conn-1", "slack", "hi <@U1>")
            .await;
        assert_eq!(out, "hi <@U1>");
        assert_eq!(resolver.cached_connections(), 0);
    }
}
