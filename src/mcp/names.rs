//! Exposed tool-name resolution.
//!
//! The agent-visible function-name alphabet is restricted to
//! `[A-Za-z0-9_-]` and bounded to 64 characters. Names take the shape
//! `{prefix}{delimiter}{server}_X_{tool}`; overlong names are truncated,
//! collisions get numeric suffixes, and pathological inputs fall back to
//! a content hash. Resolution is deterministic for a fixed ordered input
//! and never hands out the same name twice within one pass.

use std::collections::{HashMap, HashSet};

use sha2::{Digest, Sha256};

/// Hard budget for an exposed name.
pub const MAX_NAME_LEN: usize = 64;

/// First-round component truncation limits.
const SERVER_TRUNC: usize = 10;
const TOOL_TRUNC: usize = 15;

/// Deeper truncation applied when a disambiguator overflows the budget.
const SERVER_TRUNC_HARD: usize = 5;
const TOOL_TRUNC_HARD: usize = 10;

/// Replace every character outside the allowed alphabet with `_`.
pub fn sanitize_component(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn head(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

/// Hands out exposed names for one catalog build.
///
/// Tracks every name produced so far, so two raw pairs that sanitize or
/// truncate to the same string still resolve to distinct names.
pub struct NameResolver {
    prefix: String,
    delimiter: String,
    used: HashSet<String>,
    counters: HashMap<String, u32>,
}

impl NameResolver {
    pub fn new(prefix: &str, delimiter: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            delimiter: delimiter.to_string(),
            used: HashSet::new(),
            counters: HashMap::new(),
        }
    }

    fn compose(&self, server: &str, tool: &str) -> String {
        sanitize_component(&format!(
            "{}{}{}_X_{}",
            self.prefix, self.delimiter, server, tool
        ))
    }

    /// Resolve one `(server, tool)` pair to a unique exposed name.
    pub fn resolve(&mut self, server: &str, tool: &str) -> String {
        let server_part = sanitize_component(server);
        let tool_part = sanitize_component(tool);
        let raw = format!("{server_part}_X_{tool_part}");

        let full = self.compose(&server_part, &tool_part);
        if full.len() <= MAX_NAME_LEN && !self.used.contains(&full) {
            self.used.insert(full.clone());
            return full;
        }

        let shortened = self.compose(
            &head(&server_part, SERVER_TRUNC),
            &head(&tool_part, TOOL_TRUNC),
        );
        let harder = self.compose(
            &head(&server_part, SERVER_TRUNC_HARD),
            &head(&tool_part, TOOL_TRUNC_HARD),
        );

        loop {
            let n = *self.counters.get(&shortened).unwrap_or(&0);
            self.counters.insert(shortened.clone(), n + 1);

            let candidate = if n == 0 {
                shortened.clone()
            } else {
                let suffixed = format!("{shortened}{n}");
                if suffixed.len() <= MAX_NAME_LEN {
                    suffixed
                } else {
                    format!("{harder}{n}")
                }
            };

            if candidate.len() > MAX_NAME_LEN {
                return self.hash_fallback(&raw);
            }
            if !self.used.contains(&candidate) {
                tracing::debug!(raw = %raw, resolved = %candidate, "shortened tool name");
                self.used.insert(candidate.clone());
                return candidate;
            }
        }
    }

    /// Last resort: a fixed-length name derived from a content hash of
    /// the raw name. Bounded regardless of input length, and collisions
    /// are negligible at catalog scale.
    fn hash_fallback(&mut self, raw: &str) -> String {
        let digest = Sha256::digest(raw.as_bytes());
        let hash: String = digest[..4].iter().map(|b| format!("{b:02x}")).collect();
        let base = sanitize_component(&format!("{}{}tool_{hash}", self.prefix, self.delimiter));

        let mut candidate = base.clone();
        let mut n = 1u32;
        while self.used.contains(&candidate) {
            candidate = format!("{base}{n}");
            n += 1;
        }
        tracing::debug!(raw = %raw, resolved = %candidate, "hashed overlong tool name");
        self.used.insert(candidate.clone());
        candidate
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn charset_ok(name: &str) -> bool {
        name.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    }

    #[test]
    fn test_short_name_passes_through() {
        let mut resolver = NameResolver::new("mcp", "____");
        assert_eq!(resolver.resolve("alpha", "echo"), "mcp____alpha_X_echo");
    }

    #[test]
    fn test_disallowed_characters_become_underscores() {
        let mut resolver = NameResolver::new("mcp", "____");
        assert_eq!(
            resolver.resolve("my.server", "read file!"),
            "mcp____my_server_X_read_file_"
        );
    }

    #[test]
    fn test_overlong_name_is_truncated_within_budget() {
        let mut resolver = NameResolver::new("mcp", "____");
        let name = resolver.resolve(
            "extremely-long-server-name-for-testing",
            "an-unreasonably-long-tool-name-that-blows-the-budget",
        );
        assert!(name.len() <= MAX_NAME_LEN);
        assert!(charset_ok(&name));
        // First ten chars of the server, first fifteen of the tool.
        assert_eq!(name, "mcp____extremely-_X_an-unreasonabl");
    }

    #[test]
    fn test_truncation_collisions_get_distinct_suffixes() {
        let mut resolver = NameResolver::new("mcp", "____");
        // Identical after truncation, distinct before it.
        let a = resolver.resolve("shared-server-prefix-one", "shared_tool_name_number_one_alpha");
        let b = resolver.resolve("shared-server-prefix-two", "shared_tool_name_number_one_beta");
        let c = resolver.resolve("shared-server-prefix-six", "shared_tool_name_number_one_gamma");

        assert_ne!(a, b);
        assert_ne!(b, c);
        assert_ne!(a, c);
        for name in [&a, &b, &c] {
            assert!(name.len() <= MAX_NAME_LEN);
            assert!(charset_ok(name));
        }
        assert_eq!(b, format!("{a}1"));
        assert_eq!(c, format!("{a}2"));
    }

    #[test]
    fn test_sanitization_collisions_get_distinct_names() {
        let mut resolver = NameResolver::new("mcp", "____");
        // Distinct raw pairs, identical once sanitized.
        let a = resolver.resolve("srv", "read.file");
        let b = resolver.resolve("srv", "read_file");
        assert_ne!(a, b);
        assert!(charset_ok(&b));
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let pairs = [
            ("alpha", "echo"),
            ("my.server", "read file"),
            ("shared-server-prefix-one", "shared_tool_name_number_one_alpha"),
            ("shared-server-prefix-two", "shared_tool_name_number_one_beta"),
            ("extremely-long-server-name-for-testing", "tooooooooooooooooool"),
        ];

        let run = || {
            let mut resolver = NameResolver::new("mcp", "____");
            pairs
                .iter()
                .map(|(s, t)| resolver.resolve(s, t))
                .collect::<Vec<_>>()
        };

        let first = run();
        let second = run();
        assert_eq!(first, second);

        // Injective: no two pairs share a name.
        let unique: HashSet<&String> = first.iter().collect();
        assert_eq!(unique.len(), first.len());
    }

    #[test]
    fn test_hash_fallback_when_truncation_is_not_enough() {
        // A prefix long enough that even hard truncation overflows.
        let prefix = "x".repeat(45);
        let mut resolver = NameResolver::new(&prefix, "____");
        let a = resolver.resolve("some-very-long-server", "some-very-long-tool-name");
        let b = resolver.resolve("another-long-server", "another-long-tool-name");

        for name in [&a, &b] {
            assert!(name.len() <= MAX_NAME_LEN);
            assert!(charset_ok(name));
            assert!(name.contains("tool_"), "expected hash form, got {name}");
        }
        // Different raw names hash differently.
        assert_ne!(a, b);
    }
}
