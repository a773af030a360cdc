//! Upstream discovery from environment variables.
//!
//! Keys are discovered as `<PROVIDER>_KEY_<N>` (preferred) with
//! `<PROVIDER>_API_KEY_<N>` accepted as a fallback spelling. `N` is a
//! positive decimal instance number; a duplicate `(provider, N)` resolves to
//! the preferred form.

use std::collections::HashMap;

use crate::core::upstream::ProviderKind;

/// One API key found in the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredKey {
    pub kind: ProviderKind,
    pub instance: u32,
    pub api_key: String,
}

/// Scan the process environment for upstream API keys.
pub fn discover_upstreams() -> Vec<DiscoveredKey> {
    discover_from_vars(std::env::vars())
}

pub(crate) fn discover_from_vars(
    vars: impl Iterator<Item = (String, String)>,
) -> Vec<DiscoveredKey> {
    // (kind, instance) -> (preferred, fallback)
    let mut found: HashMap<(ProviderKind, u32), (Option<String>, Option<String>)> = HashMap::new();

    for (name, value) in vars {
        if value.is_empty() {
            continue;
        }
        let Some((kind, instance, preferred)) = parse_key_name(&name) else {
            continue;
        };
        let entry = found.entry((kind, instance)).or_default();
        if preferred {
            entry.0 = Some(value);
        } else {
            entry.1 = Some(value);
        }
    }

    let mut keys: Vec<DiscoveredKey> = found
        .into_iter()
        .filter_map(|((kind, instance), (preferred, fallback))| {
            preferred.or(fallback).map(|api_key| DiscoveredKey {
                kind,
                instance,
                api_key,
            })
        })
        .collect();

    keys.sort_by(|a, b| {
        a.kind
            .as_str()
            .cmp(b.kind.as_str())
            .then_with(|| a.instance.cmp(&b.instance))
    });
    keys
}

/// Parse `GROQ_KEY_1` / `GROQ_API_KEY_1` style names. Returns
/// `(kind, instance, is_preferred_form)`.
fn parse_key_name(name: &str) -> Option<(ProviderKind, u32, bool)> {
    for kind in ProviderKind::ALL {
        let Some(rest) = name.strip_prefix(kind.env_prefix()) else {
            continue;
        };

        // The fallback spelling embeds `_KEY_` too, so check it first.
        let (suffix, preferred) = if let Some(s) = rest.strip_prefix("_API_KEY_") {
            (s, false)
        } else if let Some(s) = rest.strip_prefix("_KEY_") {
            (s, true)
        } else {
            continue;
        };

        let instance: u32 = suffix.parse().ok()?;
        if instance == 0 {
            return None;
        }
        return Some((kind, instance, preferred));
    }
    None
}
