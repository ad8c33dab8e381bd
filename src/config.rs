use log::warn;
use std::env;
use std::str::FromStr;

const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Runtime settings, read from the environment after `.env` is loaded.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub port: u16,
    pub cert_path: Option<String>,
    pub key_path: Option<String>,
    pub api_key: Option<String>,
    pub api_base: String,
    pub generation_model: String,
    pub chat_model: String,
    /// Most recent turns sent upstream per chat request; `0` sends everything.
    pub chat_history_window: usize,
    pub request_timeout_secs: u64,
    /// Folder paths a freshly generated project opens with expanded.
    pub default_expanded: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".to_string(),
            port: 3000,
            cert_path: None,
            key_path: None,
            api_key: None,
            api_base: DEFAULT_API_BASE.to_string(),
            generation_model: "gemini-3-pro-preview".to_string(),
            chat_model: "gemini-3-flash-preview".to_string(),
            chat_history_window: 40,
            request_timeout_secs: 180,
            default_expanded: Vec::new(),
        }
    }
}

fn non_empty(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name).filter(|v| !v.trim().is_empty())
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> T {
    match non_empty(lookup, name) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("Ignoring invalid value '{}' for {}.", raw, name);
            default
        }),
        None => default,
    }
}

/// Comma-separated list; blank entries and stray slashes are dropped.
fn path_list(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Vec<String> {
    non_empty(lookup, name)
        .map(|raw| {
            raw.split(',')
                .map(|p| p.trim().trim_matches('/'))
                .filter(|p| !p.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the settings from any variable source, e.g. a map in tests.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Config::default();
        let var = |name: &str| non_empty(&lookup, name);
        Self {
            bind_addr: var("BIND_ADDR").unwrap_or(defaults.bind_addr),
            port: parsed(&lookup, "PORT", defaults.port),
            cert_path: var("CERT_PATH"),
            key_path: var("KEY_PATH"),
            api_key: var("GEMINI_API_KEY").or_else(|| var("API_KEY")),
            api_base: var("GEMINI_API_BASE").unwrap_or(defaults.api_base),
            generation_model: var("GENERATION_MODEL").unwrap_or(defaults.generation_model),
            chat_model: var("CHAT_MODEL").unwrap_or(defaults.chat_model),
            chat_history_window: parsed(&lookup, "CHAT_HISTORY_WINDOW", defaults.chat_history_window),
            request_timeout_secs: parsed(&lookup, "REQUEST_TIMEOUT_SECS", defaults.request_timeout_secs),
            default_expanded: path_list(&lookup, "DEFAULT_EXPANDED"),
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.addr(), "0.0.0.0:3000");
        assert_eq!(config.chat_history_window, 40);
        assert!(config.api_key.is_none());
    }

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn invalid_numbers_fall_back_to_default() {
        let lookup = vars(&[("PORT", "not-a-port"), ("CHAT_HISTORY_WINDOW", " 12 ")]);
        assert_eq!(parsed(&lookup, "PORT", 8080u16), 8080);
        assert_eq!(parsed(&lookup, "CHAT_HISTORY_WINDOW", 40usize), 12);
        assert_eq!(parsed(&lookup, "REQUEST_TIMEOUT_SECS", 7u64), 7);
    }

    #[test]
    fn reads_settings_from_lookup() {
        let config = Config::from_lookup(vars(&[
            ("PORT", "9090"),
            ("API_KEY", "fallback-key"),
            ("CERT_PATH", "   "),
            ("DEFAULT_EXPANDED", "popup, /icons/ ,,src/lib"),
        ]));
        assert_eq!(config.addr(), "0.0.0.0:9090");
        assert_eq!(config.api_key.as_deref(), Some("fallback-key"));
        assert!(config.cert_path.is_none());
        assert_eq!(config.default_expanded, vec!["popup", "icons", "src/lib"]);
        assert!(Config::from_lookup(|_| None).default_expanded.is_empty());
    }
}
