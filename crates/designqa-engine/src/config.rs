use std::env;
use std::fmt;
use std::time::Duration;

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Size bounds applied to each image before it is sent to the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportLimits {
    pub max_edge: u32,
    pub max_bytes: usize,
}

impl Default for TransportLimits {
    fn default() -> Self {
        Self {
            max_edge: 2048,
            max_bytes: 4 * 1024 * 1024,
        }
    }
}

#[derive(Clone)]
pub struct GatewayConfig {
    pub api_base: String,
    pub api_key: Option<String>,
    pub request_timeout: Duration,
    pub limits: TransportLimits,
}

impl GatewayConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from any key lookup; numeric settings fall back to
    /// their defaults when unparsable and are clamped to safe bounds.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let defaults = TransportLimits::default();

        let api_base = non_empty("GEMINI_API_BASE")
            .map(|value| value.trim_end_matches('/').to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string());
        let api_key = non_empty("GEMINI_API_KEY").or_else(|| non_empty("GOOGLE_API_KEY"));
        let timeout_s = value_in_range(
            non_empty("DESIGNQA_REQUEST_TIMEOUT").as_deref(),
            90.0,
            15.0,
            300.0,
        );
        let max_edge = value_in_range(
            non_empty("DESIGNQA_MAX_IMAGE_EDGE").as_deref(),
            f64::from(defaults.max_edge),
            256.0,
            8192.0,
        );
        let max_bytes = value_in_range(
            non_empty("DESIGNQA_MAX_IMAGE_BYTES").as_deref(),
            defaults.max_bytes as f64,
            256.0 * 1024.0,
            20.0 * 1024.0 * 1024.0,
        );

        Self {
            api_base,
            api_key,
            request_timeout: Duration::from_secs_f64(timeout_s),
            limits: TransportLimits {
                max_edge: max_edge.round() as u32,
                max_bytes: max_bytes.round() as usize,
            },
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("api_base", &self.api_base)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("request_timeout", &self.request_timeout)
            .field("limits", &self.limits)
            .finish()
    }
}

fn value_in_range(raw: Option<&str>, default: f64, min: f64, max: f64) -> f64 {
    raw.and_then(|value| value.parse::<f64>().ok())
        .filter(|value| value.is_finite())
        .unwrap_or(default)
        .clamp(min, max)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use super::{GatewayConfig, DEFAULT_API_BASE};

    fn config_from(pairs: &[(&str, &str)]) -> GatewayConfig {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        GatewayConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_without_environment() {
        let config = GatewayConfig::default();
        assert_eq!(config.api_base, DEFAULT_API_BASE);
        assert_eq!(config.api_key, None);
        assert_eq!(config.request_timeout, Duration::from_secs(90));
        assert_eq!(config.limits.max_edge, 2048);
        assert_eq!(config.limits.max_bytes, 4 * 1024 * 1024);
    }

    #[test]
    fn environment_overrides_are_trimmed_and_clamped() {
        let config = config_from(&[
            ("GEMINI_API_BASE", " https://proxy.example.test/v1beta/ "),
            ("GOOGLE_API_KEY", "google-key"),
            ("DESIGNQA_REQUEST_TIMEOUT", "5"),
            ("DESIGNQA_MAX_IMAGE_EDGE", "100000"),
            ("DESIGNQA_MAX_IMAGE_BYTES", "not-a-number"),
        ]);
        assert_eq!(config.api_base, "https://proxy.example.test/v1beta");
        assert_eq!(config.api_key.as_deref(), Some("google-key"));
        assert_eq!(config.request_timeout, Duration::from_secs(15));
        assert_eq!(config.limits.max_edge, 8192);
        assert_eq!(config.limits.max_bytes, 4 * 1024 * 1024);
    }

    #[test]
    fn gemini_key_wins_and_debug_redacts_it() {
        let config = config_from(&[
            ("GEMINI_API_KEY", "gemini-secret"),
            ("GOOGLE_API_KEY", "google-key"),
        ]);
        assert_eq!(config.api_key.as_deref(), Some("gemini-secret"));
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("gemini-secret"));
        assert!(rendered.contains("<redacted>"));
    }
}
