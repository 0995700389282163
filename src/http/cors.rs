use crate::http::headers::HeaderMap;
use serde::{Deserialize, Serialize};

/// Cross-origin headers added to every response, so browser pages served
/// from elsewhere on the device can call the local API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorsConfig {
    pub enabled: bool,
    pub allow_origin: String,
    pub allow_methods: String,
    pub allow_headers: String,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            allow_origin: "*".to_string(),
            allow_methods: "GET, POST, PUT, DELETE, OPTIONS".to_string(),
            allow_headers: "Content-Type".to_string(),
        }
    }
}

impl CorsConfig {
    /// Adds the CORS headers a handler did not set itself.
    pub fn apply(&self, headers: &mut HeaderMap) {
        if !self.enabled {
            return;
        }
        for (name, value) in [
            ("Access-Control-Allow-Origin", &self.allow_origin),
            ("Access-Control-Allow-Methods", &self.allow_methods),
            ("Access-Control-Allow-Headers", &self.allow_headers),
        ] {
            if !headers.contains(name) {
                headers.insert(name, value.as_str());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handler_values_win() {
        let mut headers = HeaderMap::new();
        headers.insert("Access-Control-Allow-Origin", "http://app.local");

        CorsConfig::default().apply(&mut headers);

        assert_eq!(
            headers.get("access-control-allow-origin"),
            Some("http://app.local")
        );
        assert_eq!(headers.get("access-control-allow-headers"), Some("Content-Type"));
    }

    #[test]
    fn disabled_adds_nothing() {
        let mut headers = HeaderMap::new();
        let cors = CorsConfig {
            enabled: false,
            ..CorsConfig::default()
        };
        cors.apply(&mut headers);

        assert!(headers.is_empty());
    }
}
