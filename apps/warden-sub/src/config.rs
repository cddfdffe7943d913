use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;

use crate::singbox::BASE_TEMPLATE;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubConfig {
    pub panel_url: String,
    pub auth_token: String,
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    /// Replaces the built-in sing-box base document.
    #[serde(default)]
    pub template_path: Option<String>,
}

fn default_listen_port() -> u16 {
    8080
}

impl SubConfig {
    pub fn load() -> Result<Self> {
        let config_paths = vec!["/etc/warden/sub.toml", "./sub.toml"];

        for path in config_paths {
            if let Ok(contents) = fs::read_to_string(path) {
                tracing::info!("Loading config from {}", path);
                return toml::from_str(&contents).with_context(|| format!("invalid config {path}"));
            }
        }

        tracing::info!("Loading config from environment");
        Ok(Self {
            panel_url: std::env::var("PANEL_URL").context("PANEL_URL is not set")?,
            auth_token: std::env::var("AUTH_TOKEN").context("AUTH_TOKEN is not set")?,
            listen_port: std::env::var("LISTEN_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or_else(default_listen_port),
            template_path: std::env::var("TEMPLATE_PATH").ok(),
        })
    }

    /// Base document every subscription is compiled into.
    pub fn load_template(&self) -> Result<Value> {
        let raw = match &self.template_path {
            Some(path) => fs::read_to_string(path)
                .with_context(|| format!("failed to read template {path}"))?,
            None => BASE_TEMPLATE.to_string(),
        };
        serde_json::from_str(&raw).context("template is not valid JSON")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn config(template_path: Option<String>) -> SubConfig {
        SubConfig {
            panel_url: "http://panel.local".to_string(),
            auth_token: "token".to_string(),
            listen_port: 8080,
            template_path,
        }
    }

    #[test]
    fn parses_toml_with_defaults() {
        let cfg: SubConfig = toml::from_str(
            r#"
            panel_url = "https://panel.example.com"
            auth_token = "secret"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.listen_port, 8080);
        assert!(cfg.template_path.is_none());
    }

    #[test]
    fn builtin_template_has_the_expected_shape() {
        let template = config(None).load_template().unwrap();
        assert!(template["dns"]["rules"][0]["domain"].is_array());
        assert!(template["outbounds"].is_array());
    }

    #[test]
    fn template_path_overrides_builtin() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"dns":{{"rules":[{{"domain":[]}}]}},"outbounds":[]}}"#).unwrap();

        let template = config(Some(file.path().display().to_string()))
            .load_template()
            .unwrap();
        assert_eq!(template["outbounds"], serde_json::json!([]));
    }

    #[test]
    fn unreadable_template_is_an_error() {
        assert!(config(Some("/nonexistent/warden.json".to_string())).load_template().is_err());
    }
}
