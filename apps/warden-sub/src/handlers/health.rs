use crate::AppState;
use axum::{Json, extract::State};
use serde_json::{Value, json};

pub async fn health_check(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "panel_url": state.config.panel_url,
        "version": env!("CARGO_PKG_VERSION")
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SubConfig;

    #[tokio::test]
    async fn reports_ok_with_panel_url() {
        let config = SubConfig {
            panel_url: "http://panel.local".to_string(),
            auth_token: "token".to_string(),
            listen_port: 8080,
            template_path: None,
        };
        let state = AppState::new(config).unwrap();

        let Json(body) = health_check(State(state)).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["panel_url"], "http://panel.local");
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    }
}
