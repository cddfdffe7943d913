use crate::AppState;
use crate::singbox::{CompileError, ConfigGenerator};
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::Value;
use tracing::{error, info};
use warden_shared::CompilerSettings;
use warden_shared::api::SubscriptionBundle;
use warden_shared::client::ClientProfile;

pub async fn singbox_handler(
    Path(uuid): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Response {
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let client = ClientProfile::from_user_agent(user_agent);

    info!(
        "Subscription request: UUID={}, hiddify={}, version={:?}",
        uuid, client.is_hiddify, client.version
    );

    let bundle = match state.panel_client.get_subscription(&uuid).await {
        Ok(b) => b,
        Err(e) => {
            error!("Failed to fetch subscription: {}", e);
            return (StatusCode::NOT_FOUND, "Subscription not found").into_response();
        }
    };

    let settings = match state.panel_client.get_settings().await {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to fetch panel settings: {}", e);
            return (StatusCode::SERVICE_UNAVAILABLE, "Panel unavailable").into_response();
        }
    };

    match render_singbox(&bundle, &settings, &state.template, client) {
        Ok(body) => singbox_response(body),
        Err(e) => {
            error!("Failed to compile sing-box config: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

/// Compiles one bundle into the pretty-printed client document.
pub fn render_singbox(
    bundle: &SubscriptionBundle,
    settings: &CompilerSettings,
    template: &Value,
    client: ClientProfile,
) -> Result<String, CompileError> {
    let doc = ConfigGenerator::compile(&bundle.proxies, &bundle.domains, template, settings, client)?;
    serde_json::to_string_pretty(&doc).map_err(|e| CompileError::Template(e.to_string()))
}

fn singbox_response(body: String) -> Response {
    (
        [
            (header::CONTENT_TYPE, "application/json".to_string()),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"singbox.json\"".to_string(),
            ),
            (header::HeaderName::from_static("profile-update-interval"), "24".to_string()),
        ],
        body,
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::singbox::BASE_TEMPLATE;
    use serde_json::json;

    fn bundle() -> SubscriptionBundle {
        serde_json::from_value(json!({
            "domains": ["de.example.com"],
            "proxies": [{
                "name": "de-1",
                "protocol": "trojan",
                "transport": "grpc",
                "security_layer": "tls",
                "server": "de.example.com",
                "port": 443,
                "sni": "de.example.com",
                "uuid": "5b8c1e0a-7a49-4c1e-9d3f-2f1f1b7d9a11",
                "grpc_service_name": "svc"
            }]
        }))
        .unwrap()
    }

    #[test]
    fn renders_bundle_into_template() {
        let template: Value = serde_json::from_str(BASE_TEMPLATE).unwrap();
        let body = render_singbox(
            &bundle(),
            &CompilerSettings::default(),
            &template,
            ClientProfile::from_user_agent("HiddifyNext/1.0.0"),
        )
        .unwrap();

        let doc: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(doc["dns"]["rules"][0]["domain"], json!(["de.example.com"]));
        assert_eq!(doc["outbounds"][0]["outbounds"], json!(["Auto", "de-1 § 443 0"]));
        assert_eq!(doc["outbounds"].as_array().unwrap().last().unwrap()["type"], "trojan");
    }

    #[test]
    fn broken_template_is_an_error() {
        let err = render_singbox(
            &bundle(),
            &CompilerSettings::default(),
            &json!({}),
            ClientProfile::default(),
        )
        .unwrap_err();
        assert!(matches!(err, CompileError::Template(_)));
    }

    #[tokio::test]
    async fn response_is_a_json_attachment() {
        let response = singbox_response("{}".to_string());
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/json");
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=\"singbox.json\""
        );

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"{}");
    }
}
