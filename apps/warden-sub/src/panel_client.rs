use anyhow::Result;
use reqwest::Client;
use serde_json::Value;
use std::collections::BTreeMap;
use warden_shared::CompilerSettings;
use warden_shared::api::SubscriptionBundle;

#[derive(Clone)]
pub struct PanelClient {
    client: Client,
    base_url: String,
    auth_token: String,
}

impl PanelClient {
    pub fn new(base_url: String, auth_token: String) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_token,
        }
    }

    /// Domains and flattened proxy descriptors of one user.
    pub async fn get_subscription(&self, uuid: &str) -> Result<SubscriptionBundle> {
        let url = format!("{}/api/internal/subscriptions/{}/proxies", self.base_url, uuid);

        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.auth_token)
            .send()
            .await?
            .error_for_status()?;

        Ok(response.json().await?)
    }

    pub async fn get_settings(&self) -> Result<CompilerSettings> {
        let url = format!("{}/api/internal/settings", self.base_url);

        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.auth_token)
            .send()
            .await?
            .error_for_status()?;

        let values: BTreeMap<String, Value> = response.json().await?;
        Ok(CompilerSettings::from_flat(values)?)
    }
}
