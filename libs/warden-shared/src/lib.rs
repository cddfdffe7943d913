use serde::{Deserialize, Serialize};

pub mod proxy;
pub mod settings;

pub use proxy::ProxyDescriptor;
pub use settings::CompilerSettings;

pub mod api {
    use super::*;

    /// Everything the panel hands out for one subscription.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct SubscriptionBundle {
        #[serde(default)]
        pub domains: Vec<String>,
        #[serde(default)]
        pub proxies: Vec<ProxyDescriptor>,
    }

    /// Row of the external user directory.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct DirectoryUser {
        pub uuid: String,
        #[serde(default)]
        pub wg_pub: Option<String>,
    }
}

pub mod client {
    /// Requesting client, as far as the compiler cares.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ClientProfile {
        pub is_hiddify: bool,
        pub version: Option<(u32, u32, u32)>,
    }

    impl ClientProfile {
        pub fn first_party(version: (u32, u32, u32)) -> Self {
            Self {
                is_hiddify: true,
                version: Some(version),
            }
        }

        pub fn from_user_agent(ua: &str) -> Self {
            let lower = ua.to_ascii_lowercase();
            let Some(idx) = lower.find("hiddify") else {
                return Self::default();
            };

            let rest = &lower[idx..];
            let version = rest
                .split_once('/')
                .map(|(_, v)| v)
                .and_then(parse_version);

            Self {
                is_hiddify: true,
                version,
            }
        }

        /// Unknown versions never satisfy a minimum.
        pub fn is_version_at_least(&self, major: u32, minor: u32, patch: u32) -> bool {
            self.is_hiddify && self.version.is_some_and(|v| v >= (major, minor, patch))
        }
    }

    fn parse_version(raw: &str) -> Option<(u32, u32, u32)> {
        let token: String = raw
            .chars()
            .take_while(|c| c.is_ascii_digit() || *c == '.')
            .collect();
        let mut parts = token.split('.').map(|p| p.parse::<u32>().ok());
        let major = parts.next()??;
        let minor = parts.next().flatten().unwrap_or(0);
        let patch = parts.next().flatten().unwrap_or(0);
        Some((major, minor, patch))
    }

}
