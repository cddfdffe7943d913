use serde::{Deserialize, Serialize};

/// Wire protocol of one configured proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Vless,
    Vmess,
    Trojan,
    #[serde(alias = "shadowsocks")]
    Ss,
    /// Shadowsocks carried by v2ray-plugin.
    V2ray,
    Ssr,
    Wireguard,
    Ssh,
    Tuic,
    Hysteria2,
}

/// Stream protocols share the generic outbound pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamProtocol {
    Vless,
    Vmess,
    Trojan,
    Tuic,
    Hysteria2,
}

/// Builder family a protocol is compiled by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolFamily {
    Shadowsocks { v2ray_plugin: bool },
    ShadowsocksR,
    Wireguard,
    Ssh,
    Stream(StreamProtocol),
}

impl Protocol {
    pub fn family(self) -> ProtocolFamily {
        match self {
            Protocol::Ss => ProtocolFamily::Shadowsocks { v2ray_plugin: false },
            Protocol::V2ray => ProtocolFamily::Shadowsocks { v2ray_plugin: true },
            Protocol::Ssr => ProtocolFamily::ShadowsocksR,
            Protocol::Wireguard => ProtocolFamily::Wireguard,
            Protocol::Ssh => ProtocolFamily::Ssh,
            Protocol::Vless => ProtocolFamily::Stream(StreamProtocol::Vless),
            Protocol::Vmess => ProtocolFamily::Stream(StreamProtocol::Vmess),
            Protocol::Trojan => ProtocolFamily::Stream(StreamProtocol::Trojan),
            Protocol::Tuic => ProtocolFamily::Stream(StreamProtocol::Tuic),
            Protocol::Hysteria2 => ProtocolFamily::Stream(StreamProtocol::Hysteria2),
        }
    }
}

impl StreamProtocol {
    pub fn as_str(self) -> &'static str {
        match self {
            StreamProtocol::Vless => "vless",
            StreamProtocol::Vmess => "vmess",
            StreamProtocol::Trojan => "trojan",
            StreamProtocol::Tuic => "tuic",
            StreamProtocol::Hysteria2 => "hysteria2",
        }
    }

    /// QUIC based protocols run their own handshake and take no uTLS block.
    pub fn is_quic(self) -> bool {
        matches!(self, StreamProtocol::Tuic | StreamProtocol::Hysteria2)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    Tcp,
    H2,
    #[serde(alias = "WS")]
    Ws,
    Httpupgrade,
    Grpc,
    Faketls,
    Shadowtls,
    #[serde(alias = "XTLS")]
    Xtls,
    #[serde(other)]
    Custom,
}

/// Encryption/handshake layer in front of the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityLayer {
    Tls,
    TlsH2,
    TlsH2H1,
    H3Quic,
    Reality,
    Http,
    Kcp,
    Ssh,
    Udp,
    #[serde(other)]
    Custom,
}

impl SecurityLayer {
    pub fn is_tls(self) -> bool {
        matches!(
            self,
            SecurityLayer::Tls | SecurityLayer::TlsH2 | SecurityLayer::TlsH2H1 | SecurityLayer::H3Quic
        )
    }

    pub fn is_reality(self) -> bool {
        self == SecurityLayer::Reality
    }
}

/// How the client reaches the domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainMode {
    #[default]
    Direct,
    Cdn,
    Relay,
    Fake,
    Auto,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsFragment {
    pub size: String,
    pub sleep: String,
}

/// One configured outbound, flattened from user + domain + proxy rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyDescriptor {
    pub name: String,
    #[serde(default)]
    pub extra_info: String,
    #[serde(default)]
    pub domain_id: i64,
    pub protocol: Protocol,
    pub transport: Transport,
    pub security_layer: SecurityLayer,
    #[serde(default)]
    pub mode: DomainMode,
    pub server: String,
    pub port: u16,

    #[serde(default)]
    pub sni: Option<String>,
    /// Comma separated ALPN list, e.g. "h2,http/1.1".
    #[serde(default)]
    pub alpn: Option<String>,
    #[serde(default)]
    pub fingerprint: Option<String>,
    #[serde(default)]
    pub allow_insecure: bool,

    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub cipher: Option<String>,
    #[serde(default)]
    pub flow: Option<String>,

    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub grpc_service_name: Option<String>,

    #[serde(default)]
    pub reality_public_key: Option<String>,
    #[serde(default)]
    pub reality_short_id: Option<String>,

    #[serde(default)]
    pub fake_domain: Option<String>,
    #[serde(default)]
    pub shared_secret: Option<String>,
    #[serde(default)]
    pub ssr_obfs: Option<String>,
    #[serde(default)]
    pub ssr_protocol: Option<String>,

    #[serde(default)]
    pub wg_ipv4: Option<String>,
    #[serde(default)]
    pub wg_private_key: Option<String>,
    #[serde(default)]
    pub wg_server_public_key: Option<String>,
    #[serde(default)]
    pub wg_preshared_key: Option<String>,
    #[serde(default)]
    pub wg_noise_trick: Option<String>,

    #[serde(default)]
    pub ssh_private_key: Option<String>,
    #[serde(default)]
    pub ssh_host_keys: Vec<String>,

    // Client-side TLS evasion, honoured for the first-party client only
    #[serde(default)]
    pub tls_fragment: Option<TlsFragment>,
    #[serde(default)]
    pub tls_padding: Option<String>,
    #[serde(default)]
    pub tls_mixed_case: bool,
}

impl ProxyDescriptor {
    /// Outbound tag before per-document deduplication.
    pub fn base_tag(&self) -> String {
        let tag = format!("{} {} § {} {}", self.extra_info, self.name, self.port, self.domain_id);
        tag.trim().to_string()
    }

    pub fn alpn_list(&self) -> Vec<String> {
        self.alpn
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn descriptor_deserializes_with_defaults() {
        let d: ProxyDescriptor = serde_json::from_value(json!({
            "name": "de-1",
            "protocol": "vless",
            "transport": "WS",
            "security_layer": "tls_h2",
            "server": "de.example.com",
            "port": 443
        }))
        .unwrap();

        assert_eq!(d.transport, Transport::Ws);
        assert!(d.security_layer.is_tls());
        assert_eq!(d.mode, DomainMode::Direct);
        assert!(d.ssh_host_keys.is_empty());
        assert_eq!(d.base_tag(), "de-1 § 443 0");
    }

    #[test]
    fn unknown_transport_and_layer_fall_back_to_custom() {
        let d: ProxyDescriptor = serde_json::from_value(json!({
            "name": "x",
            "protocol": "trojan",
            "transport": "restls1_3",
            "security_layer": "quantum",
            "server": "x.example.com",
            "port": 8443
        }))
        .unwrap();

        assert_eq!(d.transport, Transport::Custom);
        assert_eq!(d.security_layer, SecurityLayer::Custom);
    }

    #[test]
    fn alpn_list_skips_blank_entries() {
        let d: ProxyDescriptor = serde_json::from_value(json!({
            "name": "x",
            "protocol": "trojan",
            "transport": "tcp",
            "security_layer": "tls",
            "server": "x",
            "port": 1,
            "alpn": "h2, http/1.1,,"
        }))
        .unwrap();

        assert_eq!(d.alpn_list(), vec!["h2".to_string(), "http/1.1".to_string()]);
    }

    #[test]
    fn shadowsocks_alias_maps_to_ss_family() {
        let p: Protocol = serde_json::from_value(json!("shadowsocks")).unwrap();
        assert_eq!(p.family(), ProtocolFamily::Shadowsocks { v2ray_plugin: false });
        assert!(StreamProtocol::Tuic.is_quic());
    }
}
