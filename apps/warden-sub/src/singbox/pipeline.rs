//! Outbound pipeline shared by the stream protocols
//! (vless, vmess, trojan, tuic, hysteria2).
//!
//! Every step is a pure function of the descriptor and the settings
//! snapshot; [`build_stream`] merges their output in a fixed order.

use serde_json::{json, Map, Value};
use warden_shared::client::ClientProfile;
use warden_shared::proxy::{DomainMode, ProxyDescriptor, StreamProtocol, Transport};
use warden_shared::CompilerSettings;

use super::error::CompileError;
use super::outbound::Outbound;

pub fn build_stream(
    proxy: &ProxyDescriptor,
    protocol: StreamProtocol,
    tag: &str,
    settings: &CompilerSettings,
    client: ClientProfile,
) -> Result<Outbound, CompileError> {
    let mut out = Outbound::new(protocol.as_str(), tag, &proxy.server, proxy.port)
        .merge(credentials(proxy, protocol)?);

    if matches!(
        protocol,
        StreamProtocol::Vless | StreamProtocol::Vmess | StreamProtocol::Trojan
    ) {
        out = out.with_opt("multiplex", multiplex(settings));
    }

    let tls = tls(proxy, protocol)?;
    if client.is_hiddify {
        let (fragment, tricks) = tls_tricks(proxy);
        out = out.with_opt("tls_fragment", fragment);
        out = out.with_opt(
            "tls",
            tls.map(|mut block| {
                if let Some(tricks) = tricks {
                    block.insert("tls_tricks".to_string(), tricks);
                }
                Value::Object(block)
            }),
        );
    } else {
        out = out.with_opt("tls", tls.map(Value::Object));
    }

    out = out.merge(extras(proxy, protocol));

    let out = match protocol {
        StreamProtocol::Tuic => out.merge(tuic(proxy)?),
        StreamProtocol::Hysteria2 => out.merge(hysteria2(proxy, settings)?),
        StreamProtocol::Vless | StreamProtocol::Vmess | StreamProtocol::Trojan => {
            out.with_opt("transport", transport(proxy)?)
        }
    };

    Ok(out)
}

pub(crate) fn require<'a>(
    proxy: &ProxyDescriptor,
    value: &'a Option<String>,
    field: &'static str,
) -> Result<&'a str, CompileError> {
    value
        .as_deref()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| CompileError::MissingField {
            proxy: proxy.name.clone(),
            field,
        })
}

fn credentials(
    proxy: &ProxyDescriptor,
    protocol: StreamProtocol,
) -> Result<Map<String, Value>, CompileError> {
    let mut fields = Map::new();
    let uuid = require(proxy, &proxy.uuid, "uuid")?;
    match protocol {
        StreamProtocol::Trojan => {
            fields.insert("password".into(), json!(uuid));
        }
        StreamProtocol::Vless | StreamProtocol::Vmess => {
            fields.insert("uuid".into(), json!(uuid));
        }
        // seeded by their trailers
        StreamProtocol::Tuic | StreamProtocol::Hysteria2 => {}
    }
    Ok(fields)
}

/// `None` when multiplexing is switched off panel-wide.
pub(crate) fn multiplex(settings: &CompilerSettings) -> Option<Value> {
    if !settings.mux_enable {
        return None;
    }

    let mut mux = json!({
        "enabled": true,
        "protocol": settings.mux_protocol,
        "padding": settings.mux_padding_enable,
    });
    // max_streams conflicts with max_connections/min_streams
    if settings.mux_max_streams != 0 {
        mux["max_streams"] = json!(settings.mux_max_streams);
    } else {
        mux["max_connections"] = json!(settings.mux_max_connections);
        mux["min_streams"] = json!(settings.mux_min_streams);
    }
    mux["brutal"] = json!({
        "enabled": settings.mux_brutal_enable,
        "up_mbps": settings.mux_brutal_up_mbps,
        "down_mbps": settings.mux_brutal_down_mbps,
    });

    Some(mux)
}

fn tls(
    proxy: &ProxyDescriptor,
    protocol: StreamProtocol,
) -> Result<Option<Map<String, Value>>, CompileError> {
    let layer = proxy.security_layer;
    if !(layer.is_tls() || layer.is_reality()) {
        return Ok(None);
    }

    let mut tls = Map::new();
    tls.insert("enabled".into(), json!(true));
    tls.insert("server_name".into(), json!(require(proxy, &proxy.sni, "sni")?));

    if !protocol.is_quic() {
        tls.insert("utls".into(), utls(proxy));
    }

    if layer.is_reality() {
        tls.insert(
            "reality".into(),
            json!({
                "enabled": true,
                "public_key": require(proxy, &proxy.reality_public_key, "reality_public_key")?,
                "short_id": proxy.reality_short_id.as_deref().unwrap_or_default(),
            }),
        );
    }

    tls.insert(
        "insecure".into(),
        json!(proxy.allow_insecure || proxy.mode == DomainMode::Fake),
    );

    let alpn = proxy.alpn_list();
    if !alpn.is_empty() {
        tls.insert("alpn".into(), json!(alpn));
    }

    Ok(Some(tls))
}

pub(crate) fn utls(proxy: &ProxyDescriptor) -> Value {
    json!({
        "enabled": true,
        "fingerprint": proxy.fingerprint.as_deref().unwrap_or("none"),
    })
}

/// Fragmentation block and `tls.tls_tricks`, first-party client only.
fn tls_tricks(proxy: &ProxyDescriptor) -> (Option<Value>, Option<Value>) {
    let fragment = proxy.tls_fragment.as_ref().map(|f| {
        json!({
            "enabled": true,
            "size": f.size,
            "sleep": f.sleep,
        })
    });

    let mut tricks = Map::new();
    if let Some(padding) = proxy.tls_padding.as_deref().filter(|p| !p.is_empty()) {
        tricks.insert("padding_size".into(), json!(padding));
    }
    if proxy.tls_mixed_case {
        tricks.insert("mixedcase_sni".into(), json!(true));
    }

    let tricks = (!tricks.is_empty()).then_some(Value::Object(tricks));
    (fragment, tricks)
}

fn extras(proxy: &ProxyDescriptor, protocol: StreamProtocol) -> Map<String, Value> {
    let mut fields = Map::new();

    if let Some(flow) = proxy.flow.as_deref().filter(|f| !f.is_empty()) {
        fields.insert("flow".into(), json!(flow));
    }
    if protocol == StreamProtocol::Vmess {
        fields.insert("alter_id".into(), json!(0));
        fields.insert(
            "security".into(),
            json!(proxy.cipher.as_deref().unwrap_or("auto")),
        );
    }
    if matches!(protocol, StreamProtocol::Vless | StreamProtocol::Vmess) {
        fields.insert("packet_encoding".into(), json!("xudp"));
    }

    fields
}

/// Reality only runs over raw TCP or gRPC.
fn transport(proxy: &ProxyDescriptor) -> Result<Option<Value>, CompileError> {
    if proxy.security_layer.is_reality() && proxy.transport != Transport::Grpc {
        return Ok(None);
    }

    let transport = match proxy.transport {
        Transport::Ws => {
            let mut t = json!({
                "type": "ws",
                "path": require(proxy, &proxy.path, "path")?,
                "early_data_header_name": "Sec-WebSocket-Protocol",
            });
            if let Some(host) = &proxy.host {
                t["headers"] = json!({ "Host": host });
            }
            t
        }
        Transport::Httpupgrade => {
            let mut t = json!({
                "type": "httpupgrade",
                "path": require(proxy, &proxy.path, "path")?,
            });
            if let Some(host) = &proxy.host {
                t["headers"] = json!({ "Host": host });
            }
            t
        }
        Transport::Tcp | Transport::H2 => {
            let mut t = json!({
                "type": "http",
                "path": proxy.path.as_deref().unwrap_or_default(),
                "idle_timeout": "15s",
                "ping_timeout": "15s",
            });
            if let Some(host) = &proxy.host {
                t["host"] = json!([host]);
            }
            t
        }
        Transport::Grpc => json!({
            "type": "grpc",
            "service_name": require(proxy, &proxy.grpc_service_name, "grpc_service_name")?,
            "idle_timeout": "115s",
            "ping_timeout": "15s",
        }),
        Transport::Faketls | Transport::Shadowtls | Transport::Xtls | Transport::Custom => {
            return Ok(None);
        }
    };

    Ok(Some(transport))
}

fn tuic(proxy: &ProxyDescriptor) -> Result<Map<String, Value>, CompileError> {
    let uuid = require(proxy, &proxy.uuid, "uuid")?;
    let fields = json!({
        "congestion_control": "cubic",
        "udp_relay_mode": "native",
        "zero_rtt_handshake": true,
        "heartbeat": "10s",
        "uuid": uuid,
        "password": uuid,
    });
    Ok(into_map(fields))
}

fn hysteria2(
    proxy: &ProxyDescriptor,
    settings: &CompilerSettings,
) -> Result<Map<String, Value>, CompileError> {
    let mut fields = json!({
        "up_mbps": settings.hysteria_up_mbps,
        "down_mbps": settings.hysteria_down_mbps,
        "password": require(proxy, &proxy.uuid, "uuid")?,
    });
    if settings.hysteria_obfs_enable {
        fields["obfs"] = json!({
            "type": "salamander",
            "password": settings.proxy_path,
        });
    }
    Ok(into_map(fields))
}

fn into_map(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}
