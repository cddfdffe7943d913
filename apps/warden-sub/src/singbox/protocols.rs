use serde_json::json;
use warden_shared::client::ClientProfile;
use warden_shared::proxy::{ProxyDescriptor, Transport};
use warden_shared::CompilerSettings;

use super::error::CompileError;
use super::outbound::Outbound;
use super::pipeline::{multiplex, require, utls};

const WG_MTU: u16 = 1380;
const SSH_UDP_RELAY_PORT: u16 = 2000;

/// Shadowsocks, optionally wrapped in obfs, v2ray-plugin or a ShadowTLS front.
pub fn shadowsocks(
    proxy: &ProxyDescriptor,
    tag: &str,
    v2ray_plugin: bool,
    settings: &CompilerSettings,
) -> Result<Vec<Outbound>, CompileError> {
    let mut ss = Outbound::new("shadowsocks", tag, &proxy.server, proxy.port)
        .with("method", require(proxy, &proxy.cipher, "cipher")?)
        .with("password", require(proxy, &proxy.password, "password")?)
        .with("udp_over_tcp", json!({ "enabled": true, "version": 2 }))
        .with_opt("multiplex", multiplex(settings));

    if proxy.transport == Transport::Faketls {
        let host = require(proxy, &proxy.fake_domain, "fake_domain")?;
        ss = ss
            .with("plugin", "obfs-local")
            .with("plugin_opts", format!("obfs=tls;obfs-host={host}"));
    }

    if v2ray_plugin {
        let path = require(proxy, &proxy.path, "path")?;
        let host = require(proxy, &proxy.host, "host")?;
        ss = ss
            .with("plugin", "v2ray-plugin")
            .with("plugin_opts", format!("mode=websocket;path={path};host={host};tls"));
    }

    if proxy.transport != Transport::Shadowtls {
        return Ok(vec![ss]);
    }

    let front_tag = format!("{tag}_shadowtls-out §hide§");
    let front = Outbound::new("shadowtls", &front_tag, &proxy.server, proxy.port)
        .with("version", 3)
        .with("password", require(proxy, &proxy.shared_secret, "shared_secret")?)
        .with(
            "tls",
            json!({
                "enabled": true,
                "server_name": require(proxy, &proxy.fake_domain, "fake_domain")?,
                "utls": utls(proxy),
            }),
        )
        .hidden();

    Ok(vec![ss.route_through(&front_tag), front])
}

/// Legacy ShadowsocksR with its obfs/protocol plugins.
pub fn shadowsocksr(proxy: &ProxyDescriptor, tag: &str) -> Result<Outbound, CompileError> {
    Ok(Outbound::new("shadowsocksr", tag, &proxy.server, proxy.port)
        .with("method", require(proxy, &proxy.cipher, "cipher")?)
        .with("password", require(proxy, &proxy.uuid, "uuid")?)
        .with("obfs", require(proxy, &proxy.ssr_obfs, "ssr_obfs")?)
        .with("protocol", require(proxy, &proxy.ssr_protocol, "ssr_protocol")?)
        .with("protocol_param", require(proxy, &proxy.fake_domain, "fake_domain")?))
}

pub fn wireguard(
    proxy: &ProxyDescriptor,
    tag: &str,
    client: ClientProfile,
) -> Result<Outbound, CompileError> {
    let address = require(proxy, &proxy.wg_ipv4, "wg_ipv4")?;

    let mut out = Outbound::new("wireguard", tag, &proxy.server, proxy.port)
        .with("local_address", json!([format!("{address}/32")]))
        .with("private_key", require(proxy, &proxy.wg_private_key, "wg_private_key")?)
        .with(
            "peer_public_key",
            require(proxy, &proxy.wg_server_public_key, "wg_server_public_key")?,
        )
        .with_opt("pre_shared_key", proxy.wg_preshared_key.clone())
        .with("mtu", WG_MTU);

    // noise packets are understood from HiddifyNext 0.15.0 on
    if client.is_version_at_least(0, 15, 0) {
        out = out.with_opt("fake_packets", proxy.wg_noise_trick.clone());
    }

    Ok(out)
}

/// SSH tunnel plus a local socks front that carries UDP over it.
pub fn ssh(proxy: &ProxyDescriptor, tag: &str) -> Result<Vec<Outbound>, CompileError> {
    let ssh = Outbound::new("ssh", tag, &proxy.server, proxy.port)
        .with("user", require(proxy, &proxy.uuid, "uuid")?)
        .with("private_key", require(proxy, &proxy.ssh_private_key, "ssh_private_key")?)
        .with("host_key", json!(proxy.ssh_host_keys));

    let relay = Outbound::new("socks", &format!("{tag}+UDP"), "127.0.0.1", SSH_UDP_RELAY_PORT)
        .with("version", "5")
        .with("udp_over_tcp", true)
        .with("network", "tcp")
        .dial_via(tag);

    Ok(vec![ssh, relay])
}
