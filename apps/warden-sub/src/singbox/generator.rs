use serde_json::{json, Value};
use tracing::{debug, warn};
use warden_shared::client::ClientProfile;
use warden_shared::proxy::{ProtocolFamily, ProxyDescriptor, SecurityLayer, Transport};
use warden_shared::CompilerSettings;

use super::error::CompileError;
use super::outbound::{Compiled, Outbound, Placeholder, TagAllocator};
use super::pipeline::build_stream;
use super::protocols;

pub const SELECTOR_TAG: &str = "Select";
pub const URLTEST_TAG: &str = "Auto";
const URLTEST_PROBE: &str = "https://www.gstatic.com/generate_204";

pub struct ConfigGenerator;

impl ConfigGenerator {
    /// Compiles one descriptor under an already allocated tag.
    pub fn compile_proxy(
        proxy: &ProxyDescriptor,
        tag: &str,
        settings: &CompilerSettings,
        client: ClientProfile,
    ) -> Result<Compiled, CompileError> {
        if let Some(reason) = unsupported(proxy) {
            return Ok(Compiled::Unsupported(Placeholder::new(&proxy.name, reason)));
        }

        let outbounds = match proxy.protocol.family() {
            ProtocolFamily::Shadowsocks { v2ray_plugin } => {
                protocols::shadowsocks(proxy, tag, v2ray_plugin, settings)?
            }
            ProtocolFamily::ShadowsocksR => vec![protocols::shadowsocksr(proxy, tag)?],
            ProtocolFamily::Wireguard => vec![protocols::wireguard(proxy, tag, client)?],
            ProtocolFamily::Ssh => protocols::ssh(proxy, tag)?,
            ProtocolFamily::Stream(protocol) => {
                vec![build_stream(proxy, protocol, tag, settings, client)?]
            }
        };

        Ok(Compiled::Outbounds(outbounds))
    }

    /// Builds the full client document on top of `template`.
    ///
    /// A descriptor that fails to compile is logged and left out; only a
    /// malformed template fails the whole document.
    pub fn compile(
        proxies: &[ProxyDescriptor],
        domains: &[String],
        template: &Value,
        settings: &CompilerSettings,
        client: ClientProfile,
    ) -> Result<Value, CompileError> {
        let mut doc = template.clone();

        let dns_domains = doc
            .pointer_mut("/dns/rules/0/domain")
            .and_then(Value::as_array_mut)
            .ok_or_else(|| CompileError::Template("dns.rules[0].domain is not an array".into()))?;
        dns_domains.extend(domains.iter().cloned().map(Value::String));

        let base = doc
            .get_mut("outbounds")
            .and_then(Value::as_array_mut)
            .ok_or_else(|| CompileError::Template("outbounds is not an array".into()))?;

        let template_tags = base
            .iter()
            .filter_map(|o| o.get("tag").and_then(Value::as_str))
            .map(str::to_string)
            .collect::<Vec<_>>();
        let mut tags = TagAllocator::new(template_tags);
        tags.reserve(SELECTOR_TAG);
        tags.reserve(URLTEST_TAG);

        let mut fragments: Vec<Outbound> = Vec::new();
        for proxy in proxies {
            let tag = tags.propose(&proxy.base_tag());
            match Self::compile_proxy(proxy, &tag, settings, client) {
                Ok(Compiled::Outbounds(outbounds)) => {
                    if let Some(clash) = outbounds.iter().find(|o| tags.is_taken(&o.tag)) {
                        let err = CompileError::DuplicateTag {
                            proxy: proxy.name.clone(),
                            tag: clash.tag.clone(),
                        };
                        warn!("Skipping proxy: {}", err);
                        continue;
                    }
                    for outbound in &outbounds {
                        tags.reserve(&outbound.tag);
                    }
                    fragments.extend(outbounds);
                }
                Ok(Compiled::Unsupported(placeholder)) => {
                    debug!("Proxy '{}' left out: {}", placeholder.name, placeholder.msg);
                }
                Err(e) => warn!("Skipping proxy: {}", e),
            }
        }

        let members: Vec<&str> = fragments
            .iter()
            .filter(|o| !o.hidden)
            .map(|o| o.tag.as_str())
            .collect();

        let mut selector_members = vec![URLTEST_TAG];
        selector_members.extend(&members);

        let selector = json!({
            "type": "selector",
            "tag": SELECTOR_TAG,
            "outbounds": selector_members,
            "default": URLTEST_TAG,
        });
        let urltest = json!({
            "type": "urltest",
            "tag": URLTEST_TAG,
            "outbounds": members,
            "url": URLTEST_PROBE,
            "interval": "10m",
            "tolerance": 200,
        });

        let mut outbounds = Vec::with_capacity(base.len() + fragments.len() + 2);
        outbounds.push(selector);
        outbounds.push(urltest);
        outbounds.append(base);
        for fragment in &fragments {
            outbounds.push(serde_json::to_value(fragment).map_err(|e| {
                CompileError::Template(format!("outbound '{}' is not serializable: {e}", fragment.tag))
            })?);
        }
        *base = outbounds;

        Ok(doc)
    }
}

/// Combinations the target client has no outbound for.
fn unsupported(proxy: &ProxyDescriptor) -> Option<&'static str> {
    if proxy.security_layer == SecurityLayer::Kcp {
        return Some("sing-box does not support kcp");
    }

    let shadowsocks = matches!(proxy.protocol.family(), ProtocolFamily::Shadowsocks { .. });
    if !shadowsocks && matches!(proxy.transport, Transport::Faketls | Transport::Shadowtls) {
        return Some("faketls and shadowtls only front shadowsocks");
    }

    None
}
