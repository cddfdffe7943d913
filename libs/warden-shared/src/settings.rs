use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Panel-wide options consulted while compiling outbounds.
///
/// The panel exposes these as a flat key/value surface; numbers and flags
/// may arrive as strings, so every field is parsed leniently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerSettings {
    #[serde(deserialize_with = "flag")]
    pub mux_enable: bool,
    pub mux_protocol: String,
    #[serde(deserialize_with = "flag")]
    pub mux_padding_enable: bool,
    #[serde(deserialize_with = "number")]
    pub mux_max_streams: u32,
    #[serde(deserialize_with = "number")]
    pub mux_max_connections: u32,
    #[serde(deserialize_with = "number")]
    pub mux_min_streams: u32,
    #[serde(deserialize_with = "flag")]
    pub mux_brutal_enable: bool,
    #[serde(deserialize_with = "number")]
    pub mux_brutal_up_mbps: u32,
    #[serde(deserialize_with = "number")]
    pub mux_brutal_down_mbps: u32,

    #[serde(deserialize_with = "number")]
    pub hysteria_up_mbps: u32,
    #[serde(deserialize_with = "number")]
    pub hysteria_down_mbps: u32,
    #[serde(deserialize_with = "flag")]
    pub hysteria_obfs_enable: bool,
    /// Doubles as the salamander obfuscation password.
    pub proxy_path: String,
}

impl Default for CompilerSettings {
    fn default() -> Self {
        Self {
            mux_enable: false,
            mux_protocol: "h2mux".to_string(),
            mux_padding_enable: false,
            mux_max_streams: 0,
            mux_max_connections: 4,
            mux_min_streams: 4,
            mux_brutal_enable: false,
            mux_brutal_up_mbps: 100,
            mux_brutal_down_mbps: 100,
            hysteria_up_mbps: 150,
            hysteria_down_mbps: 300,
            hysteria_obfs_enable: false,
            proxy_path: String::new(),
        }
    }
}

impl CompilerSettings {
    /// Builds a snapshot from the panel's key/value table. Unknown keys are ignored.
    pub fn from_flat(values: BTreeMap<String, Value>) -> Result<Self, serde_json::Error> {
        let map = values.into_iter().collect::<serde_json::Map<_, _>>();
        serde_json::from_value(Value::Object(map))
    }
}

fn flag<'de, D: Deserializer<'de>>(de: D) -> Result<bool, D::Error> {
    let value = Value::deserialize(de)?;
    match &value {
        Value::Bool(b) => Ok(*b),
        Value::Number(n) => Ok(n.as_i64().unwrap_or(0) != 0),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" | "" => Ok(false),
            other => Err(serde::de::Error::custom(format!("invalid flag value '{other}'"))),
        },
        Value::Null => Ok(false),
        _ => Err(serde::de::Error::custom(format!("invalid flag value {value}"))),
    }
}

fn number<'de, D: Deserializer<'de>>(de: D) -> Result<u32, D::Error> {
    let value = Value::deserialize(de)?;
    let parsed = match &value {
        Value::Number(n) => n.as_u64().and_then(|v| u32::try_from(v).ok()),
        Value::String(s) if s.trim().is_empty() => Some(0),
        Value::String(s) => s.trim().parse::<u32>().ok(),
        Value::Null => Some(0),
        _ => None,
    };
    parsed.ok_or_else(|| serde::de::Error::custom(format!("invalid numeric value {value}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn from_flat_accepts_strings_and_numbers() {
        let mut values = BTreeMap::new();
        values.insert("mux_enable".to_string(), json!("true"));
        values.insert("mux_max_streams".to_string(), json!("8"));
        values.insert("hysteria_up_mbps".to_string(), json!(50));
        values.insert("hysteria_obfs_enable".to_string(), json!(1));
        values.insert("unrelated_key".to_string(), json!("whatever"));

        let s = CompilerSettings::from_flat(values).unwrap();
        assert!(s.mux_enable);
        assert_eq!(s.mux_max_streams, 8);
        assert_eq!(s.hysteria_up_mbps, 50);
        assert!(s.hysteria_obfs_enable);
        // untouched keys keep their defaults
        assert_eq!(s.mux_protocol, "h2mux");
        assert_eq!(s.hysteria_down_mbps, 300);
    }

    #[test]
    fn from_flat_rejects_garbage_numbers() {
        let mut values = BTreeMap::new();
        values.insert("mux_min_streams".to_string(), json!("many"));
        assert!(CompilerSettings::from_flat(values).is_err());
    }
}
