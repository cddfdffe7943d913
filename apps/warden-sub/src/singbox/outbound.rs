use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashSet;

/// One outbound object of the compiled client document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Outbound {
    #[serde(rename = "type")]
    pub kind: String,
    pub tag: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detour: Option<String>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
    /// Helper outbounds are only reachable as a detour target.
    #[serde(skip)]
    pub hidden: bool,
}

impl Outbound {
    pub fn new(kind: &str, tag: &str, server: &str, server_port: u16) -> Self {
        Self {
            kind: kind.to_string(),
            tag: tag.to_string(),
            server: Some(server.to_string()),
            server_port: Some(server_port),
            detour: None,
            fields: Map::new(),
            hidden: false,
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    pub fn with_opt(self, key: &str, value: Option<impl Into<Value>>) -> Self {
        match value {
            Some(v) => self.with(key, v),
            None => self,
        }
    }

    pub fn merge(mut self, extra: Map<String, Value>) -> Self {
        self.fields.extend(extra);
        self
    }

    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    /// Keeps its own endpoint and tunnels the connection through `tag`.
    pub fn dial_via(mut self, tag: &str) -> Self {
        self.detour = Some(tag.to_string());
        self
    }

    /// Hands the endpoint over to the front outbound `tag`.
    ///
    /// The front proxy owns the connection to the server, so the endpoint is
    /// dropped here; keeping it would make the client dial the server directly.
    pub fn route_through(mut self, tag: &str) -> Self {
        self.detour = Some(tag.to_string());
        self.server = None;
        self.server_port = None;
        self
    }
}

/// Stand-in emitted for a proxy the target client cannot use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Placeholder {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub name: String,
    pub msg: String,
}

impl Placeholder {
    pub fn new(name: &str, msg: impl Into<String>) -> Self {
        Self {
            kind: "debug",
            name: name.to_string(),
            msg: msg.into(),
        }
    }
}

/// Result of compiling a single proxy.
#[derive(Debug, Clone, PartialEq)]
pub enum Compiled {
    Outbounds(Vec<Outbound>),
    Unsupported(Placeholder),
}

/// Hands out outbound tags that are unique within one document.
#[derive(Debug, Default)]
pub struct TagAllocator {
    taken: HashSet<String>,
}

impl TagAllocator {
    pub fn new<I, S>(reserved: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            taken: reserved.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_taken(&self, tag: &str) -> bool {
        self.taken.contains(tag)
    }

    /// First free tag of `base`, `base #2`, `base #3`, ...
    pub fn propose(&self, base: &str) -> String {
        if !self.is_taken(base) {
            return base.to_string();
        }
        (2..)
            .map(|n| format!("{base} #{n}"))
            .find(|candidate| !self.is_taken(candidate))
            .unwrap_or_else(|| base.to_string())
    }

    pub fn reserve(&mut self, tag: &str) -> bool {
        self.taken.insert(tag.to_string())
    }
}
