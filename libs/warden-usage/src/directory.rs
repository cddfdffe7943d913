use std::path::PathBuf;

use anyhow::Context;
use warden_shared::api::DirectoryUser;

/// Source of the panel's users, joined to the ledger through `wg_pub`.
pub trait UserDirectory {
    fn list_all_users(&self) -> anyhow::Result<Vec<DirectoryUser>>;
}

/// User list exported by the panel as a JSON array.
#[derive(Debug, Clone)]
pub struct JsonUserDirectory {
    path: PathBuf,
}

impl JsonUserDirectory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl UserDirectory for JsonUserDirectory {
    fn list_all_users(&self) -> anyhow::Result<Vec<DirectoryUser>> {
        let raw = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read user directory {}", self.path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse user directory {}", self.path.display()))
    }
}

impl UserDirectory for [DirectoryUser] {
    fn list_all_users(&self) -> anyhow::Result<Vec<DirectoryUser>> {
        Ok(self.to_vec())
    }
}

impl UserDirectory for Vec<DirectoryUser> {
    fn list_all_users(&self) -> anyhow::Result<Vec<DirectoryUser>> {
        self.as_slice().list_all_users()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_users_with_and_without_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("users.json");
        std::fs::write(&path, r#"[{"uuid": "u1", "wg_pub": "key1"}, {"uuid": "u2"}]"#).unwrap();

        let users = JsonUserDirectory::new(&path).list_all_users().unwrap();
        assert_eq!(users.len(), 2);
        assert_eq!(users[0].wg_pub.as_deref(), Some("key1"));
        assert_eq!(users[1].wg_pub, None);
    }

    #[test]
    fn missing_directory_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(JsonUserDirectory::new(dir.path().join("nope.json")).list_all_users().is_err());
    }
}
