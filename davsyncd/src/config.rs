use std::path::{Path, PathBuf};

use anyhow::Context;
use davsync_core::Credentials;

use crate::sync::paths::{DEFAULT_VIRTUAL_FILE_SUFFIX, VfsMode};

const JOURNAL_DIR_NAME: &str = "davsync";
const JOURNAL_FILE_NAME: &str = "journal.db";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonConfig {
    /// WebDAV files root of the account, e.g. `https://host/remote.php/dav/files/alice/`.
    pub server_url: String,
    pub credentials: Credentials,
    pub remote_root: String,
    pub journal_path: PathBuf,
    pub vfs: VfsMode,
}

impl DaemonConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let home = dirs::home_dir().context("home directory is unavailable")?;
        Self::from_lookup(|name| std::env::var(name).ok(), &home)
    }

    fn from_lookup<F>(lookup: F, home: &Path) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let server_url = read("DAVSYNC_SERVER_URL").context("DAVSYNC_SERVER_URL is not set")?;
        let credentials = match (
            read("DAVSYNC_TOKEN"),
            read("DAVSYNC_USER"),
            read("DAVSYNC_PASSWORD"),
        ) {
            (Some(token), _, _) => Credentials::Bearer(token),
            (None, Some(user), Some(password)) => Credentials::Basic { user, password },
            (None, Some(_), None) => anyhow::bail!("DAVSYNC_USER is set without DAVSYNC_PASSWORD"),
            (None, None, _) => Credentials::Anonymous,
        };
        let remote_root = read("DAVSYNC_REMOTE_ROOT").unwrap_or_default();
        let journal_path = read("DAVSYNC_JOURNAL")
            .map(|value| expand_with_home(&value, home))
            .unwrap_or_else(|| default_journal_path(home));
        let vfs = match lookup("DAVSYNC_VFS_SUFFIX") {
            None => VfsMode::Off,
            Some(suffix) if suffix.trim().is_empty() => VfsMode::WithSuffix {
                suffix: DEFAULT_VIRTUAL_FILE_SUFFIX.to_string(),
            },
            Some(suffix) => VfsMode::WithSuffix { suffix },
        };

        Ok(Self {
            server_url,
            credentials,
            remote_root,
            journal_path,
            vfs,
        })
    }
}

fn expand_with_home(value: &str, home: &Path) -> PathBuf {
    if value == "~" {
        return home.to_path_buf();
    }
    if let Some(rest) = value.strip_prefix("~/") {
        return home.join(rest);
    }
    PathBuf::from(value)
}

fn default_journal_path(home: &Path) -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| home.join(".local").join("share"))
        .join(JOURNAL_DIR_NAME)
        .join(JOURNAL_FILE_NAME)
}
