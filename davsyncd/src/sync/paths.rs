use thiserror::Error;

use super::item::{ItemType, SyncItem};

pub const DEFAULT_VIRTUAL_FILE_SUFFIX: &str = ".davsync";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PathError {
    #[error("remote path is empty")]
    Empty,
    #[error("remote path contains unsupported component: {0}")]
    UnsupportedComponent(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum VfsMode {
    #[default]
    Off,
    /// Dehydrated files carry `suffix` locally but not on the server.
    WithSuffix { suffix: String },
}

/// Joins the account's remote folder and a sync-root relative path.
pub fn full_remote_path(remote_root: &str, file: &str) -> Result<String, PathError> {
    let mut segments = Vec::new();
    for part in remote_root.split('/').chain(file.split('/')) {
        match part {
            "" | "." => continue,
            ".." => return Err(PathError::UnsupportedComponent(part.to_string())),
            other => segments.push(other),
        }
    }
    if segments.is_empty() {
        return Err(PathError::Empty);
    }
    Ok(segments.join("/"))
}

/// Server-side name of the item, without the local virtual-file suffix.
pub fn remote_file_name<'a>(item: &'a SyncItem, vfs: &VfsMode) -> &'a str {
    match (item.item_type, vfs) {
        (ItemType::VirtualFile, VfsMode::WithSuffix { suffix }) => item
            .file
            .strip_suffix(suffix.as_str())
            .unwrap_or(&item.file),
        _ => &item.file,
    }
}

pub fn parent_path(path: &str) -> &str {
    path.trim_end_matches('/')
        .rsplit_once('/')
        .map(|(parent, _)| parent)
        .unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_remote_root_and_file() {
        assert_eq!(
            full_remote_path("/Shared/", "Docs/A.txt").unwrap(),
            "Shared/Docs/A.txt"
        );
        assert_eq!(full_remote_path("", "/A.txt").unwrap(), "A.txt");
    }

    #[test]
    fn rejects_parent_dir_and_empty() {
        assert_eq!(
            full_remote_path("", "../secret"),
            Err(PathError::UnsupportedComponent("..".into()))
        );
        assert_eq!(full_remote_path("/", ""), Err(PathError::Empty));
    }

    #[test]
    fn strips_suffix_only_for_virtual_files() {
        let vfs = VfsMode::WithSuffix {
            suffix: DEFAULT_VIRTUAL_FILE_SUFFIX.into(),
        };
        let virtual_item = SyncItem::new("Docs/A.txt.davsync", ItemType::VirtualFile);
        assert_eq!(remote_file_name(&virtual_item, &vfs), "Docs/A.txt");
        assert_eq!(
            remote_file_name(&virtual_item, &VfsMode::Off),
            "Docs/A.txt.davsync"
        );

        let plain = SyncItem::file("Docs/B.davsync");
        assert_eq!(remote_file_name(&plain, &vfs), "Docs/B.davsync");
    }

    #[test]
    fn parent_of_nested_and_top_level() {
        assert_eq!(parent_path("Docs/Sub/A.txt"), "Docs/Sub");
        assert_eq!(parent_path("A.txt"), "");
    }
}
