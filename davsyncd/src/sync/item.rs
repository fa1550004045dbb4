use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemType {
    File,
    Directory,
    /// Placeholder for a file that is not hydrated locally.
    VirtualFile,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LockState {
    #[default]
    Unlocked,
    Locked {
        token: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeletionMode {
    #[default]
    MoveToTrash,
    PermanentDelete,
}

/// Terminal status of a propagation job for one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    #[default]
    NoStatus,
    Success,
    SoftError,
    NormalError,
    FatalError,
    FileLocked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    #[default]
    NoError,
    GenericError,
    NetworkError,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncItem {
    /// Path relative to the sync root.
    pub file: String,
    /// Path the journal knows the item under; differs from `file` after a rename.
    pub original_file: String,
    pub item_type: ItemType,
    pub encrypted: bool,
    pub encrypted_file_name: Option<String>,
    pub lock: LockState,
    pub deletion: DeletionMode,

    pub status: ItemStatus,
    pub http_error_code: u16,
    pub response_timestamp: Option<i64>,
    pub request_id: Option<String>,
    pub error_string: String,
}

impl SyncItem {
    pub fn new(file: impl Into<String>, item_type: ItemType) -> Self {
        let file = file.into();
        Self {
            original_file: file.clone(),
            file,
            item_type,
            encrypted: false,
            encrypted_file_name: None,
            lock: LockState::Unlocked,
            deletion: DeletionMode::MoveToTrash,
            status: ItemStatus::NoStatus,
            http_error_code: 0,
            response_timestamp: None,
            request_id: None,
            error_string: String::new(),
        }
    }

    pub fn file(path: impl Into<String>) -> Self {
        Self::new(path, ItemType::File)
    }

    pub fn directory(path: impl Into<String>) -> Self {
        Self::new(path, ItemType::Directory)
    }

    pub fn with_lock(mut self, token: impl Into<String>) -> Self {
        self.lock = LockState::Locked {
            token: token.into(),
        };
        self
    }

    pub fn with_deletion(mut self, deletion: DeletionMode) -> Self {
        self.deletion = deletion;
        self
    }

    pub fn with_encrypted_name(mut self, name: impl Into<String>) -> Self {
        self.encrypted = true;
        self.encrypted_file_name = Some(name.into());
        self
    }

    pub fn with_encryption(mut self) -> Self {
        self.encrypted = true;
        self
    }

    pub fn is_directory(&self) -> bool {
        self.item_type == ItemType::Directory
    }

    pub fn lock_token(&self) -> Option<&str> {
        match &self.lock {
            LockState::Locked { token } => Some(token),
            LockState::Unlocked => None,
        }
    }

    pub fn wants_permanent_deletion(&self) -> bool {
        self.deletion == DeletionMode::PermanentDelete
    }
}
