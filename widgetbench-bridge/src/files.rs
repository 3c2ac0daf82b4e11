//! Host-side store for files uploaded by the guest

use crate::protocol::FileUpload;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Files keyed by opaque id
#[derive(Debug, Default)]
pub struct FileStore {
    files: RwLock<HashMap<String, FileUpload>>,
}

impl FileStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a file and return its id
    pub fn store(&self, file: FileUpload) -> String {
        let id = format!("file_{}", uuid::Uuid::new_v4().simple());
        self.files.write().insert(id.clone(), file);
        id
    }

    pub fn get(&self, file_id: &str) -> Option<FileUpload> {
        self.files.read().get(file_id).cloned()
    }

    /// Download URL for a stored file, `None` for unknown ids
    pub fn url(&self, file_id: &str) -> Option<String> {
        self.files
            .read()
            .contains_key(file_id)
            .then(|| format!("blob:widgetbench/{file_id}"))
    }

    pub fn len(&self) -> usize {
        self.files.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.read().is_empty()
    }
}
