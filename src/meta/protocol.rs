//! Wire shapes for the metadata tree surface. Every mutation answers with
//! the explicit error-string convention (empty string = success).

use serde::{Deserialize, Serialize};

use super::types::{DirEntry, FileMetadata};

// --- API Endpoints ---

pub const ENDPOINT_SPACE: &str = "/meta/space";
pub const ENDPOINT_DIR: &str = "/meta/dir";
pub const ENDPOINT_DIR_RENAME: &str = "/meta/dir/rename";
pub const ENDPOINT_DIR_LIST: &str = "/meta/dir/list";
pub const ENDPOINT_METADATA: &str = "/meta/file";
pub const ENDPOINT_METADATA_GET: &str = "/meta/file/get";

// --- Requests ---

#[derive(Debug, Serialize, Deserialize)]
pub struct NewSpaceRequest {
    pub space: String,
    pub capacity: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DirRequest {
    pub space: String,
    #[serde(default)]
    pub base: String,
    pub name: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RenameDirRequest {
    pub space: String,
    #[serde(default)]
    pub base: String,
    pub old_name: String,
    pub new_name: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PutMetadataRequest {
    pub space: String,
    #[serde(default)]
    pub base: String,
    pub name: String,
    pub metadata: FileMetadata,
}

// --- Replies ---

#[derive(Debug, Serialize, Deserialize)]
pub struct MetaReply {
    pub error: String,
}

impl MetaReply {
    pub fn ok() -> Self {
        Self {
            error: String::new(),
        }
    }

    pub fn err(error: impl std::fmt::Display) -> Self {
        Self {
            error: error.to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DirListReply {
    pub entries: Vec<DirEntry>,
    pub error: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MetadataReply {
    pub metadata: Option<FileMetadata>,
    pub error: String,
}
