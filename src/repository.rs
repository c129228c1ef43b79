use async_trait::async_trait;
use std::collections::BTreeMap;

use crate::blocks::{Block, ExistingBlock};
use crate::error::SyncError;
use crate::model::{PropertyMap, TargetRecord};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyKind {
    Title,
    RichText,
    Number,
    Date,
    Select,
    Status,
    MultiSelect,
    Url,
    Files,
    Other(String),
}

impl PropertyKind {
    pub fn from_api(kind: &str) -> Self {
        match kind {
            "title" => PropertyKind::Title,
            "rich_text" => PropertyKind::RichText,
            "number" => PropertyKind::Number,
            "date" => PropertyKind::Date,
            "select" => PropertyKind::Select,
            "status" => PropertyKind::Status,
            "multi_select" => PropertyKind::MultiSelect,
            "url" => PropertyKind::Url,
            "files" => PropertyKind::Files,
            other => PropertyKind::Other(other.to_string()),
        }
    }

    pub fn as_api(&self) -> &str {
        match self {
            PropertyKind::Title => "title",
            PropertyKind::RichText => "rich_text",
            PropertyKind::Number => "number",
            PropertyKind::Date => "date",
            PropertyKind::Select => "select",
            PropertyKind::Status => "status",
            PropertyKind::MultiSelect => "multi_select",
            PropertyKind::Url => "url",
            PropertyKind::Files => "files",
            PropertyKind::Other(s) => s,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PropertySchema {
    pub kind: PropertyKind,
    /// Option names for select, status and multi-select columns.
    pub options: Vec<String>,
}

impl PropertySchema {
    pub fn new(kind: PropertyKind) -> Self {
        PropertySchema { kind, options: vec![] }
    }

    pub fn with_options(kind: PropertyKind, options: &[&str]) -> Self {
        PropertySchema {
            kind,
            options: options.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Exact match first, then case-insensitive. An empty option list accepts anything.
    pub fn match_option(&self, value: &str) -> Option<String> {
        if self.options.is_empty() {
            return Some(value.to_string());
        }
        if let Some(exact) = self.options.iter().find(|o| o.as_str() == value) {
            return Some(exact.clone());
        }
        let lower = value.to_lowercase();
        self.options.iter().find(|o| o.to_lowercase() == lower).cloned()
    }
}

pub type DatabaseSchema = BTreeMap<String, PropertySchema>;

/// Read/write access to the database that mirrors the reading data, keyed by title.
#[async_trait]
pub trait TargetRepository: Send + Sync {
    async fn schema(&self) -> Result<DatabaseSchema, SyncError>;

    async fn find(&self, title: &str) -> Result<Option<TargetRecord>, SyncError>;

    async fn create(&self, fields: &PropertyMap) -> Result<TargetRecord, SyncError>;

    async fn update(&self, id: &str, changed: &PropertyMap) -> Result<(), SyncError>;

    async fn list_blocks(&self, page_id: &str) -> Result<Vec<ExistingBlock>, SyncError>;

    async fn append_blocks(&self, page_id: &str, blocks: &[Block]) -> Result<(), SyncError>;

    async fn delete_block(&self, block_id: &str) -> Result<(), SyncError>;
}
