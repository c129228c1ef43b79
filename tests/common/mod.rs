#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use shelfsync::blocks::{Block, ExistingBlock};
use shelfsync::config::{Notion, SyncOptions};
use shelfsync::error::SyncError;
use shelfsync::model::{FieldValue, Highlight, PropertyMap, SourceBookRecord, TargetRecord};
use shelfsync::repository::{DatabaseSchema, PropertyKind, PropertySchema, TargetRepository};
use shelfsync::source::SourceAdapter;

pub fn book(title: &str, current: u32, total: u32) -> SourceBookRecord {
    let mut r = SourceBookRecord::new("WeRead", &format!("id-{}", title), title);
    r.author = "Someone".to_string();
    r.progress_current = current;
    r.progress_total = total;
    r
}

pub fn with_highlights(mut record: SourceBookRecord, texts: &[&str]) -> SourceBookRecord {
    record.highlights = Some(
        texts
            .iter()
            .map(|t| {
                let mut h = Highlight::new(t);
                h.chapter = Some("Chapter 1".to_string());
                h
            })
            .collect(),
    );
    record
}

pub fn notion() -> Notion {
    Notion::default()
}

pub fn options(workers: usize) -> SyncOptions {
    SyncOptions {
        max_workers: workers,
        retry_base_ms: 1,
        ..SyncOptions::default()
    }
}

pub fn default_schema() -> DatabaseSchema {
    let mut s = DatabaseSchema::new();
    s.insert("Name".into(), PropertySchema::new(PropertyKind::Title));
    s.insert("Author".into(), PropertySchema::new(PropertyKind::RichText));
    s.insert(
        "Status".into(),
        PropertySchema::with_options(PropertyKind::Status, &["To Be Read", "Currently Reading", "Read"]),
    );
    s.insert("Current Page".into(), PropertySchema::new(PropertyKind::Number));
    s.insert("Total Page".into(), PropertySchema::new(PropertyKind::Number));
    s.insert("Date Started".into(), PropertySchema::new(PropertyKind::Date));
    s.insert("Last Read At".into(), PropertySchema::new(PropertyKind::Date));
    s.insert("Date Finished".into(), PropertySchema::new(PropertyKind::Date));
    s.insert("Source".into(), PropertySchema::new(PropertyKind::MultiSelect));
    s
}

/// Scriptable in-memory source.
#[derive(Default)]
pub struct FakeSource {
    pub books: Vec<SourceBookRecord>,
    pub fetches: AtomicUsize,
    /// 1-based fetch number that reports an expired credential.
    pub auth_fail_on: Option<usize>,
    /// title → remaining transient failures
    pub transient: Mutex<HashMap<String, usize>>,
    pub broken: HashSet<String>,
}

impl FakeSource {
    pub fn new(books: Vec<SourceBookRecord>) -> Self {
        FakeSource {
            books,
            ..Default::default()
        }
    }
}

#[async_trait]
impl SourceAdapter for FakeSource {
    fn name(&self) -> &str {
        "WeRead"
    }

    async fn validate_credentials(&self) -> Result<(), SyncError> {
        Ok(())
    }

    async fn list_books(&self) -> Result<Vec<SourceBookRecord>, SyncError> {
        Ok(self.books.clone())
    }

    async fn fetch_details(&self, record: &SourceBookRecord) -> Result<SourceBookRecord, SyncError> {
        let n = self.fetches.fetch_add(1, Ordering::SeqCst) + 1;
        if self.auth_fail_on == Some(n) {
            return Err(SyncError::auth_expired("weread", "errcode -2012"));
        }
        {
            let mut transient = self.transient.lock().unwrap();
            if let Some(left) = transient.get_mut(&record.title) {
                if *left > 0 {
                    *left -= 1;
                    return Err(SyncError::TransientFetch("503 Service Unavailable".into()));
                }
            }
        }
        if self.broken.contains(&record.title) {
            return Err(SyncError::Api("bookmarklist: 400".into()));
        }
        Ok(record.clone())
    }
}

/// In-memory database that records every write.
pub struct FakeRepo {
    pub schema: DatabaseSchema,
    pub pages: Mutex<Vec<TargetRecord>>,
    pub blocks: Mutex<HashMap<String, Vec<(String, Block)>>>,
    pub creates: AtomicUsize,
    pub updates: Mutex<Vec<(String, PropertyMap)>>,
    pub appends: AtomicUsize,
    pub deletes: AtomicUsize,
    pub create_delay: Duration,
    pub finds: AtomicUsize,
    /// 1-based lookup number that answers like a revoked integration token.
    pub auth_fail_on_find: Option<usize>,
    next_id: AtomicUsize,
}

impl Default for FakeRepo {
    fn default() -> Self {
        FakeRepo::with_schema(default_schema())
    }
}

impl FakeRepo {
    pub fn with_schema(schema: DatabaseSchema) -> Self {
        FakeRepo {
            schema,
            pages: Mutex::new(vec![]),
            blocks: Mutex::new(HashMap::new()),
            creates: AtomicUsize::new(0),
            updates: Mutex::new(vec![]),
            appends: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
            create_delay: Duration::ZERO,
            finds: AtomicUsize::new(0),
            auth_fail_on_find: None,
            next_id: AtomicUsize::new(0),
        }
    }

    pub fn create_count(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn update_calls(&self) -> Vec<(String, PropertyMap)> {
        self.updates.lock().unwrap().clone()
    }

    pub fn write_calls(&self) -> usize {
        self.create_count()
            + self.updates.lock().unwrap().len()
            + self.appends.load(Ordering::SeqCst)
            + self.deletes.load(Ordering::SeqCst)
    }

    fn title_of(record: &TargetRecord) -> Option<&str> {
        match record.properties.get("Name") {
            Some(FieldValue::Title(t)) => Some(t.as_str()),
            _ => None,
        }
    }
}

#[async_trait]
impl TargetRepository for FakeRepo {
    async fn schema(&self) -> Result<DatabaseSchema, SyncError> {
        Ok(self.schema.clone())
    }

    async fn find(&self, title: &str) -> Result<Option<TargetRecord>, SyncError> {
        let n = self.finds.fetch_add(1, Ordering::SeqCst) + 1;
        if self.auth_fail_on_find == Some(n) {
            return Err(SyncError::auth_expired("notion", "HTTP 401 unauthorized"));
        }
        let pages = self.pages.lock().unwrap();
        Ok(pages.iter().find(|p| FakeRepo::title_of(p) == Some(title)).cloned())
    }

    async fn create(&self, fields: &PropertyMap) -> Result<TargetRecord, SyncError> {
        if !self.create_delay.is_zero() {
            tokio::time::sleep(self.create_delay).await;
        }
        self.creates.fetch_add(1, Ordering::SeqCst);
        let id = format!("page-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let record = TargetRecord {
            id,
            properties: fields.clone(),
        };
        self.pages.lock().unwrap().push(record.clone());
        Ok(record)
    }

    async fn update(&self, id: &str, changed: &PropertyMap) -> Result<(), SyncError> {
        self.updates
            .lock()
            .unwrap()
            .push((id.to_string(), changed.clone()));
        let mut pages = self.pages.lock().unwrap();
        let page = pages
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| SyncError::Api(format!("no page {}", id)))?;
        for (k, v) in changed {
            page.properties.insert(k.clone(), v.clone());
        }
        Ok(())
    }

    async fn list_blocks(&self, page_id: &str) -> Result<Vec<ExistingBlock>, SyncError> {
        let blocks = self.blocks.lock().unwrap();
        Ok(blocks
            .get(page_id)
            .map(|list| {
                list.iter()
                    .map(|(id, b)| ExistingBlock {
                        id: id.clone(),
                        signature: b.signature(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn append_blocks(&self, page_id: &str, blocks: &[Block]) -> Result<(), SyncError> {
        self.appends.fetch_add(1, Ordering::SeqCst);
        let mut all = self.blocks.lock().unwrap();
        let list = all.entry(page_id.to_string()).or_default();
        for b in blocks {
            let id = format!("block-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
            list.push((id, b.clone()));
        }
        Ok(())
    }

    async fn delete_block(&self, block_id: &str) -> Result<(), SyncError> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        let mut all = self.blocks.lock().unwrap();
        for list in all.values_mut() {
            list.retain(|(id, _)| id != block_id);
        }
        Ok(())
    }
}
