//! Notion database client implementing [`TargetRepository`].

pub mod codec;

use async_trait::async_trait;
use reqwest::Method;
use serde_json::{Value, json};
use tokio::sync::OnceCell;

use crate::blocks::{Block, ExistingBlock};
use crate::config::Notion;
use crate::error::SyncError;
use crate::http::{RetryPolicy, build_client, send_with_retry};
use crate::model::{PropertyMap, TargetRecord};
use crate::repository::{DatabaseSchema, TargetRepository};

pub const NOTION_VERSION: &str = "2022-06-28";
/// Upper bound on children per append request.
const APPEND_BATCH: usize = 100;
const SERVICE: &str = "notion";

pub struct NotionRepository {
    client: reqwest::Client,
    base_url: String,
    token: String,
    database_id: String,
    title_property: String,
    retry: RetryPolicy,
    schema: OnceCell<DatabaseSchema>,
}

impl NotionRepository {
    pub fn new(cfg: &Notion, retry: RetryPolicy, timeout_seconds: u64) -> Result<Self, SyncError> {
        if cfg.token.is_empty() || cfg.database_id.is_empty() {
            return Err(SyncError::Config("notion token and database id are required".to_string()));
        }
        Ok(NotionRepository {
            client: build_client(timeout_seconds)?,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            token: cfg.token.clone(),
            database_id: cfg.database_id.clone(),
            title_property: cfg.properties.title.trim().to_string(),
            retry,
            schema: OnceCell::new(),
        })
    }

    async fn call(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Value, SyncError> {
        let url = format!("{}/{}", self.base_url, path);
        tracing::debug!(method = %method, url = %url, "notion request");
        let response = send_with_retry(SERVICE, self.retry, || {
            let request = self
                .client
                .request(method.clone(), &url)
                .bearer_auth(&self.token)
                .header("Notion-Version", NOTION_VERSION);
            match body {
                Some(b) => request.json(b),
                None => request,
            }
        })
        .await?;
        Ok(response.json::<Value>().await?)
    }

    async fn cached_schema(&self) -> Result<&DatabaseSchema, SyncError> {
        self.schema
            .get_or_try_init(|| async {
                let json = self
                    .call(Method::GET, &format!("databases/{}", self.database_id), None)
                    .await?;
                codec::decode_schema(&json)
            })
            .await
    }
}

#[async_trait]
impl TargetRepository for NotionRepository {
    async fn schema(&self) -> Result<DatabaseSchema, SyncError> {
        Ok(self.cached_schema().await?.clone())
    }

    async fn find(&self, title: &str) -> Result<Option<TargetRecord>, SyncError> {
        let body = json!({
            "filter": { "property": self.title_property, "title": { "equals": title } },
            "page_size": 1,
        });
        let json = self
            .call(
                Method::POST,
                &format!("databases/{}/query", self.database_id),
                Some(&body),
            )
            .await?;
        match json
            .get("results")
            .and_then(Value::as_array)
            .and_then(|r| r.first())
        {
            Some(page) => Ok(Some(codec::decode_page(page)?)),
            None => Ok(None),
        }
    }

    async fn create(&self, fields: &PropertyMap) -> Result<TargetRecord, SyncError> {
        let schema = self.cached_schema().await?;
        let body = json!({
            "parent": { "database_id": self.database_id },
            "properties": codec::encode_properties(fields, schema),
        });
        let json = self.call(Method::POST, "pages", Some(&body)).await?;
        codec::decode_page(&json)
    }

    async fn update(&self, id: &str, changed: &PropertyMap) -> Result<(), SyncError> {
        let schema = self.cached_schema().await?;
        let body = json!({ "properties": codec::encode_properties(changed, schema) });
        self.call(Method::PATCH, &format!("pages/{}", id), Some(&body))
            .await?;
        Ok(())
    }

    async fn list_blocks(&self, page_id: &str) -> Result<Vec<ExistingBlock>, SyncError> {
        let mut blocks = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let mut path = format!("blocks/{}/children?page_size=100", page_id);
            if let Some(c) = &cursor {
                path.push_str(&format!("&start_cursor={}", urlencoding::encode(c)));
            }
            let json = self.call(Method::GET, &path, None).await?;
            let (page, next) = codec::decode_blocks(&json);
            blocks.extend(page);
            match next {
                Some(n) => cursor = Some(n),
                None => break,
            }
        }
        Ok(blocks)
    }

    async fn append_blocks(&self, page_id: &str, blocks: &[Block]) -> Result<(), SyncError> {
        for batch in blocks.chunks(APPEND_BATCH) {
            let children: Vec<Value> = batch.iter().map(codec::encode_block).collect();
            let body = json!({ "children": children });
            self.call(Method::PATCH, &format!("blocks/{}/children", page_id), Some(&body))
                .await?;
        }
        Ok(())
    }

    async fn delete_block(&self, block_id: &str) -> Result<(), SyncError> {
        self.call(Method::DELETE, &format!("blocks/{}", block_id), None)
            .await?;
        Ok(())
    }
}
