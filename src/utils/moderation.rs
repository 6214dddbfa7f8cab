//! Content moderation collaborator.
//!
//! The core only sees [`ContentModerator`]. Verdicts for identical content are
//! cached in the database by SHA-256 of the text or of the image reference.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio_rusqlite::{Connection, OptionalExtension, params};

use crate::models::types::ModerationConfig;
use crate::utils::error::{CoreError, CoreResult};
use crate::utils::time::timestamp;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModerationVerdict {
    pub is_safe: bool,
    pub label: String,
    pub sub_label: String,
    pub score: Option<i64>,
}

impl ModerationVerdict {
    pub fn safe() -> Self {
        Self {
            is_safe: true,
            label: "Normal".to_string(),
            sub_label: String::new(),
            score: None,
        }
    }

    pub fn into_rejection(self) -> CoreError {
        CoreError::ModerationRejected {
            label: self.label,
            sub_label: self.sub_label,
        }
    }
}

/// Content moderation backend
#[async_trait]
pub trait ContentModerator: Send + Sync {
    async fn text_moderation(&self, text: &str) -> CoreResult<ModerationVerdict>;

    /// `image_ref` is the URL of the image.
    async fn image_moderation(&self, image_ref: &str) -> CoreResult<ModerationVerdict>;
}

pub type SharedModerator = Arc<dyn ContentModerator>;

/// Hard gate for nicknames and comments: a flagged text is an error.
pub async fn require_safe_text(moderator: &dyn ContentModerator, text: &str) -> CoreResult<()> {
    let verdict = moderator.text_moderation(text).await?;
    if verdict.is_safe {
        Ok(())
    } else {
        Err(verdict.into_rejection())
    }
}

pub fn content_hash(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

#[async_trait]
impl<T: ContentModerator + ?Sized> ContentModerator for Arc<T> {
    async fn text_moderation(&self, text: &str) -> CoreResult<ModerationVerdict> {
        (**self).text_moderation(text).await
    }

    async fn image_moderation(&self, image_ref: &str) -> CoreResult<ModerationVerdict> {
        (**self).image_moderation(image_ref).await
    }
}

/// Accepts everything; used when moderation is switched off.
pub struct PermissiveModerator;

#[async_trait]
impl ContentModerator for PermissiveModerator {
    async fn text_moderation(&self, _text: &str) -> CoreResult<ModerationVerdict> {
        Ok(ModerationVerdict::safe())
    }

    async fn image_moderation(&self, _image_ref: &str) -> CoreResult<ModerationVerdict> {
        Ok(ModerationVerdict::safe())
    }
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct ModerationRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    file_url: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    biz_type: Option<&'a str>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ModerationResponse {
    suggestion: String,
    #[serde(default)]
    label: String,
    #[serde(default)]
    sub_label: String,
    #[serde(default)]
    score: Option<i64>,
}

impl From<ModerationResponse> for ModerationVerdict {
    fn from(resp: ModerationResponse) -> Self {
        Self {
            is_safe: resp.suggestion.eq_ignore_ascii_case("pass"),
            label: resp.label,
            sub_label: resp.sub_label,
            score: resp.score,
        }
    }
}

/// Moderation over HTTPS. Text is sent base64 encoded, images by URL.
pub struct HttpModerator {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    text_biztype: Option<String>,
    image_biztype: Option<String>,
}

impl HttpModerator {
    pub fn new(config: &ModerationConfig, api_key: String) -> CoreResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| CoreError::ExternalService(format!("無法建立審核 HTTP 客戶端: {}", e)))?;
        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            api_key,
            text_biztype: config.text_biztype.clone(),
            image_biztype: config.image_biztype.clone(),
        })
    }

    async fn post(&self, path: &str, body: &ModerationRequest<'_>) -> CoreResult<ModerationVerdict> {
        let url = format!("{}/{}", self.endpoint, path);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                log::error!("[Core.moderation] 請求 {} 失敗: {}", url, e);
                CoreError::ExternalService(e.to_string())
            })?;

        let status = resp.status();
        if !status.is_success() {
            log::error!("[Core.moderation] {} 回應狀態 {}", url, status);
            return Err(CoreError::ExternalService(format!("moderation status {status}")));
        }
        let parsed: ModerationResponse = resp.json().await.map_err(|e| {
            log::error!("[Core.moderation] 無法解析審核回應: {}", e);
            CoreError::ExternalService(e.to_string())
        })?;
        Ok(parsed.into())
    }
}

#[async_trait]
impl ContentModerator for HttpModerator {
    async fn text_moderation(&self, text: &str) -> CoreResult<ModerationVerdict> {
        let body = ModerationRequest {
            content: Some(STANDARD.encode(text.as_bytes())),
            file_url: None,
            biz_type: self.text_biztype.as_deref(),
        };
        self.post("text", &body).await
    }

    async fn image_moderation(&self, image_ref: &str) -> CoreResult<ModerationVerdict> {
        let body = ModerationRequest {
            content: None,
            file_url: Some(image_ref),
            biz_type: self.image_biztype.as_deref(),
        };
        self.post("image", &body).await
    }
}

#[derive(Clone, Copy)]
enum CacheTable {
    Text,
    Image,
}

impl CacheTable {
    fn table(&self) -> &'static str {
        match self {
            CacheTable::Text => "content_review_text",
            CacheTable::Image => "content_review_image",
        }
    }

    fn key(&self) -> &'static str {
        match self {
            CacheTable::Text => "text_hash",
            CacheTable::Image => "image_hash",
        }
    }
}

/// Wraps another moderator and remembers every verdict.
pub struct CachedModerator<M> {
    inner: M,
    conn: Connection,
}

impl<M: ContentModerator> CachedModerator<M> {
    pub fn new(inner: M, conn: Connection) -> Self {
        Self { inner, conn }
    }

    async fn cached(&self, kind: CacheTable, hash: String) -> CoreResult<Option<ModerationVerdict>> {
        Ok(self
            .conn
            .call(move |conn| {
                let sql = format!(
                    "SELECT is_safe, label, sub_label, score FROM {} WHERE {} = ?1",
                    kind.table(),
                    kind.key()
                );
                Ok(conn
                    .query_row(&sql, [hash], |row| {
                        Ok(ModerationVerdict {
                            is_safe: row.get(0)?,
                            label: row.get(1)?,
                            sub_label: row.get(2)?,
                            score: row.get(3)?,
                        })
                    })
                    .optional()?)
            })
            .await?)
    }

    async fn store(&self, kind: CacheTable, hash: String, verdict: ModerationVerdict) -> CoreResult<()> {
        let now = timestamp(Utc::now());
        self.conn
            .call(move |conn| {
                let sql = format!(
                    "INSERT OR REPLACE INTO {} ({}, is_safe, label, sub_label, score, review_time)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    kind.table(),
                    kind.key()
                );
                conn.execute(
                    &sql,
                    params![hash, verdict.is_safe, verdict.label, verdict.sub_label, verdict.score, now],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }
}

#[async_trait]
impl<M: ContentModerator> ContentModerator for CachedModerator<M> {
    async fn text_moderation(&self, text: &str) -> CoreResult<ModerationVerdict> {
        let hash = content_hash(text);
        if let Some(verdict) = self.cached(CacheTable::Text, hash.clone()).await? {
            return Ok(verdict);
        }
        let verdict = self.inner.text_moderation(text).await?;
        self.store(CacheTable::Text, hash, verdict.clone()).await?;
        Ok(verdict)
    }

    async fn image_moderation(&self, image_ref: &str) -> CoreResult<ModerationVerdict> {
        let hash = content_hash(image_ref);
        if let Some(verdict) = self.cached(CacheTable::Image, hash.clone()).await? {
            return Ok(verdict);
        }
        let verdict = self.inner.image_moderation(image_ref).await?;
        self.store(CacheTable::Image, hash, verdict.clone()).await?;
        Ok(verdict)
    }
}

/// Build the moderator described by the configuration.
pub fn build_moderator(config: &ModerationConfig, conn: Connection) -> CoreResult<SharedModerator> {
    if !config.enabled {
        log::info!("[Core.moderation] 內容審核已關閉");
        return Ok(Arc::new(PermissiveModerator));
    }
    let api_key = std::env::var("MODERATION_API_KEY").map_err(|_| {
        CoreError::ExternalService("已開啟內容審核，但找不到 MODERATION_API_KEY 環境變數".to_string())
    })?;
    let http = HttpModerator::new(config, api_key)?;
    log::info!("[Core.moderation] 內容審核端點: {}", config.endpoint);
    Ok(Arc::new(CachedModerator::new(http, conn)))
}
