use async_trait::async_trait;
use futures::TryStreamExt;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Body, Client, Method, RequestBuilder, Response, StatusCode, Url};
use serde::Deserialize;
use std::sync::Arc;
use tokio_util::io::{ReaderStream, StreamReader};
use tracing::debug;
use crate::auth::TokenSource;
use crate::error::{FsError, Result};
use crate::storage::{ByteReader, ObjectMeta, ObjectStore};

pub const DEFAULT_ENDPOINT: &str = "https://storage.googleapis.com";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ObjectList {
    items: Vec<ObjectMeta>,
    next_page_token: Option<String>,
}

/// Cloud Storage JSON API 客户端
pub struct GcsObjectStore {
    client: Client,
    endpoint: Url,
    tokens: Option<Arc<TokenSource>>,
}

impl std::fmt::Debug for GcsObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GcsObjectStore")
            .field("endpoint", &self.endpoint.as_str())
            .field("authenticated", &self.tokens.is_some())
            .finish()
    }
}

impl GcsObjectStore {
    /// `tokens` 为 None 时以匿名方式访问（模拟器或公开 bucket）
    pub fn new(client: Client, endpoint: &str, tokens: Option<Arc<TokenSource>>) -> Result<Self> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| FsError::InvalidOperation(format!("invalid endpoint {}: {}", endpoint, e)))?;
        if endpoint.cannot_be_a_base() {
            return Err(FsError::InvalidOperation(format!("invalid endpoint {}", endpoint)));
        }
        Ok(Self {
            client,
            endpoint,
            tokens,
        })
    }

    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| FsError::InvalidOperation(format!("invalid endpoint {}", self.endpoint)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn object_url(&self, bucket: &str, key: &str) -> Result<Url> {
        self.url(&["storage", "v1", "b", bucket, "o", key])
    }

    async fn request(&self, method: Method, url: Url) -> Result<RequestBuilder> {
        debug!("{} {}", method, url);
        let mut builder = self.client.request(method, url);
        if let Some(tokens) = &self.tokens {
            builder = builder.bearer_auth(tokens.token().await?);
        }
        Ok(builder)
    }

    async fn check(response: Response, what: &str) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(match status {
            StatusCode::NOT_FOUND => FsError::NotFound(what.to_string()),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                FsError::PermissionDenied(format!("{}: {}", what, body))
            }
            _ => FsError::Storage(format!("{} failed ({}): {}", what, status, body)),
        })
    }
}

#[async_trait]
impl ObjectStore for GcsObjectStore {
    async fn get_object(&self, bucket: &str, key: &str) -> Result<ObjectMeta> {
        let url = self.object_url(bucket, key)?;
        let response = self.request(Method::GET, url).await?.send().await?;
        let response = Self::check(response, &format!("{}/{}", bucket, key)).await?;
        Ok(response.json().await?)
    }

    async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectMeta>> {
        let mut items = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let url = self.url(&["storage", "v1", "b", bucket, "o"])?;
            let mut builder = self.request(Method::GET, url).await?;
            if !prefix.is_empty() {
                builder = builder.query(&[("prefix", prefix)]);
            }
            if let Some(token) = &page_token {
                builder = builder.query(&[("pageToken", token.as_str())]);
            }
            let response = Self::check(builder.send().await?, &format!("list {}/{}", bucket, prefix)).await?;
            let page: ObjectList = response.json().await?;
            debug!("list_objects: {} items in page of {}/{}", page.items.len(), bucket, prefix);
            items.extend(page.items);

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        Ok(items)
    }

    async fn insert_object(&self, bucket: &str, key: &str, content: ByteReader) -> Result<ObjectMeta> {
        let url = self.url(&["upload", "storage", "v1", "b", bucket, "o"])?;
        let response = self
            .request(Method::POST, url)
            .await?
            .query(&[("uploadType", "media"), ("name", key)])
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(Body::wrap_stream(ReaderStream::new(content)))
            .send()
            .await?;
        let response = Self::check(response, &format!("insert {}/{}", bucket, key)).await?;
        let meta: ObjectMeta = response.json().await?;
        debug!("insert_object: stored {} ({} bytes)", meta.name, meta.size);
        Ok(meta)
    }

    async fn copy_object(&self, src_bucket: &str, src_key: &str, dst_bucket: &str, dst_key: &str) -> Result<()> {
        let url = self.url(&[
            "storage", "v1", "b", src_bucket, "o", src_key, "copyTo", "b", dst_bucket, "o", dst_key,
        ])?;
        let response = self
            .request(Method::POST, url)
            .await?
            .json(&serde_json::json!({}))
            .send()
            .await?;
        Self::check(response, &format!("{}/{}", src_bucket, src_key)).await?;
        Ok(())
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        let url = self.object_url(bucket, key)?;
        let response = self.request(Method::DELETE, url).await?.send().await?;
        Self::check(response, &format!("{}/{}", bucket, key)).await?;
        Ok(())
    }

    async fn open_media(&self, meta: &ObjectMeta) -> Result<ByteReader> {
        let url = Url::parse(&meta.media_link)
            .map_err(|e| FsError::Metadata(format!("bad media link {:?}: {}", meta.media_link, e)))?;
        let response = self.request(Method::GET, url).await?.send().await?;
        let response = Self::check(response, &meta.media_link).await?;
        let stream = response
            .bytes_stream()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e));
        Ok(Box::new(StreamReader::new(Box::pin(stream))))
    }
}
