use async_trait::async_trait;
use bytes::Bytes;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::io::Cursor;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::RwLock;
use tracing::debug;
use crate::error::{FsError, Result};

pub mod gcs;

pub use gcs::GcsObjectStore;

/// 对象内容的流式读取端
pub type ByteReader = Box<dyn AsyncRead + Send + Unpin>;

/// 后端对象的元数据（字段与 Cloud Storage 的 object 资源一致）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ObjectMeta {
    pub name: String,
    pub bucket: String,
    #[serde(deserialize_with = "deserialize_size")]
    pub size: u64,
    /// RFC 3339 格式的最后更新时间
    pub updated: String,
    pub media_link: String,
    pub self_link: String,
}

// JSON API 把 size 作为十进制字符串返回
fn deserialize_size<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Size {
        Text(String),
        Number(u64),
    }

    match Size::deserialize(deserializer)? {
        Size::Text(s) if s.is_empty() => Ok(0),
        Size::Text(s) => s.parse().map_err(serde::de::Error::custom),
        Size::Number(n) => Ok(n),
    }
}

/// 扁平的对象存储后端：只认识 bucket 与 key，没有目录概念
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get_object(&self, bucket: &str, key: &str) -> Result<ObjectMeta>;
    async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectMeta>>;
    async fn insert_object(&self, bucket: &str, key: &str, content: ByteReader) -> Result<ObjectMeta>;
    async fn copy_object(&self, src_bucket: &str, src_key: &str, dst_bucket: &str, dst_key: &str) -> Result<()>;
    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()>;
    /// 通过对象的 media link 打开内容流
    async fn open_media(&self, meta: &ObjectMeta) -> Result<ByteReader>;
}

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    updated: String,
}

/// 进程内的对象存储，key 按字典序保存，与真实服务的列举顺序一致
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    buckets: RwLock<HashMap<String, BTreeMap<String, StoredObject>>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create_bucket(&self, bucket: &str) {
        let mut buckets = self.buckets.write().await;
        buckets.entry(bucket.to_string()).or_default();
        debug!("create_bucket: {}", bucket);
    }

    /// 直接写入一个对象，测试与初始化数据时使用
    pub async fn put_bytes(&self, bucket: &str, key: &str, data: impl Into<Bytes>) -> Result<ObjectMeta> {
        let mut buckets = self.buckets.write().await;
        let objects = buckets
            .get_mut(bucket)
            .ok_or_else(|| FsError::NotFound(format!("bucket {}", bucket)))?;
        let object = StoredObject {
            data: data.into(),
            updated: now_rfc3339(),
        };
        let meta = Self::meta(bucket, key, &object);
        objects.insert(key.to_string(), object);
        Ok(meta)
    }

    pub async fn keys(&self, bucket: &str) -> Vec<String> {
        let buckets = self.buckets.read().await;
        buckets
            .get(bucket)
            .map(|objects| objects.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn contains(&self, bucket: &str, key: &str) -> bool {
        let buckets = self.buckets.read().await;
        buckets.get(bucket).map_or(false, |objects| objects.contains_key(key))
    }

    fn meta(bucket: &str, key: &str, object: &StoredObject) -> ObjectMeta {
        ObjectMeta {
            name: key.to_string(),
            bucket: bucket.to_string(),
            size: object.data.len() as u64,
            updated: object.updated.clone(),
            media_link: format!("memory://{}/{}", bucket, key),
            self_link: format!("memory://{}/o/{}", bucket, key),
        }
    }
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn get_object(&self, bucket: &str, key: &str) -> Result<ObjectMeta> {
        let buckets = self.buckets.read().await;
        let objects = buckets
            .get(bucket)
            .ok_or_else(|| FsError::NotFound(format!("bucket {}", bucket)))?;
        objects
            .get(key)
            .map(|object| Self::meta(bucket, key, object))
            .ok_or_else(|| FsError::NotFound(format!("{}/{}", bucket, key)))
    }

    async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectMeta>> {
        let buckets = self.buckets.read().await;
        let objects = buckets
            .get(bucket)
            .ok_or_else(|| FsError::NotFound(format!("bucket {}", bucket)))?;
        Ok(objects
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, object)| Self::meta(bucket, key, object))
            .collect())
    }

    async fn insert_object(&self, bucket: &str, key: &str, mut content: ByteReader) -> Result<ObjectMeta> {
        let mut data = Vec::new();
        content.read_to_end(&mut data).await?;
        debug!("insert_object: {}/{} ({} bytes)", bucket, key, data.len());
        self.put_bytes(bucket, key, data).await
    }

    async fn copy_object(&self, src_bucket: &str, src_key: &str, dst_bucket: &str, dst_key: &str) -> Result<()> {
        let mut buckets = self.buckets.write().await;
        let data = buckets
            .get(src_bucket)
            .and_then(|objects| objects.get(src_key))
            .map(|object| object.data.clone())
            .ok_or_else(|| FsError::NotFound(format!("{}/{}", src_bucket, src_key)))?;
        let objects = buckets
            .get_mut(dst_bucket)
            .ok_or_else(|| FsError::NotFound(format!("bucket {}", dst_bucket)))?;
        objects.insert(
            dst_key.to_string(),
            StoredObject {
                data,
                updated: now_rfc3339(),
            },
        );
        Ok(())
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        let mut buckets = self.buckets.write().await;
        buckets
            .get_mut(bucket)
            .and_then(|objects| objects.remove(key))
            .map(|_| ())
            .ok_or_else(|| FsError::NotFound(format!("{}/{}", bucket, key)))
    }

    async fn open_media(&self, meta: &ObjectMeta) -> Result<ByteReader> {
        let buckets = self.buckets.read().await;
        let data = buckets
            .get(&meta.bucket)
            .and_then(|objects| objects.get(&meta.name))
            .map(|object| object.data.clone())
            .ok_or_else(|| FsError::NotFound(meta.media_link.clone()))?;
        Ok(Box::new(Cursor::new(data)))
    }
}
