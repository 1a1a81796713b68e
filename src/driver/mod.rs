use async_trait::async_trait;
use std::collections::HashSet;
use std::io::ErrorKind;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use crate::auth::{ServiceAccountKey, TokenSource};
use crate::config::DriverConfig;
use crate::error::{FsError, Result};
use crate::fileinfo::ObjectInfo;
use crate::fs::{Driver, DriverFactory, FileInfo, Session};
use crate::storage::{ByteReader, GcsObjectStore, ObjectMeta, ObjectStore};

/// bucket 命名方式：共享一个 bucket，或每个用户一个 `<base>-<user>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketPolicy {
    base: String,
    per_user: bool,
}

impl BucketPolicy {
    pub fn new(base: impl Into<String>, per_user: bool) -> Self {
        Self {
            base: base.into(),
            per_user,
        }
    }

    pub fn resolve(&self, login_user: &str) -> String {
        if self.per_user {
            format!("{}-{}", self.base, login_user)
        } else {
            self.base.clone()
        }
    }
}

/// 单次操作解析出的 bucket 与身份，不跨调用保存
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpContext {
    pub bucket: String,
    pub user: String,
}

/// FTP 路径转成对象 key：去掉开头的分隔符
pub fn to_key(path: &str) -> &str {
    path.trim_start_matches('/')
}

/// 目录对应的 key 前缀，根目录为空串，其余恰好以一个 `/` 结尾
pub fn dir_prefix(path: &str) -> String {
    let key = to_key(path).trim_end_matches('/');
    if key.is_empty() {
        String::new()
    } else {
        format!("{}/", key)
    }
}

/// 把扁平的 key 空间映射成目录树的 FTP 驱动
///
/// 目录从不单独存储：只要有对象的 key 以 `dir/` 开头，`dir` 就是目录。
/// MakeDir 写入的零字节 `dir/` 对象只是让空目录也能被前缀列举看到。
/// 多步操作（删除目录、重命名目录）逐个对象执行，中途失败不回滚。
pub struct BucketDriver {
    policy: BucketPolicy,
    store: Arc<dyn ObjectStore>,
}

impl std::fmt::Debug for BucketDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BucketDriver")
            .field("policy", &self.policy)
            .finish()
    }
}

impl BucketDriver {
    pub fn new(policy: BucketPolicy, store: Arc<dyn ObjectStore>) -> Self {
        Self { policy, store }
    }

    /// 每次操作都从当前会话重新解析 bucket
    pub fn context(&self, session: &Session) -> OpContext {
        OpContext {
            bucket: self.policy.resolve(session.login_user()),
            user: session.login_user().to_string(),
        }
    }

    async fn list_keys(&self, ctx: &OpContext, prefix: &str) -> Result<Vec<ObjectMeta>> {
        match self.store.list_objects(&ctx.bucket, prefix).await {
            // 后端用 EOF 表示没有数据
            Err(FsError::Io(e)) if e.kind() == ErrorKind::UnexpectedEof => Ok(Vec::new()),
            other => other,
        }
    }

    /// `key` 下的所有对象，目录推断都经过这里
    ///
    /// 后端返回的条目不一定都在前缀下（过期或不一致的列举），不在前缀下的一律丢弃。
    async fn directory_entries(&self, ctx: &OpContext, key: &str) -> Result<Vec<ObjectMeta>> {
        let prefix = dir_prefix(key);
        let mut entries = self.list_keys(ctx, &prefix).await?;
        entries.retain(|entry| {
            let inside = entry.name.starts_with(prefix.as_str());
            if !inside {
                debug!("skipping {} outside of {}/{}", entry.name, ctx.bucket, prefix);
            }
            inside
        });
        Ok(entries)
    }

    pub async fn is_directory(&self, ctx: &OpContext, key: &str) -> Result<bool> {
        if dir_prefix(key).is_empty() {
            return Ok(true);
        }
        Ok(!self.directory_entries(ctx, key).await?.is_empty())
    }

    async fn move_object(&self, ctx: &OpContext, from: &str, to: &str) -> Result<()> {
        self.store.copy_object(&ctx.bucket, from, &ctx.bucket, to).await?;
        self.store.delete_object(&ctx.bucket, from).await
    }

    async fn rename_dir(&self, ctx: &OpContext, src: &str, dst: &str) -> Result<()> {
        let from = dir_prefix(src);
        let to = dir_prefix(dst);
        if from.is_empty() || to.is_empty() {
            return Err(FsError::InvalidOperation("cannot rename the root directory".to_string()));
        }
        if to.starts_with(&from) {
            return Err(FsError::InvalidOperation(format!(
                "cannot move {} into itself ({})",
                src, dst
            )));
        }

        let entries = self.directory_entries(ctx, &from).await?;
        if entries.is_empty() {
            return Err(FsError::NotFound(src.to_string()));
        }

        let total = entries.len();
        for (moved, entry) in entries.iter().enumerate() {
            let rest = match entry.name.strip_prefix(from.as_str()) {
                Some(rest) => rest,
                None => continue,
            };
            let new_name = format!("{}{}", to, rest);
            debug!("rename_dir: {} -> {}", entry.name, new_name);
            if let Err(e) = self.move_object(ctx, &entry.name, &new_name).await {
                error!(
                    "rename_dir: {} -> {} aborted after {} of {} objects: {}",
                    from, to, moved, total, e
                );
                return Err(e);
            }
        }
        info!("Renamed directory {} to {} ({} objects)", from, to, total);
        Ok(())
    }
}

#[async_trait]
impl Driver for BucketDriver {
    type Info = ObjectInfo;

    async fn change_dir(&self, session: &mut Session, path: &str) -> Result<()> {
        let info = self.stat(session, path).await?;
        if !info.is_dir() {
            return Err(FsError::NotADirectory(path.to_string()));
        }
        session.set_cur_dir(path);
        Ok(())
    }

    async fn stat(&self, session: &Session, path: &str) -> Result<ObjectInfo> {
        let ctx = self.context(session);
        if path.ends_with('/') {
            return Ok(ObjectInfo::directory(path, ctx.user));
        }

        let key = to_key(path);
        match self.store.get_object(&ctx.bucket, key).await {
            Ok(object) => Ok(ObjectInfo::file(path, ctx.user, object)),
            Err(e) => {
                debug!("stat: no object at {}/{} ({}), checking for a directory", ctx.bucket, key, e);
                if self.is_directory(&ctx, key).await? {
                    Ok(ObjectInfo::directory(path, ctx.user))
                } else if e.is_not_found() {
                    Err(FsError::NotFound(path.to_string()))
                } else {
                    Err(e)
                }
            }
        }
    }

    async fn list_dir(
        &self,
        session: &Session,
        prefix: &str,
        visit: &mut (dyn FnMut(ObjectInfo) -> Result<()> + Send),
    ) -> Result<()> {
        let ctx = self.context(session);
        let prefix = dir_prefix(prefix);
        let entries = self.directory_entries(&ctx, &prefix).await?;
        debug!("list_dir: {} objects under {}/{}", entries.len(), ctx.bucket, prefix);

        let mut seen_dirs = HashSet::new();
        for entry in entries {
            let rest = match entry.name.strip_prefix(prefix.as_str()) {
                Some(rest) => rest.trim_start_matches('/').to_string(),
                None => continue,
            };
            if rest.is_empty() {
                continue;
            }

            if let Some((segment, _)) = rest.split_once('/') {
                if seen_dirs.insert(segment.to_string()) {
                    visit(ObjectInfo::directory(segment, ctx.user.as_str()))?;
                }
                continue;
            }
            visit(ObjectInfo::file(rest, ctx.user.as_str(), entry))?;
        }

        Ok(())
    }

    async fn delete_dir(&self, session: &Session, path: &str) -> Result<()> {
        let ctx = self.context(session);
        let prefix = dir_prefix(path);
        if prefix.is_empty() {
            return Err(FsError::InvalidOperation("cannot remove the root directory".to_string()));
        }

        let entries = self.directory_entries(&ctx, &prefix).await?;
        if entries.is_empty() {
            debug!("delete_dir: nothing under {}/{}", ctx.bucket, prefix);
            return Ok(());
        }

        let total = entries.len();
        for (deleted, entry) in entries.iter().enumerate() {
            if let Err(e) = self.store.delete_object(&ctx.bucket, &entry.name).await {
                error!(
                    "delete_dir: {} aborted after {} of {} objects: {}",
                    prefix, deleted, total, e
                );
                return Err(e);
            }
        }
        info!("Removed directory {}/{} ({} objects)", ctx.bucket, prefix, total);
        Ok(())
    }

    async fn delete_file(&self, session: &Session, path: &str) -> Result<()> {
        let ctx = self.context(session);
        let key = to_key(path);
        debug!("delete_file: {}/{}", ctx.bucket, key);
        self.store.delete_object(&ctx.bucket, key).await
    }

    async fn rename(&self, session: &Session, from: &str, to: &str) -> Result<()> {
        let ctx = self.context(session);
        debug!("rename: {} -> {}", from, to);
        if dir_prefix(from) == dir_prefix(to) {
            // 源与目标相同：确认存在即可，不做复制删除
            self.stat(session, from).await?;
            debug!("rename: {} is already at {}", from, to);
            return Ok(());
        }
        if from.ends_with('/') {
            return self.rename_dir(&ctx, from, to).await;
        }

        let src = to_key(from);
        let dst = to_key(to);
        match self.store.get_object(&ctx.bucket, src).await {
            Ok(_) => {
                self.move_object(&ctx, src, dst).await?;
                info!("Renamed {} to {}", src, dst);
                Ok(())
            }
            Err(e) if e.is_not_found() => self.rename_dir(&ctx, from, to).await,
            Err(e) => Err(e),
        }
    }

    async fn make_dir(&self, session: &Session, path: &str) -> Result<()> {
        let ctx = self.context(session);
        let key = dir_prefix(path);
        if key.is_empty() {
            return Err(FsError::InvalidOperation("the root directory always exists".to_string()));
        }
        self.store
            .insert_object(&ctx.bucket, &key, Box::new(tokio::io::empty()))
            .await?;
        info!("mkdir {}/{}", ctx.bucket, key);
        Ok(())
    }

    async fn get_file(&self, session: &Session, path: &str, offset: u64) -> Result<(u64, ByteReader)> {
        let ctx = self.context(session);
        let key = to_key(path);
        if offset > 0 {
            warn!("get_file: offset {} ignored for {}, sending whole object", offset, key);
        }

        let object = self.store.get_object(&ctx.bucket, key).await?;
        info!(
            "The media download link for {}/{} is {}",
            ctx.bucket, object.name, object.media_link
        );
        let reader = self.store.open_media(&object).await?;
        Ok((object.size, reader))
    }

    async fn put_file(&self, session: &Session, path: &str, data: ByteReader, append: bool) -> Result<u64> {
        let ctx = self.context(session);
        let key = to_key(path);
        if append {
            warn!("put_file: append requested for {}, overwriting instead", key);
        }

        let object = self.store.insert_object(&ctx.bucket, key, data).await?;
        info!("Created object {} at location {}", object.name, object.self_link);
        // 写入字节数不统计
        Ok(0)
    }
}

/// 根据配置为每个连接创建 `BucketDriver`
#[derive(Debug, Clone)]
pub struct BucketDriverFactory {
    config: DriverConfig,
    client: reqwest::Client,
}

impl BucketDriverFactory {
    pub fn new(config: DriverConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl DriverFactory for BucketDriverFactory {
    type Driver = BucketDriver;

    async fn new_driver(&self) -> Result<BucketDriver> {
        self.config.validate()?;

        let tokens = match &self.config.service_account_path {
            Some(path) => {
                let key = ServiceAccountKey::from_file(path).await?;
                Some(Arc::new(TokenSource::new(key, self.client.clone())))
            }
            None => {
                warn!("No service account configured, accessing {} anonymously", self.config.endpoint);
                None
            }
        };
        let store = GcsObjectStore::new(self.client.clone(), &self.config.endpoint, tokens)?;
        info!("Created storage service for {}", self.config.endpoint);

        Ok(BucketDriver::new(
            BucketPolicy::new(self.config.bucket.clone(), self.config.bucket_per_user),
            Arc::new(store),
        ))
    }
}
