use async_trait::async_trait;
use chrono::{DateTime, Utc};
use crate::error::Result;
use crate::storage::ByteReader;

/// FTP 层需要的通用文件信息
pub trait FileInfo {
    fn name(&self) -> &str;
    fn size(&self) -> u64;
    /// 原始 `st_mode` 位（包含文件类型位）
    fn mode(&self) -> u32;
    fn mod_time(&self) -> DateTime<Utc>;
    fn is_dir(&self) -> bool;
    fn owner(&self) -> &str;
    fn group(&self) -> &str;
}

/// 一个 FTP 连接的会话状态，由协议引擎持有并在每次调用时传入
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    login_user: String,
    cur_dir: String,
}

impl Session {
    pub fn new(login_user: impl Into<String>) -> Self {
        Self {
            login_user: login_user.into(),
            cur_dir: "/".to_string(),
        }
    }

    pub fn login_user(&self) -> &str {
        &self.login_user
    }

    /// 重新登录后身份可能变化
    pub fn set_login_user(&mut self, user: impl Into<String>) {
        self.login_user = user.into();
    }

    pub fn cur_dir(&self) -> &str {
        &self.cur_dir
    }

    pub(crate) fn set_cur_dir(&mut self, path: &str) {
        self.cur_dir = path.to_string();
    }
}

/// FTP 服务器调用的存储驱动接口
#[async_trait]
pub trait Driver: Send + Sync {
    type Info: FileInfo + Send;

    async fn change_dir(&self, session: &mut Session, path: &str) -> Result<()>;
    async fn stat(&self, session: &Session, path: &str) -> Result<Self::Info>;
    /// `visit` 返回错误时立即中止并把该错误返回给调用方
    async fn list_dir(
        &self,
        session: &Session,
        prefix: &str,
        visit: &mut (dyn FnMut(Self::Info) -> Result<()> + Send),
    ) -> Result<()>;
    async fn delete_dir(&self, session: &Session, path: &str) -> Result<()>;
    async fn delete_file(&self, session: &Session, path: &str) -> Result<()>;
    async fn rename(&self, session: &Session, from: &str, to: &str) -> Result<()>;
    async fn make_dir(&self, session: &Session, path: &str) -> Result<()>;
    /// 返回对象声明的大小和内容流
    async fn get_file(&self, session: &Session, path: &str, offset: u64) -> Result<(u64, ByteReader)>;
    /// 返回写入的字节数
    async fn put_file(&self, session: &Session, path: &str, data: ByteReader, append: bool) -> Result<u64>;
}

/// 每个连接创建一个驱动
#[async_trait]
pub trait DriverFactory: Send + Sync {
    type Driver: Driver;

    async fn new_driver(&self) -> Result<Self::Driver>;
}
