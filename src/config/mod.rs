use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use crate::error::{FsError, Result};
use crate::storage::gcs::DEFAULT_ENDPOINT;

/// 驱动配置：bucket 命名方式与访问凭据
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverConfig {
    pub bucket: String,
    #[serde(default)]
    pub bucket_per_user: bool,
    #[serde(default)]
    pub service_account_path: Option<PathBuf>,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

impl DriverConfig {
    pub fn new(bucket: impl Into<String>, bucket_per_user: bool, service_account_path: Option<PathBuf>) -> Self {
        Self {
            bucket: bucket.into(),
            bucket_per_user,
            service_account_path,
            endpoint: default_endpoint(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub async fn from_file(path: &Path) -> Result<Self> {
        let text = tokio::fs::read_to_string(path).await?;
        Ok(serde_json::from_str(&text)?)
    }

    /// 用 GCSFTP_* 环境变量覆盖已有的值
    pub fn apply_env(mut self) -> Result<Self> {
        if let Ok(bucket) = env::var("GCSFTP_BUCKET") {
            self.bucket = bucket;
        }
        if let Ok(value) = env::var("GCSFTP_BUCKET_PER_USER") {
            self.bucket_per_user = parse_bool(&value).ok_or_else(|| {
                FsError::InvalidOperation(format!("invalid GCSFTP_BUCKET_PER_USER value `{}`", value))
            })?;
        }
        if let Ok(path) = env::var("GCSFTP_SERVICE_ACCOUNT") {
            self.service_account_path = Some(PathBuf::from(path));
        }
        if let Ok(endpoint) = env::var("GCSFTP_ENDPOINT") {
            self.endpoint = endpoint;
        }
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.bucket.trim().is_empty() {
            return Err(FsError::InvalidOperation("bucket name must not be empty".to_string()));
        }
        Ok(())
    }
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self::new(String::new(), false, None)
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_load_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(br#"{"bucket": "ftp-data", "bucket_per_user": true}"#).unwrap();

        let config = DriverConfig::from_file(file.path()).await.unwrap();
        assert_eq!(config.bucket, "ftp-data");
        assert!(config.bucket_per_user);
        assert_eq!(config.service_account_path, None);
        assert_eq!(config.endpoint, DEFAULT_ENDPOINT);
    }

    #[test]
    fn test_validate() {
        assert!(DriverConfig::default().validate().is_err());
        assert!(DriverConfig::new("  ", false, None).validate().is_err());
        assert!(DriverConfig::new("ftp-data", false, None).validate().is_ok());
    }

    #[test]
    fn test_parse_bool() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool(" 0 "), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn test_with_endpoint() {
        let config = DriverConfig::new("b", false, None).with_endpoint("http://localhost:4443");
        assert_eq!(config.endpoint, "http://localhost:4443");
    }
}
