use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::sync::RwLock;
use tracing::{debug, info};
use crate::error::{FsError, Result};

pub const FULL_CONTROL_SCOPE: &str = "https://www.googleapis.com/auth/devstorage.full_control";

const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const TOKEN_LIFETIME_SECS: i64 = 3600;
const REFRESH_MARGIN_SECS: i64 = 60;

/// 服务账号密钥文件的内容
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceAccountKey {
    #[serde(rename = "type")]
    pub key_type: String,
    #[serde(default)]
    pub project_id: String,
    #[serde(default)]
    pub private_key_id: String,
    pub private_key: String,
    pub client_email: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub auth_uri: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    #[serde(default)]
    pub auth_provider_x509_cert_url: String,
    #[serde(default)]
    pub client_x509_cert_url: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl ServiceAccountKey {
    pub fn from_json(text: &str) -> Result<Self> {
        let key: Self = serde_json::from_str(text)?;
        if key.key_type != "service_account" {
            return Err(FsError::Auth(format!(
                "unsupported credential type: {:?}",
                key.key_type
            )));
        }
        Ok(key)
    }

    pub async fn from_file(path: &Path) -> Result<Self> {
        debug!("loading service account file {:?}", path);
        let text = tokio::fs::read_to_string(path).await?;
        let key = Self::from_json(&text)?;
        info!("Loaded service account {} (project {})", key.client_email, key.project_id);
        Ok(key)
    }
}

#[derive(Debug, Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
}

fn default_expires_in() -> i64 {
    TOKEN_LIFETIME_SECS
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now + Duration::seconds(REFRESH_MARGIN_SECS) >= self.expires_at
    }
}

/// 用服务账号签发 JWT 并换取 OAuth2 access token，token 在过期前复用
pub struct TokenSource {
    key: ServiceAccountKey,
    scope: String,
    client: reqwest::Client,
    cached: RwLock<Option<CachedToken>>,
}

impl std::fmt::Debug for TokenSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSource")
            .field("client_email", &self.key.client_email)
            .field("scope", &self.scope)
            .finish()
    }
}

impl TokenSource {
    pub fn new(key: ServiceAccountKey, client: reqwest::Client) -> Self {
        Self {
            key,
            scope: FULL_CONTROL_SCOPE.to_string(),
            client,
            cached: RwLock::new(None),
        }
    }

    /// 签发 RS256 断言
    pub fn assertion(&self, now: DateTime<Utc>) -> Result<String> {
        let mut header = Header::new(Algorithm::RS256);
        if !self.key.private_key_id.is_empty() {
            header.kid = Some(self.key.private_key_id.clone());
        }
        let iat = now.timestamp();
        let claims = Claims {
            iss: &self.key.client_email,
            scope: &self.scope,
            aud: &self.key.token_uri,
            iat,
            exp: iat + TOKEN_LIFETIME_SECS,
        };
        let encoding_key = EncodingKey::from_rsa_pem(self.key.private_key.as_bytes())?;
        Ok(jsonwebtoken::encode(&header, &claims, &encoding_key)?)
    }

    pub async fn token(&self) -> Result<String> {
        {
            let cached = self.cached.read().await;
            if let Some(token) = cached.as_ref().filter(|t| !t.is_expired(Utc::now())) {
                return Ok(token.token.clone());
            }
        }

        let mut cached = self.cached.write().await;
        // 其他任务可能已经刷新过
        if let Some(token) = cached.as_ref().filter(|t| !t.is_expired(Utc::now())) {
            return Ok(token.token.clone());
        }
        let fresh = self.fetch().await?;
        let token = fresh.token.clone();
        *cached = Some(fresh);
        Ok(token)
    }

    async fn fetch(&self) -> Result<CachedToken> {
        let now = Utc::now();
        let assertion = self.assertion(now)?;
        debug!("requesting access token from {}", self.key.token_uri);

        let response = self
            .client
            .post(&self.key.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FsError::Auth(format!("token exchange failed ({}): {}", status, body)));
        }

        let body: TokenResponse = response.json().await?;
        info!("Obtained access token for {}, valid {}s", self.key.client_email, body.expires_in);
        Ok(CachedToken {
            token: body.access_token,
            expires_at: now + Duration::seconds(body.expires_in),
        })
    }
}
