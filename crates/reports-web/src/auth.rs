//! 医生登录与会话

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use rand::RngCore;
use reports_core::{ReportsError, Result};
use sha2::Sha256;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

const SALT_LEN: usize = 16;

/// 未登录会话只用于携带提示消息，有效期上限（分钟）
const FLASH_TTL_MINUTES: i64 = 5;

fn keyed_mac(key: &[u8]) -> Result<HmacSha256> {
    HmacSha256::new_from_slice(key).map_err(|e| ReportsError::Internal(format!("hmac key: {e}")))
}

fn random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

/// 加盐密码哈希，编码为 `<salt-hex>$<hmac-sha256-hex>`
#[derive(Clone)]
pub struct PasswordHash {
    salt: Vec<u8>,
    digest: Vec<u8>,
}

impl PasswordHash {
    /// 用随机盐哈希明文密码
    pub fn generate(password: &str) -> Result<Self> {
        Self::with_salt(password, random_bytes::<SALT_LEN>().to_vec())
    }

    fn with_salt(password: &str, salt: Vec<u8>) -> Result<Self> {
        let mut mac = keyed_mac(&salt)?;
        mac.update(password.as_bytes());
        let digest = mac.finalize().into_bytes().to_vec();
        Ok(Self { salt, digest })
    }

    /// 解析配置中的哈希
    pub fn parse(encoded: &str) -> Result<Self> {
        let invalid = || ReportsError::Config("auth.password_hash must be <salt-hex>$<hmac-hex>".into());

        let (salt, digest) = encoded.trim().split_once('$').ok_or_else(invalid)?;
        let salt = hex::decode(salt).map_err(|_| invalid())?;
        let digest = hex::decode(digest).map_err(|_| invalid())?;
        if salt.is_empty() || digest.len() != 32 {
            return Err(invalid());
        }
        Ok(Self { salt, digest })
    }

    pub fn encode(&self) -> String {
        format!("{}${}", hex::encode(&self.salt), hex::encode(&self.digest))
    }

    /// 常数时间比较
    pub fn verify(&self, password: &str) -> bool {
        let Ok(mut mac) = keyed_mac(&self.salt) else {
            return false;
        };
        mac.update(password.as_bytes());
        mac.verify_slice(&self.digest).is_ok()
    }
}

impl std::fmt::Debug for PasswordHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PasswordHash(..)")
    }
}

/// 服务端会话
#[derive(Debug, Clone)]
pub struct Session {
    pub authenticated: bool,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// 一次性提示消息
    pub flash: Option<String>,
}

impl Session {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// 认证服务
pub struct AuthService {
    credential: PasswordHash,
    secret: Vec<u8>,
    sessions: Arc<RwLock<HashMap<String, Session>>>,
    ttl: Duration,
    cookie_name: String,
}

impl AuthService {
    pub fn new(
        credential: PasswordHash,
        secret: Option<Vec<u8>>,
        ttl_minutes: i64,
        cookie_name: impl Into<String>,
    ) -> Self {
        Self {
            credential,
            secret: secret.unwrap_or_else(|| random_bytes::<32>().to_vec()),
            sessions: Arc::new(RwLock::new(HashMap::new())),
            ttl: Duration::minutes(ttl_minutes),
            cookie_name: cookie_name.into(),
        }
    }

    pub fn verify_password(&self, password: &str) -> bool {
        self.credential.verify(password)
    }

    fn sign(&self, token: &str) -> Option<String> {
        let mut mac = keyed_mac(&self.secret).ok()?;
        mac.update(token.as_bytes());
        Some(hex::encode(mac.finalize().into_bytes()))
    }

    fn verify_signature(&self, token: &str, signature: &str) -> bool {
        let (Ok(mut mac), Ok(signature)) = (keyed_mac(&self.secret), hex::decode(signature)) else {
            return false;
        };
        mac.update(token.as_bytes());
        mac.verify_slice(&signature).is_ok()
    }

    /// 从 Cookie 头中取出已验签的会话 token
    fn token_from_headers(&self, headers: &HeaderMap) -> Option<String> {
        headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(name, _)| *name == self.cookie_name)
            .and_then(|(_, value)| {
                let (token, signature) = value.split_once('.')?;
                self.verify_signature(token, signature)
                    .then(|| token.to_string())
            })
    }

    /// 创建新会话，返回 `Set-Cookie` 头的值
    pub async fn start_session(&self, authenticated: bool, flash: Option<String>) -> Result<String> {
        let now = Utc::now();
        let ttl = if authenticated {
            self.ttl
        } else {
            self.ttl.min(Duration::minutes(FLASH_TTL_MINUTES))
        };
        let token = Uuid::new_v4().simple().to_string();
        let signature = self
            .sign(&token)
            .ok_or_else(|| ReportsError::Internal("failed to sign session".into()))?;

        let mut sessions = self.sessions.write().await;
        sessions.retain(|_, session| !session.is_expired(now));
        sessions.insert(
            token.clone(),
            Session {
                authenticated,
                created_at: now,
                expires_at: now + ttl,
                flash,
            },
        );
        debug!("Started session (authenticated: {})", authenticated);

        Ok(format!(
            "{}={}.{}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
            self.cookie_name,
            token,
            signature,
            ttl.num_seconds()
        ))
    }

    /// 当前请求的会话，过期会话会被清除
    pub async fn session(&self, headers: &HeaderMap) -> Option<Session> {
        let token = self.token_from_headers(headers)?;
        let now = Utc::now();

        let mut sessions = self.sessions.write().await;
        match sessions.get(&token) {
            Some(session) if session.is_expired(now) => {
                sessions.remove(&token);
                None
            }
            Some(session) => Some(session.clone()),
            None => None,
        }
    }

    pub async fn is_authenticated(&self, headers: &HeaderMap) -> bool {
        self.session(headers)
            .await
            .is_some_and(|session| session.authenticated)
    }

    /// 取出并清除一次性提示消息，未登录的会话随之销毁
    pub async fn take_flash(&self, headers: &HeaderMap) -> Option<String> {
        let token = self.token_from_headers(headers)?;
        let mut sessions = self.sessions.write().await;
        let session = sessions.get_mut(&token)?;
        let flash = session.flash.take();
        if !session.authenticated {
            sessions.remove(&token);
        }
        flash
    }

    /// 销毁当前会话，返回请求是否带有未过期的会话
    pub async fn end_session(&self, headers: &HeaderMap) -> bool {
        let Some(token) = self.token_from_headers(headers) else {
            return false;
        };
        let removed = self.sessions.write().await.remove(&token);
        match removed {
            Some(session) if !session.is_expired(Utc::now()) => {
                if session.authenticated {
                    info!("Doctor logged out");
                }
                true
            }
            _ => false,
        }
    }

    #[cfg(test)]
    pub(crate) async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    #[cfg(test)]
    async fn expire_all(&self) {
        let past = Utc::now() - Duration::seconds(1);
        for session in self.sessions.write().await.values_mut() {
            session.expires_at = past;
        }
    }
}

/// 会话守卫：未登录的请求重定向到登录页
pub async fn require_session(
    State(auth): State<Arc<AuthService>>,
    request: Request,
    next: Next,
) -> Response {
    if auth.is_authenticated(request.headers()).await {
        next.run(request).await
    } else {
        debug!("Unauthenticated request to {}", request.uri().path());
        Redirect::to("/login").into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn service() -> AuthService {
        AuthService::new(PasswordHash::generate("rutu").unwrap(), None, 60, "sid")
    }

    fn cookie_headers(set_cookie: &str) -> HeaderMap {
        let pair = set_cookie.split(';').next().unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_str(pair).unwrap());
        headers
    }

    #[test]
    fn test_password_hash_roundtrip() {
        let hash = PasswordHash::generate("rutu").unwrap();
        assert!(hash.verify("rutu"));
        assert!(!hash.verify("Rutu"));
        assert!(!hash.verify(""));

        let parsed = PasswordHash::parse(&hash.encode()).unwrap();
        assert!(parsed.verify("rutu"));
    }

    #[test]
    fn test_password_hash_is_salted() {
        let a = PasswordHash::generate("same").unwrap();
        let b = PasswordHash::generate("same").unwrap();
        assert_ne!(a.encode(), b.encode());
    }

    #[test]
    fn test_parse_rejects_malformed_hash() {
        assert!(PasswordHash::parse("plaintext").is_err());
        assert!(PasswordHash::parse("zz$00").is_err());
        assert!(PasswordHash::parse("00$abcd").is_err());
    }

    #[tokio::test]
    async fn test_session_lifecycle() {
        let auth = service();
        let cookie = auth.start_session(true, None).await.unwrap();
        let headers = cookie_headers(&cookie);
        assert!(auth.is_authenticated(&headers).await);

        auth.end_session(&headers).await;
        assert!(!auth.is_authenticated(&headers).await);
    }

    #[tokio::test]
    async fn test_tampered_cookie_is_rejected() {
        let auth = service();
        let cookie = auth.start_session(true, None).await.unwrap();
        let forged = cookie.replacen("sid=", "sid=0", 1);
        assert!(!auth.is_authenticated(&cookie_headers(&forged)).await);
    }

    #[tokio::test]
    async fn test_expired_session_is_rejected() {
        let auth = service();
        let cookie = auth.start_session(true, None).await.unwrap();
        auth.expire_all().await;
        assert!(!auth.is_authenticated(&cookie_headers(&cookie)).await);
    }

    #[tokio::test]
    async fn test_flash_is_one_shot() {
        let auth = service();
        let cookie = auth
            .start_session(false, Some("bye".to_string()))
            .await
            .unwrap();
        let headers = cookie_headers(&cookie);
        assert!(!auth.is_authenticated(&headers).await);
        assert_eq!(auth.take_flash(&headers).await.as_deref(), Some("bye"));
        assert_eq!(auth.take_flash(&headers).await, None);
        assert_eq!(auth.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_end_session_reports_live_session() {
        let auth = service();
        assert!(!auth.end_session(&HeaderMap::new()).await);

        let cookie = auth.start_session(true, None).await.unwrap();
        let headers = cookie_headers(&cookie);
        assert!(auth.end_session(&headers).await);
        assert!(!auth.end_session(&headers).await);
    }

    #[tokio::test]
    async fn test_flash_session_is_short_lived() {
        let auth = service();
        let cookie = auth
            .start_session(false, Some("bye".to_string()))
            .await
            .unwrap();
        assert!(cookie.ends_with(&format!("Max-Age={}", FLASH_TTL_MINUTES * 60)));

        let cookie = auth.start_session(true, None).await.unwrap();
        assert!(cookie.ends_with("Max-Age=3600"));
    }
}
