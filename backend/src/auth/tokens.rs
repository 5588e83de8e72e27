//! Access and refresh token issuance, verification, rotation and revocation.
//!
//! Tokens are `base64url(claims_json).base64url(hmac_sha256)`. Access tokens
//! are verified statelessly and simply expire. Refresh tokens move through
//! `Active -> {Rotated | Revoked | Expired}`; the terminal states other than
//! `Expired` are backed by a row in `revoked_tokens`, written with
//! `ON CONFLICT DO NOTHING` so exactly one of two racing refreshes wins.

use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use uuid::Uuid;

use super::errors::TokenError;
use crate::config::TokenConfig;
use crate::database::models::{IdentityId, RevocationReason, RevokedToken};
use crate::database::{queries, Database};
use crate::errors::{ServiceError, ServiceResult};

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

/// Signed token payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject identity.
    pub sub: IdentityId,
    /// Issued at (unix seconds).
    pub iat: i64,
    /// Expires at (unix seconds); the token is invalid from this instant on.
    pub exp: i64,
    /// Unique token id.
    pub jti: String,
    pub typ: TokenKind,
}

impl Claims {
    pub fn is_expired(&self, now: i64) -> bool {
        now >= self.exp
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenPair {
    pub access: String,
    pub refresh: String,
}

/// Lifecycle state of a refresh token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshState {
    Active,
    Rotated,
    Revoked,
    Expired,
}

impl RefreshState {
    /// Revocation records win over expiry so a replay is reported for what it is.
    pub fn of(claims: &Claims, record: Option<&RevokedToken>, now: i64) -> Self {
        match record.map(|r| r.reason) {
            Some(RevocationReason::Rotated) => RefreshState::Rotated,
            Some(RevocationReason::Logout) => RefreshState::Revoked,
            None if claims.is_expired(now) => RefreshState::Expired,
            None => RefreshState::Active,
        }
    }

    fn into_result(self) -> Result<(), TokenError> {
        match self {
            RefreshState::Active => Ok(()),
            RefreshState::Rotated => Err(TokenError::Rotated),
            RefreshState::Revoked => Err(TokenError::Revoked),
            RefreshState::Expired => Err(TokenError::Expired),
        }
    }
}

/// HMAC signer for token claims.
pub struct TokenCodec {
    key: Vec<u8>,
}

impl TokenCodec {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            key: secret.to_vec(),
        }
    }

    fn mac(&self) -> Result<HmacSha256, TokenError> {
        // HMAC accepts keys of any length
        HmacSha256::new_from_slice(&self.key).map_err(|_| TokenError::BadSignature)
    }

    pub fn encode(&self, claims: &Claims) -> ServiceResult<String> {
        let payload = serde_json::to_vec(claims)
            .map_err(|e| ServiceError::Internal(format!("failed to encode claims: {}", e)))?;
        let mut mac = self
            .mac()
            .map_err(|_| ServiceError::Internal("invalid signing key".to_string()))?;
        mac.update(&payload);
        let signature = mac.finalize().into_bytes();

        Ok(format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(&payload),
            URL_SAFE_NO_PAD.encode(signature)
        ))
    }

    /// Checks the signature, then parses the claims. Expiry is not checked here.
    pub fn decode(&self, token: &str) -> Result<Claims, TokenError> {
        let (payload, signature) = token.trim().split_once('.').ok_or(TokenError::Malformed)?;
        let payload = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|_| TokenError::Malformed)?;
        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| TokenError::Malformed)?;

        let mut mac = self.mac()?;
        mac.update(&payload);
        mac.verify_slice(&signature)
            .map_err(|_| TokenError::BadSignature)?;

        serde_json::from_slice(&payload).map_err(|_| TokenError::Malformed)
    }
}

/// Token Service: issues, verifies, refreshes and revokes session tokens.
#[derive(Clone)]
pub struct TokenService {
    codec: Arc<TokenCodec>,
    db: Database,
    access_ttl: i64,
    refresh_ttl: i64,
    retention: i64,
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

fn secs(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

impl TokenService {
    pub fn new(secret: &str, config: &TokenConfig, db: Database) -> Self {
        Self {
            codec: Arc::new(TokenCodec::new(secret.as_bytes())),
            db,
            access_ttl: secs(config.access_ttl_secs),
            refresh_ttl: secs(config.refresh_ttl_secs),
            retention: secs(config.revocation_retention_secs),
        }
    }

    fn claims(&self, subject: IdentityId, typ: TokenKind, issued_at: i64) -> Claims {
        let ttl = match typ {
            TokenKind::Access => self.access_ttl,
            TokenKind::Refresh => self.refresh_ttl,
        };
        Claims {
            sub: subject,
            iat: issued_at,
            exp: issued_at.saturating_add(ttl),
            jti: Uuid::new_v4().to_string(),
            typ,
        }
    }

    /// Fresh access/refresh pair for `subject`, each with its own token id.
    pub fn issue_pair(&self, subject: IdentityId) -> ServiceResult<TokenPair> {
        let issued_at = now();
        Ok(TokenPair {
            access: self
                .codec
                .encode(&self.claims(subject, TokenKind::Access, issued_at))?,
            refresh: self
                .codec
                .encode(&self.claims(subject, TokenKind::Refresh, issued_at))?,
        })
    }

    fn decode_kind(&self, token: &str, kind: TokenKind) -> Result<Claims, TokenError> {
        let claims = self.codec.decode(token)?;
        if claims.typ != kind {
            return Err(TokenError::WrongType);
        }
        Ok(claims)
    }

    /// Resolves the caller of a bearer access token.
    pub fn verify_access(&self, token: &str) -> Result<IdentityId, TokenError> {
        let claims = self.decode_kind(token, TokenKind::Access)?;
        if claims.is_expired(now()) {
            return Err(TokenError::Expired);
        }
        Ok(claims.sub)
    }

    /// Exchanges a refresh token for a new pair, revoking the old one.
    #[tracing::instrument(skip_all)]
    pub async fn refresh(&self, token: &str) -> ServiceResult<TokenPair> {
        match self.rotate(token).await {
            Ok(subject) => {
                tracing::info!(subject, "refresh token rotated");
                self.issue_pair(subject)
            }
            Err(RotateError::Token(err)) => {
                tracing::warn!(reason = %err, "refresh rejected");
                Err(err.into())
            }
            Err(RotateError::Service(err)) => Err(err),
        }
    }

    /// The revocation insert is the first statement of the transaction, so
    /// SQLite takes the write lock before any read and racing rotations of
    /// one token queue on the busy handler instead of failing to upgrade.
    /// Any early return drops `tx`, which rolls the insert back.
    async fn rotate(&self, token: &str) -> Result<IdentityId, RotateError> {
        let claims = self.decode_kind(token, TokenKind::Refresh)?;
        let now = now();

        let mut tx = self.db.begin().await?;
        let won = queries::insert_revocation(
            &mut tx,
            &claims.jti,
            claims.sub,
            RevocationReason::Rotated,
            now,
            claims.exp,
        )
        .await?;

        if !won {
            let record = queries::find_revocation(&mut tx, &claims.jti).await?;
            return Err(match RefreshState::of(&claims, record.as_ref(), now) {
                RefreshState::Revoked => TokenError::Revoked,
                _ => TokenError::Rotated,
            }
            .into());
        }

        RefreshState::of(&claims, None, now).into_result()?;
        if !queries::exists(&mut tx, claims.sub).await? {
            return Err(TokenError::UnknownSubject.into());
        }
        tx.commit().await.map_err(ServiceError::from)?;

        Ok(claims.sub)
    }

    /// Logout. Any signed refresh token is recorded as revoked, even if it
    /// already expired or was revoked before; only structurally invalid tokens
    /// fail.
    #[tracing::instrument(skip_all)]
    pub async fn revoke(&self, token: &str) -> ServiceResult<()> {
        let claims = self.decode_kind(token, TokenKind::Refresh).map_err(|err| {
            tracing::warn!(reason = %err, "logout with invalid token");
            ServiceError::from(err)
        })?;

        let mut conn = self.db.acquire().await?;
        let recorded = queries::insert_revocation(
            &mut conn,
            &claims.jti,
            claims.sub,
            RevocationReason::Logout,
            now(),
            claims.exp,
        )
        .await?;

        tracing::info!(subject = claims.sub, newly_revoked = recorded, "refresh token revoked");
        Ok(())
    }

    /// Current state of a refresh token, for inspection.
    pub async fn refresh_state(&self, token: &str) -> ServiceResult<RefreshState> {
        let claims = self
            .decode_kind(token, TokenKind::Refresh)
            .map_err(ServiceError::from)?;
        let mut conn = self.db.acquire().await?;
        let record = queries::find_revocation(&mut conn, &claims.jti).await?;
        Ok(RefreshState::of(&claims, record.as_ref(), now()))
    }

    /// Drops revocation records once the token they block is long expired.
    pub async fn purge_revocations(&self) -> ServiceResult<u64> {
        let cutoff = now().saturating_sub(self.retention);
        let mut conn = self.db.acquire().await?;
        let purged = queries::purge_revocations(&mut conn, cutoff).await?;
        tracing::debug!(purged, "expired revocation records purged");
        Ok(purged)
    }
}

enum RotateError {
    Token(TokenError),
    Service(ServiceError),
}

impl From<TokenError> for RotateError {
    fn from(err: TokenError) -> Self {
        RotateError::Token(err)
    }
}

impl From<ServiceError> for RotateError {
    fn from(err: ServiceError) -> Self {
        RotateError::Service(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;
    use crate::database::models::NewIdentity;

    const SECRET: &str = "unit-test-secret-unit-test-secret";

    async fn setup(config: TokenConfig) -> (TokenService, IdentityId) {
        setup_on(&DatabaseConfig::in_memory(), config).await
    }

    async fn setup_on(db_config: &DatabaseConfig, config: TokenConfig) -> (TokenService, IdentityId) {
        let db = Database::connect(db_config).await.unwrap();
        let mut conn = db.acquire().await.unwrap();
        let identity = queries::insert_identity(
            &mut conn,
            &NewIdentity {
                username: "alice".into(),
                password_hash: "x".into(),
                email: None,
                phone_number: None,
            },
            0,
        )
        .await
        .unwrap();
        drop(conn);
        (TokenService::new(SECRET, &config, db), identity.id)
    }

    fn expired_refresh() -> TokenConfig {
        TokenConfig {
            refresh_ttl_secs: 0,
            ..TokenConfig::default()
        }
    }

    #[test]
    fn codec_rejects_tampering() {
        let codec = TokenCodec::new(b"key");
        let claims = Claims {
            sub: 7,
            iat: 1,
            exp: 2,
            jti: "j".into(),
            typ: TokenKind::Access,
        };
        let token = codec.encode(&claims).unwrap();
        assert_eq!(codec.decode(&token).unwrap(), claims);

        let forged = Claims { sub: 8, ..claims };
        let forged_payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&forged).unwrap());
        let signature = token.split_once('.').unwrap().1;
        assert_eq!(
            codec.decode(&format!("{}.{}", forged_payload, signature)),
            Err(TokenError::BadSignature)
        );

        assert_eq!(TokenCodec::new(b"other").decode(&token), Err(TokenError::BadSignature));
        assert_eq!(codec.decode("garbage"), Err(TokenError::Malformed));
        assert_eq!(codec.decode("a.b.c"), Err(TokenError::Malformed));
    }

    #[tokio::test]
    async fn access_token_resolves_subject() {
        let (tokens, alice) = setup(TokenConfig::default()).await;
        let pair = tokens.issue_pair(alice).unwrap();

        assert_eq!(tokens.verify_access(&pair.access), Ok(alice));
        assert_eq!(tokens.verify_access(&pair.refresh), Err(TokenError::WrongType));
        assert_ne!(pair.access, pair.refresh);
    }

    #[tokio::test]
    async fn expired_access_token_rejected() {
        let config = TokenConfig {
            access_ttl_secs: 0,
            ..TokenConfig::default()
        };
        let (tokens, alice) = setup(config).await;
        let pair = tokens.issue_pair(alice).unwrap();
        assert_eq!(tokens.verify_access(&pair.access), Err(TokenError::Expired));
    }

    #[tokio::test]
    async fn rotation_prevents_replay() {
        let (tokens, alice) = setup(TokenConfig::default()).await;
        let original = tokens.issue_pair(alice).unwrap();

        let second = tokens.refresh(&original.refresh).await.unwrap();
        assert_eq!(tokens.verify_access(&second.access), Ok(alice));
        assert_eq!(
            tokens.refresh_state(&original.refresh).await.unwrap(),
            RefreshState::Rotated
        );

        assert!(matches!(
            tokens.refresh(&original.refresh).await,
            Err(ServiceError::Unauthenticated(_))
        ));

        let third = tokens.refresh(&second.refresh).await.unwrap();
        assert!(tokens.refresh(&second.refresh).await.is_err());
        assert!(tokens.refresh(&third.refresh).await.is_ok());
    }

    #[tokio::test]
    async fn logout_then_refresh_fails() {
        let (tokens, alice) = setup(TokenConfig::default()).await;
        let pair = tokens.issue_pair(alice).unwrap();

        tokens.revoke(&pair.refresh).await.unwrap();
        assert_eq!(
            tokens.refresh_state(&pair.refresh).await.unwrap(),
            RefreshState::Revoked
        );
        assert!(matches!(
            tokens.refresh(&pair.refresh).await,
            Err(ServiceError::Unauthenticated(_))
        ));

        // idempotent
        tokens.revoke(&pair.refresh).await.unwrap();
    }

    #[tokio::test]
    async fn logout_rejects_structurally_invalid_tokens() {
        let (tokens, alice) = setup(TokenConfig::default()).await;
        let pair = tokens.issue_pair(alice).unwrap();

        assert!(tokens.revoke("not-a-token").await.is_err());
        assert!(tokens.revoke(&pair.access).await.is_err());
    }

    #[tokio::test]
    async fn expired_refresh_token_still_recorded_on_logout() {
        let (tokens, alice) = setup(expired_refresh()).await;
        let pair = tokens.issue_pair(alice).unwrap();

        assert_eq!(
            tokens.refresh_state(&pair.refresh).await.unwrap(),
            RefreshState::Expired
        );
        assert!(tokens.refresh(&pair.refresh).await.is_err());

        tokens.revoke(&pair.refresh).await.unwrap();
        assert_eq!(
            tokens.refresh_state(&pair.refresh).await.unwrap(),
            RefreshState::Revoked
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_refreshes_have_exactly_one_winner() {
        let dir = tempfile::tempdir().unwrap();
        let db_config = DatabaseConfig {
            url: format!("sqlite://{}?mode=rwc", dir.path().join("tokens.db").display()),
            max_connections: 8,
            ..DatabaseConfig::default()
        };
        let (tokens, alice) = setup_on(&db_config, TokenConfig::default()).await;

        for _ in 0..10 {
            let pair = tokens.issue_pair(alice).unwrap();
            let handles: Vec<_> = (0..6)
                .map(|_| {
                    let tokens = tokens.clone();
                    let refresh = pair.refresh.clone();
                    tokio::spawn(async move { tokens.refresh(&refresh).await })
                })
                .collect();

            let mut winners = 0;
            for handle in handles {
                match handle.await.unwrap() {
                    Ok(_) => winners += 1,
                    Err(ServiceError::Unauthenticated(_)) => {}
                    Err(other) => panic!("replay reported as {other:?}"),
                }
            }
            assert_eq!(winners, 1);
            assert_eq!(
                tokens.refresh_state(&pair.refresh).await.unwrap(),
                RefreshState::Rotated
            );
        }
    }

    #[tokio::test]
    async fn refresh_after_logout_reports_revoked() {
        let (tokens, alice) = setup(TokenConfig::default()).await;
        let pair = tokens.issue_pair(alice).unwrap();
        tokens.revoke(&pair.refresh).await.unwrap();

        // the failed rotation leaves the logout record in place
        assert!(tokens.refresh(&pair.refresh).await.is_err());
        assert_eq!(
            tokens.refresh_state(&pair.refresh).await.unwrap(),
            RefreshState::Revoked
        );
    }

    #[tokio::test]
    async fn refresh_for_unknown_subject_rejected() {
        let (tokens, _) = setup(TokenConfig::default()).await;
        let pair = tokens.issue_pair(9_999).unwrap();
        assert!(matches!(
            tokens.refresh(&pair.refresh).await,
            Err(ServiceError::Unauthenticated(_))
        ));
    }

    #[tokio::test]
    async fn purge_keeps_records_within_retention() {
        let (tokens, alice) = setup(expired_refresh()).await;
        let pair = tokens.issue_pair(alice).unwrap();
        tokens.revoke(&pair.refresh).await.unwrap();

        // expired just now, still inside the default retention window
        assert_eq!(tokens.purge_revocations().await.unwrap(), 0);
        assert_eq!(
            tokens.refresh_state(&pair.refresh).await.unwrap(),
            RefreshState::Revoked
        );
    }
}
