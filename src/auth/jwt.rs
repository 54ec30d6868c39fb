use std::time::Duration;

use axum::extract::FromRef;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use time::{Duration as TimeDuration, OffsetDateTime};
use tracing::debug;
use uuid::Uuid;

use crate::auth::claims::{Claims, TokenKind};
use crate::auth::repo::AccountKind;
use crate::config::JwtConfig;
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Clone)]
pub struct JwtKeys {
    pub encoding: EncodingKey,
    pub decoding: DecodingKey,
    pub issuer: String,
    pub audience: String,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
}

impl FromRef<AppState> for JwtKeys {
    fn from_ref(state: &AppState) -> Self {
        let JwtConfig {
            secret,
            issuer,
            audience,
            access_ttl_days,
            refresh_ttl_days,
        } = state.config.jwt.clone();
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            issuer,
            audience,
            access_ttl: Duration::from_secs((access_ttl_days as u64) * 24 * 60 * 60),
            refresh_ttl: Duration::from_secs((refresh_ttl_days as u64) * 24 * 60 * 60),
        }
    }
}

impl JwtKeys {
    fn sign(&self, claims: &Claims) -> anyhow::Result<String> {
        let token = encode(&Header::default(), claims, &self.encoding)?;
        debug!(user_id = %claims.sub, kind = ?claims.kind, "jwt signed");
        Ok(token)
    }

    fn timestamps(&self, kind: TokenKind) -> (usize, usize) {
        let now = OffsetDateTime::now_utc();
        let ttl = match kind {
            TokenKind::Access => self.access_ttl,
            TokenKind::Refresh => self.refresh_ttl,
        };
        let exp = now + TimeDuration::seconds(ttl.as_secs() as i64);
        (now.unix_timestamp() as usize, exp.unix_timestamp() as usize)
    }

    /// Self-contained access token: carries the public identity so request
    /// authorization never hits storage.
    pub fn sign_access(
        &self,
        user_id: Uuid,
        email: &str,
        account_kind: AccountKind,
    ) -> anyhow::Result<String> {
        let (iat, exp) = self.timestamps(TokenKind::Access);
        self.sign(&Claims {
            sub: user_id,
            email: Some(email.to_string()),
            user_type: Some(account_kind),
            iat,
            exp,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            kind: TokenKind::Access,
        })
    }

    /// Refresh token carries only the subject; the caller persists a
    /// matching refresh_tokens row so it can be individually revoked.
    pub fn sign_refresh(&self, user_id: Uuid) -> anyhow::Result<String> {
        let (iat, exp) = self.timestamps(TokenKind::Refresh);
        self.sign(&Claims {
            sub: user_id,
            email: None,
            user_type: None,
            iat,
            exp,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            kind: TokenKind::Refresh,
        })
    }

    fn decode(&self, token: &str) -> jsonwebtoken::errors::Result<Claims> {
        let mut validation = Validation::default();
        validation.set_audience(std::slice::from_ref(&self.audience));
        validation.set_issuer(std::slice::from_ref(&self.issuer));
        let data = decode::<Claims>(token, &self.decoding, &validation)?;
        Ok(data.claims)
    }

    pub fn verify_access(&self, token: &str) -> Result<Claims, ApiError> {
        let claims = self.decode(token).map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => ApiError::TokenExpired,
            _ => ApiError::TokenInvalid,
        })?;
        if claims.kind != TokenKind::Access {
            return Err(ApiError::TokenInvalid);
        }
        debug!(user_id = %claims.sub, "access token verified");
        Ok(claims)
    }

    /// Signature/structure check only; callers must additionally confirm a
    /// live refresh_tokens row bound to the same subject.
    pub fn verify_refresh(&self, token: &str) -> Result<Claims, ApiError> {
        let claims = self.decode(token).map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => ApiError::RefreshTokenExpired,
            _ => ApiError::RefreshTokenInvalid,
        })?;
        if claims.kind != TokenKind::Refresh {
            return Err(ApiError::RefreshTokenInvalid);
        }
        debug!(user_id = %claims.sub, "refresh token verified");
        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_keys() -> JwtKeys {
        let state = AppState::fake();
        JwtKeys::from_ref(&state)
    }

    #[tokio::test]
    async fn sign_and_verify_access_token() {
        let keys = make_keys();
        let user_id = Uuid::new_v4();
        let token = keys
            .sign_access(user_id, "a@b.co", AccountKind::Client)
            .expect("sign access");
        let claims = keys.verify_access(&token).expect("verify token");
        assert_eq!(claims.sub, user_id);
        assert_eq!(claims.email.as_deref(), Some("a@b.co"));
        assert_eq!(claims.user_type, Some(AccountKind::Client));
        assert_eq!(claims.iss, "test-issuer");
        assert_eq!(claims.aud, "test-aud");
        assert_eq!(claims.kind, TokenKind::Access);
    }

    #[tokio::test]
    async fn refresh_token_carries_subject_only() {
        let keys = make_keys();
        let user_id = Uuid::new_v4();
        let token = keys.sign_refresh(user_id).expect("sign refresh");
        let claims = keys.verify_refresh(&token).expect("verify refresh");
        assert_eq!(claims.sub, user_id);
        assert!(claims.email.is_none());
        assert!(claims.user_type.is_none());
        assert_eq!(claims.kind, TokenKind::Refresh);
    }

    #[tokio::test]
    async fn verify_access_rejects_refresh_token() {
        let keys = make_keys();
        let token = keys.sign_refresh(Uuid::new_v4()).expect("sign refresh");
        assert!(matches!(
            keys.verify_access(&token),
            Err(ApiError::TokenInvalid)
        ));
    }

    #[tokio::test]
    async fn verify_refresh_rejects_access_token() {
        let keys = make_keys();
        let token = keys
            .sign_access(Uuid::new_v4(), "a@b.co", AccountKind::Freelancer)
            .expect("sign access");
        assert!(matches!(
            keys.verify_refresh(&token),
            Err(ApiError::RefreshTokenInvalid)
        ));
    }

    #[tokio::test]
    async fn verify_rejects_expired_token_as_expired() {
        let keys = make_keys();
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let claims = Claims {
            sub: Uuid::new_v4(),
            email: None,
            user_type: None,
            iat: (now - 7200) as usize,
            exp: (now - 3600) as usize,
            iss: keys.issuer.clone(),
            aud: keys.audience.clone(),
            kind: TokenKind::Access,
        };
        let token = encode(&Header::default(), &claims, &keys.encoding).expect("encode");
        assert!(matches!(
            keys.verify_access(&token),
            Err(ApiError::TokenExpired)
        ));

        let mut refresh_claims = claims;
        refresh_claims.kind = TokenKind::Refresh;
        let token = encode(&Header::default(), &refresh_claims, &keys.encoding).expect("encode");
        assert!(matches!(
            keys.verify_refresh(&token),
            Err(ApiError::RefreshTokenExpired)
        ));
    }

    #[tokio::test]
    async fn verify_rejects_wrong_secret() {
        let keys = make_keys();
        let other = JwtKeys {
            encoding: EncodingKey::from_secret(b"other-secret"),
            decoding: DecodingKey::from_secret(b"other-secret"),
            ..keys.clone()
        };
        let token = other
            .sign_access(Uuid::new_v4(), "a@b.co", AccountKind::Freelancer)
            .expect("sign access");
        assert!(matches!(
            keys.verify_access(&token),
            Err(ApiError::TokenInvalid)
        ));
    }
}
