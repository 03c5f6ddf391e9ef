//! # Bearer Credentials
//!
//! The engine logs in with a bearer token whose middle segment is a
//! base64url JSON claim set. The `sub` claim is the login and the raw token
//! is the passcode. Obtaining and refreshing tokens is the caller's job;
//! [`CredentialProvider`] is the seam where that happens.

use std::fmt;

use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;

use crate::error::{GaugeFeedError, Result};

#[derive(Deserialize)]
struct Claims {
    sub: Option<String>,
    exp: Option<i64>,
}

/// Login/passcode pair derived from one bearer token.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    token: String,
    login: String,
    expires_at: Option<DateTime<Utc>>,
}

impl Credential {
    /// Reads the claims out of `token`.
    ///
    /// Fails when the token is not three dot separated segments, when the
    /// middle segment is not base64url JSON, or when it has no `sub`.
    pub fn new(token: impl Into<String>) -> Result<Self> {
        let token = token.into();
        let mut parts = token.split('.');
        let claims_segment = match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(_), Some(claims), Some(_), None) => claims,
            _ => return Err(GaugeFeedError::Credential("token must have three segments".into())),
        };

        let raw = general_purpose::URL_SAFE_NO_PAD
            .decode(claims_segment.trim_end_matches('='))
            .map_err(|e| GaugeFeedError::Credential(format!("claims are not base64url: {}", e)))?;
        let claims: Claims =
            serde_json::from_slice(&raw).map_err(|e| GaugeFeedError::Credential(format!("claims are not JSON: {}", e)))?;

        let login = claims
            .sub
            .filter(|s| !s.is_empty())
            .ok_or_else(|| GaugeFeedError::Credential("token has no 'sub' claim".into()))?;
        let expires_at = claims.exp.and_then(|secs| Utc.timestamp_opt(secs, 0).single());

        Ok(Self {
            token,
            login,
            expires_at,
        })
    }

    pub fn login(&self) -> &str {
        &self.login
    }

    /// The raw token, sent as the handshake passcode.
    pub fn passcode(&self) -> &str {
        &self.token
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    /// When a refresher should fetch a new token: `exp - (now - exp) / 10`.
    ///
    /// Before expiry this lands slightly after `exp`; refreshers are expected
    /// to clamp it themselves.
    pub fn refresh_at(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let exp = self.expires_at?;
        Some(exp - (now - exp) / 10)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("login", &self.login)
            .field("token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Supplies the credential used for the next `connect`.
pub trait CredentialProvider: Send + Sync {
    fn credential(&self) -> Result<Credential>;
}

/// Always hands out the same credential.
#[derive(Debug, Clone)]
pub struct StaticCredentials(pub Credential);

impl CredentialProvider for StaticCredentials {
    fn credential(&self) -> Result<Credential> {
        Ok(self.0.clone())
    }
}

/// Reads the token from an environment variable on every call.
#[derive(Debug, Clone)]
pub struct EnvCredentials {
    var: String,
}

impl EnvCredentials {
    /// Default variable name.
    pub const DEFAULT_VAR: &'static str = "GAUGEFEED_TOKEN";

    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl Default for EnvCredentials {
    fn default() -> Self {
        Self::new(Self::DEFAULT_VAR)
    }
}

impl CredentialProvider for EnvCredentials {
    fn credential(&self) -> Result<Credential> {
        let token = std::env::var(&self.var)
            .map_err(|_| GaugeFeedError::Credential(format!("environment variable {} is not set", self.var)))?;
        Credential::new(token)
    }
}

/// Builds an unsigned token carrying `sub` and `exp`. Test and demo helper.
pub fn unsigned_token(sub: &str, exp: Option<i64>) -> String {
    let claims = match exp {
        Some(exp) => serde_json::json!({ "sub": sub, "exp": exp }),
        None => serde_json::json!({ "sub": sub }),
    };
    format!(
        "{}.{}.",
        general_purpose::URL_SAFE_NO_PAD.encode(br#"{"alg":"none"}"#),
        general_purpose::URL_SAFE_NO_PAD.encode(claims.to_string())
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn login_comes_from_sub_and_passcode_is_the_token() {
        let token = unsigned_token("trader-9", Some(1_900_000_000));
        let cred = Credential::new(token.clone()).unwrap();
        assert_eq!(cred.login(), "trader-9");
        assert_eq!(cred.passcode(), token);
        assert_eq!(cred.expires_at().unwrap().timestamp(), 1_900_000_000);
    }

    #[test]
    fn debug_output_hides_the_token() {
        let token = unsigned_token("trader-9", None);
        let cred = Credential::new(token.clone()).unwrap();
        let shown = format!("{:?}", cred);
        assert!(shown.contains("trader-9"));
        assert!(!shown.contains(&token));
    }

    #[test]
    fn malformed_tokens_are_rejected() {
        assert!(matches!(Credential::new("abc"), Err(GaugeFeedError::Credential(_))));
        assert!(matches!(Credential::new("a.!!!.c"), Err(GaugeFeedError::Credential(_))));
        let no_sub = format!("x.{}.y", general_purpose::URL_SAFE_NO_PAD.encode(br#"{"exp":1}"#));
        assert!(matches!(Credential::new(no_sub), Err(GaugeFeedError::Credential(_))));
    }

    #[test]
    fn refresh_time_shifts_by_a_tenth_of_the_distance() {
        let cred = Credential::new(unsigned_token("u", Some(10_000))).unwrap();
        let exp = cred.expires_at().unwrap();

        let after = exp + Duration::seconds(1_000);
        assert_eq!(cred.refresh_at(after).unwrap(), exp - Duration::seconds(100));

        let before = exp - Duration::seconds(1_000);
        assert_eq!(cred.refresh_at(before).unwrap(), exp + Duration::seconds(100));

        let no_exp = Credential::new(unsigned_token("u", None)).unwrap();
        assert!(no_exp.refresh_at(after).is_none());
    }
}
