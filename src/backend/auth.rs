use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{send_empty, send_json, with_key};
use crate::err::Error;
use crate::models::{AuthUser, Session};
use crate::permissions::Role;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OtpType {
    Signup,
    Email,
    Recovery,
}

#[derive(Debug, Clone)]
pub struct SignUp {
    pub email: String,
    pub password: String,
    pub full_name: String,
    pub role: Role,
    pub redirect_to: String,
}

/// A sign-up either signs the user straight in or waits for email
/// confirmation, in which case there is no session yet.
#[derive(Debug, Clone, PartialEq)]
pub struct SignUpOutcome {
    pub user: AuthUser,
    pub session: Option<Session>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Verified {
    pub user: AuthUser,
    pub session: Option<Session>,
}

/// Everything the service needs from the hosted identity provider.
/// Credential checks, token issuance and refresh all live on the other side.
#[async_trait]
pub trait SessionSource: Send + Sync {
    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session, Error>;

    async fn sign_up(&self, request: &SignUp) -> Result<SignUpOutcome, Error>;

    async fn sign_out(&self, access_token: &str) -> Result<(), Error>;

    async fn get_user(&self, access_token: &str) -> Result<AuthUser, Error>;

    async fn refresh_session(&self, refresh_token: &str) -> Result<Session, Error>;

    async fn reset_password_for_email(&self, email: &str, redirect_to: &str) -> Result<(), Error>;

    async fn verify_otp(&self, token_hash: &str, kind: OtpType) -> Result<Verified, Error>;

    async fn update_password(&self, access_token: &str, password: &str)
        -> Result<AuthUser, Error>;

    async fn resend_signup(&self, email: &str, redirect_to: &str) -> Result<(), Error>;
}

/// Token endpoint answer. `expires_at` is only sent by newer servers.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    #[serde(default = "bearer")]
    token_type: String,
    expires_in: Option<i64>,
    expires_at: Option<i64>,
    user: AuthUser,
}

fn bearer() -> String {
    "bearer".to_string()
}

impl TokenResponse {
    fn into_session(self) -> Session {
        let expires_at = self
            .expires_at
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
            .unwrap_or_else(|| Utc::now() + Duration::seconds(self.expires_in.unwrap_or(3600)));
        Session {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            token_type: self.token_type,
            expires_at,
            user: self.user,
        }
    }
}

/// Sign-up and verify answer with a token response when the account is
/// usable right away, and with a bare user otherwise.
fn parse_user_or_session(value: Value) -> Result<(AuthUser, Option<Session>), Error> {
    if value.get("access_token").is_some() {
        let session = serde_json::from_value::<TokenResponse>(value)?.into_session();
        return Ok((session.user.clone(), Some(session)));
    }
    let user = match value.get("user") {
        Some(user) if !user.is_null() => serde_json::from_value::<AuthUser>(user.clone())?,
        _ => serde_json::from_value::<AuthUser>(value)?,
    };
    Ok((user, None))
}

#[derive(Clone)]
pub struct HostedAuth {
    http: Client,
    base: String,
    anon_key: String,
}

impl HostedAuth {
    pub fn new(http: Client, project_url: &str, anon_key: impl Into<String>) -> Self {
        Self {
            http,
            base: format!("{}/auth/v1", project_url.trim_end_matches('/')),
            anon_key: anon_key.into(),
        }
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        with_key(self.http.post(format!("{}{}", self.base, path)), &self.anon_key)
    }
}

#[async_trait]
impl SessionSource for HostedAuth {
    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session, Error> {
        let token: TokenResponse = send_json(
            self.post("/token?grant_type=password")
                .json(&json!({ "email": email, "password": password })),
        )
        .await?;
        Ok(token.into_session())
    }

    async fn sign_up(&self, request: &SignUp) -> Result<SignUpOutcome, Error> {
        let value: Value = send_json(
            self.post("/signup")
                .query(&[("redirect_to", request.redirect_to.as_str())])
                .json(&json!({
                    "email": request.email,
                    "password": request.password,
                    "data": {
                        "full_name": request.full_name,
                        "role": request.role,
                    },
                })),
        )
        .await?;
        let (user, session) = parse_user_or_session(value)?;
        Ok(SignUpOutcome { user, session })
    }

    async fn sign_out(&self, access_token: &str) -> Result<(), Error> {
        send_empty(self.post("/logout").bearer_auth(access_token)).await
    }

    async fn get_user(&self, access_token: &str) -> Result<AuthUser, Error> {
        let req = with_key(self.http.get(format!("{}/user", self.base)), &self.anon_key)
            .bearer_auth(access_token);
        send_json(req).await
    }

    async fn refresh_session(&self, refresh_token: &str) -> Result<Session, Error> {
        let token: TokenResponse = send_json(
            self.post("/token?grant_type=refresh_token")
                .json(&json!({ "refresh_token": refresh_token })),
        )
        .await?;
        Ok(token.into_session())
    }

    async fn reset_password_for_email(&self, email: &str, redirect_to: &str) -> Result<(), Error> {
        send_empty(
            self.post("/recover")
                .query(&[("redirect_to", redirect_to)])
                .json(&json!({ "email": email })),
        )
        .await
    }

    async fn verify_otp(&self, token_hash: &str, kind: OtpType) -> Result<Verified, Error> {
        let value: Value = send_json(
            self.post("/verify")
                .json(&json!({ "type": kind, "token_hash": token_hash })),
        )
        .await?;
        let (user, session) = parse_user_or_session(value)?;
        Ok(Verified { user, session })
    }

    async fn update_password(
        &self,
        access_token: &str,
        password: &str,
    ) -> Result<AuthUser, Error> {
        let req = with_key(self.http.put(format!("{}/user", self.base)), &self.anon_key)
            .bearer_auth(access_token)
            .json(&json!({ "password": password }));
        send_json(req).await
    }

    async fn resend_signup(&self, email: &str, redirect_to: &str) -> Result<(), Error> {
        send_empty(
            self.post("/resend")
                .query(&[("redirect_to", redirect_to)])
                .json(&json!({ "type": OtpType::Signup, "email": email })),
        )
        .await
    }
}
