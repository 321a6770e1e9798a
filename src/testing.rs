//! Test doubles for the hosted backend.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

use crate::backend::{OtpType, SessionSource, SignUp, SignUpOutcome, Verified};
use crate::err::Error;
use crate::models::{AuthUser, Preferences, Profile, Session};
use crate::permissions::Role;

pub fn auth_user(id: Uuid) -> AuthUser {
    AuthUser {
        id,
        email: Some(format!("{}@example.com", id.simple())),
        email_confirmed_at: None,
        last_sign_in_at: None,
        user_metadata: HashMap::new(),
    }
}

pub fn profile(role: Role) -> Profile {
    let now = Utc::now();
    let id = Uuid::new_v4();
    Profile {
        id,
        email: format!("{}@example.com", id.simple()),
        full_name: Some(format!("{} {}", role, &id.simple().to_string()[..6])),
        role,
        phone: None,
        address: None,
        avatar_url: None,
        preferences: Some(Preferences::registration_default()),
        last_sign_in_at: None,
        created_at: now,
        updated_at: now,
    }
}

fn rejected(message: &str) -> Error {
    Error::Backend {
        status: 401,
        message: message.to_string(),
    }
}

#[derive(Default)]
pub struct FakeAuth {
    tokens: Mutex<HashMap<String, Uuid>>,
    accounts: Mutex<HashMap<String, (String, Uuid)>>,
    otps: Mutex<HashMap<String, (Uuid, OtpType)>>,
    refresh: Mutex<HashMap<String, Uuid>>,
    passwords_set: Mutex<Vec<(Uuid, String)>>,
    emails_sent: Mutex<Vec<(String, String)>>,
    signed_out: AtomicUsize,
    sign_out_down: AtomicBool,
    auto_confirm: bool,
}

impl FakeAuth {
    /// Sign-ups come back with a live session, as with email confirmation off.
    pub fn auto_confirming() -> Self {
        Self {
            auto_confirm: true,
            ..Self::default()
        }
    }

    pub fn with_user(token: &str, id: Uuid) -> Self {
        let auth = Self::default();
        auth.add_token(token, id);
        auth
    }

    pub fn add_token(&self, token: &str, id: Uuid) {
        self.tokens.lock().unwrap().insert(token.to_string(), id);
    }

    pub fn add_account(&self, email: &str, password: &str, id: Uuid) {
        self.accounts
            .lock()
            .unwrap()
            .insert(email.to_string(), (password.to_string(), id));
    }

    pub fn add_otp(&self, token_hash: &str, id: Uuid, kind: OtpType) {
        self.otps
            .lock()
            .unwrap()
            .insert(token_hash.to_string(), (id, kind));
    }

    pub fn add_refresh_token(&self, refresh_token: &str, id: Uuid) {
        self.refresh
            .lock()
            .unwrap()
            .insert(refresh_token.to_string(), id);
    }

    pub fn session_for(&self, token: &str, id: Uuid) -> Session {
        self.add_token(token, id);
        Session {
            access_token: token.to_string(),
            refresh_token: format!("refresh-{}", token),
            token_type: "bearer".to_string(),
            expires_at: Utc::now() + Duration::hours(1),
            user: auth_user(id),
        }
    }

    /// Every later sign-out call fails after being counted.
    pub fn break_sign_out(&self) {
        self.sign_out_down.store(true, Ordering::SeqCst);
    }

    pub fn sign_outs(&self) -> usize {
        self.signed_out.load(Ordering::SeqCst)
    }

    pub fn is_live(&self, token: &str) -> bool {
        self.tokens.lock().unwrap().contains_key(token)
    }

    pub fn passwords_set(&self) -> Vec<(Uuid, String)> {
        self.passwords_set.lock().unwrap().clone()
    }

    pub fn emails_sent(&self) -> Vec<(String, String)> {
        self.emails_sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl SessionSource for FakeAuth {
    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session, Error> {
        let account = self.accounts.lock().unwrap().get(email).cloned();
        match account {
            Some((expected, id)) if expected == password => {
                Ok(self.session_for(&format!("token-{}", id.simple()), id))
            }
            _ => Err(Error::Backend {
                status: 400,
                message: "Invalid login credentials".to_string(),
            }),
        }
    }

    async fn sign_up(&self, request: &SignUp) -> Result<SignUpOutcome, Error> {
        if self.accounts.lock().unwrap().contains_key(&request.email) {
            return Err(Error::Backend {
                status: 422,
                message: "User already registered".to_string(),
            });
        }
        let id = Uuid::new_v4();
        self.add_account(&request.email, &request.password, id);
        let mut user = auth_user(id);
        user.email = Some(request.email.clone());
        let session = if self.auto_confirm {
            let mut session = self.session_for(&format!("token-{}", id.simple()), id);
            session.user = user.clone();
            Some(session)
        } else {
            None
        };
        Ok(SignUpOutcome { user, session })
    }

    async fn sign_out(&self, access_token: &str) -> Result<(), Error> {
        self.signed_out.fetch_add(1, Ordering::SeqCst);
        if self.sign_out_down.load(Ordering::SeqCst) {
            return Err(Error::Backend {
                status: 503,
                message: "auth service unavailable".to_string(),
            });
        }
        self.tokens.lock().unwrap().remove(access_token);
        Ok(())
    }

    async fn get_user(&self, access_token: &str) -> Result<AuthUser, Error> {
        self.tokens
            .lock()
            .unwrap()
            .get(access_token)
            .map(|id| auth_user(*id))
            .ok_or_else(|| rejected("invalid JWT"))
    }

    async fn refresh_session(&self, refresh_token: &str) -> Result<Session, Error> {
        let id = self.refresh.lock().unwrap().remove(refresh_token);
        match id {
            Some(id) => Ok(self.session_for(&format!("refreshed-{}", id.simple()), id)),
            None => Err(Error::Backend {
                status: 400,
                message: "Invalid Refresh Token".to_string(),
            }),
        }
    }

    async fn reset_password_for_email(&self, email: &str, redirect_to: &str) -> Result<(), Error> {
        self.emails_sent
            .lock()
            .unwrap()
            .push((email.to_string(), redirect_to.to_string()));
        Ok(())
    }

    async fn verify_otp(&self, token_hash: &str, kind: OtpType) -> Result<Verified, Error> {
        let found = self.otps.lock().unwrap().remove(token_hash);
        match found {
            Some((id, expected)) if expected == kind => {
                let session = self.session_for(&format!("otp-{}", id.simple()), id);
                Ok(Verified {
                    user: auth_user(id),
                    session: Some(session),
                })
            }
            _ => Err(Error::Backend {
                status: 403,
                message: "Token has expired or is invalid".to_string(),
            }),
        }
    }

    async fn update_password(
        &self,
        access_token: &str,
        password: &str,
    ) -> Result<AuthUser, Error> {
        let user = self.get_user(access_token).await?;
        if password.len() < 6 {
            return Err(Error::Backend {
                status: 422,
                message: "Password should be at least 6 characters".to_string(),
            });
        }
        self.passwords_set
            .lock()
            .unwrap()
            .push((user.id, password.to_string()));
        Ok(user)
    }

    async fn resend_signup(&self, email: &str, redirect_to: &str) -> Result<(), Error> {
        self.emails_sent
            .lock()
            .unwrap()
            .push((email.to_string(), redirect_to.to_string()));
        Ok(())
    }
}
