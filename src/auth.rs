use axum::http::HeaderMap;
use axum::{Extension, Json};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use uuid::Uuid;

use crate::backend::{OtpType, SignUp};
use crate::models::{Preferences, Profile, Session};
use crate::permissions::Role;
use crate::session::{bearer_token, resolve_session, AuthContext, Authenticated, LOGIN_PATH};
use crate::{breaks, proceeds, AppState, Error, Payload};

/// Hosted-backend 4xx answers on a credential check are the caller's fault;
/// everything else passes through untouched.
fn credential_failure(err: Error) -> Error {
    match err {
        Error::Backend { status, message } if (400..500).contains(&status) => {
            Error::AuthenticationFailure { message }
        }
        other => other,
    }
}

pub async fn sign_up(
    Extension(state): Extension<AppState>,
    Json(account): Json<CreateAccount>,
) -> Payload<SignedUp> {
    if account.email.trim().is_empty() || account.password.is_empty() {
        return breaks(Error::MissingCredentials {
            message: "Both `email` and `password` are required".to_string(),
        });
    }
    if account.full_name.trim().is_empty() {
        return breaks(Error::invalid_payload("`full_name` parameter was empty"));
    }
    let role = account.role.unwrap_or_default();
    if role == Role::Admin {
        return breaks(Error::invalid_payload(
            "Administrator accounts cannot be self-registered",
        ));
    }

    let outcome = state
        .auth
        .sign_up(&SignUp {
            email: account.email.trim().to_string(),
            password: account.password,
            full_name: account.full_name.trim().to_string(),
            role,
            redirect_to: state.config.email_callback_redirect(),
        })
        .await?;

    let now = Utc::now();
    let profile = state
        .profiles
        .upsert_profile(&Profile {
            id: outcome.user.id,
            email: outcome
                .user
                .email
                .clone()
                .unwrap_or_else(|| account.email.trim().to_string()),
            full_name: Some(account.full_name.trim().to_string()),
            role,
            phone: None,
            address: None,
            avatar_url: None,
            preferences: Some(Preferences::registration_default()),
            last_sign_in_at: outcome.session.as_ref().map(|_| now),
            created_at: now,
            updated_at: now,
        })
        .await?;

    log::info!("Registered {} as {}", profile.id, role);
    proceeds(SignedUp {
        user_id: profile.id,
        confirmation_required: outcome.session.is_none(),
        session: outcome.session,
        profile,
    })
}

pub async fn sign_in(
    Extension(state): Extension<AppState>,
    Json(login): Json<Credentials>,
) -> Payload<SignedIn> {
    if login.email.trim().is_empty() || login.password.is_empty() {
        return breaks(Error::MissingCredentials {
            message: "Both `email` and `password` are required".to_string(),
        });
    }

    let session = state
        .auth
        .sign_in_with_password(login.email.trim(), &login.password)
        .await
        .map_err(credential_failure)?;
    let now = Utc::now();
    let auth = resolve_session(state.auth.as_ref(), state.profiles.as_ref(), &session, now).await?;

    if let Err(err) = state.profiles.record_sign_in(auth.user_id(), now).await {
        log::warn!("could not record sign-in for {}: {:?}", auth.user_id(), err);
    }
    log::info!("{} signed in as {}", auth.user_id(), auth.role);
    proceeds(SignedIn {
        redirect_to: auth.role.home_path().to_string(),
        session,
        auth,
    })
}

pub async fn sign_out(
    headers: HeaderMap,
    Extension(state): Extension<AppState>,
) -> Payload<Redirect> {
    let token = match bearer_token(&headers) {
        Some(token) => token,
        None => {
            return breaks(Error::Unauthenticated {
                redirect_to: LOGIN_PATH.to_string(),
                from: "/auth/sign-out".to_string(),
            })
        }
    };
    state.auth.sign_out(&token).await?;
    log::info!("Session closed");
    proceeds(Redirect::to(LOGIN_PATH))
}

pub async fn refresh(
    Extension(state): Extension<AppState>,
    Json(body): Json<RefreshSession>,
) -> Payload<Refreshed> {
    if body.refresh_token.is_empty() {
        return breaks(Error::invalid_payload("`refresh_token` parameter was empty"));
    }
    let session = state
        .auth
        .refresh_session(&body.refresh_token)
        .await
        .map_err(|err| match err {
            Error::Backend { status, message } if (400..500).contains(&status) => {
                Error::invalid_session(message)
            }
            other => other,
        })?;
    let auth =
        resolve_session(state.auth.as_ref(), state.profiles.as_ref(), &session, Utc::now()).await?;
    proceeds(Refreshed { session, auth })
}

pub async fn request_password_reset(
    Extension(state): Extension<AppState>,
    Json(body): Json<EmailOnly>,
) -> Payload<EmailSent> {
    if body.email.trim().is_empty() {
        return breaks(Error::invalid_payload("`email` parameter was empty"));
    }
    state
        .auth
        .reset_password_for_email(body.email.trim(), &state.config.reset_password_redirect())
        .await
        .map_err(|err| {
            log::error!("password reset email failed: {:?}", err);
            Error::unknown("Failed to send password reset email")
        })?;
    proceeds(EmailSent { email_sent: true })
}

pub async fn update_password(
    Extension(state): Extension<AppState>,
    Json(body): Json<NewPassword>,
) -> Payload<Redirect> {
    if body.new_password.is_empty() {
        return breaks(Error::MissingCredentials {
            message: "`new_password` parameter was empty".to_string(),
        });
    }
    let invalid_link = || Error::AuthenticationFailure {
        message: "Invalid or expired password reset link".to_string(),
    };
    let verified = state
        .auth
        .verify_otp(&body.token, OtpType::Recovery)
        .await
        .map_err(|_| invalid_link())?;
    let session = verified.session.ok_or_else(invalid_link)?;

    let updated = state
        .auth
        .update_password(&session.access_token, &body.new_password)
        .await;
    // The recovery session never outlives the attempt.
    if let Err(err) = state.auth.sign_out(&session.access_token).await {
        log::warn!(
            "could not close recovery session for {}: {:?}",
            verified.user.id,
            err
        );
    }
    updated?;
    log::info!("Password updated for {}", verified.user.id);
    proceeds(Redirect::to(LOGIN_PATH))
}

pub async fn verify_email(
    Extension(state): Extension<AppState>,
    Json(body): Json<VerifyEmail>,
) -> Payload<EmailVerified> {
    if body.token_hash.is_empty() {
        return breaks(Error::invalid_payload("`token_hash` parameter was empty"));
    }
    let verified = state
        .auth
        .verify_otp(&body.token_hash, OtpType::Email)
        .await
        .map_err(credential_failure)?;
    let profile = match &verified.session {
        Some(session) => {
            resolve_session(state.auth.as_ref(), state.profiles.as_ref(), session, Utc::now())
                .await?
                .profile
        }
        None => state.profiles.fetch_profile(verified.user.id).await?,
    };
    proceeds(EmailVerified {
        user_id: profile.id,
        redirect_to: profile.role.home_path().to_string(),
        session: verified.session,
    })
}

pub async fn resend_confirmation(
    Extension(state): Extension<AppState>,
    Json(body): Json<EmailOnly>,
) -> Payload<EmailSent> {
    if body.email.trim().is_empty() {
        return breaks(Error::invalid_payload("`email` parameter was empty"));
    }
    state
        .auth
        .resend_signup(body.email.trim(), &state.config.email_callback_redirect())
        .await?;
    proceeds(EmailSent { email_sent: true })
}

pub async fn me(Authenticated(auth): Authenticated) -> Payload<AuthContext> {
    proceeds(auth)
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateAccount {
    pub email: String,
    pub password: String,
    pub full_name: String,
    pub role: Option<Role>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RefreshSession {
    pub refresh_token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmailOnly {
    pub email: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewPassword {
    pub token: String,
    pub new_password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VerifyEmail {
    pub token_hash: String,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize)]
pub struct SignedUp {
    pub user_id: Uuid,
    pub confirmation_required: bool,
    pub session: Option<Session>,
    pub profile: Profile,
}

#[derive(Debug, Clone, Serialize)]
pub struct SignedIn {
    pub redirect_to: String,
    pub session: Session,
    pub auth: AuthContext,
}

#[derive(Debug, Clone, Serialize)]
pub struct Refreshed {
    pub session: Session,
    pub auth: AuthContext,
}

#[derive(Debug, Clone, Serialize)]
pub struct Redirect {
    pub redirect_to: String,
}

impl Redirect {
    fn to(path: &str) -> Self {
        Self {
            redirect_to: path.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EmailSent {
    pub email_sent: bool,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize)]
pub struct EmailVerified {
    pub user_id: Uuid,
    pub redirect_to: String,
    pub session: Option<Session>,
}
