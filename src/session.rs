//! Turns an access token into the caller's profile, role and permissions.
//!
//! Nothing here is cached: every request asks the hosted auth service who the
//! token belongs to and re-reads the profile row. When the profile cannot be
//! read the session is closed at the auth service and the request fails.

use axum::extract::{Extension, FromRequest, RequestParts};
use axum::headers::authorization::{Authorization, Bearer};
use axum::headers::HeaderMapExt;
use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::backend::SessionSource;
use crate::err::Error;
use crate::models::{AuthUser, Profile, Session};
use crate::permissions::{derive_permissions, Permission, PermissionSet, Role};
use crate::store::ProfileStore;
use crate::AppState;

pub const LOGIN_PATH: &str = "/login";

#[derive(Debug, Clone, Serialize)]
pub struct AuthContext {
    #[serde(skip)]
    pub access_token: String,
    pub user: AuthUser,
    pub profile: Profile,
    pub role: Role,
    pub permissions: PermissionSet,
    pub is_admin: bool,
}

impl AuthContext {
    pub fn new(access_token: String, user: AuthUser, profile: Profile) -> Self {
        let role = profile.role;
        Self {
            access_token,
            user,
            profile,
            role,
            permissions: derive_permissions(role),
            is_admin: role == Role::Admin,
        }
    }

    pub fn user_id(&self) -> uuid::Uuid {
        self.profile.id
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.role == role
    }

    pub fn has_any_role(&self, roles: &[Role]) -> bool {
        roles.iter().any(|r| self.has_role(*r))
    }

    /// A caller holds exactly one role, so this only passes for a single
    /// repeated role or an empty list.
    pub fn has_all_roles(&self, roles: &[Role]) -> bool {
        roles.iter().all(|r| self.has_role(*r))
    }

    pub fn has_permission(&self, permission: Permission) -> bool {
        self.permissions.allows(permission)
    }
}

pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .typed_get::<Authorization<Bearer>>()
        .map(|auth| auth.token().to_string())
        .filter(|token| !token.is_empty())
}

/// Identity lookup at the auth service, then the fail-closed profile read.
pub async fn resolve(
    source: &dyn SessionSource,
    store: &dyn ProfileStore,
    access_token: &str,
) -> Result<AuthContext, Error> {
    if access_token.is_empty() {
        return Err(Error::invalid_session("No access token supplied"));
    }
    let user = source
        .get_user(access_token)
        .await
        .map_err(|err| match err {
            Error::Backend { status, message } if (400..500).contains(&status) => {
                log::debug!("auth service rejected token: {}", message);
                Error::invalid_session("Session is invalid or has expired")
            }
            other => other,
        })?;
    resolve_profile(source, store, access_token, user).await
}

/// For a session the auth service just handed out.
pub async fn resolve_session(
    source: &dyn SessionSource,
    store: &dyn ProfileStore,
    session: &Session,
    now: DateTime<Utc>,
) -> Result<AuthContext, Error> {
    if session.is_expired(now) {
        return Err(Error::invalid_session("Session has expired"));
    }
    resolve_profile(source, store, &session.access_token, session.user.clone()).await
}

async fn resolve_profile(
    source: &dyn SessionSource,
    store: &dyn ProfileStore,
    access_token: &str,
    user: AuthUser,
) -> Result<AuthContext, Error> {
    match store.fetch_profile(user.id).await {
        Ok(profile) => {
            log::debug!("resolved session for {} as {}", user.id, profile.role);
            Ok(AuthContext::new(access_token.to_string(), user, profile))
        }
        Err(err) => {
            log::warn!(
                "could not load profile for {}, closing session: {:?}",
                user.id,
                err
            );
            if let Err(sign_out) = source.sign_out(access_token).await {
                log::warn!("sign-out after failed profile load failed: {:?}", sign_out);
            }
            Err(Error::invalid_session(
                "Failed to load user profile, you have been signed out",
            ))
        }
    }
}

async fn app_state<B: Send>(req: &mut RequestParts<B>) -> Result<AppState, Error> {
    let Extension(state) = Extension::<AppState>::from_request(req)
        .await
        .map_err(|rejection| Error::InternalError {
            kind: "MissingState",
            message: rejection.to_string(),
        })?;
    Ok(state)
}

/// Rejects with a login redirect when there is no bearer token.
pub struct Authenticated(pub AuthContext);

#[axum::async_trait]
impl<B> FromRequest<B> for Authenticated
where
    B: Send,
{
    type Rejection = Error;

    async fn from_request(req: &mut RequestParts<B>) -> Result<Self, Self::Rejection> {
        let token = match bearer_token(req.headers()) {
            Some(token) => token,
            None => {
                return Err(Error::Unauthenticated {
                    redirect_to: LOGIN_PATH.to_string(),
                    from: req.uri().path().to_string(),
                })
            }
        };
        let state = app_state(req).await?;
        let auth = resolve(state.auth.as_ref(), state.profiles.as_ref(), &token).await?;
        Ok(Authenticated(auth))
    }
}

/// `None` for anonymous callers and for tokens the auth service refuses.
pub struct MaybeAuthenticated(pub Option<AuthContext>);

#[axum::async_trait]
impl<B> FromRequest<B> for MaybeAuthenticated
where
    B: Send,
{
    type Rejection = Error;

    async fn from_request(req: &mut RequestParts<B>) -> Result<Self, Self::Rejection> {
        let token = match bearer_token(req.headers()) {
            Some(token) => token,
            None => return Ok(MaybeAuthenticated(None)),
        };
        let state = app_state(req).await?;
        match resolve(state.auth.as_ref(), state.profiles.as_ref(), &token).await {
            Ok(auth) => Ok(MaybeAuthenticated(Some(auth))),
            Err(Error::InvalidSession { .. }) => Ok(MaybeAuthenticated(None)),
            Err(other) => Err(other),
        }
    }
}
