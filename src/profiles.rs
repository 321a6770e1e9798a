use axum::body::Bytes;
use axum::extract::Query;
use axum::http::header::CONTENT_TYPE;
use axum::http::HeaderMap;
use axum::{Extension, Json};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::backend::storage::avatar_object_path;
use crate::models::{Profile, ProfileUpdate};
use crate::session::Authenticated;
use crate::{breaks, proceeds, AppState, Error, Payload};

pub async fn read_profile(Authenticated(auth): Authenticated) -> Payload<Profile> {
    proceeds(auth.profile)
}

pub async fn update_profile(
    Authenticated(auth): Authenticated,
    Extension(state): Extension<AppState>,
    Json(update): Json<ProfileUpdate>,
) -> Payload<Profile> {
    if update.is_empty() {
        return breaks(Error::invalid_payload("Nothing to update"));
    }
    if matches!(&update.full_name, Some(name) if name.trim().is_empty()) {
        return breaks(Error::invalid_payload("`full_name` cannot be empty"));
    }
    let profile = state
        .profiles
        .update_profile(auth.user_id(), update, Utc::now())
        .await?;
    proceeds(profile)
}

pub async fn upload_avatar(
    Authenticated(auth): Authenticated,
    Extension(state): Extension<AppState>,
    Query(query): Query<AvatarQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Payload<AvatarUpdated> {
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();
    if !content_type.starts_with("image/") {
        return breaks(Error::invalid_payload(format!(
            "Avatars must be images, got `{}`",
            content_type
        )));
    }
    if body.is_empty() {
        return breaks(Error::invalid_payload("Uploaded file was empty"));
    }

    let path = avatar_object_path(auth.user_id(), &query.file_name);
    let stored = state
        .storage
        .upload(&auth.access_token, &path, &content_type, body.to_vec())
        .await?;
    let avatar_url = state.storage.public_url(&stored);

    let update = ProfileUpdate {
        avatar_url: Some(avatar_url.clone()),
        ..Default::default()
    };
    let profile = match state
        .profiles
        .update_profile(auth.user_id(), update, Utc::now())
        .await
    {
        Ok(profile) => profile,
        Err(err) => {
            if let Err(cleanup) = state.storage.remove(&auth.access_token, &[stored]).await {
                log::warn!("orphaned avatar upload for {}: {:?}", auth.user_id(), cleanup);
            }
            return Err(err);
        }
    };
    proceeds(AvatarUpdated {
        avatar_url,
        profile,
    })
}

pub async fn list_doctors(
    Query(query): Query<DoctorQuery>,
    Extension(state): Extension<AppState>,
) -> Payload<DoctorList> {
    let filter = query.q.as_deref().map(str::trim).filter(|q| !q.is_empty());
    let doctors = state
        .profiles
        .list_doctors(filter)
        .await?
        .into_iter()
        .map(DoctorCard::from)
        .collect();
    proceeds(DoctorList { doctors })
}

#[derive(Debug, Clone, Deserialize)]
pub struct AvatarQuery {
    pub file_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DoctorQuery {
    pub q: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AvatarUpdated {
    pub avatar_url: String,
    pub profile: Profile,
}

/// Public view of a doctor. Contact details stay private.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DoctorCard {
    pub id: Uuid,
    pub full_name: Option<String>,
    pub avatar_url: Option<String>,
}

impl From<Profile> for DoctorCard {
    fn from(profile: Profile) -> Self {
        Self {
            id: profile.id,
            full_name: profile.full_name,
            avatar_url: profile.avatar_url,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DoctorList {
    pub doctors: Vec<DoctorCard>,
}
