use rand::{thread_rng, Rng};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use super::{send_empty, send_json, with_key};
use crate::err::Error;

/// Upper bound the bucket is created with, matching the upload check below.
pub const MAX_OBJECT_SIZE: usize = 5 * 1024 * 1024;

const ALLOWED_MIME_TYPES: [&str; 5] = [
    "image/*",
    "text/*",
    "application/javascript",
    "application/json",
    "font/*",
];

#[derive(Debug, Deserialize)]
struct UploadAnswer {
    #[serde(rename = "Key")]
    key: String,
}

#[derive(Clone)]
pub struct StorageClient {
    http: Client,
    project_url: String,
    bucket: String,
    anon_key: String,
    service_key: Option<String>,
}

impl StorageClient {
    pub fn new(
        http: Client,
        project_url: &str,
        bucket: impl Into<String>,
        anon_key: impl Into<String>,
        service_key: Option<String>,
    ) -> Self {
        Self {
            http,
            project_url: project_url.trim_end_matches('/').to_string(),
            bucket: bucket.into(),
            anon_key: anon_key.into(),
            service_key,
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    fn object_url(&self, path: &str) -> String {
        format!(
            "{}/storage/v1/object/{}/{}",
            self.project_url,
            self.bucket,
            path.trim_start_matches('/')
        )
    }

    /// Uploads under the caller's own token so bucket policies apply.
    /// Returns the object path inside the bucket.
    pub async fn upload(
        &self,
        access_token: &str,
        path: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> Result<String, Error> {
        if bytes.len() > MAX_OBJECT_SIZE {
            return Err(Error::invalid_payload(format!(
                "File is {} bytes, the limit is {} bytes",
                bytes.len(),
                MAX_OBJECT_SIZE
            )));
        }
        let answer: UploadAnswer = send_json(
            with_key(self.http.post(self.object_url(path)), &self.anon_key)
                .bearer_auth(access_token)
                .header(reqwest::header::CONTENT_TYPE, content_type)
                .body(bytes),
        )
        .await?;
        let prefix = format!("{}/", self.bucket);
        Ok(answer
            .key
            .strip_prefix(&prefix)
            .unwrap_or(&answer.key)
            .to_string())
    }

    pub fn public_url(&self, path: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}",
            self.project_url,
            self.bucket,
            path.trim_start_matches('/')
        )
    }

    pub async fn remove(&self, access_token: &str, paths: &[String]) -> Result<(), Error> {
        let url = format!("{}/storage/v1/object/{}", self.project_url, self.bucket);
        send_empty(
            with_key(self.http.delete(url), &self.anon_key)
                .bearer_auth(access_token)
                .json(&json!({ "prefixes": paths })),
        )
        .await
    }

    /// Creates the public bucket when it is missing. Needs the service-role
    /// key; without one the check is skipped.
    pub async fn ensure_bucket(&self) -> Result<bool, Error> {
        let key = match &self.service_key {
            Some(key) => key,
            None => {
                log::info!("No service-role key configured, skipping bucket check");
                return Ok(false);
            }
        };
        let url = format!("{}/storage/v1/bucket/{}", self.project_url, self.bucket);
        match send_empty(with_key(self.http.get(url), key).bearer_auth(key)).await {
            Ok(()) => {
                log::info!("Storage bucket `{}` already exists", self.bucket);
                return Ok(false);
            }
            Err(err) if is_missing_bucket(&err) => {}
            Err(err) => return Err(err),
        }

        send_empty(
            with_key(
                self.http
                    .post(format!("{}/storage/v1/bucket", self.project_url)),
                key,
            )
            .bearer_auth(key)
            .json(&json!({
                "id": self.bucket,
                "name": self.bucket,
                "public": true,
                "file_size_limit": MAX_OBJECT_SIZE,
                "allowed_mime_types": ALLOWED_MIME_TYPES,
            })),
        )
        .await?;
        log::info!("Created storage bucket `{}`", self.bucket);
        Ok(true)
    }
}

/// The storage API reports an unknown bucket as a 404, or as a 400 whose
/// body names the missing bucket.
fn is_missing_bucket(err: &Error) -> bool {
    match err {
        Error::Backend { status: 404, .. } => true,
        Error::Backend {
            status: 400,
            message,
        } => message.eq_ignore_ascii_case("bucket not found"),
        _ => false,
    }
}

/// `profile-pictures/{user}/{random}.{ext}`; the extension is taken from the
/// uploaded file name.
pub fn avatar_object_path(user: Uuid, file_name: &str) -> String {
    let random: [u8; 8] = thread_rng().gen();
    let stem = hex::encode(random);
    match file_name.rsplit_once('.') {
        Some((_, ext)) if !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()) => {
            format!("profile-pictures/{}/{}.{}", user, stem, ext.to_ascii_lowercase())
        }
        _ => format!("profile-pictures/{}/{}", user, stem),
    }
}
