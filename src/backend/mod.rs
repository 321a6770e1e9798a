//! Clients for the hosted Backend-as-a-Service.
//!
//! Auth and object storage are spoken to over their REST APIs. The relational
//! store is reached directly over Postgres, see [`crate::store`].

pub mod auth;
pub mod storage;

use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::err::Error;

pub use auth::{HostedAuth, OtpType, SessionSource, SignUp, SignUpOutcome, Verified};
pub use storage::StorageClient;

pub(crate) fn with_key(req: RequestBuilder, api_key: &str) -> RequestBuilder {
    req.header("apikey", api_key)
}

/// Sends the request and decodes a JSON body, turning any non-2xx answer
/// into [`Error::Backend`] carrying the hosted service's own message.
pub(crate) async fn send_json<T: DeserializeOwned>(req: RequestBuilder) -> Result<T, Error> {
    let response = ensure_success(req.send().await?).await?;
    Ok(response.json::<T>().await?)
}

pub(crate) async fn send_empty(req: RequestBuilder) -> Result<(), Error> {
    ensure_success(req.send().await?).await?;
    Ok(())
}

async fn ensure_success(response: Response) -> Result<Response, Error> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = error_message(&body).unwrap_or_else(|| status.to_string());
    log::warn!("hosted backend answered {}: {}", status, message);
    Err(Error::Backend {
        status: status.as_u16(),
        message,
    })
}

/// The auth, rest and storage services each name the message field
/// differently.
pub(crate) fn error_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    ["error_description", "msg", "message", "error"]
        .iter()
        .find_map(|key| value.get(*key).and_then(Value::as_str))
        .map(str::to_string)
}
