//! Firebase REST backends.
//!
//! - Storage: `POST {endpoint}/v0/b/{bucket}/o?uploadType=media&name={path}`
//!   with the raw bytes as body and a bearer token.
//! - Realtime Database: `POST {database_url}/{key}.json` to append (the
//!   response is `{"name": "<push id>"}`), `PATCH {database_url}/.json` to
//!   merge root fields. Auth goes in the `auth` query parameter.

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use url::Url;

use super::{EventRecord, ObjectStore, RealtimeDb};
use crate::error::RemoteError;

pub const DEFAULT_STORAGE_ENDPOINT: &str = "https://firebasestorage.googleapis.com";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

const MAX_ERROR_BODY: usize = 512;

#[derive(Clone, Debug, PartialEq)]
pub struct FirebaseSettings {
    /// e.g. `https://crimefinder-default-rtdb.firebaseio.com/`
    pub database_url: String,
    /// e.g. `crimefinder.appspot.com`
    pub storage_bucket: String,
    pub storage_endpoint: String,
    pub auth_token: Option<String>,
    pub timeout: Duration,
}

impl FirebaseSettings {
    pub fn new(database_url: impl Into<String>, storage_bucket: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            storage_bucket: storage_bucket.into(),
            storage_endpoint: DEFAULT_STORAGE_ENDPOINT.to_string(),
            auth_token: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Parse an http(s) base URL and make sure it ends in `/` so joins append.
pub(crate) fn base_url(raw: &str) -> Result<Url> {
    let mut url = Url::parse(raw.trim()).with_context(|| format!("parse url '{}'", raw))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(anyhow!(
            "unsupported scheme '{}' in '{}'; expected http(s)",
            url.scheme(),
            raw
        ));
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

pub(crate) fn build_agent(timeout: Duration) -> ureq::Agent {
    ureq::AgentBuilder::new().timeout(timeout).build()
}

pub(crate) fn map_ureq_error(err: ureq::Error) -> RemoteError {
    match err {
        ureq::Error::Status(code, response) => {
            let mut body = response.into_string().unwrap_or_default();
            if body.len() > MAX_ERROR_BODY {
                let mut cut = MAX_ERROR_BODY;
                while !body.is_char_boundary(cut) {
                    cut -= 1;
                }
                body.truncate(cut);
            }
            RemoteError::Status { code, body }
        }
        ureq::Error::Transport(transport) => RemoteError::Transport(transport.to_string()),
    }
}

pub struct FirebaseStorage {
    agent: ureq::Agent,
    upload_url: Url,
    auth_token: Option<String>,
}

impl FirebaseStorage {
    pub fn new(settings: &FirebaseSettings) -> Result<Self> {
        if settings.storage_bucket.trim().is_empty() {
            return Err(anyhow!("firebase storage bucket must not be empty"));
        }
        let upload_url = base_url(&settings.storage_endpoint)?
            .join(&format!("v0/b/{}/o", settings.storage_bucket.trim()))
            .context("build storage upload url")?;
        Ok(Self {
            agent: build_agent(settings.timeout),
            upload_url,
            auth_token: settings.auth_token.clone(),
        })
    }

    pub fn upload_url(&self) -> &Url {
        &self.upload_url
    }
}

impl ObjectStore for FirebaseStorage {
    fn upload(
        &mut self,
        folder: &str,
        file_name: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<(), RemoteError> {
        let object = format!("{}/{}", folder, file_name);
        let mut request = self
            .agent
            .post(self.upload_url.as_str())
            .query("uploadType", "media")
            .query("name", &object)
            .set("Content-Type", content_type);
        if let Some(token) = &self.auth_token {
            request = request.set("Authorization", &format!("Bearer {}", token));
        }
        request.send_bytes(bytes).map_err(map_ureq_error)?;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct PushResponse {
    name: String,
}

pub struct FirebaseDatabase {
    agent: ureq::Agent,
    base: Url,
    auth_token: Option<String>,
}

impl FirebaseDatabase {
    pub fn new(settings: &FirebaseSettings) -> Result<Self> {
        Ok(Self {
            agent: build_agent(settings.timeout),
            base: base_url(&settings.database_url)?,
            auth_token: settings.auth_token.clone(),
        })
    }

    /// REST url for `key`; the empty key addresses the root.
    pub fn node_url(&self, key: &str) -> Result<Url, RemoteError> {
        let mut url = self
            .base
            .join(&format!("{}.json", key.trim_matches('/')))
            .map_err(|e| RemoteError::Transport(format!("invalid database key '{}': {}", key, e)))?;
        if let Some(token) = &self.auth_token {
            url.query_pairs_mut().append_pair("auth", token);
        }
        Ok(url)
    }
}

impl RealtimeDb for FirebaseDatabase {
    fn push(&mut self, key: &str, record: &EventRecord) -> Result<String, RemoteError> {
        let url = self.node_url(key)?;
        let body = serde_json::to_string(record).map_err(|e| RemoteError::Decode(e.to_string()))?;
        let response = self
            .agent
            .post(url.as_str())
            .set("Content-Type", "application/json")
            .send_string(&body)
            .map_err(map_ureq_error)?;
        let text = response
            .into_string()
            .map_err(|e| RemoteError::Transport(e.to_string()))?;
        let parsed: PushResponse =
            serde_json::from_str(&text).map_err(|e| RemoteError::Decode(e.to_string()))?;
        Ok(parsed.name)
    }

    fn update(&mut self, fields: &BTreeMap<String, String>) -> Result<(), RemoteError> {
        let url = self.node_url("")?;
        let body = serde_json::to_string(fields).map_err(|e| RemoteError::Decode(e.to_string()))?;
        self.agent
            .request("PATCH", url.as_str())
            .set("Content-Type", "application/json")
            .send_string(&body)
            .map_err(map_ureq_error)?;
        Ok(())
    }
}
