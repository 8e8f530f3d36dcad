//! Client for the remote identity service: authentication, authorization and workspace lookup.

use crate::context::Object;
use crate::request::{HttpClient, HttpError, HttpResponse};
use serde_json::{json, Value};
use thiserror::Error;

/// Headers describing the inbound request body or connection; never forwarded.
const SKIPPED_HEADERS: &[&str] = &[
    "host",
    "content-length",
    "content-type",
    "transfer-encoding",
    "connection",
];

#[derive(Error, Debug)]
pub enum IdentityError {
    #[error(transparent)]
    Http(#[from] HttpError),
    #[error("identity response missing '{0}'")]
    Missing(&'static str),
}

/// Result of [`IdentityClient::authenticate`]. A rejected caller has `status == false`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Authentication {
    pub status: bool,
    pub user: Option<Object>,
    pub workspace: Option<Object>,
}

#[derive(Clone, Debug)]
pub struct IdentityClient {
    base_url: String,
    http: HttpClient,
}

/// Non-2xx answers from the identity service mean "denied", not failure.
fn accepted(result: Result<HttpResponse, HttpError>) -> Result<Option<HttpResponse>, IdentityError> {
    match result {
        Ok(response) => Ok(Some(response)),
        Err(HttpError::Status(response)) => {
            tracing::debug!(status = response.status_code, "identity service declined");
            Ok(None)
        }
        Err(e) => {
            tracing::error!(error = %e, "identity service unreachable");
            Err(e.into())
        }
    }
}

impl IdentityClient {
    pub fn new(base_url: impl Into<String>, http: HttpClient) -> Self {
        IdentityClient {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Ask whether the described request is authenticated. The caller's headers are both
    /// forwarded and included in the payload.
    pub async fn authenticate(
        &self,
        method: &str,
        url: &str,
        headers: &[(String, String)],
    ) -> Result<Authentication, IdentityError> {
        let header_map: serde_json::Map<String, Value> = headers
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();
        let payload = json!({
            "method": method,
            "url": url,
            "headers": header_map,
        });
        let forwarded: Vec<(&str, &str)> = headers
            .iter()
            .filter(|(k, _)| !SKIPPED_HEADERS.contains(&k.to_ascii_lowercase().as_str()))
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        let endpoint = format!("{}/authenticate", self.base_url);
        let Some(response) = accepted(self.http.post(&endpoint, &payload, &[], &forwarded).await)? else {
            return Ok(Authentication::default());
        };
        Ok(Authentication {
            status: response.field("status").as_bool().unwrap_or(false),
            user: response.field("user").as_object().cloned(),
            workspace: response.field("workspace").as_object().cloned(),
        })
    }

    pub async fn authorize(
        &self,
        user_id: &str,
        workspace_id: &str,
        permission_type: &str,
        permissions: &[String],
    ) -> Result<bool, IdentityError> {
        let payload = json!({
            "userId": user_id,
            "workspaceId": workspace_id,
            "permissions": permissions,
            "type": permission_type,
        });
        let endpoint = format!("{}/authorize", self.base_url);
        let Some(response) = accepted(self.http.post(&endpoint, &payload, &[], &[]).await)? else {
            return Ok(false);
        };
        response
            .field("status")
            .as_bool()
            .ok_or(IdentityError::Missing("status"))
    }

    /// Resolve `(user_id, workspace_id)` for an external source id. `None` when the service declines.
    pub async fn workspace_by_source(&self, source_id: &str) -> Result<Option<(String, String)>, IdentityError> {
        let endpoint = format!("{}/workspace/{}/sourceId", self.base_url, source_id);
        let Some(response) = accepted(self.http.get(&endpoint, &[], &[]).await)? else {
            return Ok(None);
        };
        let user_id = response
            .field("userId")
            .as_str()
            .ok_or(IdentityError::Missing("userId"))?;
        let workspace_id = response
            .field("workspaceId")
            .as_str()
            .ok_or(IdentityError::Missing("workspaceId"))?;
        Ok(Some((user_id.to_string(), workspace_id.to_string())))
    }
}
