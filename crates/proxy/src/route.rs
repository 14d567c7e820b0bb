//! The reserved input route `GET /{prefix}-get-input/?id=…&prompt=…&session=…`.

use http::{Method, Uri};
use pybridge_channel::PendingInputRequest;
use pybridge_core::{RequestId, SessionId};
use url::Url;

use crate::error::ProxyError;

/// Path and query layout of intercepted input requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputRoute {
    prefix: String,
    path: String,
}

/// Parameters carried by an intercepted request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteParams {
    /// Correlation id of the input request.
    pub request_id: RequestId,
    /// Prompt to show; empty when omitted.
    pub prompt: String,
    /// Issuing session.
    pub session_id: SessionId,
}

impl InputRoute {
    /// Build the route for `prefix`.
    pub fn new(prefix: impl Into<String>) -> Result<Self, ProxyError> {
        let prefix = prefix.into();
        if prefix.is_empty() {
            return Err(ProxyError::InvalidPrefix {
                prefix,
                reason: "must not be empty",
            });
        }
        if !prefix
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(ProxyError::InvalidPrefix {
                prefix,
                reason: "only ASCII letters, digits, '-' and '_' are allowed",
            });
        }
        let path = format!("/{prefix}-get-input/");
        Ok(Self { prefix, path })
    }

    /// Configured prefix.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Reserved path, e.g. `/pybridge-get-input/`.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Absolute URL under `base` announcing `request`.
    pub fn request_url(&self, base: &Url, request: &PendingInputRequest) -> Result<Url, ProxyError> {
        let mut url = base
            .join(&self.path)
            .map_err(|e| ProxyError::bad_request(format!("cannot join {base} with {}: {e}", self.path)))?;
        url.query_pairs_mut()
            .append_pair("id", &request.request_id.to_string())
            .append_pair("prompt", &request.prompt)
            .append_pair("session", &request.session_id.to_string());
        Ok(url)
    }

    /// Whether a request targets the reserved route.
    pub fn matches(&self, method: &Method, uri: &Uri) -> bool {
        method == Method::GET && uri.path() == self.path
    }

    /// Extract the parameters of a request already known to [`match`](Self::matches).
    pub fn params(&self, uri: &Uri) -> Result<RouteParams, ProxyError> {
        let mut request_id = None;
        let mut prompt = String::new();
        let mut session_id = None;

        for (key, value) in url::form_urlencoded::parse(uri.query().unwrap_or_default().as_bytes()) {
            match key.as_ref() {
                "id" => {
                    request_id = Some(
                        RequestId::parse(&value)
                            .map_err(|e| ProxyError::bad_request(format!("bad id {value:?}: {e}")))?,
                    );
                }
                "prompt" => prompt = value.into_owned(),
                "session" => {
                    session_id = Some(
                        SessionId::parse(&value)
                            .map_err(|e| ProxyError::bad_request(format!("bad session {value:?}: {e}")))?,
                    );
                }
                _ => {}
            }
        }

        let request_id = request_id.ok_or_else(|| ProxyError::bad_request("missing id"))?;
        let session_id = session_id.ok_or_else(|| ProxyError::bad_request("missing session"))?;
        Ok(RouteParams {
            request_id,
            prompt,
            session_id,
        })
    }
}
