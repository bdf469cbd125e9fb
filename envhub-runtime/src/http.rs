use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest::{Client, Method, StatusCode, Url};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::envelope::{ApiResponse, truncate_body};
use crate::error::{InstanceError, Result};

pub fn build_url(base: &str, path: &str) -> Result<Url> {
    let base = if base.ends_with('/') {
        base.to_string()
    } else {
        format!("{base}/")
    };
    let base_url = Url::parse(&base)
        .map_err(|err| InstanceError::InvalidInput(format!("Invalid base URL: {err}")))?;
    base_url
        .join(path.trim_start_matches('/'))
        .map_err(|err| InstanceError::InvalidInput(format!("Invalid path '{path}': {err}")))
}

pub fn json_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers
}

pub fn auth_headers(token: &str) -> Result<HeaderMap> {
    let mut headers = json_headers();
    let value = HeaderValue::from_str(&format!("Bearer {token}"))
        .map_err(|_| InstanceError::Unauthorized("Invalid auth token".into()))?;
    headers.insert(AUTHORIZATION, value);
    Ok(headers)
}

/// Send a request and return the raw status and body. Non-2xx is not an error here.
pub async fn send_json<B: Serialize + ?Sized>(
    client: &Client,
    method: Method,
    url: Url,
    body: Option<&B>,
    headers: HeaderMap,
) -> Result<(StatusCode, String)> {
    let mut request = client.request(method, url).headers(headers);
    if let Some(body) = body {
        request = request.json(body);
    }

    let response = request
        .send()
        .await
        .map_err(|err| InstanceError::Upstream(format!("HTTP request failed: {err}")))?;
    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|err| InstanceError::Upstream(format!("Failed to read response body: {err}")))?;

    Ok((status, text))
}

/// Decode an envelope response, mapping HTTP failures and `success:false`
/// onto the error taxonomy. `op` prefixes every message.
pub fn decode_envelope<T: DeserializeOwned>(op: &str, status: StatusCode, body: &str) -> Result<T> {
    if !status.is_success() {
        let detail = serde_json::from_str::<ApiResponse<serde_json::Value>>(body)
            .ok()
            .and_then(|env| env.message)
            .unwrap_or_else(|| truncate_body(body));
        return Err(InstanceError::from_status(
            status.as_u16(),
            format!("{op}: HTTP {}: {detail}", status.as_u16()),
        ));
    }

    let envelope: ApiResponse<T> = serde_json::from_str(body).map_err(|err| {
        InstanceError::Upstream(format!(
            "{op}: invalid response envelope: {err}: {}",
            truncate_body(body)
        ))
    })?;

    if !envelope.success {
        let code = u16::try_from(envelope.code).unwrap_or(500);
        let message = envelope.message.unwrap_or_default();
        return Err(InstanceError::from_status(
            code,
            format!("{op}: server returned error, code: {}: {message}", envelope.code),
        ));
    }

    Ok(envelope.data)
}
