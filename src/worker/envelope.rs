//! Synthetic responses served while offline.

use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::StatusCode;
use serde_json::{json, Value};
use tracing::warn;

use crate::http::Response;

pub const NO_CACHED_DATA: &str = "Offline - No cached data available";
pub const REQUEST_FAILED: &str = "Offline - Request failed";
pub const CACHED_DATA_UNREADABLE: &str = "Offline - Cached data unreadable";

/// `503 {error, offline: true}`
pub fn offline_error(message: &str) -> Response {
  Response::json(
    StatusCode::SERVICE_UNAVAILABLE,
    &json!({ "error": message, "offline": true }),
  )
}

/// Plain-text page for navigations with nothing cached.
pub fn offline_page() -> Response {
  Response::text(StatusCode::SERVICE_UNAVAILABLE, "Offline")
}

/// Re-serve a cached API response marked as stale.
///
/// Object bodies keep their fields and gain `_offline` and `_cachedAt`; any
/// other JSON value is nested under `data`. A body that is not JSON yields
/// the unreadable-data error instead.
///
/// `_cachedAt` is `served_at`, the moment the stale copy is handed out, not
/// the time it was stored. Callers pass the current time.
pub fn offline_envelope(cached: &Response, served_at: DateTime<Utc>) -> Response {
  let cached_at = served_at.to_rfc3339_opts(SecondsFormat::Millis, true);

  let body = match serde_json::from_slice::<Value>(&cached.body) {
    Ok(Value::Object(mut fields)) => {
      fields.insert("_offline".to_string(), Value::Bool(true));
      fields.insert("_cachedAt".to_string(), Value::String(cached_at));
      Value::Object(fields)
    }
    Ok(other) => json!({ "data": other, "_offline": true, "_cachedAt": cached_at }),
    Err(err) => {
      warn!(error = %err, "cached API response is not valid JSON");
      return offline_error(CACHED_DATA_UNREADABLE);
    }
  };

  Response::json(StatusCode::OK, &body)
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::TimeZone;

  fn served_at() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 30, 0).unwrap()
  }

  #[test]
  fn test_offline_error_shape() {
    let response = offline_error(NO_CACHED_DATA);
    assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(
      response.json_body().unwrap(),
      json!({ "error": "Offline - No cached data available", "offline": true })
    );
  }

  #[test]
  fn test_envelope_preserves_fields() {
    let cached = Response::json(
      StatusCode::OK,
      &json!({ "name": "Acme Clinic", "theme": { "primary": "#123456" } }),
    );

    let response = offline_envelope(&cached, served_at());
    assert_eq!(response.status, StatusCode::OK);

    let body = response.json_body().unwrap();
    assert_eq!(body["name"], "Acme Clinic");
    assert_eq!(body["theme"]["primary"], "#123456");
    assert_eq!(body["_offline"], true);
    assert_eq!(body["_cachedAt"], "2026-03-01T12:30:00.000Z");
    assert!(DateTime::parse_from_rfc3339(body["_cachedAt"].as_str().unwrap()).is_ok());
  }

  #[test]
  fn test_envelope_wraps_non_object() {
    let cached = Response::json(StatusCode::OK, &json!([1, 2, 3]));
    let body = offline_envelope(&cached, served_at()).json_body().unwrap();
    assert_eq!(body["data"], json!([1, 2, 3]));
    assert_eq!(body["_offline"], true);
  }

  #[test]
  fn test_envelope_for_unreadable_body() {
    let cached = Response::new(StatusCode::OK).with_body("<html>");
    let response = offline_envelope(&cached, served_at());
    assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(response.json_body().unwrap()["error"], CACHED_DATA_UNREADABLE);
  }

  #[test]
  fn test_offline_page() {
    let response = offline_page();
    assert_eq!(response.text_body(), "Offline");
    assert_eq!(response.header("content-type"), Some("text/plain; charset=utf-8"));
  }
}
