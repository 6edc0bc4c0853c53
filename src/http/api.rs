//! Front-end API
//!
//! | Path | Response |
//! |---|---|
//! | `/api?key=K` | raw value bytes of `K` in the served group |
//! | `/stats` | JSON statistics for every registered group |
//! | `/healthz` | `ok` |

use std::sync::Arc;

use hyper::StatusCode;
use tokio::net::TcpListener;
use tracing::warn;

use super::{reply, reply_with_type, serve, HttpResponse};
use crate::error::{Error, Result};
use crate::group::{self, Group};

/// Serve the API for `group` on `listener`
pub async fn serve_api(listener: TcpListener, group: Arc<Group>) -> Result<()> {
    serve(listener, "API server", move |req| {
        let group = Arc::clone(&group);
        async move { respond(&group, req.uri().path(), req.uri().query()).await }
    })
    .await
}

pub async fn respond(group: &Group, path: &str, query: Option<&str>) -> HttpResponse {
    match path {
        "/api" => {
            let Some(key) = query.and_then(key_param) else {
                return reply(StatusCode::BAD_REQUEST, Error::EmptyKey.to_string());
            };
            match group.get(&key).await {
                Ok(view) => {
                    reply_with_type(StatusCode::OK, "application/octet-stream", view.byte_slice())
                }
                Err(Error::EmptyKey) => reply(StatusCode::BAD_REQUEST, Error::EmptyKey.to_string()),
                Err(e) => {
                    warn!(group = %group.name(), key = %key, error = %e, "api request failed");
                    reply(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
                }
            }
        }
        "/stats" => {
            let stats: Vec<_> = group::group_names()
                .iter()
                .filter_map(|name| group::get_group(name))
                .map(|g| g.stats())
                .collect();
            match serde_json::to_vec_pretty(&stats) {
                Ok(body) => reply_with_type(StatusCode::OK, "application/json", body),
                Err(e) => reply(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
            }
        }
        "/healthz" | "/livez" | "/readyz" => reply(StatusCode::OK, "ok"),
        _ => reply(StatusCode::NOT_FOUND, "not found"),
    }
}

/// Decoded value of the `key` query parameter
fn key_param(query: &str) -> Option<String> {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('=').or(Some((pair, ""))))
        .find(|(name, _)| *name == "key")
        .and_then(|(_, value)| {
            urlencoding::decode(&value.replace('+', " "))
                .ok()
                .map(|v| v.into_owned())
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group::GetterFunc;
    use http_body_util::BodyExt;

    fn scores() -> Arc<Group> {
        Group::builder(
            "api-scores",
            Arc::new(GetterFunc(|key: &str| match key {
                "Tom" => Ok(b"630".to_vec()),
                _ => Err(Error::NotFound(key.to_string())),
            })),
        )
        .build()
    }

    async fn body_of(response: HttpResponse) -> Vec<u8> {
        response.into_body().collect().await.unwrap().to_bytes().to_vec()
    }

    #[test]
    fn test_key_param() {
        assert_eq!(key_param("key=Tom"), Some("Tom".to_string()));
        assert_eq!(key_param("a=1&key=J%20D"), Some("J D".to_string()));
        assert_eq!(key_param("key="), Some(String::new()));
        assert_eq!(key_param("other=1"), None);
    }

    #[tokio::test]
    async fn test_api_returns_value() {
        let group = scores();
        let response = respond(&group, "/api", Some("key=Tom")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_of(response).await, b"630");
    }

    #[tokio::test]
    async fn test_api_error_codes() {
        let group = scores();

        let missing = respond(&group, "/api", None).await;
        assert_eq!(missing.status(), StatusCode::BAD_REQUEST);

        let empty = respond(&group, "/api", Some("key=")).await;
        assert_eq!(empty.status(), StatusCode::BAD_REQUEST);

        let unknown = respond(&group, "/api", Some("key=Nobody")).await;
        assert_eq!(unknown.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_of(unknown).await, b"Nobody not exist");
    }

    #[tokio::test]
    async fn test_health_and_unknown_paths() {
        let group = scores();
        assert_eq!(respond(&group, "/healthz", None).await.status(), StatusCode::OK);
        assert_eq!(
            respond(&group, "/nope", None).await.status(),
            StatusCode::NOT_FOUND
        );
    }
}
