//! History admin API.
//!
//! - `GET /.services`
//! - `GET /.services/{name}/history`
//! - `DELETE /.services/{name}/history`

pub mod auth;
pub mod handlers;

use axum::{
    middleware,
    routing::get,
    Router,
};
use crate::http::server::AppState;
use self::handlers::*;
use self::auth::admin_auth_middleware;

pub fn setup_admin_router(state: AppState) -> Router {
    Router::new()
        .route("/.services", get(list_services))
        .route("/.services/{name}/history", get(get_history).delete(clear_history))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use crate::config::{AppConfig, ServiceConfig};
    use crate::http::HttpServer;
    use crate::storage::Storage;
    use axum::body::{to_bytes, Body};
    use axum::http::{header::AUTHORIZATION, Method, Request, StatusCode};
    use axum::response::Response;
    use axum::Router;
    use std::time::Duration;
    use tower::ServiceExt;

    fn server(enabled: bool) -> HttpServer {
        let mut config = AppConfig::default();
        config.history.clear_interval = Duration::ZERO;
        config.admin.enabled = enabled;
        config.admin.api_key = "sekret".into();
        config.services = vec![ServiceConfig::named("pets")];
        HttpServer::with_storage(config, Storage::memory())
    }

    async fn call(router: &Router, method: Method, uri: &str, key: Option<&str>) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(key) = key {
            builder = builder.header(AUTHORIZATION, format!("Bearer {key}"));
        }
        router.clone().oneshot(builder.body(Body::empty()).unwrap()).await.unwrap()
    }

    async fn json(response: Response) -> serde_json::Value {
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_list_services() {
        let router = server(false).router();
        let response = call(&router, Method::GET, "/.services", None).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json(response).await;
        assert_eq!(body[0]["name"], "pets");
        assert_eq!(body[0]["cache_requests"], true);
    }

    #[tokio::test]
    async fn test_history_snapshot_and_clear() {
        let router = server(false).router();
        call(&router, Method::GET, "/pets/anything", None).await;

        let history = json(call(&router, Method::GET, "/.services/pets/history", None).await).await;
        let entry = &history["GET:/pets/anything"];
        assert_eq!(entry["request"]["url"], "/pets/anything");
        assert_eq!(entry["response"]["status_code"], 404);

        let cleared = call(&router, Method::DELETE, "/.services/pets/history", None).await;
        assert_eq!(cleared.status(), StatusCode::NO_CONTENT);
        let history = json(call(&router, Method::GET, "/.services/pets/history", None).await).await;
        assert!(history.as_object().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_service_history_is_not_found() {
        let router = server(false).router();
        let response = call(&router, Method::GET, "/.services/nope/history", None).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_bearer_key_required_when_enabled() {
        let router = server(true).router();
        assert_eq!(
            call(&router, Method::GET, "/.services", None).await.status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            call(&router, Method::GET, "/.services", Some("wrong")).await.status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            call(&router, Method::GET, "/.services", Some("sekret")).await.status(),
            StatusCode::OK
        );
    }
}
