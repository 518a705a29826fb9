pub mod auth;
pub mod chat;
pub mod feed;
pub mod feedback;
pub mod form;
pub mod friends;
pub mod health;
pub mod reactions;
pub mod sse;
pub mod users;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post, put};
use axum::Router;

use lokcet_shared::middleware::metrics_middleware;

use crate::AppState;

/// Every route of the service. Cross-cutting layers (CORS, request tracing)
/// are added by the binary.
pub fn router(state: Arc<AppState>) -> Router {
    let upload_limit = DefaultBodyLimit::max(state.config.upload_limit_bytes);

    Router::new()
        .route("/health", get(health::health_check))
        .route("/metrics", get(health::metrics))
        .route("/server-time", get(feed::server_time))
        // Accounts
        .route("/auth/sign-up", post(auth::sign_up))
        .route("/auth/sign-in", post(auth::sign_in))
        .route("/auth/refresh", post(auth::refresh))
        .route("/auth/sign-out", post(auth::sign_out))
        .route("/auth/password-reset", post(auth::request_password_reset))
        .route("/auth/password-reset/confirm", post(auth::reset_password))
        .route("/me", get(users::me).patch(users::update_profile).delete(users::delete_account))
        .route("/me/avatar", put(users::update_avatar).layer(upload_limit))
        .route("/me/location", put(users::update_location))
        .route("/me/fcm-token", put(users::update_fcm_token))
        .route("/me/invite-link", get(users::invite_link))
        .route("/users/:id", get(users::get_profile))
        // Friends
        .route("/friends", get(friends::friends))
        .route("/friends/requests", get(friends::requests))
        .route("/friends/waiting", get(friends::waiting))
        .route("/friends/suggestions", post(friends::suggestions))
        .route("/friends/stream", get(friends::friends_stream))
        .route("/friends/requests/stream", get(friends::requests_stream))
        .route("/friends/waiting/stream", get(friends::waiting_stream))
        .route("/friends/suggestions/stream", get(friends::suggestions_stream))
        .route("/friends/:id", axum::routing::delete(friends::remove_friend))
        .route("/friends/:id/request", post(friends::add_friend).delete(friends::cancel_request))
        .route("/friends/:id/accept", post(friends::accept_friend))
        .route("/friends/:id/reject", post(friends::reject_friend))
        // Chat
        .route("/chatrooms", post(chat::create_room))
        .route("/chatrooms/stream", get(chat::rooms_stream))
        .route("/chatrooms/latest/stream", get(chat::latest_stream))
        .route("/chatrooms/unseen-count", get(chat::unseen_count))
        .route("/chatrooms/:id", get(chat::get_room))
        .route("/chatrooms/:id/messages", get(chat::messages).post(chat::send_message))
        .route("/chatrooms/:id/messages/stream", get(chat::messages_stream))
        .route("/chatrooms/:id/seen", post(chat::mark_seen))
        // Feed
        .route("/feed", get(feed::list_feeds))
        .route("/feed/new-count", get(feed::new_feed_count))
        .route("/feed/checked", post(feed::mark_feeds_checked))
        .route("/feed/images", post(feed::upload_image).layer(upload_limit))
        .route("/feed/images/:id", get(feed::get_image).delete(feed::delete_image))
        .route("/feed/images/:id/reactions", get(reactions::list_reactions).post(reactions::add_reaction))
        .route("/feed/images/:id/reactions/viewed", post(reactions::mark_viewed))
        // Feedback
        .route("/feedback/problems", post(feedback::report_problem).layer(upload_limit))
        .route("/feedback/suggestions", post(feedback::send_suggestion))
        .layer(axum::middleware::from_fn(metrics_middleware))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Method, Request, StatusCode};
    use metrics_exporter_prometheus::PrometheusBuilder;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use lokcet_shared::clients::push::RecordingNotifier;

    use crate::config::AppConfig;
    use crate::Backends;

    fn app() -> (Router, Arc<AppState>) {
        app_with(AppConfig::default())
    }

    fn app_with(config: AppConfig) -> (Router, Arc<AppState>) {
        let backends = Backends::in_memory(Arc::new(RecordingNotifier::new()));
        let handle = PrometheusBuilder::new().build_recorder().handle();
        let state = Arc::new(AppState::new(config, backends, handle));
        (router(state.clone()), state)
    }

    async fn call(app: &Router, method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            request = request.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = match body {
            Some(body) => request
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => request.body(Body::empty()).unwrap(),
        };
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    async fn sign_up(app: &Router, email: &str, phone: &str) -> (String, String) {
        let body = json!({
            "email": email,
            "password": "matkhau123",
            "firstName": "Lan",
            "lastName": "Nguyen",
            "phone": phone,
        });
        let (status, value) = call(app, Method::POST, "/auth/sign-up", None, Some(body)).await;
        assert_eq!(status, StatusCode::CREATED, "{value}");
        let data = &value["data"];
        (
            data["user_id"].as_str().unwrap().to_string(),
            data["access_token"].as_str().unwrap().to_string(),
        )
    }

    #[tokio::test]
    async fn health_reports_store_status() {
        let (app, _) = app();
        let (status, value) = call(&app, Method::GET, "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(value["status"], "healthy");
        assert_eq!(value["checks"][0]["name"], "document_store");
        assert_eq!(value["checks"][1]["name"], "cache");
        assert_eq!(value["checks"][1]["status"], "healthy");
    }

    #[tokio::test]
    async fn protected_routes_need_a_bearer_token() {
        let (app, _) = app();
        let (status, value) = call(&app, Method::GET, "/me", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(value["success"], false);
        let (status, _) = call(&app, Method::GET, "/me", Some("not-a-token"), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn sign_up_then_read_profile() {
        let (app, _) = app();
        let (user_id, token) = sign_up(&app, "lan@example.com", "0901234567").await;

        let (status, value) = call(&app, Method::GET, "/me", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(value["data"]["id"], user_id.as_str());
        assert_eq!(value["data"]["firstName"], "Lan");

        let (status, value) = call(&app, Method::GET, "/me/invite-link", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(value["data"]["link"].as_str().unwrap().ends_with(&format!("invite?uid={user_id}")));
    }

    #[tokio::test]
    async fn malformed_requests_are_rejected() {
        let (app, _) = app();
        let body = json!({
            "email": "not-an-email",
            "password": "matkhau123",
            "firstName": "Lan",
            "phone": "0901234567",
        });
        let (status, value) = call(&app, Method::POST, "/auth/sign-up", None, Some(body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(value["error"]["code"], "E0002");

        sign_up(&app, "lan@example.com", "0901234567").await;
        let body = json!({
            "email": "LAN@example.com",
            "password": "matkhau123",
            "firstName": "Lan",
            "phone": "0909999999",
        });
        let (status, _) = call(&app, Method::POST, "/auth/sign-up", None, Some(body)).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn friendship_opens_a_chat_room() {
        let (app, _) = app();
        let (lan, lan_token) = sign_up(&app, "lan@example.com", "0901234567").await;
        let (minh, minh_token) = sign_up(&app, "minh@example.com", "0907654321").await;

        let (status, _) = call(&app, Method::POST, &format!("/friends/{minh}/request"), Some(&lan_token), None).await;
        assert_eq!(status, StatusCode::OK);
        let (_, value) = call(&app, Method::GET, "/friends/requests", Some(&minh_token), None).await;
        assert_eq!(value["data"][0]["id"], lan.as_str());

        let (status, _) = call(&app, Method::POST, &format!("/friends/{lan}/accept"), Some(&minh_token), None).await;
        assert_eq!(status, StatusCode::OK);
        let (_, value) = call(&app, Method::GET, "/friends", Some(&lan_token), None).await;
        assert_eq!(value["data"][0]["id"], minh.as_str());

        let room = lokcet_messaging::room_id(&lan, &minh);
        let body = json!({ "content": "xin chào" });
        let (status, value) = call(&app, Method::POST, &format!("/chatrooms/{room}/messages"), Some(&lan_token), Some(body)).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(value["data"]["receiverId"], minh.as_str());

        let forged = json!({ "content": "", "replyToImageId": "not-an-image", "replyFeed": { "imageId": "x" } });
        let (status, value) = call(&app, Method::POST, &format!("/chatrooms/{room}/messages"), Some(&lan_token), Some(forged)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(value["error"]["code"], "E4001");

        let (_, value) = call(&app, Method::GET, "/chatrooms/unseen-count", Some(&minh_token), None).await;
        assert_eq!(value["data"]["rooms"], 1);
        let (_, value) = call(&app, Method::POST, &format!("/chatrooms/{room}/seen"), Some(&minh_token), None).await;
        assert_eq!(value["data"]["updated"], true);

        let (status, _) = call(&app, Method::DELETE, &format!("/friends/{minh}"), Some(&lan_token), None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = call(&app, Method::GET, &format!("/chatrooms/{room}"), Some(&lan_token), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn outsiders_cannot_read_a_room() {
        let (app, _) = app();
        let (lan, lan_token) = sign_up(&app, "lan@example.com", "0901234567").await;
        let (minh, minh_token) = sign_up(&app, "minh@example.com", "0907654321").await;
        let (_, other_token) = sign_up(&app, "hoa@example.com", "0911111111").await;
        call(&app, Method::POST, &format!("/friends/{minh}/request"), Some(&lan_token), None).await;
        call(&app, Method::POST, &format!("/friends/{lan}/accept"), Some(&minh_token), None).await;

        let room = lokcet_messaging::room_id(&lan, &minh);
        let (status, value) = call(&app, Method::GET, &format!("/chatrooms/{room}/messages"), Some(&other_token), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(value["error"]["code"], "E3004");
    }

    #[tokio::test]
    async fn server_time_and_feed_counters() {
        let (app, _) = app();
        let (_, token) = sign_up(&app, "lan@example.com", "0901234567").await;

        let (status, value) = call(&app, Method::GET, "/server-time", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(value["data"]["serverTime"].as_i64().unwrap() > 0);

        let (_, value) = call(&app, Method::GET, "/feed/new-count", Some(&token), None).await;
        assert_eq!(value["data"]["count"], 0);
        let (status, _) = call(&app, Method::POST, "/feed/checked", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);

        let (_, value) = call(&app, Method::GET, "/feed?page=1&per_page=10", Some(&token), None).await;
        assert_eq!(value["data"]["total"], 0);

        let uri = format!("/feed?page={}&per_page=100", u64::MAX);
        let (status, value) = call(&app, Method::GET, &uri, Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(value["data"]["items"], json!([]));
    }

    #[tokio::test]
    async fn configured_secret_signs_and_validates_tokens() {
        let config = AppConfig {
            jwt_secret: "rotated-in-config".into(),
            ..AppConfig::default()
        };
        let (app, _) = app_with(config);
        let (_, token) = sign_up(&app, "lan@example.com", "0901234567").await;

        let (status, value) = call(&app, Method::GET, "/me", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK, "{value}");

        let forged = lokcet_shared::middleware::create_jwt("someone", lokcet_shared::middleware::DEFAULT_JWT_SECRET, 60).unwrap();
        let (status, _) = call(&app, Method::GET, "/me", Some(&forged), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn metrics_endpoint_renders() {
        let (app, _) = app();
        let (status, _) = call(&app, Method::GET, "/metrics", None, None).await;
        assert_eq!(status, StatusCode::OK);
    }
}
