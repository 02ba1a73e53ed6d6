//! HTTP surface: REST commands and queries, the conversational webhook,
//! and the `/ws` event stream.

pub mod error;
pub mod routes;
pub mod ws;

use std::sync::Arc;

use axum::Router;
use tower_http::cors::CorsLayer;

use crate::campaign::service::CampaignService;
use crate::conversation::ConversationRouter;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<CampaignService>,
    pub conversation: Arc<ConversationRouter>,
}

/// Build the full application router.
pub fn app(service: Arc<CampaignService>, conversation: Arc<ConversationRouter>) -> Router {
    let state = AppState {
        service,
        conversation,
    };
    routes::api_routes()
        .merge(ws::ws_routes())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Method, Request, StatusCode};
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use crate::campaign::CampaignBook;
    use crate::campaign::model::{Intent, Purpose, Target, TargetType};
    use crate::channels::DryRunSender;
    use crate::config::FollowUpConfig;
    use crate::conversation::SessionStore;
    use crate::discovery::{DiscoveryOutcome, TargetDiscovery, TargetQuery};
    use crate::error::PipelineError;
    use crate::followup::FollowUpScheduler;
    use crate::generator::MessageGenerator;
    use crate::intent::IntentClassifier;
    use crate::pipeline::CampaignOrchestrator;
    use crate::store::MemoryStore;

    struct FixedClassifier;

    #[async_trait]
    impl IntentClassifier for FixedClassifier {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn classify(&self, _raw: &str) -> Result<Intent, PipelineError> {
            Ok(Intent::new(TargetType::RestaurantOwner, Purpose::Partnership)
                .with_count(1)
                .with_confidence(0.9))
        }
    }

    struct OneTarget;

    #[async_trait]
    impl TargetDiscovery for OneTarget {
        async fn discover(&self, _query: &TargetQuery) -> Result<DiscoveryOutcome, PipelineError> {
            Ok(DiscoveryOutcome {
                targets: vec![
                    Target::new("Rosa Diaz")
                        .with_company("Casa Rosa")
                        .with_contact("rosa@casarosa.com"),
                ],
                dropped: 0,
            })
        }
    }

    fn test_app() -> Router {
        let store = Arc::new(MemoryStore::new());
        let generator = Arc::new(MessageGenerator::default());
        let orchestrator = Arc::new(
            CampaignOrchestrator::new(Arc::new(FixedClassifier), Arc::new(OneTarget), generator.clone())
                .with_store(store.clone()),
        );
        let book = CampaignBook::new(store, Arc::new(DryRunSender::new()));
        let follow_ups = FollowUpScheduler::new(book.clone(), generator, FollowUpConfig::default());
        let service = Arc::new(CampaignService::new(orchestrator, book, follow_ups));
        let sessions = Arc::new(SessionStore::new(Duration::from_secs(60)));
        let conversation = Arc::new(ConversationRouter::new(service.clone(), sessions));
        app(service, conversation)
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn blank_input_is_bad_request() {
        let response = test_app()
            .oneshot(post_json("/api/campaigns", json!({ "input": "   " })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(json["error"]["code"], "INVALID_REQUEST");
    }

    #[tokio::test]
    async fn create_returns_created_with_stats() {
        let response = test_app()
            .oneshot(post_json(
                "/api/campaigns",
                json!({ "input": "find 1 restaurant for a partnership" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let json = body_json(response).await;
        assert_eq!(json["success"], true);
        assert_eq!(json["stats"]["messages_generated"], 1);
        assert!(json["campaign_id"].is_string());
    }

    #[tokio::test]
    async fn unknown_message_is_not_found() {
        let uri = format!("/api/messages/{}/approve", uuid::Uuid::new_v4());
        let response = test_app()
            .oneshot(post_json(&uri, json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let json = body_json(response).await;
        assert_eq!(json["error"]["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn bad_export_format_is_rejected() {
        let uri = format!("/api/campaigns/{}/export?format=xml", uuid::Uuid::new_v4());
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let response = test_app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
