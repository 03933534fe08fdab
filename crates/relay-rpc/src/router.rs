//! Resource/action tables and the request dispatch state machine.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use metrics::{counter, histogram};
use relay_core::envelope::{Envelope, EnvelopeKind};
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::context::HubContext;
use crate::errors::{self, ActionError};

/// Trait implemented by every action handler.
///
/// A handler receives the request's payload mapping (including the `action`
/// field) and returns the response payload, or a typed failure that becomes
/// an error envelope.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    /// Execute the operation.
    async fn handle(&self, payload: Value, ctx: &HubContext) -> Result<Value, ActionError>;
}

type ResourceTable = HashMap<String, Arc<dyn ActionHandler>>;

/// Per-resource action tables with string-keyed dispatch.
///
/// Tables are built as plain data during startup wiring and frozen behind an
/// `Arc` before the hub accepts connections; unknown resource/action keys
/// funnel through a single error path in [`HandlerRouter::dispatch`].
pub struct HandlerRouter {
    resources: HashMap<String, ResourceTable>,
}

impl HandlerRouter {
    /// Create an empty router.
    pub fn new() -> Self {
        Self {
            resources: HashMap::new(),
        }
    }

    /// Register a handler for a resource/action pair.
    pub fn register(
        &mut self,
        resource: &str,
        action: &str,
        handler: impl ActionHandler + 'static,
    ) {
        let _ = self
            .resources
            .entry(resource.to_owned())
            .or_default()
            .insert(action.to_owned(), Arc::new(handler));
    }

    /// Check whether a resource has any handlers.
    pub fn has_resource(&self, resource: &str) -> bool {
        self.resources.contains_key(resource)
    }

    /// Check whether a resource/action pair is registered.
    pub fn has_action(&self, resource: &str, action: &str) -> bool {
        self.resources
            .get(resource)
            .is_some_and(|t| t.contains_key(action))
    }

    /// List registered resource names (sorted).
    pub fn resources(&self) -> Vec<String> {
        let mut names: Vec<String> = self.resources.keys().cloned().collect();
        names.sort();
        names
    }

    /// List registered actions for a resource (sorted).
    pub fn actions(&self, resource: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .resources
            .get(resource)
            .map(|t| t.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    /// Maximum time a single action handler is allowed to run.
    const HANDLER_TIMEOUT: Duration = Duration::from_secs(60);

    /// Handle one incoming frame.
    ///
    /// Returns `None` for client heartbeat envelopes (activity is stamped by
    /// the caller, no reply is owed) and `Some(response-or-error)` for
    /// everything else. Malformed input yields an `invalid_json` error
    /// correlated to the best-effort id extracted from the raw frame, with
    /// `"unknown"` as the fallback — never a silent drop, never a dropped
    /// connection.
    #[instrument(skip_all, fields(resource, action))]
    pub async fn dispatch_message(&self, raw: &str, ctx: &HubContext) -> Option<Envelope> {
        let envelope: Envelope = match serde_json::from_str(raw) {
            Ok(e) => e,
            Err(e) => {
                warn!("invalid frame received");
                let id = best_effort_id(raw);
                return Some(Envelope::error(
                    id,
                    errors::INVALID_JSON,
                    format!("Invalid envelope: {e}"),
                ));
            }
        };

        match envelope.kind {
            EnvelopeKind::Heartbeat => None,
            EnvelopeKind::Request => Some(self.dispatch(envelope, ctx).await),
            _ => Some(Envelope::error(
                envelope.id,
                errors::INVALID_JSON,
                "Only request and heartbeat envelopes are accepted from clients",
            )),
        }
    }

    /// Route a parsed request envelope to its handler.
    pub async fn dispatch(&self, request: Envelope, ctx: &HubContext) -> Envelope {
        let id = request.id.clone();

        let Some(resource) = request.resource.clone() else {
            return Envelope::error(
                id,
                errors::MISSING_RESOURCE,
                "Request is missing the 'resource' routing key",
            );
        };
        let _ = tracing::Span::current().record("resource", resource.as_str());

        let Some(action) = request.action().map(ToOwned::to_owned) else {
            return Envelope::error(
                id,
                errors::MISSING_ACTION,
                "Request payload is missing the 'action' string",
            );
        };
        let _ = tracing::Span::current().record("action", action.as_str());
        debug!(resource, action, id, "dispatching request");

        counter!("hub_requests_total", "resource" => resource.clone(), "action" => action.clone())
            .increment(1);

        let Some(table) = self.resources.get(&resource) else {
            counter!("hub_errors_total", "error_type" => errors::UNKNOWN_RESOURCE.to_owned())
                .increment(1);
            return Envelope::error(
                id,
                errors::UNKNOWN_RESOURCE,
                format!("Resource '{resource}' not found"),
            );
        };

        let Some(handler) = table.get(&action) else {
            counter!("hub_errors_total", "error_type" => errors::UNKNOWN_ACTION.to_owned())
                .increment(1);
            return Envelope::error(
                id,
                errors::UNKNOWN_ACTION,
                format!("Action '{action}' not found on resource '{resource}'"),
            );
        };

        let start = std::time::Instant::now();
        let result = tokio::time::timeout(
            Self::HANDLER_TIMEOUT,
            handler.handle(request.payload, ctx),
        )
        .await;

        let response = match result {
            Ok(Ok(result)) => Envelope::response(id, result),
            Ok(Err(err)) => {
                counter!("hub_errors_total", "error_type" => err.code().to_owned()).increment(1);
                Envelope::from_error_body(id, err.to_error_body())
            }
            Err(_elapsed) => {
                counter!("hub_errors_total", "error_type" => "timeout".to_owned()).increment(1);
                tracing::error!(
                    resource,
                    action,
                    "handler timed out after {:?}",
                    Self::HANDLER_TIMEOUT
                );
                Envelope::error(
                    id,
                    errors::INTERNAL_ERROR,
                    format!("Handler for '{resource}.{action}' timed out"),
                )
            }
        };

        let duration = start.elapsed();
        histogram!("hub_request_duration_seconds", "resource" => resource.clone())
            .record(duration.as_secs_f64());
        if duration.as_secs() >= 5 {
            warn!(
                resource,
                action,
                duration_secs = duration.as_secs_f64(),
                "slow request"
            );
        }

        response
    }
}

impl Default for HandlerRouter {
    fn default() -> Self {
        Self::new()
    }
}

/// Pull a usable correlation id out of an arbitrary raw frame.
fn best_effort_id(raw: &str) -> String {
    serde_json::from_str::<Value>(raw)
        .ok()
        .and_then(|v| v.get("id").and_then(Value::as_str).map(ToOwned::to_owned))
        .unwrap_or_else(|| "unknown".to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::dispatch::EventDispatcher;
    use serde_json::json;

    // ── Test handlers ───────────────────────────────────────────────

    struct EchoHandler;

    #[async_trait]
    impl ActionHandler for EchoHandler {
        async fn handle(&self, payload: Value, _ctx: &HubContext) -> Result<Value, ActionError> {
            Ok(payload)
        }
    }

    struct FailHandler;

    #[async_trait]
    impl ActionHandler for FailHandler {
        async fn handle(&self, _payload: Value, _ctx: &HubContext) -> Result<Value, ActionError> {
            Err(ActionError::Execution {
                message: "store rejected the write".into(),
            })
        }
    }

    struct SlowHandler {
        delay: Duration,
    }

    #[async_trait]
    impl ActionHandler for SlowHandler {
        async fn handle(&self, _payload: Value, _ctx: &HubContext) -> Result<Value, ActionError> {
            tokio::time::sleep(self.delay).await;
            Ok(json!("done"))
        }
    }

    fn make_ctx() -> HubContext {
        HubContext::new(Arc::new(EventDispatcher::builder().build()))
    }

    fn router_with_echo() -> HandlerRouter {
        let mut router = HandlerRouter::new();
        router.register("messages", "send", EchoHandler);
        router
    }

    fn error_code(env: &Envelope) -> String {
        env.payload["code"].as_str().unwrap_or_default().to_owned()
    }

    // ── dispatch_message parsing ────────────────────────────────────

    #[tokio::test]
    async fn invalid_json_returns_error_with_unknown_id() {
        let router = router_with_echo();
        let ctx = make_ctx();
        let resp = router.dispatch_message("not json at all", &ctx).await.unwrap();
        assert_eq!(resp.kind, EnvelopeKind::Error);
        assert_eq!(resp.id, "unknown");
        assert_eq!(error_code(&resp), "invalid_json");
    }

    #[tokio::test]
    async fn invalid_envelope_keeps_best_effort_id() {
        let router = router_with_echo();
        let ctx = make_ctx();
        // Valid JSON, invalid envelope (bad type), id recoverable.
        let raw = r#"{"type": "subscribe", "id": "r9", "payload": {}}"#;
        let resp = router.dispatch_message(raw, &ctx).await.unwrap();
        assert_eq!(resp.id, "r9");
        assert_eq!(error_code(&resp), "invalid_json");
    }

    #[tokio::test]
    async fn heartbeat_produces_no_response() {
        let router = router_with_echo();
        let ctx = make_ctx();
        let raw = serde_json::to_string(&Envelope::heartbeat()).unwrap();
        assert!(router.dispatch_message(&raw, &ctx).await.is_none());
    }

    #[tokio::test]
    async fn non_request_kind_is_rejected() {
        let router = router_with_echo();
        let ctx = make_ctx();
        let raw = r#"{"type": "response", "id": "r1", "payload": {}}"#;
        let resp = router.dispatch_message(raw, &ctx).await.unwrap();
        assert_eq!(error_code(&resp), "invalid_json");
        assert_eq!(resp.id, "r1");
    }

    // ── Routing state machine ───────────────────────────────────────

    #[tokio::test]
    async fn valid_request_dispatches() {
        let router = router_with_echo();
        let ctx = make_ctx();
        let raw = r#"{"type": "request", "id": "r1", "resource": "messages",
                      "payload": {"action": "send", "text": "hi"}}"#;
        let resp = router.dispatch_message(raw, &ctx).await.unwrap();
        assert_eq!(resp.kind, EnvelopeKind::Response);
        assert_eq!(resp.id, "r1");
        assert_eq!(resp.payload["text"], "hi");
    }

    #[tokio::test]
    async fn missing_resource_code() {
        let router = router_with_echo();
        let ctx = make_ctx();
        let raw = r#"{"type": "request", "id": "r2", "payload": {"action": "send"}}"#;
        let resp = router.dispatch_message(raw, &ctx).await.unwrap();
        assert_eq!(error_code(&resp), "missing_resource");
        assert_eq!(resp.id, "r2");
    }

    #[tokio::test]
    async fn missing_action_code() {
        let router = router_with_echo();
        let ctx = make_ctx();
        let raw = r#"{"type": "request", "id": "r3", "resource": "messages", "payload": {}}"#;
        let resp = router.dispatch_message(raw, &ctx).await.unwrap();
        assert_eq!(error_code(&resp), "missing_action");
    }

    #[tokio::test]
    async fn unknown_resource_code() {
        let router = router_with_echo();
        let ctx = make_ctx();
        let raw = r#"{"type": "request", "id": "r4", "resource": "nonexistent",
                      "payload": {"action": "send"}}"#;
        let resp = router.dispatch_message(raw, &ctx).await.unwrap();
        assert_eq!(error_code(&resp), "unknown_resource");
        assert!(resp.payload["message"].as_str().unwrap().contains("nonexistent"));
    }

    #[tokio::test]
    async fn unknown_action_code() {
        let router = router_with_echo();
        let ctx = make_ctx();
        let raw = r#"{"type": "request", "id": "r5", "resource": "messages",
                      "payload": {"action": "nope"}}"#;
        let resp = router.dispatch_message(raw, &ctx).await.unwrap();
        assert_eq!(error_code(&resp), "unknown_action");
    }

    #[tokio::test]
    async fn handler_failure_becomes_error_envelope() {
        let mut router = HandlerRouter::new();
        router.register("leads", "qualify", FailHandler);
        let ctx = make_ctx();
        let raw = r#"{"type": "request", "id": "r6", "resource": "leads",
                      "payload": {"action": "qualify"}}"#;
        let resp = router.dispatch_message(raw, &ctx).await.unwrap();
        assert_eq!(resp.kind, EnvelopeKind::Error);
        assert_eq!(error_code(&resp), "action_execution_error");
        assert_eq!(resp.id, "r6");
    }

    #[tokio::test]
    async fn custom_error_code_passes_through() {
        struct NotFoundHandler;

        #[async_trait]
        impl ActionHandler for NotFoundHandler {
            async fn handle(
                &self,
                _payload: Value,
                _ctx: &HubContext,
            ) -> Result<Value, ActionError> {
                Err(ActionError::Custom {
                    code: "lead_not_found".into(),
                    message: "no such lead".into(),
                    details: Some(json!({"lead_id": "l1"})),
                })
            }
        }

        let mut router = HandlerRouter::new();
        router.register("leads", "get", NotFoundHandler);
        let ctx = make_ctx();
        let raw = r#"{"type": "request", "id": "r7", "resource": "leads",
                      "payload": {"action": "get", "lead_id": "l1"}}"#;
        let resp = router.dispatch_message(raw, &ctx).await.unwrap();
        assert_eq!(error_code(&resp), "lead_not_found");
        assert_eq!(resp.payload["details"]["lead_id"], "l1");
    }

    #[tokio::test]
    async fn correlation_is_preserved_per_request() {
        let router = router_with_echo();
        let ctx = make_ctx();

        let r1 = r#"{"type": "request", "id": "alpha", "resource": "messages",
                     "payload": {"action": "send", "n": 1}}"#;
        let r2 = r#"{"type": "request", "id": "beta", "resource": "messages",
                     "payload": {"action": "send", "n": 2}}"#;
        let resp1 = router.dispatch_message(r1, &ctx).await.unwrap();
        let resp2 = router.dispatch_message(r2, &ctx).await.unwrap();

        assert_eq!(resp1.id, "alpha");
        assert_eq!(resp1.payload["n"], 1);
        assert_eq!(resp2.id, "beta");
        assert_eq!(resp2.payload["n"], 2);
    }

    #[tokio::test]
    async fn dispatch_timeout_returns_internal_error() {
        tokio::time::pause();

        let mut router = HandlerRouter::new();
        router.register(
            "slow",
            "wait",
            SlowHandler {
                delay: Duration::from_secs(120),
            },
        );
        let ctx = make_ctx();
        let raw = r#"{"type": "request", "id": "r8", "resource": "slow",
                      "payload": {"action": "wait"}}"#;
        let resp = router.dispatch_message(raw, &ctx).await.unwrap();
        assert_eq!(error_code(&resp), "internal_error");
        assert!(resp.payload["message"].as_str().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn fast_handler_unaffected_by_timeout() {
        let mut router = HandlerRouter::new();
        router.register(
            "fast",
            "go",
            SlowHandler {
                delay: Duration::from_millis(1),
            },
        );
        let ctx = make_ctx();
        let raw = r#"{"type": "request", "id": "r9", "resource": "fast",
                      "payload": {"action": "go"}}"#;
        let resp = router.dispatch_message(raw, &ctx).await.unwrap();
        assert_eq!(resp.kind, EnvelopeKind::Response);
    }

    // ── Table introspection ─────────────────────────────────────────

    #[test]
    fn register_and_introspect() {
        let mut router = HandlerRouter::new();
        router.register("messages", "send", EchoHandler);
        router.register("messages", "list", EchoHandler);
        router.register("leads", "qualify", FailHandler);

        assert!(router.has_resource("messages"));
        assert!(!router.has_resource("meetings"));
        assert!(router.has_action("messages", "send"));
        assert!(!router.has_action("messages", "delete"));
        assert_eq!(router.resources(), vec!["leads", "messages"]);
        assert_eq!(router.actions("messages"), vec!["list", "send"]);
        assert!(router.actions("meetings").is_empty());
    }

    #[tokio::test]
    async fn register_overwrites_previous() {
        let mut router = HandlerRouter::new();
        router.register("messages", "send", EchoHandler);
        router.register("messages", "send", FailHandler);
        let ctx = make_ctx();
        let raw = r#"{"type": "request", "id": "r1", "resource": "messages",
                      "payload": {"action": "send"}}"#;
        let resp = router.dispatch_message(raw, &ctx).await.unwrap();
        assert_eq!(resp.kind, EnvelopeKind::Error);
    }

    #[test]
    fn default_router_is_empty() {
        let router = HandlerRouter::default();
        assert!(router.resources().is_empty());
    }

    // ── Handlers announcing events ──────────────────────────────────

    #[tokio::test]
    async fn handler_can_dispatch_events() {
        use relay_core::dispatch::{EventListener, ListenerError};
        use tokio::sync::mpsc;

        struct Recorder {
            tx: mpsc::UnboundedSender<Value>,
        }

        #[async_trait]
        impl EventListener for Recorder {
            async fn handle(&self, data: Arc<Value>) -> Result<(), ListenerError> {
                self.tx.send((*data).clone())?;
                Ok(())
            }
        }

        struct SendMessageHandler;

        #[async_trait]
        impl ActionHandler for SendMessageHandler {
            async fn handle(
                &self,
                payload: Value,
                ctx: &HubContext,
            ) -> Result<Value, ActionError> {
                // Announce after doing the work.
                ctx.dispatcher
                    .dispatch("new_message", json!({"text": payload["text"]}))
                    .await;
                Ok(json!({"delivered": true}))
            }
        }

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut builder = EventDispatcher::builder();
        builder.register_listener("new_message", Recorder { tx });
        let ctx = HubContext::new(Arc::new(builder.build()));

        let mut router = HandlerRouter::new();
        router.register("messages", "send", SendMessageHandler);

        let raw = r#"{"type": "request", "id": "r1", "resource": "messages",
                      "payload": {"action": "send", "text": "hello"}}"#;
        let resp = router.dispatch_message(raw, &ctx).await.unwrap();
        assert_eq!(resp.payload["delivered"], true);
        assert_eq!(rx.recv().await.unwrap()["text"], "hello");
    }
}
