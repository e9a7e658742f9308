// ABOUTME: Integration tests for the endpoint registry lifecycle.
// ABOUTME: Uses the simulated environment with scriptable mock agents.

use chorus_agent::MockAgent;
use chorus_core::testing::SimEnvironment;
use chorus_core::{
    DispatchError, EndpointRegistry, Environment, FailureKind, ProviderDirectory,
};
use std::sync::Arc;
use std::time::Duration;

fn setup() -> (Arc<SimEnvironment>, EndpointRegistry<SimEnvironment>) {
    let directory = ProviderDirectory::builtin();
    let env = Arc::new(SimEnvironment::new(directory.clone()));
    env.register_agent("claude", || Box::new(MockAgent::new("claude")));
    env.register_agent("chatgpt", || Box::new(MockAgent::new("chatgpt")));
    let registry = EndpointRegistry::new(Arc::clone(&env), directory);
    (env, registry)
}

#[tokio::test]
async fn test_ensure_reuses_tracked_endpoint() {
    let (env, registry) = setup();

    let first = registry.ensure("claude", false).await.unwrap();
    let second = registry.ensure("claude", false).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(env.context_count(), 1);
}

#[tokio::test]
async fn test_ensure_recovers_from_stale_endpoint() {
    let (env, registry) = setup();

    let first = registry.ensure("claude", false).await.unwrap();
    env.close_context(first);

    let second = registry.ensure("claude", false).await.unwrap();
    assert_ne!(first, second);
    assert_eq!(env.context_count(), 1);
    assert_eq!(registry.tracked_context("claude"), Some(second));
}

#[tokio::test]
async fn test_ensure_adopts_already_open_context() {
    let (env, registry) = setup();

    let open = env
        .open("https://claude.ai/chat/abc123", true)
        .await
        .unwrap();

    let ensured = registry.ensure("claude", false).await.unwrap();
    assert_eq!(ensured, open);
    assert_eq!(env.context_count(), 1);
    assert_eq!(env.focused(), Some(open));
}

#[tokio::test]
async fn test_ensure_creates_in_background_without_stealing_focus() {
    let (env, registry) = setup();

    let ctx = registry.ensure("claude", false).await.unwrap();

    assert_eq!(env.is_background(ctx), Some(true));
    assert_eq!(env.focused(), None);
}

#[tokio::test]
async fn test_fresh_session_navigates_and_marks_not_ready() {
    let (env, registry) = setup();

    let ctx = registry.ensure("claude", false).await.unwrap();
    registry.update_status("claude", true, true);
    assert!(registry.status_of("claude").is_ready);

    let fresh = registry.ensure("claude", true).await.unwrap();
    assert_eq!(fresh, ctx);
    assert_eq!(
        env.url_of(ctx).await.as_deref(),
        Some("https://claude.ai/new")
    );
    assert!(!registry.status_of("claude").is_ready);
    assert_eq!(env.context_count(), 1);
}

#[tokio::test]
async fn test_fresh_session_creates_when_none_tracked() {
    let (env, registry) = setup();

    let ctx = registry.ensure("claude", true).await.unwrap();

    assert_eq!(
        env.url_of(ctx).await.as_deref(),
        Some("https://claude.ai/new")
    );
    assert_eq!(registry.tracked_context("claude"), Some(ctx));
}

#[tokio::test]
async fn test_creation_failure_is_distinguishable() {
    let (env, registry) = setup();
    env.refuse_opens(true);

    let err = registry.ensure("claude", false).await.unwrap_err();
    let dispatch = err.downcast_ref::<DispatchError>().unwrap();
    assert_eq!(dispatch.kind, FailureKind::EndpointCreationFailed);
}

#[tokio::test]
async fn test_ensure_unknown_provider_fails() {
    let (_env, registry) = setup();
    assert!(registry.ensure("telepathy", false).await.is_err());
}

#[tokio::test]
async fn test_update_status_untracked_is_noop() {
    let (_env, registry) = setup();

    registry.update_status("claude", true, true);

    let status = registry.status_of("claude");
    assert!(!status.is_connected);
    assert!(!status.is_ready);
    assert_eq!(status.context, None);
}

#[tokio::test]
async fn test_context_close_removes_tracking() {
    let (_env, registry) = setup();

    let ctx = registry.ensure("claude", false).await.unwrap();
    assert!(registry.status_of("claude").is_connected);

    registry.on_context_closed(ctx);
    assert!(!registry.status_of("claude").is_connected);

    // Closing an unknown context is harmless.
    registry.on_context_closed(9999);
}

#[tokio::test]
async fn test_navigation_adopts_and_releases_contexts() {
    let (env, registry) = setup();

    let ctx = env.open("about:blank", true).await.unwrap();
    registry
        .on_navigation_committed(ctx, "https://chatgpt.com/c/1")
        .await;
    assert_eq!(registry.tracked_context("chatgpt"), Some(ctx));

    registry
        .on_navigation_committed(ctx, "https://news.example.com/")
        .await;
    assert_eq!(registry.tracked_context("chatgpt"), None);
}

#[tokio::test]
async fn test_await_ready_polls_until_ready() {
    let directory = ProviderDirectory::builtin();
    let env = Arc::new(SimEnvironment::new(directory.clone()));
    env.register_agent("claude", || Box::new(MockAgent::new("claude").ready_after(2)));
    let registry = EndpointRegistry::new(Arc::clone(&env), directory);

    registry.ensure("claude", false).await.unwrap();
    registry
        .await_ready("claude", Duration::from_millis(10), Duration::from_secs(1))
        .await
        .unwrap();

    assert!(registry.status_of("claude").is_ready);
}

#[tokio::test]
async fn test_await_ready_times_out_as_not_ready() {
    let directory = ProviderDirectory::builtin();
    let env = Arc::new(SimEnvironment::new(directory.clone()));
    env.register_agent("claude", || {
        Box::new(MockAgent::new("claude").ready_after(10_000))
    });
    let registry = EndpointRegistry::new(Arc::clone(&env), directory);

    registry.ensure("claude", false).await.unwrap();
    let err = registry
        .await_ready(
            "claude",
            Duration::from_millis(10),
            Duration::from_millis(50),
        )
        .await
        .unwrap_err();

    let dispatch = err.downcast_ref::<DispatchError>().unwrap();
    assert_eq!(dispatch.kind, FailureKind::ProviderNotReady);
}

#[tokio::test]
async fn test_probe_untracked_reports_stale() {
    let (_env, registry) = setup();

    let err = registry.probe("claude").await.unwrap_err();
    let dispatch = err.downcast_ref::<DispatchError>().unwrap();
    assert_eq!(dispatch.kind, FailureKind::StaleEndpoint);
}
