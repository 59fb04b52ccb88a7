//! Action dispatch against a loopback HTTP server: status
//! classification, timeouts, and email modes.

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::time::Duration;

use serde_json::json;

use sluice_core::action::{Action, LogLevel, WebhookMethod};
use sluice_engine::{ActionDispatcher, EmailMode};

async fn spawn_server(status: u16, delay: Option<Duration>) -> SocketAddr {
    let app = axum::Router::new().route(
        "/hook",
        axum::routing::any(move || async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            axum::http::StatusCode::from_u16(status).unwrap()
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(axum::serve(listener, app).into_future());
    addr
}

fn webhook(addr: SocketAddr) -> Action {
    Action::CallWebhook {
        url: format!("http://{addr}/hook"),
        method: WebhookMethod::Post,
        headers: Some(
            [("x-test".to_string(), "1".to_string())]
                .into_iter()
                .collect(),
        ),
        body: Some(json!({"hello": "world"})),
    }
}

#[tokio::test]
async fn webhook_2xx_is_success() {
    let addr = spawn_server(204, None).await;
    let dispatcher = ActionDispatcher::new(Duration::from_secs(5), EmailMode::Disabled);
    dispatcher.dispatch(&webhook(addr)).await.unwrap();
}

#[tokio::test]
async fn webhook_500_reports_the_status() {
    let addr = spawn_server(500, None).await;
    let dispatcher = ActionDispatcher::new(Duration::from_secs(5), EmailMode::Disabled);
    let err = dispatcher.dispatch(&webhook(addr)).await.unwrap_err();
    assert_eq!(err.kind(), "action-failed");
    assert!(err.to_string().contains("Webhook failed with status 500"));
}

#[tokio::test]
async fn webhook_slow_endpoint_times_out() {
    let addr = spawn_server(200, Some(Duration::from_secs(5))).await;
    let dispatcher = ActionDispatcher::new(Duration::from_millis(200), EmailMode::Disabled);
    let err = dispatcher.dispatch(&webhook(addr)).await.unwrap_err();
    assert_eq!(err.kind(), "timeout");
    assert!(err.to_string().contains("Webhook timed out"));
}

#[tokio::test]
async fn webhook_transport_error_is_action_failed() {
    // Bind then drop the listener, leaving a port with nothing behind it.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let dispatcher = ActionDispatcher::new(Duration::from_secs(2), EmailMode::Disabled);
    let err = dispatcher.dispatch(&webhook(addr)).await.unwrap_err();
    assert_eq!(err.kind(), "action-failed");
    assert!(err.to_string().contains("Webhook request failed"));
}

#[tokio::test]
async fn email_in_log_mode_succeeds() {
    let dispatcher = ActionDispatcher::new(Duration::from_secs(1), EmailMode::Log);
    dispatcher
        .dispatch(&Action::SendEmail {
            to: "ops@example.com".to_string(),
            subject: "order received".to_string(),
            template: "receipt".to_string(),
            data: Some(json!({"order": 7})),
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn email_while_disabled_fails_as_not_implemented() {
    let dispatcher = ActionDispatcher::new(Duration::from_secs(1), EmailMode::Disabled);
    let err = dispatcher
        .dispatch(&Action::SendEmail {
            to: "ops@example.com".to_string(),
            subject: "s".to_string(),
            template: "t".to_string(),
            data: None,
        })
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "action-failed");
    assert!(err.to_string().contains("not implemented"));
}

#[tokio::test]
async fn log_and_noop_always_succeed() {
    let dispatcher = ActionDispatcher::new(Duration::from_secs(1), EmailMode::Disabled);
    dispatcher.dispatch(&Action::Noop).await.unwrap();
    dispatcher
        .dispatch(&Action::Log {
            level: LogLevel::Warn,
            message: "matched".to_string(),
        })
        .await
        .unwrap();
}
