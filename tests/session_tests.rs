// tests/session_tests.rs

mod common;

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};

use common::TestApp;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn connect(app: &TestApp) -> Socket {
    let (socket, _) = connect_async(app.ws_url())
        .await
        .expect("Failed to open session socket");
    socket
}

async fn send(socket: &mut Socket, text: String) {
    socket.send(Message::text(text)).await.unwrap();
}

/// Next JSON frame, or `None` once the server has closed the socket.
async fn recv(socket: &mut Socket) -> Option<Value> {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), socket.next())
            .await
            .expect("Timed out waiting for a socket frame")?;

        match frame {
            Ok(Message::Text(text)) => return Some(serde_json::from_str(text.as_str()).unwrap()),
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => continue,
        }
    }
}

async fn auth(socket: &mut Socket, token: &str) -> Value {
    send(socket, json!({ "type": "auth", "token": token }).to_string()).await;
    recv(socket).await.expect("Socket closed during auth")
}

async fn new_taker(app: &TestApp) -> String {
    let admin = app.admin_token().await;
    let reg = common::unique("T");
    app.post_ok(
        "/api/admin/takers",
        &admin,
        json!({ "reg": reg, "name": "Socket Taker" }),
        201,
    )
    .await;
    reg
}

#[tokio::test]
async fn second_login_invalidates_first_token() {
    let Some(app) = common::spawn_app().await else {
        return;
    };
    let admin = app.admin_token().await;

    let reg = common::unique("T");
    app.post_ok(
        "/api/admin/takers",
        &admin,
        json!({ "reg": reg, "name": "Session Taker", "password": "s3cret-pass" }),
        201,
    )
    .await;

    let first = app.login_token(&reg, "s3cret-pass", "taker").await;
    assert_eq!(app.get("/api/auth/me", &first).await.status().as_u16(), 200);

    let second = app.login_token(&reg, "s3cret-pass", "taker").await;
    assert_ne!(first, second);

    let stale = app.get("/api/auth/me", &first).await;
    assert_eq!(stale.status().as_u16(), 401);
    let body: Value = stale.json().await.unwrap();
    assert_eq!(body["error"], "Session expired");

    let session: Value = app
        .get("/api/auth/session", &second)
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(session["user"]["reg"], reg.as_str());
    assert_eq!(session["session"]["token"], second.as_str());
    assert_eq!(session["session"]["user_type"], "taker");
}

#[tokio::test]
async fn logout_ends_the_session() {
    let Some(app) = common::spawn_app().await else {
        return;
    };
    let (username, password) = app.seed_admin().await;
    let token = app.login_token(&username, &password, "internal").await;

    let response = app.post("/api/auth/logout", &token, json!({})).await;
    assert_eq!(response.status().as_u16(), 200);

    let response = app.get("/api/admin/exams", &token).await;
    assert_eq!(response.status().as_u16(), 401);

    // Logging in again works and issues a fresh session
    let token = app.login_token(&username, &password, "internal").await;
    assert_eq!(app.get("/api/admin/exams", &token).await.status().as_u16(), 200);
}

#[tokio::test]
async fn inactive_taker_cannot_log_in() {
    let Some(app) = common::spawn_app().await else {
        return;
    };
    let admin = app.admin_token().await;

    let reg = common::unique("T");
    app.post_ok(
        "/api/admin/takers",
        &admin,
        json!({ "reg": reg, "name": "Suspended Taker", "status": "inactive" }),
        201,
    )
    .await;

    let response = app.login(&reg, &reg, "taker").await;
    assert_eq!(response.status().as_u16(), 401);
}

#[tokio::test]
async fn socket_authenticates_and_answers_pings() {
    let Some(app) = common::spawn_app().await else {
        return;
    };
    let reg = new_taker(&app).await;
    let token = app.login_token(&reg, &reg, "taker").await;

    let mut socket = connect(&app).await;

    send(&mut socket, "not json".to_string()).await;
    let reply = recv(&mut socket).await.unwrap();
    assert_eq!(reply["type"], "error");
    assert_eq!(reply["message"], "Invalid message format");

    send(&mut socket, json!({ "type": "ping" }).to_string()).await;
    assert_eq!(recv(&mut socket).await.unwrap()["type"], "pong");

    let reply = auth(&mut socket, &token).await;
    assert_eq!(reply["type"], "auth_success");
    assert_eq!(reply["userType"], "taker");
    assert!(reply["userId"].as_str().is_some());
}

#[tokio::test]
async fn relogin_pushes_force_logout_and_closes() {
    let Some(app) = common::spawn_app().await else {
        return;
    };
    let reg = new_taker(&app).await;
    let token = app.login_token(&reg, &reg, "taker").await;

    let mut socket = connect(&app).await;
    assert_eq!(auth(&mut socket, &token).await["type"], "auth_success");

    app.login_token(&reg, &reg, "taker").await;

    let pushed = recv(&mut socket).await.unwrap();
    assert_eq!(pushed["type"], "force_logout");
    assert!(recv(&mut socket).await.is_none());
}

#[tokio::test]
async fn stale_token_gets_invalid_session_and_close() {
    let Some(app) = common::spawn_app().await else {
        return;
    };
    let reg = new_taker(&app).await;
    let stale = app.login_token(&reg, &reg, "taker").await;
    app.login_token(&reg, &reg, "taker").await;

    let mut socket = connect(&app).await;
    let reply = auth(&mut socket, &stale).await;
    assert_eq!(reply["type"], "error");
    assert_eq!(reply["message"], "Invalid session");
    assert!(recv(&mut socket).await.is_none());
}

#[tokio::test]
async fn closing_a_replaced_socket_keeps_its_replacement() {
    let Some(app) = common::spawn_app().await else {
        return;
    };
    let reg = new_taker(&app).await;
    let token = app.login_token(&reg, &reg, "taker").await;

    let mut first = connect(&app).await;
    assert_eq!(auth(&mut first, &token).await["type"], "auth_success");

    let mut second = connect(&app).await;
    assert_eq!(auth(&mut second, &token).await["type"], "auth_success");

    // The first socket is evicted and fully closed
    assert_eq!(recv(&mut first).await.unwrap()["type"], "force_logout");
    assert!(recv(&mut first).await.is_none());

    send(&mut second, json!({ "type": "ping" }).to_string()).await;
    assert_eq!(recv(&mut second).await.unwrap()["type"], "pong");

    // Still registered: a new login reaches it
    app.login_token(&reg, &reg, "taker").await;
    assert_eq!(recv(&mut second).await.unwrap()["type"], "force_logout");
}
