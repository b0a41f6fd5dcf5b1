// tests/api_tests.rs

mod common;

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap_or(Value::Null)
}

#[tokio::test]
async fn unknown_route_returns_404() {
    let app = common::offline_router();

    let response = app
        .oneshot(Request::get("/api/does-not-exist").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn protected_route_requires_token() {
    let app = common::offline_router();

    let response = app
        .oneshot(Request::get("/api/admin/exams").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["error"], "Authentication required");
}

#[tokio::test]
async fn forged_token_is_rejected() {
    let app = common::offline_router();

    let response = app
        .oneshot(
            Request::get("/api/attempts/1")
                .header("authorization", "Bearer not.a.jwt")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["error"], "Invalid token");
}

#[tokio::test]
async fn login_validation_runs_before_lookup() {
    let app = common::offline_router();

    let response = app
        .oneshot(
            Request::post("/api/auth/login")
                .header("content-type", "application/json")
                .body(Body::from(
                    json!({ "username": "", "password": "secret" }).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn login_with_wrong_password_fails() {
    let Some(app) = common::spawn_app().await else {
        return;
    };
    let (username, _) = app.seed_admin().await;

    let response = app.login(&username, "wrong_password", "internal").await;
    assert_eq!(response.status().as_u16(), 401);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "Invalid credentials");
}

#[tokio::test]
async fn admin_login_returns_profile() {
    let Some(app) = common::spawn_app().await else {
        return;
    };
    let (username, password) = app.seed_admin().await;

    let response = app.login(&username, &password, "internal").await;
    assert_eq!(response.status().as_u16(), 200);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["type"], "Bearer");
    assert_eq!(body["user_type"], "internal");
    assert_eq!(body["user"]["username"], username.as_str());
    assert!(body["user"].get("password").is_none());

    let token = body["token"].as_str().unwrap();
    let me: Value = app.get("/api/auth/me", token).await.json().await.unwrap();
    assert_eq!(me["username"], username.as_str());
}

#[tokio::test]
async fn taker_cannot_reach_admin_routes() {
    let Some(app) = common::spawn_app().await else {
        return;
    };
    let admin = app.admin_token().await;

    let reg = common::unique("T");
    app.post_ok(
        "/api/admin/takers",
        &admin,
        json!({ "reg": reg, "name": "Restricted Taker" }),
        201,
    )
    .await;

    let taker = app.login_token(&reg, &reg, "taker").await;

    let response = app.get("/api/admin/exams", &taker).await;
    assert_eq!(response.status().as_u16(), 403);

    let response = app.get("/api/taker/deliveries", &admin).await;
    assert_eq!(response.status().as_u16(), 403);
}

#[tokio::test]
async fn client_routes_need_a_tenant() {
    let Some(app) = common::spawn_app().await else {
        return;
    };
    let admin = app.admin_token().await;

    let response = app.get("/api/client/exams", &admin).await;
    assert_eq!(response.status().as_u16(), 400);

    let slug = format!("clinic-{}", &uuid::Uuid::new_v4().simple().to_string()[..8]);
    let client = app
        .post_ok(
            "/api/admin/clients",
            &admin,
            json!({ "name": "Test Clinic", "slug": slug }),
            201,
        )
        .await;
    let client_id = client["id"].as_i64().unwrap();

    let code = common::unique("CX");
    let created = app
        .client
        .post(app.url("/api/client/exams"))
        .bearer_auth(&admin)
        .header("x-client-slug", slug.as_str())
        .json(&json!({ "code": code, "name": "Clinic Exam" }))
        .send()
        .await
        .unwrap();
    assert_eq!(created.status().as_u16(), 201);
    let exam: Value = created.json().await.unwrap();
    assert_eq!(exam["client_id"].as_i64(), Some(client_id));

    let listed: Value = app
        .client
        .get(app.url("/api/client/exams"))
        .bearer_auth(&admin)
        .header("x-client-id", client_id.to_string())
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed["pagination"]["total"], 1);
    assert_eq!(listed["items"][0]["code"], code.as_str());

    // The public list exposes active tenants only.
    let public: Vec<Value> = app
        .client
        .get(app.url("/api/clients"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(public.iter().any(|c| c["slug"] == slug.as_str()));
    assert!(public.iter().all(|c| c.get("settings").is_none()));
}

#[tokio::test]
async fn duplicate_exam_code_conflicts() {
    let Some(app) = common::spawn_app().await else {
        return;
    };
    let admin = app.admin_token().await;
    let code = common::unique("EX");

    app.post_ok(
        "/api/admin/exams",
        &admin,
        json!({ "code": code, "name": "First" }),
        201,
    )
    .await;

    let response = app
        .post(
            "/api/admin/exams",
            &admin,
            json!({ "code": code, "name": "Second" }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 409);
}

#[tokio::test]
async fn scoped_token_cannot_cross_tenants() {
    let Some(app) = common::spawn_app().await else {
        return;
    };
    let admin = app.admin_token().await;
    let (client_a, _) = app.create_client(&admin).await;
    let (client_b, _) = app.create_client(&admin).await;
    let (username, password) = app.seed_user(Some(client_a)).await;

    let login = app
        .client
        .post(app.url("/api/auth/login-client"))
        .header("x-client-id", client_a.to_string())
        .json(&json!({ "username": username, "password": password }))
        .send()
        .await
        .unwrap();
    assert_eq!(login.status().as_u16(), 200);
    let body: Value = login.json().await.unwrap();
    let token = body["token"].as_str().unwrap().to_string();

    let exam = |client_id: i64| {
        app.client
            .post(app.url("/api/client/exams"))
            .bearer_auth(&token)
            .header("x-client-id", client_id.to_string())
            .json(&json!({ "code": common::unique("CX"), "name": "Scoped Exam" }))
            .send()
    };

    assert_eq!(exam(client_b).await.unwrap().status().as_u16(), 403);
    assert_eq!(exam(client_a).await.unwrap().status().as_u16(), 201);

    let listed = app
        .client
        .get(app.url("/api/client/exams"))
        .bearer_auth(&token)
        .header("x-client-id", client_b.to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(listed.status().as_u16(), 403);

    let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM exams WHERE client_id = $1")
        .bind(client_b)
        .fetch_one(&app.pool)
        .await
        .unwrap();
    assert_eq!(remaining, 0);
}

#[tokio::test]
async fn deleted_client_releases_its_slug() {
    let Some(app) = common::spawn_app().await else {
        return;
    };
    let admin = app.admin_token().await;
    let (id, slug) = app.create_client(&admin).await;

    let duplicate = app
        .post(
            "/api/admin/clients",
            &admin,
            json!({ "name": "Same Slug", "slug": slug }),
        )
        .await;
    assert_eq!(duplicate.status().as_u16(), 409);

    let deleted = app.delete(&format!("/api/admin/clients/{}", id), &admin).await;
    assert_eq!(deleted.status().as_u16(), 204);

    let recreated = app
        .post_ok(
            "/api/admin/clients",
            &admin,
            json!({ "name": "Reopened Clinic", "slug": slug }),
            201,
        )
        .await;
    assert_ne!(recreated["id"].as_i64(), Some(id));
}

#[tokio::test]
async fn question_cannot_move_into_choice_item_without_a_key() {
    let Some(app) = common::spawn_app().await else {
        return;
    };
    let admin = app.admin_token().await;

    let essay_item = app
        .post_ok(
            "/api/admin/items",
            &admin,
            json!({ "title": "Discharge letter", "type": "essay" }),
            201,
        )
        .await;
    let choice_item = app
        .post_ok(
            "/api/admin/items",
            &admin,
            json!({ "title": "ECG reading", "type": "multiple-choice" }),
            201,
        )
        .await;
    let choice_item_id = choice_item["id"].as_i64().unwrap();

    let essay = app
        .post_ok(
            "/api/admin/questions",
            &admin,
            json!({
                "item_id": essay_item["id"],
                "type": "essay",
                "question": "Write the discharge summary."
            }),
            201,
        )
        .await;

    let moved = app
        .put(
            &format!("/api/admin/questions/{}", essay["id"]),
            &admin,
            json!({ "item_id": choice_item_id }),
        )
        .await;
    assert_eq!(moved.status().as_u16(), 400);

    let item_id: i64 = sqlx::query_scalar("SELECT item_id FROM questions WHERE id = $1")
        .bind(essay["id"].as_i64().unwrap())
        .fetch_one(&app.pool)
        .await
        .unwrap();
    assert_eq!(Some(item_id), essay_item["id"].as_i64());

    // A keyed question may move between choice items without resending answers
    let keyed = app
        .post_ok(
            "/api/admin/questions",
            &admin,
            json!({
                "item_id": choice_item_id,
                "type": "single-answer",
                "question": "Rhythm?",
                "answers": [
                    { "answer": "Sinus", "is_correct_answer": true },
                    { "answer": "AF" }
                ]
            }),
            201,
        )
        .await;
    let other_choice = app
        .post_ok(
            "/api/admin/items",
            &admin,
            json!({ "title": "ECG reading 2", "type": "multiple-choice" }),
            201,
        )
        .await;
    let moved = app
        .put(
            &format!("/api/admin/questions/{}", keyed["id"]),
            &admin,
            json!({ "item_id": other_choice["id"] }),
        )
        .await;
    assert_eq!(moved.status().as_u16(), 200);
}
