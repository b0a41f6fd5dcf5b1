// src/routes.rs

use axum::{
    Router,
    http::{HeaderName, HeaderValue, Method, header},
    middleware,
    routing::{delete, get, post},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    handlers::{
        attempts, auth, categories, clients, deliveries, exams, groups, items, questions, reports,
        scoring, settings, takers, ws,
    },
    state::AppState,
    utils::{
        jwt::{auth_middleware, internal_middleware, taker_middleware},
        tenant::{CLIENT_ID_HEADER, CLIENT_SLUG_HEADER},
    },
};

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin: {}", origin);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            HeaderName::from_static(CLIENT_ID_HEADER),
            HeaderName::from_static(CLIENT_SLUG_HEADER),
        ])
}

/// Assembles the main application router.
///
/// * Public: login, client list, session socket.
/// * Authenticated: session info, logout.
/// * Internal only: admin and client-scoped routes.
/// * Taker only: deliveries and attempts.
pub fn create_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.cors_origins);

    let auth_routes = Router::new()
        .route("/login", post(auth::login))
        .route("/login-client", post(auth::login_client))
        .merge(
            Router::new()
                .route("/logout", post(auth::logout))
                .route("/me", get(auth::me))
                .route("/session", get(auth::session))
                .layer(middleware::from_fn_with_state(
                    state.clone(),
                    auth_middleware,
                )),
        );

    let admin_routes = Router::new()
        .route(
            "/clients",
            get(clients::list_clients).post(clients::create_client),
        )
        .route(
            "/clients/{id}",
            get(clients::get_client)
                .put(clients::update_client)
                .delete(clients::delete_client),
        )
        .route(
            "/categories",
            get(categories::list_categories).post(categories::create_category),
        )
        .route(
            "/categories/{id}",
            get(categories::get_category)
                .put(categories::update_category)
                .delete(categories::delete_category),
        )
        .route("/items", get(items::list_items).post(items::create_item))
        .route(
            "/items/{id}",
            get(items::get_item)
                .put(items::update_item)
                .delete(items::delete_item),
        )
        .route(
            "/questions",
            get(questions::list_questions).post(questions::create_question),
        )
        .route(
            "/questions/{id}",
            get(questions::get_question)
                .put(questions::update_question)
                .delete(questions::delete_question),
        )
        .route("/exams", get(exams::list_exams).post(exams::create_exam))
        .route(
            "/exams/{id}",
            get(exams::get_exam)
                .put(exams::update_exam)
                .delete(exams::delete_exam),
        )
        .route(
            "/exams/{id}/items",
            get(exams::list_exam_items).post(exams::link_exam_item),
        )
        .route(
            "/exams/{id}/items/{item_id}",
            delete(exams::unlink_exam_item),
        )
        .route("/takers", get(takers::list_takers).post(takers::create_taker))
        .route(
            "/takers/{id}",
            get(takers::get_taker)
                .put(takers::update_taker)
                .delete(takers::delete_taker),
        )
        .route("/groups", get(groups::list_groups).post(groups::create_group))
        .route(
            "/groups/{id}",
            get(groups::get_group)
                .put(groups::update_group)
                .delete(groups::delete_group),
        )
        .route(
            "/groups/{id}/takers",
            get(groups::list_group_takers).post(groups::add_group_takers),
        )
        .route(
            "/groups/{id}/takers/{taker_id}",
            delete(groups::remove_group_taker),
        )
        .route(
            "/deliveries",
            get(deliveries::list_deliveries).post(deliveries::create_delivery),
        )
        .route(
            "/deliveries/{id}",
            get(deliveries::get_delivery)
                .put(deliveries::update_delivery)
                .delete(deliveries::delete_delivery),
        )
        .route(
            "/deliveries/{id}/takers",
            get(deliveries::list_delivery_takers),
        )
        .route(
            "/scoring/attempts/{id}/auto-mcq",
            post(scoring::auto_score_mcq),
        )
        .route(
            "/scoring/deliveries/{id}/summary",
            get(scoring::delivery_summary),
        )
        .route("/dashboard", get(reports::dashboard))
        .route("/results", get(reports::list_results))
        .route("/results/statistics", get(reports::result_statistics))
        .route("/results/{attempt_id}", get(reports::get_result))
        .route(
            "/settings",
            get(settings::get_settings).put(settings::update_settings),
        )
        // Auth first, then the internal-user check
        .layer(middleware::from_fn(internal_middleware))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    let client_routes = Router::new()
        .route(
            "/exams",
            get(exams::list_client_exams).post(exams::create_client_exam),
        )
        .layer(middleware::from_fn(internal_middleware))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    let taker_routes = Router::new()
        .route("/deliveries", get(deliveries::list_taker_deliveries))
        .layer(middleware::from_fn(taker_middleware))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    let attempt_routes = Router::new()
        .route("/start", post(attempts::start_attempt))
        .route("/{id}", get(attempts::get_attempt))
        .route("/{id}/items", get(attempts::get_attempt_items))
        .route("/{id}/answers", post(attempts::submit_answers))
        .route(
            "/{id}/items/{item_id}/answers",
            get(attempts::get_item_answers),
        )
        .route("/{id}/finish", post(attempts::finish_attempt))
        .layer(middleware::from_fn(taker_middleware))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    Router::new()
        .nest("/api/auth", auth_routes)
        .route("/api/clients", get(clients::list_public_clients))
        .nest("/api/admin", admin_routes)
        .nest("/api/client", client_routes)
        .nest("/api/taker", taker_routes)
        .nest("/api/attempts", attempt_routes)
        .route("/ws/session", get(ws::session_socket))
        // Global Middleware (applied from outside in)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
