use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::http::header;
use axum::middleware;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::get;
use axum::routing::post;
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use utoipa::ToSchema;
use utoipa_scalar::Scalar;
use utoipa_scalar::Servable;

use crate::devices::Selector;
use crate::devices::SelectorRequest;
use crate::error::SnapshotError;
use crate::error::ValidationError;
use crate::service::SnapshotService;

mod basic_auth;
mod docs;

pub use basic_auth::BasicAuthUsers;

/// Body of every trigger response
#[derive(Debug, Serialize, ToSchema)]
struct StatusResponse {
    /// `ok` or `error`
    #[schema(value_type = String, example = "ok")]
    status: &'static str,
    #[schema(example = "snapshot added to sheet HistoriaKurenia")]
    message: String,
}

impl StatusResponse {
    fn ok(message: String) -> Self {
        Self {
            status: "ok",
            message,
        }
    }

    fn error(message: String) -> Self {
        Self {
            status: "error",
            message,
        }
    }
}

/// Response for the /v1/ping endpoint
#[derive(Serialize, ToSchema)]
struct PingResponse {
    status: String,
}

/// Response for the /v1/info endpoint
#[derive(Serialize, ToSchema)]
struct InfoResponse {
    version: String,
    hostname: String,
}

/// Shared application state
struct AppState {
    version: &'static str,
    service: Arc<SnapshotService>,
}

impl IntoResponse for SnapshotError {
    fn into_response(self) -> Response {
        match self {
            SnapshotError::Validation(ValidationError::Unauthorized) => (
                StatusCode::UNAUTHORIZED,
                [(header::WWW_AUTHENTICATE, r#"Basic realm="heatlog""#)],
                Json(StatusResponse::error(
                    ValidationError::Unauthorized.to_string(),
                )),
            )
                .into_response(),
            SnapshotError::Validation(_) => (
                StatusCode::BAD_REQUEST,
                Json(StatusResponse::error(format!("ERROR: {} {}", self.kind(), self))),
            )
                .into_response(),
            _ => {
                tracing::error!("Snapshot failed: {}", self);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(StatusResponse::error(format!("ERROR: {} {}", self.kind(), self))),
                )
                    .into_response()
            }
        }
    }
}

/// An empty body selects every device.
fn parse_selector(body: &[u8]) -> Result<Selector, ValidationError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Selector::All);
    }

    let request: SelectorRequest = serde_json::from_slice(body)
        .map_err(|e| ValidationError::MalformedRequest(e.to_string()))?;
    Selector::try_from(request)
}

/// Append one row per selected device
#[utoipa::path(
    post,
    path = "/snapshots",
    request_body(
        content = SelectorRequest,
        description = "At most one field; an empty body selects every device",
        content_type = "application/json",
    ),
    responses(
        (status = 200, description = "Every selected device was logged", body = StatusResponse),
        (status = 400, description = "Malformed or unknown selector", body = StatusResponse),
        (status = 401, description = "Missing or wrong credentials", body = StatusResponse),
        (status = 500, description = "Sign-in, fetch or append failed", body = StatusResponse),
    ),
    security(("basic" = [])),
)]
#[tracing::instrument(skip(state, body))]
async fn create_snapshot(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<StatusResponse>, SnapshotError> {
    let selector = parse_selector(&body)?;
    tracing::debug!(?selector, "Handling /snapshots request");

    state.service.snapshot(&selector).await?.into_result()?;

    Ok(Json(StatusResponse::ok(format!(
        "snapshot added to sheet {}",
        state.service.sheet_name()
    ))))
}

/// Liveness check
#[utoipa::path(
    get,
    path = "/v1/ping",
    responses((status = 200, description = "Alive", body = PingResponse)),
)]
#[tracing::instrument]
async fn ping() -> impl IntoResponse {
    tracing::debug!("Handling /v1/ping request");
    (
        StatusCode::OK,
        Json(PingResponse {
            status: "ok".to_string(),
        }),
    )
}

/// Version and hostname
#[utoipa::path(
    get,
    path = "/v1/info",
    responses((status = 200, description = "Build info", body = InfoResponse)),
)]
#[tracing::instrument(skip(state))]
async fn info(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    tracing::debug!("Handling /v1/info request");

    let hostname = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());

    (
        StatusCode::OK,
        Json(InfoResponse {
            version: state.version.to_string(),
            hostname,
        }),
    )
}

/// Create the API router. Only the trigger route requires credentials.
fn create_router(state: Arc<AppState>, users: Arc<BasicAuthUsers>) -> Router {
    let protected = Router::new()
        .route("/snapshots", post(create_snapshot))
        .route_layer(middleware::from_fn_with_state(
            users,
            basic_auth::require_basic_auth,
        ));

    Router::new()
        .route("/", get(docs::root))
        .route("/openapi.json", get(docs::openapi))
        .merge(Scalar::with_url("/docs", docs::api_doc()))
        .route("/v1/ping", get(ping))
        .route("/v1/info", get(info))
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP API server
///
/// Binds to `listen:port` and serves until `shutdown_rx` fires, then drains
/// in-flight requests.
pub async fn serve(
    listen: String,
    port: u16,
    service: Arc<SnapshotService>,
    users: HashMap<String, String>,
    shutdown_rx: tokio::sync::oneshot::Receiver<()>,
) -> anyhow::Result<()> {
    let version = env!("CARGO_PKG_VERSION");

    let state = Arc::new(AppState { version, service });
    let app = create_router(state, Arc::new(BasicAuthUsers::new(users)));

    let addr: SocketAddr = format!("{}:{}", listen, port).parse()?;
    tracing::info!("Starting HTTP API server on {}", addr);

    let listener = TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown_rx.await.ok();
            tracing::info!("HTTP API server shutting down gracefully");
        })
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::Request;
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use indexmap::IndexMap;
    use serde_json::Value;
    use serde_json::json;
    use tower::ServiceExt;

    use super::*;
    use crate::config::DeviceConfig;
    use crate::config::VendorConfig;
    use crate::devices::DeviceTable;
    use crate::salus::PropertyKey;
    use crate::salus::SalusClient;
    use crate::snapshot::MemorySink;

    fn router(vendor_url: &str, sink: Arc<MemorySink>) -> Router {
        let vendor = VendorConfig {
            base_url: vendor_url.to_string(),
            email: "user@example.com".to_string(),
            password: "hunter2".to_string(),
            group_id: 62774,
            timeout_secs: 5,
            user_agent: "heatlog-test".to_string(),
            insecure_tls: false,
            properties: vec![PropertyKey::Temperature, PropertyKey::RunningState],
        };
        let devices = IndexMap::from([(
            "Room A".to_string(),
            DeviceConfig {
                worksheet: None,
                floor: Some("ground".to_string()),
            },
        )]);
        let service = SnapshotService::new(
            SalusClient::new(&vendor).unwrap(),
            sink,
            DeviceTable::from_config(&devices),
            chrono_tz::Europe::Prague,
            "HistoriaKurenia",
        );

        let state = Arc::new(AppState {
            version: "test",
            service: Arc::new(service),
        });
        let users = BasicAuthUsers::new(HashMap::from([(
            "alice".to_string(),
            "secret".to_string(),
        )]));
        create_router(state, Arc::new(users))
    }

    fn trigger(credentials: Option<(&str, &str)>, body: &str) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/snapshots")
            .header(header::CONTENT_TYPE, "application/json");
        if let Some((user, password)) = credentials {
            let encoded = STANDARD.encode(format!("{}:{}", user, password));
            builder = builder.header(header::AUTHORIZATION, format!("Basic {}", encoded));
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn mock_vendor(server: &mut mockito::ServerGuard) -> Vec<mockito::Mock> {
        vec![
            server
                .mock("POST", "/users/sign_in.json")
                .with_body(r#"{"access_token": "tok", "expires_in": 3600}"#)
                .create_async()
                .await,
            server
                .mock("GET", "/apiv1/devices.json")
                .with_body(r#"[{"device": {"key": "d1", "product_name": "Room A"}}]"#)
                .create_async()
                .await,
            server
                .mock(
                    "GET",
                    mockito::Matcher::Regex(r"^/apiv1/groups/62774/datapoints\.json".to_string()),
                )
                .with_body(
                    json!({"datapoints": {"devices": {"device": [
                        {"id": "d1", "properties": {"property": [
                            {"name": "ep_9:sIT600TH:LocalTemperature_x100", "value": 2150},
                            {"name": "ep_9:sIT600TH:RunningState", "value": 1},
                        ]}},
                    ]}}})
                    .to_string(),
                )
                .create_async()
                .await,
        ]
    }

    #[tokio::test]
    async fn test_ping() {
        let app = router("http://127.0.0.1:1", Arc::new(MemorySink::new(&[])));
        let response = app
            .oneshot(Request::get("/v1/ping").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await, json!({"status": "ok"}));
    }

    #[tokio::test]
    async fn test_root_redirects_to_docs() {
        let app = router("http://127.0.0.1:1", Arc::new(MemorySink::new(&[])));
        let response = app
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(response.headers()[header::LOCATION], "/docs");
    }

    #[tokio::test]
    async fn test_docs_are_served() {
        let app = router("http://127.0.0.1:1", Arc::new(MemorySink::new(&[])));
        let response = app
            .clone()
            .oneshot(Request::get("/docs").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers()[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("text/html"));

        let response = app
            .oneshot(Request::get("/openapi.json").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let doc = json_body(response).await;
        assert!(doc["paths"]["/snapshots"]["post"].is_object());
    }

    #[tokio::test]
    async fn test_missing_credentials() {
        let app = router("http://127.0.0.1:1", Arc::new(MemorySink::new(&[])));
        let response = app.oneshot(trigger(None, "{}")).await.unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response.headers()[header::WWW_AUTHENTICATE]
            .to_str()
            .unwrap()
            .starts_with("Basic"));
        assert_eq!(
            json_body(response).await,
            json!({"status": "error", "message": "Incorrect name or password"})
        );
    }

    #[tokio::test]
    async fn test_wrong_credentials() {
        for credentials in [("alice", "guess"), ("bob", "secret")] {
            let app = router("http://127.0.0.1:1", Arc::new(MemorySink::new(&[])));
            let response = app.oneshot(trigger(Some(credentials), "{}")).await.unwrap();

            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
            assert!(response.headers().contains_key(header::WWW_AUTHENTICATE));
        }
    }

    #[tokio::test]
    async fn test_bad_selectors_are_rejected() {
        let cases = [
            (r#"{"device": "Room A", "floor": "ground"}"#, "select at most one"),
            (r#"{"floor": "attic"}"#, "no configured device matches floor 'attic'"),
            (r#"{"room": "Room A"}"#, "invalid request body"),
            ("not json", "invalid request body"),
        ];

        for (body, expected) in cases {
            let app = router("http://127.0.0.1:1", Arc::new(MemorySink::new(&[])));
            let response = app
                .oneshot(trigger(Some(("alice", "secret")), body))
                .await
                .unwrap();

            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{body}");
            let json = json_body(response).await;
            assert_eq!(json["status"], "error");
            let message = json["message"].as_str().unwrap();
            assert!(message.starts_with("ERROR: ValidationError "), "{message}");
            assert!(message.contains(expected), "{message}");
        }
    }

    #[tokio::test]
    async fn test_snapshot_added() {
        let mut server = mockito::Server::new_async().await;
        let _mocks = mock_vendor(&mut server).await;
        let sink = Arc::new(MemorySink::new(&["Room A"]));
        let app = router(&server.url(), sink.clone());

        let response = app
            .oneshot(trigger(Some(("alice", "secret")), ""))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            json_body(response).await,
            json!({"status": "ok", "message": "snapshot added to sheet HistoriaKurenia"})
        );
        assert_eq!(sink.rows_for("Room A")[0][1..], [json!(21.5), json!(1)]);
    }

    #[tokio::test]
    async fn test_write_failure_is_server_error() {
        let mut server = mockito::Server::new_async().await;
        let _mocks = mock_vendor(&mut server).await;
        let app = router(&server.url(), Arc::new(MemorySink::new(&[])));

        let response = app
            .oneshot(trigger(Some(("alice", "secret")), r#"{"device": "Room A"}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let json = json_body(response).await;
        insta::assert_snapshot!(
            json["message"].as_str().unwrap(),
            @"ERROR: WriteError Room A: worksheet 'Room A' not found"
        );
    }

    #[tokio::test]
    async fn test_upstream_failure_is_server_error() {
        let mut server = mockito::Server::new_async().await;
        let _sign_in = server
            .mock("POST", "/users/sign_in.json")
            .with_status(403)
            .create_async()
            .await;
        let app = router(&server.url(), Arc::new(MemorySink::new(&["Room A"])));

        let response = app
            .oneshot(trigger(Some(("alice", "secret")), "{}"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let json = json_body(response).await;
        assert_eq!(json["message"], "ERROR: AuthError sign-in rejected with HTTP 403 Forbidden");
    }
}
