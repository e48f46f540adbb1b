//! OpenAPI description of the HTTP routes, rendered interactively at /docs.

use axum::Json;
use axum::http::StatusCode;
use axum::http::header;
use axum::response::IntoResponse;
use utoipa::Modify;
use utoipa::OpenApi;
use utoipa::openapi::security::Http;
use utoipa::openapi::security::HttpAuthScheme;
use utoipa::openapi::security::SecurityScheme;

use crate::devices::SelectorRequest;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "heatlog",
        description = "Thermostat snapshots appended to a spreadsheet"
    ),
    paths(super::create_snapshot, super::ping, super::info),
    components(schemas(
        SelectorRequest,
        super::StatusResponse,
        super::PingResponse,
        super::InfoResponse
    )),
    modifiers(&BasicAuthScheme)
)]
struct ApiDoc;

/// Registers the `basic` scheme the trigger route refers to.
struct BasicAuthScheme;

impl Modify for BasicAuthScheme {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        openapi
            .components
            .get_or_insert_with(Default::default)
            .add_security_scheme("basic", SecurityScheme::Http(Http::new(HttpAuthScheme::Basic)));
    }
}

pub fn api_doc() -> utoipa::openapi::OpenApi {
    ApiDoc::openapi()
}

/// Handler for GET /
pub async fn root() -> impl IntoResponse {
    (StatusCode::FOUND, [(header::LOCATION, "/docs")])
}

/// Handler for GET /openapi.json
pub async fn openapi() -> Json<utoipa::openapi::OpenApi> {
    Json(api_doc())
}
