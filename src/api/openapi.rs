//! OpenAPI documentation for the download endpoints

use utoipa::OpenApi;

/// OpenAPI documentation for the irods-stage HTTP surface
///
/// Served at `/openapi.json`; Swagger UI (when enabled) at `/swagger-ui`.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "irods-stage",
        version = "0.1.0",
        description = "Download, zip staging and BagIt packaging for resources held in an iRODS-style vault",
        license(
            name = "MIT OR Apache-2.0"
        )
    ),
    paths(
        crate::api::routes::download,
        crate::api::routes::rest_download,
        crate::api::routes::task_status,
        crate::api::routes::rest_task_status,
        crate::api::routes::health_check,
        crate::api::routes::openapi_spec,
        crate::api::routes::event_stream,
    ),
    components(schemas(
        crate::types::Event,
        crate::types::TaskId,
        crate::types::TaskKind,
        crate::api::routes::NotReadyResponse,
        crate::api::routes::TaskStatusResponse,
        crate::error::ApiError,
        crate::error::ErrorDetail,
    )),
    tags(
        (name = "download", description = "File, folder, aggregation and bag downloads"),
        (name = "tasks", description = "Polling background zip and bag builds"),
        (name = "system", description = "Health checks, OpenAPI spec, events"),
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

/// Adds the optional API key scheme
struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = &mut openapi.components {
            components.add_security_scheme(
                "api_key",
                utoipa::openapi::security::SecurityScheme::ApiKey(
                    utoipa::openapi::security::ApiKey::Header(
                        utoipa::openapi::security::ApiKeyValue::new("X-Api-Key"),
                    ),
                ),
            );
        }
    }
}
