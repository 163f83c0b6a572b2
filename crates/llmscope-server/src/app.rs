//! HTTP 应用组装：路由、OpenAPI 文档、CORS 与中间件栈。

use crate::state::AppState;
use crate::{api, logging};
use axum::middleware;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use utoipa::openapi::security::{ApiKey, ApiKeyValue, SecurityScheme};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "llmscope API",
        description = "llmscope LLM 可观测性检测与告警 REST API",
    ),
    tags(
        (name = "Health", description = "服务健康检查"),
        (name = "Detection", description = "检测周期触发与状态"),
        (name = "Ingest", description = "遥测数据上报"),
        (name = "Security", description = "安全事件上报")
    ),
    modifiers(&SecurityAddon)
)]
struct ApiDoc;

struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        openapi
            .components
            .get_or_insert_with(Default::default)
            .add_security_scheme(
                "cron_secret",
                SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::new("x-cron-secret"))),
            );
    }
}

pub fn build_http_app(state: AppState) -> Router {
    let (public_router, public_spec) = api::public_routes().split_for_parts();
    let (protected_router, protected_spec) = api::protected_routes().split_for_parts();

    let mut api_doc = ApiDoc::openapi();
    api_doc.merge(public_spec);
    api_doc.merge(protected_spec);

    // 保护路由经过 x-cron-secret 校验，公开路由（健康检查）不校验
    let guarded = protected_router.layer(middleware::from_fn_with_state(
        state.clone(),
        crate::middleware::cron_secret_middleware,
    ));

    public_router
        .merge(guarded)
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/v1/openapi.json", api_doc))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(middleware::from_fn(logging::request_logging))
}
