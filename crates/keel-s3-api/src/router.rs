use std::sync::Arc;

use axum::{
    Router,
    extract::Request,
    middleware::{self, Next},
    response::Response,
    routing::put,
};
use http::HeaderValue;
use keel_auth::{CredentialProvider, middleware::AuthLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::{
    handlers,
    state::{AppState, RequestId},
};

const REQUEST_ID_HEADER: &str = "x-amz-request-id";
const ADMIN_ADD_USER: &str = "/keel/admin/v1/add-user";
const ADMIN_ADD_POLICY: &str = "/keel/admin/v1/add-policy";
const ADMIN_SET_USER_POLICY: &str = "/keel/admin/v1/set-user-policy";

async fn assign_request_id(mut request: Request, next: Next) -> Response {
    let id = Uuid::new_v4().simple().to_string().to_uppercase();
    request.extensions_mut().insert(RequestId(id.clone()));
    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

pub fn s3_router(state: AppState, credential_provider: Arc<dyn CredentialProvider>) -> Router {
    let app: Router<AppState> = Router::new()
        .route(ADMIN_ADD_USER, put(handlers::admin::add_user))
        .route(ADMIN_ADD_POLICY, put(handlers::admin::add_policy))
        .route(ADMIN_SET_USER_POLICY, put(handlers::admin::set_user_policy))
        .route("/{bucket}", put(handlers::bucket::create_bucket))
        .route(
            "/{bucket}/{*key}",
            put(handlers::multipart::put_object).post(handlers::multipart::post_object),
        );

    app.layer(AuthLayer::new(credential_provider))
        .layer(middleware::from_fn(assign_request_id))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
