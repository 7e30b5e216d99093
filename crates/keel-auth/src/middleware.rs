use std::{future::Future, pin::Pin, sync::Arc, task::Poll};

use axum::{
    body::Body,
    response::{IntoResponse, Response},
};
use http::{
    Request, StatusCode,
    header::{AUTHORIZATION, CONTENT_TYPE},
};
use keel_common::{KeelError, Requester};
use tower::{Layer, Service};
use tracing::debug;

use crate::{
    credentials::CredentialProvider,
    parser::parse_auth_header,
    signature_v4::{STREAMING_PAYLOAD, SignedRequest, get_scope, verify_signature},
    streaming::StreamingV4Params,
};

#[derive(Clone)]
pub struct AuthLayer {
    provider: Arc<dyn CredentialProvider>,
}

impl AuthLayer {
    pub fn new(provider: Arc<dyn CredentialProvider>) -> Self {
        Self { provider }
    }
}

impl<S> Layer<S> for AuthLayer {
    type Service = AuthMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthMiddleware {
            inner,
            provider: Arc::clone(&self.provider),
        }
    }
}

/// Verifies header-signed requests and records the caller's [`Requester`]
/// (and, for chunk-signed bodies, the [`StreamingV4Params`]) as request
/// extensions. Unsigned requests continue as the anonymous requester.
#[derive(Clone)]
pub struct AuthMiddleware<S> {
    inner: S,
    provider: Arc<dyn CredentialProvider>,
}

fn header_str<'a, B>(req: &'a Request<B>, name: &str) -> Option<&'a str> {
    req.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn authenticate<B>(
    provider: &dyn CredentialProvider,
    req: &Request<B>,
    auth_header: &str,
) -> Result<(Requester, Option<StreamingV4Params>), KeelError> {
    let parsed = parse_auth_header(auth_header).map_err(|err| {
        debug!(error = %err, "failed to parse auth header");
        KeelError::AccessDenied("invalid authorization header".to_string())
    })?;

    if parsed.service != "s3" {
        return Err(KeelError::AccessDenied(
            "unsupported service in credential scope".to_string(),
        ));
    }
    if !parsed.signed_headers.iter().any(|h| h == "host") {
        return Err(KeelError::AccessDenied(
            "host must be part of signed headers".to_string(),
        ));
    }

    let credentials = provider
        .lookup(&parsed.access_key)
        .ok_or_else(|| KeelError::AccessDenied("access key not found".to_string()))?;

    let date_time = header_str(req, "x-amz-date")
        .ok_or_else(|| KeelError::AccessDenied("missing x-amz-date".to_string()))?;
    if !date_time.starts_with(&parsed.date) {
        return Err(KeelError::SignatureDoesNotMatch);
    }

    let payload_hash = header_str(req, "x-amz-content-sha256").unwrap_or("UNSIGNED-PAYLOAD");
    let request = SignedRequest {
        method: req.method().as_str(),
        uri: req.uri().path(),
        query_string: req.uri().query().unwrap_or(""),
        headers: req.headers(),
        signed_headers: &parsed.signed_headers,
        payload_hash,
        date_time,
        date: &parsed.date,
        region: &parsed.region,
    };
    if !verify_signature(&credentials.secret_key, &request, &parsed.signature) {
        return Err(KeelError::SignatureDoesNotMatch);
    }

    let streaming = (payload_hash == STREAMING_PAYLOAD).then(|| StreamingV4Params {
        access_key: credentials.access_key.clone(),
        secret_key: credentials.secret_key.clone(),
        seed_signature: parsed.signature.clone(),
        region: parsed.region.clone(),
        scope_date: parsed.date.clone(),
        timestamp: date_time.to_string(),
        credential_scope: get_scope(&parsed.date, &parsed.region),
    });

    Ok((credentials.requester, streaming))
}

impl<S> Service<Request<Body>> for AuthMiddleware<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut std::task::Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<Body>) -> Self::Future {
        let mut inner = self.inner.clone();
        let provider = Arc::clone(&self.provider);

        Box::pin(async move {
            let auth_header = req
                .headers()
                .get(AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .map(|v| v.trim().to_string());

            let Some(auth_header) = auth_header else {
                req.extensions_mut().insert(Requester::anonymous());
                return inner.call(req).await;
            };

            match authenticate(provider.as_ref(), &req, &auth_header) {
                Ok((requester, streaming)) => {
                    debug!(principal = requester.principal_id(), "request authenticated");
                    req.extensions_mut().insert(requester);
                    if let Some(streaming) = streaming {
                        req.extensions_mut().insert(streaming);
                    }
                    inner.call(req).await
                }
                Err(err) => Ok(auth_error_response(err)),
            }
        })
    }
}

fn auth_error_response(error: KeelError) -> Response {
    let status = match error {
        KeelError::AccessDenied(_) | KeelError::SignatureDoesNotMatch => StatusCode::FORBIDDEN,
        _ => StatusCode::BAD_REQUEST,
    };

    let error_code = error.s3_error_code();
    let message = error.to_string();
    let body = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<Error>
  <Code>{error_code}</Code>
  <Message>{message}</Message>
</Error>"#
    );

    (status, [(CONTENT_TYPE, "application/xml")], Body::from(body)).into_response()
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;

    use http::HeaderValue;
    use tower::{ServiceExt, service_fn};

    use super::*;
    use crate::{
        credentials::{Credentials, StaticCredentialProvider},
        signature_v4::compute_signature,
    };

    const SECRET: &str = "secret-key";

    fn layer() -> AuthLayer {
        let provider = StaticCredentialProvider::new([Credentials {
            access_key: "AKID".to_string(),
            secret_key: SECRET.to_string(),
            requester: Requester::account("owner-id", "owner"),
        }]);
        AuthLayer::new(Arc::new(provider))
    }

    async fn echo(req: Request<Body>) -> Result<Response, Infallible> {
        let requester = req.extensions().get::<Requester>().cloned();
        let streaming = req.extensions().get::<StreamingV4Params>().is_some();
        let body = format!(
            "{}|{streaming}",
            requester.map(|r| r.canonical_id).unwrap_or_default()
        );
        Ok(Response::new(Body::from(body)))
    }

    fn signed_request(payload_hash: &str, tamper: bool) -> Request<Body> {
        let mut req = Request::builder()
            .method("PUT")
            .uri("/photos/cat.jpg?partNumber=1&uploadId=u1")
            .header("host", "localhost:9000")
            .header("x-amz-date", "20260101T000000Z")
            .header("x-amz-content-sha256", payload_hash)
            .body(Body::empty())
            .unwrap();

        let signed = vec![
            "host".to_string(),
            "x-amz-content-sha256".to_string(),
            "x-amz-date".to_string(),
        ];
        let signature = compute_signature(
            SECRET,
            &SignedRequest {
                method: "PUT",
                uri: "/photos/cat.jpg",
                query_string: "partNumber=1&uploadId=u1",
                headers: req.headers(),
                signed_headers: &signed,
                payload_hash,
                date_time: "20260101T000000Z",
                date: "20260101",
                region: "us-east-1",
            },
        )
        .unwrap();
        let signature = if tamper { "0".repeat(64) } else { signature };
        let auth = format!(
            "AWS4-HMAC-SHA256 Credential=AKID/20260101/us-east-1/s3/aws4_request,SignedHeaders=host;x-amz-content-sha256;x-amz-date,Signature={signature}"
        );
        req.headers_mut()
            .insert(AUTHORIZATION, HeaderValue::from_str(&auth).unwrap());
        req
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn anonymous_requests_pass_through() {
        let service = layer().layer(service_fn(echo));
        let response = service
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(
            body_text(response).await,
            format!("{}|false", keel_common::types::ALL_USERS_GROUP)
        );
    }

    #[tokio::test]
    async fn streaming_requests_get_params() {
        let service = layer().layer(service_fn(echo));
        let response = service
            .oneshot(signed_request(STREAMING_PAYLOAD, false))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "owner-id|true");
    }

    #[tokio::test]
    async fn bad_signature_is_forbidden() {
        let service = layer().layer(service_fn(echo));
        let response = service
            .oneshot(signed_request("UNSIGNED-PAYLOAD", true))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert!(body_text(response).await.contains("SignatureDoesNotMatch"));
    }
}
