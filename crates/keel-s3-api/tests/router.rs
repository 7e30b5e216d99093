use std::sync::Arc;

use axum::{Router, body::Body, response::Response};
use http::{Request, StatusCode};
use http_body_util::BodyExt;
use keel_auth::credentials::StaticCredentialProvider;
use keel_common::{
    Bucket, IngestConfig, Requester,
    types::{ALL_USERS_GROUP, Permission},
};
use keel_crypto::{LocalKms, MasterKey};
use keel_iam::{AclAuthorizer, IAMSys};
use keel_multipart::PartIngestor;
use keel_s3_api::{AppState, s3_router};
use keel_storage::{MemoryDataBackend, MemoryMetadataStore, MetadataStore};
use md5::{Digest, Md5};
use tower::ServiceExt;

async fn app() -> (Router, Arc<MemoryMetadataStore>) {
    let metadata = Arc::new(MemoryMetadataStore::new());
    metadata
        .create_bucket(
            Bucket::new("dropbox", &Requester::account("owner-id", "owner"))
                .with_grant(ALL_USERS_GROUP, Permission::Write),
        )
        .await
        .unwrap();
    let kms = Arc::new(LocalKms::new(MasterKey::generate()).unwrap());
    let ingestor = PartIngestor::new(
        metadata.clone(),
        Arc::new(MemoryDataBackend::new()),
        kms.clone(),
        Arc::new(AclAuthorizer::acl_only()),
        IngestConfig::default(),
    );
    let state = AppState {
        ingestor,
        metadata: metadata.clone(),
        kms,
        iam: Arc::new(IAMSys::ephemeral()),
    };
    let router = s3_router(state, Arc::new(StaticCredentialProvider::default()));
    (router, metadata)
}

async fn body_text(response: Response) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

fn between<'a>(text: &'a str, open: &str, close: &str) -> &'a str {
    let start = text.find(open).unwrap() + open.len();
    let end = text[start..].find(close).unwrap() + start;
    &text[start..end]
}

async fn initiate(router: &Router) -> String {
    let response = router
        .clone()
        .oneshot(
            Request::post("/dropbox/docs/report.pdf?uploads")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let text = body_text(response).await;
    assert_eq!(between(&text, "<Key>", "</Key>"), "docs/report.pdf");
    between(&text, "<UploadId>", "</UploadId>").to_string()
}

#[tokio::test]
async fn upload_part_returns_quoted_etag() {
    let (router, metadata) = app().await;
    let upload_id = initiate(&router).await;
    let payload = b"part payload";
    let md5 = Md5::digest(payload);

    let response = router
        .clone()
        .oneshot(
            Request::put(format!(
                "/dropbox/docs/report.pdf?partNumber=2&uploadId={upload_id}"
            ))
            .header("content-length", payload.len())
            .header(
                "content-md5",
                base64_md5(&md5),
            )
            .body(Body::from(&payload[..]))
            .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-amz-request-id"));
    assert_eq!(
        response.headers()["etag"].to_str().unwrap(),
        format!("\"{}\"", hex::encode(md5))
    );

    let record = metadata
        .get_object("mpuShadowBucketdropbox", &format!("{upload_id}|00002"))
        .await
        .unwrap();
    assert_eq!(record.as_part().unwrap().size, payload.len() as u64);
}

fn base64_md5(digest: &[u8]) -> String {
    use base64::Engine as _;
    base64::engine::general_purpose::STANDARD.encode(digest)
}

#[tokio::test]
async fn errors_carry_code_resource_and_request_id() {
    let (router, _) = app().await;
    initiate(&router).await;

    let response = router
        .clone()
        .oneshot(
            Request::put("/dropbox/docs/report.pdf?partNumber=1&uploadId=missing")
                .header("content-length", 1)
                .body(Body::from("x"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let request_id = response.headers()["x-amz-request-id"]
        .to_str()
        .unwrap()
        .to_string();
    let text = body_text(response).await;
    assert_eq!(between(&text, "<Code>", "</Code>"), "NoSuchUpload");
    assert_eq!(between(&text, "<Resource>", "</Resource>"), "/dropbox/docs/report.pdf");
    assert_eq!(between(&text, "<RequestId>", "</RequestId>"), request_id);
}

#[tokio::test]
async fn part_number_out_of_range() {
    let (router, _) = app().await;
    let upload_id = initiate(&router).await;

    let response = router
        .clone()
        .oneshot(
            Request::put(format!(
                "/dropbox/docs/report.pdf?partNumber=10001&uploadId={upload_id}"
            ))
            .header("content-length", 1)
            .body(Body::from("x"))
            .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(body_text(response).await.contains("<Code>TooManyParts</Code>"));
}

#[tokio::test]
async fn bad_content_md5_is_invalid_digest() {
    let (router, _) = app().await;
    let upload_id = initiate(&router).await;

    let response = router
        .clone()
        .oneshot(
            Request::put(format!(
                "/dropbox/docs/report.pdf?partNumber=1&uploadId={upload_id}"
            ))
            .header("content-length", 1)
            .header("content-md5", "%%%")
            .body(Body::from("x"))
            .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(body_text(response).await.contains("<Code>InvalidDigest</Code>"));
}

#[tokio::test]
async fn anonymous_cannot_create_buckets() {
    let (router, _) = app().await;
    let response = router
        .oneshot(Request::put("/newbucket").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(body_text(response).await.contains("<Code>AccessDenied</Code>"));
}

#[tokio::test]
async fn admin_routes_require_an_account_root() {
    let (router, _) = app().await;
    let response = router
        .oneshot(
            Request::put("/keel/admin/v1/add-user")
                .header("content-type", "application/json")
                .body(Body::from(
                    r#"{"name":"alice","accessKey":"ALICE","secretKey":"alice-secret"}"#,
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let text = body_text(response).await;
    assert!(text.contains("<Code>AccessDenied</Code>"));
    assert!(text.contains("<Resource>/keel/admin/v1/add-user</Resource>"));
}
