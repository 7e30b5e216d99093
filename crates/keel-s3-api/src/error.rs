use axum::response::{IntoResponse, Response};
use http::StatusCode;
use keel_common::KeelError;
use quick_xml::escape::escape;

pub struct S3Error {
    pub error: KeelError,
    pub resource: String,
    pub request_id: String,
}

impl S3Error {
    pub fn new(error: KeelError, resource: impl Into<String>, request_id: impl Into<String>) -> Self {
        Self {
            error,
            resource: resource.into(),
            request_id: request_id.into(),
        }
    }

    fn status(&self) -> StatusCode {
        match self.error {
            KeelError::BucketNotFound(_)
            | KeelError::RecordNotFound { .. }
            | KeelError::NoSuchUpload { .. } => StatusCode::NOT_FOUND,
            KeelError::BucketAlreadyExists(_) => StatusCode::CONFLICT,
            KeelError::AccessDenied(_) | KeelError::SignatureDoesNotMatch => StatusCode::FORBIDDEN,
            KeelError::InvalidBucketName(_)
            | KeelError::InvalidArgument(_)
            | KeelError::TooManyParts { .. }
            | KeelError::InvalidDigest(_)
            | KeelError::IncompleteBody { .. }
            | KeelError::BadDigest { .. }
            | KeelError::KmsKeyNotFound(_) => StatusCode::BAD_REQUEST,
            KeelError::MissingContentLength => StatusCode::LENGTH_REQUIRED,
            KeelError::EntityTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            KeelError::NotImplemented(_) => StatusCode::NOT_IMPLEMENTED,
            KeelError::InternalError(_) | KeelError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for S3Error {
    fn into_response(self) -> Response {
        let status = self.status();
        let error_code = self.error.s3_error_code();
        let message = self.error.to_string();
        let message = escape(message.as_str());
        let resource = escape(self.resource.as_str());
        let request_id = escape(self.request_id.as_str());

        let body = format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<Error>
  <Code>{error_code}</Code>
  <Message>{message}</Message>
  <Resource>{resource}</Resource>
  <RequestId>{request_id}</RequestId>
</Error>"#
        );

        (status, [("Content-Type", "application/xml")], body).into_response()
    }
}
