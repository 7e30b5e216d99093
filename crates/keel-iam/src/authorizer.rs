use std::sync::Arc;

use keel_common::{
    Bucket, Requester,
    types::{ALL_USERS_GROUP, AUTHENTICATED_USERS_GROUP, Permission},
};
use tracing::debug;

use crate::{policy::PolicyDecision, system::IAMSys};

/// Bucket-level operations that go through authorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestType {
    ObjectPut,
}

impl RequestType {
    pub fn action(self) -> &'static str {
        match self {
            Self::ObjectPut => "s3:PutObject",
        }
    }

    fn satisfied_by(self, permission: Permission) -> bool {
        match self {
            Self::ObjectPut => matches!(permission, Permission::Write | Permission::FullControl),
        }
    }
}

pub trait BucketAuthorizer: Send + Sync {
    fn is_bucket_authorized(
        &self,
        bucket: &Bucket,
        request_type: RequestType,
        requester: &Requester,
    ) -> bool;
}

/// Bucket ACL evaluation, refined by identity policies for IAM principals:
/// an explicit deny always wins, and an IAM principal acting inside its own
/// account needs an explicit allow.
#[derive(Debug, Clone, Default)]
pub struct AclAuthorizer {
    iam: Option<Arc<IAMSys>>,
}

impl AclAuthorizer {
    pub fn new(iam: Arc<IAMSys>) -> Self {
        Self { iam: Some(iam) }
    }

    pub fn acl_only() -> Self {
        Self { iam: None }
    }

    fn identity_decision(&self, bucket: &Bucket, action: &str, requester: &Requester) -> PolicyDecision {
        let (Some(iam), Some(access_key)) = (self.iam.as_ref(), requester.access_key.as_deref())
        else {
            return PolicyDecision::Implicit;
        };
        let resource = format!("arn:aws:s3:::{}/*", bucket.name);
        iam.policy_decision(access_key, action, &resource)
    }
}

impl BucketAuthorizer for AclAuthorizer {
    fn is_bucket_authorized(
        &self,
        bucket: &Bucket,
        request_type: RequestType,
        requester: &Requester,
    ) -> bool {
        let identity = if requester.is_iam_principal() {
            self.identity_decision(bucket, request_type.action(), requester)
        } else {
            PolicyDecision::Implicit
        };
        if identity == PolicyDecision::Deny {
            debug!(bucket = %bucket.name, principal = requester.principal_id(), "explicit deny");
            return false;
        }

        if requester.canonical_id == bucket.owner {
            return !requester.is_iam_principal() || identity == PolicyDecision::Allow;
        }

        bucket.acl.grants.iter().any(|grant| {
            let grantee_matches = grant.grantee == requester.canonical_id
                || grant.grantee == ALL_USERS_GROUP
                || (grant.grantee == AUTHENTICATED_USERS_GROUP && !requester.is_anonymous());
            grantee_matches && request_type.satisfied_by(grant.permission)
        })
    }
}
