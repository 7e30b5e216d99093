use axum::{
    Extension, Json,
    extract::{Query, State},
    response::{IntoResponse, Response},
};
use keel_common::{KeelError, Requester, error::Result};
use keel_iam::{IAMSys, Policy, User};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    error::S3Error,
    state::{AppState, RequestId},
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddUserRequest {
    pub name: String,
    pub access_key: String,
    pub secret_key: String,
    #[serde(default)]
    pub policy_names: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPolicyQuery {
    pub access_key: String,
    pub policy_name: String,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    pub access_key: String,
    pub arn: Option<String>,
    pub policy_names: Vec<String>,
}

impl From<&User> for UserInfo {
    fn from(user: &User) -> Self {
        Self {
            access_key: user.access_key.clone(),
            arn: user.arn.clone(),
            policy_names: user.policy_names.clone(),
        }
    }
}

pub async fn add_user(
    State(state): State<AppState>,
    Extension(requester): Extension<Requester>,
    Extension(request_id): Extension<RequestId>,
    Json(payload): Json<AddUserRequest>,
) -> Response {
    match add_user_inner(&state.iam, &requester, payload).await {
        Ok(user) => Json(user).into_response(),
        Err(err) => S3Error::new(err, "/keel/admin/v1/add-user", request_id.0).into_response(),
    }
}

pub async fn add_policy(
    State(state): State<AppState>,
    Extension(requester): Extension<Requester>,
    Extension(request_id): Extension<RequestId>,
    Json(policy): Json<Policy>,
) -> Response {
    let result = async {
        account_root(&requester)?;
        let name = policy.name.clone();
        state.iam.create_policy(policy).await?;
        info!(policy = %name, "policy stored");
        Ok::<_, KeelError>(())
    }
    .await;
    match result {
        Ok(()) => http::StatusCode::OK.into_response(),
        Err(err) => S3Error::new(err, "/keel/admin/v1/add-policy", request_id.0).into_response(),
    }
}

pub async fn set_user_policy(
    State(state): State<AppState>,
    Extension(requester): Extension<Requester>,
    Extension(request_id): Extension<RequestId>,
    Query(query): Query<UserPolicyQuery>,
) -> Response {
    match set_user_policy_inner(&state.iam, &requester, &query).await {
        Ok(user) => Json(user).into_response(),
        Err(err) => {
            S3Error::new(err, "/keel/admin/v1/set-user-policy", request_id.0).into_response()
        }
    }
}

/// Only account roots manage identities. Returns the root's access key.
fn account_root(requester: &Requester) -> Result<&str> {
    match requester.access_key.as_deref() {
        Some(access_key) if !requester.is_anonymous() && !requester.is_iam_principal() => {
            Ok(access_key)
        }
        _ => Err(KeelError::AccessDenied(
            "identity management requires an account root".to_string(),
        )),
    }
}

async fn add_user_inner(
    iam: &IAMSys,
    requester: &Requester,
    payload: AddUserRequest,
) -> Result<UserInfo> {
    let parent = account_root(requester)?;
    let user = iam
        .create_user(parent, &payload.name, &payload.access_key, &payload.secret_key)
        .await?;
    for policy_name in &payload.policy_names {
        iam.attach_policy(&user.access_key, policy_name).await?;
    }
    info!(access_key = %user.access_key, arn = ?user.arn, "iam user created");

    let user = iam.get_user(&user.access_key)?.unwrap_or(user);
    Ok(UserInfo::from(&user))
}

async fn set_user_policy_inner(
    iam: &IAMSys,
    requester: &Requester,
    query: &UserPolicyQuery,
) -> Result<UserInfo> {
    account_root(requester)?;
    let target = iam
        .get_user(&query.access_key)?
        .filter(|user| user.canonical_id == requester.canonical_id && user.arn.is_some())
        .ok_or_else(|| KeelError::InvalidArgument(format!("user not found: {}", query.access_key)))?;
    iam.attach_policy(&target.access_key, &query.policy_name)
        .await?;

    let user = iam.get_user(&target.access_key)?.unwrap_or(target);
    Ok(UserInfo::from(&user))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add(name: &str, access_key: &str, policy_names: &[&str]) -> AddUserRequest {
        AddUserRequest {
            name: name.to_string(),
            access_key: access_key.to_string(),
            secret_key: format!("{access_key}-secret"),
            policy_names: policy_names.iter().map(|name| name.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn account_root_creates_iam_users() {
        let iam = IAMSys::ephemeral();
        let root = iam.ensure_account("ROOT", "root-secret", "root").await.unwrap();

        let info = add_user_inner(&iam, &root.requester(), add("alice", "ALICE", &["readwrite"]))
            .await
            .unwrap();
        assert!(info.arn.as_deref().unwrap().ends_with(":user/alice"));
        assert_eq!(info.policy_names, vec!["readwrite"]);

        let alice = iam.get_user("ALICE").unwrap().unwrap();
        assert_eq!(alice.canonical_id, root.canonical_id);
        assert_eq!(alice.requester().principal_id(), info.arn.as_deref().unwrap());
    }

    #[tokio::test]
    async fn only_account_roots_manage_identities() {
        let iam = IAMSys::ephemeral();
        let root = iam.ensure_account("ROOT", "root-secret", "root").await.unwrap();
        add_user_inner(&iam, &root.requester(), add("alice", "ALICE", &[]))
            .await
            .unwrap();
        let alice = iam.get_user("ALICE").unwrap().unwrap();

        for requester in [Requester::anonymous(), alice.requester()] {
            let err = add_user_inner(&iam, &requester, add("mallory", "MALLORY", &[]))
                .await
                .unwrap_err();
            assert!(matches!(err, KeelError::AccessDenied(_)));
        }
        assert!(iam.get_user("MALLORY").unwrap().is_none());
    }

    #[tokio::test]
    async fn policies_attach_only_within_the_account() {
        let iam = IAMSys::ephemeral();
        let root = iam.ensure_account("ROOT", "root-secret", "root").await.unwrap();
        let other = iam.ensure_account("OTHER", "other-secret", "other").await.unwrap();
        add_user_inner(&iam, &root.requester(), add("bob", "BOB", &[]))
            .await
            .unwrap();

        let query = UserPolicyQuery {
            access_key: "BOB".to_string(),
            policy_name: "readwrite".to_string(),
        };
        let err = set_user_policy_inner(&iam, &other.requester(), &query)
            .await
            .unwrap_err();
        assert!(matches!(err, KeelError::InvalidArgument(_)));

        let info = set_user_policy_inner(&iam, &root.requester(), &query)
            .await
            .unwrap();
        assert_eq!(info.policy_names, vec!["readwrite"]);
    }
}
