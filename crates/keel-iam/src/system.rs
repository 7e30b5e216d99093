use std::{
    collections::HashMap,
    path::Path,
    sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use chrono::Utc;
use keel_common::error::{KeelError, Result};
use tracing::info;
use uuid::Uuid;

use crate::{
    policy::{PolicyDecision, evaluate_policy},
    store::{IamDocument, IamStore},
    types::{Effect, Policy, PolicyStatement, User},
};

#[derive(Debug, Default)]
struct IamState {
    users: HashMap<String, User>,
    policies: HashMap<String, Policy>,
}

impl IamState {
    fn document(&self) -> IamDocument {
        let mut users: Vec<User> = self.users.values().cloned().collect();
        users.sort_by(|a, b| a.access_key.cmp(&b.access_key));
        let mut policies: Vec<Policy> = self.policies.values().cloned().collect();
        policies.sort_by(|a, b| a.name.cmp(&b.name));
        IamDocument { users, policies }
    }
}

/// Accounts, IAM users and identity policies.
#[derive(Debug, Clone)]
pub struct IAMSys {
    store: IamStore,
    state: Arc<RwLock<IamState>>,
}

impl IAMSys {
    pub async fn new(data_dir: impl AsRef<Path>) -> Result<Self> {
        let store = IamStore::new(data_dir).await?;
        let document = store.load().await?;
        let sys = Self::from_document(store, document);
        sys.ensure_builtin_policies().await?;
        Ok(sys)
    }

    /// An identity system that keeps nothing on disk.
    pub fn ephemeral() -> Self {
        let sys = Self::from_document(IamStore::ephemeral(), IamDocument::default());
        if let Ok(mut state) = sys.state_write() {
            for policy in builtin_policies() {
                state.policies.insert(policy.name.clone(), policy);
            }
        }
        sys
    }

    fn from_document(store: IamStore, document: IamDocument) -> Self {
        let state = IamState {
            users: document
                .users
                .into_iter()
                .map(|user| (user.access_key.clone(), user))
                .collect(),
            policies: document
                .policies
                .into_iter()
                .map(|policy| (policy.name.clone(), policy))
                .collect(),
        };
        Self {
            store,
            state: Arc::new(RwLock::new(state)),
        }
    }

    /// Registers an account root. Returns the existing account when the access
    /// key is already known with the same secret.
    pub async fn ensure_account(
        &self,
        access_key: &str,
        secret_key: &str,
        display_name: &str,
    ) -> Result<User> {
        if let Some(existing) = self.get_user(access_key)? {
            if existing.secret_key == secret_key && existing.arn.is_none() {
                return Ok(existing);
            }
            return Err(KeelError::InvalidArgument(format!(
                "access key already registered: {access_key}"
            )));
        }

        let user = User {
            access_key: access_key.to_string(),
            secret_key: secret_key.to_string(),
            canonical_id: new_canonical_id(),
            display_name: display_name.to_string(),
            arn: None,
            policy_names: Vec::new(),
            created_at: Utc::now(),
        };
        self.insert_user(user.clone()).await?;
        info!(access_key, canonical_id = %user.canonical_id, "account created");
        Ok(user)
    }

    /// Creates an IAM user under the account owning `parent_access_key`.
    pub async fn create_user(
        &self,
        parent_access_key: &str,
        name: &str,
        access_key: &str,
        secret_key: &str,
    ) -> Result<User> {
        if access_key.is_empty() || secret_key.is_empty() || name.is_empty() {
            return Err(KeelError::InvalidArgument(
                "user name, access key and secret key are required".to_string(),
            ));
        }

        let parent = self
            .get_user(parent_access_key)?
            .filter(|user| user.arn.is_none())
            .ok_or_else(|| {
                KeelError::InvalidArgument(format!("account not found: {parent_access_key}"))
            })?;
        if self.get_user(access_key)?.is_some() {
            return Err(KeelError::InvalidArgument(format!(
                "user already exists: {access_key}"
            )));
        }

        let account_id = &parent.canonical_id[..12.min(parent.canonical_id.len())];
        let user = User {
            access_key: access_key.to_string(),
            secret_key: secret_key.to_string(),
            canonical_id: parent.canonical_id.clone(),
            display_name: name.to_string(),
            arn: Some(format!("arn:aws:iam::{account_id}:user/{name}")),
            policy_names: Vec::new(),
            created_at: Utc::now(),
        };
        self.insert_user(user.clone()).await?;
        Ok(user)
    }

    pub fn get_user(&self, access_key: &str) -> Result<Option<User>> {
        Ok(self.state_read()?.users.get(access_key).cloned())
    }

    pub async fn create_policy(&self, policy: Policy) -> Result<()> {
        if policy.name.is_empty() {
            return Err(KeelError::InvalidArgument(
                "policy name is required".to_string(),
            ));
        }
        if policy.statements.is_empty() {
            return Err(KeelError::InvalidArgument(
                "policy must include at least one statement".to_string(),
            ));
        }

        let document = {
            let mut state = self.state_write()?;
            state.policies.insert(policy.name.clone(), policy);
            state.document()
        };
        self.store.save(&document).await
    }

    pub async fn attach_policy(&self, access_key: &str, policy_name: &str) -> Result<()> {
        let document = {
            let mut state = self.state_write()?;
            if !state.policies.contains_key(policy_name) {
                return Err(KeelError::InvalidArgument(format!(
                    "policy not found: {policy_name}"
                )));
            }
            let user = state.users.get_mut(access_key).ok_or_else(|| {
                KeelError::InvalidArgument(format!("user not found: {access_key}"))
            })?;
            if user.policy_names.iter().any(|name| name == policy_name) {
                return Ok(());
            }
            user.policy_names.push(policy_name.to_string());
            state.document()
        };
        self.store.save(&document).await
    }

    /// Evaluates the identity policies attached to the user holding `access_key`.
    pub fn policy_decision(&self, access_key: &str, action: &str, resource: &str) -> PolicyDecision {
        let Ok(state) = self.state_read() else {
            return PolicyDecision::Deny;
        };
        let Some(user) = state.users.get(access_key) else {
            return PolicyDecision::Implicit;
        };

        let policies = user
            .policy_names
            .iter()
            .filter_map(|name| state.policies.get(name).cloned())
            .collect::<Vec<_>>();
        evaluate_policy(&policies, action, resource)
    }

    async fn insert_user(&self, user: User) -> Result<()> {
        let document = {
            let mut state = self.state_write()?;
            state.users.insert(user.access_key.clone(), user);
            state.document()
        };
        self.store.save(&document).await
    }

    async fn ensure_builtin_policies(&self) -> Result<()> {
        for policy in builtin_policies() {
            let missing = !self.state_read()?.policies.contains_key(&policy.name);
            if missing {
                self.create_policy(policy).await?;
            }
        }
        Ok(())
    }

    fn state_read(&self) -> Result<RwLockReadGuard<'_, IamState>> {
        self.state
            .read()
            .map_err(|_| KeelError::InternalError("iam state lock poisoned".to_string()))
    }

    fn state_write(&self) -> Result<RwLockWriteGuard<'_, IamState>> {
        self.state
            .write()
            .map_err(|_| KeelError::InternalError("iam state lock poisoned".to_string()))
    }
}

fn new_canonical_id() -> String {
    format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple())
}

fn builtin_policies() -> [Policy; 2] {
    [
        Policy {
            name: "readwrite".to_string(),
            version: "2012-10-17".to_string(),
            statements: vec![PolicyStatement {
                effect: Effect::Allow,
                actions: vec!["s3:*".to_string()],
                resources: vec!["arn:aws:s3:::*".to_string(), "arn:aws:s3:::*/*".to_string()],
            }],
        },
        Policy {
            name: "readonly".to_string(),
            version: "2012-10-17".to_string(),
            statements: vec![PolicyStatement {
                effect: Effect::Allow,
                actions: vec!["s3:Get*".to_string(), "s3:List*".to_string()],
                resources: vec!["arn:aws:s3:::*".to_string(), "arn:aws:s3:::*/*".to_string()],
            }],
        },
    ]
}
