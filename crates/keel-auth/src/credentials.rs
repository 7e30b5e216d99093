use std::sync::Arc;

use keel_common::Requester;
use keel_iam::IAMSys;

#[derive(Clone, Debug)]
pub struct Credentials {
    pub access_key: String,
    pub secret_key: String,
    pub requester: Requester,
}

pub trait CredentialProvider: Send + Sync {
    fn lookup(&self, access_key: &str) -> Option<Credentials>;
}

/// Fixed credential set, mostly useful in tests.
#[derive(Clone, Debug, Default)]
pub struct StaticCredentialProvider {
    entries: Vec<Credentials>,
}

impl StaticCredentialProvider {
    pub fn new(credentials: impl IntoIterator<Item = Credentials>) -> Self {
        Self {
            entries: credentials
                .into_iter()
                .filter(|cred| !cred.access_key.is_empty() && !cred.secret_key.is_empty())
                .collect(),
        }
    }
}

impl CredentialProvider for StaticCredentialProvider {
    fn lookup(&self, access_key: &str) -> Option<Credentials> {
        self.entries
            .iter()
            .find(|cred| cred.access_key == access_key)
            .cloned()
    }
}

/// Resolves access keys against the identity system.
#[derive(Clone, Debug)]
pub struct IamCredentialProvider {
    iam: Arc<IAMSys>,
}

impl IamCredentialProvider {
    pub fn new(iam: Arc<IAMSys>) -> Self {
        Self { iam }
    }
}

impl CredentialProvider for IamCredentialProvider {
    fn lookup(&self, access_key: &str) -> Option<Credentials> {
        let user = self.iam.get_user(access_key).ok().flatten()?;
        Some(Credentials {
            access_key: user.access_key.clone(),
            secret_key: user.secret_key.clone(),
            requester: user.requester(),
        })
    }
}

impl CredentialProvider for Arc<dyn CredentialProvider> {
    fn lookup(&self, access_key: &str) -> Option<Credentials> {
        self.as_ref().lookup(access_key)
    }
}
