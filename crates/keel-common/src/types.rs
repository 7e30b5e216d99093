use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const ALL_USERS_GROUP: &str = "http://acs.amazonaws.com/groups/global/AllUsers";
pub const AUTHENTICATED_USERS_GROUP: &str =
    "http://acs.amazonaws.com/groups/global/AuthenticatedUsers";

/// Metadata schema version written for newly created buckets.
pub const CURRENT_SCHEMA_VERSION: u32 = 2;

/// Identity of the caller as established by request authentication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requester {
    pub canonical_id: String,
    pub arn: Option<String>,
    pub access_key: Option<String>,
    pub display_name: String,
}

impl Requester {
    pub fn anonymous() -> Self {
        Self {
            canonical_id: ALL_USERS_GROUP.to_string(),
            arn: None,
            access_key: None,
            display_name: String::new(),
        }
    }

    pub fn account(canonical_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            canonical_id: canonical_id.into(),
            arn: None,
            access_key: None,
            display_name: display_name.into(),
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.canonical_id == ALL_USERS_GROUP
    }

    pub fn is_iam_principal(&self) -> bool {
        self.arn.is_some()
    }

    /// The id recorded as initiator of uploads: the ARN for IAM principals,
    /// the canonical id otherwise.
    pub fn principal_id(&self) -> &str {
        self.arn.as_deref().unwrap_or(&self.canonical_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SseConfig {
    pub algorithm: String,
    pub master_key_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Permission {
    Read,
    Write,
    FullControl,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    pub grantee: String,
    pub permission: Permission,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketAcl {
    #[serde(default)]
    pub grants: Vec<Grant>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bucket {
    pub name: String,
    pub owner: String,
    #[serde(default)]
    pub owner_display_name: String,
    pub created: DateTime<Utc>,
    #[serde(default)]
    pub acl: BucketAcl,
    #[serde(default)]
    pub server_side_encryption: Option<SseConfig>,
    pub schema_version: u32,
}

impl Bucket {
    pub fn new(name: impl Into<String>, owner: &Requester) -> Self {
        Self {
            name: name.into(),
            owner: owner.canonical_id.clone(),
            owner_display_name: owner.display_name.clone(),
            created: Utc::now(),
            acl: BucketAcl::default(),
            server_side_encryption: None,
            schema_version: CURRENT_SCHEMA_VERSION,
        }
    }

    pub fn with_encryption(mut self, sse: SseConfig) -> Self {
        self.server_side_encryption = Some(sse);
        self
    }

    pub fn with_schema_version(mut self, version: u32) -> Self {
        self.schema_version = version;
        self
    }

    pub fn with_grant(mut self, grantee: impl Into<String>, permission: Permission) -> Self {
        self.acl.grants.push(Grant {
            grantee: grantee.into(),
            permission,
        });
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Initiator {
    pub id: String,
    #[serde(default)]
    pub display_name: String,
}

/// Marker for an in-progress upload, stored in the shadow bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverviewRecord {
    pub key: String,
    pub upload_id: String,
    pub initiator: Initiator,
    pub owner_id: String,
    pub initiated: DateTime<Utc>,
}

/// Backend handle for stored bytes, annotated with encryption fields when the
/// bytes were written under a cipher bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataLocation {
    pub key: String,
    pub data_store_name: String,
    pub start: u64,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sse_algorithm: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sse_master_key_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sse_crypto_scheme: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sse_ciphered_data_key: Option<String>,
}

impl DataLocation {
    pub fn is_encrypted(&self) -> bool {
        self.sse_ciphered_data_key.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartRecord {
    pub part_number: String,
    #[serde(rename = "contentMD5")]
    pub content_md5: String,
    pub size: u64,
    pub upload_id: String,
    pub splitter: char,
    pub data_location: Vec<DataLocation>,
    pub last_modified: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum MetadataRecord {
    Overview(OverviewRecord),
    Part(PartRecord),
}

impl MetadataRecord {
    pub fn as_overview(&self) -> Option<&OverviewRecord> {
        match self {
            Self::Overview(record) => Some(record),
            Self::Part(_) => None,
        }
    }

    pub fn as_part(&self) -> Option<&PartRecord> {
        match self {
            Self::Part(record) => Some(record),
            Self::Overview(_) => None,
        }
    }
}
