pub mod authorizer;
pub mod policy;
pub mod store;
pub mod system;
pub mod types;

pub use authorizer::{AclAuthorizer, BucketAuthorizer, RequestType};
pub use policy::{PolicyDecision, evaluate_policy};
pub use store::IamStore;
pub use system::IAMSys;
pub use types::{Effect, Policy, PolicyStatement, User};
