pub mod error;
pub mod handlers;
pub mod router;
pub mod state;

pub use router::s3_router;
pub use state::AppState;
