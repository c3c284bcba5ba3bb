pub mod auth;
pub mod comments;
pub mod config;
pub mod error;
pub mod feed;
pub mod interactions;
pub mod migrate;
pub mod models;
pub mod openapi;
pub mod payments;
pub mod rate_limit; // in-memory rate limiting
pub mod routes;
pub mod store;

// Re-export commonly used items for tests / external users
pub use comments::{CommentSection, CommentView, PanelState};
pub use error::{ApiError, FeedError};
pub use feed::{FeedConfig, FeedController, FeedState};
pub use interactions::{Interaction, InteractionTracker, Target, ToggleOutcome, ToggleState};
pub use routes::{config, AppState};
pub use store::Store;
