//! The inbox backends. Each module implements [`crate::engine::Service`]
//! for one external service; all lifecycle behavior lives in the engine.

pub mod fastmail;
pub mod gitlab;
pub mod gmail;
pub mod marvin;
pub mod todoist;
pub mod ynab;

pub use fastmail::FastmailService;
pub use gitlab::GitLabService;
pub use gmail::GmailService;
pub use marvin::MarvinService;
pub use todoist::TodoistService;
pub use ynab::YnabService;
