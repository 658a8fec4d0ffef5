pub mod auth;
pub mod message;
pub mod node;
pub mod topic;
