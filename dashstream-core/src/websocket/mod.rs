pub mod connection;
pub mod handler;
pub mod hub;
pub mod queue;
