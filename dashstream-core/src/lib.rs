pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod events;
pub mod feeds;
pub mod models;
pub mod server;
pub mod state;
pub mod subscription;
pub mod upstream;
pub mod visualizer;
pub mod websocket;

pub use config::Config;
pub use server::Server;
pub use state::AppState;
