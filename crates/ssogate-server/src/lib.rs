pub mod config;
pub mod observability;
pub mod proxy;
pub mod server;

pub use server::{GatewayServer, build_router};
