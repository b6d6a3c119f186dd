pub mod config;
pub mod credentials;
pub mod engine;
pub mod runtime;
pub mod shutdown;
pub mod store;
