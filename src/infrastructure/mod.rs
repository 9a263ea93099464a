// Infrastructure layer - External dependencies and adapters
pub mod config;
pub mod scope_transport;
