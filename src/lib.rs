// Gateway identity claims
pub mod auth;

// Token encryption
pub mod cipher;

// Per-user connection documents
pub mod store;

// GitHub OAuth provider calls
pub mod oauth;

// Connection lifecycle (connect, callback, status, disconnect)
pub mod connection;

// HTTP APIs
pub mod api;

// Startup configuration
pub mod config;
