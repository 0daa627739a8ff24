pub mod access_resolver;
pub mod auth_service;
