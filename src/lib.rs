pub mod connection;
pub mod error;
pub mod events;
pub mod models;
pub mod notifications;
pub mod presence;
pub mod services;
pub mod stream;
pub mod typing;
