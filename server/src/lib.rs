pub mod app;
pub mod attachments;
pub mod cart;
pub mod config;
pub mod error;
pub mod handlers;
pub mod identity;
pub mod messages;
pub mod notices;
pub mod payment;
pub mod policy;
pub mod realtime;
pub mod sessions;
pub mod store;
pub mod types;
pub mod ws;
