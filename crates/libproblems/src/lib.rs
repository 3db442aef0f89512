pub mod auth;
pub mod broker;
pub mod element;
pub mod entry;
pub mod error;
pub mod limits;
pub mod ratelimit;
pub mod session;
pub mod store;
pub mod task;
