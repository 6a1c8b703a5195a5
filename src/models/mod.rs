pub mod connection;
pub mod digest;
pub mod email_event;
pub mod metric;
pub mod user;
