pub mod auth;
pub mod catalog;
pub mod quota;
pub mod uploads;
