pub mod attendance;
pub mod auth;
pub mod backup;
pub mod core;
pub mod grades;
pub mod modules;
pub mod reports;
pub mod sessions;
pub mod transcript;
pub mod users;
