pub mod audio;
pub mod auth;
pub mod chat;
pub mod files;
pub mod settings;
pub mod system;
pub mod training;
pub mod users;
pub mod voice;
