pub mod config;
pub mod errors;
pub mod folder_lock;
