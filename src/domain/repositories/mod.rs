pub mod repository_listener;
