pub mod connections_policy;
pub mod path_service;
