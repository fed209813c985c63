pub mod entry_fs_repository;
pub mod local_repository;

pub use local_repository::{Repository, RepositoryBuilder};
