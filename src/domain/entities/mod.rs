pub mod data_entry;
pub mod entry;
pub mod folder;
pub mod payload;
