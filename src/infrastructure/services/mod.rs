pub mod entry_creator_registry;
pub mod metadata_cache;
pub mod payload_codec;
pub mod properties_store;

pub use entry_creator_registry::{EntryCreator, EntryCreatorRegistry};
pub use metadata_cache::{CacheStats, MetadataCache};
pub use payload_codec::{JsonObjectCodec, ObjectCodec};
