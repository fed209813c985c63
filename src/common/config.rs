use std::path::PathBuf;

/// Cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of metadata descriptors kept resident
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 1_000,
        }
    }
}

/// Configuration of a local repository
#[derive(Debug, Clone)]
pub struct RepositoryConfig {
    /// Display name, first segment of every location
    pub name: String,
    /// Directory backing the repository root
    pub root_path: PathBuf,
    /// Value written to the `owner` property of new entries
    pub owner: String,
    /// Metadata cache configuration
    pub cache: CacheConfig,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            name: "Local Repository".to_string(),
            root_path: PathBuf::from("./repository"),
            owner: default_owner(),
            cache: CacheConfig::default(),
        }
    }
}

impl RepositoryConfig {
    /// Creates a configuration for `root_path` with defaults for everything else
    pub fn new<S: Into<String>, P: Into<PathBuf>>(name: S, root_path: P) -> Self {
        Self {
            name: name.into(),
            root_path: root_path.into(),
            ..Self::default()
        }
    }

    /// Loads the configuration from `LOCALREPO_*` environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(name) = std::env::var("LOCALREPO_NAME") {
            if !name.trim().is_empty() {
                config.name = name;
            }
        }

        if let Ok(root) = std::env::var("LOCALREPO_ROOT") {
            config.root_path = PathBuf::from(root);
        }

        if let Ok(owner) = std::env::var("LOCALREPO_OWNER") {
            config.owner = owner;
        }

        if let Ok(entries) = std::env::var("LOCALREPO_METADATA_CACHE_ENTRIES") {
            match entries.parse::<usize>() {
                Ok(n) if n > 0 => config.cache.max_entries = n,
                _ => tracing::warn!("Ignoring invalid LOCALREPO_METADATA_CACHE_ENTRIES: {}", entries),
            }
        }

        config
    }

    /// Sets the metadata cache capacity
    pub fn with_cache_entries(mut self, max_entries: usize) -> Self {
        self.cache.max_entries = max_entries.max(1);
        self
    }
}

fn default_owner() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}
