//! Tunables for the offset tree and the piece-table file model.

/// Default maximum number of pairs per node.
pub const DEFAULT_MAX_PAIRS: usize = 16;
/// Smallest order for which split and merge keep every node within bounds.
pub const MIN_MAX_PAIRS: usize = 3;
/// Size of one relocation chunk during `write` (128 MiB).
pub const DEFAULT_WRITE_CHUNK: u64 = 128 * 1024 * 1024;

pub const ENV_MAX_PAIRS: &str = "HEXED_MAX_PAIRS";
pub const ENV_CACHE_SLACK: &str = "HEXED_CACHE_SLACK";
pub const ENV_WRITE_CHUNK: &str = "HEXED_WRITE_CHUNK";

/// Fan-out bounds of an offset tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TreeOrder {
    pub max_pairs: usize,
    /// `⌈(max_pairs - 1) / 2⌉`; only the root may hold fewer pairs.
    pub min_pairs: usize,
}

impl TreeOrder {
    /// # Errors
    ///
    /// - `PieceError::InvalidConfig` if `max_pairs` is below [`MIN_MAX_PAIRS`].
    pub fn new(max_pairs: usize) -> crate::errors::PieceResult<Self> {
        if max_pairs < MIN_MAX_PAIRS {
            return Err(crate::errors::PieceError::InvalidConfig(format!(
                "max_pairs must be at least {MIN_MAX_PAIRS}, got {max_pairs}"
            )));
        }

        Ok(Self {
            max_pairs,
            min_pairs: (max_pairs - 1).div_ceil(2),
        })
    }
}

impl Default for TreeOrder {
    fn default() -> Self {
        Self {
            max_pairs: DEFAULT_MAX_PAIRS,
            min_pairs: (DEFAULT_MAX_PAIRS - 1).div_ceil(2),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PieceConfig {
    /// Maximum pairs per tree node.
    pub max_pairs: usize,
    /// Read-ahead on both sides of a missed file read.
    pub cache_slack: u64,
    /// Upper bound on bytes moved per read/write call during `write`.
    pub write_chunk: u64,
}

impl Default for PieceConfig {
    fn default() -> Self {
        Self {
            max_pairs: DEFAULT_MAX_PAIRS,
            cache_slack: io::window::DEFAULT_SLACK,
            write_chunk: DEFAULT_WRITE_CHUNK,
        }
    }
}

impl PieceConfig {
    /// # Errors
    ///
    /// - `PieceError::InvalidConfig` for an order below [`MIN_MAX_PAIRS`] or a
    ///   zero `write_chunk` / `cache_slack`.
    pub fn validate(&self) -> crate::errors::PieceResult<TreeOrder> {
        if self.write_chunk == 0 {
            return Err(crate::errors::PieceError::InvalidConfig(
                "write_chunk must be greater than zero".to_string(),
            ));
        }

        if self.cache_slack == 0 {
            return Err(crate::errors::PieceError::InvalidConfig(
                "cache_slack must be greater than zero".to_string(),
            ));
        }

        TreeOrder::new(self.max_pairs)
    }

    /// Defaults overridden by `HEXED_MAX_PAIRS`, `HEXED_CACHE_SLACK` and
    /// `HEXED_WRITE_CHUNK`. Unset or blank variables keep the default.
    ///
    /// # Errors
    ///
    /// - `PieceError::InvalidConfig` if a variable is not a valid integer or
    ///   the resulting configuration does not validate.
    pub fn from_env() -> crate::errors::PieceResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> crate::errors::PieceResult<Self> {
        let mut config = Self::default();

        if let Some(value) = parse_var(&lookup, ENV_MAX_PAIRS)? {
            config.max_pairs = crate::errors::to_usize(value)?;
        }

        if let Some(value) = parse_var(&lookup, ENV_CACHE_SLACK)? {
            config.cache_slack = value;
        }

        if let Some(value) = parse_var(&lookup, ENV_WRITE_CHUNK)? {
            config.write_chunk = value;
        }

        config.validate()?;

        Ok(config)
    }
}

fn parse_var(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> crate::errors::PieceResult<Option<u64>> {
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    let trimmed = raw.trim();

    if trimmed.is_empty() {
        return Ok(None);
    }

    trimmed.parse::<u64>().map(Some).map_err(|_| {
        crate::errors::PieceError::InvalidConfig(format!("{key}: invalid integer '{raw}'"))
    })
}
