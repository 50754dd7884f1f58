use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{ImageError, ImageErrorKind, ImageResult};

/// Size reported for raw devices.
///
/// Some platforms cannot report the true size of a raw device yet allow
/// reading past the reported end. The parser is told the device is this large
/// so it reads beyond the OS boundary instead of refusing to.
pub const DEFAULT_REPORTED_DEVICE_SIZE: u64 = 1_000_000_000_000;

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(600);

/// Parser-synthesised entries that never show up in listings.
pub const DEFAULT_HIDDEN_ENTRIES: &[&str] = &["$OrphanFiles"];

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageFsConfig {
    /// How long a parsed filesystem stays cached after it was inserted.
    #[serde(rename = "cache_ttl_secs", with = "duration_secs")]
    pub cache_ttl: Duration,
    /// Size the image byte source reports to the parser.
    pub reported_device_size: u64,
    /// Entry names excluded from directory listings.
    pub hidden_entries: Vec<String>,
}

impl Default for ImageFsConfig {
    fn default() -> Self {
        Self {
            cache_ttl: DEFAULT_CACHE_TTL,
            reported_device_size: DEFAULT_REPORTED_DEVICE_SIZE,
            hidden_entries: DEFAULT_HIDDEN_ENTRIES
                .iter()
                .map(|name| name.to_string())
                .collect(),
        }
    }
}

impl ImageFsConfig {
    pub fn from_toml_str(input: &str) -> ImageResult<Self> {
        let config: Self = toml::from_str(input).map_err(|err| {
            ImageError::with_source(ImageErrorKind::InvalidInput, "image.config.parse", err)
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn validate(&self) -> ImageResult<()> {
        if self.cache_ttl.is_zero() {
            return Err(ImageError::new(
                ImageErrorKind::InvalidInput,
                "image.config.cache_ttl",
            ));
        }
        if self.reported_device_size == 0 {
            return Err(ImageError::new(
                ImageErrorKind::InvalidInput,
                "image.config.reported_device_size",
            ));
        }
        Ok(())
    }

    pub fn is_hidden(&self, name: &str) -> bool {
        self.hidden_entries.iter().any(|hidden| hidden == name)
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
