use figment::{
  Figment,
  providers::{Env, Serialized},
};
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::align::is_aligned;
use crate::error::ConfigError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[validate(schema(function = validate_alignment))]
#[serde(default)]
pub struct AllocatorConfig {
  /// Size of the free block `init` formats between the sentinels. At most
  /// 64 MiB, like `growth_increment`.
  #[validate(range(min = 32, max = 67108864))]
  pub initial_chunk: usize,

  /// Minimum number of bytes requested from the extender on a miss.
  #[validate(range(min = 32, max = 67108864))]
  pub growth_increment: usize,

  /// Upper bound handed to the extenders built from this config.
  #[validate(range(min = 4096))]
  pub max_heap: usize,
}

impl Default for AllocatorConfig {
  fn default() -> Self {
    Self {
      initial_chunk: 4 * 1024,
      growth_increment: 4 * 1024,
      max_heap: 20 * 1024 * 1024,
    }
  }
}

impl AllocatorConfig {
  /// Compiled-in defaults overlaid with `SEGALLOC_INITIAL_CHUNK`,
  /// `SEGALLOC_GROWTH_INCREMENT` and `SEGALLOC_MAX_HEAP`.
  pub fn load() -> Result<Self, ConfigError> {
    let figment = Figment::from(Serialized::defaults(Self::default()));
    Self::from_figment(figment.merge(Env::prefixed("SEGALLOC_")))
  }

  pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
    let config: Self = figment.extract()?;
    config.validate()?;
    Ok(config)
  }
}

fn validate_alignment(config: &AllocatorConfig) -> Result<(), ValidationError> {
  if is_aligned(config.initial_chunk) && is_aligned(config.growth_increment) {
    Ok(())
  } else {
    Err(ValidationError::new("chunk_not_aligned"))
  }
}
