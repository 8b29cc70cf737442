use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::codec::CompressionConfig;
use crate::error::{Error, Result};

pub const DEFAULT_CAPACITY_BYTES: usize = 64 * 1024 * 1024;
pub const DEFAULT_PORT: u16 = 6070;

/// VisitCache 本身的配置
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisitCacheConfig {
    /// 字节预算（按压缩后大小记账）
    pub capacity_bytes: usize,
    pub compression: CompressionConfig,
}

impl Default for VisitCacheConfig {
    fn default() -> Self {
        Self {
            capacity_bytes: DEFAULT_CAPACITY_BYTES,
            compression: CompressionConfig::default(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub data_dir: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./visit-cache-data"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
        }
    }
}

/// 进程级配置（TOML），所有字段都有默认值
///
/// ```toml
/// [cache]
/// capacity_bytes = 16777216
///
/// [cache.compression]
/// type = "zstd"
/// level = 3
///
/// [store]
/// data_dir = "/var/lib/visit-cache"
///
/// [server]
/// port = 6070
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub cache: VisitCacheConfig,
    pub store: StoreConfig,
    pub server: ServerConfig,
}

impl AppConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let cfg: AppConfig = toml::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// 文件不存在时使用默认配置
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) if p.exists() => Self::load(p),
            Some(p) => {
                tracing::warn!("Config {:?} not found, using defaults", p);
                Ok(Self::default())
            }
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let c = &self.cache.compression;
        if c.threshold == 0 || c.threshold > 100 {
            return Err(Error::Config(format!(
                "compression threshold must be in 1..=100, got {}",
                c.threshold
            )));
        }
        if self.cache.capacity_bytes == 0 {
            return Err(Error::Config("cache capacity_bytes must be > 0".into()));
        }
        Ok(())
    }
}
