use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// 压缩算法标签（落在 CompressedBlobSet 里，解压时按它对称还原）
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionType {
    /// 原样存储（未开启压缩，或压缩收益不足）
    None,
    #[default]
    Lz4,
    Zstd,
}

impl CompressionType {
    pub fn is_none(&self) -> bool {
        matches!(self, CompressionType::None)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CompressionType::None => "none",
            CompressionType::Lz4 => "lz4",
            CompressionType::Zstd => "zstd",
        }
    }
}

impl fmt::Display for CompressionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CompressionType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(CompressionType::None),
            "lz4" => Ok(CompressionType::Lz4),
            "zstd" => Ok(CompressionType::Zstd),
            other => Err(Error::Config(format!("unknown compression type: {other}"))),
        }
    }
}

impl TryFrom<u8> for CompressionType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(CompressionType::None),
            1 => Ok(CompressionType::Lz4),
            2 => Ok(CompressionType::Zstd),
            _ => Err(Error::Config(format!("invalid compression tag: {value}"))),
        }
    }
}

impl From<CompressionType> for u8 {
    fn from(value: CompressionType) -> Self {
        match value {
            CompressionType::None => 0,
            CompressionType::Lz4 => 1,
            CompressionType::Zstd => 2,
        }
    }
}

/// 压缩配置
///
/// - `level`：仅 zstd 使用；lz4 忽略
/// - `threshold`：压缩结果必须小于原始长度的 `threshold`% 才采用，否则原样存储
/// - `min_size`：短于该长度的 buffer 不尝试压缩
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    #[serde(rename = "type")]
    pub kind: CompressionType,
    pub level: i32,
    pub threshold: u8,
    pub min_size: usize,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            kind: CompressionType::Lz4,
            level: 9,
            threshold: 90,
            min_size: 0,
        }
    }
}

impl CompressionConfig {
    pub fn new(kind: CompressionType) -> Self {
        Self {
            kind,
            ..Self::default()
        }
    }

    pub fn uncompressed() -> Self {
        Self::new(CompressionType::None)
    }

    pub fn with_level(mut self, level: i32) -> Self {
        self.level = level;
        self
    }

    pub fn with_threshold(mut self, threshold: u8) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_min_size(mut self, min_size: usize) -> Self {
        self.min_size = min_size;
        self
    }

    /// 压缩结果是否“划算”（严格小于 threshold%）
    fn accepts(&self, original: usize, compressed: usize) -> bool {
        (compressed as u128) * 100 < (original as u128) * (self.threshold as u128)
    }
}

/// 压缩整块 buffer，返回实际采用的算法标签与数据。
///
/// 算法可能选择原样存储（tag = None），调用方必须记录返回的 tag。
pub fn compress(config: &CompressionConfig, data: &[u8]) -> Result<(CompressionType, Vec<u8>)> {
    if config.kind.is_none() || data.len() < config.min_size || data.is_empty() {
        return Ok((CompressionType::None, data.to_vec()));
    }

    let compressed = match config.kind {
        CompressionType::None => unreachable!(),
        CompressionType::Lz4 => lz4_flex::block::compress(data),
        CompressionType::Zstd => {
            zstd::bulk::compress(data, config.level).map_err(|e| Error::Codec {
                codec: CompressionType::Zstd,
                message: e.to_string(),
            })?
        }
    };

    if config.accepts(data.len(), compressed.len()) {
        Ok((config.kind, compressed))
    } else {
        tracing::trace!(
            "{} gained too little ({} -> {} bytes), storing verbatim",
            config.kind,
            data.len(),
            compressed.len()
        );
        Ok((CompressionType::None, data.to_vec()))
    }
}

/// `compress` 的逆操作；`length_hint` 是原始长度，解出的长度不一致视为 codec 错误。
pub fn decompress(kind: CompressionType, length_hint: usize, data: &[u8]) -> Result<Vec<u8>> {
    let out = match kind {
        CompressionType::None => data.to_vec(),
        CompressionType::Lz4 => {
            lz4_flex::block::decompress(data, length_hint).map_err(|e| Error::Codec {
                codec: kind,
                message: e.to_string(),
            })?
        }
        CompressionType::Zstd => {
            zstd::bulk::decompress(data, length_hint).map_err(|e| Error::Codec {
                codec: kind,
                message: e.to_string(),
            })?
        }
    };

    if out.len() != length_hint {
        return Err(Error::LengthMismatch {
            expected: length_hint,
            actual: out.len(),
        });
    }
    Ok(out)
}
