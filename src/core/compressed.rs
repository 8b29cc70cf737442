use std::sync::Arc;

use xxhash_rust::xxh3::xxh3_64;

use crate::codec::{self, CompressionConfig, CompressionType};
use crate::core::blob_set::{buffer_len, BlobSet, Position};
use crate::error::{Error, Result};

/// BlobSet 的压缩态（缓存里实际存放的 value）。
///
/// - positions 与未压缩布局完全相同（offset 指向解压后的 buffer）
/// - checksum 为未压缩 buffer 的 xxh3，解压时校验，防止返回错误的文档内容
/// - 内部全部 `Arc`，命中时 clone 给调用方不拷贝数据
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompressedBlobSet {
    codec: CompressionType,
    positions: Arc<[Position]>,
    buffer: Arc<[u8]>,
    checksum: u64,
}

impl Default for CompressedBlobSet {
    /// “什么都没找到”的规范空结果
    fn default() -> Self {
        Self {
            codec: CompressionType::Lz4,
            positions: Arc::from(Vec::new()),
            buffer: Arc::from(Vec::new()),
            checksum: 0,
        }
    }
}

impl CompressedBlobSet {
    pub fn empty() -> Self {
        Self::default()
    }

    /// 压缩整个 BlobSet；空集合不调用 codec，直接返回空结果。
    pub fn new(config: &CompressionConfig, uncompressed: &BlobSet) -> Result<Self> {
        if uncompressed.is_empty() {
            return Ok(Self::empty());
        }

        let raw = uncompressed.buffer();
        let (codec, compressed) = codec::compress(config, raw)?;
        Ok(Self {
            codec,
            positions: Arc::from(uncompressed.positions()),
            buffer: Arc::from(compressed),
            checksum: xxh3_64(raw),
        })
    }

    /// 解压回 BlobSet（长度与 checksum 不符即报错）
    pub fn decompress(&self) -> Result<BlobSet> {
        if self.positions.is_empty() {
            return Ok(BlobSet::new());
        }

        let expected_len = buffer_len(&self.positions);
        let raw = codec::decompress(self.codec, expected_len, &self.buffer)?;
        let actual = xxh3_64(&raw);
        if actual != self.checksum {
            return Err(Error::ChecksumMismatch {
                expected: self.checksum,
                actual,
            });
        }
        Ok(BlobSet::from_parts(self.positions.to_vec(), raw))
    }

    /// 缓存记账用的字节数：压缩 buffer + position 表
    pub fn size(&self) -> usize {
        self.buffer.len() + self.positions.len() * std::mem::size_of::<Position>()
    }

    pub fn codec(&self) -> CompressionType {
        self.codec
    }

    pub fn positions(&self) -> &[Position] {
        &self.positions
    }

    pub fn compressed_bytes(&self) -> &[u8] {
        &self.buffer
    }

    /// 未压缩时的 buffer 长度
    pub fn uncompressed_len(&self) -> usize {
        buffer_len(&self.positions)
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.positions.iter().map(|p| p.id)
    }

    #[cfg(test)]
    pub(crate) fn corrupt_for_test(&mut self) {
        let mut bytes = self.buffer.to_vec();
        if let Some(b) = bytes.last_mut() {
            *b ^= 0xFF;
        }
        self.buffer = Arc::from(bytes);
    }
}
