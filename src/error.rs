use crate::codec::CompressionType;

/// visit-cache 的统一错误类型。
///
/// “id 不存在”不是错误：缺失的文档只是不出现在结果里。
/// 重叠的 KeySet 属于调用方违约：库内默认 panic，
/// 只有 `try_read` 这类入口才把它变成 `BatchOverlap` 交给上层。
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("backing store failure: {0}")]
    Store(String),

    #[error("{codec} codec failure: {message}")]
    Codec {
        codec: CompressionType,
        message: String,
    },

    #[error("decompressed length mismatch: expected {expected} bytes, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("blob set checksum mismatch: {expected:#018x} != {actual:#018x}")]
    ChecksumMismatch { expected: u64, actual: u64 },

    #[error("visit batch conflicts with cached batches: {0}")]
    BatchOverlap(String),

    #[error("invalid config: {0}")]
    Config(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Config(e.to_string())
    }
}
