pub mod backing;
pub mod log;
pub mod memory;

use crate::error::Result;

/// 持久文档存储边界（backing store）。
///
/// ## 契约
/// - `visit` 对每个存在的 id 调用一次 `visitor(id, payload)`，顺序由存储决定。
/// - 不存在的 id 直接跳过，不是错误。
/// - 存储层故障以 `Err` 返回，整次 visit 视为失败。
pub trait DocumentStore: Send + Sync {
    fn visit(&self, ids: &[u32], visitor: &mut dyn FnMut(u32, &[u8])) -> Result<()>;
}

/// 可写存储：写入/删除后由 VisitCache 负责失效缓存
pub trait MutableDocumentStore: DocumentStore {
    fn put(&self, id: u32, payload: &[u8]) -> Result<()>;

    /// 返回该 id 之前是否存在
    fn remove(&self, id: u32) -> Result<bool>;
}

impl<S: DocumentStore + ?Sized> DocumentStore for std::sync::Arc<S> {
    fn visit(&self, ids: &[u32], visitor: &mut dyn FnMut(u32, &[u8])) -> Result<()> {
        (**self).visit(ids, visitor)
    }
}

impl<S: MutableDocumentStore + ?Sized> MutableDocumentStore for std::sync::Arc<S> {
    fn put(&self, id: u32, payload: &[u8]) -> Result<()> {
        (**self).put(id, payload)
    }

    fn remove(&self, id: u32) -> Result<bool> {
        (**self).remove(id)
    }
}

pub use backing::BackingStore;
pub use log::{LogReplayResult, LogStore};
pub use memory::MemoryStore;
