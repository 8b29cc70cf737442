/// 单个 payload 在连续 buffer 中的位置（按 append 顺序分配 offset）
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Position {
    pub id: u32,
    pub offset: usize,
    pub len: usize,
}

impl Position {
    pub fn range(self) -> std::ops::Range<usize> {
        self.offset..(self.offset + self.len)
    }

    pub fn end(self) -> usize {
        self.offset + self.len
    }
}

/// positions 描述的 buffer 总长度（最后一个 position 的结尾）
pub(crate) fn buffer_len(positions: &[Position]) -> usize {
    positions.last().map(|p| p.end()).unwrap_or(0)
}

/// 未压缩的 (id -> payload) 集合：一块 append-only arena + offset 表。
///
/// 一个 BlobSet 只由一次 backing store visit 构建，不支持更新/删除已有 id。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BlobSet {
    positions: Vec<Position>,
    buffer: Vec<u8>,
}

impl BlobSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// 由已有布局重建（解压路径使用）
    pub(crate) fn from_parts(positions: Vec<Position>, buffer: Vec<u8>) -> Self {
        debug_assert_eq!(buffer_len(&positions), buffer.len());
        Self { positions, buffer }
    }

    pub fn append(&mut self, id: u32, payload: &[u8]) {
        self.positions.push(Position {
            id,
            offset: self.buffer.len(),
            len: payload.len(),
        });
        self.buffer.extend_from_slice(payload);
    }

    /// 线性扫描：集合大小受单次请求 batch 约束，足够小
    pub fn get(&self, id: u32) -> Option<&[u8]> {
        self.positions
            .iter()
            .find(|p| p.id == id)
            .map(|p| &self.buffer[p.range()])
    }

    pub fn positions(&self) -> &[Position] {
        &self.positions
    }

    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// 按 append 顺序遍历 (id, payload)
    pub fn iter(&self) -> impl Iterator<Item = (u32, &[u8])> + '_ {
        self.positions
            .iter()
            .map(move |p| (p.id, &self.buffer[p.range()]))
    }
}
