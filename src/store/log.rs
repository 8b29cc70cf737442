use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use xxhash_rust::xxh32::xxh32;

use crate::error::{Error, Result};
use crate::store::{DocumentStore, MutableDocumentStore};

const LOG_MAGIC: u32 = 0x3143_4F44; // "DOC1"
const LOG_VERSION: u32 = 1;
const FILE_HEADER_SIZE: u64 = 8;
const RECORD_HEADER_SIZE: usize = 1 + 4 + 4 + 4; // kind + id + len + checksum

const KIND_PUT: u8 = 1;
const KIND_REMOVE: u8 = 2;

/// 文档在日志文件中的位置（payload 起点 + 长度）
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
struct Slot {
    offset: u64,
    len: u32,
}

/// 记录头：`kind:u8 | id:u32 | len:u32 | checksum:u32`（小端）
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
struct RecordHeader {
    kind: u8,
    id: u32,
    len: u32,
    checksum: u32,
}

impl RecordHeader {
    fn for_payload(kind: u8, id: u32, payload: &[u8]) -> Self {
        Self {
            kind,
            id,
            len: payload.len() as u32,
            checksum: xxh32(payload, id),
        }
    }

    fn encode(&self, out: &mut Vec<u8>) {
        out.push(self.kind);
        out.extend_from_slice(&self.id.to_le_bytes());
        out.extend_from_slice(&self.len.to_le_bytes());
        out.extend_from_slice(&self.checksum.to_le_bytes());
    }

    fn decode(b: &[u8; RECORD_HEADER_SIZE]) -> Self {
        Self {
            kind: b[0],
            id: u32::from_le_bytes([b[1], b[2], b[3], b[4]]),
            len: u32::from_le_bytes([b[5], b[6], b[7], b[8]]),
            checksum: u32::from_le_bytes([b[9], b[10], b[11], b[12]]),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LogReplayResult {
    pub live_documents: usize,
    pub records_replayed: usize,
    pub truncated_tail_records: usize,
}

struct LogInner {
    writer: File,
    /// 最后一条完整记录的末尾
    end: u64,
    index: HashMap<u32, Slot>,
    /// 半条记录没能截掉：拒绝后续写入，重新 open 时由回放清理
    poisoned: bool,
}

/// Append-only 文档日志（backing store 的落盘实现）。
///
/// 记录格式：`kind:u8 | id:u32 | len:u32 | xxh32(payload, seed=id):u32 | payload`
///
/// - put/remove 都是追加写，旧记录不覆盖
/// - open 时回放全部记录重建 id -> Slot 索引
/// - 尾部截断/校验失败：停止回放并把文件截到最后一条完整记录
/// - 追加失败时截回 `end`，保证索引里的 offset 与文件一致
/// - visit 在锁内只取 Slot 快照，整条记录用 `read_exact_at` 在锁外读，
///   header 与 xxh32 不符时报错，不把错位的字节当文档返回
pub struct LogStore {
    path: PathBuf,
    reader: File,
    inner: Mutex<LogInner>,
    replay: LogReplayResult,
}

impl LogStore {
    pub fn open_in_dir(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join("docs.log");
        open_or_init(&path)?;

        let (index, end, replay) = replay_log(&path)?;
        if replay.truncated_tail_records > 0 {
            tracing::warn!(
                "Document log {:?}: dropped {} corrupt tail record(s), truncating to {} bytes",
                path,
                replay.truncated_tail_records,
                end
            );
            let f = OpenOptions::new().write(true).open(&path)?;
            f.set_len(end)?;
            f.sync_all()?;
        }

        let writer = OpenOptions::new().append(true).open(&path)?;
        let reader = File::open(&path)?;
        tracing::info!(
            "Document log opened: {:?} ({} live docs, {} records)",
            path,
            replay.live_documents,
            replay.records_replayed
        );

        Ok(Self {
            path,
            reader,
            inner: Mutex::new(LogInner {
                writer,
                end,
                index,
                poisoned: false,
            }),
            replay,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 打开时的回放结果
    pub fn replay_result(&self) -> &LogReplayResult {
        &self.replay
    }

    pub fn len(&self) -> usize {
        self.inner.lock().index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn sync(&self) -> Result<()> {
        let inner = self.inner.lock();
        inner.writer.sync_data()?;
        Ok(())
    }

    fn append_record(inner: &mut LogInner, kind: u8, id: u32, payload: &[u8]) -> Result<u64> {
        if inner.poisoned {
            return Err(Error::Store(
                "document log has a partial record, reopen to recover".into(),
            ));
        }
        if u32::try_from(payload.len()).is_err() {
            return Err(Error::Store(format!(
                "document {id} too large ({} bytes)",
                payload.len()
            )));
        }

        let mut rec = Vec::with_capacity(RECORD_HEADER_SIZE + payload.len());
        RecordHeader::for_payload(kind, id, payload).encode(&mut rec);
        rec.extend_from_slice(payload);
        if let Err(e) = inner.writer.write_all(&rec) {
            Self::rollback_partial_append(inner)?;
            return Err(e.into());
        }

        let payload_offset = inner.end + RECORD_HEADER_SIZE as u64;
        inner.end += rec.len() as u64;
        Ok(payload_offset)
    }

    /// 把写到一半的记录截掉，文件回到 `end`
    fn rollback_partial_append(inner: &mut LogInner) -> Result<()> {
        if let Err(e) = inner.writer.set_len(inner.end) {
            tracing::error!("Failed to roll back partial log record: {}", e);
            inner.poisoned = true;
            return Err(e.into());
        }
        tracing::warn!("Rolled back partial log record, log end at {} bytes", inner.end);
        Ok(())
    }
}

impl DocumentStore for LogStore {
    fn visit(&self, ids: &[u32], visitor: &mut dyn FnMut(u32, &[u8])) -> Result<()> {
        let slots: Vec<(u32, Slot)> = {
            let inner = self.inner.lock();
            ids.iter()
                .filter_map(|id| inner.index.get(id).map(|s| (*id, *s)))
                .collect()
        };

        let mut buf = Vec::new();
        for (id, slot) in slots {
            let record_offset = slot.offset - RECORD_HEADER_SIZE as u64;
            buf.resize(RECORD_HEADER_SIZE + slot.len as usize, 0);
            self.reader.read_exact_at(&mut buf, record_offset)?;

            let (hdr, payload) = buf.split_at(RECORD_HEADER_SIZE);
            let mut raw = [0u8; RECORD_HEADER_SIZE];
            raw.copy_from_slice(hdr);
            if RecordHeader::decode(&raw) != RecordHeader::for_payload(KIND_PUT, id, payload) {
                return Err(Error::Store(format!(
                    "document {id}: record at offset {record_offset} failed verification"
                )));
            }
            visitor(id, payload);
        }
        Ok(())
    }
}

impl MutableDocumentStore for LogStore {
    fn put(&self, id: u32, payload: &[u8]) -> Result<()> {
        let mut inner = self.inner.lock();
        let offset = Self::append_record(&mut inner, KIND_PUT, id, payload)?;
        inner.writer.flush()?;
        inner.index.insert(
            id,
            Slot {
                offset,
                len: payload.len() as u32,
            },
        );
        Ok(())
    }

    fn remove(&self, id: u32) -> Result<bool> {
        let mut inner = self.inner.lock();
        if !inner.index.contains_key(&id) {
            return Ok(false);
        }
        Self::append_record(&mut inner, KIND_REMOVE, id, &[])?;
        inner.writer.flush()?;
        inner.index.remove(&id);
        Ok(true)
    }
}

fn write_header(f: &mut File) -> Result<()> {
    f.write_all(&LOG_MAGIC.to_le_bytes())?;
    f.write_all(&LOG_VERSION.to_le_bytes())?;
    f.flush()?;
    Ok(())
}

fn open_or_init(path: &Path) -> Result<()> {
    let mut f = OpenOptions::new()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(path)?;

    let mut hdr = [0u8; FILE_HEADER_SIZE as usize];
    f.seek(SeekFrom::Start(0))?;
    if f.read_exact(&mut hdr).is_err() {
        // 空文件/截断：重写 header
        f.set_len(0)?;
        f.seek(SeekFrom::Start(0))?;
        return write_header(&mut f);
    }

    let magic = u32::from_le_bytes([hdr[0], hdr[1], hdr[2], hdr[3]]);
    let ver = u32::from_le_bytes([hdr[4], hdr[5], hdr[6], hdr[7]]);
    if magic != LOG_MAGIC || ver != LOG_VERSION {
        return Err(Error::Store(format!(
            "{:?} is not a document log (magic {:#x}, version {})",
            path, magic, ver
        )));
    }
    Ok(())
}

fn replay_log(path: &Path) -> Result<(HashMap<u32, Slot>, u64, LogReplayResult)> {
    let file = File::open(path)?;
    let file_len = file.metadata()?.len();
    let mut r = BufReader::new(file);
    r.seek(SeekFrom::Start(FILE_HEADER_SIZE))?;

    let mut index = HashMap::new();
    let mut result = LogReplayResult::default();
    let mut pos = FILE_HEADER_SIZE;
    let mut payload = Vec::new();

    while pos < file_len {
        // 半条 header：崩溃时写到一半
        if pos + RECORD_HEADER_SIZE as u64 > file_len {
            result.truncated_tail_records += 1;
            break;
        }
        let mut hdr = [0u8; RECORD_HEADER_SIZE];
        r.read_exact(&mut hdr)?;
        let RecordHeader {
            kind,
            id,
            len,
            checksum,
        } = RecordHeader::decode(&hdr);

        let payload_offset = pos + RECORD_HEADER_SIZE as u64;
        if payload_offset + len as u64 > file_len {
            result.truncated_tail_records += 1;
            break;
        }
        payload.resize(len as usize, 0);
        r.read_exact(&mut payload)?;
        if xxh32(&payload, id) != checksum {
            // 校验失败：视为截断/损坏，停止读取（保守）
            result.truncated_tail_records += 1;
            break;
        }

        match kind {
            KIND_PUT => {
                index.insert(
                    id,
                    Slot {
                        offset: payload_offset,
                        len,
                    },
                );
            }
            KIND_REMOVE => {
                index.remove(&id);
            }
            _ => {
                result.truncated_tail_records += 1;
                break;
            }
        }
        pos = payload_offset + len as u64;
        result.records_replayed += 1;
    }

    result.live_documents = index.len();
    Ok((index, pos, result))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique_tmp_dir(tag: &str) -> PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir().join(format!("visit-cache-log-{}-{}", tag, nanos))
    }

    fn collect(store: &LogStore, ids: &[u32]) -> Vec<(u32, Vec<u8>)> {
        let mut out = Vec::new();
        store
            .visit(ids, &mut |id, body| out.push((id, body.to_vec())))
            .unwrap();
        out
    }

    #[test]
    fn put_visit_remove_and_reopen() {
        let dir = unique_tmp_dir("basic");
        {
            let store = LogStore::open_in_dir(&dir).unwrap();
            store.put(5, b"a").unwrap();
            store.put(9, b"bb").unwrap();
            store.put(12, b"ccc").unwrap();
            store.put(9, b"BB").unwrap();
            assert!(store.remove(12).unwrap());
            assert!(!store.remove(77).unwrap());

            assert_eq!(
                collect(&store, &[12, 9, 5, 3]),
                vec![(9, b"BB".to_vec()), (5, b"a".to_vec())]
            );
            store.sync().unwrap();
        }

        let store = LogStore::open_in_dir(&dir).unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(store.replay_result().records_replayed, 5);
        assert_eq!(store.replay_result().truncated_tail_records, 0);
        assert_eq!(collect(&store, &[9]), vec![(9, b"BB".to_vec())]);
    }

    #[test]
    fn truncated_tail_is_dropped_and_log_stays_appendable() {
        let dir = unique_tmp_dir("truncated");
        {
            let store = LogStore::open_in_dir(&dir).unwrap();
            store.put(1, b"first").unwrap();
            store.put(2, b"second").unwrap();
        }

        // 砍掉最后一条记录的 3 个字节
        let path = dir.join("docs.log");
        let len = std::fs::metadata(&path).unwrap().len();
        OpenOptions::new()
            .write(true)
            .open(&path)
            .unwrap()
            .set_len(len - 3)
            .unwrap();

        let store = LogStore::open_in_dir(&dir).unwrap();
        assert_eq!(store.replay_result().truncated_tail_records, 1);
        assert_eq!(store.len(), 1);

        store.put(3, b"third").unwrap();
        drop(store);

        let store = LogStore::open_in_dir(&dir).unwrap();
        assert_eq!(store.replay_result().truncated_tail_records, 0);
        assert_eq!(
            collect(&store, &[1, 2, 3]),
            vec![(1, b"first".to_vec()), (3, b"third".to_vec())]
        );
    }

    #[test]
    fn partial_append_is_rolled_back_before_next_put() {
        let dir = unique_tmp_dir("rollback");
        let store = LogStore::open_in_dir(&dir).unwrap();
        store.put(1, b"first").unwrap();

        {
            // 模拟 write_all 中途失败：半条记录已经落盘
            let mut inner = store.inner.lock();
            inner.writer.write_all(&[KIND_PUT, 2, 0, 0]).unwrap();
            LogStore::rollback_partial_append(&mut inner).unwrap();
        }

        store.put(2, b"abc").unwrap();
        assert_eq!(
            collect(&store, &[1, 2]),
            vec![(1, b"first".to_vec()), (2, b"abc".to_vec())]
        );
        drop(store);

        let store = LogStore::open_in_dir(&dir).unwrap();
        assert_eq!(store.replay_result().truncated_tail_records, 0);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn corrupted_record_is_reported_not_served() {
        let dir = unique_tmp_dir("bitrot");
        let store = LogStore::open_in_dir(&dir).unwrap();
        store.put(1, b"hello").unwrap();
        store.put(2, b"world").unwrap();

        // 翻转最后一条记录 payload 的最后一个字节
        let path = dir.join("docs.log");
        let len = std::fs::metadata(&path).unwrap().len();
        let f = OpenOptions::new().write(true).open(&path).unwrap();
        f.write_all_at(b"W", len - 1).unwrap();

        assert_eq!(collect(&store, &[1]), vec![(1, b"hello".to_vec())]);
        let err = store.visit(&[2], &mut |_, _| {}).unwrap_err();
        assert!(matches!(err, Error::Store(_)));
    }

    #[test]
    fn foreign_file_is_rejected() {
        let dir = unique_tmp_dir("foreign");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("docs.log"), b"not a document log").unwrap();
        assert!(matches!(
            LogStore::open_in_dir(&dir),
            Err(Error::Store(_))
        ));
    }
}
