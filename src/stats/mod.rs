use std::fmt;

use serde::{Deserialize, Serialize};

/// 缓存统计（供运维监控读取）
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// 命中次数（只由读路径更新）
    pub hits: u64,
    /// 未命中次数（每次回源一次）
    pub misses: u64,
    /// 当前条目数
    pub entry_count: usize,
    /// 当前记账字节数
    pub total_bytes: usize,
    /// 字节预算
    pub capacity_bytes: usize,
    /// 因超出预算被淘汰的条目
    pub evictions: u64,
    /// 因子集覆盖或单 id 删除被失效的条目
    pub invalidations: u64,
}

impl CacheStats {
    pub fn lookups(&self) -> u64 {
        self.hits + self.misses
    }

    pub fn hit_ratio(&self) -> f64 {
        match self.lookups() {
            0 => 0.0,
            n => self.hits as f64 / n as f64,
        }
    }
}

fn human_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * KB;
    const GB: u64 = 1024 * MB;
    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "╔══════════════════════════════════════════════════╗")?;
        writeln!(f, "║           visit-cache Stats                      ║")?;
        writeln!(f, "╠══════════════════════════════════════════════════╣")?;
        writeln!(f, "║   hits:         {:>10}                       ║", self.hits)?;
        writeln!(f, "║   misses:       {:>10}                       ║", self.misses)?;
        writeln!(
            f,
            "║   hit ratio:    {:>9.1}%                       ║",
            self.hit_ratio() * 100.0
        )?;
        writeln!(f, "╠──────────────────────────────────────────────────╣")?;
        writeln!(
            f,
            "║   entries:      {:>10}                       ║",
            self.entry_count
        )?;
        writeln!(
            f,
            "║   bytes:        {:>10}  ({:>10})          ║",
            human_bytes(self.total_bytes as u64),
            human_bytes(self.capacity_bytes as u64)
        )?;
        writeln!(
            f,
            "║   evictions:    {:>10}                       ║",
            self.evictions
        )?;
        writeln!(
            f,
            "║   invalidated:  {:>10}                       ║",
            self.invalidations
        )?;
        writeln!(f, "╚══════════════════════════════════════════════════╝")?;
        Ok(())
    }
}
