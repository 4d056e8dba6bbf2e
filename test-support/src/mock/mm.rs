//! 内存管理相关操作的 Mock 实现

use core::sync::atomic::{AtomicUsize, Ordering};

/// Mock 的内存管理架构操作
///
/// TLB 广播不做任何事，只记录调用次数。
pub struct MockMmOps {
    broadcasts: AtomicUsize,
    last_space: AtomicUsize,
}

impl MockMmOps {
    pub const fn new() -> Self {
        Self {
            broadcasts: AtomicUsize::new(0),
            last_space: AtomicUsize::new(usize::MAX),
        }
    }

    /// 记录一次 TLB 失效广播；`None` 表示全部地址空间
    pub fn broadcast_tlb_invalidate(&self, space: Option<u32>) {
        self.last_space
            .store(space.map_or(usize::MAX, |s| s as usize), Ordering::SeqCst);
        self.broadcasts.fetch_add(1, Ordering::SeqCst);
    }

    /// 到目前为止的广播次数
    pub fn broadcasts(&self) -> usize {
        self.broadcasts.load(Ordering::SeqCst)
    }

    /// 最近一次广播的目标地址空间
    pub fn last_space(&self) -> Option<u32> {
        match self.last_space.load(Ordering::SeqCst) {
            usize::MAX => None,
            s => Some(s as u32),
        }
    }
}

/// 全局 Mock 实例
pub static MOCK_MM_OPS: MockMmOps = MockMmOps::new();
