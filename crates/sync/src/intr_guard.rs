//! 中断保护器
//!
//! 基于 RAII 实现中断保护，在创建时禁用中断，销毁时恢复。
//!
//! 注意：禁用中断只能阻止**本地 CPU** 的“任务 vs 本地中断”并发，
//! 多核共享数据仍需要配合自旋锁。

use crate::arch_ops;

/// 中断保护器
///
/// [`RawSpinLock`](crate::RawSpinLock) 在加锁时把它拆成原始标志保存，
/// 解锁时再重建并 drop，以恢复进入临界区之前的中断状态。
pub struct IntrGuard {
    flags: usize,
}

impl IntrGuard {
    /// 禁用本地中断并记录之前的状态
    pub fn new() -> Self {
        // SAFETY: 标志一定会在 Drop 或 from_flags 路径上被恢复
        let flags = unsafe { arch_ops().read_and_disable_interrupts() };
        IntrGuard { flags }
    }

    /// 放弃 RAII 语义，交出保存的中断标志
    pub fn into_flags(self) -> usize {
        let flags = self.flags;
        core::mem::forget(self);
        flags
    }

    /// 用 [`IntrGuard::into_flags`] 交出的标志重建保护器
    ///
    /// # Safety
    /// `flags` 必须来自 `into_flags`，且只能重建一次
    pub unsafe fn from_flags(flags: usize) -> Self {
        IntrGuard { flags }
    }
}

impl Default for IntrGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for IntrGuard {
    fn drop(&mut self) {
        // SAFETY: flags 是创建时保存的
        unsafe { arch_ops().restore_interrupts(self.flags) };
    }
}
