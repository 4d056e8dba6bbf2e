//! 原始自旋锁
//!
//! 基于原子操作实现，结合 [`IntrGuard`] 在持锁期间关闭本地中断。

use crate::intr_guard::IntrGuard;
use core::{
    hint,
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
};

/// 关中断自旋锁
///
/// 不可重入。持锁期间本地中断保持关闭，
/// 因此临界区内不能做任何可能挂起的操作。
#[derive(Debug)]
pub struct RawSpinLock {
    lock: AtomicBool,
    /// 加锁者进入临界区之前的中断状态，仅持锁者读写
    saved_flags: AtomicUsize,
}

impl RawSpinLock {
    /// 创建一个未上锁的实例
    pub const fn new() -> Self {
        RawSpinLock {
            lock: AtomicBool::new(false),
            saved_flags: AtomicUsize::new(0),
        }
    }

    /// 检查锁是否被占用 (仅用于调试/测试)
    pub fn is_held(&self) -> bool {
        self.lock.load(Ordering::Relaxed)
    }
}

impl Default for RawSpinLock {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl lock_api::RawMutex for RawSpinLock {
    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: Self = RawSpinLock::new();

    type GuardMarker = lock_api::GuardNoSend;

    fn lock(&self) {
        let guard = IntrGuard::new();
        while self
            .lock
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            hint::spin_loop();
        }
        self.saved_flags.store(guard.into_flags(), Ordering::Relaxed);
    }

    fn try_lock(&self) -> bool {
        let guard = IntrGuard::new();
        if self
            .lock
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            self.saved_flags.store(guard.into_flags(), Ordering::Relaxed);
            true
        } else {
            // guard 在这里 drop，恢复中断
            false
        }
    }

    unsafe fn unlock(&self) {
        let flags = self.saved_flags.load(Ordering::Relaxed);
        self.lock.store(false, Ordering::Release);
        // SAFETY: flags 由 lock/try_lock 保存，每次加锁只恢复一次
        drop(unsafe { IntrGuard::from_flags(flags) });
    }

    fn is_locked(&self) -> bool {
        self.is_held()
    }
}
