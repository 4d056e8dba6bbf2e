//! 自旋锁封装
//!
//! 提供对数据的互斥访问。
//!
//! # 示例
//! ```ignore
//! let lock = SpinLock::new(0);
//! {
//!     let mut guard = lock.lock(); // 获取锁，关闭本地中断
//!     *guard += 1;
//! } // 离开作用域，释放锁并恢复中断状态
//! ```

use crate::raw_spin_lock::RawSpinLock;

/// 提供对数据的互斥访问的自旋锁
///
/// 不可重入：在同一执行流中嵌套 `lock()` 会死锁。
pub type SpinLock<T> = lock_api::Mutex<RawSpinLock, T>;

/// [`SpinLock`] 的 RAII 保护器
pub type SpinLockGuard<'a, T> = lock_api::MutexGuard<'a, RawSpinLock, T>;
