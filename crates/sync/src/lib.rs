//! 同步原语
//!
//! 为翻译表与 slab 分配器提供关中断自旋锁。
//!
//! 锁本体基于 [`lock_api`]：[`RawSpinLock`] 实现 [`lock_api::RawMutex`]，
//! [`SpinLock`] / [`SpinLockGuard`] 只是 `lock_api::Mutex` 的别名。
//!
//! # 架构依赖
//!
//! 此 crate 通过 [`ArchOps`] trait 抽象中断控制。
//! 使用前必须调用 [`register_arch_ops`] 注册实现。

#![no_std]

mod intr_guard;
mod raw_spin_lock;
mod spin_lock;

pub use intr_guard::IntrGuard;
pub use raw_spin_lock::RawSpinLock;
pub use spin_lock::{SpinLock, SpinLockGuard};

use core::sync::atomic::{AtomicUsize, Ordering};

/// 架构相关操作的 trait
///
/// 由内核实现并注册，提供本地中断控制
pub trait ArchOps: Send + Sync {
    /// 读取并禁用中断，返回之前的状态
    ///
    /// # Safety
    /// 调用者必须在之后用返回值调用 [`ArchOps::restore_interrupts`]
    unsafe fn read_and_disable_interrupts(&self) -> usize;

    /// 恢复中断状态
    ///
    /// # Safety
    /// flags 必须是之前 read_and_disable_interrupts 返回的值
    unsafe fn restore_interrupts(&self, flags: usize);
}

/// 全局架构操作实例（存储 fat pointer 的两个部分）
static ARCH_OPS_DATA: AtomicUsize = AtomicUsize::new(0);
static ARCH_OPS_VTABLE: AtomicUsize = AtomicUsize::new(0);

/// 注册架构操作实现
///
/// 重复注册同一实例是无害的，测试环境依赖这一点。
///
/// # Safety
/// 必须在任何锁被使用之前调用
pub unsafe fn register_arch_ops(ops: &'static dyn ArchOps) {
    let ptr = ops as *const dyn ArchOps;
    // SAFETY: fat pointer 的布局是 (data, vtable)
    let (data, vtable) = unsafe { core::mem::transmute::<*const dyn ArchOps, (usize, usize)>(ptr) };
    ARCH_OPS_VTABLE.store(vtable, Ordering::Release);
    ARCH_OPS_DATA.store(data, Ordering::Release);
}

/// 获取架构操作实例
///
/// # Panics
/// 如果尚未调用 [`register_arch_ops`]，则 panic
#[inline]
pub(crate) fn arch_ops() -> &'static dyn ArchOps {
    let data = ARCH_OPS_DATA.load(Ordering::Acquire);
    let vtable = ARCH_OPS_VTABLE.load(Ordering::Acquire);
    if data == 0 {
        panic!("sync: ArchOps not registered, call register_arch_ops first");
    }
    // SAFETY: data 和 vtable 是通过 register_arch_ops 设置的有效指针
    unsafe { &*core::mem::transmute::<(usize, usize), *const dyn ArchOps>((data, vtable)) }
}

#[cfg(test)]
pub(crate) mod test_env {
    use test_support::mock::arch::MOCK_ARCH_OPS;

    struct TestArch;

    impl crate::ArchOps for TestArch {
        unsafe fn read_and_disable_interrupts(&self) -> usize {
            unsafe { MOCK_ARCH_OPS.read_and_disable_interrupts() }
        }

        unsafe fn restore_interrupts(&self, flags: usize) {
            unsafe { MOCK_ARCH_OPS.restore_interrupts(flags) }
        }
    }

    static TEST_ARCH: TestArch = TestArch;

    pub fn init() {
        unsafe { crate::register_arch_ops(&TEST_ARCH) };
    }
}
