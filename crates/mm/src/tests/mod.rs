// Host-side unit tests for mm.
//
// Translation tables and slabs live in real host memory. A `CoreMemAllocator`
// manages a leaked, generously aligned buffer and pretends it sits at a
// 32-bit physical address so descriptors can encode it.

use crate::core_mem_alloc::{CoreMemAllocator, PAGE_SIZE_LOG2};
use crate::{Paddr, Vaddr};
use core::cell::Cell;
use std::alloc::{Layout, alloc_zeroed};
use std::boxed::Box;
use std::sync::Once;
use test_support::mock::arch::MOCK_ARCH_OPS;
use test_support::mock::mm::MOCK_MM_OPS;

mod slab;

/// 测试内存假装所在的物理地址
pub(crate) const TEST_PHYS_BASE: usize = 0x8000_0000;

struct TestArch;

impl sync::ArchOps for TestArch {
    unsafe fn read_and_disable_interrupts(&self) -> usize {
        unsafe { MOCK_ARCH_OPS.read_and_disable_interrupts() }
    }

    unsafe fn restore_interrupts(&self, flags: usize) {
        unsafe { MOCK_ARCH_OPS.restore_interrupts(flags) }
    }
}

std::thread_local! {
    static THREAD_BROADCASTS: Cell<usize> = const { Cell::new(0) };
}

struct TestMm;

impl crate::ArchMmOps for TestMm {
    fn broadcast_tlb_invalidate(&self, space: Option<u32>) {
        MOCK_MM_OPS.broadcast_tlb_invalidate(space);
        THREAD_BROADCASTS.with(|c| c.set(c.get() + 1));
    }
}

static TEST_ARCH: TestArch = TestArch;
static TEST_MM: TestMm = TestMm;
static INIT: Once = Once::new();

pub(crate) fn init() {
    INIT.call_once(|| unsafe {
        sync::register_arch_ops(&TEST_ARCH);
        crate::register_arch_ops(&TEST_MM);
    });
}

/// 当前线程上发生的失效广播次数
///
/// 测试并行运行，全局计数器会被其他测试推进，这里只看本线程。
pub(crate) fn thread_broadcasts() -> usize {
    THREAD_BROADCASTS.with(|c| c.get())
}

/// 创建一个管理 `pages` 页测试内存的分配器
pub(crate) fn test_store(pages: usize) -> &'static CoreMemAllocator {
    init();
    let size = pages << PAGE_SIZE_LOG2;
    let layout = Layout::from_size_align(size, 1 << 16).unwrap();
    let buffer = unsafe { alloc_zeroed(layout) };
    assert!(!buffer.is_null());

    let store: &'static CoreMemAllocator = Box::leak(Box::new(CoreMemAllocator::new()));
    store.init(
        Paddr(TEST_PHYS_BASE),
        Paddr(TEST_PHYS_BASE + size),
        Vaddr(buffer as usize),
    );
    store
}
