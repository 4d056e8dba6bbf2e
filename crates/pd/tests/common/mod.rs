// Shared environment for pd integration tests.

#![allow(dead_code)]

use mm::{CoreMemAllocator, PAGE_SIZE_LOG2, Paddr, Vaddr};
use std::alloc::{Layout, alloc_zeroed};
use std::cell::Cell;
use std::sync::Once;
use test_support::mock::arch::MOCK_ARCH_OPS;
use test_support::mock::mm::MOCK_MM_OPS;

pub const TEST_PHYS_BASE: usize = 0x8000_0000;

/// 一个保护域至少需要的页数：slab 首个 block 8 页 + 根表 4 页
pub const DOMAIN_PAGES: usize = 12;

struct TestArch;

impl sync::ArchOps for TestArch {
    unsafe fn read_and_disable_interrupts(&self) -> usize {
        unsafe { MOCK_ARCH_OPS.read_and_disable_interrupts() }
    }

    unsafe fn restore_interrupts(&self, flags: usize) {
        unsafe { MOCK_ARCH_OPS.restore_interrupts(flags) }
    }
}

thread_local! {
    static LAST_SPACE: Cell<Option<Option<u32>>> = const { Cell::new(None) };
}

struct TestMm;

impl mm::ArchMmOps for TestMm {
    fn broadcast_tlb_invalidate(&self, space: Option<u32>) {
        MOCK_MM_OPS.broadcast_tlb_invalidate(space);
        LAST_SPACE.with(|c| c.set(Some(space)));
    }
}

static TEST_ARCH: TestArch = TestArch;
static TEST_MM: TestMm = TestMm;
static INIT: Once = Once::new();

pub fn init() {
    INIT.call_once(|| unsafe {
        sync::register_arch_ops(&TEST_ARCH);
        mm::register_arch_ops(&TEST_MM);
    });
}

/// 本线程最近一次失效广播的地址空间，没有广播过时为 `None`
pub fn last_broadcast_space() -> Option<Option<u32>> {
    LAST_SPACE.with(|c| c.get())
}

/// 创建一个管理 `pages` 页测试内存的分配器
pub fn test_store(pages: usize) -> &'static CoreMemAllocator {
    init();
    let size = pages.max(1) << PAGE_SIZE_LOG2;
    let layout = Layout::from_size_align(size, 1 << 16).unwrap();
    let buffer = unsafe { alloc_zeroed(layout) };
    assert!(!buffer.is_null());

    let store: &'static CoreMemAllocator = Box::leak(Box::new(CoreMemAllocator::new()));
    store.init(
        Paddr(TEST_PHYS_BASE),
        Paddr(TEST_PHYS_BASE + (pages << PAGE_SIZE_LOG2)),
        Vaddr(buffer as usize),
    );
    store
}

/// 用户数据所在的（假）物理内存
pub fn ram(offset: usize) -> Paddr {
    Paddr(0x9000_0000 + offset)
}
