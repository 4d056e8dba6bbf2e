//! 核心内存分配器
//!
//! 本模块提供内核对象（根翻译表、slab 块、重试用的额外空间）的后备内存。
//!
//! ## 分配策略（位图）
//!
//! 分配器以页为粒度管理一段连续物理内存，用位图跟踪每个物理帧：
//!
//! - **bitmap**：每个 bit 表示一个物理帧（0=空闲，1=已分配）
//! - 对齐分配从满足对齐要求的**物理**帧号开始查找连续空闲帧
//!
//! 释放时直接清除对应 bit，不维护回收栈。
//!
//! ## 直接映射窗口
//!
//! 被管理的物理区间通过一个线性窗口映射进内核虚拟地址空间：
//! `vaddr = window + (paddr - start)`。[`BackingStore::phys_addr`] 和
//! [`BackingStore::virt_addr`] 就是这个窗口上的换算。

use crate::address::{AlignOps, Paddr, UsizeConvert, Vaddr};
use alloc::vec::Vec;
use lazy_static::lazy_static;
use sync::SpinLock;

/// 核心内存分配粒度
pub const PAGE_SIZE_LOG2: usize = 12;
/// 核心内存分配粒度（字节）
pub const PAGE_SIZE: usize = 1 << PAGE_SIZE_LOG2;

/// 后备内存接口
///
/// slab 分配器、保护域和缺页处理流水线都只通过此 trait 取得内存，
/// 因此同一套逻辑既能跑在全局核心分配器上，也能跑在配额受限的分配器上。
pub trait BackingStore: Send + Sync {
    /// 分配 `size` 字节、按 `1 << align_log2` 对齐（物理地址意义上）的内存，
    /// 返回其虚拟地址
    fn alloc_aligned(&self, size: usize, align_log2: usize) -> Option<Vaddr>;

    /// 释放 [`BackingStore::alloc_aligned`] 得到的内存，`size` 须与分配时一致
    fn free(&self, addr: Vaddr, size: usize);

    /// 虚拟地址 → 物理地址
    fn phys_addr(&self, addr: Vaddr) -> Option<Paddr>;

    /// 物理地址 → 虚拟地址
    fn virt_addr(&self, addr: Paddr) -> Option<Vaddr>;

    /// 剩余可分配字节数
    fn avail(&self) -> usize;

    /// 已分配字节数
    fn consumed(&self) -> usize;
}

/// 物理帧位图
struct FrameBitmap {
    /// 管理区间的起始物理地址（页对齐）
    start: Paddr,
    /// `start` 在内核虚拟地址空间中的位置
    window: Vaddr,
    /// 位图数据，使用 u64 以便整字跳过
    bitmap: Vec<u64>,
    /// 总帧数
    total_frames: usize,
    /// 已分配帧数
    allocated_count: usize,
}

impl FrameBitmap {
    const fn new() -> Self {
        FrameBitmap {
            start: Paddr(usize::MAX),
            window: Vaddr(usize::MAX),
            bitmap: Vec::new(),
            total_frames: 0,
            allocated_count: 0,
        }
    }

    fn init(&mut self, start: Paddr, end: Paddr, window: Vaddr) {
        // 起始地址向上取整，结束地址向下取整
        let first = start.align_up(PAGE_SIZE_LOG2).unwrap_or(end);
        let last = end.align_down(PAGE_SIZE_LOG2);
        let delta = first - start;

        self.start = first;
        self.window = window + delta;
        self.total_frames = if last > first {
            (last - first) >> PAGE_SIZE_LOG2
        } else {
            0
        };
        self.bitmap = alloc::vec![0u64; self.total_frames.div_ceil(64)];
        self.allocated_count = 0;
    }

    #[inline]
    fn is_free(&self, frame_idx: usize) -> bool {
        (self.bitmap[frame_idx / 64] & (1u64 << (frame_idx % 64))) == 0
    }

    #[inline]
    fn mark_allocated(&mut self, frame_idx: usize) {
        self.bitmap[frame_idx / 64] |= 1u64 << (frame_idx % 64);
    }

    #[inline]
    fn mark_free(&mut self, frame_idx: usize) {
        self.bitmap[frame_idx / 64] &= !(1u64 << (frame_idx % 64));
    }

    /// 分配 `num` 个连续帧，首帧的物理帧号按 `align_pages` 对齐
    ///
    /// 返回首帧在位图中的下标。
    fn alloc_contig_aligned(&mut self, num: usize, align_pages: usize) -> Option<usize> {
        if num == 0 || num > self.total_frames - self.allocated_count {
            return None;
        }
        debug_assert!(align_pages.is_power_of_two());

        let base_ppn = self.start.as_usize() >> PAGE_SIZE_LOG2;
        let mut frame_idx = 0;
        while frame_idx < self.total_frames {
            // 对齐的是物理帧号，而不是位图下标
            let aligned_ppn = (base_ppn + frame_idx).checked_add(align_pages - 1)? & !(align_pages - 1);
            let aligned_idx = aligned_ppn - base_ppn;
            if aligned_idx + num > self.total_frames {
                break;
            }

            match (0..num).find(|&i| !self.is_free(aligned_idx + i)) {
                Some(busy) => frame_idx = aligned_idx + busy + 1,
                None => {
                    for i in 0..num {
                        self.mark_allocated(aligned_idx + i);
                    }
                    self.allocated_count += num;
                    return Some(aligned_idx);
                }
            }
        }

        None
    }

    fn dealloc_contig(&mut self, start_idx: usize, num: usize) {
        for i in 0..num {
            debug_assert!(
                !self.is_free(start_idx + i),
                "dealloc_contig: double free detected"
            );
            self.mark_free(start_idx + i);
        }
        self.allocated_count -= num;
    }

    fn frame_of(&self, addr: Vaddr) -> Option<usize> {
        if addr < self.window {
            return None;
        }
        let idx = (addr - self.window) >> PAGE_SIZE_LOG2;
        (idx < self.total_frames).then_some(idx)
    }
}

/// 核心内存分配器
///
/// 内部由一把自旋锁保护，所有调用者共享。
pub struct CoreMemAllocator {
    inner: SpinLock<FrameBitmap>,
}

impl CoreMemAllocator {
    /// 创建一个未初始化（容量为零）的分配器
    pub const fn new() -> Self {
        CoreMemAllocator {
            inner: SpinLock::new(FrameBitmap::new()),
        }
    }

    /// 设置可分配的物理区间 `[start, end)` 及其直接映射窗口
    ///
    /// 重新初始化会丢弃所有已有分配的记录。
    pub fn init(&self, start: Paddr, end: Paddr, window: Vaddr) {
        self.inner.lock().init(start, end, window);
    }

    /// 获取总的物理帧数
    pub fn total_frames(&self) -> usize {
        self.inner.lock().total_frames
    }

    /// 获取已分配的帧数
    pub fn allocated_frames(&self) -> usize {
        self.inner.lock().allocated_count
    }

    /// 获取空闲的帧数
    pub fn free_frames(&self) -> usize {
        let inner = self.inner.lock();
        inner.total_frames - inner.allocated_count
    }

    /// 获取分配器的当前状态
    /// # 返回值
    /// - 总帧数
    /// - 已分配的帧数
    /// - 空闲的帧数
    pub fn get_stats(&self) -> (usize, usize, usize) {
        let inner = self.inner.lock();
        (
            inner.total_frames,
            inner.allocated_count,
            inner.total_frames - inner.allocated_count,
        )
    }
}

impl Default for CoreMemAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl BackingStore for CoreMemAllocator {
    fn alloc_aligned(&self, size: usize, align_log2: usize) -> Option<Vaddr> {
        let num = size.div_ceil(PAGE_SIZE).max(1);
        let align_pages = 1usize << align_log2.saturating_sub(PAGE_SIZE_LOG2);

        let virt = {
            let mut inner = self.inner.lock();
            let idx = inner.alloc_contig_aligned(num, align_pages)?;
            inner.window + (idx << PAGE_SIZE_LOG2)
        };

        // 新分配的内存总是清零的
        // SAFETY: 这些帧刚刚被标记为已分配，且落在直接映射窗口内
        unsafe { core::ptr::write_bytes(virt.as_mut_ptr::<u8>(), 0, num << PAGE_SIZE_LOG2) };
        Some(virt)
    }

    fn free(&self, addr: Vaddr, size: usize) {
        let num = size.div_ceil(PAGE_SIZE).max(1);
        let mut inner = self.inner.lock();
        match inner.frame_of(addr) {
            Some(idx) if addr.is_aligned(PAGE_SIZE_LOG2) && idx + num <= inner.total_frames => {
                inner.dealloc_contig(idx, num);
            }
            _ => log::warn!("core_mem: free of foreign range {:?}+{:#x}", addr, size),
        }
    }

    fn phys_addr(&self, addr: Vaddr) -> Option<Paddr> {
        let inner = self.inner.lock();
        let limit = inner.total_frames << PAGE_SIZE_LOG2;
        (addr >= inner.window && addr - inner.window < limit)
            .then(|| inner.start + (addr - inner.window))
    }

    fn virt_addr(&self, addr: Paddr) -> Option<Vaddr> {
        let inner = self.inner.lock();
        let limit = inner.total_frames << PAGE_SIZE_LOG2;
        (addr >= inner.start && addr - inner.start < limit)
            .then(|| inner.window + (addr - inner.start))
    }

    fn avail(&self) -> usize {
        self.free_frames() << PAGE_SIZE_LOG2
    }

    fn consumed(&self) -> usize {
        self.allocated_frames() << PAGE_SIZE_LOG2
    }
}

// ============================================================================
// 全局核心分配器
// ============================================================================

lazy_static! {
    /// 全局核心内存分配器，生命周期与内核相同，从不销毁。
    static ref CORE_MEM_ALLOC: CoreMemAllocator = CoreMemAllocator::new();
}

/// 使用可用的物理内存范围初始化全局核心分配器。
///
/// # 参数
///
/// * `start_addr` - 可用物理内存的起始地址
/// * `end_addr` - 可用物理内存的结束地址
/// * `window` - `start_addr` 在内核虚拟地址空间中的映射位置
pub fn init_core_mem_allocator(start_addr: usize, end_addr: usize, window: usize) {
    CORE_MEM_ALLOC.init(Paddr(start_addr), Paddr(end_addr), Vaddr(window));
}

/// 获取全局核心分配器
pub fn core_mem_alloc() -> &'static CoreMemAllocator {
    &CORE_MEM_ALLOC
}
