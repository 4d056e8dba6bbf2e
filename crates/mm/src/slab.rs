//! 物理 slab 分配器
//!
//! 为叶翻译表提供固定大小、固定对齐的内存块，并能在虚拟地址与物理地址之间换算。
//!
//! ## 布局
//!
//! 内存以 block 为单位向后备内存申请，每个 block 切分为 `SLABS_PER_BLOCK`
//! 个大小为 `SLAB_SIZE` 的 slab，用一个 u64 位图记录占用情况。
//!
//! - 构造时申请的首个 block 永不归还
//! - 其余 block 在最后一个 slab 释放时立即归还给后备内存
//! - 只有当所有 block 都满时才申请新 block

use crate::address::{Paddr, Vaddr};
use crate::core_mem_alloc::BackingStore;
use crate::translation::{TranslationError, TranslationResult};
use alloc::vec::Vec;
use sync::SpinLock;

/// 能给出物理地址的 slab 分配器
pub trait PhysicalSlabAllocator: Send + Sync {
    /// 分配一个 slab，返回其虚拟地址
    fn allocate(&self) -> TranslationResult<Vaddr>;

    /// 释放一个 slab；未知地址被记录并忽略
    fn release(&self, addr: Vaddr);

    /// 虚拟地址 → 物理地址
    fn physical_address(&self, addr: Vaddr) -> Option<Paddr>;

    /// 物理地址 → 虚拟地址
    fn virtual_address(&self, addr: Paddr) -> Option<Vaddr>;

    /// 当前占用的后备内存（含簿记开销）
    fn bytes_consumed(&self) -> usize;

    /// 分配 `size` 字节时摊到每个 slab 的簿记开销
    fn bytes_overhead(&self, size: usize) -> usize;

    /// 每个 slab 的字节数
    fn slab_size(&self) -> usize;

    /// slab 的对齐（log2）
    fn slab_align_log2(&self) -> usize;
}

struct SlabBlock {
    base: Vaddr,
    used: u64,
    refs: usize,
    retained: bool,
}

impl SlabBlock {
    fn new(base: Vaddr, retained: bool) -> Self {
        SlabBlock {
            base,
            used: 0,
            refs: 0,
            retained,
        }
    }
}

struct SlabState {
    blocks: Vec<SlabBlock>,
    free_entries: usize,
}

/// 对齐 slab 分配器
///
/// - `SLAB_SIZE`：每个 slab 的字节数
/// - `SLABS_PER_BLOCK`：每个 block 的 slab 数，最多 64
/// - `ALIGN_LOG2`：slab 的对齐，block 也按此对齐申请
pub struct AlignedSlab<const SLAB_SIZE: usize, const SLABS_PER_BLOCK: usize, const ALIGN_LOG2: usize>
{
    state: SpinLock<SlabState>,
    backing: &'static dyn BackingStore,
}

impl<const SLAB_SIZE: usize, const SLABS_PER_BLOCK: usize, const ALIGN_LOG2: usize>
    AlignedSlab<SLAB_SIZE, SLABS_PER_BLOCK, ALIGN_LOG2>
{
    /// 每个 block 的字节数
    pub const BLOCK_SIZE: usize = SLAB_SIZE * SLABS_PER_BLOCK;

    const FULL: u64 = if SLABS_PER_BLOCK == 64 {
        u64::MAX
    } else {
        (1u64 << SLABS_PER_BLOCK) - 1
    };

    const VALID: () = {
        assert!(SLABS_PER_BLOCK >= 1 && SLABS_PER_BLOCK <= 64);
        assert!(SLAB_SIZE > 0 && SLAB_SIZE % (1 << ALIGN_LOG2) == 0);
    };

    /// 创建分配器，并从 `backing` 申请首个 block
    pub fn new(backing: &'static dyn BackingStore) -> TranslationResult<Self> {
        let () = Self::VALID;

        let base = backing
            .alloc_aligned(Self::BLOCK_SIZE, ALIGN_LOG2)
            .ok_or(TranslationError::OutOfMemory)?;
        Ok(AlignedSlab {
            state: SpinLock::new(SlabState {
                blocks: alloc::vec![SlabBlock::new(base, true)],
                free_entries: SLABS_PER_BLOCK,
            }),
            backing,
        })
    }

    /// 当前 block 数
    pub fn block_count(&self) -> usize {
        self.state.lock().blocks.len()
    }

    /// 已分配的 slab 数
    pub fn live_entries(&self) -> usize {
        self.state.lock().blocks.iter().map(|b| b.refs).sum()
    }

    /// 空闲的 slab 数
    pub fn free_entries(&self) -> usize {
        self.state.lock().free_entries
    }

    fn block_footprint() -> usize {
        Self::BLOCK_SIZE + core::mem::size_of::<SlabBlock>()
    }
}

impl<const SLAB_SIZE: usize, const SLABS_PER_BLOCK: usize, const ALIGN_LOG2: usize>
    PhysicalSlabAllocator for AlignedSlab<SLAB_SIZE, SLABS_PER_BLOCK, ALIGN_LOG2>
{
    fn allocate(&self) -> TranslationResult<Vaddr> {
        let mut state = self.state.lock();

        if state.free_entries == 0 {
            let Some(base) = self.backing.alloc_aligned(Self::BLOCK_SIZE, ALIGN_LOG2) else {
                log::warn!("slab: backing store exhausted");
                return Err(TranslationError::OutOfMemory);
            };
            log::debug!("slab: new block at {:?}", base);
            state.blocks.push(SlabBlock::new(base, false));
            state.free_entries += SLABS_PER_BLOCK;
        }

        let block = state
            .blocks
            .iter_mut()
            .find(|b| b.refs < SLABS_PER_BLOCK)
            .ok_or(TranslationError::OutOfMemory)?;
        let slot = (!block.used & Self::FULL).trailing_zeros() as usize;
        block.used |= 1 << slot;
        block.refs += 1;
        let addr = block.base + slot * SLAB_SIZE;
        state.free_entries -= 1;
        Ok(addr)
    }

    fn release(&self, addr: Vaddr) {
        let mut state = self.state.lock();

        let Some(pos) = state
            .blocks
            .iter()
            .position(|b| addr >= b.base && addr - b.base < Self::BLOCK_SIZE)
        else {
            log::warn!("slab: release of unknown address {:?}", addr);
            return;
        };

        let block = &mut state.blocks[pos];
        let offset = addr - block.base;
        let slot = offset / SLAB_SIZE;
        if offset % SLAB_SIZE != 0 || block.used & (1 << slot) == 0 {
            log::warn!("slab: release of unallocated slab {:?}", addr);
            return;
        }
        block.used &= !(1 << slot);
        block.refs -= 1;
        state.free_entries += 1;

        let block = &state.blocks[pos];
        if block.refs == 0 && !block.retained {
            let base = block.base;
            state.blocks.remove(pos);
            state.free_entries -= SLABS_PER_BLOCK;
            self.backing.free(base, Self::BLOCK_SIZE);
            log::debug!("slab: reclaimed block at {:?}", base);
        }
    }

    fn physical_address(&self, addr: Vaddr) -> Option<Paddr> {
        self.backing.phys_addr(addr)
    }

    fn virtual_address(&self, addr: Paddr) -> Option<Vaddr> {
        self.backing.virt_addr(addr)
    }

    fn bytes_consumed(&self) -> usize {
        self.block_count() * Self::block_footprint()
    }

    fn bytes_overhead(&self, _size: usize) -> usize {
        Self::block_footprint() / SLABS_PER_BLOCK
    }

    fn slab_size(&self) -> usize {
        SLAB_SIZE
    }

    fn slab_align_log2(&self) -> usize {
        ALIGN_LOG2
    }
}

impl<const SLAB_SIZE: usize, const SLABS_PER_BLOCK: usize, const ALIGN_LOG2: usize> Drop
    for AlignedSlab<SLAB_SIZE, SLABS_PER_BLOCK, ALIGN_LOG2>
{
    fn drop(&mut self) {
        let state = self.state.get_mut();
        let live: usize = state.blocks.iter().map(|b| b.refs).sum();
        if live != 0 {
            log::warn!("slab: dropped with {} live slabs", live);
        }
        for block in state.blocks.drain(..) {
            self.backing.free(block.base, Self::BLOCK_SIZE);
        }
    }
}
