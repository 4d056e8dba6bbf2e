//! 根翻译表
//!
//! 根表的每一项覆盖 1MB：要么是段映射，要么链接到一张叶表。
//! 小页插入时按需从 slab 分配叶表；叶表在最后一个翻译移除后被回收。
//!
//! ## 回收顺序
//!
//! 被移除的翻译可能仍缓存在其他 CPU 的 TLB 中，而 MMU 在重填时会读取叶表内存。
//! 因此叶表内存必须在**所有** CPU 完成失效之后才能交还：移除操作先把被摘下的叶表
//! 收集到 [`Shootdown`]，[`Shootdown::complete`] 先广播失效，再释放内存。

use super::descriptor::{Descriptor, Mapping, RawDescriptor, decode_root, encode_root};
use super::extra::ExtraSpace;
use super::flags::{Attributes, PageFlags};
use super::leaf::{LeafTable, SMALL_PAGE_LOG2};
use super::{TranslationError, TranslationResult};
use crate::address::{Paddr, Vaddr, aligned};
use crate::arch_ops::arch_ops;
use crate::core_mem_alloc::BackingStore;
use crate::phys_box::PhysBox;
use crate::slab::PhysicalSlabAllocator;
use alloc::collections::BTreeMap;
use alloc::vec::Vec;

/// 段大小（log2）
pub const SECTION_LOG2: usize = 20;
/// 根表项数
pub const ROOT_ENTRIES: usize = 4096;

const SECTION_MASK: usize = (1 << SECTION_LOG2) - 1;

/// 根表的硬件描述符数组，16KB 对齐
#[repr(C, align(16384))]
pub struct RootDescriptors {
    entries: [RawDescriptor; ROOT_ENTRIES],
}

const _: () = assert!(core::mem::size_of::<RootDescriptors>() == 1 << RootTable::SIZE_LOG2);
const _: () = assert!(((ROOT_ENTRIES - 1) << SECTION_LOG2) == ((u32::MAX as usize) & !SECTION_MASK));

/// 叶表内存的来源
enum LeafBacking {
    Slab,
    Donated(ExtraSpace),
}

/// 已链接进根表的叶表
struct LinkedLeaf {
    table: PhysBox<LeafTable>,
    backing: LeafBacking,
}

impl LinkedLeaf {
    fn release<A: PhysicalSlabAllocator + ?Sized>(self, allocator: &A) {
        match self.backing {
            LeafBacking::Slab => allocator.release(self.table.virt()),
            LeafBacking::Donated(space) => space.release(),
        }
    }
}

/// 待完成的 TLB 失效
///
/// 收集一次或多次移除中被摘下的叶表，在 [`Shootdown::complete`] 中
/// 先广播失效再释放它们。
pub struct Shootdown {
    space: Option<u32>,
    invalidated: usize,
    retired: Vec<LinkedLeaf>,
}

impl Shootdown {
    /// 为地址空间 `space` 创建；`None` 表示不区分地址空间
    pub fn new(space: Option<u32>) -> Self {
        Shootdown {
            space,
            invalidated: 0,
            retired: Vec::new(),
        }
    }

    /// 是否有需要失效的翻译
    pub fn is_empty(&self) -> bool {
        self.invalidated == 0 && self.retired.is_empty()
    }

    /// 等待回收的叶表数
    pub fn retired_tables(&self) -> usize {
        self.retired.len()
    }

    /// 广播 TLB 失效，然后释放收集到的叶表
    ///
    /// 没有任何翻译被移除时不广播。
    pub fn complete<A: PhysicalSlabAllocator + ?Sized>(mut self, allocator: &A) {
        if self.is_empty() {
            return;
        }
        arch_ops().broadcast_tlb_invalidate(self.space);
        for leaf in core::mem::take(&mut self.retired) {
            leaf.release(allocator);
        }
        self.invalidated = 0;
    }
}

impl Drop for Shootdown {
    fn drop(&mut self) {
        if !self.retired.is_empty() {
            log::error!(
                "translation: {} leaf tables leaked without shootdown",
                self.retired.len()
            );
        }
    }
}

/// 根翻译表
///
/// 持有根描述符数组，以及所有叶表的所有权。根描述符数组的内存来自调用者，
/// 销毁时由调用者通过 [`RootTable::teardown`] 取回。
pub struct RootTable {
    descriptors: PhysBox<RootDescriptors>,
    leaves: BTreeMap<usize, LinkedLeaf>,
}

impl RootTable {
    /// 根表大小与对齐（log2）
    pub const SIZE_LOG2: usize = 14;
    /// 支持的最小页大小（log2）
    pub const MIN_PAGE_SIZE_LOG2: usize = SMALL_PAGE_LOG2;
    /// 支持的最大页大小（log2）
    pub const MAX_PAGE_SIZE_LOG2: usize = SECTION_LOG2;
    /// 单次插入最多需要的额外内存（log2），即一张叶表
    pub const MAX_COSTS_PER_TRANSLATION_LOG2: usize = LeafTable::SIZE_LOG2;

    /// 在调用者提供的内存上创建空根表
    ///
    /// # Safety
    /// `virt` 必须指向 `1 << SIZE_LOG2` 字节、同样对齐、由调用者独占的内存，
    /// `phys` 是它的物理地址
    pub unsafe fn new_in(virt: Vaddr, phys: Paddr) -> Self {
        RootTable {
            // SAFETY: 由调用者保证
            descriptors: unsafe { PhysBox::zeroed(virt, phys) },
            leaves: BTreeMap::new(),
        }
    }

    /// 从 `store` 分配内存并创建空根表
    pub fn alloc_in(store: &dyn BackingStore) -> Option<Self> {
        let size = 1 << Self::SIZE_LOG2;
        let virt = store.alloc_aligned(size, Self::SIZE_LOG2)?;
        match store.phys_addr(virt) {
            // SAFETY: 刚从 store 分配，大小与对齐都满足要求
            Some(phys) if aligned(phys.0, Self::SIZE_LOG2) => {
                Some(unsafe { Self::new_in(virt, phys) })
            }
            _ => {
                store.free(virt, size);
                None
            }
        }
    }

    /// 根描述符数组的物理地址，即写入 MMU 的值
    pub fn phys_addr(&self) -> Paddr {
        self.descriptors.phys()
    }

    /// 可翻译的最大虚拟偏移
    pub const fn max_virt_offset() -> usize {
        // 4096 个 1MB 段恰好覆盖 32 位地址空间
        u32::MAX as usize
    }

    /// 当前链接的叶表数
    pub fn leaf_count(&self) -> usize {
        self.leaves.len()
    }

    fn index_of(vo: usize) -> Option<usize> {
        (vo <= Self::max_virt_offset()).then_some(vo >> SECTION_LOG2)
    }

    /// 插入翻译 `vo → pa`，叶表从 `allocator` 分配
    ///
    /// `size_log2` 为 12 时插入小页，为 20 时插入段，其他值不支持。
    /// 重复插入完全相同的翻译是空操作。
    pub fn insert<A: PhysicalSlabAllocator + ?Sized>(
        &mut self,
        vo: usize,
        pa: Paddr,
        size_log2: usize,
        flags: PageFlags,
        allocator: &A,
    ) -> TranslationResult<()> {
        self.insert_with_extra(vo, pa, size_log2, flags, allocator, &mut None)
    }

    /// 同 [`RootTable::insert`]，但 slab 耗尽时使用 `extra` 作为新叶表
    ///
    /// 只有真正被用作叶表时 `extra` 才会被取走。
    pub fn insert_with_extra<A: PhysicalSlabAllocator + ?Sized>(
        &mut self,
        vo: usize,
        pa: Paddr,
        size_log2: usize,
        flags: PageFlags,
        allocator: &A,
        extra: &mut Option<ExtraSpace>,
    ) -> TranslationResult<()> {
        let index = Self::index_of(vo).ok_or(TranslationError::InvalidOffset)?;
        match size_log2 {
            Self::MIN_PAGE_SIZE_LOG2 => self.insert_page(index, vo, pa, flags, allocator, extra),
            Self::MAX_PAGE_SIZE_LOG2 => self.insert_section(index, vo, pa, flags),
            _ => Err(TranslationError::UnsupportedSize),
        }
    }

    fn insert_section(
        &mut self,
        index: usize,
        vo: usize,
        pa: Paddr,
        flags: PageFlags,
    ) -> TranslationResult<()> {
        if !aligned(vo, SECTION_LOG2) {
            return Err(TranslationError::Misaligned);
        }
        let new = encode_root(&Descriptor::Section(Mapping {
            phys: pa,
            attrs: Attributes::from(flags),
        }))?;

        let old = self.descriptors.entries[index];
        match decode_root(old) {
            Descriptor::Invalid => {
                self.descriptors.entries[index] = new;
                Ok(())
            }
            Descriptor::Section(_) if old == new => Ok(()),
            Descriptor::Section(_) => {
                log::warn!("translation: conflicting section at {:#x}", vo);
                Err(TranslationError::Conflict)
            }
            _ => {
                log::warn!("translation: section over leaf table at {:#x}", vo);
                Err(TranslationError::TypeMismatch)
            }
        }
    }

    fn insert_page<A: PhysicalSlabAllocator + ?Sized>(
        &mut self,
        index: usize,
        vo: usize,
        pa: Paddr,
        flags: PageFlags,
        allocator: &A,
        extra: &mut Option<ExtraSpace>,
    ) -> TranslationResult<()> {
        let leaf_vo = vo & SECTION_MASK;

        match decode_root(self.descriptors.entries[index]) {
            Descriptor::LeafTableLink { .. } => {
                let Some(leaf) = self.leaves.get_mut(&index) else {
                    log::error!("translation: link at {:#x} without leaf table", vo);
                    return Err(TranslationError::TypeMismatch);
                };
                leaf.table.insert(leaf_vo, pa, SMALL_PAGE_LOG2, flags)
            }
            Descriptor::Invalid => {
                // 先在栈上的空表里试一遍，保证分配叶表之后的插入不会失败
                LeafTable::new().insert(leaf_vo, pa, SMALL_PAGE_LOG2, flags)?;

                let mut leaf = new_leaf(allocator, extra)?;
                let link = match encode_root(&Descriptor::LeafTableLink {
                    table: leaf.table.phys(),
                }) {
                    Ok(link) => link,
                    Err(err) => {
                        reclaim_unlinked(leaf, allocator, extra);
                        return Err(err);
                    }
                };
                if let Err(err) = leaf.table.insert(leaf_vo, pa, SMALL_PAGE_LOG2, flags) {
                    reclaim_unlinked(leaf, allocator, extra);
                    return Err(err);
                }
                self.descriptors.entries[index] = link;
                self.leaves.insert(index, leaf);
                Ok(())
            }
            _ => {
                log::warn!("translation: page inside section at {:#x}", vo);
                Err(TranslationError::TypeMismatch)
            }
        }
    }

    /// 移除 `[vo, vo + size)` 内的所有翻译，并完成 TLB 失效与叶表回收
    pub fn remove_region<A: PhysicalSlabAllocator + ?Sized>(
        &mut self,
        vo: usize,
        size: usize,
        allocator: &A,
    ) -> TranslationResult<()> {
        let mut shootdown = Shootdown::new(None);
        let result = self.remove_region_with(vo, size, &mut shootdown);
        shootdown.complete(allocator);
        result
    }

    /// 移除 `[vo, vo + size)` 内的所有翻译
    ///
    /// 被清空的叶表从根表摘下后交给 `shootdown`，由调用者完成失效与回收。
    /// 段只有在整项被移除时才有意义，部分覆盖一个段同样会移除整个段。
    pub fn remove_region_with(
        &mut self,
        vo: usize,
        size: usize,
        shootdown: &mut Shootdown,
    ) -> TranslationResult<()> {
        if size == 0 {
            return Ok(());
        }
        let end = vo.checked_add(size).ok_or(TranslationError::InvalidOffset)?;
        let mut cursor = vo;

        while cursor < end {
            let Some(index) = Self::index_of(cursor) else {
                break;
            };

            match decode_root(self.descriptors.entries[index]) {
                Descriptor::LeafTableLink { .. } => match self.leaves.get_mut(&index) {
                    Some(leaf) => {
                        shootdown.invalidated +=
                            leaf.table.remove_region(cursor & SECTION_MASK, end - cursor);
                        if leaf.table.is_empty() {
                            self.descriptors.entries[index] = 0;
                            if let Some(leaf) = self.leaves.remove(&index) {
                                shootdown.retired.push(leaf);
                            }
                        }
                    }
                    None => {
                        log::error!("translation: dangling link at index {}", index);
                        self.descriptors.entries[index] = 0;
                        shootdown.invalidated += 1;
                    }
                },
                Descriptor::Section(_) => {
                    self.descriptors.entries[index] = 0;
                    shootdown.invalidated += 1;
                }
                _ => {}
            }

            cursor = match cursor.checked_add(1 << SECTION_LOG2) {
                Some(next) => next & !SECTION_MASK,
                None => break,
            };
        }
        Ok(())
    }

    /// 查询 `vo` 的翻译，返回映射与其页大小（log2）
    pub fn lookup(&self, vo: usize) -> Option<(Mapping, usize)> {
        let index = Self::index_of(vo)?;
        match decode_root(self.descriptors.entries[index]) {
            Descriptor::Section(mapping) => Some((mapping, SECTION_LOG2)),
            Descriptor::LeafTableLink { .. } => {
                let mapping = self.leaves.get(&index)?.table.lookup(vo & SECTION_MASK)?;
                Some((mapping, SMALL_PAGE_LOG2))
            }
            _ => None,
        }
    }

    /// 把 `vo` 翻译为物理地址
    pub fn translate(&self, vo: usize) -> Option<Paddr> {
        let (mapping, size_log2) = self.lookup(vo)?;
        Some(mapping.phys + (vo & ((1 << size_log2) - 1)))
    }

    /// 移除所有翻译并回收全部叶表，`space` 用于失效广播
    pub fn clear<A: PhysicalSlabAllocator + ?Sized>(&mut self, allocator: &A, space: Option<u32>) {
        let mut shootdown = Shootdown::new(space);
        if let Err(err) = self.remove_region_with(0, Self::max_virt_offset(), &mut shootdown) {
            log::error!("translation: clear failed: {}", err);
        }
        shootdown.complete(allocator);
    }

    /// 根描述符数组的虚拟地址
    pub fn virt_addr(&self) -> Vaddr {
        self.descriptors.virt()
    }

    /// 清空后交出根描述符数组的内存
    ///
    /// 返回的内存须交还给当初提供它的分配器。
    pub fn teardown<A: PhysicalSlabAllocator + ?Sized>(
        mut self,
        allocator: &A,
        space: Option<u32>,
    ) -> PhysBox<RootDescriptors> {
        self.clear(allocator, space);
        self.descriptors
    }
}

/// 取得一张新叶表：先找 slab，slab 耗尽时才用额外空间
fn new_leaf<A: PhysicalSlabAllocator + ?Sized>(
    allocator: &A,
    extra: &mut Option<ExtraSpace>,
) -> TranslationResult<LinkedLeaf> {
    debug_assert!(allocator.slab_size() >= 1 << LeafTable::SIZE_LOG2);
    debug_assert!(allocator.slab_align_log2() >= LeafTable::SIZE_LOG2);

    match allocator.allocate() {
        Ok(virt) => {
            let Some(phys) = allocator.physical_address(virt) else {
                log::error!("translation: slab {:?} has no physical address", virt);
                allocator.release(virt);
                return Err(TranslationError::OutOfMemory);
            };
            Ok(LinkedLeaf {
                // SAFETY: slab 的大小与对齐足以容纳一张叶表，且归我们独占
                table: unsafe { PhysBox::zeroed(virt, phys) },
                backing: LeafBacking::Slab,
            })
        }
        Err(TranslationError::OutOfMemory) => match extra.take() {
            Some(space) if space.size_log2() >= LeafTable::SIZE_LOG2 => {
                log::debug!("translation: using donated memory {:?}", space.phys());
                Ok(LinkedLeaf {
                    // SAFETY: 额外空间大小与对齐都不小于一张叶表，所有权已转移给我们
                    table: unsafe { PhysBox::zeroed(space.virt(), space.phys()) },
                    backing: LeafBacking::Donated(space),
                })
            }
            other => {
                *extra = other;
                Err(TranslationError::OutOfMemory)
            }
        },
        Err(err) => Err(err),
    }
}

/// 归还一张尚未链接的叶表；额外空间交回给调用者
fn reclaim_unlinked<A: PhysicalSlabAllocator + ?Sized>(
    leaf: LinkedLeaf,
    allocator: &A,
    extra: &mut Option<ExtraSpace>,
) {
    match leaf.backing {
        LeafBacking::Slab => allocator.release(leaf.table.virt()),
        LeafBacking::Donated(space) => *extra = Some(space),
    }
}
