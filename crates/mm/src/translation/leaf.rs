//! 叶翻译表

use super::descriptor::{Descriptor, Mapping, RawDescriptor, decode_leaf, encode_leaf};
use super::flags::{Attributes, PageFlags};
use super::{TranslationError, TranslationResult};
use crate::address::{Paddr, aligned};

/// 小页大小（log2）
pub const SMALL_PAGE_LOG2: usize = 12;
/// 叶表项数
pub const LEAF_ENTRIES: usize = 256;

/// 叶翻译表：256 个小页描述符，覆盖 1MB
///
/// 大小与对齐都是 1KB，可以直接交给 MMU。
#[repr(C, align(1024))]
pub struct LeafTable {
    entries: [RawDescriptor; LEAF_ENTRIES],
}

const _: () = assert!(core::mem::size_of::<LeafTable>() == 1 << LeafTable::SIZE_LOG2);

impl LeafTable {
    /// 表的大小与对齐（log2）
    pub const SIZE_LOG2: usize = 10;

    /// 创建一张空表
    pub const fn new() -> Self {
        LeafTable {
            entries: [0; LEAF_ENTRIES],
        }
    }

    /// 可翻译的最大虚拟偏移
    pub const fn max_virt_offset() -> usize {
        (LEAF_ENTRIES << SMALL_PAGE_LOG2) - 1
    }

    fn index_of(vo: usize) -> Option<usize> {
        (vo <= Self::max_virt_offset()).then_some(vo >> SMALL_PAGE_LOG2)
    }

    /// 在 `vo` 处插入一个小页翻译
    ///
    /// 重复插入完全相同的翻译不做任何事。
    pub fn insert(
        &mut self,
        vo: usize,
        pa: Paddr,
        size_log2: usize,
        flags: PageFlags,
    ) -> TranslationResult<()> {
        let index = Self::index_of(vo).ok_or(TranslationError::InvalidOffset)?;
        if size_log2 != SMALL_PAGE_LOG2 {
            return Err(TranslationError::UnsupportedSize);
        }
        if !aligned(vo, SMALL_PAGE_LOG2) {
            return Err(TranslationError::Misaligned);
        }

        let new = encode_leaf(&Descriptor::SmallPage(Mapping {
            phys: pa,
            attrs: Attributes::from(flags),
        }))?;

        let old = self.entries[index];
        if decode_leaf(old).is_valid() {
            if old != new {
                log::warn!("leaf: conflicting insert at {:#x}", vo);
                return Err(TranslationError::Conflict);
            }
            return Ok(());
        }
        self.entries[index] = new;
        Ok(())
    }

    /// 使 `[vo, vo + size)` 与本表相交的所有项失效
    ///
    /// 超出本表范围的部分被忽略。返回实际失效的项数。
    pub fn remove_region(&mut self, vo: usize, size: usize) -> usize {
        let end = vo.saturating_add(size);
        let mut cursor = vo;
        let mut removed = 0;

        while cursor < end {
            let Some(index) = Self::index_of(cursor) else {
                break;
            };
            if decode_leaf(self.entries[index]).is_valid() {
                self.entries[index] = 0;
                removed += 1;
            }
            cursor = ((cursor >> SMALL_PAGE_LOG2) + 1) << SMALL_PAGE_LOG2;
        }
        removed
    }

    /// 是否没有任何有效项
    pub fn is_empty(&self) -> bool {
        self.entries.iter().all(|&raw| !decode_leaf(raw).is_valid())
    }

    /// 查询 `vo` 所在页的翻译
    pub fn lookup(&self, vo: usize) -> Option<Mapping> {
        match decode_leaf(self.entries[Self::index_of(vo)?]) {
            Descriptor::SmallPage(mapping) => Some(mapping),
            _ => None,
        }
    }

    /// 有效项的个数
    pub fn valid_entries(&self) -> usize {
        self.entries
            .iter()
            .filter(|&&raw| decode_leaf(raw).is_valid())
            .count()
    }
}

impl Default for LeafTable {
    fn default() -> Self {
        Self::new()
    }
}
