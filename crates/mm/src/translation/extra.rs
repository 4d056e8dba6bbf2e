//! 一次性捐赠给翻译表的额外内存

use crate::address::{Paddr, Vaddr};
use crate::core_mem_alloc::BackingStore;
use core::fmt;

/// 额外空间
///
/// 当 slab 无法再提供叶表时，缺页处理流水线从系统范围的后备内存中
/// 取出一块交给翻译表重试一次。翻译表不用它时调用者应当 [`ExtraSpace::release`]。
/// 一旦被用作叶表，就归翻译表所有，直到该叶表被回收。
#[must_use = "未使用的额外空间必须归还"]
pub struct ExtraSpace {
    virt: Vaddr,
    phys: Paddr,
    size_log2: usize,
    source: &'static dyn BackingStore,
}

impl ExtraSpace {
    /// 从 `source` 分配 `1 << size_log2` 字节、同样对齐的额外空间
    pub fn alloc(source: &'static dyn BackingStore, size_log2: usize) -> Option<Self> {
        let size = 1usize << size_log2;
        let virt = source.alloc_aligned(size, size_log2)?;
        let Some(phys) = source.phys_addr(virt) else {
            source.free(virt, size);
            return None;
        };
        Some(ExtraSpace {
            virt,
            phys,
            size_log2,
            source,
        })
    }

    /// 虚拟地址
    pub fn virt(&self) -> Vaddr {
        self.virt
    }

    /// 物理地址
    pub fn phys(&self) -> Paddr {
        self.phys
    }

    /// 大小（log2）
    pub fn size_log2(&self) -> usize {
        self.size_log2
    }

    /// 归还给来源
    pub fn release(self) {
        self.source.free(self.virt, 1 << self.size_log2);
    }
}

impl fmt::Debug for ExtraSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtraSpace")
            .field("virt", &self.virt)
            .field("phys", &self.phys)
            .field("size_log2", &self.size_log2)
            .finish()
    }
}
