//! 两级翻译表
//!
//! 采用 ARMv7 短描述符格式：
//!
//! - [`RootTable`]：4096 项，每项覆盖 1MB，可以是段映射或指向叶表的链接
//! - [`LeafTable`]：256 项，每项覆盖 4KB 小页
//!
//! 表的内存由调用者提供：根表来自 [`BackingStore`](crate::BackingStore)，
//! 叶表来自 [`PhysicalSlabAllocator`](crate::PhysicalSlabAllocator)，
//! slab 耗尽时可改用一次性捐赠的 [`ExtraSpace`]。
//!
//! 同一张表的并发修改由持有者加锁保证，本模块内部不加锁。

mod descriptor;
mod extra;
mod flags;
mod leaf;
mod root;

pub use descriptor::{
    Descriptor, Mapping, RawDescriptor, decode_leaf, decode_root, encode_leaf, encode_root,
};
pub use extra::ExtraSpace;
pub use flags::{Attributes, MemoryType, PageFlags};
pub use leaf::{LEAF_ENTRIES, LeafTable, SMALL_PAGE_LOG2};
pub use root::{ROOT_ENTRIES, RootDescriptors, RootTable, SECTION_LOG2, Shootdown};

use core::fmt;

/// 翻译表操作错误
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranslationError {
    /// 目标项已有不同的有效翻译
    Conflict,
    /// 没有可用于叶表的内存
    OutOfMemory,
    /// 目标项已存在另一种类型的翻译（段与叶表链接互斥）
    TypeMismatch,
    /// 虚拟偏移超出表的覆盖范围
    InvalidOffset,
    /// 该层级不支持的页大小
    UnsupportedSize,
    /// 地址未按页大小对齐，或无法写入描述符
    Misaligned,
}

impl TranslationError {
    /// 是否可以在获得额外内存后重试
    pub fn is_retryable(self) -> bool {
        self == TranslationError::OutOfMemory
    }
}

impl fmt::Display for TranslationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            TranslationError::Conflict => "conflicting translation",
            TranslationError::OutOfMemory => "out of translation table memory",
            TranslationError::TypeMismatch => "translation of another type present",
            TranslationError::InvalidOffset => "virtual offset out of range",
            TranslationError::UnsupportedSize => "unsupported page size",
            TranslationError::Misaligned => "misaligned address",
        };
        f.write_str(msg)
    }
}

/// 翻译表操作结果
pub type TranslationResult<T> = Result<T, TranslationError>;
