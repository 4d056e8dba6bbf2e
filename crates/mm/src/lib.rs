//! 内存管理子系统
//!
//! 提供两级翻译表、为其供给表内存的物理 slab 分配器，以及核心内存分配器。
//!
//! - [`translation`]：[`RootTable`] / [`LeafTable`] 与描述符编解码
//! - [`slab`]：[`AlignedSlab`]，叶表内存的来源
//! - [`core_mem_alloc`]：[`CoreMemAllocator`]，根表、slab block 与额外空间的来源
//!
//! # 架构解耦
//!
//! 通过 trait 抽象与架构特定组件解耦：
//! - [`ArchMmOps`]: TLB 失效广播
//!
//! 使用前必须调用 [`register_arch_ops`] 注册实现，并且 `sync` 的
//! `ArchOps` 也必须已经注册。

#![no_std]

extern crate alloc;

#[cfg(test)]
extern crate std;

mod arch_ops;
mod phys_box;

pub mod address;
pub mod core_mem_alloc;
pub mod slab;
pub mod translation;

#[cfg(test)]
mod tests;

pub use arch_ops::{ArchMmOps, arch_ops, register_arch_ops};
pub use phys_box::PhysBox;

// Re-export 常用类型
pub use address::{AlignOps, Paddr, UsizeConvert, Vaddr};
pub use core_mem_alloc::{
    BackingStore, CoreMemAllocator, PAGE_SIZE, PAGE_SIZE_LOG2, core_mem_alloc,
    init_core_mem_allocator,
};
pub use slab::{AlignedSlab, PhysicalSlabAllocator};
pub use translation::{
    Attributes, Descriptor, ExtraSpace, LeafTable, Mapping, MemoryType, PageFlags, RootTable,
    Shootdown, TranslationError, TranslationResult,
};

/// 叶表使用的 slab 配置：1KB slab，每 block 32 个，1KB 对齐
pub type LeafSlab = AlignedSlab<1024, 32, 10>;
