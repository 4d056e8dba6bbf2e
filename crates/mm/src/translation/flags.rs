//! 页属性

use bitflags::bitflags;

bitflags! {
    /// 调用者请求的映射属性
    ///
    /// `WRITE_COMBINED` 和 `IO_MEM` 只在 [`PageFlags::apply_mapping`] 中参与推导，
    /// 写入描述符的是由它们决定的 `DEVICE`/`CACHEABLE`。
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PageFlags: u8 {
        /// 可写
        const WRITABLE = 1 << 0;
        /// 仅特权级可访问
        const PRIVILEGED = 1 << 1;
        /// 可执行
        const EXECUTABLE = 1 << 2;
        /// 全局映射，不随地址空间切换失效
        const GLOBAL = 1 << 3;
        /// 设备内存
        const DEVICE = 1 << 4;
        /// 可缓存
        const CACHEABLE = 1 << 5;
        /// 写合并
        const WRITE_COMBINED = 1 << 6;
        /// I/O 内存
        const IO_MEM = 1 << 7;
    }
}

impl PageFlags {
    /// 缺页处理时为用户映射推导属性
    ///
    /// 用户映射总是可执行、非特权、非全局的。
    pub fn apply_mapping(writable: bool, write_combined: bool, io_mem: bool) -> Self {
        let mut flags = PageFlags::EXECUTABLE;
        flags.set(PageFlags::WRITABLE, writable);
        flags.set(PageFlags::WRITE_COMBINED, write_combined);
        flags.set(PageFlags::IO_MEM, io_mem);
        flags.set(PageFlags::DEVICE, io_mem);
        flags.set(PageFlags::CACHEABLE, !write_combined);
        flags
    }

    /// 模式切换代码所需的属性：特权、可执行、全局、可缓存
    pub fn mode_transition() -> Self {
        PageFlags::PRIVILEGED | PageFlags::EXECUTABLE | PageFlags::GLOBAL | PageFlags::CACHEABLE
    }
}

/// 内存类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryType {
    /// 设备内存（强序，不缓存）
    Device,
    /// 普通可缓存内存
    Cacheable,
    /// 普通不可缓存内存
    Uncached,
}

/// 描述符中实际能表达的属性
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attributes {
    /// 可写
    pub writable: bool,
    /// 仅特权级可访问
    pub privileged: bool,
    /// 可执行
    pub executable: bool,
    /// 全局
    pub global: bool,
    /// 内存类型
    pub memory: MemoryType,
}

impl From<PageFlags> for Attributes {
    fn from(flags: PageFlags) -> Self {
        let memory = if flags.contains(PageFlags::DEVICE) {
            MemoryType::Device
        } else if flags.contains(PageFlags::CACHEABLE) {
            MemoryType::Cacheable
        } else {
            MemoryType::Uncached
        };
        Attributes {
            writable: flags.contains(PageFlags::WRITABLE),
            privileged: flags.contains(PageFlags::PRIVILEGED),
            executable: flags.contains(PageFlags::EXECUTABLE),
            global: flags.contains(PageFlags::GLOBAL),
            memory,
        }
    }
}
