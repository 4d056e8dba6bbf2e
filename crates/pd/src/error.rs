//! 保护域错误

use core::fmt;

/// 保护域操作错误
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomainError {
    /// 内核对象（slab、模式切换映射）分配失败
    OutOfMemory,
    /// 没有内存放置根翻译表
    QuotaExceeded,
    /// 内核保护域表已满
    Unavailable,
    /// 线程已绑定到某个保护域
    AlreadyBound,
    /// 无效的 capability
    InvalidCapability,
}

impl fmt::Display for DomainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            DomainError::OutOfMemory => "out of memory",
            DomainError::QuotaExceeded => "quota exceeded",
            DomainError::Unavailable => "kernel object unavailable",
            DomainError::AlreadyBound => "thread already bound",
            DomainError::InvalidCapability => "invalid capability",
        };
        f.write_str(msg)
    }
}
