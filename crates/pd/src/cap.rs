//! Capability

/// 指向另一个对象的通信端点
///
/// `dst` 为 0 表示无效。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Capability {
    dst: u32,
    badge: usize,
}

impl Capability {
    /// 创建 capability
    pub const fn new(dst: u32, badge: usize) -> Self {
        Capability { dst, badge }
    }

    /// 无效的 capability
    pub const fn invalid() -> Self {
        Capability { dst: 0, badge: 0 }
    }

    /// 是否有效
    pub const fn is_valid(&self) -> bool {
        self.dst != 0
    }

    /// 目标对象
    pub const fn dst(&self) -> u32 {
        self.dst
    }

    /// 附带的标记
    pub const fn badge(&self) -> usize {
        self.badge
    }
}

impl Default for Capability {
    fn default() -> Self {
        Self::invalid()
    }
}
