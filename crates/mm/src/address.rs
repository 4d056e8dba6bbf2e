//! 地址模块
//!
//! - [`Paddr`] - 物理地址，硬件描述符里写入的就是它
//! - [`Vaddr`] - 虚拟地址，内核通过它访问表与 slab 内存
//!
//! 两者刻意不能互相隐式转换：同一块内存在内核里的访问地址
//! 与必须告诉 MMU 的地址可能不同，转换只能经由分配器完成。

use core::fmt;
use core::ops::{Add, Sub};

/// 在类型和 usize 之间转换
pub trait UsizeConvert: Copy {
    /// 转换为 usize
    fn as_usize(&self) -> usize;
    /// 从 usize 构造
    fn from_usize(value: usize) -> Self;
}

/// 按 2 的幂对齐的操作
pub trait AlignOps: UsizeConvert {
    /// 是否按 `1 << align_log2` 对齐
    fn is_aligned(self, align_log2: usize) -> bool {
        aligned(self.as_usize(), align_log2)
    }

    /// 向下对齐到 `1 << align_log2`
    fn align_down(self, align_log2: usize) -> Self {
        Self::from_usize(self.as_usize() & !mask(align_log2))
    }

    /// 向上对齐到 `1 << align_log2`，溢出时返回 `None`
    fn align_up(self, align_log2: usize) -> Option<Self> {
        self.as_usize()
            .checked_add(mask(align_log2))
            .map(|v| Self::from_usize(v & !mask(align_log2)))
    }
}

#[inline]
const fn mask(align_log2: usize) -> usize {
    (1usize << align_log2) - 1
}

/// 检查 `addr` 是否按 `1 << align_log2` 对齐
#[inline]
pub const fn aligned(addr: usize, align_log2: usize) -> bool {
    addr & mask(align_log2) == 0
}

macro_rules! impl_address {
    ($type:ident, $tag:literal) => {
        impl UsizeConvert for $type {
            fn as_usize(&self) -> usize {
                self.0
            }

            fn from_usize(value: usize) -> Self {
                Self(value)
            }
        }

        impl AlignOps for $type {}

        impl Add<usize> for $type {
            type Output = Self;

            fn add(self, rhs: usize) -> Self {
                Self(self.0 + rhs)
            }
        }

        impl Sub<$type> for $type {
            type Output = usize;

            fn sub(self, rhs: $type) -> usize {
                self.0 - rhs.0
            }
        }

        impl fmt::Debug for $type {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($tag, "({:#x})"), self.0)
            }
        }

        impl fmt::LowerHex for $type {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::LowerHex::fmt(&self.0, f)
            }
        }
    };
}

/// 物理地址
#[repr(transparent)]
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Paddr(pub usize);
impl_address!(Paddr, "Paddr");

/// 虚拟地址
#[repr(transparent)]
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Vaddr(pub usize);
impl_address!(Vaddr, "Vaddr");

impl Vaddr {
    /// 转换为可变裸指针
    pub fn as_mut_ptr<T>(self) -> *mut T {
        self.0 as *mut T
    }
}
