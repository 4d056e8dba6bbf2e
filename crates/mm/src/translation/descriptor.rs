//! 描述符编解码
//!
//! 硬件描述符是 32 位字。这里的函数都是纯函数：
//! 在 [`Descriptor`] 与原始字之间转换，不触碰任何表内存。
//!
//! 访问权限用 3 位 AP 表示（低两位为 AP[1:0]，最高位为 AP[2]）：
//!
//! | 可写 | 特权 | AP    |
//! |------|------|-------|
//! | 是   | 是   | 0b001 |
//! | 是   | 否   | 0b011 |
//! | 否   | 是   | 0b101 |
//! | 否   | 否   | 0b010 |

use super::flags::{Attributes, MemoryType};
use super::{TranslationError, TranslationResult};
use crate::address::{AlignOps, Paddr, UsizeConvert};

/// 原始描述符
pub type RawDescriptor = u32;

/// 一个有效翻译
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mapping {
    /// 目标物理地址
    pub phys: Paddr,
    /// 属性
    pub attrs: Attributes,
}

/// 解码后的描述符
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Descriptor {
    /// 无效项，访问会触发缺页
    Invalid,
    /// 根表项：指向一张叶表
    LeafTableLink {
        /// 叶表的物理地址
        table: Paddr,
    },
    /// 根表项：1MB 段映射
    Section(Mapping),
    /// 叶表项：4KB 小页映射
    SmallPage(Mapping),
}

impl Descriptor {
    /// 是否为有效项
    pub fn is_valid(&self) -> bool {
        !matches!(self, Descriptor::Invalid)
    }
}

/// 位域 `[shift, shift + width)`
#[derive(Clone, Copy)]
struct Field {
    shift: u32,
    width: u32,
}

impl Field {
    const fn new(shift: u32, width: u32) -> Self {
        Field { shift, width }
    }

    const fn mask(self) -> u32 {
        ((1u64 << self.width) - 1) as u32
    }

    fn get(self, raw: RawDescriptor) -> u32 {
        (raw >> self.shift) & self.mask()
    }

    fn bits(self, value: u32) -> RawDescriptor {
        (value & self.mask()) << self.shift
    }

    fn flag(self, set: bool) -> RawDescriptor {
        self.bits(set as u32)
    }
}

/// 短描述符公共字段
struct Layout {
    xn: Field,
    b: Field,
    c: Field,
    ap0: Field,
    tex: Field,
    ap1: Field,
    s: Field,
    ng: Field,
    pa: Field,
}

const SMALL_PAGE: Layout = Layout {
    xn: Field::new(0, 1),
    b: Field::new(2, 1),
    c: Field::new(3, 1),
    ap0: Field::new(4, 2),
    tex: Field::new(6, 3),
    ap1: Field::new(9, 1),
    s: Field::new(10, 1),
    ng: Field::new(11, 1),
    pa: Field::new(12, 20),
};

const SECTION: Layout = Layout {
    b: Field::new(2, 1),
    c: Field::new(3, 1),
    xn: Field::new(4, 1),
    ap0: Field::new(10, 2),
    tex: Field::new(12, 3),
    ap1: Field::new(15, 1),
    s: Field::new(16, 1),
    ng: Field::new(17, 1),
    pa: Field::new(20, 12),
};

const TYPE: Field = Field::new(0, 2);
const TYPE_BIT1: Field = Field::new(1, 1);
/// 段描述符中区分段与超级段的位
const SUPERSECTION: Field = Field::new(18, 1);
const LINK_PA: Field = Field::new(10, 22);

const TEX_DEVICE: u32 = 2;
const TEX_CACHEABLE: u32 = 5;
const TEX_UNCACHED: u32 = 6;

fn access_permission(attrs: &Attributes) -> u32 {
    match (attrs.writable, attrs.privileged) {
        (true, true) => 0b001,
        (true, false) => 0b011,
        (false, true) => 0b101,
        (false, false) => 0b010,
    }
}

fn decode_access_permission(ap: u32) -> (bool, bool) {
    match ap {
        0b001 => (true, true),
        0b011 => (true, false),
        0b101 => (false, true),
        _ => (false, false),
    }
}

impl Layout {
    fn encode(&self, mapping: &Mapping) -> RawDescriptor {
        let attrs = &mapping.attrs;
        let ap = access_permission(attrs);
        let (tex, c, b) = match attrs.memory {
            MemoryType::Device => (TEX_DEVICE, false, false),
            MemoryType::Cacheable => (TEX_CACHEABLE, false, true),
            MemoryType::Uncached => (TEX_UNCACHED, true, false),
        };

        self.xn.flag(!attrs.executable)
            | self.b.flag(b)
            | self.c.flag(c)
            | self.ap0.bits(ap)
            | self.tex.bits(tex)
            | self.ap1.bits(ap >> 2)
            | self.s.flag(true)
            | self.ng.flag(!attrs.global)
            | self.pa.bits((mapping.phys.as_usize() >> self.pa.shift) as u32)
    }

    fn decode(&self, raw: RawDescriptor) -> Mapping {
        let ap = self.ap0.get(raw) | (self.ap1.get(raw) << 2);
        let (writable, privileged) = decode_access_permission(ap);
        let memory = match self.tex.get(raw) {
            TEX_DEVICE => MemoryType::Device,
            TEX_CACHEABLE if self.b.get(raw) == 1 => MemoryType::Cacheable,
            _ => MemoryType::Uncached,
        };
        Mapping {
            phys: Paddr((self.pa.get(raw) as usize) << self.pa.shift),
            attrs: Attributes {
                writable,
                privileged,
                executable: self.xn.get(raw) == 0,
                global: self.ng.get(raw) == 0,
                memory,
            },
        }
    }
}

/// 检查物理地址能否放进描述符的地址域
fn check_phys(phys: Paddr, align_log2: usize) -> TranslationResult<()> {
    if phys.as_usize() > u32::MAX as usize || !phys.is_aligned(align_log2) {
        return Err(TranslationError::Misaligned);
    }
    Ok(())
}

/// 编码叶表项
///
/// 只接受 [`Descriptor::Invalid`] 和 [`Descriptor::SmallPage`]。
pub fn encode_leaf(desc: &Descriptor) -> TranslationResult<RawDescriptor> {
    match desc {
        Descriptor::Invalid => Ok(0),
        Descriptor::SmallPage(mapping) => {
            check_phys(mapping.phys, SMALL_PAGE.pa.shift as usize)?;
            Ok(SMALL_PAGE.encode(mapping) | TYPE_BIT1.flag(true))
        }
        _ => Err(TranslationError::TypeMismatch),
    }
}

/// 解码叶表项
///
/// 大页描述符不受支持，按无效项处理。
pub fn decode_leaf(raw: RawDescriptor) -> Descriptor {
    if TYPE.get(raw) == 0 || TYPE_BIT1.get(raw) == 0 {
        return Descriptor::Invalid;
    }
    Descriptor::SmallPage(SMALL_PAGE.decode(raw))
}

/// 编码根表项
///
/// 只接受 [`Descriptor::Invalid`]、[`Descriptor::LeafTableLink`] 和
/// [`Descriptor::Section`]。叶表链接的 domain 字段总是 0。
pub fn encode_root(desc: &Descriptor) -> TranslationResult<RawDescriptor> {
    match desc {
        Descriptor::Invalid => Ok(0),
        Descriptor::LeafTableLink { table } => {
            check_phys(*table, LINK_PA.shift as usize)?;
            Ok(TYPE.bits(0b01) | LINK_PA.bits((table.as_usize() >> LINK_PA.shift) as u32))
        }
        Descriptor::Section(mapping) => {
            check_phys(mapping.phys, SECTION.pa.shift as usize)?;
            Ok(SECTION.encode(mapping) | TYPE_BIT1.flag(true))
        }
        Descriptor::SmallPage(_) => Err(TranslationError::TypeMismatch),
    }
}

/// 解码根表项
///
/// 超级段不受支持，按无效项处理。
pub fn decode_root(raw: RawDescriptor) -> Descriptor {
    match TYPE.get(raw) {
        0 => Descriptor::Invalid,
        0b01 => Descriptor::LeafTableLink {
            table: Paddr((LINK_PA.get(raw) as usize) << LINK_PA.shift),
        },
        _ if SUPERSECTION.get(raw) == 0 => Descriptor::Section(SECTION.decode(raw)),
        _ => Descriptor::Invalid,
    }
}
