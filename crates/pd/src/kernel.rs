//! 内核全局状态
//!
//! 这里的对象在内核整个生命周期内存在，只初始化一次，从不销毁：
//!
//! - 保护域表：记录所有存活保护域的标签和根表物理地址
//! - [`ModeTransitionControl`]：每个新保护域都要映射的模式切换代码
//! - 核心保护域：内核自身的地址空间

use crate::domain::ProtectionDomain;
use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::string::{String, ToString};
use lazy_static::lazy_static;
use mm::translation::{SECTION_LOG2, SMALL_PAGE_LOG2};
use mm::{Paddr, PageFlags, PhysicalSlabAllocator, RootTable, TranslationResult};
use once_cell::race::OnceBox;
use sync::SpinLock;

/// 保护域表的容量
pub const MAX_DOMAINS: usize = 256;

/// 保护域标识，同时用作 TLB 失效的地址空间编号
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DomainId(u32);

impl DomainId {
    /// 数值形式
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

/// 保护域表中的记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainInfo {
    /// 标签
    pub label: String,
    /// 根翻译表的物理地址
    pub table: Paddr,
}

struct DomainTable {
    domains: BTreeMap<DomainId, DomainInfo>,
    next_id: u32,
}

impl DomainTable {
    fn new() -> Self {
        DomainTable {
            domains: BTreeMap::new(),
            next_id: 1,
        }
    }

    fn insert(&mut self, info: DomainInfo) -> Option<DomainId> {
        if self.domains.len() >= MAX_DOMAINS {
            return None;
        }
        // 表未满，总能找到空闲编号；0 保留
        loop {
            let id = DomainId(self.next_id);
            self.next_id = self.next_id.checked_add(1).unwrap_or(1);
            if !self.domains.contains_key(&id) {
                self.domains.insert(id, info);
                return Some(id);
            }
        }
    }
}

lazy_static! {
    /// 全局保护域表
    static ref DOMAIN_TABLE: SpinLock<DomainTable> = SpinLock::new(DomainTable::new());
}

/// 登记一个新保护域，表满时返回 `None`
pub fn new_pd(label: &str, table: Paddr) -> Option<DomainId> {
    let id = DOMAIN_TABLE.lock().insert(DomainInfo {
        label: label.to_string(),
        table,
    });
    if id.is_none() {
        log::warn!("kernel: domain table full, cannot register '{}'", label);
    }
    id
}

/// 注销保护域，返回它是否存在
pub fn delete_pd(id: DomainId) -> bool {
    DOMAIN_TABLE.lock().domains.remove(&id).is_some()
}

/// 查询保护域
pub fn lookup_pd(id: DomainId) -> Option<DomainInfo> {
    DOMAIN_TABLE.lock().domains.get(&id).cloned()
}

/// 存活的保护域数
pub fn domain_count() -> usize {
    DOMAIN_TABLE.lock().domains.len()
}

/// 模式切换控制对象
///
/// 用户态与内核态之间切换的代码，必须以相同的虚拟地址出现在每个地址空间中。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeTransitionControl {
    /// 虚拟地址
    pub virt: usize,
    /// 物理地址
    pub phys: Paddr,
    /// 大小（log2），至少一页
    pub size_log2: usize,
}

impl ModeTransitionControl {
    /// 映射进 `table`
    ///
    /// 不足一个段时按小页映射，否则按段映射。
    pub fn map<A: PhysicalSlabAllocator + ?Sized>(
        &self,
        table: &mut RootTable,
        slab: &A,
    ) -> TranslationResult<()> {
        let page_log2 = if self.size_log2 >= SECTION_LOG2 {
            SECTION_LOG2
        } else {
            SMALL_PAGE_LOG2
        };
        let size = 1usize << self.size_log2.max(SMALL_PAGE_LOG2);
        for offset in (0..size).step_by(1 << page_log2) {
            table.insert(
                self.virt + offset,
                self.phys + offset,
                page_log2,
                PageFlags::mode_transition(),
                slab,
            )?;
        }
        Ok(())
    }
}

static MODE_TRANSITION: OnceBox<ModeTransitionControl> = OnceBox::new();

/// 设置模式切换控制对象，已设置时原样返回参数
///
/// 必须在创建第一个保护域之前调用。
pub fn init_mode_transition(mtc: ModeTransitionControl) -> Result<(), ModeTransitionControl> {
    MODE_TRANSITION.set(Box::new(mtc)).map_err(|mtc| *mtc)
}

/// 模式切换控制对象
pub fn mode_transition() -> Option<&'static ModeTransitionControl> {
    MODE_TRANSITION.get()
}

static CORE_PD: OnceBox<ProtectionDomain> = OnceBox::new();

/// 安装核心保护域，已安装时原样返回参数
pub fn init_core_pd(pd: ProtectionDomain) -> Result<(), ProtectionDomain> {
    CORE_PD.set(Box::new(pd)).map_err(|pd| *pd)
}

/// 核心保护域
pub fn core_pd() -> Option<&'static ProtectionDomain> {
    CORE_PD.get()
}
