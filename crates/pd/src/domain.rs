//! 保护域
//!
//! 保护域拥有一张根翻译表和一个私有的 slab 分配器，是地址空间的身份单位。
//!
//! 根表与 slab 都从创建时给定的后备内存分配，彼此独立的保护域之间
//! 不共享任何分配器状态。对同一张根表的修改由保护域内部的锁串行化。

use crate::cap::Capability;
use crate::error::DomainError;
use crate::kernel::{self, DomainId};
use crate::pager::MappingRequest;
use crate::thread::{DomainMember, ThreadId};
use alloc::string::{String, ToString};
use core::fmt;
use mm::{BackingStore, ExtraSpace, LeafSlab, Paddr, RootTable, Shootdown, TranslationResult};
use sync::SpinLock;

/// 每个保护域的叶表 slab
pub type PageSlab = LeafSlab;

struct DomainState {
    main_thread: Option<ThreadId>,
    parent: Option<Capability>,
}

/// 保护域
pub struct ProtectionDomain {
    id: DomainId,
    label: String,
    table: SpinLock<RootTable>,
    slab: PageSlab,
    core: &'static dyn BackingStore,
    state: SpinLock<DomainState>,
}

impl ProtectionDomain {
    /// 创建保护域并登记到内核保护域表
    ///
    /// 根表与 slab 都从 `core` 分配。如果设置了模式切换控制对象，会先把它映射进来。
    ///
    /// # 错误
    /// - [`DomainError::OutOfMemory`]：slab 或模式切换映射失败
    /// - [`DomainError::QuotaExceeded`]：根表无处安放
    /// - [`DomainError::Unavailable`]：保护域表已满
    pub fn new(label: &str, core: &'static dyn BackingStore) -> Result<Self, DomainError> {
        let slab = PageSlab::new(core).map_err(|err| {
            log::warn!("pd '{}': cannot create slab: {}", label, err);
            DomainError::OutOfMemory
        })?;
        let Some(mut table) = RootTable::alloc_in(core) else {
            log::warn!("pd '{}': no memory for root table", label);
            return Err(DomainError::QuotaExceeded);
        };

        if let Some(mtc) = kernel::mode_transition()
            && let Err(err) = mtc.map(&mut table, &slab)
        {
            log::error!("pd '{}': cannot map mode transition control: {}", label, err);
            discard_table(table, &slab, core);
            return Err(DomainError::OutOfMemory);
        }

        let Some(id) = kernel::new_pd(label, table.phys_addr()) else {
            discard_table(table, &slab, core);
            return Err(DomainError::Unavailable);
        };

        log::debug!(
            "pd '{}': created as {:?}, root table at {:?}",
            label,
            id,
            table.phys_addr()
        );
        Ok(ProtectionDomain {
            id,
            label: label.to_string(),
            table: SpinLock::new(table),
            slab,
            core,
            state: SpinLock::new(DomainState {
                main_thread: None,
                parent: None,
            }),
        })
    }

    /// 标识
    pub fn id(&self) -> DomainId {
        self.id
    }

    /// 标签
    pub fn label(&self) -> &str {
        &self.label
    }

    /// 根翻译表的物理地址
    pub fn table_phys_addr(&self) -> Paddr {
        self.table.lock().phys_addr()
    }

    /// 主线程
    pub fn main_thread(&self) -> Option<ThreadId> {
        self.state.lock().main_thread
    }

    /// 父端点
    pub fn parent(&self) -> Option<Capability> {
        self.state.lock().parent
    }

    /// 绑定线程，第一个绑定的线程成为主线程
    pub fn bind_thread<T: DomainMember + ?Sized>(&self, thread: &mut T) -> Result<(), DomainError> {
        if let Some(other) = thread.domain() {
            log::warn!(
                "pd '{}': thread {:?} already bound to {:?}",
                self.label,
                thread.thread_id(),
                other
            );
            return Err(DomainError::AlreadyBound);
        }

        let main = {
            let mut state = self.state.lock();
            let main = state.main_thread.is_none();
            if main {
                state.main_thread = Some(thread.thread_id());
            }
            main
        };
        thread.join_domain(self.id, main);
        Ok(())
    }

    /// 设置父端点
    pub fn assign_parent(&self, parent: Capability) -> Result<(), DomainError> {
        if !parent.is_valid() {
            log::error!("pd '{}': invalid parent capability", self.label);
            return Err(DomainError::InvalidCapability);
        }
        self.state.lock().parent = Some(parent);
        Ok(())
    }

    /// 安装一个翻译；slab 耗尽时可使用 `extra` 作为叶表
    pub fn apply_mapping(
        &self,
        request: &MappingRequest,
        extra: &mut Option<ExtraSpace>,
    ) -> TranslationResult<()> {
        self.table.lock().insert_with_extra(
            request.virt,
            request.phys,
            request.size_log2,
            request.flags,
            &self.slab,
            extra,
        )
    }

    /// 移除 `[virt, virt + size)` 内的翻译
    ///
    /// 在本域的地址空间上广播 TLB 失效之后才回收叶表。
    pub fn unmap(&self, virt: usize, size: usize) -> TranslationResult<()> {
        let mut shootdown = Shootdown::new(Some(self.id.as_u32()));
        let result = self.table.lock().remove_region_with(virt, size, &mut shootdown);
        shootdown.complete(&self.slab);
        result
    }

    /// 把虚拟地址翻译为物理地址
    pub fn translate(&self, virt: usize) -> Option<Paddr> {
        self.table.lock().translate(virt)
    }

    /// 当前的叶表数
    pub fn leaf_tables(&self) -> usize {
        self.table.lock().leaf_count()
    }

    /// 私有 slab
    pub fn slab(&self) -> &PageSlab {
        &self.slab
    }
}

impl Drop for ProtectionDomain {
    fn drop(&mut self) {
        // 先注销：根表内存回到 core 后可能立即被新保护域登记
        kernel::delete_pd(self.id);
        let table = self.table.get_mut();
        table.clear(&self.slab, Some(self.id.as_u32()));
        self.core.free(table.virt_addr(), 1 << RootTable::SIZE_LOG2);
        log::debug!("pd '{}': destroyed", self.label);
    }
}

impl fmt::Debug for ProtectionDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProtectionDomain")
            .field("id", &self.id)
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

/// 回收一张尚未交给保护域的根表
fn discard_table(table: RootTable, slab: &PageSlab, core: &dyn BackingStore) {
    let root = table.teardown(slab, None);
    core.free(root.virt(), 1 << RootTable::SIZE_LOG2);
}
