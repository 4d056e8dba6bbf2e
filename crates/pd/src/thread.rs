//! 线程与保护域的绑定

use crate::kernel::DomainId;

/// 线程标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(pub u32);

/// 可以绑定到保护域的线程
///
/// 调度器里的线程对象实现此 trait，
/// [`ProtectionDomain::bind_thread`](crate::ProtectionDomain::bind_thread) 通过它完成绑定。
pub trait DomainMember {
    /// 线程标识
    fn thread_id(&self) -> ThreadId;

    /// 当前所属的保护域
    fn domain(&self) -> Option<DomainId>;

    /// 加入保护域；`main` 表示它是该域的主线程
    fn join_domain(&mut self, domain: DomainId, main: bool);
}

/// 最简单的线程记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Thread {
    id: ThreadId,
    domain: Option<DomainId>,
    main: bool,
}

impl Thread {
    /// 创建一个未绑定的线程
    pub fn new(id: ThreadId) -> Self {
        Thread {
            id,
            domain: None,
            main: false,
        }
    }

    /// 是否为所属保护域的主线程
    pub fn is_main(&self) -> bool {
        self.main
    }
}

impl DomainMember for Thread {
    fn thread_id(&self) -> ThreadId {
        self.id
    }

    fn domain(&self) -> Option<DomainId> {
        self.domain
    }

    fn join_domain(&mut self, domain: DomainId, main: bool) {
        self.domain = Some(domain);
        self.main = main;
    }
}
