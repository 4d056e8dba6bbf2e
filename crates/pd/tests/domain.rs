mod common;

use common::{DOMAIN_PAGES, last_broadcast_space, ram, test_store};
use mm::{PageFlags, Paddr};
use pd::kernel::lookup_pd;
use pd::pager::MappingRequest;
use pd::{Capability, DomainError, DomainMember, ProtectionDomain, Thread, ThreadId};

fn rw() -> PageFlags {
    PageFlags::apply_mapping(true, false, false)
}

#[test]
fn test_create_registers_and_drop_releases() {
    let store = test_store(DOMAIN_PAGES);
    let pd = ProtectionDomain::new("init", store).unwrap();
    assert_eq!(store.free_frames(), 0);

    let info = lookup_pd(pd.id()).unwrap();
    assert_eq!(info.label, "init");
    assert_eq!(info.table, pd.table_phys_addr());
    assert_eq!(pd.table_phys_addr().0 & 0x3fff, 0);

    let id = pd.id();
    drop(pd);
    assert!(lookup_pd(id).is_none());
    assert_eq!(store.allocated_frames(), 0);
}

#[test]
fn test_create_without_room_for_root_table() {
    // 只够 slab 的首个 block
    let store = test_store(8);
    assert_eq!(
        ProtectionDomain::new("small", store).unwrap_err(),
        DomainError::QuotaExceeded
    );
    assert_eq!(store.allocated_frames(), 0);
}

#[test]
fn test_create_without_room_for_slab() {
    let store = test_store(4);
    assert_eq!(
        ProtectionDomain::new("tiny", store).unwrap_err(),
        DomainError::OutOfMemory
    );
    assert_eq!(store.allocated_frames(), 0);
}

#[test]
fn test_first_bound_thread_is_main() {
    let store = test_store(DOMAIN_PAGES);
    let pd = ProtectionDomain::new("threads", store).unwrap();

    let mut first = Thread::new(ThreadId(1));
    let mut second = Thread::new(ThreadId(2));
    pd.bind_thread(&mut first).unwrap();
    pd.bind_thread(&mut second).unwrap();

    assert!(first.is_main());
    assert!(!second.is_main());
    assert_eq!(first.domain(), Some(pd.id()));
    assert_eq!(second.domain(), Some(pd.id()));
    assert_eq!(pd.main_thread(), Some(ThreadId(1)));
}

#[test]
fn test_bind_rejects_bound_thread() {
    let a = ProtectionDomain::new("a", test_store(DOMAIN_PAGES)).unwrap();
    let b = ProtectionDomain::new("b", test_store(DOMAIN_PAGES)).unwrap();

    let mut thread = Thread::new(ThreadId(7));
    a.bind_thread(&mut thread).unwrap();
    assert_eq!(b.bind_thread(&mut thread), Err(DomainError::AlreadyBound));
    assert_eq!(a.bind_thread(&mut thread), Err(DomainError::AlreadyBound));
    assert_eq!(thread.domain(), Some(a.id()));
    assert_eq!(b.main_thread(), None);
}

#[test]
fn test_assign_parent() {
    let pd = ProtectionDomain::new("child", test_store(DOMAIN_PAGES)).unwrap();
    assert_eq!(
        pd.assign_parent(Capability::invalid()),
        Err(DomainError::InvalidCapability)
    );
    assert_eq!(pd.parent(), None);

    let parent = Capability::new(3, 0x42);
    pd.assign_parent(parent).unwrap();
    assert_eq!(pd.parent(), Some(parent));
}

#[test]
fn test_domains_are_independent() {
    let a = ProtectionDomain::new("a", test_store(DOMAIN_PAGES)).unwrap();
    let b = ProtectionDomain::new("b", test_store(DOMAIN_PAGES)).unwrap();
    assert_ne!(a.id(), b.id());

    a.apply_mapping(&MappingRequest::page(0x1000, ram(0), rw()), &mut None)
        .unwrap();
    assert_eq!(a.translate(0x1000), Some(ram(0)));
    assert_eq!(b.translate(0x1000), None);
    assert_eq!(b.leaf_tables(), 0);
}

#[test]
fn test_unmap_shoots_down_own_space() {
    let pd = ProtectionDomain::new("unmap", test_store(DOMAIN_PAGES)).unwrap();
    pd.apply_mapping(&MappingRequest::page(0x4000, ram(0x4000), rw()), &mut None)
        .unwrap();
    assert_eq!(pd.slab().live_entries(), 1);

    pd.unmap(0x4000, 0x1000).unwrap();
    assert_eq!(last_broadcast_space(), Some(Some(pd.id().as_u32())));
    assert_eq!(pd.translate(0x4000), None);
    assert_eq!(pd.leaf_tables(), 0);
    assert_eq!(pd.slab().live_entries(), 0);
}

#[test]
fn test_section_mapping() {
    let pd = ProtectionDomain::new("section", test_store(DOMAIN_PAGES)).unwrap();
    let request = MappingRequest {
        virt: 0x40_0000,
        phys: Paddr(0x9010_0000),
        size_log2: 20,
        flags: rw(),
    };
    pd.apply_mapping(&request, &mut None).unwrap();
    assert_eq!(pd.translate(0x40_1234), Some(Paddr(0x9010_1234)));
    assert_eq!(pd.leaf_tables(), 0);
}
