// Process-wide kernel state. Kept in its own test binary: the mode
// transition control and the core domain can be set only once.

mod common;

use common::{DOMAIN_PAGES, ram, test_store};
use mm::PageFlags;
use mm::translation::{Attributes, MemoryType};
use pd::ProtectionDomain;
use pd::kernel::{
    ModeTransitionControl, core_pd, init_core_pd, init_mode_transition, mode_transition,
};
use pd::pager::MappingRequest;

const MTC_VIRT: usize = 0xffff_0000;

#[test]
fn test_mode_transition_and_core_domain() {
    let mtc = ModeTransitionControl {
        virt: MTC_VIRT,
        phys: ram(0x10_0000),
        size_log2: 13,
    };
    assert!(mode_transition().is_none());
    init_mode_transition(mtc).unwrap();
    assert_eq!(init_mode_transition(mtc), Err(mtc));
    assert_eq!(mode_transition(), Some(&mtc));

    // 新保护域都带有模式切换映射：两页，一张叶表
    let pd = ProtectionDomain::new("user", test_store(DOMAIN_PAGES)).unwrap();
    assert_eq!(pd.leaf_tables(), 1);
    assert_eq!(pd.translate(MTC_VIRT + 0x1004), Some(ram(0x10_1004)));

    // 特权、可执行、全局
    let conflict = pd.apply_mapping(
        &MappingRequest::page(
            MTC_VIRT,
            ram(0x10_0000),
            PageFlags::apply_mapping(true, false, false),
        ),
        &mut None,
    );
    assert!(conflict.is_err());
    let expected = Attributes::from(PageFlags::mode_transition());
    assert!(expected.privileged && expected.executable && expected.global);
    assert_eq!(expected.memory, MemoryType::Cacheable);

    let core = ProtectionDomain::new("core", test_store(DOMAIN_PAGES)).unwrap();
    let core_id = core.id();
    init_core_pd(core).unwrap();
    assert_eq!(core_pd().map(|pd| pd.id()), Some(core_id));
    assert_eq!(core_pd().map(|pd| pd.label()), Some("core"));

    let other = ProtectionDomain::new("core2", test_store(DOMAIN_PAGES)).unwrap();
    let other_id = other.id();
    let rejected = init_core_pd(other).unwrap_err();
    assert_eq!(rejected.id(), other_id);
    assert_eq!(core_pd().map(|pd| pd.id()), Some(core_id));
}
