// A mode transition control that cannot be mapped. Kept in its own test
// binary: the mode transition control can be set only once.

mod common;

use common::{DOMAIN_PAGES, ram, test_store};
use pd::kernel::{ModeTransitionControl, domain_count, init_mode_transition};
use pd::{DomainError, ProtectionDomain};

#[test]
fn test_unmappable_mode_transition_releases_everything() {
    // 第二页落在 4GB 之外：第一页的叶表已经建好，映射才失败
    let mtc = ModeTransitionControl {
        virt: 0xffff_f000,
        phys: ram(0x10_0000),
        size_log2: 13,
    };
    init_mode_transition(mtc).unwrap();

    let store = test_store(DOMAIN_PAGES);
    let domains = domain_count();
    assert_eq!(
        ProtectionDomain::new("mtc", store).unwrap_err(),
        DomainError::OutOfMemory
    );
    assert_eq!(store.allocated_frames(), 0);
    assert_eq!(domain_count(), domains);
}
