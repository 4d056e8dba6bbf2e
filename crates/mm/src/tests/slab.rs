use super::*;
use crate::LeafSlab;
use crate::core_mem_alloc::BackingStore;
use crate::slab::PhysicalSlabAllocator;
use crate::translation::TranslationError;
use crate::{AlignOps, Vaddr};
use std::vec::Vec;

/// 一个 slab block 占用的页数
const BLOCK_PAGES: usize = LeafSlab::BLOCK_SIZE >> PAGE_SIZE_LOG2;

#[test]
fn test_initial_block() {
    let store = test_store(BLOCK_PAGES);
    let slab = LeafSlab::new(store).unwrap();
    assert_eq!(slab.block_count(), 1);
    assert_eq!(slab.free_entries(), 32);
    assert_eq!(slab.live_entries(), 0);
    assert_eq!(store.free_frames(), 0);
}

#[test]
fn test_new_fails_without_memory() {
    let store = test_store(BLOCK_PAGES - 1);
    assert!(matches!(LeafSlab::new(store), Err(TranslationError::OutOfMemory)));
}

#[test]
fn test_allocations_are_aligned_and_distinct() {
    let store = test_store(BLOCK_PAGES);
    let slab = LeafSlab::new(store).unwrap();

    let mut addrs: Vec<Vaddr> = (0..32).map(|_| slab.allocate().unwrap()).collect();
    for addr in &addrs {
        assert!(addr.is_aligned(10));
        assert!(slab.physical_address(*addr).unwrap().is_aligned(10));
    }
    addrs.sort();
    addrs.dedup();
    assert_eq!(addrs.len(), 32);
    assert_eq!(slab.free_entries(), 0);

    // block 已满且后备内存耗尽
    assert_eq!(slab.allocate(), Err(TranslationError::OutOfMemory));
}

#[test]
fn test_grows_and_shrinks() {
    let store = test_store(BLOCK_PAGES * 2);
    let slab = LeafSlab::new(store).unwrap();
    let first: Vec<Vaddr> = (0..32).map(|_| slab.allocate().unwrap()).collect();
    assert_eq!(slab.block_count(), 1);

    let extra = slab.allocate().unwrap();
    assert_eq!(slab.block_count(), 2);
    assert_eq!(slab.free_entries(), 31);
    assert_eq!(store.free_frames(), 0);

    // 新 block 的最后一个 slab 释放后立即归还
    slab.release(extra);
    assert_eq!(slab.block_count(), 1);
    assert_eq!(store.free_frames(), BLOCK_PAGES);

    // 首个 block 永不归还
    for addr in first {
        slab.release(addr);
    }
    assert_eq!(slab.block_count(), 1);
    assert_eq!(slab.live_entries(), 0);
}

#[test]
fn test_first_fit_keeps_block_order() {
    let store = test_store(BLOCK_PAGES * 4);
    let slab = LeafSlab::new(store).unwrap();
    let blocks: Vec<Vec<Vaddr>> = (0..4)
        .map(|_| (0..32).map(|_| slab.allocate().unwrap()).collect())
        .collect();
    assert_eq!(slab.block_count(), 4);

    // 归还第二个 block，剩下的 block 仍按加入顺序排列
    for addr in &blocks[1] {
        slab.release(*addr);
    }
    assert_eq!(slab.block_count(), 3);

    slab.release(blocks[3][0]);
    slab.release(blocks[2][0]);
    assert_eq!(slab.allocate().unwrap(), blocks[2][0]);
    assert_eq!(slab.allocate().unwrap(), blocks[3][0]);
}

#[test]
fn test_released_slab_is_reused() {
    let store = test_store(BLOCK_PAGES);
    let slab = LeafSlab::new(store).unwrap();
    let a = slab.allocate().unwrap();
    let _b = slab.allocate().unwrap();
    slab.release(a);
    assert_eq!(slab.allocate().unwrap(), a);
}

#[test]
fn test_unknown_release_is_ignored() {
    let store = test_store(BLOCK_PAGES);
    let slab = LeafSlab::new(store).unwrap();
    let a = slab.allocate().unwrap();

    slab.release(Vaddr(0x1000));
    slab.release(a + 8);
    assert_eq!(slab.live_entries(), 1);

    slab.release(a);
    slab.release(a);
    assert_eq!(slab.live_entries(), 0);
    assert_eq!(slab.free_entries(), 32);
}

#[test]
fn test_address_translation() {
    let store = test_store(BLOCK_PAGES);
    let slab = LeafSlab::new(store).unwrap();
    let a = slab.allocate().unwrap();
    let pa = slab.physical_address(a).unwrap();
    assert_eq!(pa, store.phys_addr(a).unwrap());
    assert_eq!(slab.virtual_address(pa), Some(a));
}

#[test]
fn test_accounting() {
    let store = test_store(BLOCK_PAGES * 2);
    let slab = LeafSlab::new(store).unwrap();
    let one_block = slab.bytes_consumed();
    assert!(one_block >= LeafSlab::BLOCK_SIZE);
    assert_eq!(slab.bytes_overhead(1024), one_block / 32);

    let _held: Vec<Vaddr> = (0..33).map(|_| slab.allocate().unwrap()).collect();
    assert_eq!(slab.bytes_consumed(), one_block * 2);
}

#[test]
fn test_drop_returns_all_blocks() {
    let store = test_store(BLOCK_PAGES * 2);
    {
        let slab = LeafSlab::new(store).unwrap();
        for _ in 0..33 {
            slab.allocate().unwrap();
        }
        assert_eq!(store.free_frames(), 0);
    }
    assert_eq!(store.free_frames(), BLOCK_PAGES * 2);
}
