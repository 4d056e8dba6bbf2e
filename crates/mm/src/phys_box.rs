//! 放置在物理内存中的对象

use crate::address::{Paddr, Vaddr};
use core::fmt;
use core::ops::{Deref, DerefMut};
use core::ptr::NonNull;

/// 独占一块放在已分配物理内存里的 `T`
///
/// 与 `Box` 不同，它不知道内存来自哪个分配器，因此没有 `Drop`：
/// 持有者必须把 [`PhysBox::virt`] 交还给当初分配它的分配器。
/// 同时记录物理地址，供写入硬件描述符使用。
#[must_use = "PhysBox 不会自动释放内存"]
pub struct PhysBox<T> {
    virt: NonNull<T>,
    phys: Paddr,
}

impl<T> PhysBox<T> {
    /// 在 `virt` 处构造一个全零的 `T`
    ///
    /// # Safety
    /// - `virt` 非空，按 `align_of::<T>()` 对齐，至少有 `size_of::<T>()` 字节可写
    /// - 这块内存由调用者独占，直到 `PhysBox` 被交还
    /// - 全零字节是 `T` 的合法值
    /// - `phys` 是 `virt` 对应的物理地址
    pub unsafe fn zeroed(virt: Vaddr, phys: Paddr) -> Self {
        let ptr = virt.as_mut_ptr::<T>();
        debug_assert!(ptr.is_aligned());
        // SAFETY: 由调用者保证
        unsafe {
            core::ptr::write_bytes(ptr, 0, 1);
            PhysBox {
                virt: NonNull::new_unchecked(ptr),
                phys,
            }
        }
    }

    /// 对象的虚拟地址
    pub fn virt(&self) -> Vaddr {
        Vaddr(self.virt.as_ptr() as usize)
    }

    /// 对象的物理地址
    pub fn phys(&self) -> Paddr {
        self.phys
    }
}

impl<T> Deref for PhysBox<T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: 构造时保证了对齐、有效且独占
        unsafe { self.virt.as_ref() }
    }
}

impl<T> DerefMut for PhysBox<T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: 同上，且 &mut self 保证了唯一访问
        unsafe { self.virt.as_mut() }
    }
}

impl<T> fmt::Debug for PhysBox<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PhysBox")
            .field("virt", &self.virt())
            .field("phys", &self.phys)
            .finish()
    }
}

// SAFETY: PhysBox 对其内存的访问是独占的，语义等同于 Box<T>
unsafe impl<T: Send> Send for PhysBox<T> {}
unsafe impl<T: Sync> Sync for PhysBox<T> {}
