//! 保护域与缺页处理
//!
//! - [`ProtectionDomain`]：一个地址空间（根翻译表 + 私有 slab）及其绑定的线程
//! - [`kernel`]：内核全局状态，包括保护域表、模式切换控制对象和核心保护域
//! - [`pager`]：缺页处理流水线
//!
//! # 依赖
//!
//! 使用前必须注册 `sync` 和 `mm` 的架构操作。

#![no_std]

extern crate alloc;

mod error;

pub mod cap;
pub mod domain;
pub mod kernel;
pub mod pager;
pub mod thread;

pub use cap::Capability;
pub use domain::{PageSlab, ProtectionDomain};
pub use error::DomainError;
pub use kernel::DomainId;
pub use thread::{DomainMember, Thread, ThreadId};
