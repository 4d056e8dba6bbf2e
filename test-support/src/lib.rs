//! 测试支持 crate
//!
//! 提供架构钩子的 Mock 实现，供各 crate 的主机端测试使用

#![no_std]

pub mod mock;
