//! Mock 实现模块
//!
//! 注意：这里不直接依赖 `sync` / `mm` crate（避免循环依赖）。
//! 各 crate 在测试中用本地包装类型为这些 Mock 实现自己的 trait。

pub mod arch;
pub mod mm;
