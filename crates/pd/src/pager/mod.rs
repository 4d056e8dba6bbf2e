//! 缺页处理
//!
//! 硬件缺页挂起线程后，[`FaultPipeline`] 被唤醒：读出故障寄存器，
//! 向 [`FaultPolicy`] 询问如何解决，把得到的翻译装进所属保护域的根表，
//! 成功后恢复线程。
//!
//! 处理单个缺页的状态：
//!
//! ```text
//! AwaitingFault → FaultReceived → Resolving → Resolved / Failed
//!       ↑                                           │
//!       └───────────────────────────────────────────┘
//! ```

mod fault;
mod pipeline;

pub use fault::{FAULT_REGISTERS, FaultRecord, MappingRequest, RegisterId};
pub use pipeline::{
    FaultChannel, FaultError, FaultOutcome, FaultPipeline, FaultPolicy, FaultSignal, FaultState,
    Faulter, RegisterAccessError, Resolution, ThreadControl,
};
