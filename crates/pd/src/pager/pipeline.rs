//! 缺页处理流水线

use super::fault::{FAULT_REGISTERS, FaultRecord, MappingRequest, RegisterId};
use crate::domain::ProtectionDomain;
use crate::thread::ThreadId;
use alloc::sync::Arc;
use core::fmt;
use mm::{BackingStore, ExtraSpace, RootTable, TranslationError};

/// 缺页通知
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaultSignal {
    /// 通知附带的上下文，用于找到故障线程
    pub context: usize,
}

/// 缺页通知通道
pub trait FaultChannel {
    /// 阻塞直到下一次缺页
    fn wait_for_fault(&mut self) -> FaultSignal;
}

/// 故障线程及其所属保护域
#[derive(Debug, Clone)]
pub struct Faulter {
    /// 所属保护域
    pub domain: Arc<ProtectionDomain>,
    /// 故障线程
    pub thread: ThreadId,
}

/// 读取线程寄存器失败
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterAccessError;

/// 内核提供的线程控制接口
pub trait ThreadControl {
    /// 找到通知对应的故障线程
    fn identify(&self, signal: &FaultSignal) -> Option<Faulter>;

    /// 按 `ids` 的顺序读取寄存器到 `values`
    fn read_registers(
        &self,
        thread: ThreadId,
        ids: &[RegisterId],
        values: &mut [usize],
    ) -> Result<(), RegisterAccessError>;

    /// 恢复线程
    fn resume(&self, thread: ThreadId);
}

/// 策略对一次缺页的决定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// 已经在别处解决，不需要修改翻译表
    Resolved,
    /// 安装这个翻译
    Map(MappingRequest),
    /// 无法解决
    Reject,
}

/// 缺页处理策略
pub trait FaultPolicy {
    /// 决定如何处理 `fault`
    fn resolve(&mut self, domain: &ProtectionDomain, fault: &FaultRecord) -> Resolution;
}

impl<F> FaultPolicy for F
where
    F: FnMut(&ProtectionDomain, &FaultRecord) -> Resolution,
{
    fn resolve(&mut self, domain: &ProtectionDomain, fault: &FaultRecord) -> Resolution {
        self(domain, fault)
    }
}

/// 流水线状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultState {
    /// 等待缺页
    AwaitingFault,
    /// 已识别故障线程，正在读取寄存器
    FaultReceived,
    /// 正在解决
    Resolving,
    /// 已解决，线程已恢复
    Resolved,
    /// 失败，线程保持阻塞
    Failed,
}

/// 缺页解决失败的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultError {
    /// 策略拒绝
    Rejected,
    /// 翻译表拒绝
    Translation(TranslationError),
    /// 重试所需的额外内存无法获得
    ExtraMemoryUnavailable,
}

impl fmt::Display for FaultError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FaultError::Rejected => f.write_str("rejected by policy"),
            FaultError::Translation(err) => write!(f, "translation failed: {}", err),
            FaultError::ExtraMemoryUnavailable => f.write_str("no extra memory for retry"),
        }
    }
}

/// 处理一次通知的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultOutcome {
    /// 找不到故障线程，或根表与所属保护域不符
    Unidentified,
    /// 读取寄存器失败
    RegistersUnreadable,
    /// 已解决
    Resolved,
    /// 失败
    Failed(FaultError),
}

/// 缺页处理流水线
///
/// - `C`：通知通道
/// - `K`：线程控制
/// - `P`：策略
///
/// 翻译表报告内存不足时，从 `memory` 取一张叶表大小的额外空间重试一次。
pub struct FaultPipeline<C, K, P> {
    channel: C,
    threads: K,
    policy: P,
    memory: &'static dyn BackingStore,
    state: FaultState,
    resolved: usize,
    failed: usize,
}

impl<C, K, P> FaultPipeline<C, K, P>
where
    C: FaultChannel,
    K: ThreadControl,
    P: FaultPolicy,
{
    /// 创建流水线
    pub fn new(channel: C, threads: K, policy: P, memory: &'static dyn BackingStore) -> Self {
        FaultPipeline {
            channel,
            threads,
            policy,
            memory,
            state: FaultState::AwaitingFault,
            resolved: 0,
            failed: 0,
        }
    }

    /// 当前状态
    pub fn state(&self) -> FaultState {
        self.state
    }

    /// 已解决的缺页数
    pub fn resolved_count(&self) -> usize {
        self.resolved
    }

    /// 失败的缺页数
    pub fn failed_count(&self) -> usize {
        self.failed
    }

    /// 线程控制接口
    pub fn threads(&self) -> &K {
        &self.threads
    }

    /// 策略
    pub fn policy(&self) -> &P {
        &self.policy
    }

    fn enter(&mut self, state: FaultState) {
        log::trace!("pager: {:?} -> {:?}", self.state, state);
        self.state = state;
    }

    /// 一直处理缺页
    pub fn run(&mut self) -> ! {
        loop {
            self.handle_next();
        }
    }

    /// 等待并处理下一次缺页
    pub fn handle_next(&mut self) -> FaultOutcome {
        self.enter(FaultState::AwaitingFault);
        let signal = self.channel.wait_for_fault();

        let Some(faulter) = self.threads.identify(&signal) else {
            log::warn!("pager: unknown fault signal {:#x}", signal.context);
            return FaultOutcome::Unidentified;
        };
        self.enter(FaultState::FaultReceived);

        let mut values = [0usize; FAULT_REGISTERS.len()];
        if self
            .threads
            .read_registers(faulter.thread, &FAULT_REGISTERS, &mut values)
            .is_err()
        {
            log::warn!("pager: failed to read fault registers of {:?}", faulter.thread);
            self.enter(FaultState::AwaitingFault);
            return FaultOutcome::RegistersUnreadable;
        }
        let record = FaultRecord::from_registers(&values);

        if record.table != faulter.domain.table_phys_addr() {
            log::warn!(
                "pager: {:?} faulted in {:?}, not in its domain '{}'",
                faulter.thread,
                record.table,
                faulter.domain.label()
            );
            self.enter(FaultState::AwaitingFault);
            return FaultOutcome::Unidentified;
        }

        self.enter(FaultState::Resolving);
        match self.resolve(&faulter.domain, &record) {
            Ok(()) => {
                self.enter(FaultState::Resolved);
                self.resolved += 1;
                self.threads.resume(faulter.thread);
                FaultOutcome::Resolved
            }
            Err(err) => {
                self.enter(FaultState::Failed);
                self.failed += 1;
                log::warn!(
                    "pager: {} fault of {:?} at {:#x} (ip {:#x}) in '{}' failed: {}",
                    if record.writes { "write" } else { "read" },
                    faulter.thread,
                    record.addr,
                    record.ip,
                    faulter.domain.label(),
                    err
                );
                FaultOutcome::Failed(err)
            }
        }
    }

    fn resolve(&mut self, domain: &ProtectionDomain, record: &FaultRecord) -> Result<(), FaultError> {
        let request = match self.policy.resolve(domain, record) {
            Resolution::Resolved => return Ok(()),
            Resolution::Reject => return Err(FaultError::Rejected),
            Resolution::Map(request) => request,
        };

        match domain.apply_mapping(&request, &mut None) {
            Ok(()) => Ok(()),
            Err(err) if err.is_retryable() => self.retry(domain, &request),
            Err(err) => Err(FaultError::Translation(err)),
        }
    }

    /// 用一张叶表大小的额外空间重试一次
    fn retry(&self, domain: &ProtectionDomain, request: &MappingRequest) -> Result<(), FaultError> {
        let Some(space) = ExtraSpace::alloc(self.memory, RootTable::MAX_COSTS_PER_TRANSLATION_LOG2)
        else {
            log::error!("pager: no memory left to retry mapping at {:#x}", request.virt);
            return Err(FaultError::ExtraMemoryUnavailable);
        };

        let mut extra = Some(space);
        let result = domain.apply_mapping(request, &mut extra);
        if let Some(unused) = extra.take() {
            unused.release();
        }
        result.map_err(|err| {
            log::error!("pager: retry at {:#x} failed: {}", request.virt, err);
            FaultError::Translation(err)
        })
    }
}
