//! 故障记录

use mm::translation::SMALL_PAGE_LOG2;
use mm::{Paddr, PageFlags};

/// 故障相关的线程寄存器
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterId {
    /// 发生故障时的根表
    FaultTable,
    /// 指令指针
    Ip,
    /// 故障地址
    FaultAddr,
    /// 是否为写访问
    FaultWrites,
    /// 陷入类型
    FaultSignal,
}

/// 读取顺序固定
pub const FAULT_REGISTERS: [RegisterId; 5] = [
    RegisterId::FaultTable,
    RegisterId::Ip,
    RegisterId::FaultAddr,
    RegisterId::FaultWrites,
    RegisterId::FaultSignal,
];

/// 一次缺页的上下文
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaultRecord {
    /// 发生故障的根表物理地址
    pub table: Paddr,
    /// 指令指针
    pub ip: usize,
    /// 故障地址
    pub addr: usize,
    /// 是否为写访问
    pub writes: bool,
    /// 陷入类型
    pub signal: usize,
}

impl FaultRecord {
    /// 按 [`FAULT_REGISTERS`] 的顺序解读寄存器值
    pub fn from_registers(values: &[usize; FAULT_REGISTERS.len()]) -> Self {
        let [table, ip, addr, writes, signal] = *values;
        FaultRecord {
            table: Paddr(table),
            ip,
            addr,
            writes: writes != 0,
            signal,
        }
    }
}

/// 要装进根表的翻译
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MappingRequest {
    /// 虚拟地址
    pub virt: usize,
    /// 物理地址
    pub phys: Paddr,
    /// 页大小（log2）
    pub size_log2: usize,
    /// 属性
    pub flags: PageFlags,
}

impl MappingRequest {
    /// 单个小页
    pub fn page(virt: usize, phys: Paddr, flags: PageFlags) -> Self {
        MappingRequest {
            virt,
            phys,
            size_log2: SMALL_PAGE_LOG2,
            flags,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_from_registers() {
        let record = FaultRecord::from_registers(&[0x8000_4000, 0x1_0040, 0x1234, 1, 3]);
        assert_eq!(record.table, Paddr(0x8000_4000));
        assert_eq!(record.ip, 0x1_0040);
        assert_eq!(record.addr, 0x1234);
        assert!(record.writes);
        assert_eq!(record.signal, 3);

        let read = FaultRecord::from_registers(&[0, 0, 0, 0, 0]);
        assert!(!read.writes);
    }
}
