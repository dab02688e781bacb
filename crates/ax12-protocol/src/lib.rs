//! # AX12 Protocol
//!
//! AX-12 总线协议定义（无硬件依赖）
//!
//! ## 模块
//!
//! - `instruction`: 指令码定义
//! - `register`: 控制表寄存器定义（地址、宽度、访问模式）
//! - `status`: 设备错误标志位
//! - `packet`: 指令包构建与状态包解析
//! - `units`: 原始寄存器值与工程单位的换算
//!
//! ## 帧格式
//!
//! 指令包：`0xFF 0xFF id len instr params... checksum`
//! 状态包：`0xFF 0xFF id len error params... checksum`
//!
//! 其中 `len = params.len() + 2`，校验和为 id 到最后一个参数
//! 的累加和按位取反（低 8 位）。16 位寄存器值按小端序拆分。

pub mod instruction;
pub mod packet;
pub mod register;
pub mod status;
pub mod units;

// 重新导出常用类型
pub use instruction::Instruction;
pub use packet::{InstructionPacket, StatusPacket};
pub use register::{Access, Register};
pub use status::ErrorFlags;

use thiserror::Error;

/// 包头（两个 0xFF）
pub const HEADER: [u8; 2] = [0xFF, 0xFF];

/// 广播地址：所有设备接收，无设备应答
pub const BROADCAST_RAW: u8 = 0xFE;

/// 状态包的固定开销：包头(2) + id + len + error + checksum
pub const STATUS_OVERHEAD: usize = 6;

/// 总线上一个舵机的逻辑地址
///
/// 单播范围 0..=253，0xFE 为广播地址（只写，无应答）。
/// 同一地址在不同总线上可以重复，本类型不保证全局唯一。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeviceId(u8);

impl DeviceId {
    /// 广播地址（0xFE）
    pub const BROADCAST: DeviceId = DeviceId(BROADCAST_RAW);

    /// 最大单播地址
    pub const MAX_UNICAST: u8 = 0xFD;

    /// 创建单播地址，超出 0..=253 返回错误
    pub fn new(raw: u8) -> Result<Self, ProtocolError> {
        if raw <= Self::MAX_UNICAST {
            Ok(Self(raw))
        } else {
            Err(ProtocolError::InvalidDeviceId(raw))
        }
    }

    /// 原始字节值
    pub fn raw(self) -> u8 {
        self.0
    }

    /// 是否为广播地址
    pub fn is_broadcast(self) -> bool {
        self.0 == BROADCAST_RAW
    }
}

impl TryFrom<u8> for DeviceId {
    type Error = ProtocolError;

    fn try_from(raw: u8) -> Result<Self, Self::Error> {
        DeviceId::new(raw)
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_broadcast() {
            write!(f, "broadcast")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// 协议层错误类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("invalid device id {0} (unicast range is 0..=253)")]
    InvalidDeviceId(u8),

    #[error("bad packet header: [{0:#04X}, {1:#04X}]")]
    BadHeader(u8, u8),

    #[error("truncated packet: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("length field out of range: {0}")]
    LengthOutOfRange(u8),

    #[error("checksum mismatch: expected {expected:#04X}, got {actual:#04X}")]
    ChecksumMismatch { expected: u8, actual: u8 },

    #[error("status id {actual} does not match request id {expected}")]
    IdMismatch { expected: u8, actual: u8 },

    #[error("unknown instruction: {0:#04X}")]
    UnknownInstruction(u8),

    #[error("unknown register address: {0:#04X}")]
    UnknownRegister(u8),

    #[error("register {register:?} is {expected} bits wide")]
    WidthMismatch { register: Register, expected: u8 },

    #[error("register {0:?} is read-only")]
    NotWritable(Register),

    #[error("read addressed to the broadcast id (broadcast is write-only)")]
    BroadcastRead,
}

/// 计算校验和：字节累加和按位取反（低 8 位）
///
/// 传入的切片应当覆盖 id、len、instr/error 与全部参数，
/// 不包含包头与校验和本身。
pub fn checksum(bytes: &[u8]) -> u8 {
    !bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}
