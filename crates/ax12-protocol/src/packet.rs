//! 指令包构建与状态包解析
//!
//! 指令包与状态包共享同一种帧结构：
//!
//! ```text
//! 0xFF 0xFF | id | len | instr/error | params... | checksum
//! ```
//!
//! `len` 等于参数字节数加 2，校验和覆盖 id 到最后一个参数。
//! 写入值在编码前按寄存器宽度取模截断（8 位取模 256，16 位取模
//! 65536），与设备自身的回绕行为一致，不拒绝越界输入。

use smallvec::SmallVec;

use crate::instruction::Instruction;
use crate::register::Register;
use crate::status::ErrorFlags;
use crate::{DeviceId, HEADER, ProtocolError, STATUS_OVERHEAD, checksum};

/// 已编码的指令请求
///
/// 通过构造函数创建，保证参数与寄存器宽度、访问模式一致。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstructionPacket {
    /// 目标设备地址（可以是广播）
    pub id: DeviceId,
    /// 指令码
    pub instruction: Instruction,
    /// 参数字节（本协议最多 3 个）
    pub params: SmallVec<[u8; 3]>,
}

impl InstructionPacket {
    /// Ping 指令（无参数，应答仅携带错误标志）
    pub fn ping(id: DeviceId) -> Self {
        Self {
            id,
            instruction: Instruction::Ping,
            params: SmallVec::new(),
        }
    }

    /// 恢复出厂设置指令（无参数）
    pub fn factory_reset(id: DeviceId) -> Self {
        Self {
            id,
            instruction: Instruction::FactoryReset,
            params: SmallVec::new(),
        }
    }

    /// 读取一个寄存器，按寄存器宽度请求 1 或 2 个字节
    ///
    /// 广播地址不会产生应答，读取广播是协议错误。
    pub fn read(id: DeviceId, register: Register) -> Result<Self, ProtocolError> {
        if id.is_broadcast() {
            return Err(ProtocolError::BroadcastRead);
        }
        let mut params = SmallVec::new();
        params.push(register.address());
        params.push(register.width());
        Ok(Self {
            id,
            instruction: Instruction::Read,
            params,
        })
    }

    /// 写入 8 位寄存器，值取模 256 截断
    pub fn write8(id: DeviceId, register: Register, value: u16) -> Result<Self, ProtocolError> {
        Self::check_writable(register, 1)?;
        let mut params = SmallVec::new();
        params.push(register.address());
        params.push(value as u8);
        Ok(Self {
            id,
            instruction: Instruction::Write,
            params,
        })
    }

    /// 写入 16 位寄存器，值取模 65536 截断后按小端序拆分
    pub fn write16(id: DeviceId, register: Register, value: u32) -> Result<Self, ProtocolError> {
        Self::check_writable(register, 2)?;
        let truncated = value as u16;
        let mut params = SmallVec::new();
        params.push(register.address());
        params.push((truncated & 0xFF) as u8);
        params.push((truncated >> 8) as u8);
        Ok(Self {
            id,
            instruction: Instruction::Write,
            params,
        })
    }

    fn check_writable(register: Register, width: u8) -> Result<(), ProtocolError> {
        if !register.is_writable() {
            return Err(ProtocolError::NotWritable(register));
        }
        if register.width() != width {
            return Err(ProtocolError::WidthMismatch {
                register,
                expected: register.width() * 8,
            });
        }
        Ok(())
    }

    /// 是否期待状态应答
    ///
    /// 广播写没有应答方，立即视为成功。
    pub fn expects_response(&self) -> bool {
        !self.id.is_broadcast()
    }

    /// 期望的状态应答总长度（字节数，含包头与校验和）
    pub fn expected_response_len(&self) -> usize {
        let data_len = match self.instruction {
            // 读应答携带请求的字节数
            Instruction::Read => self.params[1] as usize,
            _ => 0,
        };
        STATUS_OVERHEAD + data_len
    }

    /// 编码为线缆字节序列
    pub fn to_bytes(&self) -> Vec<u8> {
        let len = self.params.len() as u8 + 2;
        let mut bytes = Vec::with_capacity(self.params.len() + STATUS_OVERHEAD);
        bytes.extend_from_slice(&HEADER);
        bytes.push(self.id.raw());
        bytes.push(len);
        bytes.push(self.instruction.into());
        bytes.extend_from_slice(&self.params);
        bytes.push(checksum(&bytes[2..]));
        bytes
    }
}

/// 解析后的状态应答
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusPacket {
    /// 应答方地址
    pub id: u8,
    /// 设备报告的错误标志
    pub error: ErrorFlags,
    /// 数据字节（读应答为 1 或 2 个）
    pub params: SmallVec<[u8; 2]>,
}

impl StatusPacket {
    /// 构造状态包（模拟器与测试使用）
    pub fn new(id: u8, error: ErrorFlags, params: &[u8]) -> Self {
        Self {
            id,
            error,
            params: SmallVec::from_slice(params),
        }
    }

    /// 从线缆字节解析状态包
    ///
    /// 校验包头、长度与校验和。不校验应答方地址，由通信引擎
    /// 与请求地址比对。
    pub fn parse(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() < STATUS_OVERHEAD {
            return Err(ProtocolError::Truncated {
                expected: STATUS_OVERHEAD,
                actual: bytes.len(),
            });
        }
        if bytes[0] != HEADER[0] || bytes[1] != HEADER[1] {
            return Err(ProtocolError::BadHeader(bytes[0], bytes[1]));
        }
        let id = bytes[2];
        let len = bytes[3];
        if len < 2 {
            return Err(ProtocolError::LengthOutOfRange(len));
        }
        let total = 4 + len as usize;
        if bytes.len() < total {
            return Err(ProtocolError::Truncated {
                expected: total,
                actual: bytes.len(),
            });
        }
        let expected = checksum(&bytes[2..total - 1]);
        let actual = bytes[total - 1];
        if expected != actual {
            return Err(ProtocolError::ChecksumMismatch { expected, actual });
        }
        Ok(Self {
            id,
            error: ErrorFlags::from_bits(bytes[4]),
            params: SmallVec::from_slice(&bytes[5..total - 1]),
        })
    }

    /// 校验应答方地址与请求地址一致
    pub fn ensure_id(&self, expected: DeviceId) -> Result<(), ProtocolError> {
        if self.id != expected.raw() {
            return Err(ProtocolError::IdMismatch {
                expected: expected.raw(),
                actual: self.id,
            });
        }
        Ok(())
    }

    /// 按小端序重组数据字节
    ///
    /// 无数据时返回 `None`，1 字节应答零扩展为 u16。
    pub fn value(&self) -> Option<u16> {
        match self.params.as_slice() {
            [] => None,
            [lo] => Some(*lo as u16),
            [lo, hi, ..] => Some(*lo as u16 | (*hi as u16) << 8),
        }
    }

    /// 编码为线缆字节序列（模拟器使用）
    pub fn to_bytes(&self) -> Vec<u8> {
        let len = self.params.len() as u8 + 2;
        let mut bytes = Vec::with_capacity(self.params.len() + STATUS_OVERHEAD);
        bytes.extend_from_slice(&HEADER);
        bytes.push(self.id);
        bytes.push(len);
        bytes.push(self.error.bits());
        bytes.extend_from_slice(&self.params);
        bytes.push(checksum(&bytes[2..]));
        bytes
    }
}
