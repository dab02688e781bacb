//! 指令码定义
//!
//! AX-12 协议的指令字节。通信引擎只发出 Ping/Read/Write/FactoryReset，
//! 其余指令码保留用于解码与上层扩展。

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// 指令码
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum Instruction {
    /// 探测设备是否在线，应答仅携带错误标志
    Ping = 0x01,
    /// 读取控制表，参数为起始地址与字节数
    Read = 0x02,
    /// 写入控制表，参数为起始地址与数据字节
    Write = 0x03,
    /// 暂存写入，需要 Action 触发
    RegWrite = 0x04,
    /// 触发所有暂存写入
    Action = 0x05,
    /// 恢复出厂设置
    FactoryReset = 0x06,
    /// 同步写多个设备（广播专用）
    SyncWrite = 0x83,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instruction_codes() {
        assert_eq!(u8::from(Instruction::Ping), 0x01);
        assert_eq!(u8::from(Instruction::Read), 0x02);
        assert_eq!(u8::from(Instruction::Write), 0x03);
        assert_eq!(u8::from(Instruction::FactoryReset), 0x06);
        assert_eq!(u8::from(Instruction::SyncWrite), 0x83);
    }

    #[test]
    fn test_instruction_try_from() {
        assert_eq!(Instruction::try_from(0x01), Ok(Instruction::Ping));
        assert_eq!(Instruction::try_from(0x06), Ok(Instruction::FactoryReset));
        assert!(Instruction::try_from(0x07).is_err());
    }
}
