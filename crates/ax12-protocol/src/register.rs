//! 控制表寄存器定义
//!
//! 每个寄存器有固定的地址、宽度（1 或 2 字节）和访问模式。
//! 16 位寄存器在总线上按小端序传输（低字节在前）。
//!
//! 地址与 AX-12 数据手册一致，只收录本驱动实际访问的条目。

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// 寄存器访问模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// 只读（遥测类寄存器）
    ReadOnly,
    /// 只写（本控制表中没有此类寄存器，保留语义）
    WriteOnly,
    /// 读写
    ReadWrite,
}

/// AX-12 控制表寄存器
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum Register {
    /// 设备地址（EEPROM）
    Id = 0x03,
    /// 波特率分频（EEPROM）
    BaudRate = 0x04,
    /// 应答延迟，单位 2µs（EEPROM）
    ReturnDelayTime = 0x05,
    /// 顺时针角度限位（EEPROM）
    CwAngleLimit = 0x06,
    /// 逆时针角度限位（EEPROM），写 0 进入轮模式
    CcwAngleLimit = 0x08,
    /// 最大扭矩（EEPROM）
    MaxTorque = 0x0E,
    /// 状态应答级别：0 无应答，1 仅读指令应答，2 全部应答（EEPROM）
    StatusReturnLevel = 0x10,
    /// 报警 LED 掩码（EEPROM）
    AlarmLed = 0x11,
    /// 报警停转掩码（EEPROM）
    AlarmShutdown = 0x12,
    /// 扭矩使能
    TorqueEnable = 0x18,
    /// 指示 LED
    Led = 0x19,
    /// 目标位置
    GoalPosition = 0x1E,
    /// 目标速度（轮模式下为持续转速）
    MovingSpeed = 0x20,
    /// 运行扭矩上限（RAM）
    TorqueLimit = 0x22,
    /// 当前位置
    PresentPosition = 0x24,
    /// 当前速度
    PresentSpeed = 0x26,
    /// 当前负载
    PresentLoad = 0x28,
    /// 当前电压，单位 0.1V
    PresentVoltage = 0x2A,
    /// 当前温度，单位 ℃
    PresentTemperature = 0x2B,
    /// 是否在自主运动中
    Moving = 0x2E,
}

impl Register {
    /// 寄存器宽度（字节数）
    pub fn width(self) -> u8 {
        match self {
            Register::CwAngleLimit
            | Register::CcwAngleLimit
            | Register::MaxTorque
            | Register::GoalPosition
            | Register::MovingSpeed
            | Register::TorqueLimit
            | Register::PresentPosition
            | Register::PresentSpeed
            | Register::PresentLoad => 2,
            _ => 1,
        }
    }

    /// 访问模式
    pub fn access(self) -> Access {
        match self {
            Register::PresentPosition
            | Register::PresentSpeed
            | Register::PresentLoad
            | Register::PresentVoltage
            | Register::PresentTemperature
            | Register::Moving => Access::ReadOnly,
            _ => Access::ReadWrite,
        }
    }

    /// 控制表地址
    pub fn address(self) -> u8 {
        self.into()
    }

    /// 是否可写
    pub fn is_writable(self) -> bool {
        !matches!(self.access(), Access::ReadOnly)
    }
}
