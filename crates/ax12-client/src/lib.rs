//! # AX12 Client
//!
//! 面向执行器的高层接口，包括：
//! - 工程单位遥测读取（度、百分比、伏特、摄氏度）
//! - 模式/速度/扭矩/LED 设置
//! - 异步"移动到位置"与完成回调、取消
//! - 每设备状态机（Idle / Moving / Fault）
//!
//! 所有状态保存在显式的 [`Ax12Client`] 对象中（按设备地址索引），
//! 没有进程级单例。完成检测由后台轮询线程驱动，回调在轮询线程上
//! 同步派发。
//!
//! # Example
//!
//! ```no_run
//! use ax12_client::{Ax12Client, BusBuilder, DeviceId};
//!
//! let bus = BusBuilder::new().path("/dev/ttyUSB0").build().unwrap();
//! let client = Ax12Client::new(bus);
//!
//! let id = DeviceId::new(1).unwrap();
//! client.move_to(id, 90.0, Some(Box::new(|| println!("arrived")))).unwrap();
//! ```

mod client;
mod poller;
mod state;

pub use client::{Ax12Client, PollConfig};
pub use state::{DriveMode, DriveState, MoveCallback};

// 下层常用类型
pub use ax12_driver::{
    Backoff, Bus, BusBuilder, BusConfig, CommError, CommResult, DeviceId, ErrorFlags, Register,
};

use thiserror::Error;

/// 执行器层错误类型
#[derive(Error, Debug)]
pub enum ClientError {
    /// 总线通信失败（重试耗尽后）
    #[error("communication error: {0}")]
    Comm(#[from] CommError),

    /// 应答没有携带期望的数据
    #[error("response carried no value")]
    MissingValue,
}
