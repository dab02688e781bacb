//! # AX12 Driver
//!
//! 总线通信引擎：串行化请求/应答交换、超时重试、广播处理。
//!
//! 总线是半双工共享介质，任意时刻至多允许一次交换在线上。
//! [`Bus`] 把所有请求送进一个有界 FIFO 队列，由专属 IO 线程
//! 逐个执行，多线程调用方按提交顺序得到服务，字节流永远不会
//! 交错。
//!
//! 设备报告的错误标志（过热、过载等）不是传输失败：交换本身
//! 成功时它们随 [`CommResult`] 一起返回，由调用方决定如何处理，
//! 引擎不会为此重试。

mod builder;
mod bus;
mod config;
mod error;

pub use builder::BusBuilder;
pub use bus::Bus;
pub use config::{Backoff, BusConfig};
pub use error::{CommError, CommResult};

// 上层常用的协议类型
pub use ax12_protocol::{DeviceId, ErrorFlags, InstructionPacket, Register};
pub use ax12_serial::{SerialConfig, SerialTransport};
