//! # AX12 Serial Transport Layer
//!
//! 串口硬件抽象层，提供统一的半双工字节流接口。
//!
//! 总线是半双工的：同一时刻只能有一个方向在传输。本层不负责
//! 仲裁，上层通信引擎通过单一 IO 线程保证任意时刻至多一次
//! 请求/应答交换在线上。

use std::time::Duration;

use thiserror::Error;

pub mod port;

pub use port::UartTransport;

#[cfg(any(feature = "mock", test))]
pub mod mock;

#[cfg(any(feature = "mock", test))]
pub use mock::{MockTransport, ServoBusSim};

/// 传输层统一错误类型
#[derive(Error, Debug)]
pub enum SerialError {
    #[error("serial port unavailable: {0}")]
    PortUnavailable(String),
    #[error("permission denied opening {0}")]
    PermissionDenied(String),
    #[error("read timeout")]
    Timeout,
    #[error("port closed")]
    Closed,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// 串口参数
///
/// 只描述物理口本身；应答超时与重试策略属于通信引擎配置。
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SerialConfig {
    /// 设备路径（如 "/dev/serial0"、"/dev/ttyUSB0"）
    pub path: String,
    /// 波特率（AX-12 出厂默认 1M，常见降速到 115200）
    pub baud_rate: u32,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            path: "/dev/serial0".to_string(),
            baud_rate: 115_200,
        }
    }
}

/// 半双工字节流接口
///
/// 实现方负责把超时映射为 [`SerialError::Timeout`]，其余 IO
/// 故障原样上抛。所有方法都是阻塞的。
pub trait SerialTransport: Send {
    /// 写出完整字节序列
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), SerialError>;

    /// 在限期内读满整个缓冲区
    ///
    /// 限期内未能凑满返回 [`SerialError::Timeout`]，缓冲区内容
    /// 此时未定义。
    fn read_exact(&mut self, buf: &mut [u8], timeout: Duration) -> Result<(), SerialError>;

    /// 丢弃接收缓冲区中残留的字节
    fn discard_input(&mut self) -> Result<(), SerialError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SerialConfig::default();
        assert_eq!(config.path, "/dev/serial0");
        assert_eq!(config.baud_rate, 115_200);
    }

    #[test]
    fn test_serial_error_display() {
        let err = SerialError::PortUnavailable("/dev/ttyUSB0".to_string());
        assert!(err.to_string().contains("/dev/ttyUSB0"));
        assert_eq!(SerialError::Timeout.to_string(), "read timeout");
    }
}
