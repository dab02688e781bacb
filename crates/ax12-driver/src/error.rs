//! 通信引擎错误类型与交换结果

use ax12_protocol::{ErrorFlags, ProtocolError};
use ax12_serial::SerialError;
use thiserror::Error;

/// 一次成功交换的结果
///
/// 交换成功不代表设备无恙：`error_flags` 非零表示设备报告了
/// 错误状态。传输层失败（超时、校验、IO 故障）不会出现在这里，
/// 它们以 [`CommError`] 的形式返回。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommResult {
    /// 设备报告的错误标志，零表示无错误
    pub error_flags: ErrorFlags,
    /// 读应答携带的数据（小端序重组），写/Ping 应答为 None
    pub value: Option<u16>,
}

impl CommResult {
    /// 广播写没有应答方，合成一个无错误、无数据的结果
    pub fn broadcast_ack() -> Self {
        Self {
            error_flags: ErrorFlags::NONE,
            value: None,
        }
    }

    /// 设备未报告任何错误
    pub fn device_ok(&self) -> bool {
        self.error_flags.is_ok()
    }
}

/// 通信引擎错误类型
///
/// 超时与帧破坏按策略重试后才会浮出；串口 IO 故障对当前操作
/// 是致命的，不重试。
#[derive(Error, Debug)]
pub enum CommError {
    /// 串口传输故障
    #[error("serial transport error: {0}")]
    Serial(#[from] SerialError),

    /// 重试耗尽后仍未收到应答
    #[error("no response after {attempts} attempts")]
    Timeout { attempts: u32 },

    /// 重试耗尽后应答仍然损坏
    #[error("corrupt response after {attempts} attempts: {source}")]
    Corrupt {
        attempts: u32,
        source: ProtocolError,
    },

    /// 协议层拒绝了请求（构包失败，如写只读寄存器）
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// IO 线程已退出
    #[error("bus IO thread is gone")]
    Disconnected,
}

impl CommError {
    /// 是否属于超时类失败
    pub fn is_timeout(&self) -> bool {
        matches!(self, CommError::Timeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broadcast_ack_is_clean() {
        let ack = CommResult::broadcast_ack();
        assert!(ack.device_ok());
        assert_eq!(ack.value, None);
    }

    #[test]
    fn test_comm_error_display() {
        let err = CommError::Timeout { attempts: 3 };
        assert_eq!(err.to_string(), "no response after 3 attempts");
        assert!(err.is_timeout());

        let err = CommError::Corrupt {
            attempts: 3,
            source: ProtocolError::ChecksumMismatch {
                expected: 0xAA,
                actual: 0xAB,
            },
        };
        assert!(err.to_string().contains("checksum mismatch"));
        assert!(!err.is_timeout());
    }
}
