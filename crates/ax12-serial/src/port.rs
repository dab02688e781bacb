//! 基于 `serialport` 的物理串口实现
//!
//! AX-12 总线是 8N1 无流控的 TTL 半双工链路。

use std::io::Read;
use std::time::{Duration, Instant};

use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};
use tracing::debug;

use crate::{SerialConfig, SerialError, SerialTransport};

/// 物理串口传输
pub struct UartTransport {
    port: Box<dyn SerialPort>,
}

impl UartTransport {
    /// 打开并配置串口
    pub fn open(config: &SerialConfig) -> Result<Self, SerialError> {
        let port = serialport::new(&config.path, config.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(Duration::from_millis(10))
            .open()
            .map_err(|e| map_open_error(&config.path, e))?;

        debug!(path = %config.path, baud = config.baud_rate, "serial port opened");
        Ok(Self { port })
    }
}

fn map_open_error(path: &str, err: serialport::Error) -> SerialError {
    match err.kind() {
        serialport::ErrorKind::NoDevice => SerialError::PortUnavailable(path.to_string()),
        serialport::ErrorKind::Io(std::io::ErrorKind::PermissionDenied) => {
            SerialError::PermissionDenied(path.to_string())
        }
        serialport::ErrorKind::Io(std::io::ErrorKind::NotFound) => {
            SerialError::PortUnavailable(path.to_string())
        }
        _ => SerialError::Io(std::io::Error::other(err.to_string())),
    }
}

impl SerialTransport for UartTransport {
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), SerialError> {
        std::io::Write::write_all(&mut self.port, bytes)?;
        std::io::Write::flush(&mut self.port)?;
        Ok(())
    }

    fn read_exact(&mut self, buf: &mut [u8], timeout: Duration) -> Result<(), SerialError> {
        // serialport 的超时按单次 read 计算，这里换算成总限期，
        // 避免字节零散到达时读取时间成倍拉长
        let deadline = Instant::now() + timeout;
        let mut filled = 0;
        while filled < buf.len() {
            let remaining = deadline
                .checked_duration_since(Instant::now())
                .ok_or(SerialError::Timeout)?;
            self.port
                .set_timeout(remaining)
                .map_err(|e| SerialError::Io(std::io::Error::other(e.to_string())))?;
            match self.port.read(&mut buf[filled..]) {
                Ok(0) => return Err(SerialError::Closed),
                Ok(n) => filled += n,
                Err(e)
                    if e.kind() == std::io::ErrorKind::TimedOut
                        || e.kind() == std::io::ErrorKind::WouldBlock =>
                {
                    return Err(SerialError::Timeout);
                }
                Err(e) => return Err(SerialError::Io(e)),
            }
        }
        Ok(())
    }

    fn discard_input(&mut self) -> Result<(), SerialError> {
        self.port
            .clear(ClearBuffer::Input)
            .map_err(|e| SerialError::Io(std::io::Error::other(e.to_string())))?;
        Ok(())
    }
}
