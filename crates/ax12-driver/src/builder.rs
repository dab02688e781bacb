//! Builder 模式实现
//!
//! 提供链式构造 [`Bus`] 实例的便捷方式。

use std::time::Duration;

use ax12_serial::SerialTransport;

use crate::bus::Bus;
use crate::config::{Backoff, BusConfig};
use crate::error::CommError;

/// Bus Builder（链式构造）
///
/// # Example
///
/// ```no_run
/// use ax12_driver::{Backoff, BusBuilder};
/// use std::time::Duration;
///
/// let bus = BusBuilder::new()
///     .path("/dev/ttyUSB0")
///     .baud_rate(1_000_000)
///     .response_timeout(Duration::from_millis(20))
///     .retry_count(3)
///     .backoff(Backoff::Exponential { base_ms: 2 })
///     .build()
///     .unwrap();
/// ```
pub struct BusBuilder {
    config: BusConfig,
    transport: Option<Box<dyn SerialTransport>>,
}

impl BusBuilder {
    pub fn new() -> Self {
        Self {
            config: BusConfig::default(),
            transport: None,
        }
    }

    /// 从现成的配置开始（如 [`BusConfig::from_path`] 的结果）
    pub fn config(mut self, config: BusConfig) -> Self {
        self.config = config;
        self
    }

    /// 串口设备路径
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.config.serial.path = path.into();
        self
    }

    /// 波特率
    pub fn baud_rate(mut self, baud_rate: u32) -> Self {
        self.config.serial.baud_rate = baud_rate;
        self
    }

    /// 单次交换的应答超时
    pub fn response_timeout(mut self, timeout: Duration) -> Self {
        self.config.response_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// 超时/损坏应答的重试次数
    pub fn retry_count(mut self, count: u32) -> Self {
        self.config.retry_count = count;
        self
    }

    /// 重试间隔策略
    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.config.backoff = backoff;
        self
    }

    /// 交换后的总线恢复间隔
    pub fn turnaround(mut self, turnaround: Duration) -> Self {
        self.config.turnaround_ms = turnaround.as_millis() as u64;
        self
    }

    /// 注入现成的传输端点（测试 mock 用），跳过串口打开
    pub fn transport(mut self, transport: Box<dyn SerialTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// 构建 [`Bus`]
    pub fn build(self) -> Result<Bus, CommError> {
        match self.transport {
            Some(transport) => Ok(Bus::with_transport(transport, self.config)),
            None => Bus::open(self.config),
        }
    }
}

impl Default for BusBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ax12_protocol::DeviceId;
    use ax12_serial::ServoBusSim;

    #[test]
    fn test_builder_with_injected_transport() {
        let sim = ServoBusSim::new();
        sim.add_servo(1);

        let bus = BusBuilder::new()
            .response_timeout(Duration::from_millis(5))
            .retry_count(1)
            .turnaround(Duration::ZERO)
            .transport(Box::new(sim.transport()))
            .build()
            .unwrap();

        assert!(bus.ping(DeviceId::new(1).unwrap()).is_ok());
    }

    #[test]
    fn test_builder_chains_into_config() {
        let builder = BusBuilder::new()
            .path("/dev/ttyAMA0")
            .baud_rate(57_600)
            .retry_count(5)
            .backoff(Backoff::Fixed { delay_ms: 7 });
        assert_eq!(builder.config.serial.path, "/dev/ttyAMA0");
        assert_eq!(builder.config.serial.baud_rate, 57_600);
        assert_eq!(builder.config.retry_count, 5);
        assert_eq!(builder.config.backoff, Backoff::Fixed { delay_ms: 7 });
    }
}
