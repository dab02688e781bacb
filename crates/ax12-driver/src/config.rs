//! 总线配置
//!
//! 配置可以从 TOML 文件加载，也可以通过 [`BusBuilder`]
//! 链式构造。所有字段都有可用的默认值。
//!
//! ```toml
//! [serial]
//! path = "/dev/ttyUSB0"
//! baud_rate = 1000000
//!
//! response_timeout_ms = 50
//! retry_count = 2
//! turnaround_ms = 15
//!
//! [backoff]
//! kind = "exponential"
//! base_ms = 2
//! ```
//!
//! [`BusBuilder`]: crate::BusBuilder

use std::time::Duration;

use ax12_serial::SerialConfig;
use serde::{Deserialize, Serialize};

/// 重试间隔策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Backoff {
    /// 每次重试前等待固定时长
    Fixed { delay_ms: u64 },
    /// 逐次翻倍：base, base*2, base*4, ...
    Exponential { base_ms: u64 },
}

impl Backoff {
    /// 第 `attempt` 次重试前的等待时长（attempt 从 1 开始）
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            Backoff::Fixed { delay_ms } => Duration::from_millis(delay_ms),
            Backoff::Exponential { base_ms } => {
                Duration::from_millis(base_ms.saturating_mul(1u64 << (attempt - 1).min(16)))
            }
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::Fixed { delay_ms: 2 }
    }
}

/// 通信引擎配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusConfig {
    /// 串口参数
    #[serde(default)]
    pub serial: SerialConfig,
    /// 单次交换等待应答的上限（毫秒）
    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,
    /// 超时或应答损坏时的重试次数（总尝试次数为 retry_count + 1）
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
    /// 重试间隔策略
    #[serde(default)]
    pub backoff: Backoff,
    /// 每次交换后的总线恢复间隔（毫秒），给设备释放半双工线路的时间
    #[serde(default = "default_turnaround_ms")]
    pub turnaround_ms: u64,
}

fn default_response_timeout_ms() -> u64 {
    50
}

fn default_retry_count() -> u32 {
    2
}

fn default_turnaround_ms() -> u64 {
    15
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            serial: SerialConfig::default(),
            response_timeout_ms: default_response_timeout_ms(),
            retry_count: default_retry_count(),
            backoff: Backoff::default(),
            turnaround_ms: default_turnaround_ms(),
        }
    }
}

impl BusConfig {
    /// 从 TOML 文本解析
    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// 从 TOML 文件加载
    pub fn from_path(path: impl AsRef<std::path::Path>) -> Result<Self, std::io::Error> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text).map_err(std::io::Error::other)
    }

    /// 应答超时
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    /// 交换后的总线恢复间隔
    pub fn turnaround(&self) -> Duration {
        Duration::from_millis(self.turnaround_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BusConfig::default();
        assert_eq!(config.response_timeout_ms, 50);
        assert_eq!(config.retry_count, 2);
        assert_eq!(config.turnaround_ms, 15);
        assert_eq!(config.backoff, Backoff::Fixed { delay_ms: 2 });
    }

    #[test]
    fn test_backoff_delays() {
        let fixed = Backoff::Fixed { delay_ms: 5 };
        assert_eq!(fixed.delay(1), Duration::from_millis(5));
        assert_eq!(fixed.delay(3), Duration::from_millis(5));

        let exp = Backoff::Exponential { base_ms: 2 };
        assert_eq!(exp.delay(1), Duration::from_millis(2));
        assert_eq!(exp.delay(2), Duration::from_millis(4));
        assert_eq!(exp.delay(3), Duration::from_millis(8));
    }

    #[test]
    fn test_from_toml() {
        let config = BusConfig::from_toml_str(
            r#"
            response_timeout_ms = 20
            retry_count = 4

            [serial]
            path = "/dev/ttyUSB0"
            baud_rate = 1000000

            [backoff]
            kind = "exponential"
            base_ms = 3
            "#,
        )
        .unwrap();
        assert_eq!(config.serial.path, "/dev/ttyUSB0");
        assert_eq!(config.serial.baud_rate, 1_000_000);
        assert_eq!(config.response_timeout_ms, 20);
        assert_eq!(config.retry_count, 4);
        assert_eq!(config.backoff, Backoff::Exponential { base_ms: 3 });
        // 未出现的字段回落到默认值
        assert_eq!(config.turnaround_ms, 15);
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config = BusConfig::from_toml_str("").unwrap();
        assert_eq!(config, BusConfig::default());
    }
}
