//! 总线对象与 IO 线程
//!
//! [`Bus`] 持有命令通道发送端，专属 IO 线程持有传输端点。
//! 所有交换按提交顺序（FIFO）逐个执行，引擎保证同一时刻只有
//! 一次交换在线上。

use std::mem::ManuallyDrop;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender, bounded};
use tracing::{debug, trace, warn};

use ax12_protocol::{DeviceId, InstructionPacket, ProtocolError, Register, StatusPacket};
use ax12_serial::{SerialError, SerialTransport, UartTransport};

use crate::config::BusConfig;
use crate::error::{CommError, CommResult};

/// 命令队列容量
const COMMAND_QUEUE_DEPTH: usize = 16;

struct Exchange {
    packet: InstructionPacket,
    reply: Sender<Result<CommResult, CommError>>,
}

/// AX-12 总线句柄
///
/// 通过 [`Bus::open`] 或 [`BusBuilder`](crate::BusBuilder) 创建。
/// 方法可以从任意线程调用，请求按提交顺序得到服务；Drop 时
/// 关闭命令通道并等待 IO 线程退出。
pub struct Bus {
    /// 命令发送通道
    ///
    /// 需要在 Drop 时先于 join 关闭，否则 IO 线程永远收不到
    /// `Disconnected` 而卡住退出。
    cmd_tx: ManuallyDrop<Sender<Exchange>>,
    /// IO 线程句柄（Drop 时 join）
    io_thread: Option<JoinHandle<()>>,
    /// 交换失败时是否输出 warn 日志（只影响观测，不影响控制流）
    error_logging: Arc<AtomicBool>,
}

impl Bus {
    /// 打开物理串口并启动 IO 线程
    pub fn open(config: BusConfig) -> Result<Self, CommError> {
        let transport = UartTransport::open(&config.serial)?;
        Ok(Self::with_transport(Box::new(transport), config))
    }

    /// 在已有传输端点上启动 IO 线程（测试注入 mock 用）
    pub fn with_transport(transport: Box<dyn SerialTransport>, config: BusConfig) -> Self {
        let (cmd_tx, cmd_rx) = bounded(COMMAND_QUEUE_DEPTH);
        let error_logging = Arc::new(AtomicBool::new(true));
        let log_flag = error_logging.clone();

        let io_thread = std::thread::spawn(move || {
            io_loop(transport, cmd_rx, config, log_flag);
        });

        Self {
            cmd_tx: ManuallyDrop::new(cmd_tx),
            io_thread: Some(io_thread),
            error_logging,
        }
    }

    /// 执行一次交换，阻塞直到得到结果
    ///
    /// 广播写不等待应答，写出后立即返回合成的成功结果。
    pub fn execute(&self, packet: InstructionPacket) -> Result<CommResult, CommError> {
        let (reply_tx, reply_rx) = bounded(1);
        self.cmd_tx
            .send(Exchange {
                packet,
                reply: reply_tx,
            })
            .map_err(|_| CommError::Disconnected)?;
        reply_rx.recv().map_err(|_| CommError::Disconnected)?
    }

    /// 写 8 位寄存器，值取模 256 截断
    pub fn write8(
        &self,
        id: DeviceId,
        register: Register,
        value: u16,
    ) -> Result<CommResult, CommError> {
        self.execute(InstructionPacket::write8(id, register, value)?)
    }

    /// 写 16 位寄存器，值取模 65536 截断
    pub fn write16(
        &self,
        id: DeviceId,
        register: Register,
        value: u32,
    ) -> Result<CommResult, CommError> {
        self.execute(InstructionPacket::write16(id, register, value)?)
    }

    /// 读 8 位寄存器
    pub fn read8(&self, id: DeviceId, register: Register) -> Result<CommResult, CommError> {
        if register.width() != 1 {
            return Err(ProtocolError::WidthMismatch {
                register,
                expected: register.width() * 8,
            }
            .into());
        }
        self.execute(InstructionPacket::read(id, register)?)
    }

    /// 读 16 位寄存器
    pub fn read16(&self, id: DeviceId, register: Register) -> Result<CommResult, CommError> {
        if register.width() != 2 {
            return Err(ProtocolError::WidthMismatch {
                register,
                expected: register.width() * 8,
            }
            .into());
        }
        self.execute(InstructionPacket::read(id, register)?)
    }

    /// 探测设备，应答只携带错误标志
    pub fn ping(&self, id: DeviceId) -> Result<CommResult, CommError> {
        self.execute(InstructionPacket::ping(id))
    }

    /// 恢复出厂设置
    pub fn factory_reset(&self, id: DeviceId) -> Result<CommResult, CommError> {
        self.execute(InstructionPacket::factory_reset(id))
    }

    /// 开关交换失败的 warn 日志（只影响观测，不影响控制流）
    pub fn set_error_logging(&self, enabled: bool) {
        self.error_logging.store(enabled, Ordering::Relaxed);
    }

    /// 当前日志开关状态
    pub fn error_logging_enabled(&self) -> bool {
        self.error_logging.load(Ordering::Relaxed)
    }
}

impl Drop for Bus {
    fn drop(&mut self) {
        // 先关闭命令通道，IO 线程才能观察到 Disconnected 并退出
        unsafe {
            ManuallyDrop::drop(&mut self.cmd_tx);
        }
        if let Some(handle) = self.io_thread.take() {
            let _ = handle.join();
        }
    }
}

/// IO 线程主循环
///
/// 独占传输端点，逐个取出队列中的交换请求执行。每次交换后
/// 等待一个恢复间隔，给半双工线路上的设备让出转向时间。
fn io_loop(
    mut transport: Box<dyn SerialTransport>,
    cmd_rx: Receiver<Exchange>,
    config: BusConfig,
    error_logging: Arc<AtomicBool>,
) {
    debug!("bus IO thread started");
    while let Ok(Exchange { packet, reply }) = cmd_rx.recv() {
        let result = perform_exchange(transport.as_mut(), &packet, &config);
        if error_logging.load(Ordering::Relaxed)
            && let Err(e) = &result
        {
            warn!(id = %packet.id, "exchange failed: {e}");
        }
        // 调用方可能已经放弃等待
        let _ = reply.send(result);
        spin_sleep::sleep(config.turnaround());
    }
    debug!("bus IO thread exiting");
}

/// 执行一次请求/应答交换，按策略重试
///
/// 超时与损坏应答可重试；串口 IO 故障立即上抛。设备报告的
/// 错误标志属于成功交换的一部分，不触发重试。
fn perform_exchange(
    transport: &mut dyn SerialTransport,
    packet: &InstructionPacket,
    config: &BusConfig,
) -> Result<CommResult, CommError> {
    let bytes = packet.to_bytes();
    let attempts = config.retry_count + 1;
    let mut last_failure = None;

    for attempt in 1..=attempts {
        if attempt > 1 {
            spin_sleep::sleep(config.backoff.delay(attempt - 1));
        }
        // 清掉上一轮可能残留的半截应答
        transport.discard_input()?;
        transport.write_all(&bytes)?;

        if !packet.expects_response() {
            return Ok(CommResult::broadcast_ack());
        }

        let mut buf = vec![0u8; packet.expected_response_len()];
        match transport.read_exact(&mut buf, config.response_timeout()) {
            Ok(()) => {}
            Err(SerialError::Timeout) => {
                trace!(id = %packet.id, attempt, "response timeout");
                last_failure = Some(CommError::Timeout { attempts });
                continue;
            }
            Err(e) => return Err(e.into()),
        }

        match StatusPacket::parse(&buf).and_then(|status| {
            status.ensure_id(packet.id)?;
            Ok(status)
        }) {
            Ok(status) => {
                return Ok(CommResult {
                    error_flags: status.error,
                    value: status.value(),
                });
            }
            Err(e) => {
                trace!(id = %packet.id, attempt, "corrupt response: {e}");
                last_failure = Some(CommError::Corrupt {
                    attempts,
                    source: e,
                });
            }
        }
    }

    Err(last_failure.unwrap_or(CommError::Timeout { attempts }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ax12_serial::ServoBusSim;
    use std::time::Duration;

    fn dev(id: u8) -> DeviceId {
        DeviceId::new(id).unwrap()
    }

    /// 测试用快速配置：无恢复间隔，短超时
    fn fast_config() -> BusConfig {
        BusConfig {
            response_timeout_ms: 10,
            retry_count: 2,
            turnaround_ms: 0,
            ..BusConfig::default()
        }
    }

    fn mock_bus(sim: &ServoBusSim) -> Bus {
        Bus::with_transport(Box::new(sim.transport()), fast_config())
    }

    #[test]
    fn test_write16_then_read16_roundtrip() {
        let sim = ServoBusSim::new();
        sim.add_servo(5);
        let bus = mock_bus(&sim);

        let result = bus.write16(dev(5), Register::GoalPosition, 512).unwrap();
        assert!(result.device_ok());

        let result = bus.read16(dev(5), Register::GoalPosition).unwrap();
        assert!(result.device_ok());
        assert_eq!(result.value, Some(512));
    }

    #[test]
    fn test_broadcast_write_returns_synthetic_ack() {
        let sim = ServoBusSim::new();
        sim.add_servo(1);
        sim.add_servo(2);
        let bus = mock_bus(&sim);

        let result = bus.write8(DeviceId::BROADCAST, Register::Led, 1).unwrap();
        assert!(result.device_ok());
        assert_eq!(result.value, None);
        assert_eq!(sim.reg8(1, Register::Led), 1);
        assert_eq!(sim.reg8(2, Register::Led), 1);
    }

    #[test]
    fn test_unresponsive_device_times_out_after_retries() {
        let sim = ServoBusSim::new(); // 总线上没有任何设备
        let bus = mock_bus(&sim);

        let err = bus.ping(dev(7)).unwrap_err();
        assert!(err.is_timeout());

        // 初次发送加两次重试，共三次写入
        assert_eq!(sim.wire_writes().len(), 3);
    }

    #[test]
    fn test_retry_recovers_from_dropped_response() {
        let sim = ServoBusSim::new();
        sim.add_servo(1);
        sim.drop_next_responses(2);
        let bus = mock_bus(&sim);

        // retry_count = 2：前两次无应答，第三次成功
        let result = bus.ping(dev(1)).unwrap();
        assert!(result.device_ok());
    }

    #[test]
    fn test_retry_recovers_from_corrupt_response() {
        let sim = ServoBusSim::new();
        sim.add_servo(1);
        sim.corrupt_next_responses(1);
        let bus = mock_bus(&sim);

        let result = bus.ping(dev(1)).unwrap();
        assert!(result.device_ok());
    }

    #[test]
    fn test_corrupt_exhaustion_surfaces_corrupt_error() {
        let sim = ServoBusSim::new();
        sim.add_servo(1);
        sim.corrupt_next_responses(10);
        let bus = mock_bus(&sim);

        let err = bus.ping(dev(1)).unwrap_err();
        assert!(matches!(err, CommError::Corrupt { attempts: 3, .. }));
    }

    #[test]
    fn test_device_error_flags_do_not_trigger_retry() {
        let sim = ServoBusSim::new();
        sim.add_servo(1);
        sim.inject_error(1, ax12_protocol::ErrorFlags::OVERLOAD);
        let bus = mock_bus(&sim);

        let result = bus.ping(dev(1)).unwrap();
        assert!(!result.device_ok());
        // 交换成功，只发送了一次
        assert_eq!(sim.wire_writes().len(), 1);
    }

    #[test]
    fn test_read_width_validation() {
        let sim = ServoBusSim::new();
        sim.add_servo(1);
        let bus = mock_bus(&sim);

        assert!(matches!(
            bus.read8(dev(1), Register::GoalPosition),
            Err(CommError::Protocol(ProtocolError::WidthMismatch { .. }))
        ));
        assert!(matches!(
            bus.read16(dev(1), Register::Moving),
            Err(CommError::Protocol(ProtocolError::WidthMismatch { .. }))
        ));
    }

    #[test]
    fn test_concurrent_callers_are_serialized_fifo() {
        let sim = ServoBusSim::new();
        for id in 1..=4u8 {
            sim.add_servo(id);
            sim.set_reg16(id, Register::PresentPosition, 100 * id as u16);
        }
        let bus = std::sync::Arc::new(mock_bus(&sim));

        let mut handles = Vec::new();
        for id in 1..=4u8 {
            let bus = bus.clone();
            handles.push(std::thread::spawn(move || {
                for _ in 0..10 {
                    let result = bus.read16(dev(id), Register::PresentPosition).unwrap();
                    // 每个调用方拿到自己请求的设备的数据
                    assert_eq!(result.value, Some(100 * id as u16));
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        // 线缆上的每次写入都是一个完整的指令包，没有交错的半截帧
        for frame in sim.wire_writes() {
            assert_eq!(frame[0], 0xFF);
            assert_eq!(frame[1], 0xFF);
            assert_eq!(frame.len(), frame[3] as usize + 4);
            assert!(StatusPacket::parse(&frame).is_ok());
        }
    }

    #[test]
    fn test_error_logging_toggle() {
        let sim = ServoBusSim::new();
        let bus = mock_bus(&sim);

        assert!(bus.error_logging_enabled());
        bus.set_error_logging(false);
        assert!(!bus.error_logging_enabled());

        // 关闭日志不影响错误仍然上抛
        assert!(bus.ping(dev(3)).is_err());
        bus.set_error_logging(true);
    }

    #[test]
    fn test_drop_joins_io_thread() {
        let sim = ServoBusSim::new();
        sim.add_servo(1);
        let bus = mock_bus(&sim);
        bus.ping(dev(1)).unwrap();
        drop(bus); // 不应卡住

        // 通道关闭后 IO 线程退出，传输端点随之释放
        std::thread::sleep(Duration::from_millis(10));
    }
}
