//! 执行器客户端
//!
//! [`Ax12Client`] 包装一条 [`Bus`]，维护每设备状态，并运行
//! 移动完成轮询线程。遥测读取都是同步透传（每次调用一次总线
//! 交换），不做缓存。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::debug;

use ax12_driver::{Bus, BusConfig, CommError, CommResult, DeviceId, Register};
use ax12_protocol::{ErrorFlags, units};

use crate::ClientError;
use crate::poller;
use crate::state::{DriveMode, DriveState, MoveCallback, Registry};

/// 完成轮询参数
#[derive(Debug, Clone, Copy)]
pub struct PollConfig {
    /// 轮询周期
    pub interval: Duration,
    /// 位置到达容差（度）
    pub tolerance_deg: f64,
    /// 到位但位置超差时，再次确认前的等待
    pub recheck_delay: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(100),
            tolerance_deg: 1.5,
            recheck_delay: Duration::from_millis(20),
        }
    }
}

/// AX-12 执行器客户端
///
/// 持有总线与设备注册表，Drop 时停止轮询线程并等待其退出。
pub struct Ax12Client {
    bus: Arc<Bus>,
    registry: Arc<Registry>,
    running: Arc<AtomicBool>,
    poller: Option<JoinHandle<()>>,
}

impl Ax12Client {
    /// 用默认轮询参数创建客户端
    pub fn new(bus: Bus) -> Self {
        Self::with_poll_config(bus, PollConfig::default())
    }

    /// 自定义轮询参数（测试中用来加快周期）
    pub fn with_poll_config(bus: Bus, poll: PollConfig) -> Self {
        let bus = Arc::new(bus);
        let registry = Arc::new(Registry::default());
        let running = Arc::new(AtomicBool::new(true));

        let poller = {
            let bus = bus.clone();
            let registry = registry.clone();
            let running = running.clone();
            std::thread::spawn(move || {
                poller::completion_loop(bus, registry, running, poll);
            })
        };

        Self {
            bus,
            registry,
            running,
            poller: Some(poller),
        }
    }

    /// 打开串口并创建客户端
    pub fn connect(config: BusConfig) -> Result<Self, ClientError> {
        Ok(Self::new(Bus::open(config)?))
    }

    /// 底层总线句柄（寄存器级访问）
    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    // ========================================================================
    // 遥测读取（同步透传，2 位小数）
    // ========================================================================

    /// 当前位置（度，-150..150，从正面看顺时针增大）
    pub fn position(&self, id: DeviceId) -> Result<f64, ClientError> {
        let raw = self.read16_value(id, Register::PresentPosition)?;
        Ok(units::position_from_raw(raw))
    }

    /// 当前速度（百分比，-100..100，正值为顺时针），读数可能不精确
    pub fn speed(&self, id: DeviceId) -> Result<f64, ClientError> {
        let raw = self.read16_value(id, Register::PresentSpeed)?;
        Ok(units::signed_percent_from_raw(raw))
    }

    /// 当前负载（百分比，-100..100），读数可能不精确
    pub fn load(&self, id: DeviceId) -> Result<f64, ClientError> {
        let raw = self.read16_value(id, Register::PresentLoad)?;
        Ok(units::signed_percent_from_raw(raw))
    }

    /// 供电电压（伏特）
    pub fn voltage(&self, id: DeviceId) -> Result<f64, ClientError> {
        let raw = self.read8_value(id, Register::PresentVoltage)?;
        Ok(units::voltage_from_raw(raw))
    }

    /// 内部温度（摄氏度）
    pub fn temperature(&self, id: DeviceId) -> Result<i32, ClientError> {
        let raw = self.read8_value(id, Register::PresentTemperature)?;
        Ok(raw as i32)
    }

    /// 设备错误标志（通过 Ping 获取）
    pub fn status(&self, id: DeviceId) -> Result<ErrorFlags, ClientError> {
        let result = self.track(id, self.bus.ping(id))?;
        Ok(result.error_flags)
    }

    /// 设备是否在自主运动中
    ///
    /// 移动结束前的轮询里这条读取频繁失败是正常现象，期间临时
    /// 关闭交换失败日志，避免刷屏。
    pub fn is_moving(&self, id: DeviceId) -> Result<bool, ClientError> {
        let prev = self.bus.error_logging_enabled();
        self.bus.set_error_logging(false);
        let result = self.bus.read8(id, Register::Moving);
        self.bus.set_error_logging(prev);
        let result = self.track(id, result)?;
        Ok(result.value == Some(1))
    }

    /// 本地状态机快照
    pub fn drive_state(&self, id: DeviceId) -> DriveState {
        self.registry.snapshot(id.raw())
    }

    /// 最近记录的错误标志与陈旧标记
    ///
    /// 陈旧标记置位表示最近一次操作通信失败，标志是上一次成功
    /// 交换遗留的。从未访问过的设备返回 None。
    pub fn last_status(&self, id: DeviceId) -> Option<(ErrorFlags, bool)> {
        self.registry.last_status(id.raw())
    }

    // ========================================================================
    // 设置指令
    // ========================================================================

    /// 设置驱动模式
    ///
    /// 位置模式恢复逆时针限位 0x3FF，轮模式清零限位允许整圈转动。
    /// 广播时更新所有已知设备的模式缓存。
    pub fn set_mode(&self, id: DeviceId, mode: DriveMode) -> Result<CommResult, ClientError> {
        let result = self.track(
            id,
            self.bus
                .write16(id, Register::CcwAngleLimit, mode.ccw_limit_raw() as u32),
        )?;
        if id.is_broadcast() {
            self.registry.set_cached_mode(None, mode);
        } else {
            self.registry.set_cached_mode(Some(id.raw()), mode);
        }
        Ok(result)
    }

    /// 设置目标速度（百分比，-100..100，正值为顺时针）
    pub fn set_speed(&self, id: DeviceId, percent: f64) -> Result<CommResult, ClientError> {
        let raw = units::signed_percent_to_raw(percent);
        self.track(id, self.bus.write16(id, Register::MovingSpeed, raw as u32))
    }

    /// 设置扭矩上限（百分比，0..100）
    ///
    /// 0 关闭扭矩输出（设备无法保持位置），其余值先使能扭矩再
    /// 写入上限。
    pub fn set_torque(&self, id: DeviceId, percent: f64) -> Result<CommResult, ClientError> {
        let disabled = (percent * 100.0).round() == 0.0;
        let result = self.track(
            id,
            self.bus
                .write8(id, Register::TorqueEnable, if disabled { 0 } else { 1 }),
        )?;
        if disabled {
            return Ok(result);
        }
        let raw = units::signed_percent_to_raw(percent.abs());
        self.track(id, self.bus.write16(id, Register::TorqueLimit, raw as u32))
    }

    /// 设置指示 LED
    pub fn set_led(&self, id: DeviceId, on: bool) -> Result<CommResult, ClientError> {
        self.track(id, self.bus.write8(id, Register::Led, on as u16))
    }

    // ========================================================================
    // 运动控制
    // ========================================================================

    /// 移动到指定位置（度，超出 ±150 先钳位），可选完成回调
    ///
    /// 需要时自动切回位置模式。同一设备上已有未完成的移动会被
    /// 顶替：旧回调被丢弃、永不派发。回调在轮询线程上同步派发。
    /// 广播移动只下发指令，不做完成跟踪。
    pub fn move_to(
        &self,
        id: DeviceId,
        degrees: f64,
        callback: Option<MoveCallback>,
    ) -> Result<(), ClientError> {
        let target = degrees.clamp(-units::POSITION_SPAN_DEG, units::POSITION_SPAN_DEG);

        // 广播没有模式缓存可查，总是先切模式
        if id.is_broadcast() || self.registry.cached_mode(id.raw()) != Some(DriveMode::Joint) {
            self.set_mode(id, DriveMode::Joint)?;
        }

        let raw = units::position_to_raw(target);
        match self.bus.write16(id, Register::GoalPosition, raw as u32) {
            Ok(result) => {
                if !id.is_broadcast() {
                    // 先注册跟踪再记录标志：设备报错时新移动随之冻结
                    self.registry.begin_move(id.raw(), target, callback);
                    self.registry.record_flags(id.raw(), result.error_flags);
                }
                debug!(id = %id, target, "move issued");
                Ok(())
            }
            Err(e) => {
                if !id.is_broadcast() {
                    self.registry.mark_stale(id.raw());
                }
                Err(e.into())
            }
        }
    }

    /// 取消移动完成跟踪，回调永不派发，状态回到 Idle
    ///
    /// 已经发到设备的运动指令无法撤回，设备会继续走完剩余行程。
    pub fn cancel_callback(&self, id: DeviceId) {
        self.registry.cancel(id.raw());
    }

    /// 切到轮模式并以指定速度持续转动（百分比，正值为顺时针）
    pub fn turn(&self, id: DeviceId, percent: f64) -> Result<CommResult, ClientError> {
        if id.is_broadcast() || self.registry.cached_mode(id.raw()) != Some(DriveMode::Wheel) {
            self.set_mode(id, DriveMode::Wheel)?;
        }
        self.set_speed(id, percent)
    }

    /// 广播一组出厂缺省的上电配置
    ///
    /// 应答级别全应答、应答延迟 6µs、过热/过载/电压错误时断扭矩
    /// 并闪灯，扭矩 100%、速度 50%。
    pub fn reset_all(&self) -> Result<(), ClientError> {
        let all = DeviceId::BROADCAST;
        self.track(all, self.bus.write8(all, Register::StatusReturnLevel, 2))?;
        self.track(all, self.bus.write8(all, Register::ReturnDelayTime, 3))?;
        self.track(all, self.bus.write8(all, Register::AlarmShutdown, 0x25))?;
        self.track(all, self.bus.write8(all, Register::AlarmLed, 0x25))?;
        self.set_torque(all, 100.0)?;
        self.set_speed(all, 50.0)?;
        Ok(())
    }

    /// 恢复出厂设置并清空本地状态
    ///
    /// 广播时清空所有设备的本地状态。注意出厂设置会把设备地址
    /// 重置为 1。
    pub fn factory_reset(&self, id: DeviceId) -> Result<CommResult, ClientError> {
        let result = self.track(id, self.bus.factory_reset(id))?;
        if id.is_broadcast() {
            self.registry.reset_all();
        } else {
            self.registry.reset(id.raw());
        }
        Ok(result)
    }

    /// 扫描地址区间，返回有应答的设备
    pub fn scan(&self, ids: std::ops::RangeInclusive<u8>) -> Vec<DeviceId> {
        let prev = self.bus.error_logging_enabled();
        self.bus.set_error_logging(false);
        let mut found = Vec::new();
        for raw in ids {
            let Ok(id) = DeviceId::new(raw) else {
                continue;
            };
            if self.bus.ping(id).is_ok() {
                found.push(id);
            }
        }
        self.bus.set_error_logging(prev);
        found
    }

    // ========================================================================
    // 内部工具
    // ========================================================================

    /// 记录交换结果到注册表并转换错误
    fn track(
        &self,
        id: DeviceId,
        result: Result<CommResult, CommError>,
    ) -> Result<CommResult, ClientError> {
        match result {
            Ok(result) => {
                if !id.is_broadcast() {
                    self.registry.record_flags(id.raw(), result.error_flags);
                }
                Ok(result)
            }
            Err(e) => {
                if !id.is_broadcast() {
                    self.registry.mark_stale(id.raw());
                }
                Err(e.into())
            }
        }
    }

    fn read16_value(&self, id: DeviceId, register: Register) -> Result<u16, ClientError> {
        let result = self.track(id, self.bus.read16(id, register))?;
        result.value.ok_or(ClientError::MissingValue)
    }

    fn read8_value(&self, id: DeviceId, register: Register) -> Result<u8, ClientError> {
        let result = self.track(id, self.bus.read8(id, register))?;
        result
            .value
            .map(|v| v as u8)
            .ok_or(ClientError::MissingValue)
    }
}

impl Drop for Ax12Client {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.poller.take() {
            let _ = handle.join();
        }
    }
}
