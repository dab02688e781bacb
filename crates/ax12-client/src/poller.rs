//! 移动完成轮询线程
//!
//! 以固定周期轮询每个有移动在跟踪中的设备：设备报告停止后，
//! 核对当前位置是否进入目标容差。超差时可能只是短暂停顿（负载
//! 变化、多段加减速），等待片刻再确认一次运动标志，确认停止后
//! 视为到达并派发回调。
//!
//! 回调在本线程上同步派发，派发前先释放注册表锁，回调里可以
//! 安全地再次调用客户端。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use tracing::{debug, trace};

use ax12_driver::{Bus, DeviceId, Register};
use ax12_protocol::units;

use crate::client::PollConfig;
use crate::state::Registry;

/// 轮询主循环，`running` 清零后退出
pub(crate) fn completion_loop(
    bus: Arc<Bus>,
    registry: Arc<Registry>,
    running: Arc<AtomicBool>,
    config: PollConfig,
) {
    debug!("move completion poller started");
    while running.load(Ordering::Relaxed) {
        let cycle_start = Instant::now();

        for id in registry.pending_ids() {
            if !running.load(Ordering::Relaxed) {
                break;
            }
            poll_one(&bus, &registry, id, &config);
        }

        let elapsed = cycle_start.elapsed();
        if elapsed < config.interval {
            spin_sleep::sleep(config.interval - elapsed);
        }
    }
    debug!("move completion poller exiting");
}

/// 检查一台设备的移动是否完成
fn poll_one(bus: &Bus, registry: &Registry, raw_id: u8, config: &PollConfig) {
    let Some((target_deg, seq)) = registry.pending_info(raw_id) else {
        return;
    };
    let Ok(id) = DeviceId::new(raw_id) else {
        return;
    };

    // 轮询期间的零星交换失败是常态，不刷错误日志
    let prev_logging = bus.error_logging_enabled();
    bus.set_error_logging(false);
    let outcome = check_completion(bus, registry, id, target_deg, config);
    bus.set_error_logging(prev_logging);

    if !outcome {
        return;
    }

    // 序号不匹配说明轮询期间被新移动顶替，这里什么都不做
    if let Some(callback) = registry.complete_if_current(raw_id, seq) {
        debug!(id = %id, target_deg, "move completed, dispatching callback");
        callback();
    }
}

/// 设备是否已停在目标位置附近
fn check_completion(
    bus: &Bus,
    registry: &Registry,
    id: DeviceId,
    target_deg: f64,
    config: &PollConfig,
) -> bool {
    match read_moving(bus, registry, id) {
        Some(true) => return false,
        Some(false) => {}
        None => return false, // 通信失败或设备报错，下个周期再试
    }

    let position = match bus.read16(id, Register::PresentPosition) {
        Ok(result) => {
            registry.record_flags(id.raw(), result.error_flags);
            if !result.device_ok() {
                return false;
            }
            match result.value {
                Some(raw) => units::position_from_raw(raw),
                None => return false,
            }
        }
        Err(_) => {
            registry.mark_stale(id.raw());
            return false;
        }
    };

    if (position - target_deg).abs() > config.tolerance_deg {
        // 可能只是短暂停顿，稍候确认一次
        trace!(id = %id, position, target_deg, "stopped out of tolerance, re-checking");
        spin_sleep::sleep(config.recheck_delay);
        if read_moving(bus, registry, id) == Some(true) {
            return false;
        }
        // 确认停止：设备到不了目标（堵转、限位），完成跟踪照常结束
    }
    true
}

/// 读取运动标志；通信失败或设备报错返回 None
fn read_moving(bus: &Bus, registry: &Registry, id: DeviceId) -> Option<bool> {
    match bus.read8(id, Register::Moving) {
        Ok(result) => {
            registry.record_flags(id.raw(), result.error_flags);
            if !result.device_ok() {
                return None;
            }
            Some(result.value == Some(1))
        }
        Err(_) => {
            registry.mark_stale(id.raw());
            None
        }
    }
}
