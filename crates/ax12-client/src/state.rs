//! 每设备逻辑状态与注册表
//!
//! 状态机：
//!
//! ```text
//! Idle --move_to--> Moving(target)
//! Moving --到位且停止--> Idle（回调被派发）
//! Moving --新 move_to--> Moving(newTarget)（旧回调被丢弃，不派发）
//! 任意状态 --应答携带错误标志--> Fault（挂起的移动被冻结）
//! Fault --cancel_callback / factory_reset / 新 move_to--> 释放
//! ```
//!
//! 取消只清除本地的完成跟踪，已发出的运动指令无法撤回，
//! 设备会继续走完剩余行程。

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use ax12_protocol::ErrorFlags;

/// 移动完成回调，在轮询线程上同步派发
pub type MoveCallback = Box<dyn FnOnce() + Send + 'static>;

/// 驱动模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveMode {
    /// 位置控制（无法整圈转动）
    Joint,
    /// 连续旋转（速度控制）
    Wheel,
}

impl DriveMode {
    /// 模式对应的逆时针角度限位：位置模式 0x3FF，轮模式 0
    pub(crate) fn ccw_limit_raw(self) -> u16 {
        match self {
            DriveMode::Joint => 0x3FF,
            DriveMode::Wheel => 0,
        }
    }
}

/// 对外可见的设备状态快照
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DriveState {
    /// 没有在跟踪中的移动
    Idle,
    /// 有移动在跟踪中
    Moving { target_deg: f64 },
    /// 最近一次应答携带了错误标志，跟踪被冻结
    Fault(ErrorFlags),
}

/// 跟踪中的移动
pub(crate) struct PendingMove {
    pub(crate) target_deg: f64,
    pub(crate) callback: Option<MoveCallback>,
    /// 单调序号，用于识别轮询期间被顶替的移动
    pub(crate) seq: u64,
}

impl std::fmt::Debug for PendingMove {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingMove")
            .field("target_deg", &self.target_deg)
            .field("has_callback", &self.callback.is_some())
            .field("seq", &self.seq)
            .finish()
    }
}

/// 单个设备的可变状态，首次引用时创建
#[derive(Debug, Default)]
pub(crate) struct ActuatorState {
    /// 最近一次设置的模式（None 表示未知）
    pub(crate) mode: Option<DriveMode>,
    /// 最近一次下发的目标位置（度）
    pub(crate) last_target: Option<f64>,
    /// 跟踪中的移动
    pub(crate) pending: Option<PendingMove>,
    /// 冻结状态的错误标志
    pub(crate) fault: Option<ErrorFlags>,
    /// 最近一次应答携带的错误标志
    pub(crate) last_error: ErrorFlags,
    /// 最近一次操作是否通信失败（区分新鲜读数与陈旧错误状态）
    pub(crate) stale: bool,
}

impl ActuatorState {
    fn snapshot(&self) -> DriveState {
        if let Some(flags) = self.fault {
            return DriveState::Fault(flags);
        }
        match &self.pending {
            Some(pending) => DriveState::Moving {
                target_deg: pending.target_deg,
            },
            None => DriveState::Idle,
        }
    }
}

/// 设备地址到状态的映射
#[derive(Default)]
pub(crate) struct Registry {
    devices: Mutex<HashMap<u8, ActuatorState>>,
    next_seq: AtomicU64,
}

impl Registry {
    fn with<R>(&self, id: u8, f: impl FnOnce(&mut ActuatorState) -> R) -> R {
        let mut devices = self.devices.lock();
        f(devices.entry(id).or_default())
    }

    /// 记录一次成功交换携带的错误标志
    ///
    /// 非零标志使状态进入 Fault，挂起的移动保持冻结，直到被
    /// 显式取消或新指令顶替。
    pub(crate) fn record_flags(&self, id: u8, flags: ErrorFlags) {
        self.with(id, |state| {
            state.stale = false;
            state.last_error = flags;
            if !flags.is_ok() {
                state.fault = Some(flags);
            }
        });
    }

    /// 记录一次通信失败：既有标志保持，但标记为陈旧
    pub(crate) fn mark_stale(&self, id: u8) {
        self.with(id, |state| state.stale = true);
    }

    /// 注册新的移动跟踪，顶替旧的（旧回调被丢弃）
    ///
    /// 新指令同时解除 Fault 冻结。返回本次移动的序号。
    pub(crate) fn begin_move(
        &self,
        id: u8,
        target_deg: f64,
        callback: Option<MoveCallback>,
    ) -> u64 {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed) + 1;
        self.with(id, |state| {
            state.pending = Some(PendingMove {
                target_deg,
                callback,
                seq,
            });
            state.last_target = Some(target_deg);
            state.fault = None;
        });
        seq
    }

    /// 清除移动跟踪而不派发回调，状态回到 Idle
    pub(crate) fn cancel(&self, id: u8) {
        self.with(id, |state| {
            state.pending = None;
            state.fault = None;
        });
    }

    /// 清空设备状态（factory reset 之后）
    pub(crate) fn reset(&self, id: u8) {
        self.with(id, |state| *state = ActuatorState::default());
    }

    /// 清空所有设备状态
    pub(crate) fn reset_all(&self) {
        let mut devices = self.devices.lock();
        for state in devices.values_mut() {
            *state = ActuatorState::default();
        }
    }

    pub(crate) fn cached_mode(&self, id: u8) -> Option<DriveMode> {
        self.devices.lock().get(&id).and_then(|s| s.mode)
    }

    /// 更新模式缓存；`id` 为 None 时更新所有已知设备（广播）
    pub(crate) fn set_cached_mode(&self, id: Option<u8>, mode: DriveMode) {
        match id {
            Some(id) => self.with(id, |state| state.mode = Some(mode)),
            None => {
                let mut devices = self.devices.lock();
                for state in devices.values_mut() {
                    state.mode = Some(mode);
                }
            }
        }
    }

    /// 有移动待跟踪且未被冻结的设备
    pub(crate) fn pending_ids(&self) -> Vec<u8> {
        let devices = self.devices.lock();
        devices
            .iter()
            .filter(|(_, s)| s.pending.is_some() && s.fault.is_none())
            .map(|(id, _)| *id)
            .collect()
    }

    /// 跟踪中移动的目标与序号
    pub(crate) fn pending_info(&self, id: u8) -> Option<(f64, u64)> {
        let devices = self.devices.lock();
        devices
            .get(&id)
            .and_then(|s| s.pending.as_ref())
            .map(|p| (p.target_deg, p.seq))
    }

    /// 若序号仍是当前移动则完成它，取出回调
    ///
    /// 序号不匹配说明轮询期间被新移动顶替，什么都不做。
    pub(crate) fn complete_if_current(&self, id: u8, seq: u64) -> Option<MoveCallback> {
        let mut devices = self.devices.lock();
        let state = devices.get_mut(&id)?;
        if state.pending.as_ref().is_none_or(|p| p.seq != seq) {
            return None;
        }
        let mut pending = state.pending.take().expect("seq checked above");
        pending.callback.take()
    }

    /// 状态快照
    pub(crate) fn snapshot(&self, id: u8) -> DriveState {
        self.devices
            .lock()
            .get(&id)
            .map(|s| s.snapshot())
            .unwrap_or(DriveState::Idle)
    }

    /// 最近记录的错误标志与陈旧标记（从未引用过的设备返回 None）
    pub(crate) fn last_status(&self, id: u8) -> Option<(ErrorFlags, bool)> {
        self.devices
            .lock()
            .get(&id)
            .map(|s| (s.last_error, s.stale))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_reference_creates_idle_state() {
        let registry = Registry::default();
        assert_eq!(registry.snapshot(3), DriveState::Idle);
        assert_eq!(registry.last_status(3), None);

        registry.record_flags(3, ErrorFlags::NONE);
        assert_eq!(registry.last_status(3), Some((ErrorFlags::NONE, false)));
    }

    #[test]
    fn test_begin_move_supersedes_previous() {
        let registry = Registry::default();
        let seq1 = registry.begin_move(1, 10.0, None);
        let seq2 = registry.begin_move(1, 20.0, None);
        assert!(seq2 > seq1);

        // 旧序号无法完成被顶替的移动
        assert!(registry.complete_if_current(1, seq1).is_none());
        assert_eq!(
            registry.snapshot(1),
            DriveState::Moving { target_deg: 20.0 }
        );
    }

    #[test]
    fn test_complete_takes_callback_once() {
        let registry = Registry::default();
        let seq = registry.begin_move(1, 10.0, Some(Box::new(|| {})));
        assert!(registry.complete_if_current(1, seq).is_some());
        assert_eq!(registry.snapshot(1), DriveState::Idle);
        assert!(registry.complete_if_current(1, seq).is_none());
    }

    #[test]
    fn test_fault_freezes_pending() {
        let registry = Registry::default();
        registry.begin_move(1, 10.0, None);
        registry.record_flags(1, ErrorFlags::OVERLOAD);

        assert_eq!(
            registry.snapshot(1),
            DriveState::Fault(ErrorFlags::OVERLOAD)
        );
        // 冻结的设备不参与轮询
        assert!(registry.pending_ids().is_empty());

        // 取消释放冻结并回到 Idle
        registry.cancel(1);
        assert_eq!(registry.snapshot(1), DriveState::Idle);
    }

    #[test]
    fn test_new_move_releases_fault() {
        let registry = Registry::default();
        registry.record_flags(1, ErrorFlags::ANGLE_LIMIT);
        registry.begin_move(1, 0.0, None);
        assert_eq!(registry.snapshot(1), DriveState::Moving { target_deg: 0.0 });
    }

    #[test]
    fn test_stale_marks_carried_over_flags() {
        let registry = Registry::default();
        registry.record_flags(1, ErrorFlags::OVERHEATING);
        registry.mark_stale(1);
        assert_eq!(
            registry.last_status(1),
            Some((ErrorFlags::OVERHEATING, true))
        );

        // 新鲜读数清除陈旧标记
        registry.record_flags(1, ErrorFlags::NONE);
        assert_eq!(registry.last_status(1), Some((ErrorFlags::NONE, false)));
    }

    #[test]
    fn test_broadcast_mode_cache_updates_known_devices() {
        let registry = Registry::default();
        registry.record_flags(1, ErrorFlags::NONE);
        registry.record_flags(2, ErrorFlags::NONE);

        registry.set_cached_mode(None, DriveMode::Wheel);
        assert_eq!(registry.cached_mode(1), Some(DriveMode::Wheel));
        assert_eq!(registry.cached_mode(2), Some(DriveMode::Wheel));
        // 之后才引用的设备不受影响
        assert_eq!(registry.cached_mode(3), None);
    }
}
