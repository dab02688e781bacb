//! Mock 总线与舵机模拟器
//!
//! 用于无硬件测试：`ServoBusSim` 维护若干台模拟舵机的寄存器文件，
//! `MockTransport` 把写入的指令包交给模拟器处理，并把生成的状态包
//! 放进接收缓冲，供上层像真实串口一样读取。
//!
//! 故障注入：
//! - `drop_next_responses`: 吞掉接下来 N 个应答（模拟无响应设备）
//! - `corrupt_next_responses`: 破坏接下来 N 个应答的一个字节
//! - `inject_error`: 让某台舵机在每个应答中携带错误标志
//!
//! 运动模型：写入目标位置后，`Moving` 寄存器在接下来的 N 次读取
//! 中报告 1，之后位置跳变到目标值并报告 0。

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::trace;

use ax12_protocol::{
    BROADCAST_RAW, ErrorFlags, Instruction, Register, StatusPacket,
};

use crate::{SerialError, SerialTransport};

/// 寄存器文件大小（覆盖 AX-12 控制表）
const REGISTER_FILE_SIZE: usize = 0x32;

/// 新写入目标位置后，Moving 保持置位的读取次数
const DEFAULT_MOVING_POLLS: u32 = 2;

/// 一台模拟舵机
#[derive(Debug, Clone)]
pub struct SimServo {
    registers: [u8; REGISTER_FILE_SIZE],
    /// Moving 置位剩余的读取次数
    moving_polls_left: u32,
    /// 每次运动 Moving 置位的读取次数
    moving_poll_count: u32,
    /// 运动结束时的实际停点（None 表示精确到达目标）
    stall_at: Option<u16>,
    /// 附加在每个应答上的错误标志
    error: ErrorFlags,
}

impl SimServo {
    fn new(id: u8) -> Self {
        let mut servo = Self {
            registers: [0u8; REGISTER_FILE_SIZE],
            moving_polls_left: 0,
            moving_poll_count: DEFAULT_MOVING_POLLS,
            stall_at: None,
            error: ErrorFlags::NONE,
        };
        servo.reset_registers(id);
        servo
    }

    /// 恢复出厂寄存器内容
    fn reset_registers(&mut self, id: u8) {
        self.registers = [0u8; REGISTER_FILE_SIZE];
        self.set8(Register::Id, id);
        self.set8(Register::BaudRate, 1);
        self.set8(Register::ReturnDelayTime, 250);
        self.set16(Register::CcwAngleLimit, 0x3FF);
        self.set16(Register::MaxTorque, 0x3FF);
        self.set8(Register::StatusReturnLevel, 2);
        self.set8(Register::AlarmLed, 0x24);
        self.set8(Register::AlarmShutdown, 0x24);
        self.set16(Register::GoalPosition, 0x200);
        self.set16(Register::TorqueLimit, 0x3FF);
        self.set16(Register::PresentPosition, 0x200);
        self.set8(Register::PresentVoltage, 119);
        self.set8(Register::PresentTemperature, 32);
    }

    fn set8(&mut self, register: Register, value: u8) {
        self.registers[register.address() as usize] = value;
    }

    fn set16(&mut self, register: Register, value: u16) {
        let addr = register.address() as usize;
        self.registers[addr] = (value & 0xFF) as u8;
        self.registers[addr + 1] = (value >> 8) as u8;
    }

    fn get16(&self, register: Register) -> u16 {
        let addr = register.address() as usize;
        self.registers[addr] as u16 | (self.registers[addr + 1] as u16) << 8
    }

    fn write_bytes(&mut self, addr: u8, data: &[u8]) {
        let addr = addr as usize;
        if addr + data.len() > REGISTER_FILE_SIZE {
            return;
        }
        self.registers[addr..addr + data.len()].copy_from_slice(data);

        // 写入目标位置触发运动模型
        if addr == Register::GoalPosition.address() as usize {
            self.moving_polls_left = self.moving_poll_count;
            self.set8(Register::Moving, 1);
        }
    }

    fn read_bytes(&mut self, addr: u8, count: u8) -> Vec<u8> {
        // 读取 Moving 推进运动模型
        if addr == Register::Moving.address() && self.moving_polls_left > 0 {
            self.moving_polls_left -= 1;
            if self.moving_polls_left == 0 {
                let stop = self.stall_at.unwrap_or(self.get16(Register::GoalPosition));
                self.set16(Register::PresentPosition, stop);
                self.set8(Register::Moving, 0);
                return vec![1]; // 本次读取仍报告运动中
            }
        }
        let addr = addr as usize;
        let end = (addr + count as usize).min(REGISTER_FILE_SIZE);
        self.registers[addr..end].to_vec()
    }
}

#[derive(Default)]
struct SimState {
    devices: HashMap<u8, SimServo>,
    /// 每次 `write_all` 的完整字节序列（用于检查帧不交错）
    wire_log: Vec<Vec<u8>>,
    drop_responses: u32,
    corrupt_responses: u32,
}

/// 模拟总线（可克隆的共享句柄）
#[derive(Clone, Default)]
pub struct ServoBusSim {
    state: Arc<Mutex<SimState>>,
}

impl ServoBusSim {
    pub fn new() -> Self {
        Self::default()
    }

    /// 挂一台舵机到总线上
    pub fn add_servo(&self, id: u8) {
        self.state.lock().devices.insert(id, SimServo::new(id));
    }

    /// 创建连接到本总线的传输端点
    pub fn transport(&self) -> MockTransport {
        MockTransport {
            bus: self.clone(),
            rx: VecDeque::new(),
        }
    }

    /// 读取某台舵机的 8 位寄存器
    pub fn reg8(&self, id: u8, register: Register) -> u8 {
        self.state.lock().devices[&id].registers[register.address() as usize]
    }

    /// 读取某台舵机的 16 位寄存器
    pub fn reg16(&self, id: u8, register: Register) -> u16 {
        self.state.lock().devices[&id].get16(register)
    }

    /// 直接设置某台舵机的 16 位寄存器（测试预置状态）
    pub fn set_reg16(&self, id: u8, register: Register, value: u16) {
        if let Some(servo) = self.state.lock().devices.get_mut(&id) {
            servo.set16(register, value);
        }
    }

    /// 直接设置某台舵机的 8 位寄存器
    pub fn set_reg8(&self, id: u8, register: Register, value: u8) {
        if let Some(servo) = self.state.lock().devices.get_mut(&id) {
            servo.set8(register, value);
        }
    }

    /// 设置运动模型的 Moving 读取次数
    pub fn set_moving_polls(&self, id: u8, polls: u32) {
        if let Some(servo) = self.state.lock().devices.get_mut(&id) {
            servo.moving_poll_count = polls;
        }
    }

    /// 让下一次运动停在指定原始位置而不是目标位置
    pub fn stall_at(&self, id: u8, raw: u16) {
        if let Some(servo) = self.state.lock().devices.get_mut(&id) {
            servo.stall_at = Some(raw);
        }
    }

    /// 让某台舵机在每个应答中携带错误标志
    pub fn inject_error(&self, id: u8, error: ErrorFlags) {
        if let Some(servo) = self.state.lock().devices.get_mut(&id) {
            servo.error = error;
        }
    }

    /// 吞掉接下来 N 个应答
    pub fn drop_next_responses(&self, count: u32) {
        self.state.lock().drop_responses = count;
    }

    /// 破坏接下来 N 个应答的一个参数字节
    pub fn corrupt_next_responses(&self, count: u32) {
        self.state.lock().corrupt_responses = count;
    }

    /// 取走线缆写入记录
    pub fn wire_writes(&self) -> Vec<Vec<u8>> {
        self.state.lock().wire_log.clone()
    }

    /// 处理一个已写入的指令包，返回应答字节（若有）
    fn handle_packet(&self, bytes: &[u8]) -> Option<Vec<u8>> {
        let mut state = self.state.lock();
        state.wire_log.push(bytes.to_vec());

        // 手工拆帧：格式不合法的写入直接丢在总线上
        if bytes.len() < 6 || bytes[0] != 0xFF || bytes[1] != 0xFF {
            return None;
        }
        let id = bytes[2];
        let len = bytes[3] as usize;
        if bytes.len() < 4 + len || len < 2 {
            return None;
        }
        let Ok(instruction) = Instruction::try_from(bytes[4]) else {
            return None;
        };
        let params = &bytes[5..3 + len];

        let broadcast = id == BROADCAST_RAW;
        let ids: Vec<u8> = if broadcast {
            state.devices.keys().copied().collect()
        } else if state.devices.contains_key(&id) {
            vec![id]
        } else {
            // 无此设备，总线保持沉默
            return None;
        };

        let mut response = None;
        for target in ids {
            let servo = state.devices.get_mut(&target).expect("sim servo exists");
            let error = servo.error;
            let reply = match instruction {
                Instruction::Ping => Some(StatusPacket::new(target, error, &[])),
                Instruction::Read => {
                    let data = servo.read_bytes(params[0], params[1]);
                    Some(StatusPacket::new(target, error, &data))
                }
                Instruction::Write => {
                    servo.write_bytes(params[0], &params[1..]);
                    Some(StatusPacket::new(target, error, &[]))
                }
                Instruction::FactoryReset => {
                    servo.reset_registers(target);
                    Some(StatusPacket::new(target, error, &[]))
                }
                _ => None,
            };
            if !broadcast {
                response = reply;
            }
        }

        let mut bytes = response.map(|r| r.to_bytes())?;
        if state.drop_responses > 0 {
            state.drop_responses -= 1;
            trace!("sim: dropping response");
            return None;
        }
        if state.corrupt_responses > 0 {
            state.corrupt_responses -= 1;
            let pos = bytes.len() - 2;
            bytes[pos] ^= 0x40;
            trace!("sim: corrupting response byte {pos}");
        }
        Some(bytes)
    }
}

/// 连接到 [`ServoBusSim`] 的传输端点
pub struct MockTransport {
    bus: ServoBusSim,
    rx: VecDeque<u8>,
}

impl SerialTransport for MockTransport {
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), SerialError> {
        if let Some(response) = self.bus.handle_packet(bytes) {
            self.rx.extend(response);
        }
        Ok(())
    }

    fn read_exact(&mut self, buf: &mut [u8], _timeout: Duration) -> Result<(), SerialError> {
        // 模拟总线的应答是瞬时的：缓冲里没有就永远不会有
        if self.rx.len() < buf.len() {
            return Err(SerialError::Timeout);
        }
        for slot in buf.iter_mut() {
            *slot = self.rx.pop_front().expect("length checked above");
        }
        Ok(())
    }

    fn discard_input(&mut self) -> Result<(), SerialError> {
        self.rx.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ax12_protocol::{DeviceId, InstructionPacket};

    fn dev(id: u8) -> DeviceId {
        DeviceId::new(id).unwrap()
    }

    fn exchange(transport: &mut MockTransport, packet: &InstructionPacket) -> StatusPacket {
        transport.write_all(&packet.to_bytes()).unwrap();
        let mut buf = vec![0u8; packet.expected_response_len()];
        transport
            .read_exact(&mut buf, Duration::from_millis(10))
            .unwrap();
        StatusPacket::parse(&buf).unwrap()
    }

    #[test]
    fn test_ping_and_silent_unknown_id() {
        let sim = ServoBusSim::new();
        sim.add_servo(1);
        let mut transport = sim.transport();

        let status = exchange(&mut transport, &InstructionPacket::ping(dev(1)));
        assert_eq!(status.id, 1);
        assert!(status.error.is_ok());

        // 未挂载的设备不应答
        let ping = InstructionPacket::ping(dev(9));
        transport.write_all(&ping.to_bytes()).unwrap();
        let mut buf = [0u8; 6];
        assert!(matches!(
            transport.read_exact(&mut buf, Duration::from_millis(10)),
            Err(SerialError::Timeout)
        ));
    }

    #[test]
    fn test_write_then_read_register() {
        let sim = ServoBusSim::new();
        sim.add_servo(5);
        let mut transport = sim.transport();

        let write = InstructionPacket::write16(dev(5), Register::GoalPosition, 512).unwrap();
        let status = exchange(&mut transport, &write);
        assert!(status.error.is_ok());

        let read = InstructionPacket::read(dev(5), Register::GoalPosition).unwrap();
        let status = exchange(&mut transport, &read);
        assert_eq!(status.value(), Some(512));
    }

    #[test]
    fn test_motion_model_completes_after_polls() {
        let sim = ServoBusSim::new();
        sim.add_servo(2);
        sim.set_moving_polls(2, 2);
        let mut transport = sim.transport();

        let write = InstructionPacket::write16(dev(2), Register::GoalPosition, 800).unwrap();
        exchange(&mut transport, &write);

        let read_moving = InstructionPacket::read(dev(2), Register::Moving).unwrap();
        assert_eq!(exchange(&mut transport, &read_moving).value(), Some(1));
        assert_eq!(exchange(&mut transport, &read_moving).value(), Some(1));
        assert_eq!(exchange(&mut transport, &read_moving).value(), Some(0));
        assert_eq!(sim.reg16(2, Register::PresentPosition), 800);
    }

    #[test]
    fn test_broadcast_write_reaches_all_and_stays_silent() {
        let sim = ServoBusSim::new();
        sim.add_servo(1);
        sim.add_servo(2);
        let mut transport = sim.transport();

        let write = InstructionPacket::write8(DeviceId::BROADCAST, Register::Led, 1).unwrap();
        transport.write_all(&write.to_bytes()).unwrap();

        let mut buf = [0u8; 6];
        assert!(matches!(
            transport.read_exact(&mut buf, Duration::from_millis(10)),
            Err(SerialError::Timeout)
        ));
        assert_eq!(sim.reg8(1, Register::Led), 1);
        assert_eq!(sim.reg8(2, Register::Led), 1);
    }

    #[test]
    fn test_fault_injection_drop_and_corrupt() {
        let sim = ServoBusSim::new();
        sim.add_servo(1);
        let mut transport = sim.transport();
        let ping = InstructionPacket::ping(dev(1));

        sim.drop_next_responses(1);
        transport.write_all(&ping.to_bytes()).unwrap();
        let mut buf = [0u8; 6];
        assert!(transport.read_exact(&mut buf, Duration::from_millis(10)).is_err());

        sim.corrupt_next_responses(1);
        transport.write_all(&ping.to_bytes()).unwrap();
        transport.read_exact(&mut buf, Duration::from_millis(10)).unwrap();
        assert!(StatusPacket::parse(&buf).is_err());
    }

    #[test]
    fn test_injected_error_flags_in_response() {
        let sim = ServoBusSim::new();
        sim.add_servo(3);
        sim.inject_error(3, ErrorFlags::OVERHEATING);
        let mut transport = sim.transport();

        let status = exchange(&mut transport, &InstructionPacket::ping(dev(3)));
        assert!(status.error.contains(ErrorFlags::OVERHEATING));
    }

    #[test]
    fn test_factory_reset_restores_defaults() {
        let sim = ServoBusSim::new();
        sim.add_servo(4);
        let mut transport = sim.transport();

        let write = InstructionPacket::write8(dev(4), Register::Led, 1).unwrap();
        exchange(&mut transport, &write);
        assert_eq!(sim.reg8(4, Register::Led), 1);

        exchange(&mut transport, &InstructionPacket::factory_reset(dev(4)));
        assert_eq!(sim.reg8(4, Register::Led), 0);
        assert_eq!(sim.reg16(4, Register::CcwAngleLimit), 0x3FF);
    }
}
