//! 原始寄存器值与工程单位的换算
//!
//! 位置寄存器 0..=1023 对应 -150°..150°（从正面看顺时针为正），
//! 速度与负载寄存器是 10 位幅值加方向位（0x400），幅值满量程对应
//! 100%。换算结果统一保留 2 位小数，四舍五入远离零（与设备分辨率
//! 粒度一致）。

/// 位置量程的半幅（度）
pub const POSITION_SPAN_DEG: f64 = 150.0;

/// 每个原始单位对应的度数
pub const DEG_PER_UNIT: f64 = 0.293255;

/// 每度对应的原始单位数
pub const UNITS_PER_DEG: f64 = 3.41;

/// 位置零点对应的原始值
pub const POSITION_CENTER_RAW: u16 = 0x01FF;

/// 速度/负载的幅值掩码
pub const MAGNITUDE_MASK: u16 = 0x03FF;

/// 速度/负载的方向位（置位表示逆时针/负方向）
pub const DIRECTION_BIT: u16 = 0x0400;

/// 保留 2 位小数，四舍五入远离零
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// 原始位置值换算为度
pub fn position_from_raw(raw: u16) -> f64 {
    round2((raw as f64 - POSITION_CENTER_RAW as f64) * DEG_PER_UNIT - 0.146695)
}

/// 度换算为原始位置值，超出 ±150° 先钳位
pub fn position_to_raw(degrees: f64) -> u16 {
    let clamped = degrees.clamp(-POSITION_SPAN_DEG, POSITION_SPAN_DEG);
    let raw = ((clamped + POSITION_SPAN_DEG) * UNITS_PER_DEG).round();
    (raw as u16).min(MAGNITUDE_MASK)
}

/// 速度/负载原始值换算为有符号百分比
pub fn signed_percent_from_raw(raw: u16) -> f64 {
    let magnitude = round2((raw & MAGNITUDE_MASK) as f64 * 100.0 / 1023.0);
    if raw & DIRECTION_BIT != 0 {
        -magnitude
    } else {
        magnitude
    }
}

/// 有符号百分比换算为速度/负载原始值
///
/// 幅值超过 100% 钳位到满量程 0x3FF，负号映射到方向位。
pub fn signed_percent_to_raw(percent: f64) -> u16 {
    let magnitude = percent.abs();
    let mut raw = if magnitude > 100.0 {
        MAGNITUDE_MASK
    } else {
        (magnitude * 1023.0 / 100.0) as u16
    };
    if percent < 0.0 {
        raw |= DIRECTION_BIT;
    }
    raw
}

/// 电压原始值（0.1V 单位）换算为伏特
pub fn voltage_from_raw(raw: u8) -> f64 {
    round2(raw as f64 / 10.0)
}
