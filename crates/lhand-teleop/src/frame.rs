//! 手套数据帧与 JSON 解码
//!
//! 数据报格式：
//!
//! ```json
//! {"teleop_glove": {"Parameter": [{"Name": "R_CalibrationStatus", "Value": 3},
//!                                 {"Name": "r2", "Value": "-12.5"}]}}
//! ```
//!
//! `Value` 可以是数字或数字字符串，无法解析的字符串按 0 处理。

use crate::error::TeleopError;
use lhand_protocol::HandSide;
use serde::Deserialize;
use std::collections::HashMap;

/// 校准完成的状态值
pub const CALIBRATED: f64 = 3.0;

/// 关节 → 手套通道编号（前缀 `r`/`l`），角度取负
pub const JOINT_CHANNELS: [u8; 6] = [2, 0, 5, 9, 13, 17];

/// 一个手套设备的一帧数据
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GloveFrame {
    pub device_name: String,
    pub left_calibrated: bool,
    pub right_calibrated: bool,
    pub left_angles: [f32; 6],
    pub right_angles: [f32; 6],
}

impl GloveFrame {
    pub fn is_calibrated(&self, side: HandSide) -> bool {
        match side {
            HandSide::Right => self.right_calibrated,
            HandSide::Left => self.left_calibrated,
        }
    }

    pub fn angles(&self, side: HandSide) -> &[f32; 6] {
        match side {
            HandSide::Right => &self.right_angles,
            HandSide::Left => &self.left_angles,
        }
    }
}

#[derive(Deserialize)]
struct DeviceRecord {
    #[serde(rename = "Parameter", default)]
    parameters: Vec<ParameterRecord>,
}

#[derive(Deserialize)]
struct ParameterRecord {
    #[serde(rename = "Name", default)]
    name: String,
    #[serde(rename = "Value", default)]
    value: Option<serde_json::Value>,
}

/// 数字或数字字符串；其它一律为 0
fn parameter_value(value: &serde_json::Value) -> f64 {
    match value {
        serde_json::Value::Number(n) => n.as_f64().unwrap_or(0.0),
        serde_json::Value::String(s) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

/// 解码一个数据报
///
/// 顶层必须是 JSON 对象；单个设备记录格式不对时仍产出一帧（未校准、角度为 0）。
pub fn decode_datagram(data: &[u8]) -> Result<Vec<GloveFrame>, TeleopError> {
    let devices: serde_json::Map<String, serde_json::Value> = serde_json::from_slice(data)?;

    Ok(devices
        .into_iter()
        .map(|(device_name, record)| {
            let params: HashMap<String, f64> = DeviceRecord::deserialize(record)
                .map(|record| {
                    record
                        .parameters
                        .into_iter()
                        .filter(|p| !p.name.is_empty())
                        .map(|p| (p.name, p.value.as_ref().map_or(0.0, parameter_value)))
                        .collect()
                })
                .unwrap_or_default();
            frame_from_params(device_name, &params)
        })
        .collect())
}

fn frame_from_params(device_name: String, params: &HashMap<String, f64>) -> GloveFrame {
    let value = |name: &str| params.get(name).copied().unwrap_or(0.0);
    let angles = |prefix: char| {
        JOINT_CHANNELS.map(|channel| -value(&format!("{}{}", prefix, channel)) as f32)
    };
    GloveFrame {
        device_name,
        left_calibrated: value("L_CalibrationStatus") == CALIBRATED,
        right_calibrated: value("R_CalibrationStatus") == CALIBRATED,
        left_angles: angles('l'),
        right_angles: angles('r'),
    }
}
