//! 引脚布局（BCM 编号）
//!
//! 输入（下拉，上升沿有效）：
//!
//! | BCM | 物理引脚 | 命令 |
//! |---|---|---|
//! | 17 | 11 | 开始循环运动 |
//! | 27 | 13 | 停止运动并回零 |
//! | 22 | 15 | 开始抓握 |
//! | 23 | 16 | 连接设备 |
//! | 24 | 18 | 断开设备 |
//! | 25 | 22 | 开始手套监听 |
//!
//! 输出：循环完成脉冲 5/6/13/19（按设备槽选择），就绪 16，运行 20，连接 LED 21。
//! RGB 指示灯 12/18/26。

pub const START_MOTION: u8 = 17;
pub const STOP_MOTION: u8 = 27;
pub const START_GRASP: u8 = 22;
pub const CONNECT: u8 = 23;
pub const DISCONNECT: u8 = 24;
pub const START_GLOVE_LISTEN: u8 = 25;

/// 循环完成信号，按设备槽索引
pub const CYCLE_COMPLETE: [u8; 4] = [5, 6, 13, 19];
pub const READY_STATUS: u8 = 16;
pub const RUNNING_STATUS: u8 = 20;
pub const STATUS_LED: u8 = 21;

pub const RGB_R: u8 = 12;
pub const RGB_G: u8 = 18;
pub const RGB_B: u8 = 26;

/// 所有命令输入引脚
pub const INPUTS: [u8; 6] = [
    START_MOTION,
    STOP_MOTION,
    START_GRASP,
    CONNECT,
    DISCONNECT,
    START_GLOVE_LISTEN,
];

/// 设备槽对应的循环完成引脚，越界返回 `None`
pub fn cycle_complete_pin(slot: usize) -> Option<u8> {
    CYCLE_COMPLETE.get(slot).copied()
}
