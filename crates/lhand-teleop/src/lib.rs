//! # LHand Teleop
//!
//! 数据手套遥操作：UDP 数据报 → [`GloveFrame`] → 关节角度目标。
//!
//! ```text
//! UDP socket ──► GloveReceiver 线程 ──► crossbeam channel ──► TeleopBridge ──► MotionEngine
//! ```

mod bridge;
mod error;
mod frame;
mod receiver;

pub use bridge::{BridgeConfig, FrameOutcome, TeleopBridge, TeleopSession};
pub use error::TeleopError;
pub use frame::{CALIBRATED, GloveFrame, JOINT_CHANNELS, decode_datagram};
pub use receiver::{DEFAULT_BIND, GloveReceiver};
