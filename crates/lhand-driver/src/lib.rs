//! # LHand Driver
//!
//! 设备层：把一个传输（CAN-FD 总线或 EtherCAT 周期链路）和厂商运动库绑定在一起。
//!
//! - [`DeviceBinding`]：厂商运动库能力（初始化、设定目标、运动、停止、回零、报警）
//! - [`FrameSink`]：厂商库出站字节的发送钩子
//! - [`pipeline`]：后台 IO 泵（总线轮询接收 / 周期交换）
//! - [`DeviceSession`]：一次连接的生命周期，由 [`SessionBuilder`] 建立
//! - [`sim`]：仿真手，用于无硬件运行和测试

mod binding;
mod error;
pub mod metrics;
pub mod pipeline;
mod session;
pub mod sim;

pub use binding::{BindingFactory, DeviceBinding, FrameSink};
pub use error::ConnectError;
pub use metrics::{PumpMetrics, PumpSnapshot};
pub use pipeline::{PumpConfig, bus_pump_loop, cyclic_pump_loop};
pub use session::{DeviceSession, SessionBuilder, TransportKind};
pub use sim::{BindingCall, SimulatedHand};
