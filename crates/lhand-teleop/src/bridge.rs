//! 手套帧 → 引擎遥操作目标
//!
//! 桥持有引擎的遥操作租约；其它生产者（循环、抓握、`stop()`）启动后租约失效，
//! 桥随即退出消费循环，不会与它们争抢电机。

use crate::error::TeleopError;
use crate::frame::GloveFrame;
use crate::receiver::GloveReceiver;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use lhand_motion::{AngleRequest, MotionEngine, TeleopLease};
use lhand_protocol::HandSide;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

const RECV_POLL: Duration = Duration::from_millis(100);

/// 桥配置
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeConfig {
    /// 跟随哪只手的数据
    pub hand: HandSide,
    /// 只接受名称以此开头的设备
    pub device_prefix: String,
    pub angular_velocity: f32,
    /// 最大电流 (mA)
    pub max_current: i32,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            hand: HandSide::Right,
            device_prefix: "teleop_".to_string(),
            angular_velocity: 200.0,
            max_current: 1000,
        }
    }
}

/// 单帧处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// 目标已下发
    Applied,
    /// 设备名前缀不匹配
    Filtered,
    /// 选定的手未校准
    Uncalibrated,
    /// 设备调用失败（不重试）
    Rejected,
    /// 租约已失效
    Superseded,
}

/// 遥操作桥
pub struct TeleopBridge {
    engine: MotionEngine,
    config: BridgeConfig,
    lease: TeleopLease,
    applied: AtomicU64,
}

impl TeleopBridge {
    /// 让引擎进入 `TeleopActive` 并取得租约
    ///
    /// # 错误
    ///
    /// - `TeleopError::Motion`: 未连接或旧生产者未能及时退出
    pub fn start(engine: MotionEngine, config: BridgeConfig) -> Result<Self, TeleopError> {
        let lease = engine.start_teleop()?;
        info!(
            "Teleop bridge following {:?} hand of '{}*' devices",
            config.hand, config.device_prefix
        );
        Ok(Self {
            engine,
            config,
            lease,
            applied: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// 租约是否仍然有效
    pub fn is_active(&self) -> bool {
        self.engine.teleop_active(&self.lease)
    }

    /// 已下发的目标数
    pub fn applied_frames(&self) -> u64 {
        self.applied.load(Ordering::Relaxed)
    }

    pub fn handle_frame(&self, frame: &GloveFrame) -> FrameOutcome {
        if !frame.device_name.starts_with(&self.config.device_prefix) {
            trace!("Ignoring glove device '{}'", frame.device_name);
            return FrameOutcome::Filtered;
        }
        if !frame.is_calibrated(self.config.hand) {
            debug!(
                "Glove '{}' {:?} hand not calibrated",
                frame.device_name, self.config.hand
            );
            return FrameOutcome::Uncalibrated;
        }

        let request = AngleRequest {
            angles: frame.angles(self.config.hand).to_vec(),
            angular_velocity: self.config.angular_velocity,
            max_current: self.config.max_current,
            settle_wait: Duration::ZERO,
        };
        match self.engine.teleop_move(&self.lease, &request) {
            Ok(true) => {
                self.applied.fetch_add(1, Ordering::Relaxed);
                FrameOutcome::Applied
            },
            Ok(false) => FrameOutcome::Superseded,
            Err(e) => {
                warn!("Teleop target rejected: {}", e);
                FrameOutcome::Rejected
            },
        }
    }

    /// 消费帧直到 `is_running` 被清除、通道关闭或租约失效
    pub fn run(&self, frames: &Receiver<GloveFrame>, is_running: &AtomicBool) {
        while is_running.load(Ordering::Acquire) {
            match frames.recv_timeout(RECV_POLL) {
                Ok(frame) => {
                    if self.handle_frame(&frame) == FrameOutcome::Superseded {
                        info!("Teleop lease superseded, bridge exiting");
                        return;
                    }
                },
                Err(RecvTimeoutError::Timeout) => {
                    if !self.is_active() {
                        info!("Teleop lease superseded, bridge exiting");
                        return;
                    }
                },
                Err(RecvTimeoutError::Disconnected) => {
                    debug!("Glove frame channel closed");
                    return;
                },
            }
        }
    }

    /// 交还租约；租约已失效时不影响引擎当前的生产者
    pub fn stop(&self) {
        if self.is_active() {
            self.engine.stop_teleop();
        }
    }
}

/// UDP 接收 + 桥线程
pub struct TeleopSession {
    receiver: GloveReceiver,
    bridge: Arc<TeleopBridge>,
    is_running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl TeleopSession {
    /// 绑定 UDP 并开始跟随
    ///
    /// 先绑定端口，绑定失败时引擎状态不变。
    pub fn start(
        engine: MotionEngine,
        bind: &str,
        config: BridgeConfig,
    ) -> Result<Self, TeleopError> {
        let receiver = GloveReceiver::bind(bind)?;
        let bridge = Arc::new(TeleopBridge::start(engine, config)?);
        let is_running = Arc::new(AtomicBool::new(true));

        let worker = {
            let bridge = bridge.clone();
            let is_running = is_running.clone();
            let frames = receiver.frames();
            std::thread::Builder::new()
                .name("lhand-teleop".into())
                .spawn(move || {
                    bridge.run(&frames, &is_running);
                    is_running.store(false, Ordering::Release);
                })
        };
        let worker = match worker {
            Ok(worker) => worker,
            Err(e) => {
                bridge.stop();
                return Err(TeleopError::Spawn(e));
            },
        };

        Ok(Self {
            receiver,
            bridge,
            is_running,
            worker: Some(worker),
        })
    }

    pub fn local_addr(&self) -> std::net::SocketAddr {
        self.receiver.local_addr()
    }

    /// 桥线程是否仍在跟随
    pub fn is_active(&self) -> bool {
        self.is_running.load(Ordering::Acquire) && self.bridge.is_active()
    }

    pub fn bridge(&self) -> &TeleopBridge {
        &self.bridge
    }

    /// 停止接收与桥线程并交还租约（可重复调用）
    pub fn stop(&mut self) {
        self.is_running.store(false, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("Teleop bridge thread panicked");
            }
            self.receiver.stop();
            self.bridge.stop();
            info!("Glove teleoperation stopped");
        }
    }
}

impl Drop for TeleopSession {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lhand_driver::{BindingCall, DeviceBinding, SimulatedHand};
    use lhand_motion::MotionState;
    use lhand_protocol::CommMode;

    fn engine_with_hand() -> (MotionEngine, Arc<SimulatedHand>) {
        let hand = Arc::new(SimulatedHand::new(6, 6));
        hand.initialize(CommMode::CanFd).unwrap();
        let engine = MotionEngine::default();
        engine.attach_binding(hand.clone()).unwrap();
        (engine, hand)
    }

    fn frame(name: &str, calibrated: bool) -> GloveFrame {
        GloveFrame {
            device_name: name.to_string(),
            right_calibrated: calibrated,
            right_angles: [10.0, 20.0, 30.0, 40.0, 50.0, 60.0],
            ..GloveFrame::default()
        }
    }

    #[test]
    fn test_prefix_and_calibration_filters() {
        let (engine, hand) = engine_with_hand();
        let bridge = TeleopBridge::start(engine.clone(), BridgeConfig::default()).unwrap();
        assert_eq!(engine.state(), MotionState::TeleopActive);

        assert_eq!(bridge.handle_frame(&frame("other_1", true)), FrameOutcome::Filtered);
        assert_eq!(
            bridge.handle_frame(&frame("teleop_1", false)),
            FrameOutcome::Uncalibrated
        );
        assert_eq!(hand.count("move_motors"), 0);

        assert_eq!(bridge.handle_frame(&frame("teleop_1", true)), FrameOutcome::Applied);
        assert_eq!(hand.count("move_motors"), 1);
        assert!(hand.calls().contains(&BindingCall::SetTargetAngle {
            joint: 3,
            angle: 30.0
        }));
        assert_eq!(bridge.applied_frames(), 1);

        bridge.stop();
        assert_eq!(engine.state(), MotionState::Ready);
    }

    #[test]
    fn test_left_hand_selection() {
        let (engine, _hand) = engine_with_hand();
        let config = BridgeConfig {
            hand: HandSide::Left,
            ..BridgeConfig::default()
        };
        let bridge = TeleopBridge::start(engine, config).unwrap();
        // 只有右手校准
        assert_eq!(
            bridge.handle_frame(&frame("teleop_1", true)),
            FrameOutcome::Uncalibrated
        );
    }

    #[test]
    fn test_superseded_after_stop_teleop() {
        let (engine, hand) = engine_with_hand();
        let bridge = TeleopBridge::start(engine.clone(), BridgeConfig::default()).unwrap();
        engine.stop_teleop();
        assert!(!bridge.is_active());
        assert_eq!(
            bridge.handle_frame(&frame("teleop_1", true)),
            FrameOutcome::Superseded
        );
        assert_eq!(hand.count("move_motors"), 0);
    }

    #[test]
    fn test_device_error_is_rejected() {
        let (engine, hand) = engine_with_hand();
        let bridge = TeleopBridge::start(engine, BridgeConfig::default()).unwrap();
        hand.fail_on("move_motors", lhand_protocol::VendorErrorCode::CommSend);
        assert_eq!(bridge.handle_frame(&frame("teleop_1", true)), FrameOutcome::Rejected);
        assert!(bridge.is_active());
    }

    #[test]
    fn test_start_requires_connection() {
        let engine = MotionEngine::default();
        assert!(matches!(
            TeleopBridge::start(engine, BridgeConfig::default()),
            Err(TeleopError::Motion(lhand_motion::MotionError::NotConnected))
        ));
    }
}
