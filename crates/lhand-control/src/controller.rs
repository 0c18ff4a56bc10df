//! # 控制器
//!
//! 把 GPIO 按键命令映射到运动引擎操作，并用状态输出与 RGB 灯反映引擎状态。
//!
//! | 输入 | 命令 |
//! |---|---|
//! | START_MOTION | 开始循环运动 |
//! | STOP_MOTION | 停止并回零 |
//! | START_GRASP | 抓握序列 |
//! | CONNECT / DISCONNECT | 连接 / 断开 |
//! | START_GLOVE_LISTEN | 手套遥操作 |
//!
//! 处理器在监听线程上同步执行；循环与抓握在引擎自己的工作线程中运行。

use crate::config::HandConfig;
use crate::connector::Connector;
use crate::indicators::{IndicatorObserver, Indicators};
use anyhow::{Context, Result};
use lhand_gpio::{Color, EdgeMonitor, GpioBackend, pins};
use lhand_motion::{CycleReport, MotionEngine, MotionError};
use lhand_teleop::TeleopSession;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, warn};

type Worker = JoinHandle<Result<CycleReport, MotionError>>;
type Command = fn(&Inner) -> Result<()>;

/// 主循环检查关闭标志的间隔
const SHUTDOWN_POLL: Duration = Duration::from_millis(100);

struct Inner {
    config: HandConfig,
    engine: MotionEngine,
    connector: Connector,
    indicators: Option<Indicators>,
    glove: Mutex<Option<TeleopSession>>,
    worker: Mutex<Option<Worker>>,
}

/// 灵巧手控制器
pub struct Controller {
    inner: Arc<Inner>,
    gpio: Option<Arc<dyn GpioBackend>>,
    monitor: Mutex<Option<EdgeMonitor>>,
}

impl Controller {
    /// 创建控制器
    ///
    /// 提供 `gpio` 时配置全部输入输出（灯初始为黄色），但监听在 [`start_gpio`](Self::start_gpio)
    /// 或 [`run_until`](Self::run_until) 时才开始。
    pub fn new(
        config: HandConfig,
        connector: Connector,
        gpio: Option<Arc<dyn GpioBackend>>,
    ) -> Result<Self> {
        let engine = MotionEngine::new(config.engine_config());

        let indicators = match &gpio {
            Some(backend) => {
                let indicators =
                    Indicators::setup(backend.clone(), config.gpio.device_slot, config.pulse())
                        .context("Failed to configure GPIO outputs")?;
                engine.subscribe(Arc::new(IndicatorObserver::new(indicators.clone())));
                Some(indicators)
            },
            None => None,
        };

        let inner = Arc::new(Inner {
            config,
            engine,
            connector,
            indicators,
            glove: Mutex::new(None),
            worker: Mutex::new(None),
        });

        let monitor = match &gpio {
            Some(backend) => Some(
                register_commands(backend.clone(), &inner)
                    .context("Failed to configure GPIO inputs")?,
            ),
            None => None,
        };

        Ok(Self {
            inner,
            gpio,
            monitor: Mutex::new(monitor),
        })
    }

    pub fn engine(&self) -> &MotionEngine {
        &self.inner.engine
    }

    pub fn config(&self) -> &HandConfig {
        &self.inner.config
    }

    /// 当前状态灯颜色（无 GPIO 时为 `None`）
    pub fn light(&self) -> Option<Color> {
        self.inner.indicators.as_ref().map(Indicators::color)
    }

    /// 是否正在监听手套
    pub fn glove_active(&self) -> bool {
        self.inner.glove_active()
    }

    /// 开始 GPIO 监听（无 GPIO 或已启动时无操作）
    pub fn start_gpio(&self) -> Result<()> {
        if let Some(monitor) = self.monitor.lock().as_mut()
            && !monitor.is_running()
        {
            monitor.start().context("Failed to start GPIO monitor")?;
            info!("GPIO monitor listening on pins {:?}", monitor.pins());
        }
        Ok(())
    }

    // ============================================================
    // 命令
    // ============================================================

    pub fn on_connect(&self) -> Result<()> {
        self.inner.on_connect()
    }

    pub fn on_disconnect(&self) -> Result<()> {
        self.inner.on_disconnect()
    }

    pub fn on_start_motion(&self) -> Result<()> {
        self.inner.on_start_motion()
    }

    pub fn on_stop_motion(&self) -> Result<()> {
        self.inner.on_stop_motion()
    }

    pub fn on_start_grasp(&self) -> Result<()> {
        self.inner.on_start_grasp()
    }

    pub fn on_start_glove(&self) -> Result<()> {
        self.inner.on_start_glove()
    }

    /// 等待循环或抓握工作线程结束，返回其结果
    pub fn join_worker(&self) -> Option<Result<CycleReport, MotionError>> {
        let worker = self.inner.worker.lock().take()?;
        match worker.join() {
            Ok(result) => Some(result),
            Err(_) => {
                error!("Motion worker panicked");
                None
            },
        }
    }

    // ============================================================
    // 主流程
    // ============================================================

    /// 运行到 `shutdown` 被置位
    ///
    /// 启动 GPIO 监听；`auto_start` 时自动连接并开始循环（失败只记录，按键仍可重试）；
    /// 退出前停止运动与遥操作、断开并释放 GPIO。
    pub fn run_until(&self, shutdown: &AtomicBool) -> Result<()> {
        self.start_gpio()?;

        if self.inner.config.auto_start {
            match self.on_connect() {
                Ok(()) if self.inner.engine.is_connected() => {
                    if let Err(e) = self.on_start_motion() {
                        error!("Automatic start failed: {:#}", e);
                    }
                },
                Ok(()) => {},
                Err(e) => error!("Automatic connect failed: {:#}", e),
            }
        }

        info!("Controller running, waiting for commands");
        while !shutdown.load(Ordering::Acquire) {
            std::thread::sleep(SHUTDOWN_POLL);
            self.inner.reap_worker();
        }

        info!("Shutdown requested");
        self.shutdown();
        Ok(())
    }

    /// 停止一切并释放资源（可重复调用）
    pub fn shutdown(&self) {
        if let Some(mut monitor) = self.monitor.lock().take() {
            monitor.shutdown();
        }

        self.inner.stop_glove();
        let engine = &self.inner.engine;
        if engine.is_connected() {
            if engine.state().is_producer()
                && let Err(e) = engine.stop()
            {
                warn!("Failed to stop motion during shutdown: {}", e);
            }
            if let Err(e) = engine.disconnect() {
                warn!("Failed to disconnect during shutdown: {}", e);
            }
        }
        let worker = self.inner.worker.lock().take();
        if let Some(worker) = worker {
            log_worker(worker);
        }

        if let Some(indicators) = &self.inner.indicators {
            indicators.off();
        }
        if let Some(gpio) = &self.gpio {
            gpio.release();
        }
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        if let Some(mut monitor) = self.monitor.lock().take() {
            monitor.shutdown();
        }
        self.inner.stop_glove();
    }
}

/// 注册 6 个按键命令
fn register_commands(backend: Arc<dyn GpioBackend>, inner: &Arc<Inner>) -> Result<EdgeMonitor> {
    let config = &inner.config;
    let mut monitor = EdgeMonitor::new(backend, config.debounce_strategy());
    let commands: [(u8, &'static str, Command); 6] = [
        (pins::START_MOTION, "start motion", Inner::on_start_motion),
        (pins::STOP_MOTION, "stop motion", Inner::on_stop_motion),
        (pins::START_GRASP, "start grasp", Inner::on_start_grasp),
        (pins::CONNECT, "connect", Inner::on_connect),
        (pins::DISCONNECT, "disconnect", Inner::on_disconnect),
        (pins::START_GLOVE_LISTEN, "start glove", Inner::on_start_glove),
    ];

    for (pin, name, command) in commands {
        let inner = inner.clone();
        monitor.register(pin, config.debounce(), move || {
            info!("GPIO {} pressed: {}", pin, name);
            command(&inner).map_err(Into::into)
        })?;
    }
    Ok(monitor)
}

impl Inner {
    fn on_connect(&self) -> Result<()> {
        if self.engine.is_connected() {
            debug!("Already connected, ignoring connect command");
            return Ok(());
        }

        info!("Connecting ({:?})", self.config.mode.comm_mode());
        let connector = self.connector.clone();
        match self.engine.connect_with(move || connector()) {
            Ok(()) => {
                if let Some(indicators) = &self.indicators {
                    indicators.connected();
                }
                if let Some((total, active)) = self.engine.dof() {
                    info!("Connected, {} of {} joints active", active, total);
                }
                Ok(())
            },
            Err(e) => {
                if let Some(indicators) = &self.indicators {
                    indicators.disconnected();
                }
                Err(e).context("Failed to connect to hand")
            },
        }
    }

    fn on_disconnect(&self) -> Result<()> {
        if !self.engine.is_connected() {
            debug!("Not connected, ignoring disconnect command");
            return Ok(());
        }

        self.stop_glove();
        if self.engine.state().is_producer()
            && let Err(e) = self.engine.stop_motors()
        {
            warn!("stop_motors before disconnect failed: {}", e);
        }
        let result = self.engine.disconnect();
        self.reap_worker();
        if let Some(indicators) = &self.indicators {
            indicators.disconnected();
        }
        result.context("Failed to close session")?;
        info!("Disconnected");
        Ok(())
    }

    fn on_start_motion(&self) -> Result<()> {
        if !self.engine.is_connected() {
            debug!("Not connected, ignoring start command");
            return Ok(());
        }
        if self.engine.is_running() {
            debug!("Cycle already running, ignoring start command");
            return Ok(());
        }
        if self.engine.alarm_latched() {
            if let Some(indicators) = &self.indicators {
                indicators.light(Color::RED);
            }
            return Err(MotionError::AlarmActive).context("Clear the alarm before starting a cycle");
        }

        self.reap_worker();
        let cycle = self.config.motion_cycle();
        match self.engine.start_cycle(cycle) {
            Ok(worker) => {
                self.replace_worker(worker);
                info!("Motion cycle started");
                Ok(())
            },
            Err(e) => {
                self.restore_indicators();
                Err(e).context("Failed to start motion cycle")
            },
        }
    }

    fn on_stop_motion(&self) -> Result<()> {
        if !self.engine.is_connected() {
            debug!("Not connected, ignoring stop command");
            return Ok(());
        }

        self.stop_glove();
        let result = self.engine.stop();
        self.reap_worker();
        self.restore_indicators();
        result.context("Failed to stop motion")
    }

    fn on_start_grasp(&self) -> Result<()> {
        if !self.engine.is_connected() {
            debug!("Not connected, ignoring grasp command");
            return Ok(());
        }

        self.reap_worker();
        match self.engine.start_grasp(self.config.grasp_routine()) {
            Ok(worker) => {
                self.replace_worker(worker);
                info!("Grasp routine started");
                Ok(())
            },
            Err(e) => {
                self.restore_indicators();
                Err(e).context("Failed to start grasp routine")
            },
        }
    }

    fn on_start_glove(&self) -> Result<()> {
        if !self.engine.is_connected() {
            debug!("Not connected, ignoring glove command");
            return Ok(());
        }

        let mut glove = self.glove.lock();
        if glove.as_ref().is_some_and(TeleopSession::is_active) {
            debug!("Already listening for glove data");
            return Ok(());
        }
        // 被其它运动打断的旧会话
        if let Some(mut stale) = glove.take() {
            stale.stop();
        }

        let session = TeleopSession::start(
            self.engine.clone(),
            &self.config.teleop.bind,
            self.config.bridge_config(),
        )
        .context("Failed to start glove teleoperation")?;
        info!("Listening for glove data on {}", session.local_addr());
        *glove = Some(session);
        Ok(())
    }

    fn glove_active(&self) -> bool {
        self.glove
            .lock()
            .as_ref()
            .is_some_and(TeleopSession::is_active)
    }

    fn stop_glove(&self) {
        if let Some(mut session) = self.glove.lock().take() {
            session.stop();
        }
    }

    /// 记录新的工作线程；被它抢占的旧线程已经退出，直接回收
    fn replace_worker(&self, worker: Worker) {
        let previous = self.worker.lock().replace(worker);
        if let Some(previous) = previous {
            log_worker(previous);
        }
    }

    /// 工作线程结束后，回收并记录结果
    fn reap_worker(&self) {
        let finished = {
            let mut slot = self.worker.lock();
            if !slot.as_ref().is_some_and(JoinHandle::is_finished) {
                return;
            }
            slot.take()
        };
        if let Some(worker) = finished {
            log_worker(worker);
        }
    }

    /// 按引擎当前状态恢复指示
    fn restore_indicators(&self) {
        let Some(indicators) = &self.indicators else {
            return;
        };
        if !self.engine.is_connected() {
            indicators.disconnected();
        } else if self.engine.alarm_latched() {
            indicators.light(Color::RED);
        } else if !self.engine.state().is_producer() {
            indicators.ready();
        }
    }
}

fn log_worker(worker: Worker) {
    match worker.join() {
        Ok(Ok(report)) => info!(
            "Motion sequence {} finished after {} pass(es): {:?}",
            report.cycle_id, report.passes_completed, report.outcome
        ),
        Ok(Err(e)) => error!("Motion sequence failed: {}", e),
        Err(_) => error!("Motion worker panicked"),
    }
}
