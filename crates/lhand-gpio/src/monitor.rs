//! 边沿监听
//!
//! 两种策略共用一个接口：
//!
//! - 轮询：一个线程按固定周期采样全部输入，[`Debouncer::sample`] 两级去抖，
//!   到期后再读一次电平确认
//! - 中断：每个引脚一个线程阻塞在 [`GpioBackend::wait_for_edge`]，
//!   [`Debouncer::notify`] 软去抖
//!
//! 两种策略都保证每个引脚每个去抖窗口最多调用一次处理器。处理器返回的错误和
//! panic 都只记录日志，不会停止监听或影响其它引脚。

use crate::backend::{Edge, GpioBackend, Pull};
use crate::debounce::{DebounceStrategy, Debouncer};
use crate::error::GpioError;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

/// 处理器返回值
pub type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// 命令处理器
pub type GpioHandler = Arc<dyn Fn() -> HandlerResult + Send + Sync>;

/// 中断模式单次等待上限，决定停止响应时间
const EDGE_WAIT: Duration = Duration::from_millis(100);

#[derive(Clone)]
struct InputChannel {
    pin: u8,
    debounce: Duration,
    handler: GpioHandler,
}

/// GPIO 边沿监听器
pub struct EdgeMonitor {
    backend: Arc<dyn GpioBackend>,
    strategy: DebounceStrategy,
    channels: Vec<InputChannel>,
    is_running: Arc<AtomicBool>,
    workers: Vec<JoinHandle<()>>,
}

impl EdgeMonitor {
    pub fn new(backend: Arc<dyn GpioBackend>, strategy: DebounceStrategy) -> Self {
        Self {
            backend,
            strategy,
            channels: Vec::new(),
            is_running: Arc::new(AtomicBool::new(false)),
            workers: Vec::new(),
        }
    }

    pub fn strategy(&self) -> DebounceStrategy {
        self.strategy
    }

    /// 注册输入引脚（下拉、上升沿）与处理器
    ///
    /// # 错误
    ///
    /// - `GpioError::AlreadyRunning`: 监听已启动
    /// - `GpioError::AlreadyConfigured`: 引脚已注册
    pub fn register<F>(&mut self, pin: u8, debounce: Duration, handler: F) -> Result<(), GpioError>
    where
        F: Fn() -> HandlerResult + Send + Sync + 'static,
    {
        if self.is_running() {
            return Err(GpioError::AlreadyRunning);
        }
        if self.channels.iter().any(|c| c.pin == pin) {
            return Err(GpioError::AlreadyConfigured(pin));
        }
        self.backend.configure_input(pin, Pull::Down, Edge::Rising)?;
        self.channels.push(InputChannel {
            pin,
            debounce,
            handler: Arc::new(handler),
        });
        debug!("GPIO {} registered, debounce {:?}", pin, debounce);
        Ok(())
    }

    pub fn pins(&self) -> Vec<u8> {
        self.channels.iter().map(|c| c.pin).collect()
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Acquire)
    }

    /// 启动监听线程
    pub fn start(&mut self) -> Result<(), GpioError> {
        if self.is_running() {
            return Err(GpioError::AlreadyRunning);
        }
        self.is_running.store(true, Ordering::Release);

        let spawned = match self.strategy {
            DebounceStrategy::Polling { interval } => self.spawn_polling(interval),
            DebounceStrategy::Interrupt => self.spawn_interrupt(),
        };
        if let Err(e) = spawned {
            self.shutdown();
            return Err(e);
        }
        info!(
            "GPIO monitor started ({:?}, {} inputs)",
            self.strategy,
            self.channels.len()
        );
        Ok(())
    }

    /// 在调用线程读取起始电平，`start()` 返回后的按下都从低电平开始计时
    fn primed_channels(&self) -> Vec<(InputChannel, Debouncer)> {
        self.channels
            .iter()
            .map(|channel| {
                let mut debouncer = Debouncer::new(channel.debounce);
                let level = self.backend.read(channel.pin).unwrap_or_else(|e| {
                    warn!("GPIO {} initial read failed: {}", channel.pin, e);
                    false
                });
                debouncer.prime(level);
                (channel.clone(), debouncer)
            })
            .collect()
    }

    fn spawn_polling(&mut self, interval: Duration) -> Result<(), GpioError> {
        let backend = self.backend.clone();
        let states = self.primed_channels();
        let is_running = self.is_running.clone();
        let handle = std::thread::Builder::new()
            .name("lhand-gpio-poll".into())
            .spawn(move || poll_loop(backend, states, interval, is_running))
            .map_err(|e| GpioError::Backend(e.to_string()))?;
        self.workers.push(handle);
        Ok(())
    }

    fn spawn_interrupt(&mut self) -> Result<(), GpioError> {
        for channel in self.channels.clone() {
            let backend = self.backend.clone();
            let is_running = self.is_running.clone();
            let handle = std::thread::Builder::new()
                .name(format!("lhand-gpio-irq-{}", channel.pin))
                .spawn(move || interrupt_loop(backend, channel, is_running))
                .map_err(|e| GpioError::Backend(e.to_string()))?;
            self.workers.push(handle);
        }
        Ok(())
    }

    /// 停止并 join 所有监听线程（可重复调用）
    pub fn shutdown(&mut self) {
        self.is_running.store(false, Ordering::Release);
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                error!("GPIO monitor thread panicked");
            }
        }
    }
}

impl Drop for EdgeMonitor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn dispatch(channel: &InputChannel) {
    info!("GPIO {} triggered", channel.pin);
    match catch_unwind(AssertUnwindSafe(|| (channel.handler)())) {
        Ok(Ok(())) => {},
        Ok(Err(e)) => error!("GPIO {} handler failed: {}", channel.pin, e),
        Err(_) => error!("GPIO {} handler panicked", channel.pin),
    }
}

fn poll_loop(
    backend: Arc<dyn GpioBackend>,
    mut states: Vec<(InputChannel, Debouncer)>,
    interval: Duration,
    is_running: Arc<AtomicBool>,
) {
    while is_running.load(Ordering::Acquire) {
        let now = Instant::now();
        for (channel, debouncer) in states.iter_mut() {
            let level = match backend.read(channel.pin) {
                Ok(level) => level,
                Err(e) => {
                    trace!("GPIO {} read failed: {}", channel.pin, e);
                    continue;
                },
            };
            if !debouncer.sample(level, now) {
                continue;
            }
            // 二次确认
            match backend.read(channel.pin) {
                Ok(true) => dispatch(channel),
                Ok(false) => debug!("GPIO {} released before confirmation", channel.pin),
                Err(e) => warn!("GPIO {} confirmation read failed: {}", channel.pin, e),
            }
        }
        spin_sleep::sleep(interval);
    }
    debug!("GPIO poll loop exited");
}

fn interrupt_loop(backend: Arc<dyn GpioBackend>, channel: InputChannel, is_running: Arc<AtomicBool>) {
    let mut debouncer = Debouncer::new(channel.debounce);
    while is_running.load(Ordering::Acquire) {
        match backend.wait_for_edge(channel.pin, EDGE_WAIT) {
            Ok(Some(true)) => {
                if debouncer.notify(Instant::now()) {
                    dispatch(&channel);
                } else {
                    trace!("GPIO {} edge inside debounce window", channel.pin);
                }
            },
            Ok(Some(false)) | Ok(None) => {},
            Err(e) => {
                error!("GPIO {} interrupt wait failed, listener stopped: {}", channel.pin, e);
                break;
            },
        }
    }
    debug!("GPIO {} interrupt loop exited", channel.pin);
}
