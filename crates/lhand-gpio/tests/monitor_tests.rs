//! 边沿监听集成测试（MockGpio）
//!
//! 验证：
//! 1. 轮询模式：窗口内松开不触发；保持按下只触发一次，约在窗口到期时
//! 2. 处理器错误与 panic 不会停止监听，也不影响其它引脚
//! 3. 中断模式：窗口内的连续通知只接受一次
//! 4. 停止后不再触发
//! 5. 起始电平在 start() 返回前读取

use lhand_gpio::mock::MockGpio;
use lhand_gpio::{DebounceStrategy, EdgeMonitor, GpioBackend, GpioError, Pull, pins};
use serial_test::serial;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

const DEBOUNCE: Duration = Duration::from_millis(300);

fn polling() -> DebounceStrategy {
    DebounceStrategy::Polling {
        interval: Duration::from_millis(10),
    }
}

fn counter() -> (Arc<AtomicUsize>, impl Fn() -> lhand_gpio::HandlerResult + Send + Sync + 'static) {
    let count = Arc::new(AtomicUsize::new(0));
    let handler_count = count.clone();
    (count, move || {
        handler_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    })
}

/// 注册时配置为下拉输入
#[test]
fn test_register_configures_pull_down() {
    let gpio = Arc::new(MockGpio::new());
    let mut monitor = EdgeMonitor::new(gpio.clone(), polling());
    monitor
        .register(pins::START_MOTION, DEBOUNCE, || Ok(()))
        .unwrap();
    assert_eq!(
        gpio.input_config(pins::START_MOTION).map(|(pull, _)| pull),
        Some(Pull::Down)
    );
    assert_eq!(
        monitor.register(pins::START_MOTION, DEBOUNCE, || Ok(())),
        Err(GpioError::AlreadyConfigured(pins::START_MOTION))
    );
}

/// 0ms 上升、50ms 下降、去抖 300ms：永不触发
#[test]
#[serial]
fn test_polling_short_press_is_rejected() {
    let gpio = Arc::new(MockGpio::new());
    let (count, handler) = counter();
    let mut monitor = EdgeMonitor::new(gpio.clone(), polling());
    monitor.register(pins::CONNECT, DEBOUNCE, handler).unwrap();
    monitor.start().unwrap();

    gpio.set_input(pins::CONNECT, true);
    std::thread::sleep(Duration::from_millis(50));
    gpio.set_input(pins::CONNECT, false);
    std::thread::sleep(Duration::from_millis(600));

    monitor.shutdown();
    assert_eq!(count.load(Ordering::SeqCst), 0);
}

/// 保持按下超过 300ms：只触发一次，时间约为 300ms
#[test]
#[serial]
fn test_polling_long_press_fires_once() {
    let gpio = Arc::new(MockGpio::new());
    let fired_at = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let mut monitor = EdgeMonitor::new(gpio.clone(), polling());
    {
        let fired_at = fired_at.clone();
        monitor
            .register(pins::CONNECT, DEBOUNCE, move || {
                fired_at.lock().push(Instant::now());
                Ok(())
            })
            .unwrap();
    }
    monitor.start().unwrap();

    let pressed = Instant::now();
    gpio.set_input(pins::CONNECT, true);
    std::thread::sleep(Duration::from_millis(1000));
    monitor.shutdown();

    let fired_at = fired_at.lock();
    assert_eq!(fired_at.len(), 1);
    let delay = fired_at[0].duration_since(pressed);
    assert!(delay >= DEBOUNCE, "fired too early: {:?}", delay);
    assert!(delay < DEBOUNCE + Duration::from_millis(200), "fired too late: {:?}", delay);
}

/// start() 返回时起始电平已读取；紧随其后的按下正常触发
#[test]
#[serial]
fn test_press_right_after_start_fires() {
    let gpio = Arc::new(MockGpio::new());
    let (count, handler) = counter();
    let mut monitor = EdgeMonitor::new(gpio.clone(), polling());
    monitor
        .register(pins::CONNECT, Duration::from_millis(30), handler)
        .unwrap();
    monitor.start().unwrap();
    assert!(gpio.reads() >= 1);

    gpio.set_input(pins::CONNECT, true);
    std::thread::sleep(Duration::from_millis(200));
    monitor.shutdown();
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

/// 启动时已按下的按键不触发，松开再按才触发
#[test]
#[serial]
fn test_held_at_start_is_ignored() {
    let gpio = Arc::new(MockGpio::new());
    let (count, handler) = counter();
    let mut monitor = EdgeMonitor::new(gpio.clone(), polling());
    monitor
        .register(pins::CONNECT, Duration::from_millis(30), handler)
        .unwrap();
    gpio.set_input(pins::CONNECT, true);
    monitor.start().unwrap();

    std::thread::sleep(Duration::from_millis(150));
    assert_eq!(count.load(Ordering::SeqCst), 0);

    gpio.set_input(pins::CONNECT, false);
    std::thread::sleep(Duration::from_millis(50));
    gpio.set_input(pins::CONNECT, true);
    std::thread::sleep(Duration::from_millis(150));
    monitor.shutdown();
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

/// 松开后再次按下会重新触发
#[test]
#[serial]
fn test_polling_rearms_after_release() {
    let gpio = Arc::new(MockGpio::new());
    let (count, handler) = counter();
    let mut monitor = EdgeMonitor::new(gpio.clone(), polling());
    monitor
        .register(pins::START_GRASP, Duration::from_millis(50), handler)
        .unwrap();
    monitor.start().unwrap();

    for _ in 0..2 {
        gpio.set_input(pins::START_GRASP, true);
        std::thread::sleep(Duration::from_millis(200));
        gpio.set_input(pins::START_GRASP, false);
        std::thread::sleep(Duration::from_millis(100));
    }
    monitor.shutdown();
    assert_eq!(count.load(Ordering::SeqCst), 2);
}

/// 处理器返回错误或 panic：监听继续，其它引脚照常触发
#[test]
#[serial]
fn test_handler_failures_are_contained() {
    let gpio = Arc::new(MockGpio::new());
    let (count, handler) = counter();
    let mut monitor = EdgeMonitor::new(gpio.clone(), polling());
    let window = Duration::from_millis(30);
    monitor
        .register(pins::STOP_MOTION, window, || Err("device busy".into()))
        .unwrap();
    monitor
        .register(pins::DISCONNECT, window, || panic!("handler bug"))
        .unwrap();
    monitor.register(pins::START_MOTION, window, handler).unwrap();
    monitor.start().unwrap();

    gpio.set_input(pins::STOP_MOTION, true);
    gpio.set_input(pins::DISCONNECT, true);
    std::thread::sleep(Duration::from_millis(150));
    gpio.set_input(pins::START_MOTION, true);
    std::thread::sleep(Duration::from_millis(150));

    assert!(monitor.is_running());
    monitor.shutdown();
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

/// 中断模式：窗口内的抖动通知只接受第一次
#[test]
#[serial]
fn test_interrupt_soft_debounce() {
    let gpio = Arc::new(MockGpio::new());
    let (count, handler) = counter();
    let mut monitor = EdgeMonitor::new(gpio.clone(), DebounceStrategy::Interrupt);
    monitor.register(pins::START_GLOVE_LISTEN, DEBOUNCE, handler).unwrap();
    monitor.start().unwrap();

    for _ in 0..5 {
        gpio.inject_edge(pins::START_GLOVE_LISTEN, true);
        std::thread::sleep(Duration::from_millis(10));
    }
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(count.load(Ordering::SeqCst), 1);

    // 窗口过后再次接受
    std::thread::sleep(DEBOUNCE);
    gpio.inject_edge(pins::START_GLOVE_LISTEN, true);
    std::thread::sleep(Duration::from_millis(100));
    monitor.shutdown();
    assert_eq!(count.load(Ordering::SeqCst), 2);
}

/// 停止后不再采样，也不能重复注册
#[test]
#[serial]
fn test_shutdown_stops_sampling() {
    let gpio = Arc::new(MockGpio::new());
    let (count, handler) = counter();
    let mut monitor = EdgeMonitor::new(gpio.clone(), polling());
    monitor.register(pins::CONNECT, Duration::ZERO, handler).unwrap();
    monitor.start().unwrap();
    assert_eq!(monitor.start(), Err(GpioError::AlreadyRunning));
    assert_eq!(
        monitor.register(pins::DISCONNECT, DEBOUNCE, || Ok(())),
        Err(GpioError::AlreadyRunning)
    );

    monitor.shutdown();
    let reads = gpio.reads();
    gpio.set_input(pins::CONNECT, true);
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(gpio.reads(), reads);
    assert_eq!(count.load(Ordering::SeqCst), 0);
    assert!(gpio.read(pins::CONNECT).unwrap());
}
