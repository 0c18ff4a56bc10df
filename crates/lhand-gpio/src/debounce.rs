//! 去抖状态机
//!
//! [`Debouncer`] 不读硬件也不看时钟，调用方传入电平和 `Instant`，
//! 因此可以用构造的时间序列直接测试。

use std::time::{Duration, Instant};

/// 去抖策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebounceStrategy {
    /// 固定周期采样，两级去抖
    Polling { interval: Duration },
    /// 平台边沿通知，按“距上次接受的触发”软去抖
    Interrupt,
}

impl Default for DebounceStrategy {
    fn default() -> Self {
        DebounceStrategy::Polling {
            interval: Duration::from_millis(10),
        }
    }
}

/// 单引脚去抖状态
///
/// `pending_since` 只在 `last_level == true` 时存在，电平下降或确认触发后清除。
#[derive(Debug, Clone)]
pub struct Debouncer {
    window: Duration,
    last_level: bool,
    pending_since: Option<Instant>,
    last_fire: Option<Instant>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_level: false,
            pending_since: None,
            last_fire: None,
        }
    }

    /// 以当前电平作为起点，启动时已经按下的按键不会触发
    pub fn prime(&mut self, level: bool) {
        self.last_level = level;
        self.pending_since = None;
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn is_pending(&self) -> bool {
        self.pending_since.is_some()
    }

    /// 轮询采样，返回 `true` 表示应当触发（调用方再读一次确认）
    ///
    /// - 上升沿：开始计时
    /// - 窗口内下降沿：取消，不触发
    /// - 窗口到期仍为高：触发一次并清除；直到新的下降-上升沿才会再次计时
    pub fn sample(&mut self, level: bool, now: Instant) -> bool {
        match (self.last_level, level) {
            (false, true) => self.pending_since = Some(now),
            (true, false) => self.pending_since = None,
            _ => {},
        }
        self.last_level = level;

        if let Some(since) = self.pending_since
            && now.saturating_duration_since(since) >= self.window
        {
            self.pending_since = None;
            return true;
        }
        false
    }

    /// 中断通知，距上次接受的触发不足一个窗口则拒绝
    pub fn notify(&mut self, now: Instant) -> bool {
        if let Some(last) = self.last_fire
            && now.saturating_duration_since(last) < self.window
        {
            return false;
        }
        self.last_fire = Some(now);
        true
    }
}
