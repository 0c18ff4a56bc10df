//! 后台泵计数器
//!
//! 原子计数，泵线程写、任意线程读，不加锁。

use std::sync::atomic::{AtomicU64, Ordering};

/// 后台泵指标
#[derive(Debug, Default)]
pub struct PumpMetrics {
    /// 收到并交给绑定解码的帧
    pub rx_frames: AtomicU64,
    /// 因 ID 不匹配被丢弃的帧
    pub rx_filtered: AtomicU64,
    /// 接收超时次数（正常情况）
    pub rx_timeouts: AtomicU64,
    /// 接收错误
    pub rx_errors: AtomicU64,
    /// 解码错误
    pub decode_errors: AtomicU64,
    /// 出站发送次数
    pub tx_frames: AtomicU64,
    /// 出站发送错误
    pub tx_errors: AtomicU64,
    /// 周期交换次数
    pub exchanges: AtomicU64,
    /// 周期交换错误
    pub exchange_errors: AtomicU64,
}

/// 指标快照
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PumpSnapshot {
    pub rx_frames: u64,
    pub rx_filtered: u64,
    pub rx_timeouts: u64,
    pub rx_errors: u64,
    pub decode_errors: u64,
    pub tx_frames: u64,
    pub tx_errors: u64,
    pub exchanges: u64,
    pub exchange_errors: u64,
}

impl PumpMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> PumpSnapshot {
        PumpSnapshot {
            rx_frames: self.rx_frames.load(Ordering::Relaxed),
            rx_filtered: self.rx_filtered.load(Ordering::Relaxed),
            rx_timeouts: self.rx_timeouts.load(Ordering::Relaxed),
            rx_errors: self.rx_errors.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            tx_frames: self.tx_frames.load(Ordering::Relaxed),
            tx_errors: self.tx_errors.load(Ordering::Relaxed),
            exchanges: self.exchanges.load(Ordering::Relaxed),
            exchange_errors: self.exchange_errors.load(Ordering::Relaxed),
        }
    }
}
