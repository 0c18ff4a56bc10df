//! 运动观察者
//!
//! 回调在引擎锁之外、在产生事件的线程上执行，不应长时间阻塞。

use crate::state::MotionState;

/// 运动事件观察者（默认空实现）
pub trait MotionObserver: Send + Sync {
    /// 状态变化
    fn on_state_changed(&self, _old: MotionState, _new: MotionState) {}

    /// 循环完成一整遍（在最后一步之后、下一遍第一步之前）
    fn on_cycle_complete(&self, _cycle_id: u64, _pass: u64) {}

    /// 检测到报警并已锁存
    fn on_alarm(&self) {}
}
