//! 端点选择策略
//!
//! CAN-FD 适配器和 EtherCAT 网口共用同一套规则：
//!
//! 1. 显式给出索引 → 校验范围
//! 2. 恰好一个端点 → 自动选中
//! 3. `auto_select` → 选择 0
//! 4. 否则交给 [`OperatorPrompt`]（越界的选择重新询问，放弃则失败）

use thiserror::Error;
use tracing::{info, warn};

/// 选择失败
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SelectionError {
    #[error("No endpoints found")]
    NoEndpoints,
    #[error("Invalid endpoint index {index} (available: 0..{count})")]
    OutOfRange { index: usize, count: usize },
    #[error("No endpoint was chosen by the operator")]
    Aborted,
}

/// 操作员交互
///
/// 命令行程序提供交互实现；库默认使用 [`NonInteractive`]。
pub trait OperatorPrompt {
    /// 在候选端点中选择一个，默认项为 0；操作员放弃时返回 `None`
    fn choose(&mut self, message: &str, endpoints: &[String]) -> Option<usize>;
}

/// 不做交互：需要操作员选择时直接放弃
#[derive(Debug, Default, Clone, Copy)]
pub struct NonInteractive;

impl OperatorPrompt for NonInteractive {
    fn choose(&mut self, _message: &str, endpoints: &[String]) -> Option<usize> {
        warn!(
            "{} endpoints found and no prompt available; set a device index or enable auto-select",
            endpoints.len()
        );
        None
    }
}

/// 选择端点
///
/// # 参数
/// - `endpoints`: 端点名称列表（按扫描顺序）
/// - `explicit`: 调用方显式指定的索引
/// - `auto_select`: 多个端点时是否自动选择第一个
/// - `prompt`: 需要交互时使用的操作员输入
///
/// # 示例
///
/// ```rust
/// use lhand_transport::{select_endpoint, NonInteractive};
///
/// let endpoints = vec!["can0".to_string()];
/// // 只有一个端点时不会询问
/// let index = select_endpoint(&endpoints, None, false, &mut NonInteractive).unwrap();
/// assert_eq!(index, 0);
/// ```
pub fn select_endpoint(
    endpoints: &[String],
    explicit: Option<usize>,
    auto_select: bool,
    prompt: &mut dyn OperatorPrompt,
) -> Result<usize, SelectionError> {
    let count = endpoints.len();
    if count == 0 {
        return Err(SelectionError::NoEndpoints);
    }

    if let Some(index) = explicit {
        if index >= count {
            return Err(SelectionError::OutOfRange { index, count });
        }
        info!("Using requested endpoint [{}] {}", index, endpoints[index]);
        return Ok(index);
    }

    if count == 1 {
        info!("Single endpoint detected, auto-selecting [0] {}", endpoints[0]);
        return Ok(0);
    }

    if auto_select {
        info!("Auto-selecting endpoint [0] {}", endpoints[0]);
        return Ok(0);
    }

    let message = format!("Select endpoint ({} found):", count);
    loop {
        match prompt.choose(&message, endpoints) {
            None => return Err(SelectionError::Aborted),
            Some(index) if index < count => {
                info!("Operator selected endpoint [{}] {}", index, endpoints[index]);
                return Ok(index);
            },
            Some(index) => warn!("Endpoint index {} out of range, asking again", index),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// 脚本化选择，同时记录被询问的次数
    struct ScriptedPrompt {
        answers: VecDeque<usize>,
        asked: usize,
    }

    impl ScriptedPrompt {
        fn new(answers: &[usize]) -> Self {
            Self {
                answers: answers.iter().copied().collect(),
                asked: 0,
            }
        }
    }

    impl OperatorPrompt for ScriptedPrompt {
        fn choose(&mut self, _message: &str, _endpoints: &[String]) -> Option<usize> {
            self.asked += 1;
            self.answers.pop_front()
        }
    }

    fn endpoints(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("can{}", i)).collect()
    }

    #[test]
    fn test_no_endpoints() {
        let mut prompt = ScriptedPrompt::new(&[]);
        assert_eq!(
            select_endpoint(&[], None, true, &mut prompt),
            Err(SelectionError::NoEndpoints)
        );
    }

    #[test]
    fn test_explicit_index_validated() {
        let mut prompt = ScriptedPrompt::new(&[]);
        assert_eq!(
            select_endpoint(&endpoints(3), Some(2), false, &mut prompt),
            Ok(2)
        );
        assert_eq!(
            select_endpoint(&endpoints(3), Some(3), false, &mut prompt),
            Err(SelectionError::OutOfRange { index: 3, count: 3 })
        );
        assert_eq!(prompt.asked, 0);
    }

    #[test]
    fn test_single_endpoint_never_prompts() {
        let mut prompt = ScriptedPrompt::new(&[]);
        assert_eq!(
            select_endpoint(&endpoints(1), None, false, &mut prompt),
            Ok(0)
        );
        assert_eq!(prompt.asked, 0);
    }

    #[test]
    fn test_auto_select_picks_first() {
        let mut prompt = ScriptedPrompt::new(&[]);
        assert_eq!(select_endpoint(&endpoints(4), None, true, &mut prompt), Ok(0));
        assert_eq!(prompt.asked, 0);
    }

    #[test]
    fn test_interactive_retries_until_in_range() {
        let mut prompt = ScriptedPrompt::new(&[7, 2, 1]);
        assert_eq!(
            select_endpoint(&endpoints(2), None, false, &mut prompt),
            Ok(1)
        );
        assert_eq!(prompt.asked, 3);
    }

    #[test]
    fn test_interactive_cancel_aborts() {
        let mut prompt = ScriptedPrompt::new(&[]);
        assert_eq!(
            select_endpoint(&endpoints(3), None, false, &mut prompt),
            Err(SelectionError::Aborted)
        );
    }

    #[test]
    fn test_non_interactive_aborts_on_choice() {
        assert_eq!(
            select_endpoint(&endpoints(2), None, false, &mut NonInteractive),
            Err(SelectionError::Aborted)
        );
        assert_eq!(
            select_endpoint(&endpoints(2), None, true, &mut NonInteractive),
            Ok(0)
        );
    }
}
