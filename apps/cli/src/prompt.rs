//! 终端交互：多个适配器 / 网口时让操作员选择

use lhand_control::PromptFactory;
use lhand_transport::OperatorPrompt;
use std::sync::Arc;
use tracing::warn;

/// 基于 `inquire::Select` 的端点选择，光标默认停在第一个端点
#[derive(Debug, Default)]
pub struct InquirePrompt;

impl OperatorPrompt for InquirePrompt {
    fn choose(&mut self, message: &str, endpoints: &[String]) -> Option<usize> {
        let labels = labels(endpoints);
        match inquire::Select::new(message, labels)
            .with_starting_cursor(0)
            .raw_prompt()
        {
            Ok(choice) => Some(choice.index),
            Err(e) => {
                warn!("Endpoint selection failed: {}", e);
                None
            },
        }
    }
}

pub fn factory() -> PromptFactory {
    Arc::new(|| Box::new(InquirePrompt) as Box<dyn OperatorPrompt + Send>)
}

/// 带索引的选项文本，与 `--device-index` 对应
fn labels(endpoints: &[String]) -> Vec<String> {
    endpoints
        .iter()
        .enumerate()
        .map(|(i, name)| format!("[{}] {}", i, name))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels_carry_index() {
        let endpoints = vec!["can0".to_string(), "can1".to_string()];
        assert_eq!(labels(&endpoints), vec!["[0] can0", "[1] can1"]);
    }
}
