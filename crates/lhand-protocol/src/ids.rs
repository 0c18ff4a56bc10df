//! CAN ID 常量定义
//!
//! 主机 → 手：`COMMAND_ID_BASE + node`；手 → 主机：`RESPONSE_ID_BASE + node`。

/// 控制帧 ID 基址
pub const COMMAND_ID_BASE: u32 = 0x500;

/// 反馈帧 ID 基址
pub const RESPONSE_ID_BASE: u32 = 0x480;

/// 默认节点号
pub const DEFAULT_NODE_ID: u8 = 1;

/// 节点的控制帧 ID
pub const fn command_id(node: u8) -> u32 {
    COMMAND_ID_BASE + node as u32
}

/// 节点的反馈帧 ID
pub const fn response_id(node: u8) -> u32 {
    RESPONSE_ID_BASE + node as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_node_ids() {
        assert_eq!(command_id(DEFAULT_NODE_ID), 0x501);
        assert_eq!(response_id(DEFAULT_NODE_ID), 0x481);
    }
}
