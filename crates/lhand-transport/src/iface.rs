//! 网口过滤
//!
//! EtherCAT 只能跑在物理以太网口上。扫描结果按名称关键字排除虚拟、回环、无线接口。

/// 扫描到的网口
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetInterface {
    /// 系统设备名（如 "eth0"、"enp3s0"）
    pub name: String,
    /// 可读描述
    pub description: String,
}

impl NetInterface {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}

/// 名称中包含这些关键字的接口会被排除（大小写不敏感，子串匹配）
pub const EXCLUDED_KEYWORDS: &[&str] = &[
    "lo",        // Linux 回环
    "docker",    // Docker 虚拟网卡
    "veth",      // 虚拟以太网对
    "br-",       // 网桥
    "virbr",     // libvirt 网桥
    "vmnet",     // VMware
    "tap",       // TAP
    "tun",       // TUN
    "wlan",      // 无线
    "wlp",       // 无线（新命名）
    "wlx",       // 无线（USB）
    "wifi",      // WiFi
    "wwan",      // 无线广域网
    "bluetooth", // 蓝牙
    "vboxnet",   // VirtualBox
    "wintun",    // Windows TUN
    "p2p",       // P2P
    "loopback",  // Windows 回环
    "teredo",    // Teredo 隧道
    "isatap",    // ISATAP 隧道
];

/// 是否为物理有线网口
pub fn is_physical_interface(name: &str) -> bool {
    let lower = name.to_lowercase();
    !EXCLUDED_KEYWORDS.iter().any(|kw| lower.contains(kw))
}

/// 过滤出物理网口（保持原有顺序）
pub fn filter_physical(interfaces: Vec<NetInterface>) -> Vec<NetInterface> {
    interfaces
        .into_iter()
        .filter(|iface| is_physical_interface(&iface.name))
        .collect()
}
