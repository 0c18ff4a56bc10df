//! CAN-FD 网口状态检查
//!
//! 只读取网口标志位和 sysfs 属性，不做任何配置，普通用户即可执行。

use crate::{DeviceError, DeviceErrorKind, TransportError};
use libc::{AF_INET, IFF_UP, SIOCGIFFLAGS, SOCK_DGRAM, if_nametoindex, ifreq};
use std::ffi::CString;
use std::io;
use std::path::Path;
use tracing::trace;

/// `ARPHRD_CAN`：/sys/class/net/<if>/type 中 CAN 网口的链路类型
pub const ARPHRD_CAN: u32 = 280;

/// IFNAMSIZ - 1
const MAX_IFACE_NAME_LEN: usize = 15;

/// 列出系统中的 CAN 网口（按名称排序）
///
/// `root` 通常为 `/sys/class/net`，测试时可以指向临时目录。
pub fn list_can_interfaces(root: &Path) -> Result<Vec<String>, TransportError> {
    let mut names = Vec::new();
    for entry in std::fs::read_dir(root)? {
        let entry = entry?;
        let type_path = entry.path().join("type");
        let Ok(raw) = std::fs::read_to_string(&type_path) else {
            continue;
        };
        if raw.trim().parse::<u32>().ok() == Some(ARPHRD_CAN) {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    trace!("CAN interfaces under {}: {:?}", root.display(), names);
    Ok(names)
}

/// 检查网口是否存在且处于管理态 UP
///
/// # 返回值
/// - `Ok(true)`: 网口存在且 IFF_UP
/// - `Ok(false)`: 网口存在但 DOWN
/// - `Err(TransportError::Device)`: 网口不存在或名称非法
/// - `Err(TransportError::Io)`: socket/ioctl 失败
pub fn check_interface_status(interface: &str) -> Result<bool, TransportError> {
    if interface.len() > MAX_IFACE_NAME_LEN {
        return Err(DeviceError::new(
            DeviceErrorKind::UnsupportedConfig,
            format!(
                "Interface name '{}' is too long (max {} characters)",
                interface, MAX_IFACE_NAME_LEN
            ),
        )
        .into());
    }

    let c_iface = CString::new(interface).map_err(|e| {
        DeviceError::new(
            DeviceErrorKind::UnsupportedConfig,
            format!("Invalid interface name: {}", e),
        )
    })?;

    let ifindex = unsafe { if_nametoindex(c_iface.as_ptr()) };
    if ifindex == 0 {
        let errno = io::Error::last_os_error();
        return Err(DeviceError::new(
            DeviceErrorKind::NotFound,
            format!("CAN-FD interface '{}' does not exist ({})", interface, errno),
        )
        .into());
    }

    let mut ifr: ifreq = unsafe { std::mem::zeroed() };
    let name_bytes = interface.as_bytes();
    unsafe {
        std::ptr::copy_nonoverlapping(
            name_bytes.as_ptr(),
            ifr.ifr_name.as_mut_ptr() as *mut u8,
            name_bytes.len(),
        );
        ifr.ifr_name[name_bytes.len()] = 0;
    }

    struct FdGuard(libc::c_int);
    impl Drop for FdGuard {
        fn drop(&mut self) {
            if self.0 >= 0 {
                unsafe { libc::close(self.0) };
            }
        }
    }

    let sockfd = unsafe { libc::socket(AF_INET, SOCK_DGRAM, 0) };
    if sockfd < 0 {
        return Err(TransportError::Io(io::Error::last_os_error()));
    }
    let _guard = FdGuard(sockfd);

    let result = unsafe { libc::ioctl(sockfd, SIOCGIFFLAGS, &mut ifr as *mut _ as *mut libc::c_void) };
    if result < 0 {
        return Err(TransportError::Io(io::Error::last_os_error()));
    }

    // ifru_flags 是 union 的第一个字段（c_short）
    let flags = unsafe { *(std::ptr::addr_of!(ifr.ifr_ifru) as *const libc::c_short) };
    let is_up = (flags as i32 & IFF_UP) != 0;

    trace!(
        "Interface '{}' status: {}",
        interface,
        if is_up { "UP" } else { "DOWN" }
    );
    Ok(is_up)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_too_long_rejected() {
        let err = check_interface_status("can_interface_name_too_long").unwrap_err();
        match err {
            TransportError::Device(e) => assert_eq!(e.kind, DeviceErrorKind::UnsupportedConfig),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_missing_interface_reports_not_found() {
        let err = check_interface_status("nocanfd42").unwrap_err();
        match err {
            TransportError::Device(e) => assert_eq!(e.kind, DeviceErrorKind::NotFound),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_loopback_is_up() {
        // lo 在任何 Linux 环境下都存在且 UP
        assert!(check_interface_status("lo").unwrap());
    }

    #[test]
    fn test_list_can_interfaces_from_sysfs_layout() {
        let root = std::env::temp_dir().join(format!("lhand-sysfs-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&root);
        for (name, link_type) in [("can1", "280"), ("eth0", "1"), ("can0", "280\n")] {
            let dir = root.join(name);
            std::fs::create_dir_all(&dir).unwrap();
            std::fs::write(dir.join("type"), link_type).unwrap();
        }
        std::fs::create_dir_all(root.join("broken")).unwrap();

        let names = list_can_interfaces(&root).unwrap();
        assert_eq!(names, vec!["can0".to_string(), "can1".to_string()]);

        std::fs::remove_dir_all(&root).unwrap();
    }
}
