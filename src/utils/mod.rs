//! 工具函数模块

use std::net::{IpAddr, Ipv4Addr, UdpSocket};
use std::sync::OnceLock;
use tracing::debug;

/// 探测本机对外地址
///
/// 通过 UDP socket 的路由选择获得本机出口地址（不会真正发送数据），
/// 探测失败时回退到 `127.0.0.1`
pub fn local_ip() -> IpAddr {
    static LOCAL_IP: OnceLock<IpAddr> = OnceLock::new();

    *LOCAL_IP.get_or_init(|| {
        let probe = || -> std::io::Result<IpAddr> {
            let socket = UdpSocket::bind("0.0.0.0:0")?;
            socket.connect("8.8.8.8:80")?;
            Ok(socket.local_addr()?.ip())
        };

        match probe() {
            Ok(ip) if !ip.is_unspecified() => ip,
            Ok(_) => IpAddr::V4(Ipv4Addr::LOCALHOST),
            Err(e) => {
                debug!(error = %e, "Failed to detect local ip, fallback to loopback");
                IpAddr::V4(Ipv4Addr::LOCALHOST)
            }
        }
    })
}

/// 注册时使用的主机地址：配置优先，否则自动探测
pub fn resolve_host(configured: Option<&str>) -> String {
    match configured.map(str::trim) {
        Some(host) if !host.is_empty() => host.to_string(),
        _ => local_ip().to_string(),
    }
}

/// 拼接存储路径
pub fn join_path(parent: &str, child: &str) -> String {
    if parent.ends_with('/') {
        format!("{}{}", parent, child)
    } else {
        format!("{}/{}", parent, child)
    }
}

/// 父路径，根节点返回 `None`
pub fn parent_path(path: &str) -> Option<&str> {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) if trimmed.len() > 1 => Some("/"),
        Some(0) | None => None,
        Some(idx) => Some(&trimmed[..idx]),
    }
}

/// 当前进程号
pub fn pid() -> u32 {
    std::process::id()
}
