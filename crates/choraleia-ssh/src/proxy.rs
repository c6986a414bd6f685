//! Client-side proxy handshakes: SOCKS4, SOCKS5 (with optional user/pass),
//! and HTTP CONNECT (with optional Basic auth). Each returns a TCP stream
//! already connected through the proxy to the target, ready for the SSH
//! handshake to be layered on top.

use base64::Engine;
use choraleia_core::types::{ProxyEndpoint, ProxyKind};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use crate::error::{Result, SshError};

/// Open a TCP connection to `proxy` and negotiate a tunnel to `host:port`.
pub async fn dial_through_proxy(
    proxy: &ProxyEndpoint,
    host: &str,
    port: u16,
) -> Result<TcpStream> {
    let mut stream = TcpStream::connect((proxy.host.as_str(), proxy.port)).await?;
    match proxy.kind {
        ProxyKind::Socks5 => socks5_connect(&mut stream, proxy, host, port).await?,
        ProxyKind::Socks4 => socks4_connect(&mut stream, proxy, host, port).await?,
        ProxyKind::HttpConnect => http_connect(&mut stream, proxy, host, port).await?,
    }
    debug!(kind = ?proxy.kind, target = %format!("{host}:{port}"), "proxy tunnel established");
    Ok(stream)
}

/// RFC 1928 + RFC 1929 (user/pass subnegotiation).
async fn socks5_connect(
    stream: &mut TcpStream,
    proxy: &ProxyEndpoint,
    host: &str,
    port: u16,
) -> Result<()> {
    let with_auth = proxy.username.is_some();
    // Greeting: no-auth always offered; user/pass offered when configured.
    if with_auth {
        stream.write_all(&[0x05, 0x02, 0x00, 0x02]).await?;
    } else {
        stream.write_all(&[0x05, 0x01, 0x00]).await?;
    }

    let mut reply = [0u8; 2];
    stream.read_exact(&mut reply).await?;
    if reply[0] != 0x05 {
        return Err(SshError::Proxy("not a SOCKS5 server".into()));
    }
    match reply[1] {
        0x00 => {}
        0x02 => {
            let user = proxy.username.clone().unwrap_or_default();
            let pass = proxy.password.clone().unwrap_or_default();
            if user.len() > 255 || pass.len() > 255 {
                return Err(SshError::Proxy("SOCKS5 credentials too long".into()));
            }
            let mut auth = vec![0x01, user.len() as u8];
            auth.extend_from_slice(user.as_bytes());
            auth.push(pass.len() as u8);
            auth.extend_from_slice(pass.as_bytes());
            stream.write_all(&auth).await?;

            let mut auth_reply = [0u8; 2];
            stream.read_exact(&mut auth_reply).await?;
            if auth_reply[1] != 0x00 {
                return Err(SshError::Proxy("SOCKS5 authentication rejected".into()));
            }
        }
        0xFF => return Err(SshError::Proxy("SOCKS5: no acceptable auth method".into())),
        other => {
            return Err(SshError::Proxy(format!(
                "SOCKS5: unexpected auth method {other:#04x}"
            )))
        }
    }

    // CONNECT with a domain-name address (the proxy resolves).
    if host.len() > 255 {
        return Err(SshError::Proxy("SOCKS5 hostname too long".into()));
    }
    let mut req = vec![0x05, 0x01, 0x00, 0x03, host.len() as u8];
    req.extend_from_slice(host.as_bytes());
    req.extend_from_slice(&port.to_be_bytes());
    stream.write_all(&req).await?;

    let mut head = [0u8; 4];
    stream.read_exact(&mut head).await?;
    if head[1] != 0x00 {
        return Err(SshError::Proxy(format!(
            "SOCKS5 CONNECT refused (reply {:#04x})",
            head[1]
        )));
    }
    // Drain the bound address so the SSH banner starts clean.
    let addr_len = match head[3] {
        0x01 => 4,
        0x04 => 16,
        0x03 => {
            let mut len = [0u8; 1];
            stream.read_exact(&mut len).await?;
            len[0] as usize
        }
        other => {
            return Err(SshError::Proxy(format!(
                "SOCKS5: unknown address type {other:#04x}"
            )))
        }
    };
    let mut rest = vec![0u8; addr_len + 2];
    stream.read_exact(&mut rest).await?;
    Ok(())
}

/// SOCKS4a: hostname targets use the 0.0.0.1 marker and append the hostname.
async fn socks4_connect(
    stream: &mut TcpStream,
    proxy: &ProxyEndpoint,
    host: &str,
    port: u16,
) -> Result<()> {
    let mut req = vec![0x04, 0x01];
    req.extend_from_slice(&port.to_be_bytes());

    let ip4 = host.parse::<std::net::Ipv4Addr>().ok();
    match ip4 {
        Some(ip) => req.extend_from_slice(&ip.octets()),
        None => req.extend_from_slice(&[0, 0, 0, 1]),
    }
    // userid field
    if let Some(user) = &proxy.username {
        req.extend_from_slice(user.as_bytes());
    }
    req.push(0);
    if ip4.is_none() {
        req.extend_from_slice(host.as_bytes());
        req.push(0);
    }
    stream.write_all(&req).await?;

    let mut reply = [0u8; 8];
    stream.read_exact(&mut reply).await?;
    if reply[1] != 0x5A {
        return Err(SshError::Proxy(format!(
            "SOCKS4 CONNECT refused (code {:#04x})",
            reply[1]
        )));
    }
    Ok(())
}

async fn http_connect(
    stream: &mut TcpStream,
    proxy: &ProxyEndpoint,
    host: &str,
    port: u16,
) -> Result<()> {
    let mut req = format!("CONNECT {host}:{port} HTTP/1.1\r\nHost: {host}:{port}\r\n");
    if let Some(user) = &proxy.username {
        let pass = proxy.password.as_deref().unwrap_or_default();
        let cred = base64::engine::general_purpose::STANDARD.encode(format!("{user}:{pass}"));
        req.push_str(&format!("Proxy-Authorization: Basic {cred}\r\n"));
    }
    req.push_str("\r\n");
    stream.write_all(req.as_bytes()).await?;

    // Read the response head byte-by-byte up to the blank line; anything past
    // it belongs to the tunneled protocol.
    let mut head = Vec::with_capacity(256);
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        if head.len() > 8192 {
            return Err(SshError::Proxy("HTTP CONNECT response too large".into()));
        }
        stream.read_exact(&mut byte).await?;
        head.push(byte[0]);
    }
    let status_line = String::from_utf8_lossy(&head);
    let ok = status_line
        .lines()
        .next()
        .map(|l| l.contains(" 200 ") || l.ends_with(" 200"))
        .unwrap_or(false);
    if !ok {
        return Err(SshError::Proxy(format!(
            "HTTP CONNECT refused: {}",
            status_line.lines().next().unwrap_or("")
        )));
    }
    Ok(())
}
