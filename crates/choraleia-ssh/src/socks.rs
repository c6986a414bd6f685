//! Minimal SOCKS5 server backing dynamic (-D) tunnels.
//!
//! No-auth only; CONNECT only. BIND and UDP ASSOCIATE are refused with
//! reply 0x07 (command not supported).

use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use crate::client::SshClient;
use crate::error::{Result, SshError};
use crate::tunnel::{bridge_counted, Counters};

const SOCKS_VERSION: u8 = 0x05;
const METHOD_NO_AUTH: u8 = 0x00;
const CMD_CONNECT: u8 = 0x01;
const REPLY_SUCCESS: u8 = 0x00;
const REPLY_HOST_UNREACHABLE: u8 = 0x04;
const REPLY_COMMAND_NOT_SUPPORTED: u8 = 0x07;
const REPLY_ADDRESS_NOT_SUPPORTED: u8 = 0x08;

/// Serve one accepted SOCKS5 connection: negotiate, open a direct-tcpip
/// channel to the requested target, and bridge bytes until either side closes.
pub async fn serve_connection(
    mut stream: TcpStream,
    client: Arc<SshClient>,
    counters: &Counters,
) -> Result<()> {
    // Greeting: VER NMETHODS METHODS...
    let mut head = [0u8; 2];
    stream.read_exact(&mut head).await?;
    if head[0] != SOCKS_VERSION {
        return Err(SshError::Proxy("not a SOCKS5 greeting".into()));
    }
    let mut methods = vec![0u8; head[1] as usize];
    stream.read_exact(&mut methods).await?;
    if !methods.contains(&METHOD_NO_AUTH) {
        stream.write_all(&[SOCKS_VERSION, 0xFF]).await?;
        return Err(SshError::Proxy("client offers no no-auth method".into()));
    }
    stream.write_all(&[SOCKS_VERSION, METHOD_NO_AUTH]).await?;

    // Request: VER CMD RSV ATYP ...
    let mut req = [0u8; 4];
    stream.read_exact(&mut req).await?;
    if req[1] != CMD_CONNECT {
        reply(&mut stream, REPLY_COMMAND_NOT_SUPPORTED).await?;
        return Err(SshError::Proxy(format!(
            "unsupported SOCKS command {:#04x}",
            req[1]
        )));
    }

    let target_host = match req[3] {
        0x01 => {
            let mut octets = [0u8; 4];
            stream.read_exact(&mut octets).await?;
            std::net::Ipv4Addr::from(octets).to_string()
        }
        0x03 => {
            let mut len = [0u8; 1];
            stream.read_exact(&mut len).await?;
            let mut name = vec![0u8; len[0] as usize];
            stream.read_exact(&mut name).await?;
            String::from_utf8_lossy(&name).into_owned()
        }
        0x04 => {
            let mut octets = [0u8; 16];
            stream.read_exact(&mut octets).await?;
            std::net::Ipv6Addr::from(octets).to_string()
        }
        _ => {
            reply(&mut stream, REPLY_ADDRESS_NOT_SUPPORTED).await?;
            return Err(SshError::Proxy("unknown SOCKS address type".into()));
        }
    };
    let mut port_bytes = [0u8; 2];
    stream.read_exact(&mut port_bytes).await?;
    let target_port = u16::from_be_bytes(port_bytes);

    debug!(target = %format!("{target_host}:{target_port}"), "SOCKS CONNECT");

    let channel = match client
        .open_direct_tcpip(&target_host, target_port as u32)
        .await
    {
        Ok(ch) => ch,
        Err(e) => {
            reply(&mut stream, REPLY_HOST_UNREACHABLE).await?;
            return Err(e);
        }
    };
    reply(&mut stream, REPLY_SUCCESS).await?;

    bridge_counted(stream, channel.into_stream(), counters).await?;
    Ok(())
}

/// Send a reply with a zeroed IPv4 bind address (clients ignore it for
/// CONNECT).
async fn reply(stream: &mut TcpStream, code: u8) -> Result<()> {
    stream
        .write_all(&[SOCKS_VERSION, code, 0x00, 0x01, 0, 0, 0, 0, 0, 0])
        .await?;
    Ok(())
}
