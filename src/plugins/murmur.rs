//! Murmur (Mumble server) connection counts via the UDP ping protocol.
//!
//! The server answers a 12-byte ping (4 zero bytes followed by an 8-byte
//! identifier) with 24 bytes: version, the echoed identifier, connected
//! users, maximum users and allowed bandwidth, all big-endian.

use async_trait::async_trait;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;
use tokio::net::{lookup_host, UdpSocket};
use tracing::debug;

use crate::error::{PluginError, Result};
use crate::graph::{Graph, GraphMetric};
use crate::plugin::Plugin;
use crate::reading::{Reading, Unit};
use crate::state_store::CacheKey;

pub const DEFAULT_PORT: u16 = 64738;
const PING_LEN: usize = 12;
const PONG_LEN: usize = 24;

/// Decoded ping reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PingResponse {
    pub version: u32,
    pub connected_users: u32,
    pub maximum_users: u32,
    pub maximum_bitrate: u32,
}

/// Builds the ping datagram for `ident`.
pub fn encode_ping(ident: u64) -> [u8; PING_LEN] {
    let mut packet = [0u8; PING_LEN];
    packet[4..].copy_from_slice(&ident.to_be_bytes());
    packet
}

/// Parses a reply and checks that it answers the ping with `ident`.
pub fn decode_pong(packet: &[u8], ident: u64) -> Result<PingResponse> {
    if packet.len() != PONG_LEN {
        return Err(PluginError::Fetch(format!(
            "unexpected ping reply length: {} bytes",
            packet.len()
        )));
    }

    let u32_at = |at: usize| u32::from_be_bytes([packet[at], packet[at + 1], packet[at + 2], packet[at + 3]]);
    let mut echoed = [0u8; 8];
    echoed.copy_from_slice(&packet[4..12]);

    if u64::from_be_bytes(echoed) != ident {
        return Err(PluginError::Fetch("ping reply does not match request".to_string()));
    }

    Ok(PingResponse {
        version: u32_at(0),
        connected_users: u32_at(12),
        maximum_users: u32_at(16),
        maximum_bitrate: u32_at(20),
    })
}

pub struct MurmurPlugin {
    host: String,
    port: u16,
    timeout: Duration,
}

impl MurmurPlugin {
    pub fn new(host: impl Into<String>, port: u16, timeout: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            timeout,
        }
    }

    async fn resolve(&self) -> Result<SocketAddr> {
        lookup_host((self.host.as_str(), self.port))
            .await?
            .next()
            .ok_or_else(|| PluginError::Fetch(format!("cannot resolve {}", self.host)))
    }

    /// Sends one ping and waits for the matching reply.
    pub async fn ping(&self) -> Result<PingResponse> {
        let addr = self.resolve().await?;
        let bind_addr: SocketAddr = if addr.is_ipv6() {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        };

        let socket = UdpSocket::bind(bind_addr).await?;
        socket.connect(addr).await?;

        let ident = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default() as u64;
        socket.send(&encode_ping(ident)).await?;
        debug!("Sent ping to {}", addr);

        let mut buf = [0u8; 64];
        let len = tokio::time::timeout(self.timeout, socket.recv(&mut buf))
            .await
            .map_err(|_| PluginError::Timeout(self.timeout))??;

        decode_pong(&buf[..len], ident)
    }
}

#[async_trait]
impl Plugin for MurmurPlugin {
    fn name(&self) -> &str {
        "murmur"
    }

    fn cache_key(&self) -> CacheKey {
        CacheKey::derive("murmur", &[&self.host.to_lowercase(), &self.port.to_string()])
    }

    fn graph_definition(&self) -> Vec<Graph> {
        vec![Graph::new("murmur.connections", "Murmur Connections", Unit::Integer)
            .metric(GraphMetric::new("con_cur", "Current users"))
            .metric(GraphMetric::new("con_max", "Maximum users"))]
    }

    async fn fetch(&self, now: i64) -> Result<Vec<Reading>> {
        let pong = self.ping().await?;
        debug!("Murmur version {:#x}", pong.version);

        Ok(vec![
            Reading::new("murmur.connections.con_cur", pong.connected_users as f64, now),
            Reading::new("murmur.connections.con_max", pong.maximum_users as f64, now),
        ])
    }
}
