//! Mint transport
//!
//! HTTP agent shared by mint connectors: IPv4-pinned source address, TCP
//! keep-alive, bounded socket pool and a hard socket timeout. The agent is
//! a connection pool only; request-scoped mint handles are built on top of
//! it per operation (see [`crate::client::MintHandle`]).

use std::net::{IpAddr, Ipv4Addr};

use purse_common::config::HttpConfig;
use purse_common::Error;

/// HTTP agent for mint connections
#[derive(Debug, Clone)]
pub struct MintTransport {
    http: reqwest::Client,
}

impl MintTransport {
    /// Build a transport from HTTP settings
    pub fn new(config: &HttpConfig) -> Result<Self, Error> {
        let mut builder = reqwest::Client::builder()
            .timeout(config.socket_timeout())
            .connect_timeout(config.socket_timeout())
            .tcp_keepalive(Some(config.tcp_keepalive()))
            .pool_max_idle_per_host(config.max_sockets);

        if config.ipv4_only {
            builder = builder.local_address(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        }

        let http = builder.build().map_err(Error::transport)?;

        Ok(Self { http })
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.http
    }
}
