/*
 * @copyright (C) 2024 Ruslan Iusupov <https://github.com/rus0000>
 *
 * SPDX-License-Identifier: MIT
 */
use std::fmt;
use std::net::Ipv4Addr;

use etherparse::{Ipv4HeaderSlice, TcpHeaderSlice};

/// TCP connection Four-tuple: two IPs + two ports. Traffic in one direction only.
/// TCP session consist of two TCP connections in two directions, which are tracked independently.
#[derive(Hash, Eq, PartialEq, PartialOrd, Ord, Clone, Copy)]
pub struct TcpConnection {
    pub source_ipv4_address: Ipv4Addr,
    pub source_port: u16,

    pub destination_ipv4_address: Ipv4Addr,
    pub destination_port: u16,
}

impl Default for TcpConnection {
    fn default() -> Self {
        Self {
            source_ipv4_address: Ipv4Addr::UNSPECIFIED,
            source_port: 0,
            destination_ipv4_address: Ipv4Addr::UNSPECIFIED,
            destination_port: 0,
        }
    }
}

/// Renders as a Wireshark display filter, handy to paste while debugging a capture.
impl fmt::Debug for TcpConnection {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            formatter,
            "(ip.src == {} && tcp.srcport == {} && ip.dst == {} && tcp.dstport == {})",
            self.source_ipv4_address, self.source_port, self.destination_ipv4_address, self.destination_port,
        )
    }
}

impl fmt::Display for TcpConnection {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            formatter,
            "{}:{} -> {}:{}",
            self.source_ipv4_address, self.source_port, self.destination_ipv4_address, self.destination_port,
        )
    }
}

impl TcpConnection {
    pub fn new(source_ipv4_address: Ipv4Addr, source_port: u16, destination_ipv4_address: Ipv4Addr, destination_port: u16) -> Self {
        Self {
            source_ipv4_address,
            source_port,
            destination_ipv4_address,
            destination_port,
        }
    }

    /// Ports are converted to host byte order by etherparse.
    pub fn from_headers(ipv4_header_slice: &Ipv4HeaderSlice, tcp_header_slice: &TcpHeaderSlice) -> Self {
        Self {
            source_ipv4_address: ipv4_header_slice.source_addr(),
            source_port: tcp_header_slice.source_port(),
            destination_ipv4_address: ipv4_header_slice.destination_addr(),
            destination_port: tcp_header_slice.destination_port(),
        }
    }

    pub fn get_reverse_connection(&self) -> Self {
        TcpConnection {
            source_ipv4_address: self.destination_ipv4_address,
            source_port: self.destination_port,

            destination_ipv4_address: self.source_ipv4_address,
            destination_port: self.source_port,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reverse_connection() {
        let tcp_connection = TcpConnection::new(Ipv4Addr::new(10, 0, 0, 1), 40000, Ipv4Addr::new(10, 0, 0, 2), 80);
        let reversed = tcp_connection.get_reverse_connection();

        assert_eq!(reversed.source_ipv4_address, Ipv4Addr::new(10, 0, 0, 2));
        assert_eq!(reversed.source_port, 80);
        assert_eq!(reversed.destination_ipv4_address, Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(reversed.destination_port, 40000);
        assert_ne!(reversed, tcp_connection);
        assert_eq!(reversed.get_reverse_connection(), tcp_connection);
    }

    #[test]
    fn test_display() {
        let tcp_connection = TcpConnection::new(Ipv4Addr::new(192, 168, 1, 1), 1000, Ipv4Addr::new(192, 168, 1, 2), 80);
        assert_eq!(tcp_connection.to_string(), "192.168.1.1:1000 -> 192.168.1.2:80");
        assert_eq!(
            format!("{:?}", tcp_connection),
            "(ip.src == 192.168.1.1 && tcp.srcport == 1000 && ip.dst == 192.168.1.2 && tcp.dstport == 80)"
        );
    }
}
