use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::lease::LeasePool;
use crate::options::{DhcpOption, MessageType};
use crate::packet::{BOOTREQUEST, DhcpPacket};

const DHCP_SERVER_PORT: u16 = 67;
const DHCP_CLIENT_PORT: u16 = 68;
const RECV_BUFFER_SIZE: usize = 1500;

/// Per-datagram transaction logic, decoupled from the transport.
///
/// The handler decodes a request, consults the lease pool, and either
/// produces a reply packet or decides to stay silent. Silence is the
/// answer to anything the server cannot or will not serve; the transport
/// never learns why.
pub struct MessageHandler {
    config: Arc<Config>,
    pool: Arc<LeasePool>,
}

impl MessageHandler {
    pub fn new(config: Arc<Config>, pool: Arc<LeasePool>) -> Self {
        Self { config, pool }
    }

    /// Handles one raw datagram, returning the reply to broadcast (if any).
    ///
    /// Undecodable datagrams, non-request opcodes, unknown message types,
    /// and rejected transactions are all logged and swallowed here; nothing
    /// that arrives on the wire can fail the caller.
    pub async fn handle(&self, data: &[u8]) -> Option<DhcpPacket> {
        let packet = match DhcpPacket::parse(data) {
            Ok(packet) => packet,
            Err(error) => {
                warn!("Dropping undecodable datagram: {}", error);
                return None;
            }
        };

        if packet.op != BOOTREQUEST {
            warn!("Ignoring packet with op {} (expected BOOTREQUEST)", packet.op);
            return None;
        }

        let mac = packet.mac();

        match packet.message_type() {
            Some(MessageType::Discover) => {
                info!("DISCOVER from {}", mac);
                self.handle_discover(&packet).await
            }
            Some(MessageType::Request) => {
                info!("REQUEST from {}", mac);
                self.handle_request(&packet).await
            }
            Some(MessageType::Release) => {
                info!("RELEASE from {}", mac);
                self.handle_release(&packet).await;
                None
            }
            Some(other) => {
                warn!("Ignoring {} from {}", other, mac);
                None
            }
            None => {
                warn!("No DHCP message type from {}; ignoring", mac);
                None
            }
        }
    }

    async fn handle_discover(&self, packet: &DhcpPacket) -> Option<DhcpPacket> {
        let mac = packet.mac();

        match self.pool.offer_for(mac).await {
            Ok(ip) => {
                info!("OFFER {} to {}", ip, mac);
                Some(self.build_reply(packet, MessageType::Offer, ip))
            }
            Err(Error::PoolExhausted) => {
                warn!("Pool exhausted, no offer for {}", mac);
                None
            }
            Err(error) => {
                warn!("DISCOVER from {} failed: {}", mac, error);
                None
            }
        }
    }

    async fn handle_request(&self, packet: &DhcpPacket) -> Option<DhcpPacket> {
        let mac = packet.mac();

        // The target address is option 50 when the client sends one, or
        // ciaddr for a renewing client that omits it.
        let requested = packet
            .requested_ip()
            .filter(|ip| !ip.is_unspecified())
            .unwrap_or(packet.ciaddr);

        match self.pool.confirm(mac, requested).await {
            Ok(ip) => {
                info!(
                    "ACK {} to {} (lease: {} seconds)",
                    ip,
                    mac,
                    self.pool.lease_duration_seconds()
                );
                Some(self.build_reply(packet, MessageType::Ack, ip))
            }
            Err(error) => {
                warn!("Dropping REQUEST for {} from {}: {}", requested, mac, error);
                None
            }
        }
    }

    async fn handle_release(&self, packet: &DhcpPacket) {
        let mac = packet.mac();

        if packet.ciaddr == Ipv4Addr::UNSPECIFIED {
            warn!("RELEASE from {} with no ciaddr", mac);
            return;
        }

        self.pool.release(mac, packet.ciaddr).await;
        info!("Released {} for {}", packet.ciaddr, mac);
    }

    /// Builds an OFFER or ACK with the standard option set, in fixed order:
    /// message type, server identifier, lease time, subnet mask, router,
    /// DNS servers. Options without a configured value are skipped.
    fn build_reply(
        &self,
        request: &DhcpPacket,
        message_type: MessageType,
        assigned_ip: Ipv4Addr,
    ) -> DhcpPacket {
        let mut options = vec![
            DhcpOption::MessageType(message_type),
            DhcpOption::ServerIdentifier(self.config.server_ip),
            DhcpOption::LeaseTime(self.pool.lease_duration_seconds()),
            DhcpOption::SubnetMask(self.config.subnet_mask),
        ];

        if let Some(gateway) = self.config.gateway {
            options.push(DhcpOption::Router(vec![gateway]));
        }

        if !self.config.dns_servers.is_empty() {
            options.push(DhcpOption::DnsServer(self.config.dns_servers.clone()));
        }

        DhcpPacket::create_reply(request, assigned_ip, self.config.server_ip, options)
    }
}

/// UDP front end: binds port 67 and runs the receive loop.
pub struct DhcpServer {
    handler: MessageHandler,
    pool: Arc<LeasePool>,
    socket: UdpSocket,
}

impl DhcpServer {
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let config = Arc::new(config);
        let pool = Arc::new(LeasePool::new(&config)?);
        let socket = Self::create_socket()?;

        info!(
            "DHCP server starting on {}:{}",
            config.server_ip, DHCP_SERVER_PORT
        );
        info!(
            "IP pool: {} - {} ({} addresses)",
            config.pool_start,
            config.pool_end,
            pool.pool_size()
        );

        Ok(Self {
            handler: MessageHandler::new(config, Arc::clone(&pool)),
            pool,
            socket,
        })
    }

    fn create_socket() -> Result<UdpSocket> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
            .map_err(|error| Error::Socket(format!("Failed to create socket: {}", error)))?;

        socket
            .set_reuse_address(true)
            .map_err(|error| Error::Socket(format!("Failed to set SO_REUSEADDR: {}", error)))?;

        socket
            .set_broadcast(true)
            .map_err(|error| Error::Socket(format!("Failed to set SO_BROADCAST: {}", error)))?;

        socket
            .set_nonblocking(true)
            .map_err(|error| Error::Socket(format!("Failed to set non-blocking: {}", error)))?;

        let bind_addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, DHCP_SERVER_PORT);
        socket.bind(&bind_addr.into()).map_err(|error| {
            Error::Socket(format!("Failed to bind to {}: {}", bind_addr, error))
        })?;

        let std_socket: std::net::UdpSocket = socket.into();
        let tokio_socket = UdpSocket::from_std(std_socket).map_err(|error| {
            Error::Socket(format!("Failed to convert to tokio socket: {}", error))
        })?;

        Ok(tokio_socket)
    }

    /// Runs the receive loop forever.
    ///
    /// Datagrams are handled one at a time: each is fully decoded, handled,
    /// and answered before the next read. Receive errors are logged and the
    /// loop keeps going.
    pub async fn run(&self) -> Result<()> {
        let mut buffer = [0u8; RECV_BUFFER_SIZE];

        info!("DHCP server ready and listening");

        loop {
            match self.socket.recv_from(&mut buffer).await {
                Ok((size, source)) => {
                    let Some(reply) = self.handler.handle(&buffer[..size]).await else {
                        continue;
                    };

                    // Clients negotiating an address cannot yet receive
                    // unicast, so every reply goes to the broadcast address.
                    let destination = SocketAddrV4::new(Ipv4Addr::BROADCAST, DHCP_CLIENT_PORT);
                    if let Err(error) = self.socket.send_to(&reply.encode(), destination).await {
                        warn!("Failed to send reply for {}: {}", source, error);
                    }
                }
                Err(error) => {
                    error!("Error receiving packet: {}", error);
                }
            }
        }
    }

    pub fn pool(&self) -> &LeasePool {
        &self.pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StaticReservation;
    use crate::options::OptionCode;
    use crate::packet::{DHCP_MAGIC_COOKIE, HLEN_ETHERNET, HTYPE_ETHERNET, MacAddr};

    fn test_config() -> Config {
        Config {
            server_ip: Ipv4Addr::new(192, 168, 0, 1),
            subnet_mask: Ipv4Addr::new(255, 255, 255, 0),
            pool_start: Ipv4Addr::new(192, 168, 0, 100),
            pool_end: Ipv4Addr::new(192, 168, 0, 200),
            gateway: Some(Ipv4Addr::new(192, 168, 0, 1)),
            dns_servers: vec![Ipv4Addr::new(8, 8, 8, 8)],
            lease_duration_seconds: 3600,
            reservations: vec![],
        }
    }

    fn make_handler(config: Config) -> MessageHandler {
        let config = Arc::new(config);
        let pool = Arc::new(LeasePool::new(&config).unwrap());
        MessageHandler::new(config, pool)
    }

    fn create_dhcp_packet(
        message_type: MessageType,
        mac: [u8; 6],
        xid: u32,
        options: Vec<DhcpOption>,
    ) -> Vec<u8> {
        let mut packet = vec![0u8; 400];

        packet[0] = BOOTREQUEST;
        packet[1] = HTYPE_ETHERNET;
        packet[2] = HLEN_ETHERNET;
        packet[4..8].copy_from_slice(&xid.to_be_bytes());
        packet[10..12].copy_from_slice(&0x8000u16.to_be_bytes());
        packet[28..34].copy_from_slice(&mac);
        packet[236..240].copy_from_slice(&DHCP_MAGIC_COOKIE);

        let mut index = 240;
        packet[index] = OptionCode::MessageType as u8;
        packet[index + 1] = 1;
        packet[index + 2] = message_type as u8;
        index += 3;

        for option in options {
            let encoded = option.encode();
            packet[index..index + encoded.len()].copy_from_slice(&encoded);
            index += encoded.len();
        }

        packet[index] = OptionCode::End as u8;
        packet
    }

    fn create_packet_with_ciaddr(
        message_type: MessageType,
        mac: [u8; 6],
        xid: u32,
        ciaddr: Ipv4Addr,
        options: Vec<DhcpOption>,
    ) -> Vec<u8> {
        let mut packet = create_dhcp_packet(message_type, mac, xid, options);
        packet[12..16].copy_from_slice(&ciaddr.octets());
        packet
    }

    #[test]
    fn test_constants() {
        assert_eq!(DHCP_SERVER_PORT, 67);
        assert_eq!(DHCP_CLIENT_PORT, 68);
        assert_eq!(RECV_BUFFER_SIZE, 1500);
    }

    #[tokio::test]
    async fn test_discover_produces_offer() {
        let handler = make_handler(test_config());
        let mac = [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x01];

        let data = create_dhcp_packet(MessageType::Discover, mac, 0x12345678, vec![]);
        let reply = handler.handle(&data).await.unwrap();

        assert_eq!(reply.op, crate::packet::BOOTREPLY);
        assert_eq!(reply.xid, 0x12345678);
        assert_eq!(reply.message_type(), Some(MessageType::Offer));
        assert_eq!(reply.yiaddr, Ipv4Addr::new(192, 168, 0, 100));
        assert_eq!(reply.siaddr, Ipv4Addr::new(192, 168, 0, 1));
        assert_eq!(&reply.chaddr[..6], &mac);
    }

    #[tokio::test]
    async fn test_reply_option_order_is_fixed() {
        let handler = make_handler(test_config());
        let mac = [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x01];

        let data = create_dhcp_packet(MessageType::Discover, mac, 1, vec![]);
        let reply = handler.handle(&data).await.unwrap();

        let codes: Vec<u8> = reply.options.iter().map(DhcpOption::option_code).collect();
        assert_eq!(codes, vec![53, 54, 51, 1, 3, 6]);

        let encoded = reply.encode();
        assert_eq!(*encoded.last().unwrap(), OptionCode::End as u8);
    }

    #[tokio::test]
    async fn test_reply_without_gateway_or_dns_omits_them() {
        let config = Config {
            gateway: None,
            dns_servers: vec![],
            ..test_config()
        };
        let handler = make_handler(config);
        let mac = [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x01];

        let data = create_dhcp_packet(MessageType::Discover, mac, 1, vec![]);
        let reply = handler.handle(&data).await.unwrap();

        assert!(!reply.options.iter().any(|o| matches!(o, DhcpOption::Router(_))));
        assert!(!reply.options.iter().any(|o| matches!(o, DhcpOption::DnsServer(_))));
        assert!(reply.options.iter().any(|o| matches!(o, DhcpOption::SubnetMask(_))));
    }

    #[tokio::test]
    async fn test_request_produces_ack_and_lease() {
        let handler = make_handler(test_config());
        let mac = [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x02];

        let discover = create_dhcp_packet(MessageType::Discover, mac, 1, vec![]);
        let offer = handler.handle(&discover).await.unwrap();
        let offered_ip = offer.yiaddr;

        let request = create_dhcp_packet(
            MessageType::Request,
            mac,
            2,
            vec![DhcpOption::RequestedIpAddress(offered_ip)],
        );
        let ack = handler.handle(&request).await.unwrap();

        assert_eq!(ack.message_type(), Some(MessageType::Ack));
        assert_eq!(ack.yiaddr, offered_ip);

        let lease = handler.pool.lease_for(MacAddr(mac)).await.unwrap();
        assert_eq!(lease.address, offered_ip);
        assert!(lease.remaining_seconds() > 3500);
    }

    #[tokio::test]
    async fn test_request_falls_back_to_ciaddr() {
        let handler = make_handler(test_config());
        let mac = [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x03];
        let ip = Ipv4Addr::new(192, 168, 0, 120);

        // Renewing client: no option 50, address in ciaddr.
        let request = create_packet_with_ciaddr(MessageType::Request, mac, 1, ip, vec![]);
        let ack = handler.handle(&request).await.unwrap();

        assert_eq!(ack.message_type(), Some(MessageType::Ack));
        assert_eq!(ack.yiaddr, ip);
    }

    #[tokio::test]
    async fn test_request_for_unmanaged_address_is_dropped() {
        let handler = make_handler(test_config());
        let mac = [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x04];

        let request = create_dhcp_packet(
            MessageType::Request,
            mac,
            1,
            vec![DhcpOption::RequestedIpAddress(Ipv4Addr::new(10, 0, 0, 1))],
        );
        assert!(handler.handle(&request).await.is_none());
        assert!(handler.pool.lease_for(MacAddr(mac)).await.is_none());
    }

    #[tokio::test]
    async fn test_request_for_foreign_lease_is_dropped_without_reply() {
        // RFC 2131 would send a DHCPNAK here; this server instead stays
        // silent and lets the client time out and restart discovery.
        let handler = make_handler(test_config());
        let mac_a = [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x05];
        let mac_b = [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x06];

        let request_a = create_dhcp_packet(
            MessageType::Request,
            mac_a,
            1,
            vec![DhcpOption::RequestedIpAddress(Ipv4Addr::new(192, 168, 0, 100))],
        );
        handler.handle(&request_a).await.unwrap();

        let request_b = create_dhcp_packet(
            MessageType::Request,
            mac_b,
            2,
            vec![DhcpOption::RequestedIpAddress(Ipv4Addr::new(192, 168, 0, 100))],
        );
        assert!(handler.handle(&request_b).await.is_none());
    }

    #[tokio::test]
    async fn test_release_never_replies() {
        let handler = make_handler(test_config());
        let mac = [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x07];
        let ip = Ipv4Addr::new(192, 168, 0, 100);

        let request = create_dhcp_packet(
            MessageType::Request,
            mac,
            1,
            vec![DhcpOption::RequestedIpAddress(ip)],
        );
        handler.handle(&request).await.unwrap();

        let release = create_packet_with_ciaddr(MessageType::Release, mac, 2, ip, vec![]);
        assert!(handler.handle(&release).await.is_none());
        assert!(handler.pool.lease_for(MacAddr(mac)).await.is_none());
    }

    #[tokio::test]
    async fn test_decline_and_inform_are_ignored() {
        let handler = make_handler(test_config());
        let mac = [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x08];

        let decline = create_dhcp_packet(MessageType::Decline, mac, 1, vec![]);
        assert!(handler.handle(&decline).await.is_none());

        let inform = create_dhcp_packet(MessageType::Inform, mac, 2, vec![]);
        assert!(handler.handle(&inform).await.is_none());
    }

    #[tokio::test]
    async fn test_bootreply_packets_are_ignored() {
        let handler = make_handler(test_config());
        let mac = [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x09];

        let mut data = create_dhcp_packet(MessageType::Discover, mac, 1, vec![]);
        data[0] = crate::packet::BOOTREPLY;

        assert!(handler.handle(&data).await.is_none());
    }

    #[tokio::test]
    async fn test_truncated_datagram_is_dropped() {
        let handler = make_handler(test_config());
        assert!(handler.handle(&[0u8; 100]).await.is_none());
    }

    #[tokio::test]
    async fn test_plain_bootp_is_ignored() {
        let handler = make_handler(test_config());
        let mac = [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x0a];

        let mut data = create_dhcp_packet(MessageType::Discover, mac, 1, vec![]);
        // Break the cookie: the packet decodes as BOOTP without options.
        data[236..240].copy_from_slice(&[0, 0, 0, 0]);

        assert!(handler.handle(&data).await.is_none());
    }

    #[tokio::test]
    async fn test_pool_exhaustion_means_silence() {
        let config = Config {
            pool_start: Ipv4Addr::new(192, 168, 0, 100),
            pool_end: Ipv4Addr::new(192, 168, 0, 100),
            ..test_config()
        };
        let handler = make_handler(config);

        let mac_a = [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x0b];
        let request = create_dhcp_packet(
            MessageType::Request,
            mac_a,
            1,
            vec![DhcpOption::RequestedIpAddress(Ipv4Addr::new(192, 168, 0, 100))],
        );
        handler.handle(&request).await.unwrap();

        let mac_b = [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x0c];
        let discover = create_dhcp_packet(MessageType::Discover, mac_b, 2, vec![]);
        assert!(handler.handle(&discover).await.is_none());
    }

    #[tokio::test]
    async fn test_reserved_client_always_gets_its_address() {
        let config = Config {
            reservations: vec![StaticReservation {
                mac_address: "42:79:99:bb:69:6f".to_string(),
                ip_address: Ipv4Addr::new(192, 168, 0, 33),
            }],
            ..test_config()
        };
        let handler = make_handler(config);
        let mac = [0x42, 0x79, 0x99, 0xbb, 0x69, 0x6f];

        let discover = create_dhcp_packet(MessageType::Discover, mac, 1, vec![]);
        let offer = handler.handle(&discover).await.unwrap();
        assert_eq!(offer.yiaddr, Ipv4Addr::new(192, 168, 0, 33));

        // Even a request for a pool address is answered with the reservation.
        let request = create_dhcp_packet(
            MessageType::Request,
            mac,
            2,
            vec![DhcpOption::RequestedIpAddress(Ipv4Addr::new(192, 168, 0, 150))],
        );
        let ack = handler.handle(&request).await.unwrap();
        assert_eq!(ack.yiaddr, Ipv4Addr::new(192, 168, 0, 33));
    }

    #[tokio::test]
    async fn test_full_lease_cycle_with_contention() {
        let config = Config {
            pool_start: Ipv4Addr::new(192, 168, 0, 100),
            pool_end: Ipv4Addr::new(192, 168, 0, 102),
            reservations: vec![StaticReservation {
                mac_address: "aa:bb:cc:dd:ee:99".to_string(),
                ip_address: Ipv4Addr::new(192, 168, 0, 50),
            }],
            ..test_config()
        };
        let handler = make_handler(config);

        let mac_a = [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x01];
        let mac_b = [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x02];
        let mac_r = [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x99];
        let first_ip = Ipv4Addr::new(192, 168, 0, 100);

        // A discovers and confirms the first pool address.
        let offer = handler
            .handle(&create_dhcp_packet(MessageType::Discover, mac_a, 1, vec![]))
            .await
            .unwrap();
        assert_eq!(offer.yiaddr, first_ip);
        let ack = handler
            .handle(&create_dhcp_packet(
                MessageType::Request,
                mac_a,
                2,
                vec![DhcpOption::RequestedIpAddress(first_ip)],
            ))
            .await
            .unwrap();
        assert_eq!(ack.message_type(), Some(MessageType::Ack));

        // B gets the next address offered.
        let offer_b = handler
            .handle(&create_dhcp_packet(MessageType::Discover, mac_b, 3, vec![]))
            .await
            .unwrap();
        assert_eq!(offer_b.yiaddr, Ipv4Addr::new(192, 168, 0, 101));

        // B requesting A's address goes unanswered.
        assert!(
            handler
                .handle(&create_dhcp_packet(
                    MessageType::Request,
                    mac_b,
                    4,
                    vec![DhcpOption::RequestedIpAddress(first_ip)],
                ))
                .await
                .is_none()
        );

        // The reserved client gets its fixed address.
        let offer_r = handler
            .handle(&create_dhcp_packet(MessageType::Discover, mac_r, 5, vec![]))
            .await
            .unwrap();
        assert_eq!(offer_r.yiaddr, Ipv4Addr::new(192, 168, 0, 50));

        // A releases; B can now claim the freed address.
        handler
            .handle(&create_packet_with_ciaddr(
                MessageType::Release,
                mac_a,
                6,
                first_ip,
                vec![],
            ))
            .await;
        let ack_b = handler
            .handle(&create_dhcp_packet(
                MessageType::Request,
                mac_b,
                7,
                vec![DhcpOption::RequestedIpAddress(first_ip)],
            ))
            .await
            .unwrap();
        assert_eq!(ack_b.message_type(), Some(MessageType::Ack));
        assert_eq!(ack_b.yiaddr, first_ip);
    }
}
