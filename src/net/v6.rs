//! DHCPv6 over raw Ethernet, including listen-address matching and
//! multicast group membership.

use std::collections::HashSet;
use std::net::Ipv6Addr;
use std::sync::Mutex;

use advmac::MacAddr6;
use dhcproto::v6;
use dhcproto::{Decodable, Encodable};
use smoltcp::phy::ChecksumCapabilities;
use smoltcp::wire::{
    EthernetAddress, EthernetFrame, EthernetProtocol, EthernetRepr, IpAddress, IpProtocol,
    Ipv6Packet, Ipv6Repr, UdpPacket, UdpRepr,
};
use tracing::{debug, info, trace};

use super::multicast;
use super::socket::PacketSocket;
use super::{InterfaceInfo, NetError, REPLY_HOP_LIMIT, SERVER_PORT_V6};

/// Frames that cannot hold Ethernet + IPv6 + UDP + the 4-byte DHCPv6 header
/// are discarded unparsed.
const MIN_FRAME_LEN: usize = 14 + 40 + 8 + 4;

const ETHERTYPE_IPV6: u16 = 0x86dd;

#[derive(Debug)]
pub struct ReceivedV6 {
    pub message: v6::Message,
    pub src_ip: Ipv6Addr,
    pub src_mac: MacAddr6,
    /// Where the client sent the packet; the engine needs this for the
    /// RFC 3315 §18.2.1 unicast check.
    pub dst_ip: Ipv6Addr,
}

/// True when `dst` is one of the configured listen addresses, or the listen
/// set contains the wildcard `::`.
pub(crate) fn matches_listen(listen: &[Ipv6Addr], dst: Ipv6Addr) -> bool {
    listen
        .iter()
        .any(|a| *a == Ipv6Addr::UNSPECIFIED || *a == dst)
}

pub(crate) fn parse_frame(frame: &[u8], listen: &[Ipv6Addr]) -> Option<ReceivedV6> {
    if frame.len() < MIN_FRAME_LEN {
        return None;
    }

    let eth = EthernetFrame::new_checked(frame).ok()?;
    if eth.ethertype() != EthernetProtocol::Ipv6 {
        return None;
    }

    let ip = Ipv6Packet::new_checked(eth.payload()).ok()?;
    if ip.next_header() != IpProtocol::Udp {
        return None;
    }
    if !matches_listen(listen, ip.dst_addr()) {
        return None;
    }

    let udp = UdpPacket::new_checked(ip.payload()).ok()?;
    if udp.dst_port() != SERVER_PORT_V6 {
        return None;
    }

    let message = match v6::Message::from_bytes(udp.payload()) {
        Ok(message) => message,
        Err(e) => {
            debug!(error = %e, "malformed DHCPv6 payload");
            return None;
        }
    };

    Some(ReceivedV6 {
        message,
        src_ip: ip.src_addr(),
        src_mac: MacAddr6::new(eth.src_addr().0),
        dst_ip: ip.dst_addr(),
    })
}

pub(crate) fn build_frame(
    src_mac: MacAddr6,
    dst_mac: MacAddr6,
    src_ip: Ipv6Addr,
    dst_ip: Ipv6Addr,
    src_port: u16,
    dst_port: u16,
    payload: &[u8],
) -> Vec<u8> {
    let udp = UdpRepr { src_port, dst_port };
    let ip = Ipv6Repr {
        src_addr: src_ip,
        dst_addr: dst_ip,
        next_header: IpProtocol::Udp,
        payload_len: udp.header_len() + payload.len(),
        hop_limit: REPLY_HOP_LIMIT,
    };
    let eth = EthernetRepr {
        src_addr: EthernetAddress(src_mac.to_array()),
        dst_addr: EthernetAddress(dst_mac.to_array()),
        ethertype: EthernetProtocol::Ipv6,
    };

    let total = eth.buffer_len() + ip.buffer_len() + udp.header_len() + payload.len();
    let mut buf = vec![0u8; total];

    let mut eth_frame = EthernetFrame::new_unchecked(&mut buf);
    eth.emit(&mut eth_frame);

    let mut ip_packet = Ipv6Packet::new_unchecked(eth_frame.payload_mut());
    ip.emit(&mut ip_packet);

    let mut udp_packet = UdpPacket::new_unchecked(ip_packet.payload_mut());
    udp.emit(
        &mut udp_packet,
        &IpAddress::Ipv6(src_ip),
        &IpAddress::Ipv6(dst_ip),
        payload.len(),
        |p| p.copy_from_slice(payload),
        &ChecksumCapabilities::default(),
    );

    buf
}

/// Per-interface DHCPv6 connection.
///
/// Listens for traffic destined to the configured addresses and replies from
/// `reply_from` (the first link-local address when unconfigured). Multicast
/// listen addresses are joined on open with an MLDv2 report and left on
/// close.
pub struct DhcpV6Conn {
    socket: PacketSocket,
    iface_mac: MacAddr6,
    listen: Vec<Ipv6Addr>,
    reply_from: Ipv6Addr,
    mld_source: Ipv6Addr,
    joined: Mutex<HashSet<Ipv6Addr>>,
}

impl DhcpV6Conn {
    pub async fn open(
        iface: &InterfaceInfo,
        listen: Vec<Ipv6Addr>,
        reply_from: Option<Ipv6Addr>,
    ) -> Result<DhcpV6Conn, NetError> {
        if listen.is_empty() {
            return Err(NetError::NoListenAddresses);
        }
        if let Some(addr) = reply_from {
            if addr.is_multicast() {
                return Err(NetError::MulticastReplyFrom(addr));
            }
        }

        let reply_from = match reply_from {
            Some(addr) => addr,
            None => iface
                .first_link_local_v6()
                .ok_or_else(|| NetError::NoAddress {
                    iface: iface.name.clone(),
                    what: "link-local IPv6",
                })?,
        };

        let socket = PacketSocket::open(iface.index, ETHERTYPE_IPV6)?;
        let conn = DhcpV6Conn {
            socket,
            iface_mac: iface.mac,
            listen: listen.clone(),
            reply_from,
            // MLD reports are sourced from link-local, or unspecified while
            // the interface has none.
            mld_source: iface.first_link_local_v6().unwrap_or(Ipv6Addr::UNSPECIFIED),
            joined: Mutex::new(HashSet::new()),
        };

        for addr in listen.into_iter().filter(|a| a.is_multicast()) {
            conn.join_multicast(addr).await?;
        }

        Ok(conn)
    }

    /// Join a multicast group. Re-joining an already-joined group is a
    /// no-op.
    pub async fn join_multicast(&self, group: Ipv6Addr) -> Result<(), NetError> {
        if !self.joined.lock().unwrap().insert(group) {
            return Ok(());
        }
        info!(%group, "joining multicast group");
        let report = multicast::mld_report_frame(
            self.iface_mac,
            self.mld_source,
            group,
            multicast::MldRecordType::ChangeToExclude,
        );
        self.socket.send(&report).await?;
        Ok(())
    }

    /// Leave a multicast group by reporting an empty include list. Leaving a
    /// group that was never joined is a no-op.
    pub async fn leave_multicast(&self, group: Ipv6Addr) -> Result<(), NetError> {
        if !self.joined.lock().unwrap().remove(&group) {
            return Ok(());
        }
        info!(%group, "leaving multicast group");
        let report = multicast::mld_report_frame(
            self.iface_mac,
            self.mld_source,
            group,
            multicast::MldRecordType::ChangeToInclude,
        );
        self.socket.send(&report).await?;
        Ok(())
    }

    /// Leave every joined group. Called on engine shutdown.
    pub async fn leave_all(&self) {
        let groups: Vec<Ipv6Addr> = self.joined.lock().unwrap().iter().copied().collect();
        for group in groups {
            if let Err(e) = self.leave_multicast(group).await {
                debug!(%group, error = %e, "failed to leave multicast group");
            }
        }
    }

    pub fn reply_from(&self) -> Ipv6Addr {
        self.reply_from
    }

    pub async fn read_from(&self) -> Result<ReceivedV6, NetError> {
        let mut buf = [0u8; 2048];
        loop {
            let len = self.socket.recv(&mut buf).await?;
            trace!(len, "frame received");
            match parse_frame(&buf[..len], &self.listen) {
                Some(received) => return Ok(received),
                None => continue,
            }
        }
    }

    /// Send `message` unicast to the packet's source.
    pub async fn write_to(
        &self,
        message: &v6::Message,
        dst_ip: Ipv6Addr,
        dst_mac: MacAddr6,
        dst_port: u16,
    ) -> Result<(), NetError> {
        let payload = message
            .to_vec()
            .map_err(|e| NetError::Encode(e.to_string()))?;

        let frame = build_frame(
            self.iface_mac,
            dst_mac,
            self.reply_from,
            dst_ip,
            SERVER_PORT_V6,
            dst_port,
            &payload,
        );

        debug!(%dst_ip, dst_port, len = frame.len(), "sending DHCPv6 reply");
        self.socket.send(&frame).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dhcproto::v6::{DhcpOption, MessageType};

    const LISTEN: [Ipv6Addr; 1] = [Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0x0001, 0x0002)];

    fn test_message() -> v6::Message {
        let mut msg = v6::Message::new(MessageType::Solicit);
        msg.opts_mut()
            .insert(DhcpOption::ClientId(vec![0x00, 0x03, 0x00, 0x01, 0xaa]));
        msg
    }

    fn test_frame(dst_ip: Ipv6Addr, dst_port: u16) -> Vec<u8> {
        let payload = test_message().to_vec().unwrap();
        build_frame(
            MacAddr6::new([0x02, 0x00, 0x00, 0x00, 0x00, 0x01]),
            MacAddr6::new([0x33, 0x33, 0x00, 0x01, 0x00, 0x02]),
            "fe80::1".parse().unwrap(),
            dst_ip,
            546,
            dst_port,
            &payload,
        )
    }

    #[test]
    fn round_trip_to_multicast_listener() {
        let frame = test_frame(LISTEN[0], 547);
        let received = parse_frame(&frame, &LISTEN).expect("frame should pass filters");

        assert_eq!(received.message.msg_type(), MessageType::Solicit);
        assert_eq!(received.src_ip, "fe80::1".parse::<Ipv6Addr>().unwrap());
        assert_eq!(received.dst_ip, LISTEN[0]);
    }

    #[test]
    fn filter_rejects_unlistened_destination() {
        let frame = test_frame("2001:db8::1".parse().unwrap(), 547);
        assert!(parse_frame(&frame, &LISTEN).is_none());
    }

    #[test]
    fn wildcard_listen_accepts_anything() {
        let frame = test_frame("2001:db8::1".parse().unwrap(), 547);
        let wildcard = [Ipv6Addr::UNSPECIFIED];
        assert!(parse_frame(&frame, &wildcard).is_some());
    }

    #[test]
    fn filter_rejects_wrong_port() {
        let frame = test_frame(LISTEN[0], 548);
        assert!(parse_frame(&frame, &LISTEN).is_none());
    }

    #[test]
    fn filter_rejects_short_frames() {
        assert!(parse_frame(&[0u8; 30], &LISTEN).is_none());
    }
}
