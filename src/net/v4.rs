//! DHCPv4 over raw Ethernet: inbound filter pipeline and reply frames.

use std::net::Ipv4Addr;

use advmac::MacAddr6;
use dhcproto::v4;
use dhcproto::{Decodable, Encodable};
use smoltcp::phy::ChecksumCapabilities;
use smoltcp::wire::{
    EthernetAddress, EthernetFrame, EthernetProtocol, EthernetRepr, IpAddress, IpProtocol,
    Ipv4Packet, Ipv4Repr, UdpPacket, UdpRepr,
};
use tracing::{debug, trace};

use super::socket::PacketSocket;
use super::{InterfaceInfo, NetError, REPLY_HOP_LIMIT, SERVER_PORT_V4};
use crate::v4::extensions::MessageExtV4;

/// Frames shorter than Ethernet + minimal IPv4 + UDP + a truncated BOOTP
/// fixed header cannot carry DHCPv4; drop them before parsing.
const MIN_FRAME_LEN: usize = 14 + 20 + 8 + 58;

const ETHERTYPE_IPV4: u16 = 0x0800;

#[derive(Debug)]
pub struct ReceivedV4 {
    pub message: v4::Message,
    pub src_ip: Ipv4Addr,
    pub src_mac: MacAddr6,
}

/// Run one frame through the inbound filter pipeline. Every layer must pass
/// for the frame to be delivered.
pub(crate) fn parse_frame(frame: &[u8]) -> Option<ReceivedV4> {
    if frame.len() < MIN_FRAME_LEN {
        return None;
    }

    let eth = EthernetFrame::new_checked(frame).ok()?;
    if eth.ethertype() != EthernetProtocol::Ipv4 {
        return None;
    }

    let ip = Ipv4Packet::new_checked(eth.payload()).ok()?;
    if ip.next_header() != IpProtocol::Udp {
        return None;
    }

    let udp = UdpPacket::new_checked(ip.payload()).ok()?;
    if udp.dst_port() != SERVER_PORT_V4 {
        return None;
    }

    let message = match v4::Message::from_bytes(udp.payload()) {
        Ok(message) => message,
        Err(e) => {
            debug!(error = %e, "malformed DHCPv4 payload");
            return None;
        }
    };

    Some(ReceivedV4 {
        message,
        src_ip: ip.src_addr(),
        src_mac: MacAddr6::new(eth.src_addr().0),
    })
}

/// Assemble a complete reply frame. Checksums and length fields are filled
/// by the serializers.
pub(crate) fn build_frame(
    src_mac: MacAddr6,
    dst_mac: MacAddr6,
    src_ip: Ipv4Addr,
    dst_ip: Ipv4Addr,
    src_port: u16,
    dst_port: u16,
    payload: &[u8],
) -> Vec<u8> {
    let udp = UdpRepr { src_port, dst_port };
    let ip = Ipv4Repr {
        src_addr: src_ip,
        dst_addr: dst_ip,
        next_header: IpProtocol::Udp,
        payload_len: udp.header_len() + payload.len(),
        hop_limit: REPLY_HOP_LIMIT,
    };
    let eth = EthernetRepr {
        src_addr: EthernetAddress(src_mac.to_array()),
        dst_addr: EthernetAddress(dst_mac.to_array()),
        ethertype: EthernetProtocol::Ipv4,
    };

    let total = eth.buffer_len() + ip.buffer_len() + udp.header_len() + payload.len();
    let mut buf = vec![0u8; total];

    let mut eth_frame = EthernetFrame::new_unchecked(&mut buf);
    eth.emit(&mut eth_frame);

    let mut ip_packet = Ipv4Packet::new_unchecked(eth_frame.payload_mut());
    ip.emit(&mut ip_packet, &ChecksumCapabilities::default());

    let mut udp_packet = UdpPacket::new_unchecked(ip_packet.payload_mut());
    udp.emit(
        &mut udp_packet,
        &IpAddress::Ipv4(src_ip),
        &IpAddress::Ipv4(dst_ip),
        payload.len(),
        |p| p.copy_from_slice(payload),
        &ChecksumCapabilities::default(),
    );

    buf
}

/// Per-interface DHCPv4 connection over a packet socket.
pub struct DhcpV4Conn {
    socket: PacketSocket,
    iface_mac: MacAddr6,
}

impl DhcpV4Conn {
    pub fn open(iface: &InterfaceInfo) -> Result<DhcpV4Conn, NetError> {
        let socket = PacketSocket::open(iface.index, ETHERTYPE_IPV4)?;
        Ok(DhcpV4Conn {
            socket,
            iface_mac: iface.mac,
        })
    }

    /// Block until a frame passes every filter layer. A socket error is
    /// returned to the caller, which interprets it as shutdown when the
    /// shutdown flag is set.
    pub async fn read_from(&self) -> Result<ReceivedV4, NetError> {
        let mut buf = [0u8; 2048];
        loop {
            let len = self.socket.recv(&mut buf).await?;
            trace!(len, "frame received");
            match parse_frame(&buf[..len]) {
                Some(received) => return Ok(received),
                None => continue,
            }
        }
    }

    /// Send `message` to the given link-local destination. The IPv4 source
    /// is the reply's own ServerIdentifier option.
    pub async fn write_to(
        &self,
        message: &v4::Message,
        dst_ip: Ipv4Addr,
        dst_mac: MacAddr6,
        dst_port: u16,
    ) -> Result<(), NetError> {
        let src_ip = *message
            .server_id()
            .ok_or(NetError::MissingServerIdentifier)?;

        let payload = message
            .to_vec()
            .map_err(|e| NetError::Encode(e.to_string()))?;

        let frame = build_frame(
            self.iface_mac,
            dst_mac,
            src_ip,
            dst_ip,
            SERVER_PORT_V4,
            dst_port,
            &payload,
        );

        debug!(%dst_ip, dst_port, len = frame.len(), "sending DHCPv4 reply");
        self.socket.send(&frame).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dhcproto::v4::{DhcpOption, Opcode};

    fn test_message() -> v4::Message {
        let chaddr = [0xaau8, 0xbb, 0xcc, 0xdd, 0xee, 0x01];
        let mut msg = v4::Message::new_with_id(
            0x1234,
            Ipv4Addr::UNSPECIFIED,
            Ipv4Addr::UNSPECIFIED,
            Ipv4Addr::UNSPECIFIED,
            Ipv4Addr::UNSPECIFIED,
            &chaddr,
        );
        msg.set_opcode(Opcode::BootRequest);
        msg.opts_mut()
            .insert(DhcpOption::MessageType(v4::MessageType::Discover));
        msg
    }

    fn test_frame(dst_port: u16) -> Vec<u8> {
        let payload = test_message().to_vec().unwrap();
        build_frame(
            MacAddr6::new([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x01]),
            MacAddr6::new([0xff; 6]),
            Ipv4Addr::UNSPECIFIED,
            Ipv4Addr::BROADCAST,
            68,
            dst_port,
            &payload,
        )
    }

    #[test]
    fn round_trip_through_frame_assembly() {
        let frame = test_frame(67);
        let received = parse_frame(&frame).expect("frame should pass all filters");

        assert_eq!(received.message.xid(), 0x1234);
        assert_eq!(received.src_ip, Ipv4Addr::UNSPECIFIED);
        assert_eq!(
            received.src_mac,
            MacAddr6::new([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x01])
        );
    }

    #[test]
    fn filter_rejects_wrong_ethertype() {
        let mut frame = test_frame(67);
        frame[12] = 0x86;
        frame[13] = 0xdd;
        assert!(parse_frame(&frame).is_none());
    }

    #[test]
    fn filter_rejects_non_udp() {
        let mut frame = test_frame(67);
        // IPv4 protocol byte.
        frame[14 + 9] = 6;
        assert!(parse_frame(&frame).is_none());
    }

    #[test]
    fn filter_rejects_wrong_port() {
        let frame = test_frame(68);
        assert!(parse_frame(&frame).is_none());
    }

    #[test]
    fn filter_rejects_short_frames() {
        assert!(parse_frame(&[0u8; 40]).is_none());
    }
}
