//! MLDv2 membership reports for the DHCPv6 multicast groups.
//!
//! A join announces CHANGE_TO_EXCLUDE with no sources; a leave announces
//! CHANGE_TO_INCLUDE with an empty source list. Reports go to the
//! all-MLDv2-routers group `ff02::16` with the hop-by-hop router-alert
//! extension header and hop limit 1 (RFC 3810 §5.2).

use std::net::Ipv6Addr;

use advmac::MacAddr6;

/// Multicast address record types (RFC 3810 §5.2.12).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MldRecordType {
    ChangeToInclude = 3,
    ChangeToExclude = 4,
}

/// All MLDv2-capable routers.
const MLD_REPORT_GROUP: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 0x16);

const ICMPV6_MLDV2_REPORT: u8 = 143;
const IPPROTO_HOPOPTS: u8 = 0;
const IPPROTO_ICMPV6: u8 = 58;

/// Map an IPv6 multicast group to its Ethernet destination:
/// `33:33` followed by the group's last 32 bits (RFC 2464 §7).
pub fn multicast_dst_mac(group: Ipv6Addr) -> MacAddr6 {
    let o = group.octets();
    MacAddr6::new([0x33, 0x33, o[12], o[13], o[14], o[15]])
}

/// RFC 1071 internet checksum over `data`, seeded with `initial`.
fn fold_checksum(initial: u32, data: &[u8]) -> u32 {
    let mut sum = initial;
    let mut chunks = data.chunks_exact(2);
    for chunk in &mut chunks {
        sum += u32::from(u16::from_be_bytes([chunk[0], chunk[1]]));
    }
    if let [last] = chunks.remainder() {
        sum += u32::from(u16::from_be_bytes([*last, 0]));
    }
    sum
}

/// ICMPv6 checksum: pseudo-header (source, destination, upper-layer length,
/// next header) plus the ICMPv6 body.
fn icmpv6_checksum(src: Ipv6Addr, dst: Ipv6Addr, body: &[u8]) -> u16 {
    let mut sum = 0u32;
    sum = fold_checksum(sum, &src.octets());
    sum = fold_checksum(sum, &dst.octets());
    sum += body.len() as u32;
    sum += u32::from(IPPROTO_ICMPV6);
    sum = fold_checksum(sum, body);

    while sum > 0xffff {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}

/// Build the complete Ethernet frame for a single-record MLDv2 report.
pub fn mld_report_frame(
    src_mac: MacAddr6,
    src_ip: Ipv6Addr,
    group: Ipv6Addr,
    record_type: MldRecordType,
) -> Vec<u8> {
    // ICMPv6 body: type, code, checksum, reserved, record count, then one
    // address record with no sources and no aux data.
    let mut icmp = Vec::with_capacity(28);
    icmp.extend_from_slice(&[ICMPV6_MLDV2_REPORT, 0, 0, 0]);
    icmp.extend_from_slice(&0u16.to_be_bytes());
    icmp.extend_from_slice(&1u16.to_be_bytes());
    icmp.push(record_type as u8);
    icmp.push(0);
    icmp.extend_from_slice(&0u16.to_be_bytes());
    icmp.extend_from_slice(&group.octets());

    let checksum = icmpv6_checksum(src_ip, MLD_REPORT_GROUP, &icmp);
    icmp[2..4].copy_from_slice(&checksum.to_be_bytes());

    // Hop-by-hop header: next = ICMPv6, length 0, router alert (MLD), PadN.
    let hop_by_hop = [IPPROTO_ICMPV6, 0, 0x05, 0x02, 0x00, 0x00, 0x01, 0x00];

    let payload_len = hop_by_hop.len() + icmp.len();
    let mut frame = Vec::with_capacity(14 + 40 + payload_len);

    // Ethernet header.
    frame.extend_from_slice(&multicast_dst_mac(MLD_REPORT_GROUP).to_array());
    frame.extend_from_slice(&src_mac.to_array());
    frame.extend_from_slice(&0x86ddu16.to_be_bytes());

    // IPv6 header.
    frame.extend_from_slice(&[0x60, 0, 0, 0]);
    frame.extend_from_slice(&(payload_len as u16).to_be_bytes());
    frame.push(IPPROTO_HOPOPTS);
    frame.push(1); // hop limit
    frame.extend_from_slice(&src_ip.octets());
    frame.extend_from_slice(&MLD_REPORT_GROUP.octets());

    frame.extend_from_slice(&hop_by_hop);
    frame.extend_from_slice(&icmp);

    frame
}

#[cfg(test)]
mod tests {
    use super::*;

    const GROUP: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0x0001, 0x0002);

    #[test]
    fn multicast_mac_takes_low_32_bits() {
        assert_eq!(
            multicast_dst_mac(GROUP).to_array(),
            [0x33, 0x33, 0x00, 0x01, 0x00, 0x02]
        );
        assert_eq!(
            multicast_dst_mac("ff05::1:3".parse().unwrap()).to_array(),
            [0x33, 0x33, 0x00, 0x01, 0x00, 0x03]
        );
    }

    #[test]
    fn report_frame_layout() {
        let src: Ipv6Addr = "fe80::1".parse().unwrap();
        let frame = mld_report_frame(
            MacAddr6::new([2, 0, 0, 0, 0, 1]),
            src,
            GROUP,
            MldRecordType::ChangeToExclude,
        );

        // Ethernet: to 33:33:00:00:00:16.
        assert_eq!(&frame[0..6], &[0x33, 0x33, 0x00, 0x00, 0x00, 0x16]);
        assert_eq!(&frame[12..14], &[0x86, 0xdd]);
        // IPv6: hop-by-hop next header, hop limit 1.
        assert_eq!(frame[14 + 6], 0);
        assert_eq!(frame[14 + 7], 1);
        // Hop-by-hop: router alert option.
        let hbh = 14 + 40;
        assert_eq!(frame[hbh], 58);
        assert_eq!(&frame[hbh + 2..hbh + 6], &[0x05, 0x02, 0x00, 0x00]);
        // ICMPv6 report with one CHANGE_TO_EXCLUDE record for the group.
        let icmp = hbh + 8;
        assert_eq!(frame[icmp], 143);
        assert_eq!(&frame[icmp + 6..icmp + 8], &[0, 1]);
        assert_eq!(frame[icmp + 8], 4);
        assert_eq!(&frame[icmp + 12..icmp + 28], &GROUP.octets());
        assert_eq!(frame.len(), icmp + 28);
    }

    #[test]
    fn leave_uses_change_to_include() {
        let frame = mld_report_frame(
            MacAddr6::new([2, 0, 0, 0, 0, 1]),
            "fe80::1".parse().unwrap(),
            GROUP,
            MldRecordType::ChangeToInclude,
        );
        assert_eq!(frame[14 + 40 + 8 + 8], 3);
    }

    #[test]
    fn checksum_verifies_to_zero() {
        let src: Ipv6Addr = "fe80::1".parse().unwrap();
        let frame = mld_report_frame(
            MacAddr6::new([2, 0, 0, 0, 0, 1]),
            src,
            GROUP,
            MldRecordType::ChangeToExclude,
        );
        // Re-summing the body with its embedded checksum must yield zero.
        let icmp = &frame[14 + 40 + 8..];
        let mut sum = 0u32;
        sum = fold_checksum(sum, &src.octets());
        sum = fold_checksum(sum, &MLD_REPORT_GROUP.octets());
        sum += icmp.len() as u32;
        sum += u32::from(IPPROTO_ICMPV6);
        sum = fold_checksum(sum, icmp);
        while sum > 0xffff {
            sum = (sum & 0xffff) + (sum >> 16);
        }
        assert_eq!(sum, 0xffff);
    }
}
