//! DHCPv4 message dispatch and reply construction (RFC 2131/2132).

use std::net::Ipv4Addr;
use std::sync::Arc;

use advmac::MacAddr6;
use dhcproto::v4::{self, DhcpOption};
use tracing::{debug, info, instrument, warn};

use crate::config::DhcpConfig;
use crate::net::{CLIENT_PORT_V4, SERVER_PORT_V4};
use crate::resolver::{ResolveError, Resolver};
use crate::v4::extensions::MessageExtV4;
use crate::{saturating_secs, ClientBindingV4, ClientId};

/// Where a reply frame is sent on the local link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DestinationV4 {
    pub ip: Ipv4Addr,
    pub mac: MacAddr6,
    pub port: u16,
}

#[derive(Debug)]
pub struct ReplyV4 {
    pub message: v4::Message,
    pub destination: DestinationV4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoReplyReason {
    NotBootRequest,
    NoMessageType,
    NoHardwareAddress,
    NoRequestedIp,
    ForeignServer,
    NoClientAddress,
    LookupFailed,
    NoReplyNeeded,
    NotImplemented,
}

pub enum DhcpV4Response {
    Reply(ReplyV4),
    NoResponse(NoReplyReason),
}

/// Per-listener handler state: everything needed to answer a message,
/// minus the socket.
pub struct V4Handler {
    pub(crate) resolver: Arc<dyn Resolver>,
    pub(crate) dhcp: Arc<DhcpConfig>,
    pub(crate) reply_from: Ipv4Addr,
    pub(crate) reply_hostname: String,
}

impl V4Handler {
    pub fn new(
        resolver: Arc<dyn Resolver>,
        dhcp: Arc<DhcpConfig>,
        reply_from: Ipv4Addr,
        reply_hostname: String,
    ) -> Self {
        V4Handler {
            resolver,
            dhcp,
            reply_from,
            reply_hostname,
        }
    }

    /// 4.3: a server can receive DHCPDISCOVER, DHCPREQUEST, DHCPDECLINE,
    /// DHCPRELEASE and DHCPINFORM from a client.
    pub async fn handle_message(&self, msg: &v4::Message, src_mac: MacAddr6) -> DhcpV4Response {
        if msg.opcode() != v4::Opcode::BootRequest {
            return DhcpV4Response::NoResponse(NoReplyReason::NotBootRequest);
        }
        let Some(message_type) = msg.message_type() else {
            return DhcpV4Response::NoResponse(NoReplyReason::NoMessageType);
        };

        match message_type {
            v4::MessageType::Discover => self.handle_discover(msg, src_mac).await,
            v4::MessageType::Request => self.handle_request(msg, src_mac).await,
            v4::MessageType::Decline => self.handle_decline(msg).await,
            v4::MessageType::Release => self.handle_release(msg).await,
            v4::MessageType::Inform => {
                let mac = msg.chaddr_mac();
                info!(?mac, "DHCPINFORM received; not implemented");
                DhcpV4Response::NoResponse(NoReplyReason::NotImplemented)
            }
            other => {
                debug!(message_type = ?other, "not a client-to-server message type");
                DhcpV4Response::NoResponse(NoReplyReason::NoMessageType)
            }
        }
    }

    /// <https://datatracker.ietf.org/doc/html/rfc2131#section-4.3.1>
    #[instrument(skip(self, msg, src_mac), fields(xid = msg.xid()))]
    async fn handle_discover(&self, msg: &v4::Message, src_mac: MacAddr6) -> DhcpV4Response {
        let Some(mac) = msg.chaddr_mac() else {
            return DhcpV4Response::NoResponse(NoReplyReason::NoHardwareAddress);
        };
        let xid = msg.xid();
        let client = ClientId::Mac(mac);
        info!(%client, "DHCPDISCOVER");

        let mut info = ClientBindingV4::with_defaults(&self.dhcp);
        if let Err(e) = self.resolver.offer_v4(&mut info, xid, &client).await {
            log_resolve_failure(&client, &e);
            return DhcpV4Response::NoResponse(NoReplyReason::LookupFailed);
        }

        match self.prepare_answer(msg, &info, v4::MessageType::Offer) {
            Some(mut reply) => {
                let destination = select_destination(msg, &mut reply, src_mac);
                DhcpV4Response::Reply(ReplyV4 {
                    message: reply,
                    destination,
                })
            }
            None => DhcpV4Response::NoResponse(NoReplyReason::LookupFailed),
        }
    }

    /// <https://datatracker.ietf.org/doc/html/rfc2131#section-4.3.2>
    #[instrument(skip(self, msg, src_mac), fields(xid = msg.xid()))]
    async fn handle_request(&self, msg: &v4::Message, src_mac: MacAddr6) -> DhcpV4Response {
        let Some(mac) = msg.chaddr_mac() else {
            return DhcpV4Response::NoResponse(NoReplyReason::NoHardwareAddress);
        };
        let xid = msg.xid();
        let client = ClientId::Mac(mac);

        let Some(requested_ip) = msg.requested_ip_addr().copied() else {
            debug!(%client, "DHCPREQUEST without a requested address");
            return DhcpV4Response::NoResponse(NoReplyReason::NoRequestedIp);
        };
        info!(%client, %requested_ip, "DHCPREQUEST");

        // A ServerIdentifier naming another server means the client selected
        // someone else's offer; stay silent.
        if let Some(server_id) = msg.server_id() {
            if !server_id.is_unspecified()
                && !server_id.is_broadcast()
                && *server_id != self.reply_from
            {
                debug!(%server_id, "DHCPREQUEST is for another server");
                return DhcpV4Response::NoResponse(NoReplyReason::ForeignServer);
            }
        }

        let mut info = ClientBindingV4::with_defaults(&self.dhcp);
        if let Err(e) = self
            .resolver
            .acknowledge_v4(&mut info, xid, &client, requested_ip)
            .await
        {
            log_resolve_failure(&client, &e);
            return DhcpV4Response::NoResponse(NoReplyReason::LookupFailed);
        }

        match self.prepare_answer(msg, &info, v4::MessageType::Ack) {
            Some(mut reply) => {
                let destination = select_destination(msg, &mut reply, src_mac);
                DhcpV4Response::Reply(ReplyV4 {
                    message: reply,
                    destination,
                })
            }
            None => DhcpV4Response::NoResponse(NoReplyReason::LookupFailed),
        }
    }

    async fn handle_decline(&self, msg: &v4::Message) -> DhcpV4Response {
        let Some(mac) = msg.chaddr_mac() else {
            return DhcpV4Response::NoResponse(NoReplyReason::NoHardwareAddress);
        };
        let Some(requested_ip) = msg.requested_ip_addr().copied() else {
            debug!("DHCPDECLINE without a requested address");
            return DhcpV4Response::NoResponse(NoReplyReason::NoRequestedIp);
        };

        let client = ClientId::Mac(mac);
        info!(%client, %requested_ip, "DHCPDECLINE");
        if let Err(e) = self
            .resolver
            .decline_v4(msg.xid(), &client, requested_ip)
            .await
        {
            log_resolve_failure(&client, &e);
        }
        DhcpV4Response::NoResponse(NoReplyReason::NoReplyNeeded)
    }

    async fn handle_release(&self, msg: &v4::Message) -> DhcpV4Response {
        let Some(mac) = msg.chaddr_mac() else {
            return DhcpV4Response::NoResponse(NoReplyReason::NoHardwareAddress);
        };
        let client = ClientId::Mac(mac);

        let ciaddr = msg.ciaddr();
        if ciaddr.is_unspecified() || ciaddr.is_broadcast() {
            debug!(%client, %ciaddr, "DHCPRELEASE without a usable client address");
            return DhcpV4Response::NoResponse(NoReplyReason::NoClientAddress);
        }

        info!(%client, %ciaddr, "DHCPRELEASE");
        if let Err(e) = self.resolver.release_v4(msg.xid(), &client, ciaddr).await {
            log_resolve_failure(&client, &e);
        }
        DhcpV4Response::NoResponse(NoReplyReason::NoReplyNeeded)
    }

    /// Construct the reply skeleton plus options from a resolved binding.
    fn prepare_answer(
        &self,
        msg: &v4::Message,
        info: &ClientBindingV4,
        message_type: v4::MessageType,
    ) -> Option<v4::Message> {
        let Some(yiaddr) = info.ip_addr else {
            warn!("resolved binding carries no address");
            return None;
        };
        let siaddr = info.next_server.unwrap_or(Ipv4Addr::UNSPECIFIED);

        let mut reply = v4::Message::new_with_id(
            msg.xid(),
            Ipv4Addr::UNSPECIFIED,
            yiaddr,
            siaddr,
            msg.giaddr(),
            msg.chaddr(),
        );
        reply.set_opcode(v4::Opcode::BootReply);
        reply.set_secs(0);
        reply.set_flags(msg.flags());
        reply.set_sname(self.reply_hostname.as_bytes());

        let opts = reply.opts_mut();
        opts.insert(DhcpOption::MessageType(message_type));
        opts.insert(DhcpOption::ServerIdentifier(self.reply_from));
        opts.insert(DhcpOption::SubnetMask(info.subnet_mask()));

        let timeouts = &info.timeouts;
        if !timeouts.lease.is_zero() {
            opts.insert(DhcpOption::AddressLeaseTime(saturating_secs(timeouts.lease)));
        }
        if !timeouts.t1_renewal.is_zero() {
            opts.insert(DhcpOption::Renewal(saturating_secs(timeouts.t1_renewal)));
        }
        if !timeouts.t2_rebinding.is_zero() {
            opts.insert(DhcpOption::Rebinding(saturating_secs(timeouts.t2_rebinding)));
        }
        if let Some(host_name) = &info.options.host_name {
            opts.insert(DhcpOption::Hostname(host_name.clone()));
        }
        if let Some(domain_name) = &info.options.domain_name {
            opts.insert(DhcpOption::DomainName(domain_name.clone()));
        }
        if !info.options.domain_name_servers.is_empty() {
            opts.insert(DhcpOption::DomainNameServer(
                info.options.domain_name_servers.clone(),
            ));
        }
        if !info.options.routers.is_empty() {
            opts.insert(DhcpOption::Router(info.options.routers.clone()));
        }
        if !info.options.ntp_servers.is_empty() {
            opts.insert(DhcpOption::NtpServers(info.options.ntp_servers.clone()));
        }
        if let Some(bootfile) = &info.bootfile_name {
            opts.insert(DhcpOption::BootfileName(bootfile.clone().into_bytes()));
        }
        opts.insert(DhcpOption::End);

        Some(reply)
    }
}

fn log_resolve_failure(client: &ClientId, err: &ResolveError) {
    match err {
        ResolveError::NotFound(_) => debug!(%client, "{err}"),
        _ => warn!(%client, "{err}"),
    }
}

/// RFC 2131 §4.1 destination selection. A pure function of the request's
/// `giaddr`, `ciaddr` and broadcast flag, the reply's `yiaddr`/`chaddr`, and
/// the frame's source MAC; sets the reply's broadcast flag when relaying.
pub fn select_destination(
    req: &v4::Message,
    reply: &mut v4::Message,
    src_mac: MacAddr6,
) -> DestinationV4 {
    if !req.giaddr().is_unspecified() {
        // Relay agents speak on the server port and expect the broadcast
        // flag to survive the hop.
        reply.set_flags(reply.flags().set_broadcast());
        return DestinationV4 {
            ip: req.giaddr(),
            mac: src_mac,
            port: SERVER_PORT_V4,
        };
    }

    if !req.ciaddr().is_unspecified() {
        return DestinationV4 {
            ip: req.ciaddr(),
            mac: src_mac,
            port: CLIENT_PORT_V4,
        };
    }

    if req.flags().broadcast() {
        return DestinationV4 {
            ip: Ipv4Addr::BROADCAST,
            mac: MacAddr6::new([0xff; 6]),
            port: CLIENT_PORT_V4,
        };
    }

    // No address yet and no broadcast request: unicast the frame straight to
    // the client's hardware address, bypassing ARP.
    DestinationV4 {
        ip: reply.yiaddr(),
        mac: reply.chaddr_mac().unwrap_or(MacAddr6::new([0xff; 6])),
        port: CLIENT_PORT_V4,
    }
}
