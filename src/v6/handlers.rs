//! DHCPv6 message dispatch and reply construction (RFC 8415).

use std::net::Ipv6Addr;
use std::sync::Arc;

use advmac::MacAddr6;
use dhcproto::v6::{
    DhcpOption, DhcpOptions, IAAddr, Message, MessageType, OptionCode, Status, StatusCode, IANA,
};
use tracing::{debug, info, instrument, warn};

use crate::config::DhcpConfig;
use crate::duid::ServerDuid;
use crate::resolver::{ResolveError, Resolver};
use crate::v6::extensions::MessageExtV6;
use crate::{saturating_secs, ClientBindingV6, Duid};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoReplyReason {
    NoClientId,
    UnexpectedServerId,
    WrongServerId,
    NoServerId,
    NoIaNa,
    NoBinding,
    Discarded,
    NotImplemented,
}

pub enum DhcpV6Response {
    Message(Message),
    NoResponse(NoReplyReason),
}

/// Per-listener handler state for one DHCPv6 engine.
pub struct V6Handler {
    pub(crate) resolver: Arc<dyn Resolver>,
    pub(crate) dhcp: Arc<DhcpConfig>,
    pub(crate) server_duid: ServerDuid,
    pub(crate) advertise_unicast: bool,
    pub(crate) reply_from: Ipv6Addr,
}

impl V6Handler {
    pub fn new(
        resolver: Arc<dyn Resolver>,
        dhcp: Arc<DhcpConfig>,
        advertise_unicast: bool,
        reply_from: Ipv6Addr,
    ) -> Self {
        let server_duid = dhcp.server_duid();
        V6Handler {
            resolver,
            dhcp,
            server_duid,
            advertise_unicast,
            reply_from,
        }
    }

    pub async fn handle_message(
        &self,
        msg: &Message,
        src_ip: Ipv6Addr,
        src_mac: MacAddr6,
        dst_ip: Ipv6Addr,
    ) -> DhcpV6Response {
        match msg.msg_type() {
            // Four-message exchange: Solicit -> Advertise -> Request -> Reply.
            // Two-message exchange (rapid commit): Solicit -> Reply.
            MessageType::Solicit => self.handle_solicit(msg, src_ip, src_mac).await,
            MessageType::Request => self.handle_request(msg, src_ip, src_mac, dst_ip).await,
            MessageType::Confirm => self.handle_confirm(msg, src_mac).await,
            MessageType::Renew => self.handle_renew(msg, src_mac, true).await,
            MessageType::Rebind => self.handle_renew(msg, src_mac, false).await,
            MessageType::Decline => self.handle_decline_release(msg, "DECLINE").await,
            MessageType::Release => self.handle_decline_release(msg, "RELEASE").await,
            MessageType::InformationRequest => {
                info!("INFORMATION-REQUEST received; not implemented");
                DhcpV6Response::NoResponse(NoReplyReason::NotImplemented)
            }
            MessageType::RelayForw => {
                // TODO unwind relay encapsulation and answer with RELAY-REPL.
                info!("RELAY-FORW received; relay chains are not handled");
                DhcpV6Response::NoResponse(NoReplyReason::NotImplemented)
            }
            other => {
                debug!(message_type = ?other, "not a client-to-server message type");
                DhcpV6Response::NoResponse(NoReplyReason::Discarded)
            }
        }
    }

    /// <https://datatracker.ietf.org/doc/html/rfc8415#section-18.3.1>
    #[instrument(skip(self, msg, src_ip, src_mac), fields(xid = ?msg.xid()))]
    async fn handle_solicit(
        &self,
        msg: &Message,
        src_ip: Ipv6Addr,
        src_mac: MacAddr6,
    ) -> DhcpV6Response {
        let Some(client_id) = msg.client_id() else {
            debug!(%src_ip, "SOLICIT without a client identifier");
            return DhcpV6Response::NoResponse(NoReplyReason::NoClientId);
        };
        if msg.server_id().is_some() {
            debug!(%src_ip, "SOLICIT carries a server identifier");
            return DhcpV6Response::NoResponse(NoReplyReason::UnexpectedServerId);
        }

        let duid = Duid::from_bytes(client_id.to_vec());
        if duid.type_code().is_none() {
            warn!(%duid, "client DUID has an unrecognized type code");
        }
        let mac = msg.client_ll_addr().unwrap_or(src_mac);
        info!(client = %duid, %src_ip, "SOLICIT");

        // Temporary-address associations are not served from the inventory.
        if msg.has_ia_ta() {
            let mut reply = self.base_reply(MessageType::Advertise, msg, client_id);
            reply.opts_mut().insert(status_option(
                Status::NotOnLink,
                "temporary addresses unsupported",
            ));
            return DhcpV6Response::Message(reply);
        }

        let rapid_commit =
            msg.rapid_commit() || msg.requests_option(OptionCode::RapidCommit);
        let reply_type = if rapid_commit {
            debug!("two-message exchange, rapid commit");
            MessageType::Reply
        } else {
            MessageType::Advertise
        };

        let ia_nas = match self.resolve_ia_nas(msg, &duid, mac).await {
            Ok(ia_nas) => ia_nas,
            Err(reason) => return DhcpV6Response::NoResponse(reason),
        };

        let mut reply = self.base_reply(reply_type, msg, client_id);
        let opts = reply.opts_mut();
        if rapid_commit {
            // https://datatracker.ietf.org/doc/html/rfc8415#section-21.14
            opts.insert(DhcpOption::RapidCommit);
        } else {
            // Maximum preference stops the client waiting for other servers.
            opts.insert(DhcpOption::Preference(255));
        }
        for iana in ia_nas {
            opts.insert(DhcpOption::IANA(iana));
        }
        opts.insert(status_option(Status::Success, ""));
        DhcpV6Response::Message(reply)
    }

    /// <https://datatracker.ietf.org/doc/html/rfc8415#section-18.3.2>
    #[instrument(skip(self, msg, src_ip, src_mac, dst_ip), fields(xid = ?msg.xid()))]
    async fn handle_request(
        &self,
        msg: &Message,
        src_ip: Ipv6Addr,
        src_mac: MacAddr6,
        dst_ip: Ipv6Addr,
    ) -> DhcpV6Response {
        let Some(client_id) = msg.client_id() else {
            return DhcpV6Response::NoResponse(NoReplyReason::NoClientId);
        };
        match msg.server_id() {
            Some(id) if self.server_duid.matches(id) => (),
            Some(_) => return DhcpV6Response::NoResponse(NoReplyReason::WrongServerId),
            None => return DhcpV6Response::NoResponse(NoReplyReason::NoServerId),
        }

        let duid = Duid::from_bytes(client_id.to_vec());
        let mac = msg.client_ll_addr().unwrap_or(src_mac);
        info!(client = %duid, %src_ip, "REQUEST");

        // RFC 8415 §18.3.1 / RFC 3315 §18.2.1: a unicast Request is only
        // valid after this server offered the Unicast option.
        if !dst_ip.is_multicast() && !self.advertise_unicast {
            debug!(%dst_ip, "unicast REQUEST without a unicast option in effect");
            let mut reply = self.base_reply(MessageType::Reply, msg, client_id);
            reply
                .opts_mut()
                .insert(status_option(Status::UseMulticast, "use multicast"));
            return DhcpV6Response::Message(reply);
        }

        let ia_nas = match self.resolve_and_check_ia_nas(msg, &duid, mac).await {
            Ok(ia_nas) => ia_nas,
            Err(response) => return response,
        };

        let mut reply = self.base_reply(MessageType::Reply, msg, client_id);
        let opts = reply.opts_mut();
        for iana in ia_nas {
            opts.insert(DhcpOption::IANA(iana));
        }
        opts.insert(status_option(Status::Success, ""));
        DhcpV6Response::Message(reply)
    }

    /// RENEW (§18.3.4) when `require_server_id`, otherwise REBIND (§18.3.5).
    async fn handle_renew(
        &self,
        msg: &Message,
        src_mac: MacAddr6,
        require_server_id: bool,
    ) -> DhcpV6Response {
        let Some(client_id) = msg.client_id() else {
            return DhcpV6Response::NoResponse(NoReplyReason::NoClientId);
        };
        if require_server_id {
            match msg.server_id() {
                Some(id) if self.server_duid.matches(id) => (),
                Some(_) => return DhcpV6Response::NoResponse(NoReplyReason::WrongServerId),
                None => return DhcpV6Response::NoResponse(NoReplyReason::NoServerId),
            }
        } else if msg.server_id().is_some() {
            debug!("REBIND carries a server identifier (unusual but tolerated)");
        }

        let duid = Duid::from_bytes(client_id.to_vec());
        let mac = msg.client_ll_addr().unwrap_or(src_mac);
        info!(client = %duid, renew = require_server_id, "lease refresh");

        match self.resolve_ia_nas(msg, &duid, mac).await {
            Ok(ia_nas) => {
                let mut reply = self.base_reply(MessageType::Reply, msg, client_id);
                let opts = reply.opts_mut();
                for iana in ia_nas {
                    opts.insert(DhcpOption::IANA(iana));
                }
                opts.insert(status_option(Status::Success, ""));
                DhcpV6Response::Message(reply)
            }
            Err(NoReplyReason::NoBinding) => {
                // §18.3.4: return the IAs with no addresses and a NoBinding
                // status inside each IA.
                let mut reply = self.base_reply(MessageType::Reply, msg, client_id);
                let opts = reply.opts_mut();
                for iana in ia_nas_with_no_binding(msg) {
                    opts.insert(iana);
                }
                opts.insert(status_option(Status::Success, ""));
                DhcpV6Response::Message(reply)
            }
            Err(reason) => DhcpV6Response::NoResponse(reason),
        }
    }

    /// <https://datatracker.ietf.org/doc/html/rfc8415#section-18.3.3>
    async fn handle_confirm(&self, msg: &Message, src_mac: MacAddr6) -> DhcpV6Response {
        let Some(client_id) = msg.client_id() else {
            return DhcpV6Response::NoResponse(NoReplyReason::NoClientId);
        };
        if msg.server_id().is_some() {
            return DhcpV6Response::NoResponse(NoReplyReason::UnexpectedServerId);
        }

        let duid = Duid::from_bytes(client_id.to_vec());
        let mac = msg.client_ll_addr().unwrap_or(src_mac);
        info!(client = %duid, "CONFIRM");

        let listed = listed_addresses(msg);
        if listed.is_empty() {
            return DhcpV6Response::NoResponse(NoReplyReason::NoIaNa);
        }

        let mut info = ClientBindingV6::with_defaults(&self.dhcp);
        let found = match self
            .resolver
            .solicit_v6(&mut info, &duid, mac, first_iaid(msg).unwrap_or(0))
            .await
        {
            Ok(found) => found,
            Err(e) => {
                log_resolve_failure(&duid, &e);
                return DhcpV6Response::NoResponse(NoReplyReason::Discarded);
            }
        };
        if !found {
            // Nothing known about this client; stay silent so another server
            // can answer.
            return DhcpV6Response::NoResponse(NoReplyReason::NoBinding);
        }

        let mut reply = self.base_reply(MessageType::Reply, msg, client_id);
        let status = if info.contains_all(&listed) {
            status_option(Status::Success, "all addresses on-link")
        } else {
            status_option(Status::NotOnLink, "address not valid on this link")
        };
        reply.opts_mut().insert(status);
        DhcpV6Response::Message(reply)
    }

    /// DECLINE (§18.3.7) and RELEASE (§18.3.8) share their shape: note the
    /// event, acknowledge with Success. The cache's v6 lease lifecycle is
    /// still a TODO, so no record is withdrawn here.
    async fn handle_decline_release(&self, msg: &Message, what: &'static str) -> DhcpV6Response {
        let Some(client_id) = msg.client_id() else {
            return DhcpV6Response::NoResponse(NoReplyReason::NoClientId);
        };
        match msg.server_id() {
            Some(id) if self.server_duid.matches(id) => (),
            Some(_) => return DhcpV6Response::NoResponse(NoReplyReason::WrongServerId),
            None => return DhcpV6Response::NoResponse(NoReplyReason::NoServerId),
        }

        let duid = Duid::from_bytes(client_id.to_vec());
        info!(client = %duid, addresses = ?listed_addresses(msg), "{what}");

        let mut reply = self.base_reply(MessageType::Reply, msg, client_id);
        reply
            .opts_mut()
            .insert(status_option(Status::Success, ""));
        DhcpV6Response::Message(reply)
    }

    /// Every outgoing message carries our ServerId, the echoed ClientId, and
    /// (when advertised) the Unicast option.
    fn base_reply(&self, msg_type: MessageType, msg: &Message, client_id: &[u8]) -> Message {
        let mut reply = Message::new_with_id(msg_type, msg.xid());
        let opts = reply.opts_mut();
        opts.insert(DhcpOption::ServerId(self.server_duid.to_vec()));
        opts.insert(DhcpOption::ClientId(client_id.to_vec()));
        if self.advertise_unicast {
            opts.insert(DhcpOption::ServerUnicast(self.reply_from));
        }
        reply
    }

    /// Resolve a binding for every IA_NA in the message. `NoBinding` when
    /// the inventory knows none of them, `NoIaNa` when the message carries
    /// no IA_NA at all.
    async fn resolve_ia_nas(
        &self,
        msg: &Message,
        duid: &Duid,
        mac: MacAddr6,
    ) -> Result<Vec<IANA>, NoReplyReason> {
        let input = msg.ia_nas();
        if input.is_empty() {
            debug!(client = %duid, "message carries no IA_NA");
            return Err(NoReplyReason::NoIaNa);
        }

        let mut out = Vec::with_capacity(input.len());
        for iana in input {
            let mut info = ClientBindingV6::with_defaults(&self.dhcp);
            match self.resolver.solicit_v6(&mut info, duid, mac, iana.id).await {
                Ok(true) => {
                    info.timeouts.normalize();
                    out.push(self.build_ia_na(iana.id, &info));
                }
                Ok(false) => {
                    debug!(client = %duid, iaid = iana.id, "no binding for IA");
                }
                Err(e) => {
                    log_resolve_failure(duid, &e);
                    return Err(NoReplyReason::Discarded);
                }
            }
        }

        if out.is_empty() {
            return Err(NoReplyReason::NoBinding);
        }
        Ok(out)
    }

    /// Like [`resolve_ia_nas`], but additionally verifies every address the
    /// client listed is part of its binding; a mismatch earns NotOnLink.
    async fn resolve_and_check_ia_nas(
        &self,
        msg: &Message,
        duid: &Duid,
        mac: MacAddr6,
    ) -> Result<Vec<IANA>, DhcpV6Response> {
        let input = msg.ia_nas();
        if input.is_empty() {
            return Err(DhcpV6Response::NoResponse(NoReplyReason::NoIaNa));
        }

        let mut out = Vec::with_capacity(input.len());
        for iana in input {
            let mut info = ClientBindingV6::with_defaults(&self.dhcp);
            match self.resolver.solicit_v6(&mut info, duid, mac, iana.id).await {
                Ok(true) => {
                    let listed = iana_addresses(iana);
                    if !info.contains_all(&listed) {
                        warn!(client = %duid, iaid = iana.id, "client listed an address outside its binding");
                        let client_id = msg.client_id().unwrap_or_default();
                        let mut reply = self.base_reply(MessageType::Reply, msg, client_id);
                        reply.opts_mut().insert(status_option(
                            Status::NotOnLink,
                            "requested address not valid on this link",
                        ));
                        return Err(DhcpV6Response::Message(reply));
                    }
                    info.timeouts.normalize();
                    out.push(self.build_ia_na(iana.id, &info));
                }
                Ok(false) => {
                    debug!(client = %duid, iaid = iana.id, "no binding for IA");
                }
                Err(e) => {
                    log_resolve_failure(duid, &e);
                    return Err(DhcpV6Response::NoResponse(NoReplyReason::Discarded));
                }
            }
        }

        if out.is_empty() {
            return Err(DhcpV6Response::NoResponse(NoReplyReason::NoBinding));
        }
        Ok(out)
    }

    /// One output IA_NA per input IAID: T1, T2, and each address with its
    /// preferred and valid lifetimes.
    fn build_ia_na(&self, iaid: u32, info: &ClientBindingV6) -> IANA {
        let timeouts = &info.timeouts;
        let mut opts = DhcpOptions::new();
        for addr in &info.ip_addrs {
            opts.insert(DhcpOption::IAAddr(IAAddr {
                addr: *addr,
                preferred_life: saturating_secs(timeouts.preferred_lifetime),
                valid_life: saturating_secs(timeouts.valid_lifetime),
                opts: DhcpOptions::new(),
            }));
        }
        IANA {
            id: iaid,
            t1: saturating_secs(timeouts.t1_renewal),
            t2: saturating_secs(timeouts.t2_rebinding),
            opts,
        }
    }
}

fn status_option(status: Status, msg: &str) -> DhcpOption {
    DhcpOption::StatusCode(StatusCode {
        status,
        msg: msg.into(),
    })
}

fn log_resolve_failure(duid: &Duid, err: &ResolveError) {
    match err {
        ResolveError::NotFound(_) => debug!(client = %duid, "{err}"),
        _ => warn!(client = %duid, "{err}"),
    }
}

/// The addresses a client listed inside one IA_NA.
pub(crate) fn iana_addresses(iana: &IANA) -> Vec<Ipv6Addr> {
    iana.opts
        .iter()
        .filter_map(|opt| match opt {
            DhcpOption::IAAddr(addr) => Some(addr.addr),
            _ => None,
        })
        .collect()
}

/// All addresses a client listed across its IA_NAs.
fn listed_addresses(msg: &Message) -> Vec<Ipv6Addr> {
    msg.ia_nas()
        .into_iter()
        .flat_map(|iana| iana_addresses(iana))
        .collect()
}

fn first_iaid(msg: &Message) -> Option<u32> {
    msg.ia_nas().first().map(|iana| iana.id)
}

/// §18.3.4–18.3.5: echo each IA with zeroed lifetimes and a NoBinding status
/// inside the IA.
fn ia_nas_with_no_binding(msg: &Message) -> Vec<DhcpOption> {
    msg.ia_nas()
        .into_iter()
        .map(|iana| {
            let mut out = iana.clone();
            for opt in out.opts.iter_mut() {
                if let DhcpOption::IAAddr(addr) = opt {
                    addr.preferred_life = 0;
                    addr.valid_life = 0;
                }
            }
            out.opts.insert(status_option(
                Status::NoBinding,
                "no binding for this IA",
            ));
            DhcpOption::IANA(out)
        })
        .collect()
}
