use advmac::MacAddr6;
use dhcproto::v6::{DhcpOption, Message, OptionCode, IANA};
use tracing::debug;

/// Helpers for interacting with dhcproto::v6::Message
pub trait MessageExtV6 {
    fn client_id(&self) -> Option<&[u8]>;
    fn server_id(&self) -> Option<&[u8]>;
    fn rapid_commit(&self) -> bool;
    fn requests_option(&self, code: OptionCode) -> bool;
    fn ia_nas(&self) -> Vec<&IANA>;
    fn has_ia_ta(&self) -> bool;
    fn client_ll_addr(&self) -> Option<MacAddr6>;
}

impl MessageExtV6 for Message {
    /// The bytes representing the client DUID.
    fn client_id(&self) -> Option<&[u8]> {
        self.opts().iter().find_map(|opt| match opt {
            DhcpOption::ClientId(id) => Some(id.as_slice()),
            _ => None,
        })
    }

    fn server_id(&self) -> Option<&[u8]> {
        self.opts().iter().find_map(|opt| match opt {
            DhcpOption::ServerId(id) => Some(id.as_slice()),
            _ => None,
        })
    }

    fn rapid_commit(&self) -> bool {
        self.opts()
            .iter()
            .any(|opt| matches!(opt, DhcpOption::RapidCommit))
    }

    /// True when an Option Request Option lists `code`.
    fn requests_option(&self, code: OptionCode) -> bool {
        self.opts().iter().any(|opt| match opt {
            DhcpOption::ORO(oro) => oro.opts.contains(&code),
            _ => false,
        })
    }

    fn ia_nas(&self) -> Vec<&IANA> {
        self.opts()
            .iter()
            .filter_map(|opt| match opt {
                DhcpOption::IANA(iana) => Some(iana),
                _ => None,
            })
            .collect()
    }

    fn has_ia_ta(&self) -> bool {
        self.opts()
            .iter()
            .any(|opt| matches!(opt, DhcpOption::IATA(_)))
    }

    /// Link-layer address from the RFC 6939 relay option, when present.
    fn client_ll_addr(&self) -> Option<MacAddr6> {
        self.opts().iter().find_map(|opt| match opt {
            DhcpOption::ClientLinklayerAddress(ll) if ll.address.len() == 6 => {
                let mut bytes = [0u8; 6];
                bytes.copy_from_slice(&ll.address[0..6]);
                Some(MacAddr6::new(bytes))
            }
            DhcpOption::ClientLinklayerAddress(ll) => {
                debug!("client link-layer address option wasn't 6 bytes: {:?}", ll);
                None
            }
            _ => None,
        })
    }
}
