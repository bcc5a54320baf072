//! Session timeout policy.

const TCP_FIN: u8 = 0x01;
const TCP_SYN: u8 = 0x02;
const TCP_ACK: u8 = 0x10;

const PROTO_TCP: u8 = 6;
const PROTO_UDP: u8 = 17;

/// Per-state session TTLs in nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FwTimeouts {
    pub tcp_syn: u64,
    pub tcp_syn_ack: u64,
    pub tcp: u64,
    pub tcp_fin: u64,
    pub udp: u64,
    pub default: u64,
}

impl Default for FwTimeouts {
    fn default() -> Self {
        Self {
            tcp_syn: 8_000_000_000,
            tcp_syn_ack: 8_000_000_000,
            tcp: 8_000_000_000,
            tcp_fin: 8_000_000_000,
            udp: 30_000_000_000,
            default: 16_000_000_000,
        }
    }
}

impl FwTimeouts {
    /// Pick the TTL for a session from its protocol and (for TCP) the
    /// flags just observed: SYN without ACK is a half-open handshake,
    /// SYN with ACK the reply, FIN a closing session.
    #[must_use]
    pub fn select(&self, proto: u8, tcp_flags: u8) -> u64 {
        match proto {
            PROTO_TCP => {
                if tcp_flags & TCP_SYN != 0 {
                    if tcp_flags & TCP_ACK != 0 {
                        self.tcp_syn_ack
                    } else {
                        self.tcp_syn
                    }
                } else if tcp_flags & TCP_FIN != 0 {
                    self.tcp_fin
                } else {
                    self.tcp
                }
            }
            PROTO_UDP => self.udp,
            _ => self.default,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_deployment_values() {
        let t = FwTimeouts::default();
        assert_eq!(t.tcp_syn, 8_000_000_000);
        assert_eq!(t.udp, 30_000_000_000);
        assert_eq!(t.default, 16_000_000_000);
    }

    #[test]
    fn tcp_state_selection() {
        let t = FwTimeouts {
            tcp_syn: 1,
            tcp_syn_ack: 2,
            tcp: 3,
            tcp_fin: 4,
            udp: 5,
            default: 6,
        };
        assert_eq!(t.select(6, TCP_SYN), 1);
        assert_eq!(t.select(6, TCP_SYN | TCP_ACK), 2);
        assert_eq!(t.select(6, TCP_ACK), 3);
        assert_eq!(t.select(6, TCP_FIN | TCP_ACK), 4);
        assert_eq!(t.select(17, 0), 5);
        assert_eq!(t.select(1, 0), 6);
    }
}
