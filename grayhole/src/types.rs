//! Core types and constants for the node-behavior engine.

use core::fmt;

use crate::config::ExperimentConfig;

/// Numeric node identifier, derived from the link-layer address.
pub type NodeId = u16;

/// Routing-tree rank as reported by the routing collaborator.
pub type Rank = u16;

/// Length of a link-layer address in bytes.
pub const LINKADDR_SIZE: usize = 8;

/// Link-layer address of a node.
///
/// The node identifier lives in the trailing two bytes (big-endian), so the
/// identifier of any address can be read without a lookup table.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct LinkAddr(pub [u8; LINKADDR_SIZE]);

impl LinkAddr {
    /// Build the canonical address for a node identifier.
    pub const fn from_node_id(id: NodeId) -> Self {
        let be = id.to_be_bytes();
        let mut bytes = [0u8; LINKADDR_SIZE];
        bytes[LINKADDR_SIZE - 2] = be[0];
        bytes[LINKADDR_SIZE - 1] = be[1];
        LinkAddr(bytes)
    }

    /// The node identifier carried by this address.
    pub const fn node_id(&self) -> NodeId {
        u16::from_be_bytes([self.0[LINKADDR_SIZE - 2], self.0[LINKADDR_SIZE - 1]])
    }
}

impl fmt::Debug for LinkAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02x}{:02x}:{:02x}{:02x}:{:02x}{:02x}:{:02x}{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]
        )
    }
}

/// Statically assigned role of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Anchors the routing tree and sinks all application traffic.
    Root,
    /// Relays traffic and selectively drops it.
    Attacker,
    /// Originates periodic telemetry toward the anchor.
    Sender,
}

impl Role {
    /// Resolve a role by comparing against the configured identifiers.
    ///
    /// `Root` wins when one identifier is configured as both.
    pub const fn resolve(id: NodeId, root_id: NodeId, attacker_id: NodeId) -> Self {
        if id == root_id {
            Role::Root
        } else if id == attacker_id {
            Role::Attacker
        } else {
            Role::Sender
        }
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            Role::Root => "root",
            Role::Attacker => "attacker",
            Role::Sender => "sender",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a node, resolved once at construction and immutable afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeIdentity {
    id: NodeId,
    role: Role,
    intercepting: bool,
}

impl NodeIdentity {
    /// Resolve the identity of node `id` under `config`.
    ///
    /// `intercepting` is tracked separately from [`Role`] because a node whose
    /// identifier equals both the root and the attacker identifier starts as
    /// the anchor but still installs the packet interceptor.
    pub const fn resolve(id: NodeId, config: &ExperimentConfig) -> Self {
        Self {
            id,
            role: Role::resolve(id, config.root_id, config.attacker_id),
            intercepting: id == config.attacker_id,
        }
    }

    /// Resolve the identity from the node's own link-layer address.
    pub const fn from_link_addr(addr: &LinkAddr, config: &ExperimentConfig) -> Self {
        Self::resolve(addr.node_id(), config)
    }

    pub const fn id(&self) -> NodeId {
        self.id
    }

    pub const fn role(&self) -> Role {
        self.role
    }

    /// Whether the packet interceptor and stats reporter run on this node.
    pub const fn is_intercepting(&self) -> bool {
        self.intercepting
    }

    pub const fn is_root(&self) -> bool {
        matches!(self.role, Role::Root)
    }
}

/// Transport-layer protocol of a packet seen by the interceptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Udp,
    Tcp,
    Icmp6,
    Other(u8),
}

/// Header fields the interceptor needs to classify a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketInfo {
    pub protocol: Protocol,
    pub src: LinkAddr,
    pub dst: LinkAddr,
    pub dst_port: u16,
}

/// Per-packet decision returned from a packet hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verdict {
    /// Continue normal processing.
    Pass,
    /// Discard the packet.
    Drop,
}

impl Verdict {
    pub const fn is_drop(&self) -> bool {
        matches!(self, Verdict::Drop)
    }
}

/// The three independent node timers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TimerKind {
    ParentPoll,
    Send,
    Stats,
}

impl TimerKind {
    /// Every timer, in the order they are serviced when due at the same instant.
    pub const ALL: [TimerKind; 3] = [TimerKind::ParentPoll, TimerKind::Send, TimerKind::Stats];

    pub const fn as_str(&self) -> &'static str {
        match self {
            TimerKind::ParentPoll => "parent_poll",
            TimerKind::Send => "send",
            TimerKind::Stats => "stats",
        }
    }
}

/// Attack counters kept by the intercepting node.
///
/// Reset only at process start; every field is monotone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AttackCounters {
    /// Matching packets seen on the inbound path.
    pub received: u32,
    /// Matching relayed packets let through.
    pub forwarded: u32,
    /// Matching relayed packets discarded.
    pub dropped: u32,
}

impl AttackCounters {
    pub const fn new() -> Self {
        Self {
            received: 0,
            forwarded: 0,
            dropped: 0,
        }
    }

    /// Total relayed packets that went through a drop decision.
    pub const fn relayed(&self) -> u32 {
        self.forwarded.saturating_add(self.dropped)
    }
}

/// Preferred-parent bookkeeping for churn accounting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParentState {
    /// Last parent observed, `None` until the first one is reported.
    pub current_parent: Option<NodeId>,
    /// Rank reported alongside the last observed parent change.
    pub rank: Rank,
    /// Changes between two distinct defined parents.
    pub churn: u32,
}

/// Reasons the transport may refuse a datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendError {
    /// No route toward the destination.
    NoRoute,
    /// Outgoing queue is full.
    QueueFull,
}

impl fmt::Display for SendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendError::NoRoute => write!(f, "no route to destination"),
            SendError::QueueFull => write!(f, "outgoing queue full"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_addr_carries_node_id() {
        let addr = LinkAddr::from_node_id(0x0107);
        assert_eq!(addr.node_id(), 0x0107);
        assert_eq!(addr.0[..6], [0u8; 6]);

        let mut raw = [0xAAu8; LINKADDR_SIZE];
        raw[LINKADDR_SIZE - 2] = 0;
        raw[LINKADDR_SIZE - 1] = 6;
        assert_eq!(LinkAddr(raw).node_id(), 6);
    }

    #[test]
    fn test_role_resolution() {
        assert_eq!(Role::resolve(1, 1, 6), Role::Root);
        assert_eq!(Role::resolve(6, 1, 6), Role::Attacker);
        assert_eq!(Role::resolve(3, 1, 6), Role::Sender);
        // Root takes precedence when the identifiers coincide.
        assert_eq!(Role::resolve(4, 4, 4), Role::Root);
    }

    #[test]
    fn test_identity_root_and_attacker_coincide() {
        let config = ExperimentConfig::DEFAULT.with_root_id(5).with_attacker_id(5);
        let identity = NodeIdentity::resolve(5, &config);
        assert_eq!(identity.role(), Role::Root);
        assert!(identity.is_intercepting());

        let sender = NodeIdentity::resolve(2, &config);
        assert_eq!(sender.role(), Role::Sender);
        assert!(!sender.is_intercepting());
    }

    #[test]
    fn test_identity_from_link_addr() {
        let config = ExperimentConfig::DEFAULT;
        let identity = NodeIdentity::from_link_addr(&LinkAddr::from_node_id(6), &config);
        assert_eq!(identity.id(), 6);
        assert_eq!(identity.role(), Role::Attacker);
    }
}
