//! Per-opcode packet validation.
//!
//! Captures taken mid-stream frame garbage convincingly often; a packet
//! that decodes cleanly can still be misaligned noise. Each opcode we
//! care about has an ordered list of predicates per direction, and a
//! packet is accepted only when every predicate holds. Opcodes without a
//! registered rule set are rejected outright.

use crate::codec::{Packet, REQUEST_MAGIC, RESPONSE_MAGIC};
use crate::opcode;

/// Which direction of a connection a flow carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Client,
    Server,
}

impl Role {
    /// The magic byte packets on this flow must start with.
    pub fn magic(self) -> u8 {
        match self {
            Role::Client => REQUEST_MAGIC,
            Role::Server => RESPONSE_MAGIC,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Client => "client",
            Role::Server => "server",
        }
    }
}

/// Acceptable key length bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyBounds {
    pub min: usize,
    pub max: usize,
}

impl Default for KeyBounds {
    fn default() -> Self {
        // Memcached caps keys at 250 bytes.
        Self { min: 1, max: 250 }
    }
}

type Predicate = fn(&Packet, &KeyBounds) -> bool;

fn sane_key(pkt: &Packet, bounds: &KeyBounds) -> bool {
    if pkt.key.len() < bounds.min || pkt.key.len() > bounds.max {
        return false;
    }
    match std::str::from_utf8(&pkt.key) {
        Ok(text) => text.chars().all(|c| !c.is_control()),
        Err(_) => false,
    }
}

fn no_key(pkt: &Packet, _: &KeyBounds) -> bool {
    pkt.key.is_empty()
}

fn no_body(pkt: &Packet, _: &KeyBounds) -> bool {
    pkt.value.is_empty()
}

fn has_body(pkt: &Packet, _: &KeyBounds) -> bool {
    !pkt.value.is_empty()
}

static CLIENT_RULES: &[(u8, &[Predicate])] = &[
    (opcode::GET, &[sane_key, no_body]),
    (opcode::GETQ, &[sane_key, no_body]),
    (opcode::DELETE, &[sane_key, no_body]),
    (opcode::SET, &[sane_key, has_body]),
    (opcode::SETQ, &[sane_key, has_body]),
    (opcode::ADD, &[sane_key, has_body]),
    (opcode::ADDQ, &[sane_key, has_body]),
];

static SERVER_RULES: &[(u8, &[Predicate])] = &[
    (opcode::GET, &[no_key, has_body]),
    (opcode::GETQ, &[no_key, has_body]),
    (opcode::DELETE, &[no_key, no_body]),
    (opcode::SET, &[no_key, no_body]),
    (opcode::ADD, &[no_key, no_body]),
];

/// Look up the rule set for an opcode in the given direction.
pub fn rules_for(role: Role, op: u8) -> Option<&'static [Predicate]> {
    let table = match role {
        Role::Client => CLIENT_RULES,
        Role::Server => SERVER_RULES,
    };
    table.iter().find(|(o, _)| *o == op).map(|(_, rules)| *rules)
}

/// True if the packet passes every predicate registered for its opcode.
pub fn looks_valid(pkt: &Packet, role: Role, bounds: &KeyBounds) -> bool {
    match rules_for(role, pkt.opcode) {
        Some(rules) => rules.iter().all(|rule| rule(pkt, bounds)),
        None => false,
    }
}
