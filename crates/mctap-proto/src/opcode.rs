//! Memcached binary protocol opcodes.
//!
//! Opcodes are kept as an open `u8` set rather than an enum: captures
//! routinely contain opcodes this tool has no rules for, and those still
//! need to be counted in the aggregate report.

pub const GET: u8 = 0x00;
pub const SET: u8 = 0x01;
pub const ADD: u8 = 0x02;
pub const REPLACE: u8 = 0x03;
pub const DELETE: u8 = 0x04;
pub const INCREMENT: u8 = 0x05;
pub const DECREMENT: u8 = 0x06;
pub const QUIT: u8 = 0x07;
pub const FLUSH: u8 = 0x08;
pub const GETQ: u8 = 0x09;
pub const NOOP: u8 = 0x0a;
pub const VERSION: u8 = 0x0b;
pub const GETK: u8 = 0x0c;
pub const GETKQ: u8 = 0x0d;
pub const APPEND: u8 = 0x0e;
pub const PREPEND: u8 = 0x0f;
pub const STAT: u8 = 0x10;
pub const SETQ: u8 = 0x11;
pub const ADDQ: u8 = 0x12;
pub const REPLACEQ: u8 = 0x13;
pub const DELETEQ: u8 = 0x14;
pub const INCREMENTQ: u8 = 0x15;
pub const DECREMENTQ: u8 = 0x16;
pub const QUITQ: u8 = 0x17;
pub const FLUSHQ: u8 = 0x18;
pub const APPENDQ: u8 = 0x19;
pub const PREPENDQ: u8 = 0x1a;

/// Returns a human-readable name for an opcode, or `None` for opcodes
/// this tool does not know by name.
pub fn opcode_name(op: u8) -> Option<&'static str> {
    match op {
        GET => Some("GET"),
        SET => Some("SET"),
        ADD => Some("ADD"),
        REPLACE => Some("REPLACE"),
        DELETE => Some("DELETE"),
        INCREMENT => Some("INCR"),
        DECREMENT => Some("DECR"),
        QUIT => Some("QUIT"),
        FLUSH => Some("FLUSH"),
        GETQ => Some("GETQ"),
        NOOP => Some("NOOP"),
        VERSION => Some("VERSION"),
        GETK => Some("GETK"),
        GETKQ => Some("GETKQ"),
        APPEND => Some("APPEND"),
        PREPEND => Some("PREPEND"),
        STAT => Some("STAT"),
        SETQ => Some("SETQ"),
        ADDQ => Some("ADDQ"),
        REPLACEQ => Some("REPLACEQ"),
        DELETEQ => Some("DELETEQ"),
        INCREMENTQ => Some("INCRQ"),
        DECREMENTQ => Some("DECRQ"),
        QUITQ => Some("QUITQ"),
        FLUSHQ => Some("FLUSHQ"),
        APPENDQ => Some("APPENDQ"),
        PREPENDQ => Some("PREPENDQ"),
        _ => None,
    }
}
