use crate::buffer::VAR_MAX_VALUE;

pub const DEFAULT_PORT: u16 = 9999;
pub const MAX_DATAGRAM_SIZE: usize = 1200;
pub const RECEIVE_BUFFER_SIZE: usize = 8192;

/// Sequences live in the varbits range, so they wrap at `VAR_MAX_VALUE`.
const SEQUENCE_WRAP_THRESHOLD: u32 = VAR_MAX_VALUE / 2;

/// Top-level message ids, written as varbits at the start of every datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Message {
    Regular = 0,
    Connect = 1,
    Disconnect = 2,
    Redirect = 3,
}

impl Message {
    pub fn id(self) -> u32 {
        self as u32
    }

    pub fn from_id(id: u32) -> Option<Self> {
        match id {
            0 => Some(Message::Regular),
            1 => Some(Message::Connect),
            2 => Some(Message::Disconnect),
            3 => Some(Message::Redirect),
            _ => None,
        }
    }
}

#[inline]
pub fn next_sequence(sequence: u32) -> u32 {
    if sequence >= VAR_MAX_VALUE {
        0
    } else {
        sequence + 1
    }
}

#[inline]
pub fn sequence_greater_than(s1: u32, s2: u32) -> bool {
    ((s1 > s2) && (s1 - s2 <= SEQUENCE_WRAP_THRESHOLD))
        || ((s1 < s2) && (s2 - s1 > SEQUENCE_WRAP_THRESHOLD))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_comparison() {
        assert!(sequence_greater_than(2, 1));
        assert!(!sequence_greater_than(1, 2));
        assert!(!sequence_greater_than(7, 7));
        assert!(sequence_greater_than(0, VAR_MAX_VALUE));
        assert!(!sequence_greater_than(VAR_MAX_VALUE, 0));
    }

    #[test]
    fn test_sequence_wraps_in_varbits_range() {
        assert_eq!(next_sequence(0), 1);
        assert_eq!(next_sequence(VAR_MAX_VALUE - 1), VAR_MAX_VALUE);
        assert_eq!(next_sequence(VAR_MAX_VALUE), 0);
    }

    #[test]
    fn test_message_ids() {
        for message in [
            Message::Regular,
            Message::Connect,
            Message::Disconnect,
            Message::Redirect,
        ] {
            assert_eq!(Message::from_id(message.id()), Some(message));
        }
        assert_eq!(Message::Regular.id(), 0);
        assert_eq!(Message::Connect.id(), 1);
        assert_eq!(Message::from_id(4), None);
    }
}
