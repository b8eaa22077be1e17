//! `PHSR` reply parsing
//!
//! `PHSR <option>` lists port handles in a given lifecycle state: `00`
//! all allocated, `01` to be freed, `02` to be initialized, `03` to be
//! enabled. The reply is a 2-digit hex count followed by one five
//! character record per handle: the 2-character handle and 3 hex digits
//! of handle status.

use crate::cursor::{ParseError, Reply};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandleRecord {
    pub handle: String,
    pub status: String,
}

pub fn parse(payload: &[u8]) -> Result<Vec<HandleRecord>, ParseError> {
    let mut reply = Reply::new(payload);
    let count = reply.hex(2)? as usize;
    let mut records = Vec::with_capacity(count);
    for _ in 0..count {
        records.push(HandleRecord {
            handle: reply.take_str(2)?.to_string(),
            status: reply.take_str(3)?.to_string(),
        });
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty() {
        assert_eq!(parse(b"00").unwrap(), Vec::new());
    }

    #[test]
    fn test_single_handle() {
        let records = parse(b"0101ABC").unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].handle, "01");
        assert_eq!(records[0].status, "ABC");
    }

    #[test]
    fn test_multiple_handles() {
        let records = parse(b"020A00101F020").unwrap();
        assert_eq!(records[0].handle, "0A");
        assert_eq!(records[0].status, "001");
        assert_eq!(records[1].handle, "01");
        assert_eq!(records[1].status, "F02");
    }

    #[test]
    fn test_truncated_record() {
        assert!(matches!(
            parse(b"0201ABC"),
            Err(ParseError::Truncated { .. })
        ));
    }
}
