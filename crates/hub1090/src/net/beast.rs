/**
 * Beast binary framing.
 *
 *  - esc "1" : 6 byte counter timestamp, 1 byte signal level, 2 byte Mode-AC
 *  - esc "2" : 6 byte counter timestamp, 1 byte signal level, 7 byte Mode-S short frame
 *  - esc "3" : 6 byte counter timestamp, 1 byte signal level, 14 byte Mode-S long frame
 *  - esc "4" : 6 byte counter timestamp, status data (consumed, not decoded)
 *  - esc "5" : 6 byte counter timestamp, 1 byte signal, 21 byte vendor position
 *  - esc 0xE3: 8 byte receiver id, re-sent whenever the id changes
 *  - esc 0xE4: ASCII UUID until the next escape
 *
 * esc esc means a true 0x1A anywhere inside timestamp, signal or payload;
 * esc is 0x1A and "1", "2", "3" are 0x31, 0x32 and 0x33.
 */
use std::fmt;

pub const ESC: u8 = 0x1A;

/// One parsed inbound frame
#[derive(Debug, PartialEq, Clone)]
pub enum BeastFrame {
    /// 2-byte Mode A/C reply
    ModeAc {
        stamp: u64,
        signal: u8,
        payload: [u8; 2],
    },
    /// 7- or 14-byte Mode S frame
    ModeS {
        stamp: u64,
        signal: u8,
        payload: Vec<u8>,
    },
    /// vendor status/position record, consumed but not interpreted
    Vendor,
    /// 8-byte receiver id prefix
    ReceiverId([u8; 8]),
    /// ASCII UUID announcement
    Uuid(String),
}

/// What the scanner found at the head of the buffer
#[derive(Debug, PartialEq)]
pub enum Scan {
    /// a complete frame: how many bytes it occupied, and the frame
    /// (None for types that are consumed without producing input)
    Frame(usize, Option<BeastFrame>),
    /// valid prefix, wait for more bytes
    Incomplete,
    /// the head of the buffer is not a frame: skip this many bytes
    Garbage(usize),
}

impl fmt::Display for BeastFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BeastFrame::ModeAc { .. } => write!(f, "mode a/c"),
            BeastFrame::ModeS { payload, .. } => {
                write!(f, "mode s {}", hex::encode(payload))
            }
            BeastFrame::Vendor => write!(f, "vendor"),
            BeastFrame::ReceiverId(id) => {
                write!(f, "receiver id {}", hex::encode(id))
            }
            BeastFrame::Uuid(uuid) => write!(f, "uuid {uuid}"),
        }
    }
}

/// Read `n` unescaped bytes starting at `from`. Returns the bytes and the
/// consumed raw length, None while the buffer could still complete, or an
/// error when a bare escape shows a new frame starting mid-payload.
fn unescape(
    buf: &[u8],
    from: usize,
    n: usize,
) -> Result<Option<(Vec<u8>, usize)>, usize> {
    let mut out = Vec::with_capacity(n);
    let mut pos = from;
    while out.len() < n {
        match buf.get(pos) {
            None => return Ok(None),
            Some(&ESC) => match buf.get(pos + 1) {
                None => return Ok(None),
                Some(&ESC) => {
                    out.push(ESC);
                    pos += 2;
                }
                // a new frame begins here: everything before it was junk
                Some(_) => return Err(pos),
            },
            Some(&byte) => {
                out.push(byte);
                pos += 1;
            }
        }
    }
    Ok(Some((out, pos - from)))
}

/// Parse the head of `buf`. The caller owns garbage accounting and buffer
/// compaction.
pub fn scan(buf: &[u8]) -> Scan {
    // everything before the first escape is garbage
    match buf.iter().position(|&b| b == ESC) {
        Some(0) => {}
        Some(n) => return Scan::Garbage(n),
        None => {
            if buf.is_empty() {
                return Scan::Incomplete;
            }
            return Scan::Garbage(buf.len());
        }
    }

    let msg_type = match buf.get(1) {
        Some(&t) => t,
        None => return Scan::Incomplete,
    };

    let payload_len = match msg_type {
        b'1' => 2,
        b'2' => 7,
        b'3' => 14,
        b'4' => 14,
        b'5' => 21,
        0xE3 => {
            return match unescape(buf, 2, 8) {
                Ok(None) => Scan::Incomplete,
                Ok(Some((bytes, consumed))) => {
                    let mut id = [0u8; 8];
                    id.copy_from_slice(&bytes);
                    Scan::Frame(2 + consumed, Some(BeastFrame::ReceiverId(id)))
                }
                Err(bad) => Scan::Garbage(bad),
            };
        }
        0xE4 => {
            // ASCII until the next escape
            let end = buf[2..].iter().position(|&b| b == ESC);
            return match end {
                None if buf.len() > 2 + 64 => Scan::Garbage(2),
                None => Scan::Incomplete,
                Some(len) => {
                    let uuid = String::from_utf8_lossy(&buf[2..2 + len])
                        .trim()
                        .to_string();
                    Scan::Frame(2 + len, Some(BeastFrame::Uuid(uuid)))
                }
            };
        }
        // unknown type byte: resync from the next byte
        _ => return Scan::Garbage(1),
    };

    // timestamp (6) + signal (1) + payload, all escape-doubled
    let total = 7 + payload_len;
    let (bytes, consumed) = match unescape(buf, 2, total) {
        Ok(None) => return Scan::Incomplete,
        Ok(Some(ok)) => ok,
        Err(bad) => return Scan::Garbage(bad),
    };

    let mut stamp_bytes = [0u8; 8];
    stamp_bytes[2..8].copy_from_slice(&bytes[0..6]);
    let stamp = u64::from_be_bytes(stamp_bytes);
    let signal = bytes[6];

    let frame = match msg_type {
        b'1' => Some(BeastFrame::ModeAc {
            stamp,
            signal,
            payload: [bytes[7], bytes[8]],
        }),
        b'2' | b'3' => Some(BeastFrame::ModeS {
            stamp,
            signal,
            payload: bytes[7..].to_vec(),
        }),
        _ => Some(BeastFrame::Vendor),
    };
    Scan::Frame(2 + consumed, frame)
}

/// Append one escaped field to an output frame
fn push_escaped(out: &mut Vec<u8>, bytes: &[u8]) {
    for &byte in bytes {
        out.push(byte);
        if byte == ESC {
            out.push(ESC);
        }
    }
}

/// Encode an outbound Beast frame
pub fn encode(
    out: &mut Vec<u8>,
    msg_type: u8,
    stamp: u64,
    signal: u8,
    payload: &[u8],
) {
    out.push(ESC);
    out.push(msg_type);
    push_escaped(out, &stamp.to_be_bytes()[2..8]);
    push_escaped(out, &[signal]);
    push_escaped(out, payload);
}

/// The receiver-id record prefixed to outbound streams when the id changes
pub fn encode_receiver_id(out: &mut Vec<u8>, id: &[u8; 8]) {
    out.push(ESC);
    out.push(0xE3);
    push_escaped(out, id);
}

/// Beast heartbeat: a type "1" frame of all zeroes, 11 bytes on the wire
pub fn heartbeat(out: &mut Vec<u8>) {
    encode(out, b'1', 0, 0, &[0, 0]);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wire(msg_type: u8, stamp: u64, signal: u8, payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        encode(&mut out, msg_type, stamp, signal, payload);
        out
    }

    #[test]
    fn test_heartbeat_is_eleven_bytes() {
        let mut out = Vec::new();
        heartbeat(&mut out);
        assert_eq!(out.len(), 11);
        assert_eq!(out[0], ESC);
        assert_eq!(out[1], b'1');
    }

    #[test]
    fn test_roundtrip_mode_s_short() {
        let payload = [0x5D, 0x40, 0x62, 0x1D, 0x1A, 0x1A, 0x08];
        let buf = wire(b'2', 0x123456789A, 0x40, &payload);
        match scan(&buf) {
            Scan::Frame(consumed, Some(BeastFrame::ModeS { stamp, signal, payload: p })) => {
                assert_eq!(consumed, buf.len());
                assert_eq!(stamp, 0x123456789A);
                assert_eq!(signal, 0x40);
                assert_eq!(p, payload);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_escape_doubling_in_timestamp() {
        // a timestamp containing 0x1A must be doubled on the wire and
        // folded back on read
        let stamp = 0x1A1A_0000_1A00u64 & 0xFFFF_FFFF_FFFF;
        let buf = wire(b'3', stamp, 0x1A, &[0xAB; 14]);
        match scan(&buf) {
            Scan::Frame(consumed, Some(BeastFrame::ModeS { stamp: s, signal, .. })) => {
                assert_eq!(consumed, buf.len());
                assert_eq!(s, stamp);
                assert_eq!(signal, 0x1A);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_prefix_garbage_counted() {
        let mut buf = vec![0x00, 0xFF, 0x12];
        buf.extend(wire(b'1', 0, 10, &[0x20, 0x05]));
        match scan(&buf) {
            Scan::Garbage(3) => {}
            other => panic!("unexpected {other:?}"),
        }
        match scan(&buf[3..]) {
            Scan::Frame(_, Some(BeastFrame::ModeAc { payload, .. })) => {
                assert_eq!(payload, [0x20, 0x05]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_incomplete_frame_waits() {
        let buf = wire(b'3', 99, 5, &[0xCD; 14]);
        for cut in 1..buf.len() {
            match scan(&buf[..cut]) {
                Scan::Incomplete => {}
                // a lone ESC prefix is fine, anything else is a bug
                other => panic!("cut {cut}: unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn test_truncated_frame_resyncs_on_next_escape() {
        // a frame cut short by the start of the next one
        let mut buf = wire(b'3', 99, 5, &[0xCD; 14]);
        buf.truncate(10);
        let cut = buf.len();
        buf.extend(wire(b'2', 1, 1, &[0x00; 7]));
        match scan(&buf) {
            Scan::Garbage(n) => assert_eq!(n, cut),
            other => panic!("unexpected {other:?}"),
        }
        match scan(&buf[cut..]) {
            Scan::Frame(_, Some(BeastFrame::ModeS { payload, .. })) => {
                assert_eq!(payload.len(), 7);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_receiver_id_frame() {
        let id = [1, 2, 3, 0x1A, 5, 6, 7, 8];
        let mut buf = Vec::new();
        encode_receiver_id(&mut buf, &id);
        match scan(&buf) {
            Scan::Frame(consumed, Some(BeastFrame::ReceiverId(got))) => {
                assert_eq!(consumed, buf.len());
                assert_eq!(got, id);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_uuid_frame() {
        let mut buf = vec![ESC, 0xE4];
        buf.extend(b"0f3a7e9c-b2d1-4c6a-9e3f-1a2b3c4d5e6f");
        buf.push(ESC);
        buf.push(b'2');
        match scan(&buf) {
            Scan::Frame(consumed, Some(BeastFrame::Uuid(uuid))) => {
                assert_eq!(uuid, "0f3a7e9c-b2d1-4c6a-9e3f-1a2b3c4d5e6f");
                assert_eq!(consumed, 2 + 36);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_unknown_type_resyncs() {
        let buf = [ESC, 0x99, 0x01, 0x02];
        match scan(&buf) {
            Scan::Garbage(1) => {}
            other => panic!("unexpected {other:?}"),
        }
    }
}
