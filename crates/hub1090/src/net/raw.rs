/**
 * Raw ASCII framing, newline-delimited:
 *
 *   `*<hex>;`         plain frame
 *   `@<ts><hex>;`     frame with a 12-byte hex counter timestamp
 *   `%<ts><hex>;`     timestamp only, no signal
 *   `<<ts><sig><hex>;` timestamp and a 2-digit signal level
 *   `:<hex>;`         plain frame, alternate marker
 *
 * The hex digit count must match a valid Mode S frame length.
 */
use track1090::decode::frame_len;

#[derive(Debug, PartialEq, Clone)]
pub struct RawFrame {
    pub payload: Vec<u8>,
    pub stamp: u64,
    pub signal: Option<u8>,
}

/// Parse one line (without the delimiter). None for empty or heartbeat
/// lines, Err for malformed input.
pub fn parse_line(line: &[u8]) -> Result<Option<RawFrame>, &'static str> {
    let line = trim_ascii(line);
    if line.is_empty() {
        return Ok(None);
    }
    let (marker, rest) = line.split_first().ok_or("empty line")?;
    let rest = rest.strip_suffix(b";").ok_or("missing terminator")?;

    let (stamp_len, has_signal) = match marker {
        b'*' | b':' => (0, false),
        b'@' | b'%' => (12, false),
        b'<' => (12, true),
        _ => return Err("unknown line marker"),
    };

    if rest.len() < stamp_len {
        return Err("line too short");
    }
    let (stamp_hex, rest) = rest.split_at(stamp_len);
    let stamp = if stamp_len > 0 {
        u64::from_str_radix(
            std::str::from_utf8(stamp_hex).map_err(|_| "bad timestamp")?,
            16,
        )
        .map_err(|_| "bad timestamp")?
    } else {
        0
    };

    let (signal, hex) = if has_signal {
        if rest.len() < 2 {
            return Err("line too short");
        }
        let (sig_hex, hex) = rest.split_at(2);
        let signal = u8::from_str_radix(
            std::str::from_utf8(sig_hex).map_err(|_| "bad signal")?,
            16,
        )
        .map_err(|_| "bad signal")?;
        (Some(signal), hex)
    } else {
        (None, rest)
    };

    // the all-zero frame is the raw heartbeat
    if hex == b"0000" {
        return Ok(None);
    }

    let payload = hex::decode(hex).map_err(|_| "bad hex payload")?;
    if payload.is_empty() || payload.len() != frame_len(payload[0]) {
        return Err("frame length mismatch");
    }

    Ok(Some(RawFrame {
        payload,
        stamp,
        signal,
    }))
}

/// Format one frame for a raw output stream
pub fn format_line(payload: &[u8], stamp: u64) -> String {
    if stamp > 0 {
        format!("@{:012X}{};\n", stamp & 0xFFFF_FFFF_FFFF, hex::encode_upper(payload))
    } else {
        format!("*{};\n", hex::encode_upper(payload))
    }
}

/// The raw heartbeat line
pub const HEARTBEAT: &[u8] = b"*0000;\n";

fn trim_ascii(mut bytes: &[u8]) -> &[u8] {
    while let Some((first, rest)) = bytes.split_first() {
        if first.is_ascii_whitespace() {
            bytes = rest;
        } else {
            break;
        }
    }
    while let Some((last, rest)) = bytes.split_last() {
        if last.is_ascii_whitespace() {
            bytes = rest;
        } else {
            break;
        }
    }
    bytes
}
