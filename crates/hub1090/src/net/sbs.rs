/**
 * SBS "BaseStation" protocol: comma-separated lines of 22 fields.
 *
 *   MSG,<type>,<sess>,<acid>,<hexid>,<flight>,<dates...>,<callsign>,
 *   <altitude>,<gs>,<track>,<lat>,<lon>,<vrate>,<squawk>,<alert>,
 *   <emergency>,<spi>,<ground>
 *
 * Field 5 is the hex ICAO address; fields 11 to 22 carry the data. The
 * MLAT flavor reuses field 19 (alert) as a receiver count.
 */
use chrono::{DateTime, Utc};
use track1090::prelude::Aircraft;
use track1090::tracker::SbsUpdate;

/// Parse one line. `Ok(None)` for keep-alives and non-MSG records.
pub fn parse_line(line: &str) -> Result<Option<SbsUpdate>, &'static str> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let fields: Vec<&str> = line.split(',').collect();
    if fields[0] != "MSG" {
        // SEL/ID/AIR/STA/CLK records carry nothing we track
        return Ok(None);
    }
    if fields.len() < 22 {
        return Err("too few fields");
    }

    let addr = u32::from_str_radix(fields[4].trim(), 16)
        .map_err(|_| "bad hex ident")?;
    if addr == 0 || addr > 0xFF_FFFF {
        return Err("bad hex ident");
    }

    let mut update = SbsUpdate {
        addr,
        ..SbsUpdate::default()
    };

    let callsign = fields[10].trim();
    if !callsign.is_empty() {
        update.callsign = Some(callsign.trim_end().to_string());
    }
    update.altitude = fields[11].trim().parse().ok();
    update.gs = fields[12].trim().parse().ok();
    update.track = fields[13].trim().parse().ok();
    let lat: Option<f64> = fields[14].trim().parse().ok();
    let lon: Option<f64> = fields[15].trim().parse().ok();
    if let (Some(lat), Some(lon)) = (lat, lon) {
        if (-90. ..=90.).contains(&lat)
            && (-180. ..=180.).contains(&lon)
            && (lat != 0. || lon != 0.)
        {
            update.latitude = Some(lat);
            update.longitude = Some(lon);
        }
    }
    update.vertical_rate = fields[16].trim().parse().ok();
    let squawk = fields[17].trim();
    if !squawk.is_empty() {
        // squawk digits are octal but conventionally carried as-is
        update.squawk = u16::from_str_radix(squawk, 16).ok();
    }
    update.on_ground = match fields[21].trim() {
        "-1" | "1" => Some(true),
        "0" => Some(false),
        _ => None,
    };

    Ok(Some(update))
}

/// Format an aircraft as an SBS MSG,3 line (position) for output streams
pub fn format_position(aircraft: &Aircraft, now_ms: u64) -> Option<String> {
    let ts = DateTime::<Utc>::from_timestamp_millis(now_ms as i64)?;
    let date = ts.format("%Y/%m/%d");
    let time = ts.format("%H:%M:%S%.3f");
    let altitude = aircraft
        .baro_alt
        .map_or(String::new(), |alt| alt.to_string());
    let ground = if aircraft.pos_surface { "-1" } else { "0" };
    Some(format!(
        "MSG,3,1,1,{:06X},1,{date},{time},{date},{time},,{altitude},,,{:.5},{:.5},,,0,0,0,{ground}\r\n",
        aircraft.addr, aircraft.lat, aircraft.lon,
    ))
}

/// The SBS keep-alive is a bare line ending
pub const HEARTBEAT: &[u8] = b"\r\n";

#[cfg(test)]
mod tests {
    use super::*;

    const LINE: &str = "MSG,3,1,1,4B1803,1,2026/07/21,12:00:01.000,2026/07/21,12:00:01.000,SWR123,38000,450.0,270.5,47.45,8.56,-64,2210,0,0,0,0";

    #[test]
    fn test_position_line() {
        let update = parse_line(LINE).unwrap().unwrap();
        assert_eq!(update.addr, 0x4B1803);
        assert_eq!(update.callsign.as_deref(), Some("SWR123"));
        assert_eq!(update.altitude, Some(38_000));
        assert_eq!(update.gs, Some(450.0));
        assert_eq!(update.track, Some(270.5));
        assert_eq!(update.latitude, Some(47.45));
        assert_eq!(update.longitude, Some(8.56));
        assert_eq!(update.vertical_rate, Some(-64));
        assert_eq!(update.squawk, Some(0x2210));
        assert_eq!(update.on_ground, Some(false));
    }

    #[test]
    fn test_too_few_fields_rejected() {
        let line = "MSG,3,1,1,4B1803,1,2026/07/21,12:00:01.000";
        assert!(parse_line(line).is_err());
    }

    #[test]
    fn test_non_msg_ignored() {
        assert_eq!(parse_line("STA,,5,179,400F2B,10005"), Ok(None));
        assert_eq!(parse_line(""), Ok(None));
    }

    #[test]
    fn test_bad_ident_rejected() {
        let line = LINE.replace("4B1803", "XYZZY");
        assert!(parse_line(&line).is_err());
        let line = LINE.replace("4B1803", "000000");
        assert!(parse_line(&line).is_err());
    }

    #[test]
    fn test_empty_fields_are_absent() {
        let line = "MSG,8,1,1,4B1803,1,2026/07/21,12:00:01.000,2026/07/21,12:00:01.000,,,,,,,,,,,,";
        let update = parse_line(line).unwrap().unwrap();
        assert_eq!(update.callsign, None);
        assert_eq!(update.altitude, None);
        assert_eq!(update.latitude, None);
        assert_eq!(update.on_ground, None);
    }

    #[test]
    fn test_null_island_dropped() {
        let line = LINE
            .replace("47.45", "0.0")
            .replace("8.56", "0.0");
        let update = parse_line(&line).unwrap().unwrap();
        assert_eq!(update.latitude, None);
    }

    #[test]
    fn test_format_parses_back() {
        let mut aircraft = Aircraft::new(0x4B1803, false, 0);
        aircraft.lat = 47.45;
        aircraft.lon = 8.56;
        aircraft.baro_alt = Some(38_000);
        let line = format_position(&aircraft, 1_753_000_000_000).unwrap();
        let update = parse_line(line.trim()).unwrap().unwrap();
        assert_eq!(update.addr, 0x4B1803);
        assert_eq!(update.altitude, Some(38_000));
        assert_eq!(update.latitude, Some(47.45));
        assert_eq!(update.on_ground, Some(false));
    }
}
