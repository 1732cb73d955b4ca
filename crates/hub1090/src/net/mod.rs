pub mod beast;
pub mod connector;
pub mod raw;
pub mod sbs;
pub mod writer;

use crate::app::{App, ClientInfo};
use beast::{BeastFrame, Scan};
use connector::{Connector, Protocol, CONNECTOR_DELAY};
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};
use track1090::clock::now_in_ms;
use track1090::decode::Frame;
use track1090::prelude::DekuContainerRead;
use track1090::source::DataSource;
use track1090::stats::Counters;
use track1090::tracker::{Message, Payload};

/// Per-client receive buffer
const READ_BUF_CAP: usize = 64 * 1024;
/// Sustained garbage beyond this drops the peer
const GARBAGE_LIMIT: u64 = 512;
/// Inner processing loop bounds, to preserve fairness across clients
const MAX_ITERATIONS: usize = 32;
const MAX_LOOP_MS: u64 = 200;
/// A send that cannot complete within this drops the client
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);
/// Longest accepted ASCII line
const MAX_LINE_LEN: usize = 1024;

/// Why a connection ended, for the log line
#[derive(Debug)]
enum CloseReason {
    Eof,
    ReadError(io::Error),
    WriteError(io::Error),
    Garbage,
    Timeout,
    Shutdown,
}

/// Bind every configured listener. A port that cannot be bound is fatal.
pub async fn run_listeners(app: &Arc<App>) -> io::Result<()> {
    let plan: Vec<(Vec<u16>, Protocol)> = vec![
        (app.options.beast_in_ports.clone(), Protocol::BeastIn),
        (app.options.beast_out_ports.clone(), Protocol::BeastOut),
        (
            app.options.beast_reduce_out_ports.clone(),
            Protocol::BeastReduceOut,
        ),
        (app.options.raw_in_ports.clone(), Protocol::RawIn),
        (app.options.raw_out_ports.clone(), Protocol::RawOut),
        (app.options.sbs_in_ports.clone(), Protocol::SbsIn),
        (app.options.sbs_out_ports.clone(), Protocol::SbsOut),
    ];
    for (ports, protocol) in plan {
        for port in ports {
            let addr = format!("{}:{port}", app.options.bind_address);
            let listener = TcpListener::bind(&addr).await.map_err(|e| {
                io::Error::new(
                    e.kind(),
                    format!("cannot listen on {addr}: {e}"),
                )
            })?;
            info!("listening on {addr} ({})", protocol.name());
            let app = app.clone();
            tokio::spawn(accept_loop(app, listener, protocol));
        }
    }
    Ok(())
}

async fn accept_loop(app: Arc<App>, listener: TcpListener, protocol: Protocol) {
    let mut shutdown = app.shutdown.subscribe();
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    app.stats.lock().unwrap().current().clients_accepted += 1;
                    let app = app.clone();
                    tokio::spawn(async move {
                        handle_client(
                            app,
                            stream,
                            peer.ip().to_string(),
                            peer.port(),
                            protocol,
                        )
                        .await;
                    });
                }
                Err(e) => {
                    warn!("accept failed ({}): {e}", protocol.name());
                    sleep(Duration::from_millis(100)).await;
                }
            },
            _ = shutdown.changed() => return,
        }
    }
}

/// Maintain one configured outbound connection forever
pub async fn run_connector(app: Arc<App>, connector: Connector) {
    let mut shutdown = app.shutdown.subscribe();
    loop {
        match connector.connect_once().await {
            Ok((mut stream, addr)) => {
                let mut ok = true;
                if connector.send_uuid {
                    let mut hello = vec![beast::ESC, 0xE4];
                    hello.extend_from_slice(app.options.uuid.as_bytes());
                    if let Err(e) = stream.write_all(&hello).await {
                        warn!("uuid announce to {connector}: {e}");
                        ok = false;
                    }
                }
                if ok {
                    handle_client(
                        app.clone(),
                        stream,
                        addr.ip().to_string(),
                        addr.port(),
                        connector.protocol,
                    )
                    .await;
                    info!("connection to {connector} ended, reconnecting");
                }
            }
            Err(e) => {
                app.stats.lock().unwrap().current().connector_failures += 1;
                warn!("connect {connector}: {e}");
            }
        }
        tokio::select! {
            _ = sleep(CONNECTOR_DELAY) => {}
            _ = shutdown.changed() => return,
        }
    }
}

async fn handle_client(
    app: Arc<App>,
    stream: TcpStream,
    host: String,
    port: u16,
    protocol: Protocol,
) {
    let id = app.next_client_id();
    let _ = stream.set_nodelay(true);
    let (read_half, write_half) = stream.into_split();

    app.register_client(ClientInfo {
        id,
        host: host.clone(),
        port,
        service: protocol.name(),
        uuid: None,
        connected_since: now_in_ms(),
        messages: 0,
        bytes_in: 0,
        bytes_out: 0,
    });
    info!("client {id} {host}:{port} connected ({})", protocol.name());

    let reason = if protocol.is_input() {
        drop(write_half);
        input_loop(&app, id, read_half, protocol).await
    } else {
        output_loop(&app, id, read_half, write_half, protocol).await
    };

    app.unregister_client(id);
    app.stats.lock().unwrap().current().clients_dropped += 1;
    info!(
        "client {id} {host}:{port} closed ({}): {reason:?}",
        protocol.name()
    );
}

/// The source tag a service stamps on its messages
fn input_source(protocol: Protocol) -> DataSource {
    match protocol {
        Protocol::SbsIn => DataSource::Sbs,
        Protocol::SbsInMlat => DataSource::Mlat,
        Protocol::SbsInJaero => DataSource::Jaero,
        Protocol::SbsInPrio => DataSource::Prio,
        // Beast and raw input defaults; CRC-verified frames upgrade
        _ => DataSource::ModeS,
    }
}

struct InputState {
    protocol: Protocol,
    client_id: u64,
    /// consecutive junk bytes, reset by every valid frame
    garbage_run: u64,
    counters: Counters,
}

async fn input_loop(
    app: &Arc<App>,
    id: u64,
    mut read_half: OwnedReadHalf,
    protocol: Protocol,
) -> CloseReason {
    let mut shutdown = app.shutdown.subscribe();
    let mut buf: Vec<u8> = Vec::with_capacity(READ_BUF_CAP);
    let mut chunk = vec![0u8; 16 * 1024];
    let mut state = InputState {
        protocol,
        client_id: id,
        garbage_run: 0,
        counters: Counters::default(),
    };
    // silence past the heartbeat interval means the peer is gone
    let read_deadline =
        Duration::from_millis(app.options.heartbeat_ms + 5_000);

    loop {
        let read = tokio::select! {
            read = timeout(read_deadline, read_half.read(&mut chunk)) => read,
            _ = shutdown.changed() => return CloseReason::Shutdown,
        };
        let n = match read {
            Err(_elapsed) => return CloseReason::Timeout,
            Ok(Ok(0)) => return CloseReason::Eof,
            Ok(Ok(n)) => n,
            Ok(Err(e)) => return CloseReason::ReadError(e),
        };
        state.counters.bytes_in += n as u64;
        if buf.len() + n > READ_BUF_CAP {
            // buffer full with no complete message: everything is junk
            state.counters.garbage_bytes += buf.len() as u64;
            buf.clear();
        }
        buf.extend_from_slice(&chunk[..n]);

        let deadline = Instant::now() + Duration::from_millis(MAX_LOOP_MS);
        let mut closed = false;
        for _ in 0..MAX_ITERATIONS {
            let consumed = process_buffer(app, &mut state, &buf);
            if consumed > 0 {
                buf.drain(..consumed);
            }
            if state.garbage_run > GARBAGE_LIMIT {
                closed = true;
                break;
            }
            if consumed == 0 || buf.is_empty() || Instant::now() > deadline {
                break;
            }
        }

        let mut stats = app.stats.lock().unwrap();
        stats.current().merge(&state.counters);
        drop(stats);
        state.counters = Counters::default();

        if closed {
            return CloseReason::Garbage;
        }
    }
}

/// Frame and decode as much of the buffer as possible, returning how many
/// bytes were consumed.
fn process_buffer(app: &Arc<App>, state: &mut InputState, buf: &[u8]) -> usize {
    match state.protocol {
        Protocol::BeastIn => process_beast(app, state, buf),
        Protocol::RawIn => process_lines(app, state, buf, process_raw_line),
        Protocol::SbsIn
        | Protocol::SbsInMlat
        | Protocol::SbsInJaero
        | Protocol::SbsInPrio => {
            process_lines(app, state, buf, process_sbs_line)
        }
        // pure outputs discard inbound bytes
        _ => buf.len(),
    }
}

fn process_beast(app: &Arc<App>, state: &mut InputState, buf: &[u8]) -> usize {
    let mut consumed = 0;
    while consumed < buf.len() {
        match beast::scan(&buf[consumed..]) {
            Scan::Incomplete => break,
            Scan::Garbage(n) => {
                consumed += n;
                state.garbage_run += n as u64;
                state.counters.garbage_bytes += n as u64;
            }
            Scan::Frame(n, frame) => {
                consumed += n;
                state.garbage_run = 0;
                if let Some(frame) = frame {
                    dispatch_beast_frame(app, state, frame);
                }
            }
        }
    }
    consumed
}

fn dispatch_beast_frame(
    app: &Arc<App>,
    state: &mut InputState,
    frame: BeastFrame,
) {
    match frame {
        BeastFrame::ModeS {
            stamp,
            signal,
            payload,
        } => {
            ingest_mode_s(app, state, &payload, stamp, signal);
        }
        BeastFrame::ModeAc {
            stamp,
            signal: _,
            payload,
        } => {
            // the all-zero type "1" frame is the Beast heartbeat
            if payload == [0, 0] {
                return;
            }
            let code = u16::from_be_bytes(payload);
            let now = now_in_ms();
            let squawk = track1090::decode::mode_ac_squawk(code);
            let mut msg = Message::new(
                Payload::ModeAc {
                    squawk,
                    altitude: track1090::decode::mode_ac_altitude(code),
                },
                DataSource::ModeAc,
                now,
            );
            msg.stamp_12mhz = stamp;
            msg.client_id = state.client_id;
            app.tracker.update_from_message(&mut msg, &mut state.counters);
            app.mode_ac_squawks.lock().unwrap().push((squawk, now));
        }
        BeastFrame::ReceiverId(receiver_id) => {
            debug!(
                "client {}: receiver id {}",
                state.client_id,
                hex::encode(receiver_id)
            );
        }
        BeastFrame::Uuid(uuid) => {
            let mut clients = app.clients.lock().unwrap();
            if let Some(client) =
                clients.iter_mut().find(|c| c.id == state.client_id)
            {
                client.uuid = Some(uuid);
            }
        }
        BeastFrame::Vendor => {}
    }
}

fn ingest_mode_s(
    app: &Arc<App>,
    state: &mut InputState,
    payload: &[u8],
    stamp: u64,
    signal: u8,
) {
    let frame = match Frame::from_bytes((payload, 0)) {
        Ok((_, frame)) => frame,
        Err(_) => {
            state.counters.crc_bad += 1;
            return;
        }
    };
    // a zero checksum means the CRC actually verified
    let source = if frame.crc == 0 {
        DataSource::ModeSChecked
    } else {
        input_source(state.protocol)
    };
    state.counters.crc_ok += 1;

    let mut msg = Message::new(Payload::ModeS(frame), source, now_in_ms());
    msg.stamp_12mhz = stamp;
    msg.remote = true;
    msg.client_id = state.client_id;
    msg.rssi = signal_to_dbfs(signal);
    if app.options.debug_decode {
        if let Payload::ModeS(frame) = &msg.payload {
            debug!("client {}:\n{frame}", state.client_id);
        }
    }

    let handle = app.tracker.update_from_message(&mut msg, &mut state.counters);
    if msg.track_created {
        if let Some(handle) = &handle {
            let addr = handle.lock().unwrap().addr;
            if let Some((registration, type_code, flags)) =
                app.apply_db_entry(addr)
            {
                let mut aircraft = handle.lock().unwrap();
                aircraft.registration = registration;
                aircraft.type_code = type_code;
                aircraft.db_flags = flags;
            }
        }
    }

    if !msg.garbage && !msg.duplicate {
        forward_mode_s(app, state, payload, stamp, signal, msg.reduce_forward);
        if let Some(handle) = &handle {
            emit_sbs_position(app, handle, msg.now);
        }
    }
}

/// Beast signal byte to dBFS; 0x00 and 0xFF mean "no measurement"
fn signal_to_dbfs(signal: u8) -> Option<f64> {
    if signal == 0 || signal == 0xFF {
        return None;
    }
    let v = signal as f64 / 255.;
    Some(10. * (v * v).log10())
}

/// SBS output carries one MSG,3 line per accepted position update
fn emit_sbs_position(
    app: &Arc<App>,
    handle: &track1090::store::Handle,
    now: u64,
) {
    let mut writer = app.sbs_out.lock().unwrap();
    if writer.subscriber_count() == 0 {
        return;
    }
    let line = {
        let aircraft = handle.lock().unwrap();
        if aircraft.seen_pos != now || !aircraft.position_reliable() {
            return;
        }
        sbs::format_position(&aircraft, now)
    };
    if let Some(line) = line {
        if let Some(buf) = writer.prepare_write(line.len()) {
            buf.extend_from_slice(line.as_bytes());
            writer.complete_write();
        }
    }
}

/// Re-emit an accepted frame on the Beast and raw output services
fn forward_mode_s(
    app: &Arc<App>,
    state: &mut InputState,
    payload: &[u8],
    stamp: u64,
    signal: u8,
    reduce: bool,
) {
    let msg_type = if payload.len() == 7 { b'2' } else { b'3' };

    let mut writer = app.beast_out.lock().unwrap();
    if let Some(buf) = writer.prepare_write(2 * payload.len() + 16) {
        beast::encode(buf, msg_type, stamp, signal, payload);
        state.counters.bytes_out += payload.len() as u64;
        writer.complete_write();
    }
    drop(writer);

    if reduce {
        let mut writer = app.beast_reduce_out.lock().unwrap();
        if let Some(buf) = writer.prepare_write(2 * payload.len() + 16) {
            beast::encode(buf, msg_type, stamp, signal, payload);
            writer.complete_write();
        }
    }

    let mut writer = app.raw_out.lock().unwrap();
    if writer.subscriber_count() > 0 {
        let line = raw::format_line(payload, stamp);
        if let Some(buf) = writer.prepare_write(line.len()) {
            buf.extend_from_slice(line.as_bytes());
            writer.complete_write();
        }
    }
}

/// Split buffered bytes into newline-delimited frames
fn process_lines<F>(
    app: &Arc<App>,
    state: &mut InputState,
    buf: &[u8],
    mut handler: F,
) -> usize
where
    F: FnMut(&Arc<App>, &mut InputState, &[u8]),
{
    let mut consumed = 0;
    while let Some(pos) = buf[consumed..].iter().position(|&b| b == b'\n') {
        let line = &buf[consumed..consumed + pos];
        consumed += pos + 1;
        if line.len() > MAX_LINE_LEN {
            state.garbage_run += line.len() as u64;
            state.counters.garbage_bytes += line.len() as u64;
            continue;
        }
        handler(app, state, line);
    }
    // an over-long line with no delimiter in sight is garbage wholesale
    if buf.len() - consumed > MAX_LINE_LEN {
        state.garbage_run += (buf.len() - consumed) as u64;
        state.counters.garbage_bytes += (buf.len() - consumed) as u64;
        consumed = buf.len();
    }
    consumed
}

fn process_raw_line(app: &Arc<App>, state: &mut InputState, line: &[u8]) {
    match raw::parse_line(line) {
        Ok(Some(frame)) => {
            state.garbage_run = 0;
            ingest_mode_s(
                app,
                state,
                &frame.payload,
                frame.stamp,
                frame.signal.unwrap_or(0),
            );
        }
        Ok(None) => state.garbage_run = 0,
        Err(e) => {
            state.counters.frames_bad += 1;
            state.garbage_run += line.len() as u64;
            debug!("client {}: raw line rejected: {e}", state.client_id);
        }
    }
}

fn process_sbs_line(app: &Arc<App>, state: &mut InputState, line: &[u8]) {
    let text = match std::str::from_utf8(line) {
        Ok(text) => text,
        Err(_) => {
            state.counters.frames_bad += 1;
            state.garbage_run += line.len() as u64;
            return;
        }
    };
    match sbs::parse_line(text) {
        Ok(Some(update)) => {
            state.garbage_run = 0;
            let mut msg = Message::new(
                Payload::Sbs(update),
                input_source(state.protocol),
                now_in_ms(),
            );
            msg.remote = true;
            msg.client_id = state.client_id;
            let handle =
                app.tracker.update_from_message(&mut msg, &mut state.counters);
            if let Some(handle) = &handle {
                emit_sbs_position(app, handle, msg.now);
            }
        }
        Ok(None) => state.garbage_run = 0,
        Err(e) => {
            state.counters.frames_bad += 1;
            state.garbage_run += line.len() as u64;
            debug!("client {}: sbs line rejected: {e}", state.client_id);
        }
    }
}

/// Serve one output client: drain its batch queue, heartbeat when idle,
/// discard whatever the peer sends.
async fn output_loop(
    app: &Arc<App>,
    id: u64,
    mut read_half: OwnedReadHalf,
    mut write_half: OwnedWriteHalf,
    protocol: Protocol,
) -> CloseReason {
    let mut shutdown = app.shutdown.subscribe();
    let service = match protocol {
        Protocol::BeastOut => &app.beast_out,
        Protocol::BeastReduceOut => &app.beast_reduce_out,
        Protocol::RawOut => &app.raw_out,
        Protocol::SbsOut => &app.sbs_out,
        _ => &app.beast_out,
    };
    let mut rx = service.lock().unwrap().subscribe(id);

    // Beast outputs lead with our receiver id record
    if matches!(protocol, Protocol::BeastOut | Protocol::BeastReduceOut) {
        let mut hello = Vec::with_capacity(18);
        beast::encode_receiver_id(&mut hello, &app.options.receiver_id);
        match timeout(DRAIN_TIMEOUT, write_half.write_all(&hello)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return CloseReason::WriteError(e),
            Err(_) => return CloseReason::Timeout,
        }
    }

    let heartbeat = Duration::from_millis(app.options.heartbeat_ms.max(1_000));
    let mut sink = [0u8; 4096];
    loop {
        tokio::select! {
            batch = rx.recv() => {
                let batch = match batch {
                    Some(batch) => batch,
                    // evicted by the writer for falling behind
                    None => return CloseReason::Garbage,
                };
                match timeout(DRAIN_TIMEOUT, write_half.write_all(&batch)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => return CloseReason::WriteError(e),
                    Err(_) => return CloseReason::Timeout,
                }
            }
            _ = sleep(heartbeat) => {
                let beat: Vec<u8> = match protocol {
                    Protocol::BeastOut | Protocol::BeastReduceOut => {
                        let mut out = Vec::with_capacity(11);
                        beast::heartbeat(&mut out);
                        out
                    }
                    Protocol::RawOut => raw::HEARTBEAT.to_vec(),
                    _ => sbs::HEARTBEAT.to_vec(),
                };
                match timeout(DRAIN_TIMEOUT, write_half.write_all(&beat)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => return CloseReason::WriteError(e),
                    Err(_) => return CloseReason::Timeout,
                }
            }
            read = read_half.read(&mut sink) => match read {
                Ok(0) => return CloseReason::Eof,
                Ok(_) => {} // IGNORE framing: discard
                Err(e) => return CloseReason::ReadError(e),
            },
            _ = shutdown.changed() => return CloseReason::Shutdown,
        }
    }
}
