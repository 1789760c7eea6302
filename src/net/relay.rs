//! net/relay.rs
//!
//! Byte pump between an accepted client socket and its backend socket.
//! Each direction runs as its own task; the relay returns only once both
//! tasks have reported back.

use bytes::{Buf, BytesMut};
use std::{
    io,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    sync::watch,
    task::JoinSet,
    time::{self, Instant},
};
use tracing::{debug, warn};

// -----------------------------------------------------------------------------
// ----- Constants -------------------------------------------------------------

pub const DEFAULT_BUFFER_SIZE: usize = 32 * 1024;

// -----------------------------------------------------------------------------
// ----- Types -----------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RelaySettings {
    /// End the session after this long without bytes in either direction.
    /// `None` leaves it to the transport.
    pub idle_timeout: Option<Duration>,
    pub buffer_size: usize,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            idle_timeout: None,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// client -> backend
    Upstream,
    /// backend -> client
    Downstream,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayReport {
    pub upstream_bytes: u64,
    pub downstream_bytes: u64,
    pub first_finished: Option<Direction>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ending {
    Eof,
    Stopped,
    ReadFailed,
    WriteFailed,
}

#[derive(Debug)]
struct Finished {
    direction: Direction,
    bytes: u64,
    ending: Ending,
    _reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
}

// -----------------------------------------------------------------------------
// ----- Relay -----------------------------------------------------------------

/// Copy `inbound` <-> `outbound` until both directions are done, then close
/// both sockets.
///
/// Whichever side ends first decides the teardown:
/// - client side first: nothing the backend still sends can be delivered, so
///   backend reads stop. If the client side broke rather than closed, the
///   backend socket is also set to close with zero linger.
/// - backend side first: the client gets EOF and its remaining bytes keep
///   flowing to the backend until the client closes too.
///
/// `on_drain` fires once, when the first direction finishes.
pub async fn relay<F>(
    inbound: TcpStream,
    outbound: TcpStream,
    settings: &RelaySettings,
    on_drain: F,
) -> RelayReport
where
    F: FnOnce(Direction),
{
    let (client_r, client_w) = inbound.into_split();
    let (backend_r, backend_w) = outbound.into_split();

    let clock = Arc::new(ActivityClock::new());
    let (stop_upstream, stop_upstream_rx) = watch::channel(false);
    let (stop_downstream, stop_downstream_rx) = watch::channel(false);

    let mut directions = JoinSet::new();
    directions.spawn(pump(
        Direction::Upstream,
        client_r,
        backend_w,
        stop_upstream_rx,
        settings.clone(),
        clock.clone(),
    ));
    directions.spawn(pump(
        Direction::Downstream,
        backend_r,
        client_w,
        stop_downstream_rx,
        settings.clone(),
        clock,
    ));

    let mut report = RelayReport {
        upstream_bytes: 0,
        downstream_bytes: 0,
        first_finished: None,
    };
    let mut on_drain = Some(on_drain);
    let mut finished = Vec::with_capacity(2);

    while let Some(joined) = directions.join_next().await {
        let done = match joined {
            Ok(done) => done,
            Err(err) => {
                warn!("relay direction task failed: {err}");
                let _ = stop_upstream.send(true);
                let _ = stop_downstream.send(true);
                continue;
            }
        };

        match done.direction {
            Direction::Upstream => report.upstream_bytes = done.bytes,
            Direction::Downstream => report.downstream_bytes = done.bytes,
        }

        if let Some(on_drain) = on_drain.take() {
            report.first_finished = Some(done.direction);
            on_drain(done.direction);

            if done.direction == Direction::Upstream {
                let _ = stop_downstream.send(true);
                // A clean client EOF still has bytes queued for the backend;
                // only a broken client side may discard them.
                if done.ending != Ending::Eof {
                    set_zero_linger(done.writer.as_ref());
                }
            }
        }

        finished.push(done);
    }

    // Both halves of both sockets drop here.
    drop(finished);
    report
}

// -----------------------------------------------------------------------------
// ----- Internal: pump --------------------------------------------------------

async fn pump(
    direction: Direction,
    mut reader: OwnedReadHalf,
    mut writer: OwnedWriteHalf,
    mut stop: watch::Receiver<bool>,
    settings: RelaySettings,
    clock: Arc<ActivityClock>,
) -> Finished {
    let mut buf = BytesMut::with_capacity(settings.buffer_size);
    let mut bytes = 0u64;

    let ending = loop {
        buf.clear();
        buf.reserve(settings.buffer_size);

        let read = tokio::select! {
            biased;
            _ = stop_requested(&mut stop) => break Ending::Stopped,
            read = read_with_idle(&mut reader, &mut buf, settings.idle_timeout, &clock) => read,
        };

        match read {
            Ok(0) => break Ending::Eof,
            Ok(n) => {
                clock.touch();
                let written = tokio::select! {
                    biased;
                    _ = stop_requested(&mut stop) => break Ending::Stopped,
                    written = write_with_idle(&mut writer, &mut buf, settings.idle_timeout, &clock) => written,
                };
                if let Err(err) = written {
                    debug!("{direction:?} write error after {bytes} bytes: {err}");
                    break Ending::WriteFailed;
                }
                bytes += n as u64;
            }
            Err(err) => {
                debug!("{direction:?} read error after {bytes} bytes: {err}");
                break Ending::ReadFailed;
            }
        }
    };

    // Let the destination see EOF promptly.
    if let Err(err) = writer.shutdown().await {
        debug!("{direction:?} shutdown error: {err}");
    }

    debug!("{direction:?} finished ({ending:?}) after {bytes} bytes");

    Finished {
        direction,
        bytes,
        ending,
        _reader: reader,
        writer,
    }
}

async fn read_with_idle(
    reader: &mut OwnedReadHalf,
    buf: &mut BytesMut,
    idle_timeout: Option<Duration>,
    clock: &ActivityClock,
) -> io::Result<usize> {
    let Some(idle) = idle_timeout else {
        return reader.read_buf(buf).await;
    };

    loop {
        let deadline = clock.last_activity() + idle;
        match time::timeout_at(deadline, reader.read_buf(buf)).await {
            Ok(read) => return read,
            // the other direction may have moved in the meantime
            Err(_) if clock.last_activity() + idle > Instant::now() => continue,
            Err(_) => {
                return Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("no traffic for {idle:?}"),
                ));
            }
        }
    }
}

/// Write all of `buf`. A peer that stops reading counts as idle, so the
/// deadline is pushed back only by progress on either direction.
async fn write_with_idle(
    writer: &mut OwnedWriteHalf,
    buf: &mut BytesMut,
    idle_timeout: Option<Duration>,
    clock: &ActivityClock,
) -> io::Result<()> {
    let Some(idle) = idle_timeout else {
        return writer.write_all_buf(buf).await;
    };

    while buf.has_remaining() {
        let deadline = clock.last_activity() + idle;
        match time::timeout_at(deadline, writer.write_buf(buf)).await {
            Ok(Ok(0)) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(Ok(_)) => clock.touch(),
            Ok(Err(err)) => return Err(err),
            Err(_) if clock.last_activity() + idle > Instant::now() => continue,
            Err(_) => {
                return Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("peer not reading for {idle:?}"),
                ));
            }
        }
    }
    Ok(())
}

async fn stop_requested(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}

#[allow(deprecated)]
fn set_zero_linger(stream: &TcpStream) {
    if let Err(err) = stream.set_linger(Some(Duration::ZERO)) {
        debug!("cannot set zero linger: {err}");
    }
}

// -----------------------------------------------------------------------------
// ----- Internal: ActivityClock -----------------------------------------------

/// Last time either direction moved bytes, shared by both pumps.
#[derive(Debug)]
struct ActivityClock {
    started: Instant,
    last_ms: AtomicU64,
}

impl ActivityClock {
    fn new() -> Self {
        Self {
            started: Instant::now(),
            last_ms: AtomicU64::new(0),
        }
    }

    fn touch(&self) {
        let ms = self.started.elapsed().as_millis() as u64;
        self.last_ms.fetch_max(ms, Ordering::Relaxed);
    }

    fn last_activity(&self) -> Instant {
        self.started + Duration::from_millis(self.last_ms.load(Ordering::Relaxed))
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
