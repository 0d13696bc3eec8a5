//! Fan-out demo - one producer, many socket consumers
//!
//! A producer coroutine writes synthetic packets (a keyframe every GOP)
//! into a GOP buffer. Each listener coroutine forwards what it reads over
//! a socket pair; a sink coroutine on the other end counts the bytes.
//! Some sinks read slowly, so their listeners lag and get moved forward.
//!
//! Usage: fanout [listeners] [packets]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use nix::sys::socket::{socketpair, AddressFamily, SockFlag, SockType};
use strand::{
    current_task, sleep, EofReason, GopBuffer, GopConfig, GopError, GopListener, MediaKind, MsgFlags,
    Packet, Runtime, RuntimeConfig, Socket, StreamInfo,
};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

const GOP_LENGTH: i64 = 30;
const PACKET_SIZE: usize = 1316;

#[derive(Default)]
struct Totals {
    forwarded: AtomicU64,
    received: AtomicU64,
    sinks_done: AtomicU64,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("STRAND_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let listeners: usize = args.next().and_then(|s| s.parse().ok()).unwrap_or(16);
    let packets: i64 = args.next().and_then(|s| s.parse().ok()).unwrap_or(3000);

    if let Err(e) = run(listeners, packets) {
        error!(error = %e, "fanout failed");
        std::process::exit(1);
    }
}

fn run(listeners: usize, packets: i64) -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new(RuntimeConfig::from_env())?;
    let handle = rt.handle().clone();
    let streams = vec![
        StreamInfo::new(0, MediaKind::Video, "h264"),
        StreamInfo::new(1, MediaKind::Audio, "aac"),
    ];
    let buffer = GopBuffer::<Packet>::new(&handle, GopConfig::new(4 * GOP_LENGTH as usize), streams)?;
    let totals = Arc::new(Totals::default());

    for i in 0..listeners {
        let (a, b) = socketpair(AddressFamily::Unix, SockType::Stream, None, SockFlag::SOCK_CLOEXEC)?;
        let tx = Socket::new(&handle, a)?;
        let rx = Socket::new(&handle, b)?;

        let mut listener = buffer.create_listener()?;
        // Every fourth consumer only wants audio
        listener.enable_skip_video(i % 4 == 3);

        let t = Arc::clone(&totals);
        handle.schedule(move || forward(i, listener, tx, t), 0)?;

        let t = Arc::clone(&totals);
        // Every third sink is slow
        let pause = if i % 3 == 2 { Duration::from_millis(2) } else { Duration::ZERO };
        handle.schedule(move || sink(rx, pause, t), 0)?;
    }

    let start = Instant::now();
    let producer = Arc::clone(&buffer);
    rt.block_on(move || produce(&producer, packets))??;
    info!(packets, elapsed = ?start.elapsed(), "producer finished");

    let cleanup = Arc::clone(&buffer);
    rt.block_on(move || cleanup.cleanup())??;

    while totals.sinks_done.load(Ordering::Acquire) < listeners as u64 {
        if start.elapsed() > Duration::from_secs(30) {
            warn!("sinks did not finish in time");
            break;
        }
        std::thread::sleep(Duration::from_millis(20));
    }

    println!("\n=== Results ===");
    println!("Listeners:       {}", listeners);
    println!("Packets put:     {}", packets);
    println!("Bytes forwarded: {}", totals.forwarded.load(Ordering::Relaxed));
    println!("Bytes received:  {}", totals.received.load(Ordering::Relaxed));
    println!("Generations:     {}", buffer.generation());
    println!("Elapsed:         {:?}", start.elapsed());
    println!("Stats:           {:?}", handle.stats());

    rt.shutdown();
    Ok(())
}

fn produce(buffer: &GopBuffer<Packet>, packets: i64) -> Result<(), GopError> {
    let payload = Bytes::from(vec![0x47u8; PACKET_SIZE]);
    for pts in 0..packets {
        let video = Packet::new(0, pts, pts % GOP_LENGTH == 0, payload.clone());
        buffer.put(video)?;
        if pts % 3 == 0 {
            buffer.put(Packet::new(1, pts, true, payload.slice(..PACKET_SIZE / 4)))?;
        }
        // Roughly real time at 30 packets per 10ms tick
        if pts % GOP_LENGTH == 0 {
            sleep(Duration::from_millis(10));
        }
    }
    buffer.put_eof(EofReason::EndOfStream)
}

fn forward(index: usize, mut listener: GopListener<Packet>, tx: Socket, totals: Arc<Totals>) {
    loop {
        match listener.get() {
            Ok(pkt) => {
                if let Err(e) = tx.send_all(&pkt.payload) {
                    warn!(listener = index, error = %e, "send failed");
                    break;
                }
                totals.forwarded.fetch_add(pkt.payload.len() as u64, Ordering::Relaxed);
            }
            Err(GopError::Eof(reason)) => {
                debug!(listener = index, %reason, "stream ended");
                break;
            }
            Err(GopError::Exit) => break,
            Err(e) => {
                warn!(listener = index, error = %e, "get failed");
                break;
            }
        }
    }
    // Dropping `tx` closes the socket; the sink sees end of stream
    debug!(listener = index, task = ?current_task(), "listener done");
}

fn sink(rx: Socket, pause: Duration, totals: Arc<Totals>) {
    let mut buf = vec![0u8; 16 * 1024];
    loop {
        match rx.recv(&mut buf, MsgFlags::empty()) {
            Ok(0) => break,
            Ok(n) => {
                totals.received.fetch_add(n as u64, Ordering::Relaxed);
                if !pause.is_zero() {
                    sleep(pause);
                }
            }
            Err(e) => {
                warn!(error = %e, "recv failed");
                break;
            }
        }
    }
    totals.sinks_done.fetch_add(1, Ordering::Release);
}
