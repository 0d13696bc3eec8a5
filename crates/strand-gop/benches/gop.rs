//! Benchmark GOP put and listener reads from a plain thread.

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use strand_gop::{GopBuffer, GopConfig, MediaKind, Packet, StreamInfo};
use strand_runtime::{Runtime, RuntimeConfig};

fn streams() -> Vec<StreamInfo> {
    vec![
        StreamInfo::new(0, MediaKind::Video, "h264"),
        StreamInfo::new(1, MediaKind::Audio, "aac"),
    ]
}

fn bench_gop(c: &mut Criterion) {
    let rt = Runtime::new(RuntimeConfig::new().workers(1)).expect("runtime");
    let payload = Bytes::from(vec![0u8; 1400]);

    let mut group = c.benchmark_group("gop");
    group.throughput(Throughput::Elements(1));

    let buf = GopBuffer::new(rt.handle(), GopConfig::new(512), streams()).expect("buffer");
    let mut pts = 0i64;
    group.bench_function("put", |b| {
        b.iter(|| {
            pts += 1;
            // Keyframe every 60 packets, as for a 2s GOP at 30fps
            let pkt = Packet::new(0, pts, pts % 60 == 0, payload.clone());
            buf.put(black_box(pkt)).expect("put");
        });
    });

    // Four listeners each reading every unit
    let buf = GopBuffer::new(rt.handle(), GopConfig::new(512).wait_keyframe(false), streams())
        .expect("buffer");
    let mut listeners: Vec<_> = (0..4).map(|_| buf.create_listener().expect("listener")).collect();
    let mut pts = 0i64;
    group.bench_function("put_fanout_4", |b| {
        b.iter(|| {
            pts += 1;
            buf.put(Packet::new(1, pts, false, payload.clone())).expect("put");
            for l in listeners.iter_mut() {
                black_box(l.try_get().expect("get"));
            }
        });
    });

    group.finish();
}

criterion_group!(benches, bench_gop);
criterion_main!(benches);
