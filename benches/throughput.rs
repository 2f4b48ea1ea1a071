//! End to end session throughput: sources, resolved chains and fan-out.
//!
//! Each iteration builds a session, runs it to end of stream and tears it
//! down, so setup and linking are part of the measure.

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use filtergraph::prelude::*;
use filtergraph::props::codes::stream_type;

const PACKETS: u32 = 1000;
const RAW: u32 = 1;
const ENCODED: u32 = 2;

struct BenchSource {
    pid: Option<Pid>,
    sent: u32,
    size: usize,
}

impl Filter for BenchSource {
    fn process(&mut self, ctx: &mut FilterContext<'_>) -> Result<ProcessStatus> {
        let (pid, created) = match &self.pid {
            Some(pid) => (pid.clone(), false),
            None => {
                let pid = ctx.new_pid("bench")?;
                pid.set_property(codes::STREAM_TYPE, stream_type::VISUAL)?;
                pid.set_property(codes::CODEC_ID, RAW)?;
                (self.pid.insert(pid).clone(), true)
            }
        };
        // unlinked pids hold packets back: send one until connected
        let end = if created { 1 } else { PACKETS };
        while self.sent < end {
            let mut pck = match pid.new_alloc(self.size) {
                Ok(pck) => pck,
                Err(Error::WouldBlock) => return Ok(ProcessStatus::Ok),
                Err(e) => return Err(e),
            };
            pck.set_dts(u64::from(self.sent)).set_duration(1);
            pck.send()?;
            self.sent += 1;
        }
        Ok(if self.sent == PACKETS { ProcessStatus::Eos } else { ProcessStatus::Ok })
    }
}

struct BenchSink;

impl Filter for BenchSink {
    fn process(&mut self, ctx: &mut FilterContext<'_>) -> Result<ProcessStatus> {
        let Some(input) = ctx.input(0) else {
            return Ok(ProcessStatus::Ok);
        };
        while let Some(pck) = input.get_packet() {
            std::hint::black_box(pck.len());
            input.drop_packet();
        }
        Ok(if input.is_eos() { ProcessStatus::Eos } else { ProcessStatus::Ok })
    }
}

#[derive(Default)]
struct BenchConverter {
    output: Option<Pid>,
}

impl Filter for BenchConverter {
    fn configure_pid(&mut self, ctx: &mut FilterContext<'_>, pid: &PidInstance, is_remove: bool) -> Result<()> {
        if is_remove {
            return Ok(());
        }
        let out = match &self.output {
            Some(out) => out.clone(),
            None => ctx.new_pid(pid.name())?,
        };
        out.copy_properties(pid)?;
        out.set_property(codes::CODEC_ID, ENCODED)?;
        self.output = Some(out);
        Ok(())
    }

    fn process(&mut self, ctx: &mut FilterContext<'_>) -> Result<ProcessStatus> {
        let (Some(input), Some(out)) = (ctx.input(0), self.output.clone()) else {
            return Ok(ProcessStatus::Ok);
        };
        while !out.would_block() {
            let Some(pck) = input.get_packet() else {
                break;
            };
            out.new_ref(&pck, None)?.send()?;
            input.drop_packet();
        }
        Ok(if input.is_eos() { ProcessStatus::Eos } else { ProcessStatus::Ok })
    }
}

fn visual(codec: u32) -> CapBundle {
    CapBundle::new()
        .input(codes::STREAM_TYPE, stream_type::VISUAL)
        .input(codes::CODEC_ID, codec)
}

fn session(threads: usize, size: usize, sink_codec: u32, sinks: usize) -> Session {
    let session = Session::new(SessionConfig::new().with_threads(threads));
    session.register(
        FilterRegister::new("source", move |_| {
            Ok(Box::new(BenchSource {
                pid: None,
                sent: 0,
                size,
            }))
        })
        .with_caps(
            CapBundle::new()
                .output(codes::STREAM_TYPE, stream_type::VISUAL)
                .output(codes::CODEC_ID, RAW),
        ),
    );
    session.register(
        FilterRegister::new("converter", |_| Ok(Box::new(BenchConverter::default()))).with_caps(
            visual(RAW)
                .output(codes::STREAM_TYPE, stream_type::VISUAL)
                .output(codes::CODEC_ID, ENCODED),
        ),
    );
    for i in 0..sinks {
        session.register(FilterRegister::new(format!("sink{i}"), |_| Ok(Box::new(BenchSink))).with_caps(visual(sink_codec)));
    }
    session.load_filter("source").unwrap();
    for i in 0..sinks {
        session.load_filter(&format!("sink{i}")).unwrap();
    }
    session
}

fn bench_direct(c: &mut Criterion) {
    let mut group = c.benchmark_group("session_direct");
    group.throughput(Throughput::Elements(u64::from(PACKETS)));

    for threads in [0, 2] {
        group.bench_with_input(BenchmarkId::new("threads", threads), &threads, |b, &threads| {
            b.iter(|| session(threads, 1024, RAW, 1).run().unwrap());
        });
    }

    group.finish();
}

fn bench_packet_size(c: &mut Criterion) {
    let mut group = c.benchmark_group("session_packet_size");

    for size in [188usize, 4096, 65_536] {
        group.throughput(Throughput::Bytes(size as u64 * u64::from(PACKETS)));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| session(0, size, RAW, 1).run().unwrap());
        });
    }

    group.finish();
}

fn bench_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("session_fan_out");

    for sinks in [1usize, 2, 4] {
        group.throughput(Throughput::Elements(u64::from(PACKETS) * sinks as u64));
        group.bench_with_input(BenchmarkId::from_parameter(sinks), &sinks, |b, &sinks| {
            b.iter(|| session(2, 1024, RAW, sinks).run().unwrap());
        });
    }

    group.finish();
}

fn bench_resolved_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("session_resolved_chain");
    group.throughput(Throughput::Elements(u64::from(PACKETS)));

    group.bench_function("one_converter", |b| {
        b.iter(|| session(0, 1024, ENCODED, 1).run().unwrap());
    });

    group.finish();
}

criterion_group!(benches, bench_direct, bench_packet_size, bench_fan_out, bench_resolved_chain);
criterion_main!(benches);
