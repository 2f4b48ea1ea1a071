//! Test filters shared by the integration tests.
//!
//! - `source`: emits `count` packets of `size` bytes on one pid, the first
//!   four bytes carrying the sequence number; `burst` sends until blocked
//! - `sink`: consumes one packet per call (or everything with `greedy`)
//! - `forward`: copies each input packet by reference to one output pid,
//!   rewriting the codec id
//!
//! Each register reports what it observed through a shared [`Recorder`].

#![allow(dead_code)]

use filtergraph::prelude::*;
use filtergraph::props::codes::stream_type;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Codec ids used by the test graphs.
pub const RAW: u32 = 1;
pub const ENCODED: u32 = 2;
pub const PACKED: u32 = 3;

/// What the test filters saw.
#[derive(Debug, Default)]
pub struct RecorderState {
    /// Sequence numbers received by sinks, per sink instance.
    pub received: Vec<(FilterId, u32)>,
    /// Payload sizes received by sinks.
    pub sizes: Vec<usize>,
    /// Allocation refusals seen by sources.
    pub would_block: u32,
    /// Highest queue length seen by sinks.
    pub max_queued: u32,
    /// Sinks that reached end of stream on all their inputs.
    pub eos: u32,
    /// Calls to `process`, per filter name.
    pub process_calls: Vec<String>,
    /// `configure_pid` calls as (filter, is_remove).
    pub configured: Vec<(String, bool)>,
    /// Events delivered, as (filter, event name).
    pub events: Vec<(String, String)>,
    /// Setup errors notified, as (notified filter, failed filter).
    pub setup_errors: Vec<(String, String)>,
    /// Filters finalized.
    pub finalized: Vec<String>,
    /// Argument updates applied.
    pub updates: Vec<(String, PropertyValue)>,
}

/// Shared observation point.
#[derive(Debug, Clone, Default)]
pub struct Recorder(Arc<Mutex<RecorderState>>);

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MutexGuard<'_, RecorderState> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn sequences(&self) -> Vec<u32> {
        self.state().received.iter().map(|(_, seq)| *seq).collect()
    }

    pub fn process_calls(&self, filter: &str) -> usize {
        self.state().process_calls.iter().filter(|f| *f == filter).count()
    }
}

// ============================================================================
// Source
// ============================================================================

pub struct Source {
    recorder: Recorder,
    pid: Option<Pid>,
    count: u32,
    size: usize,
    codec: u32,
    sent: u32,
    burst: bool,
}

impl Filter for Source {
    fn process(&mut self, ctx: &mut FilterContext<'_>) -> Result<ProcessStatus> {
        self.recorder.state().process_calls.push(ctx.name().to_string());
        let (pid, created) = match &self.pid {
            Some(pid) => (pid.clone(), false),
            None => {
                let pid = ctx.new_pid("video")?;
                pid.set_property(codes::STREAM_TYPE, stream_type::VISUAL)?;
                pid.set_property(codes::CODEC_ID, self.codec)?;
                pid.set_property(codes::TIMESCALE, 1000u32)?;
                (self.pid.insert(pid).clone(), true)
            }
        };
        // packets sent before the pid is linked are held back: no burst yet
        let burst = self.burst && !created;
        loop {
            if self.sent == self.count {
                return Ok(ProcessStatus::Eos);
            }
            let mut pck = match pid.new_alloc(self.size) {
                Ok(pck) => pck,
                Err(Error::WouldBlock) => {
                    self.recorder.state().would_block += 1;
                    return Ok(ProcessStatus::Ok);
                }
                Err(e) => return Err(e),
            };
            if let Some(data) = pck.data_mut() {
                let seq = self.sent.to_be_bytes();
                let n = data.len().min(4);
                data[..n].copy_from_slice(&seq[4 - n..]);
            }
            pck.set_dts(u64::from(self.sent) * 40)
                .set_cts(u64::from(self.sent) * 40)
                .set_duration(40)
                .set_sap(SapType::Sap1);
            pck.send()?;
            self.sent += 1;
            if !burst {
                return Ok(ProcessStatus::Ok);
            }
        }
    }

    fn process_event(&mut self, ctx: &mut FilterContext<'_>, event: &FilterEvent, _target: &EventTarget) -> bool {
        self.recorder
            .state()
            .events
            .push((ctx.name().to_string(), event.name().to_string()));
        false
    }

    fn on_setup_error(&mut self, ctx: &mut FilterContext<'_>, failed: &str, _error: &Error) -> bool {
        self.recorder
            .state()
            .setup_errors
            .push((ctx.name().to_string(), failed.to_string()));
        true
    }

    fn finalize(&mut self, ctx: &mut FilterContext<'_>) {
        self.recorder.state().finalized.push(ctx.name().to_string());
    }
}

/// A source register named `name` producing `codec` packets.
pub fn source_register(name: &str, codec: u32, recorder: &Recorder) -> FilterRegister {
    let recorder = recorder.clone();
    FilterRegister::new(name, move |args| {
        Ok(Box::new(Source {
            recorder: recorder.clone(),
            pid: None,
            count: args.get_u32("count").unwrap_or(10),
            size: args.get_u32("size").unwrap_or(8) as usize,
            codec,
            sent: 0,
            burst: args.get_bool("burst").unwrap_or(false),
        }))
    })
    .with_description("Test packet source")
    .with_arg(ArgDescriptor::new("count", PropertyType::Uint).with_default("10"))
    .with_arg(ArgDescriptor::new("size", PropertyType::Uint).with_default("8").with_range("0-65536"))
    .with_arg(ArgDescriptor::new("burst", PropertyType::Bool).with_default("false"))
    .with_caps(
        CapBundle::new()
            .output(codes::STREAM_TYPE, stream_type::VISUAL)
            .output(codes::CODEC_ID, codec),
    )
}

// ============================================================================
// Sink
// ============================================================================

pub struct Sink {
    recorder: Recorder,
    greedy: bool,
    fail_with: Option<Error>,
    done: bool,
}

impl Filter for Sink {
    fn configure_pid(&mut self, ctx: &mut FilterContext<'_>, _pid: &PidInstance, is_remove: bool) -> Result<()> {
        self.recorder
            .state()
            .configured
            .push((ctx.name().to_string(), is_remove));
        match (&self.fail_with, is_remove) {
            (Some(e), false) => Err(e.clone()),
            _ => Ok(()),
        }
    }

    fn process(&mut self, ctx: &mut FilterContext<'_>) -> Result<ProcessStatus> {
        self.recorder.state().process_calls.push(ctx.name().to_string());
        let mut all_eos = ctx.num_inputs() > 0;
        for input in ctx.inputs() {
            loop {
                let queued = input.queued();
                let Some(pck) = input.get_packet() else {
                    break;
                };
                {
                    let mut state = self.recorder.state();
                    state.max_queued = state.max_queued.max(queued);
                    let mut seq = [0u8; 4];
                    let n = pck.len().min(4);
                    seq[4 - n..].copy_from_slice(&pck.data()[..n]);
                    state.received.push((ctx.id(), u32::from_be_bytes(seq)));
                    state.sizes.push(pck.len());
                }
                input.drop_packet();
                if !self.greedy {
                    break;
                }
            }
            if !input.is_eos() {
                all_eos = false;
            }
        }
        if all_eos {
            if !self.done {
                self.done = true;
                self.recorder.state().eos += 1;
            }
            return Ok(ProcessStatus::Eos);
        }
        Ok(ProcessStatus::Ok)
    }

    fn process_event(&mut self, ctx: &mut FilterContext<'_>, event: &FilterEvent, _target: &EventTarget) -> bool {
        self.recorder
            .state()
            .events
            .push((ctx.name().to_string(), event.name().to_string()));
        false
    }

    fn update_arg(&mut self, ctx: &mut FilterContext<'_>, name: &str, value: &PropertyValue) -> Result<()> {
        self.recorder
            .state()
            .updates
            .push((format!("{}.{name}", ctx.name()), value.clone()));
        Ok(())
    }

    fn finalize(&mut self, ctx: &mut FilterContext<'_>) {
        self.recorder.state().finalized.push(ctx.name().to_string());
    }
}

/// A sink register named `name` accepting visual pids of `codec`.
pub fn sink_register(name: &str, codec: u32, recorder: &Recorder) -> FilterRegister {
    sink_register_with(name, codec, recorder, None)
}

/// A sink whose `configure_pid` fails with `error`.
pub fn sink_register_with(name: &str, codec: u32, recorder: &Recorder, error: Option<Error>) -> FilterRegister {
    let recorder = recorder.clone();
    FilterRegister::new(name, move |args| {
        Ok(Box::new(Sink {
            recorder: recorder.clone(),
            greedy: args.get_bool("greedy").unwrap_or(false),
            fail_with: error.clone(),
            done: false,
        }))
    })
    .with_description("Test packet sink")
    .with_arg(ArgDescriptor::new("greedy", PropertyType::Bool).with_default("false"))
    .with_arg(ArgDescriptor::new("volume", PropertyType::Uint).with_default("5").with_range("0-10").updatable())
    .with_caps(
        CapBundle::new()
            .input(codes::STREAM_TYPE, stream_type::VISUAL)
            .input(codes::CODEC_ID, codec),
    )
}

// ============================================================================
// Forward
// ============================================================================

pub struct Forward {
    recorder: Recorder,
    out_codec: u32,
    output: Option<Pid>,
}

impl Filter for Forward {
    fn configure_pid(&mut self, ctx: &mut FilterContext<'_>, pid: &PidInstance, is_remove: bool) -> Result<()> {
        self.recorder
            .state()
            .configured
            .push((ctx.name().to_string(), is_remove));
        if is_remove {
            if let Some(out) = self.output.take() {
                out.remove();
            }
            return Ok(());
        }
        let out = match &self.output {
            Some(out) => out.clone(),
            None => ctx.new_pid(pid.name())?,
        };
        out.copy_properties(pid)?;
        out.set_property(codes::CODEC_ID, self.out_codec)?;
        self.output = Some(out);
        Ok(())
    }

    fn process(&mut self, ctx: &mut FilterContext<'_>) -> Result<ProcessStatus> {
        self.recorder.state().process_calls.push(ctx.name().to_string());
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
        if input.is_eos() {
            return Ok(ProcessStatus::Eos);
        }
        Ok(ProcessStatus::Ok)
    }
}

/// A conversion register `from` -> `to`.
pub fn forward_register(name: &str, from: u32, to: u32, recorder: &Recorder) -> FilterRegister {
    let recorder = recorder.clone();
    FilterRegister::new(name, move |_| {
        Ok(Box::new(Forward {
            recorder: recorder.clone(),
            out_codec: to,
            output: None,
        }))
    })
    .with_description("Test converter")
    .with_caps(
        CapBundle::new()
            .input(codes::STREAM_TYPE, stream_type::VISUAL)
            .input(codes::CODEC_ID, from)
            .output(codes::STREAM_TYPE, stream_type::VISUAL)
            .output(codes::CODEC_ID, to),
    )
}

/// Sessions used by most tests: single threaded, then with workers.
pub fn configs() -> Vec<SessionConfig> {
    vec![SessionConfig::new(), SessionConfig::new().with_threads(3)]
}
