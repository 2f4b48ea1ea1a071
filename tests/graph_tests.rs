//! Integration tests for graph management.
//!
//! These tests verify that:
//! - Filters are cloned when their input slots are taken
//! - Source ids restrict which pids a filter accepts
//! - Removing a filter removes the filters that depend on it
//! - Setup failures are reported and notify the upstream filter
//! - Process requests are coalesced and reschedules are honored
//! - The first fatal status ends the run and abort is final
//! - A fatal status stops every filter so the run drains
//! - Updatable arguments and events reach the filters

mod common;

use common::{Recorder, RAW, sink_register, sink_register_with, source_register};
use filtergraph::prelude::*;
use filtergraph::props::codes::stream_type;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

fn two_sources(session: &Session, recorder: &Recorder) {
    session.register(source_register("src", RAW, recorder));
    session.register(source_register("alt", RAW, recorder));
}

fn visual_raw_input() -> CapBundle {
    CapBundle::new()
        .input(codes::STREAM_TYPE, stream_type::VISUAL)
        .input(codes::CODEC_ID, RAW)
}

/// Consumer accepting several inputs but only one per instance.
struct OnePerInstance {
    seen: Arc<Mutex<Vec<FilterId>>>,
}

impl Filter for OnePerInstance {
    fn configure_pid(&mut self, ctx: &mut FilterContext<'_>, _pid: &PidInstance, is_remove: bool) -> Result<()> {
        if !is_remove && ctx.num_inputs() > 1 {
            return Err(Error::RequiresNewInstance);
        }
        Ok(())
    }

    fn process(&mut self, ctx: &mut FilterContext<'_>) -> Result<ProcessStatus> {
        let Some(input) = ctx.input(0) else {
            return Ok(ProcessStatus::Ok);
        };
        while input.get_packet().is_some() {
            self.seen.lock().unwrap_or_else(PoisonError::into_inner).push(ctx.id());
            input.drop_packet();
        }
        Ok(if input.is_eos() { ProcessStatus::Eos } else { ProcessStatus::Ok })
    }
}

// ============================================================================
// Cloning and source ids
// ============================================================================

#[test]
fn test_full_clonable_filter_is_cloned() {
    let recorder = Recorder::new();
    let session = Session::default();
    two_sources(&session, &recorder);
    session.register(sink_register("sink", RAW, &recorder).clonable());
    session.load_filter("src:count=3").unwrap();
    session.load_filter("alt:count=5").unwrap();
    session.load_filter("sink:greedy").unwrap();
    session.run().unwrap();

    let sinks: Vec<FilterId> = session
        .filters()
        .into_iter()
        .filter(|f| f.name == "sink")
        .map(|f| f.id)
        .collect();
    assert_eq!(sinks.len(), 2);

    let state = recorder.state();
    assert_eq!(state.received.len(), 8);
    assert_eq!(state.eos, 2);
    for id in &sinks {
        assert!(state.received.iter().any(|(sink, _)| sink == id));
    }
}

#[test]
fn test_full_filter_not_cloned_without_flag() {
    let recorder = Recorder::new();
    let session = Session::default();
    two_sources(&session, &recorder);
    session.register(sink_register("sink", RAW, &recorder));
    session.load_filter("src:count=3").unwrap();
    session.load_filter("alt:count=5").unwrap();
    session.load_filter("sink:greedy").unwrap();
    session.run().unwrap();

    assert_eq!(session.filter_count(), 3);
    let received = recorder.state().received.len();
    assert!(received == 3 || received == 5, "got {received} packets");
}

#[test]
fn test_new_instance_requested_by_filter() {
    let recorder = Recorder::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let session = Session::default();
    two_sources(&session, &recorder);
    let shared = Arc::clone(&seen);
    session.register(
        FilterRegister::new("per", move |_| {
            Ok(Box::new(OnePerInstance {
                seen: Arc::clone(&shared),
            }))
        })
        .with_max_extra_pids(3)
        .with_caps(visual_raw_input()),
    );
    session.load_filter("src:count=3").unwrap();
    session.load_filter("alt:count=5").unwrap();
    session.load_filter("per").unwrap();
    session.run().unwrap();

    let instances: Vec<FilterId> = session
        .filters()
        .into_iter()
        .filter(|f| f.name == "per")
        .map(|f| f.id)
        .collect();
    assert_eq!(instances.len(), 2);

    let seen = seen.lock().unwrap_or_else(PoisonError::into_inner);
    assert_eq!(seen.len(), 8);
    let mut counts: Vec<usize> = instances
        .iter()
        .map(|id| seen.iter().filter(|s| *s == id).count())
        .collect();
    counts.sort();
    assert_eq!(counts, vec![3, 5]);
}

#[test]
fn test_source_id_selects_producer() {
    for sid in ["b", "b#video"] {
        let recorder = Recorder::new();
        let session = Session::default();
        two_sources(&session, &recorder);
        session.register(sink_register("sink", RAW, &recorder));
        session.load_filter("src:count=3:FID=a").unwrap();
        session.load_filter("alt:count=5:FID=b").unwrap();
        session.load_filter(&format!("sink:greedy:SID={sid}")).unwrap();
        session.run().unwrap();

        assert_eq!(recorder.sequences(), vec![0, 1, 2, 3, 4], "SID={sid}");
        let connections = session.connections();
        assert_eq!(connections.len(), 1);
        assert_eq!(connections[0].source_name, "alt");
    }
}

#[test]
fn test_source_id_with_other_pid_name_rejects() {
    let recorder = Recorder::new();
    let session = Session::default();
    session.register(source_register("src", RAW, &recorder));
    session.register(sink_register("sink", RAW, &recorder));
    session.load_filter("src:count=3:FID=a").unwrap();
    session.load_filter("sink:SID=a#audio").unwrap();
    session.run().unwrap();

    assert!(recorder.sequences().is_empty());
}

// ============================================================================
// Removal
// ============================================================================

#[test]
fn test_removing_sink_removes_its_source() {
    let recorder = Recorder::new();
    let session = Session::default();
    let mut rx = session.events();
    session.register(source_register("src", RAW, &recorder));
    session.register(sink_register("sink", RAW, &recorder));
    session.load_filter("src:count=2").unwrap();
    let sink = session.load_filter("sink:greedy").unwrap();
    session.run().unwrap();

    session.remove_filter(sink).unwrap();
    session.run().unwrap();

    assert_eq!(session.filter_count(), 0);
    let mut finalized = recorder.state().finalized.clone();
    finalized.sort();
    assert_eq!(finalized, vec!["sink".to_string(), "src".to_string()]);
    let removed = rx
        .drain()
        .into_iter()
        .filter(|e| matches!(e, SessionEvent::FilterRemoved { .. }))
        .count();
    assert_eq!(removed, 2);
}

#[test]
fn test_removing_source_disconnects_consumers() {
    let recorder = Recorder::new();
    let session = Session::default();
    session.register(source_register("src", RAW, &recorder));
    session.register(sink_register("sink", RAW, &recorder));
    let src = session.load_filter("src:count=2").unwrap();
    session.load_filter("sink:greedy").unwrap();
    session.run().unwrap();

    session.remove_filter(src).unwrap();
    session.run().unwrap();

    assert_eq!(session.filter_count(), 0);
    assert!(recorder.state().configured.contains(&("sink".to_string(), true)));
    assert!(session.remove_filter(src).is_err());
}

// ============================================================================
// Setup failures
// ============================================================================

struct Broken;

impl Filter for Broken {
    fn initialize(&mut self, _ctx: &mut FilterContext<'_>) -> Result<()> {
        Err(Error::NotSupported("no hardware".into()))
    }

    fn process(&mut self, _ctx: &mut FilterContext<'_>) -> Result<ProcessStatus> {
        Ok(ProcessStatus::Eos)
    }
}

/// Gives up as soon as it sees a packet.
struct Quitter;

impl Filter for Quitter {
    fn process(&mut self, ctx: &mut FilterContext<'_>) -> Result<ProcessStatus> {
        if ctx.inputs().iter().any(PidInstance::has_pending) {
            ctx.setup_failure(Error::NotSupported("cannot decode".into()));
        }
        Ok(ProcessStatus::Ok)
    }
}

#[test]
fn test_initialize_failure() {
    let session = Session::default();
    let mut rx = session.events();
    session.register(FilterRegister::new("broken", |_| Ok(Box::new(Broken))));

    let result = session.load_filter("broken");
    assert!(matches!(result, Err(Error::SetupFailed { ref filter, .. }) if filter == "broken"));
    assert_eq!(session.filter_count(), 0);
    assert!(
        rx.drain()
            .iter()
            .any(|e| matches!(e, SessionEvent::SetupFailed { filter, .. } if filter == "broken"))
    );
}

#[test]
fn test_configure_failure_blacklists_consumer() {
    let recorder = Recorder::new();
    let session = Session::default();
    let mut rx = session.events();
    session.register(source_register("src", RAW, &recorder));
    session.register(sink_register_with("bad", RAW, &recorder, Some(Error::ServiceError("no device".into()))));
    session.register(sink_register("sink", RAW, &recorder));
    session.load_filter("src:count=4").unwrap();
    session.load_filter("bad").unwrap();
    session.load_filter("sink:greedy").unwrap();
    session.run().unwrap();

    assert_eq!(recorder.sequences(), vec![0, 1, 2, 3]);
    assert!(session.filters().iter().all(|f| f.name != "bad"));
    assert!(
        rx.drain()
            .iter()
            .any(|e| matches!(e, SessionEvent::SetupFailed { filter, .. } if filter == "bad"))
    );
}

#[test]
fn test_setup_failure_notifies_upstream() {
    let recorder = Recorder::new();
    let session = Session::default();
    session.register(source_register("src", RAW, &recorder));
    session.register(FilterRegister::new("quitter", |_| Ok(Box::new(Quitter))).with_caps(visual_raw_input()));
    session.load_filter("src:count=50").unwrap();
    session.load_filter("quitter").unwrap();
    session.run().unwrap();

    let state = recorder.state();
    assert_eq!(state.setup_errors, vec![("src".to_string(), "quitter".to_string())]);
    assert_eq!(state.finalized, vec!["src".to_string()]);
    drop(state);
    assert_eq!(session.filter_count(), 0);
}

// ============================================================================
// Scheduling
// ============================================================================

/// Source without pid recording its process calls.
struct Poster {
    calls: Arc<Mutex<Vec<Instant>>>,
    delay: Option<Duration>,
    requests: usize,
}

impl Filter for Poster {
    fn process(&mut self, ctx: &mut FilterContext<'_>) -> Result<ProcessStatus> {
        let mut calls = self.calls.lock().unwrap_or_else(PoisonError::into_inner);
        calls.push(Instant::now());
        if calls.len() == 1 {
            for _ in 0..self.requests {
                ctx.post_process();
            }
            if let Some(delay) = self.delay {
                ctx.ask_rt_reschedule(delay);
            }
        }
        Ok(ProcessStatus::Ok)
    }
}

fn poster_session(requests: usize, delay: Option<Duration>) -> (Session, Arc<Mutex<Vec<Instant>>>) {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let shared = Arc::clone(&calls);
    let session = Session::default();
    session.register(FilterRegister::new("poster", move |_| {
        Ok(Box::new(Poster {
            calls: Arc::clone(&shared),
            delay,
            requests,
        }))
    }));
    session.load_filter("poster").unwrap();
    (session, calls)
}

#[test]
fn test_process_requests_coalesce() {
    let (session, calls) = poster_session(5, None);
    session.run().unwrap();
    assert_eq!(calls.lock().unwrap().len(), 2);
}

#[test]
fn test_reschedule_delay_honored() {
    let (session, calls) = poster_session(0, Some(Duration::from_millis(20)));
    session.run().unwrap();

    let calls = calls.lock().unwrap();
    assert_eq!(calls.len(), 2);
    assert!(calls[1].duration_since(calls[0]) >= Duration::from_millis(20));
}

#[test]
fn test_custom_task_requeued_while_true() {
    let runs = Arc::new(AtomicUsize::new(0));
    let shared = Arc::clone(&runs);
    let session = Session::default();
    session.register(FilterRegister::new("tasks", move |_| {
        Ok(Box::new(TaskPoster {
            runs: Arc::clone(&shared),
        }))
    }));
    session.load_filter("tasks").unwrap();
    session.run().unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 3);
}

struct TaskPoster {
    runs: Arc<AtomicUsize>,
}

impl Filter for TaskPoster {
    fn process(&mut self, ctx: &mut FilterContext<'_>) -> Result<ProcessStatus> {
        let runs = Arc::clone(&self.runs);
        ctx.post_task("count", move |_| runs.fetch_add(1, Ordering::SeqCst) + 1 < 3);
        Ok(ProcessStatus::Eos)
    }
}

// ============================================================================
// Run status
// ============================================================================

/// A source failing on its first call.
struct Failing;

impl Filter for Failing {
    fn process(&mut self, ctx: &mut FilterContext<'_>) -> Result<ProcessStatus> {
        ctx.set_run_status(Error::Io("disk gone".into()));
        Err(Error::ServiceError("second failure".into()))
    }
}

/// A source running forever.
struct Endless;

impl Filter for Endless {
    fn process(&mut self, ctx: &mut FilterContext<'_>) -> Result<ProcessStatus> {
        ctx.ask_rt_reschedule(Duration::from_millis(1));
        Ok(ProcessStatus::Ok)
    }
}

#[test]
fn test_first_status_wins() {
    let session = Session::default();
    let mut rx = session.events();
    session.register(FilterRegister::new("failing", |_| Ok(Box::new(Failing))));
    session.load_filter("failing").unwrap();

    assert_eq!(session.run(), Err(Error::Io("disk gone".into())));
    assert_eq!(session.run_status(), Some(Error::Io("disk gone".into())));
    let errors: Vec<SessionEvent> = rx
        .drain()
        .into_iter()
        .filter(|e| matches!(e, SessionEvent::Error { .. }))
        .collect();
    assert_eq!(errors.len(), 1);
}

/// A source sending until blocked, forever.
struct Flood {
    pid: Option<Pid>,
    sent: Arc<AtomicUsize>,
}

impl Filter for Flood {
    fn process(&mut self, ctx: &mut FilterContext<'_>) -> Result<ProcessStatus> {
        let (pid, created) = match &self.pid {
            Some(pid) => (pid.clone(), false),
            None => {
                let pid = ctx.new_pid("video")?;
                pid.set_property(codes::STREAM_TYPE, stream_type::VISUAL)?;
                pid.set_property(codes::CODEC_ID, RAW)?;
                (self.pid.insert(pid).clone(), true)
            }
        };
        loop {
            match pid.new_alloc(4) {
                Ok(pck) => pck.send()?,
                Err(Error::WouldBlock) => return Ok(ProcessStatus::Ok),
                Err(e) => return Err(e),
            }
            self.sent.fetch_add(1, Ordering::SeqCst);
            if created {
                return Ok(ProcessStatus::Ok);
            }
        }
    }
}

/// A sink setting a fatal status on its first call, then draining.
struct FailingSink {
    sent: Arc<AtomicUsize>,
    sent_at_status: Arc<Mutex<Option<usize>>>,
}

impl Filter for FailingSink {
    fn process(&mut self, ctx: &mut FilterContext<'_>) -> Result<ProcessStatus> {
        let mut at_status = self.sent_at_status.lock().unwrap_or_else(PoisonError::into_inner);
        if at_status.is_none() {
            *at_status = Some(self.sent.load(Ordering::SeqCst));
            ctx.set_run_status(Error::Io("disk full".into()));
        }
        for input in ctx.inputs() {
            for _ in 0..input.queued() {
                if input.get_packet().is_none() {
                    break;
                }
                input.drop_packet();
            }
        }
        Ok(ProcessStatus::Ok)
    }
}

#[test]
fn test_fatal_status_drains_endless_producer() {
    for threads in [0, 2] {
        let sent = Arc::new(AtomicUsize::new(0));
        let sent_at_status = Arc::new(Mutex::new(None));
        let session = Session::new(SessionConfig::new().with_threads(threads));
        let flood_sent = Arc::clone(&sent);
        session.register(
            FilterRegister::new("flood", move |_| {
                Ok(Box::new(Flood {
                    pid: None,
                    sent: Arc::clone(&flood_sent),
                }))
            })
            .with_caps(
                CapBundle::new()
                    .output(codes::STREAM_TYPE, stream_type::VISUAL)
                    .output(codes::CODEC_ID, RAW),
            ),
        );
        let (sink_sent, sink_status) = (Arc::clone(&sent), Arc::clone(&sent_at_status));
        session.register(
            FilterRegister::new("failsink", move |_| {
                Ok(Box::new(FailingSink {
                    sent: Arc::clone(&sink_sent),
                    sent_at_status: Arc::clone(&sink_status),
                }))
            })
            .with_caps(visual_raw_input()),
        );
        session.load_filter("flood").unwrap();
        session.load_filter("failsink").unwrap();

        let done = AtomicUsize::new(0);
        let aborted = AtomicUsize::new(0);
        let result = std::thread::scope(|scope| {
            scope.spawn(|| {
                let deadline = Instant::now() + Duration::from_secs(3);
                while done.load(Ordering::SeqCst) == 0 {
                    if Instant::now() > deadline {
                        aborted.store(1, Ordering::SeqCst);
                        session.abort();
                        return;
                    }
                    std::thread::sleep(Duration::from_millis(5));
                }
            });
            let result = session.run();
            done.store(1, Ordering::SeqCst);
            result
        });

        assert_eq!(aborted.load(Ordering::SeqCst), 0, "run did not drain with {threads} threads");
        assert_eq!(result, Err(Error::Io("disk full".into())));
        let at_status = sent_at_status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .unwrap();
        // the calls in flight when the status was set, then nothing
        assert!(sent.load(Ordering::SeqCst) - at_status <= 32);
    }
}

#[test]
fn test_abort_stops_run() {
    let session = Session::new(SessionConfig::new().with_threads(2));
    session.register(FilterRegister::new("endless", |_| Ok(Box::new(Endless))));
    session.load_filter("endless").unwrap();

    let result = std::thread::scope(|scope| {
        scope.spawn(|| {
            std::thread::sleep(Duration::from_millis(30));
            session.abort();
        });
        session.run()
    });
    assert_eq!(result, Err(Error::Aborted));
    assert_eq!(session.run(), Err(Error::Aborted));
}

// ============================================================================
// Arguments and events
// ============================================================================

#[test]
fn test_update_filter_arg() {
    let recorder = Recorder::new();
    let session = Session::default();
    session.register(sink_register("sink", RAW, &recorder));
    let sink = session.load_filter("sink").unwrap();

    session.update_filter_arg(sink, "volume", "7").unwrap();
    session.run().unwrap();
    assert_eq!(
        recorder.state().updates,
        vec![("sink.volume".to_string(), PropertyValue::Uint(7))]
    );

    assert!(matches!(
        session.update_filter_arg(sink, "greedy", "true"),
        Err(Error::InvalidArgument { .. })
    ));
    assert!(matches!(
        session.update_filter_arg(sink, "volume", "11"),
        Err(Error::InvalidArgument { .. })
    ));
    assert!(matches!(
        session.update_filter_arg(sink, "nothing", "1"),
        Err(Error::InvalidArgument { .. })
    ));
}

#[test]
fn test_play_and_stop_travel_upstream_once() {
    let recorder = Recorder::new();
    let session = Session::default();
    session.register(source_register("src", RAW, &recorder));
    session.register(sink_register("sink", RAW, &recorder));
    session.load_filter("src:count=2").unwrap();
    let sink = session.load_filter("sink:greedy").unwrap();
    session.run().unwrap();

    let play = FilterEvent::Play { start: 0.0, speed: 1.0 };
    session.send_event(sink, play.clone()).unwrap();
    session.send_event(sink, play).unwrap();
    session.send_event(sink, FilterEvent::Stop).unwrap();
    session.run().unwrap();

    let events = recorder.state().events.clone();
    let at = |filter: &str| -> Vec<String> {
        events
            .iter()
            .filter(|(f, _)| f == filter)
            .map(|(_, e)| e.clone())
            .collect()
    };
    assert_eq!(at("sink"), vec!["play", "play", "stop"]);
    assert_eq!(at("src"), vec!["play", "stop"]);
}

/// Consumer pulling its own source at initialization.
struct Reader {
    received: Arc<AtomicUsize>,
}

impl Filter for Reader {
    fn initialize(&mut self, ctx: &mut FilterContext<'_>) -> Result<()> {
        ctx.connect_source("src:count=4")?;
        Ok(())
    }

    fn process(&mut self, ctx: &mut FilterContext<'_>) -> Result<ProcessStatus> {
        let Some(input) = ctx.input(0) else {
            return Ok(ProcessStatus::Ok);
        };
        while input.get_packet().is_some() {
            self.received.fetch_add(1, Ordering::SeqCst);
            input.drop_packet();
        }
        Ok(if input.is_eos() { ProcessStatus::Eos } else { ProcessStatus::Ok })
    }
}

#[test]
fn test_connected_source_feeds_only_its_consumer() {
    let recorder = Recorder::new();
    let received = Arc::new(AtomicUsize::new(0));
    let shared = Arc::clone(&received);
    let session = Session::default();
    session.register(source_register("src", RAW, &recorder));
    session.register(sink_register("sink", RAW, &recorder));
    session.register(
        FilterRegister::new("reader", move |_| {
            Ok(Box::new(Reader {
                received: Arc::clone(&shared),
            }))
        })
        .with_caps(visual_raw_input()),
    );
    session.load_filter("sink").unwrap();
    session.load_filter("reader").unwrap();
    session.run().unwrap();

    assert_eq!(received.load(Ordering::SeqCst), 4);
    assert!(recorder.sequences().is_empty());
    assert_eq!(session.filter_count(), 3);
}
