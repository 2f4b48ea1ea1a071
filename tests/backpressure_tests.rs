//! Integration tests for back-pressure and flow control.
//!
//! These tests verify that:
//! - A pid blocks once a destination holds `max_buffer_units` packets
//! - Allocation is refused while blocked and resumes after a drop
//! - Queues never grow past the threshold, with unit or duration limits
//! - A producer never stays blocked on an emptied queue
//! - Buffer requirement events change the thresholds

mod common;

use common::{Recorder, RAW, sink_register, source_register};
use filtergraph::filter::FilterEvent;
use filtergraph::session::{Session, SessionConfig};
use std::time::Duration;

fn burst_session(config: SessionConfig, recorder: &Recorder, count: u32) -> Session {
    let session = Session::new(config);
    session.register(source_register("src", RAW, recorder));
    session.register(sink_register("sink", RAW, recorder));
    session.load_filter(&format!("src:count={count}:burst")).unwrap();
    session.load_filter("sink").unwrap();
    session
}

#[test]
fn test_fifth_alloc_blocks_until_drop() {
    let recorder = Recorder::new();
    let config = SessionConfig::new().with_max_buffer_units(4);
    let session = burst_session(config, &recorder, 40);
    session.run().unwrap();

    let state = recorder.state();
    assert!(state.would_block > 0, "source never blocked");
    assert_eq!(state.max_queued, 4);
    assert_eq!(state.received.len(), 40);
    drop(state);

    let stats = session.statistics();
    let src = stats.iter().find(|s| s.name == "src").unwrap();
    assert!(src.outputs[0].nb_blocked > 0);
    assert!(!src.outputs[0].would_block);
    assert_eq!(src.would_block, 0);
}

#[test]
fn test_queue_never_exceeds_threshold() {
    for threads in [0, 2] {
        let recorder = Recorder::new();
        let config = SessionConfig::new().with_threads(threads).with_max_buffer_units(3);
        let session = burst_session(config, &recorder, 60);
        session.run().unwrap();

        assert!(recorder.state().max_queued <= 3);
        assert_eq!(recorder.sequences(), (0..60).collect::<Vec<_>>());
    }
}

#[test]
fn test_single_unit_buffer_completes_under_contention() {
    for threads in [2, 4, 8] {
        for _ in 0..5 {
            let recorder = Recorder::new();
            let config = SessionConfig::new().with_threads(threads).with_max_buffer_units(1);
            let session = burst_session(config, &recorder, 1000);
            session.run().unwrap();

            assert_eq!(recorder.sequences(), (0..1000).collect::<Vec<_>>());
            let stats = session.statistics();
            let src = stats.iter().find(|s| s.name == "src").unwrap();
            assert!(!src.outputs[0].would_block);
            assert_eq!(src.outputs[0].nb_buffer_units, 0);
        }
    }
}

#[test]
fn test_duration_threshold() {
    let recorder = Recorder::new();
    // packets last 40ms: the third one reaches 100ms
    let config = SessionConfig::new()
        .with_max_buffer_units(0)
        .with_max_buffer_time(Duration::from_millis(100));
    let session = burst_session(config, &recorder, 20);
    session.run().unwrap();

    let state = recorder.state();
    assert!(state.would_block > 0);
    assert!(state.max_queued <= 3);
    assert_eq!(state.received.len(), 20);
}

#[test]
fn test_unlimited_buffering() {
    let recorder = Recorder::new();
    let config = SessionConfig::new()
        .with_max_buffer_units(0)
        .with_max_buffer_time(Duration::ZERO);
    let session = burst_session(config, &recorder, 25);
    session.run().unwrap();

    let state = recorder.state();
    assert_eq!(state.would_block, 0);
    assert_eq!(state.received.len(), 25);
}

#[test]
fn test_buffer_requirement_event() {
    let recorder = Recorder::new();
    let session = burst_session(SessionConfig::new().with_max_buffer_units(2), &recorder, 1);
    // link the pid, nothing left to send after the first packet
    session.run().unwrap();

    let sink = session.filters().into_iter().find(|f| f.name == "sink").unwrap();
    session
        .send_event(
            sink.id,
            FilterEvent::BufferRequirement {
                max_units: 16,
                max_duration_us: 0,
                pid_only: true,
            },
        )
        .unwrap();
    session.run().unwrap();

    let stats = session.statistics();
    let src = stats.iter().find(|s| s.name == "src").unwrap();
    assert_eq!(src.outputs[0].max_buffer_units, 16);
    assert_eq!(src.outputs[0].max_buffer_time_us, 0);
}
