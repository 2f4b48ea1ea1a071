//! Integration tests for session runs over simple graphs.
//!
//! These tests verify that:
//! - Pids link to matching loaded filters and packets arrive in order
//! - End of stream reaches the consumers and the run completes
//! - Packet references are all released once a run is over
//! - Single threaded, multi threaded and lock free runs behave the same

mod common;

use common::{Recorder, RAW, configs, sink_register, source_register};
use filtergraph::error::Error;
use filtergraph::session::{Session, SessionConfig};

fn direct_session(config: SessionConfig, recorder: &Recorder, count: u32) -> Session {
    let session = Session::new(config);
    session.register(source_register("src", RAW, recorder));
    session.register(sink_register("sink", RAW, recorder));
    session.load_filter(&format!("src:count={count}")).unwrap();
    session.load_filter("sink:greedy").unwrap();
    session
}

// ============================================================================
// Linking and delivery
// ============================================================================

#[test]
fn test_direct_link_delivers_in_order() {
    for config in configs() {
        let recorder = Recorder::new();
        let session = direct_session(config, &recorder, 20);
        session.run().unwrap();

        assert_eq!(recorder.sequences(), (0..20).collect::<Vec<_>>());
        assert_eq!(recorder.state().eos, 1);
        assert_eq!(session.filter_count(), 2);
    }
}

#[test]
fn test_connections_listed() {
    let recorder = Recorder::new();
    let session = direct_session(SessionConfig::new(), &recorder, 1);
    session.run().unwrap();

    let connections = session.connections();
    assert_eq!(connections.len(), 1);
    assert_eq!(connections[0].source_name, "src");
    assert_eq!(connections[0].destination_name, "sink");
    assert_eq!(connections[0].pid, "video");
}

#[test]
fn test_no_locks_runs_on_caller() {
    let recorder = Recorder::new();
    let config = SessionConfig::new().with_threads(4).with_use_locks(false);
    let session = direct_session(config, &recorder, 5);
    session.run().unwrap();
    assert_eq!(recorder.sequences(), vec![0, 1, 2, 3, 4]);
}

#[test]
fn test_unmatched_pid_is_discarded() {
    let recorder = Recorder::new();
    let session = Session::new(SessionConfig::new());
    session.register(source_register("src", RAW, &recorder));
    session.load_filter("src:count=5").unwrap();
    session.run().unwrap();

    assert!(recorder.sequences().is_empty());
    assert!(session.connections().is_empty());
    // the source still ran to its end
    let stats = session.statistics();
    assert!(stats[0].outputs[0].eos);
    assert_eq!(stats[0].pool.live_packets, 0);
}

#[test]
fn test_unknown_filter() {
    let session = Session::default();
    assert_eq!(
        session.load_filter("nothing:x=1"),
        Err(Error::FilterNotFound("nothing".into()))
    );
    assert_eq!(session.filter_count(), 0);
}

#[test]
fn test_empty_session_run() {
    let session = Session::default();
    session.run().unwrap();
}

// ============================================================================
// Packet accounting
// ============================================================================

#[test]
fn test_packets_released_after_run() {
    for config in configs() {
        let recorder = Recorder::new();
        let session = direct_session(config, &recorder, 12);
        session.run().unwrap();

        let stats = session.statistics();
        let src = stats.iter().find(|s| s.name == "src").unwrap();
        assert_eq!(src.pool.live_packets, 0);
        assert_eq!(src.pool.live_instances, 0);
        assert_eq!(src.pool.fresh_allocs + src.pool.reused_allocs, 12);
        assert_eq!(src.outputs[0].nb_packets, 12);

        let sink = stats.iter().find(|s| s.name == "sink").unwrap();
        assert_eq!(sink.pending_packets, 0);
        assert_eq!(sink.inputs[0].nb_packets, 12);
        assert_eq!(sink.inputs[0].nb_bytes, 12 * 8);
    }
}

#[test]
fn test_reservoir_reuses_buffers() {
    let recorder = Recorder::new();
    let session = direct_session(SessionConfig::new(), &recorder, 30);
    session.run().unwrap();

    let stats = session.statistics();
    let src = stats.iter().find(|s| s.name == "src").unwrap();
    assert!(src.pool.reused_allocs > 0);
    assert!(src.pool.fresh_allocs < 30);
}

#[test]
fn test_statistics_count_tasks() {
    let recorder = Recorder::new();
    let session = direct_session(SessionConfig::new(), &recorder, 3);
    session.run().unwrap();

    for stats in session.statistics() {
        assert!(stats.nb_tasks_done > 0, "{} ran no task", stats.name);
        assert!(stats.nb_process_calls > 0);
        assert!(!stats.removed);
    }
}

#[test]
fn test_filters_info() {
    let recorder = Recorder::new();
    let session = Session::default();
    session.register(source_register("src", RAW, &recorder));
    let id = session.load_filter("src:FID=main").unwrap();

    let filters = session.filters();
    assert_eq!(filters.len(), 1);
    assert_eq!(filters[0].id, id);
    assert_eq!(filters[0].fid.as_deref(), Some("main"));
    assert!(!filters[0].dynamic);
    assert_eq!(session.registers(), vec!["src".to_string()]);
}
