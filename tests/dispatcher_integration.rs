// Integration tests for the telemetry refresh pipeline
//
// These drive a real scheduler thread, so timing assertions leave room for
// scheduler jitter.

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use avdash::{
    DashboardError, Dispatcher, DispatcherState, DisplayBoard, ElementId, ReplayTelemetrySource,
    SharedBoard, SimulatedTelemetrySource, TelemetrySnapshot, UnavailablePolicy,
    register_standard_bindings,
};

type Received = Arc<Mutex<Vec<TelemetrySnapshot>>>;

/// Register a binding that records every snapshot it receives
fn recording_binding(dispatcher: &Dispatcher, name: &str) -> Received {
    let received: Received = Arc::new(Mutex::new(Vec::new()));
    let sink = received.clone();
    dispatcher
        .register_binding(name, move |snapshot| {
            sink.lock().unwrap().push(snapshot.clone());
            Ok(())
        })
        .unwrap();
    received
}

/// Poll until the dispatcher has run at least `ticks` ticks, or give up after `timeout`
fn wait_for_ticks(dispatcher: &Dispatcher, ticks: u64, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    while dispatcher.ticks() < ticks && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn test_stop_is_idempotent() {
    let mut dispatcher = Dispatcher::new(SimulatedTelemetrySource::with_seed(1));
    dispatcher.stop();
    assert_eq!(dispatcher.state(), DispatcherState::Stopped);

    dispatcher.start(Duration::from_millis(20)).unwrap();
    dispatcher.stop();
    let ticks = dispatcher.ticks();
    dispatcher.stop();
    assert_eq!(dispatcher.state(), DispatcherState::Stopped);

    // no ticks after stop
    thread::sleep(Duration::from_millis(60));
    assert_eq!(dispatcher.ticks(), ticks);
}

#[test]
fn test_ticks_never_overlap() {
    let mut dispatcher = Dispatcher::new(SimulatedTelemetrySource::with_seed(2));
    let spans: Arc<Mutex<Vec<(Instant, Instant)>>> = Arc::new(Mutex::new(Vec::new()));

    // the first binding marks the start of the fan-out, the last one its end
    let starts = Arc::new(Mutex::new(Vec::new()));
    let start_sink = starts.clone();
    dispatcher
        .register_binding("fan-out-start", move |_| {
            start_sink.lock().unwrap().push(Instant::now());
            Ok(())
        })
        .unwrap();
    dispatcher
        .register_binding("slow", |_| {
            // slower than the tick interval on purpose
            thread::sleep(Duration::from_millis(15));
            Ok(())
        })
        .unwrap();
    let span_sink = spans.clone();
    let start_source = starts.clone();
    dispatcher
        .register_binding("fan-out-end", move |_| {
            let start = *start_source.lock().unwrap().last().unwrap();
            span_sink.lock().unwrap().push((start, Instant::now()));
            Ok(())
        })
        .unwrap();

    dispatcher.start(Duration::from_millis(5)).unwrap();
    wait_for_ticks(&dispatcher, 8, Duration::from_secs(5));
    dispatcher.stop();

    let spans = spans.lock().unwrap();
    assert!(spans.len() >= 8, "only {} ticks completed", spans.len());
    for pair in spans.windows(2) {
        let (_, previous_end) = pair[0];
        let (next_start, _) = pair[1];
        assert!(
            next_start >= previous_end,
            "tick started before the previous fan-out completed"
        );
    }
}

#[test]
fn test_fan_out_is_atomic_across_bindings() {
    let mut dispatcher = Dispatcher::new(SimulatedTelemetrySource::with_seed(3));
    let first = recording_binding(&dispatcher, "first");
    let second = recording_binding(&dispatcher, "second");

    dispatcher.start(Duration::from_millis(10)).unwrap();
    wait_for_ticks(&dispatcher, 5, Duration::from_secs(5));
    dispatcher.stop();

    let first = first.lock().unwrap();
    let second = second.lock().unwrap();
    assert!(first.len() >= 5);
    assert_eq!(first.len(), second.len());
    for (index, (a, b)) in first.iter().zip(second.iter()).enumerate() {
        assert_eq!(a, b, "bindings diverged at tick index {}", index);
        assert_eq!(a.tick, index as u64 + 1);
    }
}

#[test]
fn test_failing_binding_does_not_block_healthy_one() {
    let dispatcher = Dispatcher::new(SimulatedTelemetrySource::with_seed(4));
    dispatcher
        .register_binding("broken", |_| {
            Err(DashboardError::BindingRender {
                binding: "broken".to_string(),
                description: "display detached".to_string(),
            })
        })
        .unwrap();
    let healthy = recording_binding(&dispatcher, "healthy");

    for _ in 0..5 {
        dispatcher.tick_now();
    }

    let ticks: Vec<u64> = healthy.lock().unwrap().iter().map(|s| s.tick).collect();
    assert_eq!(ticks, vec![1, 2, 3, 4, 5]);
}

#[test]
fn test_failing_binding_does_not_halt_scheduler() {
    let mut dispatcher = Dispatcher::new(SimulatedTelemetrySource::with_seed(5));
    dispatcher
        .register_binding("panicky", |_| panic!("render blew up"))
        .unwrap();
    let healthy = recording_binding(&dispatcher, "healthy");

    dispatcher.start(Duration::from_millis(10)).unwrap();
    wait_for_ticks(&dispatcher, 5, Duration::from_secs(5));
    dispatcher.stop();

    assert!(dispatcher.ticks() >= 5);
    assert_eq!(healthy.lock().unwrap().len() as u64, dispatcher.ticks());
}

#[test]
fn test_velocity_log_at_100ms_cadence() {
    let mut dispatcher = Dispatcher::new(SimulatedTelemetrySource::default());
    let velocities = Arc::new(Mutex::new(Vec::new()));
    let sink = velocities.clone();
    dispatcher
        .register_binding("velocity-log", move |snapshot| {
            sink.lock().unwrap().push(snapshot.velocity_kmh);
            Ok(())
        })
        .unwrap();

    dispatcher.start(Duration::from_millis(100)).unwrap();
    thread::sleep(Duration::from_millis(550));
    dispatcher.stop();

    let velocities = velocities.lock().unwrap();
    assert!(
        (4..=6).contains(&velocities.len()),
        "expected 4 to 6 entries, got {}",
        velocities.len()
    );
    assert!(velocities.iter().all(|v| (0.0..60.0).contains(v)));
}

#[test]
fn test_second_start_fails_and_first_loop_keeps_ticking() {
    let mut dispatcher = Dispatcher::new(SimulatedTelemetrySource::with_seed(6));
    let received = recording_binding(&dispatcher, "recorder");

    dispatcher.start(Duration::from_millis(20)).unwrap();
    match dispatcher.start(Duration::from_millis(1)) {
        Err(DashboardError::AlreadyRunning) => {}
        other => panic!("Expected AlreadyRunning, got {:?}", other),
    }
    assert!(dispatcher.is_running());

    thread::sleep(Duration::from_millis(210));
    dispatcher.stop();

    // still on the original 20ms cadence, not the rejected 1ms one
    let count = received.lock().unwrap().len();
    assert!((5..=12).contains(&count), "unexpected tick count {}", count);
}

#[test]
fn test_source_outage_does_not_halt_scheduler() {
    let mut generator = SimulatedTelemetrySource::with_seed(7);
    let snapshots = vec![generator.generate(), generator.generate()];
    let mut dispatcher = Dispatcher::new(ReplayTelemetrySource::from_snapshots(snapshots));
    let received = recording_binding(&dispatcher, "recorder");

    dispatcher.start(Duration::from_millis(10)).unwrap();
    wait_for_ticks(&dispatcher, 6, Duration::from_secs(5));
    assert!(dispatcher.is_running());
    dispatcher.stop();

    // two good reads, every later tick skipped
    assert!(dispatcher.ticks() >= 6);
    assert_eq!(received.lock().unwrap().len(), 2);
}

#[test]
fn test_source_outage_replays_last_good() {
    let mut generator = SimulatedTelemetrySource::with_seed(8);
    let snapshot = generator.generate();
    let dispatcher = Dispatcher::with_policy(
        ReplayTelemetrySource::from_snapshots(vec![snapshot.clone()]),
        UnavailablePolicy::ReplayLastGood,
    );
    let received = recording_binding(&dispatcher, "recorder");

    for _ in 0..4 {
        dispatcher.tick_now();
    }

    let received = received.lock().unwrap();
    assert_eq!(received.len(), 4);
    for (index, replayed) in received.iter().enumerate() {
        assert_eq!(replayed.tick, index as u64 + 1);
        assert_eq!(replayed.velocity_kmh, snapshot.velocity_kmh);
        assert_eq!(replayed.waypoints, snapshot.waypoints);
    }
}

#[test]
fn test_board_stays_consistent_with_broken_element() {
    let mut dispatcher = Dispatcher::new(SimulatedTelemetrySource::with_seed(9));
    let board: SharedBoard = Arc::new(Mutex::new(DisplayBoard::default()));
    register_standard_bindings(&dispatcher, &board).unwrap();

    // a viewer reading after the element bindings sees the frame of the current tick
    let views = Arc::new(Mutex::new(Vec::new()));
    let view_sink = views.clone();
    let viewer_board = board.clone();
    dispatcher
        .register_binding("viewer", move |snapshot| {
            // failures inside a binding are contained, so record and assert later
            let view = viewer_board.lock().unwrap().view();
            view_sink.lock().unwrap().push((snapshot.tick, view));
            Ok(())
        })
        .unwrap();

    dispatcher.start(Duration::from_millis(10)).unwrap();
    wait_for_ticks(&dispatcher, 3, Duration::from_secs(5));
    dispatcher.stop();

    {
        let views = views.lock().unwrap();
        assert!(views.len() >= 3);
        for (tick, view) in views.iter() {
            assert_eq!(view.tick, *tick);
            assert!(view.is_consistent());
            assert!(view.text(ElementId::Velocity).unwrap().starts_with("Velocity: "));
        }
    }

    // now break one element: the board keeps publishing, flagging it stale
    dispatcher.unregister_binding("viewer").unwrap();
    dispatcher.unregister_binding("energy").unwrap();
    dispatcher.tick_now();
    let last = dispatcher.tick_now().tick();
    let view = board.lock().unwrap().view();
    assert_eq!(view.tick, last);
    assert_eq!(view.stale_elements(), vec![ElementId::Energy]);
    assert!(view.elements[&ElementId::Energy].tick < view.tick);
}

#[test]
fn test_broken_element_does_not_delay_healthy_ones() {
    let dispatcher = Dispatcher::new(SimulatedTelemetrySource::with_seed(10));
    let board: SharedBoard = Arc::new(Mutex::new(DisplayBoard::default()));
    register_standard_bindings(&dispatcher, &board).unwrap();
    dispatcher.unregister_binding("energy").unwrap();

    let views = Arc::new(Mutex::new(Vec::new()));
    let view_sink = views.clone();
    let viewer_board = board.clone();
    dispatcher
        .register_binding("viewer", move |snapshot| {
            let view = viewer_board.lock().unwrap().view();
            view_sink.lock().unwrap().push((snapshot.clone(), view));
            Ok(())
        })
        .unwrap();

    for _ in 0..3 {
        dispatcher.tick_now();
    }

    let views = views.lock().unwrap();
    assert_eq!(views.len(), 3);
    for (snapshot, view) in views.iter() {
        // healthy elements show this tick's values, not the previous tick's
        assert_eq!(view.tick, snapshot.tick);
        assert_eq!(
            view.elements[&ElementId::Velocity].value,
            ElementId::Velocity.render(snapshot)
        );
        assert_eq!(view.elements[&ElementId::Velocity].tick, snapshot.tick);
        assert_eq!(view.stale_elements(), vec![ElementId::Energy]);
    }
    assert_eq!(views[0].1.text(ElementId::Energy), Some("Current Output: 0 watts"));
}

#[test]
fn test_dropping_running_dispatcher_stops_it() {
    let counter = Arc::new(AtomicU64::new(0));
    {
        let mut dispatcher = Dispatcher::new(SimulatedTelemetrySource::with_seed(11));
        let sink = counter.clone();
        dispatcher
            .register_binding("counter", move |_| {
                sink.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();
        dispatcher.start(Duration::from_millis(10)).unwrap();
        wait_for_ticks(&dispatcher, 3, Duration::from_secs(5));
    }

    // drop joined the scheduler thread, so nothing is delivered afterwards
    let after_drop = counter.load(Ordering::SeqCst);
    assert!(after_drop >= 3);
    thread::sleep(Duration::from_millis(60));
    assert_eq!(counter.load(Ordering::SeqCst), after_drop);
}

#[test]
fn test_registration_while_running_joins_next_fan_out() {
    let mut dispatcher = Dispatcher::new(SimulatedTelemetrySource::with_seed(12));
    let early = recording_binding(&dispatcher, "early");

    dispatcher.start(Duration::from_millis(10)).unwrap();
    wait_for_ticks(&dispatcher, 2, Duration::from_secs(5));
    let late = recording_binding(&dispatcher, "late");
    let registered_after = dispatcher.ticks();
    wait_for_ticks(&dispatcher, registered_after + 3, Duration::from_secs(5));
    dispatcher.stop();

    let early = early.lock().unwrap();
    let late = late.lock().unwrap();
    assert!(late.len() >= 3);
    // the late binding gets whole ticks only, matching what the early one saw
    let first_late = late[0].tick;
    assert!(first_late > 2);
    assert!(first_late <= registered_after + 1);
    let early_tail: Vec<&TelemetrySnapshot> =
        early.iter().filter(|s| s.tick >= first_late).collect();
    assert_eq!(early_tail.len(), late.len());
    for (a, b) in early_tail.iter().zip(late.iter()) {
        assert_eq!(*a, b);
    }
}
