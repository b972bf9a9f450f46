mod common;

use common::{mono_seconds, FakeCatalog};
use multitrack_recorder::audio::DeviceId;
use multitrack_recorder::engine::{ActivityKind, ActivityParams, CaptureEngine};
use multitrack_recorder::error::EngineError;

fn ids(ids: &[&str]) -> Vec<DeviceId> {
    ids.iter().map(|id| DeviceId::new(*id)).collect()
}

fn two_devices() -> std::sync::Arc<FakeCatalog> {
    FakeCatalog::with_devices(&[("a", "Line 1", 1), ("b", "Line 2", 2)])
}

#[test]
fn test_start_is_all_or_nothing() {
    let catalog = two_devices();
    let mut engine = CaptureEngine::new(catalog.clone());

    let err = engine
        .start_activity(
            ActivityKind::Recording,
            &ids(&["a", "missing", "b"]),
            ActivityParams::default(),
        )
        .unwrap_err();

    match err {
        EngineError::DeviceOpen { kind, device, .. } => {
            assert_eq!(kind, ActivityKind::Recording);
            assert_eq!(device, DeviceId::new("missing"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!engine.is_active(ActivityKind::Recording));
    assert_eq!(engine.stream_count(ActivityKind::Recording), 0);
    assert_eq!(catalog.open_streams(), 0);
}

#[test]
fn test_start_failure_after_open_closes_everything() {
    let catalog = two_devices();
    catalog.set_fail_start("b", true);
    let mut engine = CaptureEngine::new(catalog.clone());

    let result = engine.start_activity(
        ActivityKind::Buffering,
        &ids(&["a", "b"]),
        ActivityParams::default(),
    );

    assert!(matches!(result, Err(EngineError::DeviceOpen { .. })));
    assert!(!engine.is_active(ActivityKind::Buffering));
    assert_eq!(catalog.open_streams(), 0);

    // A later attempt with the device fixed succeeds
    catalog.set_fail_start("b", false);
    engine
        .start_activity(
            ActivityKind::Buffering,
            &ids(&["a", "b"]),
            ActivityParams::default(),
        )
        .unwrap();
    assert_eq!(engine.stream_count(ActivityKind::Buffering), 2);
}

#[test]
fn test_empty_device_list_rejected() {
    let mut engine = CaptureEngine::new(two_devices());
    let result = engine.start_activity(ActivityKind::Recording, &[], ActivityParams::default());
    assert_eq!(result, Err(EngineError::NoDevices(ActivityKind::Recording)));
}

#[test]
fn test_second_start_rejected_while_active() {
    let catalog = two_devices();
    let mut engine = CaptureEngine::new(catalog.clone());
    let devices = ids(&["a"]);

    engine
        .start_activity(ActivityKind::Recording, &devices, ActivityParams::default())
        .unwrap();
    let again = engine.start_activity(ActivityKind::Recording, &devices, ActivityParams::default());

    assert_eq!(again, Err(EngineError::AlreadyActive(ActivityKind::Recording)));
    assert_eq!(catalog.open_streams(), 1);
}

#[test]
fn test_duplicate_devices_open_once() {
    let catalog = two_devices();
    let mut engine = CaptureEngine::new(catalog.clone());

    engine
        .start_activity(
            ActivityKind::Recording,
            &ids(&["a", "a", "b"]),
            ActivityParams::default(),
        )
        .unwrap();

    assert_eq!(engine.stream_count(ActivityKind::Recording), 2);
    assert_eq!(catalog.open_streams(), 2);
}

#[test]
fn test_frames_land_in_their_own_device_buffer() {
    let catalog = two_devices();
    let mut engine = CaptureEngine::new(catalog.clone());
    engine
        .start_activity(
            ActivityKind::Recording,
            &ids(&["a", "b"]),
            ActivityParams::default(),
        )
        .unwrap();

    catalog.deliver("a", &[0.1; 100]);
    catalog.deliver("b", &[0.2; 200]);
    catalog.deliver("a", &[0.3; 50]);
    engine.stop_activity(ActivityKind::Recording);

    let sessions = engine.drain_sessions();
    assert_eq!(sessions.len(), 2);

    let a = &sessions[0];
    assert_eq!(a.device, DeviceId::new("a"));
    assert_eq!(a.name, "Line 1");
    assert_eq!(a.audio.channels(), 1);
    let samples: Vec<f32> = a.audio.samples().collect();
    assert_eq!(samples.len(), 150);
    assert!(samples[..100].iter().all(|&s| s == 0.1));
    assert!(samples[100..].iter().all(|&s| s == 0.3));

    let b = &sessions[1];
    assert_eq!(b.audio.channels(), 2);
    assert_eq!(b.audio.frame_count(), 100);
    assert!(b.audio.samples().all(|s| s == 0.2));

    // Drained buffers are gone
    assert!(engine.drain_sessions().is_empty());
}

#[test]
fn test_channels_capped_at_two() {
    let catalog = FakeCatalog::with_devices(&[("multi", "Interface", 8)]);
    let mut engine = CaptureEngine::new(catalog.clone());
    engine
        .start_activity(
            ActivityKind::Recording,
            &ids(&["multi"]),
            ActivityParams::default(),
        )
        .unwrap();
    assert_eq!(catalog.opened_channels("multi"), vec![2]);
}

#[test]
fn test_recording_and_buffering_share_a_device() {
    let catalog = two_devices();
    let mut engine = CaptureEngine::new(catalog.clone());
    let devices = ids(&["a"]);

    engine
        .start_activity(ActivityKind::Recording, &devices, ActivityParams::default())
        .unwrap();
    engine
        .start_activity(ActivityKind::Buffering, &devices, ActivityParams::default())
        .unwrap();
    assert_eq!(catalog.open_streams(), 2);

    assert_eq!(catalog.deliver("a", &[0.5; 441]), 2);

    let snapshots = engine.snapshot_buffers();
    assert_eq!(snapshots[0].audio.sample_count(), 441);

    engine.stop_activity(ActivityKind::Recording);
    assert!(engine.is_active(ActivityKind::Buffering));
    assert_eq!(engine.drain_sessions()[0].audio.sample_count(), 441);

    // Buffering keeps capturing after the recording stopped
    catalog.deliver("a", &[0.5; 441]);
    assert_eq!(engine.snapshot_buffers()[0].audio.sample_count(), 882);
}

#[test]
fn test_late_callback_after_stop_is_dropped() {
    let catalog = two_devices();
    let mut engine = CaptureEngine::new(catalog.clone());
    engine
        .start_activity(
            ActivityKind::Recording,
            &ids(&["a"]),
            ActivityParams::default(),
        )
        .unwrap();

    catalog.deliver("a", &[0.1; 100]);
    engine.stop_activity(ActivityKind::Recording);
    assert_eq!(catalog.deliver_late("a", &[0.9; 100]), 1);

    let sessions = engine.drain_sessions();
    assert_eq!(sessions[0].audio.sample_count(), 100);
}

#[test]
fn test_one_minute_ring_keeps_last_minute() {
    let catalog = FakeCatalog::with_devices(&[("a", "Line 1", 1)]);
    let mut engine = CaptureEngine::new(catalog.clone());
    let params = ActivityParams {
        sample_rate: 44_100,
        buffer_minutes: 1,
    };
    engine
        .start_activity(ActivityKind::Buffering, &ids(&["a"]), params)
        .unwrap();

    let status = engine.buffer_status(ActivityKind::Buffering);
    assert_eq!(status[0].capacity, Some(44_100 * 60));

    // Each second carries its own index so the retained window is visible
    for second in 0..61 {
        catalog.deliver("a", &mono_seconds(1, second as f32));
    }

    let snapshot = engine.snapshot_buffers().remove(0).audio;
    assert_eq!(snapshot.frame_count(), 44_100 * 60);
    let samples = snapshot.into_interleaved();
    assert_eq!(samples[0], 1.0);
    assert_eq!(samples[samples.len() - 1], 60.0);
    assert_eq!(engine.buffer_status(ActivityKind::Buffering)[0].frames, 44_100 * 60);
}

#[test]
fn test_snapshot_does_not_disturb_capture() {
    let catalog = two_devices();
    let mut engine = CaptureEngine::new(catalog.clone());
    engine
        .start_activity(
            ActivityKind::Buffering,
            &ids(&["a"]),
            ActivityParams::default(),
        )
        .unwrap();

    catalog.deliver("a", &[0.25; 1000]);
    let first = engine.snapshot_buffers();
    catalog.deliver("a", &[0.75; 1000]);
    let second = engine.snapshot_buffers();

    assert_eq!(first[0].audio.sample_count(), 1000);
    assert_eq!(second[0].audio.sample_count(), 2000);
    assert!(engine.is_active(ActivityKind::Buffering));
}

#[test]
fn test_restart_starts_with_empty_ring() {
    let catalog = two_devices();
    let mut engine = CaptureEngine::new(catalog.clone());
    let devices = ids(&["a"]);

    engine
        .start_activity(ActivityKind::Buffering, &devices, ActivityParams::default())
        .unwrap();
    catalog.deliver("a", &[0.5; 1000]);
    engine.stop_activity(ActivityKind::Buffering);
    assert!(engine.snapshot_buffers().is_empty());

    engine
        .start_activity(ActivityKind::Buffering, &devices, ActivityParams::default())
        .unwrap();
    assert_eq!(engine.snapshot_buffers()[0].audio.sample_count(), 0);
}

#[test]
fn test_failed_device_is_isolated() {
    let catalog = two_devices();
    let mut engine = CaptureEngine::new(catalog.clone());
    engine
        .start_activity(
            ActivityKind::Buffering,
            &ids(&["a", "b"]),
            ActivityParams::default(),
        )
        .unwrap();

    assert_eq!(catalog.fail("a", "device unplugged"), 1);
    let failures = engine.poll_stream_failures();

    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].device, DeviceId::new("a"));
    assert_eq!(failures[0].name, "Line 1");
    assert_eq!(failures[0].reason, "device unplugged");
    assert_eq!(failures[0].remaining, 1);

    assert!(engine.is_active(ActivityKind::Buffering));
    assert_eq!(engine.active_devices(ActivityKind::Buffering), ids(&["b"]));
    assert_eq!(catalog.deliver("b", &[0.5; 20]), 1);
    assert_eq!(catalog.deliver("a", &[0.5; 20]), 0);
}

#[test]
fn test_repeated_errors_do_not_hide_other_device_failure() {
    let catalog = two_devices();
    let mut engine = CaptureEngine::new(catalog.clone());
    engine
        .start_activity(
            ActivityKind::Buffering,
            &ids(&["a", "b"]),
            ActivityParams::default(),
        )
        .unwrap();

    // A dying driver keeps calling the error callback between polls
    for _ in 0..200 {
        catalog.fail("a", "xrun");
    }
    catalog.fail("b", "device unplugged");

    let failures = engine.poll_stream_failures();
    let failed: Vec<DeviceId> = failures.iter().map(|f| f.device.clone()).collect();
    assert_eq!(failed, ids(&["a", "b"]));
    assert_eq!(failures[1].remaining, 0);
    assert!(engine.active_devices(ActivityKind::Buffering).is_empty());
    assert!(engine.poll_stream_failures().is_empty());
}

#[test]
fn test_stale_generation_failure_ignored() {
    let catalog = two_devices();
    let mut engine = CaptureEngine::new(catalog.clone());
    let devices = ids(&["a", "b"]);

    engine
        .start_activity(ActivityKind::Buffering, &devices, ActivityParams::default())
        .unwrap();
    engine.stop_activity(ActivityKind::Buffering);
    engine
        .start_activity(ActivityKind::Buffering, &devices, ActivityParams::default())
        .unwrap();

    assert_eq!(catalog.fail_closed("a", "late error from old stream"), 1);
    assert!(engine.poll_stream_failures().is_empty());
    assert_eq!(engine.stream_count(ActivityKind::Buffering), 2);
}

#[test]
fn test_synchronous_failure_for_unknown_device() {
    let catalog = two_devices();
    let mut engine = CaptureEngine::new(catalog.clone());
    engine
        .start_activity(
            ActivityKind::Recording,
            &ids(&["a"]),
            ActivityParams::default(),
        )
        .unwrap();

    assert!(engine
        .handle_stream_failure(ActivityKind::Recording, &DeviceId::new("b"), "gone")
        .is_none());
    assert!(engine
        .handle_stream_failure(ActivityKind::Buffering, &DeviceId::new("a"), "gone")
        .is_none());

    let failure = engine
        .handle_stream_failure(ActivityKind::Recording, &DeviceId::new("a"), "gone")
        .unwrap();
    assert_eq!(failure.remaining, 0);
}

#[test]
fn test_failed_recording_device_keeps_captured_audio() {
    let catalog = two_devices();
    let mut engine = CaptureEngine::new(catalog.clone());
    engine
        .start_activity(
            ActivityKind::Recording,
            &ids(&["a", "b"]),
            ActivityParams::default(),
        )
        .unwrap();

    catalog.deliver("a", &[0.1; 300]);
    catalog.fail("a", "unplugged");
    engine.poll_stream_failures();
    catalog.deliver("b", &[0.2; 400]);
    engine.stop_activity(ActivityKind::Recording);

    let sessions = engine.drain_sessions();
    assert_eq!(sessions.len(), 2);
    assert_eq!(sessions[0].audio.sample_count(), 300);
    assert_eq!(sessions[1].audio.sample_count(), 400);
}
