/// Tests for the async command loop
///
/// Run with: cargo test --test runtime_tests -- --nocapture

use futures_util::{stream, StreamExt};
use gate_timer::calibration::{CalibrationStage, CalibrationUpdate};
use gate_timer::runtime;
use gate_timer::{CalibrationPhase, Command, GateTimer, Sample, TimerConfig, TimerEvent};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

fn shared_timer() -> Arc<Mutex<GateTimer>> {
    shared_timer_with_target(20)
}

fn shared_timer_with_target(calib_samples: u32) -> Arc<Mutex<GateTimer>> {
    let cfg = TimerConfig {
        min_lap: 0,
        calib_samples,
        ..TimerConfig::default()
    };
    Arc::new(Mutex::new(GateTimer::new(cfg)))
}

fn drain(rx: &mut mpsc::UnboundedReceiver<TimerEvent>) -> Vec<TimerEvent> {
    let mut events = Vec::new();
    while let Ok(ev) = rx.try_recv() {
        events.push(ev);
    }
    events
}

fn command_channel() -> (
    mpsc::UnboundedSender<Command>,
    std::pin::Pin<Box<dyn futures_util::Stream<Item = Command> + Send>>,
) {
    let (tx, rx) = mpsc::unbounded_channel::<Command>();
    let commands = stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|c| (c, rx)) });
    (tx, Box::pin(commands))
}

#[tokio::test]
async fn test_run_processes_commands_in_order() {
    println!("\n=== Test: Run Loop ===");
    let timer = shared_timer();
    let (tx, mut rx) = mpsc::unbounded_channel();

    let commands = vec![
        Command::StartRace {
            pilot: Some("erin".into()),
            channel: Some(5),
        },
        Command::Sample(Sample::new(0, 50)),
        Command::Sample(Sample::new(1200, 130)),
        Command::Sample(Sample::new(1400, 90)),
        Command::Sample(Sample::new(5700, 140)),
    ];
    runtime::run(timer.clone(), stream::iter(commands), tx).await;

    let events = drain(&mut rx);
    let laps: Vec<_> = events
        .iter()
        .filter_map(|ev| match ev {
            TimerEvent::Lap { lap, .. } => Some(*lap),
            _ => None,
        })
        .collect();
    println!("  {} events, {} laps", events.len(), laps.len());

    assert!(matches!(events.first(), Some(TimerEvent::RaceStarted(_))));
    assert_eq!(laps.len(), 2);
    assert!((laps[1].duration_seconds - 4.5).abs() < 1e-9);
    assert!(timer.lock().race_active());
    println!("✓ Commands handled in order until the stream ended");
}

#[tokio::test(start_paused = true)]
async fn test_calibration_phase_times_out() {
    println!("\n=== Test: Calibration Timeout ===");
    let timer = shared_timer();
    let (cmd_tx, commands) = command_channel();
    let (ev_tx, mut ev_rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn(runtime::run(timer.clone(), commands, ev_tx));

    cmd_tx.send(Command::StartNoise).unwrap();
    cmd_tx.send(Command::Sample(Sample::new(0, 14))).unwrap();
    cmd_tx.send(Command::Sample(Sample::new(200, 16))).unwrap();

    // 20 samples at 200ms plus the 5s margin
    tokio::time::sleep(Duration::from_secs(8)).await;
    assert_eq!(timer.lock().calibration().phase(), CalibrationPhase::MeasuringNoise);
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(timer.lock().calibration().phase(), CalibrationPhase::NoiseComplete);

    drop(cmd_tx);
    handle.await.unwrap();

    let finished: Vec<_> = drain(&mut ev_rx)
        .into_iter()
        .filter_map(|ev| match ev {
            TimerEvent::Calibration(CalibrationUpdate::Finished(r)) => Some(r),
            _ => None,
        })
        .collect();
    assert_eq!(finished.len(), 1);
    assert_eq!(finished[0].max_noise, 16);
    println!("✓ Noise phase finalized from partial data after the timeout");
}

#[tokio::test(start_paused = true)]
async fn test_large_target_crossing_completes() {
    println!("\n=== Test: Large Crossing Target ===");
    let timer = shared_timer_with_target(50);
    let (cmd_tx, commands) = command_channel();
    let (ev_tx, mut ev_rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn(runtime::run(timer.clone(), commands, ev_tx));

    cmd_tx.send(Command::StartCrossing).unwrap();
    for i in 0..50 {
        cmd_tx.send(Command::Sample(Sample::new(i * 150, 80))).unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
    }
    cmd_tx.send(Command::StopCrossing { ack: None }).unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(timer.lock().calibration().phase(), CalibrationPhase::Done);

    drop(cmd_tx);
    handle.await.unwrap();

    let events = drain(&mut ev_rx);
    assert!(!events
        .iter()
        .any(|ev| matches!(ev, TimerEvent::Warning(_) | TimerEvent::CalibrationCancelled)));
    let finished: Vec<_> = events
        .into_iter()
        .filter_map(|ev| match ev {
            TimerEvent::Calibration(CalibrationUpdate::Finished(r)) => Some(r),
            _ => None,
        })
        .collect();
    assert_eq!(finished.len(), 1);
    assert_eq!(finished[0].stage, CalibrationStage::Crossing);
    assert_eq!(finished[0].max_peak, 80);
    println!("✓ 50 samples at 150ms complete before the phase timeout");
}

#[tokio::test(start_paused = true)]
async fn test_noise_waits_for_ack_after_target() {
    println!("\n=== Test: Noise Ack After Target ===");
    let timer = shared_timer_with_target(10);
    let (cmd_tx, commands) = command_channel();
    let (ev_tx, mut ev_rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn(runtime::run(timer.clone(), commands, ev_tx));

    cmd_tx.send(Command::StartNoise).unwrap();
    for i in 0..10 {
        cmd_tx.send(Command::Sample(Sample::new(i * 100, 20))).unwrap();
    }
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(timer.lock().calibration().phase(), CalibrationPhase::AwaitingNoiseAck);

    let mut device_samples = vec![60u8; 10];
    device_samples.extend(std::iter::repeat(22u8).take(10));
    let ack = gate_timer::ControlAck {
        max_noise: Some(20),
        samples: Some(device_samples),
        ..Default::default()
    };
    cmd_tx.send(Command::StopNoise { ack: Some(ack) }).unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    drop(cmd_tx);
    handle.await.unwrap();

    let events = drain(&mut ev_rx);
    let reached = events
        .iter()
        .filter(|ev| matches!(ev, TimerEvent::Calibration(CalibrationUpdate::TargetReached { .. })))
        .count();
    assert_eq!(reached, 1);
    let finished: Vec<_> = events
        .into_iter()
        .filter_map(|ev| match ev {
            TimerEvent::Calibration(CalibrationUpdate::Finished(r)) => Some(r),
            _ => None,
        })
        .collect();
    assert_eq!(finished.len(), 1);
    assert_eq!(finished[0].max_peak, 60);
    assert_eq!(timer.lock().thresholds(), finished[0].thresholds);
    println!("✓ The acknowledgement sent after the target finalizes the phase");
}

#[tokio::test(start_paused = true)]
async fn test_cancel_clears_pending_timeout() {
    println!("\n=== Test: Cancel Clears Timeout ===");
    let timer = shared_timer();
    let (cmd_tx, commands) = command_channel();
    let (ev_tx, mut ev_rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn(runtime::run(timer.clone(), commands, ev_tx));

    cmd_tx.send(Command::StartNoise).unwrap();
    cmd_tx.send(Command::Sample(Sample::new(0, 13))).unwrap();
    cmd_tx.send(Command::CancelCalibration).unwrap();
    let written = {
        tokio::time::sleep(Duration::from_millis(10)).await;
        timer.lock().thresholds()
    };

    tokio::time::sleep(Duration::from_secs(10)).await;
    drop(cmd_tx);
    handle.await.unwrap();

    let events = drain(&mut ev_rx);
    let cancelled = events
        .iter()
        .filter(|ev| matches!(ev, TimerEvent::CalibrationCancelled))
        .count();
    assert_eq!(cancelled, 1);
    assert!(!events
        .iter()
        .any(|ev| matches!(ev, TimerEvent::Calibration(CalibrationUpdate::Finished(_)))));
    assert_eq!(timer.lock().calibration().phase(), CalibrationPhase::Idle);
    assert_eq!(timer.lock().thresholds(), written, "thresholds keep the last live value");
    println!("✓ Cancel stops the phase and no timeout fires afterwards");
}

#[tokio::test]
async fn test_json_lines_skips_bad_input() {
    println!("\n=== Test: JSON Lines ===");
    let input = b"{\"cmd\":\"start_noise\"}\n\nnot json\n{\"cmd\":\"sample\",\"timestamp\":5,\"strength\":9}\n";
    let commands: Vec<Command> = Box::pin(runtime::json_lines(&input[..])).collect().await;

    assert_eq!(
        commands,
        vec![Command::StartNoise, Command::Sample(Sample::new(5, 9))]
    );
    println!("✓ Blank and malformed lines skipped");
}
