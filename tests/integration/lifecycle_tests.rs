//! The whole device over mocks: boot, pour, transfer, calibration and the
//! button / remote command paths.  Driver cycles are stepped by hand.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use trichter::app::commands::ButtonClick;
use trichter::app::inputs;
use trichter::app::events::DeviceStatus;
use trichter::app::ports::{AdvertisingMode, BRIGHTNESS_MAX, CALIBRATION_ID, Glyph};
use trichter::error::{FsmError, TransportError};
use trichter::fsm::advertising::AdvState;
use trichter::fsm::states::LifecycleState as L;
use trichter::transfer::reassembly::TransferReassembler;

use super::mock_hw::{AdvCall, DisplayCall, Rig, StorageState, wait_until};

const CONN: u16 = 3;

/// Boot, then run a qualifying pour to the end-of-pour gap.
fn pour_to_sending(rig: &Rig, pulses: u32) -> Vec<u32> {
    rig.boot();
    let stamps = rig.pulses(pulses, 2_000);
    rig.close_burst_window();
    rig.step();
    assert_eq!(rig.device.lifecycle().current_state(), L::Running);

    rig.end_pour();
    rig.step();
    assert_eq!(rig.device.lifecycle().current_state(), L::Sending);
    stamps
}

// ── Boot ─────────────────────────────────────────────────────

#[test]
fn boot_arms_on_first_cycle() {
    let rig = Rig::new();
    rig.device.start().unwrap();
    assert_eq!(rig.device.lifecycle().current_state(), L::Idle);
    assert!(rig.device.lifecycle().has_pending_request());
    assert!(rig.led.on.load(Ordering::SeqCst));

    rig.step();
    assert_eq!(rig.device.lifecycle().current_state(), L::Ready);
    assert_eq!(*rig.status.lock().unwrap(), vec![0x00, 0x01]);
    assert_eq!(rig.last_display(), Some(DisplayCall::Glyph(Glyph::Ready, 2)));
    assert_eq!(
        rig.device.lifecycle().period(),
        std::time::Duration::from_millis(300)
    );
}

#[test]
fn ready_advertises_and_blinks_until_connected() {
    let rig = Rig::new();
    rig.boot();

    rig.step();
    rig.step_adv();
    assert_eq!(rig.device.advertising().state(), AdvState::Fast);
    assert!(rig.device.advertising().is_active());
    assert_eq!(rig.adv_calls(), vec![AdvCall::Start(AdvertisingMode::Fast)]);

    rig.clock.advance(1_500);
    rig.step();
    assert_eq!(rig.led.toggles.load(Ordering::SeqCst), 1);

    rig.connect(CONN);
    assert_eq!(
        rig.adv_calls(),
        vec![AdvCall::Start(AdvertisingMode::Fast), AdvCall::Stop]
    );
    assert!(!rig.device.advertising().is_active());

    rig.clock.advance(1_500);
    rig.step();
    assert_eq!(rig.led.toggles.load(Ordering::SeqCst), 1);
    assert!(rig.led.on.load(Ordering::SeqCst));
}

#[test]
fn dropped_peer_restarts_fast_advertising() {
    let rig = Rig::new();
    rig.boot();
    rig.step();
    rig.step_adv();
    rig.connect(CONN);

    rig.device.link().on_disconnected(CONN);
    rig.step_adv();
    assert_eq!(rig.device.advertising().state(), AdvState::Fast);
    assert_eq!(
        rig.adv_calls().last(),
        Some(&AdvCall::Start(AdvertisingMode::Fast))
    );
}

#[test]
fn fast_advertising_downgrades_to_slow() {
    let rig = Rig::new();
    rig.boot();
    rig.step();
    rig.step_adv();

    rig.clock.advance(30_000);
    rig.step_adv();
    assert_eq!(rig.device.advertising().state(), AdvState::Slow);
    assert_eq!(
        rig.adv_calls(),
        vec![
            AdvCall::Start(AdvertisingMode::Fast),
            AdvCall::Stop,
            AdvCall::Start(AdvertisingMode::Slow),
        ]
    );
}

#[test]
fn ready_goes_idle_after_inactivity() {
    let rig = Rig::new();
    rig.boot();
    rig.clock.advance(120_000);
    rig.step();
    assert_eq!(rig.device.lifecycle().current_state(), L::Idle);
    assert_eq!(rig.last_display(), Some(DisplayCall::Clear));
    assert_eq!(rig.last_status(), Some(0x00));
}

// ── Pour → transfer ──────────────────────────────────────────

#[test]
fn pour_is_measured_and_transferred() {
    let rig = Rig::new();
    let stamps = pour_to_sending(&rig, 5);
    assert_eq!(rig.device.pulses().len(), 5);
    assert!(!rig.device.pulses().is_running());

    // Nobody listening yet: SENDING waits.
    rig.step();
    assert!(rig.transport.packets().is_empty());

    rig.connect(CONN);
    rig.step();
    assert_eq!(rig.transport.flags(), vec![0xAA]);
    assert!(rig.device.engine().is_sending());

    for _ in 0..3 {
        rig.ack();
        rig.step();
    }
    assert_eq!(rig.device.lifecycle().current_state(), L::Ready);
    assert_eq!(rig.transport.flags(), vec![0xAA, 0xBB, 0xBB, 0xCC]);

    let mut peer = TransferReassembler::new();
    let transfer = rig
        .transport
        .packets()
        .iter()
        .find_map(|p| peer.feed(p).unwrap())
        .expect("complete transfer");
    assert_eq!(transfer.calibration, 300);
    assert_eq!(transfer.timestamps, stamps);

    assert_eq!(
        *rig.status.lock().unwrap(),
        vec![0x00, 0x01, 0x02, 0x03, 0x01]
    );
}

#[test]
fn running_shows_elapsed_time() {
    let rig = Rig::new();
    rig.boot();
    rig.pulses(4, 1_000);
    rig.close_burst_window();
    rig.step();

    // 1.25 s of 8 µs ticks.
    rig.timer.set_ticks(156_250);
    rig.pulses(1, 0);
    rig.step();
    assert_eq!(
        rig.last_display(),
        Some(DisplayCall::Digits {
            digits: [0, 1, 2, 5],
            brightness: BRIGHTNESS_MAX,
            dot: Some(1),
        })
    );
    assert_eq!(rig.device.lifecycle().current_state(), L::Running);
}

#[test]
fn edges_only_raise_the_burst_flag() {
    let rig = Rig::new();
    rig.boot();
    rig.pulses(5, 1_000);
    assert!(!rig.device.lifecycle().has_pending_request());
    assert!(rig.device.inputs().take_burst_opened());
    // One flag per burst, not per edge.
    assert!(!rig.device.inputs().take_burst_opened());
}

#[test]
fn burst_window_thread_polls_for_new_bursts() {
    let rig = Rig::new();
    rig.boot();
    inputs::spawn_burst_window(Arc::clone(rig.device.inputs()), 64).unwrap();

    rig.pulses(3, 2_000);
    assert!(wait_until(Duration::from_secs(2), || {
        rig.device.lifecycle().has_pending_request()
    }));
    rig.step();
    assert_eq!(rig.device.lifecycle().current_state(), L::Running);
}

#[test]
fn pour_past_buffer_capacity_keeps_running() {
    let rig = Rig::new();
    rig.boot();
    rig.pulses(400, 2_000);
    rig.close_burst_window();
    rig.step();
    rig.step();
    // Pulse 400 is recent even though only 300 were stored.
    assert_eq!(rig.device.lifecycle().current_state(), L::Running);

    rig.pulses(50, 2_000);
    rig.step();
    assert_eq!(rig.device.lifecycle().current_state(), L::Running);

    rig.end_pour();
    rig.step();
    assert_eq!(rig.device.lifecycle().current_state(), L::Sending);
    assert_eq!(rig.device.pulses().pulse_count(), 450);
}

#[test]
fn short_burst_does_not_start_a_pour() {
    let rig = Rig::new();
    rig.boot();
    rig.pulses(2, 1_000);
    rig.close_burst_window();
    rig.step();
    assert_eq!(rig.device.lifecycle().current_state(), L::Ready);
    assert_eq!(rig.device.pulses().pulse_count(), 0);
    assert!(!rig.timer.is_running());
}

#[test]
fn stored_calibration_goes_into_start() {
    let storage = Arc::new(StorageState::default());
    storage.values.lock().unwrap().insert(CALIBRATION_ID, 412);
    let rig = Rig::with_storage(storage);
    pour_to_sending(&rig, 3);
    rig.connect(CONN);
    rig.step();

    let packets = rig.transport.packets();
    let start = &packets[0];
    assert_eq!(u16::from_le_bytes([start[6], start[7]]), 412);
}

#[test]
fn unreadable_storage_falls_back_to_default_calibration() {
    let storage = Arc::new(StorageState::default());
    storage.fail_reads.store(true, Ordering::SeqCst);
    let rig = Rig::with_storage(storage);
    assert_eq!(
        rig.device
            .lifecycle()
            .with_context(|ctx| ctx.calibration_value()),
        300
    );
}

#[test]
fn session_timeout_returns_to_ready() {
    let rig = Rig::new();
    pour_to_sending(&rig, 3);
    rig.clock.advance(30_000);
    rig.step();
    assert_eq!(rig.device.lifecycle().current_state(), L::Ready);
    assert!(rig.transport.packets().is_empty());
}

#[test]
fn unacknowledged_session_is_cancelled_on_timeout() {
    let rig = Rig::new();
    pour_to_sending(&rig, 3);
    rig.connect(CONN);
    rig.step();
    assert_eq!(rig.transport.flags(), vec![0xAA]);
    assert!(rig.device.engine().is_sending());

    rig.clock.advance(30_000);
    rig.step();
    assert_eq!(rig.device.lifecycle().current_state(), L::Ready);
    assert!(!rig.device.engine().is_sending());
    assert!(rig.device.engine().is_connected());

    // A late failed ack must not replay START.
    rig.device.link().on_indication_complete(Err(TransportError::Busy));
    assert_eq!(rig.device.engine().process_pending_retries(), 0);
    assert_eq!(rig.transport.flags(), vec![0xAA]);

    rig.clock.advance(120_000);
    rig.step();
    assert_eq!(rig.device.lifecycle().current_state(), L::Idle);

    rig.device.inputs().on_click(ButtonClick::Single);
    assert_eq!(rig.device.lifecycle().current_state(), L::Ready);
}

#[test]
fn disconnect_mid_transfer_waits_for_timeout() {
    let rig = Rig::new();
    pour_to_sending(&rig, 10);
    rig.connect(CONN);
    rig.step();
    rig.ack();
    rig.step();

    rig.device.link().on_disconnected(CONN);
    assert!(!rig.device.engine().is_sending());
    rig.step();
    assert_eq!(rig.device.lifecycle().current_state(), L::Sending);

    rig.clock.advance(30_000);
    rig.step();
    assert_eq!(rig.device.lifecycle().current_state(), L::Ready);
}

#[test]
fn hard_send_failure_halts_in_error() {
    let rig = Rig::new();
    pour_to_sending(&rig, 3);
    rig.connect(CONN);
    rig.transport.fail_next(TransportError::Stack(-1));

    assert_eq!(rig.device.lifecycle().step(), Err(FsmError::ApiFailure));
    assert_eq!(rig.device.lifecycle().current_state(), L::Error);
    assert_eq!(rig.device.lifecycle().last_error(), Some(FsmError::ApiFailure));
    assert_eq!(rig.last_display(), Some(DisplayCall::Glyph(Glyph::Error, 5)));
    assert_eq!(rig.last_status(), Some(0x05));

    // Nothing leaves ERROR.
    rig.device.inputs().on_single_click();
    rig.device.link().on_status_write(&[1]);
    rig.step();
    assert_eq!(rig.device.lifecycle().current_state(), L::Error);
}

// ── Calibration ──────────────────────────────────────────────

#[test]
fn long_click_calibrates_and_persists() {
    let rig = Rig::new();
    rig.boot();

    rig.device.inputs().on_click(ButtonClick::Long);
    assert_eq!(rig.device.lifecycle().current_state(), L::Calibrating);
    assert_eq!(
        rig.last_display(),
        Some(DisplayCall::Glyph(Glyph::Calibrating, 5))
    );

    rig.pulses(12, 1_500);
    rig.close_burst_window();
    assert!(rig.device.flags().calibration_valid());

    rig.step();
    assert_eq!(
        rig.last_display(),
        Some(DisplayCall::Digits {
            digits: [0, 0, 1, 2],
            brightness: 5,
            dot: None,
        })
    );

    rig.end_pour();
    rig.step();
    assert_eq!(rig.device.lifecycle().current_state(), L::Ready);
    assert_eq!(
        rig.storage.values.lock().unwrap().get(&CALIBRATION_ID),
        Some(&12)
    );
    assert_eq!(
        rig.device
            .lifecycle()
            .with_context(|ctx| ctx.calibration_value()),
        12
    );

    let status = rig.last_status().unwrap();
    assert_eq!(status, 0x81);
    assert_eq!(
        DeviceStatus::decode(status),
        Some(rig.device.status())
    );
}

#[test]
fn calibration_counts_past_buffer_capacity() {
    let rig = Rig::new();
    rig.boot();
    rig.device.inputs().on_click(ButtonClick::Long);

    rig.pulses(400, 1_500);
    rig.close_burst_window();
    rig.step();
    assert_eq!(rig.device.lifecycle().current_state(), L::Calibrating);

    rig.pulses(50, 1_500);
    rig.end_pour();
    rig.step();
    assert_eq!(rig.device.lifecycle().current_state(), L::Ready);
    assert_eq!(
        rig.storage.values.lock().unwrap().get(&CALIBRATION_ID),
        Some(&450)
    );
}

#[test]
fn short_calibration_burst_is_not_valid() {
    let rig = Rig::new();
    rig.boot();
    rig.device.inputs().on_long_click();

    rig.pulses(2, 1_500);
    rig.close_burst_window();
    assert!(!rig.device.flags().calibration_valid());
    rig.step();
    assert_eq!(rig.device.lifecycle().current_state(), L::Calibrating);
    assert_eq!(rig.device.pulses().pulse_count(), 0);

    // Leaving without a valid burst writes nothing.
    rig.device.link().on_status_write(&[1]);
    rig.step();
    assert_eq!(rig.device.lifecycle().current_state(), L::Ready);
    assert_eq!(rig.storage.writes.load(Ordering::SeqCst), 0);
    assert_eq!(rig.last_status(), Some(0x01));
}

// ── Buttons and remote commands ──────────────────────────────

#[test]
fn single_click_ignored_while_sending() {
    let rig = Rig::new();
    pour_to_sending(&rig, 3);
    rig.connect(CONN);
    rig.step();
    assert!(rig.device.engine().is_sending());

    rig.device.inputs().on_click(ButtonClick::Single);
    assert_eq!(rig.device.lifecycle().current_state(), L::Sending);
}

#[test]
fn single_click_arms_from_idle() {
    let rig = Rig::new();
    rig.device.start().unwrap();
    rig.device.lifecycle().cancel_deferred();

    rig.device.inputs().on_click(ButtonClick::Single);
    assert_eq!(rig.device.lifecycle().current_state(), L::Ready);
}

#[test]
fn double_click_requests_advertising_and_drops_peer() {
    let rig = Rig::new();
    rig.boot();
    rig.connect(CONN);
    rig.device.flags().clear_advertising();

    rig.device.inputs().on_click(ButtonClick::Double);
    assert!(rig.device.flags().advertising_requested());
    assert_eq!(*rig.transport.dropped.lock().unwrap(), vec![CONN]);
}

#[test]
fn remote_commands_are_deferred() {
    let rig = Rig::new();
    rig.boot();

    rig.device.link().on_status_write(&[0]);
    assert_eq!(rig.device.lifecycle().current_state(), L::Ready);
    rig.step();
    assert_eq!(rig.device.lifecycle().current_state(), L::Idle);

    rig.device.link().on_status_write(&[9]);
    rig.device.link().on_status_write(&[]);
    assert!(!rig.device.lifecycle().has_pending_request());

    rig.device.link().on_status_write(&[1]);
    rig.step();
    assert_eq!(rig.device.lifecycle().current_state(), L::Ready);

    rig.device.link().on_status_write(&[2]);
    rig.step();
    assert_eq!(rig.device.lifecycle().current_state(), L::Calibrating);
}
