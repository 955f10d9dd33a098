// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use chrono::TimeZone;

#[test]
fn system_clock_is_monotonic() {
    let clock = SystemClock;
    let t1 = clock.now();
    std::thread::sleep(Duration::from_millis(1));
    let t2 = clock.now();
    assert!(t2 > t1);
}

#[test]
fn fake_clock_advances_both_readings() {
    let clock = FakeClock::new();
    let (i1, w1) = (clock.now(), clock.wall());
    clock.advance(Duration::from_secs(60));
    assert_eq!(clock.now().duration_since(i1), Duration::from_secs(60));
    assert_eq!((clock.wall() - w1).num_seconds(), 60);
}

#[test]
fn fake_clock_clones_share_time() {
    let clock1 = FakeClock::new();
    let clock2 = clock1.clone();
    let t1 = clock1.now();
    clock2.advance(Duration::from_secs(30));
    assert_eq!(clock1.now().duration_since(t1), Duration::from_secs(30));
}

#[test]
fn fake_clock_wall_can_be_pinned() {
    let clock = FakeClock::new();
    let pinned = Utc.with_ymd_and_hms(2023, 1, 1, 12, 0, 0).unwrap();
    clock.set_wall(pinned);
    assert_eq!(clock.wall(), pinned);
}
