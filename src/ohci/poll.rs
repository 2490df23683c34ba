// Copyright (C) 2019-2020  Pierre Krieger
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! Polling fallback for platforms that can't route the controller's interrupt line.
//!
//! Some embedders have no interrupt routing available (early boot, a platform without APIC
//! support wired up yet) and must fall back to periodically sampling `HcInterruptStatus` as if a
//! real interrupt had fired. The sampling period is fixed at 10 ms, matching the controller's own
//! 1 ms frame rate closely enough that writeback-done-head latency stays unnoticeable while
//! keeping the wakeup rate low.

use alloc::sync::Arc;
use core::{
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Cooperative stop signal for a running poll loop.
///
/// The core stays agnostic of the embedder's executor, so there is no task-kill primitive here:
/// the loop checks this flag once per iteration and returns once it observes `true`.
#[derive(Clone)]
pub struct PollStop {
    stop: Arc<AtomicBool>,
}

impl PollStop {
    pub fn new() -> Self {
        PollStop {
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn signal(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn is_signaled(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }
}

/// Runs `on_tick` every [`POLL_INTERVAL`] until `stop` is signaled.
///
/// `on_tick` is expected to unconditionally read and react to `HcInterruptStatus` itself (the
/// same routine that would otherwise run from a real interrupt); this loop only provides the
/// timing, it does not decide which bits matter.
pub async fn run<Delay, Tick>(
    stop: PollStop,
    mut delay: impl FnMut(Duration) -> Delay,
    mut on_tick: impl FnMut() -> Tick,
) where
    Delay: core::future::Future<Output = ()>,
    Tick: core::future::Future<Output = ()>,
{
    while !stop.is_signaled() {
        on_tick().await;
        delay(POLL_INTERVAL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_executor::block_on;

    #[test]
    fn loop_stops_once_signaled() {
        let stop = PollStop::new();
        let ticks = core::cell::Cell::new(0);
        let stop_after_three = stop.clone();

        block_on(run(
            stop.clone(),
            |_| async {},
            || {
                ticks.set(ticks.get() + 1);
                if ticks.get() >= 3 {
                    stop_after_three.signal();
                }
                async {}
            },
        ));

        assert_eq!(ticks.get(), 3);
    }
}
