// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.
use std::ops::ControlFlow;
use std::time::Duration;

/// Decides whether a lost connection is opened again, and when.
pub trait ReconnectionPolicy: Send + Sync {
    /// Called before each attempt. `attempts` counts the ones that already
    /// failed since the connection was lost.
    fn should_retry(&self, attempts: usize) -> ControlFlow<(), Duration>;
}

/// Gives up as soon as the connection is lost.
pub struct NoReconnect;

impl ReconnectionPolicy for NoReconnect {
    fn should_retry(&self, _: usize) -> ControlFlow<(), Duration> {
        ControlFlow::Break(())
    }
}

/// Tries up to `attempts` times, waiting `delay` before each one.
pub struct FixedReconnect {
    pub attempts: usize,
    pub delay: Duration,
}

impl ReconnectionPolicy for FixedReconnect {
    fn should_retry(&self, attempts: usize) -> ControlFlow<(), Duration> {
        if attempts < self.attempts {
            ControlFlow::Continue(self.delay)
        } else {
            ControlFlow::Break(())
        }
    }
}
