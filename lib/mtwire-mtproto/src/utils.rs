// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Time elapsed since the Unix epoch, or zero if the clock is set before it.
pub(crate) fn since_epoch() -> Duration {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
}

/// Random bytes from the operating system.
pub(crate) fn random<const N: usize>() -> [u8; N] {
    let mut buffer = [0; N];
    getrandom::fill(&mut buffer).expect("failed to generate secure random data");
    buffer
}

pub(crate) fn random_i64() -> i64 {
    i64::from_le_bytes(random())
}

/// Generates a client message identifier for the current time, adjusted
/// by `time_offset` seconds.
///
/// The seconds since the epoch go in the upper 32 bits and the sub-second
/// part in the lower ones, with the two lowest bits clear. Identifiers are
/// strictly increasing: if the clock did not advance, `last + 4` is used.
pub(crate) fn next_msg_id(last: &mut i64, time_offset: i32) -> i64 {
    let now = since_epoch();
    let seconds = now.as_secs() as i64 + time_offset as i64;
    let nanoseconds = now.subsec_nanos() as i64;
    let mut msg_id = (seconds << 32) | (nanoseconds << 2);

    if *last >= msg_id {
        msg_id = *last + 4;
    }
    *last = msg_id;
    msg_id
}
