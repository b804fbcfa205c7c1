/// Everything the sleep decision depends on, gathered at end of pass.
pub struct SleepInputs {
    /// Outbox holds at least one artifact awaiting remote acknowledgement.
    pub outbox_pending: bool,
    /// Smallest remaining idle time across non-exported sessions.
    pub min_remaining_idle: Option<i64>,
    /// Seconds since the last accepted message.
    pub last_activity_age: Option<i64>,
}

/// Adaptive sleep: rest at the poll interval when nothing is happening,
/// tighten to the fast interval when the outbox has work, a session is near
/// its idle deadline, or messages just flowed. Always at least one second.
pub fn next_sleep(poll_interval: i64, fast_interval: i64, inputs: &SleepInputs) -> u64 {
    let mut sleep = std::cmp::max(1, poll_interval);

    if inputs.outbox_pending {
        sleep = sleep.min(fast_interval);
    }

    if let Some(remaining) = inputs.min_remaining_idle {
        if remaining <= fast_interval {
            sleep = sleep.min(fast_interval);
        } else if remaining < sleep {
            sleep = sleep.min(std::cmp::max(1, remaining));
        }
    }

    if let Some(age) = inputs.last_activity_age {
        if age < std::cmp::max(15, fast_interval * 4) {
            sleep = sleep.min(fast_interval);
        }
    }

    std::cmp::max(1, sleep) as u64
}
