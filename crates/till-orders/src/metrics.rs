use std::time::Duration;

use metrics::{
    counter,
    describe_counter,
    describe_histogram,
    histogram,
    Counter,
    Histogram,
    Unit,
};

const CHECKOUTS_SUCCEEDED: &str = "till_orders_checkouts_succeeded";
const CHECKOUTS_REJECTED: &str = "till_orders_checkouts_rejected";
const COMPENSATIONS_SENT: &str = "till_orders_compensations_sent";
const CHECKOUT_LATENCY: &str = "till_orders_checkout_latency";

pub(crate) struct Metrics {
    checkouts_succeeded: Counter,
    checkouts_rejected: Counter,
    compensations_sent: Counter,
    checkout_latency: Histogram,
}

impl Metrics {
    #[must_use]
    pub(crate) fn new() -> Self {
        describe_counter!(
            CHECKOUTS_SUCCEEDED,
            Unit::Count,
            "The number of checkouts that debited credit and reserved stock"
        );
        let checkouts_succeeded = counter!(CHECKOUTS_SUCCEEDED);

        describe_counter!(
            CHECKOUTS_REJECTED,
            Unit::Count,
            "The number of checkouts refused by the stock or payment side"
        );
        let checkouts_rejected = counter!(CHECKOUTS_REJECTED);

        describe_counter!(
            COMPENSATIONS_SENT,
            Unit::Count,
            "The number of fire-and-forget compensations published after one-sided failures"
        );
        let compensations_sent = counter!(COMPENSATIONS_SENT);

        describe_histogram!(
            CHECKOUT_LATENCY,
            Unit::Seconds,
            "The time from issuing both checkout RPCs until both replies were in, in seconds"
        );
        let checkout_latency = histogram!(CHECKOUT_LATENCY);

        Self {
            checkouts_succeeded,
            checkouts_rejected,
            compensations_sent,
            checkout_latency,
        }
    }

    pub(crate) fn increment_checkouts_succeeded(&self) {
        self.checkouts_succeeded.increment(1);
    }

    pub(crate) fn increment_checkouts_rejected(&self) {
        self.checkouts_rejected.increment(1);
    }

    pub(crate) fn increment_compensations_sent(&self) {
        self.compensations_sent.increment(1);
    }

    pub(crate) fn record_checkout_latency(&self, latency: Duration) {
        self.checkout_latency.record(latency);
    }
}

#[cfg(test)]
mod tests {
    use super::{
        CHECKOUTS_REJECTED,
        CHECKOUTS_SUCCEEDED,
        CHECKOUT_LATENCY,
        COMPENSATIONS_SENT,
    };

    #[track_caller]
    fn assert_const(actual: &'static str, suffix: &str) {
        // XXX: hard-code this so the crate name isn't accidentally changed.
        const CRATE_NAME: &str = "till_orders";
        let expected = format!("{CRATE_NAME}_{suffix}");
        assert_eq!(expected, actual);
    }

    #[test]
    fn metrics_are_as_expected() {
        assert_const(CHECKOUTS_SUCCEEDED, "checkouts_succeeded");
        assert_const(CHECKOUTS_REJECTED, "checkouts_rejected");
        assert_const(COMPENSATIONS_SENT, "compensations_sent");
        assert_const(CHECKOUT_LATENCY, "checkout_latency");
    }
}
