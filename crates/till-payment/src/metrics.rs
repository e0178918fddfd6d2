use metrics::{
    counter,
    describe_counter,
    Counter,
    Unit,
};

const PAYMENTS_RECORDED: &str = "till_payment_payments_recorded";
const PAYMENTS_REJECTED: &str = "till_payment_payments_rejected";
const PAYMENTS_REFUNDED: &str = "till_payment_payments_refunded";

pub(crate) struct Metrics {
    payments_recorded: Counter,
    payments_rejected: Counter,
    payments_refunded: Counter,
}

impl Metrics {
    #[must_use]
    pub(crate) fn new() -> Self {
        describe_counter!(
            PAYMENTS_RECORDED,
            Unit::Count,
            "The number of successful debits recorded in the payment ledger"
        );
        let payments_recorded = counter!(PAYMENTS_RECORDED);

        describe_counter!(
            PAYMENTS_REJECTED,
            Unit::Count,
            "The number of debits rejected for insufficient credit"
        );
        let payments_rejected = counter!(PAYMENTS_REJECTED);

        describe_counter!(
            PAYMENTS_REFUNDED,
            Unit::Count,
            "The number of payments refunded through the cancel compensation"
        );
        let payments_refunded = counter!(PAYMENTS_REFUNDED);

        Self {
            payments_recorded,
            payments_rejected,
            payments_refunded,
        }
    }

    pub(crate) fn increment_payments_recorded(&self) {
        self.payments_recorded.increment(1);
    }

    pub(crate) fn increment_payments_rejected(&self) {
        self.payments_rejected.increment(1);
    }

    pub(crate) fn increment_payments_refunded(&self) {
        self.payments_refunded.increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::{
        PAYMENTS_RECORDED,
        PAYMENTS_REFUNDED,
        PAYMENTS_REJECTED,
    };

    #[track_caller]
    fn assert_const(actual: &'static str, suffix: &str) {
        // XXX: hard-code this so the crate name isn't accidentally changed.
        const CRATE_NAME: &str = "till_payment";
        let expected = format!("{CRATE_NAME}_{suffix}");
        assert_eq!(expected, actual);
    }

    #[test]
    fn metrics_are_as_expected() {
        assert_const(PAYMENTS_RECORDED, "payments_recorded");
        assert_const(PAYMENTS_REJECTED, "payments_rejected");
        assert_const(PAYMENTS_REFUNDED, "payments_refunded");
    }
}
