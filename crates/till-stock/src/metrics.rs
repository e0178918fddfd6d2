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

const ITEMS_CREATED: &str = "till_stock_items_created";
const BULK_UPDATES_REJECTED: &str = "till_stock_bulk_updates_rejected";
const BULK_UPDATE_LATENCY: &str = "till_stock_bulk_update_latency";

pub(crate) struct Metrics {
    items_created: Counter,
    bulk_updates_rejected: Counter,
    bulk_update_latency: Histogram,
}

impl Metrics {
    #[must_use]
    pub(crate) fn new() -> Self {
        describe_counter!(
            ITEMS_CREATED,
            Unit::Count,
            "The number of items created through the HTTP API"
        );
        let items_created = counter!(ITEMS_CREATED);

        describe_counter!(
            BULK_UPDATES_REJECTED,
            Unit::Count,
            "The number of bulk stock updates rejected for insufficient stock or missing items"
        );
        let bulk_updates_rejected = counter!(BULK_UPDATES_REJECTED);

        describe_histogram!(
            BULK_UPDATE_LATENCY,
            Unit::Seconds,
            "The latency of the bulk stock update statement, in seconds"
        );
        let bulk_update_latency = histogram!(BULK_UPDATE_LATENCY);

        Self {
            items_created,
            bulk_updates_rejected,
            bulk_update_latency,
        }
    }

    pub(crate) fn increment_items_created(&self) {
        self.items_created.increment(1);
    }

    pub(crate) fn increment_bulk_updates_rejected(&self) {
        self.bulk_updates_rejected.increment(1);
    }

    pub(crate) fn record_bulk_update_latency(&self, latency: Duration) {
        self.bulk_update_latency.record(latency);
    }
}

#[cfg(test)]
mod tests {
    use super::{
        BULK_UPDATES_REJECTED,
        BULK_UPDATE_LATENCY,
        ITEMS_CREATED,
    };

    #[track_caller]
    fn assert_const(actual: &'static str, suffix: &str) {
        // XXX: hard-code this so the crate name isn't accidentally changed.
        const CRATE_NAME: &str = "till_stock";
        let expected = format!("{CRATE_NAME}_{suffix}");
        assert_eq!(expected, actual);
    }

    #[test]
    fn metrics_are_as_expected() {
        assert_const(ITEMS_CREATED, "items_created");
        assert_const(BULK_UPDATES_REJECTED, "bulk_updates_rejected");
        assert_const(BULK_UPDATE_LATENCY, "bulk_update_latency");
    }
}
