use std::{
    fmt,
    str::FromStr,
};

/// The closed set of tasks carried in the `type` property of a request.
///
/// The wire names are fixed by the protocol; [`TaskKind::as_str`] and the
/// [`FromStr`] impl round-trip them exactly.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TaskKind {
    /// Debit a user's credit and record a payment.
    Pay,
    /// Refund a previously recorded payment.
    Cancel,
    /// Decrement stock for a set of items.
    SubtractItems,
    /// Increment stock for a set of items (the compensation of
    /// `SubtractItems`).
    IncreaseItems,
    /// Look up a single item's unit price.
    GetPrice,
}

impl TaskKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pay => "pay",
            Self::Cancel => "cancel",
            Self::SubtractItems => "subtractItems",
            Self::IncreaseItems => "increaseItems",
            Self::GetPrice => "getPrice",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a message carries a task name outside the
/// protocol vocabulary.
#[derive(Debug, thiserror::Error)]
#[error("unknown task name `{0}`")]
pub struct UnknownTask(pub String);

impl FromStr for TaskKind {
    type Err = UnknownTask;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pay" => Ok(Self::Pay),
            "cancel" => Ok(Self::Cancel),
            "subtractItems" => Ok(Self::SubtractItems),
            "increaseItems" => Ok(Self::IncreaseItems),
            "getPrice" => Ok(Self::GetPrice),
            other => Err(UnknownTask(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::TaskKind;

    const ALL: [TaskKind; 5] = [
        TaskKind::Pay,
        TaskKind::Cancel,
        TaskKind::SubtractItems,
        TaskKind::IncreaseItems,
        TaskKind::GetPrice,
    ];

    #[test]
    fn wire_names_round_trip() {
        for kind in ALL {
            assert_eq!(kind, kind.as_str().parse().unwrap());
        }
    }

    #[test]
    fn wire_names_are_camel_case() {
        assert_eq!("subtractItems", TaskKind::SubtractItems.as_str());
        assert_eq!("increaseItems", TaskKind::IncreaseItems.as_str());
        assert_eq!("getPrice", TaskKind::GetPrice.as_str());
    }

    #[test]
    fn garbage_is_rejected() {
        assert!("garbage".parse::<TaskKind>().is_err());
        assert!("Pay".parse::<TaskKind>().is_err());
        assert!("".parse::<TaskKind>().is_err());
    }
}
