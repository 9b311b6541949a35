use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

/// A calendar month. Each month has its own sheet in the mirror.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Month {
    January,
    February,
    March,
    April,
    May,
    June,
    July,
    August,
    September,
    October,
    November,
    December,
}

serde_plain::derive_display_from_serialize!(Month);

impl Month {
    pub const ALL: [Month; 12] = [
        Month::January,
        Month::February,
        Month::March,
        Month::April,
        Month::May,
        Month::June,
        Month::July,
        Month::August,
        Month::September,
        Month::October,
        Month::November,
        Month::December,
    ];

    /// 1 for January through 12 for December.
    pub fn number(self) -> u32 {
        self as u32 + 1
    }

    pub fn from_number(n: u32) -> Option<Month> {
        n.checked_sub(1)
            .and_then(|i| Self::ALL.get(i as usize))
            .copied()
    }

    /// The month a date falls in.
    pub fn of(date: NaiveDate) -> Month {
        // month0() is always 0..=11
        Self::ALL[date.month0() as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_number_round_trip() {
        for (i, month) in Month::ALL.iter().enumerate() {
            assert_eq!(month.number() as usize, i + 1);
            assert_eq!(Month::from_number(month.number()), Some(*month));
        }
        assert_eq!(Month::from_number(0), None);
        assert_eq!(Month::from_number(13), None);
    }

    #[test]
    fn test_of_date() {
        let date = NaiveDate::from_ymd_opt(2025, 3, 31).unwrap();
        assert_eq!(Month::of(date), Month::March);
        assert_eq!(Month::March.to_string(), "March");
    }
}
