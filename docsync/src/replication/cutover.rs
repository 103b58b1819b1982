use chrono::{DateTime, Days, NaiveDate, Utc};
use docsync_config::shared::{CutoverBasis, CutoverConfig};

/// Returns the time separating copied documents from streamed changes.
///
/// [`CutoverBasis::Yesterday`] resolves to the start of the UTC day before `now`,
/// [`CutoverBasis::FirstOpTime`] to midnight UTC of the configured date. `None` means the cutover
/// is undeterminable: nothing can be copied and streaming starts from now.
pub fn cutover_time(config: &CutoverConfig, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match config.basis {
        CutoverBasis::None => None,
        CutoverBasis::Yesterday => now
            .date_naive()
            .checked_sub_days(Days::new(1))
            .map(start_of_day),
        CutoverBasis::FirstOpTime => config.first_op_time.map(start_of_day),
    }
}

fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(chrono::NaiveTime::MIN).and_utc()
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 10, 15, 42, 7).unwrap()
    }

    #[test]
    fn no_basis_has_no_cutover() {
        let config = CutoverConfig {
            basis: CutoverBasis::None,
            first_op_time: NaiveDate::from_ymd_opt(2024, 3, 1),
        };

        assert_eq!(cutover_time(&config, now()), None);
    }

    #[test]
    fn yesterday_is_the_start_of_the_previous_day() {
        let config = CutoverConfig {
            basis: CutoverBasis::Yesterday,
            first_op_time: None,
        };

        assert_eq!(
            cutover_time(&config, now()),
            Some(Utc.with_ymd_and_hms(2024, 3, 9, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn first_op_time_is_midnight_of_the_date() {
        let config = CutoverConfig {
            basis: CutoverBasis::FirstOpTime,
            first_op_time: NaiveDate::from_ymd_opt(2024, 3, 1),
        };

        assert_eq!(
            cutover_time(&config, now()),
            Some(Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn first_op_time_without_a_date_is_undeterminable() {
        let config = CutoverConfig {
            basis: CutoverBasis::FirstOpTime,
            first_op_time: None,
        };

        assert_eq!(cutover_time(&config, now()), None);
    }
}
