use anyhow::Result;
use chrono::{SecondsFormat, TimeZone, Utc};
use tantivy::DateTime;

pub(crate) trait Validate {
    fn validate(&self) -> Result<()> {
        Ok(())
    }
}

/// Renders a tantivy date in the same form documents are indexed with.
pub(crate) fn format_date(value: DateTime) -> String {
    Utc.timestamp_opt(value.into_timestamp_secs(), 0)
        .single()
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_default()
}

/// Converts a chrono timestamp into tantivy's representation.
pub(crate) fn to_tantivy_date(value: chrono::DateTime<Utc>) -> DateTime {
    DateTime::from_timestamp_secs(value.timestamp())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn date_conversion() {
        let dt = Utc.with_ymd_and_hms(2011, 5, 17, 3, 19, 48).unwrap();
        let value = to_tantivy_date(dt);

        assert_eq!(format_date(value), "2011-05-17T03:19:48Z");
    }
}
