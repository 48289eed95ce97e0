/// `2006-01-02T15:04:05.000Z`
///
/// Timestamps are expected to be in UTC; the trailing `Z` is a literal.
pub const RFC3339_MILLISECONDS: &[time::format_description::BorrowedFormatItem<'_>] =
	time::macros::format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]Z");

pub fn rfc3339_milliseconds(timestamp: time::OffsetDateTime) -> String {
	let timestamp = timestamp.to_offset(time::UtcOffset::UTC);
	timestamp.format(RFC3339_MILLISECONDS).unwrap_or_else(|_| timestamp.to_string())
}
