use chrono::NaiveDate;

/// Wire format used by the extract endpoint.
const WIRE_DATE_FORMAT: &str = "%Y%m%d";

/// Format a date as `YYYYMMDD`.
pub fn format_wire_date(date: NaiveDate) -> String {
	date.format(WIRE_DATE_FORMAT).to_string()
}

/// Parse a `YYYYMMDD` date.
pub fn parse_wire_date(value: &str) -> Result<NaiveDate, chrono::ParseError> {
	NaiveDate::parse_from_str(value.trim(), WIRE_DATE_FORMAT)
}

/// Human-readable label for an inclusive date span, e.g. `01-Apr-2024 to 05-Apr-2024`.
pub fn format_span(start: NaiveDate, end: NaiveDate) -> String {
	if start == end {
		start.format("%d-%b-%Y").to_string()
	} else {
		format!("{} to {}", start.format("%d-%b-%Y"), end.format("%d-%b-%Y"))
	}
}
