//! Rendering ranked result records for people and spreadsheets.

use subscout_shared::{ResultRecord, Result, ScoutError};

/// Results as a ranked Markdown table.
pub fn to_markdown(records: &[ResultRecord]) -> String {
    let mut out = String::from("| Rank | Company | Location | License | Bond | Projects | Score |\n");
    out.push_str("|---:|---|---|---|---:|---:|---:|\n");

    for (i, r) in records.iter().enumerate() {
        let company = match &r.website {
            Some(site) => format!("[{}]({site})", escape_cell(&r.name)),
            None => escape_cell(&r.name),
        };
        out.push_str(&format!(
            "| {} | {} | {} | {} | {} | {} | {} |\n",
            i + 1,
            company,
            location(r),
            license(r),
            r.bond_amount.map(format_bond).unwrap_or_else(|| "-".into()),
            r.relevant_project_count
                .map(|n| n.to_string())
                .unwrap_or_else(|| "-".into()),
            r.score,
        ));
    }
    out
}

/// Results as CSV with a header row, one line per record.
pub fn to_csv(records: &[ResultRecord]) -> Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for record in records {
        writer
            .serialize(record)
            .map_err(|e| ScoutError::validation(format!("csv export failed: {e}")))?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| ScoutError::validation(format!("csv export failed: {e}")))?;
    String::from_utf8(bytes).map_err(|e| ScoutError::validation(format!("csv export failed: {e}")))
}

/// Results as pretty-printed JSON.
pub fn to_json(records: &[ResultRecord]) -> Result<String> {
    serde_json::to_string_pretty(records)
        .map_err(|e| ScoutError::validation(format!("json export failed: {e}")))
}

/// `6_000_000` → `$6.0M`, `750_000` → `$750K`.
pub fn format_bond(amount: u64) -> String {
    if amount >= 1_000_000 {
        format!("${:.1}M", amount as f64 / 1_000_000.0)
    } else if amount >= 1_000 {
        format!("${}K", amount / 1_000)
    } else {
        format!("${amount}")
    }
}

fn location(r: &ResultRecord) -> String {
    match (&r.city, &r.state) {
        (Some(city), Some(state)) => format!("{city}, {state}"),
        (Some(city), None) => city.clone(),
        (None, Some(state)) => state.clone(),
        (None, None) => "-".into(),
    }
}

fn license(r: &ResultRecord) -> String {
    let number = r
        .lic_number
        .as_deref()
        .map(|n| format!(" #{n}"))
        .unwrap_or_default();
    match r.lic_active {
        Some(true) => format!("Active{number}"),
        Some(false) => format!("Inactive{number}"),
        None => "Unverified".into(),
    }
}

fn escape_cell(text: &str) -> String {
    text.replace('|', "\\|")
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;

    fn record(name: &str, score: u8) -> ResultRecord {
        ResultRecord {
            name: name.into(),
            website: Some("https://xyzmechanical.com/".into()),
            email: Some("bids@xyzmechanical.com".into()),
            phone_number: Some("(512) 555-0100".into()),
            city: Some("Austin".into()),
            state: Some("TX".into()),
            lic_active: Some(true),
            lic_number: Some("TACLA00012345C".into()),
            bond_amount: Some(6_000_000),
            relevant_project_count: Some(4),
            score,
            evidence_url: "https://xyzmechanical.com/about".into(),
            evidence_text: "bonding capacity of $6 million, hotel work".into(),
            last_checked: Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap(),
        }
    }

    #[test]
    fn bond_formatting() {
        assert_eq!(format_bond(6_000_000), "$6.0M");
        assert_eq!(format_bond(12_500_000), "$12.5M");
        assert_eq!(format_bond(750_000), "$750K");
        assert_eq!(format_bond(900), "$900");
    }

    #[test]
    fn markdown_table_rows() {
        let mut unverified = record("Lone | Star Air", 55);
        unverified.website = None;
        unverified.lic_active = None;
        unverified.bond_amount = None;
        unverified.relevant_project_count = None;

        let table = to_markdown(&[record("XYZ Mechanical", 100), unverified]);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(
            lines[2],
            "| 1 | [XYZ Mechanical](https://xyzmechanical.com/) | Austin, TX | Active #TACLA00012345C | $6.0M | 4 | 100 |"
        );
        assert_eq!(lines[3], "| 2 | Lone \\| Star Air | Austin, TX | Unverified | - | - | 55 |");
    }

    #[test]
    fn csv_has_header_and_rfc3339_timestamps() {
        let csv = to_csv(&[record("XYZ Mechanical", 97)]).unwrap();
        let mut lines = csv.lines();
        let header = lines.next().unwrap();
        assert!(header.starts_with("name,website,email,phone_number,city,state,lic_active"));
        let row = lines.next().unwrap();
        assert!(row.contains("XYZ Mechanical"));
        assert!(row.contains("2025-03-01T12:00:00Z"));
        // The evidence text contains a comma, so it is quoted.
        assert!(row.contains("\"bonding capacity of $6 million, hotel work\""));
    }

    #[test]
    fn json_export() {
        let json = to_json(&[record("XYZ Mechanical", 97)]).unwrap();
        let parsed: Vec<ResultRecord> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed[0].score, 97);
    }
}
