//! `;`-separated export of feedback joined with issued prizes.
use crate::db::ExportRow;

pub const EXPORT_FILE_NAME: &str = "export_feedback_prizes.csv";
const DELIMITER: char = ';';

const HEADER: [&str; 12] = [
    "created_at",
    "tg_user_id",
    "visit_id",
    "service",
    "taste",
    "speed",
    "clean",
    "comment",
    "prize_code",
    "prize_title",
    "prize_status",
    "valid_until",
];

fn escape_field(raw: &str) -> String {
    let flat = raw.replace(['\r', '\n'], " ");
    if flat.contains(DELIMITER) || flat.contains('"') {
        format!("\"{}\"", flat.replace('"', "\"\""))
    } else {
        flat
    }
}

fn opt_num(value: Option<i64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn opt_text(value: &Option<String>) -> String {
    value.as_deref().map(escape_field).unwrap_or_default()
}

pub fn render_csv(rows: &[ExportRow]) -> String {
    let mut out = String::new();
    out.push_str(&HEADER.join(&DELIMITER.to_string()));
    out.push('\n');

    for row in rows {
        let fields = [
            escape_field(&row.created_at),
            row.user_id.to_string(),
            escape_field(&row.visit_id),
            opt_num(row.service),
            opt_num(row.taste),
            opt_num(row.speed),
            opt_num(row.clean),
            opt_text(&row.comment),
            opt_text(&row.prize_code),
            opt_text(&row.prize_title),
            opt_text(&row.prize_status),
            opt_text(&row.valid_until),
        ];
        out.push_str(&fields.join(&DELIMITER.to_string()));
        out.push('\n');
    }
    out
}
