use calamine::Data;
use rust_xlsxwriter::Format;
use std::path::Path;

/// MIME type the shell puts on every spreadsheet download.
pub const XLSX_MIME: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

pub fn header_format() -> Format {
    Format::new().set_bold()
}

/// Uploads are gated on filename extension before any parsing happens.
pub fn is_spreadsheet_upload(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            let e = e.to_ascii_lowercase();
            e == "xlsx" || e == "xls"
        })
        .unwrap_or(false)
}

/// Text content of an imported cell; empty and error cells count as absent.
pub fn cell_text(cell: &Data) -> Option<String> {
    let text = match cell {
        Data::String(s) => s.trim().to_string(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) => {
            if f.fract() == 0.0 {
                format!("{}", *f as i64)
            } else {
                f.to_string()
            }
        }
        Data::Bool(b) => b.to_string(),
        Data::DateTimeIso(s) | Data::DurationIso(s) => s.trim().to_string(),
        Data::DateTime(dt) => dt.as_f64().to_string(),
        Data::Empty | Data::Error(_) => String::new(),
    };
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}
