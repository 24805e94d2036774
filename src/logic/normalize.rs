use log::{debug, info, warn};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::logic::dates::{format_canonical, parse_date};
use crate::model::{or_placeholder, placeholder, CanonicalRecord, InstrumentField};

/// One scraped instrument, as handed over by the portal scraper.
pub type RawFieldMap = Map<String, Value>;

/// Raw keys copied straight into a canonical field after text cleanup.
const DIRECT_FIELDS: &[(&str, InstrumentField)] = &[
    ("name", InstrumentField::Name),
    ("type", InstrumentField::Type),
    ("brand", InstrumentField::Brand),
    ("model", InstrumentField::Model),
    ("serial_num", InstrumentField::SerialNumber),
    ("location", InstrumentField::Location),
    ("range", InstrumentField::MeasurementRange),
    ("unit", InstrumentField::Unit),
    ("class", InstrumentField::Class),
    ("description", InstrumentField::Description),
    ("certif_num", InstrumentField::CertificateId),
    ("acceptance_status", InstrumentField::AcceptanceCriterion),
];

/// Latin-1 renderings of UTF-8 sequences that the portal sometimes emits.
const MOJIBAKE: &[(&str, &str)] = &[
    ("Ã©", "é"),
    ("Ã£", "ã"),
    ("Ã¢", "â"),
    ("Ã§", "ç"),
    ("Ãª", "ê"),
    ("Ã³", "ó"),
    ("Ã¡", "á"),
    ("Ã´", "ô"),
];

const TEST_KEYWORDS: &[&str] = &["Ensaio", "Test"];

pub const STATUS_ACTIVE: &str = "Ativo";
pub const STATUS_BLOCKED: &str = "Bloqueado";

/// A raw record that lacked mandatory fields after normalization.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MissingFields {
    pub index: usize,
    pub fields: Vec<InstrumentField>,
}

#[derive(Debug, Clone, Default)]
pub struct NormalizedBatch {
    pub records: Vec<CanonicalRecord>,
    pub skipped: Vec<MissingFields>,
}

/// Converts one raw field map into a canonical record.
///
/// Records missing `name` or `type` are rejected with the list of missing
/// fields; everything else is best effort and never fails.
pub fn normalize(raw: &RawFieldMap) -> Result<CanonicalRecord, Vec<InstrumentField>> {
    let mut record = CanonicalRecord::default();

    for (key, field) in DIRECT_FIELDS {
        if let Some(text) = raw.get(*key).and_then(scalar_text) {
            record.set(*field, &clean_text(&text));
        }
    }

    if let Some(exp_name) = raw.get("exp_name").and_then(scalar_text) {
        let (group, test) = split_experiment(&exp_name);
        if let Some(group) = group {
            record.set(InstrumentField::GroupCode, &group);
        }
        if let Some(test) = test {
            record.set(InstrumentField::TestCode, &test);
        }
    }

    if let Some(status) = raw.get("sensor_status").and_then(status_label) {
        record.set(InstrumentField::Status, status);
    }

    if let Some(expiry) = raw.get("certif_end_date").and_then(scalar_text) {
        record.set(InstrumentField::CertificateExpiry, &normalize_date(&expiry));
    }

    if let Some(interval) = raw.get("inst_range").and_then(operating_interval) {
        record.set(InstrumentField::OperatingInterval, &interval);
    }

    let missing = record.missing_mandatory();
    if missing.is_empty() {
        Ok(record)
    } else {
        Err(missing)
    }
}

/// Normalizes a scraped batch, dropping (and logging) records without a
/// name or type.
pub fn normalize_batch(raws: &[RawFieldMap]) -> NormalizedBatch {
    info!("Normalizing {} scraped instruments", raws.len());
    let mut batch = NormalizedBatch::default();

    for (index, raw) in raws.iter().enumerate() {
        match normalize(raw) {
            Ok(record) => batch.records.push(record),
            Err(fields) => {
                let names: Vec<&str> = fields.iter().map(|f| f.as_str()).collect();
                warn!(
                    "Instrument {} is missing mandatory fields: {}",
                    index + 1,
                    names.join(", ")
                );
                debug!("Skipped raw instrument {}: {:?}", index + 1, raw);
                batch.skipped.push(MissingFields { index, fields });
            }
        }
    }

    info!(
        "Normalization finished: {} kept, {} skipped",
        batch.records.len(),
        batch.skipped.len()
    );
    batch
}

/// Trims and repairs text; blank input becomes the placeholder.
pub fn clean_text(value: &str) -> String {
    let mut text = value.trim().to_string();
    for (broken, fixed) in MOJIBAKE {
        if text.contains(broken) {
            text = text.replace(broken, fixed);
        }
    }
    or_placeholder(&text)
}

/// Any recognized date becomes `YYYY-MM-DD`; anything else the placeholder.
pub fn normalize_date(value: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed == crate::model::PLACEHOLDER {
        return placeholder();
    }
    match parse_date(trimmed) {
        Some(date) => format_canonical(date),
        None => {
            warn!("Unrecognized date format: {}", trimmed);
            placeholder()
        }
    }
}

/// Splits `"[SPG0121] Ensaio 102"` into `("SPG0121", "Ensaio 102")`.
pub fn split_experiment(exp_name: &str) -> (Option<String>, Option<String>) {
    (group_code(exp_name), test_code(exp_name))
}

fn group_code(text: &str) -> Option<String> {
    let mut rest = text;
    while let Some(open) = rest.find('[') {
        let after = &rest[open + 1..];
        let close = after.find(']')?;
        let token = &after[..close];
        if is_group_token(token) {
            return Some(token.to_string());
        }
        rest = &after[close + 1..];
    }
    None
}

fn is_group_token(token: &str) -> bool {
    let letters = token.chars().take_while(|c| c.is_ascii_alphabetic()).count();
    let digits = &token[letters..];
    letters > 0 && !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())
}

fn test_code(text: &str) -> Option<String> {
    TEST_KEYWORDS.iter().find_map(|keyword| {
        text.match_indices(keyword).find_map(|(at, _)| {
            let after = &text[at + keyword.len()..];
            let spaced = after.trim_start();
            if spaced.len() == after.len() {
                return None;
            }
            let digits: String = spaced.chars().take_while(|c| c.is_ascii_digit()).collect();
            if digits.is_empty() {
                None
            } else {
                Some(format!("{} {}", keyword, digits))
            }
        })
    })
}

fn status_label(value: &Value) -> Option<&'static str> {
    let code = match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        Value::Bool(b) => Some(i64::from(*b)),
        _ => None,
    };
    match code {
        Some(1) => Some(STATUS_ACTIVE),
        Some(0) => Some(STATUS_BLOCKED),
        _ => None,
    }
}

fn operating_interval(value: &Value) -> Option<String> {
    let first = value.as_array()?.first()?.as_object()?;
    let min = first
        .get("min")
        .and_then(scalar_text)
        .unwrap_or_else(|| "0".to_string());
    let max = first.get("max").and_then(scalar_text)?;
    let unit = first.get("unit").and_then(scalar_text)?;
    Some(format!("{} - {} {}", min.trim(), max.trim(), unit.trim()))
}

/// Text for scalar JSON values; `None` for null, arrays, objects and blanks.
fn scalar_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => return None,
    };
    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(value: Value) -> RawFieldMap {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn maps_known_fields_and_fills_placeholders() {
        let record = normalize(&raw(json!({
            "name": " Paquímetro 150mm ",
            "type": "Dimensional",
            "brand": "Mitutoyo",
            "serial_num": 12345,
            "certif_num": "CAL-2024-001",
            "certif_end_date": "18/04/2025",
            "exp_name": "[SPG0121] Ensaio 102",
            "sensor_status": 1
        })))
        .unwrap();

        assert_eq!(record.name, "Paquímetro 150mm");
        assert_eq!(record.instrument_type, "Dimensional");
        assert_eq!(record.serial_number, "12345");
        assert_eq!(record.group_code, "SPG0121");
        assert_eq!(record.test_code, "Ensaio 102");
        assert_eq!(record.status, STATUS_ACTIVE);
        assert_eq!(record.certificate_expiry, "2025-04-18");
        assert_eq!(record.model, "-");
        assert_eq!(record.operating_interval, "-");
    }

    #[test]
    fn every_field_honours_the_placeholder_invariant() {
        let record = normalize(&raw(json!({
            "name": "Balança",
            "type": "Massa",
            "brand": "",
            "model": null,
            "location": ["not", "scalar"],
            "unit": "   "
        })))
        .unwrap();

        for field in InstrumentField::ALL {
            let value = record.get(field);
            assert!(!value.is_empty(), "{} is empty", field);
            assert_eq!(value, value.trim(), "{} is padded", field);
        }
        assert_eq!(record.brand, "-");
        assert_eq!(record.model, "-");
        assert_eq!(record.location, "-");
        assert_eq!(record.unit, "-");
    }

    #[test]
    fn repairs_mojibake() {
        assert_eq!(clean_text("TermÃ´metro"), "Termômetro");
        assert_eq!(clean_text("PressÃ£o"), "Pressão");
        assert_eq!(clean_text("CalibraÃ§Ã£o"), "Calibração");
        assert_eq!(clean_text("   "), "-");
    }

    #[test]
    fn status_codes_are_tri_state() {
        let base = json!({"name": "A", "type": "B"});
        let with_status = |status: Value| {
            let mut map = raw(base.clone());
            map.insert("sensor_status".into(), status);
            normalize(&map).unwrap().status
        };

        assert_eq!(with_status(json!(1)), "Ativo");
        assert_eq!(with_status(json!(0)), "Bloqueado");
        assert_eq!(with_status(json!("0")), "Bloqueado");
        assert_eq!(with_status(json!(7)), "-");
        assert_eq!(with_status(Value::Null), "-");
        assert_eq!(normalize(&raw(base)).unwrap().status, "-");
    }

    #[test]
    fn experiment_name_pieces_are_independent() {
        assert_eq!(
            split_experiment("[SPG0121] Ensaio 102"),
            (Some("SPG0121".into()), Some("Ensaio 102".into()))
        );
        assert_eq!(
            split_experiment("[LAB7] Test 3"),
            (Some("LAB7".into()), Some("Test 3".into()))
        );
        assert_eq!(split_experiment("Ensaio 55 sem grupo"), (None, Some("Ensaio 55".into())));
        assert_eq!(split_experiment("[SPG0121] Calibração"), (Some("SPG0121".into()), None));
        assert_eq!(split_experiment("[draft] [SPG9] Ensaio"), (Some("SPG9".into()), None));
        assert_eq!(split_experiment("Ensaio102"), (None, None));
    }

    #[test]
    fn unrecognized_dates_become_placeholder() {
        assert_eq!(normalize_date("next tuesday"), "-");
        assert_eq!(normalize_date(""), "-");
        assert_eq!(normalize_date("2024/12/01 08:00:00"), "2024-12-01");
    }

    #[test]
    fn operating_interval_needs_max_and_unit() {
        let build = |range: Value| {
            let mut map = raw(json!({"name": "A", "type": "B"}));
            map.insert("inst_range".into(), range);
            normalize(&map).unwrap().operating_interval
        };

        assert_eq!(build(json!([{"min": 10, "max": 200, "unit": "°C"}])), "10 - 200 °C");
        assert_eq!(build(json!([{"max": "5", "unit": "bar"}])), "0 - 5 bar");
        assert_eq!(build(json!([{"min": 1, "max": 5}])), "-");
        assert_eq!(build(json!([])), "-");
        assert_eq!(build(json!({"max": 5, "unit": "bar"})), "-");
    }

    #[test]
    fn batch_drops_records_without_name_or_type() {
        let raws = vec![
            raw(json!({"name": "Ok", "type": "Temp"})),
            raw(json!({"name": "No type"})),
            raw(json!({"type": "No name", "brand": "X"})),
        ];

        let batch = normalize_batch(&raws);
        assert_eq!(batch.records.len(), 1);
        assert_eq!(
            batch.skipped,
            vec![
                MissingFields { index: 1, fields: vec![InstrumentField::Type] },
                MissingFields { index: 2, fields: vec![InstrumentField::Name] },
            ]
        );
    }

    #[test]
    fn normalization_is_pure() {
        let input = raw(json!({"name": "A", "type": "B", "certif_end_date": "01-02-2026"}));
        let before = input.clone();
        let first = normalize(&input).unwrap();
        let second = normalize(&input).unwrap();
        assert_eq!(first, second);
        assert_eq!(input, before);
        assert_eq!(first.certificate_expiry, "2026-02-01");
    }
}
