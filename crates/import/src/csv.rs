use bookkeeper_core::Transaction;
use chrono::NaiveDate;
use encoding_rs::Encoding;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::str::FromStr;
use thiserror::Error;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Zero-based column positions of the transaction fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMapping {
    pub booking_date: usize,
    pub valuta_date: usize,
    pub recipient: usize,
    pub booking_text: usize,
    pub purpose: usize,
    pub balance: usize,
    pub amount: usize,
}

impl ColumnMapping {
    fn iter(&self) -> impl Iterator<Item = (&'static str, usize)> {
        [
            ("booking_date", self.booking_date),
            ("valuta_date", self.valuta_date),
            ("recipient", self.recipient),
            ("booking_text", self.booking_text),
            ("purpose", self.purpose),
            ("balance", self.balance),
            ("amount", self.amount),
        ]
        .into_iter()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NumberFormat {
    pub decimal_separator: char,
    pub thousands_separator: char,
}

impl Default for NumberFormat {
    fn default() -> Self {
        Self {
            decimal_separator: '.',
            thousands_separator: ',',
        }
    }
}

/// Layout of one bank's statement export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileFormatSpec {
    /// Taken from the table key when loaded from settings.
    #[serde(default)]
    pub name: String,
    pub delimiter: char,
    /// WHATWG encoding label; `None` means the bytes are UTF-8 already.
    #[serde(default)]
    pub encoding: Option<String>,
    pub has_header: bool,
    pub fields_per_record: usize,
    /// chrono `strftime` pattern.
    pub date_format: String,
    #[serde(default)]
    pub number_format: NumberFormat,
    pub columns: ColumnMapping,
}

impl FileFormatSpec {
    /// ING (Germany) giro account export.
    pub fn ing() -> Self {
        Self {
            name: "ing".to_string(),
            delimiter: ';',
            encoding: Some("windows-1252".to_string()),
            has_header: true,
            fields_per_record: 9,
            date_format: "%d.%m.%Y".to_string(),
            number_format: NumberFormat {
                decimal_separator: ',',
                thousands_separator: '.',
            },
            columns: ColumnMapping {
                booking_date: 0,
                valuta_date: 1,
                recipient: 2,
                booking_text: 3,
                purpose: 4,
                balance: 5,
                amount: 7,
            },
        }
    }

    pub fn builtin(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "ing" => Some(Self::ing()),
            _ => None,
        }
    }

    pub fn validate(&self) -> Result<(), FormatError> {
        if !self.delimiter.is_ascii() {
            return Err(FormatError::InvalidDelimiter(self.delimiter));
        }
        for (field, column) in self.columns.iter() {
            if column >= self.fields_per_record {
                return Err(FormatError::ColumnOutOfRange {
                    field,
                    column,
                    fields_per_record: self.fields_per_record,
                });
            }
        }
        self.resolve_encoding().map(|_| ())
    }

    fn resolve_encoding(&self) -> Result<Option<&'static Encoding>, FormatError> {
        self.encoding
            .as_deref()
            .map(|label| {
                Encoding::for_label(label.trim().as_bytes())
                    .ok_or_else(|| FormatError::UnknownEncoding(label.to_string()))
            })
            .transpose()
    }
}

#[derive(Error, Debug)]
pub enum FormatError {
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("could not decode input as {0}")]
    Decode(&'static str),
    #[error("unknown encoding: {0}")]
    UnknownEncoding(String),
    #[error("delimiter {0:?} is not a single ASCII character")]
    InvalidDelimiter(char),
    #[error("column {column} for {field} exceeds {fields_per_record} fields per record")]
    ColumnOutOfRange {
        field: &'static str,
        column: usize,
        fields_per_record: usize,
    },
    #[error("line {line}: invalid date {value:?}")]
    InvalidDate { line: u64, value: String },
    #[error("line {line}: {field} is empty")]
    MissingField { line: u64, field: &'static str },
    #[error("line {line}: invalid {field} {value:?}")]
    InvalidNumber {
        line: u64,
        field: &'static str,
        value: String,
    },
}

/// Parses a statement export into transactions in file order.
///
/// Rows whose field count differs from `fields_per_record` are dropped
/// silently. With `has_header` the first row of the right width is dropped
/// too, whatever it contains. Any malformed field in a data row fails the
/// whole file.
pub fn parse(data: &[u8], format: &FileFormatSpec) -> Result<Vec<Transaction>, FormatError> {
    format.validate()?;
    let text = decode(data, format)?;

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(format.delimiter as u8)
        .from_reader(text.as_bytes());

    let mut transactions = Vec::new();
    let mut header_skipped = !format.has_header;

    for result in reader.records() {
        let record = result?;
        if record.len() != format.fields_per_record {
            continue;
        }
        if !header_skipped {
            header_skipped = true;
            continue;
        }
        let line = record.position().map(|p| p.line()).unwrap_or_default();
        transactions.push(parse_record(&record, line, format)?);
    }

    Ok(transactions)
}

fn decode<'a>(data: &'a [u8], format: &FileFormatSpec) -> Result<Cow<'a, str>, FormatError> {
    match format.resolve_encoding()? {
        Some(encoding) => encoding
            .decode_without_bom_handling_and_without_replacement(data)
            .ok_or(FormatError::Decode(encoding.name())),
        None => {
            let data = data.strip_prefix(UTF8_BOM).unwrap_or(data);
            std::str::from_utf8(data)
                .map(Cow::Borrowed)
                .map_err(|_| FormatError::Decode("UTF-8"))
        }
    }
}

fn parse_record(
    record: &csv::StringRecord,
    line: u64,
    format: &FileFormatSpec,
) -> Result<Transaction, FormatError> {
    let columns = &format.columns;
    let field = |col: usize| record.get(col).unwrap_or_default();

    let booking_date = parse_date(field(columns.booking_date), &format.date_format, line)?;
    let valuta_date = parse_date(field(columns.valuta_date), &format.date_format, line)?;

    let recipient = optional(field(columns.recipient));

    let booking_text = field(columns.booking_text);
    if booking_text.is_empty() {
        return Err(FormatError::MissingField {
            line,
            field: "booking text",
        });
    }

    let purpose = optional(field(columns.purpose));

    let balance = parse_amount(field(columns.balance), &format.number_format, line, "balance")?;
    let amount = parse_amount(field(columns.amount), &format.number_format, line, "amount")?;

    Ok(Transaction {
        id: None,
        booking_date,
        valuta_date,
        recipient,
        booking_text: booking_text.to_string(),
        purpose,
        balance,
        amount,
        category: None,
        hidden: false,
    })
}

fn optional(s: &str) -> Option<String> {
    (!s.is_empty()).then(|| s.to_string())
}

fn parse_date(s: &str, format: &str, line: u64) -> Result<NaiveDate, FormatError> {
    NaiveDate::parse_from_str(s.trim(), format).map_err(|_| FormatError::InvalidDate {
        line,
        value: s.to_string(),
    })
}

fn parse_amount(
    s: &str,
    number_format: &NumberFormat,
    line: u64,
    field: &'static str,
) -> Result<Decimal, FormatError> {
    if s.trim().is_empty() {
        return Err(FormatError::MissingField { line, field });
    }
    let normalized: String = s
        .trim()
        .chars()
        .filter(|&c| c != number_format.thousands_separator)
        .map(|c| if c == number_format.decimal_separator { '.' } else { c })
        .collect();
    Decimal::from_str(&normalized).map_err(|_| FormatError::InvalidNumber {
        line,
        field,
        value: s.to_string(),
    })
}
