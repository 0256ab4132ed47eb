use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::category::{Category, CategoryId, MappingField};
use super::fingerprint::Fingerprint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(pub i64);

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One row of a bank statement.
///
/// `booking_text` and `amount` are always present; a negative amount is a
/// debit, anything else a credit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: Option<TransactionId>,
    pub booking_date: NaiveDate,
    pub valuta_date: NaiveDate,
    pub recipient: Option<String>,
    pub booking_text: String,
    pub purpose: Option<String>,
    pub balance: Decimal,
    pub amount: Decimal,
    pub category: Option<Category>,
    pub hidden: bool,
}

impl Transaction {
    pub fn new(booking_date: NaiveDate, booking_text: &str, amount: Decimal) -> Self {
        Transaction {
            id: None,
            booking_date,
            valuta_date: booking_date,
            recipient: None,
            booking_text: booking_text.to_string(),
            purpose: None,
            balance: Decimal::ZERO,
            amount,
            category: None,
            hidden: false,
        }
    }

    /// Text of the given field, `None` when the optional field is absent.
    pub fn field(&self, field: MappingField) -> Option<&str> {
        match field {
            MappingField::Recipient => self.recipient.as_deref(),
            MappingField::BookingText => Some(&self.booking_text),
            MappingField::Purpose => self.purpose.as_deref(),
        }
    }

    pub fn is_debit(&self) -> bool {
        self.amount.is_sign_negative() && !self.amount.is_zero()
    }

    pub fn is_credit(&self) -> bool {
        !self.is_debit()
    }

    pub fn category_id(&self) -> Option<CategoryId> {
        self.category.as_ref().map(|c| c.id)
    }

    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::of(self)
    }
}

/// Partial update of the user-editable flags of a stored transaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionPatch {
    #[serde(rename = "categoryID")]
    pub category_id: Option<CategoryId>,
    pub hidden: Option<bool>,
}

impl TransactionPatch {
    pub fn is_empty(&self) -> bool {
        self.category_id.is_none() && self.hidden.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionList {
    pub items: Vec<Transaction>,
    pub total: usize,
    pub sum: Decimal,
}

impl TransactionList {
    pub fn new(items: Vec<Transaction>) -> Self {
        let sum = items.iter().map(|t| t.amount).sum();
        TransactionList {
            total: items.len(),
            sum,
            items,
        }
    }
}
