use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use super::transaction::Transaction;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// SHA-256 content digest of a transaction, rendered as 64 lowercase hex chars.
///
/// Covers booking date, valuta date, recipient, booking text, purpose,
/// balance and amount. Id, category and hidden flag are excluded so that
/// editing them never changes a transaction's identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn of(tx: &Transaction) -> Self {
        let mut hasher = Sha256::new();
        write_field(&mut hasher, Some(&tx.booking_date.format(DATE_FORMAT).to_string()));
        write_field(&mut hasher, Some(&tx.valuta_date.format(DATE_FORMAT).to_string()));
        write_field(&mut hasher, tx.recipient.as_deref());
        write_field(&mut hasher, Some(&tx.booking_text));
        write_field(&mut hasher, tx.purpose.as_deref());
        write_field(&mut hasher, Some(&tx.balance.normalize().to_string()));
        write_field(&mut hasher, Some(&tx.amount.normalize().to_string()));
        Fingerprint(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// Tag byte + length prefix keep the encoding unambiguous: an absent field
// never collides with an empty one, and no field can bleed into the next.
fn write_field(hasher: &mut Sha256, value: Option<&str>) {
    match value {
        None => hasher.update([0u8]),
        Some(text) => {
            hasher.update([1u8]);
            hasher.update((text.len() as u64).to_be_bytes());
            hasher.update(text.as_bytes());
        }
    }
}
