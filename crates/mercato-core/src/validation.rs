//! # Validation Module
//!
//! Boundary checks run once, before a command reaches its state machine.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: Deserialization (serde)                                      │
//! │  └── Tagged command shapes, required fields present                    │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: THIS MODULE                                                  │
//! │  └── Formats, ranges, duplicates inside one request                    │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: State machines (machines::*)                                 │
//! │  └── Legality of the action from the current state                     │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 4: Database (SQLite)                                            │
//! │  └── UNIQUE / partial UNIQUE constraints for races                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::HashSet;

use crate::error::ValidationError;
use crate::money::Money;

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Largest quantity a single line may carry.
pub const MAX_LINE_QUANTITY: i64 = 100_000;

/// Longest accepted idempotency key.
pub const MAX_IDEMPOTENCY_KEY_LEN: usize = 128;

// =============================================================================
// String Validators
// =============================================================================

fn require_text(field: &str, value: &str, max: usize) -> ValidationResult<()> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ValidationError::required(field));
    }
    if value.len() > max {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max,
        });
    }
    Ok(())
}

/// Validates a SKU.
///
/// ## Rules
/// - 1 to 64 characters
/// - Alphanumeric, hyphens, underscores, dots
pub fn validate_sku(sku: &str) -> ValidationResult<()> {
    require_text("sku", sku, 64)?;
    if !sku
        .trim()
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
    {
        return Err(ValidationError::InvalidFormat {
            field: "sku".to_string(),
            reason: "only letters, digits, '-', '_' and '.' are allowed".to_string(),
        });
    }
    Ok(())
}

/// Validates an EPC.
///
/// Tag readers emit hex; generated replacement labels are UUIDs. Both are
/// accepted, so the rule is: 8 to 64 characters of hex digits and hyphens.
pub fn validate_epc(epc: &str) -> ValidationResult<()> {
    let epc = epc.trim();
    if epc.is_empty() {
        return Err(ValidationError::required("epc"));
    }
    if epc.len() < 8 || epc.len() > 64 {
        return Err(ValidationError::InvalidFormat {
            field: "epc".to_string(),
            reason: "must be 8 to 64 characters".to_string(),
        });
    }
    if !epc.chars().all(|c| c.is_ascii_hexdigit() || c == '-') {
        return Err(ValidationError::InvalidFormat {
            field: "epc".to_string(),
            reason: "must be hexadecimal".to_string(),
        });
    }
    Ok(())
}

/// Validates a client-supplied idempotency key.
pub fn validate_idempotency_key(key: &str) -> ValidationResult<()> {
    require_text("idempotency_key", key, MAX_IDEMPOTENCY_KEY_LEN)?;
    if key.chars().any(|c| c.is_control() || c.is_whitespace()) {
        return Err(ValidationError::InvalidFormat {
            field: "idempotency_key".to_string(),
            reason: "must not contain whitespace".to_string(),
        });
    }
    Ok(())
}

/// Validates a body-level transaction id.
pub fn validate_transaction_id(transaction_id: &str) -> ValidationResult<()> {
    require_text("transaction_id", transaction_id, 128)
}

/// Validates a free-text reason (forced day close, cash movements).
pub fn validate_reason(reason: Option<&str>) -> ValidationResult<&str> {
    match reason.map(str::trim) {
        Some(r) if !r.is_empty() => {
            require_text("reason", r, 500)?;
            Ok(r)
        }
        _ => Err(ValidationError::required("reason")),
    }
}

/// Validates a store or location id reference.
pub fn validate_store_id(field: &str, store_id: &str) -> ValidationResult<()> {
    require_text(field, store_id, 64)
}

/// Validates a pool name.
pub fn validate_pool(pool: &str) -> ValidationResult<()> {
    require_text("pool", pool, 32)
}

// =============================================================================
// Numeric Validators
// =============================================================================

/// Validates a line quantity.
pub fn validate_quantity(qty: i64) -> ValidationResult<()> {
    if qty <= 0 {
        return Err(ValidationError::must_be_positive("qty"));
    }
    if qty > MAX_LINE_QUANTITY {
        return Err(ValidationError::OutOfRange {
            field: "qty".to_string(),
            min: 1,
            max: MAX_LINE_QUANTITY,
        });
    }
    Ok(())
}

/// Validates a strictly positive amount.
pub fn validate_positive_amount(field: &str, amount: Money) -> ValidationResult<()> {
    if !amount.is_positive() {
        return Err(ValidationError::must_be_positive(field));
    }
    Ok(())
}

/// Validates an amount that may be zero but not negative.
pub fn validate_non_negative_amount(field: &str, amount: Money) -> ValidationResult<()> {
    if amount.is_negative() {
        return Err(ValidationError::OutOfRange {
            field: field.to_string(),
            min: 0,
            max: i64::MAX,
        });
    }
    Ok(())
}

// =============================================================================
// Collection Validators
// =============================================================================

/// Rejects the first value that appears twice.
pub fn validate_unique<'a, I>(field: &str, values: I) -> ValidationResult<()>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut seen = HashSet::new();
    for value in values {
        if !seen.insert(value) {
            return Err(ValidationError::Duplicate {
                field: field.to_string(),
                value: value.to_string(),
            });
        }
    }
    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================
