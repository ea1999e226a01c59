//! # Request Value Objects
//!
//! `PaymentRequest` and `RefundRequest` are validated explicitly: `validate()`
//! returns the list of violations and never fails on its own, so callers
//! decide whether to reject synchronously.

use crate::money::Currency;
use crate::provider::ProviderKey;
use chrono::{DateTime, Utc};
use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::LazyLock;

// Dot-atom local part and hostname labels from RFC 5321/5322, without quoted strings.
static EMAIL_RE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"^[A-Za-z0-9!#$%&'*+/=?^_`{|}~-]+(\.[A-Za-z0-9!#$%&'*+/=?^_`{|}~-]+)*@([A-Za-z0-9]([A-Za-z0-9-]{0,61}[A-Za-z0-9])?\.)+[A-Za-z]{2,63}$",
    )
    .ok()
});

/// True if `email` is a syntactically valid mailbox address
pub fn is_valid_email(email: &str) -> bool {
    email.len() <= 254
        && email.split('@').next().is_some_and(|local| local.len() <= 64)
        && EMAIL_RE.as_ref().is_some_and(|re| re.is_match(email))
}

/// Reference to a business entity a payment is attached to (order, invoice, ...)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub kind: String,
    pub id: String,
}

impl EntityRef {
    pub fn new(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: id.into(),
        }
    }

    pub fn order(id: impl Into<String>) -> Self {
        Self::new("order", id)
    }
}

/// A request to take a payment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub amount: Decimal,
    pub currency: Currency,
    pub customer_email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Explicit provider override
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderKey>,
    /// Country used for provider routing when no override is set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub save_token: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub linked_entity: Option<EntityRef>,
    /// When the payment was first requested; retry eligibility is measured from here
    pub requested_at: DateTime<Utc>,
}

impl PaymentRequest {
    pub fn builder() -> PaymentRequestBuilder {
        PaymentRequestBuilder::default()
    }

    /// Collect every violation; an empty list means the request is valid
    pub fn validate(&self) -> Vec<String> {
        let mut violations = Vec::new();

        if self.amount <= Decimal::ZERO {
            violations.push("amount must be greater than zero".to_string());
        } else if self.amount.scale() > self.currency.decimal_places()
            && self.currency.round(self.amount) != self.amount
        {
            violations.push(format!(
                "amount has more than {} decimal places for {}",
                self.currency.decimal_places(),
                self.currency
            ));
        }

        if self.customer_email.trim().is_empty() {
            violations.push("customer email is required".to_string());
        } else if !is_valid_email(&self.customer_email) {
            violations.push(format!("customer email '{}' is not valid", self.customer_email));
        }

        if let Some(country) = &self.country {
            if country.len() != 2 || !country.chars().all(|c| c.is_ascii_alphabetic()) {
                violations.push(format!("country '{}' is not an ISO 3166 alpha-2 code", country));
            }
        }

        if let Some(entity) = &self.linked_entity {
            if entity.id.trim().is_empty() {
                violations.push("linked entity id must not be empty".to_string());
            }
        }

        violations
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_empty()
    }
}

/// Builder for [`PaymentRequest`]
#[derive(Debug, Default)]
pub struct PaymentRequestBuilder {
    amount: Decimal,
    currency: Currency,
    customer_email: String,
    customer_name: Option<String>,
    description: Option<String>,
    provider: Option<ProviderKey>,
    country: Option<String>,
    metadata: BTreeMap<String, String>,
    save_token: bool,
    linked_entity: Option<EntityRef>,
    requested_at: Option<DateTime<Utc>>,
}

impl PaymentRequestBuilder {
    pub fn amount(mut self, amount: Decimal) -> Self {
        self.amount = amount;
        self
    }

    pub fn currency(mut self, currency: Currency) -> Self {
        self.currency = currency;
        self
    }

    pub fn customer_email(mut self, email: impl Into<String>) -> Self {
        self.customer_email = email.into();
        self
    }

    pub fn customer_name(mut self, name: impl Into<String>) -> Self {
        self.customer_name = Some(name.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn provider(mut self, provider: ProviderKey) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn country(mut self, country: impl Into<String>) -> Self {
        self.country = Some(country.into().to_ascii_uppercase());
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn save_token(mut self, save: bool) -> Self {
        self.save_token = save;
        self
    }

    pub fn linked_entity(mut self, entity: EntityRef) -> Self {
        self.linked_entity = Some(entity);
        self
    }

    pub fn requested_at(mut self, at: DateTime<Utc>) -> Self {
        self.requested_at = Some(at);
        self
    }

    /// Build the request without validating it
    pub fn build(self) -> PaymentRequest {
        PaymentRequest {
            amount: self.amount,
            currency: self.currency,
            customer_email: self.customer_email,
            customer_name: self.customer_name,
            description: self.description,
            provider: self.provider,
            country: self.country,
            metadata: self.metadata,
            save_token: self.save_token,
            linked_entity: self.linked_entity,
            requested_at: self.requested_at.unwrap_or_else(Utc::now),
        }
    }
}

/// A request to refund all or part of a prior successful transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefundRequest {
    pub original_transaction_id: String,
    pub amount: Decimal,
    pub currency: Currency,
    pub reason: String,
    pub partial: bool,
}

impl RefundRequest {
    pub fn new(
        original_transaction_id: impl Into<String>,
        amount: Decimal,
        currency: Currency,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            original_transaction_id: original_transaction_id.into(),
            amount,
            currency,
            reason: reason.into(),
            partial: false,
        }
    }

    /// Builder: mark as a partial refund
    pub fn partial(mut self, partial: bool) -> Self {
        self.partial = partial;
        self
    }

    pub fn validate(&self) -> Vec<String> {
        let mut violations = Vec::new();
        if self.original_transaction_id.trim().is_empty() {
            violations.push("original transaction id is required".to_string());
        }
        if self.amount <= Decimal::ZERO {
            violations.push("refund amount must be greater than zero".to_string());
        }
        if self.reason.trim().is_empty() {
            violations.push("refund reason is required".to_string());
        }
        violations
    }
}
