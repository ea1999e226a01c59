//! # Gateway Adapter
//!
//! One [`PaymentProvider`] implementation driven by a [`ProviderProfile`].
//! The adapter owns request construction, authentication, amount encoding,
//! response normalization and webhook parsing; the profile only says where
//! things are.

use crate::config::ProviderCredentials;
use crate::http::{header_map, ProviderHttp};
use crate::profile::{AmountUnit, AuthScheme, Endpoint, HttpMethod, ProviderProfile, TransactionFields};
use crate::signature;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pay_core::{
    parse_amount, CatalogItem, Currency, InboundWebhook, PaymentError, PaymentProvider,
    PaymentResult, ProviderCheckout, ProviderInfo, ProviderKey, SessionParams, TransactionData,
    TransactionQuery, TransactionStatus,
};
use rust_decimal::Decimal;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::{debug, info, instrument, warn};

/// Provider adapter built from a static profile and runtime credentials
pub struct GatewayAdapter {
    profile: &'static ProviderProfile,
    credentials: ProviderCredentials,
    http: ProviderHttp,
}

impl GatewayAdapter {
    /// Create an adapter; fails with `Configuration` if a required field is missing.
    pub fn new(profile: &'static ProviderProfile, credentials: ProviderCredentials) -> PaymentResult<Self> {
        credentials.ensure_complete(profile)?;

        let headers = header_map(auth_headers(profile, &credentials))?;
        let base_url = credentials
            .base_url
            .clone()
            .unwrap_or_else(|| profile.base_url.to_string());
        let http = ProviderHttp::new(
            profile.key,
            base_url,
            profile.timeout,
            profile.http_retries,
            headers,
        )?;

        Ok(Self::with_http(profile, credentials, http))
    }

    /// Create an adapter around an existing HTTP helper
    pub fn with_http(
        profile: &'static ProviderProfile,
        credentials: ProviderCredentials,
        http: ProviderHttp,
    ) -> Self {
        Self {
            profile,
            credentials,
            http,
        }
    }

    /// Create from `{PREFIX}_*` environment variables
    pub fn from_env(profile: &'static ProviderProfile) -> PaymentResult<Self> {
        let credentials = ProviderCredentials::from_env(profile)?;
        Self::new(profile, credentials)
    }

    pub fn profile(&self) -> &'static ProviderProfile {
        self.profile
    }

    /// Credential pairs merged into bodies (POST) or queries (GET)
    fn inline_auth(&self) -> Vec<(String, String)> {
        match self.profile.auth {
            AuthScheme::BodyFields(pairs) => pairs
                .iter()
                .filter_map(|(wire, field)| {
                    self.credentials
                        .get(field)
                        .map(|v| (wire.to_string(), v.to_string()))
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    fn encode_amount(&self, amount: Decimal, currency: Currency) -> PaymentResult<Value> {
        match self.profile.amount_unit {
            AmountUnit::Major => Ok(Value::String(format!(
                "{:.*}",
                currency.decimal_places() as usize,
                amount
            ))),
            AmountUnit::Minor => currency
                .to_minor_units(amount)
                .map(Value::from)
                .ok_or_else(|| PaymentError::Validation(vec![format!("amount {} is out of range", amount)])),
        }
    }

    fn decode_amount(&self, value: &Value, currency: Currency) -> Option<Decimal> {
        match self.profile.amount_unit {
            AmountUnit::Major => parse_amount(value),
            AmountUnit::Minor => {
                let minor = match value {
                    Value::Number(n) => n.as_i64(),
                    Value::String(s) => s.trim().parse().ok(),
                    _ => None,
                };
                minor.map(|m| currency.from_minor_units(m))
            }
        }
    }

    /// Send a request to `endpoint` and return the body of a 2xx response.
    async fn call(
        &self,
        endpoint: Endpoint,
        id: Option<&str>,
        reference: Option<&str>,
        mut query: Vec<(String, String)>,
        body: Option<Map<String, Value>>,
    ) -> PaymentResult<Value> {
        let path = endpoint.render(id, reference);
        let body = match endpoint.method {
            HttpMethod::Post => {
                let mut body = body.unwrap_or_default();
                for (k, v) in self.inline_auth() {
                    body.insert(k, Value::String(v));
                }
                Some(Value::Object(body))
            }
            HttpMethod::Get => {
                query.extend(self.inline_auth());
                None
            }
        };

        let response = self
            .http
            .send(endpoint.method, &path, &query, body.as_ref())
            .await?;

        if response.is_success() {
            Ok(response.body)
        } else {
            Err(self.error_from_response(response.status, &response.body, id.or(reference)))
        }
    }

    fn error_from_response(&self, status: u16, body: &Value, subject: Option<&str>) -> PaymentError {
        let errors = &self.profile.errors;
        let message = str_at(body, errors.message).unwrap_or_else(|| format!("HTTP {}", status));

        match (status, subject) {
            (401 | 403, _) => PaymentError::Configuration(format!(
                "{} rejected the configured credentials: {}",
                self.profile.key, message
            )),
            (404, Some(subject)) => PaymentError::TransactionNotFound {
                transaction_id: subject.to_string(),
            },
            _ => PaymentError::Declined {
                provider: self.profile.key.to_string(),
                code: str_at(body, errors.code)
                    .map(|c| self.profile.map_error_code(&c))
                    .unwrap_or_else(|| format!("http_{}", status)),
                message,
            },
        }
    }

    /// Reject a 2xx body that still reports an API error code
    fn ensure_accepted(&self, doc: &Value) -> PaymentResult<()> {
        let errors = &self.profile.errors;
        match str_at(doc, errors.code) {
            Some(code) if errors.ok_codes.is_empty() || !errors.ok_codes.contains(&code.as_str()) => {
                Err(PaymentError::Declined {
                    provider: self.profile.key.to_string(),
                    code: self.profile.map_error_code(&code),
                    message: str_at(doc, errors.message).unwrap_or_else(|| format!("code {}", code)),
                })
            }
            _ => Ok(()),
        }
    }

    fn malformed(&self, what: &str) -> PaymentError {
        PaymentError::Serialization(format!("{} response is missing {}", self.profile.key, what))
    }

    /// Normalize the transaction found under `fields.root` in `doc`
    fn normalize(&self, doc: &Value, fields: &TransactionFields) -> PaymentResult<TransactionData> {
        let object = if fields.root.is_empty() {
            doc
        } else {
            doc.pointer(fields.root)
                .ok_or_else(|| self.malformed(fields.root))?
        };
        self.normalize_object(object, fields, doc)
    }

    fn normalize_object(
        &self,
        obj: &Value,
        fields: &TransactionFields,
        raw: &Value,
    ) -> PaymentResult<TransactionData> {
        let profile = self.profile;
        let id = str_at(obj, fields.id).ok_or_else(|| self.malformed("transaction id"))?;
        let code = str_at(obj, fields.status).ok_or_else(|| self.malformed("status"))?;
        let status = profile.map_status(&code);

        let currency = fields
            .currency
            .and_then(|p| str_at(obj, p))
            .and_then(|c| c.parse::<Currency>().ok())
            .unwrap_or(profile.default_currency);
        let amount = obj
            .pointer(fields.amount)
            .and_then(|v| self.decode_amount(v, currency))
            .ok_or_else(|| self.malformed("amount"))?;

        let mut tx = TransactionData::new(id, profile.key, amount, currency, status)
            .with_raw(raw.clone())
            .with_metadata("provider_status", code.clone());

        tx.reference = str_at(obj, fields.reference);
        tx.customer_email = fields.email.and_then(|p| str_at(obj, p));
        tx.customer_name = fields.name.and_then(|p| str_at(obj, p));
        tx.authorization_code = fields.authorization_code.and_then(|p| str_at(obj, p));
        if let Some(created) = fields.created_at.and_then(|p| time_at(obj, p)) {
            tx.created_at = created;
        }
        if let Some(refunded) = fields
            .refunded_amount
            .and_then(|p| obj.pointer(p))
            .and_then(|v| self.decode_amount(v, currency))
        {
            tx.refunded_amount = refunded;
        }
        if fields.requires_3ds.is_some_and(|p| bool_at(obj, p)) {
            tx.metadata.insert("requires_3ds".into(), "true".into());
        }

        if status.is_failure() {
            // Codes outside the status table are decline codes
            let known = profile.statuses.iter().any(|(c, _)| c.eq_ignore_ascii_case(&code));
            if !known {
                tx.metadata
                    .insert("error_code".into(), profile.map_error_code(&code));
            }
            tx.failure_reason = fields
                .failure_reason
                .and_then(|p| str_at(obj, p))
                .or_else(|| Some(format!("{} status {}", profile.key, code)));
        }

        Ok(tx)
    }
}

fn auth_headers(profile: &ProviderProfile, credentials: &ProviderCredentials) -> Vec<(&'static str, String)> {
    match profile.auth {
        AuthScheme::Bearer { field } => credentials
            .get(field)
            .map(|v| vec![("authorization", format!("Bearer {}", v))])
            .unwrap_or_default(),
        AuthScheme::Headers(pairs) => pairs
            .iter()
            .filter_map(|(name, field)| credentials.get(field).map(|v| (*name, v.to_string())))
            .collect(),
        AuthScheme::BodyFields(_) => Vec::new(),
    }
}

/// String at `pointer`; numbers and booleans are rendered as text
fn str_at(doc: &Value, pointer: &str) -> Option<String> {
    match doc.pointer(pointer)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn bool_at(doc: &Value, pointer: &str) -> bool {
    match doc.pointer(pointer) {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => matches!(s.as_str(), "1" | "true" | "yes"),
        Some(Value::Number(n)) => n.as_i64() == Some(1),
        _ => false,
    }
}

/// Unix seconds or RFC 3339
fn time_at(doc: &Value, pointer: &str) -> Option<DateTime<Utc>> {
    match doc.pointer(pointer)? {
        Value::Number(n) => n.as_i64().and_then(|ts| DateTime::from_timestamp(ts, 0)),
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|t| t.with_timezone(&Utc))
            .or_else(|| s.parse::<i64>().ok().and_then(|ts| DateTime::from_timestamp(ts, 0))),
        _ => None,
    }
}

#[async_trait]
impl PaymentProvider for GatewayAdapter {
    fn key(&self) -> ProviderKey {
        self.profile.key
    }

    #[instrument(skip(self, params), fields(provider = %self.profile.key, reference = %params.reference))]
    async fn create_session(&self, params: &SessionParams) -> PaymentResult<ProviderCheckout> {
        if !self.profile.supports_currency(params.currency) {
            return Err(PaymentError::Validation(vec![format!(
                "currency {} is not supported by {}",
                params.currency, self.profile.key
            )]));
        }

        let req = &self.profile.request;
        let mut body = Map::new();
        body.insert(req.amount.into(), self.encode_amount(params.amount, params.currency)?);
        body.insert(req.currency.into(), Value::String(params.currency.to_string()));
        body.insert(req.reference.into(), Value::String(params.reference.clone()));
        body.insert(req.email.into(), Value::String(params.customer_email.clone()));
        if let Some(name) = &params.customer_name {
            body.insert(req.name.into(), Value::String(name.clone()));
        }
        if let Some(description) = &params.description {
            body.insert(req.description.into(), Value::String(description.clone()));
        }
        if let Some(url) = &params.return_url {
            body.insert(req.return_url.into(), Value::String(url.clone()));
        }
        if let (Some(key), true) = (req.save_token, params.save_token) {
            body.insert(key.into(), Value::Bool(true));
        }
        if let (Some(key), false) = (req.metadata, params.metadata.is_empty()) {
            body.insert(key.into(), serde_json::to_value(&params.metadata)?);
        }

        debug!("Creating checkout session: {} fields", body.len());

        let doc = self
            .call(self.profile.endpoints.create_session, None, None, Vec::new(), Some(body))
            .await?;
        self.ensure_accepted(&doc)?;

        let fields = &self.profile.session;
        let provider_reference = str_at(&doc, fields.provider_reference);
        let checkout_url = str_at(&doc, fields.checkout_url);
        if provider_reference.is_none() && checkout_url.is_none() {
            return Err(self.malformed("session reference and checkout url"));
        }

        info!(
            provider_reference = provider_reference.as_deref().unwrap_or("-"),
            "Checkout session created"
        );

        Ok(ProviderCheckout {
            provider_reference,
            checkout_url,
            token: fields.token.and_then(|p| str_at(&doc, p)),
            expires_at: fields.expires_at.and_then(|p| time_at(&doc, p)),
            raw: doc,
        })
    }

    #[instrument(skip(self), fields(provider = %self.profile.key))]
    async fn verify(&self, reference: &str) -> PaymentResult<TransactionData> {
        let doc = self
            .call(self.profile.endpoints.verify, None, Some(reference), Vec::new(), None)
            .await?;
        let mut tx = self.normalize(&doc, &self.profile.transaction)?;
        if tx.reference.is_none() {
            tx.reference = Some(reference.to_string());
        }
        Ok(tx)
    }

    #[instrument(skip(self), fields(provider = %self.profile.key))]
    async fn get_transaction(&self, transaction_id: &str) -> PaymentResult<TransactionData> {
        let doc = self
            .call(self.profile.endpoints.transaction, Some(transaction_id), None, Vec::new(), None)
            .await?;
        self.normalize(&doc, &self.profile.transaction)
    }

    /// Refund amounts are encoded with the profile's default currency precision.
    #[instrument(skip(self), fields(provider = %self.profile.key))]
    async fn refund(
        &self,
        transaction_id: &str,
        amount: Option<Decimal>,
    ) -> PaymentResult<TransactionData> {
        if !self.profile.supports_refunds {
            return Err(PaymentError::Unsupported {
                provider: self.profile.key.to_string(),
                operation: "refund".to_string(),
            });
        }

        let mut body = Map::new();
        if let Some(amount) = amount {
            body.insert(
                self.profile.request.refund_amount.into(),
                self.encode_amount(amount, self.profile.default_currency)?,
            );
        }

        let doc = self
            .call(self.profile.endpoints.refund, Some(transaction_id), None, Vec::new(), Some(body))
            .await?;
        self.ensure_accepted(&doc)?;

        let mut tx = self.normalize(&doc, &self.profile.transaction)?;
        tx.transaction_id = transaction_id.to_string();
        if let Some(amount) = amount {
            if tx.refunded_amount.is_zero() {
                tx.refunded_amount = amount;
            }
        }
        if tx.status == TransactionStatus::Success {
            tx.status = match amount {
                Some(a) if a < tx.amount => TransactionStatus::PartiallyRefunded,
                _ => TransactionStatus::Refunded,
            };
            if tx.status == TransactionStatus::Refunded && tx.refunded_amount.is_zero() {
                tx.refunded_amount = tx.amount;
            }
        }

        info!(transaction_id, status = %tx.status, "Refund accepted");
        Ok(tx)
    }

    #[instrument(skip(self), fields(provider = %self.profile.key))]
    async fn cancel(&self, transaction_id: &str) -> PaymentResult<TransactionData> {
        let doc = self
            .call(self.profile.endpoints.cancel, Some(transaction_id), None, Vec::new(), Some(Map::new()))
            .await?;
        self.ensure_accepted(&doc)?;

        let mut tx = self.normalize(&doc, &self.profile.transaction)?;
        tx.transaction_id = transaction_id.to_string();
        if tx.status == TransactionStatus::Success {
            tx.status = TransactionStatus::Cancelled;
        }
        Ok(tx)
    }

    #[instrument(skip(self, query), fields(provider = %self.profile.key))]
    async fn list_transactions(&self, query: &TransactionQuery) -> PaymentResult<Vec<TransactionData>> {
        let params = &self.profile.list;
        let mut pairs = Vec::new();
        if let Some(from) = query.from {
            pairs.push((params.from.to_string(), from.to_rfc3339()));
        }
        if let Some(to) = query.to {
            pairs.push((params.to.to_string(), to.to_rfc3339()));
        }
        if let Some(limit) = query.limit {
            pairs.push((params.limit.to_string(), limit.to_string()));
        }

        let doc = self
            .call(self.profile.endpoints.list, None, None, pairs, None)
            .await?;
        let items = doc
            .pointer(params.root)
            .and_then(Value::as_array)
            .ok_or_else(|| self.malformed(params.root))?;

        let mut txs = Vec::with_capacity(items.len());
        for item in items {
            match self.normalize_object(item, &self.profile.transaction, item) {
                Ok(tx) if query.matches(&tx) => txs.push(tx),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Skipping unparseable transaction in listing"),
            }
        }
        if let Some(limit) = query.limit {
            txs.truncate(limit);
        }
        Ok(txs)
    }

    fn validate_webhook_signature(&self, payload: &[u8], signature: &str) -> bool {
        match self.credentials.webhook_secret() {
            Some(secret) => signature::verify(secret, payload, signature),
            None => {
                warn!(provider = %self.profile.key, "No webhook secret configured; rejecting signature");
                false
            }
        }
    }

    fn parse_webhook(&self, payload: &[u8]) -> PaymentResult<InboundWebhook> {
        let doc: Value = serde_json::from_slice(payload).map_err(|e| {
            PaymentError::Serialization(format!("{} webhook is not valid JSON: {}", self.profile.key, e))
        })?;
        if !doc.is_object() {
            return Err(PaymentError::Serialization(format!(
                "{} webhook is not a JSON object",
                self.profile.key
            )));
        }

        let fields = &self.profile.webhook;
        let tx_fields = &fields.transaction;
        let carries_transaction = {
            let object = if tx_fields.root.is_empty() {
                Some(&doc)
            } else {
                doc.pointer(tx_fields.root)
            };
            object.is_some_and(|o| o.pointer(tx_fields.id).is_some())
        };
        let transaction = if carries_transaction {
            Some(self.normalize(&doc, tx_fields)?)
        } else {
            None
        };

        Ok(InboundWebhook {
            provider: self.profile.key,
            webhook_id: fields.webhook_id.and_then(|p| str_at(&doc, p)),
            external_id: fields.external_id.and_then(|p| str_at(&doc, p)),
            event_type: fields
                .event_type
                .and_then(|p| str_at(&doc, p))
                .unwrap_or_else(|| fields.default_event_type.to_string()),
            transaction,
            payload: doc,
        })
    }

    #[instrument(skip(self), fields(provider = %self.profile.key))]
    async fn test_connection(&self) -> PaymentResult<bool> {
        let ping = self.profile.endpoints.ping;
        let (query, body) = match ping.method {
            HttpMethod::Get => (self.inline_auth(), None),
            HttpMethod::Post => (
                Vec::new(),
                Some(Value::Object(
                    self.inline_auth()
                        .into_iter()
                        .map(|(k, v)| (k, Value::String(v)))
                        .collect(),
                )),
            ),
        };

        let response = self.http.send(ping.method, ping.path, &query, body.as_ref()).await?;
        if !response.is_success() {
            warn!(status = response.status, "Provider connection test failed");
        }
        Ok(response.is_success())
    }

    fn provider_info(&self) -> ProviderInfo {
        ProviderInfo {
            key: self.profile.key,
            kind: self.profile.key.kind(),
            display_name: self.profile.display_name.to_string(),
            base_url: self.http.base_url().to_string(),
            currencies: self.supported_currencies(),
            supports_refunds: self.profile.supports_refunds,
            supports_catalog: self.supports_catalog(),
            test_mode: self.credentials.test_mode,
        }
    }

    fn required_config_fields(&self) -> BTreeMap<&'static str, &'static str> {
        self.profile.required_fields.iter().copied().collect()
    }

    fn supported_currencies(&self) -> Vec<Currency> {
        self.profile.currencies.to_vec()
    }

    #[instrument(skip(self), fields(provider = %self.profile.key))]
    async fn fetch_catalog(&self, limit: Option<usize>) -> PaymentResult<Vec<CatalogItem>> {
        let (Some(endpoint), Some(fields)) = (self.profile.endpoints.catalog, self.profile.catalog) else {
            return Err(PaymentError::Unsupported {
                provider: self.profile.key.to_string(),
                operation: "fetch_catalog".to_string(),
            });
        };

        let query = limit
            .map(|l| vec![(fields.limit_param.to_string(), l.to_string())])
            .unwrap_or_default();
        let doc = self.call(endpoint, None, None, query, None).await?;
        let entries = doc
            .pointer(fields.root)
            .and_then(Value::as_array)
            .ok_or_else(|| self.malformed(fields.root))?;

        let mut items = Vec::with_capacity(entries.len());
        for entry in entries {
            let currency = fields
                .currency
                .and_then(|p| str_at(entry, p))
                .and_then(|c| c.parse::<Currency>().ok())
                .unwrap_or(self.profile.default_currency);
            let (Some(id), Some(name), Some(price)) = (
                str_at(entry, fields.id),
                str_at(entry, fields.name),
                entry
                    .pointer(fields.price)
                    .and_then(|v| self.decode_amount(v, currency)),
            ) else {
                warn!("Skipping catalog entry without id, name or price");
                continue;
            };

            let mut item = CatalogItem::new(self.profile.key, id, name, price, currency);
            if let Some(category) = fields.category.and_then(|p| str_at(entry, p)) {
                item = item.with_category(category);
            }
            if let Some(country) = fields.country.and_then(|p| str_at(entry, p)) {
                item = item.with_country(country);
            }
            if let Some(pointer) = fields.active {
                if entry.pointer(pointer).is_some() {
                    item.active = bool_at(entry, pointer);
                }
            }
            for (name, pointer) in fields.attributes {
                if let Some(value) = entry.pointer(pointer) {
                    item = item.with_attribute(*name, value.clone());
                }
            }
            items.push(item);
        }

        if let Some(limit) = limit {
            items.truncate(limit);
        }
        debug!(count = items.len(), "Fetched catalog");
        Ok(items)
    }

    fn supports_catalog(&self) -> bool {
        self.profile.catalog.is_some() && self.profile.endpoints.catalog.is_some()
    }
}
