//! Scriptable provider for engine tests.

use async_trait::async_trait;
use pay_core::{
    parse_amount, CatalogItem, Currency, InboundWebhook, PaymentError, PaymentProvider,
    PaymentResult, ProviderCheckout, ProviderInfo, ProviderKey, SessionParams, TransactionData,
    TransactionQuery, TransactionStatus,
};
use pay_providers::signature;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

pub const SECRET: &str = "whsec_test";

pub struct MockProvider {
    key: ProviderKey,
    transactions: Mutex<HashMap<String, TransactionData>>,
    failures: Mutex<HashMap<&'static str, VecDeque<PaymentError>>>,
    calls: Mutex<HashMap<&'static str, usize>>,
    healthy: AtomicBool,
    catalog: Mutex<Vec<CatalogItem>>,
    catalog_delay: Duration,
}

impl MockProvider {
    pub fn new(key: ProviderKey) -> Self {
        Self {
            key,
            transactions: Mutex::new(HashMap::new()),
            failures: Mutex::new(HashMap::new()),
            calls: Mutex::new(HashMap::new()),
            healthy: AtomicBool::new(true),
            catalog: Mutex::new(Vec::new()),
            catalog_delay: Duration::ZERO,
        }
    }

    pub fn with_catalog_delay(mut self, delay: Duration) -> Self {
        self.catalog_delay = delay;
        self
    }

    /// Answer `verify(reference)` and `get_transaction(id)` with `tx`
    pub fn with_transaction(self, tx: TransactionData) -> Self {
        self.insert(tx);
        self
    }

    pub fn insert(&self, tx: TransactionData) {
        let mut transactions = self.transactions.lock().unwrap();
        if let Some(reference) = &tx.reference {
            transactions.insert(reference.clone(), tx.clone());
        }
        transactions.insert(tx.transaction_id.clone(), tx);
    }

    pub fn with_catalog(self, items: Vec<CatalogItem>) -> Self {
        *self.catalog.lock().unwrap() = items;
        self
    }

    /// The next call of `operation` fails with `error`
    pub fn fail_next(&self, operation: &'static str, error: PaymentError) {
        self.failures.lock().unwrap().entry(operation).or_default().push_back(error);
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn calls(&self, operation: &str) -> usize {
        self.calls.lock().unwrap().get(operation).copied().unwrap_or(0)
    }

    fn enter(&self, operation: &'static str) -> PaymentResult<()> {
        *self.calls.lock().unwrap().entry(operation).or_default() += 1;
        match self.failures.lock().unwrap().get_mut(operation).and_then(|q| q.pop_front()) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn lookup(&self, id: &str) -> PaymentResult<TransactionData> {
        self.transactions
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| PaymentError::TransactionNotFound {
                transaction_id: id.to_string(),
            })
    }
}

/// Sign a body the way the mock expects
pub fn sign(body: &[u8]) -> String {
    signature::sign(SECRET, body)
}

#[async_trait]
impl PaymentProvider for MockProvider {
    fn key(&self) -> ProviderKey {
        self.key
    }

    async fn create_session(&self, params: &SessionParams) -> PaymentResult<ProviderCheckout> {
        self.enter("create_session")?;
        Ok(ProviderCheckout {
            provider_reference: Some(format!("mock-{}", params.reference)),
            checkout_url: Some(format!("https://pay.test/{}", params.reference)),
            ..Default::default()
        })
    }

    async fn verify(&self, reference: &str) -> PaymentResult<TransactionData> {
        self.enter("verify")?;
        self.lookup(reference)
    }

    async fn get_transaction(&self, transaction_id: &str) -> PaymentResult<TransactionData> {
        self.enter("get_transaction")?;
        self.lookup(transaction_id)
    }

    async fn refund(&self, transaction_id: &str, amount: Option<Decimal>) -> PaymentResult<TransactionData> {
        self.enter("refund")?;
        let mut tx = self.lookup(transaction_id)?;
        let amount = amount.unwrap_or(tx.amount);
        tx.status = if amount < tx.amount {
            TransactionStatus::PartiallyRefunded
        } else {
            TransactionStatus::Refunded
        };
        tx.refunded_amount = amount;
        Ok(tx)
    }

    async fn cancel(&self, transaction_id: &str) -> PaymentResult<TransactionData> {
        self.enter("cancel")?;
        let mut tx = self.lookup(transaction_id)?;
        tx.status = TransactionStatus::Cancelled;
        Ok(tx)
    }

    async fn list_transactions(&self, query: &TransactionQuery) -> PaymentResult<Vec<TransactionData>> {
        self.enter("list_transactions")?;
        let transactions = self.transactions.lock().unwrap();
        Ok(transactions.values().filter(|tx| query.matches(tx)).cloned().collect())
    }

    fn validate_webhook_signature(&self, payload: &[u8], signature: &str) -> bool {
        signature::verify(SECRET, payload, signature)
    }

    /// Body shape: `{"webhook_id"?, "id", "status", "amount", "reference"?, "code"?}`
    fn parse_webhook(&self, payload: &[u8]) -> PaymentResult<InboundWebhook> {
        let doc: serde_json::Value = serde_json::from_slice(payload)?;
        let str_field = |name: &str| doc.get(name).and_then(|v| v.as_str()).map(String::from);

        let transaction = match str_field("id") {
            Some(id) => {
                let status = str_field("status")
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(TransactionStatus::Pending);
                let amount = doc.get("amount").and_then(parse_amount).unwrap_or_default();
                let mut tx = TransactionData::new(id, self.key, amount, Currency::USD, status).with_raw(doc.clone());
                tx.reference = str_field("reference");
                if let Some(code) = str_field("code") {
                    tx.metadata.insert("error_code".into(), code);
                }
                Some(tx)
            }
            None => None,
        };

        Ok(InboundWebhook {
            provider: self.key,
            webhook_id: str_field("webhook_id"),
            external_id: str_field("id"),
            event_type: str_field("type").unwrap_or_else(|| "payment".into()),
            transaction,
            payload: doc,
        })
    }

    async fn test_connection(&self) -> PaymentResult<bool> {
        self.enter("test_connection")?;
        Ok(self.healthy.load(Ordering::SeqCst))
    }

    fn provider_info(&self) -> ProviderInfo {
        ProviderInfo {
            key: self.key,
            kind: self.key.kind(),
            display_name: format!("Mock {}", self.key),
            base_url: "https://mock.test".into(),
            currencies: self.supported_currencies(),
            supports_refunds: true,
            supports_catalog: true,
            test_mode: true,
        }
    }

    fn required_config_fields(&self) -> BTreeMap<&'static str, &'static str> {
        BTreeMap::from([("api_key", "API key")])
    }

    fn supported_currencies(&self) -> Vec<Currency> {
        vec![Currency::USD, Currency::ILS]
    }

    async fn fetch_catalog(&self, limit: Option<usize>) -> PaymentResult<Vec<CatalogItem>> {
        self.enter("fetch_catalog")?;
        if !self.catalog_delay.is_zero() {
            tokio::time::sleep(self.catalog_delay).await;
        }
        let mut items = self.catalog.lock().unwrap().clone();
        if let Some(limit) = limit {
            items.truncate(limit);
        }
        Ok(items)
    }

    fn supports_catalog(&self) -> bool {
        true
    }
}
