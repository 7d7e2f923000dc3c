//! Collaborators the decision core calls out to.
//!
//! All calls are synchronous. A failing collaborator never fails an
//! evaluation: storage errors read as "no record" and lookup errors make the
//! targeting leaf evaluate to `false`.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::types::{ServiceError, Settings, StorageRecord};

/// Read/write access to persisted per-user decisions.
pub trait StorageConnector: Send + Sync {
    /// # Errors
    ///
    /// Returns [`ServiceError`] when the backing store cannot be read or the
    /// record is corrupt.
    fn get(&self, feature_key: &str, user_id: &str) -> Result<Option<StorageRecord>, ServiceError>;

    /// # Errors
    ///
    /// Returns [`ServiceError`] when the record cannot be persisted.
    fn set(&self, record: &StorageRecord) -> Result<(), ServiceError>;
}

/// Parameters of a list-membership lookup for an `inlist(..)` operand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListQuery {
    pub attribute: String,
    pub list_id: String,
    pub account_id: u64,
}

/// Parameters of a location / user-agent classification lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayQuery {
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
    pub account_id: u64,
}

/// Answers `inlist(..)` operands. A reply of `"true"` means "member".
pub trait ListMembershipService: Send + Sync {
    /// # Errors
    ///
    /// Returns [`ServiceError`] on network or protocol failure.
    fn query(&self, query: &ListQuery) -> Result<Option<String>, ServiceError>;
}

/// Resolves location and user-agent classification, replying with the JSON
/// shape parsed by [`GatewayData::from_json`](crate::GatewayData::from_json).
pub trait AttributeGatewayService: Send + Sync {
    /// # Errors
    ///
    /// Returns [`ServiceError`] on network or protocol failure.
    fn query(&self, query: &GatewayQuery) -> Result<Option<String>, ServiceError>;
}

/// Source of the current settings snapshot.
pub trait SettingsProvider: Send + Sync {
    fn settings(&self) -> Arc<Settings>;
}

impl<F> ListMembershipService for F
where
    F: Fn(&ListQuery) -> Result<Option<String>, ServiceError> + Send + Sync,
{
    fn query(&self, query: &ListQuery) -> Result<Option<String>, ServiceError> {
        self(query)
    }
}

impl<F> AttributeGatewayService for F
where
    F: Fn(&GatewayQuery) -> Result<Option<String>, ServiceError> + Send + Sync,
{
    fn query(&self, query: &GatewayQuery) -> Result<Option<String>, ServiceError> {
        self(query)
    }
}

impl SettingsProvider for Arc<Settings> {
    fn settings(&self) -> Arc<Settings> {
        Arc::clone(self)
    }
}

/// Settings holder whose snapshot can be swapped while readers are evaluating.
///
/// Readers clone the inner `Arc` and keep using their snapshot until they finish.
#[derive(Debug)]
pub struct SharedSettings {
    current: RwLock<Arc<Settings>>,
}

impl SharedSettings {
    #[must_use]
    pub fn new(settings: Settings) -> Self {
        Self {
            current: RwLock::new(Arc::new(settings)),
        }
    }

    /// Install a new snapshot, returning the previous one.
    pub fn replace(&self, settings: Settings) -> Arc<Settings> {
        std::mem::replace(&mut *self.current.write(), Arc::new(settings))
    }
}

impl SettingsProvider for SharedSettings {
    fn settings(&self) -> Arc<Settings> {
        Arc::clone(&self.current.read())
    }
}

impl SettingsProvider for Arc<SharedSettings> {
    fn settings(&self) -> Arc<Settings> {
        self.as_ref().settings()
    }
}

/// Storage that remembers nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoStorage;

impl StorageConnector for NoStorage {
    fn get(&self, _: &str, _: &str) -> Result<Option<StorageRecord>, ServiceError> {
        Ok(None)
    }

    fn set(&self, _: &StorageRecord) -> Result<(), ServiceError> {
        Ok(())
    }
}

/// Lookup that never answers; every `inlist` and gateway leaf fails closed.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoLookup;

impl ListMembershipService for NoLookup {
    fn query(&self, _: &ListQuery) -> Result<Option<String>, ServiceError> {
        Ok(None)
    }
}

impl AttributeGatewayService for NoLookup {
    fn query(&self, _: &GatewayQuery) -> Result<Option<String>, ServiceError> {
        Ok(None)
    }
}

/// Thread-safe in-process storage keyed by `(feature_key, user_id)`.
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    records: RwLock<HashMap<(String, String), StorageRecord>>,
}

impl InMemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, record: StorageRecord) {
        self.records.write().insert(
            (record.feature_key.clone(), record.user_id.clone()),
            record,
        );
    }

    #[must_use]
    pub fn record(&self, feature_key: &str, user_id: &str) -> Option<StorageRecord> {
        self.records
            .read()
            .get(&(feature_key.to_owned(), user_id.to_owned()))
            .cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

impl StorageConnector for InMemoryStorage {
    fn get(&self, feature_key: &str, user_id: &str) -> Result<Option<StorageRecord>, ServiceError> {
        Ok(self.record(feature_key, user_id))
    }

    fn set(&self, record: &StorageRecord) -> Result<(), ServiceError> {
        self.insert(record.clone());
        Ok(())
    }
}

/// The collaborators one evaluator talks to.
#[derive(Clone)]
pub struct Services {
    pub(crate) storage: Arc<dyn StorageConnector>,
    pub(crate) lists: Arc<dyn ListMembershipService>,
    pub(crate) gateway: Arc<dyn AttributeGatewayService>,
}

impl Default for Services {
    fn default() -> Self {
        Self {
            storage: Arc::new(NoStorage),
            lists: Arc::new(NoLookup),
            gateway: Arc::new(NoLookup),
        }
    }
}

impl std::fmt::Debug for Services {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Services").finish_non_exhaustive()
    }
}

impl Services {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn storage(mut self, storage: Arc<dyn StorageConnector>) -> Self {
        self.storage = storage;
        self
    }

    #[must_use]
    pub fn list_membership(mut self, lists: Arc<dyn ListMembershipService>) -> Self {
        self.lists = lists;
        self
    }

    #[must_use]
    pub fn gateway(mut self, gateway: Arc<dyn AttributeGatewayService>) -> Self {
        self.gateway = gateway;
        self
    }

    /// Stored record, with read failures logged and treated as absent.
    pub(crate) fn stored(&self, feature_key: &str, user_id: &str) -> Option<StorageRecord> {
        match self.storage.get(feature_key, user_id) {
            Ok(record) => record,
            Err(err) => {
                tracing::warn!(feature_key, user_id, %err, "stored data unreadable, ignoring");
                None
            }
        }
    }
}
