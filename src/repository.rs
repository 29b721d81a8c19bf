//! # Repository Contract Module
//!
//! Common contract implemented by both backing stores, and the per-session
//! bundle the coordinator is built from.
//!
//! Repositories are scoped to one account when constructed. Nothing on the
//! trait takes an account parameter, so a session can only ever see its own
//! rows.

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::StoreConfig;
use crate::errors::StoreError;
use crate::local_cache::{CacheBackend, FileCache};
use crate::model::{
    ArrangementRecipe, MarkupSettings, NewProductTemplate, NewRecipe, OrderDraft, OrderPatch,
    OrderRecord, PosSettings, ProductTemplate, ProductTemplatePatch, RecipePatch,
};
use crate::remote_store::RemoteStore;

/// An entity stored in a collection with generated identifiers
pub trait Entity: Clone + Send + Sync + 'static {
    /// Fields supplied on create
    type Draft: Send + 'static;
    /// Partial update
    type Patch: Send + 'static;

    /// Collection name, used as the local cache key and in error messages
    const COLLECTION: &'static str;

    fn id(&self) -> &str;
}

impl Entity for ProductTemplate {
    type Draft = NewProductTemplate;
    type Patch = ProductTemplatePatch;
    const COLLECTION: &'static str = "product_templates";

    fn id(&self) -> &str {
        &self.id
    }
}

impl Entity for OrderRecord {
    type Draft = OrderDraft;
    type Patch = OrderPatch;
    const COLLECTION: &'static str = "saved_orders";

    fn id(&self) -> &str {
        &self.id
    }
}

impl Entity for ArrangementRecipe {
    type Draft = NewRecipe;
    type Patch = RecipePatch;
    const COLLECTION: &'static str = "arrangement_recipes";

    fn id(&self) -> &str {
        &self.id
    }
}

/// CRUD over one entity collection
#[async_trait]
pub trait Repository<E: Entity>: Send + Sync {
    /// Every entity of the account
    async fn load(&self) -> Result<Vec<E>, StoreError>;

    /// Store a new entity; the store assigns its id and timestamps
    async fn create(&self, draft: E::Draft) -> Result<E, StoreError>;

    /// Merge the present fields of `patch`, returning the stored result
    async fn update(&self, id: &str, patch: E::Patch) -> Result<E, StoreError>;

    async fn delete(&self, id: &str) -> Result<(), StoreError>;
}

/// One-per-account settings record
#[async_trait]
pub trait SettingsRepository<S>: Send + Sync {
    /// `None` when the account has never saved settings
    async fn load(&self) -> Result<Option<S>, StoreError>;

    async fn save(&self, settings: S) -> Result<S, StoreError>;
}

/// Who the current session belongs to
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    account: Option<String>,
}

impl Session {
    /// Unauthenticated session backed by the local cache
    pub fn local() -> Self {
        Self { account: None }
    }

    pub fn authenticated(account_id: &str) -> Self {
        Self {
            account: Some(account_id.to_string()),
        }
    }

    /// Session for the account named in `config`, if any
    pub fn from_config(config: &StoreConfig) -> Self {
        match &config.account_id {
            Some(account) => Self::authenticated(account),
            None => Self::local(),
        }
    }

    pub fn account(&self) -> Option<&str> {
        self.account.as_deref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.account.is_some()
    }
}

/// The five collections of one session
#[derive(Clone)]
pub struct Repositories {
    pub templates: Arc<dyn Repository<ProductTemplate>>,
    pub orders: Arc<dyn Repository<OrderRecord>>,
    pub recipes: Arc<dyn Repository<ArrangementRecipe>>,
    pub markup: Arc<dyn SettingsRepository<MarkupSettings>>,
    pub pos: Arc<dyn SettingsRepository<PosSettings>>,
}

impl Repositories {
    /// All collections served by one remote store
    pub fn remote(store: Arc<RemoteStore>) -> Self {
        Self {
            templates: store.clone(),
            orders: store.clone(),
            recipes: store.clone(),
            markup: store.clone(),
            pos: store,
        }
    }

    /// Local collections, seeded with the bundled example data on first use
    pub fn local(backend: Arc<dyn CacheBackend>) -> Self {
        crate::local_cache::local_repositories(backend, true)
    }

    /// Local collections that start empty
    pub fn local_unseeded(backend: Arc<dyn CacheBackend>) -> Self {
        crate::local_cache::local_repositories(backend, false)
    }
}

/// Build the repositories for `session`
///
/// Authenticated sessions use the remote store and need `DATABASE_URL`.
/// Unauthenticated sessions use the file cache in `config.data_dir`.
pub async fn open(session: &Session, config: &StoreConfig) -> Result<Repositories, StoreError> {
    match (session.account(), config.database_url.as_deref()) {
        (Some(account), Some(url)) => {
            let store = RemoteStore::connect(url, account, config).await?;
            store.init_schema().await?;
            Ok(Repositories::remote(Arc::new(store)))
        }
        (Some(account), None) => Err(StoreError::Configuration(format!(
            "account '{account}' is authenticated but DATABASE_URL is not set"
        ))),
        (None, _) => Ok(Repositories::local(Arc::new(FileCache::new(&config.data_dir)))),
    }
}
