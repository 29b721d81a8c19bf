//! # Local Cache Adapter Module
//!
//! Repository implementation for unauthenticated sessions. Each collection is
//! one JSON document under its own key in a [`CacheBackend`]. Identifiers are
//! random UUIDs and timestamps come from the local clock.
//!
//! A collection that has never been written is seeded from the bundled sample
//! data on first load, and the seed is written back so identifiers stay
//! stable across restarts.
//!
//! Writes are read-modify-write of the whole document, serialized by a lock
//! per collection.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tempfile::NamedTempFile;
use uuid::Uuid;

use crate::errors::{PricingError, StoreError};
use crate::model::{
    ArrangementRecipe, Category, MarkupSettings, OrderRecord, PosSettings, ProductTemplate,
};
use crate::repository::{Entity, Repositories, Repository, SettingsRepository};
use crate::sample_data::sample_data;

pub const MARKUP_SETTINGS_KEY: &str = "markup_settings";
pub const POS_SETTINGS_KEY: &str = "pos_settings";

/// Key-value storage holding one JSON document per key
pub trait CacheBackend: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
}

/// One `<key>.json` file per key inside a directory
#[derive(Debug, Clone)]
pub struct FileCache {
    dir: PathBuf,
}

impl FileCache {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

impl CacheBackend for FileCache {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let path = self.path_for(key);
        match fs::read_to_string(&path) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::adapter(
                format!("read {}", path.display()),
                e,
            )),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let path = self.path_for(key);
        let operation = || format!("write {}", path.display());

        fs::create_dir_all(&self.dir).map_err(|e| StoreError::adapter(operation(), e))?;

        // Write next to the target and rename over it so readers never see a partial file
        let mut tmp =
            NamedTempFile::new_in(&self.dir).map_err(|e| StoreError::adapter(operation(), e))?;
        tmp.write_all(value.as_bytes())
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(|e| StoreError::adapter(operation(), e))?;
        tmp.persist(&path)
            .map_err(|e| StoreError::adapter(operation(), e.error))?;

        debug!("Wrote {} bytes to {}", value.len(), path.display());
        Ok(())
    }
}

/// In-process backend, mainly for tests and throwaway sessions
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, String>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl CacheBackend for MemoryCache {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries().insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// How a stored entity is built from a draft and patched in place
pub trait LocalEntity: Entity + Serialize + DeserializeOwned {
    fn from_draft(id: String, draft: Self::Draft, now: DateTime<Utc>) -> Self;

    /// Apply `patch`; an empty patch must leave the entity untouched
    fn apply_patch(&mut self, patch: Self::Patch, now: DateTime<Utc>);
}

impl LocalEntity for ProductTemplate {
    fn from_draft(id: String, draft: Self::Draft, _now: DateTime<Utc>) -> Self {
        ProductTemplate {
            id,
            name: draft.name,
            wholesale_cost: draft.wholesale_cost,
            category: draft.category,
            last_used: draft.last_used,
            inventory_count: draft.inventory_count,
            low_stock_threshold: draft.low_stock_threshold,
        }
    }

    fn apply_patch(&mut self, patch: Self::Patch, _now: DateTime<Utc>) {
        patch.apply_to(self);
    }
}

impl LocalEntity for OrderRecord {
    fn from_draft(id: String, draft: Self::Draft, now: DateTime<Utc>) -> Self {
        let order = draft.order;
        OrderRecord {
            id,
            name: order.name,
            created_at: now,
            lines: order.lines,
            total_wholesale: draft.totals.total_wholesale,
            total_retail: draft.totals.total_retail,
            profit: draft.totals.profit,
            photo: order.photo,
            notes: order.notes,
            staff_name: order.staff_name,
            staff_id: order.staff_id,
        }
    }

    fn apply_patch(&mut self, patch: Self::Patch, _now: DateTime<Utc>) {
        patch.apply_to(self);
    }
}

impl LocalEntity for ArrangementRecipe {
    fn from_draft(id: String, draft: Self::Draft, now: DateTime<Utc>) -> Self {
        ArrangementRecipe {
            id,
            name: draft.name,
            description: draft.description,
            reference_price: draft.reference_price,
            ingredients: draft.ingredients,
            photo: draft.photo,
            website_url: draft.website_url,
            last_updated: now,
        }
    }

    fn apply_patch(&mut self, patch: Self::Patch, now: DateTime<Utc>) {
        if !patch.is_empty() {
            patch.apply_to(self, now);
        }
    }
}

/// A collection stored as a JSON array under one key
pub struct LocalCollection<E> {
    backend: Arc<dyn CacheBackend>,
    seed: Option<Vec<E>>,
    lock: Mutex<()>,
}

impl<E: LocalEntity> LocalCollection<E> {
    /// `seed` is written the first time the key is found empty
    pub fn new(backend: Arc<dyn CacheBackend>, seed: Option<Vec<E>>) -> Self {
        Self {
            backend,
            seed,
            lock: Mutex::new(()),
        }
    }

    fn guard(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn read(&self) -> Result<Vec<E>, StoreError> {
        match self.backend.get(E::COLLECTION)? {
            Some(json) => serde_json::from_str(&json).map_err(|e| {
                StoreError::adapter(format!("decode cached {}", E::COLLECTION), e)
            }),
            None => {
                let seed = self.seed.clone().unwrap_or_default();
                if !seed.is_empty() {
                    info!("Seeding {} with {} sample entries", E::COLLECTION, seed.len());
                }
                self.write(&seed)?;
                Ok(seed)
            }
        }
    }

    fn write(&self, entities: &[E]) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(entities)
            .map_err(|e| StoreError::adapter(format!("encode {}", E::COLLECTION), e))?;
        self.backend.set(E::COLLECTION, &json)
    }

    fn load_sync(&self) -> Result<Vec<E>, StoreError> {
        let _guard = self.guard();
        let entities = self.read()?;
        info!("Loaded {} {} from local cache", entities.len(), E::COLLECTION);
        Ok(entities)
    }

    fn create_sync(&self, draft: E::Draft) -> Result<E, StoreError> {
        let _guard = self.guard();
        let mut entities = self.read()?;

        let entity = E::from_draft(Uuid::new_v4().to_string(), draft, Utc::now());
        entities.push(entity.clone());
        self.write(&entities)?;

        info!("Created {} entry {}", E::COLLECTION, entity.id());
        Ok(entity)
    }

    fn update_sync(&self, id: &str, patch: E::Patch) -> Result<E, StoreError> {
        let _guard = self.guard();
        let mut entities = self.read()?;

        let entity = entities
            .iter_mut()
            .find(|e| e.id() == id)
            .ok_or_else(|| StoreError::not_found(E::COLLECTION, id))?;
        entity.apply_patch(patch, Utc::now());
        let updated = entity.clone();
        self.write(&entities)?;

        info!("Updated {} entry {}", E::COLLECTION, id);
        Ok(updated)
    }

    fn delete_sync(&self, id: &str) -> Result<(), StoreError> {
        let _guard = self.guard();
        let mut entities = self.read()?;

        let before = entities.len();
        entities.retain(|e| e.id() != id);
        if entities.len() == before {
            return Err(StoreError::not_found(E::COLLECTION, id));
        }
        self.write(&entities)?;

        info!("Deleted {} entry {}", E::COLLECTION, id);
        Ok(())
    }
}

#[async_trait]
impl<E: LocalEntity> Repository<E> for LocalCollection<E> {
    async fn load(&self) -> Result<Vec<E>, StoreError> {
        self.load_sync()
    }

    async fn create(&self, draft: E::Draft) -> Result<E, StoreError> {
        self.create_sync(draft)
    }

    async fn update(&self, id: &str, patch: E::Patch) -> Result<E, StoreError> {
        self.update_sync(id, patch)
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.delete_sync(id)
    }
}

/// Settings record stored as a single JSON object
pub trait LocalSetting: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    const KEY: &'static str;

    fn decode(value: serde_json::Value) -> Result<Self, StoreError> {
        serde_json::from_value(value)
            .map_err(|e| StoreError::adapter(format!("decode cached {}", Self::KEY), e))
    }
}

impl LocalSetting for PosSettings {
    const KEY: &'static str = POS_SETTINGS_KEY;
}

impl LocalSetting for MarkupSettings {
    const KEY: &'static str = MARKUP_SETTINGS_KEY;

    /// A table missing a category cannot price orders, so it is a
    /// configuration error rather than a decode failure
    fn decode(value: serde_json::Value) -> Result<Self, StoreError> {
        for category in Category::ALL {
            let present = value
                .get(category.as_str())
                .is_some_and(|v| !v.is_null());
            if !present {
                return Err(PricingError::MissingMultiplier(category).into());
            }
        }
        serde_json::from_value(value)
            .map_err(|e| StoreError::adapter(format!("decode cached {}", Self::KEY), e))
    }
}

pub struct LocalSettings<S> {
    backend: Arc<dyn CacheBackend>,
    seed: Option<S>,
    lock: Mutex<()>,
}

impl<S: LocalSetting> LocalSettings<S> {
    pub fn new(backend: Arc<dyn CacheBackend>, seed: Option<S>) -> Self {
        Self {
            backend,
            seed,
            lock: Mutex::new(()),
        }
    }

    fn load_sync(&self) -> Result<Option<S>, StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let Some(json) = self.backend.get(S::KEY)? else {
            if let Some(seed) = &self.seed {
                info!("Seeding {} from sample data", S::KEY);
                write_setting(self.backend.as_ref(), seed)?;
            }
            return Ok(self.seed.clone());
        };

        let value: serde_json::Value = serde_json::from_str(&json)
            .map_err(|e| StoreError::adapter(format!("decode cached {}", S::KEY), e))?;
        if value.is_null() {
            return Ok(None);
        }
        S::decode(value).map(Some)
    }

    fn save_sync(&self, settings: S) -> Result<S, StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        write_setting(self.backend.as_ref(), &settings)?;
        info!("Saved {}", S::KEY);
        Ok(settings)
    }
}

fn write_setting<S: LocalSetting>(backend: &dyn CacheBackend, settings: &S) -> Result<(), StoreError> {
    let json = serde_json::to_string_pretty(settings)
        .map_err(|e| StoreError::adapter(format!("encode {}", S::KEY), e))?;
    backend.set(S::KEY, &json)
}

#[async_trait]
impl<S: LocalSetting> SettingsRepository<S> for LocalSettings<S> {
    async fn load(&self) -> Result<Option<S>, StoreError> {
        self.load_sync()
    }

    async fn save(&self, settings: S) -> Result<S, StoreError> {
        self.save_sync(settings)
    }
}

/// Build the five local collections over one backend
pub(crate) fn local_repositories(backend: Arc<dyn CacheBackend>, seeded: bool) -> Repositories {
    let sample = if seeded {
        match sample_data() {
            Ok(data) => Some(data),
            Err(e) => {
                warn!("Bundled sample data unavailable, starting empty: {e}");
                None
            }
        }
    } else {
        None
    };

    let (templates, markup, orders, recipes) = match sample {
        Some(data) => (
            Some(data.templates),
            Some(data.markup_settings),
            Some(data.saved_orders),
            Some(data.arrangement_recipes),
        ),
        None => (None, None, None, None),
    };

    Repositories {
        templates: Arc::new(LocalCollection::<ProductTemplate>::new(backend.clone(), templates)),
        orders: Arc::new(LocalCollection::<OrderRecord>::new(backend.clone(), orders)),
        recipes: Arc::new(LocalCollection::<ArrangementRecipe>::new(backend.clone(), recipes)),
        markup: Arc::new(LocalSettings::<MarkupSettings>::new(backend.clone(), markup)),
        pos: Arc::new(LocalSettings::<PosSettings>::new(backend, None)),
    }
}
