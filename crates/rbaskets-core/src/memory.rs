//! In-process basket storage.
//!
//! The registry sits behind one `RwLock`; each basket has its own `Mutex`
//! held for the whole of a mutation, so eviction, append and the lifetime
//! counter change together. Record operations never touch the registry lock.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use bytes::Bytes;

use crate::error::AppError;
use crate::finder::SearchScope;
use crate::models::{
    Auth, BasketConfig, BasketNamesPage, RequestRecord, RequestsPage, RequestsQueryPage,
    ResponseConfig, validate_basket_name,
};
use crate::pagination::PageRequest;
use crate::responses::{ResponseRegistry, log_rejected_key, validate_method};
use crate::store::RecordStore;
use crate::token::{generate_auth, tokens_match};
use crate::traits::{Basket, BasketsDatabase};

type Registry = BTreeMap<String, MemoryBasket>;

/// Basket registry kept entirely in memory.
///
/// After [`BasketsDatabase::release`] every registry operation fails with
/// `DatabaseError`, the same as a closed Postgres pool.
#[derive(Clone, Default)]
pub struct MemoryDatabase {
    baskets: Arc<RwLock<Registry>>,
    released: Arc<AtomicBool>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_open(&self) -> Result<(), AppError> {
        if self.released.load(Ordering::Acquire) {
            return Err(AppError::DatabaseError(
                "basket database has been released".into(),
            ));
        }
        Ok(())
    }

    fn read(&self) -> RwLockReadGuard<'_, Registry> {
        self.baskets.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Registry> {
        self.baskets.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn names_page<'a, I>(names: I, max: usize, skip: usize) -> BasketNamesPage
    where
        I: IntoIterator<Item = &'a String>,
    {
        let page = PageRequest::new(max, skip).paginate(names);
        BasketNamesPage {
            names: page.items.into_iter().cloned().collect(),
            count: page.count,
            has_more: page.has_more,
        }
    }
}

impl BasketsDatabase for MemoryDatabase {
    type Basket = MemoryBasket;

    async fn create(&self, name: &str, config: BasketConfig) -> Result<Auth, AppError> {
        self.ensure_open()?;
        validate_basket_name(name)?;
        let config = config.validated()?;
        let auth = generate_auth();

        let mut baskets = self.write();
        // release may have won the race for the write lock
        self.ensure_open()?;
        if baskets.contains_key(name) {
            return Err(AppError::NameConflict(name.to_string()));
        }
        baskets.insert(
            name.to_string(),
            MemoryBasket::new(name, config, auth.token.clone()),
        );

        tracing::info!(basket = %name, "Basket created");
        Ok(auth)
    }

    async fn get(&self, name: &str) -> Result<Option<MemoryBasket>, AppError> {
        self.ensure_open()?;
        Ok(self.read().get(name).cloned())
    }

    async fn delete(&self, name: &str) -> Result<(), AppError> {
        self.ensure_open()?;
        let removed = self.write().remove(name);
        if let Some(basket) = removed {
            basket.mark_deleted();
            tracing::info!(basket = %name, "Basket deleted");
        }
        Ok(())
    }

    async fn size(&self) -> Result<usize, AppError> {
        self.ensure_open()?;
        Ok(self.read().len())
    }

    async fn get_names(&self, max: usize, skip: usize) -> Result<BasketNamesPage, AppError> {
        self.ensure_open()?;
        let baskets = self.read();
        Ok(Self::names_page(baskets.keys(), max, skip))
    }

    async fn find_names(
        &self,
        query: &str,
        max: usize,
        skip: usize,
    ) -> Result<BasketNamesPage, AppError> {
        self.ensure_open()?;
        let needle = query.to_lowercase();
        let baskets = self.read();
        let matches = baskets
            .keys()
            .filter(|name| name.to_lowercase().contains(&needle));
        Ok(Self::names_page(matches, max, skip))
    }

    async fn release(&self) {
        let drained = {
            let mut baskets = self.write();
            self.released.store(true, Ordering::Release);
            std::mem::take(&mut *baskets)
        };
        for basket in drained.values() {
            basket.mark_deleted();
        }
    }
}

#[derive(Debug)]
struct BasketState {
    deleted: bool,
    config: BasketConfig,
    token: String,
    records: RecordStore,
    responses: ResponseRegistry,
}

/// Handle to a basket of a [`MemoryDatabase`]. Clones share state.
#[derive(Clone)]
pub struct MemoryBasket {
    name: Arc<str>,
    state: Arc<Mutex<BasketState>>,
}

impl MemoryBasket {
    fn new(name: &str, config: BasketConfig, token: String) -> Self {
        let records = RecordStore::new(config.capacity as usize);
        Self {
            name: Arc::from(name),
            state: Arc::new(Mutex::new(BasketState {
                deleted: false,
                config,
                token,
                records,
                responses: ResponseRegistry::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BasketState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Lock state for a mutation, refusing deleted baskets.
    fn live(&self) -> Result<MutexGuard<'_, BasketState>, AppError> {
        let state = self.lock();
        if state.deleted {
            return Err(AppError::BasketDeleted(self.name.to_string()));
        }
        Ok(state)
    }

    fn mark_deleted(&self) {
        let mut state = self.lock();
        state.deleted = true;
        state.records.clear();
        state.responses.clear();
    }
}

impl Basket for MemoryBasket {
    fn name(&self) -> &str {
        &self.name
    }

    async fn config(&self) -> Result<BasketConfig, AppError> {
        let state = self.lock();
        if state.deleted {
            return Ok(BasketConfig::default());
        }
        Ok(state.config.clone())
    }

    async fn update(&self, config: BasketConfig) -> Result<(), AppError> {
        let config = config.validated()?;
        let mut state = self.live()?;
        let evicted = state.records.set_capacity(config.capacity as usize);
        state.config = config;

        tracing::debug!(basket = %self.name, evicted, "Basket configuration updated");
        Ok(())
    }

    async fn authorize(&self, token: &str) -> Result<bool, AppError> {
        let state = self.lock();
        Ok(!state.deleted && tokens_match(token, &state.token))
    }

    async fn get_response(&self, method: &str) -> Result<Option<ResponseConfig>, AppError> {
        if validate_method(method).is_err() {
            return Ok(None);
        }
        let state = self.lock();
        if state.deleted {
            return Ok(None);
        }
        Ok(state.responses.get(method).cloned())
    }

    async fn set_response(&self, method: &str, response: ResponseConfig) -> Result<(), AppError> {
        if validate_method(method).is_err() {
            log_rejected_key(&self.name, method);
            return Ok(());
        }
        self.live()?.responses.set(method, response)
    }

    async fn add(&self, request: &http::Request<Bytes>) -> Result<RequestRecord, AppError> {
        let record = RequestRecord::from_request(request);
        let mut state = self.live()?;
        let evicted = state.records.push(record.clone());

        tracing::debug!(
            basket = %self.name,
            method = %record.method,
            evicted,
            "Request captured"
        );
        Ok(record)
    }

    async fn clear(&self) -> Result<(), AppError> {
        self.live()?.records.clear();
        Ok(())
    }

    async fn size(&self) -> Result<usize, AppError> {
        let state = self.lock();
        if state.deleted {
            return Ok(0);
        }
        Ok(state.records.len())
    }

    async fn get_requests(&self, max: usize, skip: usize) -> Result<RequestsPage, AppError> {
        let state = self.lock();
        if state.deleted {
            return Ok(RequestsPage::default());
        }
        Ok(state.records.page(PageRequest::new(max, skip)))
    }

    async fn find_requests(
        &self,
        query: &str,
        scope: SearchScope,
        max: usize,
        skip: usize,
    ) -> Result<RequestsQueryPage, AppError> {
        let state = self.lock();
        if state.deleted {
            return Ok(RequestsQueryPage::default());
        }
        Ok(state
            .records
            .find(query, scope, PageRequest::new(max, skip)))
    }
}
