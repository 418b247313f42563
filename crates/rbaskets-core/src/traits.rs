use std::future::Future;

use bytes::Bytes;

use crate::error::AppError;
use crate::finder::SearchScope;
use crate::models::{
    Auth, BasketConfig, BasketNamesPage, RequestRecord, RequestsPage, RequestsQueryPage,
    ResponseConfig,
};

/// Registry of named baskets backed by some storage engine.
///
/// Lookups report unknown names as `None`; errors are reserved for storage
/// failures and rejected input.
pub trait BasketsDatabase: Send + Sync + Clone {
    type Basket: Basket;

    /// Register a new basket and issue its auth token.
    ///
    /// Fails with [`AppError::NameConflict`] if the name is taken.
    fn create(
        &self,
        name: &str,
        config: BasketConfig,
    ) -> impl Future<Output = Result<Auth, AppError>> + Send;

    fn get(
        &self,
        name: &str,
    ) -> impl Future<Output = Result<Option<Self::Basket>, AppError>> + Send;

    /// Remove a basket with all its requests and responses. Unknown names are ignored.
    fn delete(&self, name: &str) -> impl Future<Output = Result<(), AppError>> + Send;

    fn size(&self) -> impl Future<Output = Result<usize, AppError>> + Send;

    /// Basket names in ascending order.
    fn get_names(
        &self,
        max: usize,
        skip: usize,
    ) -> impl Future<Output = Result<BasketNamesPage, AppError>> + Send;

    /// Basket names containing `query`, ignoring case.
    fn find_names(
        &self,
        query: &str,
        max: usize,
        skip: usize,
    ) -> impl Future<Output = Result<BasketNamesPage, AppError>> + Send;

    /// Release the underlying storage. Safe to call more than once.
    fn release(&self) -> impl Future<Output = ()> + Send;
}

/// Handle to one basket.
///
/// Once the basket is deleted, read accessors answer with zero values and
/// mutations fail with [`AppError::BasketDeleted`].
pub trait Basket: Send + Sync + Clone {
    fn name(&self) -> &str;

    /// Current configuration, or `BasketConfig::default()` if the basket is gone.
    fn config(&self) -> impl Future<Output = Result<BasketConfig, AppError>> + Send;

    /// Replace the configuration, evicting the oldest requests beyond the new capacity.
    fn update(&self, config: BasketConfig) -> impl Future<Output = Result<(), AppError>> + Send;

    fn authorize(&self, token: &str) -> impl Future<Output = Result<bool, AppError>> + Send;

    fn get_response(
        &self,
        method: &str,
    ) -> impl Future<Output = Result<Option<ResponseConfig>, AppError>> + Send;

    /// Store the response for `method`.
    ///
    /// Method names failing [`crate::responses::validate_method`] are ignored:
    /// the call succeeds without storing anything and logs a
    /// `response_key_rejected` warning.
    fn set_response(
        &self,
        method: &str,
        response: ResponseConfig,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Capture a request, evicting the oldest one if the basket is full.
    fn add(
        &self,
        request: &http::Request<Bytes>,
    ) -> impl Future<Output = Result<RequestRecord, AppError>> + Send;

    /// Drop all requests and reset the lifetime counter.
    fn clear(&self) -> impl Future<Output = Result<(), AppError>> + Send;

    fn size(&self) -> impl Future<Output = Result<usize, AppError>> + Send;

    /// Page over retained requests, newest first.
    fn get_requests(
        &self,
        max: usize,
        skip: usize,
    ) -> impl Future<Output = Result<RequestsPage, AppError>> + Send;

    /// Page over retained requests matching `query` within `scope`, newest first.
    fn find_requests(
        &self,
        query: &str,
        scope: SearchScope,
        max: usize,
        skip: usize,
    ) -> impl Future<Output = Result<RequestsQueryPage, AppError>> + Send;
}
