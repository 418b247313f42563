//! Bounded, searchable storage for captured HTTP requests ("baskets").

pub mod error;
pub mod finder;
pub mod memory;
pub mod models;
pub mod pagination;
pub mod responses;
pub mod store;
pub mod token;
pub mod traits;

pub use error::AppError;
pub use finder::SearchScope;
pub use memory::{MemoryBasket, MemoryDatabase};
pub use models::{
    Auth, BasketConfig, BasketNamesPage, Headers, RequestRecord, RequestsPage, RequestsQueryPage,
    ResponseConfig,
};
pub use pagination::{Page, PageRequest};
pub use traits::{Basket, BasketsDatabase};
