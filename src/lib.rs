#![deny(clippy::unwrap_used)]

pub mod cache;
pub mod category;
pub mod config;
pub mod export;
pub mod feed;
pub mod field;
pub mod offer;
pub mod product;
pub mod retry;
pub mod router;
pub mod xml;
