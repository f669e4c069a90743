//! Rolling correlation of crypto assets against a reference asset (BTC).
//!
//! The engine lives in [`returns`], [`sync`], [`correlation`] and
//! [`pipeline`]; everything else fetches data, keeps state, or shows it.

pub mod comfy_table;
pub mod correlation;
pub mod error;
pub mod market_data;
pub mod pipeline;
pub mod proxy;
pub mod registry;
pub mod response_cache;
pub mod returns;
pub mod storage_utils;
pub mod sync;
pub mod tui;
