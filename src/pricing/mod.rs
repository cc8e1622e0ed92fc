//! Price sources, rate limiting and the price monitor.
//!
//! This module handles:
//! - The price/quote/swap source contract and its HTTP client
//! - Rate limiting shared by every caller of a source
//! - The rolling price cache with change notifications

pub mod client;
pub mod limiter;
pub mod monitor;
pub mod source;

pub use client::HttpPriceSource;
pub use limiter::RateLimiter;
pub use monitor::{PriceChange, PriceEntry, PriceMonitor, RefreshReport};
pub use source::{PriceSource, Quote, SwapReceipt, SwapRequest};
