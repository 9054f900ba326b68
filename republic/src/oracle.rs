// Copyright (c) 2024 Botho Foundation

//! Reference price of the underlying asset, shown alongside node status.

use async_trait::async_trait;
use parking_lot::RwLock;

/// Default price in USD per gram.
pub const DEFAULT_PRICE: f64 = 0.80;

#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn price(&self) -> f64;
}

/// A price that only changes when told to.
#[derive(Debug)]
pub struct StaticPrice {
    price: RwLock<f64>,
}

impl StaticPrice {
    pub fn new(price: f64) -> Self {
        Self {
            price: RwLock::new(price),
        }
    }

    pub fn set(&self, price: f64) {
        *self.price.write() = price;
    }
}

impl Default for StaticPrice {
    fn default() -> Self {
        Self::new(DEFAULT_PRICE)
    }
}

#[async_trait]
impl PriceSource for StaticPrice {
    async fn price(&self) -> f64 {
        *self.price.read()
    }
}
