// Token package pricing

use serde::Serialize;

use crate::app_config::StripeConfig;

/// Tokens charged for training one personalized model
pub const TRAIN_COST: i32 = 6;

/// Tokens charged for a single generated headshot
pub const GENERATE_COST: i32 = 1;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PricePackage {
    pub name: &'static str,
    pub price_id: String,
    pub tokens: i32,
    /// Amount in cents
    pub amount: i32,
}

#[derive(Debug, Clone)]
pub struct PriceTable {
    packages: Vec<PricePackage>,
}

impl PriceTable {
    pub fn from_config(stripe: &StripeConfig) -> Self {
        Self {
            packages: vec![
                PricePackage {
                    name: "SMALL",
                    price_id: stripe.price_small.clone(),
                    tokens: 10,
                    amount: 1000,
                },
                PricePackage {
                    name: "MEDIUM",
                    price_id: stripe.price_medium.clone(),
                    tokens: 30,
                    amount: 2500,
                },
                PricePackage {
                    name: "LARGE",
                    price_id: stripe.price_large.clone(),
                    tokens: 70,
                    amount: 5000,
                },
            ],
        }
    }

    pub fn packages(&self) -> &[PricePackage] {
        &self.packages
    }

    pub fn find(&self, price_id: &str) -> Option<&PricePackage> {
        if price_id.is_empty() {
            return None;
        }
        self.packages.iter().find(|p| p.price_id == price_id)
    }
}
