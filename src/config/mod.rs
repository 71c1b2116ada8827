// Static product catalog for the headshot backend
// Built once from AppConfig and shared through AppState

pub mod pricing;
pub mod styles;

pub use pricing::{PricePackage, PriceTable, GENERATE_COST, TRAIN_COST};
pub use styles::{build_prompt, Gender, HeadshotStyle};

use crate::app_config::AppConfig;

/// Immutable catalog of purchasable token packages and generation styles
#[derive(Debug, Clone)]
pub struct Catalog {
    pub prices: PriceTable,
}

impl Catalog {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            prices: PriceTable::from_config(&config.stripe),
        }
    }
}
