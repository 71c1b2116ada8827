// Application state shared across handlers
use std::sync::Arc;

use crate::{
    app_config::AppConfig,
    config::Catalog,
    db::DieselPool,
    services::{
        bundle_link::BundleLinkSigner,
        email::EmailService,
        generation::GenerationService,
        jwt::{JwtConfig, JwtService},
        ledger::TokenLedger,
        oauth::{GoogleOAuth, OAuthProvider},
        payments::{PaymentService, PaymentSettings},
        replicate::{InferenceProvider, ReplicateClient},
        session::SessionService,
        storage::FileStorage,
        stripe::{PaymentProvider, StripeClient},
        training::{TrainingService, TrainingSettings},
        EmailError,
    },
};

/// External collaborators, swappable for in-process fakes
#[derive(Clone)]
pub struct Providers {
    pub inference: Arc<dyn InferenceProvider>,
    pub payments: Arc<dyn PaymentProvider>,
    pub oauth: Arc<dyn OAuthProvider>,
}

impl Providers {
    /// HTTP clients for Replicate, Stripe and Google
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            inference: Arc::new(ReplicateClient::new(&config.replicate)),
            payments: Arc::new(StripeClient::new(&config.stripe)),
            oauth: Arc::new(GoogleOAuth::new(config.google.clone())),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub diesel_pool: DieselPool,
    pub config: Arc<AppConfig>,
    pub catalog: Arc<Catalog>,
    pub ledger: TokenLedger,
    pub training: TrainingService,
    pub generation: GenerationService,
    pub payments: PaymentService,
    pub storage: FileStorage,
    pub bundle_links: BundleLinkSigner,
    pub jwt_service: Arc<JwtService>,
    pub sessions: SessionService,
    pub oauth: Arc<dyn OAuthProvider>,
    pub max_connections: u32,
}

impl AppState {
    pub fn new(
        diesel_pool: DieselPool,
        config: AppConfig,
        providers: Providers,
    ) -> Result<Self, EmailError> {
        let config = Arc::new(config);
        let catalog = Arc::new(Catalog::from_config(&config));
        let storage = FileStorage::new(&config.storage);
        let bundle_links = BundleLinkSigner::from_config(&config.storage);
        let email = EmailService::new(config.email.clone())?;

        let training = TrainingService::new(
            diesel_pool.clone(),
            providers.inference.clone(),
            email,
            TrainingSettings::from_app_config(&config, bundle_links.clone()),
        );
        let generation = GenerationService::new(
            diesel_pool.clone(),
            providers.inference.clone(),
            storage.clone(),
            config.replicate.owner.clone(),
        );
        let payments = PaymentService::new(
            diesel_pool.clone(),
            providers.payments.clone(),
            catalog.clone(),
            PaymentSettings::from_app_config(&config),
        );

        Ok(Self {
            ledger: TokenLedger::new(diesel_pool.clone()),
            sessions: SessionService::new(diesel_pool.clone(), config.session.clone()),
            jwt_service: Arc::new(JwtService::new(JwtConfig::from_app_config(&config.jwt))),
            oauth: providers.oauth,
            max_connections: config.database.max_connections,
            diesel_pool,
            catalog,
            training,
            generation,
            payments,
            storage,
            bundle_links,
            config,
        })
    }
}
