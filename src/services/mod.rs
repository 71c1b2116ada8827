// Services module for the headshot backend
// Business logic layer between the HTTP handlers and the models

pub mod background_tasks;
pub mod bundle_link;
pub mod email;
pub mod generation;
pub mod jwt;
pub mod ledger;
pub mod oauth;
pub mod payments;
pub mod replicate;
pub mod session;
pub mod storage;
pub mod stripe;
pub mod training;

// Re-export commonly used services
pub use background_tasks::initialize_background_tasks;
pub use bundle_link::{BundleLinkError, BundleLinkParams, BundleLinkSigner};
pub use email::{EmailError, EmailService};
pub use generation::{GenerateHeadshotRequest, GenerationService};
pub use jwt::{JwtConfig, JwtError, JwtService, TokenPair};
pub use ledger::{Charge, LedgerEntry, LedgerError, Reconciliation, TokenLedger};
pub use oauth::{GoogleOAuth, OAuthError, OAuthProfile, OAuthProvider};
pub use payments::{CreateCheckoutRequest, PaymentService, PaymentSettings, WebhookOutcome};
pub use replicate::{InferenceProvider, ProviderError, ReplicateClient};
pub use session::SessionService;
pub use storage::{FileStorage, StorageError};
pub use stripe::{PaymentProvider, StripeClient, StripeError};
pub use training::{TrainingService, TrainingSettings, TrainingWebhook};
