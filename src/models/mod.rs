pub mod auth;
pub mod example_headshot;
pub mod headshot;
pub mod payment;
pub mod photo;
pub mod session;
pub mod token_transaction;
pub mod training_model;
pub mod user;

// Re-export common types
pub use auth::*;
pub use example_headshot::ExampleHeadshot;
pub use headshot::{DeletedHeadshot, Headshot, NewHeadshot};
pub use payment::{NewPayment, Payment, PaymentStatus};
pub use photo::{NewUploadedPhoto, UploadedPhoto};
pub use session::{SessionData, SessionRecord};
pub use token_transaction::{NewTokenTransaction, TokenTransaction, TransactionType};
pub use training_model::{ModelStatus, NewTrainingModel, TerminalUpdate, TrainingModel};
pub use user::{NewUser, User, UserProfileUpdate};
