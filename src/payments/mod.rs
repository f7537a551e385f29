pub mod credentials;
pub mod error;
pub mod factory;
pub mod phone;
pub mod provider;
pub mod providers;
pub mod registry;
pub mod signature;
pub mod state;
pub mod token_cache;
pub mod types;
pub mod utils;

pub use credentials::ProviderEnv;
pub use error::{ErrorCategory, PaymentError, PaymentResult};
pub use factory::PaymentProviderFactory;
pub use provider::PaymentProvider;
pub use registry::ProviderRegistry;
pub use state::{CallbackOutcome, PaymentStatus, TransactionStatus, VisitStatus};
pub use token_cache::{TokenCache, TokenSource};
