pub mod azampay;

pub use azampay::{AzamPayBankProvider, AzamPayMnoProvider, AzamPayTokenSource};
