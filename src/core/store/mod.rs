//! Persistence stores: broker access tokens and paper fills.

mod paper;
mod token;

pub use paper::PaperFillStore;
pub use token::TokenStore;
