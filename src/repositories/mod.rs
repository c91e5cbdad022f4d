//! # Repository Layer
//!
//! SeaORM access for integrations and token records. Repositories borrow a
//! connection or an open transaction; callers decide the transaction scope.

pub mod integration;
pub mod token_record;

pub use integration::{IntegrationFilter, IntegrationRepository};
pub use token_record::{EncryptedTokens, TokenRecordRepository};
