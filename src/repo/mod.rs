//! Local working copies.

pub mod cloner;

pub use cloner::{normalize_repo_ref, Checkout, CheckoutGuard, GitCheckout};
