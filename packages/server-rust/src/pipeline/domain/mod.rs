//! In-process implementations of the business use-cases.
//!
//! - [`courier`]: courier roster with random assignment

pub mod courier;

pub use courier::CourierPool;
