//! Repository traits for record store operations.

pub mod uploads;

pub use uploads::{CompletionFields, PromotionFields, UploadRepo};
