//! wa-template
//!
//! The message humanizer: parses `|`-delimited variation blocks and
//! `{{variable}}` placeholders out of a raw template (component A),
//! resolves one option per block through an injected random source
//! (component B), and substitutes both into a final message (component C),
//! backed by a capacity-bounded parse cache.

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Capacity-bounded, single-writer-per-key parse cache.
pub mod cache;
/// Raw-template tokenizer and validator (component A).
pub mod parser;
/// Processing pipeline tying parsing, selection, and substitution together
/// (component C).
pub mod processor;
/// Random option selector (component B).
pub mod selector;

pub use cache::ParseCache;
pub use parser::parse;
pub use processor::{ProcessOptions, ProcessedMessage, TemplateProcessor};
pub use selector::{DistributionReport, RandomSelector};
