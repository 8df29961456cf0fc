//! Data types for the template humanizer (components A–C).
//!
//! This module holds the pure data definitions from `spec.md` §3 and §4.A.
//! The parsing, selection, and processing algorithms that operate on these
//! types live in the `wa-template` crate.

use serde::{Deserialize, Serialize};

/// A single `|`-delimited variation block found in a raw template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Position of this block among all blocks in the template, in
    /// left-to-right order of appearance.
    pub index: usize,
    /// Byte offset of the block's first character in the raw string.
    pub start_offset: usize,
    /// Byte offset one past the block's last character in the raw string.
    pub end_offset: usize,
    /// The block's options, in the order they appeared, trimmed of
    /// surrounding ASCII whitespace and with empty parts dropped.
    ///
    /// Invariant: `2 <= options.len() <= 10`.
    pub options: Vec<String>,
}

impl Block {
    /// Number of Unicode scalar values in the block's the longest option.
    #[must_use]
    pub fn longest_option_chars(&self) -> usize {
        self.options.iter().map(|o| o.chars().count()).max().unwrap_or(0)
    }

    /// `true` if any two options in this block are textually identical.
    #[must_use]
    pub fn has_duplicate_options(&self) -> bool {
        let mut seen = std::collections::HashSet::new();
        !self.options.iter().all(|o| seen.insert(o.as_str()))
    }
}

/// The choice of one option within one block, made for a single send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    /// Index of the block this selection applies to.
    pub block_index: usize,
    /// Index of the chosen option within `blocks[block_index].options`.
    pub option_index: usize,
}

impl Selection {
    /// Resolve the selected option's text against the owning block's list.
    ///
    /// Returns `None` if `option_index` is out of range for `block`.
    #[must_use]
    pub fn resolve<'a>(&self, block: &'a Block) -> Option<&'a str> {
        block.options.get(self.option_index).map(String::as_str)
    }
}

/// A single recorded variation selection together with the text it
/// resolved to, as stored in a [`crate::VariationLogEntry`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionRecord {
    /// Index of the block this selection applies to.
    pub block_index: usize,
    /// Index of the chosen option within the block.
    pub option_index: usize,
    /// The resolved option text at selection time (denormalised for
    /// durability — independent of later template edits).
    pub option_text: String,
}

/// A hard validation failure that makes a [`Template`] unusable for
/// sending (`spec.md` §4.A).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationError {
    /// A block resolved to fewer than 2 usable options.
    InsufficientVariations {
        /// Index of the offending block.
        block_index: usize,
        /// Number of usable options found.
        found: usize,
    },
    /// A block has more than 10 options.
    TooManyVariations {
        /// Index of the offending block.
        block_index: usize,
        /// Number of options found.
        found: usize,
    },
    /// The template has more than 20 blocks in total.
    TooManyBlocks {
        /// Total number of blocks found.
        found: usize,
    },
    /// An option exceeds the 500 Unicode-scalar-value limit.
    OptionTooLong {
        /// Index of the offending block.
        block_index: usize,
        /// Length of the offending option, in Unicode scalar values.
        length: usize,
    },
    /// Catch-all for any other parse failure.
    ParseError {
        /// Human-readable description.
        reason: String,
    },
}

/// A soft issue that does not invalidate a [`Template`] but is worth
/// surfacing to the caller (`spec.md` §4.A).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationWarning {
    /// A block contains an option that is empty after trimming (and was
    /// therefore dropped before counting).
    EmptyVariations {
        /// Index of the offending block.
        block_index: usize,
    },
    /// A block contains two or more textually identical options.
    DuplicateVariations {
        /// Index of the offending block.
        block_index: usize,
    },
    /// The template has no static (non-block) text at all.
    NoStaticText,
    /// The template contains no variation blocks at all.
    NoVariations,
    /// An option is close to the 500-character limit.
    OptionNearLimit {
        /// Index of the offending block.
        block_index: usize,
        /// Length of the option, in Unicode scalar values.
        length: usize,
    },
}

/// The parsed structure of a raw message (`spec.md` §3, `Template`).
///
/// Transient and derived: never persisted directly, always recomputed (or
/// served from the [`wa-template`](../../wa_template/index.html) parse
/// cache) from `raw`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Template {
    /// The verbatim input string this template was parsed from.
    pub raw: String,
    /// Variation blocks found in `raw`, in order of appearance.
    pub blocks: Vec<Block>,
    /// `{{name}}` variable names referenced in `raw`, in order of first
    /// appearance, without duplicates.
    pub variable_names: Vec<String>,
    /// `true` if `errors` is empty.
    pub is_valid: bool,
    /// Hard validation failures (empty when `is_valid`).
    pub errors: Vec<ValidationError>,
    /// Soft issues that do not block sending.
    pub warnings: Vec<ValidationWarning>,
    /// Product of every block's option count; `1` when there are no
    /// blocks.
    pub total_combinations: u64,
}

impl Template {
    /// Maximum number of variation blocks permitted in a single template.
    pub const MAX_BLOCKS: usize = 20;
    /// Maximum option length, in Unicode scalar values.
    pub const MAX_OPTION_CHARS: usize = 500;
    /// Minimum options per block.
    pub const MIN_OPTIONS: usize = 2;
    /// Maximum options per block.
    pub const MAX_OPTIONS: usize = 10;

    /// Returns `true` if this template has no variation blocks at all
    /// (`total_combinations == 1`, per P4).
    #[must_use]
    pub fn is_block_free(&self) -> bool {
        self.blocks.is_empty()
    }
}
