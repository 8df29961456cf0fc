//! VariationParser (component A, `spec.md` §4.A).
//!
//! Tokenizes a raw template into static fragments and variation blocks and
//! validates it. `parse` never fails — it always returns a [`Template`]
//! with `is_valid` set and every problem recorded in `errors`/`warnings`.

use wa_core::template::{Block, Template, ValidationError, ValidationWarning};

/// Parse `raw` into a [`Template`].
///
/// Deterministic: two calls with the same `raw` yield structurally equal
/// templates (P1).
#[must_use]
pub fn parse(raw: &str) -> Template {
    let segments = segment_ranges(raw);
    let mut blocks: Vec<Block> = Vec::new();
    let mut errors: Vec<ValidationError> = Vec::new();
    let mut warnings: Vec<ValidationWarning> = Vec::new();
    let mut consumed_as_block = 0usize;

    for (start, end) in &segments {
        let segment = &raw[*start..*end];
        if !segment.contains('|') {
            continue;
        }

        let candidate_index = blocks.len();
        let raw_parts: Vec<&str> = segment.split('|').collect();
        let trimmed: Vec<String> = raw_parts
            .iter()
            .map(|p| p.trim_matches(|c: char| c.is_ascii_whitespace()).to_string())
            .collect();
        let had_empty = trimmed.iter().any(String::is_empty);
        let parts: Vec<String> = trimmed.into_iter().filter(|p| !p.is_empty()).collect();

        if had_empty {
            warnings.push(ValidationWarning::EmptyVariations {
                block_index: candidate_index,
            });
        }

        if parts.len() < Template::MIN_OPTIONS {
            errors.push(ValidationError::InsufficientVariations {
                block_index: candidate_index,
                found: parts.len(),
            });
            continue;
        }
        if parts.len() > Template::MAX_OPTIONS {
            errors.push(ValidationError::TooManyVariations {
                block_index: candidate_index,
                found: parts.len(),
            });
            continue;
        }

        if has_duplicates(&parts) {
            warnings.push(ValidationWarning::DuplicateVariations {
                block_index: candidate_index,
            });
        }

        for opt in &parts {
            let len = opt.chars().count();
            if len > Template::MAX_OPTION_CHARS {
                errors.push(ValidationError::OptionTooLong {
                    block_index: candidate_index,
                    length: len,
                });
            } else if len * 10 >= Template::MAX_OPTION_CHARS * 9 {
                warnings.push(ValidationWarning::OptionNearLimit {
                    block_index: candidate_index,
                    length: len,
                });
            }
        }

        blocks.push(Block {
            index: candidate_index,
            start_offset: *start,
            end_offset: *end,
            options: parts,
        });
        consumed_as_block += 1;
    }

    if blocks.len() > Template::MAX_BLOCKS {
        errors.push(ValidationError::TooManyBlocks { found: blocks.len() });
    }

    let variable_names = extract_variable_names(raw);

    if blocks.is_empty() {
        warnings.push(ValidationWarning::NoVariations);
    }
    if !segments.is_empty() && consumed_as_block == segments.len() {
        warnings.push(ValidationWarning::NoStaticText);
    }

    let total_combinations: u64 = blocks.iter().map(|b| b.options.len() as u64).product();
    let is_valid = errors.is_empty();

    Template {
        raw: raw.to_string(),
        blocks,
        variable_names,
        is_valid,
        errors,
        warnings,
        total_combinations,
    }
}

/// Returns the byte ranges of every maximal run of non-ASCII-whitespace
/// characters in `raw`, in order of appearance.
fn segment_ranges(raw: &str) -> Vec<(usize, usize)> {
    let mut ranges = Vec::new();
    let mut start: Option<usize> = None;
    for (i, ch) in raw.char_indices() {
        if ch.is_ascii_whitespace() {
            if let Some(s) = start.take() {
                ranges.push((s, i));
            }
        } else if start.is_none() {
            start = Some(i);
        }
    }
    if let Some(s) = start {
        ranges.push((s, raw.len()));
    }
    ranges
}

fn has_duplicates(options: &[String]) -> bool {
    let mut seen = std::collections::HashSet::new();
    !options.iter().all(|o| seen.insert(o.as_str()))
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Scan `text` for `{{ name }}` placeholders, returning every distinct
/// `name` in order of first appearance.
pub(crate) fn extract_variable_names(text: &str) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let n = chars.len();
    let mut names = Vec::new();
    let mut i = 0;
    while i + 1 < n {
        if chars[i] == '{' && chars[i + 1] == '{' {
            if let Some((name, consumed)) = match_placeholder(&chars, i) {
                if !names.contains(&name) {
                    names.push(name);
                }
                i += consumed;
                continue;
            }
        }
        i += 1;
    }
    names
}

/// If `chars[at..]` starts with a well-formed `{{ name }}` placeholder,
/// returns the identifier and the number of chars consumed (including both
/// pairs of braces).
pub(crate) fn match_placeholder(chars: &[char], at: usize) -> Option<(String, usize)> {
    let n = chars.len();
    if at + 1 >= n || chars[at] != '{' || chars[at + 1] != '{' {
        return None;
    }
    let mut j = at + 2;
    while j < n && chars[j].is_ascii_whitespace() {
        j += 1;
    }
    let ident_start = j;
    if j >= n || !is_ident_start(chars[j]) {
        return None;
    }
    j += 1;
    while j < n && is_ident_continue(chars[j]) {
        j += 1;
    }
    let ident_end = j;
    while j < n && chars[j].is_ascii_whitespace() {
        j += 1;
    }
    if j + 1 >= n || chars[j] != '}' || chars[j + 1] != '}' {
        return None;
    }
    let name: String = chars[ident_start..ident_end].iter().collect();
    Some((name, j + 2 - at))
}
