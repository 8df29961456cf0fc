//! TemplateProcessor (component C, `spec.md` §4.C).
//!
//! Ties the parser, selector, and parse cache together into the single
//! entry point campaign dispatch and previews actually call.

use crate::cache::ParseCache;
use crate::selector::RandomSelector;
use std::collections::BTreeMap;
use std::sync::Arc;
use wa_core::random::OsRandomSource;
use wa_core::template::{Selection, SelectionRecord, Template, ValidationError, ValidationWarning};

/// Options controlling a single [`TemplateProcessor::process`] call.
#[derive(Debug, Clone, Default)]
pub struct ProcessOptions {
    /// Variables to substitute into `{{name}}` placeholders.
    pub variables: BTreeMap<String, String>,
    /// If `true`, return as soon as parsing fails without attempting
    /// selection or substitution.
    pub validate_only: bool,
    /// Deterministic selection seed. When set, selection uses
    /// [`SeededRandomSource`] rather than the processor's default source.
    pub seed: Option<u64>,
}

/// Result of processing one raw template once.
#[derive(Debug, Clone)]
pub struct ProcessedMessage {
    /// `false` if the template failed validation; no panic is ever raised.
    pub success: bool,
    /// The verbatim input.
    pub raw: String,
    /// The fully substituted text. Equal to `raw` when processing failed.
    pub final_text: String,
    /// The selections made for this run, in block order.
    pub selections: Vec<SelectionRecord>,
    /// Variable names that were substituted.
    pub applied_variables: Vec<String>,
    /// Variable names referenced in the template but absent from the
    /// supplied variable map; their placeholders are left verbatim.
    pub missing_variables: Vec<String>,
    /// The parsed template this run was based on.
    pub parsed: Arc<Template>,
    /// Hard validation failures, mirrored from `parsed.errors`.
    pub errors: Vec<ValidationError>,
    /// Soft issues, mirrored from `parsed.warnings`.
    pub warnings: Vec<ValidationWarning>,
}

/// Stateful entry point: owns the parse cache and the default random
/// source, and exposes `process`/`preview`/`validate`.
pub struct TemplateProcessor {
    cache: ParseCache,
    selector: RandomSelector,
    default_source: OsRandomSource,
}

impl TemplateProcessor {
    /// Create a processor with a parse cache of the given `capacity`.
    #[must_use]
    pub fn new(cache_capacity: usize) -> Self {
        Self {
            cache: ParseCache::new(cache_capacity),
            selector: RandomSelector,
            default_source: OsRandomSource,
        }
    }

    /// Parse (or fetch from cache) and validate `raw` without selecting or
    /// substituting anything.
    #[must_use]
    pub fn validate(&self, raw: &str) -> Arc<Template> {
        self.cache.get_or_parse(raw)
    }

    /// Process `raw` once per `opts`.
    #[must_use]
    pub fn process(&self, raw: &str, opts: &ProcessOptions) -> ProcessedMessage {
        let parsed = self.cache.get_or_parse(raw);

        if !parsed.is_valid {
            return ProcessedMessage {
                success: false,
                raw: raw.to_string(),
                final_text: raw.to_string(),
                selections: Vec::new(),
                applied_variables: Vec::new(),
                missing_variables: Vec::new(),
                parsed: parsed.clone(),
                errors: parsed.errors.clone(),
                warnings: parsed.warnings.clone(),
            };
        }
        if opts.validate_only {
            return ProcessedMessage {
                success: true,
                raw: raw.to_string(),
                final_text: raw.to_string(),
                selections: Vec::new(),
                applied_variables: Vec::new(),
                missing_variables: Vec::new(),
                parsed: parsed.clone(),
                errors: Vec::new(),
                warnings: parsed.warnings.clone(),
            };
        }

        let selections = match opts.seed {
            Some(seed) => self.selector.select_with_seed(&parsed.blocks, seed),
            None => self.selector.select_one(&parsed.blocks, &self.default_source),
        };

        let after_blocks = substitute_blocks(&parsed, &selections);
        let substitution = substitute_variables(&after_blocks, &opts.variables);

        let selection_records = selections
            .iter()
            .filter_map(|s| {
                let block = parsed.blocks.iter().find(|b| b.index == s.block_index)?;
                s.resolve(block).map(|text| SelectionRecord {
                    block_index: s.block_index,
                    option_index: s.option_index,
                    option_text: text.to_string(),
                })
            })
            .collect();

        ProcessedMessage {
            success: true,
            raw: raw.to_string(),
            final_text: substitution.text,
            selections: selection_records,
            applied_variables: substitution.applied,
            missing_variables: substitution.missing,
            parsed: parsed.clone(),
            errors: Vec::new(),
            warnings: parsed.warnings.clone(),
        }
    }

    /// Produce up to `n` (capped at 10) preview messages, attempting to
    /// yield textually distinct finals.
    #[must_use]
    pub fn preview(&self, raw: &str, variables: &BTreeMap<String, String>, n: usize) -> Vec<ProcessedMessage> {
        let n = n.min(10).max(1);
        let parsed = self.cache.get_or_parse(raw);
        if !parsed.is_valid {
            return vec![self.process(
                raw,
                &ProcessOptions {
                    variables: variables.clone(),
                    validate_only: false,
                    seed: None,
                },
            )];
        }

        let selection_sets = self.selector.select_many(&parsed.blocks, &self.default_source, n);
        selection_sets
            .into_iter()
            .map(|selections| self.render(&parsed, &selections, variables))
            .collect()
    }

    fn render(&self, parsed: &Arc<Template>, selections: &[Selection], variables: &BTreeMap<String, String>) -> ProcessedMessage {
        let after_blocks = substitute_blocks(parsed, selections);
        let substitution = substitute_variables(&after_blocks, variables);
        let selection_records = selections
            .iter()
            .filter_map(|s| {
                let block = parsed.blocks.iter().find(|b| b.index == s.block_index)?;
                s.resolve(block).map(|text| SelectionRecord {
                    block_index: s.block_index,
                    option_index: s.option_index,
                    option_text: text.to_string(),
                })
            })
            .collect();
        ProcessedMessage {
            success: true,
            raw: parsed.raw.clone(),
            final_text: substitution.text,
            selections: selection_records,
            applied_variables: substitution.applied,
            missing_variables: substitution.missing,
            parsed: parsed.clone(),
            errors: Vec::new(),
            warnings: parsed.warnings.clone(),
        }
    }

    /// Hit/miss counters for the underlying parse cache.
    #[must_use]
    pub fn cache_stats(&self) -> (u64, u64) {
        (self.cache.hits(), self.cache.misses())
    }
}

/// Replace each block's byte range in `parsed.raw` with its selected
/// option text, working right-to-left so earlier offsets stay valid, and
/// leaving all surrounding text untouched.
fn substitute_blocks(parsed: &Template, selections: &[Selection]) -> String {
    let mut out = parsed.raw.clone();
    let mut ordered: Vec<&Selection> = selections.iter().collect();
    ordered.sort_by_key(|s| std::cmp::Reverse(s.block_index));
    for selection in ordered {
        let Some(block) = parsed.blocks.iter().find(|b| b.index == selection.block_index) else {
            continue;
        };
        let Some(text) = selection.resolve(block) else {
            continue;
        };
        out.replace_range(block.start_offset..block.end_offset, text);
    }
    out
}

struct Substitution {
    text: String,
    applied: Vec<String>,
    missing: Vec<String>,
}

/// Replace `{{name}}` placeholders in `text` with values from `variables`.
/// A placeholder with no matching key is left exactly as written.
fn substitute_variables(text: &str, variables: &BTreeMap<String, String>) -> Substitution {
    let chars: Vec<char> = text.chars().collect();
    let n = chars.len();
    let mut out = String::with_capacity(text.len());
    let mut applied = Vec::new();
    let mut missing = Vec::new();
    let mut i = 0;
    while i < n {
        if i + 1 < n && chars[i] == '{' && chars[i + 1] == '{' {
            if let Some((name, consumed)) = crate::parser::match_placeholder(&chars, i) {
                match variables.get(&name) {
                    Some(value) => {
                        out.push_str(value);
                        if !applied.contains(&name) {
                            applied.push(name);
                        }
                    }
                    None => {
                        let verbatim: String = chars[i..i + consumed].iter().collect();
                        out.push_str(&verbatim);
                        if !missing.contains(&name) {
                            missing.push(name);
                        }
                    }
                }
                i += consumed;
                continue;
            }
        }
        out.push(chars[i]);
        i += 1;
    }
    Substitution { text: out, applied, missing }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(variables: &[(&str, &str)]) -> ProcessOptions {
        ProcessOptions {
            variables: variables.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            validate_only: false,
            seed: Some(1),
        }
    }

    #[test]
    fn processes_scenario_1() {
        let processor = TemplateProcessor::new(10);
        let out = processor.process("Hi|Hello {{name}}, ok?|fine?", &opts(&[("name", "Dana")]));
        assert!(out.success);
        assert!(out.final_text.contains("Dana"));
        assert!(out.final_text.starts_with("Hi") || out.final_text.starts_with("Hello"));
        assert_eq!(out.selections.len(), 2);
        assert_eq!(out.applied_variables, vec!["name".to_string()]);
        assert!(out.missing_variables.is_empty());
    }

    #[test]
    fn missing_variable_left_verbatim() {
        let processor = TemplateProcessor::new(10);
        let out = processor.process("Hi|Hello {{name}}", &opts(&[]));
        assert!(out.success);
        assert!(out.final_text.contains("{{name}}"));
        assert_eq!(out.missing_variables, vec!["name".to_string()]);
    }

    #[test]
    fn invalid_template_reports_failure_not_panic() {
        let processor = TemplateProcessor::new(10);
        let out = processor.process("Solo|", &opts(&[]));
        assert!(!out.success);
        assert!(!out.errors.is_empty());
        assert_eq!(out.final_text, out.raw);
    }

    #[test]
    fn validate_only_skips_selection() {
        let processor = TemplateProcessor::new(10);
        let out = processor.process(
            "Hi|Hello",
            &ProcessOptions {
                variables: BTreeMap::new(),
                validate_only: true,
                seed: None,
            },
        );
        assert!(out.success);
        assert!(out.selections.is_empty());
        assert_eq!(out.final_text, "Hi|Hello");
    }

    #[test]
    fn seeded_processing_is_deterministic_p5() {
        let processor = TemplateProcessor::new(10);
        let a = processor.process("Hi|Hello {{name}}", &opts(&[("name", "Rae")]));
        let b = processor.process("Hi|Hello {{name}}", &opts(&[("name", "Rae")]));
        assert_eq!(a.final_text, b.final_text);
        assert_eq!(a.selections, b.selections);
    }

    #[test]
    fn variations_substituted_before_variables_p12() {
        let processor = TemplateProcessor::new(10);
        let out = processor.process("Hi {{name}}|Hey {{name}}", &opts(&[("name", "Sam")]));
        assert!(out.success);
        assert!(out.final_text == "Hi Sam" || out.final_text == "Hey Sam");
    }

    #[test]
    fn block_free_template_is_unchanged_besides_variables() {
        let processor = TemplateProcessor::new(10);
        let out = processor.process("Hello {{name}}, welcome!", &opts(&[("name", "Lee")]));
        assert_eq!(out.final_text, "Hello Lee, welcome!");
        assert!(out.selections.is_empty());
    }

    #[test]
    fn final_text_reparses_to_zero_blocks_p2() {
        let processor = TemplateProcessor::new(10);
        let out = processor.process("Hi|Hello there", &opts(&[]));
        let reparsed = crate::parser::parse(&out.final_text);
        assert!(reparsed.blocks.is_empty());
    }

    #[test]
    fn preview_yields_distinct_finals_when_possible() {
        let processor = TemplateProcessor::new(10);
        let previews = processor.preview("Hi|Hello|Hey", &BTreeMap::new(), 3);
        assert_eq!(previews.len(), 3);
        let finals: std::collections::HashSet<_> = previews.iter().map(|p| p.final_text.clone()).collect();
        assert_eq!(finals.len(), 3);
    }

    #[test]
    fn preview_caps_at_ten() {
        let processor = TemplateProcessor::new(10);
        let previews = processor.preview("Hi|Hello", &BTreeMap::new(), 50);
        assert!(previews.len() <= 10);
    }

    #[test]
    fn repeated_process_calls_use_the_cache() {
        let processor = TemplateProcessor::new(10);
        let _ = processor.process("Hi|Hello", &opts(&[]));
        let _ = processor.process("Hi|Hello", &opts(&[]));
        let (hits, misses) = processor.cache_stats();
        assert_eq!(misses, 1);
        assert_eq!(hits, 1);
    }

    #[test]
    fn unseeded_selection_uses_os_source_without_panicking() {
        let processor = TemplateProcessor::new(10);
        let out = processor.process(
            "Hi|Hello",
            &ProcessOptions {
                variables: BTreeMap::new(),
                validate_only: false,
                seed: None,
            },
        );
        assert!(out.success);
    }
}
