//! Parser for the mapping-strategy string.
//!
//! `bowtie2:rRNA->STAR:genome:final` reads: deplete against `rRNA` with
//! bowtie2, feed the unmapped residue forward into STAR against `genome`,
//! and symlink that result to the canonical final BAM. Stages separated by
//! `->` run sequentially; rules separated by `,` within a stage share one
//! input and run in parallel.
//!
//! The parser is pure: a string in, ordered rules out. No sample context,
//! no filesystem, no registry lookups. Whitespace inside a rule is not
//! tolerated.

use crate::mapper::Mapper;
use crate::reference::RefName;
use log::warn;
use std::str::FromStr;
use thiserror::Error;

/// The literal inside a rule label that stands for the caller's final
/// token. `STAR:genome:final` with a final token of
/// `final.polyA_adapter_trimmed` links `genome.STAR` under that name.
pub const FINAL_LABEL: &str = "final";

#[derive(Debug, Error)]
pub enum StrategyError {
    #[error("malformed rule '{rule}': expected mapper:ref or mapper:ref:label")]
    MalformedRule { rule: String },
    #[error("unknown mapper '{mapper}' in rule '{rule}'")]
    UnknownMapper { mapper: String, rule: String },
    #[error("mapping strategy '{strategy}' produced no rules")]
    EmptyStrategy { strategy: String },
    #[error(
        "stage '{stage}' runs {n} rules in parallel but only the residue of the \
         last one would feed the next stage; the residue policy forbids this"
    )]
    AmbiguousResidue { stage: String, n: usize },
}

/// What feeds the next stage when a stage ran several rules in parallel.
/// Only one rule's unmapped residue can flow forward; the residues of the
/// other rules stop there.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ResiduePolicy {
    /// The residue of the last rule in the stage flows forward. The other
    /// residues are dropped silently.
    #[default]
    LastWins,
    /// Reject any strategy where the choice would matter.
    Forbid,
}

/// One alignment step as parsed, before sample qualification.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ParsedMapRule {
    /// Logical name of the input BAM: the uBAM name or `not_<prev out>`.
    pub input_name: String,
    pub mapper: Mapper,
    pub ref_name: RefName,
    /// `<ref_name>.<mapper>`.
    pub out_name: String,
}

/// A pure renaming of a rule's output, as parsed.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ParsedSymlink {
    /// `out_name` of the source map rule.
    pub link_src: String,
    /// Base name of the symlink, after `final` substitution.
    pub link_name: String,
    pub ref_name: RefName,
}

/// Parser output: map rules in execution order plus symlink rules.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct StrategyRules {
    pub map_rules: Vec<ParsedMapRule>,
    pub symlinks: Vec<ParsedSymlink>,
}

/// `ref` and `label` are identifiers; whitespace inside a rule is malformed.
fn is_identifier(token: &str) -> bool {
    !token.is_empty()
        && token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Parse `mapstr` into ordered rules.
///
/// `ubam_name` names the initial input BAM; `final_name` is the canonical
/// final token, substituted for the literal `final` inside labels. If no
/// label resolves to `final_name`, a final symlink from the last rule is
/// synthesised, so the output always carries exactly one.
pub fn parse_strategy(
    mapstr: &str,
    ubam_name: &str,
    final_name: &str,
    policy: ResiduePolicy,
) -> Result<StrategyRules, StrategyError> {
    if mapstr.trim().is_empty() {
        return Err(StrategyError::EmptyStrategy {
            strategy: mapstr.to_string(),
        });
    }

    let mut rules = StrategyRules::default();
    // (stage text, rule count), for the residue-policy check
    let mut stages = Vec::new();
    let mut left = ubam_name.to_string();

    for stage in mapstr.split("->") {
        // consecutive identical stages collapse without producing a rule
        if stages.last().is_some_and(|(prev, _)| *prev == stage) {
            warn!("collapsed no-op stage '{stage}' in mapping strategy '{mapstr}'");
            continue;
        }

        let mut stage_rules = 0usize;
        let mut last_out = None;
        for rule in stage.split(',') {
            let fields: Vec<&str> = rule.split(':').collect();
            let (mapper, ref_name, label) = match fields[..] {
                [mapper, ref_name] => (mapper, ref_name, None),
                [mapper, ref_name, label] => (mapper, ref_name, Some(label)),
                _ => {
                    return Err(StrategyError::MalformedRule {
                        rule: rule.to_string(),
                    });
                }
            };
            if mapper.is_empty()
                || !is_identifier(ref_name)
                || label.is_some_and(|label| !is_identifier(label))
            {
                return Err(StrategyError::MalformedRule {
                    rule: rule.to_string(),
                });
            }
            let mapper = Mapper::from_str(mapper).map_err(|_| StrategyError::UnknownMapper {
                mapper: mapper.to_string(),
                rule: rule.to_string(),
            })?;

            let out_name = format!("{ref_name}.{mapper}");
            rules.map_rules.push(ParsedMapRule {
                input_name: left.clone(),
                mapper,
                ref_name: RefName::from(ref_name),
                out_name: out_name.clone(),
            });
            if let Some(label) = label {
                rules.symlinks.push(ParsedSymlink {
                    link_src: out_name.clone(),
                    link_name: label.replace(FINAL_LABEL, final_name),
                    ref_name: RefName::from(ref_name),
                });
            }
            last_out = Some(out_name);
            stage_rules += 1;
        }

        // a stage always parses at least one rule, or errored above
        left = format!("not_{}", last_out.expect("stage with no rules"));
        stages.push((stage, stage_rules));
    }

    if policy == ResiduePolicy::Forbid {
        for (i, &(stage, n)) in stages.iter().enumerate() {
            if n > 1 && i + 1 < stages.len() {
                return Err(StrategyError::AmbiguousResidue {
                    stage: stage.to_string(),
                    n,
                });
            }
        }
    }

    if !rules.symlinks.iter().any(|link| link.link_name == final_name) {
        let last = rules
            .map_rules
            .last()
            .expect("non-empty strategy with no rules");
        rules.symlinks.push(ParsedSymlink {
            link_src: last.out_name.clone(),
            link_name: final_name.to_string(),
            ref_name: last.ref_name.clone(),
        });
    }

    Ok(rules)
}
