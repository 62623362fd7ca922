//! Mapping-strategy planner for barcode-tagged spatial transcriptomics
//! pipelines.
//!
//! A compact strategy string such as `bowtie2:rRNA->STAR:genome:final`
//! describes how a sample's unmapped, barcode-tagged BAM flows through a
//! chain of alignments against arbitrary references. This crate parses
//! such strategies, materialises the per-sample dependency graph of BAM
//! artifacts, registers the canonical `final` artifact downstream
//! consumers rely on, and answers the per-artifact lookups a workflow
//! executor makes: inputs, command parameters, index builds, annotation
//! tagging, symlink sources, log paths.
//!
//! The planner is purely computational. It reads the sample table and
//! reference registry once at construction, never touches BAM bytes, and
//! never invokes an aligner; the tables it builds are read-only afterwards.

pub mod commands;
pub mod mapper;
pub mod plan;
pub mod reference;
pub mod rules;
pub mod sample;
pub mod strategy;
pub mod template;

pub use commands::{AnnotationCmd, HeaderSplice, IndexBuild};
pub use mapper::Mapper;
pub use plan::{MapInputs, MapParams, MappingPlan, PlanConfig, PlanError, RiboLog};
pub use reference::{RefName, ReferenceEntry, ReferenceError, ReferenceRegistry};
pub use rules::{MapRule, SymlinkRule};
pub use sample::{SampleRow, SampleTable};
pub use strategy::{parse_strategy, ResiduePolicy, StrategyError, StrategyRules};
