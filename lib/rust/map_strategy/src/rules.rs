//! Fully-qualified planner records.
//!
//! These are the read-only artifacts of plan construction: every field is
//! known up front, nothing mutates after build.

use crate::mapper::Mapper;
use crate::reference::RefName;
use serde::Serialize;
use std::path::PathBuf;

/// One alignment step of one sample.
#[derive(Clone, Debug, Serialize)]
pub struct MapRule {
    pub project_id: String,
    pub sample_id: String,
    pub species: String,
    /// Logical name of the input BAM: the uBAM name or `not_<prev out>`.
    pub input_name: String,
    /// `<ref_name>.<mapper>`.
    pub out_name: String,
    pub mapper: Mapper,
    pub ref_name: RefName,
    pub input_path: PathBuf,
    pub out_path: PathBuf,
    /// Where this rule's unmapped residue spills; the input of any
    /// downstream stage.
    pub unmapped_path: PathBuf,
    /// Reference sequence the index is built from.
    pub ref_path: PathBuf,
    /// Source annotation, when the reference carries one.
    pub ann_path: Option<PathBuf>,
    /// Processed GTF driving the tagging stage.
    pub ann_final: Option<PathBuf>,
    /// Pre-compiled annotation side-table directory.
    pub ann_final_compiled: Option<PathBuf>,
    /// Sentinel file proving the side-table is compiled.
    pub ann_final_compiled_target: Option<PathBuf>,
    /// Log of the tagging stage.
    pub ann_log: Option<PathBuf>,
    pub map_flags: String,
    /// Index directory.
    pub map_index: PathBuf,
    /// Index location as handed to the mapper's command line.
    pub map_index_param: PathBuf,
    /// Sentinel file whose existence proves the index is built.
    pub map_index_file: PathBuf,
    pub log_path: PathBuf,
    pub splice_header_log: PathBuf,
    /// The run log downstream QC resolves through the canonical STAR
    /// final-log symlink. STAR rules only.
    pub star_run_log: Option<PathBuf>,
    /// Advisory thread-count for the executor.
    pub threads: usize,
}

impl MapRule {
    pub fn is_annotated(&self) -> bool {
        self.ann_path.is_some()
    }
}

/// A pure renaming of an existing BAM.
#[derive(Clone, Debug, Serialize)]
pub struct SymlinkRule {
    pub project_id: String,
    pub sample_id: String,
    pub ref_name: RefName,
    /// Base name of the source map rule.
    pub link_src: String,
    /// Base name of the symlink.
    pub link_name: String,
    pub src_path: PathBuf,
    pub link_path: PathBuf,
}
