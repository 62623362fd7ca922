//! Path templates for planner artifacts.
//!
//! Every path the planner emits is rendered from one of the `{token}`
//! templates below through [`render`], which validates its tokens. A
//! template cannot silently consume a field it does not declare, and a
//! misspelled token fails loudly instead of leaking braces into a path.

use crate::mapper::Mapper;
use anyhow::{bail, ensure, Result};
use std::path::{Path, PathBuf};

/// Per-sample data root, relative to the project root.
pub const DATA_ROOT: &str =
    "projects/{project_id}/processed_data/{sample_id}/illumina/complete_data";

/// Any BAM directly under the sample data root, by base name.
pub const LINKED_BAM: &str = "{data_root}/{link_name}.bam";

/// Mapped output of one alignment step.
pub const MAPPED_BAM: &str = "{data_root}/{ref_name}.{mapper}.bam";

/// Unmapped residue of one alignment step.
pub const UNMAPPED_BAM: &str = "{data_root}/not_{ref_name}.{mapper}.bam";

/// Per-rule mapper log.
pub const MAPPER_LOG: &str = "{log_dir}/{ref_name}.{mapper}.log";

/// Log of the header-splicing stage that restores BAM provenance.
pub const SPLICE_HEADER_LOG: &str =
    "{log_dir}/{ref_name}.{mapper}.splice_bam_header.log";

/// Log of the annotation-tagging stage.
pub const TAG_LOG: &str = "{log_dir}/{ref_name}.{mapper}.annotator.log";

/// The run log STAR leaves behind, per rule.
pub const STAR_RUN_LOG: &str = "{log_dir}/{ref_name}.{mapper}.Log.final.out";

/// Canonical per-sample STAR final-log filename downstream QC resolves.
pub const STAR_FINAL_LOG: &str = "star.Log.final.out";

/// Substitute `{token}` placeholders in `template` from `fields`.
///
/// An unknown token, an unclosed `{`, or a stray `}` is an error. Fields
/// the template does not consume are permitted.
pub fn render(template: &str, fields: &[(&str, &str)]) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        let head = &rest[..open];
        ensure!(!head.contains('}'), "stray '}}' in template '{template}'");
        out.push_str(head);
        let after = &rest[open + 1..];
        let Some(close) = after.find('}') else {
            bail!("unclosed '{{' in template '{template}'");
        };
        let token = &after[..close];
        ensure!(
            !token.is_empty()
                && token
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_'),
            "invalid token '{{{token}}}' in template '{template}'"
        );
        match fields.iter().find(|(name, _)| *name == token) {
            Some((_, value)) => out.push_str(value),
            None => bail!(
                "template '{template}' consumes '{{{token}}}' but no such field was supplied"
            ),
        }
        rest = &after[close + 1..];
    }
    ensure!(!rest.contains('}'), "stray '}}' in template '{template}'");
    out.push_str(rest);
    Ok(out)
}

/// The rendered roots of one sample's artifact tree, with typed helpers for
/// the paths hanging off them. No ad-hoc path formatting happens outside
/// this type.
#[derive(Clone, Debug)]
pub struct SampleLayout {
    pub data_root: PathBuf,
    pub log_dir: PathBuf,
}

impl SampleLayout {
    pub fn new(project_root: &Path, project_id: &str, sample_id: &str) -> Result<SampleLayout> {
        let data_root = project_root.join(render(
            DATA_ROOT,
            &[("project_id", project_id), ("sample_id", sample_id)],
        )?);
        let log_dir = data_root.join("logs");
        Ok(SampleLayout { data_root, log_dir })
    }

    fn rendered(&self, template: &str, extra: &[(&str, &str)]) -> Result<PathBuf> {
        let data_root = self.data_root.to_string_lossy();
        let log_dir = self.log_dir.to_string_lossy();
        let mut fields: Vec<(&str, &str)> = vec![
            ("data_root", data_root.as_ref()),
            ("log_dir", log_dir.as_ref()),
        ];
        fields.extend_from_slice(extra);
        Ok(PathBuf::from(render(template, &fields)?))
    }

    /// Any BAM directly under the data root, by base name. Covers the uBAM,
    /// `not_…` residues of earlier rules, and symlink targets alike.
    pub fn bam(&self, base_name: &str) -> Result<PathBuf> {
        self.rendered(LINKED_BAM, &[("link_name", base_name)])
    }

    pub fn mapped_bam(&self, ref_name: &str, mapper: Mapper) -> Result<PathBuf> {
        self.rendered(
            MAPPED_BAM,
            &[("ref_name", ref_name), ("mapper", mapper.as_str())],
        )
    }

    pub fn unmapped_bam(&self, ref_name: &str, mapper: Mapper) -> Result<PathBuf> {
        self.rendered(
            UNMAPPED_BAM,
            &[("ref_name", ref_name), ("mapper", mapper.as_str())],
        )
    }

    pub fn mapper_log(&self, ref_name: &str, mapper: Mapper) -> Result<PathBuf> {
        self.rendered(
            MAPPER_LOG,
            &[("ref_name", ref_name), ("mapper", mapper.as_str())],
        )
    }

    pub fn splice_header_log(&self, ref_name: &str, mapper: Mapper) -> Result<PathBuf> {
        self.rendered(
            SPLICE_HEADER_LOG,
            &[("ref_name", ref_name), ("mapper", mapper.as_str())],
        )
    }

    pub fn tag_log(&self, ref_name: &str, mapper: Mapper) -> Result<PathBuf> {
        self.rendered(
            TAG_LOG,
            &[("ref_name", ref_name), ("mapper", mapper.as_str())],
        )
    }

    pub fn star_run_log(&self, ref_name: &str, mapper: Mapper) -> Result<PathBuf> {
        self.rendered(
            STAR_RUN_LOG,
            &[("ref_name", ref_name), ("mapper", mapper.as_str())],
        )
    }

    /// The canonical STAR final-log path downstream QC reads per sample.
    pub fn star_final_log(&self) -> PathBuf {
        self.log_dir.join(STAR_FINAL_LOG)
    }
}
