//! The per-run mapping plan.
//!
//! Building a plan crosses the parsed strategy of every non-merged sample
//! with the reference registry, producing the full dependency graph of BAM
//! artifacts: which alignment makes which file, which file feeds which
//! later alignment, which annotation tagging applies, and which indices
//! must exist first. The tables are populated to completion before any
//! query and are read-only afterwards, so a parallel executor can consult
//! them freely.

use crate::commands::{AnnotationCmd, HeaderSplice, IndexBuild};
use crate::mapper::Mapper;
use crate::reference::ReferenceRegistry;
use crate::rules::{MapRule, SymlinkRule};
use crate::sample::{SampleRow, SampleTable};
use crate::strategy::{parse_strategy, ResiduePolicy, StrategyRules};
use crate::template::SampleLayout;
use anyhow::{bail, Context, Result};
use log::{debug, warn};
use serde::Serialize;
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default logical name of the barcode-tagged unmapped input BAM.
pub const DEFAULT_UBAM_NAME: &str = "unaligned_bc_tagged";

/// Default canonical final artifact name.
pub const DEFAULT_FINAL_NAME: &str = "final";

/// Strategy applied to samples whose row carries none.
pub const DEFAULT_MAP_STRATEGY: &str = "STAR:genome:final";

/// Reference name whose bowtie2 log doubles as the ribosomal-depletion log
/// in QC reports.
pub const RRNA_REF_NAME: &str = "rRNA";

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("two rules of sample '{sample}' resolve to the same artifact '{}'", .path.display())]
    DuplicateArtifact { sample: String, path: PathBuf },
    #[error(
        "symlink '{link_name}' of sample '{sample}' points at '{link_src}', \
         which no map rule of that sample produces"
    )]
    DanglingSymlink {
        sample: String,
        link_name: String,
        link_src: String,
    },
    #[error("'{}' is not an artifact of this plan", .path.display())]
    UnknownArtifact { path: PathBuf },
}

/// `(project_id, sample_id)`: the namespace of every per-sample table.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct SampleKey {
    pub project_id: String,
    pub sample_id: String,
}

impl SampleKey {
    fn of_row(row: &SampleRow) -> SampleKey {
        SampleKey {
            project_id: row.project_id.clone(),
            sample_id: row.sample_id.clone(),
        }
    }
}

impl Display for SampleKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.project_id, self.sample_id)
    }
}

/// Run-wide planning knobs.
#[derive(Clone, Debug)]
pub struct PlanConfig {
    /// Root every per-sample data tree hangs off.
    pub project_root: PathBuf,
    pub ubam_name: String,
    /// Canonical final token, including any processing-flag suffix
    /// (`final.polyA_adapter_trimmed`, ...).
    pub final_name: String,
    pub default_strategy: String,
    pub residue_policy: ResiduePolicy,
}

impl Default for PlanConfig {
    fn default() -> Self {
        PlanConfig {
            project_root: PathBuf::from("."),
            ubam_name: DEFAULT_UBAM_NAME.to_string(),
            final_name: DEFAULT_FINAL_NAME.to_string(),
            default_strategy: DEFAULT_MAP_STRATEGY.to_string(),
            residue_policy: ResiduePolicy::default(),
        }
    }
}

/// Ribosomal-depletion log handle for QC reports.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub enum RiboLog {
    Bowtie2Log(PathBuf),
    /// The sample's strategy never maps against `rRNA`.
    NoRrnaIndex,
}

impl Display for RiboLog {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            RiboLog::Bowtie2Log(path) => write!(f, "{}", path.display()),
            RiboLog::NoRrnaIndex => write!(f, "no_rRNA_index"),
        }
    }
}

/// What the executor needs on hand before running one alignment.
#[derive(Clone, Debug, Serialize)]
pub struct MapInputs {
    pub bam: PathBuf,
    /// Sentinel file of the rule's index; its presence gates the run.
    pub index_file: PathBuf,
    /// Compiled-annotation sentinel, present iff the rule tags.
    pub annotation: Option<PathBuf>,
}

/// Command parameters for one alignment.
#[derive(Clone, Debug, Serialize)]
pub struct MapParams {
    pub flags: String,
    /// Index location as handed to the mapper's command line.
    pub index: PathBuf,
    /// Processed GTF, present iff the rule tags.
    pub annotation: Option<PathBuf>,
    /// Rendered post-alignment stage: tagging, or the pass-through that
    /// merely writes the mapped BAM.
    pub annotation_cmd: String,
}

/// The authoritative artifact tables of one run. Owned by the run; there
/// is no process-global state.
#[derive(Debug, Default)]
pub struct MappingPlan {
    map_rules: BTreeMap<PathBuf, MapRule>,
    symlinks: BTreeMap<PathBuf, SymlinkRule>,
    index_builds: BTreeMap<PathBuf, IndexBuild>,
    all_bams: BTreeMap<SampleKey, Vec<PathBuf>>,
    annotated_bams: BTreeMap<SampleKey, Vec<PathBuf>>,
    star_final_log_links: BTreeMap<PathBuf, PathBuf>,
    final_bams: Vec<PathBuf>,
}

impl MappingPlan {
    /// Build the plan for every non-merged sample. Any structural error
    /// aborts construction with the offending sample named; no partial
    /// plan is exposed.
    pub fn build(
        samples: &SampleTable,
        registry: &ReferenceRegistry,
        config: &PlanConfig,
    ) -> Result<MappingPlan> {
        let mut plan = MappingPlan::default();
        for row in samples.rows() {
            if row.is_merged {
                warn!(
                    "skipping merged sample {}/{}: plan inherited from upstream merge",
                    row.project_id, row.sample_id
                );
                continue;
            }
            plan.add_sample(row, registry, config).with_context(|| {
                format!(
                    "failed to plan sample '{}/{}'",
                    row.project_id, row.sample_id
                )
            })?;
        }
        plan.final_bams.sort();
        Ok(plan)
    }

    fn add_sample(
        &mut self,
        row: &SampleRow,
        registry: &ReferenceRegistry,
        config: &PlanConfig,
    ) -> Result<()> {
        let mapstr = row
            .map_strategy
            .as_deref()
            .unwrap_or(&config.default_strategy);
        let rules = parse_strategy(
            mapstr,
            &config.ubam_name,
            &config.final_name,
            config.residue_policy,
        )?;
        self.add_parsed(row, &rules, registry, config)
    }

    fn add_parsed(
        &mut self,
        row: &SampleRow,
        rules: &StrategyRules,
        registry: &ReferenceRegistry,
        config: &PlanConfig,
    ) -> Result<()> {
        let key = SampleKey::of_row(row);
        let layout = SampleLayout::new(&config.project_root, &row.project_id, &row.sample_id)?;

        for parsed in &rules.map_rules {
            let resolved = registry.resolve(&row.species, parsed.ref_name.as_str(), parsed.mapper)?;
            let annotated = resolved.annotation.is_some();
            let rule = MapRule {
                project_id: row.project_id.clone(),
                sample_id: row.sample_id.clone(),
                species: row.species.clone(),
                input_name: parsed.input_name.clone(),
                out_name: parsed.out_name.clone(),
                mapper: parsed.mapper,
                ref_name: parsed.ref_name.clone(),
                input_path: layout.bam(&parsed.input_name)?,
                out_path: layout.mapped_bam(parsed.ref_name.as_str(), parsed.mapper)?,
                unmapped_path: layout.unmapped_bam(parsed.ref_name.as_str(), parsed.mapper)?,
                ref_path: resolved.sequence.clone(),
                ann_path: resolved.annotation.clone(),
                ann_final: resolved.ann_final(),
                ann_final_compiled: resolved.ann_final_compiled(),
                ann_final_compiled_target: resolved.ann_final_compiled_target(),
                ann_log: annotated
                    .then(|| layout.tag_log(parsed.ref_name.as_str(), parsed.mapper))
                    .transpose()?,
                map_flags: resolved.map_flags,
                map_index: resolved.map_index,
                map_index_param: resolved.map_index_param,
                map_index_file: resolved.map_index_file,
                log_path: layout.mapper_log(parsed.ref_name.as_str(), parsed.mapper)?,
                splice_header_log: layout
                    .splice_header_log(parsed.ref_name.as_str(), parsed.mapper)?,
                star_run_log: (parsed.mapper == Mapper::Star)
                    .then(|| layout.star_run_log(parsed.ref_name.as_str(), parsed.mapper))
                    .transpose()?,
                threads: parsed.mapper.threads(),
            };

            debug!(
                "planned {key}: {} <- {} ({})",
                rule.out_name, rule.input_name, rule.mapper
            );
            self.all_bams
                .entry(key.clone())
                .or_default()
                .push(rule.out_path.clone());
            if rule.is_annotated() {
                self.annotated_bams
                    .entry(key.clone())
                    .or_default()
                    .push(rule.out_path.clone());
            }
            self.index_builds
                .entry(rule.map_index_file.clone())
                .or_insert_with(|| IndexBuild::for_rule(&rule));
            match self.map_rules.entry(rule.out_path.clone()) {
                Entry::Occupied(_) => bail!(PlanError::DuplicateArtifact {
                    sample: key.to_string(),
                    path: rule.out_path.clone(),
                }),
                Entry::Vacant(slot) => slot.insert(rule),
            };
        }

        for parsed in &rules.symlinks {
            let Some(src) = rules
                .map_rules
                .iter()
                .find(|rule| rule.out_name == parsed.link_src)
            else {
                bail!(PlanError::DanglingSymlink {
                    sample: key.to_string(),
                    link_name: parsed.link_name.clone(),
                    link_src: parsed.link_src.clone(),
                });
            };

            let link = SymlinkRule {
                project_id: row.project_id.clone(),
                sample_id: row.sample_id.clone(),
                ref_name: parsed.ref_name.clone(),
                link_src: parsed.link_src.clone(),
                link_name: parsed.link_name.clone(),
                src_path: layout.bam(&parsed.link_src)?,
                link_path: layout.bam(&parsed.link_name)?,
            };

            if link.link_name == config.final_name {
                self.final_bams.push(link.link_path.clone());
                // downstream QC resolves the canonical STAR log through
                // this link; a bowtie2-produced final registers nothing
                // and consumers tolerate the absence
                if src.mapper == Mapper::Star {
                    self.star_final_log_links.insert(
                        layout.star_final_log(),
                        layout.star_run_log(src.ref_name.as_str(), src.mapper)?,
                    );
                }
            }

            match self.symlinks.entry(link.link_path.clone()) {
                Entry::Occupied(_) => bail!(PlanError::DuplicateArtifact {
                    sample: key.to_string(),
                    path: link.link_path.clone(),
                }),
                Entry::Vacant(slot) => slot.insert(link),
            };
        }

        Ok(())
    }

    fn unknown(path: &Path) -> anyhow::Error {
        PlanError::UnknownArtifact {
            path: path.to_path_buf(),
        }
        .into()
    }

    /// The map rule producing `path`.
    pub fn map_rule(&self, path: &Path) -> Result<&MapRule> {
        self.map_rules.get(path).ok_or_else(|| Self::unknown(path))
    }

    /// Everything that must exist before the alignment producing `path`
    /// can run.
    pub fn inputs(&self, path: &Path) -> Result<MapInputs> {
        let rule = self.map_rule(path)?;
        Ok(MapInputs {
            bam: rule.input_path.clone(),
            index_file: rule.map_index_file.clone(),
            annotation: rule.ann_final_compiled_target.clone(),
        })
    }

    /// Command parameters for the alignment producing `path`.
    pub fn params(&self, path: &Path) -> Result<MapParams> {
        let rule = self.map_rule(path)?;
        Ok(MapParams {
            flags: rule.map_flags.clone(),
            index: rule.map_index_param.clone(),
            annotation: rule.ann_final.clone(),
            annotation_cmd: AnnotationCmd::for_rule(rule).to_string(),
        })
    }

    /// The symlink rule registered under `path`.
    pub fn symlink(&self, path: &Path) -> Result<&SymlinkRule> {
        self.symlinks.get(path).ok_or_else(|| Self::unknown(path))
    }

    /// Source of the symlink registered under `path`.
    pub fn symlink_source(&self, path: &Path) -> Result<&Path> {
        Ok(self.symlink(path)?.src_path.as_path())
    }

    /// Header-splicing stage for the alignment producing `path`.
    pub fn header_splice(&self, path: &Path) -> Result<HeaderSplice> {
        Ok(HeaderSplice::for_rule(self.map_rule(path)?))
    }

    /// Index build keyed by its sentinel file.
    pub fn index_build(&self, sentinel: &Path) -> Result<&IndexBuild> {
        self.index_builds
            .get(sentinel)
            .ok_or_else(|| Self::unknown(sentinel))
    }

    /// Every index build of the run, in sentinel order.
    pub fn index_builds(&self) -> impl Iterator<Item = &IndexBuild> {
        self.index_builds.values()
    }

    /// The ribosomal-depletion log of one sample, if its strategy maps
    /// against `rRNA` with bowtie2.
    pub fn ribo_log(&self, project_id: &str, sample_id: &str) -> RiboLog {
        self.sample_rules(project_id, sample_id)
            .find(|rule| {
                rule.ref_name.as_str() == RRNA_REF_NAME && rule.mapper == Mapper::Bowtie2
            })
            .map_or(RiboLog::NoRrnaIndex, |rule| {
                RiboLog::Bowtie2Log(rule.log_path.clone())
            })
    }

    fn sample_rules(&self, project_id: &str, sample_id: &str) -> impl Iterator<Item = &MapRule> {
        let key = SampleKey {
            project_id: project_id.to_string(),
            sample_id: sample_id.to_string(),
        };
        self.all_bams
            .get(&key)
            .map(Vec::as_slice)
            .unwrap_or_default()
            .iter()
            .map(|path| &self.map_rules[path])
    }

    /// Mapped BAMs of one sample, in strategy order.
    pub fn all_bams(&self, project_id: &str, sample_id: &str) -> &[PathBuf] {
        let key = SampleKey {
            project_id: project_id.to_string(),
            sample_id: sample_id.to_string(),
        };
        self.all_bams
            .get(&key)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// The subset of a sample's BAMs whose rules tag annotations, in
    /// strategy order.
    pub fn annotated_bams(&self, project_id: &str, sample_id: &str) -> &[PathBuf] {
        let key = SampleKey {
            project_id: project_id.to_string(),
            sample_id: sample_id.to_string(),
        };
        self.annotated_bams
            .get(&key)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Canonical STAR final-log path to the producing run's log, for every
    /// sample whose final came out of STAR.
    pub fn star_final_log_links(&self) -> &BTreeMap<PathBuf, PathBuf> {
        &self.star_final_log_links
    }

    /// The canonical outputs: one final symlink path per planned sample,
    /// sorted for reproducibility.
    pub fn final_bams(&self) -> &[PathBuf] {
        &self.final_bams
    }

    /// Every map rule of the run, keyed by `out_path`.
    pub fn map_rules(&self) -> impl Iterator<Item = &MapRule> {
        self.map_rules.values()
    }

    /// Every symlink rule of the run, keyed by `link_path`.
    pub fn symlinks(&self) -> impl Iterator<Item = &SymlinkRule> {
        self.symlinks.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::{ReferenceEntry, ReferenceError};
    use pretty_assertions::assert_eq;

    fn registry() -> ReferenceRegistry {
        let mut registry = ReferenceRegistry::new("species_data");
        registry.register(
            "mouse",
            "genome",
            ReferenceEntry {
                sequence: "genomes/mm10.fa.gz".into(),
                annotation: Some("genomes/mm10.gtf.gz".into()),
                ..ReferenceEntry::default()
            },
        );
        registry.register(
            "mouse",
            "rRNA",
            ReferenceEntry {
                sequence: "genomes/mm10_rRNA.fa".into(),
                ..ReferenceEntry::default()
            },
        );
        registry.register(
            "mouse",
            "phiX",
            ReferenceEntry {
                sequence: "genomes/phiX.fa".into(),
                ..ReferenceEntry::default()
            },
        );
        registry
    }

    fn row(sample_id: &str, map_strategy: Option<&str>) -> SampleRow {
        SampleRow {
            project_id: "visium_01".to_string(),
            sample_id: sample_id.to_string(),
            species: "mouse".to_string(),
            map_strategy: map_strategy.map(String::from),
            is_merged: false,
        }
    }

    fn plan_for(map_strategy: &str) -> MappingPlan {
        let samples = SampleTable::from_rows(vec![row("section_a", Some(map_strategy))]).unwrap();
        MappingPlan::build(&samples, &registry(), &PlanConfig::default()).unwrap()
    }

    fn data_root() -> PathBuf {
        PathBuf::from("./projects/visium_01/processed_data/section_a/illumina/complete_data")
    }

    /// Every rule's input is the uBAM or the unmapped residue of an
    /// earlier rule of the same sample.
    fn assert_chain_invariant(plan: &MappingPlan, project_id: &str, sample_id: &str) {
        let bams = plan.all_bams(project_id, sample_id);
        for (i, path) in bams.iter().enumerate() {
            let rule = plan.map_rule(path).unwrap();
            let ok = rule.input_name == DEFAULT_UBAM_NAME
                || bams[..i].iter().any(|earlier| {
                    let earlier = plan.map_rule(earlier).unwrap();
                    rule.input_name == format!("not_{}", earlier.out_name)
                        && rule.input_path == earlier.unmapped_path
                });
            assert!(ok, "rule '{}' has dangling input", rule.out_name);
        }
    }

    #[test]
    fn test_single_star_rule() {
        let plan = plan_for("STAR:genome:final");
        let root = data_root();

        assert_eq!(plan.final_bams(), [root.join("final.bam")]);
        assert_eq!(
            plan.symlink_source(&root.join("final.bam")).unwrap(),
            root.join("genome.STAR.bam")
        );

        let out = root.join("genome.STAR.bam");
        let rule = plan.map_rule(&out).unwrap();
        assert_eq!(rule.input_path, root.join("unaligned_bc_tagged.bam"));
        assert_eq!(rule.unmapped_path, root.join("not_genome.STAR.bam"));
        assert_eq!(rule.threads, 16);
        assert_chain_invariant(&plan, "visium_01", "section_a");
    }

    #[test]
    fn test_chained_strategy() {
        let plan = plan_for("bowtie2:rRNA->STAR:genome:final");
        let root = data_root();

        let genome = plan.map_rule(&root.join("genome.STAR.bam")).unwrap();
        assert_eq!(genome.input_path, root.join("not_rRNA.bowtie2.bam"));
        assert_chain_invariant(&plan, "visium_01", "section_a");

        // two index builds, keyed by sentinel
        let sentinels: Vec<_> = plan.index_builds().map(|b| b.sentinel.clone()).collect();
        assert_eq!(
            sentinels,
            [
                PathBuf::from("species_data/mouse/genome/star_index/SAindex"),
                PathBuf::from("species_data/mouse/rRNA/bt2_index/rRNA.1.bt2"),
            ]
        );

        assert_eq!(
            plan.ribo_log("visium_01", "section_a"),
            RiboLog::Bowtie2Log(root.join("logs/rRNA.bowtie2.log"))
        );
    }

    #[test]
    fn test_annotation_correspondence() {
        let plan = plan_for("bowtie2:rRNA->STAR:genome:final");
        let root = data_root();

        // annotated iff the reference carries an annotation
        assert_eq!(
            plan.annotated_bams("visium_01", "section_a"),
            [root.join("genome.STAR.bam")]
        );
        for path in plan.all_bams("visium_01", "section_a") {
            let rule = plan.map_rule(path).unwrap();
            assert_eq!(
                plan.annotated_bams("visium_01", "section_a").contains(path),
                rule.is_annotated()
            );
            assert_eq!(rule.ann_final.is_some(), rule.is_annotated());
            assert_eq!(rule.ann_final_compiled_target.is_some(), rule.is_annotated());
        }
    }

    #[test]
    fn test_inputs_and_params_through_final_symlink() {
        let plan = plan_for("STAR:genome:final");
        let root = data_root();

        let mapped = plan
            .symlink_source(&plan.final_bams()[0])
            .unwrap()
            .to_path_buf();
        assert_eq!(mapped, root.join("genome.STAR.bam"));

        let inputs = plan.inputs(&mapped).unwrap();
        assert_eq!(inputs.bam, root.join("unaligned_bc_tagged.bam"));
        assert_eq!(
            inputs.index_file,
            PathBuf::from("species_data/mouse/genome/star_index/SAindex")
        );
        assert_eq!(
            inputs.annotation,
            Some(PathBuf::from(
                "species_data/mouse/genome/annotation.final.compiled/non_overlapping.csv"
            ))
        );

        let params = plan.params(&mapped).unwrap();
        assert!(params.flags.contains("--outSAMunmapped Within"));
        assert_eq!(
            params.index,
            PathBuf::from("species_data/mouse/genome/star_index")
        );
        assert!(params.annotation_cmd.contains("non_overlapping.csv"));

        let splice = plan.header_splice(&mapped).unwrap();
        assert_eq!(splice.source, root.join("unaligned_bc_tagged.bam"));
        assert_eq!(
            splice.log,
            root.join("logs/genome.STAR.splice_bam_header.log")
        );
    }

    #[test]
    fn test_unannotated_rule_passes_through() {
        let plan = plan_for("bowtie2:rRNA:final");
        let root = data_root();

        let inputs = plan.inputs(&root.join("rRNA.bowtie2.bam")).unwrap();
        assert_eq!(inputs.annotation, None);

        let params = plan.params(&root.join("rRNA.bowtie2.bam")).unwrap();
        assert_eq!(params.annotation, None);
        assert_eq!(
            params.annotation_cmd,
            format!("samtools view -b -o {} -", root.join("rRNA.bowtie2.bam").display())
        );
    }

    #[test]
    fn test_star_log_link_only_for_star_finals() {
        let plan = plan_for("STAR:genome:final");
        let logs = data_root().join("logs");
        assert_eq!(
            plan.star_final_log_links().get(&logs.join("star.Log.final.out")),
            Some(&logs.join("genome.STAR.Log.final.out"))
        );

        // a bowtie2-produced final registers nothing
        let plan = plan_for("bowtie2:rRNA:final");
        assert!(plan.star_final_log_links().is_empty());
    }

    #[test]
    fn test_unknown_artifact() {
        let plan = plan_for("STAR:genome:final");
        let err = plan
            .inputs(Path::new("nope.bam"))
            .expect_err("expected lookup to fail");
        assert!(matches!(
            err.root_cause().downcast_ref::<PlanError>(),
            Some(PlanError::UnknownArtifact { .. })
        ));
        assert!(plan.symlink_source(Path::new("nope.bam")).is_err());
        assert!(plan.index_build(Path::new("nope.1.bt2")).is_err());
    }

    #[test]
    fn test_duplicate_out_path_rejected() {
        let samples =
            SampleTable::from_rows(vec![row("section_a", Some("STAR:genome,STAR:genome"))])
                .unwrap();
        let err = MappingPlan::build(&samples, &registry(), &PlanConfig::default())
            .expect_err("expected build to fail");
        assert!(matches!(
            err.root_cause().downcast_ref::<PlanError>(),
            Some(PlanError::DuplicateArtifact { .. })
        ));
        // the offending sample is named
        assert!(format!("{err:#}").contains("visium_01/section_a"));
    }

    #[test]
    fn test_dangling_symlink_rejected() {
        use crate::strategy::{ParsedMapRule, ParsedSymlink};

        let rules = StrategyRules {
            map_rules: vec![ParsedMapRule {
                input_name: DEFAULT_UBAM_NAME.to_string(),
                mapper: Mapper::Star,
                ref_name: "genome".into(),
                out_name: "genome.STAR".to_string(),
            }],
            symlinks: vec![ParsedSymlink {
                link_src: "phiX.STAR".to_string(),
                link_name: "final".to_string(),
                ref_name: "phiX".into(),
            }],
        };
        let err = MappingPlan::default()
            .add_parsed(
                &row("section_a", None),
                &rules,
                &registry(),
                &PlanConfig::default(),
            )
            .expect_err("expected build to fail");
        assert!(matches!(
            err.root_cause().downcast_ref::<PlanError>(),
            Some(PlanError::DanglingSymlink { .. })
        ));
    }

    #[test]
    fn test_unknown_reference_aborts_sample() {
        let samples = SampleTable::from_rows(vec![row("section_a", Some("STAR:miRNA"))]).unwrap();
        let err = MappingPlan::build(&samples, &registry(), &PlanConfig::default())
            .expect_err("expected build to fail");
        assert!(matches!(
            err.root_cause().downcast_ref::<ReferenceError>(),
            Some(ReferenceError::UnknownReference { .. })
        ));
    }

    #[test]
    fn test_merged_samples_are_skipped() {
        let mut merged = row("section_b", Some("STAR:genome:final"));
        merged.is_merged = true;
        let samples =
            SampleTable::from_rows(vec![row("section_a", Some("STAR:genome:final")), merged])
                .unwrap();
        let plan = MappingPlan::build(&samples, &registry(), &PlanConfig::default()).unwrap();

        assert_eq!(plan.final_bams().len(), 1);
        assert!(plan.all_bams("visium_01", "section_b").is_empty());
        assert_eq!(
            plan.ribo_log("visium_01", "section_b"),
            RiboLog::NoRrnaIndex
        );
    }

    #[test]
    fn test_index_builds_dedupe_across_samples() {
        let samples = SampleTable::from_rows(vec![
            row("section_a", Some("STAR:genome:final")),
            row("section_b", Some("STAR:genome:final")),
        ])
        .unwrap();
        let plan = MappingPlan::build(&samples, &registry(), &PlanConfig::default()).unwrap();

        // both samples share one genome index build
        assert_eq!(plan.index_builds().count(), 1);
        // final paths are sorted
        let finals = plan.final_bams();
        assert_eq!(finals.len(), 2);
        assert!(finals.windows(2).all(|pair| pair[0] <= pair[1]));
    }

    #[test]
    fn test_custom_final_token() {
        let config = PlanConfig {
            final_name: "final.polyA_adapter_trimmed".to_string(),
            ..PlanConfig::default()
        };
        let samples =
            SampleTable::from_rows(vec![row("section_a", Some("STAR:genome:final"))]).unwrap();
        let plan = MappingPlan::build(&samples, &registry(), &config).unwrap();
        assert_eq!(
            plan.final_bams(),
            [data_root().join("final.polyA_adapter_trimmed.bam")]
        );
    }
}
