//! Executor-facing command descriptions.
//!
//! The planner describes how to build each index and how to post-process
//! each mapped BAM; the executor runs the commands and owns their
//! failures. Nothing here retries or executes.
//!
//! Per rule, an input record moves through: uBAM, then aligned (mapped or
//! unmapped); a mapped record is tagged when the reference carries an
//! annotation; tagged or not, it lands in the mapped BAM. Unmapped records
//! always spill to the companion `not_…` BAM that feeds the next stage.

use crate::mapper::Mapper;
use crate::reference::RefName;
use crate::rules::MapRule;
use serde::Serialize;
use std::fmt::{self, Display, Formatter};
use std::path::{Path, PathBuf};

/// True when the file needs on-the-fly decompression before a tool that
/// cannot read gzip sees it. Extension-based; no filesystem I/O.
pub fn is_gzipped(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "gz")
}

fn arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Description of one index build, keyed in the plan by `sentinel`.
/// References shared between rules dedupe to a single build.
#[derive(Clone, Debug, Serialize)]
pub struct IndexBuild {
    pub mapper: Mapper,
    pub ref_name: RefName,
    pub sequence: PathBuf,
    pub annotation: Option<PathBuf>,
    pub index_dir: PathBuf,
    pub index_param: PathBuf,
    pub sentinel: PathBuf,
    pub threads: usize,
}

impl IndexBuild {
    pub fn for_rule(rule: &MapRule) -> IndexBuild {
        IndexBuild {
            mapper: rule.mapper,
            ref_name: rule.ref_name.clone(),
            sequence: rule.ref_path.clone(),
            annotation: rule.ann_path.clone(),
            index_dir: rule.map_index.clone(),
            index_param: rule.map_index_param.clone(),
            sentinel: rule.map_index_file.clone(),
            threads: rule.threads,
        }
    }

    pub fn sequence_gzipped(&self) -> bool {
        is_gzipped(&self.sequence)
    }

    pub fn annotation_gzipped(&self) -> bool {
        self.annotation.as_deref().is_some_and(is_gzipped)
    }

    /// The argv the executor runs. Gzipped inputs are passed as-is; the
    /// executor consults [`IndexBuild::sequence_gzipped`] and
    /// [`IndexBuild::annotation_gzipped`] to decompress them first.
    pub fn command_line(&self) -> Vec<String> {
        match self.mapper {
            Mapper::Star => {
                let mut argv = vec![
                    "STAR".to_string(),
                    "--runMode".to_string(),
                    "genomeGenerate".to_string(),
                    "--genomeDir".to_string(),
                    arg(&self.index_dir),
                    "--genomeFastaFiles".to_string(),
                    arg(&self.sequence),
                    "--runThreadN".to_string(),
                    self.threads.to_string(),
                ];
                if let Some(annotation) = &self.annotation {
                    argv.push("--sjdbGTFfile".to_string());
                    argv.push(arg(annotation));
                }
                argv
            }
            // bowtie2-build writes <param>.{1..4}.bt2 plus the
            // reverse-complement pair; <param>.1.bt2 is the sentinel
            Mapper::Bowtie2 => vec![
                "bowtie2-build".to_string(),
                "--threads".to_string(),
                self.threads.to_string(),
                arg(&self.sequence),
                arg(&self.index_param),
            ],
        }
    }
}

/// The stage between the mapper's BAM stream and the final BAM file.
#[derive(Clone, Debug, Serialize)]
pub enum AnnotationCmd {
    /// Consume mapped records on stdin, tag each with gene/feature
    /// information from the compiled side-table, write the records back to
    /// stdout, and leave a log behind.
    Tag {
        compiled: PathBuf,
        out_bam: PathBuf,
        log: PathBuf,
    },
    /// Repackage the stream into the mapped BAM unchanged.
    PassThrough { out_bam: PathBuf },
}

impl AnnotationCmd {
    pub fn for_rule(rule: &MapRule) -> AnnotationCmd {
        match (&rule.ann_final_compiled_target, &rule.ann_log) {
            (Some(compiled), Some(log)) => AnnotationCmd::Tag {
                compiled: compiled.clone(),
                out_bam: rule.out_path.clone(),
                log: log.clone(),
            },
            _ => AnnotationCmd::PassThrough {
                out_bam: rule.out_path.clone(),
            },
        }
    }
}

impl Display for AnnotationCmd {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            AnnotationCmd::Tag {
                compiled,
                out_bam,
                log,
            } => write!(
                f,
                "annotator tag --compiled {} --log {} | samtools view -b -o {} -",
                compiled.display(),
                log.display(),
                out_bam.display()
            ),
            AnnotationCmd::PassThrough { out_bam } => {
                write!(f, "samtools view -b -o {} -", out_bam.display())
            }
        }
    }
}

/// The stage that merges the program-record history of the upstream BAM
/// into the mapper's output header, so every produced BAM carries the full
/// provenance chain back to the uBAM.
#[derive(Clone, Debug, Serialize)]
pub struct HeaderSplice {
    /// The BAM whose header history is carried forward.
    pub source: PathBuf,
    pub log: PathBuf,
}

impl HeaderSplice {
    pub fn for_rule(rule: &MapRule) -> HeaderSplice {
        HeaderSplice {
            source: rule.input_path.clone(),
            log: rule.splice_header_log.clone(),
        }
    }
}

impl Display for HeaderSplice {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "splice_bam_header --source {} --log {}",
            self.source.display(),
            self.log.display()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_gzipped() {
        assert!(is_gzipped(Path::new("genomes/mm10.fa.gz")));
        assert!(!is_gzipped(Path::new("genomes/mm10.fa")));
        assert!(!is_gzipped(Path::new("genomes/mm10")));
    }

    fn star_build() -> IndexBuild {
        IndexBuild {
            mapper: Mapper::Star,
            ref_name: RefName::from("genome"),
            sequence: PathBuf::from("genomes/mm10.fa.gz"),
            annotation: Some(PathBuf::from("genomes/mm10.gtf")),
            index_dir: PathBuf::from("species_data/mouse/genome/star_index"),
            index_param: PathBuf::from("species_data/mouse/genome/star_index"),
            sentinel: PathBuf::from("species_data/mouse/genome/star_index/SAindex"),
            threads: 16,
        }
    }

    #[test]
    fn test_star_index_command() {
        let build = star_build();
        assert!(build.sequence_gzipped());
        assert!(!build.annotation_gzipped());
        let argv = build.command_line();
        assert_eq!(argv[0], "STAR");
        assert!(argv.contains(&"genomeGenerate".to_string()));
        assert!(argv.contains(&"--sjdbGTFfile".to_string()));
        assert!(argv.contains(&"genomes/mm10.gtf".to_string()));
    }

    #[test]
    fn test_bt2_index_command() {
        let build = IndexBuild {
            mapper: Mapper::Bowtie2,
            ref_name: RefName::from("rRNA"),
            sequence: PathBuf::from("genomes/mm10_rRNA.fa"),
            annotation: None,
            index_dir: PathBuf::from("species_data/mouse/rRNA/bt2_index"),
            index_param: PathBuf::from("species_data/mouse/rRNA/bt2_index/rRNA"),
            sentinel: PathBuf::from("species_data/mouse/rRNA/bt2_index/rRNA.1.bt2"),
            threads: 32,
        };
        assert!(!build.annotation_gzipped());
        assert_eq!(
            build.command_line(),
            vec![
                "bowtie2-build",
                "--threads",
                "32",
                "genomes/mm10_rRNA.fa",
                "species_data/mouse/rRNA/bt2_index/rRNA",
            ]
        );
    }

    #[test]
    fn test_annotation_cmd_rendering() {
        let tag = AnnotationCmd::Tag {
            compiled: PathBuf::from("sd/mouse/genome/annotation.final.compiled/non_overlapping.csv"),
            out_bam: PathBuf::from("cd/genome.STAR.bam"),
            log: PathBuf::from("cd/logs/genome.STAR.annotator.log"),
        };
        let rendered = tag.to_string();
        assert!(rendered.contains("non_overlapping.csv"));
        assert!(rendered.contains("genome.STAR.bam"));

        let pass = AnnotationCmd::PassThrough {
            out_bam: PathBuf::from("cd/rRNA.bowtie2.bam"),
        };
        assert_eq!(pass.to_string(), "samtools view -b -o cd/rRNA.bowtie2.bam -");
    }
}
