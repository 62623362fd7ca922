//! The closed set of supported alignment programs.
//!
//! Everything mapper-specific lives behind this enum: default command-line
//! flags, index directory layout, the sentinel file that proves an index is
//! built, and the advisory resource guidance the executor reads. Adding a
//! mapper means adding a variant, not sprinkling string dispatch.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use strum_macros::{Display, EnumIter, EnumString, IntoStaticStr};

/// STAR baseline: unsorted BAM streamed to stdout, all best-score alignments
/// flagged primary, unmapped mates kept within the stream, every SAM
/// attribute emitted, no shared genome memory, and a cap on collapsed splice
/// junctions.
pub const STAR_DEFAULT_FLAGS: &str = "--outSAMprimaryFlag AllBestScore \
--outSAMtype BAM Unsorted --outStd BAM_Unsorted --outSAMunmapped Within \
--outSAMattributes All --genomeLoad NoSharedMemory --limitOutSJcollapsed 5000000";

/// bowtie2 baseline: local alignment with a score floor requiring roughly a
/// 75% match, qualities ignored, seed length 10, descent budgets 30/30.
pub const BT2_DEFAULT_FLAGS: &str =
    "--local --score-min=L,0,1.5 --ignore-quals -L 10 -D 30 -R 30";

#[derive(
    Clone,
    Copy,
    Debug,
    Eq,
    Hash,
    PartialEq,
    Ord,
    PartialOrd,
    Display,
    EnumIter,
    EnumString,
    IntoStaticStr,
    Serialize,
    Deserialize,
)]
pub enum Mapper {
    #[serde(rename = "STAR")]
    #[strum(to_string = "STAR")]
    Star,
    #[serde(rename = "bowtie2")]
    #[strum(to_string = "bowtie2")]
    Bowtie2,
}

impl Mapper {
    /// Return the string representation of this variant.
    pub fn as_str(&self) -> &'static str {
        self.into()
    }

    /// Flags applied when the reference entry carries no override.
    pub fn default_flags(&self) -> &'static str {
        match self {
            Mapper::Star => STAR_DEFAULT_FLAGS,
            Mapper::Bowtie2 => BT2_DEFAULT_FLAGS,
        }
    }

    /// Name of this mapper's index directory under the per-reference
    /// species data directory.
    pub fn index_dir_name(&self) -> &'static str {
        match self {
            Mapper::Star => "star_index",
            Mapper::Bowtie2 => "bt2_index",
        }
    }

    /// The index location as handed to the mapper's command line.
    /// STAR takes the index directory itself; bowtie2 takes a basename
    /// inside it.
    pub fn index_param(&self, index_dir: &Path, ref_name: &str) -> PathBuf {
        match self {
            Mapper::Star => index_dir.to_path_buf(),
            Mapper::Bowtie2 => index_dir.join(ref_name),
        }
    }

    /// Sentinel file whose existence proves the index is built.
    pub fn index_sentinel(&self, index_dir: &Path, ref_name: &str) -> PathBuf {
        match self {
            Mapper::Star => index_dir.join("SAindex"),
            Mapper::Bowtie2 => index_dir.join(format!("{ref_name}.1.bt2")),
        }
    }

    /// Advisory thread-count guidance recorded on each rule. The planner
    /// does not schedule; the executor reads this.
    pub fn threads(&self) -> usize {
        match self {
            Mapper::Star => 16,
            Mapper::Bowtie2 => 32,
        }
    }

    /// STAR runs need a scratch directory, removed by the executor after
    /// the run.
    pub fn needs_scratch_dir(&self) -> bool {
        matches!(self, Mapper::Star)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use strum::IntoEnumIterator;

    #[test]
    fn test_parse_and_display_round_trip() {
        for mapper in Mapper::iter() {
            assert_eq!(Mapper::from_str(mapper.as_str()).unwrap(), mapper);
        }
        assert_eq!(Mapper::from_str("STAR").unwrap(), Mapper::Star);
        assert_eq!(Mapper::from_str("bowtie2").unwrap(), Mapper::Bowtie2);
        assert!(Mapper::from_str("bwa").is_err());
        assert!(Mapper::from_str("star").is_err());
    }

    #[test]
    fn test_index_layout() {
        let dir = Path::new("species_data/mouse/rRNA/bt2_index");
        assert_eq!(
            Mapper::Bowtie2.index_param(dir, "rRNA"),
            Path::new("species_data/mouse/rRNA/bt2_index/rRNA")
        );
        assert_eq!(
            Mapper::Bowtie2.index_sentinel(dir, "rRNA"),
            Path::new("species_data/mouse/rRNA/bt2_index/rRNA.1.bt2")
        );

        let dir = Path::new("species_data/mouse/genome/star_index");
        assert_eq!(Mapper::Star.index_param(dir, "genome"), dir);
        assert_eq!(
            Mapper::Star.index_sentinel(dir, "genome"),
            Path::new("species_data/mouse/genome/star_index/SAindex")
        );
    }

    #[test]
    fn test_serde_names_match_strategy_tokens() {
        assert_eq!(serde_json::to_string(&Mapper::Star).unwrap(), "\"STAR\"");
        assert_eq!(
            serde_json::from_str::<Mapper>("\"bowtie2\"").unwrap(),
            Mapper::Bowtie2
        );
    }
}
