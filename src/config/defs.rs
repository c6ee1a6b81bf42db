use std::path::{Path, PathBuf};
use thiserror::Error;
use crate::cli::Arguments;
use crate::utils::timing::TimingSink;

// External software
pub const GZIP_EXT: &str = "gz";
pub const BWA_TAG: &str = "bwa";
pub const SAMTOOLS_TAG: &str = "samtools";
pub const JAVA_TAG: &str = "java";
pub const PICARD_TAG: &str = "picardtools";
pub const GATK_TAG: &str = "gatk";
pub const VCF_ANNOTATOR_TAG: &str = "vcf-annotator";
pub const GZIP_TAG: &str = "gzip";
pub const TAR_TAG: &str = "tar";

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BwaSubcommand {
    Index,
    Mem,
    Aln,
    Samse,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PicardSubcommand {
    AddOrReplaceReadGroups,
    MarkDuplicates,
    BuildBamIndex,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GatkWalker {
    RealignerTargetCreator,
    IndelRealigner,
    HaplotypeCaller,
    VariantFiltration,
}

// Installation layout
pub const BIN_DIR: &str = "bin";
pub const THIRD_PARTY_DIR: &str = "third-party";
pub const PICARD_JAR: &str = "picard.jar";
pub const GATK_JAR: &str = "GenomeAnalysisTK.jar";

// Static Filenames
pub const WORK_DIR: &str = "variants";
pub const COMPLETED_DIR: &str = "completed";
pub const MARKER_EXT: &str = "completed";
pub const BWA_INDEX_EXT: &str = "bwt";
pub const DUP_METRICS_SUFFIX: &str = "_metrics";

// Static Parameters
pub const DEFAULT_JAVA_MEM: &str = "8g";
pub const READ_GROUP_TAG: &str = "GATK";
pub const READ_GROUP_PLATFORM: &str = "Illumina";
pub const VALIDATION_STRINGENCY: &str = "LENIENT";

pub const HC_PLOIDY: u8 = 1;
pub const HC_STAND_CALL_CONF: f64 = 30.0;
pub const HC_STAND_EMIT_CONF: f64 = 10.0;
pub const HC_READ_FILTER: &str = "BadCigar";

pub const VF_CLUSTER_SIZE: usize = 3;
pub const VF_CLUSTER_WINDOW: usize = 10;
/// (expression, filter name) pairs handed to VariantFiltration in order.
pub const VF_FILTERS: &[(&str, &str)] = &[
    ("DP < 9 && AF < 0.7", "Fail"),
    ("DP > 9 && AF >= 0.95", "SuperPass"),
    ("GQ < 20", "LowGQ"),
];

pub const CLEANUP_PATTERNS: &[&str] = &["*.bam", "*.bai", "*.intervals", "*.sam", "*.sai"];
pub const FIND_MAX_DEPTH: usize = 99;

// bwa aln is preferred for reads shorter than this
pub const SHORT_READ_MEAN_LEN: f64 = 70.0;
pub const READ_LENGTH_SAMPLE: usize = 10_000;

pub const FASTQ_EXTS: &[&'static str] = &["fastq", "fq"];


#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("{0}")]
    TaskIncomplete(String),

    #[error("Tool execution failed for {tool}: {error}")]
    ToolExecution { tool: String, error: String },

    #[error("I/O error: {0}")]
    IOError(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Required binary {tool} not found at {path}")]
    MissingBinary { tool: String, path: PathBuf },

    #[error("Invalid FASTQ format: {0}")]
    InvalidFastqFormat(String),
}

impl From<std::io::Error> for PipelineError {
    fn from(e: std::io::Error) -> Self {
        PipelineError::IOError(e.to_string())
    }
}


/// Absolute locations of every external program the pipeline calls.
/// Resolved once from the installation root and never mutated afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct BinaryRegistry {
    pub bwa: PathBuf,
    /// The installation's SAM/BAM toolkit. No stage calls it; Picard does the
    /// BAM work. Kept so the registry describes the whole installation.
    pub samtools: PathBuf,
    pub java: PathBuf,
    pub picardtools: PathBuf,
    pub gatk: PathBuf,
    pub vcf_annotator: PathBuf,
    pub gzip: PathBuf,
    pub tar: PathBuf,
}

impl BinaryRegistry {
    pub fn from_base_dir(base_dir: &Path) -> Self {
        let third_party = base_dir.join(BIN_DIR).join(THIRD_PARTY_DIR);
        BinaryRegistry {
            bwa: third_party.join(BWA_TAG),
            samtools: third_party.join(SAMTOOLS_TAG),
            java: third_party.join(JAVA_TAG),
            picardtools: third_party.join(PICARD_JAR),
            gatk: third_party.join(GATK_JAR),
            vcf_annotator: third_party.join(VCF_ANNOTATOR_TAG),
            gzip: PathBuf::from(GZIP_TAG),
            tar: PathBuf::from(TAR_TAG),
        }
    }

    /// Registry entries that must exist on disk before a run starts.
    /// gzip and tar come from PATH and are not listed.
    pub fn required(&self) -> Vec<(&'static str, &Path)> {
        vec![
            (BWA_TAG, self.bwa.as_path()),
            (JAVA_TAG, self.java.as_path()),
            (PICARD_TAG, self.picardtools.as_path()),
            (GATK_TAG, self.gatk.as_path()),
            (VCF_ANNOTATOR_TAG, self.vcf_annotator.as_path()),
        ]
    }
}


pub struct RunConfig {
    pub cwd: PathBuf,
    pub out_dir: PathBuf,
    pub args: Arguments,
    pub bin: BinaryRegistry,
    pub threads: usize,
    pub timings: TimingSink,
}


/// Every step of the variant calling pipeline, in run order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    IndexReference,
    BwaMem,
    BwaAln,
    AddOrReplaceReadGroups,
    MarkDuplicates,
    RealignerTargetCreator,
    IndelRealigner,
    HaplotypeCaller,
    VariantFiltration,
    VcfAnnotator,
    MoveFinalVcf,
    Cleanup,
}

impl Stage {
    /// Stable name used for marker files and timing lines.
    pub fn name(&self) -> &'static str {
        match self {
            Stage::IndexReference => "bwa_index",
            Stage::BwaMem => "bwa_mem",
            Stage::BwaAln => "bwa_aln",
            Stage::AddOrReplaceReadGroups => "add_or_replace_read_groups",
            Stage::MarkDuplicates => "mark_duplicates",
            Stage::RealignerTargetCreator => "realigner_target_creator",
            Stage::IndelRealigner => "indel_realigner",
            Stage::HaplotypeCaller => "haplotype_caller",
            Stage::VariantFiltration => "variant_filtration",
            Stage::VcfAnnotator => "vcf_annotator",
            Stage::MoveFinalVcf => "move_final_vcf",
            Stage::Cleanup => "cleanup",
        }
    }

    pub fn failure_message(&self) -> &'static str {
        match self {
            Stage::IndexReference => "bwa index did not complete successfully.",
            Stage::BwaMem => "bwa mem did not complete successfully.",
            Stage::BwaAln => "bwa aln/samse did not complete successfully.",
            Stage::AddOrReplaceReadGroups => "AddOrReplaceReadGroups didn't complete successfully.",
            Stage::MarkDuplicates => "MarkDuplicates didn't complete successfully.",
            Stage::RealignerTargetCreator => "RealignerTargetCreator didn't complete successfully.",
            Stage::IndelRealigner => "IndelRealigner did not complete successfully.",
            Stage::HaplotypeCaller => "HaplotypeCaller did not complete successfully.",
            Stage::VariantFiltration => "VariantFiltration did not complete successfully.",
            Stage::VcfAnnotator => "vcf-annotator did not complete successfully.",
            Stage::MoveFinalVcf => "final vcf gzip did not complete successfully.",
            Stage::Cleanup => "Unable to complete GATK clean up.",
        }
    }

    pub fn failed(&self) -> PipelineError {
        PipelineError::TaskIncomplete(self.failure_message().to_string())
    }
}

pub const CLEANUP_ARCHIVE_FAILURE: &str = "Cannot compress GATK output, please check.";
