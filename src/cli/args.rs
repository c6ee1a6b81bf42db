use clap::{Parser, ValueEnum};
use crate::config::defs::DEFAULT_JAVA_MEM;

#[derive(Debug, Clone, Copy, ValueEnum, Default, PartialEq)]
pub enum AlignMode {
    /// Choose from the mean read length of the input FASTQ
    #[default]
    Auto,
    /// bwa mem
    Mem,
    /// bwa aln + samse, for short reads
    Aln,
}

#[derive(Parser, Debug, Clone, Default)]
#[command(name = "call-variants", version, about = "Haploid variant calling with BWA, Picard and GATK")]
pub struct Arguments {

    #[arg(long = "base-dir", help = "Installation root holding bin/third-party")]
    pub base_dir: String,

    #[arg(short = 'r', long = "reference")]
    pub reference: String,

    #[arg(short = 'i', long = "fastq")]
    pub fastq: String,

    #[arg(short = 'g', long = "genbank", help = "GenBank file of the reference, used for annotation")]
    pub genbank: String,

    #[arg(short = 'o', long = "out", help = "Output directory. Defaults to the current working directory.")]
    pub out_dir: Option<String>,

    #[arg(short = 's', long = "sample", help = "Sample prefix for output files. Defaults to the FASTQ stem.")]
    pub sample: Option<String>,

    #[arg(short = 't', long = "threads", help = "Aligner threads. Defaults to the number of physical cores.")]
    pub threads: Option<usize>,

    #[arg(long = "align-mode", default_value = "auto", value_enum)]
    pub align_mode: AlignMode,

    #[arg(long = "java-mem", default_value = DEFAULT_JAVA_MEM)]
    pub java_mem: String,

    #[arg(long, help = "Append per-stage run times to this file instead of stdout")]
    pub timings: Option<String>,

    #[arg(long = "new-timings", default_value_t = false, help = "Truncate the timings file before the first write")]
    pub new_timings: bool,

    #[arg(long = "skip-cleanup", default_value_t = false)]
    pub skip_cleanup: bool,

    #[arg(long = "skip-preflight", default_value_t = false)]
    pub skip_preflight: bool,

    #[arg(short = 'v', long = "verbose", action)]
    pub verbose: bool,
}
