/// Functions and structs for working with creating command-line arguments

use std::path::{Path, PathBuf};
use log::{info, warn};
use crate::config::defs::{BinaryRegistry, PipelineError};


fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn java_prefix(bin: &BinaryRegistry, java_mem: &str, jar: &Path) -> Vec<String> {
    vec![
        path_arg(&bin.java),
        format!("-Xmx{}", java_mem),
        "-jar".to_string(),
        path_arg(jar),
    ]
}


pub mod bwa {
    use std::path::PathBuf;
    use crate::config::defs::{BinaryRegistry, BwaSubcommand, BWA_TAG};
    use crate::utils::streams::run;
    use super::path_arg;

    #[derive(Debug, Clone)]
    pub struct BwaConfig {
        pub subcommand: BwaSubcommand,
        pub reference: PathBuf,
        pub reads: Option<PathBuf>,
        pub sai: Option<PathBuf>,
        pub output: Option<PathBuf>,
        pub threads: Option<usize>,
    }

    impl BwaConfig {
        pub fn new(subcommand: BwaSubcommand, reference: PathBuf) -> Self {
            BwaConfig { subcommand, reference, reads: None, sai: None, output: None, threads: None }
        }
    }

    fn subcommand_name(subcommand: BwaSubcommand) -> &'static str {
        match subcommand {
            BwaSubcommand::Index => "index",
            BwaSubcommand::Mem => "mem",
            BwaSubcommand::Aln => "aln",
            BwaSubcommand::Samse => "samse",
        }
    }

    /// Unset options come back as `None` and are dropped by the runner.
    pub fn arg_generator(bin: &BinaryRegistry, config: &BwaConfig) -> Vec<Option<String>> {
        let mut args_vec: Vec<Option<String>> = Vec::new();
        args_vec.push(Some(path_arg(&bin.bwa)));
        args_vec.push(Some(subcommand_name(config.subcommand).to_string()));

        let reads = config.reads.as_deref().map(path_arg);
        let sai = config.sai.as_deref().map(path_arg);
        let threads = config.threads.map(|t| t.to_string());
        let reference = Some(path_arg(&config.reference));

        match config.subcommand {
            BwaSubcommand::Index => {
                args_vec.push(reference);
            }
            BwaSubcommand::Mem => {
                args_vec.push(Some("-M".to_string()));
                if threads.is_some() {
                    args_vec.push(Some("-t".to_string()));
                }
                args_vec.push(threads);
                args_vec.push(reference);
                args_vec.push(reads);
            }
            BwaSubcommand::Aln => {
                args_vec.push(Some("-f".to_string()));
                args_vec.push(sai);
                if threads.is_some() {
                    args_vec.push(Some("-t".to_string()));
                }
                args_vec.push(threads);
                args_vec.push(reference);
                args_vec.push(reads);
            }
            BwaSubcommand::Samse => {
                args_vec.push(Some("-f".to_string()));
                args_vec.push(config.output.as_deref().map(path_arg));
                args_vec.push(reference);
                args_vec.push(sai);
                args_vec.push(reads);
            }
        }
        args_vec
    }

    /// bwa prints its version banner on stderr when run without arguments.
    pub async fn bwa_presence_check(bin: &BinaryRegistry) -> anyhow::Result<String> {
        let output = run(vec![path_arg(&bin.bwa)], None, None, false).await?;
        let stderr = String::from_utf8_lossy(&output.stderr);
        let version = stderr
            .lines()
            .find_map(|line| line.strip_prefix("Version:"))
            .map(|v| v.trim().to_string())
            .ok_or_else(|| anyhow::anyhow!("No version line in {} output", BWA_TAG))?;
        if version.is_empty() {
            return Err(anyhow::anyhow!("Empty version number in {} output", BWA_TAG));
        }
        Ok(version)
    }
}


pub mod picard {
    use crate::config::defs::{BinaryRegistry, PicardSubcommand};
    use super::java_prefix;

    #[derive(Debug, Clone)]
    pub struct PicardConfig {
        pub subcommand: PicardSubcommand,
        pub java_mem: String,
        /// KEY=VALUE options, in order.
        pub subcommand_fields: Vec<(String, String)>,
    }

    fn subcommand_name(subcommand: PicardSubcommand) -> &'static str {
        match subcommand {
            PicardSubcommand::AddOrReplaceReadGroups => "AddOrReplaceReadGroups",
            PicardSubcommand::MarkDuplicates => "MarkDuplicates",
            PicardSubcommand::BuildBamIndex => "BuildBamIndex",
        }
    }

    pub fn arg_generator(bin: &BinaryRegistry, config: &PicardConfig) -> Vec<String> {
        let mut args_vec = java_prefix(bin, &config.java_mem, &bin.picardtools);
        args_vec.push(subcommand_name(config.subcommand).to_string());
        for (key, value) in &config.subcommand_fields {
            args_vec.push(format!("{}={}", key, value));
        }
        args_vec
    }
}


pub mod gatk {
    use std::path::PathBuf;
    use crate::config::defs::{BinaryRegistry, GatkWalker};
    use super::{java_prefix, path_arg};

    #[derive(Debug, Clone)]
    pub struct GatkConfig {
        pub walker: GatkWalker,
        pub java_mem: String,
        pub reference: PathBuf,
        /// Flag/value pairs after `-R`, in order. Repeats are allowed.
        pub option_fields: Vec<(String, String)>,
    }

    fn walker_name(walker: GatkWalker) -> &'static str {
        match walker {
            GatkWalker::RealignerTargetCreator => "RealignerTargetCreator",
            GatkWalker::IndelRealigner => "IndelRealigner",
            GatkWalker::HaplotypeCaller => "HaplotypeCaller",
            GatkWalker::VariantFiltration => "VariantFiltration",
        }
    }

    pub fn arg_generator(bin: &BinaryRegistry, config: &GatkConfig) -> Vec<String> {
        let mut args_vec = java_prefix(bin, &config.java_mem, &bin.gatk);
        args_vec.push("-T".to_string());
        args_vec.push(walker_name(config.walker).to_string());
        args_vec.push("-R".to_string());
        args_vec.push(path_arg(&config.reference));
        for (flag, value) in &config.option_fields {
            args_vec.push(flag.clone());
            args_vec.push(value.clone());
        }
        args_vec
    }
}


pub mod vcf_annotator {
    use std::path::Path;
    use crate::config::defs::BinaryRegistry;
    use super::path_arg;

    pub fn arg_generator(bin: &BinaryRegistry, genbank: &Path, vcf: &Path) -> Vec<String> {
        vec![
            path_arg(&bin.vcf_annotator),
            "--gb".to_string(),
            path_arg(genbank),
            "--vcf".to_string(),
            path_arg(vcf),
        ]
    }
}


pub mod gzip {
    use std::path::Path;
    use crate::config::defs::BinaryRegistry;
    use super::path_arg;

    /// Compress to stdout, leaving the input in place.
    pub fn arg_generator(bin: &BinaryRegistry, input: &Path) -> Vec<String> {
        vec![path_arg(&bin.gzip), "-c".to_string(), path_arg(input)]
    }
}


/// Verifies every installed binary the pipeline needs is present.
///
/// # Returns
/// The first missing tool as `PipelineError::MissingBinary`.
pub fn check_binaries(bin: &BinaryRegistry) -> Result<(), PipelineError> {
    for (tool, path) in bin.required() {
        if !path.is_file() {
            return Err(PipelineError::MissingBinary {
                tool: tool.to_string(),
                path: PathBuf::from(path),
            });
        }
    }
    Ok(())
}


/// Logs the aligner version; a failure here is reported but does not stop the run.
pub async fn log_versions(bin: &BinaryRegistry) {
    match bwa::bwa_presence_check(bin).await {
        Ok(version) => info!("bwa version {}", version),
        Err(e) => warn!("Could not determine bwa version: {}", e),
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::defs::{BwaSubcommand, GatkWalker, PicardSubcommand};
    use crate::utils::streams::filter_tokens;
    use tempfile::tempdir;

    fn registry() -> BinaryRegistry {
        BinaryRegistry::from_base_dir(Path::new("/opt/cv"))
    }

    #[test]
    fn test_bwa_mem_args() {
        let mut config = bwa::BwaConfig::new(BwaSubcommand::Mem, PathBuf::from("ref.fa"));
        config.reads = Some(PathBuf::from("reads.fq"));
        config.threads = Some(4);
        let tokens = filter_tokens(bwa::arg_generator(&registry(), &config));
        assert_eq!(
            tokens,
            vec!["/opt/cv/bin/third-party/bwa", "mem", "-M", "-t", "4", "ref.fa", "reads.fq"]
        );
    }

    #[test]
    fn test_bwa_mem_without_threads_drops_flag() {
        let mut config = bwa::BwaConfig::new(BwaSubcommand::Mem, PathBuf::from("ref.fa"));
        config.reads = Some(PathBuf::from("reads.fq"));
        let tokens = filter_tokens(bwa::arg_generator(&registry(), &config));
        assert_eq!(tokens, vec!["/opt/cv/bin/third-party/bwa", "mem", "-M", "ref.fa", "reads.fq"]);
    }

    #[test]
    fn test_bwa_samse_args() {
        let mut config = bwa::BwaConfig::new(BwaSubcommand::Samse, PathBuf::from("ref.fa"));
        config.reads = Some(PathBuf::from("reads.fq"));
        config.sai = Some(PathBuf::from("reads.sai"));
        config.output = Some(PathBuf::from("reads.sam"));
        let tokens = filter_tokens(bwa::arg_generator(&registry(), &config));
        assert_eq!(
            tokens,
            vec!["/opt/cv/bin/third-party/bwa", "samse", "-f", "reads.sam", "ref.fa", "reads.sai", "reads.fq"]
        );
    }

    #[test]
    fn test_picard_args() {
        let config = picard::PicardConfig {
            subcommand: PicardSubcommand::BuildBamIndex,
            java_mem: "4g".to_string(),
            subcommand_fields: vec![("INPUT".to_string(), "x.bam".to_string())],
        };
        assert_eq!(
            picard::arg_generator(&registry(), &config),
            vec!["/opt/cv/bin/third-party/java", "-Xmx4g", "-jar", "/opt/cv/bin/third-party/picard.jar", "BuildBamIndex", "INPUT=x.bam"]
        );
    }

    #[test]
    fn test_gatk_args_keep_repeated_flags() {
        let config = gatk::GatkConfig {
            walker: GatkWalker::VariantFiltration,
            java_mem: "8g".to_string(),
            reference: PathBuf::from("ref.fa"),
            option_fields: vec![
                ("--filterName".to_string(), "Fail".to_string()),
                ("--filterName".to_string(), "LowGQ".to_string()),
            ],
        };
        let args = gatk::arg_generator(&registry(), &config);
        assert_eq!(&args[4..8], &["-T", "VariantFiltration", "-R", "ref.fa"]);
        assert_eq!(args.iter().filter(|a| *a == "--filterName").count(), 2);
    }

    #[test]
    fn test_check_binaries_reports_missing() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let bin = BinaryRegistry::from_base_dir(dir.path());
        match check_binaries(&bin) {
            Err(PipelineError::MissingBinary { tool, .. }) => assert_eq!(tool, "bwa"),
            other => panic!("Expected MissingBinary, got {:?}", other),
        }

        for (_, path) in bin.required() {
            std::fs::create_dir_all(path.parent().unwrap())?;
            std::fs::write(path, "")?;
        }
        check_binaries(&bin)?;
        Ok(())
    }
}
