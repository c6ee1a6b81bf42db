//! One function per pipeline stage. Each builds a single tool invocation,
//! runs it, and accepts the stage only if the expected output is non-empty.
//! Exit codes are not consulted; the output file is the contract.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use log::info;

use crate::config::defs::{
    BwaSubcommand, GatkWalker, PicardSubcommand, PipelineError, RunConfig, Stage,
    BWA_INDEX_EXT, CLEANUP_ARCHIVE_FAILURE, CLEANUP_PATTERNS, DUP_METRICS_SUFFIX, HC_PLOIDY, HC_READ_FILTER,
    HC_STAND_CALL_CONF, HC_STAND_EMIT_CONF, READ_GROUP_PLATFORM, READ_GROUP_TAG,
    VALIDATION_STRINGENCY, VF_CLUSTER_SIZE, VF_CLUSTER_WINDOW, VF_FILTERS,
};
use crate::utils::command::bwa::{self, BwaConfig};
use crate::utils::command::gatk::{self, GatkConfig};
use crate::utils::command::picard::{self, PicardConfig};
use crate::utils::command::{gzip, vcf_annotator as annotator};
use crate::utils::file::{compress_and_remove, find_and_remove_all, find_files, is_gzipped, try_complete};
use crate::utils::streams::run;

// Every tool command line is echoed.
const ECHO: bool = true;


fn finish(stage: Stage, output: &Path, completed_file: &Path) -> Result<(), PipelineError> {
    if try_complete(output, completed_file, true)? {
        info!("{} complete: {}", stage.name(), output.display());
        Ok(())
    } else {
        Err(stage.failed())
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn field(key: &str, value: impl Into<String>) -> (String, String) {
    (key.to_string(), value.into())
}

fn picard_config(config: &RunConfig, subcommand: PicardSubcommand, fields: Vec<(String, String)>) -> PicardConfig {
    PicardConfig {
        subcommand,
        java_mem: config.args.java_mem.clone(),
        subcommand_fields: fields,
    }
}

fn gatk_config(config: &RunConfig, walker: GatkWalker, reference: &Path, fields: Vec<(String, String)>) -> GatkConfig {
    GatkConfig {
        walker,
        java_mem: config.args.java_mem.clone(),
        reference: reference.to_path_buf(),
        option_fields: fields,
    }
}


/// Builds the BWA index next to the reference. No marker is written;
/// a non-empty `<fasta>.bwt` is the record that indexing happened.
pub async fn bwa_index(config: &RunConfig, fasta: &Path) -> Result<(), PipelineError> {
    let bwa_config = BwaConfig::new(BwaSubcommand::Index, fasta.to_path_buf());
    run(bwa::arg_generator(&config.bin, &bwa_config), None, None, ECHO).await?;

    let bwt = index_file(fasta);
    if try_complete(&bwt, &bwt, false)? {
        Ok(())
    } else {
        Err(Stage::IndexReference.failed())
    }
}

/// `<fasta>.bwt`, the last file `bwa index` writes.
pub fn index_file(fasta: &Path) -> PathBuf {
    let mut bwt = fasta.as_os_str().to_owned();
    bwt.push(format!(".{}", BWA_INDEX_EXT));
    PathBuf::from(bwt)
}


/// Aligns reads against the reference with `bwa mem`.
///
/// # Arguments
///
/// * `fastq` - Single-end reads.
/// * `output_sam` - SAM written from bwa's stdout.
/// * `num_cpu` - Aligner threads.
/// * `reference` - Indexed reference FASTA.
/// * `completed_file` - Marker written on success.
pub async fn bwa_mem(
    config: &RunConfig,
    fastq: &Path,
    output_sam: &Path,
    num_cpu: usize,
    reference: &Path,
    completed_file: &Path,
) -> Result<(), PipelineError> {
    let mut bwa_config = BwaConfig::new(BwaSubcommand::Mem, reference.to_path_buf());
    bwa_config.reads = Some(fastq.to_path_buf());
    bwa_config.threads = Some(num_cpu);

    run(bwa::arg_generator(&config.bin, &bwa_config), Some(output_sam), None, ECHO).await?;
    finish(Stage::BwaMem, output_sam, completed_file)
}


/// Aligns short reads (mean length < 70bp) with `bwa aln` then `bwa samse`.
pub async fn bwa_aln(
    config: &RunConfig,
    fastq: &Path,
    sai: &Path,
    output_sam: &Path,
    num_cpu: usize,
    reference: &Path,
    completed_file: &Path,
) -> Result<(), PipelineError> {
    let mut aln_config = BwaConfig::new(BwaSubcommand::Aln, reference.to_path_buf());
    aln_config.reads = Some(fastq.to_path_buf());
    aln_config.sai = Some(sai.to_path_buf());
    aln_config.threads = Some(num_cpu);
    run(bwa::arg_generator(&config.bin, &aln_config), None, None, ECHO).await?;

    let mut samse_config = BwaConfig::new(BwaSubcommand::Samse, reference.to_path_buf());
    samse_config.reads = Some(fastq.to_path_buf());
    samse_config.sai = Some(sai.to_path_buf());
    samse_config.output = Some(output_sam.to_path_buf());
    run(bwa::arg_generator(&config.bin, &samse_config), None, None, ECHO).await?;

    finish(Stage::BwaAln, output_sam, completed_file)
}


/// Picard AddOrReplaceReadGroups: coordinate-sorts the alignments and
/// tags every read with a single placeholder read group for GATK.
pub async fn add_or_replace_read_groups(
    config: &RunConfig,
    input_sam: &Path,
    sorted_bam: &Path,
    completed_file: &Path,
) -> Result<(), PipelineError> {
    let tool_config = picard_config(config, PicardSubcommand::AddOrReplaceReadGroups, vec![
        field("INPUT", path_arg(input_sam)),
        field("OUTPUT", path_arg(sorted_bam)),
        field("SORT_ORDER", "coordinate"),
        field("RGID", READ_GROUP_TAG),
        field("RGLB", READ_GROUP_TAG),
        field("RGPL", READ_GROUP_PLATFORM),
        field("RGSM", READ_GROUP_TAG),
        field("RGPU", READ_GROUP_TAG),
        field("VALIDATION_STRINGENCY", VALIDATION_STRINGENCY),
    ]);
    run(picard::arg_generator(&config.bin, &tool_config), None, None, ECHO).await?;
    finish(Stage::AddOrReplaceReadGroups, sorted_bam, completed_file)
}


/// Picard MarkDuplicates. Duplicates are flagged, not removed.
/// A BAM index is built for the deduplicated BAM once it checks out.
pub async fn mark_duplicates(
    config: &RunConfig,
    sorted_bam: &Path,
    deduped_bam: &Path,
    completed_file: &Path,
) -> Result<(), PipelineError> {
    let mut metrics = deduped_bam.as_os_str().to_owned();
    metrics.push(DUP_METRICS_SUFFIX);

    let tool_config = picard_config(config, PicardSubcommand::MarkDuplicates, vec![
        field("INPUT", path_arg(sorted_bam)),
        field("OUTPUT", path_arg(deduped_bam)),
        field("METRICS_FILE", path_arg(&PathBuf::from(metrics))),
        field("ASSUME_SORTED", "true"),
        field("REMOVE_DUPLICATES", "false"),
        field("VALIDATION_STRINGENCY", VALIDATION_STRINGENCY),
    ]);
    run(picard::arg_generator(&config.bin, &tool_config), None, None, ECHO).await?;

    finish(Stage::MarkDuplicates, deduped_bam, completed_file)?;
    build_bam_index(config, deduped_bam).await
}


pub async fn build_bam_index(config: &RunConfig, bam: &Path) -> Result<(), PipelineError> {
    let tool_config = picard_config(config, PicardSubcommand::BuildBamIndex, vec![
        field("INPUT", path_arg(bam)),
    ]);
    run(picard::arg_generator(&config.bin, &tool_config), None, None, ECHO).await?;
    Ok(())
}


/// GATK RealignerTargetCreator: intervals around indels worth realigning.
pub async fn realigner_target_creator(
    config: &RunConfig,
    deduped_bam: &Path,
    intervals: &Path,
    reference: &Path,
    completed_file: &Path,
) -> Result<(), PipelineError> {
    let walker = gatk_config(config, GatkWalker::RealignerTargetCreator, reference, vec![
        field("-I", path_arg(deduped_bam)),
        field("-o", path_arg(intervals)),
    ]);
    run(gatk::arg_generator(&config.bin, &walker), None, None, ECHO).await?;
    finish(Stage::RealignerTargetCreator, intervals, completed_file)
}


/// GATK IndelRealigner over the target intervals.
pub async fn indel_realigner(
    config: &RunConfig,
    intervals: &Path,
    deduped_bam: &Path,
    realigned_bam: &Path,
    reference: &Path,
    completed_file: &Path,
) -> Result<(), PipelineError> {
    let walker = gatk_config(config, GatkWalker::IndelRealigner, reference, vec![
        field("-I", path_arg(deduped_bam)),
        field("-o", path_arg(realigned_bam)),
        field("-targetIntervals", path_arg(intervals)),
    ]);
    run(gatk::arg_generator(&config.bin, &walker), None, None, ECHO).await?;
    finish(Stage::IndelRealigner, realigned_bam, completed_file)
}


/// GATK HaplotypeCaller, haploid, skipping reads with malformed CIGARs.
pub async fn haplotype_caller(
    config: &RunConfig,
    realigned_bam: &Path,
    output_vcf: &Path,
    reference: &Path,
    completed_file: &Path,
) -> Result<(), PipelineError> {
    let walker = gatk_config(config, GatkWalker::HaplotypeCaller, reference, vec![
        field("-I", path_arg(realigned_bam)),
        field("-o", path_arg(output_vcf)),
        field("-ploidy", HC_PLOIDY.to_string()),
        field("-stand_call_conf", format!("{:.1}", HC_STAND_CALL_CONF)),
        field("-stand_emit_conf", format!("{:.1}", HC_STAND_EMIT_CONF)),
        field("-rf", HC_READ_FILTER),
    ]);
    run(gatk::arg_generator(&config.bin, &walker), None, None, ECHO).await?;
    finish(Stage::HaplotypeCaller, output_vcf, completed_file)
}


/// GATK VariantFiltration with hard-coded depth, allele frequency and
/// genotype quality filters, plus SNP cluster flagging.
pub async fn variant_filtration(
    config: &RunConfig,
    input_vcf: &Path,
    filtered_vcf: &Path,
    reference: &Path,
    completed_file: &Path,
) -> Result<(), PipelineError> {
    let mut fields = vec![
        field("-V", path_arg(input_vcf)),
        field("-o", path_arg(filtered_vcf)),
        field("--clusterSize", VF_CLUSTER_SIZE.to_string()),
        field("--clusterWindowSize", VF_CLUSTER_WINDOW.to_string()),
    ];
    for (expression, name) in VF_FILTERS {
        fields.push(field("--filterExpression", *expression));
        fields.push(field("--filterName", *name));
    }

    let walker = gatk_config(config, GatkWalker::VariantFiltration, reference, fields);
    run(gatk::arg_generator(&config.bin, &walker), None, None, ECHO).await?;
    finish(Stage::VariantFiltration, filtered_vcf, completed_file)
}


/// Annotates the filtered calls against the reference GenBank record.
pub async fn vcf_annotator(
    config: &RunConfig,
    filtered_vcf: &Path,
    annotated_vcf: &Path,
    genbank: &Path,
    completed_file: &Path,
) -> Result<(), PipelineError> {
    let args = annotator::arg_generator(&config.bin, genbank, filtered_vcf);
    run(args, Some(annotated_vcf), None, ECHO).await?;
    finish(Stage::VcfAnnotator, annotated_vcf, completed_file)
}


/// Gzips the annotated VCF into its final location.
pub async fn move_final_vcf(
    config: &RunConfig,
    annotated_vcf: &Path,
    compressed_vcf: &Path,
    completed_file: &Path,
) -> Result<(), PipelineError> {
    run(gzip::arg_generator(&config.bin, annotated_vcf), Some(compressed_vcf), None, ECHO).await?;
    match is_gzipped(compressed_vcf) {
        Ok(true) => {}
        Ok(false) => return Err(Stage::MoveFinalVcf.failed()),
        Err(e) if matches!(e.kind(), ErrorKind::NotFound | ErrorKind::UnexpectedEof) => {
            return Err(Stage::MoveFinalVcf.failed());
        }
        Err(e) => {
            return Err(PipelineError::IOError(format!(
                "Cannot read {}: {}",
                compressed_vcf.display(),
                e
            )));
        }
    }
    finish(Stage::MoveFinalVcf, compressed_vcf, completed_file)
}


/// Deletes alignment intermediates under `base_dir`, then archives whatever
/// is left one level down into `tar_gz`.
pub async fn cleanup(
    config: &RunConfig,
    base_dir: &Path,
    tar_gz: &Path,
    completed_file: &Path,
) -> Result<(), PipelineError> {
    for name in CLEANUP_PATTERNS {
        find_and_remove_all(base_dir, name)?;
    }

    let gatk_files = find_files(base_dir, "*", 1, 1)?;
    if !compress_and_remove(&config.bin, tar_gz, &gatk_files, true).await? {
        return Err(PipelineError::TaskIncomplete(CLEANUP_ARCHIVE_FAILURE.to_string()));
    }
    finish(Stage::Cleanup, tar_gz, completed_file)
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use crate::cli::Arguments;
    use crate::config::defs::BinaryRegistry;
    use crate::utils::streams::run as run_command;
    use crate::utils::timing::TimingSink;
    use tempfile::tempdir;

    fn test_config(bin: BinaryRegistry) -> RunConfig {
        RunConfig {
            cwd: PathBuf::from("."),
            out_dir: PathBuf::from("."),
            args: Arguments { java_mem: "1g".to_string(), ..Default::default() },
            bin,
            threads: 1,
            timings: TimingSink::Discard,
        }
    }

    fn system_bin() -> BinaryRegistry {
        BinaryRegistry::from_base_dir(Path::new("/nonexistent"))
    }

    /// Work dir holding one archivable VCF and one BAM for the pattern sweep.
    fn work_dir(root: &Path) -> std::io::Result<(PathBuf, PathBuf, PathBuf)> {
        let work = root.join("S1.variants");
        fs::create_dir_all(&work)?;
        let vcf = work.join("S1.raw.vcf");
        fs::write(&vcf, "##fileformat=VCFv4.1\n")?;
        let bam = work.join("S1.sorted.bam");
        fs::write(&bam, "BAM")?;
        Ok((work, vcf, bam))
    }

    #[tokio::test]
    async fn test_cleanup_archives_and_marks() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let (work, vcf, bam) = work_dir(dir.path())?;
        let archive = dir.path().join("S1.variants.tar.gz");
        let marker = dir.path().join("completed/S1.cleanup.completed");

        cleanup(&test_config(system_bin()), &work, &archive, &marker).await?;

        assert!(marker.is_file());
        assert!(is_gzipped(&archive)?);
        assert!(!vcf.exists());
        assert!(!bam.exists());

        let listing = run_command(
            vec!["tar".to_string(), "-tzf".to_string(), archive.to_string_lossy().into_owned()],
            None,
            None,
            false,
        )
            .await?;
        assert_eq!(listing.stdout_lossy().lines().collect::<Vec<_>>(), vec!["S1.raw.vcf"]);
        Ok(())
    }

    #[tokio::test]
    async fn test_cleanup_failed_archive_keeps_outputs() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let (work, vcf, bam) = work_dir(dir.path())?;
        let archive = dir.path().join("S1.variants.tar.gz");
        let marker = dir.path().join("completed/S1.cleanup.completed");

        let mut bin = system_bin();
        bin.tar = PathBuf::from("false");
        match cleanup(&test_config(bin), &work, &archive, &marker).await {
            Err(PipelineError::TaskIncomplete(msg)) => assert_eq!(msg, CLEANUP_ARCHIVE_FAILURE),
            other => panic!("Expected archive failure, got {:?}", other),
        }

        assert!(vcf.exists(), "Unarchived output must survive");
        assert!(!bam.exists());
        assert!(!archive.exists());
        assert!(!marker.exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_cleanup_missing_tar_is_a_tool_error() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let (work, vcf, _) = work_dir(dir.path())?;
        let archive = dir.path().join("S1.variants.tar.gz");
        let marker = dir.path().join("completed/S1.cleanup.completed");

        let mut bin = system_bin();
        bin.tar = PathBuf::from("/nonexistent/tar");
        let result = cleanup(&test_config(bin), &work, &archive, &marker).await;
        assert!(matches!(result, Err(PipelineError::ToolExecution { .. })));
        assert!(vcf.exists());
        assert!(!archive.exists());
        assert!(!marker.exists());
        Ok(())
    }

    #[test]
    fn test_missing_archive_fails_cleanup_marker() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let marker = dir.path().join("S1.cleanup.completed");
        match finish(Stage::Cleanup, &dir.path().join("S1.variants.tar.gz"), &marker) {
            Err(PipelineError::TaskIncomplete(msg)) => assert_eq!(msg, "Unable to complete GATK clean up."),
            other => panic!("Expected clean up failure, got {:?}", other),
        }
        assert!(!marker.exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_move_final_vcf() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let annotated = dir.path().join("S1.annotated.vcf");
        fs::write(&annotated, "##fileformat=VCFv4.1\n")?;
        let final_vcf = dir.path().join("S1.vcf.gz");
        let marker = dir.path().join("S1.move_final_vcf.completed");

        move_final_vcf(&test_config(system_bin()), &annotated, &final_vcf, &marker).await?;
        assert!(is_gzipped(&final_vcf)?);
        assert!(marker.is_file());
        Ok(())
    }

    #[tokio::test]
    async fn test_move_final_vcf_empty_output_is_stage_failure() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let annotated = dir.path().join("S1.annotated.vcf");
        fs::write(&annotated, "##fileformat=VCFv4.1\n")?;
        let final_vcf = dir.path().join("S1.vcf.gz");
        let marker = dir.path().join("S1.move_final_vcf.completed");

        let mut bin = system_bin();
        bin.gzip = PathBuf::from("true");
        match move_final_vcf(&test_config(bin), &annotated, &final_vcf, &marker).await {
            Err(PipelineError::TaskIncomplete(msg)) => {
                assert_eq!(msg, "final vcf gzip did not complete successfully.")
            }
            other => panic!("Expected gzip stage failure, got {:?}", other),
        }
        assert!(!marker.exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_bwa_index_without_bwt_fails() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let fasta = dir.path().join("ref.fasta");
        fs::write(&fasta, ">chr\nACGT\n")?;
        assert_eq!(index_file(&fasta), dir.path().join("ref.fasta.bwt"));

        let mut bin = system_bin();
        bin.bwa = PathBuf::from("true");
        match bwa_index(&test_config(bin), &fasta).await {
            Err(PipelineError::TaskIncomplete(msg)) => {
                assert_eq!(msg, "bwa index did not complete successfully.")
            }
            other => panic!("Expected index failure, got {:?}", other),
        }
        Ok(())
    }
}
