use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::fs;

use log::{info, warn};

use crate::cli::AlignMode;
use crate::config::defs::{
    PipelineError, RunConfig, Stage, COMPLETED_DIR, FASTQ_EXTS, GZIP_EXT,
    MARKER_EXT, READ_LENGTH_SAMPLE, SHORT_READ_MEAN_LEN, WORK_DIR,
};
use crate::pipelines::variants;
use crate::utils::command::{check_binaries, log_versions};
use crate::utils::fastq::mean_read_length;
use crate::utils::file::{file_path_manipulator, try_complete};
use crate::utils::timing::time_stage;


/// Every file a single sample's run reads or writes below the output directory.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleLayout {
    pub out_dir: PathBuf,
    pub work_dir: PathBuf,
    pub completed_dir: PathBuf,
    pub sam: PathBuf,
    pub sai: PathBuf,
    pub sorted_bam: PathBuf,
    pub deduped_bam: PathBuf,
    pub intervals: PathBuf,
    pub realigned_bam: PathBuf,
    pub raw_vcf: PathBuf,
    pub filtered_vcf: PathBuf,
    pub annotated_vcf: PathBuf,
    pub final_vcf: PathBuf,
    pub archive: PathBuf,
}

impl SampleLayout {
    pub fn new(out_dir: &Path, sample: &str) -> Self {
        let base = PathBuf::from(sample);
        let work_dir = file_path_manipulator(&base, Some(out_dir), None, Some(WORK_DIR), ".");
        let work = |suffix: &str| file_path_manipulator(&base, Some(&work_dir), None, Some(suffix), ".");

        SampleLayout {
            sam: work("sam"),
            sai: work("sai"),
            sorted_bam: work("sorted.bam"),
            deduped_bam: work("deduped.bam"),
            intervals: work("intervals"),
            realigned_bam: work("realigned.bam"),
            raw_vcf: work("raw.vcf"),
            filtered_vcf: work("filtered.vcf"),
            annotated_vcf: work("annotated.vcf"),
            final_vcf: file_path_manipulator(&base, Some(out_dir), None, Some(&format!("vcf.{}", GZIP_EXT)), "."),
            archive: file_path_manipulator(&base, Some(out_dir), None, Some(&format!("{}.tar.{}", WORK_DIR, GZIP_EXT)), "."),
            completed_dir: out_dir.join(COMPLETED_DIR),
            out_dir: out_dir.to_path_buf(),
            work_dir,
        }
    }

    pub fn create_dirs(&self) -> Result<(), PipelineError> {
        fs::create_dir_all(&self.work_dir)?;
        fs::create_dir_all(&self.completed_dir)?;
        Ok(())
    }
}


/// Zero-byte files recording which stages of one sample have finished.
/// Several samples may share a marker directory.
#[derive(Debug, Clone)]
pub struct StageMarkers {
    dir: PathBuf,
    sample: String,
}

impl StageMarkers {
    pub fn new(dir: PathBuf, sample: &str) -> Self {
        StageMarkers { dir, sample: sample.to_string() }
    }

    pub fn marker(&self, stage: Stage) -> PathBuf {
        self.dir.join(format!("{}.{}.{}", self.sample, stage.name(), MARKER_EXT))
    }

    pub fn is_complete(&self, stage: Stage) -> bool {
        self.marker(stage).is_file()
    }
}


/// Sample prefix from the FASTQ name, dropping `.gz` and a FASTQ extension.
pub fn sample_name(fastq: &Path) -> String {
    let mut name = fastq
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "sample".to_string());

    if let Some(stripped) = name.strip_suffix(&format!(".{}", GZIP_EXT)) {
        name = stripped.to_string();
    }
    for ext in FASTQ_EXTS {
        if let Some(stripped) = name.strip_suffix(&format!(".{}", ext)) {
            name = stripped.to_string();
            break;
        }
    }
    name
}


/// Resolves `Auto` by sampling read lengths; short reads go to bwa aln.
pub fn resolve_align_mode(mode: AlignMode, fastq: &Path) -> Result<AlignMode, PipelineError> {
    match mode {
        AlignMode::Auto => {
            let mean = mean_read_length(fastq, READ_LENGTH_SAMPLE)
                .map_err(|e| PipelineError::InvalidFastqFormat(e.to_string()))?
                .ok_or_else(|| PipelineError::InvalidFastqFormat(format!("{} has no reads", fastq.display())))?;
            let chosen = if mean < SHORT_READ_MEAN_LEN { AlignMode::Aln } else { AlignMode::Mem };
            info!("Mean read length {:.1}; aligning with {:?}", mean, chosen);
            Ok(chosen)
        }
        other => Ok(other),
    }
}


fn resolve_input(cwd: &Path, arg: &str) -> Result<PathBuf, PipelineError> {
    let path = PathBuf::from(arg);
    let path = if path.is_absolute() { path } else { cwd.join(path) };
    if !path.is_file() {
        return Err(PipelineError::InvalidConfig(format!("Input file not found: {}", path.display())));
    }
    Ok(path)
}


async fn run_stage<F>(
    config: &RunConfig,
    markers: &StageMarkers,
    stage: Stage,
    task: F,
) -> Result<(), PipelineError>
where
    F: Future<Output = Result<(), PipelineError>>,
{
    if markers.is_complete(stage) {
        info!("{} already complete, skipping", stage.name());
        return Ok(());
    }
    info!("Running {}", stage.name());
    time_stage(stage.name(), &config.timings, task).await
}


/// Runs every stage in order, resuming past stages whose markers exist.
/// The first failing stage stops the run.
pub async fn run(config: Arc<RunConfig>) -> Result<(), PipelineError> {
    println!("\n-------------\n Call Variants\n-------------\n");
    let cfg = config.as_ref();
    let args = &cfg.args;

    let reference = resolve_input(&cfg.cwd, &args.reference)?;
    let fastq = resolve_input(&cfg.cwd, &args.fastq)?;
    let genbank = resolve_input(&cfg.cwd, &args.genbank)?;
    let sample = args.sample.clone().unwrap_or_else(|| sample_name(&fastq));

    let layout = SampleLayout::new(&cfg.out_dir, &sample);
    layout.create_dirs()?;
    let markers = StageMarkers::new(layout.completed_dir.clone(), &sample);
    info!("Sample {} writing to {}", sample, layout.out_dir.display());

    if !args.skip_preflight {
        check_binaries(&cfg.bin)?;
        log_versions(&cfg.bin).await;
    }

    let bwt = variants::index_file(&reference);
    if try_complete(&bwt, &bwt, false)? {
        info!("{} found, skipping {}", bwt.display(), Stage::IndexReference.name());
    } else {
        time_stage(Stage::IndexReference.name(), &cfg.timings, variants::bwa_index(cfg, &reference)).await?;
    }

    if markers.is_complete(Stage::BwaMem) || markers.is_complete(Stage::BwaAln) {
        info!("Alignment already complete, skipping");
    } else {
        match resolve_align_mode(args.align_mode, &fastq)? {
            AlignMode::Aln => {
                let done = markers.marker(Stage::BwaAln);
                run_stage(cfg, &markers, Stage::BwaAln, variants::bwa_aln(
                    cfg, &fastq, &layout.sai, &layout.sam, cfg.threads, &reference, &done,
                )).await?;
            }
            _ => {
                let done = markers.marker(Stage::BwaMem);
                run_stage(cfg, &markers, Stage::BwaMem, variants::bwa_mem(
                    cfg, &fastq, &layout.sam, cfg.threads, &reference, &done,
                )).await?;
            }
        }
    }

    let done = markers.marker(Stage::AddOrReplaceReadGroups);
    run_stage(cfg, &markers, Stage::AddOrReplaceReadGroups, variants::add_or_replace_read_groups(
        cfg, &layout.sam, &layout.sorted_bam, &done,
    )).await?;

    let done = markers.marker(Stage::MarkDuplicates);
    run_stage(cfg, &markers, Stage::MarkDuplicates, variants::mark_duplicates(
        cfg, &layout.sorted_bam, &layout.deduped_bam, &done,
    )).await?;

    let done = markers.marker(Stage::RealignerTargetCreator);
    run_stage(cfg, &markers, Stage::RealignerTargetCreator, variants::realigner_target_creator(
        cfg, &layout.deduped_bam, &layout.intervals, &reference, &done,
    )).await?;

    let done = markers.marker(Stage::IndelRealigner);
    run_stage(cfg, &markers, Stage::IndelRealigner, variants::indel_realigner(
        cfg, &layout.intervals, &layout.deduped_bam, &layout.realigned_bam, &reference, &done,
    )).await?;

    let done = markers.marker(Stage::HaplotypeCaller);
    run_stage(cfg, &markers, Stage::HaplotypeCaller, variants::haplotype_caller(
        cfg, &layout.realigned_bam, &layout.raw_vcf, &reference, &done,
    )).await?;

    let done = markers.marker(Stage::VariantFiltration);
    run_stage(cfg, &markers, Stage::VariantFiltration, variants::variant_filtration(
        cfg, &layout.raw_vcf, &layout.filtered_vcf, &reference, &done,
    )).await?;

    let done = markers.marker(Stage::VcfAnnotator);
    run_stage(cfg, &markers, Stage::VcfAnnotator, variants::vcf_annotator(
        cfg, &layout.filtered_vcf, &layout.annotated_vcf, &genbank, &done,
    )).await?;

    let done = markers.marker(Stage::MoveFinalVcf);
    run_stage(cfg, &markers, Stage::MoveFinalVcf, variants::move_final_vcf(
        cfg, &layout.annotated_vcf, &layout.final_vcf, &done,
    )).await?;

    if args.skip_cleanup {
        warn!("Skipping cleanup; intermediates left in {}", layout.work_dir.display());
    } else {
        let done = markers.marker(Stage::Cleanup);
        run_stage(cfg, &markers, Stage::Cleanup, variants::cleanup(
            cfg, &layout.work_dir, &layout.archive, &done,
        )).await?;
    }

    info!("Final VCF: {}", layout.final_vcf.display());
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{tempdir, NamedTempFile};

    #[test]
    fn test_sample_layout() {
        let layout = SampleLayout::new(Path::new("/out"), "S1");
        assert_eq!(layout.work_dir, PathBuf::from("/out/S1.variants"));
        assert_eq!(layout.sam, PathBuf::from("/out/S1.variants/S1.sam"));
        assert_eq!(layout.deduped_bam, PathBuf::from("/out/S1.variants/S1.deduped.bam"));
        assert_eq!(layout.final_vcf, PathBuf::from("/out/S1.vcf.gz"));
        assert_eq!(layout.archive, PathBuf::from("/out/S1.variants.tar.gz"));
        assert_eq!(layout.completed_dir, PathBuf::from("/out/completed"));
    }

    #[test]
    fn test_sample_name() {
        assert_eq!(sample_name(Path::new("/reads/S1.fastq.gz")), "S1");
        assert_eq!(sample_name(Path::new("S2.fq")), "S2");
        assert_eq!(sample_name(Path::new("S3.reads")), "S3.reads");
    }

    #[test]
    fn test_stage_markers() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let markers = StageMarkers::new(dir.path().to_path_buf(), "S1");
        assert_eq!(markers.marker(Stage::HaplotypeCaller), dir.path().join("S1.haplotype_caller.completed"));
        assert!(!markers.is_complete(Stage::HaplotypeCaller));
        fs::write(markers.marker(Stage::HaplotypeCaller), "")?;
        assert!(markers.is_complete(Stage::HaplotypeCaller));

        let other = StageMarkers::new(dir.path().to_path_buf(), "S2");
        assert!(!other.is_complete(Stage::HaplotypeCaller));
        Ok(())
    }

    fn fastq_with_length(len: usize) -> anyhow::Result<NamedTempFile> {
        let mut tmp = NamedTempFile::new()?;
        for i in 0..20 {
            write!(tmp, "@r{}\n{}\n+\n{}\n", i, "C".repeat(len), "I".repeat(len))?;
        }
        tmp.flush()?;
        Ok(tmp)
    }

    #[test]
    fn test_resolve_align_mode() -> anyhow::Result<()> {
        let short = fastq_with_length(50)?;
        let long = fastq_with_length(150)?;
        assert_eq!(resolve_align_mode(AlignMode::Auto, short.path())?, AlignMode::Aln);
        assert_eq!(resolve_align_mode(AlignMode::Auto, long.path())?, AlignMode::Mem);
        assert_eq!(resolve_align_mode(AlignMode::Mem, short.path())?, AlignMode::Mem);

        let empty = NamedTempFile::new()?;
        assert!(matches!(
            resolve_align_mode(AlignMode::Auto, empty.path()),
            Err(PipelineError::InvalidFastqFormat(_))
        ));
        Ok(())
    }
}
