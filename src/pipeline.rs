//! The extraction pipeline: atlas → masker → runs → CSV files.

use log::info;

use std::path::{Path, PathBuf};

use crate::atlas::{fetch_atlas, AtlasName};
use crate::dataset::{abide_subjects, read_phenotypes, BidsDataset, Run};
use crate::error::Result;
use crate::masker::{build_named_masker, Masker, MaskerConfig};
use crate::output::OutputLayout;


/// What a pipeline run wrote: the run ids with the `[T, R]` shape of their signals.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractionReport {
    pub written: Vec<(String, (usize, usize))>,
}

impl ExtractionReport {
    pub fn len(&self) -> usize {
        self.written.len()
    }

    pub fn is_empty(&self) -> bool {
        self.written.is_empty()
    }
}


/// Extract the region signals of all runs, in order, and write them with `layout`.
///
/// Runs with an empty id are skipped. The first failing run aborts the batch; files
/// written for earlier runs are kept.
pub fn extract_time_series(runs: &[Run], masker: &dyn Masker, layout: &OutputLayout) -> Result<ExtractionReport> {
    layout.prepare()?;
    info!("Masker settings: {}", masker.config());
    let mut report = ExtractionReport::default();
    for (i, run) in runs.iter().enumerate() {
        if run.id.is_empty() {
            continue;
        }
        info!("[{}/{}] {}", i + 1, runs.len(), run);
        let signals = masker.transform_file(&run.path)?;
        let path = layout.write_run(&run.id, &signals)?;
        info!("Wrote {:?} signals to {}", signals.dim(), path.display());
        report.written.push((run.id.clone(), signals.dim()));
    }
    Ok(report)
}


/// Parameters of a per-subject, per-session extraction in a BIDS dataset.
#[derive(Debug, Clone)]
pub struct SessionJob {
    pub dataset: BidsDataset,
    /// The fMRIPrep `func` directory holding the runs of this session.
    pub func_dir: PathBuf,
    pub subject: String,
    pub session: String,
    pub file_ids: Vec<String>,
    /// Label of the task selection, used as a directory level in the output.
    pub tasks: String,
    pub output_root: PathBuf,
}


/// Extract all runs of one subject and session with the given atlas.
///
/// Use [`MaskerConfig::for_atlas`] for the settings that belong to `atlas_name`.
pub fn extract_session<P: AsRef<Path>>(
    job: &SessionJob,
    atlas_name: AtlasName,
    atlas_dir: P,
    config: MaskerConfig,
) -> Result<ExtractionReport> {
    let atlas = fetch_atlas(atlas_name, atlas_dir)?;
    let masker = build_named_masker(atlas_name, &atlas, config)?;
    let runs = job.dataset.runs(&job.func_dir, &job.subject, &job.session, &job.file_ids);
    let layout = OutputLayout::Session {
        root: job.output_root.clone(),
        subject: job.subject.clone(),
        session: job.session.clone(),
        atlas: atlas.name().to_string(),
        tasks: job.tasks.clone(),
    };
    info!(
        "{} subject {} session {}: {} runs with the {} atlas",
        job.dataset,
        job.subject,
        job.session,
        runs.len(),
        atlas.name()
    );
    extract_time_series(&runs, masker.as_ref(), &layout)
}


/// Parameters of a cohort extraction over the ABIDE preprocessed data.
#[derive(Debug, Clone)]
pub struct CohortJob {
    pub func_dir: PathBuf,
    pub phenotype_file: PathBuf,
    pub num_subjects: usize,
    pub output_root: PathBuf,
}


/// Extract the first `num_subjects` ABIDE subjects with available data.
///
/// The output directory is named after the requested number of subjects, even if fewer are available.
pub fn extract_cohort<P: AsRef<Path>>(
    job: &CohortJob,
    atlas_name: AtlasName,
    atlas_dir: P,
    config: MaskerConfig,
) -> Result<ExtractionReport> {
    let atlas = fetch_atlas(atlas_name, atlas_dir)?;
    let phenotypes = read_phenotypes(&job.phenotype_file)?;
    let subjects = abide_subjects(&job.func_dir, &phenotypes, Some(job.num_subjects))?;
    let masker = build_named_masker(atlas_name, &atlas, config)?;

    let autism = subjects.iter().filter(|s| s.autism).count();
    info!(
        "ABIDE cohort: {} subjects ({} autism, {} controls) with the {} atlas",
        subjects.len(),
        autism,
        subjects.len() - autism,
        atlas.name()
    );

    let runs: Vec<Run> = subjects.into_iter().map(|s| s.run).collect();
    let layout = OutputLayout::Cohort {
        root: job.output_root.clone(),
        num_subjects: job.num_subjects,
        atlas: atlas.name().to_string(),
    };
    extract_time_series(&runs, masker.as_ref(), &layout)
}
