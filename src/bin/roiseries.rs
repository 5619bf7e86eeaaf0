use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use log::info;
use std::path::{Path, PathBuf};

use roiseries::{
    extract_cohort, extract_session, read_file_ids, session_path, AtlasName, BidsDataset, CohortJob,
    ExtractionReport, MaskerConfig, ResamplingTarget, SessionJob, Standardize,
};

#[derive(Parser)]
#[command(name = "roiseries", about = "Extract ROI time series from preprocessed fMRI data")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// ABIDE preprocessed cohort, selected by the phenotype table
    Abide(AbideArgs),
    /// Listen fMRIPrep derivatives, one subject and session(s)
    Listen(SessionArgs),
    /// Midnight Scan Club fMRIPrep derivatives, one subject and session(s)
    Msc(SessionArgs),
}

#[derive(Args)]
struct CommonArgs {
    /// Atlas: HarvardOxford, MSDL, Schaefer or Cerebellum (default depends on the dataset)
    #[arg(long)]
    atlas: Option<String>,

    /// Directory holding the atlas files
    #[arg(long, default_value = "atlases")]
    atlas_dir: PathBuf,

    /// Root of the output tree
    #[arg(long, default_value = roiseries::output::DEFAULT_OUTPUT_ROOT)]
    output: PathBuf,

    /// Expected repetition time in seconds (default: 2.0, unchecked for Schaefer)
    #[arg(long)]
    t_r: Option<f64>,

    /// Remove linear trends (default for all atlases but Schaefer)
    #[arg(long, conflicts_with = "no_detrend")]
    detrend: bool,

    /// Do not remove linear trends
    #[arg(long)]
    no_detrend: bool,

    /// Standardization: none, zscore, zscore_sample or psc (default: zscore_sample)
    #[arg(long)]
    standardize: Option<String>,

    /// Grid to resample onto: data or labels
    #[arg(long, default_value = "data")]
    resampling_target: String,

    /// Drop regions without voxels instead of writing zero columns
    #[arg(long)]
    drop_masked_labels: bool,
}

impl CommonArgs {
    /// The settings of `atlas`, with the options given on the command line applied on top.
    fn masker_config(&self, atlas: AtlasName) -> Result<MaskerConfig> {
        let mut config = MaskerConfig::for_atlas(atlas);
        if let Some(t_r) = self.t_r {
            config.t_r = Some(t_r);
        }
        if self.detrend {
            config.detrend = true;
        }
        if self.no_detrend {
            config.detrend = false;
        }
        if let Some(standardize) = &self.standardize {
            config.standardize = standardize.parse::<Standardize>()?;
        }
        config.resampling_target = self.resampling_target.parse::<ResamplingTarget>()?;
        config.keep_masked_labels = !self.drop_masked_labels;
        Ok(config)
    }

    fn atlas_name(&self, default: AtlasName) -> Result<AtlasName> {
        match &self.atlas {
            Some(name) => Ok(name.parse::<AtlasName>()?),
            None => Ok(default),
        }
    }
}

#[derive(Args)]
struct AbideArgs {
    /// Directory with the *_func_preproc.nii.gz files
    #[arg(long)]
    func_dir: PathBuf,

    /// Phenotype CSV with FILE_ID and DX_GROUP columns
    #[arg(long)]
    phenotype_file: PathBuf,

    /// Number of subjects to process (max 884)
    #[arg(long, default_value_t = 884)]
    num_subjects: usize,

    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Args)]
struct SessionArgs {
    /// fMRIPrep derivatives root containing sub-*/ses-*/func
    #[arg(long)]
    derivatives: PathBuf,

    #[arg(long)]
    subject: String,

    /// Session to process; ignored with --all-sessions
    #[arg(long)]
    session: Option<String>,

    /// Process every session of the dataset
    #[arg(long)]
    all_sessions: bool,

    /// Text file with one task id per line; `{session}` is replaced by the session
    #[arg(long)]
    file_ids: Option<PathBuf>,

    /// Task ids to process, comma-separated; overrides --file-ids
    #[arg(long, value_delimiter = ',')]
    ids: Vec<String>,

    /// Label of the task selection, used in the output path
    #[arg(long)]
    tasks: Option<String>,

    #[command(flatten)]
    common: CommonArgs,
}

fn session_ids(args: &SessionArgs, session: &str) -> Result<Vec<String>> {
    if !args.ids.is_empty() {
        return Ok(args.ids.clone());
    }
    match &args.file_ids {
        Some(template) => {
            let path = session_path(template, session);
            read_file_ids(&path).with_context(|| format!("reading task ids from {}", path.display()))
        }
        None => bail!("either --ids or --file-ids is required"),
    }
}

fn run_sessions(dataset: BidsDataset, args: &SessionArgs) -> Result<()> {
    let atlas = args.common.atlas_name(dataset.default_atlas())?;
    let tasks = args.tasks.clone().unwrap_or_else(|| dataset.default_tasks().to_string());
    let config = args.common.masker_config(atlas)?;

    for session in dataset.sessions_to_process(args.all_sessions, args.session.as_deref()) {
        let job = SessionJob {
            dataset,
            func_dir: dataset.func_dir(&args.derivatives, &args.subject, &session),
            subject: args.subject.clone(),
            file_ids: session_ids(args, &session)?,
            session,
            tasks: tasks.clone(),
            output_root: args.common.output.clone(),
        };
        let report = extract_session(&job, atlas, &args.common.atlas_dir, config.clone())
            .with_context(|| format!("{} subject {} session {}", dataset, job.subject, job.session))?;
        summarize(&report, &args.common.output);
    }
    Ok(())
}

fn summarize(report: &ExtractionReport, root: &Path) {
    info!("Extracted {} runs into {}", report.len(), root.display());
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match &cli.command {
        Command::Abide(args) => {
            let job = CohortJob {
                func_dir: args.func_dir.clone(),
                phenotype_file: args.phenotype_file.clone(),
                num_subjects: args.num_subjects,
                output_root: args.common.output.clone(),
            };
            let atlas = args.common.atlas_name(AtlasName::Msdl)?;
            let report = extract_cohort(&job, atlas, &args.common.atlas_dir, args.common.masker_config(atlas)?)
                .context("ABIDE cohort extraction")?;
            summarize(&report, &args.common.output);
        }
        Command::Listen(args) => run_sessions(BidsDataset::Listen, args)?,
        Command::Msc(args) => run_sessions(BidsDataset::MidnightScanClub, args)?,
    }
    Ok(())
}
