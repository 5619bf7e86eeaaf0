//! Discovery of the functional runs to process in the supported datasets.
//!
//! * ABIDE preprocessed: one `{FILE_ID}_func_preproc.nii.gz` per subject in a flat directory,
//!   selected and labelled by the phenotype table.
//! * Listen and Midnight Scan Club: fMRIPrep derivatives in BIDS layout, one run per task id.

use log::{debug, info};
use serde::Deserialize;

use std::collections::HashSet;
use std::fmt;
use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use crate::atlas::AtlasName;
use crate::error::{Result, RoiError};

/// Suffix of the ABIDE preprocessed functional files.
pub const ABIDE_FUNC_SUFFIX: &str = "_func_preproc.nii.gz";


/// One functional image to extract region signals from. The `id` names the output files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Run {
    pub id: String,
    pub path: PathBuf,
}

impl fmt::Display for Run {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} ({})", self.id, self.path.display())
    }
}


/// A row of the ABIDE phenotype table. Only the columns needed to select subjects are read.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Phenotype {
    #[serde(rename = "FILE_ID")]
    pub file_id: String,
    #[serde(rename = "DX_GROUP")]
    pub dx_group: i32,
}


/// An ABIDE subject with an available functional image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbideSubject {
    pub run: Run,
    /// `DX_GROUP == 1` in the phenotype table.
    pub autism: bool,
}

impl AbideSubject {
    /// Binary phenotype: 1 for autism, 0 for typically developing controls.
    pub fn phenotype(&self) -> u8 {
        if self.autism { 1 } else { 0 }
    }
}


/// Read the ABIDE phenotype table (CSV with at least `FILE_ID` and `DX_GROUP` columns).
pub fn read_phenotypes<P: AsRef<Path>>(path: P) -> Result<Vec<Phenotype>> {
    let file = BufReader::new(File::open(path)?);
    let mut rdr = csv::ReaderBuilder::new().has_headers(true).flexible(true).from_reader(file);

    let headers = rdr.headers()?.clone();
    for required in ["FILE_ID", "DX_GROUP"].iter() {
        if !headers.iter().any(|h| h == *required) {
            return Err(RoiError::InvalidPhenotype(format!("missing column {}", required)));
        }
    }

    let mut rows: Vec<Phenotype> = Vec::new();
    for result in rdr.deserialize() {
        rows.push(result?);
    }
    debug!("Read {} phenotype rows", rows.len());
    Ok(rows)
}


/// Select the ABIDE subjects whose functional image exists in `func_dir`, in phenotype table order.
///
/// At most `num_subjects` subjects are returned, all of them if `None`.
pub fn abide_subjects<P: AsRef<Path>>(
    func_dir: P,
    phenotypes: &[Phenotype],
    num_subjects: Option<usize>,
) -> Result<Vec<AbideSubject>> {
    let func_dir = func_dir.as_ref();
    let available: HashSet<String> = fs::read_dir(func_dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect();

    let subjects: Vec<AbideSubject> = phenotypes
        .iter()
        .filter_map(|p| {
            let file_name = format!("{}{}", p.file_id, ABIDE_FUNC_SUFFIX);
            if available.contains(&file_name) {
                Some(AbideSubject {
                    run: Run { id: p.file_id.clone(), path: func_dir.join(file_name) },
                    autism: p.dx_group == 1,
                })
            } else {
                None
            }
        })
        .take(num_subjects.unwrap_or(usize::MAX))
        .collect();

    info!(
        "Found {} ABIDE subjects with functional data in {}",
        subjects.len(),
        func_dir.display()
    );
    Ok(subjects)
}


/// The fMRIPrep datasets processed per subject and session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BidsDataset {
    Listen,
    MidnightScanClub,
}


impl BidsDataset {

    /// File name of the preprocessed BOLD series of one task run.
    pub fn file_name(&self, subject: &str, session: &str, task: &str) -> String {
        match self {
            BidsDataset::Listen => format!(
                "sub-{}_ses-{}_task-{}_space-MNI152NLin2009cAsym_desc-preproc_bold.nii.gz",
                subject, session, task
            ),
            BidsDataset::MidnightScanClub => format!(
                "s_sub-{}_ses-{}_task-{}_space-MNI152NLin2009cAsym_res-2_desc-preproc_bold.nii.gz",
                subject, session, task
            ),
        }
    }


    /// The fMRIPrep `func` directory of a subject and session under the derivatives root.
    pub fn func_dir<P: AsRef<Path>>(&self, root: P, subject: &str, session: &str) -> PathBuf {
        root.as_ref()
            .join(format!("sub-{}", subject))
            .join(format!("ses-{}", session))
            .join("func")
    }


    /// All sessions of the dataset.
    pub fn sessions(&self) -> Vec<String> {
        match self {
            BidsDataset::Listen => vec![String::from("01"), String::from("02")],
            BidsDataset::MidnightScanClub => (1..=10).map(|i| format!("func{:02}", i)).collect(),
        }
    }


    /// The session processed when none is requested.
    pub fn default_session(&self) -> &'static str {
        match self {
            BidsDataset::Listen => "01",
            BidsDataset::MidnightScanClub => "func01",
        }
    }


    /// The atlas used when none is requested.
    pub fn default_atlas(&self) -> AtlasName {
        match self {
            BidsDataset::Listen => AtlasName::Schaefer,
            BidsDataset::MidnightScanClub => AtlasName::Msdl,
        }
    }


    /// Label of the task selection when none is given.
    pub fn default_tasks(&self) -> &'static str {
        match self {
            BidsDataset::Listen => "stories",
            BidsDataset::MidnightScanClub => "all_tasks",
        }
    }


    /// The sessions to extract: `session` (or the default session), or with `all` every session.
    ///
    /// For the Midnight Scan Club, `all` skips `func01`, which is processed on its own.
    pub fn sessions_to_process(&self, all: bool, session: Option<&str>) -> Vec<String> {
        if !all {
            return vec![session.unwrap_or_else(|| self.default_session()).to_string()];
        }
        match self {
            BidsDataset::MidnightScanClub => self.sessions().into_iter().skip(1).collect(),
            BidsDataset::Listen => self.sessions(),
        }
    }


    /// The runs of one subject and session, one per task id. Empty ids are skipped.
    pub fn runs<P: AsRef<Path>>(&self, func_dir: P, subject: &str, session: &str, file_ids: &[String]) -> Vec<Run> {
        file_ids
            .iter()
            .filter(|id| !id.is_empty())
            .map(|id| Run {
                id: id.clone(),
                path: func_dir.as_ref().join(self.file_name(subject, session, id)),
            })
            .collect()
    }
}


impl fmt::Display for BidsDataset {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            BidsDataset::Listen => write!(f, "Listen"),
            BidsDataset::MidnightScanClub => write!(f, "Midnight Scan Club"),
        }
    }
}


/// Substitute every `{session}` in a path template.
///
/// # Examples
///
/// ```
/// use std::path::{Path, PathBuf};
/// let path = roiseries::dataset::session_path(Path::new("ids/ses-{session}.txt"), "02");
/// assert_eq!(path, PathBuf::from("ids/ses-02.txt"));
/// ```
pub fn session_path(template: &Path, session: &str) -> PathBuf {
    PathBuf::from(template.to_string_lossy().replace("{session}", session))
}


/// Read task ids from a text file, one per line. Lines are trimmed and empty lines skipped.
pub fn read_file_ids<P: AsRef<Path>>(path: P) -> Result<Vec<String>> {
    let file = BufReader::new(File::open(path)?);
    let mut ids: Vec<String> = Vec::new();
    for line in file.lines() {
        let line = line?;
        let id = line.trim();
        if !id.is_empty() {
            ids.push(id.to_string());
        }
    }
    Ok(ids)
}


#[cfg(test)]
mod test {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn abide_subjects_follow_the_phenotype_table() {
        let dir = tempdir().unwrap();
        let pheno = dir.path().join("pheno.csv");
        fs::write(
            &pheno,
            "SUB_ID,FILE_ID,DX_GROUP,AGE_AT_SCAN\n50002,Pitt_0050002,1,16.77\n50003,Pitt_0050003,2,24.45\n50004,no_filename,1,19.09\n50005,Pitt_0050005,2,13.73\n",
        )
        .unwrap();
        let func = dir.path().join("func");
        fs::create_dir(&func).unwrap();
        for id in ["Pitt_0050002", "Pitt_0050003", "Pitt_0050005"].iter() {
            fs::write(func.join(format!("{}{}", id, ABIDE_FUNC_SUFFIX)), b"").unwrap();
        }

        let phenotypes = read_phenotypes(&pheno).unwrap();
        assert_eq!(phenotypes.len(), 4);

        let subjects = abide_subjects(&func, &phenotypes, None).unwrap();
        let ids: Vec<&str> = subjects.iter().map(|s| s.run.id.as_str()).collect();
        assert_eq!(ids, vec!["Pitt_0050002", "Pitt_0050003", "Pitt_0050005"]);
        let labels: Vec<u8> = subjects.iter().map(|s| s.phenotype()).collect();
        assert_eq!(labels, vec![1, 0, 0]);

        let limited = abide_subjects(&func, &phenotypes, Some(2)).unwrap();
        assert_eq!(limited.len(), 2);
        assert_eq!(limited[1].run.path, func.join("Pitt_0050003_func_preproc.nii.gz"));
    }

    #[test]
    fn phenotype_tables_need_the_selection_columns() {
        let dir = tempdir().unwrap();
        let pheno = dir.path().join("pheno.csv");
        fs::write(&pheno, "SUB_ID,DX_GROUP\n1,1\n").unwrap();
        match read_phenotypes(&pheno) {
            Err(RoiError::InvalidPhenotype(msg)) => assert!(msg.contains("FILE_ID")),
            other => panic!("expected phenotype error, got {:?}", other),
        }
    }

    #[test]
    fn bids_file_names_follow_fmriprep() {
        assert_eq!(
            BidsDataset::Listen.file_name("L010", "01", "alternateithicatom"),
            "sub-L010_ses-01_task-alternateithicatom_space-MNI152NLin2009cAsym_desc-preproc_bold.nii.gz"
        );
        assert_eq!(
            BidsDataset::MidnightScanClub.file_name("MSC01", "func01", "rest"),
            "s_sub-MSC01_ses-func01_task-rest_space-MNI152NLin2009cAsym_res-2_desc-preproc_bold.nii.gz"
        );
        assert_eq!(
            BidsDataset::Listen.func_dir("/data/fmriprep", "L012", "02"),
            PathBuf::from("/data/fmriprep/sub-L012/ses-02/func")
        );
        assert_eq!(BidsDataset::MidnightScanClub.sessions().len(), 10);
        assert_eq!(BidsDataset::MidnightScanClub.sessions()[9], "func10");
    }

    #[test]
    fn msc_all_sessions_skips_the_first() {
        let msc = BidsDataset::MidnightScanClub;
        let all = msc.sessions_to_process(true, Some("func01"));
        assert_eq!(all.len(), 9);
        assert_eq!(all[0], "func02");
        assert_eq!(all[8], "func10");

        assert_eq!(BidsDataset::Listen.sessions_to_process(true, None), vec!["01", "02"]);
        assert_eq!(msc.sessions_to_process(false, None), vec!["func01"]);
        assert_eq!(msc.sessions_to_process(false, Some("func05")), vec!["func05"]);
        assert_eq!(BidsDataset::Listen.sessions_to_process(false, None), vec!["01"]);
    }

    #[test]
    fn dataset_defaults() {
        assert_eq!(BidsDataset::Listen.default_atlas(), AtlasName::Schaefer);
        assert_eq!(BidsDataset::MidnightScanClub.default_atlas(), AtlasName::Msdl);
        assert_eq!(BidsDataset::MidnightScanClub.default_tasks(), "all_tasks");
    }

    #[test]
    fn session_templates_are_expanded() {
        let template = Path::new("/data/{session}/ids_{session}.txt");
        assert_eq!(session_path(template, "func03"), PathBuf::from("/data/func03/ids_func03.txt"));
        assert_eq!(session_path(Path::new("ids.txt"), "01"), PathBuf::from("ids.txt"));
    }

    #[test]
    fn file_ids_skip_blank_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ids.txt");
        fs::write(&path, "motor_run-01\n\n  glasslexical_run-01  \n").unwrap();
        let ids = read_file_ids(&path).unwrap();
        assert_eq!(ids, vec!["motor_run-01", "glasslexical_run-01"]);

        let runs = BidsDataset::MidnightScanClub.runs("/func", "MSC03", "func01", &[String::new(), ids[0].clone()]);
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].id, "motor_run-01");
    }
}
