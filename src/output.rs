//! Writing extracted region signals to the fixed output directory layout.
//!
//! For every run two CSV files are written: the signals under `pooled/` (one row per time
//! point, one column per region) and the array shape under `shape/` (one dimension per line).
//! Values use numpy's `savetxt` default format, so downstream Python tooling reads them unchanged.

use csv::{Terminator, WriterBuilder};
use log::debug;
use ndarray::Array2;

use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};

use crate::error::{Result, RoiError};
use crate::util::format_sci;

pub const DEFAULT_OUTPUT_ROOT: &str = "output/roi_time_series";
pub const POOLED_DIR: &str = "pooled";
pub const SHAPE_DIR: &str = "shape";


/// Where the CSV files of a batch of runs go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputLayout {
    /// `{root}/{subject}/{session}/{atlas}/{tasks}/{pooled|shape}/{id}.csv`
    Session {
        root: PathBuf,
        subject: String,
        session: String,
        atlas: String,
        tasks: String,
    },
    /// `{root}/{num_subjects}_{atlas}/{pooled|shape}/{id}.csv`, used for subject cohorts.
    Cohort {
        root: PathBuf,
        num_subjects: usize,
        atlas: String,
    },
}


impl OutputLayout {

    /// The directory holding the `pooled` and `shape` directories.
    pub fn base_dir(&self) -> PathBuf {
        match self {
            OutputLayout::Session { root, subject, session, atlas, tasks } => {
                root.join(subject).join(session).join(atlas).join(tasks)
            }
            OutputLayout::Cohort { root, num_subjects, atlas } => root.join(format!("{}_{}", num_subjects, atlas)),
        }
    }


    pub fn pooled_path(&self, id: &str) -> PathBuf {
        self.base_dir().join(POOLED_DIR).join(format!("{}.csv", id))
    }


    pub fn shape_path(&self, id: &str) -> PathBuf {
        self.base_dir().join(SHAPE_DIR).join(format!("{}.csv", id))
    }


    /// Create the `pooled` and `shape` directories. Existing directories are fine.
    pub fn prepare(&self) -> Result<()> {
        let base = self.base_dir();
        fs::create_dir_all(base.join(POOLED_DIR))?;
        fs::create_dir_all(base.join(SHAPE_DIR))?;
        debug!("Prepared output directory {}", base.display());
        Ok(())
    }


    /// Write the signals of one run and their shape. Returns the path of the signals file.
    pub fn write_run(&self, id: &str, signals: &Array2<f64>) -> Result<PathBuf> {
        let pooled = self.pooled_path(id);
        write_matrix_csv(&pooled, signals)?;
        let (rows, cols) = signals.dim();
        write_shape_csv(self.shape_path(id), &[rows, cols])?;
        Ok(pooled)
    }
}


/// Write a 2D array as comma separated values, one row per line.
pub fn write_matrix_csv<P: AsRef<Path>>(path: P, array: &Array2<f64>) -> Result<()> {
    let mut wtr = WriterBuilder::new().has_headers(false).terminator(Terminator::Any(b'\n')).from_path(path)?;
    for row in array.outer_iter() {
        wtr.write_record(row.iter().map(|v| format_sci(*v)))?;
    }
    wtr.flush()?;
    Ok(())
}


/// Write an array shape, one dimension per line.
pub fn write_shape_csv<P: AsRef<Path>>(path: P, shape: &[usize]) -> Result<()> {
    let mut wtr = WriterBuilder::new().has_headers(false).terminator(Terminator::Any(b'\n')).from_path(path)?;
    for dim in shape {
        wtr.write_record(&[format_sci(*dim as f64)])?;
    }
    wtr.flush()?;
    Ok(())
}


/// Read a matrix written by [`write_matrix_csv`] (or numpy's `savetxt` with a comma delimiter).
pub fn read_matrix_csv<P: AsRef<Path>>(path: P) -> Result<Array2<f64>> {
    let file = BufReader::new(File::open(path)?);
    let mut rdr = csv::ReaderBuilder::new().has_headers(false).from_reader(file);

    let mut values: Vec<f64> = Vec::new();
    let mut num_rows = 0usize;
    let mut num_cols: Option<usize> = None;
    for result in rdr.records() {
        let record = result?;
        if let Some(n) = num_cols {
            if n != record.len() {
                return Err(RoiError::ShapeMismatch(format!("row {} has {} columns, expected {}", num_rows, record.len(), n)));
            }
        }
        num_cols = Some(record.len());
        for field in record.iter() {
            let v = field
                .trim()
                .parse::<f64>()
                .map_err(|e| RoiError::ShapeMismatch(format!("cannot parse '{}': {}", field, e)))?;
            values.push(v);
        }
        num_rows += 1;
    }
    Array2::from_shape_vec((num_rows, num_cols.unwrap_or(0)), values).map_err(|e| RoiError::ShapeMismatch(e.to_string()))
}
