//! Brain atlases used to define the regions of interest.
//!
//! Two kinds of atlases are supported. A labels atlas is a deterministic parcellation: a
//! 3D volume in which each voxel holds an integer region value (0 is background). A maps
//! atlas is a set of probabilistic maps: a 4D volume with one (soft) spatial map per region.
//!
//! The well-known atlases are loaded from a local atlas directory, using the file names
//! under which they are distributed.

use csv::ReaderBuilder;
use log::info;
use ndarray_stats::QuantileExt;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{Result, RoiError};
use crate::image::{read_nifti, NiftiImage};

pub const HARVARD_OXFORD_IMAGE: &str = "HarvardOxford-sub-maxprob-thr25-1mm.nii.gz";
pub const HARVARD_OXFORD_LABELS: &str = "HarvardOxford-Subcortical.txt";
pub const MSDL_IMAGE: &str = "msdl_rois.nii";
pub const MSDL_LABELS: &str = "msdl_rois_labels.csv";
pub const SCHAEFER_IMAGE: &str = "Schaefer2018_100Parcels_7Networks_order_FSLMNI152_1mm.nii.gz";
pub const SCHAEFER_LABELS: &str = "Schaefer2018_100Parcels_7Networks_order.txt";
pub const CEREBELLUM_IMAGE: &str = "Cerebellum-MNIsegment-1segment.nii";


/// The atlases known to the extraction scripts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AtlasName {
    /// Harvard-Oxford subcortical maximum probability atlas, thresholded at 25%, 1mm.
    HarvardOxford,
    /// Multi-Subject Dictionary Learning probabilistic atlas (39 regions).
    Msdl,
    /// Schaefer 2018, 100 parcels, 7 networks, 1mm.
    Schaefer,
    /// Cerebellum segmentation in MNI space.
    Cerebellum,
}

impl FromStr for AtlasName {
    type Err = RoiError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "harvardoxford" | "harvard_oxford" => Ok(AtlasName::HarvardOxford),
            "msdl" => Ok(AtlasName::Msdl),
            "schaefer" => Ok(AtlasName::Schaefer),
            "cerebellum" => Ok(AtlasName::Cerebellum),
            _ => Err(RoiError::UnknownAtlas(s.to_string())),
        }
    }
}

impl fmt::Display for AtlasName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            AtlasName::HarvardOxford => "HarvardOxford",
            AtlasName::Msdl => "MSDL",
            AtlasName::Schaefer => "Schaefer",
            AtlasName::Cerebellum => "Cerebellum",
        };
        write!(f, "{}", name)
    }
}


/// Whether an atlas assigns voxels to regions (labels) or weights them (maps).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtlasKind {
    Labels,
    Maps,
}

impl AtlasName {
    /// The kind of atlas distributed under this name, which also decides the masker used for it.
    pub fn kind(&self) -> AtlasKind {
        match self {
            AtlasName::Msdl => AtlasKind::Maps,
            _ => AtlasKind::Labels,
        }
    }
}


/// A loaded brain atlas.
#[derive(Debug, Clone, PartialEq)]
pub enum Atlas {
    /// Deterministic parcellation. `names` maps region values to region names, it may lack entries.
    Labels {
        name: String,
        image: NiftiImage,
        names: BTreeMap<i32, String>,
    },
    /// Probabilistic maps, one volume and one name per region.
    Maps {
        name: String,
        image: NiftiImage,
        names: Vec<String>,
    },
}


impl Atlas {

    /// The atlas name, used in output paths.
    pub fn name(&self) -> &str {
        match self {
            Atlas::Labels { name, .. } | Atlas::Maps { name, .. } => name,
        }
    }


    pub fn image(&self) -> &NiftiImage {
        match self {
            Atlas::Labels { image, .. } | Atlas::Maps { image, .. } => image,
        }
    }


    pub fn kind(&self) -> AtlasKind {
        match self {
            Atlas::Labels { .. } => AtlasKind::Labels,
            Atlas::Maps { .. } => AtlasKind::Maps,
        }
    }


    /// Number of regions: distinct non-zero label values, or the number of maps.
    pub fn num_regions(&self) -> usize {
        match self {
            Atlas::Labels { image, .. } => label_values(image).len(),
            Atlas::Maps { image, .. } => image.num_volumes(),
        }
    }


    /// Region names in the column order of extracted signals.
    ///
    /// For labels atlases, regions without an entry in the name table are called `label_<value>`.
    pub fn region_names(&self) -> Vec<String> {
        match self {
            Atlas::Labels { image, names, .. } => label_values(image)
                .into_iter()
                .map(|v| names.get(&v).cloned().unwrap_or_else(|| format!("label_{}", v)))
                .collect(),
            Atlas::Maps { names, .. } => names.clone(),
        }
    }
}


impl fmt::Display for Atlas {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let kind = match self.kind() {
            AtlasKind::Labels => "labels",
            AtlasKind::Maps => "maps",
        };
        write!(f, "{} {} atlas with {} regions on a {:?} grid.", self.name(), kind, self.num_regions(), self.image().shape3())
    }
}


/// The sorted, distinct non-zero label values of a labels image.
pub fn label_values(image: &NiftiImage) -> Vec<i32> {
    let values: BTreeSet<i32> = image
        .volume(0)
        .iter()
        .filter(|v| v.is_finite())
        .map(|v| v.round() as i32)
        .filter(|&v| v != 0)
        .collect();
    values.into_iter().collect()
}


/// Load one of the well-known atlases from `atlas_dir`.
///
/// # Errors
///
/// [`RoiError::MissingAtlasFile`] if the atlas image (or its label table, where one is
/// distributed with the atlas) is not present in `atlas_dir`.
///
/// # Examples
///
/// ```no_run
/// use roiseries::{fetch_atlas, AtlasName};
/// let atlas = fetch_atlas(AtlasName::Schaefer, "atlases").unwrap();
/// println!("{}", atlas);
/// ```
pub fn fetch_atlas<P: AsRef<Path>>(name: AtlasName, atlas_dir: P) -> Result<Atlas> {
    let dir = atlas_dir.as_ref();
    let atlas = match name {
        AtlasName::HarvardOxford => load_labels_atlas(
            name.to_string(),
            dir.join(HARVARD_OXFORD_IMAGE),
            Some(dir.join(HARVARD_OXFORD_LABELS)),
        )?,
        AtlasName::Msdl => load_maps_atlas(
            name.to_string(),
            dir.join(MSDL_IMAGE),
            Some(dir.join(MSDL_LABELS)),
        )?,
        AtlasName::Schaefer => load_labels_atlas(
            name.to_string(),
            dir.join(SCHAEFER_IMAGE),
            Some(dir.join(SCHAEFER_LABELS)),
        )?,
        AtlasName::Cerebellum => load_labels_atlas(name.to_string(), dir.join(CEREBELLUM_IMAGE), None)?,
    };
    info!("Loaded {}", atlas);
    Ok(atlas)
}


/// Load a labels atlas from an image and an optional label table.
pub fn load_labels_atlas<P: AsRef<Path>>(name: String, image_path: P, labels_path: Option<PathBuf>) -> Result<Atlas> {
    let image = read_atlas_image(image_path.as_ref())?;
    if image.num_volumes() != 1 {
        return Err(RoiError::ShapeMismatch(format!(
            "labels atlas must be a 3D volume, found {} volumes",
            image.num_volumes()
        )));
    }
    let names = match labels_path {
        Some(path) => read_label_table(require_file(&path)?)?,
        None => BTreeMap::new(),
    };
    Ok(Atlas::Labels { name, image, names })
}


/// Load a maps atlas from a 4D image and an optional table of region names.
///
/// If no table is given, regions are called `map_<index>`.
pub fn load_maps_atlas<P: AsRef<Path>>(name: String, image_path: P, labels_path: Option<PathBuf>) -> Result<Atlas> {
    let image = read_atlas_image(image_path.as_ref())?;
    let num_maps = image.num_volumes();
    let names = match labels_path {
        Some(path) => read_region_names(require_file(&path)?)?,
        None => (0..num_maps).map(|i| format!("map_{}", i)).collect(),
    };
    if names.len() != num_maps {
        return Err(RoiError::ShapeMismatch(format!(
            "maps atlas has {} maps but {} region names",
            num_maps,
            names.len()
        )));
    }
    let max = image.data.max().map(|v| *v).unwrap_or(0.0);
    if !(max > 0.0) {
        return Err(RoiError::ShapeMismatch(String::from("maps atlas contains no positive weights")));
    }
    Ok(Atlas::Maps { name, image, names })
}


fn require_file(path: &Path) -> Result<&Path> {
    if path.is_file() {
        Ok(path)
    } else {
        Err(RoiError::MissingAtlasFile(path.display().to_string()))
    }
}


fn read_atlas_image(path: &Path) -> Result<NiftiImage> {
    read_nifti(require_file(path)?)
}


/// Read a label table mapping region values to names.
///
/// Each non-empty line holds a region. Lines are tab separated with the region value in the
/// first and the name in the second field, followed by optional extra columns (colors). Lines
/// without tabs may be `<value> <name>` or just `<name>`. For name-only tables, a leading
/// `Background` entry gets value 0 and the other entries are numbered consecutively; without
/// it, numbering starts at 1.
pub fn read_label_table<P: AsRef<Path>>(path: P) -> Result<BTreeMap<i32, String>> {
    let file = BufReader::new(File::open(path)?);
    let mut rdr = ReaderBuilder::new()
        .has_headers(false)
        .delimiter(b'\t')
        .flexible(true)
        .comment(Some(b'#'))
        .from_reader(file);

    let mut explicit: BTreeMap<i32, String> = BTreeMap::new();
    let mut implicit: Vec<String> = Vec::new();

    for result in rdr.records() {
        let record = result?;
        let first = record.get(0).unwrap_or("").trim();
        if first.is_empty() {
            continue;
        }
        if record.len() > 1 {
            if let Ok(value) = first.parse::<i32>() {
                explicit.insert(value, record.get(1).unwrap_or("").trim().to_string());
                continue;
            }
        }
        let numbered = first
            .split_once(char::is_whitespace)
            .and_then(|(value, name)| value.parse::<i32>().ok().map(|v| (v, name.trim())));
        match numbered {
            Some((value, name)) => {
                explicit.insert(value, name.to_string());
            }
            None => implicit.push(first.to_string()),
        }
    }

    if !implicit.is_empty() && !explicit.is_empty() {
        return Err(RoiError::InvalidMaskerConfig(String::from(
            "label table mixes numbered and unnumbered entries",
        )));
    }
    if explicit.is_empty() {
        let offset = match implicit.first() {
            Some(first) if first.eq_ignore_ascii_case("background") => 0,
            _ => 1,
        };
        for (idx, name) in implicit.into_iter().enumerate() {
            explicit.insert(idx as i32 + offset, name);
        }
    }
    explicit.remove(&0);
    Ok(explicit)
}


/// Read region names, one per map, from a CSV file with a `name` column or from a plain list.
pub fn read_region_names<P: AsRef<Path>>(path: P) -> Result<Vec<String>> {
    let file = BufReader::new(File::open(path)?);
    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(file);

    let headers = rdr.headers()?.clone();
    let name_col = headers.iter().position(|h| h.trim().eq_ignore_ascii_case("name"));

    let mut names: Vec<String> = Vec::new();
    match name_col {
        Some(col) => {
            for result in rdr.records() {
                let record = result?;
                names.push(record.get(col).unwrap_or("").trim().to_string());
            }
        }
        None => {
            // No header with a name column: every line is a name.
            if let Some(h) = headers.get(0) {
                names.push(h.trim().to_string());
            }
            for result in rdr.records() {
                let record = result?;
                names.push(record.get(0).unwrap_or("").trim().to_string());
            }
        }
    }
    names.retain(|n| !n.is_empty());
    Ok(names)
}
