use ndarray::{Array2, Array4, Axis};
use roiseries::atlas::{CEREBELLUM_IMAGE, MSDL_IMAGE, MSDL_LABELS, SCHAEFER_IMAGE, SCHAEFER_LABELS};
use roiseries::{
    affine, extract_cohort, extract_session, read_matrix_csv, write_nifti, AtlasName, BidsDataset, CohortJob,
    MaskerConfig, NiftiImage, SessionJob, Standardize,
};
use std::fs;
use std::path::Path;
use tempfile::tempdir;

/// A 6x6x6 1mm atlas with three slabs along x: labels 1, 2 and 3.
fn write_schaefer_like_atlas(dir: &Path) {
    let labels = Array4::from_shape_fn((6, 6, 6, 1), |(x, _, _, _)| (x / 2 + 1) as f32);
    write_nifti(dir.join(SCHAEFER_IMAGE), &NiftiImage::new(labels, affine::identity())).unwrap();
    fs::write(
        dir.join(SCHAEFER_LABELS),
        "1\t7Networks_LH_Vis_1\t120\t18\t134\t0\n2\t7Networks_LH_SomMot_1\t70\t130\t180\t0\n3\t7Networks_RH_Vis_1\t120\t18\t136\t0\n",
    )
    .unwrap();
}

/// A 4D run on the atlas grid, each slab following its own oscillation.
fn bold_run(n_t: usize, phase: f32) -> NiftiImage {
    let data = Array4::from_shape_fn((6, 6, 6, n_t), |(x, y, _, t)| {
        let region = (x / 2) as f32;
        100.0 + (t as f32 * (0.3 + 0.2 * region) + phase).sin() * (1.0 + region) + 0.01 * y as f32
    });
    let mut img = NiftiImage::new(data, affine::identity());
    img.header.pixdim[4] = 2.0;
    img.header.xyzt_units = 10;
    img
}

#[test]
fn session_runs_end_up_in_the_output_tree() {
    let tmp = tempdir().unwrap();
    let atlas_dir = tmp.path().join("atlases");
    fs::create_dir_all(&atlas_dir).unwrap();
    write_schaefer_like_atlas(&atlas_dir);

    let dataset = BidsDataset::Listen;
    let derivatives = tmp.path().join("fmriprep");
    let func_dir = dataset.func_dir(&derivatives, "L012", "01");
    fs::create_dir_all(&func_dir).unwrap();
    for (id, phase) in [("alternateithicatom", 0.0f32), ("undertheinfluence", 1.0)].iter() {
        write_nifti(func_dir.join(dataset.file_name("L012", "01", id)), &bold_run(30, *phase)).unwrap();
    }

    let output_root = tmp.path().join("output");
    let job = SessionJob {
        dataset,
        func_dir,
        subject: String::from("L012"),
        session: String::from("01"),
        file_ids: vec![String::from("alternateithicatom"), String::new(), String::from("undertheinfluence")],
        tasks: String::from("stories"),
        output_root: output_root.clone(),
    };
    let config = MaskerConfig::for_atlas(AtlasName::Schaefer);
    let report = extract_session(&job, AtlasName::Schaefer, &atlas_dir, config).unwrap();

    assert_eq!(report.len(), 2);
    assert_eq!(report.written[0], (String::from("alternateithicatom"), (30, 3)));

    let base = output_root.join("L012").join("01").join("Schaefer").join("stories");
    let signals: Array2<f64> = read_matrix_csv(base.join("pooled").join("undertheinfluence.csv")).unwrap();
    assert_eq!(signals.dim(), (30, 3));
    for col in signals.axis_iter(Axis(1)) {
        let mean = col.sum() / 30.0;
        let var = col.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / 29.0;
        approx::assert_abs_diff_eq!(mean, 0.0, epsilon = 1e-8);
        approx::assert_abs_diff_eq!(var, 1.0, epsilon = 1e-8);
    }

    let shape = fs::read_to_string(base.join("shape").join("alternateithicatom.csv")).unwrap();
    assert_eq!(shape, "3.000000000000000000e+01\n3.000000000000000000e+00\n");
}

#[test]
fn missing_runs_abort_the_session() {
    let tmp = tempdir().unwrap();
    write_schaefer_like_atlas(tmp.path());

    let job = SessionJob {
        dataset: BidsDataset::MidnightScanClub,
        func_dir: tmp.path().join("does-not-exist"),
        subject: String::from("MSC03"),
        session: String::from("func01"),
        file_ids: vec![String::from("rest")],
        tasks: String::from("rest"),
        output_root: tmp.path().join("output"),
    };
    assert!(extract_session(&job, AtlasName::Schaefer, tmp.path(), MaskerConfig::default()).is_err());
}

#[test]
fn cohort_extraction_with_a_maps_atlas() {
    let tmp = tempdir().unwrap();
    let atlas_dir = tmp.path().join("atlases");
    fs::create_dir_all(&atlas_dir).unwrap();

    // Two soft maps on a 2mm grid covering the left and right half of the 1mm data grid.
    let maps = Array4::from_shape_fn((3, 3, 3, 2), |(x, _, _, r)| match (x, r) {
        (0, 0) => 1.0,
        (1, _) => 0.5,
        (2, 1) => 1.0,
        _ => 0.0,
    });
    write_nifti(atlas_dir.join(MSDL_IMAGE), &NiftiImage::new(maps, affine::scaling([2., 2., 2.], [0., 0., 0.]))).unwrap();
    fs::write(atlas_dir.join(MSDL_LABELS), "x,y,z,name,net name\n-1,0,0,L Aud,Aud\n1,0,0,R Aud,Aud\n").unwrap();

    let func_dir = tmp.path().join("func_preproc");
    fs::create_dir_all(&func_dir).unwrap();
    for (i, id) in ["NYU_0050952", "NYU_0050953"].iter().enumerate() {
        write_nifti(func_dir.join(format!("{}_func_preproc.nii.gz", id)), &bold_run(12, i as f32)).unwrap();
    }
    let pheno = tmp.path().join("Phenotypic_V1_0b_preprocessed1.csv");
    fs::write(&pheno, "SUB_ID,FILE_ID,DX_GROUP\n50952,NYU_0050952,1\n50953,NYU_0050953,2\n50954,NYU_0050954,1\n").unwrap();

    let job = CohortJob {
        func_dir,
        phenotype_file: pheno,
        num_subjects: 30,
        output_root: tmp.path().join("output"),
    };
    let config = MaskerConfig { standardize: Standardize::Zscore, ..MaskerConfig::default() };
    let report = extract_cohort(&job, AtlasName::Msdl, &atlas_dir, config).unwrap();

    assert_eq!(report.len(), 2);
    let pooled = tmp.path().join("output").join("30_MSDL").join("pooled");
    let signals = read_matrix_csv(pooled.join("NYU_0050953.csv")).unwrap();
    assert_eq!(signals.dim(), (12, 2));
    assert!(!pooled.join("NYU_0050954.csv").exists());
}

#[test]
fn unlabelled_atlases_name_regions_by_value() {
    let tmp = tempdir().unwrap();
    let labels = Array4::from_shape_fn((6, 6, 6, 1), |(_, _, z, _)| if z < 3 { 0.0 } else { 28.0 });
    write_nifti(tmp.path().join(CEREBELLUM_IMAGE), &NiftiImage::new(labels, affine::identity())).unwrap();

    let atlas = roiseries::fetch_atlas(AtlasName::Cerebellum, tmp.path()).unwrap();
    let masker = roiseries::build_masker(&atlas, MaskerConfig::default()).unwrap();
    assert_eq!(masker.region_names(), vec!["label_28"]);
    let signals = masker.transform(&bold_run(8, 0.0)).unwrap();
    assert_eq!(signals.dim(), (8, 1));
}
