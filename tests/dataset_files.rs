use std::fs;
use std::path::Path;

use ecg_records::formats::{ishne, wfdb, RawRecord};
use ecg_records::{Dataset, EcgError, Sliceable};

fn raw(name: &str, fs: f64, n: usize) -> RawRecord {
    RawRecord {
        record_name: name.into(),
        sampling_rate: Some(fs),
        sample_count: n,
        channel_names: vec!["II".into()],
        samples: vec![(0..n).map(|i| (i % 4) as f64 * 0.5).collect()],
        info: Default::default(),
    }
}

/// `100.hea`, `101.hea` and `ECG_P28.01.ecg`, plus a stray text file.
fn mixed_dataset(root: &Path) -> std::path::PathBuf {
    let dir = root.join("dataset_1");
    fs::create_dir(&dir).unwrap();
    let events: Vec<(i64, String)> = vec![(0, "N".into()), (9, "N".into())];
    wfdb::write_record(&dir, &raw("101", 360.0, 721), 200.0, Some(events.as_slice())).unwrap();
    wfdb::write_record(&dir, &raw("100", 360.0, 361), 200.0, None).unwrap();
    ishne::write_record(&dir.join("ECG_P28.01.ecg"), &raw("ECG_P28.01", 200.0, 401), 1000).unwrap();
    fs::write(dir.join("notes.txt"), "not a record").unwrap();
    dir
}

#[test]
fn test_from_dir_order_and_display() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = mixed_dataset(tmp.path());
    let ds = Dataset::from_dir(&dir, None).unwrap();
    assert_eq!(ds.name(), "dataset_1");
    assert_eq!(ds.dataset_dir(), dir.as_path());
    assert_eq!(ds.len(), 3);
    assert_eq!(
        ds.to_string(),
        "Dataset with records\n100.hea\n101.hea\nECG_P28.01.ecg"
    );
}

#[test]
fn test_missing_and_empty_directories() {
    let tmp = tempfile::tempdir().unwrap();
    assert!(Dataset::from_dir(tmp.path().join("nonexistent"), None)
        .unwrap_err()
        .is_not_found());
    let empty = tmp.path().join("empty_dataset");
    fs::create_dir(&empty).unwrap();
    assert!(Dataset::from_dir(&empty, None).unwrap_err().is_not_found());
}

#[test]
fn test_header_metadata_in_bulk() {
    let tmp = tempfile::tempdir().unwrap();
    let ds = Dataset::from_dir(mixed_dataset(tmp.path()), None).unwrap();
    assert_eq!(ds.sig_lens().unwrap(), vec![361, 721, 401]);
    assert_eq!(ds.durations().unwrap(), vec![1.0, 2.0, 2.0]);

    let sequential: Vec<usize> = ds
        .record_tickets()
        .iter()
        .map(|t| t.sig_len().unwrap())
        .collect();
    assert_eq!(ds.sig_lens().unwrap(), sequential);
}

#[test]
fn test_records_and_ranges() {
    let tmp = tempfile::tempdir().unwrap();
    let ds = Dataset::from_dir(mixed_dataset(tmp.path()), None).unwrap();

    let all = ds.records().unwrap();
    let lens: Vec<usize> = all.iter().map(|r| r.len()).collect();
    assert_eq!(lens, vec![361, 721, 401]);

    let range = ds.load_range(1..).unwrap();
    assert_eq!(range.len(), 2);
    assert!(std::sync::Arc::ptr_eq(&range[0], &ds.get(1).unwrap()));
    assert_eq!(range[1].name(), "ECG_P28.01");

    assert!(matches!(ds.get(3), Err(EcgError::OutOfBounds { index: 3, len: 3 })));
    let ann = ds.get(1).unwrap().annotations().unwrap().unwrap();
    assert_eq!(ann.len(), 2);
    assert_eq!(ann.max_index(), 721);
}

#[test]
fn test_split_keeps_tickets() {
    let tmp = tempfile::tempdir().unwrap();
    let ds = Dataset::from_dir(mixed_dataset(tmp.path()), None).unwrap();
    let parts = ds.split(&["train", "dev", "test"], &[0.8, 0.1]).unwrap();
    assert_eq!(parts[0].to_string(), "Dataset with records\n100.hea\n101.hea");
    assert_eq!(parts[1].to_string(), "Dataset with records\n");
    assert_eq!(parts[2].to_string(), "Dataset with records\nECG_P28.01.ecg");
    assert_eq!(parts[2].name(), "test");
    assert_eq!(ds.len(), 3);
}

#[test]
fn test_save_csv_explicit_and_autoname() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = mixed_dataset(tmp.path());
    let ds = Dataset::from_dir(&dir, None).unwrap();

    let explicit = tmp.path().join("output/transient/dataset_1.csv");
    assert_eq!(ds.save_csv(&explicit).unwrap(), explicit);
    let text = fs::read_to_string(&explicit).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines[0], ",Dataset_Directory,Base_Name,sig_len,duration");
    assert_eq!(lines[1], format!("0,{},100.hea,361,1.0", dir.display()));
    assert_eq!(lines[3], format!("2,{},ECG_P28.01.ecg,401,2.0", dir.display()));
    assert_eq!(lines.len(), 4);

    let auto = ds.save_csv(tmp.path().join("output/auto")).unwrap();
    assert_eq!(auto, tmp.path().join("output/auto/dataset_1_records.csv"));
    assert!(auto.is_file());
}

#[test]
fn test_json_round_trip() {
    let tmp = tempfile::tempdir().unwrap();
    let ds = Dataset::from_dir(mixed_dataset(tmp.path()), Some(vec!["II".into()])).unwrap();

    let saved = ds.to_json(tmp.path().join("saved")).unwrap();
    assert_eq!(saved, tmp.path().join("saved/dataset_1.json"));
    assert!(tmp.path().join("saved/dataset_1_records.csv").is_file());

    let restored = Dataset::from_json(&saved).unwrap();
    assert_eq!(restored, ds);
    assert_eq!(restored.name(), "dataset_1");
    assert_eq!(restored.record_tickets()[0].selected_leads(), Some(&["II".to_string()][..]));
    assert_eq!(restored.sig_lens().unwrap(), ds.sig_lens().unwrap());

    let named = ds.to_json(tmp.path().join("named/set.json")).unwrap();
    assert!(named.is_file());
    assert!(tmp.path().join("named/set.csv").is_file());

    assert!(matches!(
        ds.to_json(tmp.path().join("set.pickle")),
        Err(EcgError::Config(_))
    ));
    assert!(Dataset::from_json(tmp.path().join("missing.json"))
        .unwrap_err()
        .is_not_found());
}

#[test]
fn test_relocation() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = mixed_dataset(tmp.path());
    let mut ds = Dataset::from_dir(&dir, None).unwrap();
    assert_eq!(ds.sig_lens().unwrap()[0], 361);

    let moved = tmp.path().join("moved");
    fs::rename(&dir, &moved).unwrap();
    assert!(ds.set_dataset_dir(tmp.path().join("gone")).unwrap_err().is_not_found());
    ds.set_dataset_dir(&moved).unwrap();
    assert_eq!(ds.dataset_dir(), moved.as_path());
    assert_eq!(ds.record_tickets()[1].record_file(), moved.join("101.hea"));
    assert_eq!(ds.get(1).unwrap().len(), 721);
}
