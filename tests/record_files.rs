use std::path::Path;
use std::sync::Arc;

use ecg_records::formats::{ishne, wfdb, RawRecord, RecordFormat};
use ecg_records::{Annotation, EcgError, Record, RecordTicket, Sex, Sliceable, SubjectInfo};

fn two_lead(name: &str, fs: f64, n: usize) -> RawRecord {
    RawRecord {
        record_name: name.into(),
        sampling_rate: Some(fs),
        sample_count: n,
        channel_names: vec!["MLII".into(), "V5".into()],
        samples: vec![
            (0..n).map(|i| i as f64 * 0.5).collect(),
            (0..n).map(|i| -(i as f64) * 0.25).collect(),
        ],
        info: SubjectInfo {
            age: Some(69),
            sex: Sex::Male,
            ..SubjectInfo::default()
        },
    }
}

fn assert_close(a: &[f64], b: &[f64]) {
    assert_eq!(a.len(), b.len());
    for (x, y) in a.iter().zip(b) {
        assert!((x - y).abs() < 1e-9, "{x} != {y}");
    }
}

fn write_annotated(dir: &Path) {
    let events: Vec<(i64, String)> = vec![
        (1, "N".into()),
        (2, "N".into()),
        (3, "V".into()),
        (5, "N".into()),
    ];
    wfdb::write_record(dir, &two_lead("100", 360.0, 7), 200.0, Some(events.as_slice())).unwrap();
}

#[test]
fn test_wfdb_record_from_basename() {
    let tmp = tempfile::tempdir().unwrap();
    write_annotated(tmp.path());

    let record = Record::from_file(&tmp.path().join("100")).unwrap();
    assert_eq!(record.name(), "100");
    assert_eq!(record.len(), 7);
    assert_eq!(record.time().fs(), Some(360.0));
    assert_eq!(record.lead_names(), vec!["MLII", "V5"]);
    assert_eq!(record.info().age, Some(69));
    assert_eq!(record.info().sex, Sex::Male);
    assert_close(
        &record.get_lead("MLII").unwrap().values().unwrap(),
        &[0.0, 0.5, 1.0, 1.5, 2.0, 2.5, 3.0],
    );

    let ann = record.annotations().unwrap().unwrap();
    assert_eq!(
        ann,
        Annotation::from_pairs([(1, "N"), (2, "N"), (3, "V"), (5, "N")])
    );
    assert_eq!(ann.max_index(), 7);
}

#[test]
fn test_wfdb_slice_keeps_annotations_consistent() {
    let tmp = tempfile::tempdir().unwrap();
    write_annotated(tmp.path());
    let record = Record::from_file(&tmp.path().join("100.hea")).unwrap();

    let window = record.slice(1..4).unwrap();
    assert_close(&window.get_lead("V5").unwrap().values().unwrap(), &[-0.25, -0.5, -0.75]);
    let ann = window.annotations().unwrap().unwrap();
    assert_eq!(
        ann,
        Annotation::from_pairs([(0, "N"), (1, "N"), (2, "V"), (4, "N")])
    );
    assert_eq!(ann.max_index(), 3);
    assert_eq!(ann.labels(), vec!["N", "N", "V"]);
    assert_eq!(ann.stem_label("N", true), vec![true, true, true]);
    assert_eq!(ann.stem_label("N", false), vec![true, true, false]);

    let single = record.at(0).unwrap().annotations().unwrap().unwrap();
    assert_eq!(single.max_index(), 1);
    assert_eq!(single.len(), 4);

    // The parent view is untouched.
    assert_eq!(record.len(), 7);
    assert_eq!(record.annotations().unwrap().unwrap().max_index(), 7);
}

#[test]
fn test_wfdb_without_annotation_file() {
    let tmp = tempfile::tempdir().unwrap();
    wfdb::write_record(tmp.path(), &two_lead("bare", 250.0, 5), 200.0, None).unwrap();
    let record = Record::from_file(&tmp.path().join("bare.hea")).unwrap();
    assert_eq!(record.annotations().unwrap(), None);
    assert_eq!(record.p_signal().unwrap().len(), 2);
}

#[test]
fn test_ishne_record() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("ECG_P28.01.ecg");
    let mut raw = two_lead("ECG_P28.01", 200.0, 9);
    raw.channel_names = vec!["II".into(), "V5".into()];
    ishne::write_record(&path, &raw, 1000).unwrap();

    let record = Record::from_file(&tmp.path().join("ECG_P28.01")).unwrap();
    assert_eq!(record.name(), "ECG_P28.01");
    assert_eq!(record.len(), 9);
    assert_eq!(record.duration(), 8.0 / 200.0);
    assert_close(&record.p_signal().unwrap()[0], &raw.samples[0]);
    assert_eq!(record.annotations().unwrap(), None);

    let ticket = RecordTicket::new(&path, None);
    assert_eq!(ticket.resolved().unwrap().format, RecordFormat::Ishne);
    assert_eq!(ticket.sig_len().unwrap(), 9);
    assert_eq!(ticket.fs().unwrap(), 200.0);
}

#[test]
fn test_corrupt_ishne_is_a_format_error() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("broken.ecg");
    ishne::write_record(&path, &two_lead("broken", 200.0, 4), 1000).unwrap();
    let mut bytes = std::fs::read(&path).unwrap();
    bytes[400] ^= 0xFF;
    std::fs::write(&path, bytes).unwrap();

    // Header-only reads skip the checksum; full reads do not.
    assert_eq!(RecordTicket::new(&path, None).sig_len().unwrap(), 4);
    assert!(matches!(
        Record::from_file(&path),
        Err(EcgError::Format { .. })
    ));
}

#[test]
fn test_ambiguous_and_missing_basenames() {
    let tmp = tempfile::tempdir().unwrap();
    wfdb::write_record(tmp.path(), &two_lead("200", 250.0, 3), 200.0, None).unwrap();
    wfdb::write_record(tmp.path(), &two_lead("2001", 250.0, 3), 200.0, None).unwrap();

    assert!(matches!(
        Record::from_file(&tmp.path().join("200")),
        Err(EcgError::Ambiguous { count: 2, .. })
    ));
    assert!(Record::from_file(&tmp.path().join("300"))
        .unwrap_err()
        .is_not_found());
    assert!(Record::from_file(&tmp.path().join("300.hea"))
        .unwrap_err()
        .is_not_found());
}

#[test]
fn test_tickets_share_one_record() {
    let tmp = tempfile::tempdir().unwrap();
    write_annotated(tmp.path());
    let path = tmp.path().join("100.hea");

    let first = RecordTicket::new(&path, None).load().unwrap();
    let loaded: Vec<Arc<Record>> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ticket = RecordTicket::new(&path, None);
                s.spawn(move || ticket.load().unwrap())
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });
    assert!(loaded.iter().all(|r| Arc::ptr_eq(r, &first)));
}

#[test]
fn test_concurrent_first_load_yields_one_record() {
    let tmp = tempfile::tempdir().unwrap();
    write_annotated(tmp.path());
    let path = tmp.path().join("100.hea");

    let loaded: Vec<Arc<Record>> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ticket = RecordTicket::new(&path, Some(vec!["V5".into()]));
                s.spawn(move || ticket.load().unwrap())
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });
    assert!(loaded.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    assert_eq!(loaded[0].lead_names(), vec!["V5"]);
}
