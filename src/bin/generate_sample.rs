use std::path::PathBuf;

use anyhow::{Context, Result};
use ecg_records::data::rng::SimpleRng;
use ecg_records::formats::{ishne, wfdb, AnnotationEvent, RawRecord};
use ecg_records::{Sex, SubjectInfo};

const FS: f64 = 360.0;
const SECONDS: f64 = 10.0;

fn gaussian(x: f64, mu: f64, sigma: f64, amplitude: f64) -> f64 {
    amplitude * (-(x - mu).powi(2) / (2.0 * sigma.powi(2))).exp()
}

/// P, Q, R, S, T waves relative to the R peak: (offset s, width s, mV).
const NORMAL_BEAT: [(f64, f64, f64); 5] = [
    (-0.20, 0.025, 0.15),
    (-0.03, 0.010, -0.10),
    (0.00, 0.012, 1.10),
    (0.03, 0.010, -0.25),
    (0.25, 0.040, 0.30),
];

/// Wide ventricular complex without a P wave.
const VENTRICULAR_BEAT: [(f64, f64, f64); 3] = [
    (0.00, 0.040, 1.40),
    (0.08, 0.030, -0.60),
    (0.30, 0.060, -0.35),
];

fn generate_record(name: &str, heart_rate: f64, rng: &mut SimpleRng) -> (RawRecord, Vec<AnnotationEvent>) {
    let n = (FS * SECONDS) as usize;
    let rr = 60.0 / heart_rate;

    // Beat times with RR jitter; roughly one beat in eight is ventricular.
    let mut beats = Vec::new();
    let mut t = 0.3;
    while t < SECONDS - 0.3 {
        let ventricular = rng.next_f64() < 0.125;
        beats.push((t, ventricular));
        t += rr * rng.gauss(1.0, 0.04).clamp(0.8, 1.2);
    }

    let lead_ii: Vec<f64> = (0..n)
        .map(|i| {
            let x = i as f64 / FS;
            let signal: f64 = beats
                .iter()
                .map(|&(r, ventricular)| {
                    let waves: &[(f64, f64, f64)] = if ventricular {
                        &VENTRICULAR_BEAT
                    } else {
                        &NORMAL_BEAT
                    };
                    waves
                        .iter()
                        .map(|&(dt, sigma, amp)| gaussian(x, r + dt, sigma, amp))
                        .sum::<f64>()
                })
                .sum();
            signal + 0.05 * (2.0 * std::f64::consts::PI * 0.3 * x).sin() + rng.gauss(0.0, 0.01)
        })
        .collect();
    let lead_v5: Vec<f64> = lead_ii
        .iter()
        .map(|v| 0.7 * v + rng.gauss(0.0, 0.01))
        .collect();

    let annotations = beats
        .iter()
        .map(|&(r, ventricular)| {
            let label = if ventricular { "V" } else { "N" };
            ((r * FS).round() as i64, label.to_string())
        })
        .collect();

    let record = RawRecord {
        record_name: name.to_string(),
        sampling_rate: Some(FS),
        sample_count: n,
        channel_names: vec!["MLII".into(), "V5".into()],
        samples: vec![lead_ii, lead_v5],
        info: SubjectInfo {
            subject_id: Some(name.to_string()),
            age: Some(40 + (rng.next_f64() * 40.0) as u32),
            sex: if rng.next_f64() < 0.5 { Sex::Male } else { Sex::Female },
            comments: Vec::new(),
        },
    };
    (record, annotations)
}

fn main() -> Result<()> {
    env_logger::init();

    let out_dir = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("sample_dataset"));
    std::fs::create_dir_all(&out_dir)
        .with_context(|| format!("creating {}", out_dir.display()))?;

    let mut rng = SimpleRng::new(42);
    let heart_rates = [62.0, 75.0, 88.0];

    for (i, &hr) in heart_rates.iter().enumerate() {
        let name = (100 + i).to_string();
        let (record, annotations) = generate_record(&name, hr, &mut rng);
        wfdb::write_record(&out_dir, &record, wfdb::DEFAULT_GAIN, Some(annotations.as_slice()))
            .with_context(|| format!("writing record {name}"))?;
    }

    let (holter, _) = generate_record("ECG_P01.01", 70.0, &mut rng);
    let holter_path = out_dir.join("ECG_P01.01.ecg");
    ishne::write_record(&holter_path, &holter, 2500)
        .with_context(|| format!("writing {}", holter_path.display()))?;

    println!(
        "Wrote {} WFDB records and 1 ISHNE record ({} samples at {FS} Hz each) to {}",
        heart_rates.len(),
        (FS * SECONDS) as usize,
        out_dir.display()
    );
    Ok(())
}
