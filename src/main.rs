use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use ecg_records::Dataset;
use log::info;

/// `ecg-records <dataset_dir> [output]`
///
/// Scan a directory of WFDB / ISHNE records, print one line per record and
/// write the CSV summary (into the dataset directory unless `output` is given).
fn main() -> Result<()> {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let Some(dataset_dir) = args.next().map(PathBuf::from) else {
        bail!("usage: ecg-records <dataset_dir> [output]");
    };
    let output = args.next().map(PathBuf::from).unwrap_or_else(|| dataset_dir.clone());

    let dataset = Dataset::from_dir(&dataset_dir, None)
        .with_context(|| format!("scanning {}", dataset_dir.display()))?;
    info!("dataset {} has {} records", dataset.name(), dataset.len());

    let sig_lens = dataset.sig_lens().context("reading record headers")?;
    let durations = dataset.durations().context("reading record headers")?;

    println!("{:<24} {:>10} {:>12}", "record", "samples", "duration_s");
    for ((ticket, sig_len), duration) in dataset.record_tickets().iter().zip(&sig_lens).zip(&durations) {
        println!("{:<24} {:>10} {:>12.3}", ticket.record_base(), sig_len, duration);
    }

    let csv_path = dataset
        .save_csv(&output)
        .with_context(|| format!("writing summary to {}", output.display()))?;
    println!("Wrote summary of {} records to {}", dataset.len(), csv_path.display());
    Ok(())
}
