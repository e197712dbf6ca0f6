use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use log::{debug, warn};

use crate::data::record::{Sex, SubjectInfo};
use crate::error::{EcgError, Result};

use super::{le_u16, read_bytes, AnnotationEvent, FormatParser, RawRecord, RecordHeader};

/// Sampling frequency assumed when the header line omits it.
pub const DEFAULT_FS: f64 = 250.0;
/// Gain assumed when a signal line omits it or gives 0.
pub const DEFAULT_GAIN: f64 = 200.0;
/// Extension of the reference beat annotation file.
pub const ANNOTATION_EXTENSION: &str = "atr";

// MIT annotation pseudo-codes.
const SKIP: u16 = 59;
const NUM: u16 = 60;
const SUB: u16 = 61;
const CHN: u16 = 62;
const AUX: u16 = 63;

/// Standard WFDB annotation symbols, indexed by code. Empty slots are unused.
const SYMBOLS: [&str; 50] = [
    " ", "N", "L", "R", "a", "V", "F", "J", "A", "S", "E", "j", "/", "Q", "~", "", "|", "", "s",
    "T", "*", "D", "\"", "=", "p", "B", "^", "t", "+", "u", "?", "!", "[", "]", "e", "n", "@", "x",
    "f", "(", ")", "r", "", "", "", "", "", "", "", "",
];

fn symbol_for(code: u16) -> String {
    match SYMBOLS.get(code as usize) {
        Some(s) if !s.is_empty() => (*s).to_string(),
        _ => format!("[{code}]"),
    }
}

fn code_for(label: &str) -> Option<u16> {
    if let Some(pos) = SYMBOLS.iter().position(|s| !s.is_empty() && *s == label) {
        return Some(pos as u16);
    }
    label
        .strip_prefix('[')
        .and_then(|l| l.strip_suffix(']'))
        .and_then(|c| c.parse::<u16>().ok())
        .filter(|c| *c > 0 && *c < SKIP)
}

// ---------------------------------------------------------------------------
// Header parsing
// ---------------------------------------------------------------------------

/// One signal specification line of a `.hea` file.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalSpec {
    pub file_name: String,
    pub format: u16,
    pub byte_offset: usize,
    pub gain: f64,
    pub baseline: i32,
    pub units: String,
    pub adc_resolution: u32,
    pub adc_zero: i32,
    pub initial_value: i32,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WfdbHeader {
    pub record: RecordHeader,
    pub signals: Vec<SignalSpec>,
    pub comments: Vec<String>,
}

/// Parse the record line: `name n_signals [fs[/counter[(base)]] [sig_len ...]]`.
pub fn parse_record_line(path: &Path, line: &str) -> Result<RecordHeader> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 2 {
        return Err(EcgError::format(path, format!("bad record line '{line}'")));
    }
    let record_name = fields[0].to_string();
    if record_name.contains('/') {
        return Err(EcgError::format(path, "multi-segment records are not supported"));
    }
    let n_signals = fields[1]
        .parse::<usize>()
        .map_err(|_| EcgError::format(path, format!("bad signal count '{}'", fields[1])))?;
    let sampling_rate = match fields.get(2) {
        Some(&f) => {
            let rate = f.split(['/', '(']).next().unwrap_or(f);
            let rate = rate
                .parse::<f64>()
                .map_err(|_| EcgError::format(path, format!("bad sampling rate '{f}'")))?;
            // Zero means unspecified.
            if rate == 0.0 {
                DEFAULT_FS
            } else {
                rate
            }
        }
        None => DEFAULT_FS,
    };
    let sample_count = fields
        .get(3)
        .ok_or_else(|| EcgError::format(path, "header has no sample count"))?
        .parse::<usize>()
        .map_err(|_| EcgError::format(path, format!("bad sample count '{}'", fields[3])))?;
    Ok(RecordHeader {
        record_name,
        n_signals,
        sampling_rate,
        sample_count,
    })
}

fn parse_signal_line(path: &Path, index: usize, line: &str) -> Result<SignalSpec> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 2 {
        return Err(EcgError::format(path, format!("bad signal line '{line}'")));
    }
    let bad = |what: &str, value: &str| EcgError::format(path, format!("bad {what} '{value}'"));

    // format[xsamp][:skew][+offset]
    let fmt_field = fields[1];
    let digits: String = fmt_field.chars().take_while(|c| c.is_ascii_digit()).collect();
    let format = digits.parse::<u16>().map_err(|_| bad("format", fmt_field))?;
    if let Some(spf) = fmt_field.split('x').nth(1) {
        let spf: String = spf.chars().take_while(|c| c.is_ascii_digit()).collect();
        if spf.parse::<u32>().unwrap_or(1) > 1 {
            return Err(EcgError::format(path, "multi-frequency signals are not supported"));
        }
    }
    let byte_offset = match fmt_field.split_once('+') {
        Some((_, off)) => off.parse::<usize>().map_err(|_| bad("byte offset", off))?,
        None => 0,
    };

    let adc_resolution = fields
        .get(3)
        .map(|&f| f.parse::<u32>().map_err(|_| bad("ADC resolution", f)))
        .transpose()?
        .unwrap_or(0);
    let adc_zero = fields
        .get(4)
        .map(|&f| f.parse::<i32>().map_err(|_| bad("ADC zero", f)))
        .transpose()?
        .unwrap_or(0);
    let initial_value = fields
        .get(5)
        .map(|&f| f.parse::<i32>().map_err(|_| bad("initial value", f)))
        .transpose()?
        .unwrap_or(adc_zero);

    // gain[(baseline)][/units]
    let (mut gain, mut baseline, mut units) = (DEFAULT_GAIN, adc_zero, String::from("mV"));
    if let Some(&g) = fields.get(2) {
        let (g, u) = match g.split_once('/') {
            Some((g, u)) => (g, Some(u)),
            None => (g, None),
        };
        let (g, b) = match g.split_once('(') {
            Some((g, b)) => (g, Some(b.trim_end_matches(')'))),
            None => (g, None),
        };
        let parsed = g.parse::<f64>().map_err(|_| bad("gain", g))?;
        if parsed != 0.0 {
            gain = parsed;
        }
        if let Some(b) = b {
            baseline = b.parse::<i32>().map_err(|_| bad("baseline", b))?;
        }
        if let Some(u) = u {
            units = u.to_string();
        }
    }

    let description = if fields.len() > 8 {
        fields[8..].join(" ")
    } else {
        format!("sig{index}")
    };

    Ok(SignalSpec {
        file_name: fields[0].to_string(),
        format,
        byte_offset,
        gain,
        baseline,
        units,
        adc_resolution,
        adc_zero,
        initial_value,
        description,
    })
}

/// Read the complete `.hea` file.
pub fn read_wfdb_header(path: &Path) -> Result<WfdbHeader> {
    let text = std::fs::read_to_string(path).map_err(|e| EcgError::io(path, e))?;
    let mut record = None;
    let mut signals = Vec::new();
    let mut comments = Vec::new();

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(comment) = line.strip_prefix('#') {
            comments.push(comment.trim().to_string());
            continue;
        }
        if record.is_none() {
            record = Some(parse_record_line(path, line)?);
        } else {
            let index = signals.len();
            signals.push(parse_signal_line(path, index, line)?);
        }
    }

    let record = record.ok_or_else(|| EcgError::format(path, "empty header"))?;
    if signals.len() != record.n_signals {
        return Err(EcgError::format(
            path,
            format!(
                "header declares {} signals but lists {}",
                record.n_signals,
                signals.len()
            ),
        ));
    }
    Ok(WfdbHeader {
        record,
        signals,
        comments,
    })
}

/// `# 69 M ...` style comment → age and sex.
fn subject_info(comments: &[String]) -> SubjectInfo {
    let mut info = SubjectInfo {
        comments: comments.to_vec(),
        ..SubjectInfo::default()
    };
    if let Some(first) = comments.first() {
        let mut tokens = first.split_whitespace();
        if let Some(age) = tokens.next().and_then(|t| t.parse::<u32>().ok()) {
            info.age = Some(age);
            info.sex = tokens.next().map(Sex::from_code).unwrap_or_default();
        }
    }
    info
}

// ---------------------------------------------------------------------------
// Signal decoding
// ---------------------------------------------------------------------------

/// Sentinel digital values marking invalid samples.
fn invalid_sample(format: u16) -> Option<i32> {
    match format {
        212 => Some(-2048),
        16 => Some(-32768),
        80 => Some(-128),
        _ => None,
    }
}

/// Decode a data file into a flat stream of digital samples.
fn decode(path: &Path, format: u16, bytes: &[u8]) -> Result<Vec<i32>> {
    match format {
        16 => Ok(bytes
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]) as i32)
            .collect()),
        80 => Ok(bytes.iter().map(|&b| b as i32 - 128).collect()),
        212 => {
            let mut out = Vec::with_capacity(bytes.len() / 3 * 2 + 1);
            let twelve = |v: i32| if v > 2047 { v - 4096 } else { v };
            for c in bytes.chunks(3) {
                match c {
                    [b0, b1, b2] => {
                        out.push(twelve(*b0 as i32 | ((*b1 as i32 & 0x0F) << 8)));
                        out.push(twelve(*b2 as i32 | ((*b1 as i32 & 0xF0) << 4)));
                    }
                    [b0, b1] => out.push(twelve(*b0 as i32 | ((*b1 as i32 & 0x0F) << 8))),
                    _ => {}
                }
            }
            Ok(out)
        }
        other => Err(EcgError::format(path, format!("unsupported signal format {other}"))),
    }
}

fn read_signals(header_path: &Path, header: &WfdbHeader) -> Result<Vec<Vec<f64>>> {
    let dir = header_path.parent().unwrap_or_else(|| Path::new(""));
    let n_sig = header.signals.len();
    let mut rows: Vec<Vec<f64>> = vec![Vec::new(); n_sig];

    // Signals sharing a data file are interleaved frame by frame.
    let mut groups: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for (i, spec) in header.signals.iter().enumerate() {
        groups.entry(spec.file_name.as_str()).or_default().push(i);
    }

    for (file_name, members) in groups {
        let first = &header.signals[members[0]];
        if members
            .iter()
            .any(|&m| header.signals[m].format != first.format)
        {
            return Err(EcgError::format(
                header_path,
                format!("mixed formats in {file_name}"),
            ));
        }
        let data_path: PathBuf = dir.join(file_name);
        let bytes = read_bytes(&data_path)?;
        let bytes = bytes.get(first.byte_offset..).unwrap_or(&[]);
        let flat = decode(&data_path, first.format, bytes)?;

        let width = members.len();
        let available = flat.len() / width;
        let frames = if header.record.sample_count == 0 {
            available
        } else if available < header.record.sample_count {
            return Err(EcgError::format(
                &data_path,
                format!(
                    "holds {available} frames, header declares {}",
                    header.record.sample_count
                ),
            ));
        } else {
            header.record.sample_count
        };

        let invalid = invalid_sample(first.format);
        for (slot, &sig) in members.iter().enumerate() {
            let spec = &header.signals[sig];
            rows[sig] = (0..frames)
                .map(|f| {
                    let d = flat[f * width + slot];
                    if Some(d) == invalid {
                        f64::NAN
                    } else {
                        (d - spec.baseline) as f64 / spec.gain
                    }
                })
                .collect();
        }
        debug!("decoded {frames} frames x {width} signals from {}", data_path.display());
    }
    Ok(rows)
}

// ---------------------------------------------------------------------------
// MIT annotation format
// ---------------------------------------------------------------------------

fn annotation_path(header_path: &Path) -> PathBuf {
    header_path.with_extension(ANNOTATION_EXTENSION)
}

/// Decode an MIT-format annotation file into `(sample, symbol)` events.
pub fn decode_annotations(path: &Path, bytes: &[u8]) -> Result<Vec<AnnotationEvent>> {
    let mut events = Vec::new();
    let mut time: i64 = 0;
    let mut i = 0;
    while i + 1 < bytes.len() {
        let word = le_u16(bytes, i);
        i += 2;
        let code = word >> 10;
        let interval = (word & 0x3FF) as i64;
        match code {
            0 if interval == 0 => {
                // A null word followed by AUX is the time-resolution preamble.
                let aux_follows = i + 1 < bytes.len() && le_u16(bytes, i) >> 10 == AUX;
                if !aux_follows {
                    break;
                }
            }
            SKIP => {
                if i + 3 >= bytes.len() {
                    return Err(EcgError::format(path, "truncated SKIP annotation"));
                }
                let high = le_u16(bytes, i) as u32;
                let low = le_u16(bytes, i + 2) as u32;
                time += ((high << 16) | low) as i32 as i64;
                i += 4;
            }
            NUM | SUB | CHN => {}
            AUX => {
                let len = interval as usize;
                i += len + (len & 1);
            }
            0 => time += interval,
            _ => {
                time += interval;
                events.push((time, symbol_for(code)));
            }
        }
    }
    Ok(events)
}

/// Encode events in MIT format, ending with the null word.
pub fn encode_annotations(path: &Path, events: &[AnnotationEvent]) -> Result<Vec<u8>> {
    let mut sorted: Vec<&AnnotationEvent> = events.iter().collect();
    sorted.sort_by_key(|(index, _)| *index);

    let mut out = Vec::with_capacity(sorted.len() * 2 + 2);
    let mut time: i64 = 0;
    for (index, label) in sorted {
        let code = code_for(label)
            .ok_or_else(|| EcgError::format(path, format!("no annotation code for '{label}'")))?;
        let delta = index - time;
        if (0..=0x3FF).contains(&delta) {
            out.extend_from_slice(&((code << 10) | delta as u16).to_le_bytes());
        } else {
            let skip = i32::try_from(delta)
                .map_err(|_| EcgError::format(path, format!("annotation gap {delta} too large")))?
                as u32;
            out.extend_from_slice(&(SKIP << 10).to_le_bytes());
            out.extend_from_slice(&((skip >> 16) as u16).to_le_bytes());
            out.extend_from_slice(&((skip & 0xFFFF) as u16).to_le_bytes());
            out.extend_from_slice(&(code << 10).to_le_bytes());
        }
        time = *index;
    }
    out.extend_from_slice(&[0, 0]);
    Ok(out)
}

// ---------------------------------------------------------------------------
// Writer (format 16), used for fixtures and the sample generator
// ---------------------------------------------------------------------------

/// Write `<dir>/<name>.hea`, `<name>.dat` and, when `annotations` is given,
/// `<name>.atr`. Returns the header path.
pub fn write_record(
    dir: &Path,
    record: &RawRecord,
    gain: f64,
    annotations: Option<&[AnnotationEvent]>,
) -> Result<PathBuf> {
    let name = &record.record_name;
    let header_path = dir.join(format!("{name}.hea"));
    if record.samples.len() != record.channel_names.len()
        || record.samples.iter().any(|r| r.len() != record.sample_count)
    {
        return Err(EcgError::ShapeMismatch(format!(
            "record {name}: {} rows for {} channels of {} samples",
            record.samples.len(),
            record.channel_names.len(),
            record.sample_count
        )));
    }
    let fs = record.sampling_rate.unwrap_or(DEFAULT_FS);

    let digital = |v: f64| -> i16 {
        if v.is_nan() {
            i16::MIN
        } else {
            (v * gain).round().clamp(-32767.0, 32767.0) as i16
        }
    };

    let mut dat = Vec::with_capacity(record.sample_count * record.samples.len() * 2);
    for s in 0..record.sample_count {
        for row in &record.samples {
            dat.extend_from_slice(&digital(row[s]).to_le_bytes());
        }
    }

    let mut hea = format!(
        "{name} {} {fs} {}\n",
        record.samples.len(),
        record.sample_count
    );
    for (row, lead) in record.samples.iter().zip(&record.channel_names) {
        let init = row.first().map(|&v| digital(v)).unwrap_or(0);
        let checksum = row
            .iter()
            .fold(0i16, |acc, &v| acc.wrapping_add(digital(v)));
        hea.push_str(&format!(
            "{name}.dat 16 {gain}(0)/mV 16 0 {init} {checksum} 0 {lead}\n"
        ));
    }
    if let Some(age) = record.info.age {
        hea.push_str(&format!("# {age} {}\n", record.info.sex.code()));
    }

    let write = |path: PathBuf, bytes: &[u8]| -> Result<()> {
        std::fs::write(&path, bytes).map_err(|e| EcgError::io(&path, e))
    };
    write(header_path.clone(), hea.as_bytes())?;
    write(dir.join(format!("{name}.dat")), &dat)?;
    if let Some(events) = annotations {
        let atr = annotation_path(&header_path);
        let bytes = encode_annotations(&atr, events)?;
        write(atr, &bytes)?;
    }
    Ok(header_path)
}

// ---------------------------------------------------------------------------
// FormatParser
// ---------------------------------------------------------------------------

/// PhysioNet WFDB records (`.hea` + data files + `.atr`).
#[derive(Debug, Clone, Copy, Default)]
pub struct WfdbParser;

impl FormatParser for WfdbParser {
    fn name(&self) -> &'static str {
        "wfdb"
    }

    /// Reads only the record line.
    fn read_header(&self, path: &Path) -> Result<RecordHeader> {
        let file = File::open(path).map_err(|e| EcgError::io(path, e))?;
        for line in BufReader::new(file).lines() {
            let line = line.map_err(|e| EcgError::io(path, e))?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            return parse_record_line(path, line);
        }
        Err(EcgError::format(path, "empty header"))
    }

    fn read_record(&self, path: &Path) -> Result<RawRecord> {
        let header = read_wfdb_header(path)?;
        let samples = read_signals(path, &header)?;
        let sample_count = samples.first().map(Vec::len).unwrap_or(header.record.sample_count);
        Ok(RawRecord {
            record_name: header.record.record_name.clone(),
            sampling_rate: Some(header.record.sampling_rate),
            sample_count,
            channel_names: header.signals.iter().map(|s| s.description.clone()).collect(),
            samples,
            info: subject_info(&header.comments),
        })
    }

    fn read_annotations(&self, path: &Path) -> Result<Option<Vec<AnnotationEvent>>> {
        let atr = annotation_path(path);
        if !atr.is_file() {
            warn!("no annotation file for {}", path.display());
            return Ok(None);
        }
        let bytes = read_bytes(&atr)?;
        decode_annotations(&atr, &bytes).map(Some)
    }
}
