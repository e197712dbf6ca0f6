use std::fs::File;
use std::io::Read;
use std::path::Path;

use log::debug;

use crate::data::record::{Sex, SubjectInfo};
use crate::error::{EcgError, Result};

use super::{
    le_i16, le_i32, le_u16, read_bytes, AnnotationEvent, FormatParser, RawRecord, RecordHeader,
};

pub const MAGIC: &[u8; 8] = b"ISHNE1.0";
/// Magic, checksum and the fixed header block.
pub const FIXED_HEADER_LEN: usize = 522;
const CRC_START: usize = 10;
const MAX_LEADS: usize = 12;

/// Lead names by ISHNE lead specification code.
const LEAD_NAMES: [&str; 20] = [
    "Unknown",
    "Generic bipolar",
    "X bipolar",
    "Y bipolar",
    "Z bipolar",
    "I",
    "II",
    "III",
    "aVR",
    "aVL",
    "aVF",
    "V1",
    "V2",
    "V3",
    "V4",
    "V5",
    "V6",
    "ES",
    "AS",
    "AI",
];

fn lead_name(code: i16) -> String {
    LEAD_NAMES
        .get(code as usize)
        .map(|s| s.to_string())
        .unwrap_or_else(|| format!("lead{code}"))
}

fn lead_code(name: &str) -> i16 {
    LEAD_NAMES.iter().position(|n| *n == name).unwrap_or(0) as i16
}

/// CRC-CCITT (poly 0x1021, initial 0xFFFF) as used by ISHNE headers.
pub fn crc_ccitt(bytes: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &b in bytes {
        crc ^= (b as u16) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ 0x1021
            } else {
                crc << 1
            };
        }
    }
    crc
}

// ---------------------------------------------------------------------------
// Header
// ---------------------------------------------------------------------------

/// Fields of the fixed ISHNE header that matter for loading.
#[derive(Debug, Clone, PartialEq)]
pub struct IshneHeader {
    pub checksum: u16,
    pub var_block_size: i32,
    pub sample_count: usize,
    pub ecg_offset: usize,
    pub subject_id: String,
    pub sex: Sex,
    pub birth_date: [i16; 3],
    pub record_date: [i16; 3],
    pub n_leads: usize,
    pub lead_spec: Vec<i16>,
    /// Amplitude resolution per lead, in nV.
    pub resolution: Vec<i16>,
    pub sampling_rate: f64,
}

fn text_field(bytes: &[u8], at: usize, len: usize) -> String {
    let raw = &bytes[at..at + len];
    let end = raw.iter().position(|&b| b == 0).unwrap_or(len);
    String::from_utf8_lossy(&raw[..end]).trim().to_string()
}

fn date_field(bytes: &[u8], at: usize) -> [i16; 3] {
    [le_i16(bytes, at), le_i16(bytes, at + 2), le_i16(bytes, at + 4)]
}

pub fn parse_header(path: &Path, bytes: &[u8]) -> Result<IshneHeader> {
    if bytes.len() < FIXED_HEADER_LEN {
        return Err(EcgError::format(path, "file shorter than the ISHNE header"));
    }
    if &bytes[..8] != MAGIC {
        return Err(EcgError::format(path, "missing ISHNE1.0 magic"));
    }
    let n_leads = le_i16(bytes, 156);
    if n_leads < 0 || n_leads as usize > MAX_LEADS {
        return Err(EcgError::format(path, format!("bad lead count {n_leads}")));
    }
    let n_leads = n_leads as usize;
    let sample_count = le_i32(bytes, 14);
    let ecg_offset = le_i32(bytes, 22);
    if sample_count < 0 || ecg_offset < FIXED_HEADER_LEN as i32 {
        return Err(EcgError::format(path, "bad sample count or ECG block offset"));
    }
    let sampling_rate = le_i16(bytes, 272);
    if sampling_rate <= 0 {
        return Err(EcgError::format(path, format!("bad sampling rate {sampling_rate}")));
    }

    Ok(IshneHeader {
        checksum: le_u16(bytes, 8),
        var_block_size: le_i32(bytes, 10),
        sample_count: sample_count as usize,
        ecg_offset: ecg_offset as usize,
        subject_id: text_field(bytes, 108, 20),
        sex: match le_i16(bytes, 128) {
            1 => Sex::Male,
            2 => Sex::Female,
            _ => Sex::Unknown,
        },
        birth_date: date_field(bytes, 132),
        record_date: date_field(bytes, 138),
        n_leads,
        lead_spec: (0..n_leads).map(|i| le_i16(bytes, 158 + 2 * i)).collect(),
        resolution: (0..n_leads).map(|i| le_i16(bytes, 206 + 2 * i)).collect(),
        sampling_rate: sampling_rate as f64,
    })
}

impl IshneHeader {
    /// Age in whole years at recording time; dates are `[day, month, year]`.
    pub fn age(&self) -> Option<u32> {
        let [bd, bm, by] = self.birth_date;
        let [rd, rm, ry] = self.record_date;
        if by <= 0 || ry < by {
            return None;
        }
        let before_birthday = (rm, rd) < (bm, bd);
        ((ry - by) as u32).checked_sub(u32::from(before_birthday))
    }

    fn subject_info(&self) -> SubjectInfo {
        SubjectInfo {
            subject_id: (!self.subject_id.is_empty()).then(|| self.subject_id.clone()),
            age: self.age(),
            sex: self.sex,
            comments: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Writer, used for fixtures
// ---------------------------------------------------------------------------

/// Write `record` as an ISHNE 1.0 file with a uniform `resolution_nv`.
pub fn write_record(path: &Path, record: &RawRecord, resolution_nv: i16) -> Result<()> {
    let n_leads = record.samples.len();
    if n_leads > MAX_LEADS
        || n_leads != record.channel_names.len()
        || record.samples.iter().any(|r| r.len() != record.sample_count)
    {
        return Err(EcgError::ShapeMismatch(format!(
            "{n_leads} rows for {} leads of {} samples (at most {MAX_LEADS} leads)",
            record.channel_names.len(),
            record.sample_count
        )));
    }
    let fs = record.sampling_rate.unwrap_or(200.0).round() as i16;

    let mut bytes = vec![0u8; FIXED_HEADER_LEN];
    bytes[..8].copy_from_slice(MAGIC);
    let put_i16 =
        |b: &mut Vec<u8>, at: usize, v: i16| b[at..at + 2].copy_from_slice(&v.to_le_bytes());
    let put_i32 =
        |b: &mut Vec<u8>, at: usize, v: i32| b[at..at + 4].copy_from_slice(&v.to_le_bytes());

    put_i32(&mut bytes, 10, 0);
    put_i32(&mut bytes, 14, record.sample_count as i32);
    put_i32(&mut bytes, 18, FIXED_HEADER_LEN as i32);
    put_i32(&mut bytes, 22, FIXED_HEADER_LEN as i32);
    put_i16(&mut bytes, 26, 1);
    if let Some(id) = &record.info.subject_id {
        let id = id.as_bytes();
        let n = id.len().min(19);
        bytes[108..108 + n].copy_from_slice(&id[..n]);
    }
    put_i16(
        &mut bytes,
        128,
        match record.info.sex {
            Sex::Male => 1,
            Sex::Female => 2,
            Sex::Unknown => 0,
        },
    );
    put_i16(&mut bytes, 156, n_leads as i16);
    for (i, name) in record.channel_names.iter().enumerate() {
        put_i16(&mut bytes, 158 + 2 * i, lead_code(name));
        put_i16(&mut bytes, 206 + 2 * i, resolution_nv);
    }
    put_i16(&mut bytes, 230, -9);
    put_i16(&mut bytes, 272, fs);

    let scale = 1e6 / resolution_nv as f64;
    for s in 0..record.sample_count {
        for row in &record.samples {
            let raw = (row[s] * scale).round().clamp(-32768.0, 32767.0) as i16;
            bytes.extend_from_slice(&raw.to_le_bytes());
        }
    }

    let crc = crc_ccitt(&bytes[CRC_START..FIXED_HEADER_LEN]);
    bytes[8..10].copy_from_slice(&crc.to_le_bytes());
    std::fs::write(path, &bytes).map_err(|e| EcgError::io(path, e))
}

// ---------------------------------------------------------------------------
// FormatParser
// ---------------------------------------------------------------------------

/// ISHNE 1.0 Holter files (`.ecg`).
#[derive(Debug, Clone, Copy, Default)]
pub struct IshneParser;

impl FormatParser for IshneParser {
    fn name(&self) -> &'static str {
        "ishne"
    }

    /// Reads the fixed header only; the checksum is not verified.
    fn read_header(&self, path: &Path) -> Result<RecordHeader> {
        let mut file = File::open(path).map_err(|e| EcgError::io(path, e))?;
        let mut bytes = vec![0u8; FIXED_HEADER_LEN];
        file.read_exact(&mut bytes)
            .map_err(|_| EcgError::format(path, "file shorter than the ISHNE header"))?;
        let header = parse_header(path, &bytes)?;
        Ok(RecordHeader {
            record_name: record_name(path),
            n_signals: header.n_leads,
            sampling_rate: header.sampling_rate,
            sample_count: header.sample_count,
        })
    }

    fn read_record(&self, path: &Path) -> Result<RawRecord> {
        let bytes = read_bytes(path)?;
        let header = parse_header(path, &bytes)?;
        if header.ecg_offset > bytes.len() {
            return Err(EcgError::format(path, "ECG block offset past end of file"));
        }
        let crc = crc_ccitt(&bytes[CRC_START..header.ecg_offset]);
        if crc != header.checksum {
            return Err(EcgError::format(
                path,
                format!("header checksum {:#06x} != {crc:#06x}", header.checksum),
            ));
        }

        let n = header.n_leads;
        let needed = header.sample_count * n * 2;
        let data = &bytes[header.ecg_offset..];
        if data.len() < needed {
            return Err(EcgError::format(
                path,
                format!("ECG block holds {} bytes, header needs {needed}", data.len()),
            ));
        }
        let samples = (0..n)
            .map(|lead| {
                let scale = header.resolution[lead] as f64 / 1e6;
                (0..header.sample_count)
                    .map(|s| le_i16(data, (s * n + lead) * 2) as f64 * scale)
                    .collect()
            })
            .collect();
        debug!("decoded {} samples x {n} leads from {}", header.sample_count, path.display());

        Ok(RawRecord {
            record_name: record_name(path),
            sampling_rate: Some(header.sampling_rate),
            sample_count: header.sample_count,
            channel_names: header.lead_spec.iter().map(|&c| lead_name(c)).collect(),
            samples,
            info: header.subject_info(),
        })
    }

    fn read_annotations(&self, _path: &Path) -> Result<Option<Vec<AnnotationEvent>>> {
        Ok(None)
    }
}

fn record_name(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}
