//! Vendor binary capture decoder
//!
//! Decodes the simulator's binary telemetry capture format and splits
//! the sample stream into laps.
//!
//! Capture binary layout:
//!     [fixed header         - 112 bytes]
//!     [disk sub-header      -  32 bytes]
//!     [session metadata doc - at session_info_offset, session_info_len bytes]
//!     [channel descriptors  - at descriptor_offset, num_channels * 144 bytes]
//!     [sample matrix        - at sample buffer offset, sample_count * row_len bytes]
//!
//! All multi-byte values are little-endian. Channel columns are pulled
//! out of the sample matrix with a base offset and a stride equal to the
//! row width; there is no per-sample row loop in the hot path.

use apexcoach_core::error::AnalysisError;
use apexcoach_core::model::SessionMeta;
use chrono::DateTime;
use std::collections::HashMap;

// ============================================================================
// Binary format constants
// ============================================================================

/// Main header: 10 i32 fields (40 bytes) + 8 bytes pad + 4 x 16-byte
/// sample-buffer descriptors = 112 bytes.
const HEADER_FIELDS_SIZE: usize = 40;
const HEADER_PAD_SIZE: usize = 8;
const SAMPLE_BUF_DESC_SIZE: usize = 16;
const TOTAL_HEADER_SIZE: usize = 112;

/// Disk sub-header at offset 112: i64 + f64 + f64 + i32 + i32 = 32 bytes.
const DISK_SUB_HEADER_SIZE: usize = 32;

/// Channel descriptor: type(i32), offset(i32), count(i32), count_as_time(u8),
/// pad(3), name(32), desc(64), unit(32) = 144 bytes.
const DESCRIPTOR_SIZE: usize = 144;

/// Scalar primitive types a channel can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelType {
    Char = 0,
    Bool = 1,
    Int = 2,
    BitField = 3,
    Float = 4,
    Double = 5,
}

impl ChannelType {
    fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(ChannelType::Char),
            1 => Some(ChannelType::Bool),
            2 => Some(ChannelType::Int),
            3 => Some(ChannelType::BitField),
            4 => Some(ChannelType::Float),
            5 => Some(ChannelType::Double),
            _ => None,
        }
    }

    /// Size in bytes for a single element of this type
    pub fn element_size(&self) -> usize {
        match self {
            ChannelType::Char | ChannelType::Bool => 1,
            ChannelType::Int | ChannelType::BitField | ChannelType::Float => 4,
            ChannelType::Double => 8,
        }
    }
}

/// Fixed capture header.
#[derive(Debug, Clone)]
pub struct CaptureHeader {
    pub version: i32,
    pub status: i32,
    pub tick_rate: i32,
    pub session_info_update: i32,
    pub session_info_len: i32,
    pub session_info_offset: i32,
    pub num_channels: i32,
    pub descriptor_offset: i32,
    pub num_buf: i32,
    pub row_len: i32,
    /// From the first sample-buffer descriptor.
    pub sample_data_offset: i32,
}

/// Disk sub-header with session-level bookkeeping.
#[derive(Debug, Clone)]
pub struct DiskSubHeader {
    pub session_start_date: i64,
    pub session_start_time: f64,
    pub session_end_time: f64,
    pub session_lap_count: i32,
    pub session_record_count: i32,
}

/// Descriptor of a single telemetry channel.
#[derive(Debug, Clone)]
pub struct ChannelDescriptor {
    pub channel_type: ChannelType,
    pub offset: i32,
    pub count: i32,
    pub count_as_time: bool,
    pub name: String,
    pub desc: String,
    pub unit: String,
}

/// A materialised channel column, one element per sample.
#[derive(Debug, Clone)]
pub enum Column {
    Char(Vec<u8>),
    Bool(Vec<bool>),
    Int(Vec<i32>),
    BitField(Vec<u32>),
    Float(Vec<f32>),
    Double(Vec<f64>),
}

impl Column {
    pub fn len(&self) -> usize {
        match self {
            Column::Char(v) => v.len(),
            Column::Bool(v) => v.len(),
            Column::Int(v) => v.len(),
            Column::BitField(v) => v.len(),
            Column::Float(v) => v.len(),
            Column::Double(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn to_f64(&self) -> Vec<f64> {
        match self {
            Column::Char(v) => v.iter().map(|x| *x as f64).collect(),
            Column::Bool(v) => v.iter().map(|x| *x as u8 as f64).collect(),
            Column::Int(v) => v.iter().map(|x| *x as f64).collect(),
            Column::BitField(v) => v.iter().map(|x| *x as f64).collect(),
            Column::Float(v) => v.iter().map(|x| *x as f64).collect(),
            Column::Double(v) => v.clone(),
        }
    }

    pub fn to_i32(&self) -> Vec<i32> {
        match self {
            Column::Char(v) => v.iter().map(|x| *x as i32).collect(),
            Column::Bool(v) => v.iter().map(|x| *x as i32).collect(),
            Column::Int(v) => v.clone(),
            Column::BitField(v) => v.iter().map(|x| *x as i32).collect(),
            Column::Float(v) => v.iter().map(|x| *x as i32).collect(),
            Column::Double(v) => v.iter().map(|x| *x as i32).collect(),
        }
    }

    pub fn to_bool(&self) -> Vec<bool> {
        match self {
            Column::Char(v) => v.iter().map(|x| *x != 0).collect(),
            Column::Bool(v) => v.clone(),
            Column::Int(v) => v.iter().map(|x| *x != 0).collect(),
            Column::BitField(v) => v.iter().map(|x| *x != 0).collect(),
            Column::Float(v) => v.iter().map(|x| *x != 0.0).collect(),
            Column::Double(v) => v.iter().map(|x| *x != 0.0).collect(),
        }
    }
}

// ============================================================================
// IbtCapture: main decoder
// ============================================================================

/// The canonical channel set the pipeline depends on. Names are
/// contractual; a capture missing any of these is unusable.
pub const REQUIRED_CHANNELS: &[&str] = &[
    "Speed",
    "Throttle",
    "Brake",
    "SteeringWheelAngle",
    "Lat",
    "Lon",
    "Alt",
    "Lap",
    "LapCurrentLapTime",
    "LapDist",
    "LapDistPct",
    "SessionTime",
    "SessionTick",
    "RPM",
    "Gear",
    "PlayerTrackSurface",
    "PlayerCarMyIncidentCount",
    "OnPitRoad",
];

/// Parsed capture holding the raw bytes. Columns are materialised on
/// demand; only channels the pipeline asks for are ever decoded.
#[derive(Debug)]
pub struct IbtCapture {
    pub header: CaptureHeader,
    pub disk_sub_header: DiskSubHeader,
    pub descriptors: Vec<ChannelDescriptor>,
    pub session: SessionMeta,
    data: Vec<u8>,
    index: HashMap<String, usize>,
}

impl IbtCapture {
    /// Parse a capture from raw bytes, validating every offset against
    /// the buffer size before it is dereferenced.
    pub fn parse(data: Vec<u8>) -> Result<Self, AnalysisError> {
        if data.len() < TOTAL_HEADER_SIZE + DISK_SUB_HEADER_SIZE {
            return Err(AnalysisError::malformed(format!(
                "file too small for header: {} bytes",
                data.len()
            )));
        }

        let header = read_header(&data)?;
        let disk_sub_header = read_disk_sub_header(&data);

        let file_len = data.len() as i64;
        let info_end = header.session_info_offset as i64 + header.session_info_len as i64;
        if header.session_info_offset < 0 || header.session_info_len < 0 || info_end > file_len {
            return Err(AnalysisError::malformed(format!(
                "session metadata region {}..{} outside file of {} bytes",
                header.session_info_offset, info_end, file_len
            )));
        }

        let desc_end = header.descriptor_offset as i64
            + header.num_channels as i64 * DESCRIPTOR_SIZE as i64;
        if header.descriptor_offset < 0 || header.num_channels < 0 || desc_end > file_len {
            return Err(AnalysisError::malformed(format!(
                "descriptor region {}..{} outside file of {} bytes",
                header.descriptor_offset, desc_end, file_len
            )));
        }

        let sample_count = disk_sub_header.session_record_count.max(0) as i64;
        if header.row_len <= 0 {
            return Err(AnalysisError::malformed(format!(
                "non-positive sample row width {}",
                header.row_len
            )));
        }
        let sample_end =
            header.sample_data_offset as i64 + sample_count * header.row_len as i64;
        if header.sample_data_offset < 0 || sample_end > file_len {
            return Err(AnalysisError::malformed(format!(
                "sample matrix {}..{} outside file of {} bytes",
                header.sample_data_offset, sample_end, file_len
            )));
        }

        let descriptors = read_descriptors(&data, &header)?;
        for d in &descriptors {
            let elem = d.channel_type.element_size() as i64;
            let end = d.offset as i64 + d.count.max(1) as i64 * elem;
            if d.offset < 0 || end > header.row_len as i64 {
                return Err(AnalysisError::malformed(format!(
                    "channel '{}' at {}..{} outside sample row of {} bytes",
                    d.name, d.offset, end, header.row_len
                )));
            }
        }
        let index: HashMap<String, usize> = descriptors
            .iter()
            .enumerate()
            .map(|(i, d)| (d.name.clone(), i))
            .collect();

        let info_start = header.session_info_offset as usize;
        let info_bytes = &data[info_start..info_start + header.session_info_len as usize];
        let info_end = info_bytes
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(info_bytes.len());
        let info_text = String::from_utf8_lossy(&info_bytes[..info_end]).to_string();

        let session = parse_session_meta(
            &info_text,
            header.tick_rate.max(0) as u32,
            disk_sub_header.session_start_date,
        );

        Ok(IbtCapture {
            header,
            disk_sub_header,
            descriptors,
            session,
            data,
            index,
        })
    }

    pub fn sample_count(&self) -> usize {
        self.disk_sub_header.session_record_count.max(0) as usize
    }

    pub fn tick_rate(&self) -> u32 {
        self.header.tick_rate.max(0) as u32
    }

    pub fn has_channel(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn channel_names(&self) -> impl Iterator<Item = &str> {
        self.descriptors.iter().map(|d| d.name.as_str())
    }

    /// Materialise one channel column by name. For array channels only
    /// the first element is read (the pipeline consumes scalars only).
    pub fn channel(&self, name: &str) -> Result<Column, AnalysisError> {
        let idx = *self
            .index
            .get(name)
            .ok_or_else(|| AnalysisError::MissingChannel(name.to_string()))?;
        let desc = &self.descriptors[idx];

        let n = self.sample_count();
        let stride = self.header.row_len as usize;
        let base = self.header.sample_data_offset as usize + desc.offset as usize;
        let elem = desc.channel_type.element_size();
        if n > 0 && base + (n - 1) * stride + elem > self.data.len() {
            return Err(AnalysisError::malformed(format!(
                "channel '{name}' column exceeds sample matrix"
            )));
        }

        let data = &self.data;
        let col = match desc.channel_type {
            ChannelType::Char => {
                Column::Char((0..n).map(|s| data[base + s * stride]).collect())
            }
            ChannelType::Bool => {
                Column::Bool((0..n).map(|s| data[base + s * stride] != 0).collect())
            }
            ChannelType::Int => Column::Int(
                (0..n)
                    .map(|s| read_i32_at(data, base + s * stride))
                    .collect(),
            ),
            ChannelType::BitField => Column::BitField(
                (0..n)
                    .map(|s| read_i32_at(data, base + s * stride) as u32)
                    .collect(),
            ),
            ChannelType::Float => Column::Float(
                (0..n)
                    .map(|s| read_f32_at(data, base + s * stride))
                    .collect(),
            ),
            ChannelType::Double => Column::Double(
                (0..n)
                    .map(|s| read_f64_at(data, base + s * stride))
                    .collect(),
            ),
        };
        Ok(col)
    }

    pub fn channel_f64(&self, name: &str) -> Result<Vec<f64>, AnalysisError> {
        Ok(self.channel(name)?.to_f64())
    }

    pub fn channel_i32(&self, name: &str) -> Result<Vec<i32>, AnalysisError> {
        Ok(self.channel(name)?.to_i32())
    }

    pub fn channel_bool(&self, name: &str) -> Result<Vec<bool>, AnalysisError> {
        Ok(self.channel(name)?.to_bool())
    }

    /// Materialise the canonical channel set the pipeline runs on.
    /// Fails with `MissingChannel` naming the first absent channel.
    pub fn core_channels(&self) -> Result<CoreChannels, AnalysisError> {
        for name in REQUIRED_CHANNELS {
            if !self.has_channel(name) {
                return Err(AnalysisError::MissingChannel((*name).to_string()));
            }
        }

        Ok(CoreChannels {
            speed: self.channel_f64("Speed")?,
            throttle: self.channel_f64("Throttle")?,
            brake: self.channel_f64("Brake")?,
            steering: self.channel_f64("SteeringWheelAngle")?,
            lat: self.channel_f64("Lat")?,
            lon: self.channel_f64("Lon")?,
            alt: self.channel_f64("Alt")?,
            lap: self.channel_i32("Lap")?,
            lap_current_lap_time: self.channel_f64("LapCurrentLapTime")?,
            lap_dist: self.channel_f64("LapDist")?,
            lap_dist_pct: self.channel_f64("LapDistPct")?,
            session_time: self.channel_f64("SessionTime")?,
            session_tick: self.channel_i32("SessionTick")?,
            rpm: self.channel_f64("RPM")?,
            gear: self.channel_i32("Gear")?,
            track_surface: self.channel_i32("PlayerTrackSurface")?,
            incident_count: self.channel_i32("PlayerCarMyIncidentCount")?,
            on_pit_road: self.channel_bool("OnPitRoad")?,
        })
    }
}

/// The canonical channels as typed columns, one element per sample.
#[derive(Debug, Clone)]
pub struct CoreChannels {
    pub speed: Vec<f64>,
    pub throttle: Vec<f64>,
    pub brake: Vec<f64>,
    pub steering: Vec<f64>,
    pub lat: Vec<f64>,
    pub lon: Vec<f64>,
    pub alt: Vec<f64>,
    pub lap: Vec<i32>,
    pub lap_current_lap_time: Vec<f64>,
    pub lap_dist: Vec<f64>,
    pub lap_dist_pct: Vec<f64>,
    pub session_time: Vec<f64>,
    pub session_tick: Vec<i32>,
    pub rpm: Vec<f64>,
    pub gear: Vec<i32>,
    pub track_surface: Vec<i32>,
    pub incident_count: Vec<i32>,
    pub on_pit_road: Vec<bool>,
}

// ============================================================================
// Lap splitting
// ============================================================================

/// A contiguous sample range with a constant lap-index value.
/// `end` is exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawLap {
    pub lap_number: i32,
    pub start: usize,
    pub end: usize,
}

impl RawLap {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

/// Split the sample stream into laps at every transition of the lap
/// channel. Out-laps and in-laps are retained here; excluding them is
/// the analyser's policy, not the splitter's.
pub fn split_laps(lap: &[i32]) -> Vec<RawLap> {
    let mut laps = Vec::new();
    if lap.is_empty() {
        return laps;
    }

    let mut start = 0usize;
    for i in 1..lap.len() {
        if lap[i] != lap[i - 1] {
            laps.push(RawLap {
                lap_number: lap[start],
                start,
                end: i,
            });
            start = i;
        }
    }
    laps.push(RawLap {
        lap_number: lap[start],
        start,
        end: lap.len(),
    });
    laps
}

// ============================================================================
// Binary reading helpers
// ============================================================================

fn read_i32_at(buf: &[u8], offset: usize) -> i32 {
    i32::from_le_bytes([buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]])
}

fn read_f32_at(buf: &[u8], offset: usize) -> f32 {
    f32::from_le_bytes([buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]])
}

fn read_8_at(buf: &[u8], offset: usize) -> [u8; 8] {
    let mut out = [0u8; 8];
    out.copy_from_slice(&buf[offset..offset + 8]);
    out
}

fn read_i64_at(buf: &[u8], offset: usize) -> i64 {
    i64::from_le_bytes(read_8_at(buf, offset))
}

fn read_f64_at(buf: &[u8], offset: usize) -> f64 {
    f64::from_le_bytes(read_8_at(buf, offset))
}

fn read_null_terminated_string(buf: &[u8]) -> String {
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).to_string()
}

fn read_header(data: &[u8]) -> Result<CaptureHeader, AnalysisError> {
    let fields: Vec<i32> = (0..10).map(|i| read_i32_at(data, i * 4)).collect();

    // First sample-buffer descriptor follows the pad; its second field
    // is the byte offset of the sample matrix.
    let buf_desc_start = HEADER_FIELDS_SIZE + HEADER_PAD_SIZE;
    debug_assert_eq!(
        buf_desc_start + 4 * SAMPLE_BUF_DESC_SIZE,
        TOTAL_HEADER_SIZE
    );
    let sample_data_offset = read_i32_at(data, buf_desc_start + 4);

    Ok(CaptureHeader {
        version: fields[0],
        status: fields[1],
        tick_rate: fields[2],
        session_info_update: fields[3],
        session_info_len: fields[4],
        session_info_offset: fields[5],
        num_channels: fields[6],
        descriptor_offset: fields[7],
        num_buf: fields[8],
        row_len: fields[9],
        sample_data_offset,
    })
}

fn read_disk_sub_header(data: &[u8]) -> DiskSubHeader {
    let base = TOTAL_HEADER_SIZE;
    DiskSubHeader {
        session_start_date: read_i64_at(data, base),
        session_start_time: read_f64_at(data, base + 8),
        session_end_time: read_f64_at(data, base + 16),
        session_lap_count: read_i32_at(data, base + 24),
        session_record_count: read_i32_at(data, base + 28),
    }
}

fn read_descriptors(
    data: &[u8],
    header: &CaptureHeader,
) -> Result<Vec<ChannelDescriptor>, AnalysisError> {
    let mut descriptors = Vec::with_capacity(header.num_channels.max(0) as usize);
    let mut offset = header.descriptor_offset as usize;

    for _ in 0..header.num_channels {
        let buf = &data[offset..offset + DESCRIPTOR_SIZE];

        let type_code = read_i32_at(buf, 0);
        let name = read_null_terminated_string(&buf[16..48]);
        let channel_type = ChannelType::from_code(type_code).ok_or_else(|| {
            AnalysisError::UnsupportedChannelType {
                name: name.clone(),
                code: type_code,
            }
        })?;

        descriptors.push(ChannelDescriptor {
            channel_type,
            offset: read_i32_at(buf, 4),
            count: read_i32_at(buf, 8),
            count_as_time: buf[12] != 0,
            name,
            desc: read_null_terminated_string(&buf[48..112]),
            unit: read_null_terminated_string(&buf[112..144]),
        });
        offset += DESCRIPTOR_SIZE;
    }

    Ok(descriptors)
}

// ============================================================================
// Session metadata document
// ============================================================================

/// Extract session metadata from the textual key/value document.
/// Uses simple line-based parsing to avoid adding a YAML dependency.
fn parse_session_meta(text: &str, tick_rate: u32, start_date_epoch: i64) -> SessionMeta {
    let mut meta = SessionMeta {
        sample_rate_hz: tick_rate,
        ..SessionMeta::default()
    };

    // First pass: which entry of the Drivers list is the player.
    let mut driver_car_idx: i64 = 0;
    for line in text.lines() {
        if let Some(val) = try_extract_value(line.trim(), "DriverCarIdx:") {
            if let Ok(idx) = val.parse::<i64>() {
                driver_car_idx = idx;
            }
            break;
        }
    }

    // Second pass: scalar fields plus the matching driver entry.
    let mut current_car_idx: i64 = -1;
    let mut track_display_name = String::new();
    for line in text.lines() {
        let trimmed = line.trim();

        if let Some(val) = try_extract_value(trimmed, "- CarIdx:") {
            current_car_idx = val.parse::<i64>().unwrap_or(-1);
        } else if let Some(val) = try_extract_value(trimmed, "TrackName:") {
            if meta.track_name.is_empty() {
                meta.track_name = val;
            }
        } else if let Some(val) = try_extract_value(trimmed, "TrackDisplayName:") {
            track_display_name = val;
        } else if let Some(val) = try_extract_value(trimmed, "TrackConfigName:") {
            if !val.is_empty() {
                meta.track_config = Some(val);
            }
        } else if let Some(val) = try_extract_value(trimmed, "TrackID:") {
            meta.track_id = val;
        } else if let Some(val) = try_extract_value(trimmed, "TrackLength:") {
            meta.track_length_m = parse_track_length_km(&val) * 1000.0;
        } else if let Some(val) = try_extract_value(trimmed, "SessionType:") {
            // Last session block wins (the one that produced the capture).
            meta.session_type = Some(val);
        } else if current_car_idx == driver_car_idx {
            if let Some(val) = try_extract_value(trimmed, "UserName:") {
                meta.driver_name = val;
            } else if let Some(val) = try_extract_value(trimmed, "UserID:") {
                meta.driver_id = val;
            } else if let Some(val) = try_extract_value(trimmed, "CarID:") {
                meta.car_id = val;
            } else if let Some(val) = try_extract_value(trimmed, "CarScreenName:") {
                meta.car_name = val;
            }
        }
    }

    if !track_display_name.is_empty() {
        meta.track_name = track_display_name;
    }
    if start_date_epoch > 0 {
        meta.started_at = DateTime::from_timestamp(start_date_epoch, 0);
    }

    meta
}

fn try_extract_value(line: &str, key: &str) -> Option<String> {
    line.strip_prefix(key).map(|rest| rest.trim().to_string())
}

/// Parse a track length like "6.21 km" (comma decimal separators occur
/// in some locales) to kilometres.
fn parse_track_length_km(raw: &str) -> f64 {
    raw.split_whitespace()
        .next()
        .map(|tok| tok.replace(',', "."))
        .and_then(|tok| tok.parse::<f64>().ok())
        .unwrap_or(0.0)
}
