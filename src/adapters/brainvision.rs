//! BrainVision recording reader
//!
//! Parses the `.vhdr` header, reads the binary data file it points to and,
//! when present, applies the BIDS `_channels.tsv` sidecar (channel types and
//! bad-channel status).

use crate::error::KqError;
use ndarray::Array2;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{ChannelInfo, ChannelKind, RawRecording, RecordingReader};

/// BrainVision Core Data Format reader
#[derive(Debug, Clone, Copy, Default)]
pub struct BrainVisionReader;

impl RecordingReader for BrainVisionReader {
    fn read(&self, header_path: &Path) -> Result<RawRecording, KqError> {
        let header = VhdrHeader::parse(&decode_text(fs::read(header_path)?))?;

        let data_path = header_path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(&header.data_file);
        let bytes = fs::read(&data_path)?;
        let data = header.decode_samples(&bytes)?;

        let mut channels: Vec<ChannelInfo> = header
            .channels
            .iter()
            .map(|ch| ChannelInfo {
                name: ch.name.clone(),
                kind: if ch.volts_per_unit().is_some() {
                    ChannelKind::Eeg
                } else {
                    ChannelKind::Misc
                },
                bad: false,
            })
            .collect();

        if let Some(sidecar) = channels_sidecar_path(header_path) {
            if sidecar.exists() {
                apply_channels_sidecar(&sidecar, &mut channels)?;
            }
        }

        debug!(
            path = %header_path.display(),
            channels = channels.len(),
            samples = data.ncols(),
            sfreq = header.sfreq(),
            "read BrainVision recording"
        );

        Ok(RawRecording {
            channels,
            data,
            sfreq: header.sfreq(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Orientation {
    Multiplexed,
    Vectorized,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinaryFormat {
    Int16,
    Int32,
    Float32,
}

impl BinaryFormat {
    fn sample_size(&self) -> usize {
        match self {
            BinaryFormat::Int16 => 2,
            BinaryFormat::Int32 | BinaryFormat::Float32 => 4,
        }
    }

    fn decode(&self, bytes: &[u8]) -> f64 {
        match self {
            BinaryFormat::Int16 => i16::from_le_bytes([bytes[0], bytes[1]]) as f64,
            BinaryFormat::Int32 => {
                i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64
            }
            BinaryFormat::Float32 => {
                f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct VhdrChannel {
    name: String,
    resolution: f64,
    unit: String,
}

impl VhdrChannel {
    /// Scale from the channel's unit to volts; `None` for non-voltage units
    fn volts_per_unit(&self) -> Option<f64> {
        match self.unit.trim() {
            "V" => Some(1.0),
            "mV" => Some(1e-3),
            "µV" | "μV" | "uV" => Some(1e-6),
            "nV" => Some(1e-9),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct VhdrHeader {
    data_file: String,
    orientation: Orientation,
    binary_format: BinaryFormat,
    sampling_interval_us: f64,
    channels: Vec<VhdrChannel>,
}

impl VhdrHeader {
    fn parse(text: &str) -> Result<Self, KqError> {
        let mut section = String::new();
        let mut common: HashMap<String, String> = HashMap::new();
        let mut binary: HashMap<String, String> = HashMap::new();
        let mut channel_entries: Vec<(usize, String)> = Vec::new();

        for raw_line in text.lines() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with(';') {
                continue;
            }
            if line.starts_with('[') && line.ends_with(']') {
                section = line[1..line.len() - 1].trim().to_string();
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let key = key.trim();
            let value = value.trim().to_string();

            match section.as_str() {
                "Common Infos" => {
                    common.insert(key.to_string(), value);
                }
                "Binary Infos" => {
                    binary.insert(key.to_string(), value);
                }
                "Channel Infos" => {
                    if let Some(index) = key.strip_prefix("Ch").and_then(|n| n.parse().ok()) {
                        channel_entries.push((index, value));
                    }
                }
                _ => {}
            }
        }

        let data_file = required(&common, "DataFile")?.to_string();

        let data_format = common.get("DataFormat").map(String::as_str).unwrap_or("BINARY");
        if !data_format.eq_ignore_ascii_case("BINARY") {
            return Err(KqError::UnsupportedFormat(format!("DataFormat={data_format}")));
        }

        let orientation = match common
            .get("DataOrientation")
            .map(String::as_str)
            .unwrap_or("MULTIPLEXED")
        {
            o if o.eq_ignore_ascii_case("MULTIPLEXED") => Orientation::Multiplexed,
            o if o.eq_ignore_ascii_case("VECTORIZED") => Orientation::Vectorized,
            other => {
                return Err(KqError::UnsupportedFormat(format!("DataOrientation={other}")))
            }
        };

        let binary_format = match required(&binary, "BinaryFormat")? {
            "INT_16" => BinaryFormat::Int16,
            "INT_32" => BinaryFormat::Int32,
            "IEEE_FLOAT_32" => BinaryFormat::Float32,
            other => return Err(KqError::UnsupportedFormat(format!("BinaryFormat={other}"))),
        };

        let n_channels: usize = required(&common, "NumberOfChannels")?
            .parse()
            .map_err(|e| KqError::Header(format!("NumberOfChannels: {e}")))?;

        let sampling_interval_us: f64 = required(&common, "SamplingInterval")?
            .parse()
            .map_err(|e| KqError::Header(format!("SamplingInterval: {e}")))?;
        if !(sampling_interval_us.is_finite() && sampling_interval_us > 0.0) {
            return Err(KqError::Header(format!(
                "SamplingInterval must be positive, got {sampling_interval_us}"
            )));
        }

        channel_entries.sort_by_key(|(index, _)| *index);
        let channels = channel_entries
            .iter()
            .map(|(_, value)| parse_channel(value))
            .collect::<Result<Vec<_>, _>>()?;

        if channels.len() != n_channels {
            return Err(KqError::Header(format!(
                "NumberOfChannels={n_channels} but {} channel entries",
                channels.len()
            )));
        }

        Ok(Self {
            data_file,
            orientation,
            binary_format,
            sampling_interval_us,
            channels,
        })
    }

    fn sfreq(&self) -> f64 {
        1e6 / self.sampling_interval_us
    }

    /// Demultiplex and scale raw bytes into a channels x samples matrix in volts
    fn decode_samples(&self, bytes: &[u8]) -> Result<Array2<f64>, KqError> {
        let n_channels = self.channels.len();
        if n_channels == 0 {
            return Err(KqError::Header("Number of channels cannot be zero".to_string()));
        }
        let frame_size = self.binary_format.sample_size() * n_channels;
        if bytes.len() % frame_size != 0 {
            return Err(KqError::Header(format!(
                "data file size {} is not a multiple of the frame size {frame_size}",
                bytes.len()
            )));
        }
        let n_samples = bytes.len() / frame_size;

        let scales: Vec<f64> = self
            .channels
            .iter()
            .map(|ch| ch.resolution * ch.volts_per_unit().unwrap_or(1.0))
            .collect();

        let mut data = Array2::<f64>::zeros((n_channels, n_samples));
        let size = self.binary_format.sample_size();
        for (i, chunk) in bytes.chunks_exact(size).enumerate() {
            let (ch, t) = match self.orientation {
                Orientation::Multiplexed => (i % n_channels, i / n_channels),
                Orientation::Vectorized => (i / n_samples, i % n_samples),
            };
            data[[ch, t]] = self.binary_format.decode(chunk) * scales[ch];
        }
        Ok(data)
    }
}

fn required<'a>(map: &'a HashMap<String, String>, key: &str) -> Result<&'a str, KqError> {
    map.get(key)
        .map(String::as_str)
        .ok_or_else(|| KqError::Header(format!("missing {key}")))
}

/// `<name>,<reference>,<resolution>,<unit>`; `\1` encodes a comma inside the name
fn parse_channel(value: &str) -> Result<VhdrChannel, KqError> {
    let mut fields = value.split(',');
    let name = fields.next().unwrap_or_default().replace("\\1", ",");
    if name.is_empty() {
        return Err(KqError::Header(format!("channel entry without a name: {value}")));
    }
    let _reference = fields.next();
    let resolution = match fields.next().map(str::trim) {
        None | Some("") => 1.0,
        Some(r) => r
            .parse()
            .map_err(|e| KqError::Header(format!("resolution of {name}: {e}")))?,
    };
    let unit = match fields.next().map(str::trim) {
        None | Some("") => "µV".to_string(),
        Some(u) => u.to_string(),
    };
    Ok(VhdrChannel {
        name,
        resolution,
        unit,
    })
}

/// Headers are usually Latin-1; fall back to it when the bytes are not UTF-8
fn decode_text(bytes: Vec<u8>) -> String {
    String::from_utf8(bytes)
        .unwrap_or_else(|e| e.into_bytes().iter().map(|&b| b as char).collect())
}

/// `sub-X_task-Y_eeg.vhdr` -> `sub-X_task-Y_channels.tsv`
fn channels_sidecar_path(header_path: &Path) -> Option<PathBuf> {
    let file_name = header_path.file_name()?.to_str()?;
    let stem = file_name.strip_suffix("_eeg.vhdr")?;
    Some(header_path.with_file_name(format!("{stem}_channels.tsv")))
}

fn apply_channels_sidecar(path: &Path, channels: &mut [ChannelInfo]) -> Result<(), KqError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .flexible(true)
        .from_path(path)?;

    let headers = reader.headers()?.clone();
    let column = |name: &str| headers.iter().position(|h| h.trim() == name);
    let Some(name_col) = column("name") else {
        return Err(KqError::Header(format!(
            "{} has no name column",
            path.display()
        )));
    };
    let type_col = column("type");
    let status_col = column("status");

    for row in reader.records() {
        let row = row?;
        let Some(name) = row.get(name_col).map(str::trim) else {
            continue;
        };
        let Some(channel) = channels.iter_mut().find(|ch| ch.name == name) else {
            continue;
        };
        if let Some(kind) = type_col.and_then(|c| row.get(c)) {
            channel.kind = if kind.trim().eq_ignore_ascii_case("EEG") {
                ChannelKind::Eeg
            } else {
                ChannelKind::Misc
            };
        }
        if let Some(status) = status_col.and_then(|c| row.get(c)) {
            channel.bad = status.trim().eq_ignore_ascii_case("bad");
        }
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use tempfile::TempDir;

    /// Write an INT_16 multiplexed recording; returns the header path
    pub(crate) fn write_recording(
        dir: &Path,
        stem: &str,
        channels: &[&str],
        sfreq: f64,
        samples: &[Vec<i16>],
    ) -> PathBuf {
        let mut header = String::from(
            "Brain Vision Data Exchange Header File Version 1.0\n\n[Common Infos]\nCodepage=UTF-8\n",
        );
        header.push_str(&format!("DataFile={stem}_eeg.eeg\n"));
        header.push_str(&format!("MarkerFile={stem}_eeg.vmrk\n"));
        header.push_str("DataFormat=BINARY\nDataOrientation=MULTIPLEXED\n");
        header.push_str(&format!("NumberOfChannels={}\n", channels.len()));
        header.push_str(&format!("SamplingInterval={}\n\n", 1e6 / sfreq));
        header.push_str("[Binary Infos]\nBinaryFormat=INT_16\n\n[Channel Infos]\n");
        for (i, name) in channels.iter().enumerate() {
            header.push_str(&format!("Ch{}={name},,0.1,µV\n", i + 1));
        }

        let n_samples = samples.first().map(Vec::len).unwrap_or(0);
        let mut bytes = Vec::with_capacity(n_samples * channels.len() * 2);
        for t in 0..n_samples {
            for channel in samples {
                bytes.extend_from_slice(&channel[t].to_le_bytes());
            }
        }

        let header_path = dir.join(format!("{stem}_eeg.vhdr"));
        fs::write(&header_path, header).unwrap();
        fs::write(dir.join(format!("{stem}_eeg.eeg")), bytes).unwrap();
        header_path
    }

    #[test]
    fn test_parse_header_fields() {
        let text = "Brain Vision Data Exchange Header File Version 1.0\n\
            [Common Infos]\nDataFile=rec.eeg\nDataFormat=BINARY\nDataOrientation=VECTORIZED\n\
            NumberOfChannels=2\nSamplingInterval=1000\n\
            [Binary Infos]\nBinaryFormat=IEEE_FLOAT_32\n\
            [Channel Infos]\n; comment\nCh2=EOG\\1L,,0.5,mV\nCh1=Fp1,,,\n\
            [Comment]\nA=B\n";
        let header = VhdrHeader::parse(text).unwrap();

        assert_eq!(header.data_file, "rec.eeg");
        assert_eq!(header.orientation, Orientation::Vectorized);
        assert_eq!(header.binary_format, BinaryFormat::Float32);
        assert_relative_eq!(header.sfreq(), 1000.0);
        assert_eq!(header.channels[0].name, "Fp1");
        assert_eq!(header.channels[0].resolution, 1.0);
        assert_eq!(header.channels[0].unit, "µV");
        assert_eq!(header.channels[1].name, "EOG,L");
        assert_eq!(header.channels[1].volts_per_unit(), Some(1e-3));
    }

    #[test]
    fn test_unsupported_binary_format() {
        let text = "[Common Infos]\nDataFile=a.eeg\nNumberOfChannels=1\nSamplingInterval=2000\n\
            [Binary Infos]\nBinaryFormat=UINT_16\n[Channel Infos]\nCh1=Cz,,1,µV\n";
        assert!(matches!(
            VhdrHeader::parse(text),
            Err(KqError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_channel_count_mismatch() {
        let text = "[Common Infos]\nDataFile=a.eeg\nNumberOfChannels=3\nSamplingInterval=2000\n\
            [Binary Infos]\nBinaryFormat=INT_16\n[Channel Infos]\nCh1=Cz,,1,µV\n";
        assert!(matches!(VhdrHeader::parse(text), Err(KqError::Header(_))));
    }

    #[test]
    fn test_read_multiplexed_int16_scaled_to_volts() {
        let dir = TempDir::new().unwrap();
        let path = write_recording(
            dir.path(),
            "sub-1_task-awake_acq-EC",
            &["Fz", "Cz"],
            250.0,
            &[vec![10, 20, 30], vec![-10, -20, -30]],
        );

        let recording = BrainVisionReader.read(&path).unwrap();
        assert_relative_eq!(recording.sfreq, 250.0);
        assert_eq!(recording.channel_names(), vec!["Fz".to_string(), "Cz".to_string()]);
        assert_eq!(recording.data.dim(), (2, 3));
        // 20 counts * 0.1 µV
        assert_relative_eq!(recording.data[[0, 1]], 2e-6, epsilon = 1e-15);
        assert_relative_eq!(recording.data[[1, 2]], -3e-6, epsilon = 1e-15);
    }

    #[test]
    fn test_channels_sidecar_marks_bad_and_non_eeg() {
        let dir = TempDir::new().unwrap();
        let stem = "sub-1_task-awake_acq-EO";
        let path = write_recording(
            dir.path(),
            stem,
            &["Fz", "Cz", "ECG"],
            500.0,
            &[vec![1, 2], vec![3, 4], vec![5, 6]],
        );
        fs::write(
            dir.path().join(format!("{stem}_channels.tsv")),
            "name\ttype\tunits\tstatus\nFz\tEEG\tµV\tgood\nCz\tEEG\tµV\tbad\nECG\tECG\tµV\tgood\n",
        )
        .unwrap();

        let recording = BrainVisionReader.read(&path).unwrap();
        assert!(!recording.channels[0].bad);
        assert!(recording.channels[1].bad);
        assert_eq!(recording.channels[2].kind, ChannelKind::Misc);

        let picked = recording.pick_good_eeg();
        assert_eq!(picked.channel_names(), vec!["Fz".to_string()]);
    }

    #[test]
    fn test_truncated_data_file_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = write_recording(dir.path(), "rec", &["Fz", "Cz"], 500.0, &[vec![1], vec![2]]);
        fs::write(dir.path().join("rec_eeg.eeg"), [0u8; 3]).unwrap();
        assert!(matches!(BrainVisionReader.read(&path), Err(KqError::Header(_))));
    }

    #[test]
    fn test_latin1_header_decodes_micro_sign() {
        let bytes = vec![b'u', 0xB5, b'V'];
        assert_eq!(decode_text(bytes), "uµV");
    }
}
