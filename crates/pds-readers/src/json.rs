//! JSON waveform documents.
//!
//! Either a bare array of waveform objects, or an object with a document-wide
//! `time_step_ns` and a `waveforms` array. A waveform's own `time_step_ns`
//! wins over the document's, which defaults to one timing tick.

use crate::error::ReadResult;
use crate::WaveformReader;
use pds_types::{AcquisitionInfo, Nanoseconds, Waveform, WaveformSet, TICK};
use serde::Deserialize;
use std::path::Path;
use tracing::debug;

/// Reader for JSON waveform documents.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonReader;

impl WaveformReader for JsonReader {
    fn read(&self, path: &Path) -> ReadResult<WaveformSet> {
        let content = std::fs::read_to_string(path)?;
        let set = parse_json(&content)?;
        debug!(path = %path.display(), waveforms = set.len(), "JSON document read");
        Ok(set)
    }
}

#[derive(Debug, Deserialize)]
struct JsonWaveform {
    #[serde(alias = "run")]
    run_number: u32,
    #[serde(alias = "record")]
    record_number: u32,
    endpoint: u32,
    channel: u32,
    #[serde(default)]
    timestamp: u64,
    #[serde(default)]
    daq_window_timestamp: u64,
    #[serde(default)]
    starting_tick: u64,
    #[serde(default)]
    time_offset: usize,
    time_step_ns: Option<f64>,
    adcs: Vec<i32>,
}

#[derive(Debug, Deserialize)]
struct JsonBundle {
    #[serde(default = "default_time_step")]
    time_step_ns: f64,
    waveforms: Vec<JsonWaveform>,
}

fn default_time_step() -> f64 {
    TICK.0
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum JsonDocument {
    Bare(Vec<JsonWaveform>),
    Bundle(JsonBundle),
}

/// Parse a JSON waveform document.
pub fn parse_json(content: &str) -> ReadResult<WaveformSet> {
    let bundle = match serde_json::from_str::<JsonDocument>(content)? {
        JsonDocument::Bare(waveforms) => JsonBundle {
            time_step_ns: default_time_step(),
            waveforms,
        },
        JsonDocument::Bundle(bundle) => bundle,
    };

    let waveforms = bundle
        .waveforms
        .into_iter()
        .map(|raw| {
            let info = AcquisitionInfo {
                timestamp: raw.timestamp,
                daq_window_timestamp: raw.daq_window_timestamp,
                run_number: raw.run_number,
                record_number: raw.record_number,
                endpoint: raw.endpoint,
                channel: raw.channel,
                starting_tick: raw.starting_tick,
            };
            let step = Nanoseconds(raw.time_step_ns.unwrap_or(bundle.time_step_ns));
            Waveform::new(info, step, raw.adcs, raw.time_offset)
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(WaveformSet::new(waveforms)?)
}
