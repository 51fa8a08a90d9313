//! Plain-text waveform dumps.
//!
//! ```text
//! # comment
//! time_step_ns = 16
//! # run record endpoint channel timestamp daq_window_timestamp [time_offset] : adcs...
//! 27 0 104 3 1000 990 : 8100 8098 8102 7950 7990 8101
//! 27 1 104 3 2000 1990 2 : 8099 8101 8100 7940 7985 8100
//! ```
//!
//! Blank lines and `#` comments may appear anywhere. The header must precede
//! the first record.

use crate::error::{ReadError, ReadResult};
use crate::WaveformReader;
use pds_types::{AcquisitionInfo, Nanoseconds, Waveform, WaveformSet};
use nom::{
    bytes::complete::tag,
    character::complete::{char, i32 as adc, space0, space1, u32 as uint32, u64 as uint64},
    combinator::{eof, map, opt, rest},
    multi::many1,
    number::complete::double,
    sequence::preceded,
    IResult, Parser,
};
use std::path::Path;
use tracing::debug;

/// Reader for the text dump format.
#[derive(Clone, Copy, Debug, Default)]
pub struct TextReader;

impl WaveformReader for TextReader {
    fn read(&self, path: &Path) -> ReadResult<WaveformSet> {
        let content = std::fs::read_to_string(path)?;
        let set = parse_text(&content)?;
        debug!(path = %path.display(), waveforms = set.len(), "Text dump read");
        Ok(set)
    }
}

/// Parse a whole text dump.
pub fn parse_text(content: &str) -> ReadResult<WaveformSet> {
    let mut time_step: Option<Nanoseconds> = None;
    let mut waveforms = Vec::new();

    for (i, line) in content.lines().enumerate() {
        let line_no = i + 1;
        if comment_or_blank(line).is_ok() {
            continue;
        }
        let Some(step) = time_step else {
            let (_, ns) = header(line).map_err(|e| ReadError::syntax(line_no, e))?;
            time_step = Some(Nanoseconds(ns));
            continue;
        };
        let (_, record) = record_line(line).map_err(|e| ReadError::syntax(line_no, e))?;
        let wf = record
            .into_waveform(step)
            .map_err(|source| ReadError::Record { line: line_no, source })?;
        waveforms.push(wf);
    }

    if time_step.is_none() {
        return Err(ReadError::MissingHeader("time_step_ns"));
    }
    Ok(WaveformSet::new(waveforms)?)
}

// ============================================================================
// Nom Parsers (nom 8 compatible)
// ============================================================================

struct RawRecord {
    info: AcquisitionInfo,
    time_offset: u64,
    adcs: Vec<i32>,
}

impl RawRecord {
    fn into_waveform(self, time_step: Nanoseconds) -> pds_types::TypesResult<Waveform> {
        let time_offset = usize::try_from(self.time_offset).unwrap_or(usize::MAX);
        Waveform::new(self.info, time_step, self.adcs, time_offset)
    }
}

fn comment_or_blank(input: &str) -> IResult<&str, ()> {
    map((space0, opt((char('#'), rest)), eof), |_| ()).parse(input)
}

fn header(input: &str) -> IResult<&str, f64> {
    let (input, _) = (space0, tag("time_step_ns"), space0, char('='), space0).parse(input)?;
    let (input, ns) = double(input)?;
    let (input, _) = (space0, eof).parse(input)?;
    Ok((input, ns))
}

fn record_line(input: &str) -> IResult<&str, RawRecord> {
    let (input, _) = space0(input)?;
    let (input, run_number) = uint32(input)?;
    let (input, record_number) = preceded(space1, uint32).parse(input)?;
    let (input, endpoint) = preceded(space1, uint32).parse(input)?;
    let (input, channel) = preceded(space1, uint32).parse(input)?;
    let (input, timestamp) = preceded(space1, uint64).parse(input)?;
    let (input, daq_window_timestamp) = preceded(space1, uint64).parse(input)?;
    let (input, time_offset) = opt(preceded(space1, uint64)).parse(input)?;
    let (input, _) = (space0, char(':')).parse(input)?;
    let (input, adcs) = many1(preceded(space0, adc)).parse(input)?;
    let (input, _) = (space0, eof).parse(input)?;

    Ok((
        input,
        RawRecord {
            info: AcquisitionInfo {
                timestamp,
                daq_window_timestamp,
                run_number,
                record_number,
                endpoint,
                channel,
                starting_tick: 0,
            },
            time_offset: time_offset.unwrap_or(0),
            adcs,
        },
    ))
}
