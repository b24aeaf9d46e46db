// Dewpoint - Temperature and humidity metrics exporter for Prometheus
//
// Copyright 2022 Nick Pillitteri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//

use crate::sensor::dht11::Run;
use serde::Serialize;
use std::io::Write;
use std::sync::Mutex;

/// Intermediate decode state emitted after each pipeline stage.
#[derive(Debug, Serialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum TraceEvent<'a> {
    RawSamples { samples: &'a [bool] },
    RunLengths { runs: &'a [Run] },
    Bits { bits: &'a [u8] },
    FrameBytes { bytes: &'a [u8] },
}

/// Observer for intermediate decode state.
///
/// Sinks are write-only from the decoder's point of view: nothing a sink does
/// with an event can change the outcome of the read that produced it.
pub trait TraceSink {
    fn record(&self, event: &TraceEvent<'_>);
}

/// Sink that discards all events, used when tracing is disabled.
pub struct NopTraceSink;

impl TraceSink for NopTraceSink {
    fn record(&self, _event: &TraceEvent<'_>) {
        // NOP
    }
}

/// Sink that writes each event as a single line of JSON to a caller-provided
/// writer.
///
/// The caller owns the writer lifecycle: dropping the sink drops the writer,
/// closing any underlying file. Write failures are logged and swallowed.
pub struct JsonLinesSink<W> {
    writer: Mutex<W>,
}

impl<W> JsonLinesSink<W>
where
    W: Write,
{
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner().unwrap_or_else(|e| e.into_inner())
    }
}

impl<W> TraceSink for JsonLinesSink<W>
where
    W: Write,
{
    fn record(&self, event: &TraceEvent<'_>) {
        let mut writer = match self.writer.lock() {
            Ok(w) => w,
            Err(e) => e.into_inner(),
        };

        let res = serde_json::to_writer(&mut *writer, event)
            .map_err(std::io::Error::from)
            .and_then(|_| writer.write_all(b"\n"))
            .and_then(|_| writer.flush());

        if let Err(e) = res {
            tracing::warn!(message = "unable to record trace event", error = %e);
        }
    }
}

#[cfg(test)]
mod test {
    use super::{JsonLinesSink, TraceEvent, TraceSink};
    use crate::sensor::dht11::Run;

    #[test]
    fn test_json_lines_sink_one_line_per_event() {
        let sink = JsonLinesSink::new(Vec::new());
        sink.record(&TraceEvent::RawSamples {
            samples: &[true, false],
        });
        sink.record(&TraceEvent::RunLengths {
            runs: &[Run { level: true, length: 2 }],
        });
        sink.record(&TraceEvent::Bits { bits: &[1, 0, 1] });

        let text = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(3, lines.len());
        assert!(lines[0].contains("raw_samples"));
        assert!(lines[1].contains("run_lengths"));
        assert!(lines[2].contains("bits"));
    }
}
