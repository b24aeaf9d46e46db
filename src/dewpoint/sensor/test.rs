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

#![cfg(test)]

use crate::sensor::core::DataPin;
use crate::sensor::dht11::DATA_SIZE;
use crate::sensor::trace::{TraceEvent, TraceSink};
use rppal::gpio::Mode;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const GAP_SAMPLES: usize = 12;
const ONE_SAMPLES: usize = 30;
const ZERO_SAMPLES: usize = 10;

/// DataPin implementation for a line that never transitions, as when no sensor
/// is wired to the pin at all.
pub(crate) struct IdleDataPin;

impl DataPin for IdleDataPin {
    fn is_high(&self) -> bool {
        true
    }

    fn pin(&self) -> u8 {
        0
    }

    fn set_high(&mut self) {
        // NOP
    }

    fn set_low(&mut self) {
        // NOP
    }

    fn set_mode(&mut self, _mode: Mode) {
        // NOP
    }
}

/// DataPin implementation that replays a prerecorded waveform, one sample per
/// poll, then idles low once the waveform is exhausted.
pub(crate) struct ScriptedDataPin {
    levels: Vec<bool>,
    cursor: AtomicUsize,
}

impl ScriptedDataPin {
    pub(crate) fn with_levels(levels: Vec<bool>) -> Self {
        ScriptedDataPin {
            levels,
            cursor: Default::default(),
        }
    }

    /// Build the waveform a sensor would emit for the given frame bytes: the
    /// long "ready" pulse, then 40 short or long data pulses, all separated
    /// by low gaps.
    pub(crate) fn from_bytes(data: [u8; DATA_SIZE]) -> Self {
        let mut levels = Vec::new();
        push_run(&mut levels, false, GAP_SAMPLES);
        push_run(&mut levels, true, ONE_SAMPLES);

        for byte in data {
            for offset in (0..8).rev() {
                let samples = if (byte >> offset) & 1 == 1 {
                    ONE_SAMPLES
                } else {
                    ZERO_SAMPLES
                };

                push_run(&mut levels, false, GAP_SAMPLES);
                push_run(&mut levels, true, samples);
            }
        }

        push_run(&mut levels, false, GAP_SAMPLES);
        Self::with_levels(levels)
    }
}

fn push_run(levels: &mut Vec<bool>, level: bool, count: usize) {
    levels.extend(std::iter::repeat(level).take(count));
}

impl DataPin for ScriptedDataPin {
    fn is_high(&self) -> bool {
        let cursor = self.cursor.fetch_add(1, Ordering::SeqCst);
        self.levels.get(cursor).copied().unwrap_or(false)
    }

    fn pin(&self) -> u8 {
        0
    }

    fn set_high(&mut self) {
        // NOP
    }

    fn set_low(&mut self) {
        // NOP
    }

    fn set_mode(&mut self, _mode: Mode) {
        // NOP
    }
}

/// TraceSink implementation that counts recorded events.
#[derive(Default)]
pub(crate) struct CountingSink {
    events: Arc<AtomicUsize>,
}

impl CountingSink {
    pub(crate) fn events(&self) -> Arc<AtomicUsize> {
        self.events.clone()
    }
}

impl TraceSink for CountingSink {
    fn record(&self, _event: &TraceEvent<'_>) {
        self.events.fetch_add(1, Ordering::SeqCst);
    }
}
