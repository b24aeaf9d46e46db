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

use crate::sensor::core::{DataPin, Humidity, SensorError, SensorErrorKind, TemperatureCelsius};
use crate::sensor::trace::{NopTraceSink, TraceEvent, TraceSink};
use rppal::gpio::Mode;
use serde::Serialize;
use std::fmt::{Debug, Formatter};
use std::thread;
use std::time::Duration;

/// Number of consecutive unchanged samples that marks end-of-transmission.
///
/// Tunable: a higher count tolerates slower or noisier lines but lengthens the
/// blocking tail of every read, a lower count risks cutting off a transmission
/// mid-frame on a slow host.
pub(crate) const IDLE_STOP_COUNT: usize = 100;
pub(crate) const DHT_PULSES: usize = 41;
pub(crate) const DATA_SIZE: usize = 5;

/// Raw line levels captured during one sensor transmission.
///
/// The line is sampled as fast as the host allows. There is no clock line to
/// synchronize against, so end-of-transmission is detected by the line holding
/// one level for `IDLE_STOP_COUNT` consecutive samples.
#[derive(Debug)]
struct SampleTrace {
    samples: Vec<bool>,
}

impl SampleTrace {
    /// Busy-poll the pin until the line goes idle, then strip the trailing
    /// idle samples (stoppage padding, not signal).
    ///
    /// NOTE: This method assumes the pin has already been prepared for reading
    /// by sending the high-low-high wake sequence with timings corresponding
    /// to the DHT11 datasheet.
    fn from_data_pin(pin: &dyn DataPin) -> Self {
        let mut samples = Vec::with_capacity(IDLE_STOP_COUNT * 8);
        // The pull-up resistor holds the line high between transmissions.
        let mut last = true;
        let mut unchanged = 0;

        while unchanged != IDLE_STOP_COUNT {
            let current = pin.is_high();
            samples.push(current);
            unchanged = if current == last { unchanged + 1 } else { 0 };
            last = current;
        }

        let trimmed = samples.len().saturating_sub(IDLE_STOP_COUNT);
        samples.truncate(trimmed);

        tracing::trace!(message = "captured line samples", samples = samples.len());
        Self { samples }
    }

    fn samples(&self) -> &[bool] {
        &self.samples
    }

    fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Maximal group of consecutive identical samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Run {
    pub level: bool,
    pub length: usize,
}

/// Alternating constant-level runs derived from a sample trace.
///
/// The high runs are the bit carriers: the sensor encodes a 0 as a short high
/// pulse and a 1 as a long high pulse, with low gaps in between.
#[derive(Debug)]
struct RunTrace {
    runs: Vec<Run>,
}

impl RunTrace {
    fn from_samples(samples: &[bool]) -> Self {
        let mut runs = Vec::with_capacity(DHT_PULSES * 2);
        let mut iter = samples.iter().copied();
        let mut level = match iter.next() {
            Some(v) => v,
            None => return Self { runs },
        };
        let mut length = 1;

        for sample in iter {
            if sample == level {
                length += 1;
            } else {
                runs.push(Run { level, length });
                level = sample;
                length = 1;
            }
        }

        // The in-progress run at end of trace is signal too, close it.
        runs.push(Run { level, length });
        Self { runs }
    }

    fn runs(&self) -> &[Run] {
        &self.runs
    }

    fn high_lengths(&self) -> impl Iterator<Item = usize> + '_ {
        self.runs.iter().filter(|r| r.level).map(|r| r.length)
    }

    /// Classify each high run as a bit by comparing its length to the shortest
    /// and longest high runs of this trace.
    ///
    /// Absolute pulse widths drift with polling speed, bus capacitance and
    /// scheduler jitter, so there is no fixed sample-count threshold: a run
    /// closer to the observed maximum reads as 1, closer to the observed
    /// minimum as 0, ties as 0.
    fn classify_bits(&self) -> Vec<u8> {
        let max = match self.high_lengths().max() {
            Some(v) => v,
            None => return Vec::new(),
        };
        let min = match self.high_lengths().min() {
            Some(v) => v,
            None => return Vec::new(),
        };

        self.high_lengths()
            .map(|length| {
                let dist_to_max = length.abs_diff(max);
                let dist_to_min = length.abs_diff(min);
                if dist_to_max < dist_to_min {
                    1
                } else {
                    0
                }
            })
            .collect()
    }
}

/// Bytes read from a sensor, assembled from classified bits.
///
/// Bytes read make up humidity data, temperature data, and a checksum to
/// ensure the reading is valid. If valid, the frame can be converted to a
/// temperature and humidity value.
#[derive(Debug)]
struct Frame {
    bytes: [u8; DATA_SIZE],
}

impl Frame {
    fn from_bits(bits: &[u8]) -> Result<Self, SensorError> {
        // 41 pulses per transmission: the sensor's "ready" pulse followed by
        // 40 data bits. The ready pulse is as long as a 1 bit and must read as
        // one. A mismatch on either the count or the leading pulse means the
        // capture is garbled and no fixed slicing of it can be trusted.
        if bits.len() != DHT_PULSES {
            return Err(SensorError::KindMsg(
                SensorErrorKind::Sequence,
                "wrong pulse count for a complete transmission",
            ));
        }

        if bits[0] != 1 {
            return Err(SensorError::KindMsg(
                SensorErrorKind::Sequence,
                "leading pulse did not read as a long pulse",
            ));
        }

        let mut bytes = [0; DATA_SIZE];
        for (i, &bit) in bits[1..].iter().enumerate() {
            // 40 data bits, most significant first. Divide by eight to figure
            // out which byte this bit ends up in and shift the current value
            // left (we only operate on the LSB each iteration).
            let index = i / 8;
            bytes[index] <<= 1;
            bytes[index] |= bit;
        }

        Self::checksum_bytes(&bytes)?;
        Ok(Frame { bytes })
    }

    fn checksum_bytes(bytes: &[u8; DATA_SIZE]) -> Result<(), SensorError> {
        // From the DHT11 datasheet: the fifth byte is the last 8 bits of the
        // sum of the four data bytes.
        let expected = bytes[4];
        let computed = ((bytes[0] as u16 + bytes[1] as u16 + bytes[2] as u16 + bytes[3] as u16) & 0xFF) as u8;

        tracing::debug!(
            message = "computing checksum for sensor data",
            computed = computed,
            expected = expected
        );

        if computed != expected {
            Err(SensorError::CheckSum(expected, computed))
        } else {
            Ok(())
        }
    }
}

impl From<Frame> for (TemperatureCelsius, Humidity) {
    /// Convert a `Frame` into temperature and humidity measurements.
    ///
    /// This conversion is guaranteed to succeed because the checksum enforced
    /// during creation of instances of `Frame` ensures the bytes read from the
    /// sensor are valid.
    fn from(frame: Frame) -> Self {
        // The DHT11 sends each value as an integral byte followed by a decimal
        // (tenths) byte.
        let humidity = Humidity::from(frame.bytes[0] as f64 + frame.bytes[1] as f64 / 10.0);
        let temperature = TemperatureCelsius::from(frame.bytes[2] as f64 + frame.bytes[3] as f64 / 10.0);

        tracing::debug!(
            message = "parsed sensor data",
            temperature = %temperature,
            humidity = %humidity
        );

        (temperature, humidity)
    }
}

/// Read temperature in degrees celsius and relative humidity from a DHT11 sensor
pub struct DHT11Sensor {
    pin: Box<dyn DataPin + Send + Sync + 'static>,
    sink: Box<dyn TraceSink + Send + Sync + 'static>,
}

impl DHT11Sensor {
    pub fn from_pin<T>(pin: T) -> Self
    where
        T: DataPin + Send + Sync + 'static,
    {
        Self {
            pin: Box::new(pin),
            sink: Box::new(NopTraceSink),
        }
    }

    /// Record every intermediate decode stage to the given sink.
    ///
    /// The sink only observes: nothing it does can change the outcome of the
    /// read that produced an event.
    pub fn with_trace_sink<S>(mut self, sink: S) -> Self
    where
        S: TraceSink + Send + Sync + 'static,
    {
        self.sink = Box::new(sink);
        self
    }

    fn prepare_for_read(&mut self) {
        // Host needs to set the line:
        // * high for at least 50ms to let the sensor settle after any previous read
        // * low for at least 20ms so the sensor detects the start of the read
        // * high briefly, then release the line so the sensor can drive it
        self.pin.set_mode(Mode::Output);
        self.pin.set_high();
        thread::sleep(Duration::from_millis(50));
        self.pin.set_low();
        thread::sleep(Duration::from_millis(20));
        self.pin.set_high();
        thread::sleep(Duration::from_micros(30));
        self.pin.set_mode(Mode::Input);
    }

    /// Read temperature and humidity from the sensor or return an error if the
    /// read failed with details about what caused the read to fail.
    ///
    /// This blocks the calling thread for the entire transaction (tens of
    /// milliseconds): the protocol has no clock or interrupt to wait on, only
    /// the busy-polled data line. One call performs exactly one acquisition,
    /// retry policy belongs to the caller.
    pub fn read(&mut self) -> Result<(TemperatureCelsius, Humidity), SensorError> {
        self.prepare_for_read();

        let trace = SampleTrace::from_data_pin(self.pin.as_ref());
        self.sink.record(&TraceEvent::RawSamples {
            samples: trace.samples(),
        });

        if trace.is_empty() {
            return Err(SensorError::KindMsg(
                SensorErrorKind::NoData,
                "no transitions captured before line went idle",
            ));
        }

        let runs = RunTrace::from_samples(trace.samples());
        self.sink.record(&TraceEvent::RunLengths { runs: runs.runs() });

        let bits = runs.classify_bits();
        self.sink.record(&TraceEvent::Bits { bits: &bits });

        let frame = Frame::from_bits(&bits)?;
        self.sink.record(&TraceEvent::FrameBytes { bytes: &frame.bytes });

        Ok(frame.into())
    }
}

impl Debug for DHT11Sensor {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DHT11Sensor").field("pin", &self.pin.pin()).finish()
    }
}

#[cfg(test)]
mod test {
    use super::{DHT11Sensor, Frame, Run, RunTrace, SampleTrace, DATA_SIZE, DHT_PULSES};
    use crate::sensor::core::{Humidity, SensorErrorKind, TemperatureCelsius};
    use crate::sensor::test::{CountingSink, IdleDataPin, ScriptedDataPin};
    use std::sync::atomic::Ordering;

    fn bits_for_bytes(bytes: &[u8; DATA_SIZE]) -> Vec<u8> {
        let mut bits = Vec::with_capacity(DHT_PULSES);
        // The ready pulse always reads as a long pulse
        bits.push(1);

        for byte in bytes {
            for offset in (0..8).rev() {
                bits.push((byte >> offset) & 1);
            }
        }

        bits
    }

    #[test]
    fn test_sample_trace_idle_line_is_empty() {
        let pin = IdleDataPin;
        let trace = SampleTrace::from_data_pin(&pin);

        assert!(trace.is_empty());
    }

    #[test]
    fn test_sample_trace_trims_stoppage_tail() {
        let pin = ScriptedDataPin::with_levels(vec![false, false, true, true]);
        let trace = SampleTrace::from_data_pin(&pin);

        // The scripted signal plus a single leftover sample of the idle run
        // that triggered stoppage.
        assert_eq!(&[false, false, true, true, false], trace.samples());
    }

    #[test]
    fn test_run_trace_single_sample() {
        let runs = RunTrace::from_samples(&[true]);

        assert_eq!(&[Run { level: true, length: 1 }], runs.runs());
    }

    #[test]
    fn test_run_trace_closes_final_run() {
        let samples = [true, true, false, true, true, true, false, false];
        let runs = RunTrace::from_samples(&samples);

        assert_eq!(
            &[
                Run { level: true, length: 2 },
                Run { level: false, length: 1 },
                Run { level: true, length: 3 },
                Run { level: false, length: 2 },
            ],
            runs.runs()
        );
    }

    #[test]
    fn test_run_trace_lengths_sum_to_input() {
        let samples = [false, true, true, false, false, false, true, false, true, true];
        let runs = RunTrace::from_samples(&samples);

        let total: usize = runs.runs().iter().map(|r| r.length).sum();
        assert_eq!(samples.len(), total);

        for pair in runs.runs().windows(2) {
            assert_ne!(pair[0].level, pair[1].level);
        }
    }

    #[test]
    fn test_classify_bits_relative_to_extremes() {
        let lengths = [10, 10, 30, 30, 10];
        let mut runs = Vec::new();
        for &length in &lengths {
            runs.push(Run { level: false, length: 12 });
            runs.push(Run { level: true, length });
        }

        let trace = RunTrace { runs };
        assert_eq!(vec![0, 0, 1, 1, 0], trace.classify_bits());
    }

    #[test]
    fn test_frame_round_trip() {
        let cases: [(u8, u8, u8, u8); 3] = [
            (0x32, 0x00, 0x19, 0x05),
            (0x00, 0x00, 0x00, 0x00),
            (0x5D, 0x09, 0x16, 0x08),
        ];

        for (h_int, h_dec, t_int, t_dec) in cases {
            let checksum = ((h_int as u16 + h_dec as u16 + t_int as u16 + t_dec as u16) & 0xFF) as u8;
            let bytes = [h_int, h_dec, t_int, t_dec, checksum];

            let frame = Frame::from_bits(&bits_for_bytes(&bytes)).unwrap();
            let (t, h) = frame.into();

            assert_eq!(TemperatureCelsius::from(t_int as f64 + t_dec as f64 / 10.0), t);
            assert_eq!(Humidity::from(h_int as f64 + h_dec as f64 / 10.0), h);
        }
    }

    #[test]
    fn test_frame_rejects_checksum_bit_flips() {
        let bytes = [0x32, 0x00, 0x19, 0x05, 0x50];

        for bit in 0..8 {
            let mut corrupted = bytes;
            corrupted[4] ^= 1 << bit;

            let res = Frame::from_bits(&bits_for_bytes(&corrupted));
            assert_eq!(SensorErrorKind::Checksum, res.unwrap_err().kind());
        }
    }

    #[test]
    fn test_frame_rejects_wrong_pulse_count() {
        let mut bits = bits_for_bytes(&[0x32, 0x00, 0x19, 0x05, 0x50]);
        bits.truncate(39);

        let res = Frame::from_bits(&bits);
        assert_eq!(SensorErrorKind::Sequence, res.unwrap_err().kind());
    }

    #[test]
    fn test_frame_rejects_extra_pulses_with_long_leading_pulse() {
        // A count mismatch alone is enough for rejection, the leading pulse
        // reading as a long pulse does not rescue the capture.
        let mut bits = bits_for_bytes(&[0x32, 0x00, 0x19, 0x05, 0x50]);
        bits.push(0);

        assert_eq!(1, bits[0]);
        let res = Frame::from_bits(&bits);
        assert_eq!(SensorErrorKind::Sequence, res.unwrap_err().kind());
    }

    #[test]
    fn test_frame_rejects_short_leading_pulse() {
        let mut bits = bits_for_bytes(&[0x32, 0x00, 0x19, 0x05, 0x50]);
        bits[0] = 0;

        let res = Frame::from_bits(&bits);
        assert_eq!(SensorErrorKind::Sequence, res.unwrap_err().kind());
    }

    #[test]
    fn test_dht11_sensor_read_valid() {
        let pin = ScriptedDataPin::from_bytes([0x32, 0x00, 0x19, 0x05, 0x50]);
        let mut sensor = DHT11Sensor::from_pin(pin);
        let (t, h) = sensor.read().unwrap();

        assert_eq!(TemperatureCelsius::from(25.5), t);
        assert_eq!(Humidity::from(50.0), h);
    }

    #[test]
    fn test_dht11_sensor_read_invalid_checksum() {
        let pin = ScriptedDataPin::from_bytes([0x32, 0x00, 0x19, 0x05, 0x00]);
        let mut sensor = DHT11Sensor::from_pin(pin);
        let res = sensor.read();

        assert_eq!(SensorErrorKind::Checksum, res.unwrap_err().kind());
    }

    #[test]
    fn test_dht11_sensor_read_no_data() {
        let mut sensor = DHT11Sensor::from_pin(IdleDataPin);
        let res = sensor.read();

        assert_eq!(SensorErrorKind::NoData, res.unwrap_err().kind());
    }

    #[test]
    fn test_dht11_sensor_records_each_stage() {
        let sink = CountingSink::default();
        let events = sink.events();
        let pin = ScriptedDataPin::from_bytes([0x32, 0x00, 0x19, 0x05, 0x50]);
        let mut sensor = DHT11Sensor::from_pin(pin).with_trace_sink(sink);

        sensor.read().unwrap();
        assert_eq!(4, events.load(Ordering::SeqCst));
    }
}
