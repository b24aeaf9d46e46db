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

use crate::sensor::{Humidity, SensorError, TemperatureCelsius};
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;
use std::sync::atomic::AtomicU64;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Hash, PartialEq, Eq, EncodeLabelSet)]
struct ErrorsLabels {
    kind: String,
}

/// Collection of Prometheus metrics updated based on DHT11 sensor temperature
/// and humidity readings. Temperature in degrees celsius and relative humidity
/// will be emitted as gauges.
pub struct TemperatureMetrics {
    temperature: Gauge<f64, AtomicU64>,
    humidity: Gauge<f64, AtomicU64>,
    last_reading: Gauge<f64, AtomicU64>,
    collections: Counter,
    errors: Family<ErrorsLabels, Counter>,
}

impl TemperatureMetrics {
    pub fn new(reg: &mut Registry) -> Self {
        let temperature = Gauge::<f64, AtomicU64>::default();
        let humidity = Gauge::<f64, AtomicU64>::default();
        let last_reading = Gauge::<f64, AtomicU64>::default();
        let collections = Counter::default();
        let errors = Family::<ErrorsLabels, Counter>::default();

        reg.register(
            "dewpoint_temperature_degrees",
            "Temperature in celsius",
            temperature.clone(),
        );
        reg.register(
            "dewpoint_relative_humidity",
            "Relative humidity (0-100)",
            humidity.clone(),
        );
        reg.register(
            "dewpoint_last_read_timestamp",
            "Timestamp of last successful read",
            last_reading.clone(),
        );
        reg.register(
            "dewpoint_collections",
            "Number of attempted reads",
            collections.clone(),
        );
        reg.register(
            "dewpoint_errors",
            "Number of failed reads by type",
            errors.clone(),
        );

        Self {
            temperature,
            humidity,
            last_reading,
            collections,
            errors,
        }
    }

    pub fn update(&self, result: Result<(TemperatureCelsius, Humidity), SensorError>) {
        self.collections.inc();

        match result {
            Ok((temp, humidity)) => {
                self.temperature.set(temp.into());
                self.humidity.set(humidity.into());

                // If we can't get the number of seconds since the epoch, skip the update
                let _ = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map(|d| self.last_reading.set(d.as_secs_f64()));
            }
            Err(e) => {
                let labels = ErrorsLabels {
                    kind: e.kind().as_label().to_owned(),
                };

                self.errors.get_or_create(&labels).inc();
                tracing::error!(message = "unable to read sensor for metric collection", error = %e);
            }
        };
    }
}
