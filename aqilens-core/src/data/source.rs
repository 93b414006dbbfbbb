//! Dataset loading from CSV, JSON and JSONL files.
//!
//! Every format is reduced to a header list plus string cells and parsed by
//! one row parser, so column aliases, timestamp formats and row-level error
//! reporting behave the same regardless of the input format.

use crate::data::observation::{CityDataset, Observation};
use crate::error::ValidationError;
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

/// Columns a dataset must carry.
pub const REQUIRED_COLUMNS: [&str; 3] = ["city", "timestamp", "aqi"];

/// Supported dataset file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetFormat {
    Csv,
    Json,
    Jsonl,
}

impl DatasetFormat {
    pub fn from_path(path: &Path) -> Result<Self, ValidationError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "csv" | "txt" => Ok(Self::Csv),
            "json" => Ok(Self::Json),
            "jsonl" | "ndjson" => Ok(Self::Jsonl),
            other => Err(ValidationError::dataset(format!(
                "unsupported dataset format '{other}' for {}",
                path.display()
            ))),
        }
    }
}

/// A row that could not be turned into an [`Observation`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowError {
    /// 1-based data row number (the header is not counted).
    pub row: usize,
    pub message: String,
}

/// All observations of a run, grouped by city.
#[derive(Debug, Clone, Default)]
pub struct LoadedDataset {
    cities: BTreeMap<String, CityDataset>,
    row_errors: Vec<RowError>,
    rows_read: usize,
}

impl LoadedDataset {
    /// Group in-memory observations by city.
    pub fn from_observations(observations: Vec<Observation>) -> Result<Self, ValidationError> {
        if observations.is_empty() {
            return Err(ValidationError::EmptyDataset(
                "no observations supplied".to_string(),
            ));
        }
        let rows_read = observations.len();
        Ok(Self::group(observations, Vec::new(), rows_read))
    }

    fn group(observations: Vec<Observation>, row_errors: Vec<RowError>, rows_read: usize) -> Self {
        let mut by_city: BTreeMap<String, Vec<Observation>> = BTreeMap::new();
        for obs in observations {
            by_city.entry(obs.city.clone()).or_default().push(obs);
        }
        let cities = by_city
            .into_iter()
            .map(|(city, obs)| {
                let dataset = CityDataset::new(city.clone(), obs);
                (city, dataset)
            })
            .collect();
        Self {
            cities,
            row_errors,
            rows_read,
        }
    }

    /// Look up a city, ignoring ASCII case.
    pub fn city(&self, name: &str) -> Option<&CityDataset> {
        self.cities.get(name).or_else(|| {
            self.cities
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v)
        })
    }

    pub fn cities(&self) -> impl Iterator<Item = &CityDataset> {
        self.cities.values()
    }

    pub fn city_names(&self) -> Vec<String> {
        self.cities.keys().cloned().collect()
    }

    pub fn row_errors(&self) -> &[RowError] {
        &self.row_errors
    }

    pub fn rows_read(&self) -> usize {
        self.rows_read
    }

    pub fn total_observations(&self) -> usize {
        self.cities.values().map(CityDataset::len).sum()
    }
}

/// Load a dataset file, choosing the parser by extension.
pub fn load_dataset(path: &Path) -> Result<LoadedDataset, ValidationError> {
    let format = DatasetFormat::from_path(path)?;
    let file = File::open(path).map_err(|e| {
        ValidationError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to open dataset '{}': {e}", path.display()),
        ))
    })?;
    let dataset = match format {
        DatasetFormat::Csv => load_csv(file)?,
        DatasetFormat::Json => load_json(file)?,
        DatasetFormat::Jsonl => load_jsonl(BufReader::new(file))?,
    };
    tracing::info!(
        path = %path.display(),
        cities = dataset.cities.len(),
        observations = dataset.total_observations(),
        row_errors = dataset.row_errors.len(),
        "Loaded dataset"
    );
    Ok(dataset)
}

/// Parse CSV with a header row.
pub fn load_csv<R: Read>(reader: R) -> Result<LoadedDataset, ValidationError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);
    let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    let columns = ColumnMap::resolve(&headers)?;

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        rows.push(record.iter().map(str::to_string).collect::<Vec<_>>());
    }
    parse_rows(&columns, rows)
}

/// Parse a JSON array of objects.
pub fn load_json<R: Read>(reader: R) -> Result<LoadedDataset, ValidationError> {
    let value: serde_json::Value = serde_json::from_reader(reader)?;
    let items = match value {
        serde_json::Value::Array(items) => items,
        serde_json::Value::Object(_) => vec![value],
        _ => {
            return Err(ValidationError::dataset(
                "JSON dataset must be an array of objects",
            ));
        }
    };
    tabulate_json(items)
}

/// Parse one JSON object per line.
pub fn load_jsonl<R: BufRead>(reader: R) -> Result<LoadedDataset, ValidationError> {
    let mut items = Vec::new();
    for line in reader.lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        items.push(serde_json::from_str(line)?);
    }
    tabulate_json(items)
}

fn tabulate_json(items: Vec<serde_json::Value>) -> Result<LoadedDataset, ValidationError> {
    if items.is_empty() {
        return Err(ValidationError::EmptyDataset(
            "dataset contains no records".to_string(),
        ));
    }

    let mut headers: Vec<String> = Vec::new();
    let mut seen = HashSet::new();
    for item in &items {
        if let serde_json::Value::Object(map) = item {
            for key in map.keys() {
                if seen.insert(key.clone()) {
                    headers.push(key.clone());
                }
            }
        }
    }
    let columns = ColumnMap::resolve(&headers)?;

    let rows = items
        .iter()
        .map(|item| {
            headers
                .iter()
                .map(|h| match item.get(h) {
                    Some(serde_json::Value::String(s)) => s.clone(),
                    Some(serde_json::Value::Null) | None => String::new(),
                    Some(other) => other.to_string(),
                })
                .collect()
        })
        .collect();
    parse_rows(&columns, rows)
}

fn parse_rows(columns: &ColumnMap, rows: Vec<Vec<String>>) -> Result<LoadedDataset, ValidationError> {
    if rows.is_empty() {
        return Err(ValidationError::EmptyDataset(
            "dataset has a header but no rows".to_string(),
        ));
    }

    let rows_read = rows.len();
    let mut observations = Vec::with_capacity(rows_read);
    let mut row_errors = Vec::new();
    for (i, row) in rows.iter().enumerate() {
        match columns.parse(row) {
            Ok(obs) => observations.push(obs),
            Err(message) => row_errors.push(RowError { row: i + 1, message }),
        }
    }

    if observations.is_empty() {
        return Err(ValidationError::EmptyDataset(format!(
            "none of the {rows_read} rows could be parsed (first error: {})",
            row_errors
                .first()
                .map(|e| e.message.as_str())
                .unwrap_or("unknown")
        )));
    }
    if !row_errors.is_empty() {
        tracing::warn!(
            rejected = row_errors.len(),
            rows = rows_read,
            "Some dataset rows were rejected"
        );
    }

    Ok(LoadedDataset::group(observations, row_errors, rows_read))
}

/// Header positions of the known columns.
#[derive(Debug, Default)]
struct ColumnMap {
    city: usize,
    timestamp: usize,
    aqi: usize,
    pm25: Option<usize>,
    pm10: Option<usize>,
    no2: Option<usize>,
    so2: Option<usize>,
    co: Option<usize>,
    o3: Option<usize>,
    temperature: Option<usize>,
    humidity: Option<usize>,
    wind_speed: Option<usize>,
}

impl ColumnMap {
    fn resolve(headers: &[String]) -> Result<Self, ValidationError> {
        let normalized: Vec<String> = headers
            .iter()
            .map(|h| h.trim().trim_matches('"').to_ascii_lowercase())
            .collect();
        let find = |aliases: &[&str]| -> Option<usize> {
            normalized
                .iter()
                .position(|h| aliases.iter().any(|a| h == a))
        };

        let city = find(&["city", "city_name", "location"]);
        let timestamp = find(&["timestamp", "datetime", "date_time", "recorded_at", "date"]);
        let aqi = find(&["aqi", "aqi_value", "us_aqi"]);

        let mut missing = Vec::new();
        for (name, pos) in REQUIRED_COLUMNS.iter().zip([city, timestamp, aqi]) {
            if pos.is_none() {
                missing.push((*name).to_string());
            }
        }
        let (Some(city), Some(timestamp), Some(aqi)) = (city, timestamp, aqi) else {
            return Err(ValidationError::MissingColumns(missing));
        };

        Ok(Self {
            city,
            timestamp,
            aqi,
            pm25: find(&["pm25", "pm2_5", "pm2.5"]),
            pm10: find(&["pm10"]),
            no2: find(&["no2"]),
            so2: find(&["so2"]),
            co: find(&["co"]),
            o3: find(&["o3", "ozone"]),
            temperature: find(&["temperature", "temp"]),
            humidity: find(&["humidity", "relative_humidity"]),
            wind_speed: find(&["wind_speed", "windspeed", "wind"]),
        })
    }

    fn parse(&self, row: &[String]) -> Result<Observation, String> {
        let cell = |i: usize| row.get(i).map(|s| s.trim()).unwrap_or("");
        let optional = |pos: Option<usize>| pos.and_then(|i| parse_number(cell(i)));

        let city = cell(self.city);
        if city.is_empty() {
            return Err("missing city".to_string());
        }
        let timestamp = parse_timestamp(cell(self.timestamp))
            .ok_or_else(|| format!("unparseable timestamp '{}'", cell(self.timestamp)))?;
        let aqi = parse_number(cell(self.aqi))
            .ok_or_else(|| format!("invalid AQI '{}'", cell(self.aqi)))?;
        if aqi < 0.0 {
            return Err(format!("negative AQI {aqi}"));
        }

        Ok(Observation {
            city: city.to_string(),
            timestamp,
            aqi,
            pm25: optional(self.pm25),
            pm10: optional(self.pm10),
            no2: optional(self.no2),
            so2: optional(self.so2),
            co: optional(self.co),
            o3: optional(self.o3),
            temperature: optional(self.temperature),
            humidity: optional(self.humidity),
            wind_speed: optional(self.wind_speed),
        })
    }
}

fn parse_number(raw: &str) -> Option<f64> {
    match raw.to_ascii_lowercase().as_str() {
        "" | "na" | "n/a" | "nan" | "null" | "none" => None,
        s => s.parse::<f64>().ok().filter(|v| v.is_finite()),
    }
}

/// Parse the timestamp formats seen in collector exports. Naive values are UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    for fmt in [
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M:%S%.f",
    ] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|n| Utc.from_utc_datetime(&n));
    }
    raw.parse::<i64>()
        .ok()
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
}
