//! The batch run: load the datasets, index them, prioritize bike routes and
//! write the feature files.

use crate::codec::{self, OutputFeature, SourceDataset};
use crate::dataset::{self, BikeRouteSet, IceRouteSet, TravelwaySet};
use crate::index::{ReferenceLine, SpatialIndex};
use crate::matcher::MatchConfig;
use crate::policy::{Decision, RoutePolicy, ShadowRule};
use crate::schedule::{self, PrioritySchedule};
use crate::{Error, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::write;
use std::path::{Path, PathBuf};
use tracing::{info, instrument, warn};

pub const DEFAULT_GRID: usize = 64;

#[derive(Debug, Clone)]
pub struct RunConfig {
    pub travelways_file: PathBuf,
    pub bike_file: PathBuf,
    pub ice_file: PathBuf,
    pub travelways_out: PathBuf,
    pub bike_out: PathBuf,
    /// JSON lines, one decision per source feature.
    pub decisions_out: Option<PathBuf>,
    pub priorities_out: Option<PathBuf>,
    /// Local time the storm ended, required for `priorities_out`.
    pub storm_end: Option<String>,
    pub matching: MatchConfig,
    pub grid_cols: usize,
    pub grid_rows: usize,
    pub shadow: ShadowRule,
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            travelways_file: "travelways.geojson".into(),
            bike_file: "bike.geojson".into(),
            ice_file: "ice.geojson".into(),
            travelways_out: "features.bin".into(),
            bike_out: "features_cycling.bin".into(),
            decisions_out: None,
            priorities_out: None,
            storm_end: None,
            matching: MatchConfig::default(),
            grid_cols: DEFAULT_GRID,
            grid_rows: DEFAULT_GRID,
            shadow: ShadowRule::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub travelways_written: usize,
    pub bike_routes_written: usize,
    /// Exclusions per reason code, across all datasets.
    pub excluded: BTreeMap<String, usize>,
    pub bike_by_source: BTreeMap<String, usize>,
}

/// Everything a run produces before it touches the filesystem.
#[derive(Debug, Default)]
pub struct Output {
    pub travelways: Vec<OutputFeature>,
    pub bike_routes: Vec<OutputFeature>,
    pub decisions: Vec<Decision>,
}

impl Output {
    pub fn summary(&self) -> RunSummary {
        let mut summary = RunSummary {
            travelways_written: self.travelways.len(),
            bike_routes_written: self.bike_routes.len(),
            ..RunSummary::default()
        };
        for decision in &self.decisions {
            if let Some(reason) = decision.reason() {
                *summary.excluded.entry(reason.to_string()).or_default() += 1;
            }
        }
        for feature in &self.bike_routes {
            *summary.bike_by_source.entry(feature.source.to_string()).or_default() += 1;
        }
        summary
    }
}

fn build_index(name: &str, lines: Vec<ReferenceLine>, config: &RunConfig) -> Result<Option<SpatialIndex>> {
    if lines.is_empty() {
        warn!(index = name, "no reference lines, skipping index");
        return Ok(None);
    }
    let index = SpatialIndex::new(lines, config.grid_cols, config.grid_rows)?;
    info!(index = name, lines = index.len(), "index built");
    Ok(Some(index))
}

/// Prioritizes the parsed datasets in memory.
#[instrument(skip_all)]
pub fn process(
    travelways: TravelwaySet,
    bike_routes: BikeRouteSet,
    ice_routes: IceRouteSet,
    config: &RunConfig,
) -> Result<Output> {
    let params = config.matching.validate()?;
    if config.grid_cols == 0 || config.grid_rows == 0 {
        return Err(Error::InvalidConfig(format!(
            "index grid must be at least 1x1, got {}x{}",
            config.grid_cols, config.grid_rows
        )));
    }

    let TravelwaySet {
        plowed,
        no_plow,
        decisions: travelway_decisions,
    } = travelways;

    let mut titles = BTreeMap::new();
    let mut reference = Vec::with_capacity(plowed.len());
    let mut travelway_features = Vec::with_capacity(plowed.len());
    for travelway in plowed {
        if let Some(id) = travelway.object_id {
            titles.entry(id).or_insert_with(|| travelway.title.clone());
        }
        reference.push(ReferenceLine::new(
            travelway.line.clone(),
            travelway.priority,
            travelway.object_id,
        ));
        travelway_features.push(OutputFeature {
            title: travelway.title,
            priority: travelway.priority,
            source: SourceDataset::Travelways,
            line: travelway.line,
        });
    }

    let travelway_index = build_index("travelways", reference, config)?;
    let no_plow_index = build_index("no-plow", no_plow, config)?;
    let ice_index = build_index("ice", ice_routes.lines, config)?;

    let policy = RoutePolicy {
        travelways: travelway_index.as_ref(),
        no_plow: no_plow_index.as_ref(),
        ice: ice_index.as_ref(),
        titles: &titles,
        params,
        shadow: config.shadow,
    };

    let mut decisions = travelway_decisions;
    decisions.extend(ice_routes.decisions);

    let mut bike_features = Vec::new();
    let mut bike_decisions = bike_routes.rejected;
    for route in &bike_routes.routes {
        let (feature, decision) = policy.evaluate(route);
        bike_features.extend(feature);
        bike_decisions.push((route.position, decision));
    }
    bike_decisions.sort_by_key(|(position, _)| *position);
    decisions.extend(bike_decisions.into_iter().map(|(_, decision)| decision));

    Ok(Output {
        travelways: travelway_features,
        bike_routes: bike_features,
        decisions,
    })
}

fn write_decisions(path: &Path, decisions: &[Decision]) -> Result<()> {
    let mut out = String::new();
    for decision in decisions {
        out.push_str(&serde_json::to_string(decision)?);
        out.push('\n');
    }
    write(path, out)?;
    Ok(())
}

fn write_priorities(path: &Path, storm_end: Option<&str>) -> Result<()> {
    let storm_end = storm_end.ok_or_else(|| {
        Error::InvalidConfig("a storm end time is required to write priorities".to_string())
    })?;
    let schedule = PrioritySchedule::from_storm_end(schedule::parse_storm_end(storm_end)?)?;
    write(path, serde_json::to_string_pretty(&schedule)?)?;
    Ok(())
}

/// Runs the whole batch and writes every requested file.
///
/// Both feature files are encoded before either is written, so a capacity
/// error leaves no partial output behind.
#[instrument(skip(config), fields(travelways = ?config.travelways_file, bike = ?config.bike_file, ice = ?config.ice_file))]
pub fn run(config: &RunConfig) -> Result<RunSummary> {
    let travelways = dataset::travelways_from_geojson(&dataset::read_dataset(&config.travelways_file)?)?;
    info!(
        plowed = travelways.plowed.len(),
        no_plow = travelways.no_plow.len(),
        "travelways loaded"
    );
    let ice_routes = dataset::ice_routes_from_geojson(&dataset::read_dataset(&config.ice_file)?)?;
    info!(lines = ice_routes.lines.len(), "ice routes loaded");
    let bike_routes = dataset::bike_routes_from_geojson(&dataset::read_dataset(&config.bike_file)?)?;
    info!(routes = bike_routes.routes.len(), "bike routes loaded");

    let output = process(travelways, bike_routes, ice_routes, config)?;

    let travelways_bytes = codec::encode_to_vec(&output.travelways)?;
    let bike_bytes = codec::encode_to_vec(&output.bike_routes)?;
    write(&config.travelways_out, &travelways_bytes)?;
    info!(path = ?config.travelways_out, features = output.travelways.len(), bytes = travelways_bytes.len(), "travelways written");
    write(&config.bike_out, &bike_bytes)?;
    info!(path = ?config.bike_out, features = output.bike_routes.len(), bytes = bike_bytes.len(), "bike routes written");

    if let Some(path) = &config.decisions_out {
        write_decisions(path, &output.decisions)?;
        info!(path = ?path, decisions = output.decisions.len(), "decision log written");
    }
    if let Some(path) = &config.priorities_out {
        write_priorities(path, config.storm_end.as_deref())?;
        info!(path = ?path, "priorities written");
    }

    let summary = output.summary();
    info!(?summary, "run complete");
    Ok(summary)
}
