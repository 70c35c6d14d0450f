use plow_priority::{init_logging, run, MatchConfig, RunConfig, ShadowRule};
use std::path::PathBuf;
use structopt::StructOpt;
use tracing::info;

#[derive(Debug, StructOpt)]
#[structopt(name = "features", about = "assign winter priorities to bike routes and write feature files")]
pub struct Opt {
    /// travelways geojson path
    #[structopt(long = "travelways", env = "TRAVELWAYS_FILE", default_value = "travelways.geojson")]
    pub travelways_file: PathBuf,
    /// bike routes geojson path
    #[structopt(long = "bike", env = "BIKE_FILE", default_value = "bike.geojson")]
    pub bike_file: PathBuf,
    /// ice routes geojson path
    #[structopt(long = "ice", env = "ICE_FILE", default_value = "ice.geojson")]
    pub ice_file: PathBuf,
    /// travelways output
    #[structopt(long, env = "TRAVELWAYS_OUT", default_value = "features.bin")]
    pub travelways_out: PathBuf,
    /// bike routes output
    #[structopt(long, env = "BIKE_OUT", default_value = "features_cycling.bin")]
    pub bike_out: PathBuf,
    /// write one json decision per input feature
    #[structopt(long, env = "DECISIONS_OUT")]
    pub decisions_out: Option<PathBuf>,
    /// write the clearing schedule, needs --storm-end
    #[structopt(long, env = "PRIORITIES_OUT")]
    pub priorities_out: Option<PathBuf>,
    /// local end of the storm, e.g. 2025-02-03T07:00:00
    #[structopt(long, env = "STORM_END")]
    pub storm_end: Option<String>,
    #[structopt(long, env = "MAX_MATCH_METERS", default_value = "30")]
    pub max_match_meters: f64,
    /// per segment bearing limit, 0 disables
    #[structopt(long, env = "MAX_ANGLE_DEG", default_value = "30")]
    pub max_angle_deg: f64,
    /// whole line bearing limit, 0 disables
    #[structopt(long, env = "MAX_OVERALL_ANGLE_DEG", default_value = "60")]
    pub max_overall_angle_deg: f64,
    /// slack in meters within which a higher priority line wins
    #[structopt(long, env = "PRIORITY_BIAS_METERS", default_value = "1")]
    pub priority_bias_meters: f64,
    #[structopt(long, env = "GRID_COLS", default_value = "64")]
    pub grid_cols: usize,
    #[structopt(long, env = "GRID_ROWS", default_value = "64")]
    pub grid_rows: usize,
    /// "any" or "closer"
    #[structopt(long = "shadow-rule", env = "SHADOW_RULE", default_value = "any")]
    pub shadow: ShadowRule,
}

impl From<Opt> for RunConfig {
    fn from(opt: Opt) -> Self {
        RunConfig {
            travelways_file: opt.travelways_file,
            bike_file: opt.bike_file,
            ice_file: opt.ice_file,
            travelways_out: opt.travelways_out,
            bike_out: opt.bike_out,
            decisions_out: opt.decisions_out,
            priorities_out: opt.priorities_out,
            storm_end: opt.storm_end,
            matching: MatchConfig {
                max_match_meters: opt.max_match_meters,
                max_angle_deg: opt.max_angle_deg,
                max_overall_angle_deg: opt.max_overall_angle_deg,
                priority_bias_meters: opt.priority_bias_meters,
            },
            grid_cols: opt.grid_cols,
            grid_rows: opt.grid_rows,
            shadow: opt.shadow,
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging("info")?;
    let config: RunConfig = Opt::from_args().into();
    let summary = run(&config)?;
    info!(
        travelways = summary.travelways_written,
        bike_routes = summary.bike_routes_written,
        "done"
    );
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
