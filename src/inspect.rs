use plow_priority::codec::{decode, decode_viewport};
use plow_priority::dataset::write_geojson;
use plow_priority::geometry::Bbox;
use plow_priority::init_logging;
use rstar::AABB;
use std::error::Error;
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use structopt::StructOpt;
use tracing::info;

fn parse_viewport(src: &str) -> Result<Bbox, String> {
    let parts = src
        .split(',')
        .map(|part| part.trim().parse::<f64>().map_err(|e| format!("{}: {}", part, e)))
        .collect::<Result<Vec<_>, _>>()?;
    match parts[..] {
        [min_lon, min_lat, max_lon, max_lat] if min_lon <= max_lon && min_lat <= max_lat => {
            Ok(AABB::from_corners([min_lon, min_lat], [max_lon, max_lat]))
        }
        _ => Err(format!(
            "viewport needs to be \"minlon,minlat,maxlon,maxlat\" with min <= max: {}",
            src
        )),
    }
}

#[derive(Debug, StructOpt)]
#[structopt(name = "inspect", about = "decode a feature file")]
pub struct Opt {
    /// feature file to decode
    #[structopt(short = "b", long = "bin")]
    pub bin: PathBuf,
    /// only keep segments intersecting minlon,minlat,maxlon,maxlat
    #[structopt(short, long, parse(try_from_str = parse_viewport))]
    pub viewport: Option<Bbox>,
    /// create a geojson file with the decoded features
    #[structopt(short, long)]
    pub geojson: Option<PathBuf>,
}

fn main() -> Result<(), Box<dyn Error>> {
    init_logging("warn")?;
    let opt = Opt::from_args();
    let reader = BufReader::new(File::open(&opt.bin)?);
    let decoded = match &opt.viewport {
        Some(viewport) => decode_viewport(reader, viewport)?,
        None => decode(reader)?,
    };
    info!(path = ?opt.bin, segments = decoded.segments.len(), "decoded");

    println!("base: {:.6},{:.6}", decoded.base.x, decoded.base.y);
    for (i, segment) in decoded.segments.iter().enumerate() {
        let [min_lon, min_lat] = segment.bounds.lower();
        let [max_lon, max_lat] = segment.bounds.upper();
        println!(
            "segment {}: [{:.6},{:.6},{:.6},{:.6}] {} features",
            i,
            min_lon,
            min_lat,
            max_lon,
            max_lat,
            segment.features.len()
        );
        for feature in &segment.features {
            println!(
                "  {:?} priority={} source={} coords={}",
                feature.title,
                feature.priority,
                feature.source,
                feature.line.0.len()
            );
        }
    }
    if let Some(path) = opt.geojson {
        write_geojson(&path, decoded.features())?;
    }
    Ok(())
}
