//! Reading source datasets from GeoJSON and writing decoded features back.
//!
//! Attribute keys follow the municipal open data schemas. Codes may arrive as
//! strings or numbers, so every attribute is read leniently and validated here
//! rather than inside the matcher.

use crate::codec::{OutputFeature, SourceDataset};
use crate::index::ReferenceLine;
use crate::policy::{BikeRoute, Decision, ExclusionReason, Outcome};
use crate::title;
use crate::{Error, Result};
use geo_types::{Coord, LineString};
use geojson::{Feature, FeatureCollection, GeoJson, Geometry, Value};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::map::Map;
use std::fs::write;
use std::path::Path;
use tracing::warn;

/// Facility types that are separated from traffic.
pub const PROTECTED_TYPES: &[&str] = &["PROTBL", "MUP", "BIKEPATH"];

fn lenient_string<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Option<String>, D::Error> {
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        Some(serde_json::Value::Bool(b)) => Some(b.to_string()),
        _ => None,
    })
}

fn lenient_id<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Option<u64>, D::Error> {
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(n)) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0 && *f >= 0.0).map(|f| f as u64)),
        Some(serde_json::Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

#[derive(Debug, Default, Clone, PartialEq, Deserialize)]
pub struct TravelwayAttributes {
    #[serde(rename = "OBJECTID", default, deserialize_with = "lenient_id")]
    pub object_id: Option<u64>,
    #[serde(rename = "WINT_PLOW", default, deserialize_with = "lenient_string")]
    pub plow: Option<String>,
    #[serde(rename = "WINT_LOS", default, deserialize_with = "lenient_string")]
    pub level_of_service: Option<String>,
    #[serde(rename = "OWNER", default, deserialize_with = "lenient_string")]
    pub owner: Option<String>,
    #[serde(rename = "LOCATION", default, deserialize_with = "lenient_string")]
    pub location: Option<String>,
}

#[derive(Debug, Default, Clone, PartialEq, Deserialize)]
pub struct IceRouteAttributes {
    #[serde(rename = "OBJECTID", default, deserialize_with = "lenient_id")]
    pub object_id: Option<u64>,
    #[serde(rename = "PRIORITY", default, deserialize_with = "lenient_string")]
    pub priority: Option<String>,
}

#[derive(Debug, Default, Clone, PartialEq, Deserialize)]
pub struct BikeRouteAttributes {
    #[serde(rename = "OBJECTID", default, deserialize_with = "lenient_id")]
    pub object_id: Option<u64>,
    #[serde(rename = "WINT_PLOW", default, deserialize_with = "lenient_string")]
    pub plow: Option<String>,
    #[serde(rename = "WINT_LOS", default, deserialize_with = "lenient_string")]
    pub level_of_service: Option<String>,
    #[serde(rename = "BIKETYPE", default, deserialize_with = "lenient_string")]
    pub bike_type: Option<String>,
    #[serde(rename = "PROT_TYPE", default, deserialize_with = "lenient_string")]
    pub protection: Option<String>,
    #[serde(rename = "BIKE_NAME", default, deserialize_with = "lenient_string")]
    pub name: Option<String>,
    #[serde(rename = "STREETNAME", default, deserialize_with = "lenient_string")]
    pub street_name: Option<String>,
}

fn is_no(flag: &Option<String>) -> bool {
    flag.as_deref().map_or(false, |f| f.eq_ignore_ascii_case("N"))
}

impl BikeRouteAttributes {
    pub fn is_protected(&self) -> bool {
        let has_protection = self
            .protection
            .as_deref()
            .map_or(false, |p| !p.eq_ignore_ascii_case("NONE"));
        let protected_type = self
            .bike_type
            .as_deref()
            .map_or(false, |t| PROTECTED_TYPES.iter().any(|p| p.eq_ignore_ascii_case(t)));
        has_protection || protected_type
    }
}

/// Parses `PRI1`..`PRI3` or a bare `1`..`3`.
pub fn parse_priority_code(code: &str) -> Option<u8> {
    let code = code.trim();
    let digits = match code.get(..3) {
        Some(prefix) if prefix.eq_ignore_ascii_case("PRI") => &code[3..],
        _ => code,
    };
    match digits.trim() {
        "1" => Some(1),
        "2" => Some(2),
        "3" => Some(3),
        _ => None,
    }
}

/// Why a feature's geometry could not be turned into a polyline.
#[derive(Debug, Clone, PartialEq)]
enum GeometryProblem {
    Empty,
    Unsupported(&'static str),
    Malformed(String),
}

fn value_name(value: &Value) -> &'static str {
    match value {
        Value::Point(_) => "Point",
        Value::MultiPoint(_) => "MultiPoint",
        Value::LineString(_) => "LineString",
        Value::MultiLineString(_) => "MultiLineString",
        Value::Polygon(_) => "Polygon",
        Value::MultiPolygon(_) => "MultiPolygon",
        Value::GeometryCollection(_) => "GeometryCollection",
    }
}

fn position(p: &[f64]) -> std::result::Result<Coord<f64>, GeometryProblem> {
    match p {
        [x, y, ..] if x.is_finite() && y.is_finite() => Ok(Coord { x: *x, y: *y }),
        _ => Err(GeometryProblem::Malformed(format!("bad position {:?}", p))),
    }
}

/// Flattens a (multi) line string into one polyline, parts in order.
fn polyline(geometry: Option<&Geometry>) -> std::result::Result<LineString<f64>, GeometryProblem> {
    let geometry = geometry.ok_or(GeometryProblem::Empty)?;
    let coords = match &geometry.value {
        Value::LineString(points) => points
            .iter()
            .map(|p| position(p))
            .collect::<std::result::Result<Vec<_>, _>>()?,
        Value::MultiLineString(parts) => parts
            .iter()
            .flatten()
            .map(|p| position(p))
            .collect::<std::result::Result<Vec<_>, _>>()?,
        other => return Err(GeometryProblem::Unsupported(value_name(other))),
    };
    if coords.is_empty() {
        return Err(GeometryProblem::Empty);
    }
    Ok(LineString::new(coords))
}

/// Geometry problems on reference lines abort the run; empty ones are skipped.
fn reference_polyline(
    dataset: SourceDataset,
    index: usize,
    geometry: Option<&Geometry>,
) -> Result<Option<LineString<f64>>> {
    match polyline(geometry) {
        Ok(line) => Ok(Some(line)),
        Err(GeometryProblem::Empty) => Ok(None),
        Err(GeometryProblem::Unsupported(kind)) => Err(Error::UnsupportedGeometry {
            dataset,
            index,
            kind: kind.to_string(),
        }),
        Err(GeometryProblem::Malformed(reason)) => Err(Error::InvalidGeometry { dataset, index, reason }),
    }
}

fn attributes<A: DeserializeOwned>(feature: &Feature) -> Result<A> {
    let properties = feature.properties.clone().unwrap_or_default();
    Ok(serde_json::from_value(serde_json::Value::Object(properties))?)
}

fn feature_collection(dataset: SourceDataset, src: &str) -> Result<FeatureCollection> {
    match src.parse::<GeoJson>()? {
        GeoJson::FeatureCollection(collection) => Ok(collection),
        _ => Err(Error::NotAFeatureCollection { dataset }),
    }
}

pub fn read_dataset(path: &Path) -> Result<String> {
    Ok(std::fs::read_to_string(path)?)
}

/// A plowed, publicly owned travelway with a valid priority.
#[derive(Debug, Clone, PartialEq)]
pub struct Travelway {
    pub object_id: Option<u64>,
    pub title: String,
    pub priority: u8,
    pub line: LineString<f64>,
}

#[derive(Debug, Default)]
pub struct TravelwaySet {
    pub plowed: Vec<Travelway>,
    /// Travelways marked as not plowed; they shadow protected bike routes.
    pub no_plow: Vec<ReferenceLine>,
    pub decisions: Vec<Decision>,
}

pub fn travelways_from_geojson(src: &str) -> Result<TravelwaySet> {
    let dataset = SourceDataset::Travelways;
    let collection = feature_collection(dataset, src)?;
    let mut set = TravelwaySet::default();

    for (index, feature) in collection.features.iter().enumerate() {
        let attrs: TravelwayAttributes = attributes(feature)?;
        let title = attrs.location.as_deref().map(title::normalize).unwrap_or_default();
        let excluded = |reason| Decision::excluded(dataset, attrs.object_id, &title, reason);

        let line = match reference_polyline(dataset, index, feature.geometry.as_ref())? {
            Some(line) => line,
            None => {
                set.decisions.push(excluded(ExclusionReason::EmptyGeometry));
                continue;
            }
        };
        let priority = attrs.level_of_service.as_deref().and_then(parse_priority_code);

        if is_no(&attrs.plow) {
            // lowest priority when undeclared; the no-plow index is queried without bias
            set.no_plow
                .push(ReferenceLine::new(line, priority.unwrap_or(3), attrs.object_id));
            set.decisions.push(excluded(ExclusionReason::NotPlowed));
            continue;
        }
        if attrs
            .owner
            .as_deref()
            .map_or(false, |owner| owner.eq_ignore_ascii_case("PRIV"))
        {
            set.decisions.push(excluded(ExclusionReason::PrivateOwner));
            continue;
        }
        let priority = match priority {
            Some(priority) => priority,
            None => {
                warn!(index, object_id = ?attrs.object_id, level_of_service = ?attrs.level_of_service, "travelway without valid priority");
                set.decisions.push(excluded(ExclusionReason::InvalidPriority));
                continue;
            }
        };

        set.decisions.push(Decision {
            dataset,
            object_id: attrs.object_id,
            title: title.clone(),
            outcome: Outcome::Emitted {
                priority,
                source: dataset,
                matched_object_id: None,
                distance_m: None,
            },
        });
        set.plowed.push(Travelway {
            object_id: attrs.object_id,
            title,
            priority,
            line,
        });
    }
    Ok(set)
}

#[derive(Debug, Default)]
pub struct IceRouteSet {
    pub lines: Vec<ReferenceLine>,
    pub decisions: Vec<Decision>,
}

pub fn ice_routes_from_geojson(src: &str) -> Result<IceRouteSet> {
    let dataset = SourceDataset::Ice;
    let collection = feature_collection(dataset, src)?;
    let mut set = IceRouteSet::default();

    for (index, feature) in collection.features.iter().enumerate() {
        let attrs: IceRouteAttributes = attributes(feature)?;
        let line = reference_polyline(dataset, index, feature.geometry.as_ref())?;
        let priority = attrs.priority.as_deref().and_then(parse_priority_code);
        match (line, priority) {
            (Some(line), Some(priority)) => set.lines.push(ReferenceLine::new(line, priority, attrs.object_id)),
            (None, _) => set.decisions.push(Decision::excluded(
                dataset,
                attrs.object_id,
                "",
                ExclusionReason::EmptyGeometry,
            )),
            (Some(_), None) => {
                warn!(index, object_id = ?attrs.object_id, priority = ?attrs.priority, "ice route without valid priority");
                set.decisions.push(Decision::excluded(
                    dataset,
                    attrs.object_id,
                    "",
                    ExclusionReason::InvalidPriority,
                ))
            }
        }
    }
    Ok(set)
}

#[derive(Debug, Default)]
pub struct BikeRouteSet {
    pub routes: Vec<BikeRoute>,
    /// Routes rejected while reading, with their position in the input.
    pub rejected: Vec<(usize, Decision)>,
}

pub fn bike_routes_from_geojson(src: &str) -> Result<BikeRouteSet> {
    let dataset = SourceDataset::Bike;
    let collection = feature_collection(dataset, src)?;
    let mut set = BikeRouteSet::default();

    for (index, feature) in collection.features.iter().enumerate() {
        let attrs: BikeRouteAttributes = attributes(feature)?;
        let (title, generic_title) = match attrs.name.as_ref().or(attrs.street_name.as_ref()) {
            Some(name) => (name.clone(), false),
            None => (title::facility_label(attrs.bike_type.as_deref()), true),
        };
        let line = match polyline(feature.geometry.as_ref()) {
            Ok(line) => line,
            Err(problem) => {
                warn!(index, object_id = ?attrs.object_id, ?problem, "skipping bike route geometry");
                let decision = Decision::excluded(dataset, attrs.object_id, &title, ExclusionReason::EmptyGeometry);
                set.rejected.push((index, decision));
                continue;
            }
        };
        set.routes.push(BikeRoute {
            position: index,
            object_id: attrs.object_id,
            line,
            not_plowed: is_no(&attrs.plow),
            protected: attrs.is_protected(),
            fallback_code: attrs.level_of_service.clone(),
            title,
            generic_title,
        });
    }
    Ok(set)
}

impl OutputFeature {
    pub fn to_feature(&self) -> Feature {
        let mut properties = Map::new();
        properties.insert("title".to_string(), self.title.clone().into());
        properties.insert("priority".to_string(), self.priority.into());
        properties.insert("source".to_string(), self.source.to_string().into());

        let value = Value::from(&self.line);
        let geometry = Geometry::new(value);

        Feature {
            bbox: None,
            geometry: Some(geometry),
            id: None,
            properties: Some(properties),
            foreign_members: None,
        }
    }
}

pub fn write_geojson<'a, I>(path: &Path, features: I) -> Result<()>
where
    I: IntoIterator<Item = &'a OutputFeature>,
{
    let features = features.into_iter().map(|feature| feature.to_feature()).collect();

    let feature_collection = FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    };

    write(path, feature_collection.to_string())?;
    Ok(())
}
