use crate::codec::{OutputFeature, SourceDataset};
use crate::dataset::parse_priority_code;
use crate::index::SpatialIndex;
use crate::matcher::{MatchParams, MatchResult};
use crate::Error;
use geo_types::LineString;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// Why a feature is missing from the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExclusionReason {
    NotPlowed,
    PrivateOwner,
    ShadowedByNoPlow,
    NoMatch,
    InvalidPriority,
    EmptyGeometry,
}

impl fmt::Display for ExclusionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = match self {
            ExclusionReason::NotPlowed => "not-plowed",
            ExclusionReason::PrivateOwner => "private-owner",
            ExclusionReason::ShadowedByNoPlow => "shadowed-by-no-plow",
            ExclusionReason::NoMatch => "no-match",
            ExclusionReason::InvalidPriority => "invalid-priority",
            ExclusionReason::EmptyGeometry => "empty-geometry",
        };
        f.write_str(code)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Emitted {
        priority: u8,
        source: SourceDataset,
        matched_object_id: Option<u64>,
        distance_m: Option<f64>,
    },
    Excluded {
        reason: ExclusionReason,
    },
}

/// One line of the audit log: what happened to an input feature.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Decision {
    pub dataset: SourceDataset,
    pub object_id: Option<u64>,
    pub title: String,
    #[serde(flatten)]
    pub outcome: Outcome,
}

impl Decision {
    pub fn excluded(dataset: SourceDataset, object_id: Option<u64>, title: &str, reason: ExclusionReason) -> Self {
        Decision {
            dataset,
            object_id,
            title: title.to_string(),
            outcome: Outcome::Excluded { reason },
        }
    }

    pub fn reason(&self) -> Option<ExclusionReason> {
        match self.outcome {
            Outcome::Excluded { reason } => Some(reason),
            Outcome::Emitted { .. } => None,
        }
    }
}

/// A bicycle route waiting for a priority.
#[derive(Debug, Clone, PartialEq)]
pub struct BikeRoute {
    /// Index of the feature in its input collection.
    pub position: usize,
    pub object_id: Option<u64>,
    pub line: LineString<f64>,
    pub not_plowed: bool,
    /// Separated from traffic: matched against travelways instead of ice routes.
    pub protected: bool,
    /// Declared level of service such as `PRI2`, used when nothing matches.
    pub fallback_code: Option<String>,
    pub title: String,
    /// The title was made up from the facility type, not a name.
    pub generic_title: bool,
}

/// How an unplowed travelway near a protected route excludes it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ShadowRule {
    /// Any unplowed travelway within range excludes the route.
    #[default]
    Any,
    /// Only an unplowed travelway closer than the best plowed match does.
    Closer,
}

impl FromStr for ShadowRule {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "any" => Ok(ShadowRule::Any),
            "closer" => Ok(ShadowRule::Closer),
            other => Err(Error::InvalidConfig(format!(
                "unknown shadow rule {:?}, expected \"any\" or \"closer\"",
                other
            ))),
        }
    }
}

/// Assigns priorities to bicycle routes from the reference indexes.
///
/// Missing indexes behave like indexes without any nearby line.
pub struct RoutePolicy<'a> {
    pub travelways: Option<&'a SpatialIndex>,
    pub no_plow: Option<&'a SpatialIndex>,
    pub ice: Option<&'a SpatialIndex>,
    /// Display titles of plowed travelways by object id.
    pub titles: &'a BTreeMap<u64, String>,
    pub params: MatchParams,
    pub shadow: ShadowRule,
}

fn lookup(index: Option<&SpatialIndex>, line: &LineString<f64>, params: &MatchParams) -> Option<MatchResult> {
    index.and_then(|index| index.nearest_match(line, params))
}

impl<'a> RoutePolicy<'a> {
    fn shadowed(&self, route: &BikeRoute, travelway: Option<&MatchResult>) -> bool {
        let no_plow = match lookup(self.no_plow, &route.line, &self.params.unbiased()) {
            Some(no_plow) => no_plow,
            None => return false,
        };
        match self.shadow {
            ShadowRule::Any => true,
            ShadowRule::Closer => travelway.map_or(true, |travelway| no_plow.distance < travelway.distance),
        }
    }

    fn resolve_title(&self, route: &BikeRoute, travelway_id: Option<u64>) -> String {
        if !route.generic_title {
            return route.title.clone();
        }
        let travelway_id = travelway_id.or_else(|| {
            lookup(self.travelways, &route.line, &self.params.unbiased()).and_then(|m| m.object_id)
        });
        travelway_id
            .and_then(|id| self.titles.get(&id))
            .cloned()
            .unwrap_or_else(|| route.title.clone())
    }

    pub fn evaluate(&self, route: &BikeRoute) -> (Option<OutputFeature>, Decision) {
        let excluded = |reason: ExclusionReason| -> (Option<OutputFeature>, Decision) {
            debug!(object_id = ?route.object_id, %reason, "bike route excluded");
            (
                None,
                Decision::excluded(SourceDataset::Bike, route.object_id, &route.title, reason),
            )
        };

        if route.not_plowed {
            return excluded(ExclusionReason::NotPlowed);
        }

        let matched = if route.protected {
            let travelway = lookup(self.travelways, &route.line, &self.params);
            if self.shadowed(route, travelway.as_ref()) {
                return excluded(ExclusionReason::ShadowedByNoPlow);
            }
            travelway.map(|m| (m, SourceDataset::Travelways))
        } else {
            lookup(self.ice, &route.line, &self.params).map(|m| (m, SourceDataset::Ice))
        };

        let (priority, source, matched_object_id, distance_m) = match matched {
            Some((m, source)) => (m.priority, source, m.object_id, Some(m.distance)),
            None => match route.fallback_code.as_deref().map(parse_priority_code) {
                Some(Some(priority)) => (priority, SourceDataset::Bike, None, None),
                Some(None) => return excluded(ExclusionReason::InvalidPriority),
                None => return excluded(ExclusionReason::NoMatch),
            },
        };

        let travelway_id = if source == SourceDataset::Travelways {
            matched_object_id
        } else {
            None
        };
        let title = self.resolve_title(route, travelway_id);
        debug!(object_id = ?route.object_id, priority, %source, "bike route emitted");

        let feature = OutputFeature {
            title: title.clone(),
            priority,
            source,
            line: route.line.clone(),
        };
        let decision = Decision {
            dataset: SourceDataset::Bike,
            object_id: route.object_id,
            title,
            outcome: Outcome::Emitted {
                priority,
                source,
                matched_object_id,
                distance_m,
            },
        };
        (Some(feature), decision)
    }
}
