use plow_priority::codec::{decode, OutputFeature, SourceDataset};
use plow_priority::{run, RunConfig, RunSummary};
use serde_json::{json, Value};
use std::fs::{self, File};
use std::path::{Path, PathBuf};

fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("plow-priority-{}-{}", name, std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).expect("failed to create scratch dir");
    dir
}

fn line(properties: Value, coordinates: Value) -> Value {
    json!({
        "type": "Feature",
        "properties": properties,
        "geometry": { "type": "LineString", "coordinates": coordinates },
    })
}

fn collection(features: Vec<Value>) -> String {
    json!({ "type": "FeatureCollection", "features": features }).to_string()
}

/// A plowed street far from everything else, so the travelways file is never empty.
fn baseline_travelway() -> Value {
    line(
        json!({"OBJECTID": 100, "WINT_PLOW": "Y", "WINT_LOS": "PRI3", "OWNER": "HRM", "LOCATION": "FAR AWAY RD"}),
        json!([[20, 20], [20.001, 20]]),
    )
}

/// A bike route with a declared priority far from everything else.
fn baseline_bike() -> Value {
    line(
        json!({"OBJECTID": 999, "WINT_PLOW": "Y", "WINT_LOS": "PRI3", "BIKETYPE": "ONSTREET", "BIKE_NAME": "Baseline"}),
        json!([[10, 10], [10.001, 10]]),
    )
}

fn run_with(name: &str, travelways: Vec<Value>, bike: Vec<Value>, ice: Vec<Value>) -> (PathBuf, RunSummary) {
    let dir = scratch_dir(name);
    let config = RunConfig {
        travelways_file: dir.join("travelways.geojson"),
        bike_file: dir.join("bike.geojson"),
        ice_file: dir.join("ice.geojson"),
        travelways_out: dir.join("features.bin"),
        bike_out: dir.join("features_cycling.bin"),
        decisions_out: Some(dir.join("decisions.jsonl")),
        ..RunConfig::default()
    };
    fs::write(&config.travelways_file, collection(travelways)).expect("failed to write travelways");
    fs::write(&config.bike_file, collection(bike)).expect("failed to write bike routes");
    fs::write(&config.ice_file, collection(ice)).expect("failed to write ice routes");

    let summary = run(&config).expect("run failed");
    (dir, summary)
}

fn read_features(path: PathBuf) -> Vec<OutputFeature> {
    let file = File::open(path).expect("failed to open output");
    let decoded = decode(file).expect("failed to decode output");
    decoded.features().cloned().collect()
}

fn read_decisions(dir: &Path) -> Vec<Value> {
    fs::read_to_string(dir.join("decisions.jsonl"))
        .expect("failed to read decisions")
        .lines()
        .map(|line| serde_json::from_str(line).expect("invalid decision line"))
        .collect()
}

fn remove_scratch_dir(dir: &Path) {
    fs::remove_dir_all(dir).expect("failed to remove scratch dir");
}

fn find<'a>(features: &'a [OutputFeature], title: &str) -> Option<&'a OutputFeature> {
    features.iter().find(|feature| feature.title == title)
}

#[test]
fn protected_route_next_to_unplowed_street_is_dropped() {
    // Arrange
    let travelways = vec![
        baseline_travelway(),
        line(
            json!({"OBJECTID": 1, "WINT_PLOW": "Y", "WINT_LOS": "PRI1", "OWNER": "HRM", "LOCATION": "PLOWED ST"}),
            json!([[0, 0.0001], [0.001, 0.0001]]),
        ),
        line(
            json!({"OBJECTID": 2, "WINT_PLOW": "N", "WINT_LOS": "PRI1", "OWNER": "HRM", "LOCATION": "UNPLOWED ST"}),
            json!([[0, 0.00005], [0.001, 0.00005]]),
        ),
    ];
    let bike = vec![
        baseline_bike(),
        line(
            json!({"OBJECTID": 10, "WINT_PLOW": "Y", "BIKETYPE": "PROTBL", "PROT_TYPE": "CURB", "BIKE_NAME": "Test Protected"}),
            json!([[0, 0], [0.001, 0]]),
        ),
    ];

    // Act
    let (dir, summary) = run_with("shadow", travelways, bike, vec![]);

    // Assert
    let features = read_features(dir.join("features_cycling.bin"));
    assert!(find(&features, "Test Protected").is_none());
    assert!(find(&features, "Baseline").is_some());
    assert_eq!(summary.excluded["shadowed-by-no-plow"], 1);

    let decisions = read_decisions(&dir);
    let protected = decisions
        .iter()
        .find(|d| d["dataset"] == "bike" && d["object_id"] == 10)
        .expect("missing decision");
    assert_eq!(protected["outcome"], "excluded");
    assert_eq!(protected["reason"], "shadowed-by-no-plow");

    remove_scratch_dir(&dir);
}

#[test]
fn unprotected_route_takes_ice_route_priority() {
    // Arrange
    let bike = vec![line(
        json!({"OBJECTID": 11, "WINT_PLOW": "Y", "BIKETYPE": "ONSTREET", "BIKE_NAME": "Test Ice"}),
        json!([[0, 0], [0.001, 0]]),
    )];
    let ice = vec![line(json!({"OBJECTID": 50, "PRIORITY": "2"}), json!([[0, 0.0001], [0.001, 0.0001]]))];

    // Act
    let (dir, summary) = run_with("ice", vec![baseline_travelway()], bike, ice);

    // Assert
    let features = read_features(dir.join("features_cycling.bin"));
    let feature = find(&features, "Test Ice").expect("bike route missing");
    assert_eq!(feature.priority, 2);
    assert_eq!(feature.source, SourceDataset::Ice);
    assert_eq!(summary.bike_by_source["ice"], 1);

    remove_scratch_dir(&dir);
}

#[test]
fn declared_level_of_service_is_the_fallback() {
    // Arrange
    let bike = vec![line(
        json!({"OBJECTID": 12, "WINT_PLOW": "Y", "WINT_LOS": "PRI2", "BIKETYPE": "ONSTREET", "BIKE_NAME": "Test Fallback"}),
        json!([[0, 0], [0.001, 0]]),
    )];

    // Act
    let (dir, _) = run_with("fallback", vec![baseline_travelway()], bike, vec![]);

    // Assert
    let features = read_features(dir.join("features_cycling.bin"));
    let feature = find(&features, "Test Fallback").expect("bike route missing");
    assert_eq!(feature.priority, 2);
    assert_eq!(feature.source, SourceDataset::Bike);

    remove_scratch_dir(&dir);
}

#[test]
fn route_without_match_or_code_is_dropped() {
    // Arrange
    let bike = vec![
        baseline_bike(),
        line(
            json!({"OBJECTID": 13, "WINT_PLOW": "Y", "BIKETYPE": "ONSTREET", "BIKE_NAME": "Test Lonely"}),
            json!([[0, 0], [0.001, 0]]),
        ),
    ];

    // Act
    let (dir, summary) = run_with("no-match", vec![baseline_travelway()], bike, vec![]);

    // Assert
    let features = read_features(dir.join("features_cycling.bin"));
    assert!(find(&features, "Test Lonely").is_none());
    assert_eq!(summary.bike_routes_written, 1);
    assert_eq!(summary.excluded["no-match"], 1);

    remove_scratch_dir(&dir);
}

#[test]
fn travelways_file_keeps_plowed_public_streets() {
    // Arrange
    let travelways = vec![
        line(
            json!({"OBJECTID": 1, "WINT_PLOW": "Y", "WINT_LOS": "PRI2", "OWNER": "HRM", "LOCATION": "CORNWALLIS ST"}),
            json!([[0, 0], [0.001, 0]]),
        ),
        line(
            json!({"OBJECTID": 2, "WINT_PLOW": "N", "WINT_LOS": "PRI1", "OWNER": "HRM", "LOCATION": "Not Plowed"}),
            json!([[1, 1], [1.001, 1]]),
        ),
        line(
            json!({"OBJECTID": 3, "WINT_PLOW": "Y", "WINT_LOS": "PRI1", "OWNER": "PRIV", "LOCATION": "Private Way"}),
            json!([[2, 2], [2.001, 2]]),
        ),
        line(
            json!({"OBJECTID": 4, "WINT_PLOW": "Y", "WINT_LOS": "PRI5", "OWNER": "HRM", "LOCATION": "Bad Priority"}),
            json!([[3, 3], [3.001, 3]]),
        ),
    ];

    // Act
    let (dir, summary) = run_with("travelways", travelways, vec![baseline_bike()], vec![]);

    // Assert
    let features = read_features(dir.join("features.bin"));
    assert_eq!(features.len(), 1);
    assert_eq!(features[0].title, "Nora Bernard St");
    assert_eq!(features[0].priority, 2);
    assert_eq!(features[0].source, SourceDataset::Travelways);
    assert!((features[0].line.0[1].x - 0.001).abs() < 1e-6);

    assert_eq!(summary.excluded["not-plowed"], 1);
    assert_eq!(summary.excluded["private-owner"], 1);
    assert_eq!(summary.excluded["invalid-priority"], 1);

    remove_scratch_dir(&dir);
}

#[test]
fn identical_inputs_give_identical_bytes() {
    // Arrange
    let travelways = || {
        vec![
            baseline_travelway(),
            line(
                json!({"OBJECTID": 1, "WINT_PLOW": "Y", "WINT_LOS": "PRI1", "LOCATION": "BARRINGTON ST"}),
                json!([[0, 0.0001], [0.001, 0.0001]]),
            ),
        ]
    };
    let bike = || {
        vec![
            baseline_bike(),
            line(
                json!({"OBJECTID": 14, "BIKETYPE": "PROTBL", "PROT_TYPE": "CURB"}),
                json!([[0, 0], [0.001, 0]]),
            ),
        ]
    };

    // Act
    let (first, _) = run_with("determinism-a", travelways(), bike(), vec![]);
    let (second, _) = run_with("determinism-b", travelways(), bike(), vec![]);

    // Assert
    for file in &["features.bin", "features_cycling.bin", "decisions.jsonl"] {
        let a = fs::read(first.join(file)).expect("failed to read first run");
        let b = fs::read(second.join(file)).expect("failed to read second run");
        assert_eq!(a, b, "{} differs between runs", file);
    }
    let features = read_features(first.join("features_cycling.bin"));
    assert!(find(&features, "Barrington St").is_some());

    remove_scratch_dir(&first);
    remove_scratch_dir(&second);
}

#[test]
fn writes_the_priority_schedule() {
    // Arrange
    let dir = scratch_dir("priorities");
    let travelways_file = dir.join("travelways.geojson");
    let bike_file = dir.join("bike.geojson");
    let ice_file = dir.join("ice.geojson");
    fs::write(&travelways_file, collection(vec![baseline_travelway()])).unwrap();
    fs::write(&bike_file, collection(vec![baseline_bike()])).unwrap();
    fs::write(&ice_file, collection(vec![])).unwrap();
    let config = RunConfig {
        travelways_file,
        bike_file,
        ice_file,
        travelways_out: dir.join("features.bin"),
        bike_out: dir.join("features_cycling.bin"),
        priorities_out: Some(dir.join("priorities.json")),
        storm_end: Some("2025-02-03T07:00:00".to_string()),
        ..RunConfig::default()
    };

    // Act
    run(&config).expect("run failed");

    // Assert
    let text = fs::read_to_string(dir.join("priorities.json")).unwrap();
    let schedule: Value = serde_json::from_str(&text).unwrap();
    assert_eq!(schedule["1"]["timeline"], "12 hours");
    assert_eq!(schedule["1"]["deadline"], "Mon 7:00 PM");
    assert_eq!(schedule["3"]["deadline"], "Tue 7:00 PM");

    remove_scratch_dir(&dir);
}
