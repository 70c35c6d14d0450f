/// Source names that were officially renamed, keyed by their upper-case spelling.
const RENAMES: &[(&str, &str)] = &[("CORNWALLIS ST", "NORA BERNARD ST")];

/// Generic labels for bicycle facility type codes.
const FACILITY_LABELS: &[(&str, &str)] = &[
    ("PROTBL", "Protected Bike Lane"),
    ("BIKEPATH", "Bike Path"),
    ("MUP", "Multi-Use Path"),
    ("ONSTREET", "Bike Lane"),
    ("BL", "Bike Lane"),
    ("BUFBL", "Buffered Bike Lane"),
    ("LOCALSTREET", "Local Street Bikeway"),
    ("SHARROW", "Shared Lane"),
];

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

/// Turns an upper-case source name into a display title.
///
/// Applies the rename table, then capitalizes every word; words are split
/// on spaces, hyphens and slashes, which are kept.
pub fn normalize(raw: &str) -> String {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    let upper = collapsed.to_uppercase();
    let renamed = RENAMES
        .iter()
        .find(|(from, _)| *from == upper)
        .map(|(_, to)| to.to_string())
        .unwrap_or(collapsed);

    let mut title = String::with_capacity(renamed.len());
    let mut word = String::new();
    for c in renamed.chars() {
        if c == ' ' || c == '-' || c == '/' {
            title.push_str(&capitalize(&word));
            word.clear();
            title.push(c);
        } else {
            word.push(c);
        }
    }
    title.push_str(&capitalize(&word));
    title
}

/// Display label for a facility type code, used when a route has no name.
pub fn facility_label(code: Option<&str>) -> String {
    let code = code.map(str::trim).unwrap_or_default();
    let upper = code.to_uppercase();
    FACILITY_LABELS
        .iter()
        .find(|(known, _)| *known == upper)
        .map(|(_, label)| label.to_string())
        .unwrap_or_else(|| {
            if code.is_empty() {
                "Bike Route".to_string()
            } else {
                normalize(code)
            }
        })
}
