use chrono::{Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

pub const PROJECT_ID: &str = "project_id";
pub const DATASET_ID: &str = "dataset_id";
pub const START_DATE: &str = "start_date";
pub const END_DATE: &str = "end_date";

/// Date format of the daily `events_YYYYMMDD` shards.
pub const SHARD_DATE_FORMAT: &str = "%Y%m%d";

// The daily export lands about a day late, so yesterday is the newest complete shard.
const EXPORT_LAG_DAYS: i64 = 1;
const DEFAULT_WINDOW_START_DAYS: i64 = 8;

/// Start and end keys of the windows compared by period-over-period templates.
pub const PERIOD_RANGES: [(&str, &str); 2] = [
    ("period1_start", "period1_end"),
    ("period2_start", "period2_end"),
];

/// Raw `parameters` object from the model's tool call.
pub type ModelParameters = serde_json::Map<String, Value>;

/// Final placeholder values for one render.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterSet(BTreeMap<String, String>);

impl ParameterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ParameterSet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Project and dataset every query runs against. Never taken from the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionContext {
    pub project_id: String,
    pub dataset_id: String,
}

/// `(start_date, end_date)` used when the model gives no dates.
pub fn default_window(today: NaiveDate) -> (String, String) {
    let end = today - Duration::days(EXPORT_LAG_DAYS);
    let start = today - Duration::days(DEFAULT_WINDOW_START_DAYS);
    (
        start.format(SHARD_DATE_FORMAT).to_string(),
        end.format(SHARD_DATE_FORMAT).to_string(),
    )
}

pub struct ParameterResolver {
    context: ConnectionContext,
}

impl ParameterResolver {
    pub fn new(context: ConnectionContext) -> Self {
        Self { context }
    }

    pub fn context(&self) -> &ConnectionContext {
        &self.context
    }

    pub fn resolve(&self, extracted: &ModelParameters) -> ParameterSet {
        self.resolve_on(Utc::now().date_naive(), extracted)
    }

    /// Merges fixed context, model parameters and the default window as of `today`.
    ///
    /// Always succeeds. Whether the chosen template needs a given key is checked
    /// when it is rendered.
    pub fn resolve_on(&self, today: NaiveDate, extracted: &ModelParameters) -> ParameterSet {
        let (default_start, default_end) = default_window(today);
        let mut start = date_parameter(extracted, START_DATE).unwrap_or(default_start);
        let mut end = date_parameter(extracted, END_DATE).unwrap_or(default_end);
        order_range(&mut start, &mut end);

        let mut resolved = ParameterSet::new();
        resolved.insert(PROJECT_ID, self.context.project_id.as_str());
        resolved.insert(DATASET_ID, self.context.dataset_id.as_str());
        resolved.insert(START_DATE, start);
        resolved.insert(END_DATE, end);

        for (key, value) in extracted {
            if is_period_date(key) {
                continue;
            }
            match key.as_str() {
                START_DATE | END_DATE => {}
                PROJECT_ID | DATASET_ID => {
                    debug!(key = %key, "ignoring model-supplied connection parameter");
                }
                _ => {
                    if let Some(value) = scalar_string(value) {
                        resolved.insert(key.as_str(), value);
                    }
                }
            }
        }

        for (start_key, end_key) in PERIOD_RANGES {
            let start = date_parameter(extracted, start_key);
            let end = date_parameter(extracted, end_key);
            match (start, end) {
                (Some(mut start), Some(mut end)) => {
                    order_range(&mut start, &mut end);
                    resolved.insert(start_key, start);
                    resolved.insert(end_key, end);
                }
                (Some(start), None) => resolved.insert(start_key, start),
                (None, Some(end)) => resolved.insert(end_key, end),
                (None, None) => {}
            }
        }

        resolved
    }
}

fn is_period_date(key: &str) -> bool {
    PERIOD_RANGES
        .iter()
        .any(|(start, end)| key == *start || key == *end)
}

// Swaps a range whose bounds are both shard dates and out of order.
fn order_range(start: &mut String, end: &mut String) {
    if let (Some(s), Some(e)) = (parse_shard_date(start), parse_shard_date(end)) {
        if s > e {
            debug!(start = %start, end = %end, "swapping reversed date range");
            std::mem::swap(start, end);
        }
    }
}

fn date_parameter(extracted: &ModelParameters, key: &str) -> Option<String> {
    let raw = scalar_string(extracted.get(key)?)?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(normalize_date(trimmed))
}

/// Accepts `YYYYMMDD` or `YYYY-MM-DD`; anything else is passed on untouched.
pub fn normalize_date(raw: &str) -> String {
    if parse_shard_date(raw).is_some() {
        return raw.to_string();
    }
    match NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        Ok(date) => date.format(SHARD_DATE_FORMAT).to_string(),
        Err(_) => raw.to_string(),
    }
}

fn parse_shard_date(value: &str) -> Option<NaiveDate> {
    if value.len() != 8 || !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    NaiveDate::parse_from_str(value, SHARD_DATE_FORMAT).ok()
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn resolver() -> ParameterResolver {
        ParameterResolver::new(ConnectionContext {
            project_id: "acme-analytics".to_string(),
            dataset_id: "analytics_123456789".to_string(),
        })
    }

    fn model(value: Value) -> ModelParameters {
        value.as_object().cloned().unwrap_or_default()
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 10).unwrap()
    }

    #[test]
    fn default_window_ends_yesterday() {
        assert_eq!(
            default_window(today()),
            ("20240302".to_string(), "20240309".to_string())
        );
    }

    #[test]
    fn default_window_crosses_year_boundary() {
        let (start, end) = default_window(NaiveDate::from_ymd_opt(2024, 1, 3).unwrap());
        assert_eq!(start, "20231226");
        assert_eq!(end, "20240102");
        assert!(start < end);
    }

    #[test]
    fn missing_dates_fall_back_to_default_window() {
        let resolved = resolver().resolve_on(today(), &ModelParameters::new());

        assert_eq!(resolved.get(START_DATE), Some("20240302"));
        assert_eq!(resolved.get(END_DATE), Some("20240309"));
        assert_eq!(resolved.get(PROJECT_ID), Some("acme-analytics"));
        assert_eq!(resolved.get(DATASET_ID), Some("analytics_123456789"));
        assert_eq!(resolved.len(), 4);
    }

    #[test]
    fn empty_dates_count_as_missing() {
        let resolved = resolver().resolve_on(today(), &model(json!({"start_date": "", "end_date": null})));
        assert_eq!(resolved.get(START_DATE), Some("20240302"));
        assert_eq!(resolved.get(END_DATE), Some("20240309"));
    }

    #[test]
    fn model_dates_win_and_are_normalized() {
        let resolved = resolver().resolve_on(
            today(),
            &model(json!({"start_date": "2024-02-01", "end_date": "20240229"})),
        );
        assert_eq!(resolved.get(START_DATE), Some("20240201"));
        assert_eq!(resolved.get(END_DATE), Some("20240229"));
    }

    #[test]
    fn reversed_dates_are_swapped() {
        let resolved = resolver().resolve_on(
            today(),
            &model(json!({"start_date": "20240229", "end_date": "20240201"})),
        );
        assert_eq!(resolved.get(START_DATE), Some("20240201"));
        assert_eq!(resolved.get(END_DATE), Some("20240229"));
    }

    #[test]
    fn connection_context_cannot_be_overridden() {
        let resolved = resolver().resolve_on(
            today(),
            &model(json!({"project_id": "evil", "dataset_id": "other", "country_name": "France"})),
        );
        assert_eq!(resolved.get(PROJECT_ID), Some("acme-analytics"));
        assert_eq!(resolved.get(DATASET_ID), Some("analytics_123456789"));
        assert_eq!(resolved.get("country_name"), Some("France"));
    }

    #[test]
    fn extra_keys_are_copied_through() {
        let resolved = resolver().resolve_on(
            today(),
            &model(json!({"event_name": "purchase", "top_n": 10, "include_bots": false, "gone": null})),
        );
        assert_eq!(resolved.get("event_name"), Some("purchase"));
        assert_eq!(resolved.get("top_n"), Some("10"));
        assert_eq!(resolved.get("include_bots"), Some("false"));
        assert!(!resolved.contains_key("gone"));
    }

    #[test]
    fn comparison_periods_are_normalized_like_the_main_range() {
        let resolved = resolver().resolve_on(
            today(),
            &model(json!({
                "period1_start": "2024-02-01",
                "period1_end": "2024-02-07",
                "period2_start": "20240214",
                "period2_end": "2024-02-08",
                "period1_name": "Week 1",
            })),
        );
        assert_eq!(resolved.get("period1_start"), Some("20240201"));
        assert_eq!(resolved.get("period1_end"), Some("20240207"));
        assert_eq!(resolved.get("period2_start"), Some("20240208"));
        assert_eq!(resolved.get("period2_end"), Some("20240214"));
        assert_eq!(resolved.get("period1_name"), Some("Week 1"));
    }

    #[test]
    fn blank_comparison_dates_are_left_out() {
        let resolved = resolver().resolve_on(
            today(),
            &model(json!({"period1_start": " ", "period1_end": "2024-02-07"})),
        );
        assert!(!resolved.contains_key("period1_start"));
        assert_eq!(resolved.get("period1_end"), Some("20240207"));
    }

    #[test]
    fn unparseable_dates_pass_through() {
        assert_eq!(normalize_date("last week"), "last week");
        assert_eq!(normalize_date("2024-13-01"), "2024-13-01");
    }
}
