use smallvec::SmallVec;

/// Label pairs attached to a sample. Most series carry at most a couple
/// of labels, so the pairs live inline.
pub type GridPulseLabels = SmallVec<[(String, String); 8]>;

/// Reserved label name carrying the metric name inside a series key,
/// following the Prometheus convention.
pub const METRIC_NAME_LABEL: &str = "__name__";

pub trait GridPulseLabelsExt {
    fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self
    where
        Self: Sized;

    /// Value of a label, if present.
    fn get_value(&self, name: &str) -> Option<&str>;

    /// Canonical `name=value,...` rendering, sorted by label name.
    /// Equal strings denote the same label set.
    fn canonical_string(&self) -> String;
}

impl GridPulseLabelsExt for GridPulseLabels {
    fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        pairs
            .into_iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect()
    }

    fn get_value(&self, name: &str) -> Option<&str> {
        self.iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    fn canonical_string(&self) -> String {
        let mut parts: Vec<String> = self
            .iter()
            .filter(|(n, _)| n != METRIC_NAME_LABEL)
            .map(|(n, v)| format!("{}={}", n, v))
            .collect();
        parts.sort();
        parts.join(",")
    }
}

/// The unique identity of a series: metric name plus its full label set,
/// encoded as a sorted byte string. The NUL separator cannot appear in
/// label names or values admitted by the engine.
pub fn series_key(metric: &str, labels: &GridPulseLabels) -> String {
    let mut sorted: Vec<(&str, &str)> = labels
        .iter()
        .filter(|(n, _)| n != METRIC_NAME_LABEL)
        .map(|(n, v)| (n.as_str(), v.as_str()))
        .collect();
    sorted.sort();

    let mut key = String::with_capacity(metric.len() + 16 * sorted.len());
    key.push_str(METRIC_NAME_LABEL);
    key.push('\u{0}');
    key.push_str(metric);
    for (name, value) in sorted {
        key.push('\u{0}');
        key.push_str(name);
        key.push('\u{0}');
        key.push_str(value);
    }
    key
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;

    #[test]
    fn test_series_key_is_order_independent() {
        let a: GridPulseLabels = smallvec![
            ("site".to_string(), "load".to_string()),
            ("phase".to_string(), "1".to_string()),
        ];
        let b: GridPulseLabels = smallvec![
            ("phase".to_string(), "1".to_string()),
            ("site".to_string(), "load".to_string()),
        ];
        assert_eq!(series_key("voltage_volts", &a), series_key("voltage_volts", &b));
        assert_ne!(
            series_key("voltage_volts", &a),
            series_key("current_amps", &a)
        );
    }

    #[test]
    fn test_canonical_string_sorted() {
        let labels: GridPulseLabels = smallvec![
            ("type".to_string(), "actual".to_string()),
            ("index".to_string(), "0".to_string()),
        ];
        assert_eq!(labels.canonical_string(), "index=0,type=actual");
    }

    #[test]
    fn test_get_value() {
        let labels = GridPulseLabels::from_pairs([("site", "battery")]);
        assert_eq!(labels.get_value("site"), Some("battery"));
        assert_eq!(labels.get_value("phase"), None);
    }
}
