//! Heatmap scale derivation and colour bucketing

use crate::core::{CellData, CellStore, IntersectResult};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

/// Metric a heatmap is computed over
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
pub enum Metric {
    Size,
    Sample,
    RowPercentage,
    ColumnPercentage,
    Index,
}

impl Metric {
    pub fn value_of(&self, result: &IntersectResult) -> f64 {
        match self {
            Self::Size => result.size,
            Self::Sample => result.sample,
            Self::RowPercentage => result.row_percentage,
            Self::ColumnPercentage => result.column_percentage,
            Self::Index => result.index,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HeatmapScale {
    pub min: f64,
    pub max: f64,
    pub metric: Metric,
}

impl HeatmapScale {
    /// Scale used until there is data to measure
    pub fn fallback(metric: Metric) -> Self {
        Self {
            min: 0.0,
            max: 100.0,
            metric,
        }
    }
}

/// Discrete heatmap bucket. Reds sit below the midpoint, greens above.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
pub enum HeatmapColor {
    Red500,
    Red400,
    Red300,
    Red200,
    Red100,
    Green100,
    Green200,
    Green300,
    Green400,
    Green500,
    /// Outside the scale; no background override
    None,
}

impl HeatmapColor {
    /// Bucket position, low to high. `None` has no position.
    pub fn bucket(&self) -> Option<usize> {
        BUCKET_COLORS.iter().position(|c| c == self)
    }

    pub fn to_hex(&self) -> &'static str {
        match self {
            Self::Red500 => "#df535e",
            Self::Red400 => "#e6757e",
            Self::Red300 => "#ec989f",
            Self::Red200 => "#f2babf",
            Self::Red100 => "#f8dddf",
            Self::Green100 => "#def4f7",
            Self::Green200 => "#bceaf0",
            Self::Green300 => "#9be0e9",
            Self::Green400 => "#79d5e2",
            Self::Green500 => "#58cbda",
            Self::None => "",
        }
    }
}

const BUCKETS: usize = 10;

const BUCKET_COLORS: [HeatmapColor; BUCKETS] = [
    HeatmapColor::Red500,
    HeatmapColor::Red400,
    HeatmapColor::Red300,
    HeatmapColor::Red200,
    HeatmapColor::Red100,
    HeatmapColor::Green100,
    HeatmapColor::Green200,
    HeatmapColor::Green300,
    HeatmapColor::Green400,
    HeatmapColor::Green500,
];

/// Observed range of `metric` over every successful cell.
///
/// Non-finite values are ignored. With nothing to measure the fallback
/// `0..100` scale is returned.
pub fn calculate_heatmap_scale(cells: &CellStore, metric: Metric) -> HeatmapScale {
    let (min, max) = cells
        .values()
        .filter_map(|cell| match cell {
            CellData::Success(result) => Some(metric.value_of(result)),
            _ => None,
        })
        .filter(|v| v.is_finite())
        .fold(None, |range: Option<(f64, f64)>, v| match range {
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            None => Some((v, v)),
        })
        .unwrap_or((0.0, 100.0));

    HeatmapScale { min, max, metric }
}

pub fn get_heatmap_color(value: f64, scale: &HeatmapScale) -> HeatmapColor {
    if !value.is_finite() || value < scale.min || value > scale.max {
        return HeatmapColor::None;
    }

    let span = scale.max - scale.min;
    if span <= 0.0 {
        return HeatmapColor::Green500;
    }

    let normalized = (value - scale.min) / span;
    BUCKET_COLORS
        .iter()
        .enumerate()
        .find(|(i, _)| normalized < (i + 1) as f64 / BUCKETS as f64)
        .map(|(_, color)| *color)
        .unwrap_or(HeatmapColor::Green500)
}

pub fn color_to_hex(color: HeatmapColor) -> &'static str {
    color.to_hex()
}

/// Evenly spaced legend stops from `min` to `max` inclusive
pub fn legend(scale: &HeatmapScale) -> Vec<(f64, HeatmapColor)> {
    let step = (scale.max - scale.min) / BUCKETS as f64;
    (0..=BUCKETS)
        .map(|i| {
            let value = if i == BUCKETS {
                scale.max
            } else {
                scale.min + step * i as f64
            };
            (value, get_heatmap_color(value, scale))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::CellKey;
    use pretty_assertions::assert_eq;
    use std::str::FromStr;
    use strum::IntoEnumIterator;

    fn result(size: f64, index: f64) -> IntersectResult {
        IntersectResult {
            sample: 10.0,
            size,
            row_percentage: 50.0,
            column_percentage: 25.0,
            index,
        }
    }

    fn store(cells: Vec<(&str, CellData)>) -> CellStore {
        cells
            .into_iter()
            .map(|(row, data)| (CellKey::new(row, "c").cache_key(), data))
            .collect()
    }

    #[test]
    fn test_fallback_scale_without_success() {
        let cells = store(vec![
            ("a", CellData::Loading),
            ("b", CellData::Failure("boom".into())),
        ]);
        assert_eq!(
            calculate_heatmap_scale(&cells, Metric::Index),
            HeatmapScale {
                min: 0.0,
                max: 100.0,
                metric: Metric::Index
            }
        );
        assert_eq!(
            calculate_heatmap_scale(&CellStore::new(), Metric::Size),
            HeatmapScale::fallback(Metric::Size)
        );
    }

    #[test]
    fn test_scale_spans_observed_values() {
        let cells = store(vec![
            ("a", CellData::Success(result(200.0, -4.0))),
            ("b", CellData::Success(result(50.0, 130.0))),
            ("c", CellData::NotAsked),
        ]);
        let scale = calculate_heatmap_scale(&cells, Metric::Size);
        assert_eq!((scale.min, scale.max), (50.0, 200.0));

        let scale = calculate_heatmap_scale(&cells, Metric::Index);
        assert_eq!((scale.min, scale.max), (-4.0, 130.0));
    }

    #[test]
    fn test_non_finite_values_do_not_contribute() {
        let cells = store(vec![
            ("a", CellData::Success(result(f64::NAN, 1.0))),
            ("b", CellData::Success(result(f64::INFINITY, 2.0))),
            ("c", CellData::Success(result(7.0, 3.0))),
        ]);
        let scale = calculate_heatmap_scale(&cells, Metric::Size);
        assert_eq!((scale.min, scale.max), (7.0, 7.0));

        let only_nan = store(vec![("a", CellData::Success(result(f64::NAN, 1.0)))]);
        assert_eq!(
            calculate_heatmap_scale(&only_nan, Metric::Size),
            HeatmapScale::fallback(Metric::Size)
        );
    }

    #[test]
    fn test_color_buckets() {
        let scale = HeatmapScale::fallback(Metric::Size);
        assert_eq!(get_heatmap_color(0.0, &scale), HeatmapColor::Red500);
        assert_eq!(get_heatmap_color(9.99, &scale), HeatmapColor::Red500);
        assert_eq!(get_heatmap_color(10.0, &scale), HeatmapColor::Red400);
        assert_eq!(get_heatmap_color(49.0, &scale), HeatmapColor::Red100);
        assert_eq!(get_heatmap_color(50.0, &scale), HeatmapColor::Green100);
        assert_eq!(get_heatmap_color(95.0, &scale), HeatmapColor::Green500);
        assert_eq!(get_heatmap_color(100.0, &scale), HeatmapColor::Green500);
    }

    #[test]
    fn test_out_of_range_is_none() {
        let scale = HeatmapScale::fallback(Metric::Size);
        assert_eq!(get_heatmap_color(-0.1, &scale), HeatmapColor::None);
        assert_eq!(get_heatmap_color(100.1, &scale), HeatmapColor::None);
        assert_eq!(get_heatmap_color(f64::NAN, &scale), HeatmapColor::None);
        assert_eq!(color_to_hex(HeatmapColor::None), "");
    }

    #[test]
    fn test_buckets_are_monotonic() {
        let scale = HeatmapScale {
            min: -37.5,
            max: 212.0,
            metric: Metric::Index,
        };
        let mut previous = 0;
        let steps = 997;
        for i in 0..=steps {
            let value = scale.min + (scale.max - scale.min) * i as f64 / steps as f64;
            let bucket = get_heatmap_color(value, &scale).bucket().unwrap();
            assert!(bucket >= previous, "bucket dropped at {value}");
            previous = bucket;
        }
        assert_eq!(previous, 9);
    }

    #[test]
    fn test_degenerate_scale_maps_to_top_bucket() {
        let scale = HeatmapScale {
            min: 5.0,
            max: 5.0,
            metric: Metric::Sample,
        };
        assert_eq!(get_heatmap_color(5.0, &scale), HeatmapColor::Green500);
        assert_eq!(get_heatmap_color(5.1, &scale), HeatmapColor::None);
    }

    #[test]
    fn test_hex_lookup() {
        assert_eq!(color_to_hex(HeatmapColor::Red500), "#df535e");
        assert_eq!(color_to_hex(HeatmapColor::Green500), "#58cbda");
        assert_eq!(HeatmapColor::None.bucket(), None);
        assert_eq!(HeatmapColor::Green100.bucket(), Some(5));
    }

    #[test]
    fn test_legend_has_eleven_stops() {
        let stops = legend(&HeatmapScale::fallback(Metric::Size));
        assert_eq!(stops.len(), 11);
        assert_eq!(stops[0], (0.0, HeatmapColor::Red500));
        assert_eq!(stops[10], (100.0, HeatmapColor::Green500));
    }

    #[test]
    fn test_metric_parses_from_name() {
        assert_eq!(Metric::from_str("RowPercentage").unwrap(), Metric::RowPercentage);
        assert_eq!(Metric::ColumnPercentage.to_string(), "ColumnPercentage");
        assert!(Metric::from_str("Bogus").is_err());
        assert_eq!(Metric::iter().count(), 5);
    }
}
