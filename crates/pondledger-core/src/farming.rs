// Pond KPIs derived from the activity log: feed conversion ratio, survival,
// days of culture, and stock alerts.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::model::{ActivityKind, InventoryItem, Pond, PondActivity};

/// Feed conversion ratio: kg of feed per kg of harvested biomass.
pub fn feed_conversion_ratio(feed_kg: f64, biomass_kg: f64) -> Option<f64> {
    (biomass_kg > 0.0).then(|| feed_kg / biomass_kg)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PondMetrics {
    pub pond_id: String,
    pub total_feed_kg: f64,
    pub harvested_biomass_kg: f64,
    pub harvested_count: u64,
    pub fcr: Option<f64>,
    /// Harvested count over PL stocked, as a percentage.
    pub survival_rate: Option<f64>,
    pub days_of_culture: Option<i64>,
    pub latest_average_weight_grams: Option<f64>,
}

/// Compute metrics for `pond` from its activities. Activities for other
/// ponds are ignored. `as_of` bounds days of culture when no harvest has
/// been logged.
pub fn pond_metrics(pond: &Pond, activities: &[PondActivity], as_of: NaiveDate) -> PondMetrics {
    let mine: Vec<&PondActivity> = activities.iter().filter(|a| a.pond_id == pond.id).collect();

    let sum_quantity = |kind: ActivityKind| -> f64 {
        mine.iter()
            .filter(|a| a.kind == kind)
            .filter_map(|a| a.quantity)
            .sum()
    };

    let total_feed_kg = sum_quantity(ActivityKind::Feeding);
    let harvested_biomass_kg = sum_quantity(ActivityKind::Harvest);
    let harvested_count: u64 = mine
        .iter()
        .filter(|a| a.kind == ActivityKind::Harvest)
        .filter_map(|a| a.count)
        .sum();

    let last_harvest = mine
        .iter()
        .filter(|a| a.kind == ActivityKind::Harvest)
        .map(|a| a.date)
        .max();
    let end = last_harvest.unwrap_or(as_of);

    let latest_average_weight_grams = mine
        .iter()
        .filter(|a| a.average_weight_grams.is_some())
        .max_by_key(|a| a.date)
        .and_then(|a| a.average_weight_grams);

    PondMetrics {
        pond_id: pond.id.clone(),
        total_feed_kg,
        harvested_biomass_kg,
        harvested_count,
        fcr: feed_conversion_ratio(total_feed_kg, harvested_biomass_kg),
        survival_rate: (pond.pl_stocked > 0 && harvested_count > 0)
            .then(|| harvested_count as f64 / pond.pl_stocked as f64 * 100.0),
        days_of_culture: pond.stocking_date.map(|d| (end - d).num_days()),
        latest_average_weight_grams,
    }
}

/// Items at or below their reorder level.
pub fn low_stock(items: &[InventoryItem]) -> Vec<&InventoryItem> {
    items
        .iter()
        .filter(|i| i.reorder_level.is_some_and(|level| i.quantity <= level))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PondStatus;

    fn date(m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, m, d).unwrap()
    }

    fn activity(kind: ActivityKind, day: NaiveDate, quantity: Option<f64>) -> PondActivity {
        PondActivity {
            id: String::new(),
            pond_id: "p1".into(),
            date: day,
            kind,
            quantity,
            inventory_item_id: None,
            average_weight_grams: None,
            count: None,
            notes: None,
        }
    }

    fn pond() -> Pond {
        Pond {
            id: "p1".into(),
            name: "Pond 1".into(),
            area_acres: Some(1.5),
            stocking_date: Some(date(1, 1)),
            pl_stocked: 200_000,
            status: PondStatus::Stocked,
        }
    }

    #[test]
    fn fcr_requires_biomass() {
        assert_eq!(feed_conversion_ratio(1500.0, 1000.0), Some(1.5));
        assert_eq!(feed_conversion_ratio(1500.0, 0.0), None);
    }

    #[test]
    fn metrics_from_activity_log() {
        let mut sample = activity(ActivityKind::Sampling, date(3, 1), None);
        sample.average_weight_grams = Some(18.5);
        let mut early_sample = activity(ActivityKind::Sampling, date(2, 1), None);
        early_sample.average_weight_grams = Some(9.0);
        let mut harvest = activity(ActivityKind::Harvest, date(4, 11), Some(2000.0));
        harvest.count = Some(120_000);
        let mut other_pond = activity(ActivityKind::Feeding, date(2, 2), Some(999.0));
        other_pond.pond_id = "p2".into();

        let log = vec![
            activity(ActivityKind::Feeding, date(1, 10), Some(1200.0)),
            activity(ActivityKind::Feeding, date(2, 10), Some(1800.0)),
            early_sample,
            sample,
            harvest,
            other_pond,
        ];

        let m = pond_metrics(&pond(), &log, date(6, 1));
        assert_eq!(m.total_feed_kg, 3000.0);
        assert_eq!(m.harvested_biomass_kg, 2000.0);
        assert_eq!(m.fcr, Some(1.5));
        assert_eq!(m.survival_rate, Some(60.0));
        assert_eq!(m.days_of_culture, Some(100));
        assert_eq!(m.latest_average_weight_grams, Some(18.5));
    }

    #[test]
    fn unharvested_pond_counts_days_to_as_of() {
        let m = pond_metrics(&pond(), &[], date(1, 31));
        assert_eq!(m.fcr, None);
        assert_eq!(m.survival_rate, None);
        assert_eq!(m.days_of_culture, Some(30));
    }

    #[test]
    fn low_stock_respects_reorder_level() {
        let item = |q: f64, level: Option<f64>| InventoryItem {
            id: String::new(),
            name: "Feed".into(),
            unit: "kg".into(),
            quantity: q,
            unit_cost: None,
            reorder_level: level,
        };
        let items = vec![item(50.0, Some(100.0)), item(100.0, Some(100.0)), item(500.0, Some(100.0)), item(0.0, None)];
        assert_eq!(low_stock(&items).len(), 2);
    }
}
