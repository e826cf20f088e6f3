use std::collections::HashMap;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use smartorder_core::{DeliveryQuote, DeliveryQuoter, NewOrderItem};
use tracing::debug;

const MOSCOW: &str = "москва";
const SAINT_PETERSBURG: &str = "санкт-петербург";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateBand {
    /// Inclusive upper bound in kilograms; `None` is open-ended.
    pub max_weight: Option<Decimal>,
    pub cost: Decimal,
    pub days: u32,
}

impl RateBand {
    fn new(max_weight: Option<i64>, cost: i64, days: u32) -> Self {
        Self {
            max_weight: max_weight.map(Decimal::from),
            cost: Decimal::from(cost),
            days,
        }
    }
}

/// Flat city rate table keyed by normalized city name, with weight
/// estimated at one kilogram per unit.
#[derive(Debug, Clone)]
pub struct CityRateTable {
    cities: HashMap<String, Vec<RateBand>>,
    fallback: Vec<RateBand>,
}

impl Default for CityRateTable {
    fn default() -> Self {
        let mut cities = HashMap::new();
        cities.insert(
            MOSCOW.to_string(),
            vec![RateBand::new(Some(5), 500, 1), RateBand::new(Some(10), 800, 2), RateBand::new(None, 1200, 3)],
        );
        cities.insert(
            SAINT_PETERSBURG.to_string(),
            vec![RateBand::new(Some(5), 600, 2), RateBand::new(Some(10), 900, 3), RateBand::new(None, 1400, 4)],
        );
        Self {
            cities,
            fallback: vec![
                RateBand::new(Some(5), 1000, 3),
                RateBand::new(Some(10), 1500, 5),
                RateBand::new(None, 2000, 7),
            ],
        }
    }
}

impl CityRateTable {
    pub fn new(cities: HashMap<String, Vec<RateBand>>, fallback: Vec<RateBand>) -> Self {
        Self { cities, fallback }
    }

    pub fn rate(&self, city: &str, weight: Decimal) -> Option<&RateBand> {
        let bands = self
            .cities
            .get(&normalize_city(city))
            .filter(|bands| !bands.is_empty())
            .unwrap_or(&self.fallback);
        bands
            .iter()
            .find(|band| band.max_weight.is_none_or(|max| weight <= max))
            .or(bands.last())
    }
}

fn normalize_city(city: &str) -> String {
    let lowered = city.to_lowercase().replace("г.", "").replace("город", "");
    let lowered = lowered.trim();
    if lowered.contains(MOSCOW) || lowered.contains("moscow") {
        return MOSCOW.to_string();
    }
    let petersburg = [SAINT_PETERSBURG, "спб", "питер", "st. petersburg", "saint petersburg"];
    if petersburg.iter().any(|alias| lowered.contains(alias)) {
        return SAINT_PETERSBURG.to_string();
    }
    lowered.to_string()
}

/// City is the first comma-separated part of the address.
fn city_of(address: &str) -> &str {
    address.split(',').next().map(str::trim).unwrap_or_default()
}

#[async_trait]
impl DeliveryQuoter for CityRateTable {
    async fn quote(&self, address: &str, items: &[NewOrderItem]) -> anyhow::Result<DeliveryQuote> {
        let city = city_of(address);
        let units: i64 = items.iter().map(|item| i64::from(item.quantity)).sum();
        let weight = if units > 0 { Decimal::from(units) } else { Decimal::ONE };

        let band = self
            .rate(city, weight)
            .ok_or_else(|| anyhow::anyhow!("no delivery rates configured"))?;
        debug!(city, %weight, cost = %band.cost, days = band.days, "delivery quoted");

        Ok(DeliveryQuote {
            cost: band.cost,
            city: if city.is_empty() { "default".to_string() } else { city.to_string() },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn items(quantity: i32) -> Vec<NewOrderItem> {
        vec![NewOrderItem {
            product_articul: "ФР-00000001".to_string(),
            product_name: "Плита".to_string(),
            quantity,
            price_at_order: Decimal::from(100),
        }]
    }

    #[tokio::test]
    async fn moscow_rates_by_weight() {
        let table = CityRateTable::default();

        let light = table.quote("г. Москва, ул. Тверская, д. 1", &items(2)).await.unwrap();
        assert_eq!(light.cost, Decimal::from(500));
        assert_eq!(light.city, "г. Москва");

        let heavy = table.quote("Москва, Тверская 1", &items(11)).await.unwrap();
        assert_eq!(heavy.cost, Decimal::from(1200));
    }

    #[tokio::test]
    async fn petersburg_aliases_and_default_city() {
        let table = CityRateTable::default();

        let spb = table.quote("СПб, Невский пр., 10", &items(6)).await.unwrap();
        assert_eq!(spb.cost, Decimal::from(900));

        let other = table.quote("Иркутск, ул. Шукшина, д. 60", &items(1)).await.unwrap();
        assert_eq!(other.cost, Decimal::from(1000));
    }
}
