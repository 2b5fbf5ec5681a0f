//! Price driven battery schedule generator.
//!
//! Works on 15 minute quarters and produces custom-mode [`Slot`]s ready for
//! [`Hub::push_schedule`](crate::hub::Hub::push_schedule). Negative slot power charges from the
//! grid, positive power discharges.

use crate::model::as_f64;
use crate::schedule::Slot;
use chrono::{NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeSet, HashMap};

pub const DEFAULT_MAX_CHARGE_W: i32 = 2400;
pub const DEFAULT_MAX_DISCHARGE_W: i32 = 2400;
pub const FALLBACK_PRICE: f64 = 0.25;
pub const DEFAULT_CONSUMPTION_KWH: f64 = 0.5;
const DEFAULT_SOC: f64 = 50.0;

/// Charge and discharge slots share this budget; overnight EV charging may add one more.
const MAX_PRICE_SLOTS: usize = 14;
const MAX_SLOTS_WITH_EV: usize = 15;
const EV_NIGHT_QUARTERS: usize = 12;
const QUARTERS_PER_DAY: usize = 96;

type Quarter = (u32, u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Charge at the cheapest quarters, discharge at the most expensive ones.
    PriceArbitrage,
    /// Discharge only at price peaks, leave charging to solar.
    SelfConsumption,
    Balanced,
    Off,
}

impl Default for Strategy {
    fn default() -> Self {
        Strategy::Balanced
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct QuarterPrice {
    pub hour: u32,
    pub minute: u32,
    pub price: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct HourlyPrice {
    pub hour: u32,
    pub price: f64,
}

/// Optimizer request as received over HTTP. Everything is optional.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Request {
    pub strategy: Strategy,
    pub active: bool,
    pub quarter_prices: Vec<QuarterPrice>,
    pub hourly_prices: Vec<HourlyPrice>,
    /// Expected solar production in kWh, keyed by hour of day.
    pub solar_forecast: HashMap<u32, f64>,
    /// Average consumption in kWh for each hour of the day.
    pub consumption: Vec<f64>,
    pub reserve_soc: f64,
    pub ev_reserve_soc: f64,
    pub high_price: f64,
    pub low_price: f64,
    pub current_soc: Option<f64>,
    pub ev_charging: bool,
    pub max_charge_w: Option<i32>,
    pub max_discharge_w: Option<i32>,
    /// Push the generated slots to the cloud.
    pub push: bool,
    pub dry_run: bool,
}

impl Default for Request {
    fn default() -> Self {
        Request {
            strategy: Strategy::default(),
            active: true,
            quarter_prices: Vec::new(),
            hourly_prices: Vec::new(),
            solar_forecast: HashMap::new(),
            consumption: Vec::new(),
            reserve_soc: 15.0,
            ev_reserve_soc: 20.0,
            high_price: 0.25,
            low_price: 0.08,
            current_soc: None,
            ev_charging: false,
            max_charge_w: None,
            max_discharge_w: None,
            push: false,
            dry_run: false,
        }
    }
}

/// Fully resolved optimizer input.
#[derive(Debug, Clone)]
pub struct Inputs {
    pub strategy: Strategy,
    pub prices: Vec<QuarterPrice>,
    pub solar_forecast: HashMap<u32, f64>,
    pub consumption: Vec<f64>,
    pub reserve_soc: f64,
    pub ev_reserve_soc: f64,
    pub high_price: f64,
    pub low_price: f64,
    pub current_soc: f64,
    pub ev_charging: bool,
    pub max_charge_w: i32,
    pub max_discharge_w: i32,
}

fn ai_power(ai_settings: Option<&Map<String, Value>>, key: &str) -> Option<i32> {
    ai_settings
        .and_then(|ai| ai.get(key))
        .and_then(as_f64)
        .map(|w| w as i32)
}

impl Request {
    /// Fill what the caller left out: power limits from the AI settings, the battery SOC from
    /// the latest telemetry and flat prices starting at the current quarter.
    pub fn resolve(
        self,
        ai_settings: Option<&Map<String, Value>>,
        battery_soc: Option<f64>,
        now: NaiveTime,
    ) -> Inputs {
        let prices = if !self.quarter_prices.is_empty() {
            self.quarter_prices.into_iter().take(QUARTERS_PER_DAY).collect()
        } else if !self.hourly_prices.is_empty() {
            expand_hourly(&self.hourly_prices)
        } else {
            log::warn!("No price data given, using flat {} fallback", FALLBACK_PRICE);
            flat_prices(now)
        };

        let mut consumption = self.consumption;
        consumption.resize(24, DEFAULT_CONSUMPTION_KWH);

        Inputs {
            strategy: if self.active {
                self.strategy
            } else {
                Strategy::Off
            },
            prices,
            solar_forecast: self.solar_forecast,
            consumption,
            reserve_soc: self.reserve_soc,
            ev_reserve_soc: self.ev_reserve_soc,
            high_price: self.high_price,
            low_price: self.low_price,
            current_soc: self.current_soc.or(battery_soc).unwrap_or(DEFAULT_SOC),
            ev_charging: self.ev_charging,
            max_charge_w: self
                .max_charge_w
                .or_else(|| ai_power(ai_settings, "maxChargePower"))
                .unwrap_or(DEFAULT_MAX_CHARGE_W),
            max_discharge_w: self
                .max_discharge_w
                .or_else(|| ai_power(ai_settings, "maxFeedPower"))
                .unwrap_or(DEFAULT_MAX_DISCHARGE_W),
        }
    }
}

fn next_quarter((hour, minute): Quarter) -> Quarter {
    if minute + 15 >= 60 {
        ((hour + 1) % 24, minute + 15 - 60)
    } else {
        (hour, minute + 15)
    }
}

fn quarter_str((hour, minute): Quarter) -> String {
    format!("{:02}:{:02}", hour, minute)
}

pub fn expand_hourly(prices: &[HourlyPrice]) -> Vec<QuarterPrice> {
    prices
        .iter()
        .flat_map(|p| {
            (0..4).map(move |i| QuarterPrice {
                hour: p.hour,
                minute: i * 15,
                price: p.price,
            })
        })
        .collect()
}

/// 24 hours of the fallback price, starting at the quarter containing `now`.
pub fn flat_prices(now: NaiveTime) -> Vec<QuarterPrice> {
    let mut quarter = (now.hour(), now.minute() / 15 * 15);
    let mut prices = Vec::with_capacity(QUARTERS_PER_DAY);
    for _ in 0..QUARTERS_PER_DAY {
        prices.push(QuarterPrice {
            hour: quarter.0,
            minute: quarter.1,
            price: FALLBACK_PRICE,
        });
        quarter = next_quarter(quarter);
    }
    prices
}

/// Split sorted quarters into runs of consecutive quarters.
fn group_consecutive(quarters: &[Quarter]) -> Vec<Vec<Quarter>> {
    let mut groups: Vec<Vec<Quarter>> = Vec::new();
    for &q in quarters {
        match groups.last_mut() {
            Some(group) if group.last().map(|&l| next_quarter(l)) == Some(q) => group.push(q),
            _ => groups.push(vec![q]),
        }
    }
    groups
}

fn slot(group: &[Quarter], power_w: i32, max_soc: f64, min_soc: f64) -> Option<Slot> {
    let (first, last) = (group.first()?, group.last()?);
    Some(Slot {
        enabled: true,
        start: quarter_str(*first),
        end: quarter_str(next_quarter(*last)),
        power_w,
        max_soc: max_soc as u8,
        min_soc: min_soc as u8,
    })
}

/// Generate the schedule for `inputs`. Returns no slots when the strategy is `Off`.
pub fn optimize(inputs: &Inputs) -> Vec<Slot> {
    if inputs.strategy == Strategy::Off {
        log::info!("Optimizer disabled");
        return Vec::new();
    }

    let effective_reserve =
        inputs.reserve_soc + if inputs.ev_charging { inputs.ev_reserve_soc } else { 0.0 };

    log::info!(
        "Optimizer: strategy={:?}, reserve={:.0}%, ev={}, thresholds={:.3}/{:.3}, SOC={:.0}%, charge={}W, discharge={}W, price_slots={}",
        inputs.strategy,
        effective_reserve,
        inputs.ev_charging,
        inputs.low_price,
        inputs.high_price,
        inputs.current_soc,
        inputs.max_charge_w,
        inputs.max_discharge_w,
        inputs.prices.len()
    );

    let mut charge: BTreeSet<Quarter> = BTreeSet::new();
    let mut discharge: BTreeSet<Quarter> = BTreeSet::new();

    for p in &inputs.prices {
        let solar = inputs.solar_forecast.get(&p.hour).copied().unwrap_or(0.0);
        let consumption = inputs
            .consumption
            .get(p.hour as usize)
            .copied()
            .unwrap_or(DEFAULT_CONSUMPTION_KWH);
        let net_solar = (solar / 4.0 - consumption / 4.0).max(0.0);
        let q = (p.hour, p.minute);

        match inputs.strategy {
            Strategy::PriceArbitrage => {
                if p.price <= inputs.low_price && net_solar < 0.025 {
                    charge.insert(q);
                } else if p.price >= inputs.high_price {
                    discharge.insert(q);
                }
            }
            Strategy::SelfConsumption => {
                if p.price >= inputs.high_price && inputs.current_soc > effective_reserve + 10.0 {
                    discharge.insert(q);
                }
            }
            Strategy::Balanced => {
                if p.price <= inputs.low_price && net_solar < 0.025 {
                    charge.insert(q);
                } else if p.price >= inputs.high_price && net_solar < 0.125 {
                    discharge.insert(q);
                }
            }
            Strategy::Off => {}
        }
    }

    let charge: Vec<Quarter> = charge.into_iter().collect();
    let discharge: Vec<Quarter> = discharge
        .into_iter()
        .filter(|q| charge.binary_search(q).is_err())
        .collect();

    let mut slots: Vec<Slot> = group_consecutive(&charge)
        .iter()
        .filter_map(|g| slot(g, -inputs.max_charge_w, 95.0, effective_reserve))
        .chain(
            group_consecutive(&discharge)
                .iter()
                .filter_map(|g| slot(g, inputs.max_discharge_w, 100.0, effective_reserve)),
        )
        .take(MAX_PRICE_SLOTS)
        .collect();

    if inputs.ev_charging && slots.len() < MAX_SLOTS_WITH_EV {
        let mut night: Vec<&QuarterPrice> = inputs
            .prices
            .iter()
            .filter(|p| p.hour >= 22 || p.hour < 6)
            .collect();
        night.sort_by(|a, b| {
            a.price
                .partial_cmp(&b.price)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let ev_quarters: Vec<Quarter> = night
            .iter()
            .take(EV_NIGHT_QUARTERS)
            .map(|p| (p.hour, p.minute))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        for group in group_consecutive(&ev_quarters) {
            if slots.len() >= MAX_SLOTS_WITH_EV {
                break;
            }
            let (h, m) = group[0];
            if slots.iter().any(|s| s.is_charge() && s.contains(h, m)) {
                continue;
            }
            let max_soc = (inputs.reserve_soc + inputs.ev_reserve_soc + 15.0).min(95.0);
            if let Some(s) = slot(&group, -(inputs.max_charge_w / 2), max_soc, inputs.reserve_soc) {
                slots.push(s);
            }
        }
    }

    log::info!("Optimizer produced {} slot(s)", slots.len());
    for (i, s) in slots.iter().enumerate() {
        log::info!(
            "  [{}] {}-{} {} {}W  SOC {}-{}%",
            i + 1,
            s.start,
            s.end,
            if s.is_charge() { "charge" } else { "discharge" },
            s.power_w.abs(),
            s.min_soc,
            s.max_soc
        );
    }
    slots
}
