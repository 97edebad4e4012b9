//! Synthetic demo telemetry.
//!
//! Produces self-consistent fake data at ~60 Hz so consumers have something
//! to show before any simulator is detected. The model is randomized but
//! seedable: speed random-walks inside `[0, 280]` km/h, gear follows speed
//! thresholds with hysteresis, RPM is derived from speed within the current
//! gear, and a lap of roughly `lap_seconds` wraps the lap counter. Heading
//! turns once per lap, so dead reckoning traces a closed loop.
//!
//! Answers every name in [`vars`] except `CarIdxLateralOffset`, which is
//! always `0.0` here.

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f32::consts::TAU;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{broadcast, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace};

use super::worker::Worker;
use crate::config::SyntheticConfig;
use crate::source::{DriverSessionInfo, EVENT_CHANNEL_CAPACITY, SourceEvent, TelemetrySource, vars};
use crate::Result;

pub const SYNTHETIC_SOURCE_ID: &str = "demo";
pub const DEMO_TRACK_ID: i32 = -1;
pub const DEMO_TRACK_NAME: &str = "Demo Circuit";
pub const DEMO_TRACK_LENGTH_KM: f32 = 3.7;

const MAX_SPEED_KMH: f32 = 280.0;
const IDLE_RPM: f32 = 800.0;
const REDLINE_RPM: f32 = 8000.0;
const TOP_GEAR: i32 = 7;
/// Upshift speed out of gear `n` is `SHIFT_UP_KMH[n - 1]`
const SHIFT_UP_KMH: [f32; 6] = [45.0, 80.0, 115.0, 150.0, 190.0, 230.0];
const DOWNSHIFT_HYSTERESIS_KMH: f32 = 8.0;
const FUEL_CAPACITY_L: f32 = 60.0;
const FUEL_BURN_L_PER_S: f32 = 0.03;

const DEMO_DRIVERS: [(&str, &str); 8] = [
    ("You", "1"),
    ("Alex Marsh", "7"),
    ("Bea Okafor", "12"),
    ("Chen Wei", "23"),
    ("Dario Rossi", "31"),
    ("Elin Berg", "44"),
    ("Farid Haddad", "58"),
    ("Greta Novak", "77"),
];

/// Opponent pace relative to the nominal lap, index 0 is the player.
const PACE: [f32; 8] = [1.0, 0.985, 0.99, 0.995, 1.005, 1.01, 1.02, 1.03];

/// One tick of synthetic state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyntheticSnapshot {
    pub speed_kmh: f32,
    pub rpm: f32,
    pub gear: i32,
    pub throttle: f32,
    pub brake: f32,
    pub lap: i32,
    pub lap_time: f32,
    pub lap_length: f32,
    pub last_lap_time: f32,
    pub best_lap_time: f32,
    pub fuel_level: f32,
    pub cars: Vec<CarState>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CarState {
    pub lap: i32,
    pub lap_dist_pct: f32,
    pub position: i32,
    pub last_lap_time: f32,
    pub best_lap_time: f32,
}

impl SyntheticSnapshot {
    fn lap_dist_pct(&self) -> f32 {
        if self.lap_length > 0.0 { (self.lap_time / self.lap_length).clamp(0.0, 0.9999) } else { 0.0 }
    }

    /// Scalar value by variable name.
    pub fn value(&self, name: &str) -> Option<f32> {
        let player = self.cars.first();
        Some(match name {
            vars::SPEED => self.speed_kmh / 3.6,
            vars::RPM => self.rpm,
            vars::THROTTLE => self.throttle,
            vars::BRAKE => self.brake,
            vars::CLUTCH => 0.0,
            vars::GEAR => self.gear as f32,
            vars::LAP => self.lap as f32,
            vars::PLAYER_CAR_POSITION => player.map_or(0, |c| c.position) as f32,
            vars::ON_PIT_ROAD => 0.0,
            vars::LAP_DIST_PCT => self.lap_dist_pct(),
            vars::YAW => TAU * self.lap_dist_pct(),
            vars::LAP_CURRENT_LAP_TIME => self.lap_time,
            vars::LAP_BEST_LAP_TIME => self.best_lap_time,
            vars::LAP_LAST_LAP_TIME => self.last_lap_time,
            vars::FUEL_LEVEL => self.fuel_level,
            _ => return None,
        })
    }

    /// Per-car value by variable name.
    pub fn car_value(&self, name: &str, car_idx: usize) -> Option<f32> {
        let car = self.cars.get(car_idx)?;
        Some(match name {
            vars::CAR_IDX_LAP_DIST_PCT => car.lap_dist_pct,
            vars::CAR_IDX_POSITION | vars::CAR_IDX_CLASS_POSITION => car.position as f32,
            vars::CAR_IDX_LAP => car.lap as f32,
            vars::CAR_IDX_ON_PIT_ROAD => 0.0,
            vars::CAR_IDX_LAST_LAP_TIME => car.last_lap_time,
            vars::CAR_IDX_BEST_LAP_TIME => car.best_lap_time,
            vars::CAR_IDX_LATERAL_OFFSET => 0.0,
            _ => return None,
        })
    }
}

/// The random model behind the synthetic source.
pub struct SyntheticModel {
    rng: StdRng,
    nominal_lap: f32,
    state: SyntheticSnapshot,
}

impl SyntheticModel {
    pub fn new(seed: Option<u64>, nominal_lap: f32) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        let cars = (0..DEMO_DRIVERS.len())
            .map(|i| CarState {
                // Opponents start on the run to the line, behind the player
                lap: if i == 0 { 1 } else { 0 },
                lap_dist_pct: (1.0 - i as f32 * 0.04).rem_euclid(1.0),
                position: i as i32 + 1,
                ..CarState::default()
            })
            .collect();

        let mut model = Self {
            rng,
            nominal_lap,
            state: SyntheticSnapshot {
                gear: 1,
                rpm: IDLE_RPM,
                lap: 1,
                fuel_level: FUEL_CAPACITY_L,
                cars,
                ..SyntheticSnapshot::default()
            },
        };
        model.state.lap_length = model.next_lap_length();
        model
    }

    pub fn snapshot(&self) -> &SyntheticSnapshot {
        &self.state
    }

    fn next_lap_length(&mut self) -> f32 {
        self.nominal_lap + self.rng.random_range(-1.5..1.5)
    }

    /// Advance the model by `dt` seconds.
    pub fn step(&mut self, dt: f32) {
        let previous = self.state.speed_kmh;
        // Random walk with a gentle pull towards racing speed
        let drift = (170.0 - previous) * 0.01;
        let delta = self.rng.random_range(-2.5..2.5) + drift;
        let speed = (previous + delta).clamp(0.0, MAX_SPEED_KMH);
        self.state.speed_kmh = speed;

        self.shift(speed);
        self.state.rpm = self.derive_rpm(speed);

        let change = speed - previous;
        if change > 0.0 {
            self.state.throttle = (0.6 + self.rng.random_range(0.0f32..0.4)).min(1.0);
            self.state.brake = 0.0;
        } else if change < -1.0 {
            self.state.throttle = 0.0;
            self.state.brake = (-change / 3.0).min(1.0);
        } else {
            self.state.throttle = 0.3;
            self.state.brake = 0.0;
        }

        self.state.fuel_level -= FUEL_BURN_L_PER_S * dt;
        if self.state.fuel_level < 1.0 {
            self.state.fuel_level = FUEL_CAPACITY_L;
        }

        self.advance_lap(dt);
        self.advance_field(dt);
    }

    fn shift(&mut self, speed: f32) {
        let gear = self.state.gear;
        if gear < TOP_GEAR && speed > SHIFT_UP_KMH[(gear - 1) as usize] {
            self.state.gear = gear + 1;
        } else if gear > 1 && speed < SHIFT_UP_KMH[(gear - 2) as usize] - DOWNSHIFT_HYSTERESIS_KMH {
            self.state.gear = gear - 1;
        }
    }

    fn derive_rpm(&mut self, speed: f32) -> f32 {
        let gear = self.state.gear;
        let floor = if gear == 1 { 0.0 } else { SHIFT_UP_KMH[(gear - 2) as usize] - DOWNSHIFT_HYSTERESIS_KMH };
        let ceiling = if gear == TOP_GEAR { MAX_SPEED_KMH } else { SHIFT_UP_KMH[(gear - 1) as usize] };
        let fraction = ((speed - floor) / (ceiling - floor)).clamp(0.0, 1.0);
        let noise = self.rng.random_range(-75.0..75.0);
        (IDLE_RPM + fraction * (REDLINE_RPM - IDLE_RPM - 500.0) + noise).clamp(IDLE_RPM, REDLINE_RPM)
    }

    fn advance_lap(&mut self, dt: f32) {
        self.state.lap_time += dt;
        if self.state.lap_time < self.state.lap_length {
            return;
        }

        let completed = self.state.lap_length;
        self.state.lap_time -= completed;
        self.state.lap += 1;
        self.state.last_lap_time = completed;
        if self.state.best_lap_time <= 0.0 || completed < self.state.best_lap_time {
            self.state.best_lap_time = completed;
        }
        self.state.lap_length = self.next_lap_length();
        trace!(lap = self.state.lap, last = completed, "Synthetic lap completed");
    }

    fn advance_field(&mut self, dt: f32) {
        let player_pct = self.state.lap_dist_pct();
        let player_lap = self.state.lap;
        let player_last = self.state.last_lap_time;
        let player_best = self.state.best_lap_time;

        for (idx, car) in self.state.cars.iter_mut().enumerate() {
            if idx == 0 {
                car.lap = player_lap;
                car.lap_dist_pct = player_pct;
                car.last_lap_time = player_last;
                car.best_lap_time = player_best;
                continue;
            }
            let lap_time = self.nominal_lap * PACE[idx];
            car.lap_dist_pct += dt / lap_time;
            if car.lap_dist_pct >= 1.0 {
                car.lap_dist_pct -= 1.0;
                car.lap += 1;
                car.last_lap_time = lap_time;
                car.best_lap_time = lap_time;
            }
        }

        let mut order: Vec<usize> = (0..self.state.cars.len()).collect();
        let progress = |c: &CarState| c.lap as f32 + c.lap_dist_pct;
        order.sort_by(|&a, &b| progress(&self.state.cars[b]).total_cmp(&progress(&self.state.cars[a])));
        for (rank, idx) in order.into_iter().enumerate() {
            self.state.cars[idx].position = rank as i32 + 1;
        }
    }
}

fn demo_roster() -> Vec<DriverSessionInfo> {
    DEMO_DRIVERS
        .iter()
        .enumerate()
        .map(|(idx, (name, number))| DriverSessionInfo {
            car_idx: idx as i32,
            user_name: name.to_string(),
            car_number: number.to_string(),
            car_class_short_name: "GT3".to_string(),
            car_class_color: 0xFFDA59,
            i_rating: 1350 + idx as i32 * 137,
            license: "A 3.41".to_string(),
            license_color: 0x0153DB,
            car_screen_name_short: "Demo GT3".to_string(),
            is_spectator: false,
        })
        .collect()
}

/// Always-available fake source used for demo mode.
pub struct SyntheticTelemetrySource {
    config: SyntheticConfig,
    snapshot_tx: watch::Sender<Arc<SyntheticSnapshot>>,
    events: broadcast::Sender<SourceEvent>,
    connected: Arc<AtomicBool>,
    roster: Vec<DriverSessionInfo>,
    worker: Worker,
}

impl SyntheticTelemetrySource {
    pub fn new(config: SyntheticConfig) -> Self {
        let initial = SyntheticModel::new(config.seed, config.lap_seconds).snapshot().clone();
        let (snapshot_tx, _) = watch::channel(Arc::new(initial));
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            config,
            snapshot_tx,
            events,
            connected: Arc::new(AtomicBool::new(false)),
            roster: demo_roster(),
            worker: Worker::new(),
        }
    }

    /// Current model state.
    pub fn snapshot(&self) -> Arc<SyntheticSnapshot> {
        Arc::clone(&*self.snapshot_tx.borrow())
    }
}

#[async_trait]
impl TelemetrySource for SyntheticTelemetrySource {
    fn id(&self) -> &str {
        SYNTHETIC_SOURCE_ID
    }

    fn display_name(&self) -> &str {
        "Demo"
    }

    async fn is_game_running(&self) -> Result<bool> {
        Ok(true)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn scalar_f32(&self, name: &str) -> f32 {
        self.snapshot_tx.borrow().value(name).unwrap_or(0.0)
    }

    fn scalar_i32(&self, name: &str) -> i32 {
        self.snapshot_tx.borrow().value(name).map_or(0, |v| v as i32)
    }

    fn scalar_bool(&self, name: &str) -> bool {
        self.snapshot_tx.borrow().value(name).is_some_and(|v| v != 0.0)
    }

    fn array_f32(&self, name: &str, car_idx: usize) -> f32 {
        self.snapshot_tx.borrow().car_value(name, car_idx).unwrap_or(0.0)
    }

    fn array_i32(&self, name: &str, car_idx: usize) -> i32 {
        self.snapshot_tx.borrow().car_value(name, car_idx).map_or(0, |v| v as i32)
    }

    fn array_bool(&self, name: &str, car_idx: usize) -> bool {
        self.snapshot_tx.borrow().car_value(name, car_idx).is_some_and(|v| v != 0.0)
    }

    fn driver_count(&self) -> usize {
        self.roster.len()
    }

    fn player_car_index(&self) -> i32 {
        0
    }

    fn driver_info(&self, car_idx: i32) -> Option<DriverSessionInfo> {
        usize::try_from(car_idx).ok().and_then(|idx| self.roster.get(idx)).cloned()
    }

    fn track_name(&self) -> String {
        DEMO_TRACK_NAME.to_string()
    }

    fn track_id(&self) -> Option<i32> {
        Some(DEMO_TRACK_ID)
    }

    fn track_length_km(&self) -> f32 {
        DEMO_TRACK_LENGTH_KM
    }

    fn session_lap_limit(&self) -> Option<u32> {
        None
    }

    async fn start(&self) -> Result<()> {
        let snapshot_tx = self.snapshot_tx.clone();
        let events = self.events.clone();
        let connected = Arc::clone(&self.connected);
        let tick = self.config.tick_interval();
        let seed = self.config.seed;
        let nominal_lap = self.config.lap_seconds;

        let spawned = self.worker.spawn_with(move |cancel| async move {
            let mut model = SyntheticModel::new(seed, nominal_lap);
            let mut ticker = tokio::time::interval(tick);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let dt = tick.as_secs_f32();

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                model.step(dt);
                snapshot_tx.send_replace(Arc::new(model.snapshot().clone()));
                let _ = events.send(SourceEvent::TelemetryUpdated);
            }
            connected.store(false, Ordering::Release);
            debug!("Synthetic tick loop exited");
        });

        if spawned {
            self.connected.store(true, Ordering::Release);
            info!(tick_ms = tick.as_millis() as u64, "Synthetic telemetry started");
            let _ = self.events.send(SourceEvent::Connected);
            let _ = self.events.send(SourceEvent::SessionInfoUpdated);
        }
        Ok(())
    }

    async fn stop(&self) {
        if self.worker.stop(self.config.stop_timeout(), "synthetic").await {
            self.connected.store(false, Ordering::Release);
            info!("Synthetic telemetry stopped");
            let _ = self.events.send(SourceEvent::Disconnected);
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<SourceEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::time::Duration;

    fn config() -> SyntheticConfig {
        SyntheticConfig { seed: Some(7), ..SyntheticConfig::default() }
    }

    #[test]
    fn seeded_models_are_deterministic() {
        let mut a = SyntheticModel::new(Some(99), 90.0);
        let mut b = SyntheticModel::new(Some(99), 90.0);
        for _ in 0..500 {
            a.step(1.0 / 60.0);
            b.step(1.0 / 60.0);
        }
        assert_eq!(a.snapshot(), b.snapshot());
    }

    #[test]
    fn lap_wraps_and_records_times() {
        let mut model = SyntheticModel::new(Some(1), 10.0);
        let first_length = model.snapshot().lap_length;
        let steps = (first_length / 0.1).ceil() as usize + 1;
        for _ in 0..steps {
            model.step(0.1);
        }

        let snap = model.snapshot();
        assert_eq!(snap.lap, 2);
        assert!((snap.last_lap_time - first_length).abs() < 1e-4);
        assert_eq!(snap.best_lap_time, snap.last_lap_time);
        assert!(snap.lap_time < snap.lap_length);
        assert!((8.5..=11.5).contains(&snap.last_lap_time));
    }

    #[test]
    fn positions_are_a_permutation() {
        let mut model = SyntheticModel::new(Some(3), 30.0);
        for _ in 0..2000 {
            model.step(0.05);
        }
        let mut positions: Vec<i32> = model.snapshot().cars.iter().map(|c| c.position).collect();
        positions.sort_unstable();
        assert_eq!(positions, (1..=8).collect::<Vec<_>>());
    }

    proptest! {
        #[test]
        fn model_stays_within_physical_bounds(seed in any::<u64>(), steps in 1usize..3000) {
            let mut model = SyntheticModel::new(Some(seed), 90.0);
            for _ in 0..steps {
                model.step(1.0 / 60.0);
                let s = model.snapshot();
                prop_assert!((0.0..=MAX_SPEED_KMH).contains(&s.speed_kmh));
                prop_assert!((IDLE_RPM..=REDLINE_RPM).contains(&s.rpm));
                prop_assert!((1..=TOP_GEAR).contains(&s.gear));
                prop_assert!((0.0..=1.0).contains(&s.throttle));
                prop_assert!((0.0..=1.0).contains(&s.brake));
                let pct = s.value(vars::LAP_DIST_PCT).unwrap();
                prop_assert!((0.0..1.0).contains(&pct));
            }
        }
    }

    #[test]
    fn unknown_names_default() {
        let source = SyntheticTelemetrySource::new(config());
        assert_eq!(source.scalar_f32("NoSuchVariable"), 0.0);
        assert_eq!(source.scalar_i32("NoSuchVariable"), 0);
        assert!(!source.scalar_bool("NoSuchVariable"));
        assert_eq!(source.array_f32(vars::CAR_IDX_LAP_DIST_PCT, 64), 0.0);
        assert_eq!(source.array_i32("NoSuchArray", 0), 0);
    }

    #[test]
    fn roster_and_track_metadata() {
        let source = SyntheticTelemetrySource::new(config());
        assert_eq!(source.driver_count(), 8);
        assert_eq!(source.player_car_index(), 0);
        assert_eq!(source.driver_info(3).unwrap().car_idx, 3);
        assert!(source.driver_info(8).is_none());
        assert!(source.driver_info(-1).is_none());
        assert_eq!(source.track_id(), Some(DEMO_TRACK_ID));
        assert_eq!(source.session_lap_limit(), None);
        assert!(source.track_length_km() > 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn start_and_stop_lifecycle() {
        let source = SyntheticTelemetrySource::new(config());
        let mut events = source.subscribe();
        assert!(!source.is_connected());

        source.start().await.unwrap();
        source.start().await.unwrap();
        assert!(source.is_connected());
        assert_eq!(events.recv().await.unwrap(), SourceEvent::Connected);
        assert_eq!(events.recv().await.unwrap(), SourceEvent::SessionInfoUpdated);

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(source.scalar_f32(vars::RPM) >= IDLE_RPM);
        assert!(source.scalar_i32(vars::GEAR) >= 1);
        assert!(source.scalar_f32(vars::LAP_CURRENT_LAP_TIME) > 0.0);
        assert_eq!(events.recv().await.unwrap(), SourceEvent::TelemetryUpdated);

        source.stop().await;
        source.stop().await;
        assert!(!source.is_connected());

        source.start().await.unwrap();
        assert!(source.is_connected());
        source.stop().await;
    }
}
