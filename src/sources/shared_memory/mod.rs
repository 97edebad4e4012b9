//! rFactor 2 / Le Mans Ultimate telemetry via the shared memory plugin.
//!
//! The source polls at `poll_interval` (default 20 ms). Every poll probes the
//! process table first; only while the game runs are the plugin buffers read.
//! Telemetry and scoring from one poll are published together as a single
//! [`SharedMemorySnapshot`], so accessors never mix data from two polls.
//!
//! Supported names: every scalar in [`vars`] and every per-car array,
//! including `CarIdxLateralOffset` (metres from the player's centreline,
//! positive to the player's right). Car indices are positions in the scoring
//! vehicle list.
//!
//! `track_length_km()` is always `0.0`: the plugin's lap distance is used only
//! to derive `LapDistPct`.

pub mod layout;
#[cfg(windows)]
pub mod windows;

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use tokio::sync::{broadcast, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

use super::worker::Worker;
use crate::Result;
use crate::config::SharedMemoryConfig;
use crate::process::{ProcessProbe, SysinfoProcessProbe};
use crate::source::{DriverSessionInfo, EVENT_CHANNEL_CAPACITY, SourceEvent, TelemetrySource, vars};
pub use layout::{ScoringBlock, TelemetryBlock, VehicleScoring, VehicleTelemetry};

pub const SHARED_MEMORY_SOURCE_ID: &str = "rfactor2";

/// Lap counts at or above this mean "no lap limit".
const UNLIMITED_LAPS: i32 = 1 << 30;
/// Consecutive read failures between repeated warnings (~5 s at 50 Hz)
const READ_FAILURE_WARN_EVERY: u32 = 250;
const CLASS_PALETTE: [u32; 6] = [0xFFDA59, 0x33CEFF, 0xFF5888, 0xAE6BFF, 0x53FF77, 0xFF9E2C];

/// Source of raw plugin buffers.
pub trait SharedMemoryReader: Send + 'static {
    /// Copy and decode both buffers.
    fn read(&mut self) -> Result<(TelemetryBlock, ScoringBlock)>;

    /// Release any OS resources; the next `read` reopens them.
    fn close(&mut self) {}
}

/// Reader for platforms without the plugin's named mappings.
#[cfg(not(windows))]
#[derive(Debug, Default)]
pub struct UnavailableReader;

#[cfg(not(windows))]
impl SharedMemoryReader for UnavailableReader {
    fn read(&mut self) -> Result<(TelemetryBlock, ScoringBlock)> {
        Err(crate::TelemetryError::unsupported_platform("rFactor 2 shared memory", "Windows"))
    }
}

/// The platform's plugin reader.
pub fn default_reader() -> Box<dyn SharedMemoryReader> {
    #[cfg(windows)]
    {
        Box::new(windows::MappedRf2Reader::new())
    }
    #[cfg(not(windows))]
    {
        Box::new(UnavailableReader)
    }
}

/// 32-bit FNV-1a, used to derive a stable track id from the track name.
pub fn fnv1a(bytes: &[u8]) -> u32 {
    bytes.iter().fold(0x811c_9dc5u32, |hash, &b| (hash ^ u32::from(b)).wrapping_mul(0x0100_0193))
}

/// Non-negative track id for a track name; `None` for an empty name.
pub fn track_id_for(name: &str) -> Option<i32> {
    if name.is_empty() {
        return None;
    }
    Some((fnv1a(name.as_bytes()) & 0x7FFF_FFFF) as i32)
}

/// `"#12 Some Team"` → `"12"`, otherwise the vehicle id.
fn car_number(vehicle: &VehicleScoring) -> String {
    vehicle
        .vehicle_name
        .strip_prefix('#')
        .map(|rest| rest.chars().take_while(char::is_ascii_digit).collect::<String>())
        .filter(|digits| !digits.is_empty())
        .unwrap_or_else(|| vehicle.id.to_string())
}

fn class_color(class: &str) -> u32 {
    CLASS_PALETTE[fnv1a(class.as_bytes()) as usize % CLASS_PALETTE.len()]
}

/// Telemetry and scoring from the same poll, plus derived indices.
#[derive(Debug, Clone, Default)]
pub struct SharedMemorySnapshot {
    pub telemetry: TelemetryBlock,
    pub scoring: ScoringBlock,
    player: Option<usize>,
    player_telemetry: Option<usize>,
    class_positions: Vec<i32>,
}

impl SharedMemorySnapshot {
    pub fn new(telemetry: TelemetryBlock, scoring: ScoringBlock) -> Self {
        let player = scoring.vehicles.iter().position(|v| v.is_player);
        let player_telemetry = player.and_then(|idx| {
            let id = scoring.vehicles[idx].id;
            telemetry.vehicles.iter().position(|t| t.id == id)
        });
        let class_positions = scoring
            .vehicles
            .iter()
            .map(|car| {
                let ahead = scoring
                    .vehicles
                    .iter()
                    .filter(|other| other.vehicle_class == car.vehicle_class && other.place < car.place)
                    .count();
                ahead as i32 + 1
            })
            .collect();
        Self { telemetry, scoring, player, player_telemetry, class_positions }
    }

    pub fn player_index(&self) -> Option<usize> {
        self.player
    }

    fn player_scoring(&self) -> Option<&VehicleScoring> {
        self.player.map(|idx| &self.scoring.vehicles[idx])
    }

    fn player_telemetry(&self) -> Option<&VehicleTelemetry> {
        self.player_telemetry.map(|idx| &self.telemetry.vehicles[idx])
    }

    fn lap_dist_pct(&self, vehicle: &VehicleScoring) -> Option<f32> {
        let track = self.scoring.info.lap_dist;
        (track > 0.0).then(|| (vehicle.lap_dist / track).rem_euclid(1.0) as f32)
    }

    /// Signed distance of `car_idx` from the player's centreline, in metres.
    pub fn lateral_offset(&self, car_idx: usize) -> Option<f32> {
        let car = self.scoring.vehicles.get(car_idx)?;
        let player = self.player_scoring()?;
        let heading = self.player_telemetry()?.heading();
        let dx = car.pos[0] - player.pos[0];
        let dz = car.pos[2] - player.pos[2];
        Some((dx * heading.cos() - dz * heading.sin()) as f32)
    }

    pub fn value(&self, name: &str) -> Option<f32> {
        let scoring = self.player_scoring();
        let telemetry = self.player_telemetry();
        let v = match name {
            vars::SPEED => telemetry?.speed(),
            vars::RPM => telemetry?.engine_rpm,
            vars::THROTTLE => telemetry?.throttle,
            vars::BRAKE => telemetry?.brake,
            vars::CLUTCH => telemetry?.clutch,
            vars::GEAR => f64::from(telemetry?.gear),
            vars::LAP => f64::from(telemetry?.lap_number),
            vars::FUEL_LEVEL => telemetry?.fuel,
            vars::YAW => telemetry?.heading(),
            vars::LAP_CURRENT_LAP_TIME => {
                let t = telemetry?;
                (t.elapsed_time - t.lap_start_et).max(0.0)
            }
            vars::PLAYER_CAR_POSITION => f64::from(scoring?.place),
            vars::ON_PIT_ROAD => f64::from(u8::from(scoring?.in_pits)),
            vars::LAP_DIST_PCT => return self.lap_dist_pct(scoring?),
            vars::LAP_BEST_LAP_TIME => scoring?.best_lap_time.max(0.0),
            vars::LAP_LAST_LAP_TIME => scoring?.last_lap_time.max(0.0),
            _ => return None,
        };
        Some(v as f32)
    }

    pub fn car_value(&self, name: &str, car_idx: usize) -> Option<f32> {
        let car = self.scoring.vehicles.get(car_idx)?;
        let v = match name {
            vars::CAR_IDX_LAP_DIST_PCT => return self.lap_dist_pct(car),
            vars::CAR_IDX_POSITION => f64::from(car.place),
            vars::CAR_IDX_CLASS_POSITION => f64::from(self.class_positions[car_idx]),
            vars::CAR_IDX_LAP => f64::from(car.total_laps),
            vars::CAR_IDX_ON_PIT_ROAD => f64::from(u8::from(car.in_pits)),
            vars::CAR_IDX_LAST_LAP_TIME => car.last_lap_time.max(0.0),
            vars::CAR_IDX_BEST_LAP_TIME => car.best_lap_time.max(0.0),
            vars::CAR_IDX_LATERAL_OFFSET => return self.lateral_offset(car_idx),
            _ => return None,
        };
        Some(v as f32)
    }

    /// Identity of the session for change detection.
    fn session_key(&self) -> (&str, i32, usize) {
        (&self.scoring.info.track_name, self.scoring.info.session, self.scoring.vehicles.len())
    }
}

/// State shared between the source handle and its poll task.
struct Inner {
    process_names: Vec<String>,
    probe: Arc<dyn ProcessProbe>,
    reader: Mutex<Box<dyn SharedMemoryReader>>,
    snapshot_tx: watch::Sender<Option<Arc<SharedMemorySnapshot>>>,
    events: broadcast::Sender<SourceEvent>,
    connected: AtomicBool,
    read_failures: AtomicU32,
}

impl Inner {
    /// One poll: probe, read, publish, and fire transition events.
    async fn poll(&self) {
        let running = match self.probe.any_running(&self.process_names).await {
            Ok(running) => running,
            Err(e) => {
                debug!(error = %e, "rF2 process probe failed");
                return;
            }
        };

        if !running {
            if self.connected.load(Ordering::Acquire) {
                self.disconnect();
            }
            return;
        }

        let read = self.reader.lock().read();
        match read {
            Ok((telemetry, scoring)) => {
                self.read_failures.store(0, Ordering::Relaxed);
                let snapshot = Arc::new(SharedMemorySnapshot::new(telemetry, scoring));
                let previous = self.snapshot_tx.send_replace(Some(Arc::clone(&snapshot)));

                if !self.connected.swap(true, Ordering::AcqRel) {
                    info!(
                        track = %snapshot.scoring.info.track_name,
                        vehicles = snapshot.scoring.vehicles.len(),
                        "rF2 shared memory connected"
                    );
                    let _ = self.events.send(SourceEvent::Connected);
                    let _ = self.events.send(SourceEvent::SessionInfoUpdated);
                } else if previous.is_some_and(|p| p.session_key() != snapshot.session_key()) {
                    debug!(track = %snapshot.scoring.info.track_name, "rF2 session changed");
                    let _ = self.events.send(SourceEvent::SessionInfoUpdated);
                }
                let _ = self.events.send(SourceEvent::TelemetryUpdated);
            }
            Err(e) => {
                let failures = self.read_failures.fetch_add(1, Ordering::Relaxed);
                if failures.is_multiple_of(READ_FAILURE_WARN_EVERY) {
                    warn!(error = %e, failures = failures + 1, "rF2 shared memory read failed");
                } else {
                    trace!(error = %e, "rF2 shared memory read failed");
                }
            }
        }
    }

    fn disconnect(&self) {
        self.reader.lock().close();
        self.snapshot_tx.send_replace(None);
        if self.connected.swap(false, Ordering::AcqRel) {
            info!("rF2 shared memory disconnected");
            let _ = self.events.send(SourceEvent::Disconnected);
        }
    }
}

/// Polling source over the rF2 shared memory plugin.
pub struct SharedMemoryTelemetrySource {
    config: SharedMemoryConfig,
    inner: Arc<Inner>,
    worker: Worker,
}

impl SharedMemoryTelemetrySource {
    pub fn new(
        config: SharedMemoryConfig,
        probe: Arc<dyn ProcessProbe>,
        reader: Box<dyn SharedMemoryReader>,
    ) -> Self {
        let (snapshot_tx, _) = watch::channel(None);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let inner = Inner {
            process_names: config.process_names.clone(),
            probe,
            reader: Mutex::new(reader),
            snapshot_tx,
            events,
            connected: AtomicBool::new(false),
            read_failures: AtomicU32::new(0),
        };
        Self { config, inner: Arc::new(inner), worker: Worker::new() }
    }

    /// Source using the OS process table and the platform's plugin reader.
    pub fn with_defaults(config: SharedMemoryConfig) -> Self {
        Self::new(config, Arc::new(SysinfoProcessProbe::new()), default_reader())
    }

    pub fn snapshot(&self) -> Option<Arc<SharedMemorySnapshot>> {
        self.inner.snapshot_tx.borrow().clone()
    }

    /// Run a single poll outside the background task.
    pub async fn poll_once(&self) {
        self.inner.poll().await;
    }

    fn with_snapshot<T>(&self, default: T, f: impl FnOnce(&SharedMemorySnapshot) -> Option<T>) -> T {
        self.inner.snapshot_tx.borrow().as_deref().and_then(f).unwrap_or(default)
    }
}

#[async_trait]
impl TelemetrySource for SharedMemoryTelemetrySource {
    fn id(&self) -> &str {
        SHARED_MEMORY_SOURCE_ID
    }

    fn display_name(&self) -> &str {
        "rFactor 2 / Le Mans Ultimate"
    }

    async fn is_game_running(&self) -> Result<bool> {
        self.inner.probe.any_running(&self.config.process_names).await
    }

    fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::Acquire)
    }

    fn scalar_f32(&self, name: &str) -> f32 {
        self.with_snapshot(0.0, |s| s.value(name))
    }

    fn scalar_i32(&self, name: &str) -> i32 {
        self.with_snapshot(0, |s| s.value(name).map(|v| v as i32))
    }

    fn scalar_bool(&self, name: &str) -> bool {
        self.with_snapshot(false, |s| s.value(name).map(|v| v != 0.0))
    }

    fn array_f32(&self, name: &str, car_idx: usize) -> f32 {
        self.with_snapshot(0.0, |s| s.car_value(name, car_idx))
    }

    fn array_i32(&self, name: &str, car_idx: usize) -> i32 {
        self.with_snapshot(0, |s| s.car_value(name, car_idx).map(|v| v as i32))
    }

    fn array_bool(&self, name: &str, car_idx: usize) -> bool {
        self.with_snapshot(false, |s| s.car_value(name, car_idx).map(|v| v != 0.0))
    }

    fn driver_count(&self) -> usize {
        self.with_snapshot(0, |s| Some(s.scoring.vehicles.len()))
    }

    fn player_car_index(&self) -> i32 {
        self.with_snapshot(-1, |s| s.player_index().map(|idx| idx as i32))
    }

    fn driver_info(&self, car_idx: i32) -> Option<DriverSessionInfo> {
        let idx = usize::try_from(car_idx).ok()?;
        let snapshot = self.snapshot()?;
        let vehicle = snapshot.scoring.vehicles.get(idx)?;
        Some(DriverSessionInfo {
            car_idx,
            user_name: vehicle.driver_name.clone(),
            car_number: car_number(vehicle),
            car_class_short_name: vehicle.vehicle_class.clone(),
            car_class_color: class_color(&vehicle.vehicle_class),
            car_screen_name_short: vehicle.vehicle_name.clone(),
            ..DriverSessionInfo::default()
        })
    }

    fn track_name(&self) -> String {
        self.with_snapshot(String::new(), |s| Some(s.scoring.info.track_name.clone()))
    }

    fn track_id(&self) -> Option<i32> {
        self.snapshot().and_then(|s| track_id_for(&s.scoring.info.track_name))
    }

    fn track_length_km(&self) -> f32 {
        0.0
    }

    fn session_lap_limit(&self) -> Option<u32> {
        let max_laps = self.snapshot()?.scoring.info.max_laps;
        (max_laps > 0 && max_laps < UNLIMITED_LAPS).then_some(max_laps as u32)
    }

    async fn start(&self) -> Result<()> {
        let inner = Arc::clone(&self.inner);
        let interval = self.config.poll_interval();

        let spawned = self.worker.spawn_with(move |cancel| async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                inner.poll().await;
            }
            debug!("rF2 poll loop exited");
        });

        if spawned {
            info!(poll_ms = interval.as_millis() as u64, "rF2 shared memory polling started");
        }
        Ok(())
    }

    async fn stop(&self) {
        if self.worker.stop(self.config.stop_timeout(), "rfactor2").await {
            self.inner.disconnect();
            info!("rF2 shared memory polling stopped");
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<SourceEvent> {
        self.inner.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::layout::fixtures::{grid, scoring_buffer, telemetry_buffer};
    use super::layout::{decode_scoring, decode_telemetry};
    use super::*;
    use crate::TelemetryError;
    use crate::test_utils::StaticProcessProbe;
    use std::sync::atomic::AtomicUsize;

    type Blocks = (TelemetryBlock, ScoringBlock);

    /// Reader returning whatever blocks the test installed, or an error.
    #[derive(Clone, Default)]
    struct ScriptedReader {
        blocks: Arc<Mutex<Option<Blocks>>>,
        closes: Arc<AtomicUsize>,
    }

    impl ScriptedReader {
        fn set(&self, blocks: Option<Blocks>) {
            *self.blocks.lock() = blocks;
        }
    }

    impl SharedMemoryReader for ScriptedReader {
        fn read(&mut self) -> Result<Blocks> {
            self.blocks.lock().clone().ok_or_else(|| TelemetryError::connection_failed("plugin not loaded"))
        }

        fn close(&mut self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn blocks(track: &str, max_laps: i32) -> Blocks {
        let cars = grid();
        (
            decode_telemetry(&telemetry_buffer(&cars, track)).unwrap(),
            decode_scoring(&scoring_buffer(&cars, track, max_laps, 2000.0)).unwrap(),
        )
    }

    fn source(running: bool) -> (SharedMemoryTelemetrySource, Arc<StaticProcessProbe>, ScriptedReader) {
        let probe = Arc::new(StaticProcessProbe::new(running));
        let reader = ScriptedReader::default();
        let source = SharedMemoryTelemetrySource::new(
            SharedMemoryConfig::default(),
            probe.clone(),
            Box::new(reader.clone()),
        );
        (source, probe, reader)
    }

    #[test]
    fn fnv_track_ids_are_stable() {
        assert_eq!(fnv1a(b""), 0x811c_9dc5);
        assert_eq!(fnv1a(b"a"), 0xe40c_292c);
        assert_eq!(track_id_for("Sebring"), track_id_for("Sebring"));
        assert_ne!(track_id_for("Sebring"), track_id_for("Spa"));
        assert!(track_id_for("Sebring").unwrap() >= 0);
        assert_eq!(track_id_for(""), None);
    }

    #[test]
    fn car_numbers_come_from_vehicle_names() {
        let mut vehicle = VehicleScoring { id: 4, vehicle_name: "#51 Ferrari".into(), ..Default::default() };
        assert_eq!(car_number(&vehicle), "51");
        vehicle.vehicle_name = "Ferrari 499P".into();
        assert_eq!(car_number(&vehicle), "4");
    }

    #[test]
    fn snapshot_derives_player_and_values() {
        let (telemetry, scoring) = blocks("Sebring", 20);
        let snapshot = SharedMemorySnapshot::new(telemetry, scoring);

        assert_eq!(snapshot.player_index(), Some(1));
        assert_eq!(snapshot.value(vars::SPEED), Some(5.0));
        assert_eq!(snapshot.value(vars::GEAR), Some(4.0));
        assert_eq!(snapshot.value(vars::PLAYER_CAR_POSITION), Some(2.0));
        assert_eq!(snapshot.value(vars::LAP_DIST_PCT), Some(0.5));
        assert_eq!(snapshot.value(vars::LAP_CURRENT_LAP_TIME), Some(25.0));
        assert_eq!(snapshot.value("NotAVariable"), None);

        assert_eq!(snapshot.car_value(vars::CAR_IDX_POSITION, 0), Some(1.0));
        assert_eq!(snapshot.car_value(vars::CAR_IDX_CLASS_POSITION, 0), Some(1.0));
        assert_eq!(snapshot.car_value(vars::CAR_IDX_CLASS_POSITION, 1), Some(1.0));
        assert_eq!(snapshot.car_value(vars::CAR_IDX_CLASS_POSITION, 2), Some(2.0));
        assert_eq!(snapshot.car_value(vars::CAR_IDX_LAP, 2), Some(2.0));
        assert_eq!(snapshot.car_value(vars::CAR_IDX_POSITION, 3), None);
    }

    #[test]
    fn lateral_offset_is_signed_in_player_frame() {
        let (telemetry, scoring) = blocks("Sebring", 20);
        let snapshot = SharedMemorySnapshot::new(telemetry, scoring);

        assert_eq!(snapshot.lateral_offset(1), Some(0.0));
        assert_eq!(snapshot.lateral_offset(2), Some(-2.5));
        assert_eq!(snapshot.lateral_offset(0), Some(0.0));
    }

    #[test]
    fn no_player_flag_means_unknown_player() {
        let (telemetry, mut scoring) = blocks("Sebring", 20);
        scoring.vehicles.iter_mut().for_each(|v| v.is_player = false);
        let snapshot = SharedMemorySnapshot::new(telemetry, scoring);
        assert_eq!(snapshot.player_index(), None);
        assert_eq!(snapshot.value(vars::SPEED), None);
        assert_eq!(snapshot.lateral_offset(0), None);
    }

    #[test]
    fn several_player_flags_resolve_to_the_first() {
        let (telemetry, mut scoring) = blocks("Sebring", 20);
        scoring.vehicles[2].is_player = true;
        let count = scoring.vehicles.len();
        let snapshot = SharedMemorySnapshot::new(telemetry, scoring);

        let player = snapshot.player_index().unwrap();
        assert_eq!(player, 1);
        assert!(player < count);
        assert!(snapshot.scoring.vehicles[player].is_player);
    }

    #[tokio::test]
    async fn poll_transitions_fire_events() {
        let (source, probe, reader) = source(true);
        let mut events = source.subscribe();
        reader.set(Some(blocks("Sebring", 20)));

        source.poll_once().await;
        assert!(source.is_connected());
        assert_eq!(events.recv().await.unwrap(), SourceEvent::Connected);
        assert_eq!(events.recv().await.unwrap(), SourceEvent::SessionInfoUpdated);
        assert_eq!(events.recv().await.unwrap(), SourceEvent::TelemetryUpdated);

        assert_eq!(source.driver_count(), 3);
        assert_eq!(source.player_car_index(), 1);
        assert_eq!(source.track_name(), "Sebring");
        assert_eq!(source.track_id(), track_id_for("Sebring"));
        assert_eq!(source.track_length_km(), 0.0);
        assert_eq!(source.session_lap_limit(), Some(20));
        assert!((source.scalar_f32(vars::SPEED) - 5.0).abs() < 1e-6);
        let player = source.driver_info(1).unwrap();
        assert_eq!(player.user_name, "Local Player");
        assert_eq!(player.car_number, "17");
        assert!(source.driver_info(3).is_none());

        probe.set_running(false);
        source.poll_once().await;
        assert!(!source.is_connected());
        assert_eq!(events.recv().await.unwrap(), SourceEvent::Disconnected);
        assert_eq!(source.driver_count(), 0);
        assert_eq!(source.player_car_index(), -1);
        assert!(source.driver_info(1).is_none());
        assert_eq!(reader.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn read_errors_keep_previous_snapshot() {
        let (source, _probe, reader) = source(true);
        reader.set(Some(blocks("Monza", 20)));
        source.poll_once().await;

        reader.set(None);
        source.poll_once().await;
        assert!(source.is_connected());
        assert_eq!(source.track_name(), "Monza");
        assert_eq!(source.driver_count(), 3);
    }

    #[tokio::test]
    async fn track_change_signals_new_session() {
        let (source, _probe, reader) = source(true);
        reader.set(Some(blocks("Monza", 20)));
        source.poll_once().await;
        let mut events = source.subscribe();

        reader.set(Some(blocks("Imola", 20)));
        source.poll_once().await;
        assert_eq!(events.recv().await.unwrap(), SourceEvent::SessionInfoUpdated);
        assert_eq!(events.recv().await.unwrap(), SourceEvent::TelemetryUpdated);
    }

    #[tokio::test]
    async fn lap_limit_sentinels_mean_unlimited() {
        for max_laps in [0, -1, UNLIMITED_LAPS, i32::MAX] {
            let (source, _probe, reader) = source(true);
            reader.set(Some(blocks("Spa", max_laps)));
            source.poll_once().await;
            assert_eq!(source.session_lap_limit(), None, "max_laps = {max_laps}");
        }
    }

    #[tokio::test]
    async fn game_not_running_never_reads() {
        let (source, _probe, reader) = source(false);
        reader.set(Some(blocks("Spa", 20)));
        source.poll_once().await;
        assert!(!source.is_connected());
        assert!(!source.is_game_running().await.unwrap());
        assert_eq!(source.scalar_f32(vars::RPM), 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn background_polling_lifecycle() {
        let (source, _probe, reader) = source(true);
        reader.set(Some(blocks("Spa", 20)));
        let mut events = source.subscribe();

        source.start().await.unwrap();
        source.start().await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert!(source.is_connected());
        assert_eq!(events.recv().await.unwrap(), SourceEvent::Connected);

        source.stop().await;
        source.stop().await;
        assert!(!source.is_connected());
        assert!(source.snapshot().is_none());
    }
}
