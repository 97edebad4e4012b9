//! Controller, proxy and outline capture working together.

use async_trait::async_trait;
use paddock::config::DetectionConfig;
use paddock::track::CapturePhase;
use paddock::{
    ArbitrationState, ControllerEvent, DriverSessionInfo, Paddock, PaddockConfig, SourceEvent,
    SyntheticTelemetrySource, TelemetrySource, vars,
};
use parking_lot::Mutex;
use std::f32::consts::TAU;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

const LAP: Duration = Duration::from_secs(4);
const SPEED: f32 = 50.0;

/// A car lapping a circular track once every [`LAP`], clocked by tokio time.
struct LappingCar {
    id: &'static str,
    track_id: i32,
    running: AtomicBool,
    connected: AtomicBool,
    started: Mutex<Option<Instant>>,
    events: broadcast::Sender<SourceEvent>,
}

impl LappingCar {
    fn new(id: &'static str, track_id: i32) -> Arc<Self> {
        let (events, _) = broadcast::channel(16);
        Arc::new(Self {
            id,
            track_id,
            running: AtomicBool::new(false),
            connected: AtomicBool::new(false),
            started: Mutex::new(None),
            events,
        })
    }

    fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }

    fn lap_fraction(&self) -> f32 {
        self.started.lock().map_or(0.0, |started| (started.elapsed().as_secs_f32() / LAP.as_secs_f32()).fract())
    }
}

#[async_trait]
impl TelemetrySource for LappingCar {
    fn id(&self) -> &str {
        self.id
    }

    fn display_name(&self) -> &str {
        "Lapping car"
    }

    async fn is_game_running(&self) -> paddock::Result<bool> {
        Ok(self.running.load(Ordering::SeqCst))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn scalar_f32(&self, name: &str) -> f32 {
        match name {
            vars::SPEED => SPEED,
            vars::YAW => TAU * self.lap_fraction(),
            vars::LAP_DIST_PCT => self.lap_fraction(),
            vars::RPM => 6500.0,
            _ => 0.0,
        }
    }

    fn scalar_i32(&self, name: &str) -> i32 {
        self.scalar_f32(name) as i32
    }

    fn scalar_bool(&self, _name: &str) -> bool {
        false
    }

    fn array_f32(&self, _name: &str, _car_idx: usize) -> f32 {
        0.0
    }

    fn array_i32(&self, _name: &str, _car_idx: usize) -> i32 {
        0
    }

    fn array_bool(&self, _name: &str, _car_idx: usize) -> bool {
        false
    }

    fn driver_count(&self) -> usize {
        1
    }

    fn player_car_index(&self) -> i32 {
        0
    }

    fn driver_info(&self, car_idx: i32) -> Option<DriverSessionInfo> {
        (car_idx == 0).then(|| DriverSessionInfo { car_idx, user_name: "Solo".into(), ..Default::default() })
    }

    fn track_name(&self) -> String {
        "Test Ring".to_string()
    }

    fn track_id(&self) -> Option<i32> {
        Some(self.track_id)
    }

    fn track_length_km(&self) -> f32 {
        2.0
    }

    fn session_lap_limit(&self) -> Option<u32> {
        None
    }

    async fn start(&self) -> paddock::Result<()> {
        if !self.connected.swap(true, Ordering::SeqCst) {
            *self.started.lock() = Some(Instant::now());
            let _ = self.events.send(SourceEvent::Connected);
        }
        Ok(())
    }

    async fn stop(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            *self.started.lock() = None;
            let _ = self.events.send(SourceEvent::Disconnected);
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<SourceEvent> {
        self.events.subscribe()
    }
}

fn config(cache_dir: &std::path::Path) -> PaddockConfig {
    let mut config = PaddockConfig::default();
    // The loop never ticks on its own; tests step it explicitly
    config.detection =
        DetectionConfig { scan_interval_ms: 3_600_000, monitor_interval_ms: 3_600_000, ..DetectionConfig::default() };
    config.synthetic.seed = Some(3);
    config.track.cache_dir = cache_dir.to_path_buf();
    config
}

fn wire(config: PaddockConfig, car: &Arc<LappingCar>) -> (Paddock, Arc<SyntheticTelemetrySource>) {
    let synthetic = Arc::new(SyntheticTelemetrySource::new(config.synthetic.clone()));
    let paddock = Paddock::with_sources(config, synthetic.clone(), vec![car.clone() as Arc<dyn TelemetrySource>]);
    (paddock, synthetic)
}

#[tokio::test(start_paused = true)]
async fn demo_mode_serves_synthetic_telemetry() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let car = LappingCar::new("live", 9001);
    let (paddock, synthetic) = wire(config(dir.path()), &car);

    paddock.start().await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    let telemetry = paddock.telemetry();
    assert_eq!(paddock.controller().state(), ArbitrationState::DemoMode);
    assert_eq!(telemetry.current_id(), "demo");
    assert!(telemetry.is_connected());
    assert!(telemetry.driver_count() > 1);
    assert!(telemetry.scalar_f32(vars::RPM) > 0.0);

    paddock.shutdown().await;
    assert!(!synthetic.is_connected());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn detected_game_is_served_and_its_outline_captured() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let car = LappingCar::new("live", 9001);
    let (paddock, synthetic) = wire(config(dir.path()), &car);
    paddock.start().await;
    let mut ready = paddock.capture().subscribe_ready();

    car.set_running(true);
    assert_eq!(paddock.controller().tick().await, ArbitrationState::Connected("live".into()));
    assert!(!synthetic.is_connected());

    let telemetry = paddock.telemetry();
    assert_eq!(telemetry.current_id(), "live");
    assert_eq!(telemetry.scalar_f32(vars::RPM), 6500.0);
    assert_eq!(telemetry.driver_info(0).map(|d| d.user_name), Some("Solo".to_string()));

    // Arm on the first lap start, then record one full lap
    tokio::time::sleep(LAP * 3).await;

    let outline = ready.try_recv()?;
    assert_eq!(outline.track_id, 9001);
    assert_eq!(outline.track_name, "Test Ring");
    assert_eq!(outline.points.len(), paddock::track::OUTLINE_POINTS);
    assert!(outline.points.iter().all(|p| (0.0..=1.0).contains(&p.x) && (0.0..=1.0).contains(&p.y)));
    assert_eq!(paddock.capture().phase(), CapturePhase::Captured);
    assert!(dir.path().join("track_9001.json").exists());

    paddock.shutdown().await;
    assert!(!car.is_connected());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn cached_outline_is_shown_without_recording() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;

    let car = LappingCar::new("live", 42);
    let (first, _) = wire(config(dir.path()), &car);
    first.start().await;
    car.set_running(true);
    first.controller().tick().await;
    tokio::time::sleep(LAP * 3).await;
    let captured = first.capture().outline().ok_or_else(|| anyhow::anyhow!("no outline captured"))?;
    first.shutdown().await;

    let car = LappingCar::new("live", 42);
    let (second, _) = wire(config(dir.path()), &car);
    second.start().await;
    car.set_running(true);
    second.controller().tick().await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(second.capture().phase(), CapturePhase::Captured);
    let loaded = second.capture().outline().ok_or_else(|| anyhow::anyhow!("cached outline not loaded"))?;
    assert_eq!(loaded.points.len(), captured.points.len());
    for (a, b) in loaded.points.iter().zip(captured.points.iter()) {
        assert!((a.x - b.x).abs() < 1e-5 && (a.y - b.y).abs() < 1e-5);
    }

    second.shutdown().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn game_exit_falls_back_to_demo() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let car = LappingCar::new("live", 7);
    let (paddock, synthetic) = wire(config(dir.path()), &car);
    paddock.start().await;
    let mut events = paddock.controller().subscribe();

    car.set_running(true);
    paddock.controller().tick().await;
    car.set_running(false);
    assert_eq!(paddock.controller().tick().await, ArbitrationState::DemoMode);

    assert_eq!(events.recv().await?, ControllerEvent::GameDetected { source_id: "live".into() });
    assert_eq!(events.recv().await?, ControllerEvent::GameDisconnected { source_id: "live".into() });
    assert_eq!(events.recv().await?, ControllerEvent::DemoActivated);

    assert!(synthetic.is_connected());
    assert!(!car.is_connected());
    assert_eq!(paddock.telemetry().current_id(), "demo");

    paddock.shutdown().await;
    paddock.shutdown().await;
    assert!(!synthetic.is_connected());
    Ok(())
}
