//! Scripted fakes and fixtures shared by the unit tests and benches.
//!
//! Every fake here is driven by the test: nothing polls, nothing sleeps
//! unless told to. Counters record how the code under test used the fake.

#![cfg(any(test, feature = "benchmark"))]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::broadcast;

use crate::process::ProcessProbe;
use crate::provider::{Provider, ProviderFactory};
use crate::sdk::{SdkEvent, TelemetrySdk};
use crate::source::{DriverSessionInfo, EVENT_CHANNEL_CAPACITY, SourceEvent, TelemetrySource};
use crate::track::TrackOutlineSample;
use crate::types::{FramePacket, VariableInfo, VariableSchema, VariableType};
use crate::{Result, TelemetryError};

/// Session document in iRacing's shape, including an unquoted apostrophe
/// that only parses after preprocessing.
pub const SESSION_YAML: &str = r#"---
WeekendInfo:
 TrackName: watkinsglen 2021 fullcourse
 TrackID: 434
 TrackLength: 5.43 km
 TrackDisplayName: Watkins Glen
 TrackDisplayShortName: Glen
 TrackConfigName: Boot
 TrackCity: Watkins Glen
 TrackCountry: USA
 TrackNumTurns: 11
 TrackType: road course
 EventType: Race
 Category: Road

SessionInfo:
 CurrentSessionNum: 2
 Sessions:
 - SessionNum: 0
   SessionLaps: unlimited
   SessionTime: 1800.0000 sec
   SessionType: Practice
   SessionName: PRACTICE
 - SessionNum: 2
   SessionLaps: "12"
   SessionTime: unlimited
   SessionType: Race
   SessionName: RACE

DriverInfo:
 DriverCarIdx: 1
 DriverUserID: 412345
 PaceCarIdx: 0
 Drivers:
 - CarIdx: 0
   UserName: Pace Car
   UserID: -1
   TeamName: Pace Car
   CarNumber: "0"
   CarScreenName: Mercedes-AMG GT Safety Car
   CarScreenNameShort: Safety Car
   CarClassShortName: Pace
   CarClassColor: 0xffffff
   CarIsPaceCar: 1
   CarIsAI: 0
   IRating: 0
   LicString: R 0.00
   LicColor: 0xfc0706
   IsSpectator: 0
 - CarIdx: 1
   UserName: Sam O'Reilly
   UserID: 412345
   TeamName: Sam O'Reilly
   CarNumber: "17"
   CarScreenName: Porsche 911 GT3 R (992)
   CarScreenNameShort: 911 GT3 R
   CarClassShortName: GT3
   CarClassColor: 0xffda59
   CarIsPaceCar: 0
   CarIsAI: 0
   IRating: 2650
   LicString: A 4.99
   LicColor: 0x0153db
   IsSpectator: 0
 - CarIdx: 2
   UserName: Priya Natarajan
   UserID: 398211
   TeamName: Apex Collective
   CarNumber: "44"
   CarScreenName: BMW M4 GT3
   CarScreenNameShort: M4 GT3
   CarClassShortName: GT3
   CarClassColor: 0xffda59
   CarIsPaceCar: 0
   CarIsAI: 0
   IRating: 3120
   LicString: A 3.20
   LicColor: 0x0153db
   IsSpectator: 0
"#;

/// A lap of `count` samples around a circle of `radius` metres, lap
/// fraction `i / count`.
pub fn circle_lap_samples(count: usize, radius: f32) -> Vec<TrackOutlineSample> {
    (0..count)
        .map(|i| {
            let pct = i as f32 / count as f32;
            let angle = std::f32::consts::TAU * pct;
            TrackOutlineSample { lap_dist_pct: pct, x: radius * angle.cos(), y: radius * angle.sin() }
        })
        .collect()
}

/// Telemetry source whose every answer is set by the test.
pub struct FakeSource {
    id: String,
    scalars: Mutex<HashMap<String, f32>>,
    arrays: Mutex<HashMap<(String, usize), f32>>,
    track: Mutex<(Option<i32>, String)>,
    roster: Mutex<Vec<DriverSessionInfo>>,
    events: broadcast::Sender<SourceEvent>,
    connected: AtomicBool,
    running: AtomicBool,
    probe_error: AtomicBool,
    fail_start: AtomicBool,
    starts: AtomicUsize,
    stops: AtomicUsize,
    probes: AtomicUsize,
}

impl FakeSource {
    pub fn new(id: &str) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            id: id.to_string(),
            scalars: Mutex::new(HashMap::new()),
            arrays: Mutex::new(HashMap::new()),
            track: Mutex::new((None, String::new())),
            roster: Mutex::new(Vec::new()),
            events,
            connected: AtomicBool::new(false),
            running: AtomicBool::new(false),
            probe_error: AtomicBool::new(false),
            fail_start: AtomicBool::new(false),
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
            probes: AtomicUsize::new(0),
        }
    }

    pub fn set_scalar(&self, name: &str, value: f32) {
        self.scalars.lock().insert(name.to_string(), value);
    }

    pub fn set_array(&self, name: &str, car_idx: usize, value: f32) {
        self.arrays.lock().insert((name.to_string(), car_idx), value);
    }

    pub fn set_track(&self, track_id: Option<i32>, track_name: &str) {
        *self.track.lock() = (track_id, track_name.to_string());
    }

    pub fn set_roster(&self, roster: Vec<DriverSessionInfo>) {
        *self.roster.lock() = roster;
    }

    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }

    pub fn set_probe_error(&self, failing: bool) {
        self.probe_error.store(failing, Ordering::SeqCst);
    }

    pub fn set_fail_start(&self, failing: bool) {
        self.fail_start.store(failing, Ordering::SeqCst);
    }

    pub fn emit(&self, event: SourceEvent) {
        let _ = self.events.send(event);
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn probes(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    fn scalar(&self, name: &str) -> Option<f32> {
        self.scalars.lock().get(name).copied()
    }

    fn array(&self, name: &str, car_idx: usize) -> Option<f32> {
        self.arrays.lock().get(&(name.to_string(), car_idx)).copied()
    }
}

#[async_trait]
impl TelemetrySource for FakeSource {
    fn id(&self) -> &str {
        &self.id
    }

    fn display_name(&self) -> &str {
        &self.id
    }

    async fn is_game_running(&self) -> Result<bool> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        if self.probe_error.load(Ordering::SeqCst) {
            return Err(TelemetryError::process_probe_failed("scripted probe failure"));
        }
        Ok(self.running.load(Ordering::SeqCst))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn scalar_f32(&self, name: &str) -> f32 {
        self.scalar(name).unwrap_or(0.0)
    }

    fn scalar_i32(&self, name: &str) -> i32 {
        self.scalar(name).map_or(0, |v| v as i32)
    }

    fn scalar_bool(&self, name: &str) -> bool {
        self.scalar(name).is_some_and(|v| v != 0.0)
    }

    fn array_f32(&self, name: &str, car_idx: usize) -> f32 {
        self.array(name, car_idx).unwrap_or(0.0)
    }

    fn array_i32(&self, name: &str, car_idx: usize) -> i32 {
        self.array(name, car_idx).map_or(0, |v| v as i32)
    }

    fn array_bool(&self, name: &str, car_idx: usize) -> bool {
        self.array(name, car_idx).is_some_and(|v| v != 0.0)
    }

    fn driver_count(&self) -> usize {
        self.roster.lock().len()
    }

    fn player_car_index(&self) -> i32 {
        if self.roster.lock().is_empty() { -1 } else { 0 }
    }

    fn driver_info(&self, car_idx: i32) -> Option<DriverSessionInfo> {
        self.roster.lock().iter().find(|d| d.car_idx == car_idx).cloned()
    }

    fn track_name(&self) -> String {
        self.track.lock().1.clone()
    }

    fn track_id(&self) -> Option<i32> {
        self.track.lock().0
    }

    fn track_length_km(&self) -> f32 {
        0.0
    }

    fn session_lap_limit(&self) -> Option<u32> {
        None
    }

    async fn start(&self) -> Result<()> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(TelemetryError::connection_failed("scripted start failure"));
        }
        if !self.connected.swap(true, Ordering::SeqCst) {
            self.emit(SourceEvent::Connected);
        }
        Ok(())
    }

    async fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        if self.connected.swap(false, Ordering::SeqCst) {
            self.emit(SourceEvent::Disconnected);
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<SourceEvent> {
        self.events.subscribe()
    }
}

/// Process probe answering a fixed value.
#[derive(Debug, Default)]
pub struct StaticProcessProbe {
    running: AtomicBool,
    failing: AtomicBool,
    calls: AtomicUsize,
}

impl StaticProcessProbe {
    pub fn new(running: bool) -> Self {
        Self { running: AtomicBool::new(running), ..Self::default() }
    }

    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProcessProbe for StaticProcessProbe {
    async fn any_running(&self, _executable_names: &[String]) -> Result<bool> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(TelemetryError::process_probe_failed("scripted probe failure"));
        }
        Ok(self.running.load(Ordering::SeqCst))
    }
}

/// SDK whose events and values are pushed by the test.
pub struct ScriptedSdk {
    events: broadcast::Sender<SdkEvent>,
    values: Mutex<HashMap<(String, usize), f32>>,
    yaml: Mutex<Option<String>>,
    connected: AtomicBool,
    running: AtomicBool,
    starts: AtomicUsize,
    stops: AtomicUsize,
}

impl Default for ScriptedSdk {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedSdk {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            events,
            values: Mutex::new(HashMap::new()),
            yaml: Mutex::new(None),
            connected: AtomicBool::new(false),
            running: AtomicBool::new(false),
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
        }
    }

    /// Send `event`, tracking connection state the way a real SDK would.
    pub fn emit(&self, event: SdkEvent) {
        match event {
            SdkEvent::Connected => self.connected.store(true, Ordering::SeqCst),
            SdkEvent::Disconnected => self.connected.store(false, Ordering::SeqCst),
            _ => {}
        }
        let _ = self.events.send(event);
    }

    pub fn set_value(&self, name: &str, index: usize, value: f32) {
        self.values.lock().insert((name.to_string(), index), value);
    }

    pub fn set_yaml(&self, yaml: Option<&str>) {
        *self.yaml.lock() = yaml.map(str::to_string);
    }

    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    fn value(&self, name: &str, index: usize) -> Option<f32> {
        self.values.lock().get(&(name.to_string(), index)).copied()
    }
}

#[async_trait]
impl TelemetrySdk for ScriptedSdk {
    async fn start(&self) -> Result<()> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
    }

    fn subscribe(&self) -> broadcast::Receiver<SdkEvent> {
        self.events.subscribe()
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn is_sim_running(&self) -> Result<bool> {
        Ok(self.running.load(Ordering::SeqCst))
    }

    fn read_f32(&self, name: &str, index: usize) -> Option<f32> {
        self.value(name, index)
    }

    fn read_i32(&self, name: &str, index: usize) -> Option<i32> {
        self.value(name, index).map(|v| v as i32)
    }

    fn read_bool(&self, name: &str, index: usize) -> Option<bool> {
        self.value(name, index).map(|v| v != 0.0)
    }

    fn session_yaml(&self) -> Option<String> {
        self.yaml.lock().clone()
    }
}

/// Builds frames with a matching schema, variables laid out back to back.
#[derive(Debug, Default)]
pub struct FrameBuilder {
    variables: Vec<VariableInfo>,
    data: Vec<u8>,
}

impl FrameBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(mut self, name: &str, data_type: VariableType, count: usize, bytes: Vec<u8>) -> Self {
        self.variables.push(VariableInfo {
            name: name.to_string(),
            data_type,
            offset: self.data.len(),
            count,
            count_as_time: false,
            units: String::new(),
            description: String::new(),
        });
        self.data.extend(bytes);
        self
    }

    pub fn f32(self, name: &str, values: &[f32]) -> Self {
        let bytes = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        self.push(name, VariableType::Float32, values.len(), bytes)
    }

    pub fn i32(self, name: &str, values: &[i32]) -> Self {
        let bytes = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        self.push(name, VariableType::Int32, values.len(), bytes)
    }

    pub fn bool(self, name: &str, values: &[bool]) -> Self {
        let bytes = values.iter().map(|&v| u8::from(v)).collect();
        self.push(name, VariableType::Bool, values.len(), bytes)
    }

    pub fn build(self, tick: u32, session_version: u32) -> FramePacket {
        let frame_size = self.data.len();
        let schema = VariableSchema::new(self.variables, frame_size).expect("fixture schema is valid");
        FramePacket::new(self.data, tick, session_version, Arc::new(schema))
    }
}

/// One scripted answer of [`ScriptedProvider::next_frame`].
#[derive(Debug, Clone)]
pub enum ScriptStep {
    Frame(FramePacket),
    /// The sim went away
    End,
    /// A transient read failure
    Fail,
}

/// Provider replaying a script; waits forever once the script runs out.
pub struct ScriptedProvider {
    steps: VecDeque<ScriptStep>,
    yaml: String,
    yaml_requests: Arc<AtomicUsize>,
}

#[async_trait]
impl Provider for ScriptedProvider {
    async fn next_frame(&mut self) -> Result<Option<FramePacket>> {
        match self.steps.pop_front() {
            Some(ScriptStep::Frame(frame)) => Ok(Some(frame)),
            Some(ScriptStep::End) => Ok(None),
            Some(ScriptStep::Fail) => Err(TelemetryError::buffer_operation_error("scripted read failure", None)),
            None => std::future::pending().await,
        }
    }

    async fn session_yaml(&mut self, _version: u32) -> Result<Option<String>> {
        self.yaml_requests.fetch_add(1, Ordering::SeqCst);
        Ok(Some(self.yaml.clone()).filter(|yaml| !yaml.is_empty()))
    }

    fn tick_rate(&self) -> f64 {
        60.0
    }
}

struct FactoryState {
    yaml: String,
    sessions: Mutex<VecDeque<Vec<ScriptStep>>>,
    opens: AtomicUsize,
    yaml_requests: Arc<AtomicUsize>,
}

/// Hands out one [`ScriptedProvider`] per pushed session, then fails opens.
#[derive(Clone)]
pub struct ScriptedFactory {
    state: Arc<FactoryState>,
}

impl ScriptedFactory {
    /// Every provider answers `session_yaml` with `yaml` (`None` when empty).
    pub fn new(yaml: &str) -> Self {
        let state = FactoryState {
            yaml: yaml.to_string(),
            sessions: Mutex::new(VecDeque::new()),
            opens: AtomicUsize::new(0),
            yaml_requests: Arc::new(AtomicUsize::new(0)),
        };
        Self { state: Arc::new(state) }
    }

    pub fn push_session(&self, steps: Vec<ScriptStep>) {
        self.state.sessions.lock().push_back(steps);
    }

    pub fn opens(&self) -> usize {
        self.state.opens.load(Ordering::SeqCst)
    }

    pub fn yaml_requests(&self) -> usize {
        self.state.yaml_requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderFactory for ScriptedFactory {
    type Provider = ScriptedProvider;

    async fn open(&self) -> Result<ScriptedProvider> {
        self.state.opens.fetch_add(1, Ordering::SeqCst);
        let steps = self
            .state
            .sessions
            .lock()
            .pop_front()
            .ok_or_else(|| TelemetryError::connection_failed("no scripted session"))?;
        Ok(ScriptedProvider {
            steps: steps.into(),
            yaml: self.state.yaml.clone(),
            yaml_requests: Arc::clone(&self.state.yaml_requests),
        })
    }
}
