//! Command surface driven by a front end.
//!
//! A [`Session`] owns at most one model plus everything that lives beside it:
//! runtime options, the initial snapshot, a bounded ring of periodic
//! snapshots, labelled snapshots and the set of hidden plates. Commands and
//! responses are plain serde enums so any transport can carry them as JSON.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::config::{Integration, SimConfig};
use crate::error::{Result, TectoError};
use crate::model::output::DEFAULT_CROSS_SECTION_STEP_KM;
use crate::model::presets::{PlateInit, Preset};
use crate::model::{CrossSection, FieldInfo, Model, ModelOutput, ModelRecord, OutputChannels, SeedImage, StepOutcome};
use crate::plate::PlateId;
use crate::sphere::Vec3;

/// Periodic snapshots kept before the oldest is dropped.
pub const DEFAULT_SNAPSHOT_CAPACITY: usize = 20;

/// Steps between periodic snapshots.
pub const DEFAULT_SNAPSHOT_INTERVAL: u64 = 100;

// ── Wire types ───────────────────────────────────────────────────────────────

/// Which stored snapshot a restore goes back to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "camelCase")]
pub enum SnapshotTarget {
    Initial,
    Step(u64),
    Label(String),
    /// Newest periodic snapshot, or the initial one when none was taken.
    Latest,
}

/// Options a front end may change while a model is loaded. Absent keys are
/// left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RuntimeOptions {
    pub playing: Option<bool>,
    pub timestep: Option<f64>,
    pub integration: Option<Integration>,
    pub constant_hot_spots: Option<bool>,
    pub erosion: Option<bool>,
    pub sediments: Option<bool>,
    pub output_channels: Option<OutputChannels>,
    /// Passed through to the renderer untouched.
    pub colormap: Option<String>,
    pub output_interval: Option<u64>,
    pub snapshot_interval: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Command {
    Load {
        image: SeedImage,
        #[serde(default)]
        init: PlateInit,
        #[serde(default)]
        config: Option<SimConfig>,
    },
    LoadPreset {
        preset: Preset,
        #[serde(default)]
        config: Option<SimConfig>,
    },
    Unload,
    UpdateRuntimeOptions {
        options: RuntimeOptions,
    },
    /// Advance one step even while paused.
    StepForward,
    SetHotSpot {
        position: Vec3,
        force: Vec3,
    },
    SetDensities {
        densities: BTreeMap<PlateId, f64>,
    },
    QueryFieldAt {
        position: Vec3,
    },
    DrawContinent {
        position: Vec3,
    },
    EraseContinent {
        position: Vec3,
    },
    MarkIslands,
    SaveSnapshot {
        #[serde(default)]
        label: Option<String>,
    },
    RestoreSnapshot {
        target: SnapshotTarget,
    },
    MarkField {
        position: Vec3,
    },
    UnmarkAllFields,
    SetPlateVisibility {
        plate_id: PlateId,
        visible: bool,
    },
    CrossSection {
        from: Vec3,
        to: Vec3,
        #[serde(default)]
        step_km: Option<f64>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Response {
    Ack,
    Loaded { plates: usize, fields: usize },
    Field { info: Option<FieldInfo> },
    Output(ModelOutput),
    CrossSection(CrossSection),
    SnapshotSaved { step_idx: u64, label: Option<String> },
    Error { message: String },
}

// ── Session ──────────────────────────────────────────────────────────────────

pub struct Session {
    model: Option<Model>,
    /// Configuration used when a load command brings none.
    config: SimConfig,
    playing: bool,
    channels: OutputChannels,
    colormap: Option<String>,
    output_interval: u64,
    snapshot_interval: u64,
    snapshot_capacity: usize,
    initial: Option<ModelRecord>,
    /// Periodic snapshots, oldest first.
    ring: VecDeque<ModelRecord>,
    labelled: BTreeMap<String, ModelRecord>,
    hidden: BTreeSet<PlateId>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new(SimConfig::default())
    }
}

impl Session {
    pub fn new(config: SimConfig) -> Self {
        Self::with_capacity(config, DEFAULT_SNAPSHOT_CAPACITY)
    }

    pub fn with_capacity(config: SimConfig, snapshot_capacity: usize) -> Self {
        Self {
            model: None,
            config,
            playing: false,
            channels: OutputChannels::default(),
            colormap: None,
            output_interval: 1,
            snapshot_interval: DEFAULT_SNAPSHOT_INTERVAL,
            snapshot_capacity: snapshot_capacity.max(1),
            initial: None,
            ring: VecDeque::new(),
            labelled: BTreeMap::new(),
            hidden: BTreeSet::new(),
        }
    }

    pub fn model(&self) -> Option<&Model> {
        self.model.as_ref()
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn colormap(&self) -> Option<&str> {
        self.colormap.as_deref()
    }

    /// Step numbers of the stored periodic snapshots, oldest first.
    pub fn snapshot_steps(&self) -> Vec<u64> {
        self.ring.iter().map(|r| r.step_idx).collect()
    }

    pub fn output(&self) -> Option<ModelOutput> {
        self.model.as_ref().map(|m| m.output(&self.channels, &self.hidden))
    }

    /// Execute one command; failures become [`Response::Error`].
    pub fn handle(&mut self, command: Command) -> Response {
        match self.execute(command) {
            Ok(response) => response,
            Err(e) => {
                warn!("command failed: {e}");
                Response::Error { message: e.to_string() }
            }
        }
    }

    /// JSON in, JSON out.
    pub fn handle_json(&mut self, json: &str) -> String {
        let response = match serde_json::from_str::<Command>(json) {
            Ok(command) => self.handle(command),
            Err(e) => Response::Error { message: TectoError::from(e).to_string() },
        };
        serde_json::to_string(&response).unwrap_or_else(|e| format!(r#"{{"type":"error","message":"{e}"}}"#))
    }

    /// Advance one step while playing. Returns a summary whenever the output
    /// interval is reached or the model diverges.
    pub fn tick(&mut self) -> Option<ModelOutput> {
        if !self.playing {
            return None;
        }
        match self.advance() {
            Some(StepOutcome::Advanced) => {
                let step = self.model.as_ref().map_or(0, |m| m.step_idx());
                if step % self.output_interval == 0 {
                    self.output()
                } else {
                    None
                }
            }
            Some(StepOutcome::Diverged) => {
                self.playing = false;
                self.output()
            }
            None => None,
        }
    }

    fn advance(&mut self) -> Option<StepOutcome> {
        let model = self.model.as_mut()?;
        let outcome = model.step();
        if outcome == StepOutcome::Advanced && model.step_idx() % self.snapshot_interval == 0 {
            let record = model.to_record();
            self.push_periodic(record);
        }
        Some(outcome)
    }

    fn push_periodic(&mut self, record: ModelRecord) {
        self.ring.push_back(record);
        while self.ring.len() > self.snapshot_capacity {
            self.ring.pop_front();
        }
    }

    fn model_mut(&mut self) -> Result<&mut Model> {
        self.model.as_mut().ok_or(TectoError::NoModel)
    }

    fn model_ref(&self) -> Result<&Model> {
        self.model.as_ref().ok_or(TectoError::NoModel)
    }

    fn install(&mut self, model: Model) -> Response {
        let response = Response::Loaded { plates: model.plates().len(), fields: model.field_count() };
        info!("loaded model with {} plates", model.plates().len());
        self.config = model.config().clone();
        self.initial = Some(model.to_record());
        self.ring.clear();
        self.labelled.clear();
        self.hidden.clear();
        self.model = Some(model);
        response
    }

    fn find_snapshot(&self, target: &SnapshotTarget) -> Result<&ModelRecord> {
        let found = match target {
            SnapshotTarget::Initial => self.initial.as_ref(),
            SnapshotTarget::Step(idx) => self.ring.iter().find(|r| r.step_idx == *idx),
            SnapshotTarget::Label(name) => self.labelled.get(name),
            SnapshotTarget::Latest => self.ring.back().or(self.initial.as_ref()),
        };
        found.ok_or_else(|| TectoError::SnapshotNotFound(format!("{target:?}")))
    }

    fn apply_options(&mut self, options: RuntimeOptions) -> Result<()> {
        let mut config = self.model.as_ref().map_or_else(|| self.config.clone(), |m| m.config().clone());
        if let Some(v) = options.timestep {
            config.timestep = v;
        }
        if let Some(v) = options.integration {
            config.integration = v;
        }
        if let Some(v) = options.constant_hot_spots {
            config.constant_hot_spots = v;
        }
        if let Some(v) = options.erosion {
            config.erosion = v;
        }
        if let Some(v) = options.sediments {
            config.sediments = v;
        }
        config.validate()?;
        for (name, value) in [("outputInterval", options.output_interval), ("snapshotInterval", options.snapshot_interval)] {
            if value == Some(0) {
                return Err(TectoError::InvalidConfig(format!("{name} must be at least 1")));
            }
        }

        if let Some(model) = self.model.as_mut() {
            *model.config_mut() = config.clone();
        }
        self.config = config;
        if let Some(v) = options.playing {
            self.playing = v;
        }
        if let Some(v) = options.output_channels {
            self.channels = v;
        }
        if options.colormap.is_some() {
            self.colormap = options.colormap;
        }
        if let Some(v) = options.output_interval {
            self.output_interval = v;
        }
        if let Some(v) = options.snapshot_interval {
            self.snapshot_interval = v;
        }
        Ok(())
    }

    fn execute(&mut self, command: Command) -> Result<Response> {
        let response = match command {
            Command::Load { image, init, config } => {
                let config = config.unwrap_or_else(|| self.config.clone());
                let model = Model::from_seed_image(config, &image, |m| init.apply(m))?;
                self.install(model)
            }
            Command::LoadPreset { preset, config } => {
                let config = config.unwrap_or_else(|| self.config.clone());
                let model = preset.build(config)?;
                self.install(model)
            }
            Command::Unload => {
                self.model = None;
                self.playing = false;
                self.initial = None;
                self.ring.clear();
                self.labelled.clear();
                self.hidden.clear();
                info!("model unloaded");
                Response::Ack
            }
            Command::UpdateRuntimeOptions { options } => {
                self.apply_options(options)?;
                Response::Ack
            }
            Command::StepForward => {
                self.model_ref()?;
                self.advance();
                Response::Output(self.output().ok_or(TectoError::NoModel)?)
            }
            Command::SetHotSpot { position, force } => {
                self.model_mut()?.set_hot_spot(position, force).ok_or_else(|| no_plate_at(&position))?;
                Response::Ack
            }
            Command::SetDensities { densities } => {
                self.model_mut()?.set_densities(&densities)?;
                Response::Ack
            }
            Command::QueryFieldAt { position } => Response::Field { info: self.model_ref()?.field_info(&position) },
            Command::DrawContinent { position } => {
                if !self.model_mut()?.draw_continent(&position) {
                    return Err(no_plate_at(&position));
                }
                Response::Ack
            }
            Command::EraseContinent { position } => {
                if !self.model_mut()?.erase_continent(&position) {
                    return Err(no_plate_at(&position));
                }
                Response::Ack
            }
            Command::MarkIslands => {
                self.model_mut()?.mark_islands();
                Response::Ack
            }
            Command::SaveSnapshot { label } => {
                let record = self.model_ref()?.to_record();
                let step_idx = record.step_idx;
                match &label {
                    Some(name) => {
                        self.labelled.insert(name.clone(), record);
                    }
                    None => self.push_periodic(record),
                }
                Response::SnapshotSaved { step_idx, label }
            }
            Command::RestoreSnapshot { target } => {
                let current = self.model_ref()?;
                let (config, grid) = (current.config().clone(), current.shared_grid());
                let record = self.find_snapshot(&target)?.clone();
                let step = record.step_idx;
                let model = Model::from_record(config, grid, record)?;
                self.ring.retain(|r| r.step_idx <= step);
                self.model = Some(model);
                info!("restored {target:?}");
                Response::Ack
            }
            Command::MarkField { position } => {
                if !self.model_mut()?.mark_field(&position) {
                    return Err(no_plate_at(&position));
                }
                Response::Ack
            }
            Command::UnmarkAllFields => {
                self.model_mut()?.unmark_all_fields();
                Response::Ack
            }
            Command::SetPlateVisibility { plate_id, visible } => {
                if self.model_ref()?.plate(plate_id).is_none() {
                    return Err(TectoError::UnknownPlate(plate_id));
                }
                if visible {
                    self.hidden.remove(&plate_id);
                } else {
                    self.hidden.insert(plate_id);
                }
                Response::Ack
            }
            Command::CrossSection { from, to, step_km } => {
                let step = step_km.unwrap_or(DEFAULT_CROSS_SECTION_STEP_KM);
                Response::CrossSection(self.model_ref()?.cross_section(&from, &to, step))
            }
        };
        Ok(response)
    }
}

fn no_plate_at(p: &Vec3) -> TectoError {
    TectoError::NoPlateAt { x: p.x, y: p.y, z: p.z }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session::with_capacity(SimConfig { divisions: 6, ..SimConfig::default() }, 3)
    }

    fn loaded() -> Session {
        let mut s = session();
        let r = s.handle(Command::LoadPreset { preset: Preset::TwoPlates, config: None });
        assert!(matches!(r, Response::Loaded { plates: 2, .. }));
        s
    }

    #[test]
    fn commands_need_a_model() {
        let mut s = session();
        assert!(matches!(s.handle(Command::StepForward), Response::Error { .. }));
        assert!(matches!(s.handle(Command::MarkIslands), Response::Error { .. }));
        assert!(s.tick().is_none());
    }

    #[test]
    fn edits_off_every_plate_are_errors() {
        let mut s = session();
        let mut m = Model::new(SimConfig { divisions: 6, ..SimConfig::default() }).unwrap();
        let a = m.add_plate(0.0);
        let north: Vec<_> = m.grid().fields().iter().filter(|f| f.position.z > 0.5).map(|f| f.id).collect();
        crate::model::fill_plate(m.plate_mut(a).unwrap(), north, false);
        m.refresh_plates();
        s.install(m);

        let south = Vec3::new(0.0, 0.0, -1.0);
        let missed = [
            Command::SetHotSpot { position: south, force: Vec3::new(0.0, 0.1, 0.0) },
            Command::DrawContinent { position: south },
            Command::EraseContinent { position: south },
            Command::MarkField { position: south },
        ];
        for command in missed {
            match s.handle(command) {
                Response::Error { message } => assert!(message.starts_with("no plate at"), "{message}"),
                other => panic!("unexpected {other:?}"),
            }
        }
        let north = Vec3::new(0.0, 0.0, 1.0);
        assert_eq!(s.handle(Command::DrawContinent { position: north }), Response::Ack);
        assert_eq!(s.handle(Command::MarkField { position: north }), Response::Ack);
    }

    #[test]
    fn step_forward_while_paused() {
        let mut s = loaded();
        assert!(!s.is_playing());
        assert!(s.tick().is_none());
        match s.handle(Command::StepForward) {
            Response::Output(out) => {
                assert_eq!(out.step_idx, 1);
                assert_eq!(out.plates.len(), 2);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn ring_keeps_newest_snapshots() {
        let mut s = loaded();
        let options = RuntimeOptions { playing: Some(true), snapshot_interval: Some(1), ..RuntimeOptions::default() };
        assert_eq!(s.handle(Command::UpdateRuntimeOptions { options }), Response::Ack);
        for _ in 0..5 {
            assert!(s.tick().is_some());
        }
        assert_eq!(s.snapshot_steps(), vec![3, 4, 5]);

        let r = s.handle(Command::RestoreSnapshot { target: SnapshotTarget::Step(4) });
        assert_eq!(r, Response::Ack);
        assert_eq!(s.model().unwrap().step_idx(), 4);
        assert_eq!(s.snapshot_steps(), vec![3, 4]);
        assert!(matches!(
            s.handle(Command::RestoreSnapshot { target: SnapshotTarget::Step(1) }),
            Response::Error { .. }
        ));
        s.handle(Command::RestoreSnapshot { target: SnapshotTarget::Initial });
        assert_eq!(s.model().unwrap().step_idx(), 0);
    }

    #[test]
    fn labelled_snapshot_round_trip() {
        let mut s = loaded();
        s.handle(Command::StepForward);
        let saved = s.handle(Command::SaveSnapshot { label: Some("a".into()) });
        assert_eq!(saved, Response::SnapshotSaved { step_idx: 1, label: Some("a".into()) });
        let expected = s.model().unwrap().to_json().unwrap();
        s.handle(Command::StepForward);
        s.handle(Command::StepForward);
        s.handle(Command::RestoreSnapshot { target: SnapshotTarget::Label("a".into()) });
        assert_eq!(s.model().unwrap().to_json().unwrap(), expected);
    }

    #[test]
    fn hidden_plates_leave_output() {
        let mut s = loaded();
        let id = s.model().unwrap().plates()[0].id;
        s.handle(Command::SetPlateVisibility { plate_id: id, visible: false });
        let out = s.output().unwrap();
        assert_eq!(out.plates.len(), 1);
        assert!(out.plates.iter().all(|p| p.id != id));
        s.handle(Command::SetPlateVisibility { plate_id: id, visible: true });
        assert_eq!(s.output().unwrap().plates.len(), 2);
        assert!(matches!(
            s.handle(Command::SetPlateVisibility { plate_id: 99, visible: false }),
            Response::Error { .. }
        ));
    }

    #[test]
    fn invalid_options_are_rejected_whole() {
        let mut s = loaded();
        let options = RuntimeOptions { playing: Some(true), timestep: Some(-1.0), ..RuntimeOptions::default() };
        assert!(matches!(s.handle(Command::UpdateRuntimeOptions { options }), Response::Error { .. }));
        assert!(!s.is_playing());
        let options = RuntimeOptions {
            integration: Some(Integration::Rk4),
            colormap: Some("topo".into()),
            ..RuntimeOptions::default()
        };
        s.handle(Command::UpdateRuntimeOptions { options });
        assert_eq!(s.model().unwrap().config().integration, Integration::Rk4);
        assert_eq!(s.colormap(), Some("topo"));
    }

    #[test]
    fn json_commands() {
        let mut s = session();
        let out = s.handle_json(r#"{"type":"loadPreset","preset":{"name":"twoPlates"}}"#);
        assert!(out.contains(r#""type":"loaded""#), "{out}");
        let out = s.handle_json(r#"{"type":"queryFieldAt","position":[-1.0,0.0,0.0]}"#);
        assert!(out.contains(r#""continental":true"#), "{out}");
        let out = s.handle_json(r#"{"type":"restoreSnapshot","target":{"kind":"label","value":"nope"}}"#);
        assert!(out.contains(r#""type":"error""#), "{out}");
        let out = s.handle_json(r#"{"type":"warp"}"#);
        assert!(out.contains(r#""type":"error""#), "{out}");
    }

    #[test]
    fn cross_section_uses_default_step() {
        let mut s = loaded();
        let r = s.handle(Command::CrossSection {
            from: Vec3::new(1.0, 0.0, 0.0),
            to: Vec3::new(0.0, 1.0, 0.0),
            step_km: None,
        });
        match r {
            Response::CrossSection(cs) => {
                let points: usize = cs.segments.iter().map(|seg| seg.points.len()).sum();
                let expected = (cs.length_km / DEFAULT_CROSS_SECTION_STEP_KM).ceil() as usize + 1;
                assert_eq!(points, expected);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
