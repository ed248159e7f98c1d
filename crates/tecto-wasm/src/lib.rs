use js_sys::Float32Array;
use tecto_core::host::{Command, Session};
use tecto_core::{PlateId, SimConfig};
use wasm_bindgen::prelude::*;

/// One simulation session owned by the page.
#[wasm_bindgen]
pub struct Simulation {
    session: Session,
}

#[wasm_bindgen]
impl Simulation {
    /// `config_json` is the default SimConfig for loads that bring none.
    #[wasm_bindgen(constructor)]
    pub fn new(config_json: Option<String>) -> Result<Simulation, JsValue> {
        let config = match config_json {
            Some(json) => SimConfig::from_json(&json).map_err(|e| JsValue::from_str(&format!("Invalid config: {e}")))?,
            None => SimConfig::default(),
        };
        Ok(Self { session: Session::new(config) })
    }

    /// Execute a JSON command and return the JSON response.
    pub fn handle(&mut self, command_json: &str) -> String {
        self.session.handle_json(command_json)
    }

    /// Execute a command given as a JS object; the response comes back as one.
    pub fn command(&mut self, command: JsValue) -> Result<JsValue, JsValue> {
        let command: Command = serde_wasm_bindgen::from_value(command)?;
        let response = self.session.handle(command);
        Ok(serde_wasm_bindgen::to_value(&response)?)
    }

    /// Advance one step while playing; returns the model output or `null`.
    pub fn tick(&mut self) -> Result<JsValue, JsValue> {
        match self.session.tick() {
            Some(output) => Ok(serde_wasm_bindgen::to_value(&output)?),
            None => Ok(JsValue::NULL),
        }
    }

    /// Elevation of every field of one plate, in `fieldIds` order.
    #[wasm_bindgen(js_name = plateElevation)]
    pub fn plate_elevation(&self, plate_id: PlateId) -> Option<Float32Array> {
        let model = self.session.model()?;
        let plate = model.plate(plate_id)?;
        let values: Vec<f32> = plate.fields.values().map(|f| f.elevation(model.config()) as f32).collect();
        Some(Float32Array::from(values.as_slice()))
    }
}
