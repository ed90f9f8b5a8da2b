//! Operator command surface: one mutator entry point over a shared status
//! record, read by the display and dispatcher threads and written by
//! whatever front end parses operator input. Grounded in `RadarGUI.cpp`'s
//! command handlers, generalized off a specific widget toolkit into a plain
//! state record.

use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorMap {
    Hot,
    Jet,
    Gray,
}

#[derive(Debug, Clone, Copy)]
pub struct CommandStatus {
    pub disp_ref_db: f64,
    pub disp_range: f64,
    pub sim_on: bool,
    pub sim_amp_db: f64,
    pub mark_peak: bool,
    pub cmap: ColorMap,
    pub raw_recording: bool,
    pub proc_recording: bool,
}

#[derive(Debug, Clone, Copy)]
pub enum Command {
    SetDisplayScale { ref_db: f64, range_db: f64 },
    SetColormap(ColorMap),
    SetPeakOverlay(bool),
    SetRawRecording(bool),
    SetProcRecording(bool),
    SetSimOn(bool),
    SetSimAmp(f64),
}

/// Mirrors `radarConfig.cpp`'s bounds for the equivalent INI fields.
const MIN_DISP_RANGE_DB: f64 = 5.0;
const MAX_DISP_RANGE_DB: f64 = 100.0;
const MIN_SIM_AMP_DB: f64 = -100.0;
const MAX_SIM_AMP_DB: f64 = 0.0;

pub struct CommandState {
    inner: Mutex<CommandStatus>,
}

impl CommandState {
    pub fn new(initial_ref_db: f64, initial_disp_range: f64) -> CommandState {
        CommandState {
            inner: Mutex::new(CommandStatus {
                disp_ref_db: initial_ref_db,
                disp_range: initial_disp_range,
                sim_on: false,
                sim_amp_db: -20.0,
                mark_peak: true,
                cmap: ColorMap::Hot,
                raw_recording: false,
                proc_recording: false,
            }),
        }
    }

    pub fn status(&self) -> CommandStatus {
        *self.inner.lock().unwrap()
    }

    /// Applies one command. Out-of-range values are rejected outright,
    /// leaving the stored state untouched.
    pub fn apply(&self, command: Command) -> Result<(), String> {
        let mut status = self.inner.lock().unwrap();
        match command {
            Command::SetDisplayScale { ref_db, range_db } => {
                if !ref_db.is_finite() {
                    return Err(format!("ref_db must be finite, got {ref_db}"));
                }
                if !(MIN_DISP_RANGE_DB..MAX_DISP_RANGE_DB).contains(&range_db) {
                    return Err(format!(
                        "disp_range ({range_db}) must be in ({MIN_DISP_RANGE_DB}, {MAX_DISP_RANGE_DB})"
                    ));
                }
                status.disp_ref_db = ref_db;
                status.disp_range = range_db;
            }
            Command::SetColormap(cmap) => status.cmap = cmap,
            Command::SetPeakOverlay(on) => status.mark_peak = on,
            Command::SetRawRecording(on) => status.raw_recording = on,
            Command::SetProcRecording(on) => status.proc_recording = on,
            Command::SetSimOn(on) => status.sim_on = on,
            Command::SetSimAmp(db) => {
                if !db.is_finite() || !(MIN_SIM_AMP_DB..=MAX_SIM_AMP_DB).contains(&db) {
                    return Err(format!("sim_amp_db ({db}) must be finite and in [{MIN_SIM_AMP_DB}, {MAX_SIM_AMP_DB}]"));
                }
                status.sim_amp_db = db;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_display_scale_is_applied() {
        let state = CommandState::new(-80.0, 40.0);
        state.apply(Command::SetDisplayScale { ref_db: -70.0, range_db: 50.0 }).unwrap();
        let status = state.status();
        assert_eq!(status.disp_ref_db, -70.0);
        assert_eq!(status.disp_range, 50.0);
    }

    #[test]
    fn out_of_range_disp_range_is_rejected_without_mutation() {
        let state = CommandState::new(-80.0, 40.0);
        assert!(state.apply(Command::SetDisplayScale { ref_db: -70.0, range_db: 200.0 }).is_err());
        let status = state.status();
        assert_eq!(status.disp_range, 40.0);
    }

    #[test]
    fn non_finite_sim_amp_is_rejected() {
        let state = CommandState::new(-80.0, 40.0);
        assert!(state.apply(Command::SetSimAmp(f64::NAN)).is_err());
        assert!(state.apply(Command::SetSimAmp(f64::INFINITY)).is_err());
        assert_eq!(state.status().sim_amp_db, -20.0);
    }

    #[test]
    fn sim_amp_out_of_bounds_is_rejected() {
        let state = CommandState::new(-80.0, 40.0);
        assert!(state.apply(Command::SetSimAmp(10.0)).is_err());
        assert!(state.apply(Command::SetSimAmp(-5.0)).is_ok());
        assert_eq!(state.status().sim_amp_db, -5.0);
    }

    #[test]
    fn toggles_apply_independently() {
        let state = CommandState::new(-80.0, 40.0);
        state.apply(Command::SetPeakOverlay(false)).unwrap();
        state.apply(Command::SetRawRecording(true)).unwrap();
        let status = state.status();
        assert!(!status.mark_peak);
        assert!(status.raw_recording);
        assert!(!status.proc_recording);
    }
}
