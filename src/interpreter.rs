//! The command interpreter: decodes request lines, runs the handlers and
//! produces the repeated measurement stream.

use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use crate::calibration::{CalibTarget, CalibrationWorkflow, Polarity};
use crate::command::{decode, Arguments, CommandKey};
use crate::config::Settings;
use crate::display::{Screen, NO_VALUE};
use crate::eprom::Eprom;
use crate::error::{DmmError, ErrorKind};
use crate::instrument::Instrument;
use crate::meter::Meter;
use crate::scale::Scale;
use crate::status::StatusComposer;
use crate::store::{CalibrationStore, Region};
use crate::transport::Transport;
use crate::units::{format_raw, format_value, interpret_value};

pub const BANNER: &str = "Command loop\r\n";

/// Streaming state. `calibrated` and `raw` are never both set by a command.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RepeatMode {
    pub calibrated: bool,
    pub raw: bool,
    /// Skip the next production step; set after every processed line.
    pub blocked: bool,
}

impl RepeatMode {
    pub fn is_armed(&self) -> bool {
        self.calibrated || self.raw
    }
}

pub struct Interpreter<M: Meter, E: Eprom, S: Screen> {
    instrument: Instrument<M>,
    workflow: CalibrationWorkflow,
    store: CalibrationStore<E>,
    screen: S,
    composer: StatusComposer,
    repeat: RepeatMode,
    last_error: String,
    average_count: usize,
    command_spacing: Duration,
}

impl<M: Meter, E: Eprom, S: Screen> Interpreter<M, E, S> {
    /// Builds the interpreter and loads the USER calibration record.
    ///
    /// A missing or corrupt record is not fatal: the instrument keeps
    /// identity coefficients, as on a unit that was never calibrated.
    pub fn new(meter: M, store: CalibrationStore<E>, screen: S, settings: &Settings) -> Self {
        let mut interpreter = Self {
            instrument: Instrument::new(meter),
            workflow: CalibrationWorkflow::new(settings.calibration.clone()),
            store,
            screen,
            composer: settings.composer(),
            repeat: RepeatMode::default(),
            last_error: String::new(),
            average_count: settings.average_count,
            command_spacing: settings.command_spacing(),
        };
        match interpreter.store.load(Region::User) {
            Ok(table) => interpreter.instrument.set_coefficients(table),
            Err(e) => warn!(error = %e, "USER calibration not loaded, using identity"),
        }
        interpreter.refresh_screen(NO_VALUE);
        interpreter
    }

    pub fn instrument(&self) -> &Instrument<M> {
        &self.instrument
    }

    pub fn instrument_mut(&mut self) -> &mut Instrument<M> {
        &mut self.instrument
    }

    pub fn workflow(&self) -> &CalibrationWorkflow {
        &self.workflow
    }

    pub fn store(&self) -> &CalibrationStore<E> {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut CalibrationStore<E> {
        &mut self.store
    }

    pub fn screen(&self) -> &S {
        &self.screen
    }

    pub fn repeat_mode(&self) -> RepeatMode {
        self.repeat
    }

    pub fn last_error(&self) -> &str {
        &self.last_error
    }

    /// One cycle of the main loop: at most one request line, then at most
    /// one repeated-mode line.
    ///
    /// Only transport failures are returned. A line the transport rejected,
    /// such as an over-long one, is answered like any failed command.
    pub fn poll<T: Transport>(&mut self, transport: &mut T) -> Result<(), DmmError> {
        match transport.read_line() {
            Ok(Some(line)) => self.handle_line(transport, &line)?,
            Ok(None) => {}
            Err(e) if e.kind() == ErrorKind::Transport => return Err(e),
            Err(e) => {
                warn!(error = %e, "received line rejected");
                self.last_error = e.to_string();
                transport.write_str(&self.composer.failure(&e, ""))?;
                self.repeat.blocked = true;
            }
        }
        self.service_repeat(transport)
    }

    /// Echoes `line`, answers it and holds back the next stream line.
    pub fn handle_line<T: Transport>(&mut self, transport: &mut T, line: &str) -> Result<(), DmmError> {
        transport.write_str(&format!("Received command: {}\r\n", line))?;
        let response = self.execute_line(line);
        transport.write_str(&response)?;
        self.repeat.blocked = true;
        Ok(())
    }

    pub fn service_repeat<T: Transport>(&mut self, transport: &mut T) -> Result<(), DmmError> {
        if let Some(output) = self.repeat_step() {
            transport.write_str(&output)?;
        }
        Ok(())
    }

    /// Decodes and dispatches one line, returning the response text.
    pub fn execute_line(&mut self, line: &str) -> String {
        self.last_error.clear();
        let mut decoded = decode(line);
        debug!(line, key = ?decoded.key, "command decoded");
        if let Some(diagnostic) = decoded.diagnostic.take() {
            self.last_error = diagnostic.to_string();
            // Dispatch still runs for the spacing delay; it is a no-op here.
            self.dispatch(decoded.key, &mut decoded.args);
            return self.composer.failure(&diagnostic, "");
        }
        self.dispatch(decoded.key, &mut decoded.args)
            .unwrap_or_default()
    }

    /// Runs the handler for `key`. Sentinel keys do nothing.
    pub fn dispatch(&mut self, key: CommandKey, args: &mut Arguments<'_>) -> Option<String> {
        let response = match key {
            CommandKey::None | CommandKey::Invalid => None,
            CommandKey::Config => Some(self.cmd_config(args)),
            CommandKey::CalibP => Some(self.cmd_calib(args, CalibTarget::Positive, false)),
            CommandKey::CalibN => Some(self.cmd_calib(args, CalibTarget::Negative, false)),
            CommandKey::CalibZ => Some(self.cmd_calib_zero()),
            CommandKey::MeasureRep => Some(self.cmd_measure_rep()),
            CommandKey::MeasureStop => Some(self.cmd_measure_stop()),
            CommandKey::MeasureRaw => Some(self.cmd_measure_raw()),
            CommandKey::MeasureAvg => Some(self.cmd_measure_avg()),
            CommandKey::SaveEprom => Some(self.cmd_save_eprom()),
            CommandKey::VerifyEprom => Some(self.cmd_verify_eprom()),
            CommandKey::ExportCalib => Some(self.cmd_export_calib()),
            CommandKey::ImportCalib => Some(self.cmd_import_calib(args)),
            CommandKey::MeasureForCalibP => Some(self.cmd_measure_for_calib(Polarity::Positive)),
            CommandKey::MeasureForCalibN => Some(self.cmd_measure_for_calib(Polarity::Negative)),
            CommandKey::FinalizeCalibP => Some(self.cmd_calib(args, CalibTarget::Positive, true)),
            CommandKey::FinalizeCalibN => Some(self.cmd_calib(args, CalibTarget::Negative, true)),
            CommandKey::RestoreFactCalibs => Some(self.cmd_restore_factory()),
            CommandKey::ReadSerialNo => Some(self.cmd_read_serial_no()),
        };
        if !self.command_spacing.is_zero() {
            thread::sleep(self.command_spacing);
        }
        response
    }

    /// One step of the repeated measurement stream, if armed.
    pub fn repeat_step(&mut self) -> Option<String> {
        if self.repeat.blocked {
            self.repeat.blocked = false;
            return None;
        }
        if self.repeat.raw {
            return Some(match self.instrument.read_uncalibrated() {
                Ok(value) => format!("Raw Value: {}\r\n", format_raw(value)),
                Err(e) => self.stream_failure(e),
            });
        }
        if self.repeat.calibrated {
            return Some(match self.read_formatted() {
                Ok(text) => {
                    self.refresh_screen(&text);
                    format!("Value: {}\r\n", text)
                }
                Err(e) => self.stream_failure(e),
            });
        }
        None
    }

    fn stream_failure(&self, e: DmmError) -> String {
        warn!(error = %e, "repeated measurement failed");
        self.composer.failure(&e, "")
    }

    fn refresh_screen(&mut self, value: &str) {
        let scale = self.instrument.scale().map(Scale::name);
        self.screen.show(scale, value);
    }

    fn read_formatted(&mut self) -> Result<String, DmmError> {
        let scale = self.instrument.require_scale()?;
        let value = self.instrument.read_value()?;
        Ok(format_value(value, scale.unit()))
    }

    fn cmd_config(&mut self, args: &mut Arguments<'_>) -> String {
        let name = match args.require() {
            Ok(name) => name,
            Err(e) => return self.composer.failure(&e, ""),
        };
        let Some(scale) = Scale::by_name(name) else {
            return self
                .composer
                .plain_failure(&format!("Missing valid configuration: \"{}\"", name));
        };
        match self.instrument.select_scale(scale) {
            Ok(()) => {
                self.workflow.reset();
                self.refresh_screen(NO_VALUE);
                self.composer
                    .success(&format!("Selected scale index is: {}", scale.index()))
            }
            Err(e) => self.composer.failure(&e, ""),
        }
    }

    fn cmd_calib(&mut self, args: &mut Arguments<'_>, target: CalibTarget, finalize: bool) -> String {
        let text = match args.require() {
            Ok(text) => text,
            Err(e) => return self.composer.failure(&e, ""),
        };
        let scale = match self.instrument.require_scale() {
            Ok(scale) => scale,
            Err(e) => return self.composer.failure(&e, ""),
        };
        let reference = match interpret_value(text, scale) {
            Ok(value) => value,
            Err(e) => return self.composer.failure(&e, text),
        };
        self.run_calibration(scale, target, reference, finalize)
    }

    fn cmd_calib_zero(&mut self) -> String {
        match self.instrument.require_scale() {
            Ok(scale) => self.run_calibration(scale, CalibTarget::Zero, 0.0, true),
            Err(e) => self.composer.failure(&e, ""),
        }
    }

    fn run_calibration(
        &mut self,
        scale: Scale,
        target: CalibTarget,
        reference: f64,
        finalize: bool,
    ) -> String {
        let outcome =
            match self
                .workflow
                .calib_on(&mut self.instrument, target, reference, finalize)
            {
                Ok(outcome) => outcome,
                Err(e) => return self.composer.failure(&e, ""),
            };
        if let Some(changes) = outcome.changes {
            self.last_error = changes;
        }
        let label = match target {
            CalibTarget::Positive => "positive",
            CalibTarget::Negative => "negative",
            CalibTarget::Zero => "zero",
        };
        let unit = scale.unit();
        let mut message = format!(
            "Calibration on {} done. Reference: {}, Measured: {}, Dispersion: {:.2}%",
            label,
            format_value(outcome.reference, unit),
            format_value(outcome.measured, unit),
            outcome.dispersion_percent
        );
        if !self.last_error.is_empty() {
            message.push_str(", ");
            message.push_str(&self.last_error);
        }
        self.composer.success(&message)
    }

    fn cmd_measure_rep(&mut self) -> String {
        self.repeat.calibrated = true;
        self.repeat.raw = false;
        self.composer.success("Measure repeated")
    }

    fn cmd_measure_stop(&mut self) -> String {
        self.repeat.calibrated = false;
        self.repeat.raw = false;
        self.composer.success("Stop repeated")
    }

    fn cmd_measure_raw(&mut self) -> String {
        self.repeat.raw = true;
        self.repeat.calibrated = false;
        let reading = self.instrument.require_scale().and_then(|scale| {
            self.instrument
                .read_uncalibrated()
                .map(|value| format_value(value, scale.unit()))
        });
        match reading {
            Ok(text) => self.composer.success(&format!("Raw Value: {}", text)),
            Err(e) => self.composer.failure(&e, ""),
        }
    }

    fn cmd_measure_avg(&mut self) -> String {
        let reading = self.instrument.require_scale().and_then(|scale| {
            self.instrument
                .read_average(self.average_count)
                .map(|value| format_value(value, scale.unit()))
        });
        match reading {
            Ok(text) => self.composer.success(&format!("Avg. Value: {}", text)),
            Err(e) => self.composer.failure(&e, ""),
        }
    }

    fn cmd_save_eprom(&mut self) -> String {
        match self.store.save(Region::User, self.instrument.coefficients()) {
            Ok(changed) => self
                .composer
                .success(&format!("{} calibrations written to EPROM", changed)),
            Err(e) => self.composer.failure(&e, ""),
        }
    }

    fn cmd_verify_eprom(&mut self) -> String {
        let result = self.store.verify(Region::User, self.instrument.coefficients());
        self.composer
            .compose(&result, "EPROM Calibration data is verified")
    }

    fn cmd_export_calib(&mut self) -> String {
        let mut response = self.composer.success("Calibration data is exported");
        response.push_str(&self.instrument.coefficients().export());
        response
    }

    fn cmd_import_calib(&mut self, args: &mut Arguments<'_>) -> String {
        let (Some(index), Some(mult), Some(add)) = (args.next(), args.next(), args.next()) else {
            return self.composer.failure(&DmmError::WrongParams, "");
        };
        let parsed = index
            .parse::<i64>()
            .map_err(|_| "Invalid value, provide an integer number for the first token, corresponding to scale index")
            .and_then(|index| {
                mult.parse::<f32>()
                    .map(|mult| (index, mult))
                    .map_err(|_| "Invalid value, provide a float number for the second token, corresponding to Mult. coefficient")
            })
            .and_then(|(index, mult)| {
                add.parse::<f32>()
                    .map(|add| (index, mult, add))
                    .map_err(|_| "Invalid value, provide a float number for the third token, corresponding to Add. coefficient")
            });
        let (index, mult, add) = match parsed {
            Ok(values) => values,
            Err(msg) => return self.composer.failure(&DmmError::Generic(msg.to_string()), ""),
        };
        match self.instrument.coefficients_mut().import(index, mult, add) {
            Ok(scale) => self.composer.success(&format!(
                "Calibration coefficients imported for {} (index {})",
                scale.name(),
                scale.index()
            )),
            Err(e) => self.composer.failure(&e, ""),
        }
    }

    fn cmd_measure_for_calib(&mut self, polarity: Polarity) -> String {
        let label = match polarity {
            Polarity::Positive => "positive",
            Polarity::Negative => "negative",
        };
        let reading = self.instrument.require_scale().and_then(|scale| {
            self.workflow
                .measure_for_calib(&mut self.instrument, polarity)
                .map(|value| format_value(value, scale.unit()))
        });
        match reading {
            Ok(text) => self.composer.success(&format!(
                "Calibration {} measurement done. Measured Value: {}",
                label, text
            )),
            Err(e) => self.composer.failure(&e, ""),
        }
    }

    fn cmd_restore_factory(&mut self) -> String {
        let result = self
            .store
            .restore_factory_into_user(self.instrument.coefficients_mut());
        self.composer
            .compose(&result, "Calibration data restored from FACTORY EPROM")
    }

    fn cmd_read_serial_no(&mut self) -> String {
        match self.store.read_serial_number() {
            Ok(serial) => self.composer.success(&format!("SerialNo = \"{}\"", serial)),
            Err(e) => self.composer.failure(&e, ""),
        }
    }
}
