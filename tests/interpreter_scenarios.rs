use std::time::Duration;

use dmm_core::display::RecordingScreen;
use dmm_core::eprom::MemoryEprom;
use dmm_core::meter::{SimulatedMeter, SimulatorSettings};
use dmm_core::store::{CalibrationStore, Region, USER_BASE};
use dmm_core::transport::ScriptedTransport;
use dmm_core::{CoefficientTable, DmmError, Interpreter, Settings};

type Dmm = Interpreter<SimulatedMeter, MemoryEprom, RecordingScreen>;

fn settings() -> Settings {
    Settings {
        command_spacing_ms: 0,
        ..Default::default()
    }
}

fn quiet_meter(signal: f64) -> SimulatedMeter {
    SimulatedMeter::new(SimulatorSettings {
        noise_percent: 0.0,
        gain_error: 0.0,
        offset_error: 0.0,
        signal,
        ..Default::default()
    })
}

fn dmm_with(meter: SimulatedMeter, eprom: MemoryEprom) -> Dmm {
    let store = CalibrationStore::new(eprom, Duration::from_millis(5));
    Interpreter::new(meter, store, RecordingScreen::default(), &settings())
}

fn dmm() -> Dmm {
    dmm_with(quiet_meter(2.0), MemoryEprom::default())
}

/// Feeds `lines` through `poll` and returns everything written.
fn run(dmm: &mut Dmm, lines: &[&str]) -> String {
    let mut transport = ScriptedTransport::new(lines.iter().copied());
    while !transport.is_drained() {
        dmm.poll(&mut transport).unwrap();
    }
    transport.take_output()
}

fn saved_eprom(dmm: &Dmm) -> MemoryEprom {
    dmm.store().eprom().clone()
}

#[test]
fn config_then_raw_stream() {
    let mut dmm = dmm();
    let mut transport = ScriptedTransport::new(["DMMConfig VoltageDC5", "DMMMeasureRaw"]);
    dmm.poll(&mut transport).unwrap();
    dmm.poll(&mut transport).unwrap();
    let output = transport.take_output();
    let lines: Vec<&str> = output.split_terminator("\r\n").collect();
    assert_eq!(
        lines,
        [
            "Received command: DMMConfig VoltageDC5",
            "PASS, Selected scale index is: 7",
            "Received command: DMMMeasureRaw",
            "PASS, Raw Value: 2.0000 V",
        ]
    );

    dmm.poll(&mut transport).unwrap();
    dmm.poll(&mut transport).unwrap();
    assert_eq!(
        transport.take_output(),
        "Raw Value: 2.000000\r\nRaw Value: 2.000000\r\n"
    );
}

#[test]
fn bogus_scale_is_rejected_without_change() {
    let mut dmm = dmm();
    run(&mut dmm, &["DMMConfig CurrentDC5"]);
    let output = run(&mut dmm, &["DMMConfig BogusScale"]);
    assert!(output.ends_with("FAIL, Missing valid configuration: \"BogusScale\"\r\n"));
    assert_eq!(dmm.instrument().scale().unwrap().name(), "CurrentDC5");
    assert_eq!(dmm.screen().frame.scale.as_deref(), Some("CurrentDC5"));
}

#[test]
fn unknown_command_gets_a_diagnostic() {
    let mut dmm = dmm();
    let output = run(&mut dmm, &["dmmconfig VoltageDC5"]);
    assert_eq!(
        output,
        "Received command: dmmconfig VoltageDC5\r\nFAIL 0xEE, Unrecognized command: dmmconfig\r\n"
    );
    assert!(dmm.instrument().scale().is_none());
}

#[test]
fn rep_raw_and_stop_flags() {
    let mut dmm = dmm();
    run(&mut dmm, &["DMMConfig VoltageDC5", "DMMMeasureRep", "DMMMeasureRaw"]);
    let mode = dmm.repeat_mode();
    assert!(mode.raw);
    assert!(!mode.calibrated);

    run(&mut dmm, &["DMMMeasureStop"]);
    assert!(!dmm.repeat_mode().is_armed());
    let mut idle = ScriptedTransport::default();
    dmm.poll(&mut idle).unwrap();
    dmm.poll(&mut idle).unwrap();
    assert_eq!(idle.output(), "");
}

#[test]
fn calibrated_stream_refreshes_display_and_survives_timeouts() {
    let mut dmm = dmm();
    run(&mut dmm, &["DMMConfig VoltageDC5", "DMMImportCalib 7,1.5,0", "DMMMeasureRep"]);
    let mut transport = ScriptedTransport::default();

    dmm.instrument_mut().meter_mut().fail_next(1);
    dmm.poll(&mut transport).unwrap();
    dmm.poll(&mut transport).unwrap();
    assert_eq!(
        transport.take_output(),
        "FAIL 0xFA, Valid data DMM timeout\r\nValue: 3.0000 V\r\n"
    );
    assert!(dmm.repeat_mode().calibrated);
    assert_eq!(dmm.screen().frame.value, "3.0000 V");
}

#[test]
fn noisy_zero_calibration_is_rejected_then_stable_one_commits() {
    let meter = SimulatedMeter::new(SimulatorSettings {
        noise_percent: 50.0,
        gain_error: 0.0,
        offset_error: 0.001,
        signal: 0.0,
        ..Default::default()
    });
    let mut dmm = dmm_with(meter, MemoryEprom::default());
    run(&mut dmm, &["DMMConfig VoltageDC5"]);
    let before = dmm.instrument().coefficients().clone();

    let output = run(&mut dmm, &["DMMCalibZ"]);
    assert!(output.ends_with(
        "FAIL 0xF1, The calibration measurement dispersion exceeds accepted range\r\n"
    ));
    assert_eq!(dmm.instrument().coefficients(), &before);

    dmm.instrument_mut().meter_mut().set_noise_percent(0.0);
    let output = run(&mut dmm, &["DMMCalibZ"]);
    assert!(output.contains("PASS, Calibration on zero done. Reference: 0.0000 V"));
    assert!(output.contains("Measured: 5.0000 mV"));
    assert!(output.contains("Dispersion: 0.00%"));
    assert!(output.contains("Add. coeff: 0 -> "));

    let pair = dmm.instrument().current_pair().unwrap();
    approx::assert_relative_eq!(pair.add, -0.005, epsilon = 1e-6);
    approx::assert_relative_eq!(pair.mult, 1.0);
}

#[test]
fn two_point_calibration_fits_gain_and_offset() {
    // raw = 1.01 * signal + 0.01
    let meter = SimulatedMeter::new(SimulatorSettings {
        noise_percent: 0.0,
        gain_error: 0.01,
        offset_error: 0.002,
        signal: 4.0,
        ..Default::default()
    });
    let mut dmm = dmm_with(meter, MemoryEprom::default());
    run(&mut dmm, &["DMMConfig VoltageDC5", "DMMMeasureForCalibP"]);
    let output = run(&mut dmm, &["DMMFinalizeCalibP 4V"]);
    assert!(output.contains("PASS, Calibration on positive done. Reference: 4.0000 V"));

    dmm.instrument_mut().meter_mut().set_signal(-4.0);
    run(&mut dmm, &["DMMMeasureForCalibN"]);
    let output = run(&mut dmm, &["DMMFinalizeCalibN -4000mV"]);
    assert!(output.contains("PASS, Calibration on negative done. Reference: -4.0000 V"));

    let pair = dmm.instrument().current_pair().unwrap();
    approx::assert_relative_eq!(pair.mult, 1.0 / 1.01, epsilon = 1e-5);
    approx::assert_relative_eq!(pair.add, -0.01 / 1.01, epsilon = 1e-5);

    dmm.instrument_mut().meter_mut().set_signal(2.5);
    let output = run(&mut dmm, &["DMMMeasureAvg"]);
    assert!(output.ends_with("PASS, Avg. Value: 2.5000 V\r\n"));
}

#[test]
fn finalize_without_measure_is_a_state_error() {
    let mut dmm = dmm();
    run(&mut dmm, &["DMMConfig VoltageDC5"]);
    let before = dmm.instrument().coefficients().clone();
    let output = run(&mut dmm, &["DMMFinalizeCalibN -2"]);
    assert!(output.ends_with(&format!(
        "FAIL 0xF0, {}\r\n",
        DmmError::MissingMeasurement
    )));
    assert_eq!(dmm.instrument().coefficients(), &before);
}

#[test]
fn preview_does_not_touch_the_table() {
    let mut dmm = dmm();
    run(&mut dmm, &["DMMConfig VoltageDC5", "DMMMeasureForCalibP"]);
    let output = run(&mut dmm, &["DMMCalibP 1.9"]);
    assert!(output.ends_with(
        "PASS, Calibration on positive done. Reference: 1.9000 V, Measured: 2.0000 V, Dispersion: 0.00%\r\n"
    ));
    assert_eq!(dmm.instrument().coefficients(), &CoefficientTable::default());
}

#[test]
fn export_import_round_trip_through_commands() {
    let mut source = dmm();
    run(
        &mut source,
        &["DMMImportCalib 0,1.0125,-0.5", "DMMImportCalib 26,0.99,0.000125"],
    );
    let exported = run(&mut source, &["DMMExportCalib"]);
    let table_text = exported
        .split_once("PASS, Calibration data is exported\r\n")
        .map(|(_, table)| table)
        .unwrap();

    let mut target = dmm();
    let commands: Vec<String> = table_text
        .lines()
        .skip(1)
        .map(|line| format!("DMMImportCalib {}", line.trim_end()))
        .collect();
    assert_eq!(commands.len(), 27);
    let commands: Vec<&str> = commands.iter().map(String::as_str).collect();
    let output = run(&mut target, &commands);
    assert!(!output.contains("FAIL"));

    assert_eq!(target.instrument().coefficients(), source.instrument().coefficients());
    let again = run(&mut target, &["DMMExportCalib"]);
    assert_eq!(again.split_once("PASS").unwrap().1, exported.split_once("PASS").unwrap().1);
}

#[test]
fn save_reports_changed_entries_and_survives_restart() {
    let mut dmm = dmm();
    let output = run(&mut dmm, &["DMMSaveEPROM"]);
    assert!(output.ends_with("PASS, 27 calibrations written to EPROM\r\n"));

    let output = run(
        &mut dmm,
        &["DMMImportCalib 3,1.1,0", "DMMImportCalib 9,0.9,0.1", "DMMSaveEPROM"],
    );
    assert!(output.ends_with("PASS, 2 calibrations written to EPROM\r\n"));
    let output = run(&mut dmm, &["DMMSaveEPROM", "DMMVerifyEPROM"]);
    assert!(output.contains("PASS, 0 calibrations written to EPROM\r\n"));
    assert!(output.ends_with("PASS, EPROM Calibration data is verified\r\n"));

    let restarted = dmm_with(quiet_meter(0.0), saved_eprom(&dmm));
    assert_eq!(restarted.instrument().coefficients(), dmm.instrument().coefficients());
}

#[test]
fn corrupted_user_record_is_not_loaded() {
    let mut dmm = dmm();
    run(&mut dmm, &["DMMImportCalib 4,1.25,0", "DMMSaveEPROM"]);
    let mut eprom = saved_eprom(&dmm);
    let word = eprom.words()[USER_BASE + 4];
    eprom.poke(USER_BASE + 4, word ^ 0x0100);

    let mut restarted = dmm_with(quiet_meter(0.0), eprom);
    assert_eq!(restarted.instrument().coefficients(), &CoefficientTable::default());
    assert_eq!(
        restarted.store_mut().load(Region::User),
        Err(DmmError::Checksum)
    );
    let output = run(&mut restarted, &["DMMVerifyEPROM"]);
    assert!(output.ends_with("FAIL 0xFE, Wrong checksum when reading data from EPROM\r\n"));
}

#[test]
fn restore_factory_overwrites_user() {
    let mut factory = CoefficientTable::default();
    factory.import(7, 1.002, -0.0004).unwrap();
    let mut store = CalibrationStore::new(MemoryEprom::default(), Duration::from_millis(5));
    store.provision_factory(&factory).unwrap();

    let mut dmm = dmm_with(quiet_meter(0.0), store.eprom().clone());
    run(&mut dmm, &["DMMImportCalib 7,3,3"]);
    let output = run(&mut dmm, &["DMMRestoreFactCalibs"]);
    assert!(output.ends_with("PASS, Calibration data restored from FACTORY EPROM\r\n"));
    assert_eq!(dmm.instrument().coefficients(), &factory);
    assert_eq!(dmm.store_mut().load(Region::User).unwrap(), factory);
}

#[test]
fn restore_without_factory_record_keeps_table() {
    let mut dmm = dmm();
    run(&mut dmm, &["DMMImportCalib 7,3,3"]);
    let before = dmm.instrument().coefficients().clone();
    let output = run(&mut dmm, &["DMMRestoreFactCalibs"]);
    assert!(output.ends_with("FAIL 0xFD, Wrong magic number when reading data from EPROM\r\n"));
    assert_eq!(dmm.instrument().coefficients(), &before);
}

#[test]
fn stalled_eprom_times_out() {
    let mut eprom = MemoryEprom::default();
    eprom.set_stalled(true);
    let mut dmm = dmm_with(quiet_meter(0.0), eprom);
    let output = run(&mut dmm, &["DMMSaveEPROM"]);
    assert!(output.ends_with("FAIL 0xFF, EPROM write data ready timeout\r\n"));
}

#[test]
fn serial_number_round_trip() {
    let mut store = CalibrationStore::new(MemoryEprom::default(), Duration::from_millis(5));
    store.write_serial_number("DMM-000123").unwrap();
    let mut dmm = dmm_with(quiet_meter(0.0), store.eprom().clone());
    let output = run(&mut dmm, &["DMMReadSerialNo"]);
    assert!(output.ends_with("PASS, SerialNo = \"DMM-000123\"\r\n"));
}

#[test]
fn custom_status_prefixes() {
    let mut settings = settings();
    settings.status.success_prefix = "OK".into();
    settings.status.error_prefix = "ERR".into();
    let store = CalibrationStore::new(MemoryEprom::default(), Duration::from_millis(5));
    let mut dmm = Interpreter::new(quiet_meter(1.0), store, RecordingScreen::default(), &settings);
    assert_eq!(dmm.execute_line("DMMMeasureStop"), "OK, Stop repeated\r\n");
    assert_eq!(dmm.execute_line("DMMMeasureAvg"), "ERR 0xF6, No scale selected\r\n");
}
