use assert_cmd::Command;
use predicates::prelude::*;
use std::f32::consts::PI;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

const SAMPLE_RATE: u32 = 16_000;

fn write_voice(path: &Path, f0: f32, amplitude: f32) {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).expect("wav writer");
    for i in 0..SAMPLE_RATE {
        let t = i as f32 / SAMPLE_RATE as f32;
        let s = (1..=4)
            .map(|h| (2.0 * PI * f0 * h as f32 * t).sin() / h as f32)
            .sum::<f32>()
            * amplitude
            * 0.5;
        writer
            .write_sample((s * i16::MAX as f32) as i16)
            .expect("sample");
    }
    writer.finalize().expect("finalize");
}

fn write_table(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("emotions.csv");
    fs::write(
        &path,
        "Emotion,Pitch,Loudness,HNR\nJoy,high,raised,N/A\nSadness,low,dull,balanced\n",
    )
    .expect("table");
    path
}

fn soundcheck() -> Command {
    let mut cmd = Command::cargo_bin("soundcheck").expect("binary");
    cmd.env_remove("SOUNDCHECK_SAMPLES_DIR")
        .env_remove("SOUNDCHECK_EMOTION_TABLE")
        .env_remove("SOUNDCHECK_OUTPUT")
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn scores_every_sample_and_writes_tables() {
    let work = TempDir::new().expect("tempdir");
    let samples = work.path().join("samples");
    fs::create_dir(&samples).expect("mkdir");
    write_voice(&samples.join("calm.wav"), 110.0, 0.2);
    write_voice(&samples.join("excited.wav"), 320.0, 0.9);
    fs::write(samples.join("readme.txt"), "not audio").expect("txt");
    let table = write_table(work.path());
    let features = work.path().join("features.csv");
    let scores = work.path().join("scores.csv");
    let normalized = work.path().join("normalized.csv");

    soundcheck()
        .arg("--samples-dir")
        .arg(&samples)
        .arg("--emotion-table")
        .arg(&table)
        .arg("--output")
        .arg(&features)
        .arg("--scores-output")
        .arg(&scores)
        .arg("--normalized-output")
        .arg(&normalized)
        .args(["--extension", "wav", "--log-level", "warn"])
        .assert()
        .success()
        .stdout(predicate::str::contains("calm.wav"))
        .stdout(predicate::str::contains("excited.wav"))
        .stdout(predicate::str::contains("Sadness"));

    let raw = fs::read_to_string(&features).expect("features");
    let mut lines = raw.lines();
    let header = lines.next().expect("header");
    assert!(header.starts_with("filename,F0semitoneFrom27.5Hz_sma3nz_amean"));
    assert!(lines.next().expect("row").starts_with("calm.wav,"));
    assert!(lines.next().expect("row").starts_with("excited.wav,"));
    assert!(lines.next().is_none());

    let scores = fs::read_to_string(&scores).expect("scores");
    assert!(scores.starts_with("filename,Joy,Sadness\n"));
    // Pitch and loudness both peak on the excited sample.
    assert!(scores.contains("excited.wav,10.00,"));
    assert!(scores.contains("calm.wav,0.00,"));

    let normalized = fs::read_to_string(&normalized).expect("normalized");
    assert_eq!(normalized.lines().count(), 3);
}

#[test]
fn env_supplies_paths() {
    let work = TempDir::new().expect("tempdir");
    write_voice(&work.path().join("one.wav"), 180.0, 0.5);
    let table = write_table(work.path());
    let out = work.path().join("out.csv");

    soundcheck()
        .env("SOUNDCHECK_SAMPLES_DIR", work.path())
        .env("SOUNDCHECK_EMOTION_TABLE", &table)
        .env("SOUNDCHECK_OUTPUT", &out)
        .args(["--extension", ".WAV", "--log-level", "warn"])
        .assert()
        .success()
        .stdout(predicate::str::contains("one.wav"));

    assert!(out.exists());
}

#[test]
fn empty_directory_reports_no_results() {
    let work = TempDir::new().expect("tempdir");
    let samples = work.path().join("samples");
    fs::create_dir(&samples).expect("mkdir");
    let table = write_table(work.path());

    soundcheck()
        .arg("--samples-dir")
        .arg(&samples)
        .arg("--emotion-table")
        .arg(&table)
        .arg("--output")
        .arg(work.path().join("features.csv"))
        .args(["--log-level", "warn"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no results"));

    assert!(!work.path().join("features.csv").exists());
}

#[test]
fn missing_samples_dir_setting_fails() {
    let work = TempDir::new().expect("tempdir");
    let table = write_table(work.path());

    soundcheck()
        .arg("--emotion-table")
        .arg(&table)
        .assert()
        .failure()
        .stderr(predicate::str::contains("SOUNDCHECK_SAMPLES_DIR"));
}

#[test]
fn missing_label_column_fails() {
    let work = TempDir::new().expect("tempdir");
    write_voice(&work.path().join("one.wav"), 180.0, 0.5);
    let table = write_table(work.path());

    soundcheck()
        .arg("--samples-dir")
        .arg(work.path())
        .arg("--emotion-table")
        .arg(&table)
        .args(["--label-column", "Feeling", "--extension", "wav"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Feeling"));
}
