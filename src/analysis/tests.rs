use super::*;
use crate::analysis::classifier::HeuristicClassifier;

const SAMPLE_RATE: u32 = 44100;

/// Silence followed by sine bursts at the given frequencies
///
/// Each burst lasts 2048 samples and bursts are 10240 samples apart
/// (~232ms, well outside the debounce interval).
fn burst_signal(freqs: &[f32]) -> Vec<f32> {
    let lead_in = 4096;
    let spacing = 10240;
    let burst_len = 2048;
    let mut signal = vec![0.0; lead_in + spacing * freqs.len()];

    for (n, freq) in freqs.iter().enumerate() {
        let start = lead_in + n * spacing;
        for i in 0..burst_len {
            let t = i as f32 / SAMPLE_RATE as f32;
            signal[start + i] = 0.8 * (2.0 * std::f32::consts::PI * freq * t).sin();
        }
    }
    signal
}

fn transcriber() -> (Transcriber, SpectrumAnalyzer) {
    let config = AppConfig::default();
    let analyzer = SpectrumAnalyzer::new(config.analysis.window_size);
    (
        Transcriber::new(&config, Box::new(HeuristicClassifier)),
        analyzer,
    )
}

#[test]
fn test_silence_produces_no_hits() {
    let (mut transcriber, mut analyzer) = transcriber();
    let hits = transcriber.transcribe_samples(&mut analyzer, &vec![0.0; SAMPLE_RATE as usize]);
    assert!(hits.is_empty());
}

#[test]
fn test_each_burst_yields_one_hit() {
    let (mut transcriber, mut analyzer) = transcriber();
    let hits =
        transcriber.transcribe_samples(&mut analyzer, &burst_signal(&[80.0, 2000.0, 10000.0]));

    assert_eq!(hits.len(), 3, "hits: {:?}", hits.iter().map(|h| h.class).collect::<Vec<_>>());
}

#[test]
fn test_bursts_are_classified_by_band() {
    let (mut transcriber, mut analyzer) = transcriber();
    let hits =
        transcriber.transcribe_samples(&mut analyzer, &burst_signal(&[80.0, 2000.0, 10000.0]));

    let classes: Vec<DrumClass> = hits.iter().map(|h| h.class).collect();
    assert_eq!(classes, vec![DrumClass::Kick, DrumClass::Snare, DrumClass::Hat]);
}

#[test]
fn test_hit_times_follow_stream_clock() {
    let (mut transcriber, mut analyzer) = transcriber();
    let hits = transcriber.transcribe_samples(&mut analyzer, &burst_signal(&[80.0, 80.0]));

    assert_eq!(hits.len(), 2);
    let first_burst = 4096.0 / SAMPLE_RATE as f64;
    // Onset frame starts at most one window before the burst
    assert!(hits[0].time_secs <= first_burst);
    assert!(hits[0].time_secs > first_burst - 1024.0 / SAMPLE_RATE as f64);

    let spacing = hits[1].time_secs - hits[0].time_secs;
    assert!((spacing - 10240.0 / SAMPLE_RATE as f64).abs() < 1e-6);
}

#[test]
fn test_intensity_is_normalized() {
    let (mut transcriber, mut analyzer) = transcriber();
    let hits = transcriber.transcribe_samples(&mut analyzer, &burst_signal(&[2000.0]));

    assert_eq!(hits.len(), 1);
    assert!(hits[0].intensity > 0.0 && hits[0].intensity <= 1.0);
}

#[test]
fn test_stream_time_advances_per_frame() {
    let (mut transcriber, _) = transcriber();
    let frame = AnalysisFrame {
        magnitudes: vec![0.0; 512],
        energy: 0.0,
    };
    for _ in 0..10 {
        transcriber.process_frame(&frame);
    }
    let expected = 10.0 * 256.0 / SAMPLE_RATE as f64;
    assert!((transcriber.stream_time() - expected).abs() < 1e-12);
}
